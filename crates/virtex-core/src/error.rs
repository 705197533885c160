//! Error types shared by the virtex crates.

use thiserror::Error;

use crate::device::DeviceError;
use crate::format::CompressedFormat;

/// Core error type.
#[derive(Error, Debug)]
pub enum Error {
    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The source image bytes are not available.
    #[error("Source image is not mapped")]
    SourceUnmapped,

    /// Header magic does not identify a compressed image.
    #[error("Bad image magic: {0:02X?}")]
    BadMagic([u8; 4]),

    /// Image declares a depth other than one.
    #[error("Unsupported image depth {0} (must be 1)")]
    UnsupportedDepth(u32),

    /// Image is shorter than its header claims.
    #[error("Truncated image: expected {expected} bytes, found {actual}")]
    Truncated { expected: u64, actual: u64 },

    /// Header block dimensions name no known format.
    #[error("No compressed format with {x}x{y}x{z} blocks")]
    UnknownBlockSize { x: u8, y: u8, z: u8 },

    /// The requested format is not reported by the driver.
    #[error("Compressed format {0:?} is not supported by the device")]
    UnsupportedFormat(CompressedFormat),

    /// The requested page size index is not reported for the format.
    #[error("Format {format:?} has no virtual page size at index {index}")]
    NoPageSize {
        format: CompressedFormat,
        index: usize,
    },

    /// Geometry that breaks block or page alignment.
    #[error("Misaligned region: {0}")]
    Misaligned(String),

    /// Out of bounds access
    #[error("Out of bounds: {0}")]
    OutOfBounds(String),

    /// Inconsistent page or block geometry.
    #[error("Invalid geometry: {0}")]
    InvalidGeometry(String),

    /// Memory allocation failed.
    #[error("Allocation failed: {0}")]
    Allocation(String),

    /// Shader program could not be built.
    #[error("Shader compilation failed: {0}")]
    ShaderCompilation(String),

    /// Error flagged by the device.
    #[error("Device error: {0}")]
    Device(DeviceError),

    /// GPU API error
    #[error("GPU error: {0}")]
    Gpu(String),
}

/// Result type alias using our Error type.
pub type Result<T> = std::result::Result<T, Error>;
