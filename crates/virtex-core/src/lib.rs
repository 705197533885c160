//! Core types and traits for virtex sparse texture streaming.
//!
//! This crate provides the foundational types used throughout the workspace:
//! - Compressed image header parsing
//! - Compressed formats and block geometry
//! - Sparse page geometry and texel regions
//! - The block copier used to repack compressed rows
//! - The `SparseDevice` backend trait

pub mod blit;
pub mod device;
pub mod error;
pub mod format;
pub mod geometry;
pub mod header;
pub mod source;

pub use blit::copy_blocks;
pub use device::{
    DeviceError, DeviceErrorKind, DeviceInfo, Diagnostic, DiagnosticSink, FenceStatus,
    FormatCaps, FrameDesc, MappedBuffer, ProgramHandle, Severity, ShaderStages, SparseDevice,
    SparseTextureDesc, TextureHandle, WaitOutcome,
};
pub use error::{Error, Result};
pub use format::{BlockGeometry, CompressedFormat};
pub use geometry::{PageCoord, PageGeometry, PageGrid, PageSize, TexelRegion};
pub use header::{CompressedImage, CompressedImageHeader};
pub use source::{ImageSource, MappedImage};

/// Workspace-wide constants.
pub mod constants {
    /// Number of staging slots in the reference sizing.
    pub const DEFAULT_SLOT_COUNT: usize = 16;
    /// Byte capacity of each staging slot in the reference sizing (2 MiB).
    pub const DEFAULT_SLOT_CAPACITY: u64 = 2 * 1024 * 1024;
    /// Page size index requested from the driver.
    pub const DEFAULT_PAGE_SIZE_INDEX: usize = 0;
}
