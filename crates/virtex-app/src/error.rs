//! Pipeline error types.

use thiserror::Error;
use virtex_core::{CompressedFormat, DeviceError};
use virtex_stream::StreamError;

/// Errors raised while starting, drawing or stopping the pipeline.
#[derive(Error, Debug)]
pub enum PipelineError {
    /// The image source has no mapped bytes.
    #[error("Source image is not mapped")]
    SourceUnmapped,

    /// Staging buffer allocation failed.
    #[error("Failed to allocate staging slots: {0}")]
    SlotAllocation(#[source] StreamError),

    /// The source header could not be parsed.
    #[error("Invalid image header: {0}")]
    InvalidHeader(#[source] virtex_core::Error),

    /// The device cannot back the configured format with the configured page size.
    #[error("Unsupported texture format: {0}")]
    UnsupportedFormat(#[source] virtex_core::Error),

    /// The image's block size does not match the configured format.
    #[error("Image is {found}, pipeline expects {expected}")]
    FormatMismatch {
        expected: CompressedFormat,
        found: CompressedFormat,
    },

    /// The shader program failed to link.
    #[error("Shader program failed: {0}")]
    Shader(#[source] virtex_core::Error),

    /// The device flagged an error.
    #[error("Device error: {0}")]
    Device(DeviceError),

    /// Texture or transfer failure.
    #[error(transparent)]
    Stream(#[from] StreamError),
}

/// Result type for pipeline operations.
pub type Result<T> = std::result::Result<T, PipelineError>;
