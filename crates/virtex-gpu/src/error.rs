//! GPU error types.

use ash::vk;
use thiserror::Error;

/// GPU-related errors.
#[derive(Error, Debug)]
pub enum GpuError {
    /// Vulkan error.
    #[error("Vulkan error: {0}")]
    Vulkan(#[from] vk::Result),

    /// Vulkan loader could not be found.
    #[error("Failed to load Vulkan: {0}")]
    Loading(String),

    /// No suitable GPU found.
    #[error("No suitable GPU found")]
    NoSuitableDevice,

    /// The device lacks a feature sparse streaming needs.
    #[error("Sparse residency not supported: {0}")]
    SparseUnsupported(String),

    /// Memory allocation failed.
    #[error("Memory allocation failed: {0}")]
    AllocationFailed(String),

    /// Shader module creation failed.
    #[error("Shader compilation failed: {0}")]
    ShaderCompilation(String),

    /// Pipeline creation failed.
    #[error("Pipeline creation failed: {0}")]
    PipelineCreation(String),

    /// Resource not found.
    #[error("Resource not found: {0}")]
    ResourceNotFound(String),

    /// Invalid state.
    #[error("Invalid state: {0}")]
    InvalidState(String),
}

/// Result type alias.
pub type Result<T> = std::result::Result<T, GpuError>;

impl From<GpuError> for virtex_core::Error {
    fn from(error: GpuError) -> Self {
        match error {
            GpuError::AllocationFailed(msg) => Self::Allocation(msg),
            GpuError::ShaderCompilation(msg) | GpuError::PipelineCreation(msg) => {
                Self::ShaderCompilation(msg)
            }
            other => Self::Gpu(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn converts_to_core_error() {
        let core: virtex_core::Error = GpuError::AllocationFailed("heap".into()).into();
        assert!(matches!(core, virtex_core::Error::Allocation(msg) if msg == "heap"));

        let core: virtex_core::Error =
            GpuError::Vulkan(vk::Result::ERROR_DEVICE_LOST).into();
        assert!(matches!(core, virtex_core::Error::Gpu(_)));
    }
}
