//! Vulkan backend for sparse texture streaming.
//!
//! This crate provides:
//! - Instance and device setup with sparse residency features
//! - Sparse image creation and page binding
//! - Staging buffers and fenced buffer-to-image uploads
//! - A fullscreen sampling pipeline rendered offscreen
//! - Validation messages routed to a diagnostic sink
//!
//! [`VulkanDevice`] ties these together behind [`virtex_core::SparseDevice`].

pub mod backend;
pub mod capabilities;
pub mod command;
pub mod context;
pub mod debug;
pub mod descriptors;
pub mod error;
pub mod instance;
pub mod memory;
pub mod pipeline;
pub mod sparse;
pub mod sync;

pub use backend::{VulkanDevice, VulkanDeviceBuilder};
pub use capabilities::{GpuCapabilities, GpuVendor};
pub use context::{GpuContext, GpuContextBuilder};
pub use debug::{DebugMessenger, DiagnosticHub};
pub use descriptors::{TextureBindings, TEXTURE_BINDING};
pub use error::{GpuError, Result};
pub use memory::{GpuAllocator, GpuBuffer, GpuImage};
pub use pipeline::{GraphicsPipeline, GraphicsPipelineConfig};
pub use sparse::{query_sparse_formats, vk_format, SparseImage};
pub use sync::{create_fence, GpuFence};
