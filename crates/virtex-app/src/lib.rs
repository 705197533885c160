//! Streaming pipeline for virtex.
//!
//! [`Pipeline`] ties a staging pool, a sparse texture and a shader program to
//! one image source:
//! - `init` maps the header, discovers page geometry and populates the first pages
//! - `paint` draws the texture and surfaces device errors
//! - `quit` releases everything
//!
//! # Example
//!
//! ```no_run
//! use virtex_app::{init_logging, Pipeline, PipelineConfig};
//! use virtex_core::MappedImage;
//! use virtex_gpu::VulkanDeviceBuilder;
//!
//! fn main() -> anyhow::Result<()> {
//!     init_logging();
//!     let mut device = VulkanDeviceBuilder::new().build()?;
//!     let source = MappedImage::open("image.astc")?;
//!     let mut pipeline = Pipeline::init(&mut device, source, PipelineConfig::default())?;
//!     for frame in 0..60 {
//!         pipeline.paint(&mut device, 1280, 720, frame)?;
//!     }
//!     pipeline.quit(&mut device)?;
//!     Ok(())
//! }
//! ```

mod config;
mod error;
mod logging;
mod pipeline;

pub use config::{InitialPopulation, PipelineConfig};
pub use error::{PipelineError, Result};
pub use logging::{diagnostic_sink, init_logging, log_diagnostic};
pub use pipeline::{clear_color, Pipeline};

// Re-export commonly used types for convenience
pub use virtex_stream::{PageStreamer, PumpReport};
