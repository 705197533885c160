//! Staged streaming of compressed pages into sparse textures.
//!
//! A [`StagingSlot`] owns one staging buffer and moves through
//! start, blit, upload and finish. A [`StagingPool`] holds a fixed set of
//! slots, and [`SparseTextureManager`] owns the texture and its committed
//! pages. [`PageStreamer`] queues page requests against the pool.

pub mod error;
pub mod pool;
pub mod slot;
pub mod streamer;
pub mod texture;

pub use error::{Result, StreamError};
pub use pool::StagingPool;
pub use slot::{FinishFlags, SlotState, StagingSlot, TransferDesc, TransferStatus};
pub use streamer::{PageStreamer, PumpReport};
pub use texture::{discover_geometry, SparseTextureManager};
