//! Test support for virtex.
//!
//! Provides an emulated sparse device with controllable fence progress and
//! synthetic compressed images, so the streaming pipeline can be exercised
//! without GPU hardware.

pub mod device;
pub mod fixtures;

pub use device::{
    codes, default_formats, EmulatedBuffer, EmulatedDevice, EmulatedFence, EmulatorConfig,
    Fault, FenceProgress, FrameRecord,
};
pub use fixtures::{block_pattern, SyntheticImage};
