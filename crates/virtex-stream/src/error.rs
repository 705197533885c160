//! Error types for the transfer pipeline.

use thiserror::Error;

use crate::slot::SlotState;

/// Streaming error type.
#[derive(Error, Debug)]
pub enum StreamError {
    /// The slot still has a transfer outstanding.
    #[error("Staging slot {0} is busy")]
    SlotBusy(usize),

    /// The transfer payload does not fit the slot.
    #[error("Payload of {payload} bytes does not fit a {capacity} byte staging slot")]
    PayloadTooLarge { payload: u64, capacity: u64 },

    /// A slot operation was called out of order.
    #[error("Staging slot {slot} is {state:?}, expected {expected:?}")]
    InvalidState {
        slot: usize,
        state: SlotState,
        expected: SlotState,
    },

    /// Page coordinate outside the texture's page grid.
    #[error("Page ({x}, {y}) is outside the {pages_x}x{pages_y} page grid")]
    PageOutOfRange {
        x: u32,
        y: u32,
        pages_x: u32,
        pages_y: u32,
    },

    /// No staging slot with this index.
    #[error("No staging slot {0}")]
    NoSuchSlot(usize),

    /// Core, geometry or device error.
    #[error(transparent)]
    Core(#[from] virtex_core::Error),
}

/// Result type for streaming operations.
pub type Result<T> = std::result::Result<T, StreamError>;
