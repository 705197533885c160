//! Pipeline configuration.

use virtex_core::constants::{DEFAULT_PAGE_SIZE_INDEX, DEFAULT_SLOT_CAPACITY, DEFAULT_SLOT_COUNT};
use virtex_core::{CompressedFormat, PageCoord};

/// Pages made resident while the pipeline starts.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum InitialPopulation {
    /// Stream one page through slot 0 and queue a GPU-side wait on it.
    Stream { page: PageCoord },
    /// Fill pages synchronously through the direct path.
    Fill { pages: Vec<PageCoord> },
    /// Start with no resident pages.
    None,
}

impl Default for InitialPopulation {
    fn default() -> Self {
        Self::Stream {
            page: PageCoord::new(0, 0),
        }
    }
}

/// Pipeline configuration.
#[derive(Clone, Debug)]
pub struct PipelineConfig {
    /// Number of staging slots.
    pub slot_count: usize,
    /// Byte capacity of each staging slot.
    pub slot_capacity: u64,
    /// Compressed format the texture is created with.
    pub format: CompressedFormat,
    /// Index into the driver's page sizes for `format`.
    pub page_size_index: usize,
    /// Pages made resident during init.
    pub initial: InitialPopulation,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            slot_count: DEFAULT_SLOT_COUNT,
            slot_capacity: DEFAULT_SLOT_CAPACITY,
            format: CompressedFormat::Astc8x8Unorm,
            page_size_index: DEFAULT_PAGE_SIZE_INDEX,
            initial: InitialPopulation::default(),
        }
    }
}

impl PipelineConfig {
    /// Create a config with default sizing.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the staging pool size.
    #[must_use]
    pub const fn with_slots(mut self, count: usize, capacity: u64) -> Self {
        self.slot_count = count;
        self.slot_capacity = capacity;
        self
    }

    /// Set the texture format.
    #[must_use]
    pub const fn with_format(mut self, format: CompressedFormat) -> Self {
        self.format = format;
        self
    }

    /// Set the page size index.
    #[must_use]
    pub const fn with_page_size_index(mut self, index: usize) -> Self {
        self.page_size_index = index;
        self
    }

    /// Set the initial population.
    #[must_use]
    pub fn with_initial(mut self, initial: InitialPopulation) -> Self {
        self.initial = initial;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_sizing() {
        let config = PipelineConfig::default();
        assert_eq!(config.slot_count, 16);
        assert_eq!(config.slot_capacity, 2 * 1024 * 1024);
        assert_eq!(config.format, CompressedFormat::Astc8x8Unorm);
        assert_eq!(config.page_size_index, 0);
        assert_eq!(
            config.initial,
            InitialPopulation::Stream {
                page: PageCoord::new(0, 0)
            }
        );
    }

    #[test]
    fn builder_overrides() {
        let config = PipelineConfig::new()
            .with_slots(4, 4096)
            .with_format(CompressedFormat::Astc4x4Unorm)
            .with_page_size_index(1)
            .with_initial(InitialPopulation::None);
        assert_eq!(config.slot_count, 4);
        assert_eq!(config.slot_capacity, 4096);
        assert_eq!(config.format, CompressedFormat::Astc4x4Unorm);
        assert_eq!(config.page_size_index, 1);
        assert_eq!(config.initial, InitialPopulation::None);
    }
}
