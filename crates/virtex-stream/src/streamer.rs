//! Queue of page requests drained through idle staging slots.

use std::collections::VecDeque;

use hashbrown::HashSet;
use virtex_core::{CompressedImage, PageCoord, SparseDevice};

use crate::error::{Result, StreamError};
use crate::pool::StagingPool;
use crate::texture::SparseTextureManager;

/// What one [`PageStreamer::pump`] call did.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PumpReport {
    /// Transfers that completed since the last pump.
    pub completed: usize,
    /// Transfers started by this pump.
    pub started: usize,
    /// Requests still waiting for a slot.
    pub queued: usize,
}

/// Streams requested pages as slots become free.
///
/// Requests are served in order. A pump starts at most one transfer per idle
/// slot and leaves the rest queued, so the pool size bounds the work in
/// flight.
#[derive(Debug, Default)]
pub struct PageStreamer {
    queue: VecDeque<PageCoord>,
    queued: HashSet<PageCoord>,
    streamed: usize,
}

impl PageStreamer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a page. Returns `false` if it is already queued.
    pub fn request(&mut self, page: PageCoord) -> bool {
        if !self.queued.insert(page) {
            return false;
        }
        self.queue.push_back(page);
        true
    }

    /// Queue several pages, skipping duplicates. Returns how many were added.
    pub fn request_all(&mut self, pages: impl IntoIterator<Item = PageCoord>) -> usize {
        pages.into_iter().filter(|&page| self.request(page)).count()
    }

    /// Requests waiting for a slot.
    pub fn queued(&self) -> usize {
        self.queue.len()
    }

    pub fn is_idle(&self) -> bool {
        self.queue.is_empty()
    }

    /// Transfers started over the streamer's lifetime.
    pub const fn streamed(&self) -> usize {
        self.streamed
    }

    /// Reclaim finished slots, then start queued pages on idle ones.
    #[cfg_attr(feature = "profiling-tracy", tracing::instrument(level = "trace", skip_all))]
    pub fn pump<D: SparseDevice>(
        &mut self,
        device: &mut D,
        pool: &mut StagingPool<D>,
        manager: &mut SparseTextureManager,
        source: &CompressedImage<'_>,
    ) -> Result<PumpReport> {
        let completed = pool.poll_all(device)?.len();
        let mut started = 0;

        while let Some(&page) = self.queue.front() {
            let Some(index) = pool.idle_slot() else {
                break;
            };
            let slot = pool.slot_mut(index).ok_or(StreamError::NoSuchSlot(index))?;

            self.queue.pop_front();
            self.queued.remove(&page);
            manager.stream_page(device, slot, source, page.x, page.y)?;
            started += 1;
        }

        self.streamed += started;
        if started > 0 || completed > 0 {
            tracing::debug!(
                "Pumped {started} pages, {completed} completed, {} queued",
                self.queue.len()
            );
        }

        Ok(PumpReport {
            completed,
            started,
            queued: self.queue.len(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use virtex_core::{CompressedFormat, PageSize};
    use virtex_test::{EmulatedDevice, EmulatorConfig, FenceProgress, SyntheticImage};

    use crate::texture::discover_geometry;

    const FORMAT: CompressedFormat = CompressedFormat::Astc8x8Unorm;

    fn setup() -> (
        EmulatedDevice,
        StagingPool<EmulatedDevice>,
        SparseTextureManager,
        SyntheticImage,
    ) {
        let mut device = EmulatedDevice::new(
            EmulatorConfig::default()
                .with_page_size(FORMAT, PageSize::new(32, 32, 1))
                .progress(FenceProgress::Manual),
        );
        let geometry = discover_geometry(&device.compressed_formats(), FORMAT, 0).unwrap();
        let manager =
            SparseTextureManager::create(&mut device, 128, 128, FORMAT, geometry, 0).unwrap();
        let pool = StagingPool::new(&mut device, 2, 4096).unwrap();
        (device, pool, manager, SyntheticImage::new(FORMAT, 128, 128))
    }

    #[test]
    fn duplicate_requests_are_ignored() {
        let mut streamer = PageStreamer::new();
        assert!(streamer.request(PageCoord::new(1, 1)));
        assert!(!streamer.request(PageCoord::new(1, 1)));
        let added = streamer.request_all([PageCoord::new(0, 0), PageCoord::new(1, 1)]);
        assert_eq!(added, 1);
        assert_eq!(streamer.queued(), 2);
    }

    #[test]
    fn pump_respects_free_slots() {
        let (mut device, mut pool, mut manager, image) = setup();
        let source = CompressedImage::parse(image.bytes()).unwrap();
        let mut streamer = PageStreamer::new();
        streamer.request_all((0..4).flat_map(|y| (0..4).map(move |x| PageCoord::new(x, y))));

        let report = streamer
            .pump(&mut device, &mut pool, &mut manager, &source)
            .unwrap();
        assert_eq!(
            report,
            PumpReport {
                completed: 0,
                started: 2,
                queued: 14,
            }
        );

        // Nothing finished, nothing more can start
        let report = streamer
            .pump(&mut device, &mut pool, &mut manager, &source)
            .unwrap();
        assert_eq!(report.started, 0);

        let mut frames = 0;
        while !streamer.is_idle() {
            device.complete_all();
            streamer
                .pump(&mut device, &mut pool, &mut manager, &source)
                .unwrap();
            frames += 1;
            assert!(pool.in_flight_count() <= 2);
        }
        assert_eq!(frames, 7);
        assert_eq!(streamer.streamed(), 16);

        device.complete_all();
        let report = streamer
            .pump(&mut device, &mut pool, &mut manager, &source)
            .unwrap();
        assert_eq!(report.completed, 2);
        assert_eq!(manager.committed_count(), 16);
        assert_eq!(
            device.block_at(manager.handle(), 15, 15),
            Some(&image.expected_block(15, 15)[..])
        );
        assert!(device.take_error().is_none());

        pool.destroy(&mut device);
        manager.destroy(&mut device);
    }

    #[test]
    fn bad_request_surfaces_an_error() {
        let (mut device, mut pool, mut manager, image) = setup();
        let source = CompressedImage::parse(image.bytes()).unwrap();
        let mut streamer = PageStreamer::new();
        streamer.request(PageCoord::new(9, 9));

        assert!(matches!(
            streamer.pump(&mut device, &mut pool, &mut manager, &source),
            Err(StreamError::PageOutOfRange { x: 9, y: 9, .. })
        ));
        assert!(streamer.is_idle());
        assert_eq!(pool.idle_slot(), Some(0));
    }
}
