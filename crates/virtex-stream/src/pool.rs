//! Fixed pool of staging slots.

use std::time::Duration;

use virtex_core::SparseDevice;

use crate::error::Result;
use crate::slot::{FinishFlags, SlotState, StagingSlot, TransferStatus};

/// Staging slots of equal capacity, created and destroyed together.
///
/// The pool size bounds the number of transfers in flight: once every slot is
/// busy, [`idle_slot`](Self::idle_slot) returns `None` until a transfer
/// completes.
pub struct StagingPool<D: SparseDevice> {
    slots: Vec<StagingSlot<D>>,
    capacity: u64,
}

impl<D: SparseDevice> StagingPool<D> {
    /// Allocate `count` slots of `capacity` bytes each.
    ///
    /// If any allocation fails the slots created so far are released.
    pub fn new(device: &mut D, count: usize, capacity: u64) -> Result<Self> {
        let mut slots = Vec::with_capacity(count);
        for index in 0..count {
            match StagingSlot::init(device, index, capacity) {
                Ok(slot) => slots.push(slot),
                Err(e) => {
                    tracing::error!("Failed to allocate staging slot {index}: {e}");
                    for slot in slots {
                        slot.destroy(device);
                    }
                    return Err(e);
                }
            }
        }

        tracing::info!(
            "Staging pool: {count} slots x {} KiB",
            capacity / 1024
        );
        Ok(Self { slots, capacity })
    }

    pub fn slot(&self, index: usize) -> Option<&StagingSlot<D>> {
        self.slots.get(index)
    }

    pub fn slot_mut(&mut self, index: usize) -> Option<&mut StagingSlot<D>> {
        self.slots.get_mut(index)
    }

    /// Number of slots.
    #[inline]
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Byte capacity of each slot.
    #[inline]
    pub const fn capacity(&self) -> u64 {
        self.capacity
    }

    /// Index of the first idle slot.
    pub fn idle_slot(&self) -> Option<usize> {
        self.slots.iter().position(StagingSlot::is_idle)
    }

    /// Number of slots whose copy has been queued and not yet completed.
    pub fn in_flight_count(&self) -> usize {
        self.slots.iter().filter(|slot| queued(slot.state())).count()
    }

    pub fn iter(&self) -> impl Iterator<Item = &StagingSlot<D>> {
        self.slots.iter()
    }

    /// Poll every in-flight slot without blocking. Faulted slots are fenced
    /// on the way.
    ///
    /// Returns the indices of the slots that completed.
    pub fn poll_all(&mut self, device: &mut D) -> Result<Vec<usize>> {
        let mut completed = Vec::new();
        for slot in &mut self.slots {
            if !queued(slot.state()) {
                continue;
            }
            if slot.finish(device, FinishFlags::empty(), Duration::ZERO)?
                == TransferStatus::Complete
            {
                completed.push(slot.index());
            }
        }
        Ok(completed)
    }

    /// Release every slot, waiting for outstanding transfers.
    pub fn destroy(self, device: &mut D) {
        for slot in self.slots {
            slot.destroy(device);
        }
    }
}

const fn queued(state: SlotState) -> bool {
    matches!(state, SlotState::InFlight | SlotState::Faulted)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StreamError;
    use crate::slot::TransferDesc;
    use glam::UVec2;
    use virtex_core::{
        CompressedFormat, CompressedImage, PageGeometry, PageGrid, PageSize, SparseTextureDesc,
        TextureHandle,
    };
    use virtex_test::{EmulatedDevice, EmulatorConfig, FenceProgress, SyntheticImage};

    const FORMAT: CompressedFormat = CompressedFormat::Astc8x8Unorm;

    fn device() -> (EmulatedDevice, TextureHandle, PageGrid) {
        let mut device = EmulatedDevice::new(
            EmulatorConfig::default()
                .with_page_size(FORMAT, PageSize::new(32, 32, 1))
                .progress(FenceProgress::Manual),
        );
        let texture = device
            .create_sparse_texture(&SparseTextureDesc {
                width: 256,
                height: 256,
                format: FORMAT,
                page_size_index: 0,
            })
            .unwrap();
        let geometry = PageGeometry::new(PageSize::new(32, 32, 1), FORMAT.block()).unwrap();
        (device, texture, PageGrid::new(256, 256, geometry))
    }

    fn transfer(texture: TextureHandle, grid: PageGrid, n: u32) -> TransferDesc {
        let origin = UVec2::new(n % 8 * 32, n / 8 * 32);
        TransferDesc {
            texture,
            format: FORMAT,
            grid,
            src_pitch: FORMAT.block().row_pitch(256),
            src_origin: origin,
            dst_origin: origin,
            extent: UVec2::splat(32),
        }
    }

    #[test]
    fn failed_allocation_releases_created_slots() {
        let mut device = EmulatedDevice::new(EmulatorConfig::default().max_staging_buffers(3));
        let result = StagingPool::new(&mut device, 4, 1024);
        assert!(matches!(result, Err(StreamError::Core(_))));
        assert_eq!(device.live_buffers(), 0);
    }

    #[test]
    fn exhausted_pool_applies_backpressure() {
        let (mut device, texture, grid) = device();
        let image = SyntheticImage::new(FORMAT, 256, 256);
        let src = CompressedImage::parse(image.bytes()).unwrap().payload;
        let mut pool = StagingPool::new(&mut device, 4, 4096).unwrap();
        assert_eq!(pool.len(), 4);
        assert_eq!(pool.idle_slot(), Some(0));

        for n in 0..4 {
            let index = pool.idle_slot().unwrap();
            let slot = pool.slot_mut(index).unwrap();
            slot.start(transfer(texture, grid, n)).unwrap();
            slot.blit(src).unwrap();
            slot.upload(&mut device).unwrap();
        }
        assert_eq!(pool.in_flight_count(), 4);
        assert_eq!(pool.idle_slot(), None);

        for index in 0..pool.len() {
            let slot = pool.slot_mut(index).unwrap();
            assert!(matches!(
                slot.start(transfer(texture, grid, 4)),
                Err(StreamError::SlotBusy(i)) if i == index
            ));
        }
        assert!(pool.poll_all(&mut device).unwrap().is_empty());

        assert!(device.complete_next());
        assert_eq!(pool.poll_all(&mut device).unwrap(), vec![0]);
        assert_eq!(pool.idle_slot(), Some(0));
        pool.slot_mut(0)
            .unwrap()
            .start(transfer(texture, grid, 4))
            .unwrap();

        device.complete_all();
        assert_eq!(pool.poll_all(&mut device).unwrap(), vec![1, 2, 3]);
        assert_eq!(pool.in_flight_count(), 0);

        pool.destroy(&mut device);
        assert_eq!(device.live_buffers(), 0);
        assert_eq!(device.live_fences(), 0);
    }

    #[test]
    fn destroy_releases_outstanding_fences() {
        let (mut device, texture, grid) = device();
        let image = SyntheticImage::new(FORMAT, 256, 256);
        let src = CompressedImage::parse(image.bytes()).unwrap().payload;
        let mut pool = StagingPool::new(&mut device, 2, 4096).unwrap();

        let slot = pool.slot_mut(1).unwrap();
        slot.start(transfer(texture, grid, 9)).unwrap();
        slot.blit(src).unwrap();
        slot.upload(&mut device).unwrap();
        assert_eq!(device.live_fences(), 1);

        pool.destroy(&mut device);
        assert_eq!(device.live_fences(), 0);
        assert_eq!(device.live_buffers(), 0);
    }
}
