//! Staging slots.
//!
//! A slot owns one persistently mapped staging buffer and at most one
//! outstanding transfer. It moves through
//! `Idle -> Described -> PayloadReady -> InFlight -> Idle`; the mapped buffer
//! is written by the CPU only before `upload` and read by the GPU only until
//! the transfer's fence signals. A copy that was queued without a fence leaves
//! the slot `Faulted` until [`StagingSlot::finish`] manages to fence it.

use std::time::Duration;

use bitflags::bitflags;
use glam::UVec2;
use virtex_core::{
    copy_blocks, CompressedFormat, FenceStatus, MappedBuffer, PageGrid, SparseDevice,
    TexelRegion, TextureHandle, WaitOutcome,
};

use crate::error::{Result, StreamError};

/// Lifecycle state of a staging slot.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum SlotState {
    /// No transfer; the slot may be started.
    #[default]
    Idle,
    /// A transfer is described but the buffer holds no payload yet.
    Described,
    /// The payload is in the mapped buffer.
    PayloadReady,
    /// The GPU owns the buffer until the fence signals.
    InFlight,
    /// A copy is queued but fencing it failed.
    Faulted,
}

bitflags! {
    /// How [`StagingSlot::finish`] waits.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct FinishFlags: u8 {
        /// Make later GPU work wait for the transfer.
        const SERVER_WAIT = 0b0000_0001;
        /// Block the CPU up to the timeout.
        const CLIENT_WAIT = 0b0000_0010;
        /// Flush queued work before a client wait.
        const FLUSH = 0b0000_0100;
    }
}

/// Outcome of [`StagingSlot::finish`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TransferStatus {
    /// The transfer completed and the slot is idle again.
    Complete,
    /// The transfer is still running.
    Pending,
    /// The device could not report the fence state.
    Failed,
}

impl TransferStatus {
    /// Tri-state code: `1` complete, `0` pending, `-1` failed.
    #[inline]
    pub const fn code(self) -> i32 {
        match self {
            Self::Complete => 1,
            Self::Pending => 0,
            Self::Failed => -1,
        }
    }

    const fn from_wait(outcome: WaitOutcome) -> Self {
        match outcome {
            WaitOutcome::AlreadySignaled | WaitOutcome::ConditionSatisfied => Self::Complete,
            WaitOutcome::TimeoutExpired => Self::Pending,
            WaitOutcome::WaitFailed => Self::Failed,
        }
    }

    const fn from_status(status: FenceStatus) -> Self {
        match status {
            FenceStatus::Signaled => Self::Complete,
            FenceStatus::Unsignaled => Self::Pending,
            FenceStatus::Error => Self::Failed,
        }
    }
}

/// One block-aligned copy from the source image into the sparse texture.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TransferDesc {
    /// Destination texture.
    pub texture: TextureHandle,
    pub format: CompressedFormat,
    /// Page grid of the destination texture.
    pub grid: PageGrid,
    /// Byte pitch of one block row of the source payload.
    pub src_pitch: usize,
    /// Texel origin in the source image.
    pub src_origin: UVec2,
    /// Texel origin in the destination texture.
    pub dst_origin: UVec2,
    /// Region size in texels.
    pub extent: UVec2,
}

impl TransferDesc {
    /// Destination region in texels.
    pub const fn dst_region(&self) -> TexelRegion {
        TexelRegion::new(self.dst_origin.x, self.dst_origin.y, self.extent.x, self.extent.y)
    }

    /// Compressed size of the region.
    pub const fn payload_bytes(&self) -> u64 {
        self.grid.geometry.block.payload_bytes(self.extent.x, self.extent.y)
    }

    /// Byte pitch of one block row in the staging buffer.
    pub const fn staging_pitch(&self) -> usize {
        self.grid.geometry.block.row_pitch(self.extent.x)
    }
}

/// A persistently mapped staging buffer with its in-flight transfer.
pub struct StagingSlot<D: SparseDevice> {
    index: usize,
    buffer: D::Buffer,
    state: SlotState,
    desc: Option<TransferDesc>,
    committed: Option<TexelRegion>,
    fence: Option<D::Fence>,
}

impl<D: SparseDevice> StagingSlot<D> {
    /// Allocate a slot with `capacity` bytes of mapped staging memory.
    pub fn init(device: &mut D, index: usize, capacity: u64) -> Result<Self> {
        let buffer = device.create_staging_buffer(capacity)?;
        if (buffer.mapped().len() as u64) < capacity {
            let mapped = buffer.mapped().len();
            device.destroy_staging_buffer(buffer);
            return Err(virtex_core::Error::Allocation(format!(
                "staging slot {index} mapped {mapped} of {capacity} bytes"
            ))
            .into());
        }

        Ok(Self {
            index,
            buffer,
            state: SlotState::Idle,
            desc: None,
            committed: None,
            fence: None,
        })
    }

    /// Position of the slot in its pool.
    #[inline]
    pub const fn index(&self) -> usize {
        self.index
    }

    #[inline]
    pub const fn state(&self) -> SlotState {
        self.state
    }

    #[inline]
    pub fn capacity(&self) -> u64 {
        self.buffer.capacity()
    }

    #[inline]
    pub fn is_idle(&self) -> bool {
        self.state == SlotState::Idle
    }

    /// Whether a fence is outstanding.
    #[inline]
    pub const fn has_fence(&self) -> bool {
        self.fence.is_some()
    }

    /// The transfer being prepared or in flight.
    pub const fn transfer(&self) -> Option<&TransferDesc> {
        self.desc.as_ref()
    }

    /// Pages committed by the current transfer's upload, even if the copy
    /// itself then failed.
    pub const fn committed_cover(&self) -> Option<TexelRegion> {
        self.committed
    }

    /// Mapped staging bytes.
    pub fn staged(&self) -> &[u8] {
        self.buffer.mapped()
    }

    fn expect_state(&self, expected: SlotState) -> Result<()> {
        if self.state == expected {
            Ok(())
        } else {
            Err(StreamError::InvalidState {
                slot: self.index,
                state: self.state,
                expected,
            })
        }
    }

    fn described(&self) -> Result<TransferDesc> {
        self.desc.ok_or(StreamError::InvalidState {
            slot: self.index,
            state: self.state,
            expected: SlotState::Described,
        })
    }

    /// Describe the next transfer.
    ///
    /// Rejected without side effects if the slot is not idle or the payload
    /// does not fit.
    pub fn start(&mut self, desc: TransferDesc) -> Result<()> {
        if self.state != SlotState::Idle {
            return Err(StreamError::SlotBusy(self.index));
        }

        let payload = desc.payload_bytes();
        let capacity = self.capacity();
        if payload >= capacity {
            return Err(StreamError::PayloadTooLarge { payload, capacity });
        }

        tracing::debug!(
            "Slot {}: {}x{} texels from {} to {} ({payload} bytes)",
            self.index,
            desc.extent.x,
            desc.extent.y,
            desc.src_origin,
            desc.dst_origin,
        );
        self.desc = Some(desc);
        self.committed = None;
        self.state = SlotState::Described;
        Ok(())
    }

    /// Repack the described region of `src` into the mapped buffer.
    ///
    /// `src` is the source payload following the image header. Returns the
    /// number of blocks copied.
    pub fn blit(&mut self, src: &[u8]) -> Result<usize> {
        self.expect_state(SlotState::Described)?;
        let desc = self.described()?;
        let block = desc.grid.geometry.block;

        let blocks = copy_blocks(
            src,
            desc.src_pitch,
            desc.src_origin,
            self.buffer.mapped_mut(),
            desc.staging_pitch(),
            block,
            block.covering_extent(desc.extent.x, desc.extent.y),
        )?;

        self.state = SlotState::PayloadReady;
        Ok(blocks)
    }

    /// Commit the destination pages, queue the copy and fence it.
    ///
    /// Returns the page-aligned region that was committed. If the copy is
    /// queued but cannot be fenced the slot becomes [`SlotState::Faulted`].
    #[cfg_attr(feature = "profiling-tracy", tracing::instrument(level = "trace", skip_all))]
    pub fn upload(&mut self, device: &mut D) -> Result<TexelRegion> {
        self.expect_state(SlotState::PayloadReady)?;
        let desc = self.described()?;
        let region = desc.dst_region();
        let cover = desc.grid.aligned_cover(region);

        device.commit_region(desc.texture, cover, true)?;
        self.committed = Some(cover);
        device.upload_from_buffer(
            desc.texture,
            &self.buffer,
            region,
            desc.format,
            desc.payload_bytes(),
        )?;

        // The copy may read the buffer from here on
        match device.insert_fence() {
            Ok(fence) => {
                self.fence = Some(fence);
                self.state = SlotState::InFlight;
                Ok(cover)
            }
            Err(e) => {
                tracing::warn!("Slot {}: copy queued without a fence: {e}", self.index);
                self.state = SlotState::Faulted;
                Err(e.into())
            }
        }
    }

    /// Check or wait for the outstanding transfer.
    ///
    /// With `CLIENT_WAIT` this blocks for up to `client_timeout`. Otherwise a
    /// `SERVER_WAIT` is queued and the fence is polled. A `Complete` result
    /// releases the fence and returns the slot to idle. A faulted slot is
    /// fenced first.
    #[cfg_attr(feature = "profiling-tracy", tracing::instrument(level = "trace", skip_all))]
    pub fn finish(
        &mut self,
        device: &mut D,
        flags: FinishFlags,
        client_timeout: Duration,
    ) -> Result<TransferStatus> {
        if self.state == SlotState::Faulted {
            self.fence = Some(device.insert_fence()?);
            self.state = SlotState::InFlight;
            tracing::debug!("Slot {}: queued copy fenced", self.index);
        }
        self.expect_state(SlotState::InFlight)?;
        let Some(fence) = self.fence.as_ref() else {
            return Err(StreamError::InvalidState {
                slot: self.index,
                state: self.state,
                expected: SlotState::InFlight,
            });
        };

        let status = if flags.contains(FinishFlags::CLIENT_WAIT) {
            TransferStatus::from_wait(device.client_wait(
                fence,
                flags.contains(FinishFlags::FLUSH),
                client_timeout,
            ))
        } else {
            if flags.contains(FinishFlags::SERVER_WAIT) {
                device.server_wait(fence);
            }
            TransferStatus::from_status(device.fence_status(fence))
        };

        match status {
            TransferStatus::Complete => {
                self.fence = None;
                self.desc = None;
                self.committed = None;
                self.state = SlotState::Idle;
                tracing::debug!("Slot {}: transfer complete", self.index);
            }
            TransferStatus::Pending => {}
            TransferStatus::Failed => {
                tracing::warn!("Slot {}: fence query failed", self.index);
            }
        }
        Ok(status)
    }

    /// Drop a transfer whose copy has not been queued.
    pub fn cancel(&mut self) -> Result<()> {
        match self.state {
            SlotState::Described | SlotState::PayloadReady => {
                self.desc = None;
                self.committed = None;
                self.state = SlotState::Idle;
                Ok(())
            }
            SlotState::Idle => Ok(()),
            SlotState::InFlight | SlotState::Faulted => Err(StreamError::SlotBusy(self.index)),
        }
    }

    /// Release the buffer, waiting for any outstanding transfer first.
    pub fn destroy(mut self, device: &mut D) {
        if self.state == SlotState::Faulted {
            match device.insert_fence() {
                Ok(fence) => self.fence = Some(fence),
                Err(e) => tracing::warn!(
                    "Slot {}: cannot fence queued copy before release: {e}",
                    self.index
                ),
            }
        }
        if let Some(fence) = self.fence.take() {
            let outcome = device.client_wait(&fence, true, Duration::MAX);
            if !outcome.is_signaled() {
                tracing::warn!(
                    "Slot {}: destroyed with an unfinished transfer ({outcome:?})",
                    self.index
                );
            }
        }
        device.destroy_staging_buffer(self.buffer);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use virtex_core::{
        CompressedImage, PageCoord, PageGeometry, PageSize, SparseTextureDesc,
    };
    use virtex_test::{EmulatedDevice, EmulatorConfig, Fault, FenceProgress, SyntheticImage};

    const FORMAT: CompressedFormat = CompressedFormat::Astc8x8Unorm;

    struct Fixture {
        device: EmulatedDevice,
        texture: TextureHandle,
        grid: PageGrid,
        image: SyntheticImage,
    }

    fn fixture(progress: FenceProgress) -> Fixture {
        let mut device = EmulatedDevice::new(
            EmulatorConfig::default()
                .with_page_size(FORMAT, PageSize::new(32, 32, 1))
                .progress(progress),
        );
        let texture = device
            .create_sparse_texture(&SparseTextureDesc {
                width: 128,
                height: 128,
                format: FORMAT,
                page_size_index: 0,
            })
            .unwrap();
        let geometry = PageGeometry::new(PageSize::new(32, 32, 1), FORMAT.block()).unwrap();
        Fixture {
            device,
            texture,
            grid: PageGrid::new(128, 128, geometry),
            image: SyntheticImage::new(FORMAT, 128, 128),
        }
    }

    fn page_transfer(fx: &Fixture, page: PageCoord) -> TransferDesc {
        let region = fx.grid.page_region(page).unwrap();
        TransferDesc {
            texture: fx.texture,
            format: FORMAT,
            grid: fx.grid,
            src_pitch: FORMAT.block().row_pitch(128),
            src_origin: region.origin(),
            dst_origin: region.origin(),
            extent: region.extent(),
        }
    }

    fn payload(fx: &Fixture) -> &[u8] {
        CompressedImage::parse(fx.image.bytes()).unwrap().payload
    }

    #[test]
    fn transfer_lifecycle() {
        let mut fx = fixture(FenceProgress::Manual);
        let mut slot = StagingSlot::init(&mut fx.device, 0, 4096).unwrap();
        assert!(slot.is_idle());
        assert!(!slot.has_fence());

        slot.start(page_transfer(&fx, PageCoord::new(1, 2))).unwrap();
        assert_eq!(slot.state(), SlotState::Described);

        let src = payload(&fx).to_vec();
        assert_eq!(slot.blit(&src).unwrap(), 16);
        assert_eq!(slot.state(), SlotState::PayloadReady);
        assert_eq!(&slot.staged()[..16], fx.image.expected_block(4, 8));

        let cover = slot.upload(&mut fx.device).unwrap();
        assert_eq!(cover, TexelRegion::new(32, 64, 32, 32));
        assert_eq!(slot.state(), SlotState::InFlight);
        assert!(slot.has_fence());

        let status = slot
            .finish(&mut fx.device, FinishFlags::empty(), Duration::ZERO)
            .unwrap();
        assert_eq!(status, TransferStatus::Pending);
        assert_eq!(status.code(), 0);

        fx.device.complete_all();
        let status = slot
            .finish(&mut fx.device, FinishFlags::empty(), Duration::ZERO)
            .unwrap();
        assert_eq!(status.code(), 1);
        assert!(slot.is_idle());
        assert!(!slot.has_fence());
        assert_eq!(fx.device.live_fences(), 0);
        assert_eq!(
            fx.device.block_at(fx.texture, 7, 11),
            Some(&fx.image.expected_block(7, 11)[..])
        );

        slot.destroy(&mut fx.device);
        assert_eq!(fx.device.live_buffers(), 0);
    }

    #[test]
    fn steps_out_of_order_are_rejected() {
        let mut fx = fixture(FenceProgress::Manual);
        let mut slot = StagingSlot::init(&mut fx.device, 3, 4096).unwrap();
        let src = payload(&fx).to_vec();

        assert!(matches!(
            slot.blit(&src),
            Err(StreamError::InvalidState {
                slot: 3,
                state: SlotState::Idle,
                expected: SlotState::Described,
            })
        ));
        assert!(matches!(
            slot.upload(&mut fx.device),
            Err(StreamError::InvalidState { .. })
        ));
        assert!(matches!(
            slot.finish(&mut fx.device, FinishFlags::CLIENT_WAIT, Duration::ZERO),
            Err(StreamError::InvalidState { .. })
        ));

        slot.start(page_transfer(&fx, PageCoord::new(0, 0))).unwrap();
        assert!(matches!(
            slot.upload(&mut fx.device),
            Err(StreamError::InvalidState { .. })
        ));
        slot.destroy(&mut fx.device);
    }

    #[test]
    fn busy_slot_rejects_start_unchanged() {
        let mut fx = fixture(FenceProgress::Manual);
        let mut slot = StagingSlot::init(&mut fx.device, 0, 4096).unwrap();
        let first = page_transfer(&fx, PageCoord::new(0, 0));
        slot.start(first).unwrap();

        let second = page_transfer(&fx, PageCoord::new(1, 1));
        assert!(matches!(slot.start(second), Err(StreamError::SlotBusy(0))));
        assert_eq!(slot.transfer(), Some(&first));
        assert_eq!(slot.state(), SlotState::Described);

        slot.cancel().unwrap();
        assert!(slot.is_idle());
        slot.destroy(&mut fx.device);
    }

    #[test]
    fn payload_must_be_smaller_than_capacity() {
        let mut fx = fixture(FenceProgress::Manual);
        // One 32x32 page of ASTC 8x8 is exactly 256 bytes
        let mut slot = StagingSlot::init(&mut fx.device, 0, 256).unwrap();
        assert!(matches!(
            slot.start(page_transfer(&fx, PageCoord::new(0, 0))),
            Err(StreamError::PayloadTooLarge {
                payload: 256,
                capacity: 256
            })
        ));
        assert!(slot.is_idle());
        slot.destroy(&mut fx.device);
    }

    #[test]
    fn poll_completes_exactly_once() {
        let mut fx = fixture(FenceProgress::Immediate);
        let mut slot = StagingSlot::init(&mut fx.device, 0, 4096).unwrap();
        let src = payload(&fx).to_vec();
        slot.start(page_transfer(&fx, PageCoord::new(0, 0))).unwrap();
        slot.blit(&src).unwrap();
        slot.upload(&mut fx.device).unwrap();

        let status = slot
            .finish(&mut fx.device, FinishFlags::empty(), Duration::ZERO)
            .unwrap();
        assert_eq!(status, TransferStatus::Complete);
        assert!(matches!(
            slot.finish(&mut fx.device, FinishFlags::empty(), Duration::ZERO),
            Err(StreamError::InvalidState { .. })
        ));
        slot.destroy(&mut fx.device);
    }

    #[test]
    fn zero_timeout_client_wait_is_pending() {
        let mut fx = fixture(FenceProgress::OnWait);
        let mut slot = StagingSlot::init(&mut fx.device, 0, 4096).unwrap();
        let src = payload(&fx).to_vec();
        slot.start(page_transfer(&fx, PageCoord::new(2, 3))).unwrap();
        slot.blit(&src).unwrap();
        slot.upload(&mut fx.device).unwrap();

        let flags = FinishFlags::CLIENT_WAIT | FinishFlags::FLUSH;
        assert_eq!(
            slot.finish(&mut fx.device, flags, Duration::ZERO).unwrap(),
            TransferStatus::Pending
        );
        assert_eq!(
            slot.finish(&mut fx.device, flags, Duration::from_millis(5))
                .unwrap(),
            TransferStatus::Complete
        );
        slot.destroy(&mut fx.device);
    }

    #[test]
    fn server_wait_then_poll() {
        let mut fx = fixture(FenceProgress::Manual);
        let mut slot = StagingSlot::init(&mut fx.device, 0, 4096).unwrap();
        let src = payload(&fx).to_vec();
        slot.start(page_transfer(&fx, PageCoord::new(0, 0))).unwrap();
        slot.blit(&src).unwrap();
        slot.upload(&mut fx.device).unwrap();

        let status = slot
            .finish(&mut fx.device, FinishFlags::SERVER_WAIT, Duration::ZERO)
            .unwrap();
        assert_eq!(status, TransferStatus::Pending);
        assert_eq!(fx.device.server_waits(), 1);
        assert_eq!(slot.state(), SlotState::InFlight);
        slot.destroy(&mut fx.device);
    }

    #[test]
    fn failed_fence_keeps_the_transfer() {
        let mut fx = fixture(FenceProgress::Manual);
        let mut slot = StagingSlot::init(&mut fx.device, 0, 4096).unwrap();
        let src = payload(&fx).to_vec();
        slot.start(page_transfer(&fx, PageCoord::new(0, 0))).unwrap();
        slot.blit(&src).unwrap();
        slot.upload(&mut fx.device).unwrap();

        fx.device.set_fence_failure(true);
        let status = slot
            .finish(&mut fx.device, FinishFlags::CLIENT_WAIT, Duration::from_secs(1))
            .unwrap();
        assert_eq!(status.code(), -1);
        assert!(slot.has_fence());

        fx.device.set_fence_failure(false);
        slot.destroy(&mut fx.device);
        assert_eq!(fx.device.live_fences(), 0);
    }

    #[test]
    fn unfenced_copy_holds_the_slot() {
        let mut fx = fixture(FenceProgress::Manual);
        let mut slot = StagingSlot::init(&mut fx.device, 0, 4096).unwrap();
        let src = payload(&fx).to_vec();
        slot.start(page_transfer(&fx, PageCoord::new(0, 0))).unwrap();
        slot.blit(&src).unwrap();

        fx.device.fail_next(Fault::InsertFence);
        assert!(slot.upload(&mut fx.device).is_err());
        assert_eq!(slot.state(), SlotState::Faulted);
        assert!(!slot.has_fence());
        assert_eq!(slot.committed_cover(), Some(TexelRegion::new(0, 0, 32, 32)));

        assert!(matches!(
            slot.start(page_transfer(&fx, PageCoord::new(1, 0))),
            Err(StreamError::SlotBusy(0))
        ));
        assert!(matches!(slot.cancel(), Err(StreamError::SlotBusy(0))));

        // The queued copy is fenced on the next finish and completes normally
        let status = slot
            .finish(&mut fx.device, FinishFlags::empty(), Duration::ZERO)
            .unwrap();
        assert_eq!(status, TransferStatus::Pending);
        assert!(slot.has_fence());
        fx.device.complete_all();
        let status = slot
            .finish(&mut fx.device, FinishFlags::empty(), Duration::ZERO)
            .unwrap();
        assert_eq!(status, TransferStatus::Complete);
        assert!(slot.is_idle());
        assert_eq!(
            fx.device.block_at(fx.texture, 1, 1),
            Some(&fx.image.expected_block(1, 1)[..])
        );
        slot.destroy(&mut fx.device);
    }

    #[test]
    fn faulted_slot_waits_for_its_copy_on_destroy() {
        let mut fx = fixture(FenceProgress::OnWait);
        let mut slot = StagingSlot::init(&mut fx.device, 0, 4096).unwrap();
        let src = payload(&fx).to_vec();
        slot.start(page_transfer(&fx, PageCoord::new(2, 1))).unwrap();
        slot.blit(&src).unwrap();
        fx.device.fail_next(Fault::InsertFence);
        assert!(slot.upload(&mut fx.device).is_err());

        slot.destroy(&mut fx.device);
        assert_eq!(fx.device.live_buffers(), 0);
        assert_eq!(fx.device.live_fences(), 0);
        assert_eq!(fx.device.pending_submissions(), 0);
        assert_eq!(
            fx.device.block_at(fx.texture, 8, 4),
            Some(&fx.image.expected_block(8, 4)[..])
        );
    }

    #[test]
    fn failed_copy_still_reports_its_cover() {
        let mut fx = fixture(FenceProgress::Manual);
        let mut slot = StagingSlot::init(&mut fx.device, 0, 4096).unwrap();
        let src = payload(&fx).to_vec();
        slot.start(page_transfer(&fx, PageCoord::new(1, 1))).unwrap();
        slot.blit(&src).unwrap();

        fx.device.fail_next(Fault::UploadFromBuffer);
        assert!(slot.upload(&mut fx.device).is_err());
        assert_eq!(slot.state(), SlotState::PayloadReady);
        assert_eq!(slot.committed_cover(), Some(TexelRegion::new(32, 32, 32, 32)));

        slot.cancel().unwrap();
        assert!(slot.is_idle());
        assert_eq!(slot.committed_cover(), None);
        slot.destroy(&mut fx.device);
    }

    #[test]
    fn edge_regions_round_up_to_whole_blocks() {
        let mut device = EmulatedDevice::new(
            EmulatorConfig::default().with_page_size(FORMAT, PageSize::new(32, 32, 1)),
        );
        let texture = device
            .create_sparse_texture(&SparseTextureDesc {
                width: 44,
                height: 44,
                format: FORMAT,
                page_size_index: 0,
            })
            .unwrap();
        let geometry = PageGeometry::new(PageSize::new(32, 32, 1), FORMAT.block()).unwrap();
        let grid = PageGrid::new(44, 44, geometry);
        let image = SyntheticImage::new(FORMAT, 44, 44);
        let parsed = CompressedImage::parse(image.bytes()).unwrap();

        let region = grid.page_region(PageCoord::new(1, 1)).unwrap();
        assert_eq!(region, TexelRegion::new(32, 32, 12, 12));

        let mut slot = StagingSlot::init(&mut device, 0, 4096).unwrap();
        slot.start(TransferDesc {
            texture,
            format: FORMAT,
            grid,
            src_pitch: parsed.row_pitch(),
            src_origin: region.origin(),
            dst_origin: region.origin(),
            extent: region.extent(),
        })
        .unwrap();
        assert_eq!(slot.blit(parsed.payload).unwrap(), 4);
        slot.upload(&mut device).unwrap();
        slot.finish(&mut device, FinishFlags::CLIENT_WAIT, Duration::from_secs(1))
            .unwrap();

        assert_eq!(
            device.block_at(texture, 5, 5),
            Some(&image.expected_block(5, 5)[..])
        );
        slot.destroy(&mut device);
    }
}
