//! Command recording.
//!
//! Staged copies go into one open command buffer owned by an
//! [`UploadRecorder`]. The buffer is submitted when a fence is requested, so
//! each fence covers exactly the copies recorded before it.

use crate::error::{GpuError, Result};
use crate::sync::{create_fence, wait_for_fence, GpuFence};
use ash::vk;
use std::sync::Arc;

/// Resettable command pool on the streaming queue family.
pub struct CommandPool {
    pool: vk::CommandPool,
}

impl CommandPool {
    /// Create a pool whose buffers can be reset individually.
    ///
    /// # Safety
    /// The device must be valid and the queue family must exist.
    pub unsafe fn new(device: &ash::Device, queue_family: u32) -> Result<Self> {
        let create_info = vk::CommandPoolCreateInfo::default()
            .queue_family_index(queue_family)
            .flags(vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER);
        let pool = device.create_command_pool(&create_info, None)?;
        Ok(Self { pool })
    }

    /// Allocate one primary command buffer.
    ///
    /// # Safety
    /// The device must be valid.
    pub unsafe fn allocate(&self, device: &ash::Device) -> Result<vk::CommandBuffer> {
        let alloc_info = vk::CommandBufferAllocateInfo::default()
            .command_pool(self.pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(1);
        Ok(device.allocate_command_buffers(&alloc_info)?[0])
    }

    /// # Safety
    /// `cmd` must come from this pool and must not be pending execution.
    pub unsafe fn free(&self, device: &ash::Device, cmd: vk::CommandBuffer) {
        device.free_command_buffers(self.pool, &[cmd]);
    }

    /// # Safety
    /// No buffer from the pool may be pending execution.
    pub unsafe fn destroy(&self, device: &ash::Device) {
        device.destroy_command_pool(self.pool, None);
    }
}

/// Begin a buffer for a single submission.
///
/// # Safety
/// The device and command buffer must be valid.
pub unsafe fn begin_one_time(device: &ash::Device, cmd: vk::CommandBuffer) -> Result<()> {
    let begin_info =
        vk::CommandBufferBeginInfo::default().flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
    device.begin_command_buffer(cmd, &begin_info)?;
    Ok(())
}

/// Submit `command_buffers`, signaling `fence` once they and every earlier
/// submission on `queue` have completed.
///
/// # Safety
/// All handles must be valid.
#[cfg_attr(feature = "profiling-tracy", tracing::instrument(level = "trace", skip_all))]
pub unsafe fn submit(
    device: &ash::Device,
    queue: vk::Queue,
    command_buffers: &[vk::CommandBuffer],
    fence: vk::Fence,
) -> Result<()> {
    let submit_info = vk::SubmitInfo::default().command_buffers(command_buffers);
    device.queue_submit(queue, &[submit_info], fence)?;
    Ok(())
}

/// Record with `f`, submit, and block until the GPU has finished.
///
/// # Safety
/// All handles must be valid.
pub unsafe fn submit_and_wait<F>(
    device: &ash::Device,
    pool: &CommandPool,
    queue: vk::Queue,
    f: F,
) -> Result<()>
where
    F: FnOnce(vk::CommandBuffer),
{
    let cmd = pool.allocate(device)?;
    let fence = match create_fence(device, false) {
        Ok(fence) => fence,
        Err(e) => {
            pool.free(device, cmd);
            return Err(e);
        }
    };

    let result = (|| {
        begin_one_time(device, cmd)?;
        f(cmd);
        device.end_command_buffer(cmd)?;
        submit(device, queue, &[cmd], fence)?;
        wait_for_fence(device, fence, u64::MAX)
    })();

    device.destroy_fence(fence, None);
    pool.free(device, cmd);
    result
}

/// A submission whose command buffer goes back to the pool once its fence
/// signals.
struct Submission {
    command_buffer: Option<vk::CommandBuffer>,
    fence: GpuFence,
}

/// Batches staged copies between fences.
pub struct UploadRecorder {
    pool: CommandPool,
    open: Option<vk::CommandBuffer>,
    in_flight: Vec<Submission>,
}

impl UploadRecorder {
    /// # Safety
    /// The device must be valid and the queue family must exist.
    pub unsafe fn new(device: &ash::Device, queue_family: u32) -> Result<Self> {
        Ok(Self {
            pool: CommandPool::new(device, queue_family)?,
            open: None,
            in_flight: Vec::new(),
        })
    }

    /// The pool the recorder allocates from.
    pub const fn pool(&self) -> &CommandPool {
        &self.pool
    }

    /// Whether copies are recorded but not yet submitted.
    pub const fn has_pending(&self) -> bool {
        self.open.is_some()
    }

    /// Submissions whose fence has not been seen signaled.
    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }

    /// The open command buffer, begun on first use.
    ///
    /// # Safety
    /// The device must be valid.
    pub unsafe fn open(&mut self, device: &ash::Device) -> Result<vk::CommandBuffer> {
        if let Some(cmd) = self.open {
            return Ok(cmd);
        }
        let cmd = self.pool.allocate(device)?;
        if let Err(e) = begin_one_time(device, cmd) {
            self.pool.free(device, cmd);
            return Err(e);
        }
        self.open = Some(cmd);
        Ok(cmd)
    }

    /// Submit the open buffer, or an empty batch if nothing was recorded,
    /// with a new fence.
    ///
    /// # Safety
    /// `device` must be the device the pool was created on and `queue` one of
    /// its queues.
    pub unsafe fn submit(&mut self, device: &Arc<ash::Device>, queue: vk::Queue) -> Result<GpuFence> {
        let command_buffer = self.open.take();
        let fence = GpuFence::new(Arc::clone(device))?;

        let submitted = command_buffer
            .map_or(Ok(()), |cmd| device.end_command_buffer(cmd).map_err(GpuError::from))
            .and_then(|()| submit(device, queue, command_buffer.as_slice(), fence.handle()));
        if let Err(e) = submitted {
            if let Some(cmd) = command_buffer {
                self.pool.free(device, cmd);
            }
            return Err(e);
        }

        self.in_flight.push(Submission {
            command_buffer,
            fence: fence.share(),
        });
        self.recycle(device);
        Ok(fence)
    }

    /// Return command buffers of completed submissions to the pool.
    ///
    /// # Safety
    /// `device` must be the device the pool was created on.
    pub unsafe fn recycle(&mut self, device: &ash::Device) {
        let pool = &self.pool;
        self.in_flight.retain(|submission| {
            if !matches!(submission.fence.is_signaled(), Ok(true)) {
                return true;
            }
            if let Some(cmd) = submission.command_buffer {
                pool.free(device, cmd);
            }
            false
        });
    }

    /// Free every command buffer and the pool.
    ///
    /// # Safety
    /// The device must be idle.
    pub unsafe fn destroy(&mut self, device: &ash::Device) {
        if let Some(cmd) = self.open.take() {
            self.pool.free(device, cmd);
        }
        for submission in self.in_flight.drain(..) {
            if let Some(cmd) = submission.command_buffer {
                self.pool.free(device, cmd);
            }
        }
        self.pool.destroy(device);
    }
}
