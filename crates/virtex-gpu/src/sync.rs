//! Synchronization primitives.

use crate::error::{GpuError, Result};
use ash::vk;
use std::sync::Arc;
use std::time::Duration;

/// Create a fence.
///
/// # Safety
/// The device must be valid.
pub unsafe fn create_fence(device: &ash::Device, signaled: bool) -> Result<vk::Fence> {
    let flags = if signaled {
        vk::FenceCreateFlags::SIGNALED
    } else {
        vk::FenceCreateFlags::empty()
    };

    let create_info = vk::FenceCreateInfo::default().flags(flags);
    let fence = device.create_fence(&create_info, None)?;
    Ok(fence)
}

/// Wait for a fence to be signaled.
///
/// # Safety
/// The device and fence must be valid.
#[cfg_attr(feature = "profiling-tracy", tracing::instrument(level = "trace", skip_all))]
pub unsafe fn wait_for_fence(
    device: &ash::Device,
    fence: vk::Fence,
    timeout_ns: u64,
) -> Result<()> {
    device.wait_for_fences(&[fence], true, timeout_ns)?;
    Ok(())
}

/// Reset a fence to unsignaled state.
///
/// # Safety
/// The device and fence must be valid.
pub unsafe fn reset_fence(device: &ash::Device, fence: vk::Fence) -> Result<()> {
    device.reset_fences(&[fence])?;
    Ok(())
}

/// Convert a wait timeout to Vulkan nanoseconds, saturating.
pub fn timeout_nanos(timeout: Duration) -> u64 {
    u64::try_from(timeout.as_nanos()).unwrap_or(u64::MAX)
}

/// Owned `VkFence`. Destroyed when the last reference goes away.
pub(crate) struct FenceInner {
    device: Arc<ash::Device>,
    fence: vk::Fence,
}

impl Drop for FenceInner {
    fn drop(&mut self) {
        unsafe {
            // The fence may still be pending in a queue submission
            if matches!(self.device.get_fence_status(self.fence), Ok(false)) {
                let _ = self.device.wait_for_fences(&[self.fence], true, u64::MAX);
            }
            self.device.destroy_fence(self.fence, None);
        }
    }
}

/// Completion fence for one queue submission.
///
/// The fence is shared with the submission it guards, so command buffers can
/// be recycled independently of when the caller drops its handle. The fence
/// must be dropped before the device it was created from.
pub struct GpuFence {
    inner: Arc<FenceInner>,
}

impl GpuFence {
    /// Create an unsignaled fence.
    ///
    /// # Safety
    /// The device must be valid and outlive the fence.
    pub unsafe fn new(device: Arc<ash::Device>) -> Result<Self> {
        let fence = create_fence(&device, false)?;
        Ok(Self {
            inner: Arc::new(FenceInner { device, fence }),
        })
    }

    /// Raw fence handle.
    pub fn handle(&self) -> vk::Fence {
        self.inner.fence
    }

    /// Another reference to the same fence.
    pub(crate) fn share(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }

    /// Non-blocking status query.
    pub fn is_signaled(&self) -> Result<bool> {
        unsafe { Ok(self.inner.device.get_fence_status(self.inner.fence)?) }
    }

    /// Block for up to `timeout`. Returns `false` on timeout.
    pub fn wait(&self, timeout: Duration) -> Result<bool> {
        let result = unsafe {
            self.inner
                .device
                .wait_for_fences(&[self.inner.fence], true, timeout_nanos(timeout))
        };
        match result {
            Ok(()) => Ok(true),
            Err(vk::Result::TIMEOUT) => Ok(false),
            Err(e) => Err(GpuError::from(e)),
        }
    }
}

impl std::fmt::Debug for GpuFence {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("GpuFence").field(&self.inner.fence).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeout_saturates() {
        assert_eq!(timeout_nanos(Duration::ZERO), 0);
        assert_eq!(timeout_nanos(Duration::from_millis(2)), 2_000_000);
        assert_eq!(timeout_nanos(Duration::MAX), u64::MAX);
    }
}
