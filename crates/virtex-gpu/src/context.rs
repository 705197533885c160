//! Instance, device and queue for sparse streaming.

use crate::capabilities::GpuCapabilities;
use crate::error::{GpuError, Result};
use crate::instance::{create_instance, select_physical_device};
use crate::memory::GpuAllocator;
use ash::vk;
use parking_lot::Mutex;
use std::sync::Arc;

/// Vulkan objects shared by every streaming resource.
///
/// Copies, sparse binds and draws all go through one queue that supports both
/// graphics and sparse binding, so submission order is queue order.
pub struct GpuContext {
    // Keeps the loader alive for the instance
    pub(crate) entry: ash::Entry,
    pub(crate) instance: ash::Instance,
    pub(crate) physical_device: vk::PhysicalDevice,
    pub(crate) device: Arc<ash::Device>,
    pub(crate) capabilities: GpuCapabilities,
    pub(crate) allocator: Mutex<GpuAllocator>,
    pub(crate) queue_family: u32,
    pub(crate) queue: vk::Queue,
    pub(crate) validation: bool,
}

impl GpuContext {
    /// Get the Vulkan device handle.
    pub fn device(&self) -> &ash::Device {
        &self.device
    }

    /// Shared handle to the Vulkan device.
    pub fn device_arc(&self) -> Arc<ash::Device> {
        Arc::clone(&self.device)
    }

    /// Get the physical device handle.
    pub const fn physical_device(&self) -> vk::PhysicalDevice {
        self.physical_device
    }

    /// Get GPU capabilities.
    pub const fn capabilities(&self) -> &GpuCapabilities {
        &self.capabilities
    }

    /// The graphics + sparse binding queue.
    pub const fn queue(&self) -> vk::Queue {
        self.queue
    }

    /// Queue family index of [`queue`](Self::queue).
    pub const fn queue_family(&self) -> u32 {
        self.queue_family
    }

    /// Get the Vulkan instance handle.
    pub const fn instance(&self) -> &ash::Instance {
        &self.instance
    }

    /// Get the Vulkan entry point.
    pub const fn entry(&self) -> &ash::Entry {
        &self.entry
    }

    /// Whether validation layers were requested.
    pub const fn validation_enabled(&self) -> bool {
        self.validation
    }

    /// Get access to the GPU allocator.
    pub const fn allocator(&self) -> &Mutex<GpuAllocator> {
        &self.allocator
    }
}

impl Drop for GpuContext {
    fn drop(&mut self) {
        unsafe {
            let _ = self.device.device_wait_idle();

            // Shutdown allocator BEFORE destroying device
            self.allocator.lock().shutdown();

            self.device.destroy_device(None);
            self.instance.destroy_instance(None);
        }
    }
}

/// Builder for creating a GPU context.
pub struct GpuContextBuilder {
    app_name: String,
    enable_validation: bool,
}

impl Default for GpuContextBuilder {
    fn default() -> Self {
        Self {
            app_name: "virtex".to_string(),
            enable_validation: cfg!(debug_assertions),
        }
    }
}

impl GpuContextBuilder {
    /// Create a new builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the application name.
    #[must_use]
    pub fn app_name(mut self, name: impl Into<String>) -> Self {
        self.app_name = name.into();
        self
    }

    /// Enable or disable validation layers.
    #[must_use]
    pub const fn validation(mut self, enable: bool) -> Self {
        self.enable_validation = enable;
        self
    }

    /// Build the GPU context.
    pub fn build(self) -> Result<GpuContext> {
        let entry = unsafe { ash::Entry::load() }.map_err(|e| GpuError::Loading(e.to_string()))?;

        let instance = unsafe { create_instance(&entry, &self.app_name, self.enable_validation) }?;

        let physical_device = unsafe { select_physical_device(&instance) }?;

        let capabilities = unsafe { GpuCapabilities::query(&instance, physical_device) };

        let missing = capabilities.missing_features();
        if !missing.is_empty() {
            return Err(GpuError::SparseUnsupported(format!(
                "{} lacks {}",
                capabilities.device_name,
                missing.join(", ")
            )));
        }

        tracing::info!("Selected GPU: {}", capabilities.summary());

        let queue_family = unsafe { find_streaming_queue_family(&instance, physical_device) }?;

        let (device, queue) =
            unsafe { create_device(&instance, physical_device, queue_family, &capabilities)? };

        let device = Arc::new(device);

        let allocator = unsafe { GpuAllocator::new(&instance, device.clone(), physical_device) }?;

        Ok(GpuContext {
            entry,
            instance,
            physical_device,
            device,
            capabilities,
            allocator: Mutex::new(allocator),
            queue_family,
            queue,
            validation: self.enable_validation,
        })
    }
}

/// Find a queue family supporting both graphics and sparse binding.
///
/// # Safety
/// The instance and physical device must be valid.
unsafe fn find_streaming_queue_family(
    instance: &ash::Instance,
    physical_device: vk::PhysicalDevice,
) -> Result<u32> {
    let required = vk::QueueFlags::GRAPHICS | vk::QueueFlags::SPARSE_BINDING;

    instance
        .get_physical_device_queue_family_properties(physical_device)
        .iter()
        .position(|family| family.queue_flags.contains(required))
        .map(|index| index as u32)
        .ok_or_else(|| {
            GpuError::SparseUnsupported("no queue family with graphics and sparse binding".into())
        })
}

/// Create the logical device with sparse features and retrieve the queue.
///
/// # Safety
/// The instance and physical device must be valid.
unsafe fn create_device(
    instance: &ash::Instance,
    physical_device: vk::PhysicalDevice,
    queue_family: u32,
    capabilities: &GpuCapabilities,
) -> Result<(ash::Device, vk::Queue)> {
    let queue_priority = 1.0_f32;
    let queue_create_infos = [vk::DeviceQueueCreateInfo::default()
        .queue_family_index(queue_family)
        .queue_priorities(std::slice::from_ref(&queue_priority))];

    let mut vulkan_1_3_features = vk::PhysicalDeviceVulkan13Features::default()
        .dynamic_rendering(true)
        .synchronization2(true);

    // Compressed format families are enabled only where reported
    let features = vk::PhysicalDeviceFeatures::default()
        .sparse_binding(true)
        .sparse_residency_image2_d(true)
        .shader_resource_residency(true)
        .texture_compression_astc_ldr(capabilities.astc_ldr)
        .texture_compression_bc(capabilities.bc)
        .texture_compression_etc2(capabilities.etc2);

    let mut features2 = vk::PhysicalDeviceFeatures2::default()
        .features(features)
        .push_next(&mut vulkan_1_3_features);

    let device_create_info = vk::DeviceCreateInfo::default()
        .queue_create_infos(&queue_create_infos)
        .push_next(&mut features2);

    let device = instance
        .create_device(physical_device, &device_create_info, None)
        .map_err(GpuError::from)?;

    let queue = device.get_device_queue(queue_family, 0);

    Ok((device, queue))
}
