//! Device memory for staging buffers, render targets and sparse pages.

use crate::error::{GpuError, Result};
use ash::vk;
use gpu_allocator::vulkan::{
    Allocation, AllocationCreateDesc, AllocationScheme, Allocator, AllocatorCreateDesc,
};
use gpu_allocator::{AllocatorDebugSettings, MemoryLocation};
use std::sync::Arc;
use virtex_core::MappedBuffer;

fn allocation_failed(e: impl std::fmt::Display) -> GpuError {
    GpuError::AllocationFailed(e.to_string())
}

/// `gpu-allocator` bound to one device.
pub struct GpuAllocator {
    allocator: Option<Allocator>,
    device: Arc<ash::Device>,
}

impl GpuAllocator {
    /// # Safety
    /// The instance, device, and physical device must be valid.
    pub unsafe fn new(
        instance: &ash::Instance,
        device: Arc<ash::Device>,
        physical_device: vk::PhysicalDevice,
    ) -> Result<Self> {
        let debug_settings = AllocatorDebugSettings {
            log_memory_information: cfg!(debug_assertions),
            log_leaks_on_shutdown: true,
            store_stack_traces: cfg!(debug_assertions),
            ..AllocatorDebugSettings::default()
        };
        let allocator = Allocator::new(&AllocatorCreateDesc {
            instance: instance.clone(),
            device: (*device).clone(),
            physical_device,
            debug_settings,
            buffer_device_address: false,
            allocation_sizes: Default::default(),
        })
        .map_err(allocation_failed)?;

        Ok(Self {
            allocator: Some(allocator),
            device,
        })
    }

    fn allocate(
        &mut self,
        requirements: vk::MemoryRequirements,
        location: MemoryLocation,
        linear: bool,
        name: &str,
    ) -> Result<Allocation> {
        self.allocator
            .as_mut()
            .ok_or_else(|| GpuError::InvalidState("allocator already shut down".to_string()))?
            .allocate(&AllocationCreateDesc {
                name,
                requirements,
                location,
                linear,
                allocation_scheme: AllocationScheme::GpuAllocatorManaged,
            })
            .map_err(allocation_failed)
    }

    /// Return an allocation to the allocator.
    pub fn free_allocation(&mut self, allocation: Allocation) -> Result<()> {
        match self.allocator.as_mut() {
            Some(allocator) => allocator.free(allocation).map_err(allocation_failed),
            // Shutdown already released every block
            None => Ok(()),
        }
    }

    /// Persistently mapped upload buffer of `size` bytes.
    pub fn create_staging_buffer(&mut self, size: u64, name: &str) -> Result<GpuBuffer> {
        let info = vk::BufferCreateInfo::default()
            .size(size)
            .usage(vk::BufferUsageFlags::TRANSFER_SRC)
            .sharing_mode(vk::SharingMode::EXCLUSIVE);
        let buffer = unsafe { self.device.create_buffer(&info, None)? };
        let requirements = unsafe { self.device.get_buffer_memory_requirements(buffer) };

        let bound = self
            .allocate(requirements, MemoryLocation::CpuToGpu, true, name)
            .and_then(|allocation| {
                if allocation.mapped_ptr().is_none() {
                    self.free_allocation(allocation)?;
                    return Err(GpuError::AllocationFailed(format!(
                        "{name}: memory is not host mapped"
                    )));
                }
                let bind = unsafe {
                    self.device
                        .bind_buffer_memory(buffer, allocation.memory(), allocation.offset())
                };
                match bind {
                    Ok(()) => Ok(allocation),
                    Err(e) => {
                        self.free_allocation(allocation)?;
                        Err(e.into())
                    }
                }
            });

        match bound {
            Ok(allocation) => Ok(GpuBuffer {
                buffer,
                allocation: Some(allocation),
                size,
            }),
            Err(e) => {
                unsafe { self.device.destroy_buffer(buffer, None) };
                Err(e)
            }
        }
    }

    pub fn free_buffer(&mut self, buffer: &mut GpuBuffer) -> Result<()> {
        if let Some(allocation) = buffer.allocation.take() {
            self.free_allocation(allocation)?;
        }
        unsafe { self.device.destroy_buffer(buffer.buffer, None) };
        buffer.buffer = vk::Buffer::null();
        Ok(())
    }

    /// Fully backed image, used for the offscreen frame target.
    pub fn create_image(
        &mut self,
        create_info: &vk::ImageCreateInfo,
        location: MemoryLocation,
        name: &str,
    ) -> Result<GpuImage> {
        let image = unsafe { self.device.create_image(create_info, None)? };
        let requirements = unsafe { self.device.get_image_memory_requirements(image) };

        let bound = self
            .allocate(requirements, location, false, name)
            .and_then(|allocation| {
                let bind = unsafe {
                    self.device
                        .bind_image_memory(image, allocation.memory(), allocation.offset())
                };
                match bind {
                    Ok(()) => Ok(allocation),
                    Err(e) => {
                        self.free_allocation(allocation)?;
                        Err(e.into())
                    }
                }
            });

        match bound {
            Ok(allocation) => Ok(GpuImage {
                image,
                allocation: Some(allocation),
                format: create_info.format,
                extent: create_info.extent,
            }),
            Err(e) => {
                unsafe { self.device.destroy_image(image, None) };
                Err(e)
            }
        }
    }

    pub fn free_image(&mut self, image: &mut GpuImage) -> Result<()> {
        if let Some(allocation) = image.allocation.take() {
            self.free_allocation(allocation)?;
        }
        unsafe { self.device.destroy_image(image.image, None) };
        image.image = vk::Image::null();
        Ok(())
    }

    /// Device memory for one sparse page.
    ///
    /// `requirements` are the sparse image's; their alignment is the page size
    /// in bytes.
    pub fn allocate_page(
        &mut self,
        requirements: vk::MemoryRequirements,
        name: &str,
    ) -> Result<Allocation> {
        let page = vk::MemoryRequirements {
            size: requirements.alignment,
            ..requirements
        };
        self.allocate(page, MemoryLocation::GpuOnly, false, name)
    }

    /// Device memory for an opaque sparse binding such as the mip tail.
    pub fn allocate_raw(
        &mut self,
        requirements: vk::MemoryRequirements,
        name: &str,
    ) -> Result<Allocation> {
        self.allocate(requirements, MemoryLocation::GpuOnly, false, name)
    }

    /// Release the allocator and all remaining blocks.
    ///
    /// Must run before the device is destroyed; remaining allocations are
    /// logged as leaks.
    pub fn shutdown(&mut self) {
        drop(self.allocator.take());
    }
}

impl Drop for GpuAllocator {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Host-visible transfer source.
pub struct GpuBuffer {
    pub buffer: vk::Buffer,
    pub allocation: Option<Allocation>,
    pub size: u64,
}

impl GpuBuffer {
    /// Copy `data` into the mapping at `offset`.
    pub fn write_bytes(&mut self, offset: u64, data: &[u8]) -> Result<()> {
        let end = offset
            .checked_add(data.len() as u64)
            .filter(|&end| end <= self.size)
            .ok_or_else(|| {
                GpuError::InvalidState(format!(
                    "{} bytes at {offset} overrun a {} byte buffer",
                    data.len(),
                    self.size
                ))
            })?;
        let mapped = self.mapped_mut();
        if mapped.is_empty() {
            return Err(GpuError::InvalidState("buffer is not mapped".to_string()));
        }
        mapped[offset as usize..end as usize].copy_from_slice(data);
        Ok(())
    }
}

impl MappedBuffer for GpuBuffer {
    fn capacity(&self) -> u64 {
        self.size
    }

    fn mapped(&self) -> &[u8] {
        let len = self.size as usize;
        self.allocation
            .as_ref()
            .and_then(Allocation::mapped_slice)
            .map_or(&[][..], |bytes| &bytes[..len])
    }

    fn mapped_mut(&mut self) -> &mut [u8] {
        let len = self.size as usize;
        match self.allocation.as_mut().and_then(Allocation::mapped_slice_mut) {
            Some(bytes) => &mut bytes[..len],
            None => &mut [],
        }
    }
}

/// Image with dedicated backing memory.
pub struct GpuImage {
    pub image: vk::Image,
    pub allocation: Option<Allocation>,
    pub format: vk::Format,
    pub extent: vk::Extent3D,
}
