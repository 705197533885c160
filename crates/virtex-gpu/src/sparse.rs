//! Sparse image creation, format discovery and page binding.

use crate::error::{GpuError, Result};
use crate::memory::GpuAllocator;
use crate::sync::{create_fence, wait_for_fence};
use ash::vk;
use gpu_allocator::vulkan::Allocation;
use hashbrown::HashMap;
use virtex_core::{CompressedFormat, FormatCaps, PageSize, TexelRegion};

/// Usage flags of every sparse texture.
const SPARSE_USAGE: vk::ImageUsageFlags = vk::ImageUsageFlags::from_raw(
    vk::ImageUsageFlags::SAMPLED.as_raw() | vk::ImageUsageFlags::TRANSFER_DST.as_raw(),
);

/// Vulkan format for a compressed format.
pub const fn vk_format(format: CompressedFormat) -> vk::Format {
    match format {
        CompressedFormat::Bc1RgbaUnorm => vk::Format::BC1_RGBA_UNORM_BLOCK,
        CompressedFormat::Bc3RgbaUnorm => vk::Format::BC3_UNORM_BLOCK,
        CompressedFormat::Bc7RgbaUnorm => vk::Format::BC7_UNORM_BLOCK,
        CompressedFormat::Etc2Rgba8Unorm => vk::Format::ETC2_R8G8B8A8_UNORM_BLOCK,
        CompressedFormat::Astc4x4Unorm => vk::Format::ASTC_4X4_UNORM_BLOCK,
        CompressedFormat::Astc5x5Unorm => vk::Format::ASTC_5X5_UNORM_BLOCK,
        CompressedFormat::Astc6x6Unorm => vk::Format::ASTC_6X6_UNORM_BLOCK,
        CompressedFormat::Astc8x8Unorm => vk::Format::ASTC_8X8_UNORM_BLOCK,
        CompressedFormat::Astc10x10Unorm => vk::Format::ASTC_10X10_UNORM_BLOCK,
        CompressedFormat::Astc12x12Unorm => vk::Format::ASTC_12X12_UNORM_BLOCK,
    }
}

/// Enumerate the compressed formats that can back a partially resident 2D image.
///
/// Page sizes are the sparse image granularities reported for the color aspect.
///
/// # Safety
/// The instance and physical device must be valid.
pub unsafe fn query_sparse_formats(
    instance: &ash::Instance,
    physical_device: vk::PhysicalDevice,
) -> Vec<FormatCaps> {
    let mut formats = Vec::new();

    for format in CompressedFormat::ALL {
        let vk_format = vk_format(format);

        let properties = instance.get_physical_device_format_properties(physical_device, vk_format);
        let needed = vk::FormatFeatureFlags::SAMPLED_IMAGE | vk::FormatFeatureFlags::TRANSFER_DST;
        if !properties.optimal_tiling_features.contains(needed) {
            continue;
        }

        let image_support = instance.get_physical_device_image_format_properties(
            physical_device,
            vk_format,
            vk::ImageType::TYPE_2D,
            vk::ImageTiling::OPTIMAL,
            SPARSE_USAGE,
            vk::ImageCreateFlags::SPARSE_BINDING | vk::ImageCreateFlags::SPARSE_RESIDENCY,
        );
        if image_support.is_err() {
            continue;
        }

        let mut page_sizes: Vec<PageSize> = Vec::new();
        for props in instance.get_physical_device_sparse_image_format_properties(
            physical_device,
            vk_format,
            vk::ImageType::TYPE_2D,
            vk::SampleCountFlags::TYPE_1,
            SPARSE_USAGE,
            vk::ImageTiling::OPTIMAL,
        ) {
            if !props.aspect_mask.contains(vk::ImageAspectFlags::COLOR) {
                continue;
            }
            let granularity = props.image_granularity;
            let page = PageSize::new(granularity.width, granularity.height, granularity.depth);
            if !page_sizes.contains(&page) {
                page_sizes.push(page);
            }
        }

        if !page_sizes.is_empty() {
            formats.push(FormatCaps {
                format,
                block: format.block(),
                page_sizes,
            });
        }
    }

    formats
}

/// Bind sparse memory and wait for the bind to complete.
///
/// # Safety
/// All handles referenced by `bind_info` must be valid.
unsafe fn bind_and_wait(
    device: &ash::Device,
    queue: vk::Queue,
    bind_info: &vk::BindSparseInfo<'_>,
) -> Result<()> {
    let fence = create_fence(device, false)?;
    let result = device
        .queue_bind_sparse(queue, std::slice::from_ref(bind_info), fence)
        .map_err(GpuError::from)
        .and_then(|()| wait_for_fence(device, fence, u64::MAX));
    device.destroy_fence(fence, None);
    result
}

/// A partially resident 2D image with a single mip level.
pub struct SparseImage {
    pub image: vk::Image,
    pub view: vk::ImageView,
    pub format: CompressedFormat,
    pub width: u32,
    pub height: u32,
    /// Page size in texels.
    pub granularity: vk::Extent3D,
    page_requirements: vk::MemoryRequirements,
    pages: HashMap<(u32, u32), Allocation>,
    mip_tail: Option<Allocation>,
}

impl SparseImage {
    /// Create the image with no resident pages.
    ///
    /// Images smaller than one page keep their whole level in the mip tail,
    /// which is bound immediately.
    ///
    /// # Safety
    /// The device must be valid and support sparse residency for `format`.
    pub unsafe fn new(
        device: &ash::Device,
        allocator: &mut GpuAllocator,
        queue: vk::Queue,
        format: CompressedFormat,
        width: u32,
        height: u32,
    ) -> Result<Self> {
        let create_info = vk::ImageCreateInfo::default()
            .flags(vk::ImageCreateFlags::SPARSE_BINDING | vk::ImageCreateFlags::SPARSE_RESIDENCY)
            .image_type(vk::ImageType::TYPE_2D)
            .format(vk_format(format))
            .extent(vk::Extent3D {
                width,
                height,
                depth: 1,
            })
            .mip_levels(1)
            .array_layers(1)
            .samples(vk::SampleCountFlags::TYPE_1)
            .tiling(vk::ImageTiling::OPTIMAL)
            .usage(SPARSE_USAGE)
            .sharing_mode(vk::SharingMode::EXCLUSIVE)
            .initial_layout(vk::ImageLayout::UNDEFINED);

        let image = device.create_image(&create_info, None)?;

        match Self::finish_creation(device, allocator, queue, image, format, width, height) {
            Ok(sparse) => Ok(sparse),
            Err(e) => {
                device.destroy_image(image, None);
                Err(e)
            }
        }
    }

    unsafe fn finish_creation(
        device: &ash::Device,
        allocator: &mut GpuAllocator,
        queue: vk::Queue,
        image: vk::Image,
        format: CompressedFormat,
        width: u32,
        height: u32,
    ) -> Result<Self> {
        let page_requirements = device.get_image_memory_requirements(image);
        let sparse_requirements = device
            .get_image_sparse_memory_requirements(image)
            .into_iter()
            .find(|req| {
                req.format_properties
                    .aspect_mask
                    .contains(vk::ImageAspectFlags::COLOR)
            })
            .ok_or_else(|| {
                GpuError::SparseUnsupported(format!("{format} has no color sparse requirements"))
            })?;

        let mip_tail = if sparse_requirements.image_mip_tail_first_lod == 0 {
            let tail = allocator.allocate_raw(
                vk::MemoryRequirements {
                    size: sparse_requirements.image_mip_tail_size,
                    alignment: page_requirements.alignment,
                    memory_type_bits: page_requirements.memory_type_bits,
                },
                "sparse mip tail",
            )?;
            let binds = [vk::SparseMemoryBind::default()
                .resource_offset(sparse_requirements.image_mip_tail_offset)
                .size(sparse_requirements.image_mip_tail_size)
                .memory(tail.memory())
                .memory_offset(tail.offset())];
            let opaque = [vk::SparseImageOpaqueMemoryBindInfo::default()
                .image(image)
                .binds(&binds)];
            let bind_info = vk::BindSparseInfo::default().image_opaque_binds(&opaque);
            if let Err(e) = bind_and_wait(device, queue, &bind_info) {
                allocator.free_allocation(tail)?;
                return Err(e);
            }
            Some(tail)
        } else {
            None
        };

        let view_info = vk::ImageViewCreateInfo::default()
            .image(image)
            .view_type(vk::ImageViewType::TYPE_2D)
            .format(vk_format(format))
            .subresource_range(color_subresource_range());
        let view = match device.create_image_view(&view_info, None) {
            Ok(view) => view,
            Err(e) => {
                if let Some(tail) = mip_tail {
                    allocator.free_allocation(tail)?;
                }
                return Err(e.into());
            }
        };

        Ok(Self {
            image,
            view,
            format,
            width,
            height,
            granularity: sparse_requirements.format_properties.image_granularity,
            page_requirements,
            pages: HashMap::new(),
            mip_tail,
        })
    }

    /// Page size in bytes.
    pub const fn page_bytes(&self) -> u64 {
        self.page_requirements.alignment
    }

    /// Number of bound pages.
    pub fn resident_pages(&self) -> usize {
        self.pages.len()
    }

    /// Whether the page at `(px, py)` is bound.
    pub fn is_resident(&self, px: u32, py: u32) -> bool {
        self.pages.contains_key(&(px, py))
    }

    /// Pages overlapping `region`, clipped to the image.
    fn pages_in(&self, region: TexelRegion) -> Vec<(u32, u32)> {
        // A level held in the mip tail is always resident
        if self.mip_tail.is_some() {
            return Vec::new();
        }
        let (gw, gh) = (self.granularity.width, self.granularity.height);
        let right = region.right().min(self.width);
        let bottom = region.bottom().min(self.height);
        if region.x >= right || region.y >= bottom {
            return Vec::new();
        }
        (region.y / gh..bottom.div_ceil(gh))
            .flat_map(|py| (region.x / gw..right.div_ceil(gw)).map(move |px| (px, py)))
            .collect()
    }

    fn page_bind(&self, px: u32, py: u32) -> vk::SparseImageMemoryBind {
        let (gw, gh) = (self.granularity.width, self.granularity.height);
        let x = px * gw;
        let y = py * gh;
        vk::SparseImageMemoryBind::default()
            .subresource(vk::ImageSubresource {
                aspect_mask: vk::ImageAspectFlags::COLOR,
                mip_level: 0,
                array_layer: 0,
            })
            .offset(vk::Offset3D {
                x: x as i32,
                y: y as i32,
                z: 0,
            })
            .extent(vk::Extent3D {
                width: gw.min(self.width - x),
                height: gh.min(self.height - y),
                depth: 1,
            })
    }

    /// Bind memory to every page of `region` that is not yet resident.
    ///
    /// Returns the number of newly bound pages.
    ///
    /// # Safety
    /// The device and queue must be valid.
    pub unsafe fn commit(
        &mut self,
        device: &ash::Device,
        allocator: &mut GpuAllocator,
        queue: vk::Queue,
        region: TexelRegion,
    ) -> Result<usize> {
        let missing: Vec<_> = self
            .pages_in(region)
            .into_iter()
            .filter(|page| !self.pages.contains_key(page))
            .collect();
        if missing.is_empty() {
            return Ok(0);
        }

        let mut allocations = Vec::with_capacity(missing.len());
        for _ in &missing {
            match allocator.allocate_page(self.page_requirements, "sparse page") {
                Ok(allocation) => allocations.push(allocation),
                Err(e) => {
                    for allocation in allocations {
                        allocator.free_allocation(allocation)?;
                    }
                    return Err(e);
                }
            }
        }

        let binds: Vec<_> = missing
            .iter()
            .zip(&allocations)
            .map(|(&(px, py), allocation)| {
                self.page_bind(px, py)
                    .memory(allocation.memory())
                    .memory_offset(allocation.offset())
            })
            .collect();
        let image_binds = [vk::SparseImageMemoryBindInfo::default()
            .image(self.image)
            .binds(&binds)];
        let bind_info = vk::BindSparseInfo::default().image_binds(&image_binds);

        if let Err(e) = bind_and_wait(device, queue, &bind_info) {
            for allocation in allocations {
                allocator.free_allocation(allocation)?;
            }
            return Err(e);
        }

        let count = missing.len();
        self.pages.extend(missing.into_iter().zip(allocations));
        Ok(count)
    }

    /// Unbind every resident page of `region` and free its memory.
    ///
    /// Waits for the queue to drain first, since earlier copies or draws may
    /// still access the pages.
    ///
    /// # Safety
    /// The device and queue must be valid.
    pub unsafe fn uncommit(
        &mut self,
        device: &ash::Device,
        allocator: &mut GpuAllocator,
        queue: vk::Queue,
        region: TexelRegion,
    ) -> Result<usize> {
        let resident: Vec<_> = self
            .pages_in(region)
            .into_iter()
            .filter(|page| self.pages.contains_key(page))
            .collect();
        if resident.is_empty() {
            return Ok(0);
        }

        device.queue_wait_idle(queue)?;

        let binds: Vec<_> = resident
            .iter()
            .map(|&(px, py)| self.page_bind(px, py).memory(vk::DeviceMemory::null()))
            .collect();
        let image_binds = [vk::SparseImageMemoryBindInfo::default()
            .image(self.image)
            .binds(&binds)];
        let bind_info = vk::BindSparseInfo::default().image_binds(&image_binds);
        bind_and_wait(device, queue, &bind_info)?;

        for page in &resident {
            if let Some(allocation) = self.pages.remove(page) {
                allocator.free_allocation(allocation)?;
            }
        }
        Ok(resident.len())
    }

    /// Destroy the image and free all bound memory.
    ///
    /// # Safety
    /// The image must not be in use by the GPU.
    pub unsafe fn destroy(&mut self, device: &ash::Device, allocator: &mut GpuAllocator) {
        device.destroy_image_view(self.view, None);
        device.destroy_image(self.image, None);
        self.view = vk::ImageView::null();
        self.image = vk::Image::null();

        for (_, allocation) in self.pages.drain() {
            if let Err(e) = allocator.free_allocation(allocation) {
                tracing::warn!("Failed to free sparse page: {e}");
            }
        }
        if let Some(tail) = self.mip_tail.take() {
            if let Err(e) = allocator.free_allocation(tail) {
                tracing::warn!("Failed to free sparse mip tail: {e}");
            }
        }
    }
}

/// Subresource range covering the single color level.
pub const fn color_subresource_range() -> vk::ImageSubresourceRange {
    vk::ImageSubresourceRange {
        aspect_mask: vk::ImageAspectFlags::COLOR,
        base_mip_level: 0,
        level_count: 1,
        base_array_layer: 0,
        layer_count: 1,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compressed_formats_map_to_block_formats() {
        assert_eq!(
            vk_format(CompressedFormat::Astc8x8Unorm),
            vk::Format::ASTC_8X8_UNORM_BLOCK
        );
        assert_eq!(
            vk_format(CompressedFormat::Bc7RgbaUnorm),
            vk::Format::BC7_UNORM_BLOCK
        );
        let distinct: std::collections::HashSet<_> =
            CompressedFormat::ALL.iter().map(|&f| vk_format(f)).collect();
        assert_eq!(distinct.len(), CompressedFormat::ALL.len());
    }

    #[test]
    fn sparse_usage_flags() {
        assert!(SPARSE_USAGE.contains(vk::ImageUsageFlags::SAMPLED));
        assert!(SPARSE_USAGE.contains(vk::ImageUsageFlags::TRANSFER_DST));
    }
}
