//! Sampler bindings for sparse textures.
//!
//! Every texture gets one descriptor set holding a single combined image
//! sampler at binding 0, read by the fetch shader's fragment stage.

use crate::error::Result;
use ash::vk;

/// Binding index of the texture in the fetch shader.
pub const TEXTURE_BINDING: u32 = 0;

/// Shared sampler, set layout and pool for texture descriptor sets.
pub struct TextureBindings {
    sampler: vk::Sampler,
    layout: vk::DescriptorSetLayout,
    pool: vk::DescriptorPool,
    capacity: u32,
}

impl TextureBindings {
    /// Create bindings for up to `capacity` live textures.
    ///
    /// # Safety
    /// The device must be valid.
    pub unsafe fn new(device: &ash::Device, capacity: u32) -> Result<Self> {
        // Nearest filtering so each texel reads back exactly as uploaded
        let sampler_info = vk::SamplerCreateInfo::default()
            .mag_filter(vk::Filter::NEAREST)
            .min_filter(vk::Filter::NEAREST)
            .mipmap_mode(vk::SamplerMipmapMode::NEAREST)
            .address_mode_u(vk::SamplerAddressMode::CLAMP_TO_EDGE)
            .address_mode_v(vk::SamplerAddressMode::CLAMP_TO_EDGE)
            .address_mode_w(vk::SamplerAddressMode::CLAMP_TO_EDGE)
            .max_lod(0.0);
        let sampler = device.create_sampler(&sampler_info, None)?;

        let bindings = [vk::DescriptorSetLayoutBinding::default()
            .binding(TEXTURE_BINDING)
            .descriptor_type(vk::DescriptorType::COMBINED_IMAGE_SAMPLER)
            .descriptor_count(1)
            .stage_flags(vk::ShaderStageFlags::FRAGMENT)];
        let layout = match device.create_descriptor_set_layout(
            &vk::DescriptorSetLayoutCreateInfo::default().bindings(&bindings),
            None,
        ) {
            Ok(layout) => layout,
            Err(e) => {
                device.destroy_sampler(sampler, None);
                return Err(e.into());
            }
        };

        let sizes = [vk::DescriptorPoolSize {
            ty: vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
            descriptor_count: capacity,
        }];
        let pool_info = vk::DescriptorPoolCreateInfo::default()
            .max_sets(capacity)
            .pool_sizes(&sizes)
            .flags(vk::DescriptorPoolCreateFlags::FREE_DESCRIPTOR_SET);
        let pool = match device.create_descriptor_pool(&pool_info, None) {
            Ok(pool) => pool,
            Err(e) => {
                device.destroy_descriptor_set_layout(layout, None);
                device.destroy_sampler(sampler, None);
                return Err(e.into());
            }
        };

        Ok(Self {
            sampler,
            layout,
            pool,
            capacity,
        })
    }

    /// Layout for pipelines that sample a texture.
    pub const fn layout(&self) -> vk::DescriptorSetLayout {
        self.layout
    }

    /// Maximum number of textures bound at once.
    pub const fn capacity(&self) -> u32 {
        self.capacity
    }

    /// Allocate a set pointing at `view`, which must stay in `GENERAL` layout.
    ///
    /// # Safety
    /// The device and view must be valid.
    pub unsafe fn bind(&self, device: &ash::Device, view: vk::ImageView) -> Result<vk::DescriptorSet> {
        let layouts = [self.layout];
        let alloc_info = vk::DescriptorSetAllocateInfo::default()
            .descriptor_pool(self.pool)
            .set_layouts(&layouts);
        let set = device.allocate_descriptor_sets(&alloc_info)?[0];

        let image_info = [vk::DescriptorImageInfo::default()
            .image_view(view)
            .sampler(self.sampler)
            .image_layout(vk::ImageLayout::GENERAL)];
        let write = vk::WriteDescriptorSet::default()
            .dst_set(set)
            .dst_binding(TEXTURE_BINDING)
            .descriptor_type(vk::DescriptorType::COMBINED_IMAGE_SAMPLER)
            .image_info(&image_info);
        device.update_descriptor_sets(&[write], &[]);
        Ok(set)
    }

    /// # Safety
    /// `set` must come from [`Self::bind`] and must not be in use.
    pub unsafe fn unbind(&self, device: &ash::Device, set: vk::DescriptorSet) -> Result<()> {
        device.free_descriptor_sets(self.pool, &[set])?;
        Ok(())
    }

    /// # Safety
    /// No set from these bindings may be in use.
    pub unsafe fn destroy(&self, device: &ash::Device) {
        device.destroy_descriptor_pool(self.pool, None);
        device.destroy_descriptor_set_layout(self.layout, None);
        device.destroy_sampler(self.sampler, None);
    }
}
