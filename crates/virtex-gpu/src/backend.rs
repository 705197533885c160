//! Vulkan implementation of [`SparseDevice`].
//!
//! Uploads are recorded into one open command buffer that is submitted when a
//! fence is inserted, so a fence covers exactly the copies queued before it.
//! Sparse binds are synchronous. Frames render offscreen into a color target
//! sized to the requested viewport.

use crate::command::{begin_one_time, submit, submit_and_wait, UploadRecorder};
use crate::context::{GpuContext, GpuContextBuilder};
use crate::debug::{DebugMessenger, DiagnosticHub};
use crate::descriptors::TextureBindings;
use crate::error::{GpuError, Result as GpuResult};
use crate::memory::{GpuBuffer, GpuImage};
use crate::pipeline::{GraphicsPipeline, GraphicsPipelineConfig};
use crate::sparse::{color_subresource_range, query_sparse_formats, SparseImage};
use crate::sync::{create_fence, reset_fence, wait_for_fence, GpuFence};
use ash::vk;
use gpu_allocator::MemoryLocation;
use hashbrown::HashMap;
use std::sync::Arc;
use std::time::Duration;
use virtex_core::{
    CompressedFormat, DeviceError, DeviceErrorKind, DeviceInfo, DiagnosticSink, Error,
    FenceStatus, FormatCaps, FrameDesc, MappedBuffer, ProgramHandle, Result, ShaderStages,
    SparseDevice, SparseTextureDesc, TexelRegion, TextureHandle, WaitOutcome,
};

/// Sparse textures that can exist at once.
const MAX_TEXTURES: u32 = 16;
/// Format of the offscreen color target.
const TARGET_FORMAT: vk::Format = vk::Format::R8G8B8A8_UNORM;

/// Map a Vulkan result to a device error category.
fn device_error(context: &str, result: vk::Result) -> DeviceError {
    let kind = match result {
        vk::Result::ERROR_DEVICE_LOST => DeviceErrorKind::DeviceLost,
        vk::Result::ERROR_OUT_OF_HOST_MEMORY | vk::Result::ERROR_OUT_OF_DEVICE_MEMORY => {
            DeviceErrorKind::OutOfMemory
        }
        _ => DeviceErrorKind::InvalidOperation,
    };
    DeviceError::new(kind, result.as_raw(), format!("{context}: {result}"))
}

struct TextureEntry {
    image: SparseImage,
    descriptor_set: vk::DescriptorSet,
}

struct RenderTarget {
    image: GpuImage,
    view: vk::ImageView,
    width: u32,
    height: u32,
}

/// Builder for a [`VulkanDevice`].
pub struct VulkanDeviceBuilder {
    context: GpuContextBuilder,
}

impl Default for VulkanDeviceBuilder {
    fn default() -> Self {
        Self {
            context: GpuContextBuilder::new(),
        }
    }
}

impl VulkanDeviceBuilder {
    /// Create a new builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the application name.
    #[must_use]
    pub fn app_name(mut self, name: impl Into<String>) -> Self {
        self.context = self.context.app_name(name);
        self
    }

    /// Enable or disable validation layers.
    #[must_use]
    pub fn validation(mut self, enable: bool) -> Self {
        self.context = self.context.validation(enable);
        self
    }

    /// Create the device.
    pub fn build(self) -> GpuResult<VulkanDevice> {
        let context = self.context.build()?;
        unsafe { VulkanDevice::new(context) }
    }
}

/// Sparse streaming backend on a Vulkan 1.3 device.
pub struct VulkanDevice {
    context: GpuContext,
    hub: Arc<DiagnosticHub>,
    messenger: Option<DebugMessenger>,
    formats: Vec<FormatCaps>,
    uploads: UploadRecorder,
    bindings: TextureBindings,
    textures: HashMap<TextureHandle, TextureEntry>,
    programs: HashMap<ProgramHandle, GraphicsPipeline>,
    next_handle: u32,
    target: Option<RenderTarget>,
    frame_cmd: vk::CommandBuffer,
    frame_fence: vk::Fence,
    pending_server_wait: bool,
}

impl VulkanDevice {
    /// Wrap an existing context.
    ///
    /// # Safety
    /// The context must have been created for sparse streaming.
    pub unsafe fn new(context: GpuContext) -> GpuResult<Self> {
        let device = context.device();
        let hub = Arc::new(DiagnosticHub::new());

        let messenger = if context.validation_enabled() {
            match DebugMessenger::new(context.entry(), context.instance(), Arc::clone(&hub)) {
                Ok(messenger) => Some(messenger),
                Err(e) => {
                    tracing::warn!("Debug messenger unavailable: {e}");
                    None
                }
            }
        } else {
            None
        };

        let formats = query_sparse_formats(context.instance(), context.physical_device());
        if formats.is_empty() {
            return Err(GpuError::SparseUnsupported(
                "no compressed format supports sparse residency".to_string(),
            ));
        }

        let uploads = UploadRecorder::new(device, context.queue_family())?;

        let bindings = TextureBindings::new(device, MAX_TEXTURES)?;

        let frame_cmd = uploads.pool().allocate(device)?;
        let frame_fence = create_fence(device, true)?;

        Ok(Self {
            context,
            hub,
            messenger,
            formats,
            uploads,
            bindings,
            textures: HashMap::new(),
            programs: HashMap::new(),
            next_handle: 1,
            target: None,
            frame_cmd,
            frame_fence,
            pending_server_wait: false,
        })
    }

    /// The underlying GPU context.
    pub const fn context(&self) -> &GpuContext {
        &self.context
    }

    /// Number of memory-backed pages of a texture.
    pub fn resident_pages(&self, texture: TextureHandle) -> Option<usize> {
        self.textures
            .get(&texture)
            .map(|entry| entry.image.resident_pages())
    }

    fn allocate_handle(&mut self) -> u32 {
        let handle = self.next_handle;
        self.next_handle += 1;
        handle
    }

    fn record_error(&self, context: &str, result: vk::Result) {
        let error = device_error(context, result);
        tracing::warn!("Device error: {error}");
        self.hub.push_error(error);
    }

    fn texture(&self, texture: TextureHandle) -> Result<&TextureEntry> {
        self.textures
            .get(&texture)
            .ok_or_else(|| GpuError::ResourceNotFound(format!("texture {texture:?}")).into())
    }

    /// Submit recorded copies with a new fence.
    fn submit_uploads(&mut self) -> GpuResult<GpuFence> {
        unsafe {
            self.uploads
                .submit(&self.context.device_arc(), self.context.queue())
        }
    }

    fn ensure_target(&mut self, width: u32, height: u32) -> GpuResult<()> {
        if matches!(&self.target, Some(t) if t.width == width && t.height == height) {
            return Ok(());
        }

        unsafe { wait_for_fence(self.context.device(), self.frame_fence, u64::MAX)? };
        self.destroy_target();

        let create_info = vk::ImageCreateInfo::default()
            .image_type(vk::ImageType::TYPE_2D)
            .format(TARGET_FORMAT)
            .extent(vk::Extent3D {
                width,
                height,
                depth: 1,
            })
            .mip_levels(1)
            .array_layers(1)
            .samples(vk::SampleCountFlags::TYPE_1)
            .tiling(vk::ImageTiling::OPTIMAL)
            .usage(vk::ImageUsageFlags::COLOR_ATTACHMENT | vk::ImageUsageFlags::TRANSFER_SRC)
            .sharing_mode(vk::SharingMode::EXCLUSIVE)
            .initial_layout(vk::ImageLayout::UNDEFINED);

        let mut image = self.context.allocator().lock().create_image(
            &create_info,
            MemoryLocation::GpuOnly,
            "frame target",
        )?;

        let view_info = vk::ImageViewCreateInfo::default()
            .image(image.image)
            .view_type(vk::ImageViewType::TYPE_2D)
            .format(TARGET_FORMAT)
            .subresource_range(color_subresource_range());
        let view = match unsafe { self.context.device().create_image_view(&view_info, None) } {
            Ok(view) => view,
            Err(e) => {
                self.context.allocator().lock().free_image(&mut image)?;
                return Err(e.into());
            }
        };

        self.target = Some(RenderTarget {
            image,
            view,
            width,
            height,
        });
        Ok(())
    }

    fn destroy_target(&mut self) {
        if let Some(mut target) = self.target.take() {
            unsafe {
                self.context
                    .device()
                    .destroy_image_view(target.view, None);
            }
            if let Err(e) = self.context.allocator().lock().free_image(&mut target.image) {
                tracing::warn!("Failed to free frame target: {e}");
            }
        }
    }

    fn transition_to_general(&self, image: vk::Image) -> GpuResult<()> {
        let device = self.context.device();
        let barrier = vk::ImageMemoryBarrier2::default()
            .src_stage_mask(vk::PipelineStageFlags2::TOP_OF_PIPE)
            .src_access_mask(vk::AccessFlags2::NONE)
            .dst_stage_mask(vk::PipelineStageFlags2::TRANSFER | vk::PipelineStageFlags2::FRAGMENT_SHADER)
            .dst_access_mask(vk::AccessFlags2::TRANSFER_WRITE | vk::AccessFlags2::SHADER_SAMPLED_READ)
            .old_layout(vk::ImageLayout::UNDEFINED)
            .new_layout(vk::ImageLayout::GENERAL)
            .image(image)
            .subresource_range(color_subresource_range());

        unsafe {
            submit_and_wait(device, self.uploads.pool(), self.context.queue(), |cmd| {
                let dependency =
                    vk::DependencyInfo::default().image_memory_barriers(std::slice::from_ref(&barrier));
                device.cmd_pipeline_barrier2(cmd, &dependency);
            })
        }
    }

    fn record_frame(
        &mut self,
        frame: &FrameDesc,
        program: ProgramHandle,
        texture: TextureHandle,
    ) -> Result<()> {
        let pipeline = self
            .programs
            .get(&program)
            .ok_or_else(|| GpuError::ResourceNotFound(format!("program {program:?}")))?;
        let entry = self.texture(texture)?;
        let target = self
            .target
            .as_ref()
            .ok_or_else(|| GpuError::InvalidState("frame target missing".to_string()))?;
        let device = self.context.device();
        let cmd = self.frame_cmd;

        unsafe {
            device
                .reset_command_buffer(cmd, vk::CommandBufferResetFlags::empty())
                .map_err(GpuError::from)?;
            begin_one_time(device, cmd)?;

            let uploads_visible = [vk::MemoryBarrier2::default()
                .src_stage_mask(vk::PipelineStageFlags2::TRANSFER)
                .src_access_mask(vk::AccessFlags2::TRANSFER_WRITE)
                .dst_stage_mask(vk::PipelineStageFlags2::FRAGMENT_SHADER)
                .dst_access_mask(vk::AccessFlags2::SHADER_SAMPLED_READ)];
            let to_attachment = [vk::ImageMemoryBarrier2::default()
                .src_stage_mask(vk::PipelineStageFlags2::TOP_OF_PIPE)
                .src_access_mask(vk::AccessFlags2::NONE)
                .dst_stage_mask(vk::PipelineStageFlags2::COLOR_ATTACHMENT_OUTPUT)
                .dst_access_mask(vk::AccessFlags2::COLOR_ATTACHMENT_WRITE)
                .old_layout(vk::ImageLayout::UNDEFINED)
                .new_layout(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL)
                .image(target.image.image)
                .subresource_range(color_subresource_range())];
            let memory_barriers: &[vk::MemoryBarrier2<'_>] = if self.pending_server_wait {
                &uploads_visible
            } else {
                &[]
            };
            let dependency = vk::DependencyInfo::default()
                .memory_barriers(memory_barriers)
                .image_memory_barriers(&to_attachment);
            device.cmd_pipeline_barrier2(cmd, &dependency);

            let extent = vk::Extent2D {
                width: frame.width,
                height: frame.height,
            };
            let attachments = [vk::RenderingAttachmentInfo::default()
                .image_view(target.view)
                .image_layout(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL)
                .load_op(vk::AttachmentLoadOp::CLEAR)
                .store_op(vk::AttachmentStoreOp::STORE)
                .clear_value(vk::ClearValue {
                    color: vk::ClearColorValue {
                        float32: frame.clear_color.to_array(),
                    },
                })];
            let rendering = vk::RenderingInfo::default()
                .render_area(vk::Rect2D {
                    offset: vk::Offset2D::default(),
                    extent,
                })
                .layer_count(1)
                .color_attachments(&attachments);
            device.cmd_begin_rendering(cmd, &rendering);

            let viewport = vk::Viewport {
                x: 0.0,
                y: 0.0,
                width: frame.width as f32,
                height: frame.height as f32,
                min_depth: 0.0,
                max_depth: 1.0,
            };
            device.cmd_set_viewport(cmd, 0, &[viewport]);
            device.cmd_set_scissor(
                cmd,
                0,
                &[vk::Rect2D {
                    offset: vk::Offset2D::default(),
                    extent,
                }],
            );

            device.cmd_bind_pipeline(cmd, vk::PipelineBindPoint::GRAPHICS, pipeline.pipeline);
            device.cmd_bind_descriptor_sets(
                cmd,
                vk::PipelineBindPoint::GRAPHICS,
                pipeline.layout,
                0,
                &[entry.descriptor_set],
                &[],
            );
            device.cmd_draw(cmd, 4, 1, 0, 0);
            device.cmd_end_rendering(cmd);

            device.end_command_buffer(cmd).map_err(GpuError::from)?;
            reset_fence(device, self.frame_fence)?;
            submit(device, self.context.queue(), &[cmd], self.frame_fence)?;
        }

        self.pending_server_wait = false;
        Ok(())
    }
}

impl SparseDevice for VulkanDevice {
    type Buffer = GpuBuffer;
    type Fence = GpuFence;

    fn info(&self) -> DeviceInfo {
        let caps = self.context.capabilities();
        let mut extensions: Vec<String> = caps.available_extensions.iter().cloned().collect();
        extensions.sort();
        DeviceInfo {
            vendor: caps.vendor.name(),
            renderer: caps.device_name.clone(),
            version: format!(
                "Vulkan {}.{}.{} (driver {})",
                vk::api_version_major(caps.api_version),
                vk::api_version_minor(caps.api_version),
                vk::api_version_patch(caps.api_version),
                caps.driver_version_string(),
            ),
            extensions,
        }
    }

    fn install_diagnostics(&mut self, sink: DiagnosticSink) {
        if self.messenger.is_none() {
            tracing::debug!("Validation disabled, diagnostics limited to device errors");
        }
        self.hub.set_sink(sink);
    }

    fn compressed_formats(&self) -> Vec<FormatCaps> {
        self.formats.clone()
    }

    fn create_staging_buffer(&mut self, capacity: u64) -> Result<GpuBuffer> {
        Ok(self
            .context
            .allocator()
            .lock()
            .create_staging_buffer(capacity, "staging slot")?)
    }

    fn destroy_staging_buffer(&mut self, mut buffer: GpuBuffer) {
        if let Err(e) = self.context.allocator().lock().free_buffer(&mut buffer) {
            tracing::warn!("Failed to free staging buffer: {e}");
        }
    }

    fn create_sparse_texture(&mut self, desc: &SparseTextureDesc) -> Result<TextureHandle> {
        let caps = self
            .formats
            .iter()
            .find(|caps| caps.format == desc.format)
            .ok_or(Error::UnsupportedFormat(desc.format))?;
        if desc.page_size_index >= caps.page_sizes.len() {
            return Err(Error::NoPageSize {
                format: desc.format,
                index: desc.page_size_index,
            });
        }
        let max = self.context.capabilities().max_image_dimension_2d;
        if desc.width > max || desc.height > max {
            return Err(Error::OutOfBounds(format!(
                "{}x{} texture exceeds the {max} texel limit",
                desc.width, desc.height
            )));
        }

        let device = self.context.device();
        let mut image = {
            let mut allocator = self.context.allocator().lock();
            unsafe {
                SparseImage::new(
                    device,
                    &mut allocator,
                    self.context.queue(),
                    desc.format,
                    desc.width,
                    desc.height,
                )?
            }
        };

        let setup = self.transition_to_general(image.image).and_then(|()| unsafe {
            self.bindings.bind(device, image.view)
        });
        let descriptor_set = match setup {
            Ok(set) => set,
            Err(e) => {
                unsafe { image.destroy(device, &mut self.context.allocator().lock()) };
                return Err(e.into());
            }
        };

        tracing::debug!(
            "Created sparse {} texture {}x{} ({}x{} texel pages, {} bytes each)",
            desc.format,
            desc.width,
            desc.height,
            image.granularity.width,
            image.granularity.height,
            image.page_bytes(),
        );

        let handle = TextureHandle(self.allocate_handle());
        self.textures.insert(
            handle,
            TextureEntry {
                image,
                descriptor_set,
            },
        );
        Ok(handle)
    }

    fn destroy_texture(&mut self, texture: TextureHandle) {
        let Some(mut entry) = self.textures.remove(&texture) else {
            return;
        };
        let device = self.context.device();
        unsafe {
            if let Err(e) = device.queue_wait_idle(self.context.queue()) {
                self.record_error("destroy texture", e);
            }
            if let Err(e) = self.bindings.unbind(device, entry.descriptor_set) {
                tracing::warn!("Failed to free descriptor set: {e}");
            }
            entry
                .image
                .destroy(device, &mut self.context.allocator().lock());
        }
    }

    fn commit_region(
        &mut self,
        texture: TextureHandle,
        region: TexelRegion,
        commit: bool,
    ) -> Result<()> {
        let entry = self
            .textures
            .get_mut(&texture)
            .ok_or_else(|| GpuError::ResourceNotFound(format!("texture {texture:?}")))?;
        let device = self.context.device.as_ref();
        let queue = self.context.queue;
        let mut allocator = self.context.allocator.lock();

        let changed = unsafe {
            if commit {
                entry.image.commit(device, &mut allocator, queue, region)?
            } else {
                entry.image.uncommit(device, &mut allocator, queue, region)?
            }
        };
        tracing::trace!(
            "{} {changed} pages of {texture:?} in {region:?}",
            if commit { "Committed" } else { "Uncommitted" }
        );
        Ok(())
    }

    fn upload_from_buffer(
        &mut self,
        texture: TextureHandle,
        buffer: &GpuBuffer,
        region: TexelRegion,
        format: CompressedFormat,
        bytes: u64,
    ) -> Result<()> {
        let image = self.texture(texture)?.image.image;
        let expected = format.block().payload_bytes(region.width, region.height);
        if bytes < expected || bytes > buffer.capacity() {
            return Err(Error::OutOfBounds(format!(
                "upload of {expected} bytes from {bytes} staged bytes in a {} byte buffer",
                buffer.capacity()
            )));
        }

        let device = self.context.device();
        let copy = buffer_image_copy(region);
        unsafe {
            let cmd = self.uploads.open(device)?;
            device.cmd_copy_buffer_to_image(
                cmd,
                buffer.buffer,
                image,
                vk::ImageLayout::GENERAL,
                &[copy],
            );
        }
        Ok(())
    }

    fn upload_from_host(
        &mut self,
        texture: TextureHandle,
        data: &[u8],
        region: TexelRegion,
        format: CompressedFormat,
    ) -> Result<()> {
        let image = self.texture(texture)?.image.image;
        let expected = format.block().payload_bytes(region.width, region.height);
        if (data.len() as u64) < expected {
            return Err(Error::OutOfBounds(format!(
                "upload of {expected} bytes from {} bytes",
                data.len()
            )));
        }

        let mut staging = self
            .context
            .allocator()
            .lock()
            .create_staging_buffer(expected, "fill scratch")?;
        let copied = staging
            .write_bytes(0, &data[..expected as usize])
            .and_then(|()| unsafe {
                let device = self.context.device();
                submit_and_wait(
                    device,
                    self.uploads.pool(),
                    self.context.queue(),
                    |cmd| {
                        device.cmd_copy_buffer_to_image(
                            cmd,
                            staging.buffer,
                            image,
                            vk::ImageLayout::GENERAL,
                            &[buffer_image_copy(region)],
                        );
                    },
                )
            });
        self.context.allocator().lock().free_buffer(&mut staging)?;
        Ok(copied?)
    }

    fn insert_fence(&mut self) -> Result<GpuFence> {
        Ok(self.submit_uploads()?)
    }

    fn client_wait(&mut self, fence: &GpuFence, flush: bool, timeout: Duration) -> WaitOutcome {
        if flush && self.uploads.has_pending() {
            if let Err(e) = self.submit_uploads() {
                tracing::warn!("Flush before wait failed: {e}");
            }
        }

        match fence.is_signaled() {
            Ok(true) => return WaitOutcome::AlreadySignaled,
            Ok(false) => {}
            Err(GpuError::Vulkan(e)) => {
                self.record_error("fence status", e);
                return WaitOutcome::WaitFailed;
            }
            Err(_) => return WaitOutcome::WaitFailed,
        }

        match fence.wait(timeout) {
            Ok(true) => WaitOutcome::ConditionSatisfied,
            Ok(false) => WaitOutcome::TimeoutExpired,
            Err(GpuError::Vulkan(e)) => {
                self.record_error("fence wait", e);
                WaitOutcome::WaitFailed
            }
            Err(_) => WaitOutcome::WaitFailed,
        }
    }

    fn server_wait(&mut self, fence: &GpuFence) {
        // Draws share the queue with the fenced copies, so a barrier at the
        // head of the next draw orders them.
        tracing::trace!("Server wait on {fence:?}");
        self.pending_server_wait = true;
    }

    fn fence_status(&self, fence: &GpuFence) -> FenceStatus {
        match fence.is_signaled() {
            Ok(true) => FenceStatus::Signaled,
            Ok(false) => FenceStatus::Unsignaled,
            Err(e) => {
                if let GpuError::Vulkan(result) = e {
                    self.record_error("fence status", result);
                }
                FenceStatus::Error
            }
        }
    }

    fn create_program(&mut self, stages: &ShaderStages<'_>) -> Result<ProgramHandle> {
        let pipeline = unsafe {
            GraphicsPipeline::new(
                self.context.device(),
                stages,
                &GraphicsPipelineConfig::default(),
                &[self.bindings.layout()],
            )?
        };
        let handle = ProgramHandle(self.allocate_handle());
        self.programs.insert(handle, pipeline);
        Ok(handle)
    }

    fn destroy_program(&mut self, program: ProgramHandle) {
        if let Some(pipeline) = self.programs.remove(&program) {
            unsafe {
                if let Err(e) = wait_for_fence(self.context.device(), self.frame_fence, u64::MAX) {
                    tracing::warn!("Frame wait before program destroy failed: {e}");
                }
                pipeline.destroy(self.context.device());
            }
        }
    }

    fn draw_fullscreen(
        &mut self,
        frame: &FrameDesc,
        program: ProgramHandle,
        texture: TextureHandle,
    ) -> Result<()> {
        if frame.width == 0 || frame.height == 0 {
            return Err(Error::InvalidGeometry(format!(
                "empty viewport {}x{}",
                frame.width, frame.height
            )));
        }

        // Copies recorded without a fence still precede the draw
        if self.uploads.has_pending() {
            drop(self.submit_uploads()?);
        }

        self.ensure_target(frame.width, frame.height)?;
        unsafe { wait_for_fence(self.context.device(), self.frame_fence, u64::MAX)? };
        self.record_frame(frame, program, texture)?;
        unsafe { self.uploads.recycle(self.context.device()) };
        Ok(())
    }

    fn take_error(&mut self) -> Option<DeviceError> {
        self.hub.take_error()
    }
}

impl Drop for VulkanDevice {
    fn drop(&mut self) {
        let device = self.context.device_arc();
        unsafe {
            let _ = device.device_wait_idle();

            let textures: Vec<_> = self.textures.keys().copied().collect();
            for texture in textures {
                self.destroy_texture(texture);
            }
            for (_, pipeline) in self.programs.drain() {
                pipeline.destroy(&device);
            }
            self.destroy_target();

            device.destroy_fence(self.frame_fence, None);
            self.bindings.destroy(&device);
            self.uploads.pool().free(&device, self.frame_cmd);
            self.uploads.destroy(&device);

            if let Some(messenger) = self.messenger.take() {
                messenger.destroy();
            }
        }
    }
}

/// Tightly packed copy of `region` into the base level.
fn buffer_image_copy(region: TexelRegion) -> vk::BufferImageCopy {
    vk::BufferImageCopy {
        buffer_offset: 0,
        buffer_row_length: 0,
        buffer_image_height: 0,
        image_subresource: vk::ImageSubresourceLayers {
            aspect_mask: vk::ImageAspectFlags::COLOR,
            mip_level: 0,
            base_array_layer: 0,
            layer_count: 1,
        },
        image_offset: vk::Offset3D {
            x: region.x as i32,
            y: region.y as i32,
            z: 0,
        },
        image_extent: vk::Extent3D {
            width: region.width,
            height: region.height,
            depth: 1,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::Vec4;
    use virtex_core::constants::DEFAULT_SLOT_CAPACITY;

    #[test]
    fn vulkan_results_map_to_error_kinds() {
        let lost = device_error("submit", vk::Result::ERROR_DEVICE_LOST);
        assert_eq!(lost.kind, DeviceErrorKind::DeviceLost);
        assert_eq!(lost.code, vk::Result::ERROR_DEVICE_LOST.as_raw());

        let oom = device_error("alloc", vk::Result::ERROR_OUT_OF_DEVICE_MEMORY);
        assert_eq!(oom.kind, DeviceErrorKind::OutOfMemory);
    }

    #[test]
    fn copies_are_tightly_packed() {
        let copy = buffer_image_copy(TexelRegion::new(32, 64, 16, 8));
        assert_eq!(copy.buffer_row_length, 0);
        assert_eq!(copy.image_offset.x, 32);
        assert_eq!(copy.image_offset.y, 64);
        assert_eq!(copy.image_extent.width, 16);
        assert_eq!(copy.image_extent.depth, 1);
    }

    #[test]
    #[ignore = "Requires GPU hardware"]
    fn stream_one_page_and_draw() {
        let mut device = VulkanDeviceBuilder::new()
            .app_name("virtex-gpu test")
            .build()
            .unwrap();
        let caps = device
            .compressed_formats()
            .into_iter()
            .find(|caps| caps.format == CompressedFormat::Astc8x8Unorm)
            .expect("ASTC 8x8 sparse support");
        let page = caps.page_sizes[0];

        let texture = device
            .create_sparse_texture(&SparseTextureDesc {
                width: page.width * 4,
                height: page.height * 4,
                format: CompressedFormat::Astc8x8Unorm,
                page_size_index: 0,
            })
            .unwrap();
        let region = TexelRegion::new(0, 0, page.width, page.height);
        device.commit_region(texture, region, true).unwrap();
        assert_eq!(device.resident_pages(texture), Some(1));

        let mut buffer = device.create_staging_buffer(DEFAULT_SLOT_CAPACITY).unwrap();
        let bytes = caps.block.payload_bytes(page.width, page.height);
        buffer.mapped_mut()[..bytes as usize].fill(0x42);
        device
            .upload_from_buffer(texture, &buffer, region, caps.format, bytes)
            .unwrap();
        let fence = device.insert_fence().unwrap();
        assert!(device
            .client_wait(&fence, true, Duration::from_secs(5))
            .is_signaled());
        drop(fence);

        let program = device
            .create_program(&ShaderStages::vertex_fragment(
                virtex_shaders::fullscreen_vertex_shader(),
                virtex_shaders::sparse_fetch_fragment_shader(),
            ))
            .unwrap();
        device
            .draw_fullscreen(
                &FrameDesc {
                    width: 256,
                    height: 256,
                    clear_color: Vec4::new(0.2, 0.4, 0.7, 1.0),
                },
                program,
                texture,
            )
            .unwrap();
        assert!(device.take_error().is_none());

        device.commit_region(texture, region, false).unwrap();
        assert_eq!(device.resident_pages(texture), Some(0));

        device.destroy_staging_buffer(buffer);
        device.destroy_program(program);
        device.destroy_texture(texture);
    }
}
