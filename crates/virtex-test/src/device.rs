//! Software implementation of [`SparseDevice`].
//!
//! [`EmulatedDevice`] keeps sparse textures as plain block arrays with a
//! residency flag per page. Uploads snapshot the staging bytes when they are
//! recorded and land in the texture when the submission carrying them
//! completes, so tests control GPU progress explicitly.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use glam::{UVec2, Vec4};
use hashbrown::HashMap;
use virtex_core::{
    copy_blocks, CompressedFormat, DeviceError, DeviceErrorKind, DeviceInfo, Diagnostic,
    DiagnosticSink, Error, FenceStatus, FormatCaps, FrameDesc, MappedBuffer, PageCoord,
    PageGeometry, PageGrid, PageSize, ProgramHandle, Result, Severity, ShaderStages,
    SparseDevice, SparseTextureDesc, TexelRegion, TextureHandle, WaitOutcome,
};

/// Error codes reported through [`DeviceError::code`].
pub mod codes {
    pub const INVALID_VALUE: i32 = 0x0501;
    pub const INVALID_OPERATION: i32 = 0x0502;
    pub const OUT_OF_MEMORY: i32 = 0x0505;
}

const SPIRV_MAGIC: u32 = 0x0723_0203;

/// How emulated submissions make progress.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum FenceProgress {
    /// Work completes only through [`EmulatedDevice::complete_all`] and
    /// [`EmulatedDevice::complete_next`].
    Manual,
    /// A client wait with a non-zero timeout completes the work it waits on.
    #[default]
    OnWait,
    /// Work completes as soon as its fence is inserted.
    Immediate,
}

/// Sparse page sizes reported for every format: 64 KiB pages.
pub fn default_formats() -> Vec<FormatCaps> {
    CompressedFormat::ALL
        .iter()
        .map(|&format| {
            let block = format.block();
            let (cols, rows) = if block.bits == 64 { (128, 64) } else { (64, 64) };
            FormatCaps {
                format,
                block,
                page_sizes: vec![PageSize::new(block.width * cols, block.height * rows, 1)],
            }
        })
        .collect()
}

/// Emulator configuration.
#[derive(Clone, Debug)]
pub struct EmulatorConfig {
    /// Formats and page sizes reported by the device.
    pub formats: Vec<FormatCaps>,
    /// How fences signal.
    pub progress: FenceProgress,
    /// Staging buffer creation fails once this many are alive.
    pub max_staging_buffers: Option<usize>,
    /// Every program fails to build.
    pub reject_programs: bool,
}

impl Default for EmulatorConfig {
    fn default() -> Self {
        Self {
            formats: default_formats(),
            progress: FenceProgress::default(),
            max_staging_buffers: None,
            reject_programs: false,
        }
    }
}

impl EmulatorConfig {
    /// Report `page` as the only page size of `format`.
    #[must_use]
    pub fn with_page_size(mut self, format: CompressedFormat, page: PageSize) -> Self {
        match self.formats.iter_mut().find(|caps| caps.format == format) {
            Some(caps) => caps.page_sizes = vec![page],
            None => self.formats.push(FormatCaps {
                format,
                block: format.block(),
                page_sizes: vec![page],
            }),
        }
        self
    }

    /// Stop reporting `format`.
    #[must_use]
    pub fn without_format(mut self, format: CompressedFormat) -> Self {
        self.formats.retain(|caps| caps.format != format);
        self
    }

    #[must_use]
    pub const fn progress(mut self, progress: FenceProgress) -> Self {
        self.progress = progress;
        self
    }

    #[must_use]
    pub const fn max_staging_buffers(mut self, count: usize) -> Self {
        self.max_staging_buffers = Some(count);
        self
    }

    #[must_use]
    pub const fn reject_programs(mut self) -> Self {
        self.reject_programs = true;
        self
    }
}

/// Host memory standing in for a persistently mapped buffer.
#[derive(Debug)]
pub struct EmulatedBuffer {
    id: u32,
    data: Vec<u8>,
}

impl EmulatedBuffer {
    /// Buffer identity, unique per device.
    pub const fn id(&self) -> u32 {
        self.id
    }
}

impl MappedBuffer for EmulatedBuffer {
    fn capacity(&self) -> u64 {
        self.data.len() as u64
    }

    fn mapped(&self) -> &[u8] {
        &self.data
    }

    fn mapped_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }
}

/// Emulated fence. Signals once every submission up to it has completed.
#[derive(Debug)]
pub struct EmulatedFence {
    id: u64,
    live: Arc<AtomicUsize>,
}

impl EmulatedFence {
    /// Position of the fence in submission order, starting at 1.
    pub const fn id(&self) -> u64 {
        self.id
    }
}

impl Drop for EmulatedFence {
    fn drop(&mut self) {
        self.live.fetch_sub(1, Ordering::Relaxed);
    }
}

/// A recorded draw.
#[derive(Clone, Debug, PartialEq)]
pub struct FrameRecord {
    pub width: u32,
    pub height: u32,
    pub clear_color: Vec4,
    pub program: ProgramHandle,
    pub texture: TextureHandle,
    /// Pages the draw could sample.
    pub resident_pages: usize,
    /// Whether a server wait preceded the draw.
    pub after_server_wait: bool,
}

struct EmulatedTexture {
    grid: PageGrid,
    resident: Vec<bool>,
    blocks: Vec<u8>,
    pitch: usize,
}

impl EmulatedTexture {
    fn new(desc: &SparseTextureDesc, geometry: PageGeometry) -> Self {
        let grid = PageGrid::new(desc.width, desc.height, geometry);
        let block = geometry.block;
        Self {
            grid,
            resident: vec![false; grid.page_count()],
            blocks: vec![0; block.payload_bytes(desc.width, desc.height) as usize],
            pitch: block.row_pitch(desc.width),
        }
    }

    fn page_resident(&self, page: PageCoord) -> bool {
        self.grid
            .index(page)
            .is_some_and(|index| self.resident[index])
    }

    fn region_resident(&self, region: TexelRegion) -> bool {
        self.grid
            .pages_covering(region)
            .all(|page| self.page_resident(page))
    }

    fn resident_count(&self) -> usize {
        self.resident.iter().filter(|&&resident| resident).count()
    }

    fn set_residency(&mut self, region: TexelRegion, resident: bool) -> usize {
        let pages: Vec<_> = self.grid.pages_covering(region).collect();
        let mut changed = 0;
        for page in pages {
            let Some(index) = self.grid.index(page) else {
                continue;
            };
            if self.resident[index] == resident {
                continue;
            }
            self.resident[index] = resident;
            if !resident {
                self.clear_page(page);
            }
            changed += 1;
        }
        changed
    }

    fn block_range(&self, region: TexelRegion) -> (usize, usize, usize) {
        let block = self.grid.geometry.block;
        let offset =
            (region.y / block.height) as usize * self.pitch + (region.x / block.width) as usize * block.bytes();
        (offset, block.row_pitch(region.width), block.blocks_y(region.height) as usize)
    }

    fn clear_page(&mut self, page: PageCoord) {
        let Some(region) = self.grid.page_region(page) else {
            return;
        };
        let (offset, run, rows) = self.block_range(region);
        for row in 0..rows {
            let start = offset + row * self.pitch;
            self.blocks[start..start + run].fill(0);
        }
    }

    fn write(&mut self, region: TexelRegion, data: &[u8]) -> Result<()> {
        let block = self.grid.geometry.block;
        let (offset, run, _) = self.block_range(region);
        copy_blocks(
            data,
            run,
            UVec2::ZERO,
            &mut self.blocks[offset..],
            self.pitch,
            block,
            block.covering_extent(region.width, region.height),
        )?;

        // Writes to pages without memory are dropped
        let dropped: Vec<_> = self
            .grid
            .pages_covering(region)
            .filter(|&page| !self.page_resident(page))
            .collect();
        for page in dropped {
            self.clear_page(page);
        }
        Ok(())
    }

    fn block(&self, block_x: u32, block_y: u32) -> Option<&[u8]> {
        let block = self.grid.geometry.block;
        if block_x >= block.blocks_x(self.grid.width) || block_y >= block.blocks_y(self.grid.height)
        {
            return None;
        }
        let page = PageCoord::new(
            block_x * block.width / self.grid.geometry.page_width,
            block_y * block.height / self.grid.geometry.page_height,
        );
        if !self.page_resident(page) {
            return None;
        }
        let start = block_y as usize * self.pitch + block_x as usize * block.bytes();
        self.blocks.get(start..start + block.bytes())
    }
}

struct PendingCopy {
    texture: TextureHandle,
    region: TexelRegion,
    data: Vec<u8>,
}

struct Submission {
    fence: u64,
    copies: Vec<PendingCopy>,
}

/// Device call that can be made to fail once with [`EmulatedDevice::fail_next`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Fault {
    CommitRegion,
    UploadFromBuffer,
    InsertFence,
}

/// Software sparse device with controllable fence progress.
pub struct EmulatedDevice {
    config: EmulatorConfig,
    sink: Option<DiagnosticSink>,
    errors: VecDeque<DeviceError>,
    next_handle: u32,
    live_buffers: usize,
    textures: HashMap<TextureHandle, EmulatedTexture>,
    programs: HashMap<ProgramHandle, usize>,
    recording: Vec<PendingCopy>,
    submitted: VecDeque<Submission>,
    next_fence: u64,
    completed: u64,
    live_fences: Arc<AtomicUsize>,
    fence_failure: bool,
    faults: Vec<Fault>,
    pending_server_wait: bool,
    server_waits: usize,
    frames: Vec<FrameRecord>,
}

impl Default for EmulatedDevice {
    fn default() -> Self {
        Self::new(EmulatorConfig::default())
    }
}

impl EmulatedDevice {
    /// Create a device with the given configuration.
    pub fn new(config: EmulatorConfig) -> Self {
        Self {
            config,
            sink: None,
            errors: VecDeque::new(),
            next_handle: 1,
            live_buffers: 0,
            textures: HashMap::new(),
            programs: HashMap::new(),
            recording: Vec::new(),
            submitted: VecDeque::new(),
            next_fence: 1,
            completed: 0,
            live_fences: Arc::new(AtomicUsize::new(0)),
            fence_failure: false,
            faults: Vec::new(),
            pending_server_wait: false,
            server_waits: 0,
            frames: Vec::new(),
        }
    }

    /// Complete every submission, including copies not yet fenced.
    pub fn complete_all(&mut self) {
        let last = self.next_fence - 1;
        self.complete_through(last);
        let copies = std::mem::take(&mut self.recording);
        self.apply(copies);
    }

    /// Complete the oldest outstanding submission.
    ///
    /// Returns `false` when nothing was outstanding.
    pub fn complete_next(&mut self) -> bool {
        match self.submitted.front().map(|submission| submission.fence) {
            Some(fence) => {
                self.complete_through(fence);
                true
            }
            None => false,
        }
    }

    /// Submissions whose fence has not signaled.
    pub fn pending_submissions(&self) -> usize {
        self.submitted.len()
    }

    /// Fences handed out and not yet dropped.
    pub fn live_fences(&self) -> usize {
        self.live_fences.load(Ordering::Relaxed)
    }

    pub const fn live_buffers(&self) -> usize {
        self.live_buffers
    }

    pub fn live_textures(&self) -> usize {
        self.textures.len()
    }

    pub fn live_programs(&self) -> usize {
        self.programs.len()
    }

    /// Make fence queries and waits fail.
    pub fn set_fence_failure(&mut self, fail: bool) {
        self.fence_failure = fail;
    }

    /// Make the next call of `fault` return an error.
    pub fn fail_next(&mut self, fault: Fault) {
        self.faults.push(fault);
    }

    fn injected(&mut self, fault: Fault) -> Result<()> {
        match self.faults.iter().position(|&pending| pending == fault) {
            Some(index) => {
                self.faults.remove(index);
                Err(Error::Gpu(format!("injected {fault:?} failure")))
            }
            None => Ok(()),
        }
    }

    /// Raise a device error as if the driver had reported it.
    pub fn raise_error(&mut self, error: DeviceError) {
        self.flag(error);
    }

    /// Server waits issued so far.
    pub const fn server_waits(&self) -> usize {
        self.server_waits
    }

    /// Every draw recorded so far.
    pub fn frames(&self) -> &[FrameRecord] {
        &self.frames
    }

    pub fn last_frame(&self) -> Option<&FrameRecord> {
        self.frames.last()
    }

    /// Contents of one block, or `None` if its page is not resident.
    pub fn block_at(&self, texture: TextureHandle, block_x: u32, block_y: u32) -> Option<&[u8]> {
        self.textures.get(&texture)?.block(block_x, block_y)
    }

    /// Residency of one page.
    pub fn is_page_resident(&self, texture: TextureHandle, page: PageCoord) -> Option<bool> {
        let texture = self.textures.get(&texture)?;
        texture.grid.index(page)?;
        Some(texture.page_resident(page))
    }

    /// Number of resident pages of a texture.
    pub fn resident_pages(&self, texture: TextureHandle) -> Option<usize> {
        self.textures.get(&texture).map(EmulatedTexture::resident_count)
    }

    fn allocate_handle(&mut self) -> u32 {
        let handle = self.next_handle;
        self.next_handle += 1;
        handle
    }

    fn flag(&mut self, error: DeviceError) {
        tracing::debug!("Emulated device error: {error}");
        if let Some(sink) = &self.sink {
            sink(&Diagnostic {
                severity: Severity::Error,
                source: "emulator".to_string(),
                message: error.to_string(),
            });
        }
        self.errors.push_back(error);
    }

    fn complete_through(&mut self, fence: u64) {
        while let Some(submission) = self.submitted.front() {
            if submission.fence > fence {
                break;
            }
            if let Some(submission) = self.submitted.pop_front() {
                self.apply(submission.copies);
            }
        }
        self.completed = self.completed.max(fence);
    }

    fn apply(&mut self, copies: Vec<PendingCopy>) {
        for copy in copies {
            // The texture may have been destroyed while the copy was queued
            let Some(texture) = self.textures.get_mut(&copy.texture) else {
                continue;
            };
            if let Err(e) = texture.write(copy.region, &copy.data) {
                tracing::warn!("Dropped copy into {:?}: {e}", copy.texture);
            }
        }
    }

    fn texture(&self, texture: TextureHandle) -> Result<&EmulatedTexture> {
        self.textures
            .get(&texture)
            .ok_or_else(|| Error::Gpu(format!("unknown texture {texture:?}")))
    }

    /// Check an upload region and return its payload size.
    fn validate_upload(
        &self,
        texture: TextureHandle,
        region: TexelRegion,
        format: CompressedFormat,
    ) -> Result<u64> {
        let grid = self.texture(texture)?.grid;
        let block = format.block();
        if block != grid.geometry.block {
            return Err(Error::InvalidGeometry(format!(
                "{format} upload into a texture with {:?} blocks",
                grid.geometry.block
            )));
        }
        if !block.is_aligned(region.x, region.y) {
            return Err(Error::Misaligned(format!(
                "upload origin ({}, {}) is not block aligned",
                region.x, region.y
            )));
        }
        if !grid.bounds().contains(region) {
            return Err(Error::OutOfBounds(format!(
                "upload {region:?} exceeds {}x{}",
                grid.width, grid.height
            )));
        }
        Ok(block.payload_bytes(region.width, region.height))
    }

    fn fence_signaled(&self, fence: &EmulatedFence) -> bool {
        fence.id <= self.completed
    }
}

impl SparseDevice for EmulatedDevice {
    type Buffer = EmulatedBuffer;
    type Fence = EmulatedFence;

    fn info(&self) -> DeviceInfo {
        DeviceInfo {
            vendor: "virtex".to_string(),
            renderer: "Emulated sparse device".to_string(),
            version: "1.0 (emulated)".to_string(),
            extensions: vec![
                "sparse_texture".to_string(),
                "sparse_residency_fetch".to_string(),
                "texture_compression_astc_ldr".to_string(),
            ],
        }
    }

    fn install_diagnostics(&mut self, sink: DiagnosticSink) {
        sink(&Diagnostic {
            severity: Severity::Info,
            source: "emulator".to_string(),
            message: "diagnostics installed".to_string(),
        });
        self.sink = Some(sink);
    }

    fn compressed_formats(&self) -> Vec<FormatCaps> {
        self.config.formats.clone()
    }

    fn create_staging_buffer(&mut self, capacity: u64) -> Result<EmulatedBuffer> {
        if capacity == 0 {
            return Err(Error::Allocation("zero-sized staging buffer".to_string()));
        }
        if self
            .config
            .max_staging_buffers
            .is_some_and(|max| self.live_buffers >= max)
        {
            return Err(Error::Device(DeviceError::new(
                DeviceErrorKind::OutOfMemory,
                codes::OUT_OF_MEMORY,
                format!("staging buffer limit of {} reached", self.live_buffers),
            )));
        }

        self.live_buffers += 1;
        let id = self.allocate_handle();
        Ok(EmulatedBuffer {
            id,
            data: vec![0; capacity as usize],
        })
    }

    fn destroy_staging_buffer(&mut self, buffer: EmulatedBuffer) {
        tracing::trace!("Destroying staging buffer {}", buffer.id);
        self.live_buffers = self.live_buffers.saturating_sub(1);
    }

    fn create_sparse_texture(&mut self, desc: &SparseTextureDesc) -> Result<TextureHandle> {
        let caps = self
            .config
            .formats
            .iter()
            .find(|caps| caps.format == desc.format)
            .ok_or(Error::UnsupportedFormat(desc.format))?;
        let page = *caps
            .page_sizes
            .get(desc.page_size_index)
            .ok_or(Error::NoPageSize {
                format: desc.format,
                index: desc.page_size_index,
            })?;
        if desc.width == 0 || desc.height == 0 {
            return Err(Error::InvalidGeometry(format!(
                "empty texture {}x{}",
                desc.width, desc.height
            )));
        }

        let geometry = PageGeometry::new(page, caps.block)?;
        let handle = TextureHandle(self.allocate_handle());
        self.textures
            .insert(handle, EmulatedTexture::new(desc, geometry));
        Ok(handle)
    }

    fn destroy_texture(&mut self, texture: TextureHandle) {
        self.textures.remove(&texture);
    }

    fn commit_region(
        &mut self,
        texture: TextureHandle,
        region: TexelRegion,
        commit: bool,
    ) -> Result<()> {
        self.injected(Fault::CommitRegion)?;
        let entry = self
            .textures
            .get_mut(&texture)
            .ok_or_else(|| Error::Gpu(format!("unknown texture {texture:?}")))?;
        if !entry.grid.bounds().contains(region) {
            return Err(Error::OutOfBounds(format!(
                "commit {region:?} exceeds {}x{}",
                entry.grid.width, entry.grid.height
            )));
        }
        if !entry.grid.is_page_aligned(region) {
            return Err(Error::Misaligned(format!(
                "commit {region:?} is not page aligned"
            )));
        }

        let changed = entry.set_residency(region, commit);
        tracing::trace!("{texture:?}: {changed} pages now resident={commit}");
        Ok(())
    }

    fn upload_from_buffer(
        &mut self,
        texture: TextureHandle,
        buffer: &EmulatedBuffer,
        region: TexelRegion,
        format: CompressedFormat,
        bytes: u64,
    ) -> Result<()> {
        self.injected(Fault::UploadFromBuffer)?;
        let expected = self.validate_upload(texture, region, format)?;
        if bytes < expected || bytes > buffer.capacity() {
            return Err(Error::OutOfBounds(format!(
                "upload of {expected} bytes from {bytes} staged bytes in a {} byte buffer",
                buffer.capacity()
            )));
        }

        if !self.texture(texture)?.region_resident(region) {
            self.flag(DeviceError::new(
                DeviceErrorKind::InvalidOperation,
                codes::INVALID_OPERATION,
                format!("upload into uncommitted pages of {texture:?} at {region:?}"),
            ));
            return Ok(());
        }

        self.recording.push(PendingCopy {
            texture,
            region,
            data: buffer.mapped()[..expected as usize].to_vec(),
        });
        Ok(())
    }

    fn upload_from_host(
        &mut self,
        texture: TextureHandle,
        data: &[u8],
        region: TexelRegion,
        format: CompressedFormat,
    ) -> Result<()> {
        let expected = self.validate_upload(texture, region, format)?;
        if (data.len() as u64) < expected {
            return Err(Error::OutOfBounds(format!(
                "upload of {expected} bytes from {} bytes",
                data.len()
            )));
        }

        if !self.texture(texture)?.region_resident(region) {
            self.flag(DeviceError::new(
                DeviceErrorKind::InvalidOperation,
                codes::INVALID_OPERATION,
                format!("upload into uncommitted pages of {texture:?} at {region:?}"),
            ));
            return Ok(());
        }

        // Host uploads are synchronous and ordered after everything queued
        self.complete_all();
        self.apply(vec![PendingCopy {
            texture,
            region,
            data: data[..expected as usize].to_vec(),
        }]);
        Ok(())
    }

    fn insert_fence(&mut self) -> Result<EmulatedFence> {
        self.injected(Fault::InsertFence)?;
        let id = self.next_fence;
        self.next_fence += 1;
        self.submitted.push_back(Submission {
            fence: id,
            copies: std::mem::take(&mut self.recording),
        });
        self.live_fences.fetch_add(1, Ordering::Relaxed);

        if self.config.progress == FenceProgress::Immediate {
            self.complete_through(id);
        }

        Ok(EmulatedFence {
            id,
            live: Arc::clone(&self.live_fences),
        })
    }

    fn client_wait(
        &mut self,
        fence: &EmulatedFence,
        flush: bool,
        timeout: Duration,
    ) -> WaitOutcome {
        if self.fence_failure {
            return WaitOutcome::WaitFailed;
        }
        if self.fence_signaled(fence) {
            return WaitOutcome::AlreadySignaled;
        }
        if flush {
            tracing::trace!("Flush before waiting on fence {}", fence.id);
        }
        if self.config.progress == FenceProgress::OnWait && !timeout.is_zero() {
            self.complete_through(fence.id);
            return WaitOutcome::ConditionSatisfied;
        }
        WaitOutcome::TimeoutExpired
    }

    fn server_wait(&mut self, fence: &EmulatedFence) {
        tracing::trace!("Server wait on fence {}", fence.id);
        self.server_waits += 1;
        self.pending_server_wait = true;
    }

    fn fence_status(&self, fence: &EmulatedFence) -> FenceStatus {
        if self.fence_failure {
            FenceStatus::Error
        } else if self.fence_signaled(fence) {
            FenceStatus::Signaled
        } else {
            FenceStatus::Unsignaled
        }
    }

    fn create_program(&mut self, stages: &ShaderStages<'_>) -> Result<ProgramHandle> {
        if self.config.reject_programs {
            return Err(Error::ShaderCompilation("programs rejected".to_string()));
        }
        if stages.vertex.is_none() || stages.fragment.is_none() {
            return Err(Error::ShaderCompilation(
                "vertex and fragment stages are required".to_string(),
            ));
        }

        let stage_code = [
            ("vertex", stages.vertex),
            ("tessellation control", stages.tess_control),
            ("tessellation evaluation", stages.tess_evaluation),
            ("geometry", stages.geometry),
            ("fragment", stages.fragment),
        ];
        for (label, code) in stage_code {
            if let Some(code) = code {
                if code.first() != Some(&SPIRV_MAGIC) {
                    return Err(Error::ShaderCompilation(format!(
                        "{label} stage is not SPIR-V"
                    )));
                }
            }
        }

        let handle = ProgramHandle(self.allocate_handle());
        self.programs.insert(handle, stages.stage_count());
        Ok(handle)
    }

    fn destroy_program(&mut self, program: ProgramHandle) {
        self.programs.remove(&program);
    }

    fn draw_fullscreen(
        &mut self,
        frame: &FrameDesc,
        program: ProgramHandle,
        texture: TextureHandle,
    ) -> Result<()> {
        if frame.width == 0 || frame.height == 0 {
            self.flag(DeviceError::new(
                DeviceErrorKind::InvalidValue,
                codes::INVALID_VALUE,
                format!("empty viewport {}x{}", frame.width, frame.height),
            ));
            return Ok(());
        }
        if !self.programs.contains_key(&program) {
            self.flag(DeviceError::new(
                DeviceErrorKind::InvalidOperation,
                codes::INVALID_OPERATION,
                format!("draw with unknown program {program:?}"),
            ));
            return Ok(());
        }
        let Some(resident_pages) = self.resident_pages(texture) else {
            self.flag(DeviceError::new(
                DeviceErrorKind::InvalidOperation,
                codes::INVALID_OPERATION,
                format!("draw with unknown texture {texture:?}"),
            ));
            return Ok(());
        };

        self.frames.push(FrameRecord {
            width: frame.width,
            height: frame.height,
            clear_color: frame.clear_color,
            program,
            texture,
            resident_pages,
            after_server_wait: self.pending_server_wait,
        });
        self.pending_server_wait = false;
        Ok(())
    }

    fn take_error(&mut self) -> Option<DeviceError> {
        self.errors.pop_front()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    const PAGE: PageSize = PageSize::new(32, 32, 1);

    fn device(progress: FenceProgress) -> EmulatedDevice {
        EmulatedDevice::new(
            EmulatorConfig::default()
                .with_page_size(CompressedFormat::Astc8x8Unorm, PAGE)
                .progress(progress),
        )
    }

    fn texture(device: &mut EmulatedDevice) -> TextureHandle {
        device
            .create_sparse_texture(&SparseTextureDesc {
                width: 128,
                height: 64,
                format: CompressedFormat::Astc8x8Unorm,
                page_size_index: 0,
            })
            .unwrap()
    }

    fn staged(device: &mut EmulatedDevice, fill: u8) -> EmulatedBuffer {
        let mut buffer = device.create_staging_buffer(4096).unwrap();
        buffer.mapped_mut().fill(fill);
        buffer
    }

    #[test]
    fn default_pages_are_64_kib() {
        for caps in default_formats() {
            let geometry = PageGeometry::new(caps.page_sizes[0], caps.block).unwrap();
            assert_eq!(geometry.page_bytes(), 64 * 1024, "{}", caps.format);
        }
    }

    #[test]
    fn copies_land_when_their_fence_completes() {
        let mut device = device(FenceProgress::Manual);
        let tex = texture(&mut device);
        let page = TexelRegion::new(0, 0, 32, 32);
        device.commit_region(tex, page, true).unwrap();

        let buffer = staged(&mut device, 0x5A);
        device
            .upload_from_buffer(tex, &buffer, page, CompressedFormat::Astc8x8Unorm, 256)
            .unwrap();
        let fence = device.insert_fence().unwrap();
        assert_eq!(device.fence_status(&fence), FenceStatus::Unsignaled);
        assert_eq!(device.block_at(tex, 3, 3), Some(&[0u8; 16][..]));

        assert!(device.complete_next());
        assert_eq!(device.fence_status(&fence), FenceStatus::Signaled);
        assert_eq!(device.block_at(tex, 3, 3), Some(&[0x5Au8; 16][..]));
        assert_eq!(device.block_at(tex, 4, 0), None);
    }

    #[test]
    fn staging_bytes_are_snapshot_at_upload() {
        let mut device = device(FenceProgress::Manual);
        let tex = texture(&mut device);
        let page = TexelRegion::new(32, 0, 32, 32);
        device.commit_region(tex, page, true).unwrap();

        let mut buffer = staged(&mut device, 1);
        device
            .upload_from_buffer(tex, &buffer, page, CompressedFormat::Astc8x8Unorm, 256)
            .unwrap();
        buffer.mapped_mut().fill(2);
        let _fence = device.insert_fence().unwrap();
        device.complete_all();

        assert_eq!(device.block_at(tex, 4, 0), Some(&[1u8; 16][..]));
    }

    #[test]
    fn zero_timeout_wait_times_out() {
        let mut device = device(FenceProgress::OnWait);
        let fence = device.insert_fence().unwrap();
        assert_eq!(
            device.client_wait(&fence, false, Duration::ZERO),
            WaitOutcome::TimeoutExpired
        );
        assert_eq!(
            device.client_wait(&fence, true, Duration::from_millis(1)),
            WaitOutcome::ConditionSatisfied
        );
        assert_eq!(
            device.client_wait(&fence, false, Duration::ZERO),
            WaitOutcome::AlreadySignaled
        );
    }

    #[test]
    fn fence_failure_is_reported() {
        let mut device = device(FenceProgress::Immediate);
        let fence = device.insert_fence().unwrap();
        device.set_fence_failure(true);
        assert_eq!(device.fence_status(&fence), FenceStatus::Error);
        assert_eq!(
            device.client_wait(&fence, false, Duration::from_secs(1)),
            WaitOutcome::WaitFailed
        );
    }

    #[test]
    fn live_fences_track_drops() {
        let mut device = device(FenceProgress::Manual);
        let first = device.insert_fence().unwrap();
        let second = device.insert_fence().unwrap();
        assert_eq!(device.live_fences(), 2);
        drop(first);
        assert_eq!(device.live_fences(), 1);
        drop(second);
        assert_eq!(device.live_fences(), 0);
        assert_eq!(device.pending_submissions(), 2);
        device.complete_all();
        assert_eq!(device.pending_submissions(), 0);
    }

    #[test]
    fn upload_into_uncommitted_page_flags_error() {
        let mut device = device(FenceProgress::Immediate);
        let tex = texture(&mut device);
        let buffer = staged(&mut device, 7);
        device
            .upload_from_buffer(
                tex,
                &buffer,
                TexelRegion::new(0, 0, 32, 32),
                CompressedFormat::Astc8x8Unorm,
                256,
            )
            .unwrap();

        let error = device.take_error().unwrap();
        assert_eq!(error.kind, DeviceErrorKind::InvalidOperation);
        assert_eq!(error.code, codes::INVALID_OPERATION);
        assert!(device.take_error().is_none());
    }

    #[test]
    fn uncommit_drops_data() {
        let mut device = device(FenceProgress::Immediate);
        let tex = texture(&mut device);
        let page = TexelRegion::new(0, 32, 32, 32);
        device
            .upload_from_host(tex, &[0u8; 0], page, CompressedFormat::Astc8x8Unorm)
            .unwrap_err();

        device.commit_region(tex, page, true).unwrap();
        device
            .upload_from_host(tex, &[9u8; 256], page, CompressedFormat::Astc8x8Unorm)
            .unwrap();
        assert_eq!(device.block_at(tex, 0, 4), Some(&[9u8; 16][..]));

        device.commit_region(tex, page, false).unwrap();
        device.commit_region(tex, page, true).unwrap();
        assert_eq!(device.block_at(tex, 0, 4), Some(&[0u8; 16][..]));
        assert_eq!(device.resident_pages(tex), Some(1));
    }

    #[test]
    fn misaligned_commit_is_rejected() {
        let mut device = device(FenceProgress::Immediate);
        let tex = texture(&mut device);
        assert!(matches!(
            device.commit_region(tex, TexelRegion::new(8, 0, 32, 32), true),
            Err(Error::Misaligned(_))
        ));
        assert!(matches!(
            device.commit_region(tex, TexelRegion::new(0, 0, 256, 32), true),
            Err(Error::OutOfBounds(_))
        ));
    }

    #[test]
    fn staging_buffer_limit() {
        let mut device = EmulatedDevice::new(EmulatorConfig::default().max_staging_buffers(1));
        let buffer = device.create_staging_buffer(16).unwrap();
        assert!(matches!(
            device.create_staging_buffer(16),
            Err(Error::Device(DeviceError {
                kind: DeviceErrorKind::OutOfMemory,
                ..
            }))
        ));
        device.destroy_staging_buffer(buffer);
        assert_eq!(device.live_buffers(), 0);
        assert!(device.create_staging_buffer(16).is_ok());
    }

    #[test]
    fn programs_require_spirv() {
        let mut device = EmulatedDevice::default();
        let spirv = [SPIRV_MAGIC, 0];
        let glsl = [0x6c73_2023u32];
        assert!(device
            .create_program(&ShaderStages::vertex_fragment(&spirv, &spirv))
            .is_ok());
        assert!(matches!(
            device.create_program(&ShaderStages::vertex_fragment(&spirv, &glsl)),
            Err(Error::ShaderCompilation(_))
        ));
        assert!(device.create_program(&ShaderStages::default()).is_err());
        assert_eq!(device.live_programs(), 1);
    }

    #[test]
    fn draws_are_recorded() {
        let mut device = device(FenceProgress::Immediate);
        let tex = texture(&mut device);
        let spirv = [SPIRV_MAGIC];
        let program = device
            .create_program(&ShaderStages::vertex_fragment(&spirv, &spirv))
            .unwrap();
        let fence = device.insert_fence().unwrap();
        device.server_wait(&fence);

        let frame = FrameDesc {
            width: 640,
            height: 480,
            clear_color: Vec4::new(0.1, 0.2, 0.3, 0.5),
        };
        device.draw_fullscreen(&frame, program, tex).unwrap();
        device.draw_fullscreen(&frame, program, tex).unwrap();

        let frames = device.frames();
        assert_eq!(frames.len(), 2);
        assert!(frames[0].after_server_wait);
        assert!(!frames[1].after_server_wait);
        assert_relative_eq!(frames[0].clear_color.w, 0.5);
        assert!(device.take_error().is_none());

        device
            .draw_fullscreen(&frame, ProgramHandle(999), tex)
            .unwrap();
        assert_eq!(
            device.take_error().map(|error| error.kind),
            Some(DeviceErrorKind::InvalidOperation)
        );
    }

    #[test]
    fn injected_faults_fire_once() {
        let mut device = EmulatedDevice::default();
        device.fail_next(Fault::InsertFence);
        assert!(matches!(device.insert_fence(), Err(Error::Gpu(_))));
        assert_eq!(device.live_fences(), 0);
        let fence = device.insert_fence().unwrap();
        assert_eq!(device.live_fences(), 1);
        drop(fence);
    }

    #[test]
    fn diagnostics_reach_the_sink() {
        let seen = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&seen);
        let mut device = EmulatedDevice::default();
        device.install_diagnostics(Box::new(move |_diag: &Diagnostic| {
            counter.fetch_add(1, Ordering::Relaxed);
        }));
        device.raise_error(DeviceError::new(
            DeviceErrorKind::DeviceLost,
            -4,
            "lost",
        ));
        assert_eq!(seen.load(Ordering::Relaxed), 2);
        assert_eq!(device.take_error().unwrap().code, -4);
    }
}
