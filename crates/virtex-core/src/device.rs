//! Backend seam for sparse texture streaming.
//!
//! [`SparseDevice`] is the set of GPU operations the streaming pipeline needs:
//! persistently mapped staging buffers, sparse textures with page commitment,
//! buffer-to-texture uploads, fences, a shader program and one full-screen
//! draw. The Vulkan backend lives in `virtex-gpu`; `virtex-test` provides a
//! software device for tests.

use std::fmt;
use std::time::Duration;

use glam::Vec4;

use crate::error::Result;
use crate::format::{BlockGeometry, CompressedFormat};
use crate::geometry::{PageSize, TexelRegion};

/// Opaque handle to a sparse texture owned by a device.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct TextureHandle(pub u32);

/// Opaque handle to a linked shader program owned by a device.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ProgramHandle(pub u32);

/// Driver-reported description of one compressed format.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FormatCaps {
    pub format: CompressedFormat,
    pub block: BlockGeometry,
    /// Supported virtual page sizes, indexed by page size index.
    pub page_sizes: Vec<PageSize>,
}

/// Parameters for a sparse texture with a single base level.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SparseTextureDesc {
    pub width: u32,
    pub height: u32,
    pub format: CompressedFormat,
    pub page_size_index: usize,
}

/// Non-blocking fence query result.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FenceStatus {
    Signaled,
    Unsignaled,
    Error,
}

/// Result of a bounded CPU wait on a fence.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WaitOutcome {
    /// The fence was already signaled when the wait began.
    AlreadySignaled,
    /// The fence signaled during the wait.
    ConditionSatisfied,
    /// The timeout elapsed first.
    TimeoutExpired,
    /// The wait itself failed.
    WaitFailed,
}

impl WaitOutcome {
    /// Whether the fence is known to be signaled.
    #[inline]
    pub const fn is_signaled(self) -> bool {
        matches!(self, Self::AlreadySignaled | Self::ConditionSatisfied)
    }
}

/// Diagnostic message severity.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Severity {
    Verbose,
    Info,
    Warning,
    Error,
}

/// A message reported by the driver or validation layers.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Diagnostic {
    pub severity: Severity,
    pub source: String,
    pub message: String,
}

/// Callback receiving driver diagnostics.
pub type DiagnosticSink = Box<dyn Fn(&Diagnostic) + Send + Sync>;

/// Category of a device-side error.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum DeviceErrorKind {
    InvalidValue,
    InvalidOperation,
    OutOfMemory,
    DeviceLost,
    Validation,
}

/// An error recorded by the device and surfaced through
/// [`SparseDevice::take_error`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DeviceError {
    pub kind: DeviceErrorKind,
    /// Backend-specific numeric code.
    pub code: i32,
    pub detail: String,
}

impl DeviceError {
    /// Create a new device error.
    pub fn new(kind: DeviceErrorKind, code: i32, detail: impl Into<String>) -> Self {
        Self {
            kind,
            code,
            detail: detail.into(),
        }
    }
}

impl fmt::Display for DeviceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?} (code {:#x}): {}", self.kind, self.code, self.detail)
    }
}

impl std::error::Error for DeviceError {}

/// SPIR-V for each optional pipeline stage.
#[derive(Clone, Copy, Debug, Default)]
pub struct ShaderStages<'a> {
    pub vertex: Option<&'a [u32]>,
    pub tess_control: Option<&'a [u32]>,
    pub tess_evaluation: Option<&'a [u32]>,
    pub geometry: Option<&'a [u32]>,
    pub fragment: Option<&'a [u32]>,
}

impl<'a> ShaderStages<'a> {
    /// Vertex and fragment stages only.
    pub const fn vertex_fragment(vertex: &'a [u32], fragment: &'a [u32]) -> Self {
        Self {
            vertex: Some(vertex),
            tess_control: None,
            tess_evaluation: None,
            geometry: None,
            fragment: Some(fragment),
        }
    }

    /// Number of stages present.
    pub fn stage_count(&self) -> usize {
        [
            self.vertex,
            self.tess_control,
            self.tess_evaluation,
            self.geometry,
            self.fragment,
        ]
        .iter()
        .filter(|stage| stage.is_some())
        .count()
    }
}

/// Per-frame draw parameters.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct FrameDesc {
    pub width: u32,
    pub height: u32,
    pub clear_color: Vec4,
}

/// Identification strings of the active device.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DeviceInfo {
    pub vendor: String,
    pub renderer: String,
    pub version: String,
    pub extensions: Vec<String>,
}

/// A host-visible buffer that stays mapped for its whole lifetime.
pub trait MappedBuffer {
    /// Size of the buffer in bytes.
    fn capacity(&self) -> u64;

    /// The mapped bytes.
    fn mapped(&self) -> &[u8];

    /// The mapped bytes, writable.
    fn mapped_mut(&mut self) -> &mut [u8];
}

/// GPU operations used by the streaming pipeline.
///
/// All calls are issued from a single thread. Work is queued in submission
/// order; a fence created by [`insert_fence`](Self::insert_fence) signals once
/// every command queued before it has completed.
pub trait SparseDevice {
    /// Persistently mapped staging buffer.
    type Buffer: MappedBuffer;
    /// Completion fence. Dropping it releases the underlying GPU object.
    type Fence;

    /// Vendor, renderer, version and extension strings.
    fn info(&self) -> DeviceInfo;

    /// Route driver diagnostics to `sink`, replacing any previous sink.
    fn install_diagnostics(&mut self, sink: DiagnosticSink);

    /// Every compressed format the device can back with sparse storage.
    fn compressed_formats(&self) -> Vec<FormatCaps>;

    /// Allocate a coherent, persistently mapped buffer of exactly `capacity` bytes.
    fn create_staging_buffer(&mut self, capacity: u64) -> Result<Self::Buffer>;

    /// Release a staging buffer. The caller guarantees the GPU no longer reads it.
    fn destroy_staging_buffer(&mut self, buffer: Self::Buffer);

    /// Create a sparse texture with no resident pages.
    fn create_sparse_texture(&mut self, desc: &SparseTextureDesc) -> Result<TextureHandle>;

    /// Destroy a texture and release all of its committed pages.
    fn destroy_texture(&mut self, texture: TextureHandle);

    /// Commit or uncommit the pages of a page-aligned region.
    fn commit_region(
        &mut self,
        texture: TextureHandle,
        region: TexelRegion,
        commit: bool,
    ) -> Result<()>;

    /// Queue a copy of `bytes` tightly packed compressed bytes from `buffer`
    /// into `region` of `texture`.
    fn upload_from_buffer(
        &mut self,
        texture: TextureHandle,
        buffer: &Self::Buffer,
        region: TexelRegion,
        format: CompressedFormat,
        bytes: u64,
    ) -> Result<()>;

    /// Upload tightly packed compressed bytes from host memory and wait for
    /// the copy to complete.
    fn upload_from_host(
        &mut self,
        texture: TextureHandle,
        data: &[u8],
        region: TexelRegion,
        format: CompressedFormat,
    ) -> Result<()>;

    /// Insert a fence after all previously queued work.
    fn insert_fence(&mut self) -> Result<Self::Fence>;

    /// Block until `fence` signals or `timeout` elapses, optionally flushing
    /// queued work first.
    fn client_wait(&mut self, fence: &Self::Fence, flush: bool, timeout: Duration) -> WaitOutcome;

    /// Make subsequent GPU work wait for `fence` without blocking the CPU.
    fn server_wait(&mut self, fence: &Self::Fence);

    /// Query `fence` without blocking.
    fn fence_status(&self, fence: &Self::Fence) -> FenceStatus;

    /// Link a program from the given stages.
    fn create_program(&mut self, stages: &ShaderStages<'_>) -> Result<ProgramHandle>;

    /// Destroy a program.
    fn destroy_program(&mut self, program: ProgramHandle);

    /// Clear, then draw one four-vertex triangle strip sampling `texture`.
    fn draw_fullscreen(
        &mut self,
        frame: &FrameDesc,
        program: ProgramHandle,
        texture: TextureHandle,
    ) -> Result<()>;

    /// Take the oldest pending device error, clearing it.
    fn take_error(&mut self) -> Option<DeviceError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wait_outcome_signaled() {
        assert!(WaitOutcome::AlreadySignaled.is_signaled());
        assert!(WaitOutcome::ConditionSatisfied.is_signaled());
        assert!(!WaitOutcome::TimeoutExpired.is_signaled());
        assert!(!WaitOutcome::WaitFailed.is_signaled());
    }

    #[test]
    fn shader_stage_count() {
        let spirv = [0x0723_0203u32];
        let stages = ShaderStages::vertex_fragment(&spirv, &spirv);
        assert_eq!(stages.stage_count(), 2);
        assert_eq!(ShaderStages::default().stage_count(), 0);
    }

    #[test]
    fn device_error_display() {
        let error = DeviceError::new(DeviceErrorKind::InvalidOperation, 0x502, "upload");
        assert_eq!(error.to_string(), "InvalidOperation (code 0x502): upload");
    }
}
