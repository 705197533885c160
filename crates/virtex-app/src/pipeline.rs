//! Streaming pipeline lifecycle: init, paint, quit.

use std::f32::consts::TAU;
use std::time::Duration;

use glam::Vec4;
use tracing::{error, info, warn};
use virtex_core::{
    CompressedImage, FrameDesc, ImageSource, PageGeometry, ProgramHandle, ShaderStages,
    SparseDevice,
};
use virtex_stream::{
    discover_geometry, FinishFlags, PageStreamer, PumpReport, SlotState, SparseTextureManager,
    StagingPool, StreamError, TransferStatus,
};

use crate::config::{InitialPopulation, PipelineConfig};
use crate::error::{PipelineError, Result};
use crate::logging::diagnostic_sink;

/// Frames in one clear color cycle.
const PULSE_FRAMES: u64 = 60;

/// Clear color for `frame`: a dim blue that pulses once every 60 frames.
pub fn clear_color(frame: u64) -> Vec4 {
    let x = (TAU * (frame % PULSE_FRAMES) as f32 / PULSE_FRAMES as f32).sin();
    Vec4::new(0.2, 0.4, 0.7, 1.0) * x
}

/// Everything needed to stream a compressed image into a sparse texture and
/// draw it.
///
/// The pipeline owns its image source and GPU objects; the device is passed
/// to each call. Dropping a pipeline without [`quit`](Self::quit) leaks its
/// device objects.
pub struct Pipeline<D: SparseDevice, S: ImageSource> {
    source: S,
    pool: StagingPool<D>,
    manager: SparseTextureManager,
    program: ProgramHandle,
    config: PipelineConfig,
}

impl<D: SparseDevice, S: ImageSource> Pipeline<D, S> {
    /// Build the pipeline.
    ///
    /// On failure every object created so far is released before the error
    /// is returned.
    pub fn init(device: &mut D, source: S, config: PipelineConfig) -> Result<Self> {
        if source.bytes().is_none() {
            error!("Source image is not mapped");
            return Err(PipelineError::SourceUnmapped);
        }

        device.install_diagnostics(diagnostic_sink());
        let device_info = device.info();
        info!("Vendor: {}", device_info.vendor);
        info!("Renderer: {}", device_info.renderer);
        info!("Version: {}", device_info.version);
        info!("{} extensions", device_info.extensions.len());
        for extension in &device_info.extensions {
            tracing::debug!("  {extension}");
        }

        let mut pool = StagingPool::new(device, config.slot_count, config.slot_capacity)
            .map_err(PipelineError::SlotAllocation)?;

        let (program, manager) = match Self::create_resources(device, &source, &config, &mut pool)
        {
            Ok(resources) => resources,
            Err(e) => {
                error!("Pipeline init failed: {e}");
                pool.destroy(device);
                return Err(e);
            }
        };

        info!(
            "Pipeline ready: {} committed pages, {} slots in flight",
            manager.committed_count(),
            pool.in_flight_count()
        );
        Ok(Self {
            source,
            pool,
            manager,
            program,
            config,
        })
    }

    /// Parse the header, create the program and texture, then populate it.
    fn create_resources(
        device: &mut D,
        source: &S,
        config: &PipelineConfig,
        pool: &mut StagingPool<D>,
    ) -> Result<(ProgramHandle, SparseTextureManager)> {
        let image = source.image().map_err(PipelineError::InvalidHeader)?;
        let geometry = discover_geometry(
            &device.compressed_formats(),
            config.format,
            config.page_size_index,
        )
        .map_err(PipelineError::UnsupportedFormat)?;
        if image.format != config.format {
            return Err(PipelineError::FormatMismatch {
                expected: config.format,
                found: image.format,
            });
        }

        let program = device
            .create_program(&ShaderStages::vertex_fragment(
                virtex_shaders::fullscreen_vertex_shader(),
                virtex_shaders::sparse_fetch_fragment_shader(),
            ))
            .map_err(PipelineError::Shader)?;

        let mut manager = match SparseTextureManager::create(
            device,
            image.width(),
            image.height(),
            config.format,
            geometry,
            config.page_size_index,
        ) {
            Ok(manager) => manager,
            Err(e) => {
                device.destroy_program(program);
                return Err(e.into());
            }
        };

        if let Err(e) = Self::populate(device, &image, &config.initial, pool, &mut manager) {
            // Outstanding transfers must land before the texture goes away
            for index in 0..pool.len() {
                let Some(slot) = pool.slot_mut(index) else {
                    continue;
                };
                if !matches!(slot.state(), SlotState::InFlight | SlotState::Faulted) {
                    continue;
                }
                match slot.finish(device, FinishFlags::CLIENT_WAIT, Duration::MAX) {
                    Ok(TransferStatus::Complete) => {}
                    Ok(status) => warn!(
                        "Slot {index}: transfer unfinished before texture release ({status:?})"
                    ),
                    Err(finish) => {
                        warn!("Slot {index}: cannot wait for transfer before texture release: {finish}");
                    }
                }
            }
            manager.destroy(device);
            device.destroy_program(program);
            return Err(e);
        }

        Ok((program, manager))
    }

    fn populate(
        device: &mut D,
        image: &CompressedImage<'_>,
        initial: &InitialPopulation,
        pool: &mut StagingPool<D>,
        manager: &mut SparseTextureManager,
    ) -> Result<()> {
        match initial {
            InitialPopulation::Stream { page } => {
                let slot = pool.slot_mut(0).ok_or(StreamError::NoSuchSlot(0))?;
                manager.stream_page(device, slot, image, page.x, page.y)?;
                let status = slot.finish(device, FinishFlags::SERVER_WAIT, Duration::ZERO)?;
                info!(
                    "Streamed page ({}, {}) through slot 0: {status:?}",
                    page.x, page.y
                );
            }
            InitialPopulation::Fill { pages } => {
                for page in pages {
                    manager.fill_page(device, image, page.x, page.y)?;
                }
                info!("Filled {} pages", pages.len());
            }
            InitialPopulation::None => {}
        }
        Ok(())
    }

    /// Draw one frame of `width` x `height` and check the device error flag.
    pub fn paint(&mut self, device: &mut D, width: u32, height: u32, frame: u64) -> Result<()> {
        let desc = FrameDesc {
            width,
            height,
            clear_color: clear_color(frame),
        };
        device
            .draw_fullscreen(&desc, self.program, self.manager.handle())
            .map_err(StreamError::from)?;

        if let Some(e) = device.take_error() {
            warn!("Frame {frame} failed: {e}");
            return Err(PipelineError::Device(e));
        }
        Ok(())
    }

    /// Reclaim finished transfers and start queued pages from `streamer`.
    pub fn pump(&mut self, device: &mut D, streamer: &mut PageStreamer) -> Result<PumpReport> {
        let image = self
            .source
            .image()
            .map_err(|e| PipelineError::Stream(e.into()))?;
        Ok(streamer.pump(device, &mut self.pool, &mut self.manager, &image)?)
    }

    /// Fill one page synchronously from the source.
    pub fn fill_page(&mut self, device: &mut D, px: u32, py: u32) -> Result<()> {
        let image = self
            .source
            .image()
            .map_err(|e| PipelineError::Stream(e.into()))?;
        Ok(self.manager.fill_page(device, &image, px, py)?)
    }

    /// Release every GPU object, then report any pending device error.
    pub fn quit(self, device: &mut D) -> Result<()> {
        info!(
            "Shutting down with {} committed pages",
            self.manager.committed_count()
        );
        self.pool.destroy(device);
        self.manager.destroy(device);
        device.destroy_program(self.program);

        if let Some(e) = device.take_error() {
            warn!("Device error at shutdown: {e}");
            return Err(PipelineError::Device(e));
        }
        Ok(())
    }

    pub const fn manager(&self) -> &SparseTextureManager {
        &self.manager
    }

    pub fn manager_mut(&mut self) -> &mut SparseTextureManager {
        &mut self.manager
    }

    pub const fn pool(&self) -> &StagingPool<D> {
        &self.pool
    }

    pub fn pool_mut(&mut self) -> &mut StagingPool<D> {
        &mut self.pool
    }

    pub const fn geometry(&self) -> &PageGeometry {
        self.manager.geometry()
    }

    pub const fn program(&self) -> ProgramHandle {
        self.program
    }

    pub const fn source(&self) -> &S {
        &self.source
    }

    pub const fn config(&self) -> &PipelineConfig {
        &self.config
    }
}
