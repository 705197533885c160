//! Virtex headless viewer
//!
//! Maps a compressed image, streams its pages into a sparse texture and paints
//! a fixed number of offscreen frames.
//!
//! ## Usage
//!
//! ```bash
//! cargo run -p virtex-viewer -- [OPTIONS] [IMAGE]
//! ```
//!
//! Without `IMAGE` a synthetic 2048x2048 ASTC 8x8 image is streamed.
//!
//! ## Environment Variables
//!
//! - `RUST_LOG`: Set log level (e.g., info, debug, trace)

mod args;

use std::time::Instant;

use tracing::info;
use virtex_app::{init_logging, InitialPopulation, PageStreamer, Pipeline, PipelineConfig};
use virtex_core::{ImageSource, MappedImage, PageCoord, SparseDevice};
use virtex_gpu::VulkanDeviceBuilder;
use virtex_test::{EmulatedDevice, EmulatorConfig, FenceProgress, SyntheticImage};

use crate::args::ViewerArgs;

const SYNTHETIC_SIZE: u32 = 2048;

fn main() -> anyhow::Result<()> {
    let args = ViewerArgs::from_args();
    if args.help {
        print_help();
        return Ok(());
    }

    init_logging();
    info!("virtex viewer starting...");

    if args.emulated {
        let mut device =
            EmulatedDevice::new(EmulatorConfig::default().progress(FenceProgress::Immediate));
        open_and_run(&mut device, &args)
    } else {
        let mut device = VulkanDeviceBuilder::new()
            .app_name("virtex-viewer")
            .validation(!args.no_validation)
            .build()?;
        open_and_run(&mut device, &args)
    }
}

fn open_and_run<D: SparseDevice>(device: &mut D, args: &ViewerArgs) -> anyhow::Result<()> {
    match &args.image {
        Some(path) => {
            info!("Mapping {}", path.display());
            run(device, MappedImage::open(path)?, args)
        }
        None => {
            let config = PipelineConfig::default();
            info!(
                "Streaming synthetic {SYNTHETIC_SIZE}x{SYNTHETIC_SIZE} {} image",
                config.format
            );
            let image = SyntheticImage::new(config.format, SYNTHETIC_SIZE, SYNTHETIC_SIZE);
            run(device, image.into_bytes(), args)
        }
    }
}

fn run<D: SparseDevice, S: ImageSource>(
    device: &mut D,
    source: S,
    args: &ViewerArgs,
) -> anyhow::Result<()> {
    let initial = if args.fill {
        InitialPopulation::None
    } else {
        InitialPopulation::default()
    };
    let config = PipelineConfig::default().with_initial(initial);
    let mut pipeline = Pipeline::init(device, source, config)?;

    let result = paint_frames(&mut pipeline, device, args);
    let quit = pipeline.quit(device);
    result?;
    quit?;
    Ok(())
}

fn paint_frames<D: SparseDevice, S: ImageSource>(
    pipeline: &mut Pipeline<D, S>,
    device: &mut D,
    args: &ViewerArgs,
) -> anyhow::Result<()> {
    let grid = *pipeline.manager().grid();
    let pages =
        (0..grid.pages_y()).flat_map(move |y| (0..grid.pages_x()).map(move |x| PageCoord::new(x, y)));

    let mut streamer = PageStreamer::new();
    if args.fill {
        for page in pages {
            pipeline.fill_page(device, page.x, page.y)?;
        }
        info!("Filled {} pages", grid.page_count());
    } else {
        let manager = pipeline.manager();
        let queued = streamer.request_all(pages.filter(|page| !manager.is_committed(page.x, page.y)));
        info!("Queued {queued} pages for streaming");
    }

    let start = Instant::now();
    for frame in 0..args.frames {
        let report = pipeline.pump(device, &mut streamer)?;
        pipeline.paint(device, args.width, args.height, frame)?;

        if frame % 30 == 0 {
            info!(
                "Frame {frame}: {} pages committed, {} in flight, {} queued",
                pipeline.manager().committed_count(),
                pipeline.pool().in_flight_count(),
                report.queued
            );
        }
    }

    let elapsed = start.elapsed().as_secs_f64();
    info!(
        "Painted {} frames in {elapsed:.2}s ({:.1} fps), {} pages streamed",
        args.frames,
        args.frames as f64 / elapsed.max(f64::EPSILON),
        streamer.streamed()
    );
    Ok(())
}

fn print_help() {
    eprintln!(
        "Virtex sparse texture streaming viewer

USAGE:
    cargo run -p virtex-viewer -- [OPTIONS] [IMAGE]

ARGS:
    IMAGE                   ASTC 8x8 image to stream (default: synthetic {SYNTHETIC_SIZE}x{SYNTHETIC_SIZE})

OPTIONS:
    --frames <N>            Frames to paint before quitting (default: 120)
    --size <WxH>            Viewport size (default: 1280x720)
    --fill                  Fill every page synchronously instead of streaming
    --emulated              Run on the software device instead of Vulkan
    --no-validation         Disable Vulkan validation layers
    -h, --help              Print this help message

ENVIRONMENT VARIABLES:
    RUST_LOG                Set log level (e.g., info, debug, trace)"
    );
}
