//! framebridge CLI
//!
//! Command-line interface for exercising the capture bridge.

use clap::{Parser, Subcommand, ValueEnum};
use framebridge::{
    Error, FrameSource, HostBackend, OwnedSample, PixelLayout, Resolution, SourceConfig,
    VideoSource,
};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Pixel layout for the synthetic producer
#[derive(Debug, Clone, Copy, ValueEnum, Default)]
enum Layout {
    /// 12-bit semi-planar YUV (NV12)
    #[default]
    Nv12,
    /// 24-bit packed RGB
    Rgb,
}

impl From<Layout> for PixelLayout {
    fn from(l: Layout) -> Self {
        match l {
            Layout::Nv12 => PixelLayout::SemiPlanar,
            Layout::Rgb => PixelLayout::Packed,
        }
    }
}

#[derive(Parser)]
#[command(name = "framebridge")]
#[command(about = "Latest-frame capture bridge - GStreamer appsink to GPU RGBA staging")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show build information and the effective configuration
    Info {
        /// Configuration file (defaults apply when omitted)
        #[arg(short, long)]
        config: Option<PathBuf>,
    },

    /// Feed generated frames through the bridge with a slow or fast consumer
    Synthetic {
        /// Frame width
        #[arg(long, default_value = "1280")]
        width: u32,

        /// Frame height
        #[arg(long, default_value = "720")]
        height: u32,

        /// Pixel layout of generated frames
        #[arg(short, long, value_enum, default_value = "nv12")]
        layout: Layout,

        /// Producer framerate
        #[arg(short, long, default_value = "60")]
        fps: u32,

        /// Simulated consumer work per frame in milliseconds
        #[arg(short, long, default_value = "0")]
        work_ms: u64,

        /// Stop after this many delivered frames
        #[arg(short = 'n', long)]
        frames: Option<u64>,

        /// Capture timeout in milliseconds
        #[arg(short, long, default_value = "1000")]
        timeout_ms: u64,
    },

    /// Run a GStreamer pipeline from a TOML configuration
    Run {
        /// Configuration file (defaults apply when omitted)
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Override the pipeline description
        #[arg(short, long)]
        pipeline: Option<String>,

        /// Stop after this many delivered frames
        #[arg(short = 'n', long)]
        frames: Option<u64>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("framebridge=info".parse()?),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Info { config } => cmd_info(config),
        Commands::Synthetic {
            width,
            height,
            layout,
            fps,
            work_ms,
            frames,
            timeout_ms,
        } => {
            cmd_synthetic(
                Resolution::new(width, height),
                layout.into(),
                fps,
                Duration::from_millis(work_ms),
                frames,
                Duration::from_millis(timeout_ms),
            )
            .await
        }
        Commands::Run {
            config,
            pipeline,
            frames,
        } => cmd_run(config, pipeline, frames).await,
    }
}

fn cmd_info(config: Option<PathBuf>) -> anyhow::Result<()> {
    let config = match config {
        Some(path) => SourceConfig::load(&path)?,
        None => SourceConfig::default(),
    };

    println!("framebridge {}", framebridge::VERSION);
    println!("=================\n");

    println!(
        "GStreamer support: {}",
        if framebridge::has_gstreamer() {
            "Yes"
        } else {
            "No (build with --features gstreamer)"
        }
    );
    println!("GPU backend: {}", framebridge::gpu::GpuBackend::name(&HostBackend::new()));
    println!("Layouts:");
    for layout in [PixelLayout::SemiPlanar, PixelLayout::Packed] {
        println!("  - {} ({} bpp)", layout, layout.bits_per_pixel());
    }

    println!("\nConfiguration:\n");
    println!("{}", config.to_toml_string()?);

    Ok(())
}

async fn cmd_synthetic(
    resolution: Resolution,
    layout: PixelLayout,
    fps: u32,
    work: Duration,
    frames: Option<u64>,
    timeout: Duration,
) -> anyhow::Result<()> {
    if fps == 0 {
        anyhow::bail!("fps must be at least 1");
    }

    let config = SourceConfig::default()
        .with_expected_resolution(resolution.width, resolution.height)
        .with_capture_timeout(timeout);
    let source = Arc::new(VideoSource::new(config, HostBackend::new())?);
    source.open();

    println!("Synthetic capture: {} {} @ {} fps", resolution, layout, fps);
    println!("Press Ctrl+C to stop.\n");

    let (stop_tx, stop_rx) = crossbeam_channel::bounded::<()>(0);
    let producer = {
        let source = source.clone();
        let ticker = crossbeam_channel::tick(Duration::from_secs(1) / fps);
        std::thread::spawn(move || {
            let mut seed = 0u8;
            loop {
                crossbeam_channel::select! {
                    recv(stop_rx) -> _ => break,
                    recv(ticker) -> _ => {
                        let sample = OwnedSample::pattern(resolution, layout, seed);
                        seed = seed.wrapping_add(1);
                        // failures are counted by the source
                        let _ = source.on_buffer(&sample);
                    }
                }
            }
            source.on_end_of_stream();
        })
    };

    let delivered = run_consumer(source.clone(), frames, Some(timeout), work).await;

    drop(stop_tx);
    if producer.join().is_err() {
        tracing::error!("Producer thread panicked");
    }

    print_stats(&source);
    delivered.map(|_| ())
}

#[cfg(feature = "gstreamer")]
async fn cmd_run(
    config: Option<PathBuf>,
    pipeline: Option<String>,
    frames: Option<u64>,
) -> anyhow::Result<()> {
    let mut config = match config {
        Some(path) => SourceConfig::load(&path)?,
        None => SourceConfig::default(),
    };
    if let Some(pipeline) = pipeline {
        config = config.with_pipeline(pipeline);
    }
    let timeout = config.capture_timeout();

    let video = Arc::new(framebridge::GstVideo::create(config, HostBackend::new())?);
    video.open()?;
    println!("Pipeline running. Press Ctrl+C to stop.\n");

    let delivered = run_consumer(video.clone(), frames, timeout, Duration::ZERO).await;

    video.close()?;
    print_stats(video.source());
    delivered.map(|_| ())
}

#[cfg(not(feature = "gstreamer"))]
async fn cmd_run(
    _config: Option<PathBuf>,
    _pipeline: Option<String>,
    _frames: Option<u64>,
) -> anyhow::Result<()> {
    anyhow::bail!("this build has no GStreamer support; rebuild with --features gstreamer")
}

/// Drive `consume` on a blocking thread until it finishes or Ctrl+C
async fn run_consumer<S>(
    source: Arc<S>,
    frames: Option<u64>,
    timeout: Option<Duration>,
    work: Duration,
) -> anyhow::Result<u64>
where
    S: FrameSource + Send + Sync + 'static,
{
    let stop = Arc::new(AtomicBool::new(false));
    let mut worker = {
        let source = source.clone();
        let stop = stop.clone();
        tokio::task::spawn_blocking(move || consume(&*source, frames, timeout, work, &stop))
    };

    let delivered = tokio::select! {
        res = &mut worker => res??,
        _ = tokio::signal::ctrl_c() => {
            println!("\nStopping...");
            stop.store(true, Ordering::SeqCst);
            // wakes a consumer blocked in capture
            source.close()?;
            worker.await??
        }
    };

    Ok(delivered)
}

fn consume<S: FrameSource>(
    source: &S,
    frames: Option<u64>,
    timeout: Option<Duration>,
    work: Duration,
    stop: &AtomicBool,
) -> anyhow::Result<u64> {
    let mut delivered = 0u64;
    let mut window_start = Instant::now();
    let mut window_frames = 0u64;

    while !stop.load(Ordering::SeqCst) && frames.map_or(true, |n| delivered < n) {
        let frame = match source.capture(timeout) {
            Ok(frame) => frame,
            Err(Error::EndOfStream) => {
                tracing::info!("Stream ended");
                break;
            }
            Err(e) if e.is_recoverable() => {
                tracing::debug!("No frame: {}", e);
                continue;
            }
            Err(e) => return Err(e.into()),
        };

        match source.convert(&frame) {
            Ok(staged) => tracing::trace!(
                "Frame {} staged in slot {} at {}",
                frame.sequence(),
                staged.index(),
                staged.device_ptr()
            ),
            Err(e) if e.is_recoverable() => {
                tracing::warn!("Skipping frame {}: {}", frame.sequence(), e)
            }
            Err(e) => return Err(e.into()),
        }

        if !work.is_zero() {
            std::thread::sleep(work);
        }

        delivered += 1;
        window_frames += 1;

        let elapsed = window_start.elapsed();
        if elapsed >= Duration::from_secs(1) {
            tracing::info!(
                "{:.1} fps delivered, last frame {} ({})",
                window_frames as f64 / elapsed.as_secs_f64(),
                frame.sequence(),
                frame.geometry()
            );
            window_start = Instant::now();
            window_frames = 0;
        }
    }

    Ok(delivered)
}

fn print_stats<B: framebridge::GpuBackend>(source: &VideoSource<B>) {
    let stats = source.stats();
    println!("\nStatistics:");
    println!("  Frames received: {}", stats.frames_received);
    println!("  Frames produced: {}", stats.frames_produced);
    println!("  Frames dropped: {}", stats.frames_dropped);
    println!("  Frames delivered: {}", stats.frames_delivered);
    println!("  Frames superseded: {}", stats.frames_superseded);
    println!("  Conversions: {}", stats.conversions);
}
