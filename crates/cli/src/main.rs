use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use composition_engine::{ClockEngineFactory, CompositionSpec, EngineFactory, FrameSet};
use playback::{FrameDrawer, FrameInfo, Player, PlayerCallbacks, PlayerConfig, TickOutcome};
use renderer::{SurfaceCanvas, WgpuBackend};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, trace, warn};

#[derive(Parser)]
#[command(name = "composition-cli")]
#[command(about = "Headless composition playback on an offscreen GPU surface")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Play a composition and pump frames into an offscreen surface
    Play {
        /// Composition JSON file
        #[arg(short, long)]
        composition: PathBuf,

        /// Player config JSON file
        #[arg(long)]
        config: Option<PathBuf>,

        /// Logical width override
        #[arg(long)]
        width: Option<f32>,

        /// Logical height override
        #[arg(long)]
        height: Option<f32>,

        /// Pixel density override
        #[arg(long)]
        density: Option<f32>,

        /// Number of display refreshes to run
        #[arg(long, default_value = "120")]
        ticks: u32,

        /// Simulated display refresh rate
        #[arg(long, default_value = "60")]
        fps: f64,

        /// Write the last published frame to this PNG
        #[arg(long)]
        snapshot: Option<PathBuf>,

        /// Retry automatically after an engine error
        #[arg(long)]
        retry_on_error: bool,
    },

    /// Validate a composition and config without touching the GPU
    Check {
        /// Composition JSON file
        #[arg(short, long)]
        composition: PathBuf,

        /// Player config JSON file
        #[arg(long)]
        config: Option<PathBuf>,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let level = if cli.verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };

    tracing_subscriber::fmt().with_max_level(level).init();

    match cli.command {
        Commands::Play {
            composition,
            config,
            width,
            height,
            density,
            ticks,
            fps,
            snapshot,
            retry_on_error,
        } => {
            let mut config = load_config(config.as_deref())?;
            if let Some(width) = width {
                config.width = width;
            }
            if let Some(height) = height {
                config.height = height;
            }
            if let Some(density) = density {
                config.pixel_density = density;
            }
            play_command(
                &composition,
                config,
                PlayOptions {
                    ticks,
                    fps,
                    snapshot,
                    retry_on_error,
                },
            )
        }
        Commands::Check {
            composition,
            config,
        } => check_command(&composition, config.as_deref()),
    }
}

struct PlayOptions {
    ticks: u32,
    fps: f64,
    snapshot: Option<PathBuf>,
    retry_on_error: bool,
}

/// Clears the canvas to a colour that moves with playback time and the
/// number of active tracks.
struct ClearDrawer {
    frames_drawn: u64,
}

impl FrameDrawer<CompositionSpec, FrameSet, SurfaceCanvas> for ClearDrawer {
    type Context = ();

    fn draw_frame(
        &mut self,
        canvas: &mut SurfaceCanvas,
        _context: Option<&mut ()>,
        info: FrameInfo<CompositionSpec, FrameSet>,
    ) {
        let total = info.composition.tracks.len().max(1) as f64;
        let phase = info.current_time.fract();
        let color = wgpu::Color {
            r: phase,
            g: info.frames.len() as f64 / total,
            b: 1.0 - phase,
            a: 1.0,
        };
        trace!(time = info.current_time, active = info.frames.len(), "draw");
        canvas.clear(color);
        self.frames_drawn += 1;
    }
}

fn play_command(composition_path: &Path, config: PlayerConfig, options: PlayOptions) -> Result<()> {
    if !(options.fps > 0.0) {
        bail!("--fps must be positive, got {}", options.fps);
    }

    let composition = Arc::new(
        CompositionSpec::from_json_file(composition_path)
            .with_context(|| format!("loading composition {:?}", composition_path))?,
    );
    info!(
        "Playing {:?}: {} tracks, {:.2}s",
        composition_path,
        composition.tracks.len(),
        composition.duration()
    );

    let backend = pollster::block_on(WgpuBackend::headless()).context("initializing GPU")?;

    let retry_requested = Arc::new(AtomicBool::new(false));
    let callbacks = {
        let retry_requested = Arc::clone(&retry_requested);
        let retry_on_error = options.retry_on_error;
        PlayerCallbacks::new()
            .on_ready(|| info!("Composition ready"))
            .on_complete(|| info!("Composition complete"))
            .on_error(move |err, _retry| {
                warn!("Playback error: {}", err);
                if retry_on_error {
                    // The retry handle is only honored after the error is recorded.
                    retry_requested.store(true, Ordering::Release);
                }
            })
    };

    let mut config = config;
    config.auto_play = true;
    let mut player = Player::new(
        config,
        ClockEngineFactory,
        backend,
        ClearDrawer { frames_drawn: 0 },
    );
    player.set_callbacks(callbacks);
    player.set_composition(Some(Arc::clone(&composition)));
    player.notify_render_context_ready();

    let interval = Duration::from_secs_f64(1.0 / options.fps);
    let mut published = 0u32;
    let mut failed = 0u32;
    for tick in 0..options.ticks {
        if retry_requested.swap(false, Ordering::AcqRel) {
            info!("Retrying after error");
            player.retry_handle().retry();
        }
        match player.on_frame(Instant::now()) {
            TickOutcome::Published => published += 1,
            TickOutcome::ImageFailed | TickOutcome::SurfaceUnavailable => failed += 1,
            TickOutcome::Idle => {}
        }
        debug!(tick, state = ?player.state(), "tick");
        std::thread::sleep(interval);
    }

    let summary = PlaySummary {
        ticks: options.ticks,
        published,
        failed,
        drawn: player.drawer().frames_drawn,
        current_time: player.controller().current_time(),
        state: format!("{:?}", player.state()),
    };
    println!("{}", serde_json::to_string_pretty(&summary)?);

    if let Some(path) = options.snapshot {
        let image = match player.published_image() {
            Some(image) => image,
            None => bail!("no frame was published, nothing to snapshot"),
        };
        let backend = player.pump().backend();
        let frame = image
            .read_pixels(backend.device(), backend.queue())
            .context("reading back published frame")?;
        frame
            .save_png(&path)
            .with_context(|| format!("writing snapshot {:?}", path))?;
        info!("Snapshot written to {:?}", path);
    }

    player.teardown();
    Ok(())
}

#[derive(Serialize)]
struct PlaySummary {
    ticks: u32,
    published: u32,
    failed: u32,
    drawn: u64,
    current_time: f64,
    state: String,
}

fn check_command(composition_path: &Path, config_path: Option<&Path>) -> Result<()> {
    let config = load_config(config_path)?;
    let composition = Arc::new(
        CompositionSpec::from_json_file(composition_path)
            .with_context(|| format!("loading composition {:?}", composition_path))?,
    );

    let size = config.surface_size();
    println!("Composition: {:?}", composition_path);
    println!("  tracks:   {}", composition.tracks.len());
    println!("  duration: {:.3}s", composition.duration());
    for track in &composition.tracks {
        println!(
            "  - {} [{:.3}s, {:.3}s) {}",
            track.id,
            track.start,
            track.end(),
            track.source.as_deref().unwrap_or("<no source>")
        );
    }
    println!(
        "Surface: {}x{} device pixels ({}x{} @ {}x)",
        size.width, size.height, config.width, config.height, config.pixel_density
    );

    if size.is_empty() {
        bail!("configured surface size is empty");
    }
    if composition.tracks.is_empty() {
        bail!("composition has no tracks");
    }
    ClockEngineFactory
        .create(&composition)
        .context("composition rejected by engine")?;

    println!("OK");
    Ok(())
}

fn load_config(path: Option<&Path>) -> Result<PlayerConfig> {
    match path {
        Some(path) => PlayerConfig::from_json_file(path)
            .with_context(|| format!("loading config {:?}", path)),
        None => Ok(PlayerConfig::default()),
    }
}
