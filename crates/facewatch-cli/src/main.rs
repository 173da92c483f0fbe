use anyhow::{Context, Result};
use clap::{ArgAction, Args, Parser, Subcommand};
use facewatch_core::{Backend, FaceMatcher};
use facewatch_hw::{Camera, FrameSource};
use std::path::PathBuf;
use std::time::Instant;
use tracing_subscriber::EnvFilter;

mod alert;
mod config;
mod control;
mod display;
mod engine;
mod reference;
mod setup;

use alert::{AlertDispatcher, DesktopNotifier, LogDispatcher};
use config::{BackendChoice, Config};
use control::{ControlCommand, Controls};
use display::{HeadlessSurface, Overlay, Surface};
use engine::{LoopSettings, Monitor};
use setup::LoadedBackend;

#[derive(Parser)]
#[command(name = "facewatch", version, about = "Live face presence monitor with authorized/unauthorized alerts")]
struct Cli {
    /// Config file (default: $XDG_CONFIG_HOME/facewatch/config.toml)
    #[arg(long, global = true, env = "FACEWATCH_CONFIG")]
    config: Option<PathBuf>,

    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short, long, global = true, action = ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Watch the camera and alert on authorized/unauthorized presence
    Run(RunArgs),
    /// Load the reference set and print a JSON report
    Check(BackendArgs),
    /// List V4L2 capture devices
    Devices,
}

#[derive(Args)]
struct BackendArgs {
    /// Matching backend
    #[arg(long, value_enum)]
    backend: Option<BackendChoice>,

    /// Reference image or directory of images
    #[arg(long)]
    reference: Option<PathBuf>,
}

#[derive(Args)]
struct RunArgs {
    #[command(flatten)]
    backend: BackendArgs,

    /// No window: commands from stdin (s/p/q), alerts to the log
    #[arg(long)]
    headless: bool,

    /// Capture device to probe (repeatable, in order)
    #[arg(long = "device")]
    devices: Vec<String>,

    /// Start the camera immediately
    #[arg(long)]
    autostart: bool,
}

impl BackendArgs {
    fn apply(&self, config: &mut Config) {
        if let Some(backend) = self.backend {
            config.backend = backend;
        }
        if let Some(reference) = &self.reference {
            config.reference_path = Some(reference.clone());
        }
    }
}

fn init_logging(verbose: u8) {
    let default = match verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let filter = if verbose > 0 {
        EnvFilter::new(default)
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let mut config = Config::load(cli.config.as_deref()).context("failed to load configuration")?;

    match cli.command {
        Commands::Run(args) => {
            args.backend.apply(&mut config);
            if !args.devices.is_empty() {
                config.devices = args.devices.clone();
            }
            match setup::load_backend(&config)? {
                LoadedBackend::Embedding(matcher) => run_monitor(matcher, &config, &args),
                LoadedBackend::Features(matcher) => run_monitor(matcher, &config, &args),
            }
        }
        Commands::Check(args) => {
            args.apply(&mut config);
            match setup::load_backend(&config)? {
                LoadedBackend::Embedding(matcher) => check(matcher, &config),
                LoadedBackend::Features(matcher) => check(matcher, &config),
            }
        }
        Commands::Devices => {
            let devices = Camera::list_devices();
            if devices.is_empty() {
                println!("No V4L2 capture devices found");
            }
            for d in devices {
                println!("{}\t{}\t{}\t{}", d.path, d.name, d.driver, d.bus);
            }
            Ok(())
        }
    }
}

fn check<M: FaceMatcher>(mut matcher: M, config: &Config) -> Result<()> {
    let files = reference::collect_reference_files(&config.reference_candidates())?;
    let (descriptors, report) = reference::load_reference_set(&mut matcher, &files)?;
    let backend: Backend = matcher.backend();
    let out = serde_json::json!({
        "backend": backend,
        "model_dir": config.model_dir,
        "descriptors": descriptors.len(),
        "accepted": report.accepted,
        "skipped": report.skipped,
    });
    println!("{}", serde_json::to_string_pretty(&out)?);
    Ok(())
}

fn run_monitor<M: FaceMatcher>(mut matcher: M, config: &Config, args: &RunArgs) -> Result<()> {
    let files = reference::collect_reference_files(&config.reference_candidates())?;
    let (authorized, report) = reference::load_reference_set(&mut matcher, &files)?;
    tracing::info!(
        backend = %matcher.backend(),
        authorized = authorized.len(),
        skipped = report.skipped.len(),
        "reference set loaded"
    );

    let dispatcher: Box<dyn AlertDispatcher> = if args.headless {
        Box::new(LogDispatcher)
    } else {
        Box::new(DesktopNotifier::new())
    };
    let mut monitor = Monitor::new(matcher, authorized, config.registry(), config.presence(), dispatcher)
        .with_contrast_enhancement(config.enhance_contrast);

    let controls = Controls::new();
    controls.install_ctrlc().context("failed to install Ctrl-C handler")?;
    if args.headless {
        controls.spawn_stdin_pump().context("failed to start stdin reader")?;
        println!("facewatch: type s (start), p (stop) or q (quit) and press Enter");
    }
    if args.autostart {
        let _ = controls.sender().send(ControlCommand::Start);
    }

    let overlay = Overlay::new(config.overlay_font.as_deref());
    tracing::debug!(labels = overlay.has_font(), "overlay ready");
    let mut surface = open_surface(args.headless, config, &controls);

    let settings = LoopSettings {
        devices: config.devices.clone(),
        ..LoopSettings::default()
    };
    let (width, height) = (config.capture_width, config.capture_height);
    let stats = engine::run(&mut monitor, &controls, surface.as_mut(), &overlay, &settings, |path| {
        Camera::open(path, width, height).map(|camera| Box::new(camera) as Box<dyn FrameSource>)
    });

    tracing::info!(
        frames = stats.frames,
        dark_frames = stats.dark_frames,
        alerts = stats.alerts,
        new_unknowns = stats.new_unknowns,
        read_failures = stats.read_failures,
        starts = stats.starts,
        unknown_live = monitor.registry().unknown_count(),
        snapshot = ?monitor.snapshot(Instant::now()),
        "facewatch exiting"
    );
    Ok(())
}

#[cfg(feature = "window")]
fn open_surface(headless: bool, config: &Config, controls: &Controls) -> Box<dyn Surface> {
    if headless {
        return Box::new(HeadlessSurface::new(config.preview_path.clone()));
    }
    match display::WindowSurface::open(
        "facewatch",
        display::PLACEHOLDER_WIDTH,
        display::PLACEHOLDER_HEIGHT,
        controls.sender(),
    ) {
        Ok(window) => Box::new(window),
        Err(e) => {
            tracing::warn!(error = %e, "cannot open window; continuing headless (commands from stdin)");
            if let Err(e) = controls.spawn_stdin_pump() {
                tracing::warn!(error = %e, "failed to start stdin reader");
            }
            Box::new(HeadlessSurface::new(config.preview_path.clone()))
        }
    }
}

#[cfg(not(feature = "window"))]
fn open_surface(headless: bool, config: &Config, controls: &Controls) -> Box<dyn Surface> {
    if !headless {
        tracing::warn!("built without the `window` feature; running headless (commands from stdin)");
        if let Err(e) = controls.spawn_stdin_pump() {
            tracing::warn!(error = %e, "failed to start stdin reader");
        }
    }
    Box::new(HeadlessSurface::new(config.preview_path.clone()))
}
