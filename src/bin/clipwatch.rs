//! clipwatch - record clips when a person shows up in a video.
//!
//! This tool:
//! 1. Opens a video file or a live camera
//! 2. Runs the configured detector on every frame
//! 3. Records a clip from the first qualifying detection until the subject
//!    has been gone long enough (or the maximum duration passes)
//! 4. Moves finished clips into the archive directory, if one is configured

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use std::io::IsTerminal;
use std::path::PathBuf;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use clipwatch::detect::{BackendRegistry, SharedBackend, StubBackend};
use clipwatch::ingest::{FileConfig, FileSource, FrameSource, StubParams};
use clipwatch::overlay::{LabelPalette, Overlay, OverlaySlot, Viewport};
use clipwatch::sink::{FfmpegSinkFactory, MemorySinkFactory};
use clipwatch::ui;
use clipwatch::{
    ClipArchive, ClipOutcome, ClipwatchConfig, EndReason, Session, SessionSummary,
};

const DISPLAY_INTERVAL: Duration = Duration::from_millis(33);

#[derive(Parser, Debug)]
#[command(
    name = "clipwatch",
    about = "Record video clips whenever a person is detected"
)]
struct Args {
    /// Config file (JSON, or TOML by extension)
    #[arg(long, value_name = "PATH", env = "CLIPWATCH_CONFIG")]
    config: Option<PathBuf>,

    /// Directory for clips being written
    #[arg(long, value_name = "DIR")]
    output: Option<PathBuf>,

    /// Directory finished clips are moved into
    #[arg(long, value_name = "DIR")]
    archive: Option<PathBuf>,

    /// Live camera instead of a file (e.g. /dev/video0, stub://camera).
    /// Without a value, the configured camera device is used.
    #[arg(long, value_name = "DEVICE", num_args = 0..=1, conflicts_with = "input")]
    camera: Option<Option<String>>,

    /// Run detection and the recorder without encoding or archiving anything
    #[arg(long)]
    dry_run: bool,

    /// UI mode for stderr progress (auto|plain|pretty)
    #[arg(long, default_value = "auto", value_name = "MODE")]
    ui: String,

    /// Video file, or a stub:// url for a synthetic stream
    #[arg(value_name = "INPUT", required_unless_present = "camera")]
    input: Option<String>,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();
    let is_tty = std::io::stderr().is_terminal();
    let stdout_is_tty = std::io::stdout().is_terminal();
    let ui = ui::Ui::from_args(Some(&args.ui), is_tty, !stdout_is_tty);

    let mut cfg = {
        let _stage = ui.stage("Load configuration");
        ClipwatchConfig::load_from(args.config.as_deref())?
    };
    if let Some(dir) = &args.output {
        cfg.output_dir = dir.clone();
    }
    if let Some(dir) = &args.archive {
        cfg.archive_dir = Some(dir.clone());
    }

    let detector = {
        let _stage = ui.stage("Load detector");
        build_detector(&cfg)?
    };
    let source = open_source(&args, &cfg)?;
    let total_frames = args
        .input
        .as_deref()
        .filter(|input| input.starts_with("stub://"))
        .and_then(|input| StubParams::parse(input).ok())
        .and_then(|params| params.frames);

    let settings = cfg.session_settings();
    let session = {
        let _stage = ui.stage("Open stream");
        if args.dry_run {
            Session::new(source, detector, MemorySinkFactory::new(), settings)?
        } else {
            Session::new(source, detector, FfmpegSinkFactory::new(), settings)?
        }
    };

    let slot = Arc::new(OverlaySlot::new());
    let mut session = session.with_overlay(slot.clone());
    if !args.dry_run {
        if let Some(dir) = &cfg.archive_dir {
            session = session.with_archive(ClipArchive::new(dir));
        }
    }

    let (width, height) = session.track().output_dimensions();
    let viewport = Viewport::portrait_preview(width, height);
    let overlay = Overlay::new(LabelPalette::random(&cfg.labels()));

    let handle = session.spawn()?;
    let stop = handle.stop_handle();
    ctrlc::set_handler(move || {
        stop.store(true, Ordering::SeqCst);
    })
    .context("error setting Ctrl-C handler")?;

    log::info!(
        "clipwatch running. watching for '{}' (>= {:.2}), writing to {}",
        cfg.recording.target_label,
        cfg.recording.min_confidence,
        cfg.output_dir.display()
    );

    let mut progress = ui.frames("Watching", total_frames);
    while !handle.is_finished() {
        if let Some(pending) = slot.take() {
            progress.set_frame(pending.frame_index);
            let boxes = overlay.layout(&pending.detections, viewport);
            for b in &boxes {
                log::debug!(
                    "overlay frame {}: {} at ({:.0}, {:.0}) {:.0}x{:.0}",
                    pending.frame_index,
                    b.label,
                    b.rect.x,
                    b.rect.y,
                    b.rect.width,
                    b.rect.height
                );
            }
            progress.set_status(&format!("{} boxes", boxes.len()));
        }
        std::thread::sleep(DISPLAY_INTERVAL);
    }

    let summary = handle.join()?;
    progress.finish(summary.frames_processed);
    if slot.overwritten() > 0 {
        log::debug!("{} overlay updates skipped by the display", slot.overwritten());
    }
    print_summary(&summary, args.dry_run);

    match &summary.ended {
        EndReason::ReadFailed(reason) => Err(anyhow!("stream ended early: {}", reason)),
        EndReason::Exhausted | EndReason::Stopped => Ok(()),
    }
}

fn build_detector(cfg: &ClipwatchConfig) -> Result<SharedBackend> {
    let mut registry = BackendRegistry::new();
    let stub = match &cfg.detector.script {
        Some(script) => StubBackend::parse_script(script).context("invalid stub script")?,
        None => StubBackend::new(),
    };
    registry.register(stub);

    #[cfg(feature = "backend-tract")]
    if cfg.detector.backend == "tract" {
        let model_path = cfg
            .detector
            .model_path
            .as_ref()
            .ok_or_else(|| anyhow!("the tract detector requires a model path"))?;
        registry.register(clipwatch::detect::TractBackend::new(
            model_path,
            cfg.detector.input_width,
            cfg.detector.input_height,
            cfg.labels(),
        )?);
    }

    registry.set_default(&cfg.detector.backend)?;
    log::info!("detector backends: {}", registry.list().join(", "));
    registry
        .default_backend()
        .ok_or_else(|| anyhow!("no detector backend registered"))
}

fn open_source(args: &Args, cfg: &ClipwatchConfig) -> Result<Box<dyn FrameSource>> {
    if let Some(device) = &args.camera {
        let device = device.as_deref().unwrap_or(&cfg.camera.device);
        return open_camera(device, cfg);
    }
    let input = args
        .input
        .as_deref()
        .ok_or_else(|| anyhow!("an INPUT file or --camera is required"))?;
    Ok(Box::new(FileSource::new(FileConfig::new(input))?))
}

#[cfg(feature = "ingest-v4l2")]
fn open_camera(device: &str, cfg: &ClipwatchConfig) -> Result<Box<dyn FrameSource>> {
    let config = clipwatch::V4l2Config {
        device: device.to_string(),
        target_fps: cfg.camera.target_fps,
        width: cfg.camera.width,
        height: cfg.camera.height,
    };
    Ok(Box::new(clipwatch::V4l2Source::new(config)?))
}

#[cfg(not(feature = "ingest-v4l2"))]
fn open_camera(device: &str, _cfg: &ClipwatchConfig) -> Result<Box<dyn FrameSource>> {
    Err(anyhow!(
        "camera {} requires the ingest-v4l2 feature",
        device
    ))
}

fn print_summary(summary: &SessionSummary, dry_run: bool) {
    println!(
        "clipwatch: {} frames processed, {} clip(s)",
        summary.frames_processed,
        summary.clips.len()
    );
    for clip in &summary.clips {
        let outcome = match &clip.outcome {
            ClipOutcome::Saved(path) if dry_run => format!("dry run ({})", path.display()),
            ClipOutcome::Saved(path) => path.display().to_string(),
            ClipOutcome::NotWritten(err) => format!("not written: {}", err),
            ClipOutcome::FinalizeFailed(err) => format!("failed: {}", err),
        };
        println!(
            "  frames {}..={} ({:?}, {} written, {} dropped): {}",
            clip.start_frame_index,
            clip.last_frame_index,
            clip.reason,
            clip.frames_written,
            clip.frames_dropped,
            outcome
        );
    }
    for path in &summary.persisted {
        println!("  archived {}", path.display());
    }
    for err in &summary.persistence_failures {
        println!("  {}", err);
    }
    if summary.detector_failures > 0 {
        println!("  {} frame(s) had detector errors", summary.detector_failures);
    }
}
