//! streamview - open several viewers on one network video stream
//!
//! Every viewer runs on its own thread with its own connection, window and
//! (optionally) face detector. Each rendered frame prints the viewer's label on
//! stdout; logs go to stderr. Press the exit key (Esc by default) in any
//! window, or Ctrl-C, to close all viewers.

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use std::path::PathBuf;

use streamview::{
    DefaultSourceFactory, Display, DisplayMode, HeadlessDisplay, ModelLoader, Orchestrator,
    Progress, ShutdownSignal, ViewerConfig, ViewerOverrides,
};

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Stream URL shared by every viewer (http://, rtsp://, file path, stub://).
    url: Option<String>,
    /// JSON or TOML config file.
    #[arg(long, env = "STREAMVIEW_CONFIG")]
    config: Option<PathBuf>,
    /// Haar cascade model (or stub://... for a fake classifier).
    #[arg(long)]
    classifier: Option<PathBuf>,
    /// Source backend: auto, synthetic, mjpeg, gstreamer or capture.
    #[arg(long)]
    source: Option<String>,
    /// Display mode: auto, window or headless.
    #[arg(long)]
    display: Option<String>,
    /// Consecutive pull failures tolerated per viewer.
    #[arg(long)]
    pull_retries: Option<u32>,
    /// Give up on a single pull after this many milliseconds.
    #[arg(long)]
    pull_timeout_ms: Option<u64>,
    /// Viewers as whitespace-separated `label[:face]` tokens, e.g. ".:face , a:face b".
    #[arg(long)]
    workers: Option<String>,
    /// Key code that closes all viewers.
    #[arg(long)]
    exit_key: Option<i32>,
}

impl Args {
    fn overrides(&self) -> ViewerOverrides {
        ViewerOverrides {
            url: self.url.clone(),
            classifier: self.classifier.clone(),
            source: self.source.clone(),
            display: self.display.clone(),
            pull_retries: self.pull_retries,
            pull_timeout_ms: self.pull_timeout_ms,
            exit_key: self.exit_key,
            workers: self.workers.clone(),
        }
    }
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let mut cfg = ViewerConfig::load_from(args.config.as_deref())?;
    cfg.apply_overrides(args.overrides())?;
    cfg.validate().context("invalid configuration")?;

    let shutdown = ShutdownSignal::new();
    shutdown.install_ctrlc_handler()?;

    let display = build_display(cfg.display, cfg.exit_key)?;
    let classifier = cfg.classifier_path.to_string_lossy().into_owned();
    if cfg.detection_enabled() {
        log::info!("face detection model: {}", classifier);
    }

    let orchestrator = Orchestrator::new(
        Box::new(DefaultSourceFactory::new(cfg.source_options())),
        Box::new(ModelLoader::new(classifier)),
        display,
    )
    .with_shutdown(shutdown)
    .with_progress(Progress::stdout())
    .with_pull_retries(cfg.pull_retries);

    let report = orchestrator.run_all(&cfg.url, &cfg.workers);
    for outcome in &report.outcomes {
        match &outcome.error {
            Some(e) => log::warn!(
                "viewer {}: {:?} after {} frames: {}",
                outcome.label,
                outcome.reason,
                outcome.frames_rendered,
                e
            ),
            None => log::info!(
                "viewer {}: {:?} after {} frames",
                outcome.label,
                outcome.reason,
                outcome.frames_rendered
            ),
        }
    }

    if let Some(e) = report.configuration_error() {
        return Err(anyhow!("{}", e));
    }
    Ok(())
}

fn build_display(mode: DisplayMode, exit_key: i32) -> Result<Box<dyn Display>> {
    match mode {
        DisplayMode::Headless => Ok(Box::new(HeadlessDisplay)),
        DisplayMode::Window => window_display(exit_key),
        DisplayMode::Auto if cfg!(feature = "display-opencv") => window_display(exit_key),
        DisplayMode::Auto => {
            log::info!("no GUI backend compiled in, running headless");
            Ok(Box::new(HeadlessDisplay))
        }
    }
}

#[cfg(feature = "display-opencv")]
fn window_display(exit_key: i32) -> Result<Box<dyn Display>> {
    use streamview::render::HighguiSurface;
    use streamview::DisplayHub;

    Ok(Box::new(DisplayHub::new(
        Box::new(HighguiSurface::new()),
        exit_key,
    )))
}

#[cfg(not(feature = "display-opencv"))]
fn window_display(_exit_key: i32) -> Result<Box<dyn Display>> {
    Err(anyhow!(
        "window display requires the display-opencv feature (use --display headless)"
    ))
}
