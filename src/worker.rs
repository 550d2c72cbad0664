//! Per-viewer capture loop.
//!
//! State machine:
//!
//! ```text
//! INIT -> STREAMING -> EXIT_REQUESTED | STREAM_ENDED | ERROR -> CLOSED
//! ```
//!
//! The classifier is loaded in INIT, before the stream is opened, so a missing
//! model never costs a connection. Frames are only pulled in STREAMING. The
//! shutdown signal is checked between iterations; a worker that sees the exit
//! key triggers it for every sibling.

use std::time::Duration;

use serde::Deserialize;

use crate::detect::{ClassifierLoader, FaceDetector};
use crate::error::ViewerError;
use crate::ingest::{normalize_frame, Pull, SourceFactory, StreamHandle};
use crate::progress::Progress;
use crate::render::{window_title, Display};
use crate::signal::ShutdownSignal;

const RETRY_BACKOFF: Duration = Duration::from_millis(100);
const MAX_RETRY_BACKOFF: Duration = Duration::from_secs(2);

/// Immutable per-viewer settings.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct WorkerConfig {
    /// Window suffix and progress character.
    pub label: char,
    #[serde(default)]
    pub detect: bool,
}

impl WorkerConfig {
    pub fn new(label: char, detect: bool) -> Self {
        Self { label, detect }
    }

    pub fn window_id(&self) -> String {
        window_title(self.label)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WorkerState {
    Init,
    Streaming,
    ExitRequested,
    StreamEnded,
    Error,
    Closed,
}

/// Why a worker left STREAMING (or never reached it).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ExitReason {
    /// This worker saw the exit key.
    ExitKey,
    /// The shutdown signal was already set by someone else.
    Shutdown,
    StreamEnded,
    Error,
}

#[derive(Debug)]
pub struct WorkerOutcome {
    pub label: char,
    pub reason: ExitReason,
    pub error: Option<ViewerError>,
    pub frames_rendered: u64,
    pub frames_skipped: u64,
    /// Whether a stream handle was ever opened.
    pub opened_stream: bool,
    /// States visited, in order, ending with `Closed`.
    pub states: Vec<WorkerState>,
}

impl WorkerOutcome {
    pub fn final_state(&self) -> WorkerState {
        self.states.last().copied().unwrap_or(WorkerState::Init)
    }

    pub fn reached_streaming(&self) -> bool {
        self.states.contains(&WorkerState::Streaming)
    }
}

/// Everything a worker borrows from its orchestrator.
pub struct WorkerContext<'a> {
    pub url: &'a str,
    pub sources: &'a dyn SourceFactory,
    pub classifiers: &'a dyn ClassifierLoader,
    pub display: &'a dyn Display,
    pub shutdown: &'a ShutdownSignal,
    pub progress: &'a Progress,
    /// Consecutive pull failures tolerated before giving up.
    pub pull_retries: u32,
}

struct Lifecycle {
    label: char,
    states: Vec<WorkerState>,
}

impl Lifecycle {
    fn new(label: char) -> Self {
        log::debug!("viewer {}: {:?}", label, WorkerState::Init);
        Self {
            label,
            states: vec![WorkerState::Init],
        }
    }

    fn enter(&mut self, state: WorkerState) {
        log::debug!(
            "viewer {}: {:?} -> {:?}",
            self.label,
            self.states.last(),
            state
        );
        self.states.push(state);
    }
}

/// Run one viewer until one of its terminal conditions.
pub fn run_worker(config: &WorkerConfig, ctx: &WorkerContext<'_>) -> WorkerOutcome {
    let label = config.label;
    let mut lifecycle = Lifecycle::new(label);
    let mut outcome = WorkerOutcome {
        label,
        reason: ExitReason::Error,
        error: None,
        frames_rendered: 0,
        frames_skipped: 0,
        opened_stream: false,
        states: Vec::new(),
    };

    let (reason, error) = stream(config, ctx, &mut lifecycle, &mut outcome);
    if let Some(e) = &error {
        log::error!("viewer {} ({}): {}", label, ctx.url, e);
    }
    lifecycle.enter(match reason {
        ExitReason::ExitKey | ExitReason::Shutdown => WorkerState::ExitRequested,
        ExitReason::StreamEnded => WorkerState::StreamEnded,
        ExitReason::Error => WorkerState::Error,
    });
    lifecycle.enter(WorkerState::Closed);
    log::info!(
        "viewer {} closed: {:?}, {} frames rendered, {} skipped",
        label,
        reason,
        outcome.frames_rendered,
        outcome.frames_skipped
    );

    outcome.reason = reason;
    outcome.error = error;
    outcome.states = lifecycle.states;
    outcome
}

fn stream(
    config: &WorkerConfig,
    ctx: &WorkerContext<'_>,
    lifecycle: &mut Lifecycle,
    outcome: &mut WorkerOutcome,
) -> (ExitReason, Option<ViewerError>) {
    let label = config.label;

    let mut detector = if config.detect {
        match ctx.classifiers.load() {
            Ok(classifier) => Some(FaceDetector::new(classifier)),
            Err(e) => return (ExitReason::Error, Some(e)),
        }
    } else {
        None
    };

    if ctx.shutdown.is_triggered() {
        return (ExitReason::Shutdown, None);
    }

    // Dropped on every return path below, which releases the source.
    let mut handle = match StreamHandle::open(ctx.sources, ctx.url) {
        Ok(handle) => handle,
        Err(e) => return (ExitReason::Error, Some(e)),
    };
    outcome.opened_stream = true;

    let mut renderer = ctx.display.renderer(&config.window_id());
    lifecycle.enter(WorkerState::Streaming);
    log::info!(
        "viewer {} streaming {} (detection {})",
        label,
        ctx.url,
        detector
            .as_ref()
            .map_or("off".to_string(), |d| format!("on, {}", d.backend()))
    );

    let mut failures = 0u32;
    loop {
        if ctx.shutdown.is_triggered() {
            return (ExitReason::Shutdown, None);
        }

        let frame = match handle.pull_frame() {
            Ok(Pull::Frame(frame)) => {
                failures = 0;
                frame
            }
            Ok(Pull::EndOfStream) => return (ExitReason::StreamEnded, None),
            Err(e) if e.is_transient() => {
                log::warn!("viewer {}: skipping frame: {}", label, e);
                outcome.frames_skipped += 1;
                continue;
            }
            Err(e) => {
                failures += 1;
                if failures > ctx.pull_retries {
                    return (ExitReason::Error, Some(e));
                }
                let backoff = (RETRY_BACKOFF * failures).min(MAX_RETRY_BACKOFF);
                log::warn!(
                    "viewer {}: {} (retry {}/{} in {:?})",
                    label,
                    e,
                    failures,
                    ctx.pull_retries,
                    backoff
                );
                if ctx.shutdown.wait_timeout(backoff) {
                    return (ExitReason::Shutdown, None);
                }
                continue;
            }
        };

        let image = match normalize_frame(&frame) {
            Ok(image) => image,
            Err(e) => {
                log::warn!("viewer {}: skipping frame: {}", label, e);
                outcome.frames_skipped += 1;
                continue;
            }
        };
        drop(frame);

        let regions = match detector.as_mut() {
            Some(detector) => detector.detect(&image).unwrap_or_else(|e| {
                log::warn!("viewer {}: detection failed: {}", label, e);
                Vec::new()
            }),
            None => Vec::new(),
        };

        if let Err(e) = renderer.present(image, &regions) {
            return (ExitReason::Error, Some(e));
        }
        outcome.frames_rendered += 1;
        ctx.progress.tick(label);

        if renderer.poll_exit_key() {
            ctx.shutdown.trigger();
            return (ExitReason::ExitKey, None);
        }
    }
}
