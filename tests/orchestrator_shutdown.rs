use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use image::RgbImage;

use streamview::render::{DisplayHub, DisplaySurface, NullSurface};
use streamview::{
    DefaultSourceFactory, DetectionRegion, Display, ExitReason, HeadlessDisplay, ModelLoader,
    Orchestrator, Progress, Renderer, ShutdownSignal, ViewerError, WorkerConfig, WorkerState,
};

/// Counts frames presented by any viewer after shutdown was triggered.
struct LateFrameDisplay {
    shutdown: ShutdownSignal,
    late: Arc<AtomicU64>,
}

struct LateFrameRenderer {
    window_id: String,
    shutdown: ShutdownSignal,
    late: Arc<AtomicU64>,
}

impl Display for LateFrameDisplay {
    fn renderer(&self, window_id: &str) -> Box<dyn Renderer> {
        Box::new(LateFrameRenderer {
            window_id: window_id.to_string(),
            shutdown: self.shutdown.clone(),
            late: self.late.clone(),
        })
    }
}

impl Renderer for LateFrameRenderer {
    fn window_id(&self) -> &str {
        &self.window_id
    }

    fn present(&mut self, _image: RgbImage, _regions: &[DetectionRegion]) -> Result<(), ViewerError> {
        if self.shutdown.is_triggered() {
            self.late.fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    }

    fn poll_exit_key(&mut self) -> bool {
        false
    }
}

fn viewers(labels: &str) -> Vec<WorkerConfig> {
    labels.chars().map(|l| WorkerConfig::new(l, l == 'a')).collect()
}

#[test]
fn run_all_returns_after_every_viewer_closed() {
    let (progress, captured) = Progress::capture();
    let report = Orchestrator::new(
        Box::new(DefaultSourceFactory::default()),
        Box::new(ModelLoader::new("stub://faces?regions=0,0,40,40")),
        Box::new(HeadlessDisplay),
    )
    .with_progress(progress)
    .run_all("stub://cam?frames=4&width=16&height=16", &viewers(".,abcdef"));

    assert_eq!(report.outcomes.len(), 8);
    for outcome in &report.outcomes {
        assert_eq!(outcome.final_state(), WorkerState::Closed, "viewer {}", outcome.label);
        assert_eq!(outcome.frames_rendered, 4);
    }
    for label in ".,abcdef".chars() {
        assert_eq!(captured.count(label), 4);
    }
}

#[test]
fn external_shutdown_stops_endless_viewers() {
    let shutdown = ShutdownSignal::new();
    let late = Arc::new(AtomicU64::new(0));
    let orchestrator = Orchestrator::new(
        Box::new(DefaultSourceFactory::default()),
        Box::new(ModelLoader::new("stub://unused")),
        Box::new(LateFrameDisplay {
            shutdown: shutdown.clone(),
            late: late.clone(),
        }),
    )
    .with_shutdown(shutdown.clone())
    .with_progress(Progress::discard());

    let trigger = thread::spawn(move || {
        thread::sleep(Duration::from_millis(100));
        shutdown.trigger();
    });
    let report = orchestrator.run_all("stub://cam?width=16&height=16&fps=100", &viewers("xyz"));
    trigger.join().unwrap();

    for outcome in &report.outcomes {
        assert_eq!(outcome.reason, ExitReason::Shutdown);
        assert!(outcome.error.is_none());
        assert_eq!(outcome.final_state(), WorkerState::Closed);
    }
    // Each of the three viewers finishes at most the iteration it was in.
    assert!(late.load(Ordering::SeqCst) <= 3);
}

#[test]
fn pre_triggered_shutdown_opens_nothing() {
    let shutdown = ShutdownSignal::new();
    shutdown.trigger();
    let report = Orchestrator::new(
        Box::new(DefaultSourceFactory::default()),
        Box::new(ModelLoader::new("stub://unused")),
        Box::new(HeadlessDisplay),
    )
    .with_shutdown(shutdown)
    .with_progress(Progress::discard())
    .run_all("stub://cam", &viewers("pq"));

    assert!(report.outcomes.iter().all(|o| !o.opened_stream));
    assert_eq!(report.frames_rendered(), 0);
}

#[test]
fn display_hub_is_serviced_on_the_calling_thread() {
    let report = Orchestrator::new(
        Box::new(DefaultSourceFactory::default()),
        Box::new(ModelLoader::new("stub://unused")),
        Box::new(DisplayHub::new(Box::new(NullSurface), 27)),
    )
    .with_progress(Progress::discard())
    .run_all("stub://cam?frames=40&width=8&height=8", &viewers("mn"));

    assert_eq!(report.frames_rendered(), 80);
    assert_eq!(report.exit_code(), 0);
}

/// Surface that fails on first use.
struct BrokenSurface;

impl DisplaySurface for BrokenSurface {
    fn show(&mut self, _window_id: &str, _image: &RgbImage) -> Result<(), ViewerError> {
        Err(ViewerError::Display("no display server".to_string()))
    }

    fn poll_key(&mut self, _wait: Duration) -> Result<Option<i32>, ViewerError> {
        Ok(None)
    }

    fn close_all(&mut self) -> Result<(), ViewerError> {
        Ok(())
    }
}

#[test]
fn broken_surface_does_not_deadlock_viewers() {
    let report = Orchestrator::new(
        Box::new(DefaultSourceFactory::default()),
        Box::new(ModelLoader::new("stub://unused")),
        Box::new(DisplayHub::new(Box::new(BrokenSurface), 27)),
    )
    .with_progress(Progress::discard())
    .run_all("stub://cam?frames=50&width=8&height=8", &viewers("uv"));

    assert_eq!(report.outcomes.len(), 2);
    assert!(report
        .outcomes
        .iter()
        .all(|o| o.reason == ExitReason::StreamEnded));
}
