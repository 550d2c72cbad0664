use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;

use crate::detect::ClassifierLoader;
use crate::error::ViewerError;
use crate::ingest::SourceFactory;
use crate::progress::Progress;
use crate::render::Display;
use crate::signal::ShutdownSignal;
use crate::worker::{
    run_worker, ExitReason, WorkerConfig, WorkerContext, WorkerOutcome, WorkerState,
};

/// Runs one viewer thread per `WorkerConfig` against a shared URL.
pub struct Orchestrator {
    sources: Box<dyn SourceFactory>,
    classifiers: Box<dyn ClassifierLoader>,
    display: Box<dyn Display>,
    shutdown: ShutdownSignal,
    progress: Progress,
    pull_retries: u32,
}

impl Orchestrator {
    pub fn new(
        sources: Box<dyn SourceFactory>,
        classifiers: Box<dyn ClassifierLoader>,
        display: Box<dyn Display>,
    ) -> Self {
        Self {
            sources,
            classifiers,
            display,
            shutdown: ShutdownSignal::new(),
            progress: Progress::stdout(),
            pull_retries: 0,
        }
    }

    pub fn with_shutdown(mut self, shutdown: ShutdownSignal) -> Self {
        self.shutdown = shutdown;
        self
    }

    pub fn with_progress(mut self, progress: Progress) -> Self {
        self.progress = progress;
        self
    }

    pub fn with_pull_retries(mut self, retries: u32) -> Self {
        self.pull_retries = retries;
        self
    }

    pub fn shutdown_signal(&self) -> &ShutdownSignal {
        &self.shutdown
    }

    /// Start every viewer and block until all of them have closed.
    ///
    /// The calling thread services the display while workers run. Display
    /// resources are released only after every worker has been joined.
    pub fn run_all(&self, url: &str, configs: &[WorkerConfig]) -> RunReport {
        let ctx = WorkerContext {
            url,
            sources: self.sources.as_ref(),
            classifiers: self.classifiers.as_ref(),
            display: self.display.as_ref(),
            shutdown: &self.shutdown,
            progress: &self.progress,
            pull_retries: self.pull_retries,
        };
        let finished = AtomicUsize::new(0);
        log::info!("starting {} viewers on {}", configs.len(), url);

        let outcomes = thread::scope(|scope| {
            let mut pending = Vec::with_capacity(configs.len());
            let mut outcomes = Vec::with_capacity(configs.len());

            for config in configs {
                let ctx = &ctx;
                let finished = &finished;
                let spawned = thread::Builder::new()
                    .name(format!("viewer-{}", config.label))
                    .spawn_scoped(scope, move || {
                        let _done = FinishGuard(finished);
                        run_worker(config, ctx)
                    });
                match spawned {
                    Ok(handle) => pending.push((config.label, handle)),
                    Err(e) => {
                        log::error!("failed to spawn viewer {}: {}", config.label, e);
                        finished.fetch_add(1, Ordering::SeqCst);
                        outcomes.push(WorkerOutcome::failed(
                            config.label,
                            ViewerError::Display(format!("failed to spawn viewer thread: {}", e)),
                        ));
                    }
                }
            }

            let total = configs.len();
            if let Err(e) = self
                .display
                .run_until(&|| finished.load(Ordering::SeqCst) >= total)
            {
                log::error!("display loop failed: {}", e);
            }

            for (label, handle) in pending {
                let outcome = handle.join().unwrap_or_else(|_| {
                    log::error!("viewer {} panicked", label);
                    WorkerOutcome::failed(label, ViewerError::WorkerPanicked(label))
                });
                outcomes.push(outcome);
            }
            outcomes
        });

        self.display.release();
        let report = RunReport::new(outcomes);
        log::info!(
            "all viewers closed, {} frames rendered",
            report.frames_rendered()
        );
        report
    }
}

/// Counts a worker as finished even if it unwinds.
struct FinishGuard<'a>(&'a AtomicUsize);

impl Drop for FinishGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_add(1, Ordering::SeqCst);
    }
}

impl WorkerOutcome {
    fn failed(label: char, error: ViewerError) -> Self {
        Self {
            label,
            reason: ExitReason::Error,
            error: Some(error),
            frames_rendered: 0,
            frames_skipped: 0,
            opened_stream: false,
            states: vec![WorkerState::Init, WorkerState::Error, WorkerState::Closed],
        }
    }
}

/// What every viewer did, in the order they were joined.
#[derive(Debug)]
pub struct RunReport {
    pub outcomes: Vec<WorkerOutcome>,
}

impl RunReport {
    fn new(outcomes: Vec<WorkerOutcome>) -> Self {
        Self { outcomes }
    }

    pub fn outcome(&self, label: char) -> Option<&WorkerOutcome> {
        self.outcomes.iter().find(|o| o.label == label)
    }

    pub fn first_error(&self) -> Option<&ViewerError> {
        self.outcomes.iter().find_map(|o| o.error.as_ref())
    }

    pub fn configuration_error(&self) -> Option<&ViewerError> {
        self.outcomes
            .iter()
            .filter_map(|o| o.error.as_ref())
            .find(|e| e.is_configuration())
    }

    pub fn frames_rendered(&self) -> u64 {
        self.outcomes.iter().map(|o| o.frames_rendered).sum()
    }

    /// Process exit status: non-zero only for configuration errors.
    pub fn exit_code(&self) -> i32 {
        if self.configuration_error().is_some() {
            1
        } else {
            0
        }
    }
}
