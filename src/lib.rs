//! streamview
//!
//! Opens several independent viewers on one network video stream. Each viewer
//! runs on its own thread, pulls the newest frame, optionally runs a Haar
//! cascade face detector on it, draws the detections and presents the frame
//! in its own window. Pressing the exit key in any window closes all of them.
//!
//! # Module Structure
//!
//! - `frame`: Raw frames, pixel formats, detection regions, latest-frame slot
//! - `ingest`: Frame sources (synthetic, MJPEG over HTTP, GStreamer, OpenCV capture)
//! - `detect`: Cascade classifier seam and the face detection adapter
//! - `render`: Overlay drawing, headless display, single-thread display hub
//! - `worker` / `orchestrator`: Per-viewer state machine and thread fan-out
//! - `config`: Layered configuration (file, environment, command line)
//! - `throughput` / `usage`: Frame rate and CPU/memory accounting for the `measure` tool

pub mod config;
pub mod detect;
pub mod error;
pub mod frame;
pub mod ingest;
pub mod orchestrator;
pub mod progress;
pub mod render;
pub mod signal;
pub mod throughput;
pub mod ui;
pub mod usage;
pub mod worker;

pub use config::{DisplayMode, ViewerConfig, ViewerOverrides};
pub use detect::{CascadeClassifier, CascadeParams, ClassifierLoader, FaceDetector, ModelLoader};
pub use error::ViewerError;
pub use frame::{DetectionRegion, Frame, LatestSlot, PixelFormat, FRAME_BUFFER_DEPTH};
pub use ingest::{
    DefaultSourceFactory, FrameSource, Pull, SourceFactory, SourceKind, SourceOptions,
    StreamHandle,
};
pub use orchestrator::{Orchestrator, RunReport};
pub use progress::Progress;
pub use render::{Display, DisplayHub, HeadlessDisplay, Renderer};
pub use signal::ShutdownSignal;
pub use worker::{run_worker, ExitReason, WorkerConfig, WorkerOutcome, WorkerState};
