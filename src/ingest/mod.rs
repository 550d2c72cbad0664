//! Frame sources.
//!
//! This module provides the sources a viewer can pull frames from:
//! - Synthetic `stub://` streams (tests, demos)
//! - HTTP MJPEG/JPEG endpoints (pure Rust, always available)
//! - GStreamer pipelines (feature: source-gstreamer)
//! - OpenCV `VideoCapture` (feature: source-opencv)
//!
//! Every source keeps at most `FRAME_BUFFER_DEPTH` frames between the transport
//! and the consumer. When the consumer is slower than the stream, intermediate
//! frames are dropped so that a pull always yields the most recent frame.

#[cfg(feature = "source-opencv")]
mod capture;
#[cfg(feature = "source-gstreamer")]
mod pipeline;
pub mod mjpeg;
pub mod normalize;
pub mod synthetic;

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use crate::error::ViewerError;
use crate::frame::Frame;

pub use mjpeg::MjpegSource;
pub use normalize::{normalize, normalize_frame};
pub use synthetic::SyntheticSource;

/// Result of a successful pull.
#[derive(Debug)]
pub enum Pull {
    Frame(Frame),
    EndOfStream,
}

/// A connected stream producing raw frames.
pub trait FrameSource: Send {
    /// Backend identifier.
    fn name(&self) -> &'static str;

    /// Block until the next frame, the end of the stream, or an error.
    fn pull_frame(&mut self) -> Result<Pull, ViewerError>;
}

/// Which backend to use for a URL.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum SourceKind {
    /// `stub://` → synthetic, `http(s)://` → GStreamer when compiled in,
    /// else MJPEG; anything else → OpenCV capture when compiled in.
    #[default]
    Auto,
    Synthetic,
    Mjpeg,
    Gstreamer,
    Capture,
}

impl FromStr for SourceKind {
    type Err = ViewerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "auto" => Ok(SourceKind::Auto),
            "synthetic" | "stub" => Ok(SourceKind::Synthetic),
            "mjpeg" | "http" => Ok(SourceKind::Mjpeg),
            "gstreamer" | "gst" => Ok(SourceKind::Gstreamer),
            "capture" | "opencv" => Ok(SourceKind::Capture),
            other => Err(ViewerError::Configuration(format!(
                "unknown source backend '{}'; expected auto, synthetic, mjpeg, gstreamer or capture",
                other
            ))),
        }
    }
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SourceKind::Auto => "auto",
            SourceKind::Synthetic => "synthetic",
            SourceKind::Mjpeg => "mjpeg",
            SourceKind::Gstreamer => "gstreamer",
            SourceKind::Capture => "capture",
        };
        f.write_str(name)
    }
}

/// Options shared by every backend.
#[derive(Clone, Debug, Default)]
pub struct SourceOptions {
    pub kind: SourceKind,
    /// Give up on a pull after this long. `None` blocks indefinitely.
    pub pull_timeout: Option<Duration>,
}

/// Opens frame sources. Workers call this from their own thread.
pub trait SourceFactory: Send + Sync {
    fn open(&self, url: &str) -> Result<Box<dyn FrameSource>, ViewerError>;
}

/// Opens sources by URL scheme and the configured `SourceKind`.
#[derive(Clone, Debug, Default)]
pub struct DefaultSourceFactory {
    options: SourceOptions,
}

impl DefaultSourceFactory {
    pub fn new(options: SourceOptions) -> Self {
        Self { options }
    }

    fn resolve(&self, url: &str) -> SourceKind {
        match self.options.kind {
            SourceKind::Auto if url.starts_with("stub://") => SourceKind::Synthetic,
            SourceKind::Auto if url.starts_with("http://") || url.starts_with("https://") => {
                if cfg!(feature = "source-gstreamer") {
                    SourceKind::Gstreamer
                } else {
                    SourceKind::Mjpeg
                }
            }
            SourceKind::Auto => SourceKind::Capture,
            kind => kind,
        }
    }
}

impl SourceFactory for DefaultSourceFactory {
    fn open(&self, url: &str) -> Result<Box<dyn FrameSource>, ViewerError> {
        let timeout = self.options.pull_timeout;
        match self.resolve(url) {
            SourceKind::Synthetic => Ok(Box::new(SyntheticSource::open(url)?)),
            SourceKind::Mjpeg => Ok(Box::new(MjpegSource::open(url, timeout)?)),
            SourceKind::Gstreamer => {
                #[cfg(feature = "source-gstreamer")]
                {
                    Ok(Box::new(pipeline::GstreamerSource::open(url, timeout)?))
                }
                #[cfg(not(feature = "source-gstreamer"))]
                {
                    Err(ViewerError::connect(
                        url,
                        "gstreamer backend requires the source-gstreamer feature",
                    ))
                }
            }
            SourceKind::Capture => {
                #[cfg(feature = "source-opencv")]
                {
                    Ok(Box::new(capture::CaptureSource::open(url)?))
                }
                #[cfg(not(feature = "source-opencv"))]
                {
                    Err(ViewerError::connect(
                        url,
                        "capture backend requires the source-opencv feature",
                    ))
                }
            }
            SourceKind::Auto => Err(ViewerError::connect(url, "no backend for this url")),
        }
    }
}

// ----------------------------------------------------------------------------
// StreamHandle: one worker's open connection
// ----------------------------------------------------------------------------

/// One open connection to a video source, owned by exactly one worker.
///
/// Dropping the handle releases the underlying backend.
pub struct StreamHandle {
    url: String,
    source: Option<Box<dyn FrameSource>>,
    frames_pulled: u64,
}

impl StreamHandle {
    pub fn open(factory: &dyn SourceFactory, url: &str) -> Result<Self, ViewerError> {
        let source = factory.open(url)?;
        log::info!("stream {} opened via {}", url, source.name());
        Ok(Self {
            url: url.to_string(),
            source: Some(source),
            frames_pulled: 0,
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn buffer_depth(&self) -> usize {
        crate::frame::FRAME_BUFFER_DEPTH
    }

    pub fn is_open(&self) -> bool {
        self.source.is_some()
    }

    pub fn frames_pulled(&self) -> u64 {
        self.frames_pulled
    }

    pub fn pull_frame(&mut self) -> Result<Pull, ViewerError> {
        let source = self
            .source
            .as_mut()
            .ok_or_else(|| ViewerError::Pull(format!("stream {} is closed", self.url)))?;
        let pull = source.pull_frame()?;
        if matches!(pull, Pull::Frame(_)) {
            self.frames_pulled += 1;
        }
        Ok(pull)
    }

    /// Release the backend. Further pulls fail.
    pub fn close(&mut self) {
        if self.source.take().is_some() {
            log::debug!(
                "stream {} closed after {} frames",
                self.url,
                self.frames_pulled
            );
        }
    }
}

impl Drop for StreamHandle {
    fn drop(&mut self) {
        self.close();
    }
}
