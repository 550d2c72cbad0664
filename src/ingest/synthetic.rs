//! Synthetic frame source for `stub://` URLs.
//!
//! Query parameters shape the stream:
//! - `frames=N`      end the stream after N frames (default: endless)
//! - `width`/`height` frame size (default 640x480)
//! - `fps=F`         pace frames at F per second (default: unpaced)
//! - `fail_after=N`  return a pull error instead of frame N+1
//! - `corrupt=N`     emit frame N (1-based) with a truncated buffer
//!
//! Frames are I420, like a decoded JPEG coming out of `videoconvert`.

use std::thread;
use std::time::{Duration, Instant};

use url::Url;

use super::{FrameSource, Pull};
use crate::error::ViewerError;
use crate::frame::{Frame, PixelFormat};

const DEFAULT_WIDTH: u32 = 640;
const DEFAULT_HEIGHT: u32 = 480;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SyntheticConfig {
    pub name: String,
    pub frames: Option<u64>,
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    pub fail_after: Option<u64>,
    pub corrupt: Option<u64>,
}

impl SyntheticConfig {
    pub fn from_url(url: &str) -> Result<Self, ViewerError> {
        let parsed = Url::parse(url).map_err(|e| ViewerError::connect(url, e))?;
        if parsed.scheme() != "stub" {
            return Err(ViewerError::connect(url, "synthetic source needs a stub:// url"));
        }
        let mut config = Self {
            name: parsed.host_str().unwrap_or("synthetic").to_string(),
            frames: None,
            width: DEFAULT_WIDTH,
            height: DEFAULT_HEIGHT,
            fps: 0,
            fail_after: None,
            corrupt: None,
        };
        for (key, value) in parsed.query_pairs() {
            let number = |v: &str| -> Result<u64, ViewerError> {
                v.parse()
                    .map_err(|_| ViewerError::connect(url, format!("{} must be an integer", key)))
            };
            let small = |v: &str| -> Result<u32, ViewerError> {
                u32::try_from(number(v)?)
                    .map_err(|_| ViewerError::connect(url, format!("{} is out of range", key)))
            };
            match key.as_ref() {
                "frames" => config.frames = Some(number(&value)?),
                "width" => config.width = small(&value)?,
                "height" => config.height = small(&value)?,
                "fps" => config.fps = small(&value)?,
                "fail_after" => config.fail_after = Some(number(&value)?),
                "corrupt" => config.corrupt = Some(number(&value)?),
                other => log::warn!("synthetic source {}: ignoring parameter '{}'", url, other),
            }
        }
        if config.width == 0 || config.height == 0 {
            return Err(ViewerError::connect(url, "frame size must be non-zero"));
        }
        if PixelFormat::I420.frame_len(config.width, config.height).is_none() {
            return Err(ViewerError::connect(url, "frame size is too large"));
        }
        Ok(config)
    }
}

/// Deterministic test-pattern source.
pub struct SyntheticSource {
    config: SyntheticConfig,
    frame_count: u64,
    last_frame_at: Option<Instant>,
}

impl SyntheticSource {
    pub fn open(url: &str) -> Result<Self, ViewerError> {
        let config = SyntheticConfig::from_url(url)?;
        log::info!(
            "synthetic source {}: {}x{}, {} frames",
            config.name,
            config.width,
            config.height,
            config
                .frames
                .map_or_else(|| "endless".to_string(), |n| n.to_string())
        );
        Ok(Self {
            config,
            frame_count: 0,
            last_frame_at: None,
        })
    }

    pub fn frames_produced(&self) -> u64 {
        self.frame_count
    }

    fn pace(&mut self) {
        if self.config.fps == 0 {
            return;
        }
        let interval = Duration::from_millis((1000 / self.config.fps as u64).max(1));
        if let Some(last) = self.last_frame_at {
            let elapsed = last.elapsed();
            if elapsed < interval {
                thread::sleep(interval - elapsed);
            }
        }
        self.last_frame_at = Some(Instant::now());
    }

    fn generate(&self) -> Vec<u8> {
        let (w, h) = (self.config.width, self.config.height);
        let len = PixelFormat::I420.frame_len(w, h).unwrap_or(0);
        let luma = (w as usize * h as usize).min(len);
        let mut pixels = vec![128u8; len];
        // Diagonal bars drifting one pixel per frame; chroma stays neutral.
        for (i, pixel) in pixels[..luma].iter_mut().enumerate() {
            let x = i as u64 % w as u64;
            let y = i as u64 / w as u64;
            *pixel = ((x + y + self.frame_count) % 256) as u8;
        }
        if self.config.corrupt == Some(self.frame_count) {
            pixels.truncate(luma / 2);
        }
        pixels
    }
}

impl FrameSource for SyntheticSource {
    fn name(&self) -> &'static str {
        "synthetic"
    }

    fn pull_frame(&mut self) -> Result<Pull, ViewerError> {
        if let Some(limit) = self.config.frames {
            if self.frame_count >= limit {
                return Ok(Pull::EndOfStream);
            }
        }
        if let Some(fail_after) = self.config.fail_after {
            if self.frame_count >= fail_after {
                return Err(ViewerError::Pull(format!(
                    "synthetic source {} failed after {} frames",
                    self.config.name, fail_after
                )));
            }
        }

        self.pace();
        self.frame_count += 1;
        Ok(Pull::Frame(Frame::new(
            self.generate(),
            self.config.width,
            self.config.height,
            PixelFormat::I420,
        )))
    }
}
