//! OpenCV `VideoCapture` source.
//!
//! Accepts anything the capture backend can open: URLs, file paths, or a
//! device index such as `0`.

use opencv::core::Mat;
use opencv::prelude::*;
use opencv::videoio::{self, VideoCapture, CAP_ANY, CAP_PROP_BUFFERSIZE};

use super::{FrameSource, Pull};
use crate::error::ViewerError;
use crate::frame::{Frame, PixelFormat, FRAME_BUFFER_DEPTH};

pub(crate) struct CaptureSource {
    url: String,
    capture: VideoCapture,
}

impl CaptureSource {
    pub(crate) fn open(url: &str) -> Result<Self, ViewerError> {
        let capture = match url.parse::<i32>() {
            Ok(index) => VideoCapture::new(index, CAP_ANY),
            Err(_) => VideoCapture::from_file(url, CAP_ANY),
        }
        .map_err(|e| ViewerError::connect(url, e.message))?;

        let opened = videoio::VideoCapture::is_opened(&capture)
            .map_err(|e| ViewerError::connect(url, e.message))?;
        if !opened {
            return Err(ViewerError::connect(url, "capture backend could not open source"));
        }

        let mut capture = capture;
        // Not every backend honours the buffer size; failures are not fatal.
        if let Err(e) = capture.set(CAP_PROP_BUFFERSIZE, FRAME_BUFFER_DEPTH as f64) {
            log::warn!("{}: could not limit capture buffer: {}", url, e.message);
        }

        Ok(Self {
            url: url.to_string(),
            capture,
        })
    }
}

impl FrameSource for CaptureSource {
    fn name(&self) -> &'static str {
        "capture"
    }

    fn pull_frame(&mut self) -> Result<Pull, ViewerError> {
        let mut mat = Mat::default();
        let grabbed = self
            .capture
            .read(&mut mat)
            .map_err(|e| ViewerError::Pull(format!("{}: {}", self.url, e.message)))?;
        if !grabbed || mat.empty() {
            return Ok(Pull::EndOfStream);
        }

        let width = mat.cols() as u32;
        let height = mat.rows() as u32;
        let mat = if mat.is_continuous() {
            mat
        } else {
            mat.try_clone()
                .map_err(|e| ViewerError::TransientDecode(e.message))?
        };
        let pixels = mat
            .data_bytes()
            .map_err(|e| ViewerError::TransientDecode(e.message))?
            .to_vec();
        Ok(Pull::Frame(Frame::new(
            pixels,
            width,
            height,
            PixelFormat::Bgr24,
        )))
    }
}

impl Drop for CaptureSource {
    fn drop(&mut self) {
        if let Err(e) = self.capture.release() {
            log::warn!("failed to release capture for {}: {}", self.url, e.message);
        }
    }
}
