//! GStreamer pipeline source.
//!
//! HTTP URLs are decoded with `souphttpsrc ! jpegdec`; anything else goes
//! through `uridecodebin`. Both end in an appsink holding a single buffer with
//! `drop=true`, so stale samples are discarded inside the pipeline.

use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use gstreamer::prelude::*;

use super::{FrameSource, Pull};
use crate::error::ViewerError;
use crate::frame::{Frame, PixelFormat, FRAME_BUFFER_DEPTH};

pub(crate) struct GstreamerSource {
    url: String,
    pipeline: gstreamer::Pipeline,
    appsink: gstreamer_app::AppSink,
    pull_timeout: Option<Duration>,
}

impl GstreamerSource {
    pub(crate) fn open(url: &str, pull_timeout: Option<Duration>) -> Result<Self, ViewerError> {
        Self::build(url, pull_timeout).map_err(|e| ViewerError::connect(url, format!("{:#}", e)))
    }

    fn build(url: &str, pull_timeout: Option<Duration>) -> Result<Self> {
        gstreamer::init().context("initialize gstreamer")?;

        let pipeline_description = pipeline_description(url);
        let pipeline = gstreamer::parse::launch(&pipeline_description)
            .context("build pipeline")?
            .downcast::<gstreamer::Pipeline>()
            .map_err(|_| anyhow!("pipeline description did not produce a Pipeline"))?;

        let appsink = pipeline
            .by_name("sink")
            .context("appsink element missing from pipeline")?
            .downcast::<gstreamer_app::AppSink>()
            .map_err(|_| anyhow!("sink element has unexpected type"))?;

        appsink.set_emit_signals(false);
        appsink.set_max_buffers(FRAME_BUFFER_DEPTH as u32);
        appsink.set_drop(true);
        appsink.set_sync(false);

        pipeline
            .set_state(gstreamer::State::Playing)
            .context("set pipeline to Playing")?;

        Ok(Self {
            url: url.to_string(),
            pipeline,
            appsink,
            pull_timeout,
        })
    }

    fn bus_error(&self) -> Option<String> {
        let bus = self.pipeline.bus()?;
        while let Some(message) = bus.pop() {
            use gstreamer::MessageView;
            if let MessageView::Error(err) = message.view() {
                return Some(format!(
                    "gstreamer error from {:?}: {}",
                    err.src().map(|s| s.path_string()),
                    err.error()
                ));
            }
        }
        None
    }

    fn no_sample(&self, reason: &str) -> Result<Pull, ViewerError> {
        if self.appsink.is_eos() {
            return Ok(Pull::EndOfStream);
        }
        let detail = self.bus_error().unwrap_or_else(|| reason.to_string());
        Err(ViewerError::Pull(format!("{}: {}", self.url, detail)))
    }
}

impl FrameSource for GstreamerSource {
    fn name(&self) -> &'static str {
        "gstreamer"
    }

    fn pull_frame(&mut self) -> Result<Pull, ViewerError> {
        let sample = match self.pull_timeout {
            Some(timeout) => {
                let clock = gstreamer::ClockTime::from_mseconds(timeout.as_millis() as u64);
                match self.appsink.try_pull_sample(clock) {
                    Some(sample) => sample,
                    None => return self.no_sample("no sample before timeout"),
                }
            }
            None => match self.appsink.pull_sample() {
                Ok(sample) => sample,
                Err(_) => return self.no_sample("failed to pull sample"),
            },
        };

        sample_to_frame(&sample)
            .map(Pull::Frame)
            .map_err(|e| ViewerError::TransientDecode(format!("{:#}", e)))
    }
}

impl Drop for GstreamerSource {
    fn drop(&mut self) {
        if let Err(e) = self.pipeline.set_state(gstreamer::State::Null) {
            log::warn!("failed to stop pipeline for {}: {}", self.url, e);
        }
    }
}

fn pipeline_description(url: &str) -> String {
    let decode = if url.starts_with("http://") || url.starts_with("https://") {
        format!("souphttpsrc location={} ! jpegdec", url)
    } else {
        format!("uridecodebin uri={}", url)
    };
    format!(
        "{} ! videoconvert ! video/x-raw,format=I420 ! appsink name=sink",
        decode
    )
}

/// Copy a mapped sample into a tightly packed frame. The mapping is released
/// when `video_frame` goes out of scope, on error paths too.
fn sample_to_frame(sample: &gstreamer::Sample) -> Result<Frame> {
    let buffer = sample.buffer().context("sample missing buffer")?;
    let caps = sample.caps().context("sample missing caps")?;
    let info = gstreamer_video::VideoInfo::from_caps(caps).context("parse caps as video info")?;

    let format_name = info.format().to_string();
    let format = PixelFormat::from_name(&format_name)
        .ok_or_else(|| anyhow!("unsupported pixel format {}", format_name))?;
    let width = info.width();
    let height = info.height();

    let video_frame = gstreamer_video::VideoFrameRef::from_buffer_ref_readable(buffer, &info)
        .map_err(|_| anyhow!("failed to map buffer"))?;

    let mut pixels = Vec::with_capacity(format.frame_len(width, height).unwrap_or(0));
    for (plane, (row_bytes, rows)) in plane_layout(format, width, height).into_iter().enumerate() {
        let data = video_frame
            .plane_data(plane as u32)
            .map_err(|_| anyhow!("plane {} not mapped", plane))?;
        let stride = video_frame.plane_stride()[plane] as usize;
        for row in 0..rows {
            let start = row * stride;
            pixels.extend_from_slice(
                data.get(start..start + row_bytes)
                    .context("buffer row is out of bounds")?,
            );
        }
    }

    Ok(Frame::new(pixels, width, height, format))
}

/// (bytes per row, rows) for each plane.
fn plane_layout(format: PixelFormat, width: u32, height: u32) -> Vec<(usize, usize)> {
    let w = width as usize;
    let h = height as usize;
    let (cw, ch) = (w.div_ceil(2), h.div_ceil(2));
    match format {
        PixelFormat::I420 => vec![(w, h), (cw, ch), (cw, ch)],
        PixelFormat::Nv12 => vec![(w, h), (cw * 2, ch)],
        PixelFormat::Rgb24 | PixelFormat::Bgr24 => vec![(w * 3, h)],
        PixelFormat::Gray8 => vec![(w, h)],
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn http_urls_use_jpeg_decode_chain() {
        let desc = pipeline_description("http://cam:8080/video");
        assert!(desc.starts_with("souphttpsrc location=http://cam:8080/video ! jpegdec"));
        assert!(desc.ends_with("appsink name=sink"));

        let desc = pipeline_description("rtsp://cam/stream");
        assert!(desc.starts_with("uridecodebin uri=rtsp://cam/stream"));
    }

    #[test]
    fn plane_layout_covers_the_packed_length() {
        for format in [PixelFormat::I420, PixelFormat::Nv12, PixelFormat::Rgb24] {
            let total: usize = plane_layout(format, 6, 4)
                .into_iter()
                .map(|(row, rows)| row * rows)
                .sum();
            assert_eq!(Some(total), format.frame_len(6, 4));
        }
    }
}
