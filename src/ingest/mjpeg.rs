//! HTTP MJPEG/JPEG frame source.
//!
//! This module provides `MjpegSource` for cameras that serve
//! `multipart/x-mixed-replace` JPEG streams or single JPEG snapshots over HTTP.
//!
//! A reader thread pulls JPEG payloads off the connection as fast as they
//! arrive and publishes them into a `LatestSlot`. The consumer decodes only the
//! payload it takes, so a slow consumer skips frames instead of queueing them.

use std::io::Read;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use image::GenericImageView;

use super::{FrameSource, Pull};
use crate::error::ViewerError;
use crate::frame::{Frame, LatestSlot, PixelFormat, SlotRecv};

const MAX_JPEG_BYTES: usize = 5 * 1024 * 1024;
const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Reader-side state shared with the consumer.
struct Shared {
    slot: LatestSlot<Vec<u8>>,
    stop: AtomicBool,
    failure: Mutex<Option<String>>,
}

pub struct MjpegSource {
    url: String,
    shared: Arc<Shared>,
    pull_timeout: Option<Duration>,
}

impl MjpegSource {
    pub fn open(url: &str, pull_timeout: Option<Duration>) -> Result<Self, ViewerError> {
        let agent = ureq::AgentBuilder::new()
            .timeout_connect(CONNECT_TIMEOUT)
            .build();
        let response = agent
            .get(url)
            .call()
            .map_err(|e| ViewerError::connect(url, e))?;
        let content_type = response.header("Content-Type").unwrap_or("").to_lowercase();

        let stream = if content_type.contains("multipart") {
            HttpStream::Mjpeg(MjpegStream::new(response.into_reader()))
        } else {
            let mut first = Vec::new();
            response
                .into_reader()
                .take(MAX_JPEG_BYTES as u64)
                .read_to_end(&mut first)
                .map_err(|e| ViewerError::connect(url, e))?;
            HttpStream::Snapshot {
                agent,
                first: Some(first),
            }
        };

        let shared = Arc::new(Shared {
            slot: LatestSlot::new(),
            stop: AtomicBool::new(false),
            failure: Mutex::new(None),
        });
        let reader_shared = shared.clone();
        let reader_url = url.to_string();
        thread::Builder::new()
            .name("mjpeg-reader".to_string())
            .spawn(move || read_loop(stream, &reader_url, &reader_shared))
            .map_err(|e| ViewerError::connect(url, e))?;

        log::info!("MjpegSource: connected to {} ({})", url, content_type);
        Ok(Self {
            url: url.to_string(),
            shared,
            pull_timeout,
        })
    }

    /// Payloads replaced before the consumer took them.
    pub fn frames_dropped(&self) -> u64 {
        self.shared.slot.dropped()
    }

    fn finish(&self) -> Result<Pull, ViewerError> {
        let failure = self
            .shared
            .failure
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        match failure {
            Some(reason) => Err(ViewerError::Pull(format!("{}: {}", self.url, reason))),
            None => Ok(Pull::EndOfStream),
        }
    }
}

impl FrameSource for MjpegSource {
    fn name(&self) -> &'static str {
        "mjpeg"
    }

    fn pull_frame(&mut self) -> Result<Pull, ViewerError> {
        let jpeg = match self.pull_timeout {
            Some(timeout) => match self.shared.slot.take_timeout(timeout) {
                SlotRecv::Value(jpeg) => jpeg,
                SlotRecv::Closed => return self.finish(),
                SlotRecv::TimedOut => {
                    return Err(ViewerError::Pull(format!(
                        "{}: no frame within {:?}",
                        self.url, timeout
                    )))
                }
            },
            None => match self.shared.slot.take() {
                Some(jpeg) => jpeg,
                None => return self.finish(),
            },
        };

        let (pixels, width, height) =
            decode_jpeg(&jpeg).map_err(|e| ViewerError::TransientDecode(format!("{:#}", e)))?;
        Ok(Pull::Frame(Frame::new(
            pixels,
            width,
            height,
            PixelFormat::Rgb24,
        )))
    }
}

impl Drop for MjpegSource {
    fn drop(&mut self) {
        self.shared.stop.store(true, Ordering::SeqCst);
        self.shared.slot.close();
    }
}

enum HttpStream {
    Mjpeg(MjpegStream),
    Snapshot {
        agent: ureq::Agent,
        first: Option<Vec<u8>>,
    },
}

impl HttpStream {
    /// Next JPEG payload, or `None` at a clean end of stream.
    fn next_jpeg(&mut self, url: &str) -> Result<Option<Vec<u8>>> {
        match self {
            HttpStream::Mjpeg(stream) => stream.read_next_jpeg(),
            HttpStream::Snapshot { agent, first } => match first.take() {
                Some(bytes) => Ok(Some(bytes)),
                None => fetch_single_jpeg(agent, url).map(Some),
            },
        }
    }
}

fn read_loop(mut stream: HttpStream, url: &str, shared: &Shared) {
    while !shared.stop.load(Ordering::SeqCst) {
        match stream.next_jpeg(url) {
            Ok(Some(jpeg)) => {
                shared.slot.publish(jpeg);
            }
            Ok(None) => {
                log::info!("MjpegSource: {} reached end of stream", url);
                break;
            }
            Err(e) => {
                if !shared.stop.load(Ordering::SeqCst) {
                    *shared.failure.lock().unwrap_or_else(|e| e.into_inner()) =
                        Some(format!("{:#}", e));
                }
                break;
            }
        }
    }
    shared.slot.close();
}

struct MjpegStream {
    reader: Box<dyn Read + Send>,
    buffer: Vec<u8>,
}

impl MjpegStream {
    fn new(reader: Box<dyn Read + Send>) -> Self {
        Self {
            reader,
            buffer: Vec::with_capacity(64 * 1024),
        }
    }

    fn read_next_jpeg(&mut self) -> Result<Option<Vec<u8>>> {
        let mut chunk = vec![0u8; 8192];
        loop {
            if let Some((start, end)) = find_jpeg_bounds(&self.buffer) {
                let frame = self.buffer[start..end].to_vec();
                self.buffer.drain(..end);
                return Ok(Some(frame));
            }

            let read = self.reader.read(&mut chunk).context("read mjpeg chunk")?;
            if read == 0 {
                return Ok(None);
            }
            self.buffer.extend_from_slice(&chunk[..read]);

            if self.buffer.len() > MAX_JPEG_BYTES * 2 {
                let keep = 2.min(self.buffer.len());
                let drain_len = self.buffer.len() - keep;
                self.buffer.drain(..drain_len);
            }
        }
    }
}

fn fetch_single_jpeg(agent: &ureq::Agent, url: &str) -> Result<Vec<u8>> {
    let response = agent
        .get(url)
        .call()
        .with_context(|| format!("fetch jpeg snapshot from {}", url))?;
    let mut bytes = Vec::new();
    response
        .into_reader()
        .take(MAX_JPEG_BYTES as u64)
        .read_to_end(&mut bytes)
        .context("read jpeg snapshot")?;
    if bytes.is_empty() {
        return Err(anyhow!("empty jpeg snapshot"));
    }
    Ok(bytes)
}

fn decode_jpeg(bytes: &[u8]) -> Result<(Vec<u8>, u32, u32)> {
    let image = image::load_from_memory(bytes).context("decode jpeg")?;
    let (width, height) = image.dimensions();
    let rgb = image.into_rgb8();
    Ok((rgb.into_raw(), width, height))
}

fn find_jpeg_bounds(buffer: &[u8]) -> Option<(usize, usize)> {
    let start = buffer.windows(2).position(|w| w == [0xFF, 0xD8])?;
    let end = buffer[start + 2..]
        .windows(2)
        .position(|w| w == [0xFF, 0xD9])?;
    Some((start, start + 2 + end + 2))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn encode_test_jpeg(width: u32, height: u32) -> Vec<u8> {
        let image = image::RgbImage::from_pixel(width, height, image::Rgb([200, 40, 40]));
        let mut bytes = Vec::new();
        image::codecs::jpeg::JpegEncoder::new(&mut bytes)
            .encode_image(&image)
            .expect("encode jpeg");
        bytes
    }

    #[test]
    fn finds_jpeg_markers_inside_multipart_noise() {
        let buffer = [b"--frame\r\n".as_slice(), &[0xFF, 0xD8, 1, 2, 0xFF, 0xD9], b"\r\n"].concat();
        let (start, end) = find_jpeg_bounds(&buffer).unwrap();
        assert_eq!(&buffer[start..end], &[0xFF, 0xD8, 1, 2, 0xFF, 0xD9]);
        assert!(find_jpeg_bounds(&[0xFF, 0xD8, 1, 2]).is_none());
    }

    #[test]
    fn mjpeg_stream_splits_parts_and_ends_cleanly() -> Result<()> {
        let jpeg = encode_test_jpeg(8, 8);
        let mut body = Vec::new();
        for _ in 0..2 {
            body.extend_from_slice(b"--frame\r\nContent-Type: image/jpeg\r\n\r\n");
            body.extend_from_slice(&jpeg);
            body.extend_from_slice(b"\r\n");
        }
        let mut stream = MjpegStream::new(Box::new(Cursor::new(body)));
        assert_eq!(stream.read_next_jpeg()?, Some(jpeg.clone()));
        assert_eq!(stream.read_next_jpeg()?, Some(jpeg));
        assert_eq!(stream.read_next_jpeg()?, None);
        Ok(())
    }

    #[test]
    fn decodes_jpeg_to_rgb() -> Result<()> {
        let (pixels, width, height) = decode_jpeg(&encode_test_jpeg(16, 8))?;
        assert_eq!((width, height), (16, 8));
        assert_eq!(pixels.len(), 16 * 8 * 3);
        Ok(())
    }

    #[test]
    fn garbage_payload_fails_to_decode() {
        assert!(decode_jpeg(&[0xFF, 0xD8, 0, 0, 0xFF, 0xD9]).is_err());
    }

    mod http {
        use super::*;
        use std::io::Write;
        use std::net::{TcpListener, TcpStream};
        use std::sync::mpsc;

        const MULTIPART_HEADER: &[u8] = b"HTTP/1.1 200 OK\r\nContent-Type: multipart/x-mixed-replace; boundary=frame\r\nConnection: close\r\n\r\n";

        fn read_request(stream: &mut TcpStream) {
            let mut request = Vec::new();
            let mut byte = [0u8; 1];
            while !request.ends_with(b"\r\n\r\n") {
                match stream.read(&mut byte) {
                    Ok(1) => request.push(byte[0]),
                    _ => return,
                }
            }
        }

        fn write_part(stream: &mut TcpStream, jpeg: &[u8]) {
            stream
                .write_all(b"--frame\r\nContent-Type: image/jpeg\r\n\r\n")
                .unwrap();
            stream.write_all(jpeg).unwrap();
            stream.write_all(b"\r\n").unwrap();
            stream.flush().unwrap();
        }

        fn local_listener() -> (TcpListener, String) {
            let listener = TcpListener::bind("127.0.0.1:0").unwrap();
            let url = format!("http://{}/video", listener.local_addr().unwrap());
            (listener, url)
        }

        fn expect_frame(source: &mut MjpegSource) -> Frame {
            match source.pull_frame() {
                Ok(Pull::Frame(frame)) => frame,
                other => panic!("expected a frame, got {:?}", other),
            }
        }

        #[test]
        fn multipart_stream_yields_each_part_then_end_of_stream() {
            let (listener, url) = local_listener();
            let jpeg = encode_test_jpeg(8, 6);
            let (next_tx, next_rx) = mpsc::channel::<()>();
            let server = thread::spawn(move || {
                let (mut stream, _) = listener.accept().unwrap();
                read_request(&mut stream);
                stream.write_all(MULTIPART_HEADER).unwrap();
                for _ in 0..3 {
                    write_part(&mut stream, &jpeg);
                    // One part in flight at a time so none is replaced unseen.
                    if next_rx.recv().is_err() {
                        break;
                    }
                }
            });

            let mut source = MjpegSource::open(&url, None).unwrap();
            for _ in 0..3 {
                let frame = expect_frame(&mut source);
                assert_eq!((frame.width, frame.height), (8, 6));
                assert_eq!(frame.format, PixelFormat::Rgb24);
                next_tx.send(()).unwrap();
            }
            server.join().unwrap();
            assert!(matches!(source.pull_frame(), Ok(Pull::EndOfStream)));
            assert_eq!(source.frames_dropped(), 0);
        }

        #[test]
        fn stalled_stream_times_out_as_pull_error() {
            let (listener, url) = local_listener();
            let jpeg = encode_test_jpeg(4, 4);
            let (release_tx, release_rx) = mpsc::channel::<()>();
            let server = thread::spawn(move || {
                let (mut stream, _) = listener.accept().unwrap();
                read_request(&mut stream);
                stream.write_all(MULTIPART_HEADER).unwrap();
                write_part(&mut stream, &jpeg);
                // Hold the connection open without sending anything else.
                let _ = release_rx.recv();
            });

            let mut source = MjpegSource::open(&url, Some(Duration::from_millis(150))).unwrap();
            expect_frame(&mut source);
            match source.pull_frame() {
                Err(ViewerError::Pull(reason)) => assert!(reason.contains("no frame within")),
                other => panic!("expected a timeout, got {:?}", other),
            }

            drop(release_tx);
            server.join().unwrap();
        }

        #[test]
        fn snapshot_endpoint_is_refetched_until_it_fails() {
            let (listener, url) = local_listener();
            let jpeg = encode_test_jpeg(8, 8);
            let server = thread::spawn(move || {
                for _ in 0..2 {
                    let (mut stream, _) = listener.accept().unwrap();
                    read_request(&mut stream);
                    let header = format!(
                        "HTTP/1.1 200 OK\r\nContent-Type: image/jpeg\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
                        jpeg.len()
                    );
                    stream.write_all(header.as_bytes()).unwrap();
                    stream.write_all(&jpeg).unwrap();
                }
                // Listener dropped here: further fetches are refused.
            });

            let mut source = MjpegSource::open(&url, Some(Duration::from_secs(5))).unwrap();
            let frame = expect_frame(&mut source);
            assert_eq!((frame.width, frame.height), (8, 8));
            server.join().unwrap();

            let mut outcome = source.pull_frame();
            for _ in 0..2 {
                if matches!(outcome, Ok(Pull::Frame(_))) {
                    outcome = source.pull_frame();
                }
            }
            assert!(
                matches!(outcome, Err(ViewerError::Pull(_))),
                "refused refetch must surface as a pull error, got {:?}",
                outcome
            );
        }
    }
}
