//! Frame containers and the single-slot frame buffer.
//!
//! - `Frame`: one decoded image, owned by the worker that pulled it.
//! - `DetectionRegion`: a face rectangle in original-frame coordinates.
//! - `LatestSlot`: depth-1 mailbox between a reader and a consumer. Publishing
//!   over an unconsumed value replaces it, so the consumer always sees the most
//!   recent frame and never a queue of stale ones.

use std::sync::{Condvar, Mutex, MutexGuard};
use std::time::{Duration, Instant};

/// Number of frames a source may hold between the transport and the consumer.
pub const FRAME_BUFFER_DEPTH: usize = 1;

/// Pixel layout of a raw frame buffer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PixelFormat {
    /// Planar 4:2:0: Y plane, then U, then V at quarter resolution.
    I420,
    /// Semi-planar 4:2:0: Y plane, then interleaved UV.
    Nv12,
    Rgb24,
    Bgr24,
    Gray8,
}

impl PixelFormat {
    /// Expected buffer length for a tightly packed frame.
    pub fn frame_len(self, width: u32, height: u32) -> Option<usize> {
        let w = width as usize;
        let h = height as usize;
        let luma = w.checked_mul(h)?;
        match self {
            PixelFormat::I420 | PixelFormat::Nv12 => {
                let chroma = w.div_ceil(2).checked_mul(h.div_ceil(2))?;
                luma.checked_add(chroma.checked_mul(2)?)
            }
            PixelFormat::Rgb24 | PixelFormat::Bgr24 => luma.checked_mul(3),
            PixelFormat::Gray8 => Some(luma),
        }
    }

    /// Caps/format name as GStreamer spells it.
    pub fn name(self) -> &'static str {
        match self {
            PixelFormat::I420 => "I420",
            PixelFormat::Nv12 => "NV12",
            PixelFormat::Rgb24 => "RGB",
            PixelFormat::Bgr24 => "BGR",
            PixelFormat::Gray8 => "GRAY8",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "I420" => Some(PixelFormat::I420),
            "NV12" => Some(PixelFormat::Nv12),
            "RGB" => Some(PixelFormat::Rgb24),
            "BGR" => Some(PixelFormat::Bgr24),
            "GRAY8" => Some(PixelFormat::Gray8),
            _ => None,
        }
    }
}

/// One raw frame as produced by a source. Lives for a single loop iteration.
#[derive(Debug)]
pub struct Frame {
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
    data: Vec<u8>,
}

impl Frame {
    pub fn new(data: Vec<u8>, width: u32, height: u32, format: PixelFormat) -> Self {
        Self {
            width,
            height,
            format,
            data,
        }
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn into_data(self) -> Vec<u8> {
        self.data
    }
}

/// Axis-aligned rectangle in pixel coordinates.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DetectionRegion {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl DetectionRegion {
    pub fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }
}

// ----------------------------------------------------------------------------
// LatestSlot: depth-1 frame buffer
// ----------------------------------------------------------------------------

/// Outcome of waiting on a `LatestSlot`.
#[derive(Debug, PartialEq, Eq)]
pub enum SlotRecv<T> {
    Value(T),
    /// The producer closed the slot and nothing is left to take.
    Closed,
    TimedOut,
}

struct SlotState<T> {
    value: Option<T>,
    closed: bool,
    dropped: u64,
}

/// Single-value mailbox with replace-on-publish semantics.
pub struct LatestSlot<T> {
    state: Mutex<SlotState<T>>,
    ready: Condvar,
}

impl<T> LatestSlot<T> {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(SlotState {
                value: None,
                closed: false,
                dropped: 0,
            }),
            ready: Condvar::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, SlotState<T>> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Store `value`, discarding any value the consumer has not taken yet.
    ///
    /// Returns true when an older value was discarded.
    pub fn publish(&self, value: T) -> bool {
        let mut state = self.lock();
        if state.closed {
            return false;
        }
        let replaced = state.value.replace(value).is_some();
        if replaced {
            state.dropped += 1;
        }
        self.ready.notify_one();
        replaced
    }

    /// Mark the producer side finished. Pending values can still be taken.
    pub fn close(&self) {
        let mut state = self.lock();
        state.closed = true;
        self.ready.notify_all();
    }

    /// Block until a value is available or the slot is closed.
    pub fn take(&self) -> Option<T> {
        let mut state = self.lock();
        loop {
            if let Some(value) = state.value.take() {
                return Some(value);
            }
            if state.closed {
                return None;
            }
            state = self.ready.wait(state).unwrap_or_else(|e| e.into_inner());
        }
    }

    /// Like `take`, giving up after `timeout`.
    pub fn take_timeout(&self, timeout: Duration) -> SlotRecv<T> {
        let deadline = Instant::now() + timeout;
        let mut state = self.lock();
        loop {
            if let Some(value) = state.value.take() {
                return SlotRecv::Value(value);
            }
            if state.closed {
                return SlotRecv::Closed;
            }
            let now = Instant::now();
            if now >= deadline {
                return SlotRecv::TimedOut;
            }
            let (next, _) = self
                .ready
                .wait_timeout(state, deadline - now)
                .unwrap_or_else(|e| e.into_inner());
            state = next;
        }
    }

    /// Number of values replaced before the consumer took them.
    pub fn dropped(&self) -> u64 {
        self.lock().dropped
    }
}

impl<T> Default for LatestSlot<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn frame_len_matches_layouts() {
        assert_eq!(PixelFormat::I420.frame_len(4, 2), Some(8 + 2 + 2));
        assert_eq!(PixelFormat::Nv12.frame_len(4, 4), Some(16 + 8));
        assert_eq!(PixelFormat::Rgb24.frame_len(2, 2), Some(12));
        assert_eq!(PixelFormat::Gray8.frame_len(3, 3), Some(9));
        // Odd dimensions round chroma up.
        assert_eq!(PixelFormat::I420.frame_len(3, 3), Some(9 + 4 + 4));
    }

    #[test]
    fn format_names_round_trip_through_caps_spelling() {
        for format in [
            PixelFormat::I420,
            PixelFormat::Nv12,
            PixelFormat::Rgb24,
            PixelFormat::Bgr24,
            PixelFormat::Gray8,
        ] {
            assert_eq!(PixelFormat::from_name(format.name()), Some(format));
        }
        assert_eq!(PixelFormat::from_name("YUY2"), None);
    }

    #[test]
    fn slot_keeps_only_latest_value() {
        let slot = LatestSlot::new();
        assert!(!slot.publish(1));
        assert!(slot.publish(2));
        assert!(slot.publish(3));
        assert_eq!(slot.take(), Some(3));
        assert_eq!(slot.dropped(), 2);
    }

    #[test]
    fn slot_never_lags_more_than_one_value() {
        let slot = Arc::new(LatestSlot::new());
        let producer = {
            let slot = slot.clone();
            thread::spawn(move || {
                for i in 0..10_000u64 {
                    slot.publish(i);
                }
                slot.close();
            })
        };

        let mut last = None;
        while let Some(value) = slot.take() {
            if let Some(prev) = last {
                assert!(value > prev, "values must be strictly newer");
            }
            last = Some(value);
        }
        producer.join().unwrap();
        assert_eq!(last, Some(9_999));
    }

    #[test]
    fn closed_slot_drains_then_reports_closed() {
        let slot = LatestSlot::new();
        slot.publish("frame");
        slot.close();
        assert_eq!(slot.take_timeout(Duration::from_millis(10)), SlotRecv::Value("frame"));
        assert_eq!(slot.take_timeout(Duration::from_millis(10)), SlotRecv::Closed);
        assert!(!slot.publish("late"));
    }

    #[test]
    fn take_timeout_expires_on_empty_slot() {
        let slot: LatestSlot<u8> = LatestSlot::new();
        assert_eq!(slot.take_timeout(Duration::from_millis(5)), SlotRecv::TimedOut);
    }
}
