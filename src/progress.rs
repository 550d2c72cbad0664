use std::io::{self, Write};
use std::sync::{Arc, Mutex};

/// Shared sink for per-frame progress characters.
///
/// Every worker writes its label after each rendered frame. Writes from
/// different workers interleave freely; each write is flushed immediately so an
/// external meter sees frames as they happen.
#[derive(Clone)]
pub struct Progress {
    sink: Arc<Mutex<Box<dyn Write + Send>>>,
}

impl Progress {
    pub fn new(writer: impl Write + Send + 'static) -> Self {
        Self {
            sink: Arc::new(Mutex::new(Box::new(writer))),
        }
    }

    pub fn stdout() -> Self {
        Self::new(io::stdout())
    }

    /// Progress that goes nowhere.
    pub fn discard() -> Self {
        Self::new(io::sink())
    }

    /// Progress captured in memory, for inspection in tests.
    pub fn capture() -> (Self, CapturedProgress) {
        let buffer = CapturedProgress::default();
        (Self::new(buffer.clone()), buffer)
    }

    pub fn tick(&self, label: char) {
        let mut encoded = [0u8; 4];
        let bytes = label.encode_utf8(&mut encoded).as_bytes();
        let mut sink = self.sink.lock().unwrap_or_else(|e| e.into_inner());
        if let Err(e) = sink.write_all(bytes).and_then(|_| sink.flush()) {
            log::debug!("progress write failed: {}", e);
        }
    }
}

/// In-memory progress buffer.
#[derive(Clone, Default)]
pub struct CapturedProgress {
    bytes: Arc<Mutex<Vec<u8>>>,
}

impl CapturedProgress {
    pub fn contents(&self) -> String {
        String::from_utf8_lossy(&self.bytes.lock().unwrap_or_else(|e| e.into_inner())).into_owned()
    }

    pub fn count(&self, label: char) -> usize {
        self.contents().chars().filter(|&c| c == label).count()
    }
}

impl Write for CapturedProgress {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.bytes
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ticks_are_written_per_label() {
        let (progress, captured) = Progress::capture();
        let clone = progress.clone();
        progress.tick('.');
        clone.tick(',');
        progress.tick('.');
        assert_eq!(captured.contents(), ".,.");
        assert_eq!(captured.count('.'), 2);
    }
}
