//! Single-thread display funnel.
//!
//! GUI toolkits commonly require every window call to come from one thread.
//! Workers get a `HubRenderer` that sends frames over a bounded channel; the
//! thread running `DisplayHub::run_until` owns the surface, shows frames and
//! polls the keyboard. An exit key press is routed to the open window that
//! was presented most recently; windows whose renderer is gone are skipped.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender};
use image::RgbImage;

use super::{draw_regions, Display, Renderer};
use crate::error::ViewerError;
use crate::frame::DetectionRegion;

const QUEUE_DEPTH: usize = 16;
const PUMP_INTERVAL: Duration = Duration::from_millis(5);
const KEY_WAIT: Duration = Duration::from_millis(1);

/// A windowing backend. Only ever called from the pumping thread.
pub trait DisplaySurface: Send {
    fn show(&mut self, window_id: &str, image: &RgbImage) -> Result<(), ViewerError>;

    /// Wait up to `wait` for a key press.
    fn poll_key(&mut self, wait: Duration) -> Result<Option<i32>, ViewerError>;

    fn close_all(&mut self) -> Result<(), ViewerError>;
}

/// Surface that shows nothing and never reports keys.
#[derive(Debug, Default)]
pub struct NullSurface;

impl DisplaySurface for NullSurface {
    fn show(&mut self, _window_id: &str, _image: &RgbImage) -> Result<(), ViewerError> {
        Ok(())
    }

    fn poll_key(&mut self, _wait: Duration) -> Result<Option<i32>, ViewerError> {
        Ok(None)
    }

    fn close_all(&mut self) -> Result<(), ViewerError> {
        Ok(())
    }
}

struct Present {
    window_id: String,
    image: RgbImage,
}

/// Exit flags of the windows that still have a live renderer.
type ExitFlags = Arc<Mutex<HashMap<String, Arc<AtomicBool>>>>;

fn lock_flags(flags: &ExitFlags) -> std::sync::MutexGuard<'_, HashMap<String, Arc<AtomicBool>>> {
    flags.lock().unwrap_or_else(|e| e.into_inner())
}

pub struct DisplayHub {
    sender: Sender<Present>,
    receiver: Receiver<Present>,
    surface: Mutex<Box<dyn DisplaySurface>>,
    exit_flags: ExitFlags,
    exit_key: i32,
}

impl DisplayHub {
    pub fn new(surface: Box<dyn DisplaySurface>, exit_key: i32) -> Self {
        let (sender, receiver) = bounded(QUEUE_DEPTH);
        Self {
            sender,
            receiver,
            surface: Mutex::new(surface),
            exit_flags: ExitFlags::default(),
            exit_key,
        }
    }

    /// Raise the exit flag of the most recently presented window that is
    /// still open. Returns the window it went to.
    fn route_exit_key(&self, recent: &mut Vec<String>) -> Option<String> {
        let flags = lock_flags(&self.exit_flags);
        recent.retain(|w| flags.contains_key(w));
        let window_id = recent.last()?;
        flags[window_id].store(true, Ordering::SeqCst);
        Some(window_id.clone())
    }
}

impl Display for DisplayHub {
    fn renderer(&self, window_id: &str) -> Box<dyn Renderer> {
        let exit_requested = lock_flags(&self.exit_flags)
            .entry(window_id.to_string())
            .or_default()
            .clone();
        Box::new(HubRenderer {
            window_id: window_id.to_string(),
            sender: self.sender.clone(),
            exit_requested,
            exit_flags: self.exit_flags.clone(),
        })
    }

    fn run_until(&self, done: &dyn Fn() -> bool) -> Result<(), ViewerError> {
        let mut surface = self.surface.lock().unwrap_or_else(|e| e.into_inner());
        // Oldest first, each window once.
        let mut recent: Vec<String> = Vec::new();
        let mut broken = false;

        loop {
            match self.receiver.recv_timeout(PUMP_INTERVAL) {
                Ok(present) => {
                    if !broken {
                        if let Err(e) = surface.show(&present.window_id, &present.image) {
                            log::error!("display failed, frames will be dropped: {}", e);
                            broken = true;
                        }
                    }
                    recent.retain(|w| *w != present.window_id);
                    recent.push(present.window_id);
                }
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => break,
            }

            if !broken {
                match surface.poll_key(KEY_WAIT) {
                    Ok(Some(key)) if key == self.exit_key => {
                        match self.route_exit_key(&mut recent) {
                            Some(window_id) => log::info!("exit key pressed in {}", window_id),
                            None => log::debug!("exit key pressed with no open window"),
                        }
                    }
                    Ok(_) => {}
                    Err(e) => {
                        log::error!("keyboard polling failed: {}", e);
                        broken = true;
                    }
                }
            }

            if done() && self.receiver.is_empty() {
                break;
            }
        }
        Ok(())
    }

    fn release(&self) {
        let mut surface = self.surface.lock().unwrap_or_else(|e| e.into_inner());
        if let Err(e) = surface.close_all() {
            log::warn!("failed to close windows: {}", e);
        }
        // Give the toolkit one event-loop turn to actually tear windows down.
        let _ = surface.poll_key(KEY_WAIT);
    }
}

struct HubRenderer {
    window_id: String,
    sender: Sender<Present>,
    exit_requested: Arc<AtomicBool>,
    exit_flags: ExitFlags,
}

impl Drop for HubRenderer {
    fn drop(&mut self) {
        let mut flags = lock_flags(&self.exit_flags);
        if flags
            .get(&self.window_id)
            .is_some_and(|flag| Arc::ptr_eq(flag, &self.exit_requested))
        {
            flags.remove(&self.window_id);
        }
    }
}

impl Renderer for HubRenderer {
    fn window_id(&self) -> &str {
        &self.window_id
    }

    fn present(
        &mut self,
        mut image: RgbImage,
        regions: &[DetectionRegion],
    ) -> Result<(), ViewerError> {
        draw_regions(&mut image, regions);
        self.sender
            .send(Present {
                window_id: self.window_id.clone(),
                image,
            })
            .map_err(|_| ViewerError::Display("display hub is gone".to_string()))
    }

    fn poll_exit_key(&mut self) -> bool {
        self.exit_requested.swap(false, Ordering::SeqCst)
    }
}
