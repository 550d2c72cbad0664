//! Overlay drawing and frame presentation.
//!
//! A `Display` hands each worker its own `Renderer`, keyed by window id.
//! Renderers draw detection boxes and present the frame; they also report the
//! exit key. Two displays exist:
//! - `HeadlessDisplay`: draws and discards, never sees a key press.
//! - `DisplayHub`: funnels frames to one thread that owns a GUI surface.

#[cfg(feature = "display-opencv")]
mod highgui;
mod hub;

use image::{Rgb, RgbImage};
use imageproc::drawing::draw_hollow_rect_mut;
use imageproc::rect::Rect;

use crate::error::ViewerError;
use crate::frame::DetectionRegion;

#[cfg(feature = "display-opencv")]
pub use highgui::HighguiSurface;
pub use hub::{DisplayHub, DisplaySurface, NullSurface};

/// Escape.
pub const DEFAULT_EXIT_KEY: i32 = 27;

pub const BOX_COLOR: Rgb<u8> = Rgb([0, 255, 0]);
pub const BOX_THICKNESS: u32 = 2;

/// Per-worker presentation handle.
pub trait Renderer: Send {
    fn window_id(&self) -> &str;

    /// Draw `regions` over `image` and present it.
    fn present(&mut self, image: RgbImage, regions: &[DetectionRegion]) -> Result<(), ViewerError>;

    /// True exactly once for each exit key press seen since the last call.
    fn poll_exit_key(&mut self) -> bool;
}

/// Owner of the shared display resources.
pub trait Display: Send + Sync {
    fn renderer(&self, window_id: &str) -> Box<dyn Renderer>;

    /// Service the display on the calling thread until `done` returns true.
    fn run_until(&self, done: &dyn Fn() -> bool) -> Result<(), ViewerError> {
        let _ = done;
        Ok(())
    }

    /// Release windows and other shared resources once all workers have ended.
    fn release(&self) {}
}

pub fn window_title(label: char) -> String {
    format!("Stream {}", label)
}

/// Draw each region as an unfilled `BOX_THICKNESS`-pixel rectangle.
pub fn draw_regions(image: &mut RgbImage, regions: &[DetectionRegion]) {
    for region in regions.iter().filter(|r| !r.is_empty()) {
        for inset in 0..BOX_THICKNESS {
            let w = region.width.saturating_sub(inset * 2);
            let h = region.height.saturating_sub(inset * 2);
            if w == 0 || h == 0 {
                break;
            }
            let rect = Rect::at((region.x + inset) as i32, (region.y + inset) as i32).of_size(w, h);
            draw_hollow_rect_mut(image, rect, BOX_COLOR);
        }
    }
}

/// Display without a surface. Frames are drawn and dropped.
#[derive(Clone, Debug, Default)]
pub struct HeadlessDisplay;

impl Display for HeadlessDisplay {
    fn renderer(&self, window_id: &str) -> Box<dyn Renderer> {
        Box::new(HeadlessRenderer {
            window_id: window_id.to_string(),
        })
    }
}

struct HeadlessRenderer {
    window_id: String,
}

impl Renderer for HeadlessRenderer {
    fn window_id(&self) -> &str {
        &self.window_id
    }

    fn present(
        &mut self,
        mut image: RgbImage,
        regions: &[DetectionRegion],
    ) -> Result<(), ViewerError> {
        draw_regions(&mut image, regions);
        Ok(())
    }

    fn poll_exit_key(&mut self) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn draws_two_pixel_unfilled_box() {
        let mut image = RgbImage::new(20, 20);
        draw_regions(&mut image, &[DetectionRegion::new(2, 2, 10, 10)]);

        assert_eq!(*image.get_pixel(2, 2), BOX_COLOR);
        assert_eq!(*image.get_pixel(3, 3), BOX_COLOR);
        assert_eq!(*image.get_pixel(11, 6), BOX_COLOR);
        assert_eq!(*image.get_pixel(10, 6), BOX_COLOR);
        // Stroke is two pixels wide, interior untouched.
        assert_eq!(*image.get_pixel(4, 4), Rgb([0, 0, 0]));
        assert_eq!(*image.get_pixel(7, 7), Rgb([0, 0, 0]));
        assert_eq!(*image.get_pixel(1, 1), Rgb([0, 0, 0]));
    }

    #[test]
    fn regions_past_the_edge_are_clipped() {
        let mut image = RgbImage::new(8, 8);
        draw_regions(
            &mut image,
            &[
                DetectionRegion::new(6, 6, 10, 10),
                DetectionRegion::new(0, 0, 0, 5),
            ],
        );
        assert_eq!(*image.get_pixel(6, 6), BOX_COLOR);
        assert_eq!(*image.get_pixel(0, 0), Rgb([0, 0, 0]));
    }

    #[test]
    fn headless_renderer_never_requests_exit() -> Result<(), ViewerError> {
        let display = HeadlessDisplay;
        let mut renderer = display.renderer(&window_title('a'));
        assert_eq!(renderer.window_id(), "Stream a");
        renderer.present(RgbImage::new(4, 4), &[])?;
        assert!(!renderer.poll_exit_key());
        Ok(())
    }
}
