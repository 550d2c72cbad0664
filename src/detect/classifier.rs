use crate::error::ViewerError;
use crate::frame::DetectionRegion;
use image::GrayImage;

/// Sliding-window parameters handed to the classifier.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct CascadeParams {
    pub scale_factor: f64,
    pub min_neighbors: u32,
    /// Smallest region reported, in canonical-resolution pixels.
    pub min_size: (u32, u32),
}

impl Default for CascadeParams {
    fn default() -> Self {
        Self {
            scale_factor: 1.1,
            min_neighbors: 3,
            min_size: (30, 30),
        }
    }
}

/// Pre-trained cascade classifier.
///
/// Implementations receive an equalized single-channel image at the canonical
/// detection resolution and return regions in that image's coordinates.
pub trait CascadeClassifier: Send {
    /// Backend identifier.
    fn name(&self) -> &'static str;

    fn detect_multi_scale(
        &mut self,
        gray: &GrayImage,
        params: &CascadeParams,
    ) -> Result<Vec<DetectionRegion>, ViewerError>;
}
