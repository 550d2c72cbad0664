//! Face detection adapter.
//!
//! Frames are reduced to an equalized grayscale image at the canonical
//! 640x480 resolution before the classifier runs; the regions it reports are
//! scaled back to the frame's own resolution.

use image::imageops::{self, FilterType};
use image::{GrayImage, RgbImage};
use imageproc::contrast::equalize_histogram;

use super::classifier::{CascadeClassifier, CascadeParams};
use crate::error::ViewerError;
use crate::frame::DetectionRegion;

pub const CANONICAL_WIDTH: u32 = 640;
pub const CANONICAL_HEIGHT: u32 = 480;

pub struct FaceDetector {
    classifier: Box<dyn CascadeClassifier>,
    params: CascadeParams,
}

impl FaceDetector {
    pub fn new(classifier: Box<dyn CascadeClassifier>) -> Self {
        Self {
            classifier,
            params: CascadeParams::default(),
        }
    }

    pub fn params(&self) -> &CascadeParams {
        &self.params
    }

    pub fn backend(&self) -> &'static str {
        self.classifier.name()
    }

    /// Detect faces in `image`, in `image` coordinates. Empty when none found.
    pub fn detect(&mut self, image: &RgbImage) -> Result<Vec<DetectionRegion>, ViewerError> {
        let (width, height) = image.dimensions();
        if width == 0 || height == 0 {
            return Err(ViewerError::TransientDecode(
                "cannot run detection on an empty image".to_string(),
            ));
        }
        let gray = prepare(image);
        let found = self.classifier.detect_multi_scale(&gray, &self.params)?;
        Ok(found
            .into_iter()
            .map(|region| rescale(region, width, height))
            .collect())
    }
}

/// Grayscale, resize to the canonical resolution, equalize contrast.
pub fn prepare(image: &RgbImage) -> GrayImage {
    let gray = imageops::grayscale(image);
    let gray = if gray.dimensions() == (CANONICAL_WIDTH, CANONICAL_HEIGHT) {
        gray
    } else {
        imageops::resize(&gray, CANONICAL_WIDTH, CANONICAL_HEIGHT, FilterType::Triangle)
    };
    equalize_histogram(&gray)
}

/// Map a canonical-resolution region onto a `width` x `height` frame.
pub fn rescale(region: DetectionRegion, width: u32, height: u32) -> DetectionRegion {
    let scale = |v: u32, full: u32, canonical: u32| (v as u64 * full as u64 / canonical as u64) as u32;
    DetectionRegion {
        x: scale(region.x, width, CANONICAL_WIDTH),
        y: scale(region.y, height, CANONICAL_HEIGHT),
        width: scale(region.width, width, CANONICAL_WIDTH),
        height: scale(region.height, height, CANONICAL_HEIGHT),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::backends::StubClassifier;

    #[test]
    fn rescale_is_identity_at_canonical_resolution() {
        let region = DetectionRegion::new(13, 27, 91, 64);
        assert_eq!(rescale(region, 640, 480), region);
    }

    #[test]
    fn rescale_is_linear_per_axis() {
        let region = DetectionRegion::new(100, 100, 60, 48);
        assert_eq!(
            rescale(region, 1280, 720),
            DetectionRegion::new(200, 150, 120, 72)
        );
        assert_eq!(
            rescale(region, 320, 240),
            DetectionRegion::new(50, 50, 30, 24)
        );
    }

    #[test]
    fn rescale_truncates_like_integer_division() {
        let region = DetectionRegion::new(1, 1, 1, 1);
        assert_eq!(rescale(region, 1000, 1000), DetectionRegion::new(1, 2, 1, 2));
    }

    #[test]
    fn prepare_always_yields_canonical_gray() {
        for (w, h) in [(1920, 1080), (640, 480), (33, 17)] {
            let gray = prepare(&RgbImage::new(w, h));
            assert_eq!(gray.dimensions(), (CANONICAL_WIDTH, CANONICAL_HEIGHT));
        }
    }

    #[test]
    fn detector_uses_fixed_parameters_and_rescales() -> Result<(), ViewerError> {
        let stub = StubClassifier::new(vec![DetectionRegion::new(320, 240, 64, 48)]);
        let mut detector = FaceDetector::new(Box::new(stub));
        assert_eq!(detector.params().scale_factor, 1.1);
        assert_eq!(detector.params().min_neighbors, 3);
        assert_eq!(detector.params().min_size, (30, 30));

        let regions = detector.detect(&RgbImage::new(1280, 960))?;
        assert_eq!(regions, vec![DetectionRegion::new(640, 480, 128, 96)]);
        Ok(())
    }

    #[test]
    fn empty_image_is_rejected() {
        let mut detector = FaceDetector::new(Box::new(StubClassifier::new(vec![])));
        assert!(detector.detect(&RgbImage::new(0, 0)).is_err());
    }
}
