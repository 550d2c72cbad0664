use std::path::Path;

use image::GrayImage;
use opencv::core::{Mat, Rect, Scalar, Size, Vector, CV_8UC1};
use opencv::objdetect;
use opencv::prelude::*;

use crate::detect::classifier::{CascadeClassifier, CascadeParams};
use crate::error::ViewerError;
use crate::frame::DetectionRegion;

/// Haar cascade backed by OpenCV's `objdetect` module.
pub struct OpencvClassifier {
    cascade: objdetect::CascadeClassifier,
}

impl OpencvClassifier {
    pub fn load(path: &Path) -> Result<Self, ViewerError> {
        let load_error = |reason: String| {
            ViewerError::Configuration(format!(
                "failed to load cascade {}: {}",
                path.display(),
                reason
            ))
        };
        let cascade = objdetect::CascadeClassifier::new(&path.to_string_lossy())
            .map_err(|e| load_error(e.message))?;
        if cascade.empty().map_err(|e| load_error(e.message))? {
            return Err(load_error("file is not a cascade model".to_string()));
        }
        Ok(Self { cascade })
    }
}

impl CascadeClassifier for OpencvClassifier {
    fn name(&self) -> &'static str {
        "opencv"
    }

    fn detect_multi_scale(
        &mut self,
        gray: &GrayImage,
        params: &CascadeParams,
    ) -> Result<Vec<DetectionRegion>, ViewerError> {
        let cv_error = |e: opencv::Error| ViewerError::TransientDecode(e.message);
        let (width, height) = gray.dimensions();

        let mut mat = Mat::new_rows_cols_with_default(
            height as i32,
            width as i32,
            CV_8UC1,
            Scalar::all(0.0),
        )
        .map_err(cv_error)?;
        mat.data_bytes_mut()
            .map_err(cv_error)?
            .copy_from_slice(gray.as_raw());

        let mut faces = Vector::<Rect>::new();
        self.cascade
            .detect_multi_scale(
                &mat,
                &mut faces,
                params.scale_factor,
                params.min_neighbors as i32,
                0,
                Size::new(params.min_size.0 as i32, params.min_size.1 as i32),
                Size::new(0, 0),
            )
            .map_err(cv_error)?;

        Ok(faces
            .iter()
            .map(|r| {
                DetectionRegion::new(
                    r.x.max(0) as u32,
                    r.y.max(0) as u32,
                    r.width.max(0) as u32,
                    r.height.max(0) as u32,
                )
            })
            .collect())
    }
}
