use std::collections::HashSet;
use std::time::Duration;

use image::RgbImage;
use opencv::core::{Mat, Scalar, CV_8UC3};
use opencv::highgui as cv;
use opencv::prelude::*;

use super::hub::DisplaySurface;
use crate::error::ViewerError;

/// OpenCV HighGUI windows. Must be driven from a single thread.
#[derive(Default)]
pub struct HighguiSurface {
    windows: HashSet<String>,
}

impl HighguiSurface {
    pub fn new() -> Self {
        Self::default()
    }
}

fn cv_error(e: opencv::Error) -> ViewerError {
    ViewerError::Display(e.message)
}

fn to_bgr_mat(image: &RgbImage) -> Result<Mat, ViewerError> {
    let (width, height) = image.dimensions();
    let mut mat =
        Mat::new_rows_cols_with_default(height as i32, width as i32, CV_8UC3, Scalar::all(0.0))
            .map_err(cv_error)?;
    let bytes = mat.data_bytes_mut().map_err(cv_error)?;
    for (dst, src) in bytes.chunks_exact_mut(3).zip(image.as_raw().chunks_exact(3)) {
        dst[0] = src[2];
        dst[1] = src[1];
        dst[2] = src[0];
    }
    Ok(mat)
}

impl DisplaySurface for HighguiSurface {
    fn show(&mut self, window_id: &str, image: &RgbImage) -> Result<(), ViewerError> {
        if !self.windows.contains(window_id) {
            cv::named_window(window_id, cv::WINDOW_AUTOSIZE).map_err(cv_error)?;
            self.windows.insert(window_id.to_string());
        }
        let mat = to_bgr_mat(image)?;
        cv::imshow(window_id, &mat).map_err(cv_error)
    }

    fn poll_key(&mut self, wait: Duration) -> Result<Option<i32>, ViewerError> {
        let key = cv::wait_key(wait.as_millis().max(1) as i32).map_err(cv_error)?;
        Ok((key >= 0).then_some(key & 0xFF))
    }

    fn close_all(&mut self) -> Result<(), ViewerError> {
        self.windows.clear();
        cv::destroy_all_windows().map_err(cv_error)
    }
}
