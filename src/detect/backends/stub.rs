use image::GrayImage;
use url::Url;

use crate::detect::classifier::{CascadeClassifier, CascadeParams};
use crate::error::ViewerError;
use crate::frame::DetectionRegion;

/// Stub classifier for testing. Reports a fixed set of regions on every frame.
///
/// Loaded from `stub://<name>?regions=x,y,w,h;x,y,w,h`. Without `regions` it
/// never finds anything. Regions below the minimum size are filtered the way a
/// real cascade would.
pub struct StubClassifier {
    regions: Vec<DetectionRegion>,
    calls: u64,
}

impl StubClassifier {
    pub fn new(regions: Vec<DetectionRegion>) -> Self {
        Self { regions, calls: 0 }
    }

    pub fn from_url(url: &str) -> Result<Self, ViewerError> {
        let invalid = |reason: &str| {
            ViewerError::Configuration(format!("invalid stub classifier '{}': {}", url, reason))
        };
        let parsed = Url::parse(url).map_err(|e| invalid(&e.to_string()))?;
        let mut regions = Vec::new();
        for (key, value) in parsed.query_pairs() {
            if key != "regions" {
                continue;
            }
            for spec in value.split(';').filter(|s| !s.trim().is_empty()) {
                let parts = spec
                    .split(',')
                    .map(|p| p.trim().parse::<u32>())
                    .collect::<Result<Vec<_>, _>>()
                    .map_err(|_| invalid("region values must be integers"))?;
                let [x, y, w, h] = parts[..] else {
                    return Err(invalid("regions are x,y,w,h"));
                };
                regions.push(DetectionRegion::new(x, y, w, h));
            }
        }
        Ok(Self::new(regions))
    }

    pub fn calls(&self) -> u64 {
        self.calls
    }
}

impl CascadeClassifier for StubClassifier {
    fn name(&self) -> &'static str {
        "stub"
    }

    fn detect_multi_scale(
        &mut self,
        gray: &GrayImage,
        params: &CascadeParams,
    ) -> Result<Vec<DetectionRegion>, ViewerError> {
        self.calls += 1;
        let (width, height) = gray.dimensions();
        let (min_w, min_h) = params.min_size;
        Ok(self
            .regions
            .iter()
            .copied()
            .filter(|r| r.width >= min_w && r.height >= min_h)
            .filter(|r| r.x + r.width <= width && r.y + r.height <= height)
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_regions_and_filters_small_ones() -> Result<(), ViewerError> {
        let mut stub = StubClassifier::from_url("stub://faces?regions=10,20,40,40;0,0,10,10")?;
        let gray = GrayImage::new(640, 480);
        let found = stub.detect_multi_scale(&gray, &CascadeParams::default())?;
        assert_eq!(found, vec![DetectionRegion::new(10, 20, 40, 40)]);
        assert_eq!(stub.calls(), 1);
        Ok(())
    }

    #[test]
    fn empty_stub_finds_nothing() -> Result<(), ViewerError> {
        let mut stub = StubClassifier::from_url("stub://none")?;
        let found = stub.detect_multi_scale(&GrayImage::new(640, 480), &CascadeParams::default())?;
        assert!(found.is_empty());
        Ok(())
    }

    #[test]
    fn malformed_regions_are_configuration_errors() {
        for url in ["stub://x?regions=1,2,3", "stub://x?regions=a,b,c,d"] {
            let err = StubClassifier::from_url(url).err().expect("must fail");
            assert!(err.is_configuration(), "{}", url);
        }
    }
}
