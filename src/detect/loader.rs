use std::fs::File;
use std::path::PathBuf;

use crate::error::ViewerError;

use super::backends::StubClassifier;
use super::classifier::CascadeClassifier;

/// Loads a classifier model. Each worker that needs detection calls `load`
/// from its own thread, so every worker owns a private classifier.
pub trait ClassifierLoader: Send + Sync {
    fn load(&self) -> Result<Box<dyn CascadeClassifier>, ViewerError>;
}

/// Loads a cascade from a model file, or a stub from a `stub://` location.
#[derive(Clone, Debug)]
pub struct ModelLoader {
    location: String,
}

impl ModelLoader {
    pub fn new(location: impl Into<String>) -> Self {
        Self {
            location: location.into(),
        }
    }

    pub fn location(&self) -> &str {
        &self.location
    }
}

impl ClassifierLoader for ModelLoader {
    fn load(&self) -> Result<Box<dyn CascadeClassifier>, ViewerError> {
        if self.location.starts_with("stub://") {
            return Ok(Box::new(StubClassifier::from_url(&self.location)?));
        }

        let path = PathBuf::from(&self.location);
        File::open(&path).map_err(|e| {
            ViewerError::Configuration(format!(
                "cannot read cascade model {}: {}",
                path.display(),
                e
            ))
        })?;

        #[cfg(feature = "detect-opencv")]
        {
            Ok(Box::new(super::backends::OpencvClassifier::load(&path)?))
        }
        #[cfg(not(feature = "detect-opencv"))]
        {
            Err(ViewerError::Configuration(format!(
                "cascade model {} requires the detect-opencv feature",
                path.display()
            )))
        }
    }
}
