mod backends;
mod classifier;
mod face;
mod loader;

pub use backends::StubClassifier;
#[cfg(feature = "detect-opencv")]
pub use backends::OpencvClassifier;
pub use classifier::{CascadeClassifier, CascadeParams};
pub use face::{prepare, rescale, FaceDetector, CANONICAL_HEIGHT, CANONICAL_WIDTH};
pub use loader::{ClassifierLoader, ModelLoader};
