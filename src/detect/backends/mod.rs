pub mod stub;

#[cfg(feature = "detect-opencv")]
pub mod haar;

pub use stub::StubClassifier;

#[cfg(feature = "detect-opencv")]
pub use haar::OpencvClassifier;
