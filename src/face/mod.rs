//! Face detection
//!
//! [`FaceDetector`] is the seam the selection pipeline talks to. The shipped
//! backend is [`CascadeDetector`], a multi-scale boosted Haar cascade whose
//! raw hits are clustered by neighbor count.

mod cascade;
mod detector;
mod grouping;

pub use cascade::CascadeModel;
pub use detector::{CascadeDetector, DetectionParams};

use crate::error::Result;
use image::DynamicImage;
use serde::Serialize;

/// Bounding box of a detected face, in pixels of the inspected image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct FaceRegion {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
    /// Number of raw detections merged into this region
    pub neighbors: u32,
}

/// Pluggable face detection backend.
///
/// Implementations must be usable from several requests at once.
pub trait FaceDetector: Send + Sync {
    /// Find every face in `image`.
    fn detect(&self, image: &DynamicImage) -> Result<Vec<FaceRegion>>;

    /// Whether `image` contains at least one face.
    fn has_face(&self, image: &DynamicImage) -> Result<bool> {
        Ok(!self.detect(image)?.is_empty())
    }
}
