//! Multi-scale cascade face detector
//!
//! Scans a scale pyramid of the luma image with a [`CascadeModel`] and groups
//! overlapping hits into faces the way OpenCV's `detectMultiScale` does.

use super::cascade::{CascadeModel, IntegralImage};
use super::grouping::{group_rectangles, Rect, GROUP_EPS};
use super::{FaceDetector, FaceRegion};
use crate::error::{Error, Result};
use image::imageops::{self, FilterType};
use image::{DynamicImage, GrayImage};
use std::path::Path;
use std::sync::Arc;

/// Multi-scale scan settings
#[derive(Debug, Clone, PartialEq)]
pub struct DetectionParams {
    /// Pyramid scale factor between successive passes, must be > 1
    pub scale_step: f64,
    /// A cluster of hits counts as a face only above this many members
    pub min_neighbors: u32,
    /// Smallest face edge in pixels of the inspected image, 0 for no limit
    pub min_face_size: u32,
    /// Images are downscaled so their longest side fits this, 0 disables
    pub max_image_side: u32,
    /// Skip windows whose pixel standard deviation is at or below this, 0 scans all
    pub min_window_stddev: f64,
}

impl Default for DetectionParams {
    fn default() -> Self {
        Self {
            scale_step: 1.1,
            min_neighbors: 4,
            min_face_size: 0,
            max_image_side: 1024,
            min_window_stddev: 0.0,
        }
    }
}

impl DetectionParams {
    pub fn validate(&self) -> Result<()> {
        if !self.scale_step.is_finite() || self.scale_step <= 1.0 {
            return Err(Error::Config {
                reason: format!("scale step must be greater than 1, got {}", self.scale_step),
            });
        }
        if !self.min_window_stddev.is_finite() || self.min_window_stddev < 0.0 {
            return Err(Error::Config {
                reason: format!(
                    "minimum window stddev must be a non-negative number, got {}",
                    self.min_window_stddev
                ),
            });
        }
        Ok(())
    }
}

/// Face detector backed by a Haar cascade model.
///
/// The model is loaded once and shared; cloning the detector is cheap.
#[derive(Debug, Clone)]
pub struct CascadeDetector {
    model: Arc<CascadeModel>,
    params: DetectionParams,
}

impl CascadeDetector {
    pub fn new(model: CascadeModel, params: DetectionParams) -> Result<Self> {
        params.validate()?;
        Ok(Self {
            model: Arc::new(model),
            params,
        })
    }

    /// Load the cascade at `path` and build a detector around it
    pub fn from_file<P: AsRef<Path>>(path: P, params: DetectionParams) -> Result<Self> {
        Self::new(CascadeModel::load(path)?, params)
    }

    pub fn params(&self) -> &DetectionParams {
        &self.params
    }

    /// Raw window hits over the scale pyramid, in `gray` coordinates
    fn scan(&self, gray: &GrayImage) -> Vec<Rect> {
        let (win_w, win_h) = self.model.window_size();
        let (img_w, img_h) = (gray.width() as f64, gray.height() as f64);
        let min_size = self.params.min_face_size as f64;
        let min_stddev = self.params.min_window_stddev;
        let mut hits = Vec::new();

        let mut factor = 1.0f64;
        loop {
            let scaled_w = (img_w / factor).round() as usize;
            let scaled_h = (img_h / factor).round() as usize;
            if scaled_w < win_w || scaled_h < win_h {
                break;
            }

            let face_w = (win_w as f64 * factor).round();
            let face_h = (win_h as f64 * factor).round();
            if face_w >= min_size && face_h >= min_size {
                let resized;
                let scaled: &GrayImage = if factor == 1.0 {
                    gray
                } else {
                    resized = imageops::resize(
                        gray,
                        scaled_w as u32,
                        scaled_h as u32,
                        FilterType::Triangle,
                    );
                    &resized
                };

                let integral = IntegralImage::new(scaled);
                let step = if factor > 2.0 { 1 } else { 2 };
                for y in (0..=scaled_h - win_h).step_by(step) {
                    for x in (0..=scaled_w - win_w).step_by(step) {
                        if self.model.accepts(&integral, x, y, min_stddev) {
                            hits.push(Rect {
                                x: (x as f64 * factor).round() as i32,
                                y: (y as f64 * factor).round() as i32,
                                width: face_w as i32,
                                height: face_h as i32,
                            });
                        }
                    }
                }
            }

            factor *= self.params.scale_step;
        }

        hits
    }
}

/// Downscale `gray` so its longest side is at most `max_side`.
///
/// Returns the image to scan and the factor mapping its coordinates back.
fn fit_longest_side(gray: GrayImage, max_side: u32) -> (GrayImage, f64) {
    let longest = gray.width().max(gray.height());
    if max_side == 0 || longest <= max_side {
        return (gray, 1.0);
    }

    let ratio = longest as f64 / max_side as f64;
    let width = ((gray.width() as f64 / ratio).round() as u32).max(1);
    let height = ((gray.height() as f64 / ratio).round() as u32).max(1);
    let resized = imageops::resize(&gray, width, height, FilterType::Triangle);
    (resized, ratio)
}

impl FaceDetector for CascadeDetector {
    fn detect(&self, image: &DynamicImage) -> Result<Vec<FaceRegion>> {
        let (gray, ratio) = fit_longest_side(image.to_luma8(), self.params.max_image_side);
        let hits = self.scan(&gray);
        let grouped = group_rectangles(&hits, self.params.min_neighbors, GROUP_EPS);

        tracing::trace!(
            width = image.width(),
            height = image.height(),
            hits = hits.len(),
            faces = grouped.len(),
            "Cascade scan finished"
        );

        let to_source = |v: i32| (v.max(0) as f64 * ratio).round() as u32;
        Ok(grouped
            .into_iter()
            .map(|(rect, neighbors)| FaceRegion {
                x: to_source(rect.x),
                y: to_source(rect.y),
                width: to_source(rect.width),
                height: to_source(rect.height),
                neighbors,
            })
            .collect())
    }
}
