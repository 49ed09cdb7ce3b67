//! Boosted Haar cascade model
//!
//! The model format is OpenCV's cascade classifier layout (`stageType BOOST`,
//! `featureType HAAR`) serialized as JSON, e.g. by re-saving
//! `haarcascade_frontalface_default.xml` through `cv::FileStorage` with a
//! `.json` target. The top-level `"cascade"` wrapper is optional.

use crate::error::{Error, Result};
use image::GrayImage;
use serde::Deserialize;
use std::path::Path;

/// Tolerance OpenCV applies when comparing a stage sum to its threshold
const STAGE_THRESHOLD_EPS: f64 = 1e-5;

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ModelFile {
    Wrapped { cascade: RawCascade },
    Bare(RawCascade),
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawCascade {
    #[serde(default)]
    stage_type: Option<String>,
    #[serde(default)]
    feature_type: Option<String>,
    width: u32,
    height: u32,
    stages: Vec<RawStage>,
    features: Vec<RawFeature>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawStage {
    stage_threshold: f64,
    weak_classifiers: Vec<RawWeakClassifier>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawWeakClassifier {
    internal_nodes: Vec<f64>,
    leaf_values: Vec<f64>,
}

#[derive(Debug, Deserialize)]
struct RawFeature {
    rects: Vec<RawRect>,
    #[serde(default)]
    tilted: u8,
}

/// A rect is `[x, y, width, height, weight]`, either as numbers or as the
/// space separated text OpenCV uses in XML
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawRect {
    Numbers(Vec<f64>),
    Text(String),
}

impl RawRect {
    fn values(&self) -> std::result::Result<Vec<f64>, String> {
        match self {
            RawRect::Numbers(values) => Ok(values.clone()),
            RawRect::Text(text) => text
                .split_whitespace()
                .map(|v| v.parse::<f64>().map_err(|e| format!("bad rect value {:?}: {}", v, e)))
                .collect(),
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct WeightedRect {
    x: usize,
    y: usize,
    width: usize,
    height: usize,
    weight: f64,
}

#[derive(Debug, Clone)]
struct Feature {
    rects: Vec<WeightedRect>,
}

#[derive(Debug, Clone, Copy)]
struct Node {
    /// Child index when positive, otherwise the negated leaf index
    left: i32,
    right: i32,
    feature: usize,
    threshold: f64,
}

#[derive(Debug, Clone)]
struct WeakClassifier {
    nodes: Vec<Node>,
    leaves: Vec<f64>,
}

#[derive(Debug, Clone)]
struct Stage {
    threshold: f64,
    classifiers: Vec<WeakClassifier>,
}

/// A validated, immutable cascade model
#[derive(Debug, Clone)]
pub struct CascadeModel {
    width: usize,
    height: usize,
    stages: Vec<Stage>,
    features: Vec<Feature>,
}

impl CascadeModel {
    /// Load a cascade model from a JSON file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let model_error = |reason: String| Error::ModelLoad {
            path: path.display().to_string(),
            reason,
        };

        let text = std::fs::read_to_string(path).map_err(|e| model_error(e.to_string()))?;
        let model = Self::build(&text).map_err(model_error)?;

        tracing::info!(
            path = %path.display(),
            stages = model.stages.len(),
            features = model.features.len(),
            window = %format!("{}x{}", model.width, model.height),
            "Loaded face cascade"
        );
        Ok(model)
    }

    /// Parse a cascade model from JSON text
    pub fn from_json(text: &str) -> Result<Self> {
        Self::build(text).map_err(|reason| Error::ModelLoad {
            path: "<inline>".to_string(),
            reason,
        })
    }

    /// Detection window size as (width, height)
    pub fn window_size(&self) -> (usize, usize) {
        (self.width, self.height)
    }

    pub fn stage_count(&self) -> usize {
        self.stages.len()
    }

    fn build(text: &str) -> std::result::Result<Self, String> {
        let raw = match serde_json::from_str::<ModelFile>(text).map_err(|e| e.to_string())? {
            ModelFile::Wrapped { cascade } => cascade,
            ModelFile::Bare(cascade) => cascade,
        };

        if let Some(stage_type) = raw.stage_type.as_deref() {
            if stage_type != "BOOST" {
                return Err(format!("unsupported stage type {}", stage_type));
            }
        }
        if let Some(feature_type) = raw.feature_type.as_deref() {
            if feature_type != "HAAR" {
                return Err(format!("unsupported feature type {}", feature_type));
            }
        }
        if raw.width < 3 || raw.height < 3 {
            return Err(format!("window {}x{} is too small", raw.width, raw.height));
        }
        if raw.stages.is_empty() {
            return Err("cascade has no stages".to_string());
        }

        let (width, height) = (raw.width as usize, raw.height as usize);
        let features = raw
            .features
            .iter()
            .enumerate()
            .map(|(i, f)| Self::build_feature(f, width, height).map_err(|e| format!("feature {}: {}", i, e)))
            .collect::<std::result::Result<Vec<_>, _>>()?;

        let stages = raw
            .stages
            .iter()
            .enumerate()
            .map(|(i, s)| {
                let classifiers = s
                    .weak_classifiers
                    .iter()
                    .map(|wc| Self::build_classifier(wc, features.len()))
                    .collect::<std::result::Result<Vec<_>, _>>()
                    .map_err(|e| format!("stage {}: {}", i, e))?;
                Ok(Stage {
                    threshold: s.stage_threshold,
                    classifiers,
                })
            })
            .collect::<std::result::Result<Vec<_>, String>>()?;

        Ok(Self {
            width,
            height,
            stages,
            features,
        })
    }

    fn build_feature(
        raw: &RawFeature,
        width: usize,
        height: usize,
    ) -> std::result::Result<Feature, String> {
        if raw.tilted != 0 {
            return Err("tilted features are not supported".to_string());
        }
        if raw.rects.is_empty() {
            return Err("feature has no rects".to_string());
        }

        let mut rects = Vec::with_capacity(raw.rects.len());
        for rect in &raw.rects {
            let v = rect.values()?;
            if v.len() != 5 {
                return Err(format!("rect needs 5 values, got {}", v.len()));
            }
            if v[..4].iter().any(|&n| n < 0.0 || n.fract() != 0.0) {
                return Err(format!("rect geometry {:?} is not whole pixels", &v[..4]));
            }
            let r = WeightedRect {
                x: v[0] as usize,
                y: v[1] as usize,
                width: v[2] as usize,
                height: v[3] as usize,
                weight: v[4],
            };
            if r.x + r.width > width || r.y + r.height > height {
                return Err(format!("rect {:?} exceeds the window", &v[..4]));
            }
            rects.push(r);
        }
        Ok(Feature { rects })
    }

    fn build_classifier(
        raw: &RawWeakClassifier,
        feature_count: usize,
    ) -> std::result::Result<WeakClassifier, String> {
        if raw.internal_nodes.is_empty() || raw.internal_nodes.len() % 4 != 0 {
            return Err(format!(
                "internalNodes length {} is not a multiple of 4",
                raw.internal_nodes.len()
            ));
        }

        let leaves = raw.leaf_values.clone();
        let node_count = raw.internal_nodes.len() / 4;
        let mut nodes = Vec::with_capacity(node_count);
        for (i, chunk) in raw.internal_nodes.chunks(4).enumerate() {
            let node = Node {
                left: chunk[0] as i32,
                right: chunk[1] as i32,
                feature: chunk[2] as usize,
                threshold: chunk[3],
            };
            if chunk[2] < 0.0 || node.feature >= feature_count {
                return Err(format!("node {} references missing feature {}", i, chunk[2]));
            }
            for child in [node.left, node.right] {
                // Children must point forward so evaluation always terminates
                let valid = if child > 0 {
                    (child as usize) > i && (child as usize) < node_count
                } else {
                    ((-child) as usize) < leaves.len()
                };
                if !valid {
                    return Err(format!("node {} has invalid child {}", i, child));
                }
            }
            nodes.push(node);
        }

        Ok(WeakClassifier { nodes, leaves })
    }

    /// Run every stage on the window whose top-left corner is (x, y).
    ///
    /// The window must lie inside the integral image. Windows whose pixel
    /// standard deviation is at or below `min_stddev` are rejected before any
    /// stage runs; 0 keeps OpenCV's behavior of scanning every window.
    pub(crate) fn accepts(
        &self,
        integral: &IntegralImage,
        x: usize,
        y: usize,
        min_stddev: f64,
    ) -> bool {
        // Normalization uses the window minus a one pixel border
        let (nx, ny, nw, nh) = (x + 1, y + 1, self.width - 2, self.height - 2);
        let area = (nw * nh) as f64;
        let sum = integral.sum(nx, ny, nw, nh) as f64;
        let sq_sum = integral.squared_sum(nx, ny, nw, nh) as f64;

        let variance = area * sq_sum - sum * sum;
        // nf is area * stddev, and 1 for a perfectly flat window
        let nf = if variance > 0.0 { variance.sqrt() } else { 1.0 };
        if min_stddev > 0.0 && nf <= area * min_stddev {
            return false;
        }
        let norm = 1.0 / nf;

        self.stages.iter().all(|stage| {
            let total: f64 = stage
                .classifiers
                .iter()
                .map(|wc| self.classify(wc, integral, x, y, norm))
                .sum();
            total >= stage.threshold - STAGE_THRESHOLD_EPS
        })
    }

    fn classify(
        &self,
        classifier: &WeakClassifier,
        integral: &IntegralImage,
        x: usize,
        y: usize,
        norm: f64,
    ) -> f64 {
        let mut idx = 0i32;
        loop {
            let node = &classifier.nodes[idx as usize];
            let value = self.feature_value(node.feature, integral, x, y) * norm;
            idx = if value < node.threshold {
                node.left
            } else {
                node.right
            };
            if idx <= 0 {
                return classifier.leaves[(-idx) as usize];
            }
        }
    }

    fn feature_value(&self, feature: usize, integral: &IntegralImage, x: usize, y: usize) -> f64 {
        self.features[feature]
            .rects
            .iter()
            .map(|r| r.weight * integral.sum(x + r.x, y + r.y, r.width, r.height) as f64)
            .sum()
    }
}

/// Summed-area tables of pixel values and squared pixel values
pub(crate) struct IntegralImage {
    stride: usize,
    sum: Vec<u64>,
    squared: Vec<u64>,
}

impl IntegralImage {
    pub(crate) fn new(image: &GrayImage) -> Self {
        let (w, h) = (image.width() as usize, image.height() as usize);
        let stride = w + 1;
        let mut sum = vec![0u64; stride * (h + 1)];
        let mut squared = vec![0u64; stride * (h + 1)];

        for y in 0..h {
            let mut row_sum = 0u64;
            let mut row_squared = 0u64;
            for x in 0..w {
                let v = image.get_pixel(x as u32, y as u32).0[0] as u64;
                row_sum += v;
                row_squared += v * v;
                let at = (y + 1) * stride + x + 1;
                sum[at] = sum[at - stride] + row_sum;
                squared[at] = squared[at - stride] + row_squared;
            }
        }

        Self {
            stride,
            sum,
            squared,
        }
    }

    fn area(table: &[u64], stride: usize, x: usize, y: usize, w: usize, h: usize) -> u64 {
        let a = table[y * stride + x];
        let b = table[y * stride + x + w];
        let c = table[(y + h) * stride + x];
        let d = table[(y + h) * stride + x + w];
        d + a - b - c
    }

    pub(crate) fn sum(&self, x: usize, y: usize, w: usize, h: usize) -> u64 {
        Self::area(&self.sum, self.stride, x, y, w, h)
    }

    pub(crate) fn squared_sum(&self, x: usize, y: usize, w: usize, h: usize) -> u64 {
        Self::area(&self.squared, self.stride, x, y, w, h)
    }
}
