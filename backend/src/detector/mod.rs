pub mod geometry;
pub mod remote;

use std::sync::Arc;

use async_trait::async_trait;
use ndarray::Array2;

pub use geometry::BoundingBox;
pub use remote::{RemoteDetector, RemoteDetectorConfig};

#[derive(Debug, thiserror::Error)]
pub enum DetectorError {
    #[error("detector service unavailable: {0}")]
    ServiceUnavailable(String),
    #[error("detector request failed: {0}")]
    RequestFailed(String),
    #[error("invalid detector response: {0}")]
    InvalidResponse(String),
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),
}

/// One keypoint of a pose estimate.
#[derive(Debug, Clone, Copy)]
pub struct Keypoint {
    pub x: f32,
    pub y: f32,
    pub confidence: f32,
}

/// A single detection: class label, confidence, box, and optionally a
/// dense mask (segmentation variants) or keypoints (pose).
#[derive(Debug, Clone)]
pub struct Detection {
    pub label: String,
    pub confidence: f32,
    pub bbox: BoundingBox,
    /// Membership weights in [0, 1]; spatial extent is the mask's own
    /// resolution, not necessarily the source image's.
    pub mask: Option<Array2<f32>>,
    pub keypoints: Option<Vec<Keypoint>>,
}

/// Whole-image class score (classification variant).
#[derive(Debug, Clone)]
pub struct ClassScore {
    pub label: String,
    pub confidence: f32,
}

#[derive(Debug, Clone, Default)]
pub struct Prediction {
    pub detections: Vec<Detection>,
    pub classes: Vec<ClassScore>,
}

/// Opaque boundary to the external detection/segmentation engine. Any
/// backend that can turn image bytes into boxes/masks/keypoints
/// satisfies this contract.
#[async_trait]
pub trait Detector: Send + Sync {
    async fn predict(&self, image_bytes: &[u8]) -> Result<Prediction, DetectorError>;
}

/// One detector handle per model role. The face_segment variant uses
/// `faces` and `segmentation` together.
#[derive(Clone)]
pub struct DetectorSet {
    pub objects: Arc<dyn Detector>,
    pub faces: Arc<dyn Detector>,
    pub segmentation: Arc<dyn Detector>,
    pub pose: Arc<dyn Detector>,
    pub classification: Arc<dyn Detector>,
}

impl DetectorSet {
    /// Builds the standard set against a single remote inference
    /// service, one logical model name per role.
    pub fn remote(config: &RemoteDetectorConfig) -> Result<Self, DetectorError> {
        Ok(Self {
            objects: Arc::new(RemoteDetector::new(config.clone(), "detect")?),
            faces: Arc::new(RemoteDetector::new(config.clone(), "face")?),
            segmentation: Arc::new(RemoteDetector::new(config.clone(), "segment")?),
            pose: Arc::new(RemoteDetector::new(config.clone(), "pose")?),
            classification: Arc::new(RemoteDetector::new(config.clone(), "classify")?),
        })
    }
}
