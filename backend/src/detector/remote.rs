//! HTTP client for the external inference service.

use std::time::Duration;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use ndarray::Array2;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use super::{BoundingBox, ClassScore, Detection, Detector, DetectorError, Keypoint, Prediction};

#[derive(Debug, Clone)]
pub struct RemoteDetectorConfig {
    /// Base URL of the inference service.
    pub base_url: String,
    /// Per-request timeout.
    pub timeout: Duration,
}

impl Default for RemoteDetectorConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8001".to_string(),
            timeout: Duration::from_secs(120),
        }
    }
}

impl RemoteDetectorConfig {
    pub fn from_env() -> Self {
        Self {
            base_url: std::env::var("DETECTOR_URL")
                .unwrap_or_else(|_| "http://localhost:8001".to_string()),
            timeout: Duration::from_secs(
                std::env::var("DETECTOR_TIMEOUT")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(120),
            ),
        }
    }
}

#[derive(Serialize)]
struct PredictRequest<'a> {
    model: &'a str,
    image: String,
}

#[derive(Deserialize)]
struct WireMask {
    width: usize,
    height: usize,
    data: Vec<f32>,
}

#[derive(Deserialize)]
struct WireDetection {
    label: String,
    confidence: f32,
    #[serde(rename = "box")]
    bbox: [f32; 4],
    #[serde(default)]
    mask: Option<WireMask>,
    #[serde(default)]
    keypoints: Option<Vec<[f32; 3]>>,
}

#[derive(Deserialize)]
struct PredictResponse {
    #[serde(default)]
    detections: Vec<WireDetection>,
    #[serde(default)]
    classes: Vec<WireClassScore>,
}

#[derive(Deserialize)]
struct WireClassScore {
    label: String,
    confidence: f32,
}

/// `Detector` backed by a remote model, selected by logical name.
pub struct RemoteDetector {
    http: Client,
    base_url: String,
    model: &'static str,
}

impl RemoteDetector {
    pub fn new(config: RemoteDetectorConfig, model: &'static str) -> Result<Self, DetectorError> {
        let http = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(DetectorError::Network)?;
        Ok(Self {
            http,
            base_url: config.base_url,
            model,
        })
    }

    fn decode(&self, response: PredictResponse) -> Result<Prediction, DetectorError> {
        let mut detections = Vec::with_capacity(response.detections.len());
        for wire in response.detections {
            let [x1, y1, x2, y2] = wire.bbox;
            let mask = match wire.mask {
                Some(m) => Some(
                    Array2::from_shape_vec((m.height, m.width), m.data).map_err(|e| {
                        DetectorError::InvalidResponse(format!("mask shape mismatch: {}", e))
                    })?,
                ),
                None => None,
            };
            let keypoints = wire
                .keypoints
                .map(|kps| {
                    kps.into_iter()
                        .map(|[x, y, confidence]| Keypoint { x, y, confidence })
                        .collect()
                });
            detections.push(Detection {
                label: wire.label,
                confidence: wire.confidence,
                bbox: BoundingBox::new(x1, y1, x2, y2),
                mask,
                keypoints,
            });
        }
        let classes = response
            .classes
            .into_iter()
            .map(|c| ClassScore {
                label: c.label,
                confidence: c.confidence,
            })
            .collect();
        Ok(Prediction {
            detections,
            classes,
        })
    }
}

#[async_trait::async_trait]
impl Detector for RemoteDetector {
    async fn predict(&self, image_bytes: &[u8]) -> Result<Prediction, DetectorError> {
        let url = format!("{}/predict", self.base_url);
        let request = PredictRequest {
            model: self.model,
            image: BASE64.encode(image_bytes),
        };

        log::debug!("sending {} prediction request to {}", self.model, url);

        let response = self
            .http
            .post(&url)
            .json(&request)
            .send()
            .await
            .map_err(DetectorError::Network)?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            if status.as_u16() == 503 {
                return Err(DetectorError::ServiceUnavailable(body));
            }
            return Err(DetectorError::RequestFailed(format!(
                "detector returned {}: {}",
                status, body
            )));
        }

        let decoded: PredictResponse = response
            .json()
            .await
            .map_err(|e| DetectorError::InvalidResponse(e.to_string()))?;
        self.decode(decoded)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_maps_boxes_masks_and_keypoints() {
        let detector = RemoteDetector::new(RemoteDetectorConfig::default(), "segment").unwrap();
        let response = PredictResponse {
            detections: vec![WireDetection {
                label: "person".to_string(),
                confidence: 0.87,
                bbox: [0.0, 0.0, 100.0, 100.0],
                mask: Some(WireMask {
                    width: 2,
                    height: 3,
                    data: vec![0.0, 0.1, 0.2, 0.3, 0.4, 0.5],
                }),
                keypoints: Some(vec![[5.0, 6.0, 0.9]]),
            }],
            classes: vec![],
        };
        let prediction = detector.decode(response).unwrap();
        assert_eq!(prediction.detections.len(), 1);
        let det = &prediction.detections[0];
        assert_eq!(det.label, "person");
        let mask = det.mask.as_ref().unwrap();
        assert_eq!(mask.dim(), (3, 2));
        assert_eq!(mask[[2, 1]], 0.5);
        assert_eq!(det.keypoints.as_ref().unwrap()[0].confidence, 0.9);
    }

    #[test]
    fn wire_response_parses_from_service_json() {
        let raw = r#"{
            "detections": [
                {"label": "face", "confidence": 0.91, "box": [10.0, 10.0, 30.0, 30.0]}
            ],
            "classes": [{"label": "tabby", "confidence": 0.87}]
        }"#;
        let response: PredictResponse = serde_json::from_str(raw).unwrap();
        assert_eq!(response.detections.len(), 1);
        assert_eq!(response.detections[0].bbox, [10.0, 10.0, 30.0, 30.0]);
        assert!(response.detections[0].mask.is_none());
        assert!(response.detections[0].keypoints.is_none());
        assert_eq!(response.classes[0].label, "tabby");
    }

    #[test]
    fn decode_rejects_inconsistent_mask_shape() {
        let detector = RemoteDetector::new(RemoteDetectorConfig::default(), "segment").unwrap();
        let response = PredictResponse {
            detections: vec![WireDetection {
                label: "person".to_string(),
                confidence: 0.5,
                bbox: [0.0, 0.0, 1.0, 1.0],
                mask: Some(WireMask {
                    width: 4,
                    height: 4,
                    data: vec![0.0; 3],
                }),
                keypoints: None,
            }],
            classes: vec![],
        };
        assert!(matches!(
            detector.decode(response),
            Err(DetectorError::InvalidResponse(_))
        ));
    }
}
