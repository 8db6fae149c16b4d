use std::time::Duration;

use accident_watch_common::frame::Frame;
use serde::Deserialize;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// One detected object in a frame.
#[derive(Debug, Clone, Deserialize)]
pub struct Detection {
    pub class_id: u32,
    pub confidence: f32,
    /// `[x, y, width, height]` in pixels; informational only, the gating
    /// decision never looks at geometry.
    #[serde(default)]
    pub bbox: [f32; 4],
}

/// An object-detection model: given a frame, return what it sees.
///
/// The model itself is an external collaborator — this trait is the seam
/// that lets the capture loop run against the real inference backend or a
/// test double.
pub trait Detector {
    async fn detect(&mut self, frame: &Frame) -> Result<Vec<Detection>, DetectError>;
}

#[derive(Debug, thiserror::Error)]
pub enum DetectError {
    #[error("failed to build inference client: {0}")]
    Client(reqwest::Error),
    #[error("inference request failed: {0}")]
    Request(reqwest::Error),
    #[error("inference endpoint returned HTTP status {0}")]
    Status(u16),
    #[error("failed to decode inference response: {0}")]
    Decode(#[from] serde_json::Error),
}

#[derive(Debug, Deserialize)]
struct DetectResponse {
    detections: Vec<Detection>,
}

/// Detector backed by an HTTP model server: POSTs the JPEG body to the
/// configured endpoint and parses a JSON detection list.
pub struct HttpDetector {
    client: reqwest::Client,
    url: String,
}

impl HttpDetector {
    pub fn new(url: &str) -> Result<Self, DetectError> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(DetectError::Client)?;
        Ok(Self {
            client,
            url: url.to_string(),
        })
    }
}

impl Detector for HttpDetector {
    async fn detect(&mut self, frame: &Frame) -> Result<Vec<Detection>, DetectError> {
        let response = self
            .client
            .post(&self.url)
            .header(reqwest::header::CONTENT_TYPE, "image/jpeg")
            .body(frame.jpeg.clone())
            .send()
            .await
            .map_err(DetectError::Request)?;

        if !response.status().is_success() {
            return Err(DetectError::Status(response.status().as_u16()));
        }

        let body = response.bytes().await.map_err(DetectError::Request)?;
        let parsed: DetectResponse = serde_json::from_slice(&body)?;
        Ok(parsed.detections)
    }
}
