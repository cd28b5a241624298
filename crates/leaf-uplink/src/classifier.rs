use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ClassifierConfig {
    pub url: String,
    pub timeout_ms: u64,
    /// Side of the square crop the service expects.
    pub input_size: u32,
    pub jpeg_quality: u8,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            url: "http://127.0.0.1:5000/api/upload_detect".into(),
            timeout_ms: 10_000,
            input_size: 224,
            jpeg_quality: 90,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Classification {
    pub disease: String,
    pub severity: f32,
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ClassifyError {
    #[error("classification timed out after {0}ms")]
    Timeout(u64),
    #[error("classification service returned HTTP {0}")]
    Status(u16),
    #[error("classification request failed: {0}")]
    Transport(String),
    #[error("classification response invalid: {0}")]
    Decode(String),
}

/// External disease-classification service.
#[async_trait]
pub trait Classifier: Send + Sync {
    async fn classify(&self, jpeg: Vec<u8>) -> Result<Classification, ClassifyError>;
}

/// Bounds any classifier call, whatever its own transport does.
pub async fn classify_with_timeout(
    classifier: &dyn Classifier,
    jpeg: Vec<u8>,
    timeout: Duration,
) -> Result<Classification, ClassifyError> {
    match tokio::time::timeout(timeout, classifier.classify(jpeg)).await {
        Ok(res) => res,
        Err(_) => Err(ClassifyError::Timeout(timeout.as_millis() as u64)),
    }
}

#[derive(Debug, Deserialize)]
struct WireResponse {
    disease: Option<String>,
    severity: Option<f32>,
    error: Option<String>,
}

/// Posts a JPEG as multipart field `image` and reads `{disease, severity}` back.
pub struct HttpClassifier {
    client: reqwest::Client,
    url: String,
    timeout_ms: u64,
}

impl HttpClassifier {
    pub fn new(cfg: &ClassifierConfig) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(cfg.timeout_ms))
            .build()?;
        Ok(Self { client, url: cfg.url.clone(), timeout_ms: cfg.timeout_ms })
    }

    fn map_err(&self, e: reqwest::Error) -> ClassifyError {
        if e.is_timeout() {
            ClassifyError::Timeout(self.timeout_ms)
        } else {
            ClassifyError::Transport(e.to_string())
        }
    }
}

#[async_trait]
impl Classifier for HttpClassifier {
    async fn classify(&self, jpeg: Vec<u8>) -> Result<Classification, ClassifyError> {
        let part = Part::bytes(jpeg)
            .file_name("leaf.jpg")
            .mime_str("image/jpeg")
            .map_err(|e| ClassifyError::Transport(e.to_string()))?;
        let form = Form::new().part("image", part);

        let resp = self
            .client
            .post(&self.url)
            .multipart(form)
            .send()
            .await
            .map_err(|e| self.map_err(e))?;

        let status = resp.status();
        if !status.is_success() {
            return Err(ClassifyError::Status(status.as_u16()));
        }

        let body = resp.bytes().await.map_err(|e| self.map_err(e))?;
        let wire: WireResponse =
            serde_json::from_slice(&body).map_err(|e| ClassifyError::Decode(e.to_string()))?;
        if let Some(err) = wire.error {
            return Err(ClassifyError::Decode(format!("service error: {}", err)));
        }
        let severity = wire
            .severity
            .ok_or_else(|| ClassifyError::Decode("missing severity".into()))?;
        let disease = wire.disease.unwrap_or_else(|| "unknown".into());
        debug!("classifier: {} severity={:.1}", disease, severity);
        Ok(Classification { disease, severity })
    }
}
