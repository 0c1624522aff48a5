//! Evidence image upload
//!
//! Best-effort: any failure (missing credentials, HTTP error, bad
//! response) yields a placeholder URL rather than an error, so a broken
//! upload path never blocks a violation record.

use std::sync::Arc;

use async_trait::async_trait;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use sha2::{Digest, Sha256};

use crate::config::UploadConfig;

/// URL recorded when the upload could not be performed
pub const PLACEHOLDER_URL: &str = "https://placehold.co/600x400?text=Upload+Failed";

/// URL recorded when no evidence frame could be captured
pub const NO_FRAME_URL: &str = "https://placehold.co/600x400?text=Camera+Error";

/// Uploads an encoded evidence image, returning its public URL
#[async_trait]
pub trait EvidenceUpload: Send + Sync {
    /// Upload a JPEG; never fails, degrades to a placeholder URL
    async fn upload(&self, jpeg: &[u8]) -> String;
}

/// Signed-upload client for a Cloudinary-style image host
pub struct CloudinaryUploader {
    client: reqwest::Client,
    config: UploadConfig,
}

impl CloudinaryUploader {
    /// Create an uploader; credentials may be absent (placeholder mode)
    #[must_use]
    pub fn new(config: UploadConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            config,
        }
    }

    async fn try_upload(&self, jpeg: &[u8]) -> Option<String> {
        let cloud_name = self.config.cloud_name.as_deref()?;
        let api_key = self.config.api_key.as_deref()?;
        let api_secret = self.config.api_secret.as_deref()?;

        let timestamp = chrono::Utc::now().timestamp().to_string();
        let signature = sign(&[("timestamp", &timestamp)], api_secret);

        let form = reqwest::multipart::Form::new()
            .text(
                "file",
                format!("data:image/jpeg;base64,{}", BASE64.encode(jpeg)),
            )
            .text("api_key", api_key.to_string())
            .text("timestamp", timestamp)
            .text("signature", signature)
            .text("signature_algorithm", "sha256");

        let response = self
            .client
            .post(format!(
                "https://api.cloudinary.com/v1_1/{cloud_name}/image/upload"
            ))
            .multipart(form)
            .send()
            .await
            .ok()?;

        if !response.status().is_success() {
            tracing::warn!(status = %response.status(), "evidence upload rejected");
            return None;
        }

        let body: serde_json::Value = response.json().await.ok()?;
        body.get("secure_url")?.as_str().map(String::from)
    }
}

#[async_trait]
impl EvidenceUpload for CloudinaryUploader {
    async fn upload(&self, jpeg: &[u8]) -> String {
        match self.try_upload(jpeg).await {
            Some(url) => url,
            None => {
                tracing::warn!("evidence upload failed, using placeholder");
                PLACEHOLDER_URL.to_string()
            }
        }
    }
}

/// Signature over the sorted parameter set plus the secret
fn sign(params: &[(&str, &str)], api_secret: &str) -> String {
    let mut sorted: Vec<_> = params.to_vec();
    sorted.sort_by_key(|&(k, _)| k);

    let to_sign: String = sorted
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join("&");

    let mut hasher = Sha256::new();
    hasher.update(to_sign.as_bytes());
    hasher.update(api_secret.as_bytes());
    hex::encode(hasher.finalize())
}

/// Evidence captured once per tool-call batch, uploaded at most once
///
/// Every candidate in a batch shares the same frame, and the upload URL
/// is memoized so a batch of N violations performs a single upload.
pub struct EvidenceFrame {
    jpeg: Option<Vec<u8>>,
    uploader: Arc<dyn EvidenceUpload>,
    url: tokio::sync::Mutex<Option<String>>,
}

impl EvidenceFrame {
    /// Wrap an already-encoded JPEG; `None` means no frame was available
    #[must_use]
    pub fn new(jpeg: Option<Vec<u8>>, uploader: Arc<dyn EvidenceUpload>) -> Self {
        Self {
            jpeg,
            uploader,
            url: tokio::sync::Mutex::new(None),
        }
    }

    /// Resolve the evidence URL, uploading on first call only
    pub async fn url(&self) -> String {
        let mut cached = self.url.lock().await;
        if let Some(url) = cached.as_ref() {
            return url.clone();
        }
        let url = match self.jpeg.as_deref() {
            Some(jpeg) => self.uploader.upload(jpeg).await,
            None => NO_FRAME_URL.to_string(),
        };
        *cached = Some(url.clone());
        url
    }
}
