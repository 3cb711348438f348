//! Asset store backends.
//!
//! Defines the [`AssetStore`] trait and the Cloudinary implementation.
//! Uploads are content-addressed: the public id is derived from the SHA-256
//! of the image bytes, so uploading the same image twice yields the same
//! identifier and the store keeps a single copy (`overwrite=false`).
//!
//! Two upload modes are supported:
//!
//! - **Signed**, when `CLOUDINARY_API_SECRET` is set: parameters are signed
//!   with SHA-256 over the sorted `key=value` string plus the secret.
//! - **Unsigned**, otherwise: the configured `upload_preset` authorizes the
//!   upload.

use anyhow::{bail, Result};
use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use reqwest::StatusCode;
use serde::Deserialize;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use crate::config::{Credentials, UploaderConfig};
use crate::error::UploadError;
use crate::generator::excerpt;
use crate::models::{GeneratedAsset, GeneratedImage};

#[async_trait]
pub trait AssetStore: Send + Sync {
    fn name(&self) -> &str;

    /// Store `image` and return its durable public URL. One call, no retry.
    async fn upload(&self, image: &GeneratedImage) -> Result<GeneratedAsset, UploadError>;
}

pub struct CloudinaryStore {
    client: reqwest::Client,
    endpoint: String,
    cloud_name: String,
    api_key: String,
    api_secret: Option<String>,
    upload_preset: String,
    folder: Option<String>,
}

#[derive(Debug, Deserialize)]
struct UploadResponse {
    secure_url: Option<String>,
    url: Option<String>,
    bytes: Option<u64>,
    format: Option<String>,
    public_id: Option<String>,
}

impl CloudinaryStore {
    pub fn new(config: &UploaderConfig, credentials: &Credentials) -> Result<Self> {
        if credentials.cloudinary_cloud_name.trim().is_empty() {
            bail!("CLOUDINARY_CLOUD_NAME is empty");
        }
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            client,
            endpoint: config.endpoint.trim_end_matches('/').to_string(),
            cloud_name: credentials.cloudinary_cloud_name.clone(),
            api_key: credentials.cloudinary_api_key.clone(),
            api_secret: credentials.cloudinary_api_secret.clone(),
            upload_preset: config.upload_preset.clone(),
            folder: config
                .folder
                .as_deref()
                .map(|f| f.trim_matches('/').to_string())
                .filter(|f| !f.is_empty()),
        })
    }

    fn url(&self) -> String {
        format!("{}/{}/image/upload", self.endpoint, self.cloud_name)
    }

    fn public_id(&self, bytes: &[u8]) -> String {
        let hash = content_address(bytes);
        match &self.folder {
            Some(folder) => format!("{}/{}", folder, hash),
            None => hash,
        }
    }

    /// Form fields other than the file, in the order they are sent.
    fn fields(&self, public_id: &str) -> Vec<(&'static str, String)> {
        match &self.api_secret {
            Some(secret) => {
                let timestamp = chrono::Utc::now().timestamp().to_string();
                let signed = [
                    ("overwrite", "false".to_string()),
                    ("public_id", public_id.to_string()),
                    ("timestamp", timestamp),
                ];
                let signature = sign_params(&signed, secret);
                let mut fields = vec![("api_key", self.api_key.clone())];
                fields.extend(signed);
                fields.push(("signature", signature));
                fields.push(("signature_algorithm", "sha256".to_string()));
                fields
            }
            None => vec![
                ("upload_preset", self.upload_preset.clone()),
                ("api_key", self.api_key.clone()),
                ("public_id", public_id.to_string()),
            ],
        }
    }
}

#[async_trait]
impl AssetStore for CloudinaryStore {
    fn name(&self) -> &str {
        "cloudinary"
    }

    async fn upload(&self, image: &GeneratedImage) -> Result<GeneratedAsset, UploadError> {
        let public_id = self.public_id(&image.bytes);
        debug!(public_id = %public_id, bytes = image.bytes.len(), "uploading image");

        let file = Part::bytes(image.bytes.clone())
            .file_name(format!("{}.{}", content_address(&image.bytes), image.extension()))
            .mime_str(&image.mime_type)
            .map_err(|e| UploadError::Rejected {
                detail: format!("invalid content type {}: {}", image.mime_type, e),
            })?;
        let form = self
            .fields(&public_id)
            .into_iter()
            .fold(Form::new(), |form, (k, v)| form.text(k, v))
            .part("file", file);

        let response = self
            .client
            .post(self.url())
            .multipart(form)
            .send()
            .await
            .map_err(classify_transport)?;

        let status = response.status();
        let body = response.text().await.map_err(classify_transport)?;
        if !status.is_success() {
            return Err(classify_status(status, &body));
        }

        let parsed: UploadResponse =
            serde_json::from_str(&body).map_err(|e| UploadError::Unavailable {
                detail: format!("invalid JSON response: {}", e),
            })?;
        let url = parsed
            .secure_url
            .or(parsed.url)
            .filter(|u| !u.is_empty())
            .ok_or_else(|| UploadError::Unavailable {
                detail: "response has no URL".to_string(),
            })?;

        Ok(GeneratedAsset {
            url,
            content_type: parsed
                .format
                .map(|f| format!("image/{}", if f == "jpg" { "jpeg" } else { f.as_str() }))
                .unwrap_or_else(|| image.mime_type.clone()),
            byte_size: parsed.bytes.unwrap_or(image.bytes.len() as u64),
            public_id: parsed.public_id.unwrap_or(public_id),
        })
    }
}

/// First 32 hex characters of the SHA-256 of `bytes`.
pub fn content_address(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    let mut digest = hex::encode(hasher.finalize());
    digest.truncate(32);
    digest
}

/// Cloudinary request signature: hex SHA-256 of `k1=v1&k2=v2...` (keys
/// sorted) with the API secret appended.
pub fn sign_params(params: &[(&str, String)], secret: &str) -> String {
    let mut sorted: Vec<&(&str, String)> = params.iter().collect();
    sorted.sort_by(|a, b| a.0.cmp(b.0));
    let joined = sorted
        .iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect::<Vec<_>>()
        .join("&");
    let mut hasher = Sha256::new();
    hasher.update(joined.as_bytes());
    hasher.update(secret.as_bytes());
    hex::encode(hasher.finalize())
}

pub fn classify_status(status: StatusCode, body: &str) -> UploadError {
    let detail = format!("HTTP {}: {}", status.as_u16(), excerpt(body));
    match status.as_u16() {
        401 | 403 => UploadError::AuthError { detail },
        420 | 429 => UploadError::QuotaExceeded { detail },
        408 | 499 => UploadError::UploadTimeout { detail },
        s if s >= 500 => UploadError::Unavailable { detail },
        _ => UploadError::Rejected { detail },
    }
}

pub fn classify_transport(error: reqwest::Error) -> UploadError {
    let detail = error.to_string();
    if error.is_timeout() {
        UploadError::UploadTimeout { detail }
    } else {
        UploadError::Unavailable { detail }
    }
}

pub fn create_store(
    config: &UploaderConfig,
    credentials: &Credentials,
) -> Result<Arc<dyn AssetStore>> {
    match config.provider.as_str() {
        "cloudinary" => Ok(Arc::new(CloudinaryStore::new(config, credentials)?)),
        other => bail!("Unknown uploader provider: {}", other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn credentials(secret: Option<&str>) -> Credentials {
        Credentials {
            gemini_api_key: "g".to_string(),
            cloudinary_cloud_name: "demo".to_string(),
            cloudinary_api_key: "123".to_string(),
            cloudinary_api_secret: secret.map(str::to_string),
        }
    }

    #[test]
    fn test_content_address_is_stable() {
        let a = content_address(b"image bytes");
        assert_eq!(a.len(), 32);
        assert_eq!(a, content_address(b"image bytes"));
        assert_ne!(a, content_address(b"other bytes"));
        // sha256("abc")
        assert_eq!(content_address(b"abc"), "ba7816bf8f01cfea414140de5dae2223");
    }

    #[test]
    fn test_signature_sorts_keys() {
        let params = [
            ("timestamp", "1315060510".to_string()),
            ("public_id", "sample".to_string()),
        ];
        let reversed = [params[1].clone(), params[0].clone()];
        assert_eq!(sign_params(&params, "secret"), sign_params(&reversed, "secret"));

        let mut hasher = Sha256::new();
        hasher.update(b"public_id=sample&timestamp=1315060510secret");
        assert_eq!(sign_params(&params, "secret"), hex::encode(hasher.finalize()));
    }

    #[test]
    fn test_folder_prefixes_public_id() {
        let config = UploaderConfig {
            folder: Some("/blog/headers/".to_string()),
            ..UploaderConfig::default()
        };
        let store = CloudinaryStore::new(&config, &credentials(None)).unwrap();
        let id = store.public_id(b"x");
        assert!(id.starts_with("blog/headers/"));
        assert_eq!(id.len(), "blog/headers/".len() + 32);
    }

    #[test]
    fn test_signed_fields_when_secret_present() {
        let store =
            CloudinaryStore::new(&UploaderConfig::default(), &credentials(Some("s"))).unwrap();
        let names: Vec<&str> = store.fields("abc").iter().map(|(k, _)| *k).collect();
        assert_eq!(
            names,
            vec!["api_key", "overwrite", "public_id", "timestamp", "signature", "signature_algorithm"]
        );

        let unsigned = CloudinaryStore::new(&UploaderConfig::default(), &credentials(None)).unwrap();
        let names: Vec<&str> = unsigned.fields("abc").iter().map(|(k, _)| *k).collect();
        assert_eq!(names, vec!["upload_preset", "api_key", "public_id"]);
    }

    #[test]
    fn test_status_classification() {
        let classify = |code: u16| classify_status(StatusCode::from_u16(code).unwrap(), "");
        assert!(matches!(classify(401), UploadError::AuthError { .. }));
        assert!(matches!(classify(420), UploadError::QuotaExceeded { .. }));
        assert!(matches!(classify(429), UploadError::QuotaExceeded { .. }));
        assert!(matches!(classify(502), UploadError::Unavailable { .. }));
        assert!(matches!(classify(400), UploadError::Rejected { .. }));
        assert!(classify(503).is_retryable());
        assert!(!classify(400).is_retryable());
    }
}
