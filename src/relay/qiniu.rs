//! Qiniu object storage relay.
//!
//! Downloads an image, stores it under a content-addressed key and returns
//! the HTTPS URL on the configured domain.

use std::path::Path;
use std::time::Duration;

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE;
use hmac::{Hmac, Mac};
use reqwest::blocking::multipart::{Form, Part};
use reqwest::header::CONTENT_TYPE;
use serde_json::{Value, json};
use sha1::Sha1;
use sha2::{Digest, Sha256};
use thiserror::Error;
use time::OffsetDateTime;
use tracing::{info, warn};

use crate::config::QiniuConfig;

use super::ObjectRelay;

/// Default upload endpoint.
pub const DEFAULT_UPLOAD_HOST: &str = "https://upload.qiniup.com";

/// Lifetime of an upload token, in seconds.
const TOKEN_TTL_SECS: i64 = 3600;

const DEFAULT_EXTENSION: &str = ".jpg";

type HmacSha1 = Hmac<Sha1>;

/// Errors from downloading or uploading a single object.
#[derive(Debug, Error)]
pub enum RelayError {
    #[error("Qiniu configuration is incomplete: {0}")]
    InvalidConfig(String),

    #[error("Download failed: {0}")]
    Download(#[source] reqwest::Error),

    #[error("Upload failed: {0}")]
    Upload(#[source] reqwest::Error),

    #[error("Upload rejected with status {status}: {body}")]
    UploadRejected { status: u16, body: String },

    #[error("Upload stored key {actual:?}, expected {expected:?}")]
    KeyMismatch { expected: String, actual: String },

    #[error("Failed to sign upload policy")]
    Signing,
}

/// Signs an upload policy for `bucket:key` expiring at `deadline`.
///
/// The token has the form `access_key:sign:encoded_policy`, where both
/// parts are URL-safe base64 and `sign` is the HMAC-SHA1 of the encoded
/// policy under the secret key.
pub fn upload_token(
    access_key: &str,
    secret_key: &str,
    bucket: &str,
    key: &str,
    deadline: i64,
) -> Result<String, RelayError> {
    let policy = json!({
        "scope": format!("{bucket}:{key}"),
        "deadline": deadline,
    })
    .to_string();
    let encoded_policy = URL_SAFE.encode(policy);

    let mut mac =
        HmacSha1::new_from_slice(secret_key.as_bytes()).map_err(|_| RelayError::Signing)?;
    mac.update(encoded_policy.as_bytes());
    let sign = URL_SAFE.encode(mac.finalize().into_bytes());

    Ok(format!("{access_key}:{sign}:{encoded_policy}"))
}

/// Picks a file extension from the response content type, then the URL path.
pub fn choose_extension(content_type: Option<&str>, url: &str) -> String {
    let content_type = content_type.unwrap_or_default().to_lowercase();
    for (marker, ext) in [
        ("jpeg", ".jpg"),
        ("jpg", ".jpg"),
        ("png", ".png"),
        ("gif", ".gif"),
        ("webp", ".webp"),
    ] {
        if content_type.contains(marker) {
            return ext.to_string();
        }
    }

    url::Url::parse(url)
        .ok()
        .and_then(|parsed| {
            Path::new(parsed.path())
                .extension()
                .and_then(|e| e.to_str())
                .filter(|e| !e.is_empty() && e.len() <= 5 && e.chars().all(|c| c.is_ascii_alphanumeric()))
                .map(|e| format!(".{}", e.to_lowercase()))
        })
        .unwrap_or_else(|| DEFAULT_EXTENSION.to_string())
}

/// Content-addressed object key: SHA-256 of the bytes plus extension.
pub fn object_key(bytes: &[u8], extension: &str) -> String {
    let digest = Sha256::digest(bytes);
    format!("{}{extension}", hex::encode(digest))
}

/// Public URL of a stored object; always HTTPS whatever scheme the domain
/// was configured with.
pub fn public_url(domain: &str, key: &str) -> String {
    let host = domain
        .trim()
        .trim_start_matches("https://")
        .trim_start_matches("http://")
        .trim_end_matches('/');
    format!("https://{host}/{key}")
}

/// Relay that re-hosts images on a Qiniu bucket.
pub struct QiniuRelay {
    client: reqwest::blocking::Client,
    access_key: String,
    secret_key: String,
    bucket: String,
    domain: String,
    upload_host: String,
}

impl QiniuRelay {
    /// Creates a relay, rejecting incomplete credentials.
    pub fn new(config: &QiniuConfig) -> Result<Self, RelayError> {
        for (name, value) in [
            ("access_key", &config.access_key),
            ("secret_key", &config.secret_key),
            ("bucket", &config.bucket),
            ("domain", &config.domain),
        ] {
            if value.trim().is_empty() {
                return Err(RelayError::InvalidConfig(format!("{name} is empty")));
            }
        }

        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(30))
            .connect_timeout(Duration::from_secs(10))
            .build()
            .map_err(RelayError::Download)?;

        Ok(Self {
            client,
            access_key: config.access_key.clone(),
            secret_key: config.secret_key.clone(),
            bucket: config.bucket.clone(),
            domain: config.domain.clone(),
            upload_host: DEFAULT_UPLOAD_HOST.to_string(),
        })
    }

    /// Overrides the upload endpoint (regional hosts, tests).
    pub fn with_upload_host(mut self, host: impl Into<String>) -> Self {
        self.upload_host = host.into();
        self
    }

    /// Checks that a token can be signed with the configured credentials.
    pub fn validate_config(&self) -> Result<(), RelayError> {
        upload_token(&self.access_key, &self.secret_key, &self.bucket, "probe", 0).map(|_| ())
    }

    fn download(&self, url: &str) -> Result<(Vec<u8>, String), RelayError> {
        info!(%url, "Downloading image");
        let response = self
            .client
            .get(url)
            .send()
            .and_then(|r| r.error_for_status())
            .map_err(RelayError::Download)?;

        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let bytes = response.bytes().map_err(RelayError::Download)?;

        Ok((bytes.to_vec(), choose_extension(content_type.as_deref(), url)))
    }

    fn upload(&self, bytes: Vec<u8>, key: &str) -> Result<String, RelayError> {
        let deadline = OffsetDateTime::now_utc().unix_timestamp() + TOKEN_TTL_SECS;
        let token = upload_token(&self.access_key, &self.secret_key, &self.bucket, key, deadline)?;

        let form = Form::new()
            .text("token", token)
            .text("key", key.to_string())
            .part("file", Part::bytes(bytes).file_name(key.to_string()));

        let response = self
            .client
            .post(&self.upload_host)
            .multipart(form)
            .send()
            .map_err(RelayError::Upload)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            return Err(RelayError::UploadRejected {
                status: status.as_u16(),
                body,
            });
        }

        let body: Value = response.json().map_err(RelayError::Upload)?;
        let stored = body.get("key").and_then(Value::as_str).unwrap_or_default();
        if stored != key {
            return Err(RelayError::KeyMismatch {
                expected: key.to_string(),
                actual: stored.to_string(),
            });
        }
        Ok(public_url(&self.domain, key))
    }

    /// Downloads and re-uploads one image, returning its new URL.
    pub fn try_relay(&self, url: &str) -> Result<String, RelayError> {
        let (bytes, extension) = self.download(url)?;
        let key = object_key(&bytes, &extension);
        let new_url = self.upload(bytes, &key)?;
        info!(%url, %new_url, "Relayed image");
        Ok(new_url)
    }
}

impl ObjectRelay for QiniuRelay {
    fn relay(&self, url: &str) -> String {
        self.try_relay(url).unwrap_or_else(|e| {
            warn!(%url, error = %e, "Image relay failed, keeping original URL");
            url.to_string()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_matches_reference_signature() {
        let token = upload_token("ak", "secret", "photos", "abc.jpg", 1_700_000_000).unwrap();
        assert_eq!(
            token,
            "ak:5Wg6pa2jJA0jw6qhci4lh0XkKp4=:eyJzY29wZSI6InBob3RvczphYmMuanBnIiwiZGVhZGxpbmUiOjE3MDAwMDAwMDB9"
        );
    }

    #[test]
    fn extension_prefers_content_type() {
        assert_eq!(choose_extension(Some("image/PNG"), "http://a/x.gif"), ".png");
        assert_eq!(choose_extension(Some("image/jpeg; charset=binary"), "http://a/x"), ".jpg");
        assert_eq!(choose_extension(Some("application/octet-stream"), "http://a/x.GIF?w=1"), ".gif");
        assert_eq!(choose_extension(None, "http://a/no-extension"), ".jpg");
        assert_eq!(choose_extension(None, "not a url"), ".jpg");
    }

    #[test]
    fn key_is_content_addressed() {
        assert_eq!(
            object_key(b"hello", ".png"),
            "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824.png"
        );
    }

    #[test]
    fn public_url_is_always_https() {
        assert_eq!(public_url("cdn.example.com", "k.jpg"), "https://cdn.example.com/k.jpg");
        assert_eq!(public_url("http://cdn.example.com/", "k.jpg"), "https://cdn.example.com/k.jpg");
        assert_eq!(public_url("https://cdn.example.com", "k.jpg"), "https://cdn.example.com/k.jpg");
    }

    #[test]
    fn new_rejects_incomplete_credentials() {
        let config = QiniuConfig {
            access_key: "ak".to_string(),
            secret_key: "sk".to_string(),
            bucket: String::new(),
            domain: "cdn.example.com".to_string(),
        };
        assert!(matches!(QiniuRelay::new(&config), Err(RelayError::InvalidConfig(_))));
    }

    #[test]
    fn unreachable_source_keeps_original_url() {
        let config = QiniuConfig {
            access_key: "ak".to_string(),
            secret_key: "sk".to_string(),
            bucket: "b".to_string(),
            domain: "cdn.example.com".to_string(),
        };
        let relay = QiniuRelay::new(&config).unwrap();
        assert!(relay.validate_config().is_ok());
        assert_eq!(relay.relay("not-a-valid-url"), "not-a-valid-url");
    }
}
