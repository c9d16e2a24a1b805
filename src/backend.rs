use crate::config::{CredentialsKind, StorageSettings};
use crate::transfer::{file_range_body, is_retryable_transfer_error, is_retryable_transfer_status};
use async_trait::async_trait;
use reqwest::header::{CONTENT_LENGTH, CONTENT_TYPE};
use reqwest::Client;
use serde::Deserialize;
use std::fmt;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

pub const DEFAULT_STORAGE_API_URL: &str = "https://storage.googleapis.com";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HttpMethod {
    Get,
    Put,
    Post,
}

impl HttpMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            HttpMethod::Get => "GET",
            HttpMethod::Put => "PUT",
            HttpMethod::Post => "POST",
        }
    }
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error raised by a storage backend, tagged with whether retrying the
/// same call with the same handle can succeed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendError {
    pub retryable: bool,
    pub status: Option<u16>,
    pub message: String,
}

impl BackendError {
    pub fn retryable(message: impl Into<String>) -> Self {
        Self {
            retryable: true,
            status: None,
            message: message.into(),
        }
    }

    pub fn fatal(message: impl Into<String>) -> Self {
        Self {
            retryable: false,
            status: None,
            message: message.into(),
        }
    }

    pub fn with_status(mut self, status: u16) -> Self {
        self.status = Some(status);
        self
    }
}

impl fmt::Display for BackendError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.status {
            Some(status) => write!(f, "{} (HTTP {status})", self.message),
            None => write!(f, "{}", self.message),
        }
    }
}

impl std::error::Error for BackendError {}

impl From<reqwest::Error> for BackendError {
    fn from(err: reqwest::Error) -> Self {
        let retryable = is_retryable_transfer_error(&err);
        let status = err.status().map(|status| status.as_u16());
        Self {
            retryable,
            status,
            message: err.to_string(),
        }
    }
}

impl From<std::io::Error> for BackendError {
    fn from(err: std::io::Error) -> Self {
        BackendError::fatal(format!("IO Error: {err}"))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlobRef {
    pub bucket: String,
    pub name: String,
    pub size: Option<u64>,
}

#[async_trait]
pub trait BlobStore: Send + Sync {
    async fn create_blob(
        &self,
        blob_name: &str,
        file: &Path,
        content_type: &str,
    ) -> Result<BlobRef, BackendError>;
}

/// Hands out store handles bound to whatever credentials are current at
/// call time.
#[async_trait]
pub trait BlobStoreConnector: Send + Sync {
    async fn connect(&self) -> Result<Arc<dyn BlobStore>, BackendError>;
}

#[async_trait]
pub trait UrlSigner: Send + Sync {
    async fn sign_url(
        &self,
        blob_path: &str,
        method: HttpMethod,
        lifetime: Duration,
        content_type: Option<&str>,
    ) -> Result<String, BackendError>;
}

/// Media upload through the JSON API with a pre-issued bearer token.
pub struct GcsJsonBlobStore {
    client: Client,
    api_url: String,
    bucket: String,
    access_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ObjectResource {
    name: String,
    #[serde(default)]
    size: Option<String>,
}

impl GcsJsonBlobStore {
    pub fn new(client: Client, api_url: &str, bucket: &str, access_token: Option<String>) -> Self {
        Self {
            client,
            api_url: api_url.trim_end_matches('/').to_string(),
            bucket: bucket.to_string(),
            access_token,
        }
    }

    fn upload_url(&self) -> String {
        format!("{}/upload/storage/v1/b/{}/o", self.api_url, self.bucket)
    }
}

#[async_trait]
impl BlobStore for GcsJsonBlobStore {
    async fn create_blob(
        &self,
        blob_name: &str,
        file: &Path,
        content_type: &str,
    ) -> Result<BlobRef, BackendError> {
        let length = tokio::fs::metadata(file).await?.len();
        let body = file_range_body(file, 0)
            .await
            .map_err(|err| BackendError::fatal(err.to_string()))?;

        let mut request = self
            .client
            .post(self.upload_url())
            .query(&[("uploadType", "media"), ("name", blob_name)])
            .header(CONTENT_TYPE, content_type)
            .header(CONTENT_LENGTH, length);
        if let Some(token) = &self.access_token {
            request = request.bearer_auth(token);
        }

        let response = request.body(body).send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            log::warn!("Blob upload for {blob_name} failed: HTTP {status} - {body}");
            let retryable = is_retryable_transfer_status(status);
            return Err(BackendError {
                retryable,
                status: Some(status.as_u16()),
                message: if body.is_empty() {
                    status.canonical_reason().unwrap_or("Unknown error").to_string()
                } else {
                    body
                },
            });
        }

        let resource: ObjectResource = response
            .json()
            .await
            .map_err(|err| BackendError::retryable(format!("Malformed upload response: {err}")))?;

        Ok(BlobRef {
            bucket: self.bucket.clone(),
            name: resource.name,
            size: resource.size.and_then(|size| size.parse().ok()),
        })
    }
}

/// Re-reads storage settings on every `connect`, so a handle obtained after
/// a failure carries fresh credentials.
pub struct GcsConnector {
    client: Client,
    api_url: String,
    settings: Arc<dyn Fn() -> anyhow::Result<StorageSettings> + Send + Sync>,
}

impl GcsConnector {
    pub fn new(
        client: Client,
        api_url: &str,
        settings: impl Fn() -> anyhow::Result<StorageSettings> + Send + Sync + 'static,
    ) -> Self {
        Self {
            client,
            api_url: api_url.to_string(),
            settings: Arc::new(settings),
        }
    }
}

#[async_trait]
impl BlobStoreConnector for GcsConnector {
    async fn connect(&self) -> Result<Arc<dyn BlobStore>, BackendError> {
        let settings = (self.settings)().map_err(|err| BackendError::fatal(err.to_string()))?;
        if settings.bucket_name.trim().is_empty() {
            return Err(BackendError::fatal("Storage bucket name is not configured"));
        }

        let token = match settings.credentials_kind {
            CredentialsKind::Environment => crate::config::env_var("GOOGLE_OAUTH_ACCESS_TOKEN"),
            CredentialsKind::Key => settings.access_token.clone(),
        };
        log::debug!(
            "Connected to bucket {} token_configured={}",
            settings.bucket_name,
            token.is_some()
        );

        Ok(Arc::new(GcsJsonBlobStore::new(
            self.client.clone(),
            &self.api_url,
            settings.bucket_name.trim(),
            token,
        )))
    }
}
