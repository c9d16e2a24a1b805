use crate::api::models::{read_signed_url_mapping, write_blob_paths};
use crate::config::Config;
use crate::error::PublishError;
use crate::transfer::is_retryable_transfer_status;
use anyhow::Context;
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use std::collections::BTreeMap;

const APPLICATION_XML: &str = "application/xml";

/// Source of resumable-upload authorization for a single blob.
#[async_trait]
pub trait SignedUrlSource: Send + Sync {
    async fn upload_url(&self, blob_name: &str, content_type: &str) -> Result<String, PublishError>;
}

/// Talks to the build server that signs upload URLs on behalf of the build.
#[derive(Clone)]
pub struct CoordinatorClient {
    client: Client,
    endpoint: String,
    access_user: Option<String>,
    access_code: Option<String>,
}

impl CoordinatorClient {
    pub fn new(
        client: Client,
        endpoint: impl Into<String>,
        access_user: Option<String>,
        access_code: Option<String>,
    ) -> Self {
        Self {
            client,
            endpoint: endpoint.into(),
            access_user,
            access_code,
        }
    }

    pub fn from_config(client: Client, config: &Config) -> anyhow::Result<Self> {
        let endpoint = config
            .signed_url_endpoint()
            .context("Signed URL uploads need the build server URL")?;
        log::debug!(
            "CoordinatorClient configured endpoint={} user_configured={}",
            endpoint,
            config.access_user.is_some()
        );
        Ok(Self::new(
            client,
            endpoint,
            config.access_user.clone(),
            config.access_code.clone(),
        ))
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Requests upload URLs for every blob in one round trip.
    pub async fn request_upload_urls(
        &self,
        blob_paths: &BTreeMap<String, String>,
    ) -> Result<BTreeMap<String, String>, PublishError> {
        let mut request = self
            .client
            .post(&self.endpoint)
            .header("content-type", APPLICATION_XML)
            .body(write_blob_paths(blob_paths));
        if let Some(user) = &self.access_user {
            request = request.basic_auth(user, self.access_code.as_deref());
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(coordinator_error(status, body));
        }

        let body = response.text().await?;
        Ok(read_signed_url_mapping(&body))
    }
}

fn coordinator_error(status: StatusCode, body: String) -> PublishError {
    let message = "Could not get signed upload URL".to_string();
    if is_retryable_transfer_status(status) {
        PublishError::TransientTransfer {
            status: Some(status.as_u16()),
            message,
        }
    } else if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
        PublishError::AuthOrExpiredToken(message)
    } else {
        PublishError::unexpected_status(message, status.as_u16(), body)
    }
}

#[async_trait]
impl SignedUrlSource for CoordinatorClient {
    async fn upload_url(&self, blob_name: &str, content_type: &str) -> Result<String, PublishError> {
        let mut request = BTreeMap::new();
        request.insert(blob_name.to_string(), content_type.to_string());

        let mut mapping = self.request_upload_urls(&request).await?;
        mapping.remove(blob_name).ok_or_else(|| {
            PublishError::protocol(format!(
                "Could not get signed upload URL: no info for blob {blob_name}"
            ))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_coordinator_error_classification() {
        assert!(matches!(
            coordinator_error(StatusCode::BAD_GATEWAY, String::new()),
            PublishError::TransientTransfer { status: Some(502), .. }
        ));
        assert!(matches!(
            coordinator_error(StatusCode::UNAUTHORIZED, String::new()),
            PublishError::AuthOrExpiredToken(_)
        ));
        assert!(matches!(
            coordinator_error(StatusCode::BAD_REQUEST, "no build".into()),
            PublishError::ProtocolViolation { status: Some(400), .. }
        ));
    }

    #[test]
    fn test_from_config_requires_server_url() {
        let config = Config::default();
        assert!(CoordinatorClient::from_config(Client::new(), &config).is_err());

        let config = Config {
            server_url: Some("http://ci.local:8111".into()),
            ..Config::default()
        };
        let client = CoordinatorClient::from_config(Client::new(), &config).unwrap();
        assert_eq!(
            client.endpoint(),
            "http://ci.local:8111/httpAuth/plugins/google-storage/google-signed-urls.html"
        );
    }
}
