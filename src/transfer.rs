use crate::error::PublishError;
use anyhow::{Context, Result};
use reqwest::{Client, StatusCode};
use std::path::Path;
use std::time::Duration;
use tokio::fs::File;
use tokio::io::AsyncSeekExt;
use tokio_util::io::ReaderStream;

const STREAM_CHUNK_SIZE: usize = 2 * 1024 * 1024;

pub fn is_retryable_transfer_status(status: StatusCode) -> bool {
    status.is_server_error()
        || status == StatusCode::TOO_MANY_REQUESTS
        || status == StatusCode::REQUEST_TIMEOUT
}

pub fn is_retryable_transfer_error(err: &reqwest::Error) -> bool {
    if err.is_timeout() || err.is_connect() {
        return true;
    }

    match err.status() {
        Some(status) => is_retryable_transfer_status(status),
        None => false,
    }
}

pub fn build_transfer_client() -> Result<Client> {
    let is_test_mode = std::env::var("ARTIFACT_PUBLISHER_TEST_MODE")
        .map(|value| value == "1")
        .unwrap_or(false);

    let mut builder = reqwest::Client::builder()
        .use_rustls_tls()
        .http1_only()
        .pool_max_idle_per_host(64)
        .pool_idle_timeout(Duration::from_secs(90))
        .tcp_keepalive(Some(Duration::from_secs(30)))
        .tcp_nodelay(true)
        .redirect(reqwest::redirect::Policy::none());

    if is_test_mode {
        builder = builder
            .connect_timeout(Duration::from_millis(200))
            .timeout(Duration::from_secs(10));
    } else {
        builder = builder
            .connect_timeout(Duration::from_secs(10))
            .timeout(Duration::from_secs(600));
    }

    builder.build().context("Failed to build HTTP client")
}

/// Streams `path` starting at byte `offset` as a request body.
pub async fn file_range_body(path: &Path, offset: u64) -> Result<reqwest::Body, PublishError> {
    let mut file = File::open(path).await?;
    if offset > 0 {
        file.seek(std::io::SeekFrom::Start(offset)).await?;
    }
    let reader = ReaderStream::with_capacity(file, STREAM_CHUNK_SIZE);
    Ok(reqwest::Body::wrap_stream(reader))
}

/// Maps a non-success response to the outcome the retry loop expects:
/// retry-class statuses are transient, everything else is a protocol
/// violation carrying the response body.
pub async fn classify_failed_response(
    operation: &str,
    response: reqwest::Response,
) -> PublishError {
    let status = response.status();
    if is_retryable_transfer_status(status) {
        return PublishError::TransientTransfer {
            status: Some(status.as_u16()),
            message: format!("{operation} failed"),
        };
    }

    let body = response.text().await.unwrap_or_default();
    log::error!("{operation} failed: HTTP {} - {}", status, body);
    PublishError::unexpected_status(
        format!("{operation}: invalid response code"),
        status.as_u16(),
        body,
    )
}
