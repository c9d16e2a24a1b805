//! Resumable uploads against a signed session URL.
//!
//! A session is opened with `POST <signed url>` (`x-goog-resumable: start`),
//! after which the file is written with `PUT <session uri>`. When a write
//! fails with a retry-class status the committed offset is unknown until
//! the server is asked for it with an empty `PUT` carrying
//! `Content-Range: bytes */<total>`.

use crate::api::SignedUrlSource;
use crate::error::PublishError;
use crate::path_resolver::PublishingContext;
use crate::retry::{AttemptOutcome, RetryExecutor, RetryableOperation};
use crate::transfer::{classify_failed_response, file_range_body};
use crate::types::ArtifactRecord;
use async_trait::async_trait;
use reqwest::header::{CONTENT_LENGTH, CONTENT_RANGE, CONTENT_TYPE, LOCATION, RANGE};
use reqwest::{Client, StatusCode, Url};
use std::sync::Arc;

const RESUMABLE_HEADER: &str = "x-goog-resumable";
const RANGE_PREFIX: &str = "bytes=0-";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadCursor {
    Offset(u64),
    /// The server may hold more than we last knew about; ask before writing.
    Unknown,
}

#[derive(Debug, Clone)]
pub struct ResumableSession {
    pub signed_url: String,
    pub location: String,
    pub cursor: UploadCursor,
    pub total_length: u64,
}

impl ResumableSession {
    pub fn new(signed_url: String, location: String, total_length: u64) -> Self {
        Self {
            signed_url,
            location,
            cursor: UploadCursor::Offset(0),
            total_length,
        }
    }
}

/// `Content-Range` header of a data write starting at `offset`, or `None`
/// for a write of the whole file.
pub fn content_range(offset: u64, total_length: u64) -> Option<String> {
    if offset == 0 {
        None
    } else if offset >= total_length {
        Some(format!("bytes */{total_length}"))
    } else {
        Some(format!(
            "bytes {}-{}/{}",
            offset + 1,
            total_length - 1,
            total_length
        ))
    }
}

/// Parses `bytes=0-<n>` into the last committed byte index `n`.
pub fn parse_committed_range(value: &str) -> Option<u64> {
    value.trim().strip_prefix(RANGE_PREFIX)?.trim().parse().ok()
}

pub struct ResumableUpload {
    client: Client,
    source: Arc<dyn SignedUrlSource>,
    context: PublishingContext,
    session: Option<ResumableSession>,
}

impl ResumableUpload {
    pub fn new(client: Client, source: Arc<dyn SignedUrlSource>, context: PublishingContext) -> Self {
        Self {
            client,
            source,
            context,
            session: None,
        }
    }

    pub fn session(&self) -> Option<&ResumableSession> {
        self.session.as_ref()
    }

    pub async fn run(mut self, executor: &RetryExecutor) -> Result<ArtifactRecord, PublishError> {
        let artifact = self.context.file_path().to_string();
        executor.execute(&artifact, &mut self).await
    }

    async fn open_session(&self, total_length: u64) -> Result<ResumableSession, PublishError> {
        let blob_name = self.context.blob_name();
        let content_type = self.context.content_type();
        let signed_url = self.source.upload_url(blob_name, content_type).await?;
        let endpoint = Url::parse(&signed_url).map_err(|err| {
            PublishError::protocol(format!("Malformed signed URL for {blob_name}: {err}"))
        })?;

        let response = self
            .client
            .post(endpoint)
            .header(RESUMABLE_HEADER, "start")
            .header(CONTENT_TYPE, content_type)
            .header(CONTENT_LENGTH, 0)
            .send()
            .await?;

        let status = response.status();
        if status != StatusCode::CREATED {
            let body = response.text().await.unwrap_or_default();
            return Err(PublishError::unexpected_status(
                "Can't get upload location URL",
                status.as_u16(),
                body,
            ));
        }

        let location = response
            .headers()
            .get(LOCATION)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string)
            .ok_or_else(|| PublishError::protocol("Can't get upload location URL: no Location header"))?;
        Url::parse(&location).map_err(|err| {
            PublishError::protocol(format!("Malformed upload location URL '{location}': {err}"))
        })?;

        log::debug!("Opened upload session for {blob_name}: {location}");
        Ok(ResumableSession::new(signed_url, location, total_length))
    }

    async fn query_cursor(&self, session: &ResumableSession) -> Result<UploadCursor, PublishError> {
        let response = self
            .client
            .put(&session.location)
            .header(CONTENT_RANGE, format!("bytes */{}", session.total_length))
            .header(CONTENT_LENGTH, 0)
            .send()
            .await?;

        let status = response.status();
        if status != StatusCode::PERMANENT_REDIRECT {
            let body = response.text().await.unwrap_or_default();
            return Err(PublishError::unexpected_status(
                "Can't get current bytes range for upload",
                status.as_u16(),
                body,
            ));
        }

        let Some(range) = response.headers().get(RANGE) else {
            return Ok(UploadCursor::Offset(0));
        };
        let range = range.to_str().unwrap_or_default();
        let committed = parse_committed_range(range).ok_or_else(|| {
            PublishError::protocol(format!("Malformed Range header in range query: '{range}'"))
        })?;

        log::debug!(
            "Server holds bytes 0-{committed} of {}",
            self.context.file_path()
        );
        Ok(UploadCursor::Offset(committed + 1))
    }

    async fn write(&self, session: &mut ResumableSession) -> Result<ArtifactRecord, PublishError> {
        if session.cursor == UploadCursor::Unknown {
            session.cursor = self.query_cursor(session).await?;
        }
        let UploadCursor::Offset(offset) = session.cursor else {
            return Err(PublishError::protocol("Upload offset is unknown"));
        };

        let total_length = session.total_length;
        if offset > total_length {
            return Err(PublishError::protocol(format!(
                "Resume offset {offset} is beyond the end of {} ({total_length} bytes)",
                self.context.file_path()
            )));
        }

        let body = file_range_body(self.context.file(), offset).await?;
        let mut request = self
            .client
            .put(&session.location)
            .header(CONTENT_TYPE, self.context.content_type())
            .header(CONTENT_LENGTH, total_length - offset);
        if let Some(range) = content_range(offset, total_length) {
            request = request.header(CONTENT_RANGE, range);
        }

        let response = request.body(body).send().await?;
        if response.status().is_success() {
            return Ok(ArtifactRecord::new(self.context.file_path(), total_length));
        }

        Err(classify_failed_response("Upload", response).await)
    }

    async fn try_upload(&mut self) -> Result<ArtifactRecord, PublishError> {
        let mut session = match self.session.take() {
            Some(session) => session,
            None => {
                let total_length = tokio::fs::metadata(self.context.file()).await?.len();
                self.open_session(total_length).await?
            }
        };

        let result = self.write(&mut session).await;
        self.session = Some(session);
        result
    }
}

#[async_trait]
impl RetryableOperation for ResumableUpload {
    type Output = ArtifactRecord;

    async fn attempt(&mut self) -> AttemptOutcome<ArtifactRecord> {
        match self.try_upload().await {
            Ok(record) => AttemptOutcome::Success(record),
            Err(error) if error.is_retryable() => AttemptOutcome::Retryable(error),
            Err(error) => AttemptOutcome::Fatal(error),
        }
    }

    async fn on_failure(&mut self, error: &PublishError) {
        let same_session = matches!(
            error,
            PublishError::TransientTransfer {
                status: Some(_),
                ..
            }
        );

        if same_session {
            if let Some(session) = self.session.as_mut() {
                session.cursor = UploadCursor::Unknown;
            }
        } else if self.session.take().is_some() {
            log::info!(
                "Discarding upload session of {} after: {error}",
                self.context.file_path()
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_content_range_header() {
        assert_eq!(content_range(0, 200), None);
        assert_eq!(content_range(100, 200).as_deref(), Some("bytes 101-199/200"));
        assert_eq!(content_range(200, 200).as_deref(), Some("bytes */200"));
        assert_eq!(content_range(0, 0), None);
    }

    #[test]
    fn test_parse_committed_range() {
        assert_eq!(parse_committed_range("bytes=0-99"), Some(99));
        assert_eq!(parse_committed_range(" bytes=0-0 "), Some(0));
        assert_eq!(parse_committed_range("bytes=5-99"), None);
        assert_eq!(parse_committed_range("bytes=0-"), None);
        assert_eq!(parse_committed_range("garbage"), None);
    }

    #[test]
    fn test_new_session_starts_at_zero() {
        let session = ResumableSession::new("s".into(), "l".into(), 10);
        assert_eq!(session.cursor, UploadCursor::Offset(0));
    }
}
