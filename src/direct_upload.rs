use crate::backend::{BackendError, BlobStore, BlobStoreConnector};
use crate::error::PublishError;
use crate::path_resolver::PublishingContext;
use crate::retry::{AttemptOutcome, RetryExecutor, RetryableOperation};
use crate::types::ArtifactRecord;
use async_trait::async_trait;
use std::sync::Arc;

/// Uploads a file with a single `create_blob` call through a store handle
/// owned by this pipeline. The handle is dropped and reopened after a
/// non-retryable backend error, so the next attempt sees fresh credentials.
pub struct DirectUpload {
    connector: Arc<dyn BlobStoreConnector>,
    context: PublishingContext,
    store: Option<Arc<dyn BlobStore>>,
    reconnects: u32,
}

impl DirectUpload {
    pub fn new(connector: Arc<dyn BlobStoreConnector>, context: PublishingContext) -> Self {
        Self {
            connector,
            context,
            store: None,
            reconnects: 0,
        }
    }

    pub fn reconnects(&self) -> u32 {
        self.reconnects
    }

    pub async fn run(mut self, executor: &RetryExecutor) -> Result<ArtifactRecord, PublishError> {
        let artifact = self.context.file_path().to_string();
        executor.execute(&artifact, &mut self).await
    }

    async fn store(&mut self) -> Result<Arc<dyn BlobStore>, PublishError> {
        if let Some(store) = &self.store {
            return Ok(store.clone());
        }
        let store = self.connector.connect().await.map_err(backend_failure)?;
        self.store = Some(store.clone());
        Ok(store)
    }

    async fn try_upload(&mut self) -> Result<ArtifactRecord, PublishError> {
        let length = tokio::fs::metadata(self.context.file()).await?.len();
        let store = self.store().await?;

        let blob = store
            .create_blob(
                self.context.blob_name(),
                self.context.file(),
                self.context.content_type(),
            )
            .await
            .map_err(backend_failure)?;

        log::debug!(
            "Stored {} as {}/{} ({} bytes)",
            self.context.file_path(),
            blob.bucket,
            blob.name,
            blob.size.unwrap_or(length)
        );
        Ok(ArtifactRecord::new(self.context.file_path(), length))
    }
}

fn backend_failure(err: BackendError) -> PublishError {
    if err.retryable {
        PublishError::TransientTransfer {
            status: err.status,
            message: err.message,
        }
    } else {
        PublishError::AuthOrExpiredToken(err.to_string())
    }
}

#[async_trait]
impl RetryableOperation for DirectUpload {
    type Output = ArtifactRecord;

    async fn attempt(&mut self) -> AttemptOutcome<ArtifactRecord> {
        match self.try_upload().await {
            Ok(record) => AttemptOutcome::Success(record),
            Err(error) if error.is_retryable() => AttemptOutcome::Retryable(error),
            Err(error) => AttemptOutcome::Fatal(error),
        }
    }

    async fn on_failure(&mut self, error: &PublishError) {
        if !matches!(error, PublishError::AuthOrExpiredToken(_)) {
            return;
        }

        // The next attempt reconnects through `store()`.
        if self.store.take().is_some() {
            log::info!(
                "Dropping storage handle for {} after: {error}",
                self.context.file_path()
            );
        }
        self.reconnects += 1;
    }
}
