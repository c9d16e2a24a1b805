use crate::api::{CoordinatorClient, SignedUrlSource};
use crate::backend::{BlobStoreConnector, GcsConnector, DEFAULT_STORAGE_API_URL};
use crate::config::Config;
use crate::direct_upload::DirectUpload;
use crate::error::PublishError;
use crate::path_resolver::{is_internal_artifact, PublishingContext};
use crate::resumable_upload::ResumableUpload;
use crate::retry::RetryExecutor;
use crate::types::{ArtifactRecord, Result};
use anyhow::Context;
use futures_util::future::join_all;
use reqwest::Client;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::task::JoinHandle;

/// Transfer protocol used for every file of a batch.
#[derive(Clone)]
pub enum UploadStrategy {
    /// Writes blobs through a storage handle with the build's credentials.
    Direct(Arc<dyn BlobStoreConnector>),
    /// Resumable uploads authorized by URLs the build server signs.
    SignedUrl {
        source: Arc<dyn SignedUrlSource>,
        client: Client,
    },
}

impl UploadStrategy {
    /// Picks the strategy from configuration. `use_signed_url` overrides the
    /// configured choice when set.
    pub fn from_config(config: &Config, client: Client, use_signed_url: Option<bool>) -> Result<Self> {
        if use_signed_url.unwrap_or(config.use_signed_url) {
            let coordinator = CoordinatorClient::from_config(client.clone(), config)?;
            return Ok(UploadStrategy::SignedUrl {
                source: Arc::new(coordinator),
                client,
            });
        }

        config
            .storage_settings()
            .context("Direct uploads need storage settings")?;
        let api_url = config
            .storage_api_url
            .clone()
            .unwrap_or_else(|| DEFAULT_STORAGE_API_URL.to_string());
        let settings_source = config.clone();
        let connector = GcsConnector::new(client, &api_url, move || {
            settings_source.storage_settings()
        });
        Ok(UploadStrategy::Direct(Arc::new(connector)))
    }

    pub fn name(&self) -> &'static str {
        match self {
            UploadStrategy::Direct(_) => "direct",
            UploadStrategy::SignedUrl { .. } => "signed-url",
        }
    }

    async fn upload(
        self,
        context: PublishingContext,
        executor: &RetryExecutor,
    ) -> std::result::Result<ArtifactRecord, PublishError> {
        match self {
            UploadStrategy::Direct(connector) => {
                DirectUpload::new(connector, context).run(executor).await
            }
            UploadStrategy::SignedUrl { source, client } => {
                ResumableUpload::new(client, source, context)
                    .run(executor)
                    .await
            }
        }
    }
}

/// Outcome of one file of a batch.
pub type FileOutcome = (PathBuf, std::result::Result<ArtifactRecord, PublishError>);

enum Pending {
    Spawned(JoinHandle<std::result::Result<ArtifactRecord, PublishError>>),
    Rejected(PublishError),
}

pub struct Publisher {
    strategy: UploadStrategy,
    executor: Arc<RetryExecutor>,
    path_prefix: String,
}

impl Publisher {
    pub fn new(strategy: UploadStrategy, executor: RetryExecutor, path_prefix: impl Into<String>) -> Self {
        Self {
            strategy,
            executor: Arc::new(executor),
            path_prefix: path_prefix.into(),
        }
    }

    pub fn path_prefix(&self) -> &str {
        &self.path_prefix
    }

    pub fn strategy(&self) -> &UploadStrategy {
        &self.strategy
    }

    /// Uploads every file concurrently and waits for all of them.
    ///
    /// `files` pairs each local file with the artifacts directory it is
    /// published to. Files bound for the internal build directory are
    /// skipped. Results keep the order of `files`.
    pub async fn publish_all(&self, files: Vec<(PathBuf, String)>) -> Vec<FileOutcome> {
        let mut pending = Vec::with_capacity(files.len());

        for (file, target_dir) in files {
            if is_internal_artifact(&target_dir) {
                log::debug!("Skipping internal artifact {}", file.display());
                continue;
            }

            let context = match PublishingContext::new(file.clone(), &target_dir, &self.path_prefix) {
                Ok(context) => context,
                Err(err) => {
                    pending.push((file, Pending::Rejected(err)));
                    continue;
                }
            };

            log::debug!(
                "Publishing {} as {} ({})",
                file.display(),
                context.blob_name(),
                context.content_type()
            );
            let strategy = self.strategy.clone();
            let executor = self.executor.clone();
            let task = tokio::spawn(async move { strategy.upload(context, &executor).await });
            pending.push((file, Pending::Spawned(task)));
        }

        join_all(pending.into_iter().map(|(file, pending)| async move {
            let result = match pending {
                Pending::Spawned(task) => task.await.unwrap_or_else(|err| {
                    Err(PublishError::protocol(format!("Upload task failed: {err}")))
                }),
                Pending::Rejected(err) => Err(err),
            };

            match &result {
                Ok(record) => log::info!("Published {} ({})", record.path, record.size()),
                Err(err) => log::warn!("Failed to publish {}: {err}", file.display()),
            }
            (file, result)
        }))
        .await
    }

    /// Uploads a batch and returns its records, or the first failure in
    /// the order the files were given. Every upload runs to completion
    /// before the failure is reported.
    pub async fn publish(&self, files: Vec<(PathBuf, String)>) -> Result<Vec<ArtifactRecord>> {
        let mut records = Vec::new();
        let mut first_failure = None;

        for (file, result) in self.publish_all(files).await {
            match result {
                Ok(record) => records.push(record),
                Err(err) if first_failure.is_none() => first_failure = Some((file, err)),
                Err(_) => {}
            }
        }

        if let Some((file, err)) = first_failure {
            return Err(anyhow::Error::new(err)
                .context(format!("Failed to publish artifact {}", file.display())));
        }
        Ok(records)
    }
}
