use crate::cli::StrategyArg;
use crate::commands::utils::{collect_files, expand_tilde_path, parse_artifact_spec};
use crate::config::Config;
use crate::exit_code::{ExitCodeError, EXIT_CONFIG, EXIT_PUBLISH_FAILED};
use crate::publisher::{Publisher, UploadStrategy};
use crate::retry::RetryExecutor;
use crate::transfer::build_transfer_client;
use crate::types::ArtifactRecord;
use crate::ui;
use anyhow::{Error, Result};
use serde::Serialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Serialize)]
pub struct PublishFailure {
    pub file: String,
    pub error: String,
}

#[derive(Debug, Serialize)]
pub struct PublishSummary {
    pub prefix: String,
    pub strategy: String,
    pub total: usize,
    pub published: usize,
    pub artifacts: Vec<ArtifactRecord>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub failures: Vec<PublishFailure>,
}

fn config_error(error: Error) -> Error {
    ExitCodeError::with_message(EXIT_CONFIG, format!("{:#}", error)).into()
}

pub async fn execute(
    artifacts: Vec<String>,
    prefix: Option<String>,
    strategy: StrategyArg,
    json_output: bool,
    verbose: bool,
) -> Result<()> {
    let mut config = Config::load().map_err(config_error)?;
    if prefix.is_some() {
        config.path_prefix = prefix;
    }
    let path_prefix = config.path_prefix().map_err(config_error)?;

    let files = resolve_files(&artifacts)?;
    if files.is_empty() {
        anyhow::bail!("No files found to publish");
    }

    let client = build_transfer_client()?;
    let upload_strategy =
        UploadStrategy::from_config(&config, client, strategy.use_signed_url()).map_err(config_error)?;
    let strategy_name = upload_strategy.name().to_string();

    if verbose && !json_output {
        ui::info(&format!(
            "Publishing {} file{} under '{}' ({} uploads)",
            files.len(),
            if files.len() == 1 { "" } else { "s" },
            path_prefix,
            strategy_name
        ));
    }

    let executor = RetryExecutor::new(config.backoff_settings(), verbose && !json_output);
    let publisher = Publisher::new(upload_strategy, executor, path_prefix.clone());
    let outcomes = publisher.publish_all(files).await;

    let total = outcomes.len();
    let mut records = Vec::new();
    let mut failures = Vec::new();
    for (file, result) in outcomes {
        match result {
            Ok(record) => records.push(record),
            Err(err) => failures.push(PublishFailure {
                file: file.display().to_string(),
                error: err.to_string(),
            }),
        }
    }

    if json_output {
        let summary = PublishSummary {
            prefix: path_prefix,
            strategy: strategy_name,
            total,
            published: records.len(),
            artifacts: records,
            failures,
        };
        println!("{}", serde_json::to_string_pretty(&summary)?);
        return finish(&summary.failures);
    }

    for record in &records {
        ui::artifact_published(&record.path, &record.size().to_string());
    }
    for failure in &failures {
        ui::error(&format!(
            "Failed to publish artifact {}: {}",
            failure.file, failure.error
        ));
    }
    ui::publish_summary("published", records.len(), total, &path_prefix);

    finish(&failures)
}

fn finish(failures: &[PublishFailure]) -> Result<()> {
    match failures.first() {
        None => Ok(()),
        Some(first) => Err(ExitCodeError::with_message(
            EXIT_PUBLISH_FAILED,
            format!(
                "{} artifact{} failed to publish, first: {}",
                failures.len(),
                if failures.len() == 1 { "" } else { "s" },
                first.file
            ),
        )
        .into()),
    }
}

fn resolve_files(artifacts: &[String]) -> Result<Vec<(PathBuf, String)>> {
    let mut files = Vec::new();
    for argument in artifacts {
        let spec = parse_artifact_spec(argument).map_err(Error::from)?;
        let expanded = expand_tilde_path(&spec.source);
        let source = Path::new(&expanded);
        if !source.exists() {
            ui::warn(&format!("Skipping {} (path not found)", spec.source));
            continue;
        }
        files.extend(collect_files(source, &spec.target_dir)?);
    }
    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_resolve_files_skips_missing_paths() {
        let temp_dir = TempDir::new().unwrap();
        let present = temp_dir.path().join("app.zip");
        std::fs::write(&present, "zip").unwrap();

        let files = resolve_files(&[
            format!("{}=>release", present.display()),
            temp_dir.path().join("absent.txt").display().to_string(),
        ])
        .unwrap();

        assert_eq!(files, vec![(present, "release".to_string())]);
    }

    #[test]
    fn test_finish_reports_failure_count() {
        assert!(finish(&[]).is_ok());

        let err = finish(&[
            PublishFailure {
                file: "a.txt".into(),
                error: "boom".into(),
            },
            PublishFailure {
                file: "b.txt".into(),
                error: "boom".into(),
            },
        ])
        .unwrap_err();
        let exit = err.downcast_ref::<ExitCodeError>().unwrap();
        assert_eq!(exit.code(), EXIT_PUBLISH_FAILED);
        assert_eq!(exit.to_string(), "2 artifacts failed to publish, first: a.txt");
    }
}
