use anyhow::{Context, Result};
use jwalk::WalkDir;
use std::path::{Path, PathBuf};
use thiserror::Error;

const TARGET_SEPARATOR: &str = "=>";

pub fn expand_tilde_path(path: &str) -> String {
    if path.starts_with('~') {
        if let Some(home) = dirs::home_dir() {
            return path.replacen('~', &home.to_string_lossy(), 1);
        }
    }
    path.to_string()
}

/// A `FILE[=>TARGET_DIR]` argument.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactSpec {
    pub source: String,
    pub target_dir: String,
}

#[derive(Debug, Error)]
pub enum ArtifactSpecError {
    #[error("Invalid artifact specifier '{input}'. Expected format 'FILE' or 'FILE=>TARGET_DIR' (example: 'dist/app.zip=>release').")]
    InvalidFormat { input: String },
    #[error("Source path is missing in '{input}'. Add a path before '=>'.")]
    MissingSource { input: String },
}

pub fn parse_artifact_spec(input: &str) -> std::result::Result<ArtifactSpec, ArtifactSpecError> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Err(ArtifactSpecError::InvalidFormat {
            input: input.to_string(),
        });
    }

    let (source, target_dir) = match trimmed.split_once(TARGET_SEPARATOR) {
        Some((source, target)) => (source.trim(), target.trim()),
        None => (trimmed, ""),
    };
    if source.is_empty() {
        return Err(ArtifactSpecError::MissingSource {
            input: input.to_string(),
        });
    }
    if target_dir.contains(TARGET_SEPARATOR) {
        return Err(ArtifactSpecError::InvalidFormat {
            input: input.to_string(),
        });
    }

    Ok(ArtifactSpec {
        source: source.to_string(),
        target_dir: target_dir.to_string(),
    })
}

/// Expands a source path into `(file, target_dir)` pairs. A directory
/// contributes every file below it, keeping its layout under `target_dir`.
pub fn collect_files(source: &Path, target_dir: &str) -> Result<Vec<(PathBuf, String)>> {
    if !source.is_dir() {
        return Ok(vec![(source.to_path_buf(), target_dir.to_string())]);
    }

    let mut files = Vec::new();
    for entry in WalkDir::new(source).follow_links(false).skip_hidden(false).sort(true) {
        let entry = entry.with_context(|| format!("Failed to walk {}", source.display()))?;
        if entry.depth == 0 || entry.file_type().is_dir() {
            continue;
        }

        let path = entry.path();
        let relative_dir = path
            .strip_prefix(source)
            .ok()
            .and_then(Path::parent)
            .map(|parent| {
                parent
                    .components()
                    .map(|part| part.as_os_str().to_string_lossy().into_owned())
                    .collect::<Vec<_>>()
                    .join("/")
            })
            .unwrap_or_default();

        let nested = match (target_dir.is_empty(), relative_dir.is_empty()) {
            (_, true) => target_dir.to_string(),
            (true, false) => relative_dir,
            (false, false) => format!("{target_dir}/{relative_dir}"),
        };
        files.push((path, nested));
    }
    Ok(files)
}
