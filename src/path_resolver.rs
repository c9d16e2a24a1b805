use crate::error::PublishError;
use std::path::{Path, PathBuf};

pub const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";

/// Build metadata directory maintained by the build agent itself.
pub const INTERNAL_ARTIFACTS_DIR: &str = ".teamcity";

const SLASH: char = '/';

/// Joins `prefix` and `relative_path` into a single `/`-separated blob path.
///
/// Empty segments are dropped, `.` is removed and inner `..` segments are
/// resolved lexically. A path that would climb above its root fails with
/// [`PublishError::PathEscape`].
pub fn normalize_path(prefix: &str, relative_path: &str) -> Result<String, PublishError> {
    let joined = if prefix.trim().is_empty() {
        relative_path.trim().to_string()
    } else {
        format!("{}{SLASH}{}", prefix.trim(), relative_path.trim())
    };

    let escape = || PublishError::PathEscape {
        path: joined.clone(),
    };
    if joined.replace('\\', "/").starts_with("..") {
        return Err(escape());
    }
    resolve_segments(&joined).ok_or_else(escape)
}

/// Path of an artifact inside the artifacts root: the target directory it
/// was published to plus its own file name.
pub fn artifact_file_path(relative_dir: &str, file_name: &str) -> Result<String, PublishError> {
    normalize_path(relative_dir, file_name)
}

fn split_segments(path: &str) -> impl Iterator<Item = &str> {
    path.split(['/', '\\'])
        .map(str::trim)
        .filter(|segment| !segment.is_empty())
}

fn resolve_segments(path: &str) -> Option<String> {
    let mut resolved: Vec<&str> = Vec::new();
    for segment in split_segments(path) {
        match segment {
            "." => {}
            ".." => {
                resolved.pop()?;
            }
            other => resolved.push(other),
        }
    }
    Some(resolved.join("/"))
}

pub fn content_type(path: &Path) -> String {
    mime_guess::from_path(path)
        .first_raw()
        .unwrap_or(DEFAULT_CONTENT_TYPE)
        .to_string()
}

/// Namespace prepended to every blob of a build.
///
/// An explicit override wins; otherwise the prefix is built from the
/// project, build configuration and build identifiers.
pub fn compute_path_prefix(
    override_prefix: Option<&str>,
    project_id: Option<&str>,
    build_type_id: &str,
    build_id: &str,
) -> String {
    if let Some(prefix) = override_prefix {
        return split_segments(prefix).collect::<Vec<_>>().join("/");
    }

    let mut segments = Vec::with_capacity(3);
    if let Some(project) = project_id.filter(|p| !p.trim().is_empty()) {
        segments.push(project.trim());
    }
    segments.push(build_type_id.trim());
    segments.push(build_id.trim());
    segments.retain(|segment| !segment.is_empty());
    segments.join("/")
}

pub fn is_internal_artifact(relative_dir: &str) -> bool {
    relative_dir.trim_start_matches(['/', '\\']).starts_with(INTERNAL_ARTIFACTS_DIR)
}

#[derive(Debug, Clone)]
pub struct PublishingContext {
    file: PathBuf,
    file_path: String,
    blob_name: String,
    content_type: String,
}

impl PublishingContext {
    pub fn new(file: PathBuf, relative_dir: &str, path_prefix: &str) -> Result<Self, PublishError> {
        let file_name = file
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .ok_or_else(|| PublishError::Io(format!("{} has no file name", file.display())))?;

        let file_path = artifact_file_path(relative_dir, &file_name)?;
        let blob_name = normalize_path(path_prefix, &file_path)?;
        let content_type = content_type(&file);

        Ok(Self {
            file,
            file_path,
            blob_name,
            content_type,
        })
    }

    pub fn file(&self) -> &Path {
        &self.file
    }

    pub fn file_path(&self) -> &str {
        &self.file_path
    }

    pub fn blob_name(&self) -> &str {
        &self.blob_name
    }

    pub fn content_type(&self) -> &str {
        &self.content_type
    }
}
