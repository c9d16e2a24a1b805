use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use crate::path_resolver::compute_path_prefix;
use crate::retry::{
    BackoffSettings, DEFAULT_INITIAL_INTERVAL_MS, DEFAULT_MAX_ELAPSED_SECS,
    DEFAULT_MAX_INTERVAL_MS, DEFAULT_MULTIPLIER, DEFAULT_RANDOMIZATION_FACTOR,
};

const CONFIG_DIR_NAME: &str = ".artifact-publisher";
const CONFIG_FILE_NAME: &str = "config.json";
const ENV_PREFIX: &str = "ARTIFACT_PUBLISHER_";

pub const STORAGE_TYPE: &str = "google-storage";
pub const SIGNED_URL_PATH: &str = "google-signed-urls";
pub const DEFAULT_URL_LIFETIME_SECS: u64 = 60;

pub fn env_var(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|s| !s.trim().is_empty())
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CredentialsKind {
    /// Ambient credentials of the machine running the build.
    Environment,
    #[default]
    Key,
}

impl CredentialsKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            CredentialsKind::Environment => "environment",
            CredentialsKind::Key => "key",
        }
    }

    fn parse(value: &str) -> Self {
        if value.trim().eq_ignore_ascii_case("environment") {
            CredentialsKind::Environment
        } else {
            CredentialsKind::Key
        }
    }
}

/// Storage parameters of the build, as resolved at the moment of the call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageSettings {
    pub credentials_kind: CredentialsKind,
    pub access_key: Option<String>,
    pub access_token: Option<String>,
    pub bucket_name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrySettings {
    #[serde(default = "default_initial_interval_ms")]
    pub initial_interval_ms: u64,
    #[serde(default = "default_multiplier")]
    pub multiplier: f64,
    #[serde(default = "default_randomization_factor")]
    pub randomization_factor: f64,
    #[serde(default = "default_max_interval_ms")]
    pub max_interval_ms: u64,
    #[serde(default = "default_max_elapsed_secs")]
    pub max_elapsed_secs: u64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            initial_interval_ms: DEFAULT_INITIAL_INTERVAL_MS,
            multiplier: DEFAULT_MULTIPLIER,
            randomization_factor: DEFAULT_RANDOMIZATION_FACTOR,
            max_interval_ms: DEFAULT_MAX_INTERVAL_MS,
            max_elapsed_secs: DEFAULT_MAX_ELAPSED_SECS,
        }
    }
}

fn default_initial_interval_ms() -> u64 {
    DEFAULT_INITIAL_INTERVAL_MS
}

fn default_multiplier() -> f64 {
    DEFAULT_MULTIPLIER
}

fn default_randomization_factor() -> f64 {
    DEFAULT_RANDOMIZATION_FACTOR
}

fn default_max_interval_ms() -> u64 {
    DEFAULT_MAX_INTERVAL_MS
}

fn default_max_elapsed_secs() -> u64 {
    DEFAULT_MAX_ELAPSED_SECS
}

fn default_url_lifetime_secs() -> u64 {
    DEFAULT_URL_LIFETIME_SECS
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub server_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub access_user: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub access_code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub bucket_name: Option<String>,
    #[serde(default)]
    pub credentials_type: CredentialsKind,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub access_key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub access_token: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub access_token_file: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub storage_api_url: Option<String>,
    #[serde(default)]
    pub use_signed_url: bool,
    #[serde(default = "default_url_lifetime_secs")]
    pub url_lifetime_secs: u64,
    #[serde(default)]
    pub signed_url_get_cache_enabled: bool,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub path_prefix: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub project_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub build_type_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub build_id: Option<String>,
    #[serde(default)]
    pub retry: RetrySettings,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server_url: None,
            access_user: None,
            access_code: None,
            bucket_name: None,
            credentials_type: CredentialsKind::default(),
            access_key: None,
            access_token: None,
            access_token_file: None,
            storage_api_url: None,
            use_signed_url: false,
            url_lifetime_secs: DEFAULT_URL_LIFETIME_SECS,
            signed_url_get_cache_enabled: false,
            path_prefix: None,
            project_id: None,
            build_type_id: None,
            build_id: None,
            retry: RetrySettings::default(),
        }
    }
}

impl Config {
    /// Reads the config file when present and layers `ARTIFACT_PUBLISHER_*`
    /// environment variables over it.
    pub fn load() -> Result<Self> {
        let mut config = Self::load_from_file()?.unwrap_or_default();
        config.apply_overrides(|key| env_var(&format!("{ENV_PREFIX}{key}")))?;
        Ok(config)
    }

    fn load_from_file() -> Result<Option<Self>> {
        let config_path = Self::config_path()?;
        if !config_path.exists() {
            return Ok(None);
        }

        let contents = fs::read_to_string(&config_path)
            .with_context(|| format!("Failed to read config file {}", config_path.display()))?;
        let config: Config =
            serde_json::from_str(&contents).context("Failed to parse config file")?;
        Ok(Some(config))
    }

    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let strings: [(&str, &mut Option<String>); 12] = [
            ("SERVER_URL", &mut self.server_url),
            ("ACCESS_USER", &mut self.access_user),
            ("ACCESS_CODE", &mut self.access_code),
            ("BUCKET", &mut self.bucket_name),
            ("ACCESS_KEY", &mut self.access_key),
            ("ACCESS_TOKEN", &mut self.access_token),
            ("ACCESS_TOKEN_FILE", &mut self.access_token_file),
            ("STORAGE_API_URL", &mut self.storage_api_url),
            ("PATH_PREFIX", &mut self.path_prefix),
            ("PROJECT_ID", &mut self.project_id),
            ("BUILD_TYPE_ID", &mut self.build_type_id),
            ("BUILD_ID", &mut self.build_id),
        ];
        for (key, slot) in strings {
            if let Some(value) = lookup(key) {
                *slot = Some(value);
            }
        }

        if let Some(kind) = lookup("CREDENTIALS_TYPE") {
            self.credentials_type = CredentialsKind::parse(&kind);
        }
        if let Some(value) = lookup("USE_SIGNED_URL") {
            self.use_signed_url = parse_bool(&value);
        }
        if let Some(value) = lookup("SIGNED_URL_GET_CACHE") {
            self.signed_url_get_cache_enabled = parse_bool(&value);
        }
        if let Some(value) = lookup("URL_LIFETIME_SECS") {
            self.url_lifetime_secs = value
                .trim()
                .parse()
                .with_context(|| format!("Invalid URL lifetime '{value}'"))?;
        }
        if let Some(value) = lookup("RETRY_MAX_ELAPSED_SECS") {
            self.retry.max_elapsed_secs = value
                .trim()
                .parse()
                .with_context(|| format!("Invalid retry budget '{value}'"))?;
        }
        if let Some(value) = lookup("RETRY_INITIAL_INTERVAL_MS") {
            self.retry.initial_interval_ms = value
                .trim()
                .parse()
                .with_context(|| format!("Invalid retry interval '{value}'"))?;
        }

        Ok(())
    }

    pub fn home_dir() -> Result<PathBuf> {
        if let Ok(home) = std::env::var("HOME") {
            return Ok(PathBuf::from(home));
        }
        dirs::home_dir().context(
            "Could not determine home directory. Please ensure HOME environment variable is set.",
        )
    }

    fn config_path() -> Result<PathBuf> {
        if let Some(path) = env_var("ARTIFACT_PUBLISHER_CONFIG") {
            return Ok(PathBuf::from(path));
        }
        let home_dir = Self::home_dir()?;
        Ok(home_dir.join(CONFIG_DIR_NAME).join(CONFIG_FILE_NAME))
    }

    /// Resolves the storage parameters, re-reading the token file if one is
    /// configured so that rotated tokens are picked up.
    pub fn storage_settings(&self) -> Result<StorageSettings> {
        let bucket_name = self
            .bucket_name
            .as_deref()
            .map(str::trim)
            .filter(|bucket| !bucket.is_empty())
            .context("Storage bucket name is not configured")?
            .to_string();

        let access_token = match &self.access_token_file {
            Some(path) => {
                let token = fs::read_to_string(path)
                    .with_context(|| format!("Failed to read access token file {path}"))?;
                Some(token.trim().to_string()).filter(|token| !token.is_empty())
            }
            None => self.access_token.clone(),
        };

        Ok(StorageSettings {
            credentials_kind: self.credentials_type,
            access_key: self.access_key.clone(),
            access_token,
            bucket_name,
        })
    }

    pub fn backoff_settings(&self) -> BackoffSettings {
        BackoffSettings {
            initial_interval: Duration::from_millis(self.retry.initial_interval_ms),
            multiplier: self.retry.multiplier,
            randomization_factor: self.retry.randomization_factor,
            max_interval: Duration::from_millis(self.retry.max_interval_ms),
            max_elapsed_time: Duration::from_secs(self.retry.max_elapsed_secs),
        }
    }

    pub fn path_prefix(&self) -> Result<String> {
        if let Some(prefix) = self.path_prefix.as_deref() {
            return Ok(compute_path_prefix(Some(prefix), None, "", ""));
        }

        let build_type_id = self
            .build_type_id
            .as_deref()
            .context("No path prefix configured and build configuration id is unknown")?;
        let build_id = self
            .build_id
            .as_deref()
            .context("No path prefix configured and build id is unknown")?;

        Ok(compute_path_prefix(
            None,
            self.project_id.as_deref(),
            build_type_id,
            build_id,
        ))
    }

    pub fn signed_url_endpoint(&self) -> Result<String> {
        let server_url = self
            .server_url
            .as_deref()
            .context("Build server URL is not configured")?;
        Ok(format!(
            "{}/httpAuth/plugins/{STORAGE_TYPE}/{SIGNED_URL_PATH}.html",
            server_url.trim_end_matches('/')
        ))
    }
}

fn parse_bool(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}
