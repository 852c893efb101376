//! Configuration file support

use crate::generation::{Credential, ResponseEnvelope, StalePolicy};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Name of the per-project config file
pub const CONFIG_FILE_NAME: &str = "imagen.toml";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Config file not found: {}", .0.display())]
    NotFound(PathBuf),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid config file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Could not serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("Invalid value for {key}: {value}")]
    InvalidValue { key: &'static str, value: String },
}

/// Settings for the controller and the HTTP adapter
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Inference endpoint identifying the hosted model
    #[serde(default = "default_endpoint")]
    pub endpoint: String,

    /// Bearer token; normally supplied through HF_TOKEN rather than the file
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<Credential>,

    /// Requested response encoding
    #[serde(default = "default_response_format")]
    pub response_format: String,

    /// Upper bound on one call in seconds; 0 waits indefinitely
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    #[serde(default)]
    pub stale_policy: StalePolicy,

    /// Where the interactive form writes generated images
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,

    /// Shape of a successful response body
    #[serde(default)]
    pub envelope: ResponseEnvelope,
}

fn default_endpoint() -> String {
    "https://router.huggingface.co/hf-inference/models/black-forest-labs/FLUX.1-dev".to_string()
}

fn default_response_format() -> String {
    "b64_json".to_string()
}

fn default_timeout_secs() -> u64 {
    120
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("./images")
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            endpoint: default_endpoint(),
            token: None,
            response_format: default_response_format(),
            envelope: ResponseEnvelope::default(),
            timeout_secs: default_timeout_secs(),
            stale_policy: StalePolicy::default(),
            output_dir: default_output_dir(),
        }
    }
}

impl Settings {
    /// Load settings from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(ConfigError::NotFound(path.to_path_buf()));
        }
        let contents = std::fs::read_to_string(path)?;
        Self::from_toml(&contents)
    }

    pub fn from_toml(contents: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(contents)?)
    }

    /// Save settings to a TOML file
    pub fn to_file<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        let contents = toml::to_string_pretty(self)?;
        std::fs::write(path, contents)?;
        Ok(())
    }

    /// Load from `explicit` if given, otherwise from the first config file found,
    /// otherwise defaults
    pub fn load(explicit: Option<&Path>) -> Result<Self, ConfigError> {
        match explicit {
            Some(path) => Self::from_file(path),
            None => match find_config() {
                Some(path) => {
                    tracing::info!("Loading config from: {}", path.display());
                    Self::from_file(path)
                }
                None => {
                    tracing::debug!("No {} found, using defaults", CONFIG_FILE_NAME);
                    Ok(Self::default())
                }
            },
        }
    }

    /// Apply environment overrides: HF_TOKEN, IMAGEN_ENDPOINT, IMAGEN_TIMEOUT_SECS
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(token) = lookup("HF_TOKEN").filter(|t| !t.trim().is_empty()) {
            self.token = Some(Credential::new(token));
        }
        if let Some(endpoint) = lookup("IMAGEN_ENDPOINT") {
            self.endpoint = endpoint;
        }
        if let Some(raw) = lookup("IMAGEN_TIMEOUT_SECS") {
            self.timeout_secs = raw.trim().parse().map_err(|_| ConfigError::InvalidValue {
                key: "IMAGEN_TIMEOUT_SECS",
                value: raw.clone(),
            })?;
        }
        Ok(())
    }

    /// Timeout as a duration; `None` when disabled
    pub fn timeout(&self) -> Option<Duration> {
        (self.timeout_secs > 0).then(|| Duration::from_secs(self.timeout_secs))
    }

    /// Example config written by `imagen init-config`
    pub fn example() -> Self {
        Self {
            envelope: ResponseEnvelope::Binary,
            ..Self::default()
        }
    }
}

/// Look for `./imagen.toml`, then `<config dir>/imagen/config.toml`
pub fn find_config() -> Option<PathBuf> {
    let local_config = PathBuf::from(CONFIG_FILE_NAME);
    if local_config.exists() {
        return Some(local_config);
    }

    dirs::config_dir()
        .map(|dir| dir.join("imagen").join("config.toml"))
        .filter(|path| path.exists())
}
