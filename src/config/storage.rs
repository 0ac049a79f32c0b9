//! Object storage configuration.
//!
//! Settings for the hosted storage service that receives release artifacts. They can
//! come from a `fleetdesk.toml` file (`[storage]` table) or from environment variables
//! (`STORAGE_ENDPOINT`, `STORAGE_API_KEY`, `STORAGE_BUCKET`, `UPLOAD_CHUNK_SIZE`),
//! usually loaded from `.env` with `dotenvy`.

use crate::errors::{Error, Result};
use serde::Deserialize;
use std::path::Path;

/// Chunk size used by the resumable upload protocol unless configured otherwise.
pub const DEFAULT_CHUNK_SIZE: usize = 6 * 1024 * 1024;

/// Bucket that holds release artifacts unless configured otherwise.
pub const DEFAULT_BUCKET: &str = "releases";

/// Configuration structure representing the whole `fleetdesk.toml` file
#[derive(Debug, Deserialize)]
pub struct Config {
    /// Storage service settings
    pub storage: StorageConfig,
}

/// Connection settings for the storage service
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct StorageConfig {
    /// Base URL of the backend (e.g., `https://project.example.co`)
    pub endpoint: String,
    /// Project API key sent as the `apikey` header
    pub api_key: String,
    /// Bucket that holds release artifacts
    #[serde(default = "default_bucket")]
    pub bucket: String,
    /// Bytes sent per resumable upload request
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
}

fn default_bucket() -> String {
    DEFAULT_BUCKET.to_string()
}

const fn default_chunk_size() -> usize {
    DEFAULT_CHUNK_SIZE
}

impl StorageConfig {
    /// Builds the configuration from process environment variables.
    ///
    /// # Errors
    /// Returns an error if a required variable is missing or a value is invalid.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the configuration from any key lookup (environment, test map, ...).
    ///
    /// # Errors
    /// Returns an error if `STORAGE_ENDPOINT` or `STORAGE_API_KEY` is missing, or if
    /// `UPLOAD_CHUNK_SIZE` is not a positive integer.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let required = |key: &str| {
            lookup(key).ok_or_else(|| Error::Config {
                message: format!("{key} is not set"),
            })
        };

        let chunk_size = match lookup("UPLOAD_CHUNK_SIZE") {
            Some(raw) => raw.trim().parse::<usize>().map_err(|e| Error::Config {
                message: format!("UPLOAD_CHUNK_SIZE must be a byte count: {e}"),
            })?,
            None => DEFAULT_CHUNK_SIZE,
        };

        let config = Self {
            endpoint: required("STORAGE_ENDPOINT")?,
            api_key: required("STORAGE_API_KEY")?,
            bucket: lookup("STORAGE_BUCKET").unwrap_or_else(default_bucket),
            chunk_size,
        };
        config.validate()?;
        Ok(config)
    }

    /// Checks that the settings are usable.
    ///
    /// # Errors
    /// Returns an error for an empty endpoint, key or bucket, or a zero chunk size.
    pub fn validate(&self) -> Result<()> {
        if self.endpoint.trim().is_empty() {
            return Err(Error::Config {
                message: "Storage endpoint cannot be empty".to_string(),
            });
        }
        if self.api_key.trim().is_empty() {
            return Err(Error::Config {
                message: "Storage API key cannot be empty".to_string(),
            });
        }
        if self.bucket.trim().is_empty() {
            return Err(Error::Config {
                message: "Storage bucket cannot be empty".to_string(),
            });
        }
        if self.chunk_size == 0 {
            return Err(Error::Config {
                message: "Upload chunk size must be greater than zero".to_string(),
            });
        }
        Ok(())
    }

    /// Endpoint without a trailing slash, ready for path concatenation.
    #[must_use]
    pub fn base_url(&self) -> &str {
        self.endpoint.trim_end_matches('/')
    }
}

/// Loads configuration from a TOML file
///
/// # Errors
/// Returns an error if:
/// - The file cannot be read
/// - The TOML syntax is invalid
/// - Required fields are missing or invalid
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<Config> {
    let contents = std::fs::read_to_string(path.as_ref()).map_err(|e| Error::Config {
        message: format!("Failed to read config file: {e}"),
    })?;

    let config: Config = toml::from_str(&contents).map_err(|e| Error::Config {
        message: format!("Failed to parse config file: {e}"),
    })?;
    config.storage.validate()?;
    Ok(config)
}

/// Loads storage settings from `fleetdesk.toml` when it exists, otherwise from the
/// environment.
///
/// # Errors
/// Returns an error if neither source yields a complete configuration.
pub fn load_storage_config() -> Result<StorageConfig> {
    let path = Path::new("fleetdesk.toml");
    if path.exists() {
        tracing::debug!("Loading storage settings from {:?}", path);
        return load_config(path).map(|config| config.storage);
    }
    StorageConfig::from_env()
}
