//! Configuration management for edgerec.
//!
//! This module provides configuration loading and validation using figment,
//! supporting TOML config files, environment variables, and defaults.

use std::path::PathBuf;
use std::time::Duration;

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "config.toml";

/// Default data directory name.
const DATA_DIR_NAME: &str = "edgerec";

/// Default media directory name inside the data directory.
const MEDIA_DIR_NAME: &str = "media";

/// Application configuration.
///
/// Configuration is loaded from (in order of precedence, highest first):
/// 1. Environment variables (prefixed with `EDGEREC_`)
/// 2. TOML config file at `~/.config/edgerec/config.toml`
/// 3. Default values
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Storage configuration.
    pub storage: StorageConfig,
    /// Upload configuration.
    pub upload: UploadConfig,
    /// Recording configuration.
    pub recording: RecordingConfig,
}

/// Storage-related configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Directory holding recorded media files.
    /// Defaults to `~/.local/share/edgerec/media`.
    pub media_dir: Option<PathBuf>,
    /// Maximum aggregate size of resident media files in bytes.
    pub max_total_bytes: u64,
    /// Minimum free space to keep on the filesystem in bytes.
    pub min_free_bytes: u64,
    /// Enable circular-buffer eviction. When disabled the budget is
    /// never enforced.
    pub circular_buffer_enabled: bool,
    /// File extension used to recognize media files (without the dot).
    pub file_extension: String,
}

/// Upload-related configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UploadConfig {
    /// Enable queue processing and transfers.
    pub enabled: bool,
    /// HTTP(S) endpoint receiving multipart uploads.
    pub endpoint: String,
    /// Optional bearer token sent with every upload.
    pub api_token: Option<String>,
    /// Chunk size in bytes used when streaming file contents.
    pub chunk_size: usize,
    /// Per-attempt transfer timeout in seconds.
    pub transfer_timeout_secs: u64,
    /// Maximum transfer attempts before an entry is dropped.
    pub max_retries: u32,
    /// Delete the local file after a successful upload.
    pub delete_after_upload: bool,
    /// Minimum interval between successive transfer attempts in seconds.
    pub throttle_secs: u64,
    /// Base delay for the increasing retry backoff in seconds.
    pub backoff_base_secs: u64,
    /// Window before a scheduled recording during which transfers must
    /// not run, in seconds.
    pub guard_window_secs: u64,
    /// Interval between watchdog self-checks in seconds.
    pub watchdog_interval_secs: u64,
    /// Continuous transfer time after which the uploader is considered
    /// stuck, in seconds.
    pub stuck_threshold_secs: u64,
}

/// Recording-related configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecordingConfig {
    /// Interval between recording starts in seconds.
    pub interval_secs: u64,
    /// Duration of each recording in seconds.
    pub duration_secs: u64,
    /// Path of the byte source to record from (device node or FIFO).
    pub source: Option<PathBuf>,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            media_dir: None, // Will be resolved to default at runtime
            max_total_bytes: 512 * 1024 * 1024,
            min_free_bytes: 64 * 1024 * 1024,
            circular_buffer_enabled: true,
            file_extension: "avi".to_string(),
        }
    }
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            endpoint: "http://localhost:8000/upload".to_string(),
            api_token: None,
            chunk_size: 8192,
            transfer_timeout_secs: 30,
            max_retries: 3,
            delete_after_upload: true,
            throttle_secs: 5,
            backoff_base_secs: 2,
            guard_window_secs: 5,
            watchdog_interval_secs: 30,
            stuck_threshold_secs: 300,
        }
    }
}

impl Default for RecordingConfig {
    fn default() -> Self {
        Self {
            interval_secs: 60,
            duration_secs: 10,
            source: None,
        }
    }
}

impl Config {
    /// Load configuration from all sources.
    ///
    /// Configuration is loaded in this order (later sources override earlier):
    /// 1. Default values
    /// 2. TOML config file (if exists)
    /// 3. Environment variables (prefixed with `EDGEREC_`)
    ///
    /// # Errors
    ///
    /// Returns an error if configuration loading or parsing fails.
    pub fn load() -> Result<Self> {
        Self::load_from(None)
    }

    /// Load configuration with an optional custom config path.
    ///
    /// # Errors
    ///
    /// Returns an error if configuration loading or parsing fails.
    pub fn load_from(config_path: Option<PathBuf>) -> Result<Self> {
        let config_file = config_path.unwrap_or_else(Self::default_config_path);

        let figment = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Toml::file(&config_file).nested())
            .merge(Env::prefixed("EDGEREC_").split("_"));

        let config: Config = figment.extract()?;
        config.validate()?;
        Ok(config)
    }

    /// Get the default configuration file path.
    #[must_use]
    pub fn default_config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from(".config"))
            .join(DATA_DIR_NAME)
            .join(CONFIG_FILE_NAME)
    }

    /// Get the default data directory path.
    #[must_use]
    pub fn default_data_dir() -> PathBuf {
        dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from(".local/share"))
            .join(DATA_DIR_NAME)
    }

    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if any configuration values are invalid.
    pub fn validate(&self) -> Result<()> {
        if self.recording.interval_secs == 0 {
            return Err(Error::ConfigValidation {
                message: "recording interval_secs must be greater than 0".to_string(),
            });
        }

        if self.recording.duration_secs == 0 {
            return Err(Error::ConfigValidation {
                message: "recording duration_secs must be greater than 0".to_string(),
            });
        }

        // Each cycle must fit a recording plus the guard window, otherwise
        // uploads would never get a chance to run.
        if self.recording.duration_secs + self.upload.guard_window_secs
            >= self.recording.interval_secs
        {
            return Err(Error::ConfigValidation {
                message: format!(
                    "duration_secs ({}) plus guard_window_secs ({}) must be less than interval_secs ({})",
                    self.recording.duration_secs,
                    self.upload.guard_window_secs,
                    self.recording.interval_secs
                ),
            });
        }

        if self.upload.chunk_size == 0 {
            return Err(Error::ConfigValidation {
                message: "upload chunk_size must be greater than 0".to_string(),
            });
        }

        if self.upload.transfer_timeout_secs == 0 {
            return Err(Error::ConfigValidation {
                message: "upload transfer_timeout_secs must be greater than 0".to_string(),
            });
        }

        if self.upload.max_retries == 0 {
            return Err(Error::ConfigValidation {
                message: "upload max_retries must be greater than 0".to_string(),
            });
        }

        if self.upload.enabled
            && !self.upload.endpoint.starts_with("http://")
            && !self.upload.endpoint.starts_with("https://")
        {
            return Err(Error::ConfigValidation {
                message: format!(
                    "upload endpoint must be an http(s) URL: {}",
                    self.upload.endpoint
                ),
            });
        }

        if self.storage.file_extension.is_empty() || self.storage.file_extension.contains('.') {
            return Err(Error::ConfigValidation {
                message: format!(
                    "file_extension must be a bare suffix without a dot: {:?}",
                    self.storage.file_extension
                ),
            });
        }

        Ok(())
    }

    /// Get the media directory, resolving defaults if not set.
    #[must_use]
    pub fn media_dir(&self) -> PathBuf {
        self.storage
            .media_dir
            .clone()
            .unwrap_or_else(|| Self::default_data_dir().join(MEDIA_DIR_NAME))
    }

    /// Get the per-attempt transfer timeout as a Duration.
    #[must_use]
    pub fn transfer_timeout(&self) -> Duration {
        Duration::from_secs(self.upload.transfer_timeout_secs)
    }

    /// Get the upload throttle interval as a Duration.
    #[must_use]
    pub fn throttle_interval(&self) -> Duration {
        Duration::from_secs(self.upload.throttle_secs)
    }

    /// Get the retry backoff base as a Duration.
    #[must_use]
    pub fn backoff_base(&self) -> Duration {
        Duration::from_secs(self.upload.backoff_base_secs)
    }

    /// Get the recording guard window as a Duration.
    #[must_use]
    pub fn guard_window(&self) -> Duration {
        Duration::from_secs(self.upload.guard_window_secs)
    }

    /// Get the watchdog check interval as a Duration.
    #[must_use]
    pub fn watchdog_interval(&self) -> Duration {
        Duration::from_secs(self.upload.watchdog_interval_secs)
    }

    /// Get the stuck-state threshold as a Duration.
    #[must_use]
    pub fn stuck_threshold(&self) -> Duration {
        Duration::from_secs(self.upload.stuck_threshold_secs)
    }

    /// Get the recording interval as a Duration.
    #[must_use]
    pub fn recording_interval(&self) -> Duration {
        Duration::from_secs(self.recording.interval_secs)
    }

    /// Get the recording duration as a Duration.
    #[must_use]
    pub fn recording_duration(&self) -> Duration {
        Duration::from_secs(self.recording.duration_secs)
    }
}
