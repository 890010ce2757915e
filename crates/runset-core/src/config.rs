//! Dataset configuration.
//!
//! A [`DatasetConfig`] enumerates every option a dataset can be built with.
//! Unknown keys are rejected when deserializing, so a misspelled option fails
//! loudly instead of being ignored.
//!
//! JSON layout example:
//!
//! ```json
//! {
//!   "local_station_id": "mt01",
//!   "remote_station_id": "rr01",
//!   "sample_rate": 1.0,
//!   "local_open_mode": "read_write"
//! }
//! ```

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use snafu::prelude::*;

use crate::archive::OpenMode;

/// Errors raised while loading or validating a [`DatasetConfig`].
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum ConfigError {
    /// Reading the config file failed.
    #[snafu(display("Failed to read dataset config at {path}: {source}"))]
    ReadConfig {
        /// Config file path.
        path: String,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// The config is not valid JSON or has unknown/mistyped keys.
    #[snafu(display("Invalid dataset config: {source}"))]
    ParseConfig {
        /// Underlying JSON error.
        source: serde_json::Error,
    },

    /// `local_station_id` is empty.
    #[snafu(display("local_station_id must be a non-empty station id"))]
    EmptyLocalStation,

    /// The remote station is the local station.
    #[snafu(display("remote_station_id {station_id} must differ from local_station_id"))]
    RemoteIsLocal {
        /// The duplicated station id.
        station_id: String,
    },

    /// `sample_rate` is zero, negative, or not finite.
    #[snafu(display("sample_rate must be a positive number, got {sample_rate}"))]
    InvalidSampleRate {
        /// The rejected rate.
        sample_rate: f64,
    },

    /// A configured archive path does not exist.
    #[snafu(display("Cannot find {role} archive: {path}"))]
    ArchivePathNotFound {
        /// `local` or `remote`.
        role: &'static str,
        /// The missing path.
        path: String,
    },
}

/// Result alias for configuration operations.
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Options for building a dataset from a run inventory.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DatasetConfig {
    /// Station whose response is being estimated.
    pub local_station_id: String,

    /// Optional remote reference station.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remote_station_id: Option<String>,

    /// Keep only inventory runs sampled at this rate.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sample_rate: Option<f64>,

    /// Archive for local rows whose inventory record has no `archive_path`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub local_archive_path: Option<PathBuf>,

    /// Archive for remote rows whose inventory record has no `archive_path`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remote_archive_path: Option<PathBuf>,

    /// Mode the local archive is opened with at processing time.
    #[serde(default)]
    pub local_open_mode: OpenMode,
}

impl DatasetConfig {
    /// Single-station config for `local_station_id`.
    pub fn single_station(local_station_id: impl Into<String>) -> Self {
        Self {
            local_station_id: local_station_id.into(),
            ..Self::default()
        }
    }

    /// Remote-reference config.
    pub fn with_remote(
        local_station_id: impl Into<String>,
        remote_station_id: impl Into<String>,
    ) -> Self {
        Self {
            local_station_id: local_station_id.into(),
            remote_station_id: Some(remote_station_id.into()),
            ..Self::default()
        }
    }

    /// Parse and validate a config from JSON text.
    pub fn from_json_str(text: &str) -> ConfigResult<Self> {
        let config: Self = serde_json::from_str(text).context(ParseConfigSnafu)?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse, and validate a config file.
    pub fn from_path(path: impl AsRef<Path>) -> ConfigResult<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).context(ReadConfigSnafu {
            path: path.display().to_string(),
        })?;
        Self::from_json_str(&text)
    }

    /// Check the options are usable together.
    pub fn validate(&self) -> ConfigResult<()> {
        ensure!(!self.local_station_id.trim().is_empty(), EmptyLocalStationSnafu);

        if let Some(remote) = &self.remote_station_id {
            ensure!(
                remote != &self.local_station_id,
                RemoteIsLocalSnafu {
                    station_id: remote.clone(),
                }
            );
        }

        if let Some(sample_rate) = self.sample_rate {
            ensure!(
                sample_rate.is_finite() && sample_rate > 0.0,
                InvalidSampleRateSnafu { sample_rate }
            );
        }

        for (role, path) in [
            ("local", &self.local_archive_path),
            ("remote", &self.remote_archive_path),
        ] {
            if let Some(path) = path {
                ensure!(
                    path.exists(),
                    ArchivePathNotFoundSnafu {
                        role,
                        path: path.display().to_string(),
                    }
                );
            }
        }

        Ok(())
    }

    /// Station ids the dataset is restricted to (local first).
    pub fn station_ids(&self) -> Vec<&str> {
        let mut ids = vec![self.local_station_id.as_str()];
        if let Some(remote) = &self.remote_station_id {
            ids.push(remote.as_str());
        }
        ids
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_full_config() {
        let cfg = DatasetConfig::from_json_str(
            r#"{"local_station_id": "mt01", "remote_station_id": "rr01",
                "sample_rate": 1.0, "local_open_mode": "read_write"}"#,
        )
        .unwrap();
        assert_eq!(cfg.station_ids(), vec!["mt01", "rr01"]);
        assert_eq!(cfg.local_open_mode, OpenMode::ReadWrite);
    }

    #[test]
    fn rejects_unknown_keys() {
        let err =
            DatasetConfig::from_json_str(r#"{"local_station_id": "mt01", "remote": "rr01"}"#)
                .unwrap_err();
        assert!(matches!(err, ConfigError::ParseConfig { .. }));
        assert!(err.to_string().contains("remote"), "{err}");
    }

    #[test]
    fn rejects_inconsistent_options() {
        assert!(matches!(
            DatasetConfig::single_station(" ").validate().unwrap_err(),
            ConfigError::EmptyLocalStation
        ));
        assert!(matches!(
            DatasetConfig::with_remote("mt01", "mt01").validate().unwrap_err(),
            ConfigError::RemoteIsLocal { .. }
        ));
        let cfg = DatasetConfig {
            sample_rate: Some(0.0),
            ..DatasetConfig::single_station("mt01")
        };
        assert!(matches!(
            cfg.validate().unwrap_err(),
            ConfigError::InvalidSampleRate { .. }
        ));
    }

    #[test]
    fn checks_archive_paths_exist() -> Result<(), Box<dyn std::error::Error>> {
        let tmp = tempfile::TempDir::new()?;
        let archive = tmp.path().join("mt01.h5");
        std::fs::write(&archive, b"")?;

        let mut cfg = DatasetConfig::single_station("mt01");
        cfg.local_archive_path = Some(archive);
        cfg.validate()?;

        cfg.remote_archive_path = Some(tmp.path().join("missing.h5"));
        let err = cfg.validate().unwrap_err();
        assert!(matches!(err, ConfigError::ArchivePathNotFound { role: "remote", .. }));
        Ok(())
    }

    #[test]
    fn loads_from_file() -> Result<(), Box<dyn std::error::Error>> {
        let tmp = tempfile::TempDir::new()?;
        let path = tmp.path().join("dataset.json");
        std::fs::write(&path, r#"{"local_station_id": "mt01"}"#)?;
        let cfg = DatasetConfig::from_path(&path)?;
        assert_eq!(cfg, DatasetConfig::single_station("mt01"));
        Ok(())
    }
}
