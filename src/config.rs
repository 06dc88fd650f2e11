//! Runtime configuration loaded from the environment or a JSON file.

use std::env;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::aggregate::DEFAULT_RATIO_EPSILON;
use crate::data::loader::DEFAULT_TIMESTAMP_FORMATS;
use crate::error::ConfigError;

/// Snapshot of configuration values consumed by the pipeline.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Root directory of the filesystem object store (`<root>/<container>/<key>`).
    pub object_root: PathBuf,
    /// `strftime` formats tried, after RFC 3339, for timestamp columns.
    pub timestamp_formats: Vec<String>,
    /// Epsilon used by ratio requests that do not set their own.
    pub ratio_epsilon: f64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            object_root: PathBuf::from("./data"),
            timestamp_formats: DEFAULT_TIMESTAMP_FORMATS.iter().map(|f| f.to_string()).collect(),
            ratio_epsilon: DEFAULT_RATIO_EPSILON,
        }
    }
}

impl PipelineConfig {
    /// Read `DASH_OBJECT_ROOT`, `DASH_TIMESTAMP_FORMATS` (comma-separated) and
    /// `DASH_RATIO_EPSILON`, falling back to defaults for unset variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Same as [`PipelineConfig::from_env`] with an injectable variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut cfg = Self::default();

        if let Some(root) = lookup("DASH_OBJECT_ROOT") {
            cfg.object_root = PathBuf::from(root);
        }

        if let Some(formats) = lookup("DASH_TIMESTAMP_FORMATS") {
            let parsed: Vec<String> = formats
                .split(',')
                .map(str::trim)
                .filter(|f| !f.is_empty())
                .map(str::to_string)
                .collect();
            if parsed.is_empty() {
                return Err(ConfigError::InvalidValue {
                    key: "DASH_TIMESTAMP_FORMATS".into(),
                    value: formats,
                    reason: "no formats given".into(),
                });
            }
            cfg.timestamp_formats = parsed;
        }

        if let Some(raw) = lookup("DASH_RATIO_EPSILON") {
            cfg.ratio_epsilon = raw.trim().parse().map_err(|e: std::num::ParseFloatError| {
                ConfigError::InvalidValue {
                    key: "DASH_RATIO_EPSILON".into(),
                    value: raw.clone(),
                    reason: e.to_string(),
                }
            })?;
        }

        cfg.validate()?;
        Ok(cfg)
    }

    /// Load from a JSON document; missing fields take their defaults.
    pub fn from_json_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        let cfg: Self = serde_json::from_str(&text)?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if !self.ratio_epsilon.is_finite() {
            return Err(ConfigError::InvalidValue {
                key: "ratio_epsilon".into(),
                value: self.ratio_epsilon.to_string(),
                reason: "must be finite".into(),
            });
        }
        Ok(())
    }
}
