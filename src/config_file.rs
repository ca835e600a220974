//! Configuration files and environment overrides.
//!
//! Sources are layered in this order, later ones winning:
//!
//! 1. `<appDirectory>/config/default.toml` (or `.json`)
//! 2. `<appDirectory>/config/<env>.toml` (or `.json`)
//! 3. the explicit `configFile`, which must exist when set
//! 4. environment variables `<PREFIX>_<KEY>__<NESTED>=value`

use std::path::{Path, PathBuf};

use serde_json::{Map, Value};

use crate::config::{deep_merge, Settings};
use crate::error::{Error, Result};

/// Directory below the application directory holding layered config files.
pub const CONFIG_DIR: &str = "config";

const EXTENSIONS: &[&str] = &["toml", "json"];

/// Loads the configuration overlay for a runtime.
#[derive(Debug, Clone)]
pub struct ConfigLoader {
    config_dir: PathBuf,
    env: String,
    explicit: Option<PathBuf>,
    env_prefix: String,
}

impl ConfigLoader {
    /// Build a loader from the current settings.
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            config_dir: settings.app_directory().join(CONFIG_DIR),
            env: settings.env().to_string(),
            explicit: settings.config_file(),
            env_prefix: settings.env_prefix().to_string(),
        }
    }

    /// Directory searched for layered files.
    pub fn config_dir(&self) -> &Path {
        &self.config_dir
    }

    /// Read every source and merge them into one overlay.
    pub fn load(&self) -> Result<Map<String, Value>> {
        let mut merged = Map::new();

        for stem in ["default", self.env.as_str()] {
            if let Some(path) = self.layered_file(stem) {
                tracing::debug!("Loading configuration from {}", path.display());
                deep_merge(&mut merged, parse_file(&path)?);
            }
        }

        if let Some(path) = &self.explicit {
            if !path.is_file() {
                return Err(Error::ConfigNotFound(path.clone()));
            }
            tracing::debug!("Loading configuration from {}", path.display());
            deep_merge(&mut merged, parse_file(path)?);
        }

        deep_merge(&mut merged, env_overrides(&self.env_prefix, std::env::vars()));
        Ok(merged)
    }

    fn layered_file(&self, stem: &str) -> Option<PathBuf> {
        EXTENSIONS
            .iter()
            .map(|ext| self.config_dir.join(format!("{stem}.{ext}")))
            .find(|path| path.is_file())
    }
}

/// Parse a TOML or JSON configuration file into a mapping.
///
/// Files with a `.json` extension are read as JSON, everything else as TOML.
pub fn parse_file(path: &Path) -> Result<Map<String, Value>> {
    let content = std::fs::read_to_string(path)?;
    let value: Value = match path.extension().and_then(|e| e.to_str()) {
        Some("json") => {
            serde_json::from_str(&content).map_err(|e| Error::config_parse(path, e.to_string()))?
        }
        _ => toml::from_str(&content).map_err(|e| Error::config_parse(path, e.to_string()))?,
    };

    match value {
        Value::Object(map) => Ok(map),
        _ => Err(Error::config_parse(path, "top level must be a table")),
    }
}

/// Collect overrides from `<PREFIX>_` variables.
///
/// `APP_ROUTER__PORT=9000` becomes `{"router": {"port": 9000}}`. Segments are
/// lower-cased; values parse as JSON scalars when they can and stay strings
/// otherwise.
pub fn env_overrides<I>(prefix: &str, vars: I) -> Map<String, Value>
where
    I: IntoIterator<Item = (String, String)>,
{
    let marker = format!("{prefix}_");
    let mut overrides = Map::new();

    for (key, raw) in vars {
        let Some(rest) = key.strip_prefix(&marker) else {
            continue;
        };
        let segments: Vec<String> = rest
            .split("__")
            .map(str::to_lowercase)
            .collect();
        if segments.iter().any(String::is_empty) {
            continue;
        }

        let value = match serde_json::from_str::<Value>(&raw) {
            Ok(v) if !v.is_object() && !v.is_array() => v,
            _ => Value::String(raw),
        };

        let nested = segments
            .iter()
            .rev()
            .fold(value, |acc, segment| {
                let mut map = Map::new();
                map.insert(segment.clone(), acc);
                Value::Object(map)
            });
        if let Value::Object(map) = nested {
            deep_merge(&mut overrides, map);
        }
    }

    overrides
}
