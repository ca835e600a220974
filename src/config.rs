//! Runtime configuration mapping and per-extension option merging.
//!
//! [`Settings`] is a JSON-shaped mapping seeded with defaults, overlaid by
//! caller options and then by configuration files. Extensions see it through
//! a [`SharedSettings`] handle and may write into it while they activate.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use serde_json::{Map, Value};

/// Settings handle shared between the runtime, the orchestrator and extensions.
pub type SharedSettings = Arc<RwLock<Settings>>;

/// Recognized top-level keys.
pub mod keys {
    /// Discovery toggle: bool, root path, or `[flag, depth, roots]`.
    pub const DISCOVER: &str = "discover";
    /// Whether configuration files are loaded before activation.
    pub const LOAD_CONFIG: &str = "loadConfig";
    /// Explicit configuration file; missing is fatal.
    pub const CONFIG_FILE: &str = "configFile";
    /// Allow-list of extension names.
    pub const EXTENSIONS: &str = "extensions";
    /// Discovery cache toggle.
    pub const CACHE_AVAILABLE_EXTENSIONS: &str = "cacheAvailableExtensions";
    /// Discovery cache location (path) or toggle (bool).
    pub const EXTENSIONS_LOCATION_CACHE: &str = "extensionsLocationCache";
    /// Deployment environment tag.
    pub const ENV: &str = "env";
    /// Prefix for environment variable overrides.
    pub const ENV_PREFIX: &str = "envPrefix";
    /// Root directory.
    pub const ROOT_DIRECTORY: &str = "rootDirectory";
    /// Application directory.
    pub const APP_DIRECTORY: &str = "appDirectory";
    /// Directory of the module that created the runtime.
    pub const PARENT_MODULE_DIRECTORY: &str = "parentModuleDirectory";
    /// Scratch directory.
    pub const TEMP_DIRECTORY: &str = "tempDirectory";
    /// Per-extension activation timeout in milliseconds.
    pub const ACTIVATION_TIMEOUT_MS: &str = "activationTimeoutMs";
    /// Logging namespace.
    pub const LOG: &str = "log";
}

/// Discovery depth used when the configuration does not name one.
pub const DEFAULT_DISCOVERY_DEPTH: usize = 3;

const CACHE_FILE_NAME: &str = "extension-locations.json";

/// Normalized discovery configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveryOptions {
    /// Whether discovery runs at all.
    pub enabled: bool,
    /// Maximum directory depth below each root.
    pub depth: usize,
    /// Root directories to scan.
    pub roots: Vec<PathBuf>,
}

impl DiscoveryOptions {
    /// Discovery switched off.
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            depth: DEFAULT_DISCOVERY_DEPTH,
            roots: Vec::new(),
        }
    }
}

/// The runtime configuration mapping.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Settings {
    values: Map<String, Value>,
}

impl Settings {
    /// Create an empty mapping with no defaults.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Create a mapping seeded with the runtime defaults.
    pub fn with_defaults() -> Self {
        let cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
        let cwd = Value::String(cwd.to_string_lossy().into_owned());
        let env = std::env::var("APP_ENV").unwrap_or_else(|_| "development".to_string());

        let mut values = Map::new();
        values.insert(keys::ROOT_DIRECTORY.into(), cwd.clone());
        values.insert(keys::APP_DIRECTORY.into(), cwd.clone());
        values.insert(keys::PARENT_MODULE_DIRECTORY.into(), cwd);
        values.insert(
            keys::TEMP_DIRECTORY.into(),
            Value::String(std::env::temp_dir().to_string_lossy().into_owned()),
        );
        values.insert(keys::DISCOVER.into(), Value::Bool(false));
        values.insert(keys::LOAD_CONFIG.into(), Value::Bool(false));
        values.insert(keys::CACHE_AVAILABLE_EXTENSIONS.into(), Value::Bool(false));
        values.insert(keys::ENV.into(), Value::String(env));
        values.insert(keys::ENV_PREFIX.into(), Value::String("APP".into()));
        values.insert(
            keys::LOG.into(),
            serde_json::json!({ "level": "info", "silent": false, "install": false }),
        );

        Self { values }
    }

    /// Wrap an existing mapping.
    pub fn from_map(values: Map<String, Value>) -> Self {
        Self { values }
    }

    /// Wrap into a shared handle.
    pub fn into_shared(self) -> SharedSettings {
        Arc::new(RwLock::new(self))
    }

    /// Borrow the raw mapping.
    pub fn as_map(&self) -> &Map<String, Value> {
        &self.values
    }

    /// Look up a value by key; dots descend into nested objects.
    pub fn get(&self, key: &str) -> Option<&Value> {
        let mut segments = key.split('.');
        let first = segments.next()?;
        let mut current = self.values.get(first)?;
        for segment in segments {
            current = current.as_object()?.get(segment)?;
        }
        Some(current)
    }

    /// Set a value by key; dots create intermediate objects as needed.
    pub fn set(&mut self, key: &str, value: impl Into<Value>) {
        let segments: Vec<&str> = key.split('.').collect();
        let (last, parents) = match segments.split_last() {
            Some(split) => split,
            None => return,
        };

        let mut current = &mut self.values;
        for segment in parents {
            let slot = current
                .entry(segment.to_string())
                .or_insert_with(|| Value::Object(Map::new()));
            if !slot.is_object() {
                *slot = Value::Object(Map::new());
            }
            current = match slot {
                Value::Object(map) => map,
                _ => return,
            };
        }
        current.insert(last.to_string(), value.into());
    }

    /// Remove a top-level key.
    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.values.remove(key)
    }

    /// Overlay another mapping; objects merge recursively, everything else replaces.
    pub fn overlay(&mut self, other: Map<String, Value>) {
        deep_merge(&mut self.values, other);
    }

    /// String value for a key.
    pub fn string(&self, key: &str) -> Option<&str> {
        self.get(key).and_then(Value::as_str)
    }

    /// Boolean value for a key.
    pub fn bool(&self, key: &str) -> Option<bool> {
        self.get(key).and_then(Value::as_bool)
    }

    /// Path value for a key.
    pub fn path(&self, key: &str) -> Option<PathBuf> {
        self.string(key).map(PathBuf::from)
    }

    /// The root directory.
    pub fn root_directory(&self) -> PathBuf {
        self.path(keys::ROOT_DIRECTORY)
            .unwrap_or_else(|| PathBuf::from("."))
    }

    /// The application directory, falling back to the root directory.
    pub fn app_directory(&self) -> PathBuf {
        self.path(keys::APP_DIRECTORY)
            .unwrap_or_else(|| self.root_directory())
    }

    /// The scratch directory.
    pub fn temp_directory(&self) -> PathBuf {
        self.path(keys::TEMP_DIRECTORY)
            .unwrap_or_else(std::env::temp_dir)
    }

    /// The deployment environment tag.
    pub fn env(&self) -> &str {
        self.string(keys::ENV).unwrap_or("development")
    }

    /// Prefix for environment variable overrides.
    pub fn env_prefix(&self) -> &str {
        self.string(keys::ENV_PREFIX).unwrap_or("APP")
    }

    /// Whether configuration files should be loaded.
    pub fn load_config(&self) -> bool {
        self.bool(keys::LOAD_CONFIG).unwrap_or(false)
    }

    /// Explicit configuration file, resolved against the application directory.
    pub fn config_file(&self) -> Option<PathBuf> {
        self.path(keys::CONFIG_FILE)
            .map(|p| resolve_against(&self.app_directory(), &p))
    }

    /// Allow-list of extension names, if configured.
    pub fn allow_list(&self) -> Option<Vec<String>> {
        let list = self.get(keys::EXTENSIONS)?.as_array()?;
        Some(
            list.iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect(),
        )
    }

    /// Normalize the `discover` value into a [`DiscoveryOptions`].
    ///
    /// Accepts a boolean, a root path (implies enabled), an array
    /// `[flag, depth, roots]` where `roots` is a path or a list of paths, or an
    /// object with the same three fields.
    pub fn discovery(&self) -> DiscoveryOptions {
        let root = self.root_directory();
        let default_roots = || vec![root.clone()];

        let value = match self.get(keys::DISCOVER) {
            Some(value) => value,
            None => return DiscoveryOptions::disabled(),
        };

        match value {
            Value::Bool(enabled) => DiscoveryOptions {
                enabled: *enabled,
                depth: DEFAULT_DISCOVERY_DEPTH,
                roots: default_roots(),
            },
            Value::String(path) => DiscoveryOptions {
                enabled: true,
                depth: DEFAULT_DISCOVERY_DEPTH,
                roots: vec![resolve_against(&root, Path::new(path))],
            },
            Value::Array(parts) => {
                let enabled = parts.first().and_then(Value::as_bool).unwrap_or(true);
                let depth = parts
                    .get(1)
                    .and_then(Value::as_u64)
                    .map(depth_from)
                    .unwrap_or(DEFAULT_DISCOVERY_DEPTH);
                let roots = parts
                    .get(2)
                    .map(|v| roots_from(&root, v))
                    .filter(|r| !r.is_empty())
                    .unwrap_or_else(default_roots);
                DiscoveryOptions { enabled, depth, roots }
            }
            Value::Object(map) => {
                let enabled = map.get("enabled").and_then(Value::as_bool).unwrap_or(true);
                let depth = map
                    .get("depth")
                    .and_then(Value::as_u64)
                    .map(depth_from)
                    .unwrap_or(DEFAULT_DISCOVERY_DEPTH);
                let roots = map
                    .get("roots")
                    .map(|v| roots_from(&root, v))
                    .filter(|r| !r.is_empty())
                    .unwrap_or_else(default_roots);
                DiscoveryOptions { enabled, depth, roots }
            }
            _ => DiscoveryOptions::disabled(),
        }
    }

    /// Whether discovery results should be cached.
    pub fn discovery_cache_enabled(&self) -> bool {
        self.bool(keys::CACHE_AVAILABLE_EXTENSIONS).unwrap_or(false)
            || self.bool(keys::EXTENSIONS_LOCATION_CACHE).unwrap_or(false)
            || self.string(keys::EXTENSIONS_LOCATION_CACHE).is_some()
    }

    /// Location of the discovery cache file.
    pub fn discovery_cache_path(&self) -> PathBuf {
        match self.path(keys::EXTENSIONS_LOCATION_CACHE) {
            Some(path) => resolve_against(&self.root_directory(), &path),
            None => self
                .temp_directory()
                .join("extension-runtime")
                .join(CACHE_FILE_NAME),
        }
    }

    /// Per-extension activation timeout.
    pub fn activation_timeout(&self) -> Option<Duration> {
        self.get(keys::ACTIVATION_TIMEOUT_MS)
            .and_then(Value::as_u64)
            .filter(|ms| *ms > 0)
            .map(Duration::from_millis)
    }

    /// Whether runtime log output is silenced.
    pub fn log_silent(&self) -> bool {
        self.bool("log.silent").unwrap_or(false)
    }

    /// Configured log level directive.
    pub fn log_level(&self) -> &str {
        self.string("log.level").unwrap_or("info")
    }

    /// The configuration namespace of an extension, keyed by lower-cased name.
    pub fn namespace(&self, extension_name: &str) -> Option<&Map<String, Value>> {
        self.values
            .get(&extension_name.to_lowercase())
            .and_then(Value::as_object)
    }
}

/// Shallow-merge configuration overrides onto an extension's default options.
///
/// Keys present in `overrides` win; keys only present in `defaults` keep their value.
pub fn merge_options(
    defaults: &Map<String, Value>,
    overrides: Option<&Map<String, Value>>,
) -> Map<String, Value> {
    let mut merged = defaults.clone();
    if let Some(overrides) = overrides {
        for (key, value) in overrides {
            merged.insert(key.clone(), value.clone());
        }
    }
    merged
}

/// Recursively merge `source` into `target`.
pub fn deep_merge(target: &mut Map<String, Value>, source: Map<String, Value>) {
    for (key, value) in source {
        match (target.get_mut(&key), value) {
            (Some(Value::Object(existing)), Value::Object(incoming)) => {
                deep_merge(existing, incoming);
            }
            (_, value) => {
                target.insert(key, value);
            }
        }
    }
}

fn depth_from(depth: u64) -> usize {
    usize::try_from(depth).unwrap_or(usize::MAX)
}

fn resolve_against(base: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base.join(path)
    }
}

fn roots_from(base: &Path, value: &Value) -> Vec<PathBuf> {
    match value {
        Value::String(path) => vec![resolve_against(base, Path::new(path))],
        Value::Array(items) => items
            .iter()
            .filter_map(Value::as_str)
            .map(|p| resolve_against(base, Path::new(p)))
            .collect(),
        _ => Vec::new(),
    }
}
