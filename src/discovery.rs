//! Discovery of extension descriptor files below a set of root directories.
//!
//! Discovery is best-effort: missing roots are skipped, malformed descriptor
//! files are logged and skipped, and cache problems fall back to walking.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;

use serde::{Deserialize, Serialize};
use walkdir::WalkDir;

use crate::config::{DiscoveryOptions, DEFAULT_DISCOVERY_DEPTH};
use crate::descriptor::{parse_descriptor_file, ExtensionDescriptor, DESCRIPTOR_FILE_NAMES};
use crate::error::Result;

const CACHE_VERSION: u32 = 2;

/// Configuration for the discovery scanner.
#[derive(Debug, Clone)]
pub struct DiscoveryConfig {
    /// Maximum directory depth below each root; 0 scans the root only.
    pub max_depth: usize,
    /// Descriptor file names, in preference order.
    pub file_names: Vec<String>,
    /// Location cache file; `None` disables caching.
    pub cache_path: Option<PathBuf>,
    /// Whether hidden directories are descended into.
    pub include_hidden: bool,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            max_depth: DEFAULT_DISCOVERY_DEPTH,
            file_names: DESCRIPTOR_FILE_NAMES.iter().map(|s| s.to_string()).collect(),
            cache_path: None,
            include_hidden: false,
        }
    }
}

impl DiscoveryConfig {
    /// Create a new discovery configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the maximum depth.
    pub fn with_max_depth(mut self, depth: usize) -> Self {
        self.max_depth = depth;
        self
    }

    /// Set the descriptor file names.
    pub fn with_file_names(mut self, names: Vec<String>) -> Self {
        self.file_names = names;
        self
    }

    /// Enable the location cache at the given path.
    pub fn with_cache(mut self, path: impl Into<PathBuf>) -> Self {
        self.cache_path = Some(path.into());
        self
    }

    /// Descend into hidden directories.
    pub fn with_include_hidden(mut self, include: bool) -> Self {
        self.include_hidden = include;
        self
    }
}

/// Walks root directories for descriptor files and parses them.
#[derive(Debug, Clone)]
pub struct DiscoveryScanner {
    config: DiscoveryConfig,
}

impl DiscoveryScanner {
    /// Create a new scanner.
    pub fn new(config: DiscoveryConfig) -> Self {
        Self { config }
    }

    /// Get the scanner configuration.
    pub fn config(&self) -> &DiscoveryConfig {
        &self.config
    }

    /// Discover descriptors below every root, in root order then breadth-first order.
    pub fn discover(&self, roots: &[PathBuf]) -> Vec<ExtensionDescriptor> {
        let cache = self.config.cache_path.as_deref().map(DiscoveryCache::new);
        let mut cache_file = cache.as_ref().map(DiscoveryCache::load);
        let mut cache_dirty = false;

        let mut descriptors = Vec::new();
        for root in roots {
            if !root.is_dir() {
                tracing::debug!("Skipping missing extension root {}", root.display());
                continue;
            }

            let signature = root_signature(root, &self.config);
            let cached = cache_file
                .as_ref()
                .and_then(|file| file.lookup(root, &signature));

            let locations = match cached {
                Some(locations) => {
                    tracing::debug!("Using cached extension locations for {}", root.display());
                    locations
                }
                None => {
                    let locations = self.locate(root);
                    if let Some(file) = cache_file.as_mut() {
                        file.insert(root, signature, &locations);
                        cache_dirty = true;
                    }
                    locations
                }
            };

            for location in locations {
                match parse_descriptor_file(&location) {
                    Ok(found) => {
                        tracing::debug!(
                            "Found {} extension(s) in {}",
                            found.len(),
                            location.display()
                        );
                        descriptors.extend(found);
                    }
                    Err(e) => {
                        tracing::warn!("Skipping extension descriptor {}: {}", location.display(), e);
                    }
                }
            }
        }

        if let (Some(cache), Some(file)) = (cache, cache_file) {
            if cache_dirty {
                if let Err(e) = cache.store(&file) {
                    tracing::warn!("Failed to write extension location cache: {}", e);
                }
            }
        }

        descriptors
    }

    /// Locate descriptor files below a root, breadth-first with name-sorted siblings.
    ///
    /// At most one descriptor file is taken per directory, chosen by the
    /// configured preference order.
    pub fn locate(&self, root: &Path) -> Vec<PathBuf> {
        let include_hidden = self.config.include_hidden;
        let walker = WalkDir::new(root)
            .max_depth(self.config.max_depth.saturating_add(1))
            .sort_by_file_name()
            .into_iter()
            .filter_entry(move |entry| {
                include_hidden
                    || entry.depth() == 0
                    || !entry.file_type().is_dir()
                    || !entry.file_name().to_string_lossy().starts_with('.')
            });

        // directory -> (preference rank, depth, walk position, path)
        let mut per_dir: HashMap<PathBuf, (usize, usize, usize, PathBuf)> = HashMap::new();
        for (position, entry) in walker.enumerate() {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    tracing::warn!("Error while scanning {}: {}", root.display(), e);
                    continue;
                }
            };
            if !entry.file_type().is_file() {
                continue;
            }

            let file_name = entry.file_name().to_string_lossy();
            let rank = match self.config.file_names.iter().position(|n| *n == file_name) {
                Some(rank) => rank,
                None => continue,
            };

            let dir = entry.path().parent().unwrap_or(root).to_path_buf();
            let candidate = (rank, entry.depth(), position, entry.path().to_path_buf());
            match per_dir.get(&dir) {
                Some(existing) if existing.0 <= rank => {}
                _ => {
                    per_dir.insert(dir, candidate);
                }
            }
        }

        let mut found: Vec<(usize, usize, PathBuf)> = per_dir
            .into_values()
            .map(|(_, depth, position, path)| (depth, position, path))
            .collect();
        found.sort_by_key(|(depth, position, _)| (*depth, *position));
        found.into_iter().map(|(_, _, path)| path).collect()
    }
}

impl Default for DiscoveryScanner {
    fn default() -> Self {
        Self::new(DiscoveryConfig::default())
    }
}

/// Discover descriptors below `roots`, optionally caching descriptor locations.
pub fn discover(
    roots: &[PathBuf],
    max_depth: usize,
    cache_path: Option<&Path>,
) -> Vec<ExtensionDescriptor> {
    let mut config = DiscoveryConfig::new().with_max_depth(max_depth);
    if let Some(path) = cache_path {
        config = config.with_cache(path);
    }
    DiscoveryScanner::new(config).discover(roots)
}

/// Build a scanner from normalized discovery options.
pub fn scanner_for(options: &DiscoveryOptions, cache_path: Option<PathBuf>) -> DiscoveryScanner {
    let mut config = DiscoveryConfig::new().with_max_depth(options.depth);
    config.cache_path = cache_path;
    DiscoveryScanner::new(config)
}

/// Cache key for one root: path, modification time, depth and file names.
fn root_signature(root: &Path, config: &DiscoveryConfig) -> String {
    let modified = std::fs::metadata(root)
        .and_then(|m| m.modified())
        .ok()
        .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
        .map(|d| d.as_nanos())
        .unwrap_or(0);

    let canonical = format!(
        "root:{},modified:{},depth:{},files:{}",
        root.display(),
        modified,
        config.max_depth,
        config.file_names.join("|")
    );
    blake3::hash(canonical.as_bytes()).to_hex().to_string()
}

/// Cached descriptor locations for one root.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheEntry {
    /// Root signature the locations were computed under.
    pub signature: String,
    /// Descriptor file paths in discovery order.
    pub locations: Vec<PathBuf>,
}

/// Persisted descriptor locations, one entry per root path.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CacheFile {
    /// Format version.
    pub version: u32,
    /// Root path -> latest entry for that root.
    pub entries: BTreeMap<PathBuf, CacheEntry>,
}

impl CacheFile {
    /// Cached locations for a root, if the signature matches and every
    /// location still exists.
    pub fn lookup(&self, root: &Path, signature: &str) -> Option<Vec<PathBuf>> {
        let entry = self.entries.get(root)?;
        if entry.signature == signature && entry.locations.iter().all(|p| p.is_file()) {
            Some(entry.locations.clone())
        } else {
            None
        }
    }

    /// Record locations for a root, replacing any earlier entry for it.
    pub fn insert(&mut self, root: &Path, signature: String, locations: &[PathBuf]) {
        self.entries.insert(
            root.to_path_buf(),
            CacheEntry {
                signature,
                locations: locations.to_vec(),
            },
        );
    }
}

/// Reads and writes the location cache file.
#[derive(Debug, Clone)]
pub struct DiscoveryCache {
    path: PathBuf,
}

impl DiscoveryCache {
    /// Create a cache backed by the given file.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Path of the cache file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the cache, starting empty if it is missing, unreadable or stale.
    pub fn load(&self) -> CacheFile {
        let content = match std::fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(_) => return Self::empty(),
        };

        match serde_json::from_str::<CacheFile>(&content) {
            Ok(file) if file.version == CACHE_VERSION => file,
            Ok(_) => Self::empty(),
            Err(e) => {
                tracing::warn!("Ignoring unreadable extension location cache {}: {}", self.path.display(), e);
                Self::empty()
            }
        }
    }

    /// Persist the cache.
    pub fn store(&self, file: &CacheFile) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(file)?;
        std::fs::write(&self.path, json)?;
        Ok(())
    }

    /// Remove the cache file.
    pub fn clear(&self) -> Result<()> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn empty() -> CacheFile {
        CacheFile {
            version: CACHE_VERSION,
            entries: BTreeMap::new(),
        }
    }
}
