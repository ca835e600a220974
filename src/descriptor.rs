//! Extension descriptors and descriptor-file parsing.

use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Deserialize;
use serde_json::{Map, Value};

use crate::error::{Error, Result};
use crate::extension::{Extension, ExtensionContext};

/// Well-known descriptor file names, in lookup order.
pub const DESCRIPTOR_FILE_NAMES: &[&str] = &["extension.toml", "extension.json"];

/// How an extension is activated.
#[derive(Clone)]
pub enum EntryPoint {
    /// A callable bound at registration time.
    Callable(Arc<dyn Extension>),
    /// A string reference resolved through the runtime's entry point table.
    Reference(String),
}

impl EntryPoint {
    /// Create a callable entry point.
    pub fn callable(extension: impl Extension + 'static) -> Self {
        Self::Callable(Arc::new(extension))
    }

    /// Create a reference entry point.
    pub fn reference(reference: impl Into<String>) -> Self {
        Self::Reference(reference.into())
    }

    /// Returns true for callable entry points.
    pub fn is_callable(&self) -> bool {
        matches!(self, Self::Callable(_))
    }
}

impl std::fmt::Debug for EntryPoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Callable(_) => f.write_str("Callable(..)"),
            Self::Reference(reference) => f.debug_tuple("Reference").field(reference).finish(),
        }
    }
}

/// Description of one extension: identity, dependencies, options and entry point.
#[derive(Debug, Clone)]
pub struct ExtensionDescriptor {
    /// Extension name; unnamed extensions cannot be depended on or filtered.
    pub name: Option<String>,
    /// Names of extensions that must activate first, without duplicates.
    pub dependencies: Vec<String>,
    /// Origin directory, used for diagnostics and reference resolution.
    pub directory: PathBuf,
    /// Activation entry point.
    pub entry_point: EntryPoint,
    /// Default options; merged with runtime configuration before activation.
    pub options: Map<String, Value>,
}

impl ExtensionDescriptor {
    /// Create a named descriptor activated by an async function or closure.
    ///
    /// The directory defaults to the directory of the calling source file.
    #[track_caller]
    pub fn new<F, Fut>(name: impl Into<String>, activate: F) -> Self
    where
        F: Fn(ExtensionContext, ExtensionDescriptor) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        Self::from_extension(name, activate)
    }

    /// Create a named descriptor activated by an [`Extension`] implementation.
    #[track_caller]
    pub fn from_extension(name: impl Into<String>, extension: impl Extension + 'static) -> Self {
        Self::with_entry_point(Some(name.into()), EntryPoint::callable(extension), caller_directory())
    }

    /// Create a descriptor for a bare activation function.
    ///
    /// Named after the function when it is a plain `fn` item, unnamed for closures.
    #[track_caller]
    pub fn from_fn<F, Fut>(extension: F) -> Self
    where
        F: Fn(ExtensionContext, ExtensionDescriptor) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        Self::with_entry_point(callable_name::<F>(), EntryPoint::callable(extension), caller_directory())
    }

    /// Create a descriptor from its parts.
    pub fn with_entry_point(
        name: Option<String>,
        entry_point: EntryPoint,
        directory: impl Into<PathBuf>,
    ) -> Self {
        Self {
            name,
            dependencies: Vec::new(),
            directory: directory.into(),
            entry_point,
            options: Map::new(),
        }
    }

    /// The extension name, if any.
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// Label for diagnostics: the name, or `anonymous` plus the directory.
    pub fn label(&self) -> String {
        match &self.name {
            Some(name) => name.clone(),
            None => format!("anonymous ({})", self.directory.display()),
        }
    }

    /// Returns false only when the options explicitly set `enabled = false`.
    pub fn is_enabled(&self) -> bool {
        self.options.get("enabled") != Some(&Value::Bool(false))
    }

    /// Add a dependency, ignoring duplicates.
    pub fn add_dependency(&mut self, name: impl Into<String>) {
        let name = name.into();
        if !self.dependencies.contains(&name) {
            self.dependencies.push(name);
        }
    }

    /// Check if this extension depends on another.
    pub fn depends_on(&self, name: &str) -> bool {
        self.dependencies.iter().any(|d| d == name)
    }

    /// Validate the descriptor.
    pub fn validate(&self) -> Result<()> {
        if let Some(name) = &self.name {
            if name.trim().is_empty() {
                return Err(Error::invalid_descriptor("name must not be blank"));
            }
            if self.depends_on(name) {
                return Err(Error::invalid_descriptor(format!(
                    "extension {} depends on itself",
                    name
                )));
            }
        }

        if let EntryPoint::Reference(reference) = &self.entry_point {
            if reference.trim().is_empty() {
                return Err(Error::invalid_descriptor(format!(
                    "extension {} has an empty entry point",
                    self.label()
                )));
            }
        }

        Ok(())
    }
}

/// Builder for creating descriptors.
pub struct DescriptorBuilder {
    descriptor: ExtensionDescriptor,
}

impl DescriptorBuilder {
    /// Start a named descriptor activated by an async function or closure.
    #[track_caller]
    pub fn new<F, Fut>(name: impl Into<String>, activate: F) -> Self
    where
        F: Fn(ExtensionContext, ExtensionDescriptor) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        Self {
            descriptor: ExtensionDescriptor::new(name, activate),
        }
    }

    /// Start a named descriptor activated by an [`Extension`] implementation.
    #[track_caller]
    pub fn extension(name: impl Into<String>, extension: impl Extension + 'static) -> Self {
        Self {
            descriptor: ExtensionDescriptor::from_extension(name, extension),
        }
    }

    /// Start a named descriptor whose entry point is resolved by reference.
    #[track_caller]
    pub fn reference(name: impl Into<String>, reference: impl Into<String>) -> Self {
        Self {
            descriptor: ExtensionDescriptor::with_entry_point(
                Some(name.into()),
                EntryPoint::reference(reference),
                caller_directory(),
            ),
        }
    }

    /// Add a dependency.
    pub fn dependency(mut self, name: impl Into<String>) -> Self {
        self.descriptor.add_dependency(name);
        self
    }

    /// Add dependencies.
    pub fn dependencies<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        for name in names {
            self.descriptor.add_dependency(name);
        }
        self
    }

    /// Set the origin directory.
    pub fn directory(mut self, directory: impl Into<PathBuf>) -> Self {
        self.descriptor.directory = directory.into();
        self
    }

    /// Set a default option.
    pub fn option(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.descriptor.options.insert(key.into(), value.into());
        self
    }

    /// Mark the extension disabled by default.
    pub fn disabled(self) -> Self {
        self.option("enabled", false)
    }

    /// Build and validate the descriptor.
    pub fn build(self) -> Result<ExtensionDescriptor> {
        self.descriptor.validate()?;
        Ok(self.descriptor)
    }

    /// Build without validation.
    pub fn build_unchecked(self) -> ExtensionDescriptor {
        self.descriptor
    }
}

/// One extension entry as written in a descriptor file.
#[derive(Debug, Clone, Deserialize)]
struct RawDescriptor {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    dependencies: Vec<String>,
    #[serde(default, alias = "init")]
    main: Option<String>,
    #[serde(default)]
    options: Map<String, Value>,
}

/// A descriptor file declares either one extension or a list of them.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum DescriptorFile {
    Many { extensions: Vec<RawDescriptor> },
    One(RawDescriptor),
}

/// Parse a descriptor file from disk.
pub fn parse_descriptor_file(path: &Path) -> Result<Vec<ExtensionDescriptor>> {
    let content = std::fs::read_to_string(path)?;
    let directory = path.parent().unwrap_or(Path::new(".")).to_path_buf();

    let is_json = path.extension().and_then(|e| e.to_str()) == Some("json");
    let file: DescriptorFile = if is_json {
        serde_json::from_str(&content).map_err(|e| Error::descriptor_parse(path, e.to_string()))?
    } else {
        toml::from_str(&content).map_err(|e| Error::descriptor_parse(path, e.to_string()))?
    };

    let raws = match file {
        DescriptorFile::Many { extensions } => extensions,
        DescriptorFile::One(raw) => vec![raw],
    };

    let mut descriptors = Vec::with_capacity(raws.len());
    for raw in raws {
        let descriptor = from_raw(raw, &directory)
            .map_err(|e| Error::descriptor_parse(path, e.to_string()))?;
        descriptors.push(descriptor);
    }
    Ok(descriptors)
}

fn from_raw(raw: RawDescriptor, directory: &Path) -> Result<ExtensionDescriptor> {
    // Without an explicit entry point the extension name doubles as the reference.
    let reference = raw
        .main
        .or_else(|| raw.name.clone())
        .ok_or_else(|| Error::invalid_descriptor("unnamed extension without an entry point"))?;

    let mut descriptor = ExtensionDescriptor::with_entry_point(
        raw.name,
        EntryPoint::Reference(reference),
        directory,
    );
    for dependency in raw.dependencies {
        descriptor.add_dependency(dependency);
    }
    descriptor.options = raw.options;
    descriptor.validate()?;
    Ok(descriptor)
}

/// Absolute directory of the calling source file.
///
/// Source paths are recorded relative to the package root, which is the
/// working directory under cargo.
#[track_caller]
pub(crate) fn caller_directory() -> PathBuf {
    let file = Path::new(std::panic::Location::caller().file());
    let dir = file.parent().unwrap_or_else(|| Path::new("."));
    match std::env::current_dir() {
        Ok(cwd) if dir.is_relative() => cwd.join(dir),
        _ => dir.to_path_buf(),
    }
}

fn callable_name<F>() -> Option<String> {
    let type_name = std::any::type_name::<F>();
    if type_name.contains("{{closure}}") {
        return None;
    }
    type_name.rsplit("::").next().map(str::to_string)
}
