//! Error types for extension runtime operations.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Result type alias using [`Error`].
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while discovering, ordering, or activating extensions.
#[derive(Error, Debug)]
pub enum Error {
    /// Descriptor file could not be parsed.
    #[error("descriptor parse error in {path}: {message}")]
    DescriptorParse {
        /// Path of the offending descriptor file.
        path: PathBuf,
        /// Parser message.
        message: String,
    },

    /// Descriptor is structurally invalid.
    #[error("invalid descriptor: {0}")]
    InvalidDescriptor(String),

    /// A string entry point could not be bound to a callable.
    #[error("unresolved entry point `{reference}` for extension {extension}")]
    UnresolvedEntryPoint {
        /// Extension label.
        extension: String,
        /// Entry point reference as declared.
        reference: String,
    },

    /// An extension's entry point failed.
    #[error("extension {extension} failed to activate: {source}")]
    ActivationFailed {
        /// Extension label (name, or `anonymous` plus directory).
        extension: String,
        /// Underlying failure.
        #[source]
        source: Box<Error>,
    },

    /// An extension's entry point did not settle in time.
    #[error("activation timed out after {0:?}")]
    ActivationTimeout(Duration),

    /// A deferred initializer failed.
    #[error("deferred initializer #{index} failed: {source}")]
    DeferredFailed {
        /// Position of the initializer in registration order.
        index: usize,
        /// Underlying failure.
        #[source]
        source: Box<Error>,
    },

    /// Runtime is in the wrong lifecycle state for the operation.
    #[error("invalid runtime state: expected {expected}, got {actual}")]
    InvalidState {
        /// Expected state.
        expected: String,
        /// Actual state.
        actual: String,
    },

    /// Explicitly referenced configuration file is missing.
    #[error("configuration file not found: {0}")]
    ConfigNotFound(PathBuf),

    /// Configuration file could not be parsed.
    #[error("configuration parse error in {path}: {message}")]
    ConfigParse {
        /// Path of the configuration file.
        path: PathBuf,
        /// Parser message.
        message: String,
    },

    /// Error raised by extension code.
    #[error("{0}")]
    Extension(Box<dyn std::error::Error + Send + Sync>),

    /// IO error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON error.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// Metrics registration error.
    #[cfg(feature = "metrics-prometheus")]
    #[error("metrics error: {0}")]
    Metrics(#[from] prometheus::Error),
}

impl Error {
    /// Create an invalid descriptor error.
    pub fn invalid_descriptor(msg: impl Into<String>) -> Self {
        Self::InvalidDescriptor(msg.into())
    }

    /// Create a descriptor parse error.
    pub fn descriptor_parse(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::DescriptorParse {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Create an unresolved entry point error.
    pub fn unresolved_entry_point(
        extension: impl Into<String>,
        reference: impl Into<String>,
    ) -> Self {
        Self::UnresolvedEntryPoint {
            extension: extension.into(),
            reference: reference.into(),
        }
    }

    /// Wrap a failure with the label of the extension that raised it.
    pub fn activation_failed(extension: impl Into<String>, source: Error) -> Self {
        Self::ActivationFailed {
            extension: extension.into(),
            source: Box::new(source),
        }
    }

    /// Create an invalid state error.
    pub fn invalid_state(expected: impl Into<String>, actual: impl Into<String>) -> Self {
        Self::InvalidState {
            expected: expected.into(),
            actual: actual.into(),
        }
    }

    /// Create a configuration parse error.
    pub fn config_parse(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::ConfigParse {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Wrap an arbitrary error raised by extension code.
    pub fn extension<E>(err: E) -> Self
    where
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        Self::Extension(err.into())
    }

    /// Label of the extension this error is attributed to, if any.
    pub fn extension_label(&self) -> Option<&str> {
        match self {
            Self::ActivationFailed { extension, .. } => Some(extension),
            Self::UnresolvedEntryPoint { extension, .. } => Some(extension),
            _ => None,
        }
    }

    /// Returns true if this error aborts startup.
    ///
    /// Discovery and descriptor problems are absorbed by the scanner; everything
    /// raised from activation, deferred initializers or configuration loading is not.
    pub fn is_fatal(&self) -> bool {
        !self.is_recoverable()
    }

    /// Returns true if this error is absorbed during startup.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::DescriptorParse { .. } | Self::InvalidDescriptor(_)
        )
    }
}
