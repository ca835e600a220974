//! # extension-runtime
//!
//! Startup orchestration for applications assembled from extensions.
//!
//! This crate provides:
//! - **Discovery** - Find extension descriptor files below configured roots
//! - **Dependency Ordering** - Stable topological order that tolerates cycles
//! - **Sequential Activation** - Each extension fully activates before its dependents
//! - **Configuration** - Layered defaults, caller options, config files and env vars
//! - **Deferred Initializers** - Work that runs after every extension activated
//! - **Readiness** - A future and callbacks that fire once startup completes
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use extension_runtime::{DescriptorBuilder, Runtime, RuntimeConfig};
//!
//! let mut runtime = Runtime::new(RuntimeConfig::new());
//! runtime
//!     .register(DescriptorBuilder::new("logging", init_logging).build()?)
//!     .register(
//!         DescriptorBuilder::new("router", init_router)
//!             .dependency("logging")
//!             .option("port", 8080)
//!             .build()?,
//!     );
//!
//! runtime.start().await?;
//! ```
//!
//! ## Feature Flags
//!
//! - `metrics-prometheus`: Prometheus activation metrics

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

pub mod config;
pub mod config_file;
pub mod deferred;
pub mod descriptor;
pub mod discovery;
mod error;
pub mod extension;
pub mod lifecycle;
pub mod logging;
pub mod orchestrator;
mod runtime;
pub mod sorter;

#[cfg(feature = "metrics-prometheus")]
mod metrics;

pub use config::{DiscoveryOptions, Settings, SharedSettings};
pub use config_file::ConfigLoader;
pub use deferred::DeferredQueue;
pub use descriptor::{DescriptorBuilder, EntryPoint, ExtensionDescriptor};
pub use discovery::{DiscoveryCache, DiscoveryConfig, DiscoveryScanner};
pub use error::{Error, Result};
pub use extension::{EntryPointTable, Extension, ExtensionContext};
pub use lifecycle::{LifecycleEvent, LifecycleHooks, LifecycleState};
pub use orchestrator::{Activation, Orchestrator};
pub use runtime::{Discover, Runtime, RuntimeConfig};
pub use sorter::SortPlan;

#[cfg(feature = "metrics-prometheus")]
pub use metrics::{ActivationMetrics, MetricsConfig};

/// Crate version for compatibility checks.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
