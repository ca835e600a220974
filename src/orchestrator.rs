//! Extension lifecycle orchestration: selection, ordering and sequential activation.

use std::collections::HashSet;
#[cfg(feature = "metrics-prometheus")]
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::config::{merge_options, SharedSettings};
use crate::deferred::DeferredQueue;
use crate::descriptor::ExtensionDescriptor;
use crate::discovery;
use crate::error::{Error, Result};
use crate::extension::{Extension, EntryPointTable, ExtensionContext};
use crate::lifecycle::{LifecycleHooks, SharedHooks};
#[cfg(feature = "metrics-prometheus")]
use crate::metrics::ActivationMetrics;
use crate::sorter;

/// Outcome of processing one descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Activation {
    /// Entry point ran to completion.
    Activated,
    /// Options disabled the extension.
    Skipped,
}

#[derive(Debug, Clone, Copy)]
enum Recorded {
    Activated(Duration),
    Skipped,
    Failed,
}

/// Owns the set of candidate extensions and activates them in dependency order.
pub struct Orchestrator {
    settings: SharedSettings,
    deferred: DeferredQueue,
    hooks: SharedHooks,
    entry_points: EntryPointTable,
    used: Vec<ExtensionDescriptor>,
    available: Vec<ExtensionDescriptor>,
    activated: Vec<String>,
    #[cfg(feature = "metrics-prometheus")]
    metrics: Option<Arc<ActivationMetrics>>,
}

impl Orchestrator {
    /// Create an orchestrator over shared settings, deferred queue and hooks.
    pub fn new(settings: SharedSettings, deferred: DeferredQueue, hooks: SharedHooks) -> Self {
        Self {
            settings,
            deferred,
            hooks,
            entry_points: EntryPointTable::new(),
            used: Vec::new(),
            available: Vec::new(),
            activated: Vec::new(),
            #[cfg(feature = "metrics-prometheus")]
            metrics: None,
        }
    }

    /// Register an extension explicitly. Activation happens in [`initialize`](Self::initialize).
    pub fn register(&mut self, descriptor: ExtensionDescriptor) -> &mut Self {
        tracing::debug!("Registered extension {}", descriptor.label());
        self.used.push(descriptor);
        self
    }

    /// Bind a string entry point reference to a callable.
    pub fn provide(&self, reference: impl Into<String>, extension: impl Extension + 'static) {
        self.entry_points.provide(reference, extension);
    }

    /// The entry point table.
    pub fn entry_points(&self) -> &EntryPointTable {
        &self.entry_points
    }

    /// Explicitly registered extensions, in registration order.
    pub fn used(&self) -> &[ExtensionDescriptor] {
        &self.used
    }

    /// Candidates of the last run after filtering and sorting, with merged options.
    pub fn available(&self) -> &[ExtensionDescriptor] {
        &self.available
    }

    /// Labels of the extensions activated so far, in activation order.
    pub fn activated(&self) -> &[String] {
        &self.activated
    }

    /// Attach activation metrics.
    #[cfg(feature = "metrics-prometheus")]
    pub fn set_metrics(&mut self, metrics: Arc<ActivationMetrics>) {
        self.metrics = Some(metrics);
    }

    /// Discover, filter and sort the candidate set without activating anything.
    pub fn plan(&self) -> Vec<ExtensionDescriptor> {
        let discovered = self.discover();
        let candidates = self.select(discovered);

        let plan = sorter::plan(&candidates);
        for missing in &plan.missing {
            tracing::warn!(
                "Extension {} depends on unknown extension {}; ignoring the dependency",
                missing.dependent,
                missing.dependency
            );
        }
        for &index in &plan.cycle_breaks {
            if let Some(descriptor) = candidates.get(index) {
                tracing::warn!(
                    "Dependency cycle through extension {}; activating it in discovery order",
                    descriptor.label()
                );
            }
        }

        sorter::apply(candidates, &plan)
    }

    /// Run the full orchestration sequence.
    ///
    /// Extensions activate strictly one after another. The first activation
    /// failure is logged, reported to listeners and returned; later extensions
    /// are not invoked.
    pub async fn initialize(&mut self) -> Result<()> {
        let ordered = self.plan();
        tracing::info!("Activating {} extension(s)", ordered.len());

        self.available = ordered;
        for index in 0..self.available.len() {
            let mut descriptor = self.available[index].clone();
            let outcome = self.activate(&mut descriptor).await;
            self.available[index] = descriptor;
            outcome?;
        }

        Ok(())
    }

    /// Merge options and activate a single descriptor.
    pub async fn activate(&mut self, descriptor: &mut ExtensionDescriptor) -> Result<Activation> {
        let overrides = descriptor
            .name()
            .and_then(|name| self.settings.read().namespace(name).cloned());
        descriptor.options = merge_options(&descriptor.options, overrides.as_ref());

        let label = descriptor.label();
        if !descriptor.is_enabled() {
            tracing::info!("Extension {} is disabled; skipping", label);
            self.hooks().emit_skipped(descriptor);
            self.record(Recorded::Skipped);
            return Ok(Activation::Skipped);
        }

        let started = Instant::now();
        match self.invoke(descriptor).await {
            Ok(()) => {
                let elapsed = started.elapsed();
                tracing::info!("Activated extension {} in {:?}", label, elapsed);
                self.record(Recorded::Activated(elapsed));
                self.activated.push(label);
                self.hooks().emit_registered(descriptor);
                Ok(Activation::Activated)
            }
            Err(e) => {
                let err = Error::activation_failed(label, e);
                let message = err.to_string();
                tracing::error!(
                    directory = %descriptor.directory.display(),
                    "{}",
                    message
                );
                self.record(Recorded::Failed);
                self.hooks().emit_failed(descriptor, &message);
                Err(err)
            }
        }
    }

    async fn invoke(&self, descriptor: &ExtensionDescriptor) -> Result<()> {
        let extension = self.entry_points.resolve(descriptor)?;
        let ctx = ExtensionContext::new(
            self.settings.clone(),
            self.deferred.clone(),
            self.hooks.clone(),
            self.activated.clone().into(),
        );

        let timeout = self.settings.read().activation_timeout();
        let activation = extension.activate(&ctx, descriptor);
        match timeout {
            Some(limit) => tokio::time::timeout(limit, activation)
                .await
                .map_err(|_| Error::ActivationTimeout(limit))?,
            None => activation.await,
        }
    }

    fn hooks(&self) -> LifecycleHooks {
        self.hooks.read().snapshot()
    }

    #[cfg(feature = "metrics-prometheus")]
    fn record(&self, recorded: Recorded) {
        if let Some(metrics) = &self.metrics {
            match recorded {
                Recorded::Activated(elapsed) => metrics.record_activation(elapsed.as_secs_f64()),
                Recorded::Skipped => metrics.record_skip(),
                Recorded::Failed => metrics.record_failure(),
            }
        }
    }

    #[cfg(not(feature = "metrics-prometheus"))]
    fn record(&self, _recorded: Recorded) {}

    fn discover(&self) -> Vec<ExtensionDescriptor> {
        let (options, cache_path) = {
            let settings = self.settings.read();
            let options = settings.discovery();
            let cache_path = settings
                .discovery_cache_enabled()
                .then(|| settings.discovery_cache_path());
            (options, cache_path)
        };

        if !options.enabled {
            return Vec::new();
        }

        tracing::debug!(
            "Discovering extensions in {:?} (depth {})",
            options.roots,
            options.depth
        );
        discovery::scanner_for(&options, cache_path).discover(&options.roots)
    }

    /// Concatenate discovered and registered candidates, apply the allow-list
    /// and drop repeated names.
    fn select(&self, discovered: Vec<ExtensionDescriptor>) -> Vec<ExtensionDescriptor> {
        let mut candidates = discovered;
        candidates.extend(self.used.iter().cloned());

        if let Some(allowed) = self.settings.read().allow_list() {
            candidates.retain(|d| match d.name() {
                Some(name) => allowed.iter().any(|a| a == name),
                None => true,
            });
        }

        let mut seen = HashSet::new();
        candidates.retain(|d| match d.name() {
            Some(name) => {
                let first = seen.insert(name.to_string());
                if !first {
                    tracing::warn!(
                        "Extension {} is declared more than once; keeping the first from {}",
                        name,
                        d.directory.display()
                    );
                }
                first
            }
            None => true,
        });

        candidates
    }
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("used", &self.used.len())
            .field("available", &self.available.len())
            .field("activated", &self.activated)
            .finish()
    }
}
