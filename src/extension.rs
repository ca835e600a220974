//! The activation contract extensions implement, and the context they receive.

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;

use crate::config::SharedSettings;
use crate::deferred::DeferredQueue;
use crate::descriptor::{EntryPoint, ExtensionDescriptor};
use crate::error::{Error, Result};
use crate::lifecycle::{LifecycleEvent, SharedHooks};

/// An activation entry point.
///
/// Implemented for any `Fn(ExtensionContext, ExtensionDescriptor) -> impl Future`,
/// so plain async functions and async closures can be registered directly.
#[async_trait]
pub trait Extension: Send + Sync {
    /// Activate the extension. Dependencies have fully activated before this runs.
    async fn activate(
        &self,
        ctx: &ExtensionContext,
        descriptor: &ExtensionDescriptor,
    ) -> Result<()>;
}

#[async_trait]
impl<F, Fut> Extension for F
where
    F: Fn(ExtensionContext, ExtensionDescriptor) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    async fn activate(
        &self,
        ctx: &ExtensionContext,
        descriptor: &ExtensionDescriptor,
    ) -> Result<()> {
        (self)(ctx.clone(), descriptor.clone()).await
    }
}

/// What an extension can reach while it activates.
#[derive(Clone)]
pub struct ExtensionContext {
    settings: SharedSettings,
    deferred: DeferredQueue,
    hooks: SharedHooks,
    activated: Arc<[String]>,
}

impl ExtensionContext {
    pub(crate) fn new(
        settings: SharedSettings,
        deferred: DeferredQueue,
        hooks: SharedHooks,
        activated: Arc<[String]>,
    ) -> Self {
        Self {
            settings,
            deferred,
            hooks,
            activated,
        }
    }

    /// The shared runtime configuration.
    ///
    /// Writes are visible to every extension that activates afterwards.
    pub fn settings(&self) -> &SharedSettings {
        &self.settings
    }

    /// Queue work to run once every extension has activated.
    pub fn defer<F, Fut>(&self, task: F)
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        self.deferred.push(task);
    }

    /// Names of the extensions activated so far, in activation order.
    pub fn activated(&self) -> &[String] {
        &self.activated
    }

    /// Check if a named extension has already activated.
    pub fn is_activated(&self, name: &str) -> bool {
        self.activated.iter().any(|n| n == name)
    }

    /// Subscribe to lifecycle events emitted after this point.
    pub fn on_event<F>(&self, handler: F)
    where
        F: Fn(&LifecycleEvent) + Send + Sync + 'static,
    {
        self.hooks.write().on_event(handler);
    }
}

impl std::fmt::Debug for ExtensionContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExtensionContext")
            .field("activated", &self.activated)
            .field("deferred", &self.deferred.len())
            .finish()
    }
}

/// Binds string entry point references to callables.
#[derive(Default)]
pub struct EntryPointTable {
    entries: DashMap<String, Arc<dyn Extension>>,
}

impl EntryPointTable {
    /// Create an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind a reference to a callable, replacing any previous binding.
    pub fn provide(&self, reference: impl Into<String>, extension: impl Extension + 'static) {
        self.entries.insert(reference.into(), Arc::new(extension));
    }

    /// Check if a reference is bound.
    pub fn contains(&self, reference: &str) -> bool {
        self.entries.contains_key(reference)
    }

    /// Number of bound references.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check if the table is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Resolve the callable for a descriptor.
    ///
    /// References are tried literally, then joined onto the descriptor's
    /// directory, then by extension name.
    pub fn resolve(&self, descriptor: &ExtensionDescriptor) -> Result<Arc<dyn Extension>> {
        let reference = match &descriptor.entry_point {
            EntryPoint::Callable(extension) => return Ok(extension.clone()),
            EntryPoint::Reference(reference) => reference,
        };

        let joined = descriptor.directory.join(reference);
        let candidates = [
            Some(reference.clone()),
            Some(joined.to_string_lossy().into_owned()),
            descriptor.name.clone(),
        ];

        candidates
            .into_iter()
            .flatten()
            .find_map(|key| self.entries.get(&key).map(|e| e.value().clone()))
            .ok_or_else(|| Error::unresolved_entry_point(descriptor.label(), reference.clone()))
    }
}

impl std::fmt::Debug for EntryPointTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EntryPointTable")
            .field("entry_count", &self.entries.len())
            .finish()
    }
}
