//! The runtime instance: configuration, orchestration and readiness.

use std::future::Future;
use std::path::{Path, PathBuf};
#[cfg(feature = "metrics-prometheus")]
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde_json::{Map, Value};
use tokio::sync::watch;
use tracing::instrument::WithSubscriber;
use tracing::subscriber::NoSubscriber;

use crate::config::{keys, Settings, SharedSettings};
use crate::config_file::ConfigLoader;
use crate::deferred::DeferredQueue;
use crate::descriptor::{caller_directory, ExtensionDescriptor};
use crate::error::{Error, Result};
use crate::extension::{Extension, ExtensionContext};
use crate::lifecycle::{LifecycleEvent, LifecycleHooks, LifecycleState, SharedHooks};
#[cfg(feature = "metrics-prometheus")]
use crate::metrics::ActivationMetrics;
use crate::orchestrator::Orchestrator;
use crate::logging;

type ReadyCallback = Box<dyn FnOnce() + Send>;
type ConfigCallback = Box<dyn FnMut(&mut Settings) + Send>;

/// Discovery toggle accepted by [`Runtime::discover`] and [`RuntimeConfig::with_discover`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Discover {
    /// Switch discovery on or off below the root directory.
    Enabled(bool),
    /// Enable discovery and make this the root directory.
    Root(PathBuf),
}

impl From<bool> for Discover {
    fn from(enabled: bool) -> Self {
        Self::Enabled(enabled)
    }
}

impl From<&str> for Discover {
    fn from(root: &str) -> Self {
        Self::Root(PathBuf::from(root))
    }
}

impl From<PathBuf> for Discover {
    fn from(root: PathBuf) -> Self {
        Self::Root(root)
    }
}

impl From<&Path> for Discover {
    fn from(root: &Path) -> Self {
        Self::Root(root.to_path_buf())
    }
}

/// Caller options for a [`Runtime`], overlaid onto the defaults.
#[derive(Debug, Clone, Default)]
pub struct RuntimeConfig {
    options: Settings,
}

impl RuntimeConfig {
    /// Create an empty configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set any option; dots in the key address nested values.
    pub fn with_option(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.options.set(key, value);
        self
    }

    /// Set the root directory.
    pub fn with_root_directory(self, dir: impl AsRef<Path>) -> Self {
        self.with_path(keys::ROOT_DIRECTORY, dir.as_ref())
    }

    /// Set the application directory.
    pub fn with_app_directory(self, dir: impl AsRef<Path>) -> Self {
        self.with_path(keys::APP_DIRECTORY, dir.as_ref())
    }

    /// Set the scratch directory.
    pub fn with_temp_directory(self, dir: impl AsRef<Path>) -> Self {
        self.with_path(keys::TEMP_DIRECTORY, dir.as_ref())
    }

    /// Configure discovery.
    pub fn with_discover(self, discover: impl Into<Discover>) -> Self {
        match discover.into() {
            Discover::Enabled(enabled) => self.with_option(keys::DISCOVER, enabled),
            Discover::Root(root) => self
                .with_path(keys::ROOT_DIRECTORY, &root)
                .with_option(keys::DISCOVER, true),
        }
    }

    /// Enable or disable configuration-file loading.
    pub fn with_load_config(self, load: bool) -> Self {
        self.with_option(keys::LOAD_CONFIG, load)
    }

    /// Name an explicit configuration file; it must exist when loading is enabled.
    pub fn with_config_file(self, path: impl AsRef<Path>) -> Self {
        self.with_path(keys::CONFIG_FILE, path.as_ref())
    }

    /// Restrict activation to the named extensions.
    pub fn with_extensions<I, S>(self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let names: Vec<Value> = names.into_iter().map(|n| Value::String(n.into())).collect();
        self.with_option(keys::EXTENSIONS, names)
    }

    /// Set the deployment environment tag.
    pub fn with_env(self, env: impl Into<String>) -> Self {
        self.with_option(keys::ENV, env.into())
    }

    /// Bound each activation.
    pub fn with_activation_timeout(self, timeout: Duration) -> Self {
        self.with_option(keys::ACTIVATION_TIMEOUT_MS, timeout.as_millis() as u64)
    }

    /// Silence the runtime's own log output.
    pub fn with_log_silent(self, silent: bool) -> Self {
        self.with_option("log.silent", silent)
    }

    /// Cache discovery results between runs.
    pub fn with_cache(self, enabled: bool) -> Self {
        self.with_option(keys::CACHE_AVAILABLE_EXTENSIONS, enabled)
    }

    /// The raw option mapping.
    pub fn into_options(self) -> Map<String, Value> {
        self.options.as_map().clone()
    }

    fn with_path(self, key: &str, path: &Path) -> Self {
        self.with_option(key, path.to_string_lossy().into_owned())
    }
}

/// An application runtime that activates its extensions once, in dependency order.
///
/// ```no_run
/// use extension_runtime::{ExtensionContext, ExtensionDescriptor, Result, Runtime, RuntimeConfig};
///
/// async fn logging(_ctx: ExtensionContext, _descriptor: ExtensionDescriptor) -> Result<()> {
///     Ok(())
/// }
///
/// # async fn run() -> Result<()> {
/// let mut runtime = Runtime::new(RuntimeConfig::new());
/// runtime.register(ExtensionDescriptor::new("logging", logging));
/// runtime.start().await?;
/// # Ok(())
/// # }
/// ```
pub struct Runtime {
    settings: SharedSettings,
    hooks: SharedHooks,
    deferred: DeferredQueue,
    orchestrator: Orchestrator,
    state: LifecycleState,
    ready_tx: watch::Sender<bool>,
    ready_callbacks: Mutex<Vec<ReadyCallback>>,
    after_config_loaded: Option<ConfigCallback>,
}

impl Runtime {
    /// Create a runtime from caller options overlaid onto the defaults.
    ///
    /// `parentModuleDirectory` defaults to the directory of the calling source file.
    #[track_caller]
    pub fn new(config: RuntimeConfig) -> Self {
        let caller = caller_directory();
        let mut settings = Settings::with_defaults();
        settings.set(
            keys::PARENT_MODULE_DIRECTORY,
            caller.to_string_lossy().into_owned(),
        );
        settings.overlay(config.into_options());

        let settings = settings.into_shared();
        let hooks = LifecycleHooks::shared();
        let deferred = DeferredQueue::new();
        let orchestrator = Orchestrator::new(settings.clone(), deferred.clone(), hooks.clone());
        let (ready_tx, _) = watch::channel(false);

        Self {
            settings,
            hooks,
            deferred,
            orchestrator,
            state: LifecycleState::Uninitialized,
            ready_tx,
            ready_callbacks: Mutex::new(Vec::new()),
            after_config_loaded: None,
        }
    }

    /// Register an extension.
    pub fn register(&mut self, descriptor: ExtensionDescriptor) -> &mut Self {
        self.orchestrator.register(descriptor);
        self
    }

    /// Register a bare activation function as a dependency-free extension.
    #[track_caller]
    pub fn register_fn<F, Fut>(&mut self, activate: F) -> &mut Self
    where
        F: Fn(ExtensionContext, ExtensionDescriptor) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        let descriptor = ExtensionDescriptor::from_fn(activate);
        self.register(descriptor)
    }

    /// Bind an entry point reference used by descriptor files to a function.
    pub fn provide<F, Fut>(&mut self, reference: impl Into<String>, activate: F) -> &mut Self
    where
        F: Fn(ExtensionContext, ExtensionDescriptor) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        self.provide_extension(reference, activate)
    }

    /// Bind an entry point reference to an [`Extension`] implementation.
    pub fn provide_extension(
        &mut self,
        reference: impl Into<String>,
        extension: impl Extension + 'static,
    ) -> &mut Self {
        self.orchestrator.provide(reference, extension);
        self
    }

    /// Configure discovery: a boolean toggle, or a root path which also enables it.
    pub fn discover(&mut self, discover: impl Into<Discover>) -> &mut Self {
        let mut settings = self.settings.write();
        match discover.into() {
            Discover::Enabled(enabled) => settings.set(keys::DISCOVER, enabled),
            Discover::Root(root) => {
                settings.set(keys::ROOT_DIRECTORY, root.to_string_lossy().into_owned());
                settings.set(keys::DISCOVER, true);
            }
        }
        drop(settings);
        self
    }

    /// Run `callback` once the runtime is ready.
    ///
    /// If readiness was already reached, the callback is spawned onto the
    /// current tokio runtime instead of running inline.
    pub fn when_ready<F>(&self, callback: F)
    where
        F: FnOnce() + Send + 'static,
    {
        if !*self.ready_tx.borrow() {
            self.ready_callbacks.lock().push(Box::new(callback));
            return;
        }

        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move { callback() });
            }
            Err(_) => {
                tracing::debug!("No async runtime for ready callback; running it inline");
                callback();
            }
        }
    }

    /// Resolves to `true` once the runtime is ready.
    ///
    /// Resolves to `false` if the runtime is dropped before reaching readiness.
    pub fn ready(&self) -> impl Future<Output = bool> + Send + 'static {
        let mut rx = self.ready_tx.subscribe();
        async move { rx.wait_for(|ready| *ready).await.is_ok() }
    }

    /// Check if the runtime is ready.
    pub fn is_ready(&self) -> bool {
        self.state.is_ready()
    }

    /// Set the callback run right after configuration files load.
    ///
    /// Only the last callback set is kept. It runs only when `loadConfig` is enabled.
    pub fn after_config_loaded<F>(&mut self, callback: F) -> &mut Self
    where
        F: FnMut(&mut Settings) + Send + 'static,
    {
        self.after_config_loaded = Some(Box::new(callback));
        self
    }

    /// Subscribe to lifecycle events.
    pub fn on_event<F>(&self, handler: F)
    where
        F: Fn(&LifecycleEvent) + Send + Sync + 'static,
    {
        self.hooks.write().on_event(handler);
    }

    /// The shared configuration.
    pub fn settings(&self) -> &SharedSettings {
        &self.settings
    }

    /// Current lifecycle state.
    pub fn state(&self) -> LifecycleState {
        self.state
    }

    /// The orchestrator, for introspection.
    pub fn orchestrator(&self) -> &Orchestrator {
        &self.orchestrator
    }

    /// Record activation metrics.
    #[cfg(feature = "metrics-prometheus")]
    pub fn with_metrics(&mut self, metrics: Arc<ActivationMetrics>) -> &mut Self {
        self.orchestrator.set_metrics(metrics);
        self
    }

    /// Load configuration, activate every extension, run deferred
    /// initializers and signal readiness.
    ///
    /// Fails without doing anything when called more than once. An activation
    /// failure is returned as is and leaves the runtime initializing.
    pub async fn start(&mut self) -> Result<&mut Self> {
        if !self.state.can_start() {
            return Err(Error::invalid_state(
                LifecycleState::Uninitialized.to_string(),
                self.state.to_string(),
            ));
        }
        self.state = LifecycleState::Initializing;

        if self.settings.read().log_silent() {
            tracing::subscriber::with_default(NoSubscriber::default(), || self.load_config())?;
        } else {
            self.load_config()?;
        }
        logging::init(&self.settings.read());

        let silent = self.settings.read().log_silent();
        let finish = self.finish_start();
        if silent {
            finish.with_subscriber(NoSubscriber::default()).await?;
        } else {
            finish.await?;
        }

        Ok(self)
    }

    async fn finish_start(&mut self) -> Result<()> {
        activate_all(&mut self.orchestrator, &self.deferred).await?;

        self.state = LifecycleState::Initialized;
        self.ready_tx.send_replace(true);
        tracing::info!("Runtime ready");
        let hooks = self.hooks.read().snapshot();
        hooks.emit_initialized();

        let callbacks = std::mem::take(&mut *self.ready_callbacks.lock());
        for callback in callbacks {
            callback();
        }
        Ok(())
    }

    fn load_config(&mut self) -> Result<()> {
        let loader = {
            let settings = self.settings.read();
            if !settings.load_config() {
                return Ok(());
            }
            ConfigLoader::from_settings(&settings)
        };

        let overlay = loader.load()?;
        let mut settings = self.settings.write();
        settings.overlay(overlay);
        if let Some(callback) = self.after_config_loaded.as_mut() {
            callback(&mut *settings);
        }
        Ok(())
    }
}

async fn activate_all(orchestrator: &mut Orchestrator, deferred: &DeferredQueue) -> Result<()> {
    orchestrator.initialize().await?;
    let fired = deferred.drain().await?;
    tracing::debug!("Ran {} deferred initializer(s)", fired);
    Ok(())
}

impl std::fmt::Debug for Runtime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Runtime")
            .field("state", &self.state)
            .field("orchestrator", &self.orchestrator)
            .field("deferred", &self.deferred.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::DescriptorBuilder;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn quiet() -> RuntimeConfig {
        RuntimeConfig::new().with_log_silent(true)
    }

    #[test]
    fn test_runtime_config_builder() {
        let options = RuntimeConfig::new()
            .with_discover("/srv/app")
            .with_extensions(["a", "b"])
            .with_activation_timeout(Duration::from_millis(250))
            .with_option("router.port", 8080)
            .into_options();

        assert_eq!(options.get("discover"), Some(&Value::Bool(true)));
        assert_eq!(options.get("rootDirectory"), Some(&Value::from("/srv/app")));
        assert_eq!(options.get("activationTimeoutMs"), Some(&Value::from(250)));
        assert_eq!(options["router"]["port"], Value::from(8080));
    }

    #[test]
    fn test_runtime_creation() {
        let runtime = Runtime::new(RuntimeConfig::new().with_env("test"));
        assert_eq!(runtime.state(), LifecycleState::Uninitialized);
        assert!(!runtime.is_ready());

        let settings = runtime.settings().read();
        assert_eq!(settings.env(), "test");
        assert!(settings
            .path("parentModuleDirectory")
            .unwrap()
            .ends_with("src"));
    }

    #[test]
    fn test_discover_root_sets_root_directory() {
        let mut runtime = Runtime::new(RuntimeConfig::new());
        runtime.discover("/opt/extensions");

        let options = runtime.settings().read().discovery();
        assert!(options.enabled);
        assert_eq!(options.roots, vec![PathBuf::from("/opt/extensions")]);
    }

    #[tokio::test]
    async fn test_start_reaches_ready() {
        let mut runtime = Runtime::new(quiet());
        runtime.register(
            DescriptorBuilder::new("a", |_ctx, _d| async { Ok(()) }).build_unchecked(),
        );

        let ready = runtime.ready();
        runtime.start().await.unwrap();

        assert!(ready.await);
        assert_eq!(runtime.state(), LifecycleState::Initialized);
        assert_eq!(runtime.orchestrator().activated(), &["a".to_string()]);
    }

    #[tokio::test]
    async fn test_double_start_rejected() {
        let mut runtime = Runtime::new(quiet());
        runtime.start().await.unwrap();

        let err = runtime.start().await.unwrap_err();
        assert!(matches!(err, Error::InvalidState { .. }));
    }

    #[tokio::test]
    async fn test_when_ready_before_and_after() {
        let count = Arc::new(AtomicUsize::new(0));
        let mut runtime = Runtime::new(quiet());

        let early = count.clone();
        runtime.when_ready(move || {
            early.fetch_add(1, Ordering::SeqCst);
        });
        runtime.start().await.unwrap();
        assert_eq!(count.load(Ordering::SeqCst), 1);

        let (tx, rx) = tokio::sync::oneshot::channel();
        runtime.when_ready(move || {
            let _ = tx.send(());
        });
        rx.await.unwrap();
    }

    #[tokio::test]
    async fn test_after_config_loaded_requires_load_config() {
        let calls = Arc::new(AtomicUsize::new(0));
        let mut runtime = Runtime::new(quiet());

        let counted = calls.clone();
        runtime.after_config_loaded(move |_settings| {
            counted.fetch_add(1, Ordering::SeqCst);
        });
        runtime.start().await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_register_fn_is_dependency_free() {
        async fn standalone(_ctx: ExtensionContext, _d: ExtensionDescriptor) -> Result<()> {
            Ok(())
        }

        let mut runtime = Runtime::new(quiet());
        runtime.register_fn(standalone);
        runtime.start().await.unwrap();

        let available = runtime.orchestrator().available();
        assert_eq!(available.len(), 1);
        assert!(available[0].dependencies.is_empty());
    }
}
