//! Runtime lifecycle state and extension lifecycle notifications.

use std::sync::Arc;
use std::time::Instant;

use parking_lot::RwLock;

use crate::descriptor::ExtensionDescriptor;

/// Runtime lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LifecycleState {
    /// Runtime constructed, `start` not yet called.
    Uninitialized,
    /// `start` is running: configuration, activation, deferred initializers.
    Initializing,
    /// Every extension processed and every deferred initializer run.
    Initialized,
}

impl LifecycleState {
    /// Check if the runtime can be started.
    pub fn can_start(&self) -> bool {
        matches!(self, Self::Uninitialized)
    }

    /// Check if readiness has been reached.
    pub fn is_ready(&self) -> bool {
        matches!(self, Self::Initialized)
    }

    /// Check if the runtime is in a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Initialized)
    }

    /// Get a human-readable description.
    pub fn description(&self) -> &'static str {
        match self {
            Self::Uninitialized => "Runtime created but not started",
            Self::Initializing => "Runtime activating extensions",
            Self::Initialized => "Runtime ready",
        }
    }
}

impl std::fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Uninitialized => "uninitialized",
            Self::Initializing => "initializing",
            Self::Initialized => "initialized",
        };
        write!(f, "{}", name)
    }
}

/// Lifecycle notification.
#[derive(Debug, Clone)]
pub enum LifecycleEvent {
    /// Extension activated successfully.
    Registered {
        /// Descriptor with merged options.
        descriptor: ExtensionDescriptor,
        /// Event time.
        at: Instant,
    },
    /// Extension skipped because its options disable it.
    Skipped {
        /// Descriptor with merged options.
        descriptor: ExtensionDescriptor,
        /// Event time.
        at: Instant,
    },
    /// Extension failed to activate; startup aborts after this event.
    Failed {
        /// Descriptor with merged options.
        descriptor: ExtensionDescriptor,
        /// Diagnostic message.
        message: String,
        /// Event time.
        at: Instant,
    },
    /// Runtime reached readiness.
    Initialized {
        /// Event time.
        at: Instant,
    },
}

impl LifecycleEvent {
    /// Get the descriptor the event refers to, if any.
    pub fn descriptor(&self) -> Option<&ExtensionDescriptor> {
        match self {
            Self::Registered { descriptor, .. } => Some(descriptor),
            Self::Skipped { descriptor, .. } => Some(descriptor),
            Self::Failed { descriptor, .. } => Some(descriptor),
            Self::Initialized { .. } => None,
        }
    }

    /// Get the extension name, if the event refers to a named extension.
    pub fn extension_name(&self) -> Option<&str> {
        self.descriptor().and_then(ExtensionDescriptor::name)
    }

    /// Get the event timestamp.
    pub fn timestamp(&self) -> Instant {
        match self {
            Self::Registered { at, .. } => *at,
            Self::Skipped { at, .. } => *at,
            Self::Failed { at, .. } => *at,
            Self::Initialized { at } => *at,
        }
    }

    /// Get the event name.
    pub fn event_name(&self) -> &'static str {
        match self {
            Self::Registered { .. } => "extension:registered",
            Self::Skipped { .. } => "extension:skipped",
            Self::Failed { .. } => "extension:failed",
            Self::Initialized { .. } => "initialized",
        }
    }
}

/// Listener registry shared by the runtime, the orchestrator and extension contexts.
pub type SharedHooks = Arc<RwLock<LifecycleHooks>>;

type Handler = Arc<dyn Fn(&LifecycleEvent) + Send + Sync>;

/// Hooks for lifecycle events.
///
/// Emit from a [`snapshot`](Self::snapshot) rather than through a held
/// [`SharedHooks`] guard, so handlers may subscribe further handlers.
#[derive(Clone)]
pub struct LifecycleHooks {
    handlers: Vec<Handler>,
}

impl LifecycleHooks {
    /// Create new lifecycle hooks.
    pub fn new() -> Self {
        Self {
            handlers: Vec::new(),
        }
    }

    /// Wrap into a shared handle.
    pub fn shared() -> SharedHooks {
        Arc::new(RwLock::new(Self::new()))
    }

    /// Add a lifecycle event handler.
    pub fn on_event<F>(&mut self, handler: F)
    where
        F: Fn(&LifecycleEvent) + Send + Sync + 'static,
    {
        self.handlers.push(Arc::new(handler));
    }

    /// Copy of the current handler list, detached from any lock.
    pub fn snapshot(&self) -> Self {
        self.clone()
    }

    /// Number of registered handlers.
    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    /// Check if no handler is registered.
    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    /// Emit a lifecycle event to every handler, in subscription order.
    ///
    /// Handlers subscribed while emitting see later events only.
    pub fn emit(&self, event: LifecycleEvent) {
        for handler in &self.handlers {
            handler(&event);
        }
    }

    /// Emit a registered event.
    pub fn emit_registered(&self, descriptor: &ExtensionDescriptor) {
        self.emit(LifecycleEvent::Registered {
            descriptor: descriptor.clone(),
            at: Instant::now(),
        });
    }

    /// Emit a skipped event.
    pub fn emit_skipped(&self, descriptor: &ExtensionDescriptor) {
        self.emit(LifecycleEvent::Skipped {
            descriptor: descriptor.clone(),
            at: Instant::now(),
        });
    }

    /// Emit a failed event.
    pub fn emit_failed(&self, descriptor: &ExtensionDescriptor, message: &str) {
        self.emit(LifecycleEvent::Failed {
            descriptor: descriptor.clone(),
            message: message.to_string(),
            at: Instant::now(),
        });
    }

    /// Emit an initialized event.
    pub fn emit_initialized(&self) {
        self.emit(LifecycleEvent::Initialized { at: Instant::now() });
    }
}

impl Default for LifecycleHooks {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for LifecycleHooks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LifecycleHooks")
            .field("handler_count", &self.handlers.len())
            .finish()
    }
}
