//! Extension lifecycle states and transition hooks.

use std::time::Instant;

/// Extension lifecycle state.
///
/// `Loaded -(enable)-> Enabled -(disable)-> Disabling -(drain)-> Unloaded`.
/// `Unloaded` is terminal and is reached directly from any state on an
/// unrecoverable fault.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LifecycleState {
    /// Descriptor parsed, instance created, `on_init` completed.
    Loaded,
    /// `on_enable` completed; the extension receives events.
    Enabled,
    /// `on_disable` in progress; no further events are delivered.
    Disabling,
    /// Terminal. Resources released, subscriptions removed.
    Unloaded,
}

impl LifecycleState {
    /// Check if the extension can be enabled.
    pub fn can_enable(&self) -> bool {
        matches!(self, Self::Loaded)
    }

    /// Check if the extension can be disabled.
    pub fn can_disable(&self) -> bool {
        matches!(self, Self::Enabled)
    }

    /// Check if events may be routed to the extension.
    pub fn can_receive_events(&self) -> bool {
        matches!(self, Self::Enabled)
    }

    /// Check if this is the terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Unloaded)
    }

    /// Get a human-readable description.
    pub fn description(&self) -> &'static str {
        match self {
            Self::Loaded => "Extension loaded and initialized",
            Self::Enabled => "Extension enabled and receiving events",
            Self::Disabling => "Extension disable callback in progress",
            Self::Unloaded => "Extension unloaded",
        }
    }
}

impl std::fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Loaded => "loaded",
            Self::Enabled => "enabled",
            Self::Disabling => "disabling",
            Self::Unloaded => "unloaded",
        };
        write!(f, "{}", name)
    }
}

/// Lifecycle transition event for host-side observers.
#[derive(Debug, Clone)]
pub enum LifecycleEvent {
    /// Extension was loaded and initialized.
    Loaded {
        /// Extension name.
        name: String,
        /// Transition time.
        at: Instant,
    },
    /// Extension was enabled.
    Enabled {
        /// Extension name.
        name: String,
        /// Transition time.
        at: Instant,
    },
    /// Extension faulted inside its sandbox.
    Faulted {
        /// Extension name.
        name: String,
        /// Fault description.
        message: String,
        /// Transition time.
        at: Instant,
    },
    /// Extension was never enabled because a dependency faulted.
    Skipped {
        /// Extension name.
        name: String,
        /// Faulted dependency.
        dependency: String,
        /// Transition time.
        at: Instant,
    },
    /// Extension was unloaded.
    Unloaded {
        /// Extension name.
        name: String,
        /// Transition time.
        at: Instant,
    },
}

impl LifecycleEvent {
    /// Get the extension name.
    pub fn extension_name(&self) -> &str {
        match self {
            Self::Loaded { name, .. } => name,
            Self::Enabled { name, .. } => name,
            Self::Faulted { name, .. } => name,
            Self::Skipped { name, .. } => name,
            Self::Unloaded { name, .. } => name,
        }
    }

    /// Get the event timestamp.
    pub fn timestamp(&self) -> Instant {
        match self {
            Self::Loaded { at, .. } => *at,
            Self::Enabled { at, .. } => *at,
            Self::Faulted { at, .. } => *at,
            Self::Skipped { at, .. } => *at,
            Self::Unloaded { at, .. } => *at,
        }
    }

    /// Get the event name.
    pub fn event_name(&self) -> &'static str {
        match self {
            Self::Loaded { .. } => "loaded",
            Self::Enabled { .. } => "enabled",
            Self::Faulted { .. } => "faulted",
            Self::Skipped { .. } => "skipped",
            Self::Unloaded { .. } => "unloaded",
        }
    }
}

/// Observer callbacks for lifecycle transitions.
pub struct LifecycleHooks {
    handlers: Vec<Box<dyn Fn(&LifecycleEvent) + Send + Sync>>,
}

impl LifecycleHooks {
    /// Create new lifecycle hooks.
    pub fn new() -> Self {
        Self {
            handlers: Vec::new(),
        }
    }

    /// Add a lifecycle event handler.
    pub fn on_event<F>(&mut self, handler: F)
    where
        F: Fn(&LifecycleEvent) + Send + Sync + 'static,
    {
        self.handlers.push(Box::new(handler));
    }

    /// Emit a lifecycle event.
    pub fn emit(&self, event: LifecycleEvent) {
        for handler in &self.handlers {
            handler(&event);
        }
    }

    /// Emit a loaded event.
    pub fn emit_loaded(&self, name: &str) {
        self.emit(LifecycleEvent::Loaded {
            name: name.to_string(),
            at: Instant::now(),
        });
    }

    /// Emit an enabled event.
    pub fn emit_enabled(&self, name: &str) {
        self.emit(LifecycleEvent::Enabled {
            name: name.to_string(),
            at: Instant::now(),
        });
    }

    /// Emit a faulted event.
    pub fn emit_faulted(&self, name: &str, message: &str) {
        self.emit(LifecycleEvent::Faulted {
            name: name.to_string(),
            message: message.to_string(),
            at: Instant::now(),
        });
    }

    /// Emit a skipped event.
    pub fn emit_skipped(&self, name: &str, dependency: &str) {
        self.emit(LifecycleEvent::Skipped {
            name: name.to_string(),
            dependency: dependency.to_string(),
            at: Instant::now(),
        });
    }

    /// Emit an unloaded event.
    pub fn emit_unloaded(&self, name: &str) {
        self.emit(LifecycleEvent::Unloaded {
            name: name.to_string(),
            at: Instant::now(),
        });
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
