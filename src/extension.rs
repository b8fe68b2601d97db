//! The extension contract: the callback hooks the host invokes.

use std::time::Instant;

use crate::capability::CapabilityHandle;
use crate::event::Event;
use crate::lifecycle::LifecycleState;

/// Result type for extension callbacks.
///
/// Callbacks signal failure explicitly; the sandbox converts an `Err` into a
/// fault and unloads the extension.
pub type CallbackResult = std::result::Result<(), Box<dyn std::error::Error + Send + Sync>>;

/// An extension module contributing behavior to the host server.
///
/// All hooks run on the extension's sandbox worker, one at a time, and must
/// return within the configured callback budget. Every hook has a default
/// no-op implementation so extensions implement only what they need.
pub trait Extension: Send {
    /// Called once after the extension is instantiated.
    ///
    /// The handle is the extension's only route to host services; store it to
    /// call capabilities or manage subscriptions later.
    fn on_init(&mut self, capabilities: CapabilityHandle) -> CallbackResult {
        let _ = capabilities;
        Ok(())
    }

    /// Called when every required dependency has been enabled.
    fn on_enable(&mut self) -> CallbackResult {
        Ok(())
    }

    /// Called for each event the extension is subscribed to.
    fn on_event(&mut self, event: &Event) -> CallbackResult {
        let _ = event;
        Ok(())
    }

    /// Called during shutdown or unload, in reverse enable order.
    fn on_disable(&mut self) -> CallbackResult {
        Ok(())
    }
}

/// Constructor for an extension instance, keyed by the descriptor's entry
/// point name.
pub type ExtensionFactory = Box<dyn Fn() -> Box<dyn Extension> + Send + Sync>;

/// Snapshot of a loaded extension's runtime state.
#[derive(Debug, Clone)]
pub struct ExtensionInfo {
    /// Unique extension id.
    pub id: u64,
    /// Extension name from the descriptor.
    pub name: String,
    /// Extension version from the descriptor.
    pub version: String,
    /// When the extension was loaded.
    pub loaded_at: Instant,
    /// Current lifecycle state.
    pub state: LifecycleState,
    /// Events delivered to the extension so far.
    pub events_delivered: u64,
    /// Description of the fault that unloaded the extension, if any.
    pub last_fault: Option<String>,
}
