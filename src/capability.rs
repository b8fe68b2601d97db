//! Capability registry and capability-scoped handles.
//!
//! Capabilities are named, host-provided function surfaces. Providers are
//! registered once at boot; after the registry is sealed the only operation
//! extensions can trigger is `bind`, which constructs a read-only view over
//! the subset of capabilities the extension declared.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::Value;

use crate::dispatcher::{SubscriptionId, SubscriptionTable};
use crate::error::{Error, Result};
use crate::event::EventKind;

/// Outcome of a capability call.
#[derive(Debug, Clone, Default)]
pub struct CapabilityOutput {
    /// Provider-defined response payload.
    pub value: Value,
    /// Tokens for resources the call handed to the extension. Tracked by the
    /// extension's handle and released in bulk on unload.
    pub resources: Vec<u64>,
}

impl CapabilityOutput {
    /// A plain value response with no resources attached.
    pub fn value(value: Value) -> Self {
        Self {
            value,
            resources: Vec::new(),
        }
    }

    /// A response that hands the extension a resource token.
    pub fn with_resource(value: Value, token: u64) -> Self {
        Self {
            value,
            resources: vec![token],
        }
    }
}

/// A host-provided capability surface.
///
/// Providers define their own call contracts; the core treats method names and
/// payloads as opaque. A provider that hands out resource tokens gets them
/// back through [`CapabilityProvider::release`] when the owning extension
/// unloads or faults.
pub trait CapabilityProvider: Send + Sync {
    /// Invoke a provider method.
    fn call(&self, method: &str, payload: Value) -> std::result::Result<CapabilityOutput, String>;

    /// Release a resource token previously returned by [`call`].
    ///
    /// [`call`]: CapabilityProvider::call
    fn release(&self, token: u64) {
        let _ = token;
    }
}

/// Registry mapping capability names to providers.
///
/// Mutable only between construction and [`seal`]; `bind` is the sole
/// operation available afterwards.
///
/// [`seal`]: CapabilityRegistry::seal
pub struct CapabilityRegistry {
    providers: HashMap<String, Arc<dyn CapabilityProvider>>,
    sealed: bool,
}

impl CapabilityRegistry {
    /// Create an empty, unsealed registry.
    pub fn new() -> Self {
        Self {
            providers: HashMap::new(),
            sealed: false,
        }
    }

    /// Register a capability provider. Boot only.
    pub fn register(
        &mut self,
        name: impl Into<String>,
        provider: Arc<dyn CapabilityProvider>,
    ) -> Result<()> {
        let name = name.into();

        if self.sealed {
            return Err(Error::RegistrySealed(name));
        }

        if self.providers.contains_key(&name) {
            return Err(Error::duplicate_capability(name));
        }

        self.providers.insert(name, provider);
        Ok(())
    }

    /// Freeze the registry. No registration is permitted afterwards.
    pub fn seal(&mut self) {
        self.sealed = true;
    }

    /// Whether the registry has been sealed.
    pub fn is_sealed(&self) -> bool {
        self.sealed
    }

    /// Whether a capability is registered.
    pub fn contains(&self, name: &str) -> bool {
        self.providers.contains_key(name)
    }

    /// Number of registered capabilities.
    pub fn len(&self) -> usize {
        self.providers.len()
    }

    /// Whether the registry is empty.
    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }

    /// Construct a capability-scoped handle for an extension.
    ///
    /// Fails with [`Error::UnknownCapability`] if any declared name is
    /// unregistered. Side-effect-free beyond constructing the handle.
    pub fn bind(
        &self,
        extension: impl Into<String>,
        declared: &[String],
        subscriptions: Arc<SubscriptionTable>,
    ) -> Result<CapabilityHandle> {
        let mut bound = HashMap::with_capacity(declared.len());
        for name in declared {
            let provider = self
                .providers
                .get(name)
                .ok_or_else(|| Error::unknown_capability(name.clone()))?;
            bound.insert(name.clone(), Arc::clone(provider));
        }

        Ok(CapabilityHandle {
            extension: Arc::from(extension.into()),
            bound: Arc::new(bound),
            resources: Arc::new(Mutex::new(Vec::new())),
            subscriptions,
        })
    }
}

impl Default for CapabilityRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for CapabilityRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CapabilityRegistry")
            .field("capabilities", &self.providers.keys().collect::<Vec<_>>())
            .field("sealed", &self.sealed)
            .finish()
    }
}

/// A resource token acquired through a capability call.
#[derive(Debug, Clone, PartialEq, Eq)]
struct TrackedResource {
    capability: String,
    token: u64,
}

/// A bound, read-only view over the capabilities an extension declared.
///
/// Handed to the extension in `on_init`; the extension can never reach a
/// capability outside its declared set. The handle records every resource
/// token acquired through it and carries the event subscription surface, so
/// the sandbox can release everything in bulk when the extension unloads.
#[derive(Clone)]
pub struct CapabilityHandle {
    extension: Arc<str>,
    bound: Arc<HashMap<String, Arc<dyn CapabilityProvider>>>,
    resources: Arc<Mutex<Vec<TrackedResource>>>,
    subscriptions: Arc<SubscriptionTable>,
}

impl CapabilityHandle {
    /// Name of the extension this handle is bound to.
    pub fn extension(&self) -> &str {
        &self.extension
    }

    /// Whether a capability is reachable through this handle.
    pub fn has(&self, capability: &str) -> bool {
        self.bound.contains_key(capability)
    }

    /// Names of the bound capabilities.
    pub fn capabilities(&self) -> Vec<String> {
        self.bound.keys().cloned().collect()
    }

    /// Invoke a method on a bound capability.
    ///
    /// Fails with [`Error::UnknownCapability`] if the extension did not
    /// declare `capability`. Resource tokens returned by the provider are
    /// tracked for bulk release.
    pub fn call(&self, capability: &str, method: &str, payload: Value) -> Result<Value> {
        let provider = self
            .bound
            .get(capability)
            .ok_or_else(|| Error::unknown_capability(capability))?;

        let output = provider
            .call(method, payload)
            .map_err(|message| Error::CapabilityCall {
                capability: capability.to_string(),
                method: method.to_string(),
                message,
            })?;

        if !output.resources.is_empty() {
            let mut tracked = self.resources.lock();
            tracked.extend(output.resources.iter().map(|&token| TrackedResource {
                capability: capability.to_string(),
                token,
            }));
        }

        Ok(output.value)
    }

    /// Subscribe this extension to an event kind.
    ///
    /// Lower priority values are delivered first; ties break by registration
    /// order. The subscription is removed automatically when the extension
    /// unloads.
    pub fn subscribe(&self, kind: EventKind, priority: i32) -> SubscriptionId {
        self.subscriptions.subscribe(&self.extension, kind, priority)
    }

    /// Remove a subscription created through this handle.
    ///
    /// Returns false if the subscription was already removed. Does not affect
    /// an in-progress delivery pass.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.subscriptions.unsubscribe(id)
    }

    /// Number of resource tokens currently tracked.
    pub fn tracked_resources(&self) -> usize {
        self.resources.lock().len()
    }

    /// Release every tracked resource and subscription.
    ///
    /// Resources are released in reverse acquisition order. Returns the
    /// number of resource tokens released. Idempotent.
    pub fn release_all(&self) -> usize {
        let drained: Vec<TrackedResource> = {
            let mut tracked = self.resources.lock();
            tracked.drain(..).collect()
        };

        for resource in drained.iter().rev() {
            if let Some(provider) = self.bound.get(&resource.capability) {
                provider.release(resource.token);
            }
        }

        let subs = self.subscriptions.remove_extension(&self.extension);
        if !drained.is_empty() || subs > 0 {
            tracing::debug!(
                extension = %self.extension,
                resources = drained.len(),
                subscriptions = subs,
                "released extension resources"
            );
        }

        drained.len()
    }
}

impl std::fmt::Debug for CapabilityHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CapabilityHandle")
            .field("extension", &self.extension)
            .field("capabilities", &self.bound.keys().collect::<Vec<_>>())
            .field("tracked_resources", &self.resources.lock().len())
            .finish()
    }
}
