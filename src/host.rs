//! Host-facing surface: boot, load, tick, shutdown.

use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::capability::{CapabilityProvider, CapabilityRegistry};
use crate::dispatcher::{EventDispatcher, SubscriptionTable};
use crate::error::{Error, Result};
use crate::event::Event;
use crate::extension::{Extension, ExtensionFactory, ExtensionInfo};
use crate::lifecycle::{LifecycleEvent, LifecycleHooks};
use crate::loader::{DescriptorLoader, LoaderConfig};
use crate::manager::{LifecycleManager, LoadOutcome};
use crate::registry::{ExtensionRegistry, RegistryConfig, RegistryStats};
use crate::sandbox::{SandboxFault, SandboxHandle};

/// Configuration for the extension host.
#[derive(Debug, Clone)]
pub struct HostConfig {
    /// Wall-clock budget per extension callback.
    pub callback_budget: Duration,
    /// Loader configuration.
    pub loader: LoaderConfig,
    /// Registry configuration.
    pub registry: RegistryConfig,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            callback_budget: Duration::from_secs(1),
            loader: LoaderConfig::default(),
            registry: RegistryConfig::default(),
        }
    }
}

impl HostConfig {
    /// Create a new host configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the per-callback wall-clock budget.
    pub fn with_callback_budget(mut self, budget: Duration) -> Self {
        self.callback_budget = budget;
        self
    }

    /// Set the loader configuration.
    pub fn with_loader(mut self, loader: LoaderConfig) -> Self {
        self.loader = loader;
        self
    }

    /// Set the registry configuration.
    pub fn with_registry(mut self, registry: RegistryConfig) -> Self {
        self.registry = registry;
        self
    }
}

/// Builder assembling capability providers and entry points, then booting the
/// host.
///
/// Capability registration happens only here; [`boot`](HostBuilder::boot)
/// seals the registry.
pub struct HostBuilder {
    config: HostConfig,
    capabilities: CapabilityRegistry,
    factories: HashMap<String, ExtensionFactory>,
    hooks: LifecycleHooks,
}

impl HostBuilder {
    /// Create a new host builder.
    pub fn new(config: HostConfig) -> Self {
        Self {
            config,
            capabilities: CapabilityRegistry::new(),
            factories: HashMap::new(),
            hooks: LifecycleHooks::new(),
        }
    }

    /// Register a capability provider.
    pub fn provider(
        mut self,
        name: impl Into<String>,
        provider: Arc<dyn CapabilityProvider>,
    ) -> Result<Self> {
        self.capabilities.register(name, provider)?;
        Ok(self)
    }

    /// Register an extension constructor for an entry point name.
    pub fn entry_point<F>(mut self, name: impl Into<String>, factory: F) -> Self
    where
        F: Fn() -> Box<dyn Extension> + Send + Sync + 'static,
    {
        self.factories.insert(name.into(), Box::new(factory));
        self
    }

    /// Add a lifecycle event observer.
    pub fn on_lifecycle_event<F>(mut self, handler: F) -> Self
    where
        F: Fn(&LifecycleEvent) + Send + Sync + 'static,
    {
        self.hooks.on_event(handler);
        self
    }

    /// Boot the host. The capability registry is frozen from here on.
    pub fn boot(self) -> Host {
        let subscriptions = Arc::new(SubscriptionTable::new());
        let registry = Arc::new(ExtensionRegistry::new(self.config.registry.clone()));
        let loader = DescriptorLoader::new(self.config.loader.clone());
        let hooks = Arc::new(self.hooks);

        let manager = LifecycleManager::new(
            loader,
            self.capabilities,
            self.factories,
            Arc::clone(&registry),
            Arc::clone(&subscriptions),
            Arc::clone(&hooks),
            self.config.callback_budget,
        );
        let dispatcher = EventDispatcher::new(subscriptions, hooks);

        tracing::info!(
            budget_ms = self.config.callback_budget.as_millis() as u64,
            "extension host booted"
        );

        Host {
            manager,
            dispatcher,
            registry,
            ticks: AtomicU64::new(0),
        }
    }
}

/// The booted extension host.
///
/// Single logical simulation thread: the caller drives ticks and event
/// delivery, and all extension callbacks run synchronously in that turn, one
/// at a time.
pub struct Host {
    manager: LifecycleManager,
    dispatcher: EventDispatcher,
    registry: Arc<ExtensionRegistry>,
    ticks: AtomicU64,
}

impl Host {
    /// Load, initialize, and enable extensions from artifact paths.
    pub fn load_all(&self, artifact_paths: &[impl AsRef<Path>]) -> Vec<LoadOutcome> {
        self.manager.load_all(artifact_paths)
    }

    /// Load already-parsed descriptors. Useful for embedded extensions.
    pub fn load_descriptors(
        &self,
        descriptors: Vec<crate::descriptor::ExtensionDescriptor>,
    ) -> Vec<LoadOutcome> {
        self.manager.load_descriptors(descriptors)
    }

    /// Advance the simulation one tick, delivering the tick event to
    /// subscribers. Returns the faults raised during delivery.
    pub fn tick(&self) -> Vec<SandboxFault> {
        let number = self.ticks.fetch_add(1, Ordering::Relaxed) + 1;
        self.publish(&Event::Tick { number })
    }

    /// Number of ticks driven so far.
    pub fn current_tick(&self) -> u64 {
        self.ticks.load(Ordering::Relaxed)
    }

    /// Deliver an event to subscribers in priority order.
    pub fn publish(&self, event: &Event) -> Vec<SandboxFault> {
        self.dispatcher.publish(event, &self.registry)
    }

    /// Shut the host down: deliver the shutdown event, then disable and
    /// unload every extension in strict reverse enable order. All faults are
    /// collected and returned after the full drain.
    pub fn shutdown(&self) -> Vec<SandboxFault> {
        let mut faults = self.publish(&Event::Shutdown);
        faults.extend(self.manager.shutdown());
        faults
    }

    /// Get an extension by name.
    pub fn get(&self, name: &str) -> Option<SandboxHandle> {
        self.registry.get(name)
    }

    /// Get one extension's info snapshot.
    ///
    /// Fails with [`Error::ExtensionNotFound`] for names the registry has
    /// never seen.
    pub fn extension_info(&self, name: &str) -> Result<ExtensionInfo> {
        self.registry
            .get(name)
            .map(|handle| handle.info())
            .ok_or_else(|| Error::extension_not_found(name))
    }

    /// Check if an extension is loaded.
    pub fn contains(&self, name: &str) -> bool {
        self.registry.contains(name)
    }

    /// Get extension count.
    pub fn extension_count(&self) -> usize {
        self.registry.len()
    }

    /// Get registry statistics.
    pub fn stats(&self) -> RegistryStats {
        self.registry.stats()
    }

    /// Get info snapshots for all extensions.
    pub fn info(&self) -> Vec<ExtensionInfo> {
        self.registry.info()
    }

    /// Names of enabled extensions, in enable order.
    pub fn enable_order(&self) -> Vec<String> {
        self.manager.enable_order()
    }
}

impl std::fmt::Debug for Host {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Host")
            .field("extensions", &self.registry.len())
            .field("ticks", &self.current_tick())
            .finish()
    }
}

impl Drop for Host {
    fn drop(&mut self) {
        // Idempotent; a no-op when shutdown already ran.
        let _ = self.manager.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capability::CapabilityOutput;
    use serde_json::Value;

    struct EchoProvider;

    impl CapabilityProvider for EchoProvider {
        fn call(
            &self,
            _method: &str,
            payload: Value,
        ) -> std::result::Result<CapabilityOutput, String> {
            Ok(CapabilityOutput::value(payload))
        }
    }

    #[test]
    fn test_boot_empty_host() {
        let host = HostBuilder::new(HostConfig::default()).boot();
        assert_eq!(host.extension_count(), 0);
        assert!(host.tick().is_empty());
        assert_eq!(host.current_tick(), 1);
        assert!(host.shutdown().is_empty());
    }

    #[test]
    fn test_duplicate_provider_rejected() {
        let result = HostBuilder::new(HostConfig::default())
            .provider("echo", Arc::new(EchoProvider))
            .unwrap()
            .provider("echo", Arc::new(EchoProvider));
        assert!(result.is_err());
    }

    #[test]
    fn test_extension_info_unknown_name() {
        let host = HostBuilder::new(HostConfig::default()).boot();
        assert!(matches!(
            host.extension_info("ghost"),
            Err(Error::ExtensionNotFound(_))
        ));
    }

    #[test]
    fn test_config_builder() {
        let config = HostConfig::new()
            .with_callback_budget(Duration::from_millis(50))
            .with_registry(RegistryConfig::new().with_max_extensions(5));

        assert_eq!(config.callback_budget, Duration::from_millis(50));
        assert_eq!(config.registry.max_extensions, 5);
    }
}
