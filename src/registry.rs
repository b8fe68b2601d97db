//! Registry of loaded extension sandboxes.

use dashmap::DashMap;

use crate::error::{Error, Result};
use crate::extension::ExtensionInfo;
use crate::lifecycle::LifecycleState;
use crate::sandbox::SandboxHandle;

/// Configuration for the extension registry.
#[derive(Debug, Clone)]
pub struct RegistryConfig {
    /// Maximum number of extensions allowed.
    pub max_extensions: usize,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            max_extensions: 100,
        }
    }
}

impl RegistryConfig {
    /// Create a new registry configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the maximum number of extensions.
    pub fn with_max_extensions(mut self, max: usize) -> Self {
        self.max_extensions = max;
        self
    }
}

/// Registry statistics.
#[derive(Debug, Clone, Default)]
pub struct RegistryStats {
    /// Total extensions registered.
    pub total: usize,
    /// Extensions loaded but not enabled.
    pub loaded: usize,
    /// Extensions currently enabled.
    pub enabled: usize,
    /// Extensions unloaded.
    pub unloaded: usize,
}

/// Registry mapping extension names to their sandboxes.
///
/// Holds no ordering; the lifecycle manager tracks enable order separately.
pub struct ExtensionRegistry {
    config: RegistryConfig,
    extensions: DashMap<String, SandboxHandle>,
}

impl ExtensionRegistry {
    /// Create a new extension registry.
    pub fn new(config: RegistryConfig) -> Self {
        Self {
            config,
            extensions: DashMap::new(),
        }
    }

    /// Create with default configuration.
    pub fn default_config() -> Self {
        Self::new(RegistryConfig::default())
    }

    /// Get the registry configuration.
    pub fn config(&self) -> &RegistryConfig {
        &self.config
    }

    /// Register an extension sandbox.
    pub fn register(&self, handle: SandboxHandle) -> Result<()> {
        let name = handle.name().to_string();

        if self.extensions.len() >= self.config.max_extensions {
            return Err(Error::Registry(format!(
                "registry full: max {} extensions",
                self.config.max_extensions
            )));
        }

        if self.extensions.contains_key(&name) {
            return Err(Error::ExtensionAlreadyLoaded(name));
        }

        self.extensions.insert(name, handle);
        Ok(())
    }

    /// Get an extension by name.
    pub fn get(&self, name: &str) -> Option<SandboxHandle> {
        self.extensions.get(name).map(|r| r.clone())
    }

    /// Check if an extension exists.
    pub fn contains(&self, name: &str) -> bool {
        self.extensions.contains_key(name)
    }

    /// Get all extension names.
    pub fn names(&self) -> Vec<String> {
        self.extensions.iter().map(|r| r.key().clone()).collect()
    }

    /// Get all extension sandboxes.
    pub fn all(&self) -> Vec<SandboxHandle> {
        self.extensions.iter().map(|r| r.value().clone()).collect()
    }

    /// Get extensions in a given lifecycle state.
    pub fn by_state(&self, state: LifecycleState) -> Vec<SandboxHandle> {
        self.extensions
            .iter()
            .filter(|r| r.state() == state)
            .map(|r| r.value().clone())
            .collect()
    }

    /// Get enabled extensions.
    pub fn enabled(&self) -> Vec<SandboxHandle> {
        self.by_state(LifecycleState::Enabled)
    }

    /// Get extension count.
    pub fn len(&self) -> usize {
        self.extensions.len()
    }

    /// Check if the registry is empty.
    pub fn is_empty(&self) -> bool {
        self.extensions.is_empty()
    }

    /// Get registry statistics.
    pub fn stats(&self) -> RegistryStats {
        let mut stats = RegistryStats {
            total: self.extensions.len(),
            ..RegistryStats::default()
        };

        for entry in self.extensions.iter() {
            match entry.state() {
                LifecycleState::Loaded => stats.loaded += 1,
                LifecycleState::Enabled => stats.enabled += 1,
                LifecycleState::Unloaded => stats.unloaded += 1,
                LifecycleState::Disabling => {}
            }
        }

        stats
    }

    /// Get info snapshots for all extensions.
    pub fn info(&self) -> Vec<ExtensionInfo> {
        self.extensions.iter().map(|r| r.info()).collect()
    }
}

impl std::fmt::Debug for ExtensionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExtensionRegistry")
            .field("config", &self.config)
            .field("extension_count", &self.extensions.len())
            .finish()
    }
}
