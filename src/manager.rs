//! Extension lifecycle orchestration.
//!
//! The manager resolves load order from declared dependencies, drives every
//! extension through `Loaded -> Enabled -> Disabling -> Unloaded`, and is the
//! sole caller of sandbox lifecycle callbacks, which serializes transitions.

use std::collections::{HashMap, HashSet, VecDeque};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use crate::capability::CapabilityRegistry;
use crate::descriptor::ExtensionDescriptor;
use crate::dispatcher::SubscriptionTable;
use crate::error::{Error, Result};
use crate::extension::ExtensionFactory;
use crate::lifecycle::{LifecycleHooks, LifecycleState};
use crate::loader::DescriptorLoader;
use crate::registry::ExtensionRegistry;
use crate::sandbox::{ExtensionSandbox, SandboxFault, SandboxHandle};

/// Per-extension result of a `load_all` call.
#[derive(Debug)]
pub struct LoadOutcome {
    /// Extension name, or the artifact path when the descriptor never parsed.
    pub name: String,
    /// Parsed descriptor, if parsing succeeded.
    pub descriptor: Option<ExtensionDescriptor>,
    /// Final result: `Ok` means the extension reached `Enabled`.
    pub result: Result<()>,
}

impl LoadOutcome {
    fn new(name: impl Into<String>, descriptor: Option<ExtensionDescriptor>, result: Result<()>) -> Self {
        Self {
            name: name.into(),
            descriptor,
            result,
        }
    }
}

/// Orchestrates extension lifecycle transitions across all loaded extensions.
pub struct LifecycleManager {
    loader: DescriptorLoader,
    capabilities: CapabilityRegistry,
    factories: HashMap<String, ExtensionFactory>,
    registry: Arc<ExtensionRegistry>,
    subscriptions: Arc<SubscriptionTable>,
    hooks: Arc<LifecycleHooks>,
    budget: Duration,
    enable_order: Mutex<Vec<String>>,
}

impl LifecycleManager {
    /// Create a lifecycle manager.
    ///
    /// The capability registry is sealed here: after boot, `bind` is the only
    /// operation extensions can trigger on it.
    pub fn new(
        loader: DescriptorLoader,
        mut capabilities: CapabilityRegistry,
        factories: HashMap<String, ExtensionFactory>,
        registry: Arc<ExtensionRegistry>,
        subscriptions: Arc<SubscriptionTable>,
        hooks: Arc<LifecycleHooks>,
        budget: Duration,
    ) -> Self {
        capabilities.seal();
        Self {
            loader,
            capabilities,
            factories,
            registry,
            subscriptions,
            hooks,
            budget,
            enable_order: Mutex::new(Vec::new()),
        }
    }

    /// Get the extension registry.
    pub fn registry(&self) -> &Arc<ExtensionRegistry> {
        &self.registry
    }

    /// Names of enabled extensions, in enable order.
    pub fn enable_order(&self) -> Vec<String> {
        self.enable_order.lock().clone()
    }

    /// Load, initialize, and enable extensions from artifact paths.
    ///
    /// Parse or load failures abort only the affected extension, never the
    /// whole batch.
    pub fn load_all(&self, artifact_paths: &[impl AsRef<Path>]) -> Vec<LoadOutcome> {
        let mut parse_failures = Vec::new();
        let mut descriptors = Vec::new();

        for path in artifact_paths {
            let path = path.as_ref();
            match self.loader.load(path) {
                Ok(descriptor) => descriptors.push(descriptor),
                Err(e) => {
                    parse_failures.push(LoadOutcome::new(path.display().to_string(), None, Err(e)))
                }
            }
        }

        let mut outcomes = self.load_descriptors(descriptors);
        outcomes.splice(0..0, parse_failures);
        outcomes
    }

    /// Load, initialize, and enable already-parsed descriptors.
    pub fn load_descriptors(&self, descriptors: Vec<ExtensionDescriptor>) -> Vec<LoadOutcome> {
        // Reject duplicates up front so the dependency graph has unique nodes.
        let mut seen = HashSet::new();
        let mut duplicates = Vec::new();
        let mut batch = Vec::new();
        for descriptor in descriptors {
            if seen.contains(&descriptor.name) || self.registry.contains(&descriptor.name) {
                duplicates.push(LoadOutcome::new(
                    descriptor.name.clone(),
                    Some(descriptor.clone()),
                    Err(Error::ExtensionAlreadyLoaded(descriptor.name)),
                ));
            } else {
                seen.insert(descriptor.name.clone());
                batch.push(descriptor);
            }
        }

        let (order, mut results) = self.sort_by_dependencies(&batch);

        // Phase 1: bind, instantiate, init, in dependency order.
        // `failed` holds every extension that faulted or was skipped, so
        // dependents further down the order can be skipped in turn.
        let mut failed: HashSet<String> = results
            .iter()
            .filter(|(_, result)| result.is_err())
            .map(|(name, _)| name.clone())
            .collect();

        let by_name: HashMap<&str, &ExtensionDescriptor> =
            batch.iter().map(|d| (d.name.as_str(), d)).collect();

        for name in &order {
            if failed.contains(name) {
                continue;
            }
            let descriptor = by_name[name.as_str()];

            if let Some(blamed) = self.blocked_by_dependency(descriptor, &failed) {
                tracing::warn!(extension = %name, dependency = %blamed, "skipped: dependency faulted");
                self.hooks.emit_skipped(name, &blamed);
                results.insert(name.clone(), Err(Error::skipped(name.clone(), blamed)));
                failed.insert(name.clone());
                continue;
            }

            match self.load_one(descriptor) {
                Ok(()) => {
                    tracing::info!(extension = %name, version = %descriptor.version, "extension loaded");
                    self.hooks.emit_loaded(name);
                    results.insert(name.clone(), Ok(()));
                }
                Err(e) => {
                    self.hooks.emit_faulted(name, &e.to_string());
                    results.insert(name.clone(), Err(e));
                    failed.insert(name.clone());
                }
            }
        }

        // Phase 2: enable in the same order. A dependency reaches `Enabled`
        // before any dependent is enabled.
        for name in &order {
            if failed.contains(name) {
                continue;
            }
            let descriptor = by_name[name.as_str()];

            if let Some(blamed) = self.blocked_by_dependency(descriptor, &failed) {
                tracing::warn!(extension = %name, dependency = %blamed, "never enabled: dependency faulted");
                // Already loaded and initialized; drain it and record why.
                if let Some(handle) = self.registry.get(name) {
                    handle
                        .inner()
                        .mark_failed(&format!("dependency {} faulted", blamed));
                }
                self.hooks.emit_skipped(name, &blamed);
                results.insert(name.clone(), Err(Error::skipped(name.clone(), blamed)));
                failed.insert(name.clone());
                continue;
            }

            let handle = match self.registry.get(name) {
                Some(handle) => handle,
                None => continue,
            };

            match handle.inner().enable() {
                Ok(()) => {
                    tracing::info!(extension = %name, "extension enabled");
                    self.hooks.emit_enabled(name);
                    self.enable_order.lock().push(name.clone());
                    results.insert(name.clone(), Ok(()));
                }
                Err(e) => {
                    self.hooks.emit_faulted(name, &e.to_string());
                    results.insert(name.clone(), Err(e));
                    failed.insert(name.clone());
                }
            }
        }

        let mut outcomes = duplicates;
        for descriptor in &batch {
            let result = results
                .remove(&descriptor.name)
                .unwrap_or_else(|| Ok(()));
            outcomes.push(LoadOutcome::new(
                descriptor.name.clone(),
                Some(descriptor.clone()),
                result,
            ));
        }
        outcomes
    }

    /// Disable and unload every still-loaded extension, in strict reverse
    /// enable order.
    ///
    /// A fault during one extension's disable never blocks the rest; all
    /// faults are collected and returned after the full drain.
    pub fn shutdown(&self) -> Vec<SandboxFault> {
        let mut faults = Vec::new();
        let order: Vec<String> = {
            let mut held = self.enable_order.lock();
            held.drain(..).rev().collect()
        };

        for name in &order {
            let handle = match self.registry.get(name) {
                Some(handle) => handle,
                None => continue,
            };
            // Faulted during the shutdown event or earlier; already drained.
            if handle.state().is_terminal() {
                continue;
            }

            if handle.state().can_disable() {
                match handle.inner().disable() {
                    Ok(()) => {}
                    Err(Error::Sandbox(fault)) => faults.push(fault),
                    Err(_) => {}
                }
            } else {
                handle.inner().unload();
            }
            tracing::info!(extension = %name, "extension unloaded");
            self.hooks.emit_unloaded(name);
        }

        // Extensions that were loaded but never enabled get drained without
        // an on_disable call.
        for handle in self.registry.all() {
            if !handle.state().is_terminal() {
                handle.inner().unload();
                self.hooks.emit_unloaded(handle.name());
            }
        }

        faults
    }

    /// Topological sort of the batch by declared dependencies.
    ///
    /// Returns the load order plus pre-filled error results for true cycle
    /// members and extensions with an absent required dependency. Absent
    /// optional dependencies are skipped, not an error. An extension that
    /// merely depends on a cycle member is not itself a cycle member: it is
    /// placed in the order, and the load phase decides whether the failed
    /// dependency blocks it (required) or not (optional).
    fn sort_by_dependencies(
        &self,
        batch: &[ExtensionDescriptor],
    ) -> (Vec<String>, HashMap<String, Result<()>>) {
        let mut results: HashMap<String, Result<()>> = HashMap::new();
        let index: HashMap<&str, usize> = batch
            .iter()
            .enumerate()
            .map(|(i, d)| (d.name.as_str(), i))
            .collect();

        let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); batch.len()];
        for (i, descriptor) in batch.iter().enumerate() {
            for dep in &descriptor.dependencies {
                if let Some(&dep_idx) = index.get(dep.name.as_str()) {
                    dependents[dep_idx].push(i);
                } else if self.satisfied_externally(&dep.name) {
                    // Enabled in a previous batch; no edge needed.
                } else if !dep.optional {
                    results.insert(
                        descriptor.name.clone(),
                        Err(Error::missing_dependency(&descriptor.name, &dep.name)),
                    );
                }
            }
        }

        let on_cycle = cycle_members(&dependents);
        let cycle_names: Vec<String> = batch
            .iter()
            .enumerate()
            .filter(|(i, _)| on_cycle[*i])
            .map(|(_, d)| d.name.clone())
            .collect();
        for name in &cycle_names {
            tracing::warn!(extension = %name, "cyclic dependency, not loading");
            results.insert(name.clone(), Err(Error::cyclic_dependency(cycle_names.clone())));
        }

        // Kahn over the acyclic remainder; edges from cycle members carry no
        // ordering weight since those never load.
        let mut in_degree = vec![0usize; batch.len()];
        for (i, descriptor) in batch.iter().enumerate() {
            if on_cycle[i] {
                continue;
            }
            for dep in &descriptor.dependencies {
                if let Some(&dep_idx) = index.get(dep.name.as_str()) {
                    if !on_cycle[dep_idx] {
                        in_degree[i] += 1;
                    }
                }
            }
        }

        let mut queue: VecDeque<usize> = (0..batch.len())
            .filter(|&i| !on_cycle[i] && in_degree[i] == 0)
            .collect();
        let mut order = Vec::with_capacity(batch.len());

        while let Some(i) = queue.pop_front() {
            order.push(batch[i].name.clone());
            for &dependent in &dependents[i] {
                if on_cycle[dependent] {
                    continue;
                }
                in_degree[dependent] -= 1;
                if in_degree[dependent] == 0 {
                    queue.push_back(dependent);
                }
            }
        }

        (order, results)
    }

    /// Whether a dependency was enabled by a previous `load_all` batch.
    fn satisfied_externally(&self, name: &str) -> bool {
        self.registry
            .get(name)
            .map(|h| h.state() == LifecycleState::Enabled)
            .unwrap_or(false)
    }

    /// First required dependency of `descriptor` that has failed, if any.
    fn blocked_by_dependency(
        &self,
        descriptor: &ExtensionDescriptor,
        failed: &HashSet<String>,
    ) -> Option<String> {
        descriptor
            .required_dependencies()
            .find(|dep| failed.contains(*dep))
            .map(|dep| dep.to_string())
    }

    /// Bind capabilities, instantiate, register, and initialize one extension.
    fn load_one(&self, descriptor: &ExtensionDescriptor) -> Result<()> {
        let factory = self
            .factories
            .get(&descriptor.entry)
            .ok_or_else(|| Error::UnknownEntryPoint(descriptor.entry.clone()))?;

        let handle = self.capabilities.bind(
            descriptor.name.clone(),
            &descriptor.capabilities,
            Arc::clone(&self.subscriptions),
        )?;

        let instance = factory();
        let sandbox = ExtensionSandbox::new(descriptor.clone(), handle, instance, self.budget);
        let sandbox = SandboxHandle::new(sandbox);

        self.registry.register(sandbox.clone())?;
        sandbox.inner().init()
    }
}

/// Marks every extension that can reach itself through the batch's dependency
/// edges. Only those nodes sit on a cycle; extensions that depend on a cycle
/// without closing one are classified by the load phase instead.
fn cycle_members(dependents: &[Vec<usize>]) -> Vec<bool> {
    let mut on_cycle = vec![false; dependents.len()];
    for start in 0..dependents.len() {
        let mut seen = vec![false; dependents.len()];
        let mut stack = dependents[start].clone();
        while let Some(i) = stack.pop() {
            if i == start {
                on_cycle[start] = true;
                break;
            }
            if !seen[i] {
                seen[i] = true;
                stack.extend(dependents[i].iter().copied());
            }
        }
    }
    on_cycle
}

impl std::fmt::Debug for LifecycleManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LifecycleManager")
            .field("extensions", &self.registry.len())
            .field("entry_points", &self.factories.keys().collect::<Vec<_>>())
            .field("budget", &self.budget)
            .finish()
    }
}
