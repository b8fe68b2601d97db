//! Synchronous event dispatch to subscribed extensions.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::Error;
use crate::event::{Event, EventKind};
use crate::lifecycle::LifecycleHooks;
use crate::registry::ExtensionRegistry;
use crate::sandbox::SandboxFault;

/// Identifier for one event subscription.
///
/// Also serves as the registration sequence: lower ids registered earlier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

#[derive(Debug, Clone)]
struct Subscription {
    id: u64,
    extension: String,
    kind: EventKind,
    priority: i32,
}

/// Live subscription list, shared between the dispatcher and every
/// extension's capability handle.
///
/// Mutation never affects an in-progress delivery pass; the dispatcher
/// iterates over a snapshot taken at publish time.
pub struct SubscriptionTable {
    entries: Mutex<Vec<Subscription>>,
    next_id: AtomicU64,
}

impl SubscriptionTable {
    /// Create an empty table.
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Register a subscription.
    pub fn subscribe(&self, extension: &str, kind: EventKind, priority: i32) -> SubscriptionId {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.entries.lock().push(Subscription {
            id,
            extension: extension.to_string(),
            kind,
            priority,
        });
        SubscriptionId(id)
    }

    /// Remove a single subscription. Returns false if already removed.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut entries = self.entries.lock();
        let before = entries.len();
        entries.retain(|s| s.id != id.0);
        entries.len() != before
    }

    /// Remove every subscription owned by an extension. Returns the count
    /// removed.
    pub fn remove_extension(&self, extension: &str) -> usize {
        let mut entries = self.entries.lock();
        let before = entries.len();
        entries.retain(|s| s.extension != extension);
        before - entries.len()
    }

    /// Total number of live subscriptions.
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Whether the table is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// Snapshot the subscriber names for one event kind, in delivery order:
    /// ascending priority, ties broken by registration order.
    fn snapshot(&self, kind: EventKind) -> Vec<String> {
        let entries = self.entries.lock();
        let mut matching: Vec<&Subscription> =
            entries.iter().filter(|s| s.kind == kind).collect();
        matching.sort_by_key(|s| (s.priority, s.id));
        matching.iter().map(|s| s.extension.clone()).collect()
    }
}

impl Default for SubscriptionTable {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for SubscriptionTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubscriptionTable")
            .field("subscriptions", &self.entries.lock().len())
            .finish()
    }
}

/// Delivers host events to subscribed extensions through their sandboxes.
pub struct EventDispatcher {
    table: Arc<SubscriptionTable>,
    hooks: Arc<LifecycleHooks>,
}

impl EventDispatcher {
    /// Create a dispatcher over a subscription table.
    pub fn new(table: Arc<SubscriptionTable>, hooks: Arc<LifecycleHooks>) -> Self {
        Self { table, hooks }
    }

    /// Get the shared subscription table.
    pub fn table(&self) -> &Arc<SubscriptionTable> {
        &self.table
    }

    /// Deliver an event to every subscriber, in the calling thread's turn.
    ///
    /// Iterates over a snapshot taken at publish time, ascending priority
    /// with ties broken by registration order, each delivery routed through
    /// the subscriber's sandbox. Returns after every subscriber has been
    /// invoked; individual faults are collected, never raised. An extension
    /// that faults mid-pass receives no further deliveries.
    pub fn publish(&self, event: &Event, registry: &ExtensionRegistry) -> Vec<SandboxFault> {
        let snapshot = self.table.snapshot(event.kind());
        let mut faults = Vec::new();

        for extension in snapshot {
            let handle = match registry.get(&extension) {
                Some(handle) => handle,
                None => continue,
            };
            if !handle.state().can_receive_events() {
                continue;
            }

            match handle.inner().dispatch(event) {
                Ok(()) => {}
                Err(Error::Sandbox(fault)) => {
                    // The sandbox drained the extension; tell the observers.
                    self.hooks.emit_faulted(&extension, &fault.to_string());
                    self.hooks.emit_unloaded(&extension);
                    faults.push(fault);
                }
                // State raced to a non-receiving state between the check and
                // the dispatch; nothing to report.
                Err(_) => {}
            }
        }

        faults
    }
}

impl std::fmt::Debug for EventDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventDispatcher")
            .field("subscriptions", &self.table.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_subscription_ordering() {
        let table = SubscriptionTable::new();
        table.subscribe("late-low", EventKind::Tick, 10);
        table.subscribe("first-high", EventKind::Tick, -5);
        table.subscribe("tie-a", EventKind::Tick, 0);
        table.subscribe("tie-b", EventKind::Tick, 0);
        table.subscribe("other-kind", EventKind::Shutdown, -100);

        let order = table.snapshot(EventKind::Tick);
        assert_eq!(order, vec!["first-high", "tie-a", "tie-b", "late-low"]);
    }

    #[test]
    fn test_unsubscribe() {
        let table = SubscriptionTable::new();
        let id = table.subscribe("ext", EventKind::Tick, 0);
        assert_eq!(table.len(), 1);

        assert!(table.unsubscribe(id));
        assert!(!table.unsubscribe(id));
        assert!(table.is_empty());
    }

    #[test]
    fn test_remove_extension() {
        let table = SubscriptionTable::new();
        table.subscribe("a", EventKind::Tick, 0);
        table.subscribe("a", EventKind::Shutdown, 0);
        table.subscribe("b", EventKind::Tick, 0);

        assert_eq!(table.remove_extension("a"), 2);
        assert_eq!(table.len(), 1);
        assert_eq!(table.snapshot(EventKind::Tick), vec!["b"]);
    }
}
