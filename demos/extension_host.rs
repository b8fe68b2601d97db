//! Example demonstrating a full extension host session.
//!
//! Boots a host with a `chat` capability, loads two extensions with a
//! dependency between them, drives a few ticks, publishes a player action,
//! and shuts down.
//!
//! Run with: cargo run --example extension_host

use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use praya_extension_host::{
    CallbackResult, CapabilityHandle, CapabilityOutput, CapabilityProvider, Dependency,
    DescriptorBuilder, Event, EventKind, Extension, HostBuilder, HostConfig, Version,
};

/// Capability backed by the host's (stubbed) chat channel.
struct ChatProvider;

impl CapabilityProvider for ChatProvider {
    fn call(&self, method: &str, payload: Value) -> Result<CapabilityOutput, String> {
        match method {
            "broadcast" => {
                info!(message = %payload, "chat broadcast");
                Ok(CapabilityOutput::value(Value::Bool(true)))
            }
            other => Err(format!("chat has no method {other}")),
        }
    }
}

/// Counts ticks and announces every third one over chat.
struct TickAnnouncer {
    capabilities: Option<CapabilityHandle>,
    seen: u64,
}

impl Extension for TickAnnouncer {
    fn on_init(&mut self, capabilities: CapabilityHandle) -> CallbackResult {
        capabilities.subscribe(EventKind::Tick, 0);
        self.capabilities = Some(capabilities);
        Ok(())
    }

    fn on_event(&mut self, event: &Event) -> CallbackResult {
        if let Event::Tick { number } = event {
            self.seen += 1;
            if self.seen % 3 == 0 {
                if let Some(capabilities) = &self.capabilities {
                    capabilities.call("chat", "broadcast", json!(format!("tick {number}")))?;
                }
            }
        }
        Ok(())
    }
}

/// Logs player actions. Depends on the announcer being around.
struct ActionLogger;

impl Extension for ActionLogger {
    fn on_init(&mut self, capabilities: CapabilityHandle) -> CallbackResult {
        capabilities.subscribe(EventKind::PlayerAction, 0);
        Ok(())
    }

    fn on_event(&mut self, event: &Event) -> CallbackResult {
        if let Event::PlayerAction { player, action, .. } = event {
            info!(player = %player, action = %action, "player action observed");
        }
        Ok(())
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let subscriber = FmtSubscriber::builder()
        .with_max_level(Level::DEBUG)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    info!("Starting extension host example");

    let config = HostConfig::new().with_callback_budget(Duration::from_millis(200));
    let host = HostBuilder::new(config)
        .provider("chat", Arc::new(ChatProvider))?
        .entry_point("tick_announcer", || {
            Box::new(TickAnnouncer {
                capabilities: None,
                seen: 0,
            })
        })
        .entry_point("action_logger", || Box::new(ActionLogger))
        .on_lifecycle_event(|event| {
            info!(
                extension = event.extension_name(),
                event = event.event_name(),
                "lifecycle"
            )
        })
        .boot();

    // Declared out of dependency order; the host sorts them.
    let outcomes = host.load_descriptors(vec![
        DescriptorBuilder::new("action-logger", Version::new(0, 1, 0), "action_logger")
            .dependency(Dependency::required("tick-announcer"))
            .build()?,
        DescriptorBuilder::new("tick-announcer", Version::new(0, 1, 0), "tick_announcer")
            .capability("chat")
            .build()?,
    ]);
    for outcome in &outcomes {
        match &outcome.result {
            Ok(()) => info!(extension = %outcome.name, "enabled"),
            Err(e) => info!(extension = %outcome.name, error = %e, "failed"),
        }
    }
    info!(order = ?host.enable_order(), "enable order");

    for _ in 0..6 {
        let faults = host.tick();
        for fault in faults {
            info!(%fault, "tick fault");
        }
    }

    host.publish(&Event::player_action(
        "steve",
        "block_place",
        json!({"block": "stone"}),
    ));

    let stats = host.stats();
    info!(total = stats.total, enabled = stats.enabled, "registry stats");

    let faults = host.shutdown();
    info!(faults = faults.len(), "host shut down");
    Ok(())
}
