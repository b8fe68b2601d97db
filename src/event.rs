//! Host lifecycle events delivered to extensions.

use serde_json::Value;

/// Discriminant for event routing and subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    /// A simulation tick.
    Tick,
    /// A player-originated action.
    PlayerAction,
    /// Host shutdown in progress.
    Shutdown,
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Tick => "tick",
            Self::PlayerAction => "player-action",
            Self::Shutdown => "shutdown",
        };
        write!(f, "{}", name)
    }
}

/// A host lifecycle event.
#[derive(Debug, Clone)]
pub enum Event {
    /// A simulation tick with its sequence number.
    Tick {
        /// Monotonic tick number, starting at 1.
        number: u64,
    },
    /// An action taken by a player.
    PlayerAction {
        /// Player identifier.
        player: String,
        /// Action name.
        action: String,
        /// Action payload, opaque to the core.
        data: Value,
    },
    /// The host is shutting down.
    Shutdown,
}

impl Event {
    /// Get the routing kind of this event.
    pub fn kind(&self) -> EventKind {
        match self {
            Self::Tick { .. } => EventKind::Tick,
            Self::PlayerAction { .. } => EventKind::PlayerAction,
            Self::Shutdown => EventKind::Shutdown,
        }
    }

    /// Create a player action event.
    pub fn player_action(
        player: impl Into<String>,
        action: impl Into<String>,
        data: Value,
    ) -> Self {
        Self::PlayerAction {
            player: player.into(),
            action: action.into(),
            data,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_kind() {
        assert_eq!(Event::Tick { number: 7 }.kind(), EventKind::Tick);
        assert_eq!(Event::Shutdown.kind(), EventKind::Shutdown);
        assert_eq!(
            Event::player_action("steve", "place_block", Value::Null).kind(),
            EventKind::PlayerAction
        );
    }

    #[test]
    fn test_event_kind_display() {
        assert_eq!(EventKind::PlayerAction.to_string(), "player-action");
    }
}
