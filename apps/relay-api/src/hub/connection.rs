//! Per-connection lifecycle: `Connecting → Active → Closed`.

use relay_common::id::{prefix, prefixed_ulid};

use super::broadcast::{BroadcastHub, Subscription};
use super::registry::SubscriberId;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Transport accepted, not yet registered with the hub.
    Connecting,
    /// Registered; receives broadcasts.
    Active,
    /// Terminal. A reconnecting client gets a new `Connection`.
    Closed,
}

/// State for a single push-transport connection.
#[derive(Debug)]
pub struct Connection {
    /// Unique connection identifier (`conn_` prefixed ULID), for logs.
    pub connection_id: String,
    source_address: Option<String>,
    subscriber_id: Option<SubscriberId>,
    state: ConnectionState,
}

impl Connection {
    pub fn new(source_address: Option<String>) -> Self {
        Self {
            connection_id: prefixed_ulid(prefix::CONNECTION),
            source_address,
            subscriber_id: None,
            state: ConnectionState::Connecting,
        }
    }

    #[cfg(test)]
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    #[cfg(test)]
    pub fn is_active(&self) -> bool {
        self.state == ConnectionState::Active
    }

    pub fn source_address(&self) -> Option<&str> {
        self.source_address.as_deref()
    }

    #[cfg(test)]
    pub fn subscriber_id(&self) -> Option<&SubscriberId> {
        self.subscriber_id.as_ref()
    }

    /// Register with the hub. Returns `None` unless the connection is still
    /// `Connecting`.
    pub fn activate(&mut self, hub: &BroadcastHub) -> Option<Subscription> {
        if self.state != ConnectionState::Connecting {
            return None;
        }
        let subscription = hub.subscribe();
        self.subscriber_id = Some(subscription.id().clone());
        self.state = ConnectionState::Active;

        tracing::info!(
            connection_id = %self.connection_id,
            subscriber_id = %subscription.id(),
            source = self.source_address().unwrap_or("unknown"),
            "connection active"
        );
        Some(subscription)
    }

    /// Move to `Closed` and leave the hub. Safe to call more than once.
    pub fn close(&mut self, hub: &BroadcastHub, reason: &str) {
        if self.state == ConnectionState::Closed {
            return;
        }
        if let Some(id) = self.subscriber_id.take() {
            hub.unsubscribe(&id);
        }
        self.state = ConnectionState::Closed;

        tracing::info!(
            connection_id = %self.connection_id,
            %reason,
            clients = hub.subscriber_count(),
            "connection closed"
        );
    }
}
