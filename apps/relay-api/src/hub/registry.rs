//! Registry of live subscribers and their outbound queues.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use relay_common::id::{prefix, PrefixedId};
use tokio::sync::mpsc;

use super::messages::ServerMessage;

/// Messages are shared between every subscriber they are pushed to.
pub type Outbound = Arc<ServerMessage>;

/// Handle identifying one registered subscriber (`sub_` prefixed ULID).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SubscriberId(String);

impl PrefixedId for SubscriberId {
    const PREFIX: &'static str = prefix::SUBSCRIBER;
}

impl SubscriberId {
    pub fn new() -> Self {
        Self(<Self as PrefixedId>::generate())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for SubscriberId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SubscriberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Why a push to a subscriber did not land.
#[derive(Debug, thiserror::Error)]
pub enum PushError {
    /// The subscriber is not draining its queue fast enough.
    #[error("subscriber queue is full")]
    Full,
    /// The receiving side was dropped (connection gone).
    #[error("subscriber channel is closed")]
    Closed,
}

/// One connected viewer: an id plus the sending half of its queue.
#[derive(Debug, Clone)]
pub struct Subscriber {
    id: SubscriberId,
    tx: mpsc::Sender<Outbound>,
}

impl Subscriber {
    pub fn new(tx: mpsc::Sender<Outbound>) -> Self {
        Self {
            id: SubscriberId::new(),
            tx,
        }
    }

    pub fn id(&self) -> &SubscriberId {
        &self.id
    }

    /// Non-blocking push. Never waits on a slow consumer.
    pub fn push(&self, message: &Outbound) -> Result<(), PushError> {
        self.tx.try_send(message.clone()).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => PushError::Full,
            mpsc::error::TrySendError::Closed(_) => PushError::Closed,
        })
    }
}

/// The set of currently registered subscribers.
///
/// Not synchronized on its own; `BroadcastHub` owns it behind its lock.
#[derive(Debug, Default)]
pub struct SubscriberRegistry {
    subscribers: BTreeMap<SubscriberId, Subscriber>,
}

impl SubscriberRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, subscriber: Subscriber) -> SubscriberId {
        let id = subscriber.id.clone();
        self.subscribers.insert(id.clone(), subscriber);
        id
    }

    /// Returns whether the id was registered. Unknown ids are a no-op.
    pub fn remove(&mut self, id: &SubscriberId) -> bool {
        self.subscribers.remove(id).is_some()
    }

    /// Copy of the current membership.
    pub fn enumerate(&self) -> Vec<Subscriber> {
        self.subscribers.values().cloned().collect()
    }

    pub fn size(&self) -> usize {
        self.subscribers.len()
    }

    pub fn contains(&self, id: &SubscriberId) -> bool {
        self.subscribers.contains_key(id)
    }
}
