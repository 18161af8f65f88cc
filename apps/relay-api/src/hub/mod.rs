//! The broadcast relay core and its WebSocket transport.

pub mod broadcast;
pub mod connection;
pub mod log;
pub mod messages;
pub mod registry;
pub mod server;

pub use broadcast::{BroadcastHub, LogOrder, Submitted, Subscription};
pub use log::BoundedLog;
pub use registry::{SubscriberId, SubscriberRegistry};
