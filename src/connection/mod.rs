// src/connection/mod.rs
mod manager;
mod subscription;
pub mod transport;

pub use manager::{ConnectionState, DEFAULT_ENDPOINT, Relay, RelayConnection, RelayOptions};
pub use subscription::{Subscription, SubscriptionEventHandler, SubscriptionId};
pub use transport::{
    HttpTransport, ReadyState, SseFrame, Transport, TransportError, TransportEvent,
};
