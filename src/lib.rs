// src/lib.rs
// Export modules so they can be used in tests and by the binary
pub mod bus;
pub mod config;
pub mod connection;
pub mod envelope;
pub mod orchestrator;
pub mod retry;

pub use bus::EventBus;
pub use connection::{ConnectionState, Relay, RelayConnection, RelayOptions};
pub use orchestrator::Orchestrator;
