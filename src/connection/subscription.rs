// src/connection/subscription.rs
use serde_json::Value;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

// Generate unique subscription IDs
static NEXT_SUB_ID: AtomicU64 = AtomicU64::new(1);

/// Unique identifier for a subscription
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

impl SubscriptionId {
    pub fn new() -> Self {
        Self(NEXT_SUB_ID.fetch_add(1, Ordering::SeqCst))
    }
}

impl Default for SubscriptionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sub_{}", self.0)
    }
}

/// Function type for handling the detail of a published notification
pub struct SubscriptionEventHandler {
    // Using a string description for better debug output
    description: String,
    #[allow(clippy::type_complexity)]
    handler: Box<dyn Fn(&Value) -> anyhow::Result<()> + Send + Sync>,
}

impl SubscriptionEventHandler {
    pub fn new<F, S>(description: S, handler: F) -> Self
    where
        F: Fn(&Value) -> anyhow::Result<()> + Send + Sync + 'static,
        S: Into<String>,
    {
        Self {
            description: description.into(),
            handler: Box::new(handler),
        }
    }

    pub fn handle(&self, detail: &Value) -> anyhow::Result<()> {
        (self.handler)(detail)
    }

    pub fn description(&self) -> &str {
        &self.description
    }
}

impl fmt::Debug for SubscriptionEventHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubscriptionEventHandler")
            .field("description", &self.description)
            .finish()
    }
}

/// A handler registered against one notification key on the bus
#[derive(Debug)]
pub struct Subscription {
    pub id: SubscriptionId,
    /// Full notification key, e.g. `djr:chat` or `djr:page:42`
    pub event_key: String,
    pub event_handler: SubscriptionEventHandler,
}

impl Subscription {
    pub fn new<F>(
        event_key: impl Into<String>,
        handler_description: impl Into<String>,
        handler: F,
    ) -> Self
    where
        F: Fn(&Value) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        Self {
            id: SubscriptionId::new(),
            event_key: event_key.into(),
            event_handler: SubscriptionEventHandler::new(handler_description, handler),
        }
    }
}
