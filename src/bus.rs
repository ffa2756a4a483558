// src/bus.rs
use log::{debug, error};
use serde_json::Value;
use std::{
    collections::HashMap,
    panic::{self, AssertUnwindSafe},
    sync::{Arc, PoisonError, RwLock},
};

use crate::connection::{Subscription, SubscriptionId};
use crate::envelope::event_key;

/// Registry of named notifications shared by everything in one session.
///
/// Cloning is cheap and every clone sees the same listeners. Nothing is ever
/// unregistered.
#[derive(Clone, Default)]
pub struct EventBus {
    subscriptions: Arc<RwLock<HashMap<String, Vec<Arc<Subscription>>>>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Listen for every notification of `event_type`, i.e. key `djr:<event_type>`.
    ///
    /// `subscribe("page:42", ..)` listens on the id-scoped key `djr:page:42`.
    pub fn subscribe<F>(&self, event_type: &str, handler: F) -> SubscriptionId
    where
        F: Fn(&Value) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        let key = event_key(event_type);
        let description = format!("subscriber for {key}");
        self.add_listener(key, description, handler)
    }

    /// Listen on a raw notification key, without the namespace being added.
    pub fn add_listener<F>(
        &self,
        key: impl Into<String>,
        description: impl Into<String>,
        handler: F,
    ) -> SubscriptionId
    where
        F: Fn(&Value) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.add_subscription(Subscription::new(key, description, handler))
    }

    pub fn add_subscription(&self, subscription: Subscription) -> SubscriptionId {
        let sub_id = subscription.id;
        debug!("Adding subscription {} on {}", sub_id, subscription.event_key);

        let mut subs = self
            .subscriptions
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        subs.entry(subscription.event_key.clone())
            .or_default()
            .push(Arc::new(subscription));

        sub_id
    }

    /// Deliver `detail` to every subscription on `key`, in registration order.
    ///
    /// Returns how many handlers ran. A failing or panicking handler is logged
    /// and does not keep the others from running.
    pub fn publish(&self, key: &str, detail: &Value) -> usize {
        // Snapshot so handlers may subscribe while we dispatch
        let targets: Vec<Arc<Subscription>> = {
            let subs = self
                .subscriptions
                .read()
                .unwrap_or_else(PoisonError::into_inner);
            subs.get(key).cloned().unwrap_or_default()
        };

        for subscription in &targets {
            let handled = panic::catch_unwind(AssertUnwindSafe(|| {
                subscription.event_handler.handle(detail)
            }));
            match handled {
                Ok(Ok(())) => {}
                Ok(Err(e)) => error!(
                    "Error handling {} for subscription {} ({}): {:?}",
                    key,
                    subscription.id,
                    subscription.event_handler.description(),
                    e
                ),
                Err(_) => error!(
                    "Subscription {} ({}) panicked handling {}",
                    subscription.id,
                    subscription.event_handler.description(),
                    key
                ),
            }
        }

        targets.len()
    }

    /// Number of subscriptions currently registered on `key`.
    pub fn listener_count(&self, key: &str) -> usize {
        self.subscriptions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .map_or(0, Vec::len)
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let keys = self
            .subscriptions
            .read()
            .map(|subs| subs.len())
            .unwrap_or_default();
        f.debug_struct("EventBus").field("keys", &keys).finish()
    }
}
