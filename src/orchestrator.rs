// src/orchestrator.rs
use anyhow::Result;
use log::{error, info};
use serde_json::Value;
use std::time::Duration;

use crate::bus::EventBus;
use crate::config::Settings;
use crate::connection::{Relay, RelayConnection, RelayOptions, SubscriptionId};

/// Owns the session: the bus, the relay and the one well-known connection slot.
pub struct Orchestrator {
    relay: Relay,
    auto_connect: bool,
    /// Options used by `on_ready`
    options: RelayOptions,
    connection: Option<RelayConnection>,
}

impl Orchestrator {
    pub fn new(relay: Relay, auto_connect: bool) -> Self {
        Self {
            relay,
            auto_connect,
            options: RelayOptions::default(),
            connection: None,
        }
    }

    /// Replace the options `on_ready` connects with.
    pub fn with_options(mut self, options: RelayOptions) -> Self {
        self.options = options;
        self
    }

    /// Build an HTTP relay from the settings with a fresh bus.
    pub fn from_settings(settings: &Settings) -> Result<Self> {
        let relay = Relay::from_settings(settings, EventBus::new())?;
        let options = RelayOptions::new()
            .endpoint(settings.relay.endpoint.clone())
            .debug(settings.relay.debug);
        Ok(Self::new(relay, settings.relay.auto_connect).with_options(options))
    }

    pub fn bus(&self) -> &EventBus {
        self.relay.bus()
    }

    pub fn relay(&self) -> &Relay {
        &self.relay
    }

    pub fn subscribe<F>(&self, event_type: &str, handler: F) -> SubscriptionId
    where
        F: Fn(&Value) -> Result<()> + Send + Sync + 'static,
    {
        self.relay.subscribe(event_type, handler)
    }

    /// The connection stored by `on_ready`, `init` or `connect`.
    pub fn connection(&self) -> Option<&RelayConnection> {
        self.connection.as_ref()
    }

    /// Hook for "everything is set up". Connects with the stored options when
    /// auto-connect is on; otherwise leaves the slot alone.
    pub fn on_ready(&mut self) -> Result<Option<&RelayConnection>> {
        if !self.auto_connect {
            info!("Auto-connect disabled, waiting for an explicit connect");
            return Ok(None);
        }
        let options = self.options.clone();
        self.connect(options).map(Some)
    }

    /// Connect with callbacks that just log the lifecycle.
    pub fn init(&mut self, endpoint: &str, debug: bool) -> Result<&RelayConnection> {
        let options = RelayOptions::new()
            .endpoint(endpoint)
            .debug(debug)
            .on_connect(|| info!("Relay connected"))
            .on_error(|e| error!("Relay connection error: {}", e));
        self.connect(options)
    }

    /// Connect and keep the handle in the slot. A previous connection is
    /// stopped first; the new one supersedes it.
    pub fn connect(&mut self, options: RelayOptions) -> Result<&RelayConnection> {
        let connection = self.relay.connect(options)?;
        if let Some(previous) = self.connection.take() {
            info!("Replacing previous connection");
            previous.stop();
        }
        Ok(&*self.connection.insert(connection))
    }

    /// Stop the stored connection and wait for it to finish.
    pub async fn shutdown(&mut self, timeout: Duration) {
        let Some(connection) = self.connection.take() else {
            return;
        };

        connection.stop();
        match tokio::time::timeout(timeout, connection.join()).await {
            Ok(Ok(())) => info!("Connection stopped"),
            Ok(Err(e)) => error!("Connection task ended badly: {}", e),
            Err(_) => error!("Timeout waiting for connection to stop, giving up"),
        }
    }

    pub async fn run(mut self) -> Result<()> {
        info!("Relay running. Press Ctrl+C to stop...");

        // Wait for Ctrl+C
        tokio::signal::ctrl_c().await?;

        info!("Shutdown signal received, stopping relay...");
        self.shutdown(Duration::from_secs(5)).await;
        info!("Relay stopped, shutting down gracefully");

        Ok(())
    }
}
