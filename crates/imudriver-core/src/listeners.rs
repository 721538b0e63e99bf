//! Event listener registry
//!
//! Keeps the set of remote endpoints subscribed to driver events and fans
//! notifications out to them through an [`EventSink`] supplied by the
//! middleware.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, PoisonError, RwLock};
use thiserror::Error;
use tracing::{info, warn};

/// Event fired when a sensor moved past the configured threshold
pub const MOVE_EVENT_KEY: &str = "move";

/// Event fired once per streaming cycle
pub const STREAM_EVENT_KEY: &str = "stream";

/// Network identity of a subscriber
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Endpoint {
    /// Transport type, e.g. "Ethernet:TCP"
    pub network_type: String,
    /// Host part of the caller's address
    pub host: String,
}

impl Endpoint {
    pub fn new(network_type: impl Into<String>, host: impl Into<String>) -> Self {
        Self {
            network_type: network_type.into(),
            host: host.into(),
        }
    }

    /// Build an endpoint from a caller device name such as
    /// `"tcp:192.168.0.5:14984"`; the port is not part of the identity.
    pub fn from_device_name(network_type: &str, device_name: &str) -> Option<Self> {
        let host = device_name.split(':').nth(1)?;
        if host.is_empty() {
            return None;
        }
        Some(Self::new(network_type, host))
    }
}

/// A push notification
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub event: String,
    pub driver: String,
    pub timestamp: DateTime<Utc>,
    pub parameters: BTreeMap<String, f64>,
}

impl Notification {
    pub fn new(event: impl Into<String>, driver: impl Into<String>) -> Self {
        Self {
            event: event.into(),
            driver: driver.into(),
            timestamp: Utc::now(),
            parameters: BTreeMap::new(),
        }
    }

    pub fn with_parameter(mut self, key: impl Into<String>, value: f64) -> Self {
        self.parameters.insert(key.into(), value);
        self
    }
}

#[derive(Error, Debug)]
#[error("failed to notify {device}: {reason}")]
pub struct NotifyError {
    pub device: String,
    pub reason: String,
}

/// Delivery hook implemented by the middleware gateway
pub trait EventSink: Send + Sync {
    fn deliver(&self, notification: &Notification, device: &str) -> Result<(), NotifyError>;
}

/// Sink that only logs; used when no middleware is attached
#[derive(Debug, Default)]
pub struct LoggingSink;

impl EventSink for LoggingSink {
    fn deliver(&self, notification: &Notification, device: &str) -> Result<(), NotifyError> {
        let payload = serde_json::to_string(notification).map_err(|e| NotifyError {
            device: device.to_string(),
            reason: e.to_string(),
        })?;
        info!(%device, %payload, "notification");
        Ok(())
    }
}

/// Endpoint → subscriber device registry
pub struct ListenerRegistry {
    listeners: RwLock<HashMap<Endpoint, String>>,
    sink: Arc<dyn EventSink>,
}

impl ListenerRegistry {
    pub fn new(sink: Arc<dyn EventSink>) -> Self {
        Self {
            listeners: RwLock::new(HashMap::new()),
            sink,
        }
    }

    /// Subscribe `device` at `endpoint`. An endpoint registered twice keeps
    /// its first device.
    pub fn register_listener(&self, endpoint: Endpoint, device: impl Into<String>) -> bool {
        let mut listeners = self.listeners.write().unwrap_or_else(PoisonError::into_inner);
        if listeners.contains_key(&endpoint) {
            return false;
        }
        info!(host = %endpoint.host, "listener registered");
        listeners.insert(endpoint, device.into());
        true
    }

    pub fn unregister_listener(&self, endpoint: &Endpoint) -> bool {
        let removed = self
            .listeners
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(endpoint)
            .is_some();
        if removed {
            info!(host = %endpoint.host, "listener unregistered");
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.listeners.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Deliver `notification` to every subscriber. Failures are logged and
    /// do not stop delivery to the rest; returns how many succeeded.
    pub fn notify(&self, notification: &Notification) -> usize {
        let devices: Vec<String> = self
            .listeners
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect();

        let mut delivered = 0;
        for device in devices {
            match self.sink.deliver(notification, &device) {
                Ok(()) => delivered += 1,
                Err(e) => warn!(error = %e, event = %notification.event, "failed to notify listener"),
            }
        }
        delivered
    }
}
