use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::persistence::Store;
use crate::utils::{BrokerError, Result};

/// One service's interest in one channel. The pair is unique.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Subscription {
    pub channel: String,
    pub service: String,
}

impl Subscription {
    pub fn new(channel: impl Into<String>, service: impl Into<String>) -> Self {
        Self {
            channel: channel.into(),
            service: service.into(),
        }
    }
}

/// Channel → subscribed services, backed by the record store.
///
/// Only consulted at enqueue time: a message carries its own snapshot of
/// recipients afterwards, so later (un)subscriptions never affect it.
#[derive(Clone)]
pub struct SubscriptionIndex {
    store: Arc<dyn Store>,
}

impl SubscriptionIndex {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    /// Registers `service` on `channel`. Subscribing twice is not an error;
    /// the result tells whether the pair is new.
    pub async fn subscribe(&self, channel: &str, service: &str) -> Result<bool> {
        BrokerError::require_name("channel", channel)?;
        BrokerError::require_name("service", service)?;

        let added = self
            .store
            .add_subscription(Subscription::new(channel, service))
            .await?;
        debug!(channel, service, added, "subscribe");
        Ok(added)
    }

    /// Drops the pair if present; the result tells whether it existed.
    pub async fn unsubscribe(&self, channel: &str, service: &str) -> Result<bool> {
        BrokerError::require_name("channel", channel)?;
        BrokerError::require_name("service", service)?;

        let removed = self
            .store
            .remove_subscription(Subscription::new(channel, service))
            .await?;
        debug!(channel, service, removed, "unsubscribe");
        Ok(removed)
    }

    pub async fn recipients_of(&self, channel: &str) -> Result<Vec<String>> {
        Ok(self.store.subscribers(channel.to_string()).await?)
    }
}
