//! Connected services, and the [`Deliver`] implementation on top of them.
//!
//! Delivering to a service means sending a `deliver` frame over its socket
//! and waiting for the matching `ack` or `nack`. Each attempt gets a fresh
//! delivery id, so an answer to an abandoned attempt resolves nothing.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use serde_json::Value;
use tokio::sync::mpsc::UnboundedSender;
use tokio::sync::oneshot;
use tracing::{debug, info};
use tungstenite::protocol::Message as WsMessage;

use crate::broker::{Deliver, Delivery, DeliveryFuture};
use crate::client::connection::ServiceConnection;
use crate::transport::message::ServerMessage;
use crate::utils::DeliveryError;

#[derive(Debug, Clone)]
pub struct ServiceRegistry {
    services: Arc<Mutex<HashMap<String, ServiceConnection>>>,
    ack_timeout: Duration,
}

impl ServiceRegistry {
    pub fn new(ack_timeout: Duration) -> Self {
        Self {
            services: Arc::new(Mutex::new(HashMap::new())),
            ack_timeout,
        }
    }

    fn services(&self) -> MutexGuard<'_, HashMap<String, ServiceConnection>> {
        self.services
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Binds `service` to a connection and returns the connection id.
    ///
    /// A service has at most one live connection; registering again takes
    /// over, and deliveries waiting on the old socket fail as closed.
    pub fn register(&self, service: &str, sender: UnboundedSender<WsMessage>) -> String {
        let connection = ServiceConnection::new(service, sender);
        let id = connection.id.clone();
        if let Some(previous) = self.services().insert(service.to_string(), connection) {
            info!(service, previous = %previous.id, "service connection replaced");
        }
        info!(service, connection_id = %id, "service registered");
        id
    }

    /// Drops the binding if it still belongs to `connection_id`.
    pub fn unregister(&self, service: &str, connection_id: &str) -> bool {
        let mut services = self.services();
        match services.get(service) {
            Some(connection) if connection.id == connection_id => {
                services.remove(service);
                info!(service, connection_id, "service unregistered");
                true
            }
            _ => false,
        }
    }

    pub fn is_connected(&self, service: &str) -> bool {
        self.services().contains_key(service)
    }

    pub fn pending(&self, service: &str) -> usize {
        self.services()
            .get(service)
            .map_or(0, ServiceConnection::pending_count)
    }

    /// Hands an answer from `service` to the attempt waiting on it.
    /// Returns `false` if no such attempt is waiting.
    pub fn resolve(
        &self,
        service: &str,
        delivery_id: &str,
        outcome: Result<Delivery, DeliveryError>,
    ) -> bool {
        let reply = self
            .services()
            .get_mut(service)
            .and_then(|connection| connection.pending.remove(delivery_id));

        match reply {
            Some(reply) => reply.send(outcome).is_ok(),
            None => {
                debug!(service, delivery_id, "answer for unknown delivery ignored");
                false
            }
        }
    }

    fn dispatch(
        &self,
        channel: &str,
        recipient: &str,
        payload: &Value,
    ) -> Result<(String, oneshot::Receiver<Result<Delivery, DeliveryError>>), DeliveryError> {
        let mut services = self.services();
        let connection = services
            .get_mut(recipient)
            .ok_or_else(|| DeliveryError::Unreachable(recipient.to_string()))?;

        let delivery_id = uuid::Uuid::new_v4().to_string();
        let frame = ServerMessage::Deliver {
            delivery_id: delivery_id.clone(),
            channel: channel.to_string(),
            payload: payload.clone(),
        };
        if !connection.send(&frame) {
            return Err(DeliveryError::Closed);
        }

        let (reply, answer) = oneshot::channel();
        connection.pending.insert(delivery_id.clone(), reply);
        Ok((delivery_id, answer))
    }

    fn forget(&self, service: &str, delivery_id: &str) {
        if let Some(connection) = self.services().get_mut(service) {
            connection.pending.remove(delivery_id);
        }
    }
}

impl Deliver for ServiceRegistry {
    fn deliver(&self, channel: &str, recipient: &str, payload: &Value) -> DeliveryFuture {
        let dispatched = self.dispatch(channel, recipient, payload);
        let registry = self.clone();
        let recipient = recipient.to_string();

        Box::pin(async move {
            let (delivery_id, answer) = dispatched?;
            match tokio::time::timeout(registry.ack_timeout, answer).await {
                Ok(Ok(outcome)) => outcome,
                // connection replaced or gone
                Ok(Err(_)) => Err(DeliveryError::Closed),
                Err(_) => {
                    registry.forget(&recipient, &delivery_id);
                    Err(DeliveryError::TimedOut(
                        registry.ack_timeout.as_millis() as u64,
                    ))
                }
            }
        })
    }
}
