use std::collections::HashMap;

use tokio::sync::mpsc::UnboundedSender;
use tokio::sync::oneshot;
use tracing::error;
use tungstenite::protocol::Message as WsMessage;

use crate::broker::Delivery;
use crate::transport::message::ServerMessage;
use crate::utils::DeliveryError;

pub(crate) type Reply = oneshot::Sender<Result<Delivery, DeliveryError>>;

/// A WebSocket connection registered under a service name.
///
/// Holds the outbound frame channel for the connection and the deliveries
/// it has been sent but not yet answered.
#[derive(Debug)]
pub struct ServiceConnection {
    /// Unique per connection, so a stale socket cannot unregister a newer one.
    pub id: String,

    /// Service name the connection registered as.
    pub service: String,

    /// Channel to send WebSocket frames to the connection.
    pub sender: UnboundedSender<WsMessage>,

    pub(crate) pending: HashMap<String, Reply>,
}

impl ServiceConnection {
    pub fn new(service: impl Into<String>, sender: UnboundedSender<WsMessage>) -> Self {
        Self {
            id: format!("conn-{}", uuid::Uuid::new_v4()),
            service: service.into(),
            sender,
            pending: HashMap::new(),
        }
    }

    /// Queues a frame for the socket. Returns `false` once the socket's
    /// writer has gone away.
    pub fn send(&self, message: &ServerMessage) -> bool {
        send_frame(&self.sender, message)
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }
}

/// Serializes `message` and queues it on `sender`.
pub fn send_frame(sender: &UnboundedSender<WsMessage>, message: &ServerMessage) -> bool {
    match serde_json::to_string(message) {
        Ok(text) => sender.send(WsMessage::text(text)).is_ok(),
        Err(e) => {
            error!(error = %e, "cannot encode server frame");
            false
        }
    }
}
