use std::future::Future;
use std::pin::Pin;

use serde_json::Value;

use crate::utils::DeliveryError;

/// Successful outcome of a delivery attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// The message may be removed entirely, remaining recipients included.
    Terminal,
    /// Delivered to this recipient; carry on with the rest.
    Continue,
}

impl Delivery {
    /// Maps a recipient's "remove" flag onto an outcome.
    pub fn from_ack(remove: bool) -> Self {
        if remove { Self::Terminal } else { Self::Continue }
    }
}

pub type DeliveryFuture = Pin<Box<dyn Future<Output = Result<Delivery, DeliveryError>> + Send>>;

/// The application side of the broker: hands one message to one recipient.
///
/// Delivery is at-least-once, so implementations must tolerate seeing the
/// same `(channel, recipient, payload)` again after a failure or timeout.
/// The returned future runs detached from the engine and is never cancelled.
pub trait Deliver: Send + Sync + 'static {
    fn deliver(&self, channel: &str, recipient: &str, payload: &Value) -> DeliveryFuture;
}

impl<F, Fut> Deliver for F
where
    F: Fn(String, String, Value) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Delivery, DeliveryError>> + Send + 'static,
{
    fn deliver(&self, channel: &str, recipient: &str, payload: &Value) -> DeliveryFuture {
        Box::pin(self(
            channel.to_string(),
            recipient.to_string(),
            payload.clone(),
        ))
    }
}
