use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Frames a connected service sends to the broker.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(tag = "type")]
pub enum ClientMessage {
    #[serde(rename = "register")]
    Register { service: String },
    #[serde(rename = "subscribe")]
    Subscribe { channel: String },
    #[serde(rename = "unsubscribe")]
    Unsubscribe { channel: String },
    #[serde(rename = "publish")]
    Publish {
        channel: String,
        payload: Value,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        ttl: Option<i64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        request_id: Option<String>,
    },
    /// `remove: true` ends delivery for every remaining recipient.
    #[serde(rename = "ack")]
    Ack {
        delivery_id: String,
        #[serde(default)]
        remove: bool,
    },
    #[serde(rename = "nack")]
    Nack {
        delivery_id: String,
        #[serde(default)]
        reason: String,
    },
}

/// Frames the broker sends back.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(tag = "type")]
pub enum ServerMessage {
    #[serde(rename = "registered")]
    Registered { service: String },
    #[serde(rename = "subscribed")]
    Subscribed { channel: String },
    #[serde(rename = "unsubscribed")]
    Unsubscribed { channel: String },
    #[serde(rename = "published")]
    Published {
        request_id: Option<String>,
        accepted: bool,
    },
    #[serde(rename = "deliver")]
    Deliver {
        delivery_id: String,
        channel: String,
        payload: Value,
    },
    #[serde(rename = "error")]
    Error { message: String },
}
