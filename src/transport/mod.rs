//! The `transport` module is responsible for network communication with
//! services, via WebSockets.
//!
//! It defines the JSON frame protocol exchanged with services and the
//! server that turns those frames into calls on the delivery engine.

pub mod message;
pub mod websocket;
