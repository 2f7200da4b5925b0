//! The `client` module tracks the services connected to the broker.
//!
//! A [`ServiceConnection`] is one registered socket; the
//! [`ServiceRegistry`] maps service names to connections and implements
//! the engine's delivery callback by sending frames over them.

pub mod connection;
pub mod registry;

pub use connection::ServiceConnection;
pub use registry::ServiceRegistry;
