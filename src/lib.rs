//! # relayq
//!
//! `relayq` is a durable, multi-consumer message broker. A message published
//! to a channel is recorded once, fanned out to the services subscribed at
//! that moment, and handed to them one at a time through a lease protocol
//! that survives crashes, slow consumers and competing broker instances.
//!
//! ## Core Modules
//!
//! - `broker`: subscription index, ledger rows, the lease protocol, and the
//!   delivery engine and sweeper that drive messages to completion.
//! - `client`: services connected over WebSocket and the delivery callback
//!   that reaches them.
//! - `config`: loading and validating settings from files and environment.
//! - `persistence`: the record store trait, with sled and in-memory stores.
//! - `transport`: the WebSocket server and its JSON frame protocol.
//! - `utils`: errors, logging setup and the clock.

pub mod broker;
pub mod client;
pub mod config;
pub mod persistence;
pub mod transport;
pub mod utils;
