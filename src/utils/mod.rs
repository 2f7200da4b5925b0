//! Shared utilities: error types, logging setup and the clock abstraction
//! used by the lease protocol.

pub mod clock;
pub mod error;
pub mod logging;

pub use clock::{Clock, ManualClock, SystemClock};
pub use error::{BrokerError, DeliveryError, Result, StoreError};
