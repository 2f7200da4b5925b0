//! The broker core: subscription index, ledger rows, the lease protocol and
//! the engine and sweeper that drive it.

pub mod deliver;
pub mod engine;
pub mod lease;
pub mod manager;
pub mod message;
pub mod subscription;
pub mod sweeper;

pub use deliver::{Deliver, Delivery, DeliveryFuture};
pub use engine::{DeliveryEngine, Handled, SweepReport};
pub use lease::LeasePolicy;
pub use manager::QueueManager;
pub use message::{Message, MessageId, MessageState, NewMessage};
pub use subscription::{Subscription, SubscriptionIndex};
pub use sweeper::Sweeper;
