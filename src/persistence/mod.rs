//! Record store adapters.
//!
//! The delivery engine never holds an in-process lock over a message; it
//! relies on the store to apply single-row conditional writes atomically
//! and to report how many rows they touched. `0` means a competitor (another
//! task, process or machine) changed the row first. Any backend that can do
//! that can implement [`Store`]:
//!
//! - [`SledStore`]: durable, embedded, used by the `relayq` binary.
//! - [`MemoryStore`]: in-process, for tests and embedding.

pub mod memory_store;
pub mod sled_store;

use std::future::Future;
use std::pin::Pin;

use crate::broker::lease::LeasePolicy;
use crate::broker::message::{Message, MessageId, NewMessage};
use crate::broker::subscription::Subscription;
use crate::utils::StoreError;

pub use memory_store::MemoryStore;
pub use sled_store::SledStore;

pub type StoreFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, StoreError>> + Send + 'a>>;

/// Operations the engine and subscription index need from a record store.
pub trait Store: Send + Sync + 'static {
    /// Inserts the pair unless present. Returns whether it was inserted.
    fn add_subscription(&self, subscription: Subscription) -> StoreFuture<'_, bool>;

    /// Removes the pair if present. Returns whether it existed.
    fn remove_subscription(&self, subscription: Subscription) -> StoreFuture<'_, bool>;

    /// Services currently subscribed to `channel`.
    fn subscribers(&self, channel: String) -> StoreFuture<'_, Vec<String>>;

    fn insert_message(&self, message: NewMessage) -> StoreFuture<'_, MessageId>;

    fn get_message(&self, id: MessageId) -> StoreFuture<'_, Option<Message>>;

    /// Replaces the row `message.id` only if its lock timestamp still equals
    /// `expected_lock`. Returns the number of rows written (0 or 1).
    fn update_message(&self, expected_lock: Option<i64>, message: Message) -> StoreFuture<'_, u64>;

    /// Deletes the row only if its lock timestamp still equals
    /// `expected_lock`. Returns the number of rows deleted (0 or 1).
    fn delete_message(&self, id: MessageId, expected_lock: Option<i64>) -> StoreFuture<'_, u64>;

    /// Unconditionally deletes every row with `ttl < 0` and returns them.
    fn purge_expired(&self) -> StoreFuture<'_, Vec<Message>>;

    /// Up to `limit` rows that `policy` deems ready at `now`.
    fn select_ready(
        &self,
        now: i64,
        policy: LeasePolicy,
        limit: usize,
    ) -> StoreFuture<'_, Vec<Message>>;
}

/// Wraps an already computed result for stores that answer synchronously.
pub(crate) fn ready<'a, T: Send + 'a>(result: Result<T, StoreError>) -> StoreFuture<'a, T> {
    Box::pin(std::future::ready(result))
}
