use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard};

use crate::broker::lease::LeasePolicy;
use crate::broker::message::{Message, MessageId, NewMessage};
use crate::broker::subscription::Subscription;
use crate::persistence::{Store, StoreFuture, ready};
use crate::utils::StoreError;

#[derive(Debug, Default)]
struct Tables {
    next_id: u64,
    messages: BTreeMap<MessageId, Message>,
    subscriptions: BTreeSet<(String, String)>,
}

/// Store kept entirely in process memory.
///
/// Each operation runs under one mutex, which gives the same single-row
/// atomicity a database row lock would. `set_unavailable(true)` makes every
/// call fail, to exercise outage handling.
#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
    unavailable: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Every stored row, ordered by id.
    pub fn messages(&self) -> Vec<Message> {
        self.lock_tables().messages.values().cloned().collect()
    }

    fn lock_tables(&self) -> MutexGuard<'_, Tables> {
        // a panic mid-operation leaves the maps usable
        self.tables.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn with_tables<T>(&self, f: impl FnOnce(&mut Tables) -> T) -> Result<T, StoreError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("memory store switched off".into()));
        }
        Ok(f(&mut self.lock_tables()))
    }
}

impl Store for MemoryStore {
    fn add_subscription(&self, subscription: Subscription) -> StoreFuture<'_, bool> {
        ready(self.with_tables(|t| {
            t.subscriptions
                .insert((subscription.channel, subscription.service))
        }))
    }

    fn remove_subscription(&self, subscription: Subscription) -> StoreFuture<'_, bool> {
        ready(self.with_tables(|t| {
            t.subscriptions
                .remove(&(subscription.channel, subscription.service))
        }))
    }

    fn subscribers(&self, channel: String) -> StoreFuture<'_, Vec<String>> {
        ready(self.with_tables(|t| {
            t.subscriptions
                .iter()
                .filter(|(c, _)| *c == channel)
                .map(|(_, service)| service.clone())
                .collect()
        }))
    }

    fn insert_message(&self, message: NewMessage) -> StoreFuture<'_, MessageId> {
        ready(self.with_tables(|t| {
            t.next_id += 1;
            let id = MessageId(t.next_id);
            t.messages.insert(id, Message::from_new(id, message));
            id
        }))
    }

    fn get_message(&self, id: MessageId) -> StoreFuture<'_, Option<Message>> {
        ready(self.with_tables(|t| t.messages.get(&id).cloned()))
    }

    fn update_message(&self, expected_lock: Option<i64>, message: Message) -> StoreFuture<'_, u64> {
        ready(self.with_tables(|t| match t.messages.get_mut(&message.id) {
            Some(row) if row.lock_timestamp() == expected_lock => {
                *row = message;
                1
            }
            _ => 0,
        }))
    }

    fn delete_message(&self, id: MessageId, expected_lock: Option<i64>) -> StoreFuture<'_, u64> {
        ready(self.with_tables(|t| match t.messages.get(&id) {
            Some(row) if row.lock_timestamp() == expected_lock => {
                t.messages.remove(&id);
                1
            }
            _ => 0,
        }))
    }

    fn purge_expired(&self) -> StoreFuture<'_, Vec<Message>> {
        ready(self.with_tables(|t| {
            let expired: Vec<MessageId> = t
                .messages
                .values()
                .filter(|m| m.ttl < 0)
                .map(|m| m.id)
                .collect();
            expired
                .into_iter()
                .filter_map(|id| t.messages.remove(&id))
                .collect()
        }))
    }

    fn select_ready(
        &self,
        now: i64,
        policy: LeasePolicy,
        limit: usize,
    ) -> StoreFuture<'_, Vec<Message>> {
        ready(self.with_tables(|t| {
            t.messages
                .values()
                .filter(|m| policy.is_ready(m, now))
                .take(limit)
                .cloned()
                .collect()
        }))
    }
}
