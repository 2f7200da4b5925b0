//! Record store backed by `sled`.
//!
//! Two trees mirror the broker's tables:
//! - `broker_queue`: ledger rows keyed by big-endian id, JSON values
//! - `broker_queue_subscribers`: `channel \0 service` keys, empty values
//!
//! Conditional writes read the row, check its lock timestamp, then swap the
//! exact bytes they read with sled's atomic `compare_and_swap`. If anything
//! touched the row in between, the swap fails and the write reports 0 rows.

use std::path::Path;

use sled::{Db, IVec, Tree};
use tracing::error;

use crate::broker::lease::LeasePolicy;
use crate::broker::message::{Message, MessageId, NewMessage};
use crate::broker::subscription::Subscription;
use crate::persistence::{Store, StoreFuture, ready};
use crate::utils::StoreError;

const QUEUE_TREE: &str = "broker_queue";
const SUBSCRIBERS_TREE: &str = "broker_queue_subscribers";
const KEY_SEPARATOR: u8 = 0;

#[derive(Clone)]
pub struct SledStore {
    db: Db,
    queue: Tree,
    subscribers: Tree,
}

impl SledStore {
    /// Opens or creates a database at `path`, provisioning both trees.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        Self::from_db(sled::open(path)?)
    }

    /// A throwaway database removed when the last handle drops.
    pub fn temporary() -> Result<Self, StoreError> {
        Self::from_db(sled::Config::new().temporary(true).open()?)
    }

    fn from_db(db: Db) -> Result<Self, StoreError> {
        let queue = db.open_tree(QUEUE_TREE)?;
        let subscribers = db.open_tree(SUBSCRIBERS_TREE)?;
        Ok(Self {
            db,
            queue,
            subscribers,
        })
    }

    /// Flushes dirty pages to disk.
    pub async fn flush(&self) -> Result<(), StoreError> {
        self.db.flush_async().await?;
        Ok(())
    }

    /// Every stored row, ordered by id.
    pub fn messages(&self) -> Result<Vec<Message>, StoreError> {
        self.queue
            .iter()
            .values()
            .map(|bytes| Self::decode(&bytes?))
            .collect()
    }

    fn subscription_key(channel: &str, service: &str) -> Vec<u8> {
        let mut key = Self::channel_prefix(channel);
        key.extend_from_slice(service.as_bytes());
        key
    }

    fn channel_prefix(channel: &str) -> Vec<u8> {
        let mut prefix = Vec::with_capacity(channel.len() + 1);
        prefix.extend_from_slice(channel.as_bytes());
        prefix.push(KEY_SEPARATOR);
        prefix
    }

    fn message_key(id: MessageId) -> [u8; 8] {
        id.0.to_be_bytes()
    }

    fn decode(bytes: &[u8]) -> Result<Message, StoreError> {
        serde_json::from_slice(bytes).map_err(|e| {
            if e.is_data() {
                StoreError::Corrupt(e.to_string())
            } else {
                StoreError::Codec(e)
            }
        })
    }

    /// Decodes a row met during a sweep scan; undecodable rows are logged
    /// and skipped.
    fn decode_scanned(key: &[u8], bytes: &[u8]) -> Option<Message> {
        match Self::decode(bytes) {
            Ok(message) => Some(message),
            Err(e) => {
                error!(key = ?key, error = %e, "skipping undecodable row");
                None
            }
        }
    }

    fn add_subscription_sync(&self, subscription: &Subscription) -> Result<bool, StoreError> {
        let key = Self::subscription_key(&subscription.channel, &subscription.service);
        let swapped = self
            .subscribers
            .compare_and_swap(key, None as Option<&[u8]>, Some(&[] as &[u8]))?;
        Ok(swapped.is_ok())
    }

    fn remove_subscription_sync(&self, subscription: &Subscription) -> Result<bool, StoreError> {
        let key = Self::subscription_key(&subscription.channel, &subscription.service);
        Ok(self.subscribers.remove(key)?.is_some())
    }

    fn subscribers_sync(&self, channel: &str) -> Result<Vec<String>, StoreError> {
        let prefix = Self::channel_prefix(channel);
        let mut services = Vec::new();
        for entry in self.subscribers.scan_prefix(&prefix) {
            let (key, _) = entry?;
            let service = String::from_utf8_lossy(&key[prefix.len()..]).into_owned();
            services.push(service);
        }
        Ok(services)
    }

    fn insert_message_sync(&self, message: NewMessage) -> Result<MessageId, StoreError> {
        let id = MessageId(self.db.generate_id()?);
        let row = Message::from_new(id, message);
        self.queue
            .insert(Self::message_key(id), serde_json::to_vec(&row)?)?;
        Ok(id)
    }

    fn get_message_sync(&self, id: MessageId) -> Result<Option<Message>, StoreError> {
        self.queue
            .get(Self::message_key(id))?
            .map(|bytes| Self::decode(&bytes))
            .transpose()
    }

    /// Reads the row and returns its bytes if the lock timestamp matches.
    fn read_if_locked_at(
        &self,
        id: MessageId,
        expected_lock: Option<i64>,
    ) -> Result<Option<IVec>, StoreError> {
        let Some(current) = self.queue.get(Self::message_key(id))? else {
            return Ok(None);
        };
        if Self::decode(&current)?.lock_timestamp() != expected_lock {
            return Ok(None);
        }
        Ok(Some(current))
    }

    fn update_message_sync(
        &self,
        expected_lock: Option<i64>,
        message: &Message,
    ) -> Result<u64, StoreError> {
        let Some(current) = self.read_if_locked_at(message.id, expected_lock)? else {
            return Ok(0);
        };
        let encoded = serde_json::to_vec(message)?;
        let swapped = self.queue.compare_and_swap(
            Self::message_key(message.id),
            Some(current),
            Some(encoded),
        )?;
        Ok(u64::from(swapped.is_ok()))
    }

    fn delete_message_sync(
        &self,
        id: MessageId,
        expected_lock: Option<i64>,
    ) -> Result<u64, StoreError> {
        let Some(current) = self.read_if_locked_at(id, expected_lock)? else {
            return Ok(0);
        };
        let swapped =
            self.queue
                .compare_and_swap(Self::message_key(id), Some(current), None as Option<IVec>)?;
        Ok(u64::from(swapped.is_ok()))
    }

    fn purge_expired_sync(&self) -> Result<Vec<Message>, StoreError> {
        let mut purged = Vec::new();
        for entry in self.queue.iter() {
            let (key, bytes) = entry?;
            let Some(message) = Self::decode_scanned(&key, &bytes) else {
                continue;
            };
            // ttl never increases, so whatever is there now is expired too
            if message.ttl < 0 && self.queue.remove(key)?.is_some() {
                purged.push(message);
            }
        }
        Ok(purged)
    }

    fn select_ready_sync(
        &self,
        now: i64,
        policy: LeasePolicy,
        limit: usize,
    ) -> Result<Vec<Message>, StoreError> {
        let mut selected = Vec::new();
        for entry in self.queue.iter() {
            if selected.len() >= limit {
                break;
            }
            let (key, bytes) = entry?;
            let Some(message) = Self::decode_scanned(&key, &bytes) else {
                continue;
            };
            if policy.is_ready(&message, now) {
                selected.push(message);
            }
        }
        Ok(selected)
    }
}

impl Store for SledStore {
    fn add_subscription(&self, subscription: Subscription) -> StoreFuture<'_, bool> {
        ready(self.add_subscription_sync(&subscription))
    }

    fn remove_subscription(&self, subscription: Subscription) -> StoreFuture<'_, bool> {
        ready(self.remove_subscription_sync(&subscription))
    }

    fn subscribers(&self, channel: String) -> StoreFuture<'_, Vec<String>> {
        ready(self.subscribers_sync(&channel))
    }

    fn insert_message(&self, message: NewMessage) -> StoreFuture<'_, MessageId> {
        ready(self.insert_message_sync(message))
    }

    fn get_message(&self, id: MessageId) -> StoreFuture<'_, Option<Message>> {
        ready(self.get_message_sync(id))
    }

    fn update_message(&self, expected_lock: Option<i64>, message: Message) -> StoreFuture<'_, u64> {
        ready(self.update_message_sync(expected_lock, &message))
    }

    fn delete_message(&self, id: MessageId, expected_lock: Option<i64>) -> StoreFuture<'_, u64> {
        ready(self.delete_message_sync(id, expected_lock))
    }

    fn purge_expired(&self) -> StoreFuture<'_, Vec<Message>> {
        ready(self.purge_expired_sync())
    }

    fn select_ready(
        &self,
        now: i64,
        policy: LeasePolicy,
        limit: usize,
    ) -> StoreFuture<'_, Vec<Message>> {
        ready(self.select_ready_sync(now, policy, limit))
    }
}

impl std::fmt::Debug for SledStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SledStore")
            .field("db", &"sled::Db")
            .field("queue", &QUEUE_TREE)
            .finish()
    }
}
