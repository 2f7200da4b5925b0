//! Ledger rows.
//!
//! A `Message` is one enqueue call fanned out to the channel's subscribers
//! at that instant. Its lease is modelled as `Option<Lease>` so that
//! `locked`, `lockTimestamp` and `lockOwner` can never disagree in memory;
//! the persisted form keeps the three flat fields and is validated on decode.

use std::collections::VecDeque;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Store-assigned row identifier. Opaque to the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageId(pub u64);

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// The in-flight delivery attempt currently holding a message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Lease {
    pub owner: String,
    pub acquired_at: i64,
}

/// Lifecycle position of a row, derived from its fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageState {
    /// Unlocked with recipients left to try.
    Pending,
    /// Locked by an attempt awaiting its outcome.
    Leased,
    /// Nothing left to deliver; the row should be removed.
    Done,
    /// Attempt budget spent; the expiry pass removes the row.
    Expired,
}

/// Row contents before the store has assigned an id.
#[derive(Debug, Clone, PartialEq)]
pub struct NewMessage {
    pub channel: String,
    pub payload: Value,
    pub recipients: VecDeque<String>,
    pub ttl: i64,
    pub enqueued_at: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "MessageRecord", into = "MessageRecord")]
pub struct Message {
    pub id: MessageId,
    pub channel: String,
    pub payload: Value,
    /// Remaining delivery candidates, consumed from the front.
    pub recipients: VecDeque<String>,
    /// Remaining attempt budget; negative means exhausted.
    pub ttl: i64,
    /// Consecutive failed or timed-out attempts, drives backoff.
    pub errors: u32,
    pub enqueued_at: i64,
    lease: Option<Lease>,
}

impl Message {
    pub fn from_new(id: MessageId, new: NewMessage) -> Self {
        Self {
            id,
            channel: new.channel,
            payload: new.payload,
            recipients: new.recipients,
            ttl: new.ttl,
            errors: 0,
            enqueued_at: new.enqueued_at,
            lease: None,
        }
    }

    pub fn lease(&self) -> Option<&Lease> {
        self.lease.as_ref()
    }

    pub fn is_locked(&self) -> bool {
        self.lease.is_some()
    }

    /// The value conditional writes are keyed on.
    pub fn lock_timestamp(&self) -> Option<i64> {
        self.lease.as_ref().map(|lease| lease.acquired_at)
    }

    pub fn lock_owner(&self) -> Option<&str> {
        self.lease.as_ref().map(|lease| lease.owner.as_str())
    }

    pub fn lock(&mut self, owner: String, at: i64) {
        self.lease = Some(Lease {
            owner,
            acquired_at: at,
        });
    }

    /// Clears the lease, handing back the previous one.
    pub fn unlock(&mut self) -> Option<Lease> {
        self.lease.take()
    }

    pub fn state(&self) -> MessageState {
        if self.ttl < 0 {
            MessageState::Expired
        } else if self.lease.is_some() {
            MessageState::Leased
        } else if self.recipients.is_empty() {
            MessageState::Done
        } else {
            MessageState::Pending
        }
    }
}

/// Persisted shape of a ledger row.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MessageRecord {
    id: MessageId,
    channel: String,
    payload: Value,
    recipients: VecDeque<String>,
    ttl: i64,
    locked: bool,
    lock_timestamp: Option<i64>,
    lock_owner: Option<String>,
    errors: u32,
    #[serde(default)]
    enqueued_at: i64,
}

impl TryFrom<MessageRecord> for Message {
    type Error = String;

    fn try_from(record: MessageRecord) -> Result<Self, Self::Error> {
        let lease = match (record.locked, record.lock_timestamp, record.lock_owner) {
            (true, Some(acquired_at), Some(owner)) => Some(Lease { owner, acquired_at }),
            (false, None, None) => None,
            (locked, timestamp, owner) => {
                return Err(format!(
                    "row {} has inconsistent lock fields (locked={locked}, lockTimestamp={timestamp:?}, lockOwner={owner:?})",
                    record.id
                ));
            }
        };

        Ok(Self {
            id: record.id,
            channel: record.channel,
            payload: record.payload,
            recipients: record.recipients,
            ttl: record.ttl,
            errors: record.errors,
            enqueued_at: record.enqueued_at,
            lease,
        })
    }
}

impl From<Message> for MessageRecord {
    fn from(message: Message) -> Self {
        let (lock_owner, lock_timestamp) = match message.lease {
            Some(lease) => (Some(lease.owner), Some(lease.acquired_at)),
            None => (None, None),
        };

        Self {
            id: message.id,
            channel: message.channel,
            payload: message.payload,
            recipients: message.recipients,
            ttl: message.ttl,
            locked: lock_owner.is_some(),
            lock_timestamp,
            lock_owner,
            errors: message.errors,
            enqueued_at: message.enqueued_at,
        }
    }
}
