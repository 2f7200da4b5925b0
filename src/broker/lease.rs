//! Lease protocol transitions.
//!
//! Pure functions over a snapshot of a row: they decide what the row should
//! become, and the engine persists that decision with a conditional write
//! keyed on the lock timestamp it observed. Nothing in here touches a store.
//!
//! ```text
//!   PENDING ──acquire──▶ LEASED ──terminal / last recipient──▶ DONE
//!      ▲                   │
//!      └──continue/fail────┘        ttl < 0 at any point ──▶ EXPIRED
//! ```

use crate::broker::deliver::Delivery;
use crate::broker::message::{Message, MessageState};
use crate::config::QueueSettings;
use crate::utils::DeliveryError;

/// Timing rules for reclaiming abandoned leases.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LeasePolicy {
    pub timeout_ms: i64,
    pub error_ratio_ms: i64,
}

impl LeasePolicy {
    pub fn new(timeout_ms: i64, error_ratio_ms: i64) -> Self {
        Self {
            timeout_ms,
            error_ratio_ms,
        }
    }

    /// `2^(errors - 1) * error_ratio`, saturating.
    pub fn backoff(&self, errors: u32) -> i64 {
        let exponent = i32::try_from(errors).unwrap_or(i32::MAX).saturating_sub(1);
        // float -> int casts saturate
        (2f64.powi(exponent) * self.error_ratio_ms as f64) as i64
    }

    /// Whether a held lease is older than its backoff plus the lease timeout.
    pub fn lease_expired(&self, message: &Message, now: i64) -> bool {
        match message.lock_timestamp() {
            Some(acquired_at) => {
                acquired_at
                    .saturating_add(self.backoff(message.errors))
                    .saturating_add(self.timeout_ms)
                    < now
            }
            None => false,
        }
    }

    /// Sweep eligibility: within budget and either unlocked or reclaimable.
    pub fn is_ready(&self, message: &Message, now: i64) -> bool {
        message.ttl >= 0 && (!message.is_locked() || self.lease_expired(message, now))
    }
}

impl From<&QueueSettings> for LeasePolicy {
    fn from(settings: &QueueSettings) -> Self {
        Self::new(settings.timeout_ms, settings.error_ratio_ms)
    }
}

/// What acquiring a lease on a snapshot amounts to.
#[derive(Debug, Clone, PartialEq)]
pub enum Acquire {
    /// A live attempt still holds the lease.
    Held,
    /// No recipients remain; remove the row.
    Finish,
    /// Budget spent. `Some` carries a reclaimed row to write back for the
    /// expiry pass; `None` means the row is already expired as stored.
    Exhaust(Option<Message>),
    /// Write `next` and deliver to `recipient`.
    Lease {
        next: Message,
        recipient: String,
        reclaimed: Option<String>,
    },
}

/// Computes the `PENDING → LEASED` transition for `snapshot` at `now`.
///
/// An expired lease is reclaimed first: its owner goes to the back of the
/// queue and the attempt counts as a failure.
pub fn acquire(snapshot: &Message, policy: &LeasePolicy, now: i64) -> Acquire {
    if snapshot.state() == MessageState::Expired {
        return Acquire::Exhaust(None);
    }

    let mut next = snapshot.clone();
    let mut reclaimed = None;

    if next.is_locked() {
        if !policy.lease_expired(snapshot, now) {
            return Acquire::Held;
        }
        if let Some(lease) = next.unlock() {
            next.recipients.push_back(lease.owner.clone());
            next.errors = next.errors.saturating_add(1);
            next.ttl -= 1;
            reclaimed = Some(lease.owner);
        }
        if next.ttl < 0 {
            return Acquire::Exhaust(Some(next));
        }
    }

    match next.recipients.pop_front() {
        None => Acquire::Finish,
        Some(recipient) => {
            next.lock(recipient.clone(), now);
            Acquire::Lease {
                next,
                recipient,
                reclaimed,
            }
        }
    }
}

/// What a settled delivery attempt does to the leased row.
#[derive(Debug, Clone, PartialEq)]
pub enum Settle {
    /// Clear the lease and remove the row.
    Remove,
    /// Clear the lease, then immediately drive the next recipient.
    Release(Message),
    /// Record the failure; `next` may keep the lease as a backoff hold.
    Retry(Message),
}

/// Interprets the callback outcome for the row as it was written at
/// lease acquisition.
pub fn settle(leased: &Message, outcome: &Result<Delivery, DeliveryError>) -> Settle {
    match outcome {
        Ok(Delivery::Terminal) => Settle::Remove,
        Ok(Delivery::Continue) if leased.recipients.is_empty() => Settle::Remove,
        Ok(Delivery::Continue) => {
            let mut next = leased.clone();
            next.unlock();
            next.errors = 0;
            Settle::Release(next)
        }
        Err(_) => {
            let mut next = leased.clone();
            // With nobody else to try, the failed owner keeps the lease so the
            // row waits out the backoff before the sweep reclaims it.
            if !next.recipients.is_empty() {
                if let Some(lease) = next.unlock() {
                    next.recipients.push_back(lease.owner);
                }
            }
            next.errors = next.errors.saturating_add(1);
            next.ttl -= 1;
            Settle::Retry(next)
        }
    }
}
