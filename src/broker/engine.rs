//! Delivery engine
//!
//! Drives every ledger row through the lease protocol in [`lease`]:
//! - acquire a lease with a conditional write keyed on the lock timestamp
//!   that was read, so exactly one contender wins per row and version
//! - run the delivery callback as its own task
//! - settle the outcome with another conditional write keyed on the lease
//!   timestamp, which silently drops outcomes that lost to a reclaim
//!
//! There is no in-process lock anywhere in this module. Several engines,
//! in one process or many, can share a store safely because every mutation
//! is a compare-and-swap and a `0` result means "someone else got there
//! first, walk away". The next sweep picks up whatever is left.
//!
//! [`lease`]: crate::broker::lease

use std::sync::Arc;

use futures::future::{BoxFuture, FutureExt};
use serde_json::Value;
use tracing::{debug, error, warn};

use crate::broker::deliver::{Deliver, Delivery};
use crate::broker::lease::{self, Acquire, LeasePolicy, Settle};
use crate::broker::message::{Message, MessageId, NewMessage};
use crate::broker::subscription::SubscriptionIndex;
use crate::config::QueueSettings;
use crate::persistence::Store;
use crate::utils::{BrokerError, Clock, DeliveryError, Result, SystemClock};

/// What handling one row amounted to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Handled {
    /// A live lease still holds the row.
    Skipped,
    /// A conditional write matched nothing; a competitor moved first.
    Missed,
    /// A lease was taken and a delivery started.
    Leased,
    /// The row had nobody left to deliver to and was removed.
    Finished,
    /// The attempt budget ran out; the expiry pass will remove the row.
    Exhausted,
}

/// Counters from one sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub expired: usize,
    pub selected: usize,
    pub leased: usize,
}

#[derive(Clone)]
pub struct DeliveryEngine {
    store: Arc<dyn Store>,
    handler: Arc<dyn Deliver>,
    clock: Arc<dyn Clock>,
    subscriptions: SubscriptionIndex,
    settings: QueueSettings,
    policy: LeasePolicy,
}

impl DeliveryEngine {
    /// Builds an engine over `store`. Fails with
    /// [`BrokerError::InvalidSettings`] when a queue setting is not positive.
    pub fn new(
        store: Arc<dyn Store>,
        handler: Arc<dyn Deliver>,
        settings: QueueSettings,
    ) -> Result<Self> {
        settings.validate().map_err(BrokerError::InvalidSettings)?;
        Ok(Self {
            subscriptions: SubscriptionIndex::new(store.clone()),
            policy: LeasePolicy::from(&settings),
            store,
            handler,
            clock: Arc::new(SystemClock),
            settings,
        })
    }

    /// Replaces the wall clock used for lease timestamps.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn settings(&self) -> &QueueSettings {
        &self.settings
    }

    pub fn policy(&self) -> LeasePolicy {
        self.policy
    }

    pub async fn subscribe(&self, channel: &str, service: &str) -> Result<bool> {
        self.subscriptions.subscribe(channel, service).await
    }

    pub async fn unsubscribe(&self, channel: &str, service: &str) -> Result<bool> {
        self.subscriptions.unsubscribe(channel, service).await
    }

    pub async fn recipients_of(&self, channel: &str) -> Result<Vec<String>> {
        self.subscriptions.recipients_of(channel).await
    }

    /// Queues `payload` for every service subscribed to `channel` right now.
    ///
    /// Resolves `false` without writing anything when nobody is subscribed.
    /// Otherwise inserts the row, takes the first lease straight away and
    /// resolves `true`; the delivery itself continues in the background.
    pub async fn enqueue(&self, channel: &str, payload: Value, ttl: Option<i64>) -> Result<bool> {
        BrokerError::require_name("channel", channel)?;

        let recipients = self.subscriptions.recipients_of(channel).await?;
        if recipients.is_empty() {
            debug!(channel, "no subscribers, message not queued");
            return Ok(false);
        }

        let ttl = self.settings.effective_ttl(ttl);
        let id = self
            .store
            .insert_message(NewMessage {
                channel: channel.to_string(),
                payload,
                recipients: recipients.into(),
                ttl,
                enqueued_at: self.clock.now_millis(),
            })
            .await?;
        debug!(message_id = %id, channel, ttl, "message enqueued");

        self.flush_message(id).await;
        Ok(true)
    }

    /// One sweep: drop expired rows, then drive up to `flush_limit` rows
    /// that are unlocked or whose lease has lapsed.
    ///
    /// A store failure abandons the sweep. A failure on one row is logged
    /// and the rest of the batch still runs.
    pub async fn flush_queue(&self) -> Result<SweepReport> {
        let purged = self.store.purge_expired().await?;
        for message in &purged {
            warn!(
                message_id = %message.id,
                channel = %message.channel,
                errors = message.errors,
                "message expired, dropped"
            );
        }

        let now = self.clock.now_millis();
        let batch = self
            .store
            .select_ready(now, self.policy, self.settings.flush_limit)
            .await?;

        let mut report = SweepReport {
            expired: purged.len(),
            selected: batch.len(),
            leased: 0,
        };

        for message in batch {
            let id = message.id;
            match self.handle_message(message).await {
                Ok(Handled::Leased) => report.leased += 1,
                Ok(_) => {}
                Err(e) => error!(message_id = %id, error = %e, "cannot handle message"),
            }
        }

        debug!(
            expired = report.expired,
            selected = report.selected,
            leased = report.leased,
            "queue flushed"
        );
        Ok(report)
    }

    /// Re-reads one row and drives it. Errors are logged, not returned.
    pub async fn flush_message(&self, id: MessageId) {
        match self.store.get_message(id).await {
            Ok(Some(message)) => {
                if let Err(e) = self.handle_message(message).await {
                    error!(message_id = %id, error = %e, "cannot handle message");
                }
            }
            Ok(None) => debug!(message_id = %id, "message not in queue"),
            Err(e) => error!(message_id = %id, error = %e, "cannot flush message"),
        }
    }

    /// Attempts the `PENDING → LEASED` transition on `snapshot`.
    ///
    /// Eligibility is re-checked here even when the row came from a sweep
    /// that already filtered on it, since the row may have moved since.
    pub async fn handle_message(&self, snapshot: Message) -> Result<Handled> {
        let now = self.clock.now_millis();
        let id = snapshot.id;
        let expected = snapshot.lock_timestamp();

        debug!(
            message_id = %id,
            lock = ?snapshot.lock_owner(),
            ttl = snapshot.ttl,
            "handling message"
        );

        match lease::acquire(&snapshot, &self.policy, now) {
            Acquire::Held => Ok(Handled::Skipped),
            Acquire::Exhaust(None) => Ok(Handled::Exhausted),
            Acquire::Exhaust(Some(next)) => {
                if self.store.update_message(expected, next).await? == 0 {
                    debug!(message_id = %id, "lock missed");
                    return Ok(Handled::Missed);
                }
                warn!(message_id = %id, "delivery attempts exhausted");
                Ok(Handled::Exhausted)
            }
            Acquire::Finish => {
                if self.store.delete_message(id, expected).await? == 0 {
                    debug!(message_id = %id, "lock missed");
                    return Ok(Handled::Missed);
                }
                debug!(message_id = %id, "message removed from queue");
                Ok(Handled::Finished)
            }
            Acquire::Lease {
                next,
                recipient,
                reclaimed,
            } => {
                if let Some(owner) = reclaimed {
                    debug!(message_id = %id, owner = %owner, "lease timed out");
                }
                if self.store.update_message(expected, next.clone()).await? == 0 {
                    debug!(message_id = %id, "lock missed");
                    return Ok(Handled::Missed);
                }
                tokio::spawn(self.clone().deliver(next, recipient));
                Ok(Handled::Leased)
            }
        }
    }

    async fn deliver(self, leased: Message, recipient: String) {
        let outcome = self
            .handler
            .deliver(&leased.channel, &recipient, &leased.payload)
            .await;

        match &outcome {
            Ok(delivery) => debug!(
                message_id = %leased.id,
                recipient = %recipient,
                ?delivery,
                "message delivered"
            ),
            Err(reason) => warn!(
                message_id = %leased.id,
                recipient = %recipient,
                reason = %reason,
                "failed to deliver message"
            ),
        }

        if let Err(e) = self.settle(leased, outcome).await {
            error!(error = %e, "cannot record delivery outcome");
        }
    }

    async fn settle(
        &self,
        leased: Message,
        outcome: std::result::Result<Delivery, DeliveryError>,
    ) -> Result<()> {
        let id = leased.id;
        let expected = leased.lock_timestamp();

        let written = match lease::settle(&leased, &outcome) {
            Settle::Remove => self.store.delete_message(id, expected).await?,
            Settle::Retry(next) => self.store.update_message(expected, next).await?,
            Settle::Release(next) => {
                let written = self.store.update_message(expected, next).await?;
                if written == 1 {
                    self.redeliver(id).await;
                }
                written
            }
        };

        if written == 0 {
            debug!(message_id = %id, "stale outcome discarded, lease was superseded");
        }
        Ok(())
    }

    // Boxed so the spawn in `handle_message` does not make the future types
    // of these functions refer to themselves.
    fn redeliver(&self, id: MessageId) -> BoxFuture<'static, ()> {
        let engine = self.clone();
        async move { engine.flush_message(id).await }.boxed()
    }
}

impl std::fmt::Debug for DeliveryEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeliveryEngine")
            .field("settings", &self.settings)
            .field("clock", &self.clock)
            .finish()
    }
}
