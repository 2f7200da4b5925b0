use tracing::info;

use crate::broker::engine::DeliveryEngine;
use crate::broker::sweeper::Sweeper;

/// A running broker: one delivery engine plus the sweeper that keeps it
/// honest. This is what an embedding application holds on to.
#[derive(Debug)]
pub struct QueueManager {
    engine: DeliveryEngine,
    sweeper: Sweeper,
}

impl QueueManager {
    /// Starts the periodic sweep for `engine`. Must be called inside a
    /// tokio runtime.
    pub fn start(engine: DeliveryEngine) -> Self {
        let sweeper = Sweeper::start(engine.clone());
        info!(
            default_ttl = engine.settings().default_ttl,
            max_ttl = engine.settings().max_ttl,
            flush_limit = engine.settings().flush_limit,
            "queue manager initialized"
        );
        Self { engine, sweeper }
    }

    pub fn engine(&self) -> &DeliveryEngine {
        &self.engine
    }

    /// Stops the sweeper. Deliveries already in flight run to completion
    /// on their own tasks.
    pub async fn shutdown(self) {
        self.sweeper.shutdown().await;
        info!("queue manager stopped");
    }
}
