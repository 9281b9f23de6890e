// =============================================================================
// Recovery Queue — rate-limited provider recovery probes
// =============================================================================
//
// When a pair's provider data goes bad (breaker trips, repeated soft
// failures), the pair is queued for recovery probing rather than hammered
// inline. The queue is the core's own admission control for that traffic:
// at most MAX_CONCURRENT probes in flight, a fixed delay between batches,
// and per-symbol deduplication so a flapping pair holds exactly one
// pending entry.

use std::collections::{HashSet, VecDeque};
use std::sync::Arc;

use futures_util::future::join_all;
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::gateway::MarketDataGateway;
use crate::pairs::Pair;

/// Probes processed per batch.
const MAX_CONCURRENT: usize = 2;

/// Delay between probe batches.
const INTER_BATCH_DELAY_MS: u64 = 1_000;

/// Deduplicated FIFO of symbols awaiting a recovery probe.
pub struct RecoveryQueue {
    pending: Mutex<VecDeque<String>>,
    queued: Mutex<HashSet<String>>,
}

impl RecoveryQueue {
    pub fn new() -> Self {
        Self {
            pending: Mutex::new(VecDeque::new()),
            queued: Mutex::new(HashSet::new()),
        }
    }

    /// Enqueue a symbol for probing. Returns false when the symbol already
    /// holds a pending entry.
    pub fn enqueue(&self, symbol: &str) -> bool {
        let symbol = symbol.trim().to_uppercase();
        let mut queued = self.queued.lock();
        if !queued.insert(symbol.clone()) {
            debug!(symbol = %symbol, "recovery already pending, enqueue collapsed");
            return false;
        }
        self.pending.lock().push_back(symbol);
        true
    }

    /// Pop the next batch (at most [`MAX_CONCURRENT`] symbols).
    pub fn next_batch(&self) -> Vec<String> {
        let mut pending = self.pending.lock();
        let mut queued = self.queued.lock();

        let mut batch = Vec::with_capacity(MAX_CONCURRENT);
        while batch.len() < MAX_CONCURRENT {
            match pending.pop_front() {
                Some(symbol) => {
                    queued.remove(&symbol);
                    batch.push(symbol);
                }
                None => break,
            }
        }
        batch
    }

    pub fn len(&self) -> usize {
        self.pending.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.lock().is_empty()
    }
}

impl Default for RecoveryQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for RecoveryQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecoveryQueue")
            .field("pending", &self.pending.lock().len())
            .finish()
    }
}

/// Drive the recovery queue against the gateway until the process stops.
///
/// Each symbol is probed with a lightweight ticker fetch; a failed probe
/// re-enqueues the symbol for a later batch.
pub async fn run_recovery_loop(queue: Arc<RecoveryQueue>, gateway: Arc<dyn MarketDataGateway>) {
    info!("recovery loop started");
    loop {
        let batch = queue.next_batch();
        if batch.is_empty() {
            tokio::time::sleep(std::time::Duration::from_millis(INTER_BATCH_DELAY_MS)).await;
            continue;
        }

        let probes = batch.iter().map(|symbol| {
            let gateway = gateway.clone();
            async move {
                match Pair::parse(symbol) {
                    Ok(pair) => gateway.ticker(&pair).await.map(|_| ()).map_err(|e| e.to_string()),
                    Err(e) => Err(e.to_string()),
                }
            }
        });

        for (symbol, outcome) in batch.iter().zip(join_all(probes).await) {
            match outcome {
                Ok(()) => info!(symbol = %symbol, "provider recovery probe succeeded"),
                Err(error) => {
                    warn!(symbol = %symbol, error = %error, "recovery probe failed, requeueing");
                    queue.enqueue(symbol);
                }
            }
        }

        tokio::time::sleep(std::time::Duration::from_millis(INTER_BATCH_DELAY_MS)).await;
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn enqueue_deduplicates_per_symbol() {
        let queue = RecoveryQueue::new();
        assert!(queue.enqueue("BTC"));
        assert!(!queue.enqueue("btc"), "case-normalized duplicate collapses");
        assert!(!queue.enqueue(" BTC "));
        assert!(queue.enqueue("ETH"));
        assert_eq!(queue.len(), 2);
    }

    #[test]
    fn batches_are_capped_at_two() {
        let queue = RecoveryQueue::new();
        for s in ["BTC", "ETH", "SOL", "XRP"] {
            queue.enqueue(s);
        }

        let first = queue.next_batch();
        assert_eq!(first, vec!["BTC".to_string(), "ETH".to_string()]);

        let second = queue.next_batch();
        assert_eq!(second, vec!["SOL".to_string(), "XRP".to_string()]);

        assert!(queue.next_batch().is_empty());
    }

    #[test]
    fn popped_symbol_can_be_requeued() {
        let queue = RecoveryQueue::new();
        queue.enqueue("BTC");
        let batch = queue.next_batch();
        assert_eq!(batch.len(), 1);

        // Once popped, the dedup entry is released.
        assert!(queue.enqueue("BTC"));
        assert_eq!(queue.len(), 1);
    }
}
