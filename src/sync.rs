//! Sync driver: pulls block batches from an untrusted node, recovers from
//! forks via rolling checkpoints, and degrades to polling once caught up.
//!
//! The driver owns no chain state; it feeds blocks into the tracker and
//! mirrors progress counters into a [`SyncState`] the caller can query at
//! any time. Cancellation is cooperative: the stop flag is observed at every
//! batch boundary and poll tick, after which no further mutation, event or
//! RPC call is issued.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::crypto::Hash;
use crate::rpc::{NodeRpc, SyncDataRequest};
use crate::wallet_state::{TransactionRecord, WalletOutput, WalletSpend, WalletState};
use crate::WalletError;

/// Blocks requested per batch while catching up.
pub const BLOCKS_PER_BATCH: u64 = 20;

/// Floor for the adaptive batch size after errors.
pub const MIN_BLOCK_COUNT: u64 = 5;

/// Empty or failed responses tolerated before a batch gives up.
pub const MAX_EMPTY_RETRIES: u32 = 3;

/// Delay between batch retries.
pub const RETRY_DELAY: Duration = Duration::from_secs(2);

/// Delay between poll ticks once caught up.
pub const POLL_INTERVAL: Duration = Duration::from_secs(5);

/// Checkpoints advertised per sync request.
pub const REQUEST_CHECKPOINTS: usize = 50;

/// Errors retained on the sync state.
const ERROR_RETENTION: usize = 16;

pub type BlockHook = Arc<dyn Fn(u64, &Hash) + Send + Sync>;
pub type OutputHook = Arc<dyn Fn(&WalletOutput) + Send + Sync>;
pub type SpendHook = Arc<dyn Fn(&WalletSpend) + Send + Sync>;
pub type RecordHook = Arc<dyn Fn(&TransactionRecord) + Send + Sync>;
pub type ConnectionHook = Arc<dyn Fn(bool, Duration) + Send + Sync>;

/// Optional observer hooks. Within one block they fire in a fixed order:
/// block, then found outputs, then found spends, then classifications.
#[derive(Clone, Default)]
pub struct SyncEvents {
    pub on_block: Option<BlockHook>,
    pub on_transaction_found: Option<OutputHook>,
    pub on_spend_found: Option<SpendHook>,
    pub on_transaction_classified: Option<RecordHook>,
    /// Edge-triggered: fires only when the connected boolean flips.
    pub on_connection_status_change: Option<ConnectionHook>,
}

/// Cooperative, edge-monotonic stop flag: once set it stays set.
#[derive(Clone, Default)]
pub struct StopFlag(Arc<AtomicBool>);

impl StopFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_set(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// Rearms the flag for a new run. Within one run the flag only ever
    /// moves from unset to set.
    pub(crate) fn clear(&self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Tunables for the driver. Defaults match the network constants.
#[derive(Debug, Clone)]
pub struct SyncOptions {
    pub blocks_per_batch: u64,
    pub min_block_count: u64,
    pub max_empty_retries: u32,
    pub retry_delay: Duration,
    pub poll_interval: Duration,
}

impl Default for SyncOptions {
    fn default() -> Self {
        SyncOptions {
            blocks_per_batch: BLOCKS_PER_BATCH,
            min_block_count: MIN_BLOCK_COUNT,
            max_empty_retries: MAX_EMPTY_RETRIES,
            retry_delay: RETRY_DELAY,
            poll_interval: POLL_INTERVAL,
        }
    }
}

/// Live progress, error and connection information.
#[derive(Debug, Clone, Default)]
pub struct SyncState {
    pub current_height: u64,
    pub network_height: u64,
    pub is_syncing: bool,
    pub synced: bool,
    pub blocks_processed: u64,
    pub outputs_found: u64,
    pub spends_found: u64,
    pub forks_detected: u64,
    pub ordering_violations: u64,
    /// Most recent transport errors, oldest first, bounded.
    pub recent_errors: Vec<String>,
    pub last_latency: Option<Duration>,
    pub is_connected: bool,
}

impl SyncState {
    pub fn record_error(&mut self, message: impl Into<String>) {
        self.recent_errors.push(message.into());
        while self.recent_errors.len() > ERROR_RETENTION {
            self.recent_errors.remove(0);
        }
    }
}

enum BatchOutcome {
    /// Blocks were processed; more may follow.
    Progress,
    /// The node reported the wallet caught up.
    Synced,
    /// The batch was aborted (ordering violation); re-pull next iteration.
    Aborted,
    /// Every block in the batch was already known; retry with delay.
    Stalled,
    /// The stop flag was observed.
    Stopped,
}

/// One sync pass over a tracker, driven against a node transport.
pub struct SyncDriver<'a, R: NodeRpc> {
    rpc: &'a R,
    state: &'a mut WalletState,
    status: &'a mut SyncState,
    options: SyncOptions,
    events: SyncEvents,
    stop: StopFlag,
}

impl<'a, R: NodeRpc> SyncDriver<'a, R> {
    pub fn new(
        rpc: &'a R,
        state: &'a mut WalletState,
        status: &'a mut SyncState,
        options: SyncOptions,
        events: SyncEvents,
        stop: StopFlag,
    ) -> Self {
        SyncDriver {
            rpc,
            state,
            status,
            options,
            events,
            stop,
        }
    }

    /// Runs until the stop flag is set: batch mode while behind the network,
    /// polling once caught up. Transport failures are recorded on the sync
    /// state and retried; they never abort the loop.
    pub async fn run(&mut self) -> Result<(), WalletError> {
        self.status.is_syncing = true;
        let result = self.run_inner().await;
        self.status.is_syncing = false;
        result
    }

    async fn run_inner(&mut self) -> Result<(), WalletError> {
        loop {
            if self.stop.is_set() {
                return Ok(());
            }
            if self.status.synced {
                self.poll_once().await;
            } else {
                match self.catch_up().await {
                    Ok(_) => {}
                    Err(_) => {
                        // Already recorded; pace the next attempt.
                        tokio::time::sleep(self.options.retry_delay).await;
                    }
                }
            }
        }
    }

    /// Batch mode until the node reports the wallet caught up.
    ///
    /// Returns `Ok(true)` once synced, `Ok(false)` if stopped, and the most
    /// recent transport error if the retry budget is exhausted.
    pub async fn catch_up(&mut self) -> Result<bool, WalletError> {
        loop {
            if self.stop.is_set() {
                return Ok(false);
            }
            match self.sync_batch().await? {
                BatchOutcome::Synced => {
                    self.status.synced = true;
                    self.status.current_height = self.state.current_height();
                    info!(height = self.state.current_height(), "wallet synced");
                    return Ok(true);
                }
                BatchOutcome::Stopped => return Ok(false),
                BatchOutcome::Progress | BatchOutcome::Aborted | BatchOutcome::Stalled => {}
            }
        }
    }

    /// One request/process cycle, with the empty-response retry loop.
    async fn sync_batch(&mut self) -> Result<BatchOutcome, WalletError> {
        let mut attempts = 0u32;
        loop {
            if self.stop.is_set() {
                return Ok(BatchOutcome::Stopped);
            }

            let request = self.build_request();
            let failure = match self.rpc.get_wallet_sync_data(&request).await {
                Ok(response) => {
                    self.set_connected(true);
                    let synced_flag = response.synced.unwrap_or(false);
                    let top_block = response.top_block.clone();
                    let blocks = response.into_blocks();

                    if !blocks.is_empty() {
                        match self.process_batch(blocks)? {
                            BatchOutcome::Stalled => {
                                "batch contained no new blocks".to_string()
                            }
                            outcome => return Ok(outcome),
                        }
                    } else if synced_flag || top_block.is_some() {
                        if let Some(top) = top_block {
                            self.adopt_top_block(&top)?;
                        }
                        return Ok(BatchOutcome::Synced);
                    } else {
                        "empty sync response without synced indicator".to_string()
                    }
                }
                Err(e) => {
                    self.set_connected(false);
                    e.to_string()
                }
            };

            self.status.record_error(&failure);
            attempts += 1;
            if attempts > self.options.max_empty_retries {
                warn!(attempts, error = %failure, "sync batch retries exhausted");
                return Err(WalletError::Transport(failure));
            }
            tokio::time::sleep(self.options.retry_delay).await;
        }
    }

    fn build_request(&self) -> SyncDataRequest {
        let checkpoints = self
            .state
            .recent_checkpoints(REQUEST_CHECKPOINTS)
            .into_iter()
            .map(|(_, hash)| hex::encode(hash))
            .collect();

        // Halve the batch after any recorded error, floored at the minimum.
        let block_count = if self.status.recent_errors.is_empty() {
            self.options.blocks_per_batch
        } else {
            (self.options.blocks_per_batch / 2).max(self.options.min_block_count)
        };

        SyncDataRequest {
            block_hash_checkpoints: checkpoints,
            start_height: Some(self.state.current_height()),
            start_timestamp: Some(self.state.current_timestamp()),
            block_count: Some(block_count),
        }
    }

    fn process_batch(
        &mut self,
        blocks: Vec<crate::rpc::WireBlock>,
    ) -> Result<BatchOutcome, WalletError> {
        let mut progressed = false;
        for wire in blocks {
            let block = match wire.into_block_data() {
                Ok(block) => block,
                Err(e) => {
                    self.status.record_error(e.to_string());
                    return Err(e);
                }
            };

            if block.height > self.state.next_height() {
                warn!(
                    got = block.height,
                    expected = self.state.next_height(),
                    "non-contiguous block, clearing checkpoints"
                );
                self.state.clear_checkpoints();
                self.status.ordering_violations += 1;
                return Ok(BatchOutcome::Aborted);
            }

            let outcome = self.state.process_block(block, &self.events);
            if outcome.skipped {
                continue;
            }
            progressed = true;
            self.status.blocks_processed += 1;
            self.status.outputs_found += outcome.outputs_found as u64;
            self.status.spends_found += outcome.spends_found as u64;
            if outcome.rolled_back {
                self.status.forks_detected += 1;
            }
            self.status.current_height = self.state.current_height();
        }

        if !progressed {
            return Ok(BatchOutcome::Stalled);
        }
        if self.status.network_height > 0
            && self.state.current_height() >= self.status.network_height
        {
            return Ok(BatchOutcome::Synced);
        }
        Ok(BatchOutcome::Progress)
    }

    fn adopt_top_block(&mut self, top: &crate::rpc::TopBlock) -> Result<(), WalletError> {
        if top.height <= self.state.current_height() {
            return Ok(());
        }
        let hash: Hash = hex::decode(&top.hash)
            .ok()
            .and_then(|b| b.try_into().ok())
            .ok_or_else(|| WalletError::Transport("bad topBlock hash".to_string()))?;
        debug!(height = top.height, "fast-forwarding to reported top block");
        self.state.adopt_top_block(top.height, hash);
        self.status.network_height = top.height;
        self.status.current_height = top.height;
        Ok(())
    }

    /// One poll tick: sleep, then ask the node for its height.
    async fn poll_once(&mut self) {
        tokio::time::sleep(self.options.poll_interval).await;
        if self.stop.is_set() {
            return;
        }
        match self.fetch_info().await {
            Ok(top_height) => {
                self.status.network_height = top_height;
                if top_height > self.state.current_height() {
                    debug!(
                        local = self.state.current_height(),
                        network = top_height,
                        "network advanced, resuming batch sync"
                    );
                    self.status.synced = false;
                }
            }
            Err(e) => self.status.record_error(e.to_string()),
        }
    }

    /// `/info` round trip with latency measurement and connection tracking.
    pub async fn fetch_info(&mut self) -> Result<u64, WalletError> {
        let start = Instant::now();
        let result = self.rpc.get_info().await;
        let latency = start.elapsed();
        self.status.last_latency = Some(latency);

        match result {
            Ok(info) => {
                self.set_connected(true);
                Ok(info.top_height())
            }
            Err(e) => {
                self.set_connected(false);
                Err(e)
            }
        }
    }

    fn set_connected(&mut self, connected: bool) {
        if self.status.is_connected == connected {
            return;
        }
        self.status.is_connected = connected;
        if let Some(cb) = &self.events.on_connection_status_change {
            cb(connected, self.status.last_latency.unwrap_or_default());
        }
    }
}
