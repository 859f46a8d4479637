//! UTXO tracker: block ingestion, spend matching, balances and reorg rollback.
//!
//! All state lives in one structure owned by a single logical actor. Block
//! ingestion is synchronous; the sync driver feeds blocks strictly in height
//! order and this module guarantees that, within a block, output discovery
//! precedes spend discovery which precedes classification.

use std::collections::{BTreeMap, HashMap, HashSet};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::crypto::Hash;
use crate::sync::SyncEvents;
use crate::{WalletError, MATURITY_BLOCKS, UNLOCK_TIME_HEIGHT_THRESHOLD};

/// Blocks between retention sweeps; spent outputs older than this are pruned.
pub const PRUNE_INTERVAL: u64 = 2880;

/// Newest synced-block records kept for reorg detection.
pub const SYNCED_BLOCK_RETENTION: usize = 1000;

/// Dense checkpoints kept at the tip.
pub const CHECKPOINT_RETENTION: usize = 50;

/// Heights divisible by this keep their checkpoint forever.
pub const CHECKPOINT_SPARSE_INTERVAL: u64 = 5000;

/// Unique identity of an output within the chain.
pub type OutputId = (Hash, u32);

/// The tracker's view of one owned transaction output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WalletOutput {
    pub owner_key: [u8; 32],
    pub amount: u64,
    pub block_height: u64,
    pub block_timestamp: u64,
    pub tx_hash: Hash,
    pub out_index: u32,
    pub global_output_index: Option<u64>,
    pub unlock_time: u64,
    pub tx_pubkey: Option<[u8; 32]>,
    pub is_coinbase: bool,
    pub is_staking_origin: bool,
    /// Set at most once, when a spend of this output is observed.
    pub spent_at_height: Option<u64>,
}

impl WalletOutput {
    pub fn id(&self) -> OutputId {
        (self.tx_hash, self.out_index)
    }

    pub fn is_spent(&self) -> bool {
        self.spent_at_height.is_some()
    }
}

/// An observed spend of one of our outputs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WalletSpend {
    pub amount: u64,
    pub parent_tx_hash: Hash,
    pub parent_out_index: u32,
    pub block_height: u64,
    pub block_timestamp: u64,
    pub spending_tx_hash: Hash,
}

/// Minimal per-block record retained for reorg detection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncedBlock {
    pub height: u64,
    pub hash: Hash,
    pub timestamp: u64,
    pub tx_hashes: Vec<Hash>,
}

/// One transaction's worth of block data, already hex-decoded by the
/// transport layer.
#[derive(Debug, Clone, Default)]
pub struct TxData {
    pub hash: Hash,
    pub unlock_time: u64,
    pub tx_pubkey: Option<[u8; 32]>,
    pub outputs: Vec<OutputData>,
    pub inputs: Vec<InputData>,
}

#[derive(Debug, Clone)]
pub struct OutputData {
    pub key: [u8; 32],
    pub amount: u64,
    pub global_index: Option<u64>,
}

#[derive(Debug, Clone, Default)]
pub struct InputData {
    pub amount: u64,
    pub key_offsets: Vec<u64>,
    pub parent_tx_hash: Option<Hash>,
    pub parent_out_index: Option<u32>,
    pub key_image: Option<[u8; 32]>,
}

/// A block as fed to the tracker. Staking-class transactions arrive in their
/// own array and mark the outputs they produce.
#[derive(Debug, Clone, Default)]
pub struct BlockData {
    pub height: u64,
    pub hash: Hash,
    pub timestamp: u64,
    pub coinbase: Option<TxData>,
    pub transactions: Vec<TxData>,
    pub staking_transactions: Vec<TxData>,
}

/// Summary of one `process_block` call.
#[derive(Debug, Clone, Copy, Default)]
pub struct BlockOutcome {
    pub outputs_found: usize,
    pub spends_found: usize,
    pub rolled_back: bool,
    pub skipped: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransactionKind {
    Incoming,
    Outgoing,
    Coinbase,
    Staking,
}

/// One entry of the wallet's derived transaction history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionRecord {
    pub tx_hash: Hash,
    pub block_height: u64,
    pub block_timestamp: u64,
    /// Net effect on the wallet: received minus spent, in atomic units.
    pub amount: i64,
    pub kind: TransactionKind,
    pub confirmations: u64,
}

/// Serializable tracker state. Restoring a snapshot yields the same balances
/// and classifications as replaying the chain.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WalletSnapshot {
    pub outputs: HashMap<OutputId, WalletOutput>,
    pub spends: HashMap<OutputId, WalletSpend>,
    pub current_height: u64,
    pub staking_tx_hashes: HashSet<Hash>,
    pub checkpoints: BTreeMap<u64, Hash>,
    pub synced_blocks: BTreeMap<u64, SyncedBlock>,
}

pub struct WalletState {
    owned_keys: HashSet<[u8; 32]>,
    outputs: HashMap<OutputId, WalletOutput>,
    spends: HashMap<OutputId, WalletSpend>,
    synced_blocks: BTreeMap<u64, SyncedBlock>,
    checkpoints: BTreeMap<u64, Hash>,
    staking_tx_hashes: HashSet<Hash>,
    current_height: u64,
    blocks_since_prune: u64,
}

impl WalletState {
    /// Creates a tracker scanning for the given spend public keys, starting
    /// at `start_height` (clamped to 1; the genesis block carries no wallet
    /// outputs on this network).
    pub fn new(owned_keys: Vec<[u8; 32]>, start_height: u64) -> Self {
        let start = start_height.max(1);
        WalletState {
            owned_keys: owned_keys.into_iter().collect(),
            outputs: HashMap::new(),
            spends: HashMap::new(),
            synced_blocks: BTreeMap::new(),
            checkpoints: BTreeMap::new(),
            staking_tx_hashes: HashSet::new(),
            current_height: start - 1,
            blocks_since_prune: 0,
        }
    }

    pub fn current_height(&self) -> u64 {
        self.current_height
    }

    /// Height the next ingested block must carry.
    pub fn next_height(&self) -> u64 {
        self.current_height + 1
    }

    /// Timestamp of the newest processed block, or 0 before the first.
    pub fn current_timestamp(&self) -> u64 {
        self.synced_blocks
            .get(&self.current_height)
            .map(|b| b.timestamp)
            .unwrap_or(0)
    }

    pub fn output_count(&self) -> usize {
        self.outputs.len()
    }

    pub fn spend_count(&self) -> usize {
        self.spends.len()
    }

    pub fn get_output(&self, id: &OutputId) -> Option<&WalletOutput> {
        self.outputs.get(id)
    }

    pub fn outputs(&self) -> impl Iterator<Item = &WalletOutput> {
        self.outputs.values()
    }

    pub fn is_staking_tx(&self, tx_hash: &Hash) -> bool {
        self.staking_tx_hashes.contains(tx_hash)
    }

    /// The newest `limit` checkpoints, height-descending, for the sync
    /// request's fork-resolution list.
    pub fn recent_checkpoints(&self, limit: usize) -> Vec<(u64, Hash)> {
        self.checkpoints
            .iter()
            .rev()
            .take(limit)
            .map(|(h, hash)| (*h, *hash))
            .collect()
    }

    /// Drops every checkpoint, forcing the next sync request to rely on its
    /// start height alone. Used after an ordering violation.
    pub fn clear_checkpoints(&mut self) {
        self.checkpoints.clear();
    }

    /// Jumps the tip to a node-reported top block without block data. Only
    /// valid when the node declared the intervening range empty.
    pub fn adopt_top_block(&mut self, height: u64, hash: Hash) {
        if height <= self.current_height {
            return;
        }
        self.checkpoints.insert(height, hash);
        self.current_height = height;
        self.trim_checkpoints();
    }

    // ========================================================================
    // BLOCK INGESTION
    // ========================================================================

    /// Ingests one block: reorg check, output matching, spend matching,
    /// classification, retention.
    ///
    /// Re-ingesting a block already processed (same height, same hash) is a
    /// no-op. A different hash at a known height rolls back everything from
    /// that height before processing.
    pub fn process_block(&mut self, block: BlockData, events: &SyncEvents) -> BlockOutcome {
        let mut outcome = BlockOutcome::default();

        if block.height <= self.current_height {
            if let Some(known) = self.synced_blocks.get(&block.height) {
                if known.hash == block.hash {
                    outcome.skipped = true;
                    return outcome;
                }
            }
            warn!(
                height = block.height,
                hash = %hex::encode(block.hash),
                "chain fork detected, rolling back"
            );
            self.rollback_to(block.height);
            outcome.rolled_back = true;
        }

        let mut tx_hashes = Vec::new();
        if let Some(coinbase) = &block.coinbase {
            tx_hashes.push(coinbase.hash);
        }
        tx_hashes.extend(block.transactions.iter().map(|tx| tx.hash));
        tx_hashes.extend(block.staking_transactions.iter().map(|tx| tx.hash));

        for tx in &block.staking_transactions {
            self.staking_tx_hashes.insert(tx.hash);
        }

        self.synced_blocks.insert(
            block.height,
            SyncedBlock {
                height: block.height,
                hash: block.hash,
                timestamp: block.timestamp,
                tx_hashes,
            },
        );
        self.checkpoints.insert(block.height, block.hash);
        self.current_height = block.height;

        if let Some(cb) = &events.on_block {
            cb(block.height, &block.hash);
        }

        // First pass: owned outputs, in transaction then output order.
        let mut touched = Vec::new();
        for (tx, is_coinbase, is_staking) in iter_block_txs(&block) {
            let found = self.match_outputs(tx, &block, is_coinbase, is_staking, events);
            if found > 0 {
                touched.push(tx.hash);
            }
            outcome.outputs_found += found;
        }

        // Second pass: spends of owned outputs, in input order. Coinbase
        // carries only a base input and never spends.
        for tx in block.transactions.iter().chain(&block.staking_transactions) {
            let found = self.match_spends(tx, &block, events);
            if found > 0 && !touched.contains(&tx.hash) {
                touched.push(tx.hash);
            }
            outcome.spends_found += found;
        }

        if let Some(cb) = &events.on_transaction_classified {
            for tx_hash in &touched {
                if let Some(record) = self.classify(tx_hash) {
                    cb(&record);
                }
            }
        }

        self.trim_synced_blocks();
        self.trim_checkpoints();

        self.blocks_since_prune += 1;
        if self.blocks_since_prune >= PRUNE_INTERVAL {
            self.prune_spent_outputs();
            self.blocks_since_prune = 0;
        }

        debug!(
            height = block.height,
            outputs = outcome.outputs_found,
            spends = outcome.spends_found,
            "block processed"
        );
        outcome
    }

    fn match_outputs(
        &mut self,
        tx: &TxData,
        block: &BlockData,
        is_coinbase: bool,
        is_staking: bool,
        events: &SyncEvents,
    ) -> usize {
        let mut found = 0;
        for (index, output) in tx.outputs.iter().enumerate() {
            if !self.owned_keys.contains(&output.key) {
                continue;
            }
            let id = (tx.hash, index as u32);
            if self.outputs.contains_key(&id) {
                continue;
            }
            let wallet_output = WalletOutput {
                owner_key: output.key,
                amount: output.amount,
                block_height: block.height,
                block_timestamp: block.timestamp,
                tx_hash: tx.hash,
                out_index: index as u32,
                global_output_index: output.global_index,
                unlock_time: tx.unlock_time,
                tx_pubkey: tx.tx_pubkey,
                is_coinbase,
                is_staking_origin: is_staking,
                spent_at_height: None,
            };
            if let Some(cb) = &events.on_transaction_found {
                cb(&wallet_output);
            }
            self.outputs.insert(id, wallet_output);
            found += 1;
        }
        found
    }

    fn match_spends(&mut self, tx: &TxData, block: &BlockData, events: &SyncEvents) -> usize {
        let mut found = 0;
        for input in &tx.inputs {
            let Some(id) = self.match_spend_target(input) else {
                continue;
            };
            let Some(output) = self.outputs.get_mut(&id) else {
                continue;
            };
            output.spent_at_height = Some(block.height);
            let spend = WalletSpend {
                amount: output.amount,
                parent_tx_hash: id.0,
                parent_out_index: id.1,
                block_height: block.height,
                block_timestamp: block.timestamp,
                spending_tx_hash: tx.hash,
            };
            if let Some(cb) = &events.on_spend_found {
                cb(&spend);
            }
            self.spends.insert(id, spend);
            found += 1;
        }
        found
    }

    /// Resolves a key input to one of our unspent outputs.
    ///
    /// The exact (tx hash, output index) reference is the only wire-accurate
    /// path and decides the match whenever the server supplied it. The global
    /// index and amount-FIFO paths exist solely for servers that strip the
    /// reference and may mis-attribute between equal-amount outputs.
    fn match_spend_target(&self, input: &InputData) -> Option<OutputId> {
        if let (Some(tx_hash), Some(out_index)) = (input.parent_tx_hash, input.parent_out_index) {
            let id = (tx_hash, out_index);
            let output = self.outputs.get(&id)?;
            if output.is_spent() {
                return None;
            }
            return Some(id);
        }

        if let Some(&global) = input.key_offsets.last() {
            if let Some(output) = self.outputs.values().find(|o| {
                !o.is_spent() && o.amount == input.amount && o.global_output_index == Some(global)
            }) {
                warn!(
                    tx_hash = %hex::encode(output.tx_hash),
                    out_index = output.out_index,
                    "spend matched by global output index fallback"
                );
                return Some(output.id());
            }
        }

        let mut candidates: Vec<&WalletOutput> = self
            .outputs
            .values()
            .filter(|o| !o.is_spent() && o.amount == input.amount)
            .collect();
        candidates.sort_by_key(|o| (o.block_height, o.out_index));
        let output = candidates.first()?;
        warn!(
            tx_hash = %hex::encode(output.tx_hash),
            out_index = output.out_index,
            amount = output.amount,
            "spend matched by amount FIFO fallback"
        );
        Some(output.id())
    }

    // ========================================================================
    // REORGANIZATION HANDLING
    // ========================================================================

    /// Removes every record at or above `height` and rewinds the tip.
    ///
    /// Outputs created below the fork but spent at or above it become
    /// unspent again; checkpoints are truncated in the same step so the next
    /// sync request advertises only surviving hashes.
    pub fn rollback_to(&mut self, height: u64) {
        let removed_blocks = self.synced_blocks.split_off(&height);
        for block in removed_blocks.values() {
            for tx_hash in &block.tx_hashes {
                self.staking_tx_hashes.remove(tx_hash);
            }
        }

        self.outputs.retain(|_, o| o.block_height < height);
        for output in self.outputs.values_mut() {
            if matches!(output.spent_at_height, Some(h) if h >= height) {
                output.spent_at_height = None;
            }
        }
        self.spends.retain(|_, s| s.block_height < height);
        self.checkpoints.split_off(&height);
        self.current_height = height.saturating_sub(1);

        warn!(height, rewound_to = self.current_height, "rolled back chain state");
    }

    // ========================================================================
    // MATURITY, UNLOCK, BALANCES
    // ========================================================================

    fn is_mature(&self, output: &WalletOutput) -> bool {
        self.current_height >= output.block_height.saturating_add(MATURITY_BLOCKS)
    }

    fn is_unlocked(&self, output: &WalletOutput, now: u64) -> bool {
        if output.unlock_time == 0 {
            return true;
        }
        if output.unlock_time < UNLOCK_TIME_HEIGHT_THRESHOLD {
            self.current_height >= output.unlock_time
        } else {
            now >= output.unlock_time
        }
    }

    /// Unspent, mature and unlocked at the current tip.
    pub fn is_spendable(&self, output: &WalletOutput, now: u64) -> bool {
        !output.is_spent() && self.is_mature(output) && self.is_unlocked(output, now)
    }

    /// Spendable outputs ordered oldest-first for deterministic selection.
    pub fn spendable_outputs(&self, now: u64) -> Vec<WalletOutput> {
        let mut spendable: Vec<WalletOutput> = self
            .outputs
            .values()
            .filter(|o| self.is_spendable(o, now))
            .cloned()
            .collect();
        spendable.sort_by_key(|o| (o.block_height, o.tx_hash, o.out_index));
        spendable
    }

    /// Sum of spendable outputs, staking-origin included.
    pub fn available_balance(&self, now: u64) -> u64 {
        self.outputs
            .values()
            .filter(|o| self.is_spendable(o, now))
            .fold(0u64, |acc, o| acc.saturating_add(o.amount))
    }

    /// Unspent non-staking outputs still maturing or time-locked.
    pub fn locked_balance(&self, now: u64) -> u64 {
        self.outputs
            .values()
            .filter(|o| !o.is_spent() && !o.is_staking_origin && !self.is_spendable(o, now))
            .fold(0u64, |acc, o| acc.saturating_add(o.amount))
    }

    /// Unspent staking-origin outputs still locked.
    pub fn staking_locked_balance(&self, now: u64) -> u64 {
        self.outputs
            .values()
            .filter(|o| !o.is_spent() && o.is_staking_origin && !self.is_spendable(o, now))
            .fold(0u64, |acc, o| acc.saturating_add(o.amount))
    }

    // ========================================================================
    // TRANSACTION HISTORY
    // ========================================================================

    fn classify(&self, tx_hash: &Hash) -> Option<TransactionRecord> {
        let mut received = 0u64;
        let mut spent = 0u64;
        let mut height = 0u64;
        let mut timestamp = 0u64;
        let mut coinbase = false;

        for output in self.outputs.values().filter(|o| o.tx_hash == *tx_hash) {
            received = received.saturating_add(output.amount);
            height = output.block_height;
            timestamp = output.block_timestamp;
            coinbase |= output.is_coinbase;
        }
        for spend in self.spends.values().filter(|s| s.spending_tx_hash == *tx_hash) {
            spent = spent.saturating_add(spend.amount);
            height = spend.block_height;
            timestamp = spend.block_timestamp;
        }
        if received == 0 && spent == 0 {
            return None;
        }

        let kind = if self.staking_tx_hashes.contains(tx_hash) {
            TransactionKind::Staking
        } else if spent > 0 {
            TransactionKind::Outgoing
        } else if coinbase {
            TransactionKind::Coinbase
        } else {
            TransactionKind::Incoming
        };

        Some(TransactionRecord {
            tx_hash: *tx_hash,
            block_height: height,
            block_timestamp: timestamp,
            amount: received as i64 - spent as i64,
            kind,
            confirmations: self.current_height.saturating_sub(height) + 1,
        })
    }

    /// The newest `limit` wallet-relevant transactions, newest first.
    pub fn transactions(&self, limit: usize) -> Vec<TransactionRecord> {
        let mut tx_hashes: HashSet<Hash> = self.outputs.values().map(|o| o.tx_hash).collect();
        tx_hashes.extend(self.spends.values().map(|s| s.spending_tx_hash));

        let mut records: Vec<TransactionRecord> = tx_hashes
            .iter()
            .filter_map(|hash| self.classify(hash))
            .collect();
        records.sort_by(|a, b| {
            b.block_height
                .cmp(&a.block_height)
                .then(a.tx_hash.cmp(&b.tx_hash))
        });
        records.truncate(limit);
        records
    }

    // ========================================================================
    // RETENTION
    // ========================================================================

    fn prune_spent_outputs(&mut self) {
        let cutoff = self.current_height.saturating_sub(PRUNE_INTERVAL);
        let before = self.outputs.len();
        self.outputs
            .retain(|_, o| !matches!(o.spent_at_height, Some(h) if h < cutoff));
        let outputs = &self.outputs;
        self.spends.retain(|id, _| outputs.contains_key(id));
        let pruned = before - self.outputs.len();
        if pruned > 0 {
            debug!(pruned, cutoff, "pruned spent outputs");
        }
    }

    fn trim_synced_blocks(&mut self) {
        while self.synced_blocks.len() > SYNCED_BLOCK_RETENTION {
            self.synced_blocks.pop_first();
        }
    }

    fn trim_checkpoints(&mut self) {
        let dense_cutoff = {
            let mut heights: Vec<u64> = self.checkpoints.keys().rev().copied().collect();
            match heights.get(CHECKPOINT_RETENTION - 1) {
                Some(&h) => h,
                None => return,
            }
        };
        self.checkpoints
            .retain(|h, _| *h >= dense_cutoff || *h % CHECKPOINT_SPARSE_INTERVAL == 0);
    }

    // ========================================================================
    // SNAPSHOT
    // ========================================================================

    pub fn snapshot(&self) -> WalletSnapshot {
        WalletSnapshot {
            outputs: self.outputs.clone(),
            spends: self.spends.clone(),
            current_height: self.current_height,
            staking_tx_hashes: self.staking_tx_hashes.clone(),
            checkpoints: self.checkpoints.clone(),
            synced_blocks: self.synced_blocks.clone(),
        }
    }

    /// Rebuilds a tracker from a snapshot for the given spend keys.
    pub fn restore(owned_keys: Vec<[u8; 32]>, snapshot: WalletSnapshot) -> Self {
        WalletState {
            owned_keys: owned_keys.into_iter().collect(),
            outputs: snapshot.outputs,
            spends: snapshot.spends,
            synced_blocks: snapshot.synced_blocks,
            checkpoints: snapshot.checkpoints,
            staking_tx_hashes: snapshot.staking_tx_hashes,
            current_height: snapshot.current_height,
            blocks_since_prune: 0,
        }
    }

    pub fn snapshot_bytes(&self) -> Result<Vec<u8>, WalletError> {
        bincode::serialize(&self.snapshot())
            .map_err(|e| WalletError::CodecInvalid(format!("snapshot serialization: {}", e)))
    }

    pub fn restore_bytes(owned_keys: Vec<[u8; 32]>, bytes: &[u8]) -> Result<Self, WalletError> {
        let snapshot: WalletSnapshot = bincode::deserialize(bytes)
            .map_err(|e| WalletError::CodecInvalid(format!("snapshot deserialization: {}", e)))?;
        Ok(Self::restore(owned_keys, snapshot))
    }
}

fn iter_block_txs(block: &BlockData) -> impl Iterator<Item = (&TxData, bool, bool)> {
    block
        .coinbase
        .iter()
        .map(|tx| (tx, true, false))
        .chain(block.transactions.iter().map(|tx| (tx, false, false)))
        .chain(block.staking_transactions.iter().map(|tx| (tx, false, true)))
}
