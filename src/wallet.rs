//! Caller-facing wallet façade.
//!
//! Composes the UTXO tracker, input selector, transaction builder and node
//! transport behind the operations a wallet application needs. All methods
//! run on the caller's task; concurrent callers must serialize through one
//! wallet instance.

use std::time::{SystemTime, UNIX_EPOCH};

use rand_core::OsRng;
use tracing::info;

use crate::crypto::{Hash, KeyRing};
use crate::input_selection::{
    find_staking_prep_tx, has_precise_staking_outputs, pick_staking_inputs,
    select_transfer_inputs,
};
use crate::rpc::{NodeRpc, SendRawTransactionRequest};
use crate::sync::{StopFlag, SyncDriver, SyncEvents, SyncOptions, SyncState};
use crate::transaction_builder::{
    build_stake_preparation, build_staking_transaction, build_transfer, Destination,
    PendingTransaction,
};
use crate::wallet_state::{TransactionRecord, WalletOutput, WalletSnapshot, WalletState};
use crate::{WalletError, MIN_FEE};

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

pub struct Wallet<R: NodeRpc> {
    rpc: R,
    keys: KeyRing,
    state: WalletState,
    options: SyncOptions,
    status: SyncState,
    events: SyncEvents,
    stop: StopFlag,
}

impl<R: NodeRpc> Wallet<R> {
    pub fn new(rpc: R, keys: KeyRing, start_height: u64) -> Self {
        let state = WalletState::new(keys.public_keys(), start_height);
        Wallet {
            rpc,
            keys,
            state,
            options: SyncOptions::default(),
            status: SyncState::default(),
            events: SyncEvents::default(),
            stop: StopFlag::new(),
        }
    }

    /// Rebuilds a wallet from a previously exported snapshot.
    pub fn from_snapshot(rpc: R, keys: KeyRing, snapshot: WalletSnapshot) -> Self {
        let state = WalletState::restore(keys.public_keys(), snapshot);
        Wallet {
            rpc,
            keys,
            state,
            options: SyncOptions::default(),
            status: SyncState::default(),
            events: SyncEvents::default(),
            stop: StopFlag::new(),
        }
    }

    pub fn with_options(mut self, options: SyncOptions) -> Self {
        self.options = options;
        self
    }

    pub fn set_events(&mut self, events: SyncEvents) {
        self.events = events;
    }

    // ========================================================================
    // SYNC CONTROL
    // ========================================================================

    /// Runs the sync loop: batch pulls while behind the network, then
    /// polling. Returns when [`Wallet::stop_sync`] (or a stop handle) is
    /// triggered.
    pub async fn perform_sync(&mut self) -> Result<(), WalletError> {
        // A stop request from a previous run must not cancel this one.
        self.stop.clear();
        let mut driver = SyncDriver::new(
            &self.rpc,
            &mut self.state,
            &mut self.status,
            self.options.clone(),
            self.events.clone(),
            self.stop.clone(),
        );
        driver.run().await
    }

    /// Batch-syncs until the node reports the wallet caught up, without
    /// entering polling mode.
    pub async fn sync_once(&mut self) -> Result<bool, WalletError> {
        self.stop.clear();
        let mut driver = SyncDriver::new(
            &self.rpc,
            &mut self.state,
            &mut self.status,
            self.options.clone(),
            self.events.clone(),
            self.stop.clone(),
        );
        driver.catch_up().await
    }

    /// Requests cooperative cancellation of the running sync loop.
    pub fn stop_sync(&self) {
        self.stop.set();
    }

    /// A clonable handle another task can use to stop the sync loop.
    pub fn stop_handle(&self) -> StopFlag {
        self.stop.clone()
    }

    /// Discards all state from `height` upward and resumes scanning there.
    pub fn resync_from_height(&mut self, height: u64) {
        let height = height.max(1);
        info!(height, "resyncing from height");
        self.state.rollback_to(height);
        self.status.synced = false;
        self.status.current_height = self.state.current_height();
    }

    pub fn sync_state(&self) -> SyncState {
        let mut status = self.status.clone();
        status.current_height = self.state.current_height();
        status
    }

    // ========================================================================
    // QUERIES
    // ========================================================================

    pub fn current_height(&self) -> u64 {
        self.state.current_height()
    }

    pub fn get_available_outputs(&self) -> Vec<WalletOutput> {
        self.state.spendable_outputs(unix_now())
    }

    pub fn get_available_balance(&self) -> u64 {
        self.state.available_balance(unix_now())
    }

    pub fn get_locked_balance(&self) -> u64 {
        self.state.locked_balance(unix_now())
    }

    pub fn get_staking_locked_balance(&self) -> u64 {
        self.state.staking_locked_balance(unix_now())
    }

    pub fn get_transactions(&self, limit: usize) -> Vec<TransactionRecord> {
        self.state.transactions(limit)
    }

    pub fn has_precise_staking_outputs(&self, amount: u64, fee: u64) -> bool {
        has_precise_staking_outputs(&self.get_available_outputs(), amount, fee)
    }

    /// Exports the tracker state for external persistence.
    pub fn snapshot(&self) -> WalletSnapshot {
        self.state.snapshot()
    }

    // ========================================================================
    // TRANSFERS AND STAKING
    // ========================================================================

    /// Builds, signs and submits a transfer to the given destinations.
    /// Returns the transaction hash accepted by the node.
    pub async fn send_transfer(
        &mut self,
        destinations: &[Destination],
        fee: Option<u64>,
    ) -> Result<Hash, WalletError> {
        let fee = validate_fee(fee)?;
        let target: u64 = destinations
            .iter()
            .fold(0u64, |acc, d| acc.saturating_add(d.amount));

        let spendable = self.get_available_outputs();
        let selected = select_transfer_inputs(&spendable, target, fee)?;
        let pending = build_transfer(
            &mut OsRng,
            &self.keys,
            &selected.inputs,
            destinations,
            fee,
            selected.change,
            0,
        )?;
        self.submit(&pending).await
    }

    /// Step one of staking: a self-transfer producing the exact
    /// `[amount, staking_fee, change]` outputs the staking transaction will
    /// consume once they mature.
    pub async fn prepare_stake(
        &mut self,
        amount: u64,
        fee: Option<u64>,
    ) -> Result<Hash, WalletError> {
        let staking_fee = validate_fee(fee)?;
        let network_fee = MIN_FEE;
        let target = amount.checked_add(staking_fee).ok_or_else(|| {
            WalletError::InvalidArgument("stake amount overflow".to_string())
        })?;

        let spendable = self.get_available_outputs();
        let selected = select_transfer_inputs(&spendable, target, network_fee)?;
        let pending = build_stake_preparation(
            &mut OsRng,
            &self.keys,
            &selected.inputs,
            amount,
            staking_fee,
            network_fee,
            selected.change,
        )?;
        self.submit(&pending).await
    }

    /// Step two of staking: consumes the preparation pair and locks the
    /// stake for `lock_days`.
    pub async fn finalize_stake(
        &mut self,
        prep_tx_hash: Hash,
        amount: u64,
        lock_days: u32,
        fee: Option<u64>,
    ) -> Result<Hash, WalletError> {
        let fee = validate_fee(fee)?;
        let spendable = self.get_available_outputs();
        let [amount_input, fee_input] =
            pick_staking_inputs(&spendable, amount, fee, &prep_tx_hash)?;
        let pending = build_staking_transaction(
            &mut OsRng,
            &self.keys,
            &amount_input,
            &fee_input,
            amount,
            lock_days,
            self.state.current_height(),
        )?;
        self.submit(&pending).await
    }

    /// The preparation transaction `finalize_stake` would consume, if its
    /// outputs are already spendable.
    pub fn find_staking_prep_tx(&self, amount: u64, fee: Option<u64>) -> Option<Hash> {
        let fee = fee.unwrap_or(MIN_FEE);
        find_staking_prep_tx(&self.get_available_outputs(), amount, fee)
    }

    async fn submit(&mut self, pending: &PendingTransaction) -> Result<Hash, WalletError> {
        if self.stop.is_set() {
            return Err(WalletError::Stopped);
        }
        let request = SendRawTransactionRequest {
            tx_as_hex: pending.tx_hex(),
        };
        let response = self.rpc.send_raw_transaction(&request).await?;
        let status = response.status.as_deref().unwrap_or("");
        if status != "OK" {
            let reason = response
                .error
                .unwrap_or_else(|| format!("server status {}", status));
            return Err(WalletError::Rejected(reason));
        }
        info!(
            tx_hash = %hex::encode(pending.tx_hash),
            amount = pending.amount,
            fee = pending.fee,
            "transaction submitted"
        );
        Ok(pending.tx_hash)
    }
}

fn validate_fee(fee: Option<u64>) -> Result<u64, WalletError> {
    let fee = fee.unwrap_or(MIN_FEE);
    if fee < MIN_FEE {
        return Err(WalletError::InvalidArgument(format!(
            "fee {} below network minimum {}",
            fee, MIN_FEE
        )));
    }
    Ok(fee)
}
