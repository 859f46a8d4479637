//! Transaction assembly and signing: normal transfers plus the two-step
//! staking flow.
//!
//! Every signature is verified immediately after generation; a transaction
//! that fails its own self-check is never returned.

use rand_core::{CryptoRng, RngCore};
use zeroize::Zeroizing;

use crate::codec::{build_extra, staking_message, ExtraField, StakingRecord};
use crate::crypto::{self, Hash, KeyPair, KeyRing};
use crate::transaction::{Transaction, TransactionPrefix, TxInput, TxOutput, TX_VERSION};
use crate::wallet_state::{OutputId, WalletOutput};
use crate::{WalletError, BLOCK_TIME_SECONDS};

/// One payment target: a validated-on-use spend public key and an amount.
#[derive(Debug, Clone)]
pub struct Destination {
    pub key: [u8; 32],
    pub amount: u64,
}

/// A fully signed transaction plus the metadata the wallet needs to track
/// and submit it.
#[derive(Clone)]
pub struct PendingTransaction {
    pub tx: Transaction,
    pub tx_hash: Hash,
    pub prefix_hash: Hash,
    /// Sum paid to destinations, change excluded.
    pub amount: u64,
    pub fee: u64,
    pub change: u64,
    /// Identities of the consumed outputs, in input order.
    pub consumed: Vec<OutputId>,
    /// Ephemeral transaction secret key, kept for payment proofs.
    pub tx_secret_key: Zeroizing<[u8; 32]>,
}

impl PendingTransaction {
    pub fn tx_hex(&self) -> String {
        self.tx.to_hex()
    }
}

fn owner_keypair<'a>(keys: &'a KeyRing, output: &WalletOutput) -> Result<&'a KeyPair, WalletError> {
    keys.get(&output.owner_key).ok_or_else(|| {
        WalletError::InvalidArgument(format!(
            "input owner key {} not in key ring",
            hex::encode(output.owner_key)
        ))
    })
}

fn key_input(output: &WalletOutput) -> TxInput {
    TxInput::Key {
        amount: output.amount,
        output_indexes: vec![output.out_index],
        tx_hash: output.tx_hash,
        out_index: output.out_index,
    }
}

/// Signs `prefix` once per input with each input's owner key and self-checks
/// every signature against the prefix hash.
fn sign_inputs<R: RngCore + CryptoRng>(
    rng: &mut R,
    keys: &KeyRing,
    inputs: &[WalletOutput],
    prefix: &TransactionPrefix,
) -> Result<(Vec<crypto::Signature>, Hash), WalletError> {
    let prefix_hash = prefix.hash();
    let mut signatures = Vec::with_capacity(inputs.len());
    for input in inputs {
        let owner = owner_keypair(keys, input)?;
        let signature = crypto::sign(rng, &prefix_hash, owner);
        if !crypto::verify(&prefix_hash, &owner.public_bytes(), &signature) {
            return Err(WalletError::CryptoInvalidEncoding(
                "signature failed post-generation verification".to_string(),
            ));
        }
        signatures.push(signature);
    }
    Ok((signatures, prefix_hash))
}

/// Builds and signs a normal transfer.
///
/// Outputs are emitted in destination order; when `change` is positive a
/// final change output returns to the primary key. The caller supplies the
/// selector's result and must ensure inputs cover destinations + fee +
/// change exactly.
pub fn build_transfer<R: RngCore + CryptoRng>(
    rng: &mut R,
    keys: &KeyRing,
    inputs: &[WalletOutput],
    destinations: &[Destination],
    fee: u64,
    change: u64,
    unlock_time: u64,
) -> Result<PendingTransaction, WalletError> {
    if inputs.is_empty() {
        return Err(WalletError::InvalidArgument("no inputs".to_string()));
    }
    if destinations.is_empty() {
        return Err(WalletError::InvalidArgument("no destinations".to_string()));
    }

    let mut amount = 0u64;
    for destination in destinations {
        if destination.amount == 0 {
            return Err(WalletError::InvalidArgument("cannot send zero".to_string()));
        }
        // Destination keys must be canonical curve points before they are
        // committed to the chain.
        crypto::decode_point(&destination.key)?;
        amount = amount.saturating_add(destination.amount);
    }

    let input_total: u64 = inputs.iter().fold(0, |acc, o| acc.saturating_add(o.amount));
    let spent_total = amount
        .checked_add(fee)
        .and_then(|v| v.checked_add(change))
        .ok_or_else(|| WalletError::InvalidArgument("amount overflow".to_string()))?;
    if input_total != spent_total {
        return Err(WalletError::InvalidArgument(format!(
            "inputs {} do not balance outputs {} + fee {}",
            input_total,
            amount.saturating_add(change),
            fee
        )));
    }

    let tx_keys = KeyPair::generate(rng);
    let extra = build_extra(&[ExtraField::TxPubKey(tx_keys.public_bytes())]);

    let mut outputs: Vec<TxOutput> = destinations
        .iter()
        .map(|d| TxOutput::Key {
            amount: d.amount,
            key: d.key,
        })
        .collect();
    if change > 0 {
        outputs.push(TxOutput::Key {
            amount: change,
            key: keys.primary().public_bytes(),
        });
    }

    let prefix = TransactionPrefix {
        version: TX_VERSION,
        unlock_time,
        inputs: inputs.iter().map(key_input).collect(),
        outputs,
        extra,
    };

    let (signatures, prefix_hash) = sign_inputs(rng, keys, inputs, &prefix)?;
    let tx = Transaction { prefix, signatures };

    Ok(PendingTransaction {
        tx_hash: tx.hash(),
        prefix_hash,
        amount,
        fee,
        change,
        consumed: inputs.iter().map(WalletOutput::id).collect(),
        tx_secret_key: Zeroizing::new(tx_keys.secret().to_bytes()),
        tx,
    })
}

/// Builds the staking preparation transaction: a self-transfer emitting
/// `[stake_amount, staking_fee, change]` so the later staking transaction
/// finds its two exact inputs in one place.
pub fn build_stake_preparation<R: RngCore + CryptoRng>(
    rng: &mut R,
    keys: &KeyRing,
    inputs: &[WalletOutput],
    stake_amount: u64,
    staking_fee: u64,
    network_fee: u64,
    change: u64,
) -> Result<PendingTransaction, WalletError> {
    let own_key = keys.primary().public_bytes();
    let destinations = [
        Destination {
            key: own_key,
            amount: stake_amount,
        },
        Destination {
            key: own_key,
            amount: staking_fee,
        },
    ];
    build_transfer(rng, keys, inputs, &destinations, network_fee, change, 0)
}

/// Converts a lock duration in days into the unlock height written into a
/// staking transaction.
pub fn staking_unlock_height(current_height: u64, lock_days: u32) -> u64 {
    current_height + (lock_days as u64 * 86_400) / BLOCK_TIME_SECONDS
}

/// Builds and signs the staking transaction consuming the preparation pair.
///
/// Exactly two inputs (`[amount_input, fee_input]`), exactly one output of
/// `stake_amount` back to the staker, an unlock height derived from
/// `lock_days`, and an extra field carrying the tx pubkey plus the signed
/// staking record.
pub fn build_staking_transaction<R: RngCore + CryptoRng>(
    rng: &mut R,
    keys: &KeyRing,
    amount_input: &WalletOutput,
    fee_input: &WalletOutput,
    stake_amount: u64,
    lock_days: u32,
    current_height: u64,
) -> Result<PendingTransaction, WalletError> {
    if amount_input.amount != stake_amount {
        return Err(WalletError::InvalidArgument(format!(
            "stake input amount {} != stake amount {}",
            amount_input.amount, stake_amount
        )));
    }
    if amount_input.tx_hash != fee_input.tx_hash {
        return Err(WalletError::InvalidArgument(
            "staking inputs must come from one preparation transaction".to_string(),
        ));
    }
    if amount_input.id() == fee_input.id() {
        return Err(WalletError::InvalidArgument(
            "staking inputs must be distinct outputs".to_string(),
        ));
    }

    let staker = owner_keypair(keys, amount_input)?;
    let unlock_time = staking_unlock_height(current_height, lock_days);

    // Inner commitment over the fixed-width form of (amount, days, unlock).
    let message = staking_message(stake_amount, lock_days, unlock_time);
    let inner_signature = crypto::sign(rng, &message, staker);
    if !crypto::verify(&message, &staker.public_bytes(), &inner_signature) {
        return Err(WalletError::CryptoInvalidEncoding(
            "staking signature failed post-generation verification".to_string(),
        ));
    }

    let tx_keys = KeyPair::generate(rng);
    let extra = build_extra(&[
        ExtraField::TxPubKey(tx_keys.public_bytes()),
        ExtraField::Staking(StakingRecord {
            amount: stake_amount,
            unlock_time,
            lock_days,
            signature: inner_signature,
        }),
    ]);

    let inputs = [amount_input.clone(), fee_input.clone()];
    let prefix = TransactionPrefix {
        version: TX_VERSION,
        unlock_time,
        inputs: inputs.iter().map(key_input).collect(),
        outputs: vec![TxOutput::Key {
            amount: stake_amount,
            key: staker.public_bytes(),
        }],
        extra,
    };

    let (signatures, prefix_hash) = sign_inputs(rng, keys, &inputs, &prefix)?;
    let tx = Transaction { prefix, signatures };

    Ok(PendingTransaction {
        tx_hash: tx.hash(),
        prefix_hash,
        amount: stake_amount,
        fee: fee_input.amount,
        change: 0,
        consumed: inputs.iter().map(WalletOutput::id).collect(),
        tx_secret_key: Zeroizing::new(tx_keys.secret().to_bytes()),
        tx,
    })
}
