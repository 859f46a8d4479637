//! Light client core for the Claro network, a transparent CryptoNote-derived
//! currency with on-chain staking.
//!
//! The crate scans raw block data for outputs owned by a set of spend keys,
//! maintains the resulting UTXO set through maturity, unlock and reorg rules,
//! and builds, signs and submits binary transactions — including the two-step
//! staking flow. Address derivation, mnemonics and persistent storage live
//! outside this crate; keys enter as 32-byte values and state leaves as a
//! serializable snapshot.

pub mod codec;
pub mod crypto;
pub mod input_selection;
pub mod mock_rpc;
pub mod rpc;
pub mod sync;
pub mod transaction;
pub mod transaction_builder;
pub mod wallet;
pub mod wallet_state;

pub use crypto::{Hash, KeyPair, KeyRing, Signature};
pub use transaction::{Transaction, TransactionPrefix, TxInput, TxOutput};
pub use transaction_builder::{Destination, PendingTransaction};
pub use wallet::Wallet;
pub use wallet_state::{BlockData, WalletOutput, WalletSnapshot, WalletSpend, WalletState};

use thiserror::Error;

/// Atomic units per whole coin.
pub const ATOMIC_UNITS_PER_COIN: u64 = 100_000_000;

/// Depth below the tip at which an output becomes eligible for spend.
pub const MATURITY_BLOCKS: u64 = 10;

/// Unlock times below this value are block heights, above it Unix timestamps.
pub const UNLOCK_TIME_HEIGHT_THRESHOLD: u64 = 500_000_000;

/// Network target block interval, used to convert lock days into heights.
pub const BLOCK_TIME_SECONDS: u64 = 30;

/// Minimum network fee in atomic units.
pub const MIN_FEE: u64 = 1_000;

#[derive(Debug, Error)]
pub enum WalletError {
    #[error("invalid cryptographic encoding: {0}")]
    CryptoInvalidEncoding(String),

    #[error("malformed binary data: {0}")]
    CodecInvalid(String),

    #[error("node transport error: {0}")]
    Transport(String),

    #[error("insufficient funds: need {required} atomic units, have {available}")]
    InsufficientFunds { required: u64, available: u64 },

    #[error("no unspent output pair of exactly {amount} and {fee} atomic units from one preparation transaction")]
    NoPreciseStakingOutputs { amount: u64, fee: u64 },

    #[error("transaction rejected by node: {0}")]
    Rejected(String),

    #[error("operation aborted by stop request")]
    Stopped,

    #[error("invalid argument: {0}")]
    InvalidArgument(String),
}

/// Formats an atomic-unit amount as a decimal coin string, e.g. `12.00003400`.
pub fn format_amount(atomic: u64) -> String {
    let whole = atomic / ATOMIC_UNITS_PER_COIN;
    let frac = atomic % ATOMIC_UNITS_PER_COIN;
    format!("{}.{:08}", whole, frac)
}

/// Parses a decimal coin string back into atomic units.
///
/// Accepts up to eight fractional digits. Returns `None` on malformed input
/// or overflow.
pub fn parse_amount(s: &str) -> Option<u64> {
    let (whole, frac) = match s.split_once('.') {
        Some((w, f)) => (w, f),
        None => (s, ""),
    };
    if whole.is_empty() && frac.is_empty() {
        return None;
    }
    if frac.len() > 8 || !frac.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    let whole: u64 = if whole.is_empty() {
        0
    } else {
        whole.parse().ok()?
    };
    let mut frac_units: u64 = if frac.is_empty() { 0 } else { frac.parse().ok()? };
    for _ in frac.len()..8 {
        frac_units = frac_units.checked_mul(10)?;
    }
    whole
        .checked_mul(ATOMIC_UNITS_PER_COIN)?
        .checked_add(frac_units)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_amount() {
        assert_eq!(format_amount(0), "0.00000000");
        assert_eq!(format_amount(1), "0.00000001");
        assert_eq!(format_amount(ATOMIC_UNITS_PER_COIN), "1.00000000");
        assert_eq!(format_amount(1_200_003_400), "12.00003400");
    }

    #[test]
    fn test_parse_amount() {
        assert_eq!(parse_amount("0"), Some(0));
        assert_eq!(parse_amount("1"), Some(ATOMIC_UNITS_PER_COIN));
        assert_eq!(parse_amount("0.00000001"), Some(1));
        assert_eq!(parse_amount("12.000034"), Some(1_200_003_400));
        assert_eq!(parse_amount("1.123456789"), None);
        assert_eq!(parse_amount(""), None);
        assert_eq!(parse_amount("."), None);
        assert_eq!(parse_amount("x.y"), None);
    }

    #[test]
    fn test_parse_format_roundtrip() {
        for atomic in [0u64, 1, 999, ATOMIC_UNITS_PER_COIN, 5_000_000_000] {
            assert_eq!(parse_amount(&format_amount(atomic)), Some(atomic));
        }
    }
}
