//! Input selection for transfers and staking.
//!
//! Transfers pick spendable outputs greedy largest-first until the target
//! plus fee is covered. Staking consumes exactly two outputs of exact value
//! (stake amount and staking fee) that came from one preparation
//! transaction.

use crate::crypto::Hash;
use crate::wallet_state::WalletOutput;
use crate::WalletError;

#[derive(Debug, Clone)]
pub struct SelectedInputs {
    pub inputs: Vec<WalletOutput>,
    pub total: u64,
    /// `total - target - fee`; emitted back to the sender when positive.
    pub change: u64,
}

/// Orders candidates largest-amount-first with a deterministic tie-break on
/// (height, tx hash, output index), favoring older outputs among equals.
fn selection_order(a: &WalletOutput, b: &WalletOutput) -> std::cmp::Ordering {
    b.amount
        .cmp(&a.amount)
        .then(a.block_height.cmp(&b.block_height))
        .then(a.tx_hash.cmp(&b.tx_hash))
        .then(a.out_index.cmp(&b.out_index))
}

/// Picks inputs covering `target + fee` from the spendable set.
pub fn select_transfer_inputs(
    spendable: &[WalletOutput],
    target: u64,
    fee: u64,
) -> Result<SelectedInputs, WalletError> {
    let required = target
        .checked_add(fee)
        .ok_or_else(|| WalletError::InvalidArgument("amount overflow".to_string()))?;

    let mut candidates: Vec<&WalletOutput> = spendable.iter().collect();
    candidates.sort_by(|a, b| selection_order(a, b));

    let mut inputs = Vec::new();
    let mut total = 0u64;
    for output in candidates {
        inputs.push(output.clone());
        total = total.saturating_add(output.amount);
        if total >= required {
            return Ok(SelectedInputs {
                inputs,
                total,
                change: total - required,
            });
        }
    }

    Err(WalletError::InsufficientFunds {
        required,
        available: total,
    })
}

/// Whether any single preparation transaction contributed an unspent
/// spendable output of exactly `stake_amount` and a distinct one of exactly
/// `fee`.
pub fn has_precise_staking_outputs(spendable: &[WalletOutput], stake_amount: u64, fee: u64) -> bool {
    find_staking_prep_tx(spendable, stake_amount, fee).is_some()
}

/// The preparation transaction hash usable for `pick_staking_inputs`, if one
/// exists.
pub fn find_staking_prep_tx(
    spendable: &[WalletOutput],
    stake_amount: u64,
    fee: u64,
) -> Option<Hash> {
    let mut tx_hashes: Vec<Hash> = spendable.iter().map(|o| o.tx_hash).collect();
    tx_hashes.sort();
    tx_hashes.dedup();
    tx_hashes
        .into_iter()
        .find(|hash| pick_from_tx(spendable, stake_amount, fee, hash).is_some())
}

/// Returns the staking input pair `[amount_input, fee_input]` from the given
/// preparation transaction, in that fixed order.
pub fn pick_staking_inputs(
    spendable: &[WalletOutput],
    stake_amount: u64,
    fee: u64,
    prep_tx_hash: &Hash,
) -> Result<[WalletOutput; 2], WalletError> {
    pick_from_tx(spendable, stake_amount, fee, prep_tx_hash).ok_or(
        WalletError::NoPreciseStakingOutputs {
            amount: stake_amount,
            fee,
        },
    )
}

fn pick_from_tx(
    spendable: &[WalletOutput],
    stake_amount: u64,
    fee: u64,
    prep_tx_hash: &Hash,
) -> Option<[WalletOutput; 2]> {
    let mut from_tx: Vec<&WalletOutput> = spendable
        .iter()
        .filter(|o| o.tx_hash == *prep_tx_hash)
        .collect();
    from_tx.sort_by_key(|o| o.out_index);

    let amount_input = from_tx.iter().find(|o| o.amount == stake_amount)?;
    let fee_input = from_tx
        .iter()
        .find(|o| o.amount == fee && o.out_index != amount_input.out_index)?;
    Some([(*amount_input).clone(), (*fee_input).clone()])
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_output(amount: u64, height: u64, tx_byte: u8, out_index: u32) -> WalletOutput {
        WalletOutput {
            owner_key: [0x0A; 32],
            amount,
            block_height: height,
            block_timestamp: 1_700_000_000 + height,
            tx_hash: [tx_byte; 32],
            out_index,
            global_output_index: None,
            unlock_time: 0,
            tx_pubkey: None,
            is_coinbase: false,
            is_staking_origin: false,
            spent_at_height: None,
        }
    }

    #[test]
    fn test_selects_largest_first() {
        let spendable = vec![
            make_output(1_000_000, 50, 1, 0),
            make_output(3_000_000, 60, 2, 0),
            make_output(2_000_000, 70, 3, 0),
        ];

        let selected = select_transfer_inputs(&spendable, 2_500_000, 1_000).unwrap();
        assert_eq!(selected.inputs.len(), 1);
        assert_eq!(selected.inputs[0].amount, 3_000_000);
        assert_eq!(selected.change, 3_000_000 - 2_500_000 - 1_000);
    }

    #[test]
    fn test_accumulates_until_covered() {
        let spendable = vec![
            make_output(1_000, 50, 1, 0),
            make_output(900, 60, 2, 0),
            make_output(800, 70, 3, 0),
        ];

        let selected = select_transfer_inputs(&spendable, 1_800, 0).unwrap();
        assert_eq!(selected.inputs.len(), 2);
        assert_eq!(selected.total, 1_900);
        assert_eq!(selected.change, 100);
    }

    #[test]
    fn test_insufficient_funds() {
        let spendable = vec![make_output(1_000_000, 50, 1, 0)];
        let err = select_transfer_inputs(&spendable, 2_000_000, 500).unwrap_err();
        assert!(matches!(
            err,
            WalletError::InsufficientFunds {
                required: 2_000_500,
                available: 1_000_000,
            }
        ));
    }

    #[test]
    fn test_empty_set_is_insufficient() {
        let err = select_transfer_inputs(&[], 1, 0).unwrap_err();
        assert!(matches!(
            err,
            WalletError::InsufficientFunds {
                required: 1,
                available: 0
            }
        ));
    }

    #[test]
    fn test_tie_break_is_deterministic() {
        let a = make_output(5_000, 10, 7, 0);
        let b = make_output(5_000, 10, 3, 1);
        let forward = select_transfer_inputs(&[a.clone(), b.clone()], 4_000, 0).unwrap();
        let reversed = select_transfer_inputs(&[b, a], 4_000, 0).unwrap();
        assert_eq!(forward.inputs[0].tx_hash, reversed.inputs[0].tx_hash);
        // Equal amount and height: lower tx hash wins.
        assert_eq!(forward.inputs[0].tx_hash, [3; 32]);
    }

    #[test]
    fn test_exact_cover_has_no_change() {
        let spendable = vec![make_output(10_000, 50, 1, 0)];
        let selected = select_transfer_inputs(&spendable, 9_000, 1_000).unwrap();
        assert_eq!(selected.change, 0);
    }

    #[test]
    fn test_staking_pair_from_same_tx() {
        let spendable = vec![
            make_output(5_000_000_000, 50, 9, 0),
            make_output(1_000, 50, 9, 1),
            make_output(4_999_997_000, 50, 9, 2),
        ];

        assert!(has_precise_staking_outputs(&spendable, 5_000_000_000, 1_000));
        let picked =
            pick_staking_inputs(&spendable, 5_000_000_000, 1_000, &[9; 32]).unwrap();
        assert_eq!(picked[0].amount, 5_000_000_000);
        assert_eq!(picked[0].out_index, 0);
        assert_eq!(picked[1].amount, 1_000);
        assert_eq!(picked[1].out_index, 1);
    }

    #[test]
    fn test_staking_pair_must_share_tx() {
        let spendable = vec![
            make_output(5_000_000_000, 50, 1, 0),
            make_output(1_000, 60, 2, 0),
        ];
        assert!(!has_precise_staking_outputs(&spendable, 5_000_000_000, 1_000));
        assert!(matches!(
            pick_staking_inputs(&spendable, 5_000_000_000, 1_000, &[1; 32]),
            Err(WalletError::NoPreciseStakingOutputs { .. })
        ));
    }

    #[test]
    fn test_staking_pair_requires_distinct_outputs() {
        // Stake amount equal to the fee still needs two separate outputs.
        let one = vec![make_output(1_000, 50, 4, 0)];
        assert!(!has_precise_staking_outputs(&one, 1_000, 1_000));

        let two = vec![make_output(1_000, 50, 4, 0), make_output(1_000, 50, 4, 1)];
        let picked = pick_staking_inputs(&two, 1_000, 1_000, &[4; 32]).unwrap();
        assert_ne!(picked[0].out_index, picked[1].out_index);
    }

    #[test]
    fn test_find_staking_prep_tx() {
        let spendable = vec![
            make_output(42, 50, 1, 0),
            make_output(5_000, 55, 6, 0),
            make_output(100, 55, 6, 1),
        ];
        assert_eq!(find_staking_prep_tx(&spendable, 5_000, 100), Some([6; 32]));
        assert_eq!(find_staking_prep_tx(&spendable, 5_000, 42), None);
    }
}
