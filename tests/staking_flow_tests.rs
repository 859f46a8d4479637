//! End-to-end two-step staking: preparation transfer, maturity, staking
//! transaction, and the tracker's view of the resulting locked output.


use claro_wallet::codec::staking_message;
use claro_wallet::crypto;
use claro_wallet::rpc::WireBlock;
use claro_wallet::transaction::{Transaction, TxInput};
use claro_wallet::{WalletError, BLOCK_TIME_SECONDS, MIN_FEE};
use test_helpers::*;

const STAKE: u64 = 5_000_000_000;
const FUNDING: u64 = 10_000_000_000;

/// Sync the wallet over the given blocks and mark it caught up.
async fn ingest(
    wallet: &mut claro_wallet::Wallet<claro_wallet::mock_rpc::MockRpc>,
    rpc: &claro_wallet::mock_rpc::MockRpc,
    blocks: Vec<WireBlock>,
) {
    let top = blocks.last().map(|b| b.height).unwrap_or(1);
    rpc.push_sync_batch(batch(blocks));
    rpc.push_sync_batch(synced_response(top, 0xFE));
    wallet.sync_once().await.unwrap();
}

#[tokio::test]
async fn test_full_staking_flow() {
    let (mut wallet, rpc, keys) = test_wallet(1);
    let own_hex = hex::encode(keys.primary().public_bytes());

    // Fund the wallet with one 100-coin output and let it mature.
    let mut blocks = vec![wire_block(
        1,
        1,
        vec![wire_tx(0x01, vec![(own_hex.clone(), FUNDING)])],
    )];
    blocks.extend(empty_blocks(2, 11));
    ingest(&mut wallet, &rpc, blocks).await;
    assert_eq!(wallet.get_available_balance(), FUNDING);

    // Step one: preparation self-transfer.
    let prep_hash = wallet.prepare_stake(STAKE, None).await.unwrap();
    let submitted = rpc.sent_transactions();
    assert_eq!(submitted.len(), 1);
    let prep_tx = Transaction::from_hex(&submitted[0]).unwrap();
    assert_eq!(prep_tx.hash(), prep_hash);

    // Exact output ladder: stake, staking fee, change. The preparation pays
    // its own network fee on top.
    let amounts: Vec<u64> = prep_tx.prefix.outputs.iter().map(|o| o.amount()).collect();
    let change = FUNDING - STAKE - MIN_FEE - MIN_FEE;
    assert_eq!(amounts, vec![STAKE, MIN_FEE, change]);
    let own = keys.primary().public_bytes();
    assert!(prep_tx.prefix.outputs.iter().all(|o| o.key() == &own));

    // The preparation is confirmed at height 12 and matures by height 22.
    let mut blocks = vec![wire_block(12, 12, vec![wire_from_tx(&prep_tx)])];
    blocks.extend(empty_blocks(13, 22));
    ingest(&mut wallet, &rpc, blocks).await;

    // Funding output spent, three prep outputs spendable.
    assert_eq!(wallet.get_available_balance(), FUNDING - MIN_FEE);
    assert!(wallet.has_precise_staking_outputs(STAKE, MIN_FEE));
    assert_eq!(wallet.find_staking_prep_tx(STAKE, None), Some(prep_hash));

    // Step two: the staking transaction itself.
    let stake_hash = wallet
        .finalize_stake(prep_hash, STAKE, 30, None)
        .await
        .unwrap();
    let submitted = rpc.sent_transactions();
    assert_eq!(submitted.len(), 2);
    let stake_tx = Transaction::from_hex(&submitted[1]).unwrap();
    assert_eq!(stake_tx.hash(), stake_hash);

    // Exactly the preparation pair, in [amount, fee] order.
    assert_eq!(stake_tx.prefix.inputs.len(), 2);
    match &stake_tx.prefix.inputs[0] {
        TxInput::Key {
            amount,
            tx_hash,
            out_index,
            ..
        } => {
            assert_eq!(*amount, STAKE);
            assert_eq!(*tx_hash, prep_hash);
            assert_eq!(*out_index, 0);
        }
        other => panic!("unexpected input {:?}", other),
    }
    match &stake_tx.prefix.inputs[1] {
        TxInput::Key {
            amount, out_index, ..
        } => {
            assert_eq!(*amount, MIN_FEE);
            assert_eq!(*out_index, 1);
        }
        other => panic!("unexpected input {:?}", other),
    }

    // One output returning the stake, locked until the derived height.
    assert_eq!(stake_tx.prefix.outputs.len(), 1);
    assert_eq!(stake_tx.prefix.outputs[0].amount(), STAKE);
    let expected_unlock = 22 + 30 * 86_400 / BLOCK_TIME_SECONDS;
    assert_eq!(stake_tx.prefix.unlock_time, expected_unlock);

    // The inner staking signature commits to the fixed-width message.
    let record = stake_tx.prefix.staking_record().unwrap();
    assert_eq!(record.amount, STAKE);
    assert_eq!(record.lock_days, 30);
    assert_eq!(record.unlock_time, expected_unlock);
    assert!(crypto::verify(
        &staking_message(STAKE, 30, expected_unlock),
        &keys.primary().public_bytes(),
        &record.signature
    ));

    // Every outer signature verifies against the re-serialized prefix hash.
    let prefix_hash = stake_tx.prefix.hash();
    for signature in &stake_tx.signatures {
        assert!(crypto::verify(
            &prefix_hash,
            &keys.primary().public_bytes(),
            signature
        ));
    }

    // The staking transaction confirms inside the stakingTX array.
    let mut confirm = wire_block(23, 23, vec![]);
    confirm.staking_transactions.push(wire_from_tx(&stake_tx));
    let mut blocks = vec![confirm];
    blocks.extend(empty_blocks(24, 33));
    ingest(&mut wallet, &rpc, blocks).await;

    // Stake and fee outputs consumed; the returned stake sits locked.
    assert_eq!(wallet.get_staking_locked_balance(), STAKE);
    assert_eq!(wallet.get_available_balance(), change);

    let records = wallet.get_transactions(10);
    let stake_record = records
        .iter()
        .find(|r| r.tx_hash == stake_hash)
        .expect("staking tx in history");
    assert_eq!(
        stake_record.kind,
        claro_wallet::wallet_state::TransactionKind::Staking
    );
}

#[tokio::test]
async fn test_finalize_without_preparation_fails() {
    let (mut wallet, rpc, keys) = test_wallet(1);
    let own_hex = hex::encode(keys.primary().public_bytes());

    // A mature output of the right total, but no exact pair.
    let mut blocks = vec![wire_block(
        1,
        1,
        vec![wire_tx(0x01, vec![(own_hex, FUNDING)])],
    )];
    blocks.extend(empty_blocks(2, 11));
    ingest(&mut wallet, &rpc, blocks).await;

    assert!(!wallet.has_precise_staking_outputs(STAKE, MIN_FEE));
    let err = wallet
        .finalize_stake([0x01; 32], STAKE, 30, None)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        WalletError::NoPreciseStakingOutputs {
            amount: STAKE,
            fee: MIN_FEE,
        }
    ));
}

#[tokio::test]
async fn test_immature_preparation_is_not_pickable() {
    let (mut wallet, rpc, keys) = test_wallet(1);
    let own_hex = hex::encode(keys.primary().public_bytes());

    let mut blocks = vec![wire_block(
        1,
        1,
        vec![wire_tx(0x01, vec![(own_hex.clone(), FUNDING)])],
    )];
    blocks.extend(empty_blocks(2, 11));
    ingest(&mut wallet, &rpc, blocks).await;

    let prep_hash = wallet.prepare_stake(STAKE, None).await.unwrap();
    let prep_tx = Transaction::from_hex(&rpc.sent_transactions()[0]).unwrap();

    // Confirmed but only 5 blocks deep: not yet mature.
    let mut blocks = vec![wire_block(12, 12, vec![wire_from_tx(&prep_tx)])];
    blocks.extend(empty_blocks(13, 16));
    ingest(&mut wallet, &rpc, blocks).await;

    assert!(!wallet.has_precise_staking_outputs(STAKE, MIN_FEE));
    assert!(wallet
        .finalize_stake(prep_hash, STAKE, 30, None)
        .await
        .is_err());
}
