//! Integration tests for the built-in actions.
//!
//! Each test evaluates real signed transactions through the protocol's
//! evaluator against a two-shard router over in-memory stores, so balance
//! and admin slots land wherever their derived addresses route them.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, TimeZone, Utc};

use strata_actions::{
    addresses, default_registry, AdminState, BlockReward, FungibleAmount, PatchTableSheet,
    RenewAdminState, TransferAsset,
};
use strata_protocol::action::{Action, ActionEnvelope, ActionError};
use strata_protocol::address::Address;
use strata_protocol::crypto::Keypair;
use strata_protocol::evaluator::{ActionEvaluator, BlockContext, StateDelta, TxOutcome};
use strata_protocol::router::{RetryPolicy, StateRouter};
use strata_protocol::shard::{
    Keyspace, MemoryShardStore, RangeTable, ShardDescriptor, ShardId, ShardStore,
};
use strata_protocol::transaction::Transaction;
use strata_protocol::value::Value;

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn ts() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 8, 1, 12, 0, 0).unwrap()
}

/// Evaluator over two memory shards seeded with `entries`.
fn setup(entries: Vec<(Address, Value)>) -> ActionEvaluator {
    let table = RangeTable::new(
        vec![
            ShardDescriptor::local(0, 0, 128),
            ShardDescriptor::local(1, 128, 256),
        ],
        Keyspace::default(),
    )
    .unwrap();
    let (low, high): (Vec<_>, Vec<_>) = entries
        .into_iter()
        .partition(|(address, _)| address.as_bytes()[0] < 128);
    let mut stores: HashMap<ShardId, Arc<dyn ShardStore>> = HashMap::new();
    stores.insert(ShardId(0), Arc::new(MemoryShardStore::with_entries(low)));
    stores.insert(ShardId(1), Arc::new(MemoryShardStore::with_entries(high)));
    let router = StateRouter::new(table, stores, 32, RetryPolicy::default()).unwrap();
    ActionEvaluator::new(Arc::new(default_registry()), Arc::new(router))
}

fn block(index: u64, miner: Address) -> BlockContext {
    BlockContext {
        index,
        miner,
        timestamp: ts(),
    }
}

fn balance(owner: &Address, amount: u64) -> (Address, Value) {
    (addresses::balance(owner, "STR"), Value::from(amount))
}

async fn run(
    evaluator: &ActionEvaluator,
    index: u64,
    signer: &Keypair,
    actions: Vec<ActionEnvelope>,
) -> TxOutcome {
    let tx = Transaction::create(0, signer, None, ts(), actions).unwrap();
    evaluator
        .evaluate_transaction(&block(index, Address::ZERO), &tx, &StateDelta::new())
        .await
        .unwrap()
}

fn fault_message(outcome: &TxOutcome) -> String {
    match &outcome.fault {
        Some(fault) => match &fault.error {
            ActionError::Execution(message) => message.clone(),
            other => panic!("unexpected fault: {other}"),
        },
        None => panic!("transaction did not fault"),
    }
}

// ---------------------------------------------------------------------------
// TransferAsset
// ---------------------------------------------------------------------------

#[tokio::test]
async fn transfer_moves_balance() {
    let alice = Keypair::from_seed(&[1; 32]);
    let bob = Address::new([0xb0; 20]);
    let evaluator = setup(vec![balance(&alice.address(), 100), balance(&bob, 5)]);

    let action = TransferAsset::new(alice.address(), bob, FungibleAmount::native(30));
    let outcome = run(&evaluator, 1, &alice, vec![action.envelope()]).await;

    assert!(outcome.is_committed());
    let from = addresses::balance(&alice.address(), "STR");
    let to = addresses::balance(&bob, "STR");
    assert_eq!(outcome.delta.get(&from), Some(&Value::from(70u64)));
    assert_eq!(outcome.delta.get(&to), Some(&Value::from(35u64)));
}

#[tokio::test]
async fn chained_transfers_see_each_other() {
    let alice = Keypair::from_seed(&[2; 32]);
    let bob = Address::new([0x11; 20]);
    let evaluator = setup(vec![balance(&alice.address(), 10)]);

    let send = |n: u64| TransferAsset::new(alice.address(), bob, FungibleAmount::native(n)).envelope();
    let outcome = run(&evaluator, 1, &alice, vec![send(6), send(4)]).await;
    assert!(outcome.is_committed());
    assert_eq!(
        outcome.delta.get(&addresses::balance(&alice.address(), "STR")),
        Some(&Value::from(0u64))
    );

    // A third transfer would overdraw, so the whole transaction goes.
    let outcome = run(&evaluator, 1, &alice, vec![send(6), send(4), send(1)]).await;
    assert!(!outcome.is_committed());
    assert!(outcome.delta.is_empty());
    assert!(fault_message(&outcome).contains("insufficient balance"));
    assert_eq!(outcome.fault.as_ref().map(|f| f.index), Some(2));
}

#[tokio::test]
async fn transfer_from_someone_else_faults() {
    let alice = Keypair::from_seed(&[3; 32]);
    let mallory = Keypair::from_seed(&[4; 32]);
    let evaluator = setup(vec![balance(&alice.address(), 100)]);

    let theft = TransferAsset::new(alice.address(), mallory.address(), FungibleAmount::native(1));
    let outcome = run(&evaluator, 1, &mallory, vec![theft.envelope()]).await;
    assert!(fault_message(&outcome).contains("is not the signer"));
}

#[tokio::test]
async fn transfer_to_self_faults() {
    let alice = Keypair::from_seed(&[5; 32]);
    let evaluator = setup(vec![balance(&alice.address(), 100)]);

    let loop_back = TransferAsset::new(alice.address(), alice.address(), FungibleAmount::native(1));
    let outcome = run(&evaluator, 1, &alice, vec![loop_back.envelope()]).await;
    assert!(fault_message(&outcome).contains("sender and recipient"));
}

// ---------------------------------------------------------------------------
// Admin-gated actions
// ---------------------------------------------------------------------------

#[tokio::test]
async fn patch_table_without_admin_state_is_open() {
    let anyone = Keypair::from_seed(&[6; 32]);
    let evaluator = setup(vec![]);

    let patch = PatchTableSheet::new("WorldSheet", "id\n1\n");
    let outcome = run(&evaluator, 1, &anyone, vec![patch.envelope()]).await;
    assert!(outcome.is_committed());
    assert_eq!(
        outcome.delta.get(&addresses::table_sheet("WorldSheet")),
        Some(&Value::from("id\n1\n"))
    );
}

#[tokio::test]
async fn patch_table_is_gated_by_admin_state() {
    let admin = Keypair::from_seed(&[7; 32]);
    let other = Keypair::from_seed(&[8; 32]);
    let state = AdminState::new(admin.address(), 100);
    let evaluator = setup(vec![(addresses::admin_state(), state.to_value())]);
    let patch = PatchTableSheet::new("ItemSheet", "id\n");

    let denied = run(&evaluator, 10, &other, vec![patch.envelope()]).await;
    assert!(fault_message(&denied).contains("is not the admin"));

    let allowed = run(&evaluator, 100, &admin, vec![patch.envelope()]).await;
    assert!(allowed.is_committed());

    let expired = run(&evaluator, 101, &admin, vec![patch.envelope()]).await;
    assert!(fault_message(&expired).contains("expired at block 100"));
}

#[tokio::test]
async fn renew_extends_an_expired_admin() {
    let admin = Keypair::from_seed(&[9; 32]);
    let other = Keypair::from_seed(&[10; 32]);
    let state = AdminState::new(admin.address(), 5);
    let evaluator = setup(vec![(addresses::admin_state(), state.to_value())]);

    let renew = RenewAdminState::new(500).envelope();
    let denied = run(&evaluator, 50, &other, vec![renew.clone()]).await;
    assert!(fault_message(&denied).contains("is not the admin"));

    // Renewal and a patch in the same transaction: the patch sees the
    // renewed state.
    let patch = PatchTableSheet::new("SkillSheet", "id\n").envelope();
    let outcome = run(&evaluator, 50, &admin, vec![renew, patch]).await;
    assert!(outcome.is_committed());
    let renewed = outcome.delta.get(&addresses::admin_state()).unwrap();
    assert_eq!(AdminState::from_value(renewed).unwrap().valid_until, 500);
}

#[tokio::test]
async fn renew_without_admin_state_faults() {
    let anyone = Keypair::from_seed(&[11; 32]);
    let evaluator = setup(vec![]);
    let outcome = run(&evaluator, 1, &anyone, vec![RenewAdminState::new(9).envelope()]).await;
    assert_eq!(fault_message(&outcome), "no admin state on chain");
}

// ---------------------------------------------------------------------------
// BlockReward
// ---------------------------------------------------------------------------

#[tokio::test]
async fn block_reward_credits_the_miner_after_transactions() {
    let miner = Keypair::from_seed(&[12; 32]);
    let payer = Keypair::from_seed(&[13; 32]);
    let evaluator = setup(vec![balance(&payer.address(), 50)]);

    let pay_miner = TransferAsset::new(payer.address(), miner.address(), FungibleAmount::native(5));
    let tx = Transaction::create(0, &payer, None, ts(), vec![pay_miner.envelope()]).unwrap();
    let reward = BlockReward::native(10).envelope();

    let evaluation = evaluator
        .evaluate_block(&block(3, miner.address()), &[tx], Some(&reward))
        .await
        .unwrap();

    let slot = addresses::balance(&miner.address(), "STR");
    assert_eq!(evaluation.delta.get(&slot), Some(&Value::from(15u64)));
    assert!(evaluation.block_action.unwrap().is_committed());
}

#[tokio::test]
async fn block_reward_inside_a_transaction_faults() {
    let signer = Keypair::from_seed(&[14; 32]);
    let evaluator = setup(vec![]);
    let outcome = run(&evaluator, 1, &signer, vec![BlockReward::native(1).envelope()]).await;
    assert!(fault_message(&outcome).contains("block action"));
}
