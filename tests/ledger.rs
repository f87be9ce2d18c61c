//! Write-path behaviour: append ordering, failure isolation, concurrency and
//! journal recovery.

#![allow(clippy::unwrap_used, clippy::expect_used)]

mod common;

use std::sync::Arc;
use std::time::Duration;

use campaign_ledger::{
    BlockJournal, Chain, ContentStore, IndexStore, LedgerError, LedgerService, MemoryContentStore,
    MemoryIndexStore, Timeouts, TransactionInput, TransactionRecord,
};
use common::{harness, input};

#[tokio::test]
async fn recorded_transactions_leave_a_valid_chain() {
    let h = harness();
    for (i, user) in ["u1", "u2", "u3", "u4"].iter().enumerate() {
        h.ledger.record_transaction(input(user, "camp-1", 5.0 * (i + 1) as f64)).await.unwrap();
        h.ledger.verify().unwrap();
    }

    let blocks = h.ledger.blocks();
    assert_eq!(blocks.len(), 5);
    assert_eq!(blocks[0], Chain::genesis());
    for (i, pair) in blocks.windows(2).enumerate() {
        assert_eq!(pair[1].index, i as u64 + 1);
        assert_eq!(pair[1].previous_hash, pair[0].hash);
    }
}

#[tokio::test]
async fn stored_payload_round_trips_to_an_equal_record() {
    let h = harness();
    let receipt = h.ledger.record_transaction(input("u1", "camp-9", 42.5)).await.unwrap();

    let bytes = h.content.get(&receipt.content_address).await.unwrap();
    let record = TransactionRecord::from_bytes(&bytes).unwrap();
    assert_eq!(record.user_id, "u1");
    assert_eq!(record.sender, "u1@example.org");
    assert_eq!(record.receipt_id, "rcpt-u1-camp-9-42.5");
    assert_eq!(record.amount, 42.5);
    assert_eq!(record.campaign_id, "camp-9");
    assert!(record.timestamp > 0);

    assert_eq!(h.queries.list_all().await.unwrap(), vec![record]);
}

#[tokio::test]
async fn zero_amount_has_no_side_effects() {
    let h = harness();
    let err = h.ledger.record_transaction(input("u1", "camp-1", 0.0)).await.unwrap_err();

    assert!(matches!(err, LedgerError::Validation { field: "amount", .. }));
    assert_eq!(h.ledger.chain_len(), 1);
    assert!(h.content.inner.is_empty());
    assert_eq!(h.index.inserts(), 0);
}

#[tokio::test]
async fn missing_field_is_a_validation_error() {
    let h = harness();
    let err = h
        .ledger
        .record_transaction(TransactionInput { user_id: None, ..input("u1", "camp-1", 3.0) })
        .await
        .unwrap_err();
    assert!(matches!(err, LedgerError::Validation { field: "user_id", .. }));
    assert_eq!(h.ledger.chain_len(), 1);
}

#[tokio::test]
async fn failed_put_appends_nothing() {
    let h = harness();
    h.ledger.record_transaction(input("u1", "camp-1", 1.0)).await.unwrap();
    let tip = h.ledger.latest_block().unwrap();

    h.content.fail_puts(true);
    let err = h.ledger.record_transaction(input("u2", "camp-1", 2.0)).await.unwrap_err();

    assert!(matches!(err, LedgerError::StoreUnavailable(_)), "{err}");
    assert_eq!(h.ledger.chain_len(), 2);
    assert_eq!(h.ledger.latest_block().unwrap(), tip);
    assert_eq!(h.index.inserts(), 1);

    // the ledger keeps working once the store is back
    h.content.fail_puts(false);
    let receipt = h.ledger.record_transaction(input("u2", "camp-1", 2.0)).await.unwrap();
    assert_eq!(receipt.block.index, 2);
    assert_eq!(receipt.block.previous_hash, tip.hash);
}

#[tokio::test]
async fn hung_put_times_out_without_appending() {
    let content = common::FlakyContentStore::new();
    content.hang_puts(true);
    let ledger = LedgerService::new(Arc::new(content), Arc::new(MemoryIndexStore::new()))
        .with_timeouts(Timeouts {
            content_store: Duration::from_millis(50),
            index_store: Duration::from_millis(50),
        });

    let err = ledger.record_transaction(input("u1", "camp-1", 1.0)).await.unwrap_err();
    assert!(matches!(err, LedgerError::StoreTimeout { .. }), "{err}");
    assert_eq!(ledger.chain_len(), 1);
}

#[tokio::test]
async fn failed_index_insert_keeps_the_block_and_reconcile_repairs_it() {
    let h = harness();
    h.ledger.record_transaction(input("u1", "camp-1", 1.0)).await.unwrap();

    h.index.fail_inserts(true);
    let err = h.ledger.record_transaction(input("u2", "camp-1", 2.0)).await.unwrap_err();
    let LedgerError::IndexPersist { address, block_index, .. } = &err else {
        panic!("expected IndexPersist, got {err}");
    };
    assert_eq!(*block_index, 2);
    assert_eq!(h.ledger.chain_len(), 3);
    h.ledger.verify().unwrap();

    // the divergent record is invisible to queries until reconciled
    assert_eq!(h.queries.list_all().await.unwrap().len(), 1);

    // reconcile cannot run while the index is down
    assert!(matches!(h.ledger.reconcile().await, Err(LedgerError::IndexUnavailable(_))));

    h.index.fail_inserts(false);
    let report = h.ledger.reconcile().await.unwrap();
    assert_eq!(report.chain_addresses, 2);
    assert_eq!(report.indexed, 1);
    assert_eq!(report.missing.len(), 1);
    assert_eq!(report.reinserted[0].as_str(), address.as_str());

    let users = h.queries.users_for_campaign("camp-1").await.unwrap();
    assert_eq!(users.len(), 2);

    // a second sweep finds nothing to do
    let report = h.ledger.reconcile().await.unwrap();
    assert!(report.missing.is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_appends_never_fork_the_chain() {
    let h = harness();

    let mut tasks = Vec::new();
    for i in 0..40 {
        let ledger = Arc::clone(&h.ledger);
        tasks.push(tokio::spawn(async move {
            ledger
                .record_transaction(input(&format!("u{i}"), "camp-1", i as f64 + 1.0))
                .await
        }));
    }
    for task in tasks {
        task.await.unwrap().unwrap();
    }

    assert_eq!(h.ledger.chain_len(), 41);
    h.ledger.verify().unwrap();

    // index rows were written in chain order
    let rows = h.index.inner.list_all().await.unwrap();
    let chain_order: Vec<_> = h
        .ledger
        .blocks()
        .iter()
        .filter_map(|b| b.content_address().cloned())
        .collect();
    let index_order: Vec<_> = rows.into_iter().map(|r| r.content_address).collect();
    assert_eq!(index_order, chain_order);
}

#[tokio::test]
async fn journal_restores_the_chain_after_restart() {
    let dir = tempfile::tempdir().unwrap();
    let content = MemoryContentStore::new();
    let index = MemoryIndexStore::new();

    let before = {
        let ledger = LedgerService::new(Arc::new(content.clone()), Arc::new(index.clone()))
            .with_journal(BlockJournal::open(dir.path()).unwrap())
            .unwrap();
        for user in ["u1", "u2", "u3"] {
            ledger.record_transaction(input(user, "camp-1", 7.0)).await.unwrap();
        }
        ledger.blocks()
    };

    let restarted = LedgerService::new(Arc::new(content.clone()), Arc::new(index.clone()))
        .with_journal(BlockJournal::open(dir.path()).unwrap())
        .unwrap();
    assert_eq!(restarted.blocks(), before);

    let receipt = restarted.record_transaction(input("u4", "camp-1", 7.0)).await.unwrap();
    assert_eq!(receipt.block.index, 4);
    assert_eq!(receipt.block.previous_hash, before[3].hash);
    restarted.verify().unwrap();
}

fn memory_ledger() -> LedgerService {
    LedgerService::new(Arc::new(MemoryContentStore::new()), Arc::new(MemoryIndexStore::new()))
}

#[tokio::test]
async fn tampered_journal_is_rejected_at_startup() {
    let dir = tempfile::tempdir().unwrap();
    {
        let ledger = memory_ledger().with_journal(BlockJournal::open(dir.path()).unwrap()).unwrap();
        for user in ["u1", "u2", "u3"] {
            ledger.record_transaction(input(user, "camp-1", 1.0)).await.unwrap();
        }
    }

    let path = dir.path().join("block_2.json");
    let mut block: serde_json::Value =
        serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();
    block["data"]["ipfsHash"] = serde_json::Value::from("QmForged");
    std::fs::write(&path, serde_json::to_vec(&block).unwrap()).unwrap();

    let result = memory_ledger().with_journal(BlockJournal::open(dir.path()).unwrap());
    assert!(matches!(result, Err(LedgerError::ChainIntegrity { index: 2, .. })));
}

#[tokio::test]
async fn identical_payloads_may_share_an_address() {
    let content = MemoryContentStore::new();
    let a = content.put(b"same".to_vec()).await.unwrap();
    let b = content.put(b"same".to_vec()).await.unwrap();
    assert_eq!(a, b);

    // two appends referencing the same address are still two distinct blocks
    let mut chain = Chain::new();
    let first = chain.append(a.clone()).unwrap();
    let second = chain.append(b).unwrap();
    assert_ne!(first.hash, second.hash);
    assert!(chain.is_valid());
}
