//! Integration tests for transaction message persistence and restore.

mod helpers;

use std::sync::Arc;

use chrono::Utc;
use serde_json::json;

use ocpp_core::config::QueueConfig;
use ocpp_queue::{
    Call, JsonFileMessageStore, MemoryMessageStore, StoredTransactionMessage,
    TransactionMessageStore,
};

use helpers::{TestQueue, advance, config, empty, normal, settle, transaction};

fn record(id: &str, action: &str) -> StoredTransactionMessage {
    StoredTransactionMessage {
        initial_unique_id: id.into(),
        call: Call::new(id, action, json!({"connectorId": 1})),
        attempts: 0,
        scheduled_at: Utc::now(),
    }
}

#[tokio::test(start_paused = true)]
async fn test_transaction_message_is_forgotten_after_reply() {
    let store = Arc::new(MemoryMessageStore::new());
    let t = TestQueue::with_store(config(), store.clone());
    t.queue.resume();

    let stop = t.call("StopTransaction", empty());
    t.queue.submit(stop.clone(), transaction());
    t.queue.submit(t.call("Heartbeat", empty()), normal());
    assert_eq!(store.len(), 1);

    settle().await;
    t.reply_to(&stop, empty());
    assert!(store.is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_retry_updates_stored_record() {
    let store = Arc::new(MemoryMessageStore::new());
    let t = TestQueue::with_store(config(), store.clone());
    t.queue.resume();

    let stop = t.call("StopTransaction", empty());
    t.queue.submit(stop.clone(), transaction());
    settle().await;
    advance(31).await;

    let records = store.load_all().unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].initial_unique_id, stop.unique_id);
    assert_ne!(records[0].call.unique_id, stop.unique_id);
    assert_eq!(records[0].attempts, 1);
}

#[tokio::test(start_paused = true)]
async fn test_exhausted_message_is_removed_from_store() {
    let store = Arc::new(MemoryMessageStore::new());
    let t = TestQueue::with_store(
        QueueConfig {
            max_attempts: 1,
            ..config()
        },
        store.clone(),
    );
    t.queue.resume();

    let pending = t
        .queue
        .submit_async(t.call("MeterValues", empty()), transaction());
    advance(31).await;

    assert!(pending.await.unwrap().offline);
    assert!(store.is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_restore_requeues_in_stored_order() {
    let store = Arc::new(MemoryMessageStore::new());
    store.insert(&record("a", "StartTransaction")).unwrap();
    store.insert(&record("b", "MeterValues")).unwrap();
    store.insert(&record("c", "StopTransaction")).unwrap();

    let t = TestQueue::with_store(config(), store.clone());
    let restored = t.queue.restore_transaction_messages(&["MeterValues"]).unwrap();

    assert_eq!(restored, 2);
    assert_eq!(store.len(), 2);
    assert!(t.queue.contains_transaction_message(|c| c.action == "StopTransaction"));
    assert!(!t.queue.contains_transaction_message(|c| c.action == "MeterValues"));

    t.queue.resume();
    settle().await;
    let first = t.transport.last_call();
    assert_eq!(first.unique_id.as_str(), "a");

    t.reply_to(&first, json!({"transactionId": 3}));
    t.queue.notify_deferred_complete();
    settle().await;
    assert_eq!(t.transport.last_call().unique_id.as_str(), "c");
}

#[tokio::test(start_paused = true)]
async fn test_file_store_survives_restart() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("queue").join("transactions.json");

    let stop = {
        let store = Arc::new(JsonFileMessageStore::open(&path).unwrap());
        let t = TestQueue::with_store(config(), store);
        let stop = t.call("StopTransaction", json!({"transactionId": 5, "meterStop": 900}));
        t.queue.submit(stop.clone(), transaction());
        t.queue.stop().await;
        stop
    };

    let store = Arc::new(JsonFileMessageStore::open(&path).unwrap());
    let t = TestQueue::with_store(config(), store);
    assert_eq!(t.queue.restore_transaction_messages(&[]).unwrap(), 1);

    t.queue.resume();
    settle().await;
    let resent = t.transport.last_call();
    assert_eq!(resent.unique_id, stop.unique_id);
    assert_eq!(resent.payload, stop.payload);
}

#[tokio::test(start_paused = true)]
async fn test_restore_goes_ahead_of_new_messages_once() {
    let store = Arc::new(MemoryMessageStore::new());
    store.insert(&record("old", "StopTransaction")).unwrap();

    let t = TestQueue::with_store(config(), store.clone());
    let fresh = t.call("StartTransaction", json!({"connectorId": 2}));
    t.queue.submit(fresh.clone(), transaction());

    assert_eq!(t.queue.restore_transaction_messages(&[]).unwrap(), 1);
    assert_eq!(t.queue.restore_transaction_messages(&[]).unwrap(), 0);
    assert_eq!(t.queue.queue_lengths().transaction, 2);

    t.queue.resume();
    settle().await;
    let first = t.transport.last_call();
    assert_eq!(first.unique_id.as_str(), "old");

    t.reply_to(&first, empty());
    settle().await;
    assert_eq!(t.transport.last_call().unique_id, fresh.unique_id);
}
