//! In-memory transaction message store backed by DashMap.

use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;

use ocpp_core::types::MessageId;
use ocpp_core::AppResult;

use super::{StoredTransactionMessage, TransactionMessageStore};

/// Keeps records for the lifetime of the process.
#[derive(Debug, Default)]
pub struct MemoryMessageStore {
    /// Records keyed by initial unique id, tagged with an insertion sequence
    records: DashMap<MessageId, (u64, StoredTransactionMessage)>,
    next_seq: AtomicU64,
}

impl MemoryMessageStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored records.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Whether the store holds no records.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

impl TransactionMessageStore for MemoryMessageStore {
    fn insert(&self, record: &StoredTransactionMessage) -> AppResult<()> {
        let seq = self.next_seq.fetch_add(1, Ordering::SeqCst);
        self.records
            .insert(record.initial_unique_id.clone(), (seq, record.clone()));
        Ok(())
    }

    fn update(&self, record: &StoredTransactionMessage) -> AppResult<()> {
        if let Some(mut entry) = self.records.get_mut(&record.initial_unique_id) {
            entry.1 = record.clone();
            return Ok(());
        }
        tracing::debug!(
            "Updating unknown transaction message {}, inserting instead",
            record.initial_unique_id
        );
        self.insert(record)
    }

    fn remove(&self, initial_unique_id: &MessageId) -> AppResult<()> {
        self.records.remove(initial_unique_id);
        Ok(())
    }

    fn load_all(&self) -> AppResult<Vec<StoredTransactionMessage>> {
        let mut records: Vec<(u64, StoredTransactionMessage)> = self
            .records
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        records.sort_by_key(|(seq, _)| *seq);
        Ok(records.into_iter().map(|(_, record)| record).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::envelope::Call;
    use chrono::Utc;
    use serde_json::json;

    fn record(id: &str) -> StoredTransactionMessage {
        StoredTransactionMessage {
            initial_unique_id: MessageId::new(id),
            call: Call::new(id, "MeterValues", json!({"connectorId": 1})),
            attempts: 0,
            scheduled_at: Utc::now(),
        }
    }

    #[test]
    fn test_load_preserves_insertion_order() {
        let store = MemoryMessageStore::new();
        for id in ["c", "a", "b"] {
            store.insert(&record(id)).unwrap();
        }
        let ids: Vec<String> = store
            .load_all()
            .unwrap()
            .into_iter()
            .map(|r| r.initial_unique_id.into_inner())
            .collect();
        assert_eq!(ids, vec!["c", "a", "b"]);
    }

    #[test]
    fn test_update_keeps_position() {
        let store = MemoryMessageStore::new();
        store.insert(&record("first")).unwrap();
        store.insert(&record("second")).unwrap();

        let mut retried = record("first");
        retried.call.unique_id = MessageId::new("first-retry");
        retried.attempts = 1;
        store.update(&retried).unwrap();

        let all = store.load_all().unwrap();
        assert_eq!(all[0].call.unique_id, "first-retry");
        assert_eq!(all[0].attempts, 1);
        assert_eq!(all.len(), 2);
    }

    #[test]
    fn test_remove_unknown_is_ok() {
        let store = MemoryMessageStore::new();
        store.insert(&record("x")).unwrap();
        store.remove(&MessageId::new("y")).unwrap();
        store.remove(&MessageId::new("x")).unwrap();
        assert!(store.is_empty());
    }
}
