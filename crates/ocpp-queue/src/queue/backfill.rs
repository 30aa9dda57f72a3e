//! Late substitution of central-system transaction ids into queued messages.
//!
//! A StopTransaction (or MeterValues) queued while offline does not know the
//! `transactionId` yet; the StartTransaction reply delivers it later. Entries
//! are keyed by the unique id the message was submitted with and are
//! best-effort: an entry whose message leaves the queue for another reason is
//! simply abandoned.

use std::collections::HashMap;

use serde_json::Value;

use ocpp_core::types::{MessageId, TransactionId};

use crate::message::ControlMessage;

const TRANSACTION_ID_FIELD: &str = "transactionId";

#[derive(Debug, Default)]
pub(crate) struct Backfill {
    /// Pending message id -> transaction id to write at dispatch
    transaction_ids: HashMap<MessageId, TransactionId>,
    /// StartTransaction id -> MeterValues ids waiting for its transaction id
    meter_values: HashMap<MessageId, Vec<MessageId>>,
}

impl Backfill {
    pub fn register(&mut self, pending_unique_id: MessageId, transaction_id: TransactionId) {
        self.transaction_ids.insert(pending_unique_id, transaction_id);
    }

    /// Consume the entry for `message`, if any, and write it into the payload.
    pub fn apply(&mut self, message: &mut ControlMessage) -> bool {
        let entry = self
            .transaction_ids
            .remove(&message.initial_unique_id)
            .or_else(|| self.transaction_ids.remove(message.unique_id()));
        match entry {
            Some(transaction_id) => {
                tracing::debug!(
                    "Replacing transaction id of {} with {}",
                    message.unique_id(),
                    transaction_id
                );
                set_transaction_id(&mut message.call.payload, transaction_id)
            }
            None => false,
        }
    }

    pub fn register_meter_values(&mut self, start_unique_id: MessageId, meter_values_id: MessageId) {
        self.meter_values
            .entry(start_unique_id)
            .or_default()
            .push(meter_values_id);
    }

    pub fn take_meter_values(&mut self, start_unique_id: &MessageId) -> Vec<MessageId> {
        self.meter_values.remove(start_unique_id).unwrap_or_default()
    }

    pub fn pending(&self) -> usize {
        self.transaction_ids.len()
    }
}

/// Write `transactionId` into an object payload.
pub(crate) fn set_transaction_id(payload: &mut Value, transaction_id: TransactionId) -> bool {
    match payload.as_object_mut() {
        Some(object) => {
            object.insert(TRANSACTION_ID_FIELD.to_string(), Value::from(transaction_id));
            true
        }
        None => {
            tracing::warn!("Cannot set transactionId on a non-object payload");
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::envelope::Call;
    use chrono::Utc;
    use ocpp_core::config::Classification;
    use serde_json::json;

    fn stop_transaction(id: &str) -> ControlMessage {
        ControlMessage::new(
            Call::new(id, "StopTransaction", json!({"meterStop": 1200, "transactionId": -1})),
            Classification::Transaction,
            Utc::now(),
            None,
        )
    }

    #[test]
    fn test_apply_consumes_entry_once() {
        let mut backfill = Backfill::default();
        backfill.register(MessageId::new("stop-1"), 42);

        let mut message = stop_transaction("stop-1");
        assert!(backfill.apply(&mut message));
        assert_eq!(message.call.payload["transactionId"], 42);
        assert_eq!(backfill.pending(), 0);

        let mut again = stop_transaction("stop-1");
        assert!(!backfill.apply(&mut again));
        assert_eq!(again.call.payload["transactionId"], -1);
    }

    #[test]
    fn test_apply_follows_initial_id_after_retry() {
        let mut backfill = Backfill::default();
        backfill.register(MessageId::new("stop-1"), 7);

        let mut message = stop_transaction("stop-1");
        message.call.unique_id = MessageId::new("stop-1-retry");
        assert!(backfill.apply(&mut message));
        assert_eq!(message.call.payload["transactionId"], 7);
    }

    #[test]
    fn test_meter_values_are_grouped_by_start() {
        let mut backfill = Backfill::default();
        backfill.register_meter_values(MessageId::new("start"), MessageId::new("mv-1"));
        backfill.register_meter_values(MessageId::new("start"), MessageId::new("mv-2"));
        let ids = backfill.take_meter_values(&MessageId::new("start"));
        assert_eq!(ids, vec![MessageId::new("mv-1"), MessageId::new("mv-2")]);
        assert!(backfill.take_meter_values(&MessageId::new("start")).is_empty());
    }

    #[test]
    fn test_non_object_payload_is_left_alone() {
        let mut payload = json!([1, 2]);
        assert!(!set_transaction_id(&mut payload, 3));
        assert_eq!(payload, json!([1, 2]));
    }
}
