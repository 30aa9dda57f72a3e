//! Message queue configuration.

use serde::{Deserialize, Serialize};

/// Whether a message must be delivered in chronological order and retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Classification {
    /// Non-transaction message; may jump the queue, never retried.
    Normal,
    /// Transaction-lifecycle message; strictly ordered and retried.
    Transaction,
}

/// Delivery policy of the OCPP message queue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueConfig {
    /// Maximum number of send attempts for a transaction message.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Base retry interval in seconds; 0 means immediate retry.
    #[serde(default = "default_retry_interval")]
    pub retry_interval_seconds: u32,
    /// Seconds to wait for a CALLRESULT/CALLERROR before the attempt times out.
    #[serde(default = "default_reply_timeout")]
    pub reply_timeout_seconds: u32,
    /// Upper bound on the combined queue length; normal messages are dropped
    /// beyond it. Unlimited when absent.
    #[serde(default)]
    pub queues_total_size_threshold: Option<usize>,
    /// Keep normal messages while offline instead of dropping them.
    #[serde(default)]
    pub queue_all_messages: bool,
    /// Actions admitted to the normal queue even while paused.
    #[serde(default = "default_always_admit")]
    pub always_admit_actions: Vec<String>,
    /// Reply kinds whose external handler must finish before the next send.
    #[serde(default = "default_deferred_notify")]
    pub deferred_notify_kinds: Vec<String>,
    /// Actions classified as transaction messages by [`QueueConfig::classify`].
    #[serde(default = "default_transaction_actions")]
    pub transaction_actions: Vec<String>,
    /// JSON file backing the transaction message store (in-memory if absent).
    #[serde(default)]
    pub store_path: Option<String>,
}

impl QueueConfig {
    /// Classify an outbound action according to `transaction_actions`.
    pub fn classify(&self, action: &str) -> Classification {
        if self.transaction_actions.iter().any(|a| a == action) {
            Classification::Transaction
        } else {
            Classification::Normal
        }
    }

    /// Whether `action` may enter the normal queue while paused.
    pub fn always_admits(&self, action: &str) -> bool {
        self.always_admit_actions.iter().any(|a| a == action)
    }

    /// Whether a reply of `kind` defers dispatch until notified.
    pub fn defers_notify(&self, kind: &str) -> bool {
        self.deferred_notify_kinds.iter().any(|k| k == kind)
    }
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            retry_interval_seconds: default_retry_interval(),
            reply_timeout_seconds: default_reply_timeout(),
            queues_total_size_threshold: None,
            queue_all_messages: false,
            always_admit_actions: default_always_admit(),
            deferred_notify_kinds: default_deferred_notify(),
            transaction_actions: default_transaction_actions(),
            store_path: None,
        }
    }
}

fn default_max_attempts() -> u32 {
    3
}

fn default_retry_interval() -> u32 {
    60
}

fn default_reply_timeout() -> u32 {
    30
}

fn default_always_admit() -> Vec<String> {
    vec!["BootNotification".to_string()]
}

fn default_deferred_notify() -> Vec<String> {
    vec!["StartTransactionResponse".to_string()]
}

fn default_transaction_actions() -> Vec<String> {
    ["StartTransaction", "StopTransaction", "MeterValues", "TransactionEvent"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = QueueConfig::default();
        assert_eq!(config.max_attempts, 3);
        assert_eq!(config.reply_timeout_seconds, 30);
        assert!(config.always_admits("BootNotification"));
        assert!(!config.always_admits("Heartbeat"));
        assert!(config.defers_notify("StartTransactionResponse"));
    }

    #[test]
    fn test_classify() {
        let config = QueueConfig::default();
        assert_eq!(config.classify("MeterValues"), Classification::Transaction);
        assert_eq!(config.classify("Heartbeat"), Classification::Normal);
    }

    #[test]
    fn test_partial_deserialize_fills_defaults() {
        let config: QueueConfig =
            serde_json::from_str(r#"{"max_attempts": 5, "retry_interval_seconds": 0}"#).unwrap();
        assert_eq!(config.max_attempts, 5);
        assert_eq!(config.retry_interval_seconds, 0);
        assert_eq!(config.reply_timeout_seconds, 30);
        assert!(config.queues_total_size_threshold.is_none());
    }
}
