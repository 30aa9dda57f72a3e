//! Persistence of queued transaction messages.
//!
//! Transaction messages must survive a restart of the charge point: they are
//! recorded when admitted, updated on every retry, and removed once the
//! central system answered or the attempt budget ran out.

pub mod file;
pub mod memory;

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use ocpp_core::config::QueueConfig;
use ocpp_core::types::MessageId;
use ocpp_core::AppResult;

use crate::envelope::Call;
use crate::message::ControlMessage;

pub use file::JsonFileMessageStore;
pub use memory::MemoryMessageStore;

/// A persisted transaction message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredTransactionMessage {
    /// Unique id the message was submitted with (the record key).
    pub initial_unique_id: MessageId,
    /// The call, carrying its current unique id.
    pub call: Call,
    /// Send attempts so far.
    pub attempts: u32,
    /// Earliest time of the next send.
    pub scheduled_at: DateTime<Utc>,
}

impl From<&ControlMessage> for StoredTransactionMessage {
    fn from(message: &ControlMessage) -> Self {
        Self {
            initial_unique_id: message.initial_unique_id.clone(),
            call: message.call.clone(),
            attempts: message.attempts,
            scheduled_at: message.scheduled_at,
        }
    }
}

/// Backend for transaction message records.
///
/// Called with the queue lock held; implementations must be quick and must
/// not call back into the queue.
pub trait TransactionMessageStore: Send + Sync + fmt::Debug {
    /// Record a newly admitted message.
    fn insert(&self, record: &StoredTransactionMessage) -> AppResult<()>;

    /// Replace the record with the same `initial_unique_id`.
    fn update(&self, record: &StoredTransactionMessage) -> AppResult<()>;

    /// Delete a record. Deleting an unknown id is not an error.
    fn remove(&self, initial_unique_id: &MessageId) -> AppResult<()>;

    /// All records in insertion order.
    fn load_all(&self) -> AppResult<Vec<StoredTransactionMessage>>;
}

/// Open the store selected by `config.store_path`.
pub fn open_store(config: &QueueConfig) -> AppResult<Arc<dyn TransactionMessageStore>> {
    match &config.store_path {
        Some(path) => {
            tracing::info!("Persisting transaction messages to '{}'", path);
            Ok(Arc::new(JsonFileMessageStore::open(path)?))
        }
        None => {
            tracing::info!("Transaction messages are kept in memory only");
            Ok(Arc::new(MemoryMessageStore::new()))
        }
    }
}
