//! Transaction message store persisted as a JSON file.

use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};

use ocpp_core::error::AppError;
use ocpp_core::types::MessageId;
use ocpp_core::AppResult;

use super::{StoredTransactionMessage, TransactionMessageStore};

/// Keeps all records in memory and rewrites the file on every change.
///
/// The file is written to a sibling `.tmp` file first and renamed into
/// place, so a crash mid-write leaves the previous state intact.
#[derive(Debug)]
pub struct JsonFileMessageStore {
    path: PathBuf,
    records: Mutex<Vec<StoredTransactionMessage>>,
}

impl JsonFileMessageStore {
    /// Open (or create) the store at `path`.
    pub fn open(path: impl AsRef<Path>) -> AppResult<Self> {
        let path = path.as_ref().to_path_buf();
        let records = if path.exists() {
            let bytes = std::fs::read(&path)?;
            if bytes.is_empty() {
                Vec::new()
            } else {
                serde_json::from_slice(&bytes).map_err(|e| {
                    AppError::storage(format!(
                        "Corrupt transaction message store '{}': {e}",
                        path.display()
                    ))
                })?
            }
        } else {
            if let Some(parent) = path.parent() {
                if !parent.as_os_str().is_empty() {
                    std::fs::create_dir_all(parent)?;
                }
            }
            Vec::new()
        };

        tracing::debug!(
            "Opened transaction message store '{}' with {} records",
            path.display(),
            records.len()
        );

        Ok(Self {
            path,
            records: Mutex::new(records),
        })
    }

    /// Location of the backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn lock(&self) -> MutexGuard<'_, Vec<StoredTransactionMessage>> {
        self.records.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn persist(&self, records: &[StoredTransactionMessage]) -> AppResult<()> {
        let bytes = serde_json::to_vec_pretty(records)?;
        let tmp = self.path.with_extension("tmp");
        std::fs::write(&tmp, bytes)?;
        std::fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

impl TransactionMessageStore for JsonFileMessageStore {
    fn insert(&self, record: &StoredTransactionMessage) -> AppResult<()> {
        let mut records = self.lock();
        records.retain(|r| r.initial_unique_id != record.initial_unique_id);
        records.push(record.clone());
        self.persist(&records)
    }

    fn update(&self, record: &StoredTransactionMessage) -> AppResult<()> {
        let mut records = self.lock();
        match records
            .iter_mut()
            .find(|r| r.initial_unique_id == record.initial_unique_id)
        {
            Some(existing) => *existing = record.clone(),
            None => records.push(record.clone()),
        }
        self.persist(&records)
    }

    fn remove(&self, initial_unique_id: &MessageId) -> AppResult<()> {
        let mut records = self.lock();
        let before = records.len();
        records.retain(|r| &r.initial_unique_id != initial_unique_id);
        if records.len() == before {
            return Ok(());
        }
        self.persist(&records)
    }

    fn load_all(&self) -> AppResult<Vec<StoredTransactionMessage>> {
        Ok(self.lock().clone())
    }
}
