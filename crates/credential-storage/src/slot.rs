//! Single named slot holding the persisted session credential.

use crate::{DurableStorage, StorageResult};
use std::sync::Arc;
use tracing::debug;

/// Get/set access to one credential value in durable storage.
///
/// The reconciliation engine is the only writer; other components only read.
#[derive(Clone)]
pub struct CredentialSlot {
    storage: Arc<dyn DurableStorage>,
    key: String,
}

impl CredentialSlot {
    pub fn new(storage: Arc<dyn DurableStorage>, key: impl Into<String>) -> Self {
        Self {
            storage,
            key: key.into(),
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// Current credential, if any. Blank values read as absent.
    pub fn get(&self) -> StorageResult<Option<String>> {
        Ok(self
            .storage
            .get(&self.key)?
            .filter(|value| !value.trim().is_empty()))
    }

    /// Store `value`, or clear the slot when `None`.
    pub fn set(&self, value: Option<&str>) -> StorageResult<()> {
        match value {
            Some(credential) => {
                debug!(key = %self.key, "persisting session credential");
                self.storage.set(&self.key, credential)
            }
            None => {
                if self.storage.delete(&self.key)? {
                    debug!(key = %self.key, "cleared session credential");
                }
                Ok(())
            }
        }
    }
}

impl std::fmt::Debug for CredentialSlot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialSlot")
            .field("key", &self.key)
            .finish_non_exhaustive()
    }
}
