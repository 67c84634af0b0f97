//! Durable storage for the persisted session credential.
//!
//! This crate provides:
//! - the [`DurableStorage`] key/value trait
//! - a JSON-file backend ([`FileStorage`]) shared across process restarts
//! - an in-memory backend ([`MemoryStorage`])
//! - [`CredentialSlot`], the single named slot the reconciler reads and writes

mod file;
mod memory;
mod slot;
mod traits;

pub use file::FileStorage;
pub use memory::MemoryStorage;
pub use slot::CredentialSlot;
pub use traits::DurableStorage;

use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;

/// Error type for storage operations.
#[derive(Error, Debug)]
pub enum StorageError {
    /// Stored data could not be encoded or decoded
    #[error("Encoding error: {0}")]
    Encoding(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Open the file-backed store at `path` and return the credential slot `key`.
pub fn open_credential_slot(path: impl Into<PathBuf>, key: &str) -> StorageResult<CredentialSlot> {
    let storage = FileStorage::new(path)?;
    Ok(CredentialSlot::new(Arc::new(storage), key))
}
