//! File system paths for the reconciler.

use crate::{CoreError, CoreResult};
use std::path::PathBuf;

const BASE_DIR_NAME: &str = ".session-reconciler";

/// Manages file system paths for the reconciler.
#[derive(Debug, Clone)]
pub struct Paths {
    /// Base directory for runtime files (~/.session-reconciler)
    base_dir: PathBuf,
}

impl Paths {
    /// Create a new Paths instance rooted at `~/.session-reconciler`.
    pub fn new() -> CoreResult<Self> {
        let home = dirs::home_dir()
            .ok_or_else(|| CoreError::Path("Could not determine home directory".to_string()))?;

        Ok(Self {
            base_dir: home.join(BASE_DIR_NAME),
        })
    }

    /// Create a new Paths instance with a custom base directory.
    pub fn with_base_dir(base_dir: PathBuf) -> Self {
        Self { base_dir }
    }

    pub fn base_dir(&self) -> &PathBuf {
        &self.base_dir
    }

    /// Config file path (~/.session-reconciler/config.json).
    pub fn config_file(&self) -> PathBuf {
        self.base_dir.join("config.json")
    }

    /// Durable credential store (~/.session-reconciler/credentials.json).
    pub fn credential_store_file(&self) -> PathBuf {
        self.base_dir.join("credentials.json")
    }

    pub fn logs_dir(&self) -> PathBuf {
        self.base_dir.join("logs")
    }

    /// Structured log file (~/.session-reconciler/logs/reconciler.jsonl).
    pub fn log_file(&self) -> PathBuf {
        self.logs_dir().join("reconciler.jsonl")
    }

    /// Ensure all required directories exist.
    pub fn ensure_dirs(&self) -> CoreResult<()> {
        std::fs::create_dir_all(&self.base_dir)?;
        std::fs::create_dir_all(self.logs_dir())?;
        Ok(())
    }
}
