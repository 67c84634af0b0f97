//! Debug properties exposed for support tooling.

use parking_lot::Mutex;
use std::collections::HashMap;

/// Property key under which the active session id is recorded.
pub const SESSION_ID_PROPERTY: &str = "sessionId";

/// A sink for named debug properties.
pub trait DiagnosticSink: Send + Sync {
    fn set_property(&self, key: &str, value: &str);
}

/// Discards all properties.
#[derive(Debug, Default)]
pub struct NullDiagnostics;

impl DiagnosticSink for NullDiagnostics {
    fn set_property(&self, _key: &str, _value: &str) {}
}

/// Keeps the latest value of every property in memory.
#[derive(Debug, Default)]
pub struct MemoryDiagnostics {
    properties: Mutex<HashMap<String, String>>,
}

impl MemoryDiagnostics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<String> {
        self.properties.lock().get(key).cloned()
    }
}

impl DiagnosticSink for MemoryDiagnostics {
    fn set_property(&self, key: &str, value: &str) {
        self.properties
            .lock()
            .insert(key.to_string(), value.to_string());
    }
}
