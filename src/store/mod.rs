pub mod memory_store;
pub mod redis_store;

use crate::models::ViewerRecord;
use memory_store::MemoryViewerStore;
use redis_store::RedisViewerStore;

/// Errors surfaced by the viewer backing store.
///
/// Connectivity failures are reported to the single event that triggered
/// them; reconnection is the connection manager's concern, not this layer's.
#[derive(Debug)]
pub enum StoreError {
    Connection(String),
    Command(String),
    Serialization(String),
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StoreError::Connection(msg) => write!(f, "store connection error: {}", msg),
            StoreError::Command(msg) => write!(f, "store command error: {}", msg),
            StoreError::Serialization(msg) => write!(f, "store serialization error: {}", msg),
        }
    }
}

impl std::error::Error for StoreError {}

/// The shared backing store holding per-case viewer records.
///
/// Redis is the deployment backend; all server instances share one logical
/// viewer state through it. The in-memory backend mirrors the same
/// reset-on-write TTL semantics for single-instance deployments and tests.
#[derive(Clone)]
pub enum ViewerBackend {
    Redis(RedisViewerStore),
    Memory(MemoryViewerStore),
}

impl ViewerBackend {
    /// Write a viewer record, overwriting any record for the same
    /// `(caseReference, sessionId)` pair, and reset the case's TTL window.
    pub async fn insert(&self, case_reference: &str, record: &ViewerRecord) -> Result<(), StoreError> {
        match self {
            ViewerBackend::Redis(store) => store.insert(case_reference, record).await,
            ViewerBackend::Memory(store) => {
                store.insert(case_reference, record);
                Ok(())
            }
        }
    }

    /// Delete the record for one session. Deleting a missing record is a no-op.
    pub async fn remove(&self, case_reference: &str, session_id: &str) -> Result<(), StoreError> {
        match self {
            ViewerBackend::Redis(store) => store.remove(case_reference, session_id).await,
            ViewerBackend::Memory(store) => {
                store.remove(case_reference, session_id);
                Ok(())
            }
        }
    }

    /// All non-expired records for a case.
    pub async fn entries(&self, case_reference: &str) -> Result<Vec<ViewerRecord>, StoreError> {
        match self {
            ViewerBackend::Redis(store) => store.entries(case_reference).await,
            ViewerBackend::Memory(store) => Ok(store.entries(case_reference)),
        }
    }

    /// Extend the case's TTL window if the session's record still exists.
    /// Returns false (and performs no write) if the record has lapsed.
    pub async fn touch(&self, case_reference: &str, session_id: &str) -> Result<bool, StoreError> {
        match self {
            ViewerBackend::Redis(store) => store.touch(case_reference, session_id).await,
            ViewerBackend::Memory(store) => Ok(store.touch(case_reference, session_id)),
        }
    }
}
