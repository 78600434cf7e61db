use crate::models::ViewerRecord;
use crate::store::{StoreError, ViewerBackend};
use tracing::debug;

/// Narrow operation set over the shared backing store.
///
/// The store is the single authority on who is viewing what; nothing in the
/// process caches viewer state beyond the per-socket cleanup shadow. Records
/// lapse on their own when heartbeats stop, so callers must treat a missing
/// record as a normal outcome.
#[derive(Clone)]
pub struct ViewerRegistry {
    backend: ViewerBackend,
}

impl ViewerRegistry {
    pub fn new(backend: ViewerBackend) -> Self {
        Self { backend }
    }

    /// Record that a session is viewing a case. Overwrites any existing
    /// record for the same `(caseReference, sessionId)` pair and resets the
    /// case's TTL window.
    pub async fn add_viewer(
        &self,
        case_reference: &str,
        user_id: &str,
        session_id: &str,
    ) -> Result<(), StoreError> {
        let record = ViewerRecord::new(case_reference, user_id, session_id);
        self.backend.insert(case_reference, &record).await?;
        debug!(
            "Added viewer {} (session {}) to case {}",
            user_id, session_id, case_reference
        );
        Ok(())
    }

    /// Remove one session's record. Removing a record that no longer exists
    /// is a no-op.
    pub async fn remove_viewer(
        &self,
        case_reference: &str,
        session_id: &str,
    ) -> Result<(), StoreError> {
        self.backend.remove(case_reference, session_id).await?;
        debug!("Removed viewer session {} from case {}", session_id, case_reference);
        Ok(())
    }

    /// All current viewer records for a case, excluding the given session.
    /// An empty exclusion id returns the full set.
    pub async fn list_viewers(
        &self,
        case_reference: &str,
        exclude_session_id: &str,
    ) -> Result<Vec<ViewerRecord>, StoreError> {
        let mut records = self.backend.entries(case_reference).await?;
        if !exclude_session_id.is_empty() {
            records.retain(|record| record.session_id != exclude_session_id);
        }
        Ok(records)
    }

    /// Extend the TTL for a session's record. Returns false if the record
    /// lapsed, signalling the caller to re-register via `add_viewer`.
    pub async fn refresh_heartbeat(
        &self,
        case_reference: &str,
        session_id: &str,
    ) -> Result<bool, StoreError> {
        self.backend.touch(case_reference, session_id).await
    }

    /// Viewer count for a case, with the same exclusion semantics as
    /// `list_viewers`.
    pub async fn count_viewers(
        &self,
        case_reference: &str,
        exclude_session_id: &str,
    ) -> Result<usize, StoreError> {
        Ok(self.list_viewers(case_reference, exclude_session_id).await?.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory_store::MemoryViewerStore;
    use std::time::Duration;

    fn registry() -> ViewerRegistry {
        ViewerRegistry::new(ViewerBackend::Memory(MemoryViewerStore::new(
            Duration::from_secs(30),
        )))
    }

    #[tokio::test]
    async fn join_twice_counts_once() {
        let registry = registry();

        registry.add_viewer("PC-0001", "a@justice.example", "sess-a").await.unwrap();
        registry.add_viewer("PC-0001", "a@justice.example", "sess-a").await.unwrap();

        assert_eq!(registry.count_viewers("PC-0001", "").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn self_exclusion_drops_exactly_one_record() {
        let registry = registry();

        registry.add_viewer("PC-0001", "a@justice.example", "sess-a").await.unwrap();
        registry.add_viewer("PC-0001", "b@justice.example", "sess-b").await.unwrap();
        registry.add_viewer("PC-0001", "c@justice.example", "sess-c").await.unwrap();

        assert_eq!(registry.count_viewers("PC-0001", "").await.unwrap(), 3);
        assert_eq!(registry.count_viewers("PC-0001", "sess-a").await.unwrap(), 2);
        // Excluding an absent session returns the full set
        assert_eq!(registry.count_viewers("PC-0001", "sess-x").await.unwrap(), 3);

        let peers = registry.list_viewers("PC-0001", "sess-a").await.unwrap();
        assert!(!peers.iter().any(|r| r.session_id == "sess-a"));
    }

    #[tokio::test]
    async fn two_sessions_join_then_one_leaves() {
        let registry = registry();

        registry.add_viewer("PC-0001", "a@justice.example", "sess-a").await.unwrap();
        registry.add_viewer("PC-0001", "b@justice.example", "sess-b").await.unwrap();

        assert_eq!(registry.count_viewers("PC-0001", "").await.unwrap(), 2);
        assert_eq!(registry.count_viewers("PC-0001", "sess-a").await.unwrap(), 1);

        registry.remove_viewer("PC-0001", "sess-b").await.unwrap();
        assert_eq!(registry.count_viewers("PC-0001", "").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn heartbeat_on_lapsed_record_signals_false() {
        let registry = registry();

        assert!(!registry.refresh_heartbeat("PC-0001", "sess-a").await.unwrap());
        assert_eq!(registry.count_viewers("PC-0001", "").await.unwrap(), 0);

        // Re-registering afterwards works as normal
        registry.add_viewer("PC-0001", "a@justice.example", "sess-a").await.unwrap();
        assert!(registry.refresh_heartbeat("PC-0001", "sess-a").await.unwrap());
    }

    #[tokio::test]
    async fn cases_do_not_share_viewers() {
        let registry = registry();

        registry.add_viewer("PC-0001", "a@justice.example", "sess-a").await.unwrap();
        registry.add_viewer("PC-0002", "b@justice.example", "sess-b").await.unwrap();

        assert_eq!(registry.count_viewers("PC-0001", "").await.unwrap(), 1);
        assert_eq!(registry.count_viewers("PC-0002", "").await.unwrap(), 1);
    }
}
