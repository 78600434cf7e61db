use std::collections::HashMap;
use std::time::Duration;

use moka::sync::Cache;

use crate::models::ViewerRecord;

/// In-process viewer store for single-instance deployments and tests.
///
/// Mirrors the Redis layout: one entry per case holding a map of
/// `sessionId -> viewer record`, with a per-case TTL that is reset on every
/// write (moka's `time_to_live` restarts on insert, so each write re-seeds
/// the window exactly like `EXPIRE` on the Redis hash key).
#[derive(Clone)]
pub struct MemoryViewerStore {
    cache: Cache<String, HashMap<String, ViewerRecord>>,
}

impl MemoryViewerStore {
    pub fn new(ttl: Duration) -> Self {
        Self {
            cache: Cache::builder()
                .max_capacity(100_000)
                .time_to_live(ttl)
                .build(),
        }
    }

    pub fn insert(&self, case_reference: &str, record: &ViewerRecord) {
        let mut viewers = self.cache.get(case_reference).unwrap_or_default();
        viewers.insert(record.session_id.clone(), record.clone());
        self.cache.insert(case_reference.to_string(), viewers);
    }

    pub fn remove(&self, case_reference: &str, session_id: &str) {
        if let Some(mut viewers) = self.cache.get(case_reference) {
            if viewers.remove(session_id).is_some() {
                if viewers.is_empty() {
                    self.cache.invalidate(case_reference);
                } else {
                    self.cache.insert(case_reference.to_string(), viewers);
                }
            }
        }
    }

    pub fn entries(&self, case_reference: &str) -> Vec<ViewerRecord> {
        self.cache
            .get(case_reference)
            .map(|viewers| viewers.into_values().collect())
            .unwrap_or_default()
    }

    pub fn touch(&self, case_reference: &str, session_id: &str) -> bool {
        match self.cache.get(case_reference) {
            Some(viewers) if viewers.contains_key(session_id) => {
                // Re-insert to restart the TTL window
                self.cache.insert(case_reference.to_string(), viewers);
                true
            }
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_is_idempotent_per_session() {
        let store = MemoryViewerStore::new(Duration::from_secs(30));
        let record = ViewerRecord::new("PC-0001", "worker@justice.example", "sess-a");

        store.insert("PC-0001", &record);
        store.insert("PC-0001", &record);

        assert_eq!(store.entries("PC-0001").len(), 1);
    }

    #[test]
    fn remove_is_idempotent() {
        let store = MemoryViewerStore::new(Duration::from_secs(30));
        let record = ViewerRecord::new("PC-0001", "worker@justice.example", "sess-a");

        store.insert("PC-0001", &record);
        store.remove("PC-0001", "sess-a");
        store.remove("PC-0001", "sess-a");

        assert!(store.entries("PC-0001").is_empty());
    }

    #[test]
    fn touch_on_missing_record_returns_false() {
        let store = MemoryViewerStore::new(Duration::from_secs(30));
        assert!(!store.touch("PC-0001", "sess-none"));
        // No write must have happened
        assert!(store.entries("PC-0001").is_empty());
    }

    #[tokio::test]
    async fn record_expires_without_heartbeat() {
        let store = MemoryViewerStore::new(Duration::from_millis(200));
        let record = ViewerRecord::new("PC-0001", "worker@justice.example", "sess-a");

        store.insert("PC-0001", &record);
        assert_eq!(store.entries("PC-0001").len(), 1);

        tokio::time::sleep(Duration::from_millis(350)).await;
        assert!(store.entries("PC-0001").is_empty());
        assert!(!store.touch("PC-0001", "sess-a"));
    }

    #[tokio::test]
    async fn heartbeat_slides_the_expiry_window() {
        // Scaled-down version of the 0s/20s/40s heartbeat schedule with a
        // 30s TTL: refreshes must keep the record alive past the original
        // absolute deadline.
        let store = MemoryViewerStore::new(Duration::from_millis(300));
        let record = ViewerRecord::new("PC-0001", "worker@justice.example", "sess-a");

        store.insert("PC-0001", &record);

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(store.touch("PC-0001", "sess-a"));

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(store.touch("PC-0001", "sess-a"));

        // 450ms after the first insert: well past the original window,
        // inside the refreshed one.
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(store.entries("PC-0001").len(), 1);

        tokio::time::sleep(Duration::from_millis(400)).await;
        assert!(store.entries("PC-0001").is_empty());
    }
}
