use std::collections::HashMap;
use std::time::Duration;

use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client};
use tracing::warn;

use crate::models::ViewerRecord;
use crate::store::StoreError;

/// Redis-backed viewer store.
///
/// One hash per case, keyed `case:viewer:<caseReference>`, whose fields are
/// `sessionId -> JSON-serialized viewer record`. The whole key carries a
/// single TTL that is reset on every write, so a case's viewer set expires
/// as a unit once nobody heartbeats it.
#[derive(Clone)]
pub struct RedisViewerStore {
    /// Connection manager for connection pooling and reconnects.
    conn_manager: ConnectionManager,
    ttl_seconds: i64,
}

impl RedisViewerStore {
    pub async fn connect(redis_url: &str, ttl: Duration) -> Result<Self, StoreError> {
        let client = Client::open(redis_url)
            .map_err(|e| StoreError::Connection(format!("failed to create Redis client: {e}")))?;

        let conn_manager = ConnectionManager::new(client).await.map_err(|e| {
            StoreError::Connection(format!("failed to create Redis connection manager: {e}"))
        })?;

        Ok(Self {
            conn_manager,
            ttl_seconds: ttl.as_secs() as i64,
        })
    }

    fn case_key(case_reference: &str) -> String {
        format!("case:viewer:{}", case_reference)
    }

    pub async fn insert(&self, case_reference: &str, record: &ViewerRecord) -> Result<(), StoreError> {
        let mut conn = self.conn_manager.clone();
        let key = Self::case_key(case_reference);

        let payload = serde_json::to_string(record)
            .map_err(|e| StoreError::Serialization(e.to_string()))?;

        // HSET and EXPIRE in one atomic pipeline so the TTL window is reset
        // on the same round trip as the write.
        let _: () = redis::pipe()
            .atomic()
            .hset(&key, &record.session_id, payload)
            .ignore()
            .expire(&key, self.ttl_seconds)
            .ignore()
            .query_async(&mut conn)
            .await
            .map_err(|e| StoreError::Command(format!("failed to store viewer record: {e}")))?;

        Ok(())
    }

    pub async fn remove(&self, case_reference: &str, session_id: &str) -> Result<(), StoreError> {
        let mut conn = self.conn_manager.clone();
        let key = Self::case_key(case_reference);

        // HDEL on a missing field is a no-op, which gives idempotent deletion.
        let _: () = conn
            .hdel(&key, session_id)
            .await
            .map_err(|e| StoreError::Command(format!("failed to remove viewer record: {e}")))?;

        Ok(())
    }

    pub async fn entries(&self, case_reference: &str) -> Result<Vec<ViewerRecord>, StoreError> {
        let mut conn = self.conn_manager.clone();
        let key = Self::case_key(case_reference);

        let fields: HashMap<String, String> = conn
            .hgetall(&key)
            .await
            .map_err(|e| StoreError::Command(format!("failed to list viewer records: {e}")))?;

        let mut records = Vec::with_capacity(fields.len());
        for (session_id, payload) in fields {
            match serde_json::from_str::<ViewerRecord>(&payload) {
                Ok(record) => records.push(record),
                Err(e) => {
                    warn!(
                        "Dropping unparseable viewer record for session {} on case {}: {}",
                        session_id, case_reference, e
                    );
                }
            }
        }

        Ok(records)
    }

    pub async fn touch(&self, case_reference: &str, session_id: &str) -> Result<bool, StoreError> {
        let mut conn = self.conn_manager.clone();
        let key = Self::case_key(case_reference);

        let exists: bool = conn
            .hexists(&key, session_id)
            .await
            .map_err(|e| StoreError::Command(format!("failed to check viewer record: {e}")))?;

        if !exists {
            return Ok(false);
        }

        let _: () = conn
            .expire(&key, self.ttl_seconds)
            .await
            .map_err(|e| StoreError::Command(format!("failed to refresh viewer TTL: {e}")))?;

        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Note: These tests require a running Redis instance
    // Run with: docker run -d -p 6379:6379 redis:7-alpine

    #[tokio::test]
    #[ignore] // Requires Redis running
    async fn viewer_record_lifecycle() {
        let store = RedisViewerStore::connect("redis://127.0.0.1:6379", Duration::from_secs(30))
            .await
            .unwrap();

        let case = "PC-TEST-LIFECYCLE";
        let record = ViewerRecord::new(case, "worker@justice.example", "sess-lifecycle");

        store.insert(case, &record).await.unwrap();

        let entries = store.entries(case).await.unwrap();
        assert!(entries.contains(&record));

        assert!(store.touch(case, "sess-lifecycle").await.unwrap());

        store.remove(case, "sess-lifecycle").await.unwrap();
        let entries = store.entries(case).await.unwrap();
        assert!(!entries.iter().any(|r| r.session_id == "sess-lifecycle"));

        // Second removal must not error
        store.remove(case, "sess-lifecycle").await.unwrap();

        assert!(!store.touch(case, "sess-lifecycle").await.unwrap());
    }

    #[tokio::test]
    #[ignore] // Requires Redis running
    async fn overwrite_keeps_one_record_per_session() {
        let store = RedisViewerStore::connect("redis://127.0.0.1:6379", Duration::from_secs(30))
            .await
            .unwrap();

        let case = "PC-TEST-OVERWRITE";
        let first = ViewerRecord::new(case, "worker@justice.example", "sess-dup");
        let second = ViewerRecord::new(case, "worker@justice.example", "sess-dup");

        store.insert(case, &first).await.unwrap();
        store.insert(case, &second).await.unwrap();

        let entries = store.entries(case).await.unwrap();
        let matching: Vec<_> = entries.iter().filter(|r| r.session_id == "sess-dup").collect();
        assert_eq!(matching.len(), 1);

        store.remove(case, "sess-dup").await.unwrap();
    }

    #[tokio::test]
    #[ignore] // Requires Redis running
    async fn record_expires_without_heartbeat() {
        let store = RedisViewerStore::connect("redis://127.0.0.1:6379", Duration::from_secs(1))
            .await
            .unwrap();

        let case = "PC-TEST-EXPIRY";
        let record = ViewerRecord::new(case, "worker@justice.example", "sess-expiry");
        store.insert(case, &record).await.unwrap();

        tokio::time::sleep(Duration::from_millis(1500)).await;

        let entries = store.entries(case).await.unwrap();
        assert!(entries.is_empty());
        assert!(!store.touch(case, "sess-expiry").await.unwrap());
    }
}
