pub mod redis_relay;

use redis_relay::RedisRelay;
use serde::{Deserialize, Serialize};
use tracing::warn;

/// A viewer-count change published to every server instance.
///
/// `origin` identifies the publishing process so an instance can skip its
/// own messages when they loop back through the relay.
#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct CountUpdate {
    pub case_reference: String,
    pub viewer_count: usize,
    pub origin: String,
}

#[derive(Debug)]
pub enum RelayError {
    Connection(String),
    Publish(String),
}

impl std::fmt::Display for RelayError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RelayError::Connection(msg) => write!(f, "relay connection error: {}", msg),
            RelayError::Publish(msg) => write!(f, "relay publish error: {}", msg),
        }
    }
}

impl std::error::Error for RelayError {}

/// Cross-instance fan-out for viewer-count broadcasts.
///
/// `Local` is the single-instance mode: local room broadcasts already reach
/// every connection on this process, so publish is a no-op. `Redis` carries
/// updates over pub/sub so broadcasts reach sockets on other instances.
#[derive(Clone)]
pub enum PresenceRelay {
    Local,
    Redis(RedisRelay),
}

impl PresenceRelay {
    /// Publish a count update to the other instances. Failures are logged
    /// and swallowed; a missed relay publish degrades presence accuracy for
    /// remote viewers, nothing more.
    pub async fn publish(&self, update: &CountUpdate) {
        match self {
            PresenceRelay::Local => {}
            PresenceRelay::Redis(relay) => {
                if let Err(e) = relay.publish(update).await {
                    warn!(
                        "Failed to publish presence update for case {}: {}",
                        update.case_reference, e
                    );
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn local_relay_publish_is_a_noop() {
        let relay = PresenceRelay::Local;
        relay
            .publish(&CountUpdate {
                case_reference: "PC-0001".to_string(),
                viewer_count: 1,
                origin: "test".to_string(),
            })
            .await;
    }

    #[test]
    fn count_update_round_trips_as_camel_case_json() {
        let update = CountUpdate {
            case_reference: "PC-0001".to_string(),
            viewer_count: 3,
            origin: "inst-1".to_string(),
        };
        let json = serde_json::to_string(&update).unwrap();
        assert_eq!(
            json,
            r#"{"caseReference":"PC-0001","viewerCount":3,"origin":"inst-1"}"#
        );
        let parsed: CountUpdate = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.case_reference, update.case_reference);
        assert_eq!(parsed.viewer_count, update.viewer_count);
    }
}
