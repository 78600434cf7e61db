use std::time::Duration;

use futures_util::StreamExt;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::models::{ServerMessage, ViewersUpdatedMessage};
use crate::relay::{CountUpdate, RelayError};
use crate::ws::rooms::CaseRooms;

/// Pub/sub channel shared by all presence instances.
pub const PRESENCE_CHANNEL: &str = "case:presence:updates";

const RECONNECT_BASE_DELAY: Duration = Duration::from_millis(500);
const RECONNECT_MAX_DELAY: Duration = Duration::from_secs(30);

/// Publishing half of the Redis relay. The subscribing half runs as a
/// standalone task, see [`spawn_subscriber`].
#[derive(Clone)]
pub struct RedisRelay {
    conn_manager: ConnectionManager,
}

impl RedisRelay {
    pub async fn connect(redis_url: &str) -> Result<Self, RelayError> {
        let client = Client::open(redis_url)
            .map_err(|e| RelayError::Connection(format!("failed to create Redis client: {e}")))?;

        let conn_manager = ConnectionManager::new(client).await.map_err(|e| {
            RelayError::Connection(format!("failed to create Redis connection manager: {e}"))
        })?;

        Ok(Self { conn_manager })
    }

    pub async fn publish(&self, update: &CountUpdate) -> Result<(), RelayError> {
        let payload = serde_json::to_string(update)
            .map_err(|e| RelayError::Publish(format!("failed to serialize update: {e}")))?;

        let mut conn = self.conn_manager.clone();
        let _: () = conn
            .publish(PRESENCE_CHANNEL, payload)
            .await
            .map_err(|e| RelayError::Publish(e.to_string()))?;

        Ok(())
    }
}

/// Run the relay subscription for the lifetime of the process.
///
/// Updates published by other instances are re-broadcast into the local
/// rooms; our own updates loop back too and are skipped by origin. The
/// subscription reconnects with capped exponential backoff and gives up
/// after `max_attempts` consecutive failures, at which point broadcasts
/// degrade to this instance only.
pub fn spawn_subscriber(
    client: Client,
    rooms: CaseRooms,
    instance_id: String,
    max_attempts: u32,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut attempts: u32 = 0;
        loop {
            match client.get_async_pubsub().await {
                Ok(mut pubsub) => match pubsub.subscribe(PRESENCE_CHANNEL).await {
                    Ok(()) => {
                        info!("Presence relay subscribed to {}", PRESENCE_CHANNEL);
                        attempts = 0;
                        let mut stream = pubsub.on_message();
                        while let Some(msg) = stream.next().await {
                            let payload: String = match msg.get_payload() {
                                Ok(payload) => payload,
                                Err(e) => {
                                    warn!("Unreadable relay payload: {}", e);
                                    continue;
                                }
                            };
                            let update: CountUpdate = match serde_json::from_str(&payload) {
                                Ok(update) => update,
                                Err(e) => {
                                    warn!("Malformed relay payload '{}': {}", payload, e);
                                    continue;
                                }
                            };
                            if update.origin == instance_id {
                                // Already broadcast locally when we published it
                                continue;
                            }
                            debug!(
                                "Relayed viewer count {} for case {} from instance {}",
                                update.viewer_count, update.case_reference, update.origin
                            );
                            let message = ServerMessage::ViewersUpdated(ViewersUpdatedMessage {
                                case_reference: update.case_reference.clone(),
                                viewer_count: update.viewer_count,
                            });
                            rooms.broadcast(&update.case_reference, message).await;
                        }
                        warn!("Presence relay subscription ended; reconnecting");
                    }
                    Err(e) => warn!("Failed to subscribe to presence channel: {}", e),
                },
                Err(e) => warn!("Failed to connect presence relay subscriber: {}", e),
            }

            attempts += 1;
            if attempts > max_attempts {
                warn!(
                    "Presence relay gave up after {} attempts; viewer counts will only reach connections on this instance",
                    max_attempts
                );
                return;
            }
            let delay = backoff_delay(attempts);
            debug!("Relay reconnect attempt {} in {:?}", attempts, delay);
            tokio::time::sleep(delay).await;
        }
    })
}

fn backoff_delay(attempt: u32) -> Duration {
    let factor = 2u32.saturating_pow(attempt.saturating_sub(1).min(16));
    RECONNECT_BASE_DELAY
        .saturating_mul(factor)
        .min(RECONNECT_MAX_DELAY)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_and_caps() {
        assert_eq!(backoff_delay(1), Duration::from_millis(500));
        assert_eq!(backoff_delay(2), Duration::from_secs(1));
        assert_eq!(backoff_delay(3), Duration::from_secs(2));
        assert_eq!(backoff_delay(7), Duration::from_secs(30));
        assert_eq!(backoff_delay(50), Duration::from_secs(30));
    }

    // Note: This test requires a running Redis instance
    // Run with: docker run -d -p 6379:6379 redis:7-alpine
    #[tokio::test]
    #[ignore] // Requires Redis running
    async fn published_update_reaches_subscribed_rooms() {
        let rooms = CaseRooms::new();
        let mut rx = rooms.subscribe("PC-RELAY-1").await;

        let client = Client::open("redis://127.0.0.1:6379").unwrap();
        let _task = spawn_subscriber(client, rooms.clone(), "inst-local".to_string(), 3);
        tokio::time::sleep(Duration::from_millis(200)).await;

        let relay = RedisRelay::connect("redis://127.0.0.1:6379").await.unwrap();
        relay
            .publish(&CountUpdate {
                case_reference: "PC-RELAY-1".to_string(),
                viewer_count: 4,
                origin: "inst-remote".to_string(),
            })
            .await
            .unwrap();

        let received = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .unwrap()
            .unwrap();
        match received {
            ServerMessage::ViewersUpdated(update) => {
                assert_eq!(update.case_reference, "PC-RELAY-1");
                assert_eq!(update.viewer_count, 4);
            }
            other => panic!("expected viewers-updated, got {:?}", other),
        }
    }
}
