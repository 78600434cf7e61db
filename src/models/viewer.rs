use chrono::Utc;
use serde::{Deserialize, Serialize};

/// A stored assertion that a given session is currently viewing a given case.
///
/// `session_id` is the uniqueness key within a case's viewer set; `user_id`
/// is carried for display/audit only. `joined_at` is informational, since
/// expiry is TTL-driven, not age-driven.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ViewerRecord {
    pub case_reference: String,
    pub session_id: String,
    pub user_id: String,
    /// Milliseconds since epoch, captured at creation.
    pub joined_at: i64,
}

impl ViewerRecord {
    pub fn new(case_reference: &str, user_id: &str, session_id: &str) -> Self {
        Self {
            case_reference: case_reference.to_string(),
            session_id: session_id.to_string(),
            user_id: user_id.to_string(),
            joined_at: Utc::now().timestamp_millis(),
        }
    }
}
