use serde::{Deserialize, Serialize};

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct JoinCaseMessage {
    pub case_reference: String,
    pub session_id: String,
    pub user_id: String,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct HeartbeatMessage {
    pub case_reference: String,
    pub session_id: String,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct LeaveCaseMessage {
    pub case_reference: String,
    pub session_id: String,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct ViewersUpdatedMessage {
    pub case_reference: String,
    pub viewer_count: usize,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct ErrorMessage {
    pub message: String,
}

/// Messages emitted by the browser client over the presence socket.
#[derive(Serialize, Deserialize, Debug)]
#[serde(tag = "type")]
pub enum ClientMessage {
    #[serde(rename = "join-case")]
    JoinCase(JoinCaseMessage),
    #[serde(rename = "heartbeat")]
    Heartbeat(HeartbeatMessage),
    #[serde(rename = "leave-case")]
    LeaveCase(LeaveCaseMessage),
}

/// Messages sent back to connected clients.
#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(tag = "type")]
pub enum ServerMessage {
    #[serde(rename = "viewers-updated")]
    ViewersUpdated(ViewersUpdatedMessage),
    #[serde(rename = "heartbeat-ack")]
    HeartbeatAck,
    #[serde(rename = "error")]
    Error(ErrorMessage),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_join_case_payload() {
        let raw = r#"{"type":"join-case","caseReference":"PC-0001","sessionId":"sess-1","userId":"worker@justice.example"}"#;
        let msg: ClientMessage = serde_json::from_str(raw).unwrap();
        match msg {
            ClientMessage::JoinCase(join) => {
                assert_eq!(join.case_reference, "PC-0001");
                assert_eq!(join.session_id, "sess-1");
                assert_eq!(join.user_id, "worker@justice.example");
            }
            other => panic!("expected join-case, got {:?}", other),
        }
    }

    #[test]
    fn rejects_unknown_event_type() {
        let raw = r#"{"type":"teleport","caseReference":"PC-0001"}"#;
        assert!(serde_json::from_str::<ClientMessage>(raw).is_err());
    }

    #[test]
    fn rejects_missing_required_field() {
        let raw = r#"{"type":"heartbeat","caseReference":"PC-0001"}"#;
        assert!(serde_json::from_str::<ClientMessage>(raw).is_err());
    }

    #[test]
    fn serializes_viewers_updated_shape() {
        let msg = ServerMessage::ViewersUpdated(ViewersUpdatedMessage {
            case_reference: "PC-0001".to_string(),
            viewer_count: 2,
        });
        let json = serde_json::to_string(&msg).unwrap();
        assert_eq!(
            json,
            r#"{"type":"viewers-updated","caseReference":"PC-0001","viewerCount":2}"#
        );
    }

    #[test]
    fn serializes_heartbeat_ack_without_payload() {
        let json = serde_json::to_string(&ServerMessage::HeartbeatAck).unwrap();
        assert_eq!(json, r#"{"type":"heartbeat-ack"}"#);
    }
}
