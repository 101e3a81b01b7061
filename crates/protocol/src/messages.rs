use serde::{Deserialize, Serialize};

use crate::frame::Detection;

/// Which side of a room a peer occupies.
///
/// Wire vocabulary note: the original client/server pair called these
/// `phone` and `browser`; this system keeps that vocabulary on the wire
/// (so existing capture/viewer clients need no changes) while naming the
/// roles for what they do everywhere else.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Role {
    #[serde(rename = "phone")]
    Capture,
    #[serde(rename = "browser")]
    Viewer,
}

impl Role {
    pub fn other(self) -> Role {
        match self {
            Role::Capture => Role::Viewer,
            Role::Viewer => Role::Capture,
        }
    }
}

/// Signaling messages exchanged over the bidirectional control connection.
///
/// Dispatched by `event` (the original's socket.io event name); the broker
/// never inspects the opaque `offer`/`answer`/`candidate` payloads beyond
/// forwarding them with `from` attached.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "kebab-case")]
pub enum SignalingMessage {
    /// client -> broker: register role in room
    JoinRoom {
        room: String,
        #[serde(rename = "type")]
        role: Role,
    },
    /// broker -> client: opposite role now present (also sent to the
    /// newcomer for a pre-existing occupant before any SDP/ICE relay)
    PeerJoined {
        #[serde(rename = "peerId")]
        peer_id: String,
        #[serde(rename = "type")]
        role: Role,
    },
    /// broker -> client: opposite role departed
    PeerLeft {
        #[serde(rename = "peerId")]
        peer_id: String,
        #[serde(rename = "type")]
        role: Role,
    },
    /// client -> broker -> other peer(s) in room, `from` added by the broker
    Offer {
        room: String,
        offer: serde_json::Value,
        #[serde(skip_serializing_if = "Option::is_none")]
        from: Option<String>,
    },
    /// client -> broker -> other peer(s) in room, `from` added by the broker
    Answer {
        room: String,
        answer: serde_json::Value,
        #[serde(skip_serializing_if = "Option::is_none")]
        from: Option<String>,
    },
    /// client -> broker -> other peer(s) in room, `from` added by the broker
    IceCandidate {
        room: String,
        candidate: serde_json::Value,
        #[serde(skip_serializing_if = "Option::is_none")]
        from: Option<String>,
    },
    /// broker/viewer -> engine: frame-inference request (offload mode)
    ProcessFrame {
        room: String,
        frame_id: String,
        capture_ts: u64,
        width: u32,
        height: u32,
        #[serde(rename = "imageData")]
        image_data: String,
    },
    /// engine -> broker -> viewer: inference result
    DetectionResult {
        frame_id: String,
        capture_ts: u64,
        recv_ts: u64,
        inference_ts: u64,
        detections: Vec<Detection>,
    },
    /// engine -> originator: non-fatal per-frame failure
    ProcessingError { error: String },
    /// client -> broker: lazy-load request
    InitializeServerModel { room: String },
    /// broker -> client: lazy-load outcome
    ModelInitializationResult {
        success: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        message: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<String>,
        #[serde(rename = "loadTime", skip_serializing_if = "Option::is_none")]
        load_time_ms: Option<u64>,
        room: String,
    },
}

impl SignalingMessage {
    /// Room this message concerns, if any (used by the broker to route
    /// without matching on every variant at every call site).
    pub fn room(&self) -> Option<&str> {
        match self {
            SignalingMessage::JoinRoom { room, .. }
            | SignalingMessage::Offer { room, .. }
            | SignalingMessage::Answer { room, .. }
            | SignalingMessage::IceCandidate { room, .. }
            | SignalingMessage::ProcessFrame { room, .. }
            | SignalingMessage::InitializeServerModel { room, .. }
            | SignalingMessage::ModelInitializationResult { room, .. } => Some(room),
            SignalingMessage::PeerJoined { .. }
            | SignalingMessage::PeerLeft { .. }
            | SignalingMessage::DetectionResult { .. }
            | SignalingMessage::ProcessingError { .. } => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn join_room_uses_phone_browser_vocabulary() {
        let msg = SignalingMessage::JoinRoom {
            room: "abc".to_string(),
            role: Role::Capture,
        };
        let json = serde_json::to_string(&msg).unwrap();
        assert!(json.contains(r#""event":"join-room""#));
        assert!(json.contains(r#""type":"phone""#));
    }

    #[test]
    fn peer_joined_roundtrip() {
        let msg = SignalingMessage::PeerJoined {
            peer_id: "p1".to_string(),
            role: Role::Viewer,
        };
        let json = serde_json::to_string(&msg).unwrap();
        assert!(json.contains(r#""event":"peer-joined""#));
        assert!(json.contains(r#""peerId":"p1""#));
        let parsed: SignalingMessage = serde_json::from_str(&json).unwrap();
        match parsed {
            SignalingMessage::PeerJoined { peer_id, role } => {
                assert_eq!(peer_id, "p1");
                assert_eq!(role, Role::Viewer);
            }
            _ => panic!("expected PeerJoined"),
        }
    }

    #[test]
    fn ice_candidate_event_name_is_kebab_case() {
        let msg = SignalingMessage::IceCandidate {
            room: "abc".to_string(),
            candidate: serde_json::json!({"candidate": "candidate:1 1 UDP"}),
            from: Some("p1".to_string()),
        };
        let json = serde_json::to_string(&msg).unwrap();
        assert!(json.contains(r#""event":"ice-candidate""#));
        assert!(!json.contains("ice_candidate"));
    }

    #[test]
    fn process_frame_uses_image_data_camel_case() {
        let msg = SignalingMessage::ProcessFrame {
            room: "abc".to_string(),
            frame_id: "f1".to_string(),
            capture_ts: 1000,
            width: 640,
            height: 640,
            image_data: "data:image/jpeg;base64,AAAA".to_string(),
        };
        let json = serde_json::to_string(&msg).unwrap();
        assert!(json.contains(r#""imageData""#));
        assert!(json.contains(r#""frame_id":"f1""#));
        let parsed: SignalingMessage = serde_json::from_str(&json).unwrap();
        assert!(matches!(parsed, SignalingMessage::ProcessFrame { .. }));
    }

    #[test]
    fn model_initialization_result_uses_load_time_camel_case() {
        let msg = SignalingMessage::ModelInitializationResult {
            success: true,
            message: Some("loaded".to_string()),
            error: None,
            load_time_ms: Some(1234),
            room: "abc".to_string(),
        };
        let json = serde_json::to_string(&msg).unwrap();
        assert!(json.contains(r#""loadTime":1234"#));
        assert!(!json.contains("error"));
    }

    #[test]
    fn role_other_is_complementary() {
        assert_eq!(Role::Capture.other(), Role::Viewer);
        assert_eq!(Role::Viewer.other(), Role::Capture);
    }

    #[test]
    fn message_room_extracts_for_routable_variants() {
        let msg = SignalingMessage::Offer {
            room: "xyz".to_string(),
            offer: serde_json::json!({}),
            from: None,
        };
        assert_eq!(msg.room(), Some("xyz"));

        let result = SignalingMessage::ProcessingError {
            error: "bad".to_string(),
        };
        assert_eq!(result.room(), None);
    }
}
