//! Message vocabulary
//!
//! Inbound frames come from participants; outbound frames are produced by
//! the server. Both are internally tagged on `type`. Handshake payloads
//! (`offer`/`answer`/`candidate`) are opaque to the server and relayed
//! verbatim.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Opaque participant identifier
///
/// Allocated by the registry on connect, stable for the participant's
/// lifetime and never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ParticipantId(pub u64);

impl fmt::Display for ParticipantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Role of a participant in the fabric
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Connected but not yet registered
    Unregistered,
    /// The unique media source at the root of the tree
    Broadcaster,
    /// A receiver; may forward media to its children
    Listener,
}

impl Role {
    /// Human-readable name used in logs
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Unregistered => "unregistered",
            Role::Broadcaster => "broadcaster",
            Role::Listener => "listener",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A frame received from a participant
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum Inbound {
    /// Declare a role; triggers placement
    Register {
        role: Role,
        /// Accepted for compatibility; ids are server-allocated
        #[serde(default, rename = "customId")]
        custom_id: Option<String>,
    },

    /// Refresh the sender's liveness timestamp
    Heartbeat,

    /// Point-to-point handshake: session description offer
    Offer {
        target: ParticipantId,
        #[serde(default)]
        payload: Value,
    },

    /// Point-to-point handshake: session description answer
    Answer {
        target: ParticipantId,
        #[serde(default)]
        payload: Value,
    },

    /// Point-to-point handshake: ICE candidate
    Candidate {
        target: ParticipantId,
        #[serde(default)]
        payload: Value,
    },

    /// Broadcaster control message, fanned out to the whole fabric
    Cmd {
        #[serde(default)]
        payload: Value,
    },

    /// Broadcaster metadata, fanned out with the payload fields merged
    /// into the outbound envelope
    Metadata { payload: Map<String, Value> },

    /// Forwarded to the sender's direct children only
    RoomMessage {
        #[serde(default)]
        payload: Value,
    },
}

/// A frame sent by the server
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum Outbound {
    /// Broadcaster registration confirmed
    RegisteredAsBroadcaster { id: ParticipantId, label: String },

    /// Listener placement result; `parent` is null when orphaned
    RoomAssigned {
        label: String,
        parent: Option<ParticipantId>,
    },

    /// Sent to a parent so it initiates the media offer to the new child
    ListenerJoined {
        id: ParticipantId,
        child_label: String,
    },

    /// The listener has a new parent, or none (orphaned)
    Reassigned { new_parent: Option<ParticipantId> },

    /// Sent to a parent when one of its children disconnects
    ChildLeft { id: ParticipantId, label: String },

    /// Relayed handshake offer
    Offer { from: ParticipantId, payload: Value },

    /// Relayed handshake answer
    Answer { from: ParticipantId, payload: Value },

    /// Relayed ICE candidate
    Candidate { from: ParticipantId, payload: Value },

    /// Broadcaster control fan-out
    Cmd { cmd: Value },

    /// Broadcaster metadata fan-out; payload fields live directly in the
    /// envelope next to `type`
    Metadata {
        #[serde(flatten)]
        fields: Map<String, Value>,
    },

    /// Subtree message from a parent relay
    RoomMessage { from: ParticipantId, payload: Value },
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_register_broadcaster() {
        let frame = r#"{"type":"register","role":"broadcaster"}"#;
        let msg: Inbound = serde_json::from_str(frame).unwrap();

        match msg {
            Inbound::Register { role, custom_id } => {
                assert_eq!(role, Role::Broadcaster);
                assert!(custom_id.is_none());
            }
            other => panic!("unexpected message: {:?}", other),
        }
    }

    #[test]
    fn test_parse_register_with_custom_id() {
        let frame = r#"{"type":"register","role":"listener","customId":"abc"}"#;
        let msg: Inbound = serde_json::from_str(frame).unwrap();

        match msg {
            Inbound::Register { role, custom_id } => {
                assert_eq!(role, Role::Listener);
                assert_eq!(custom_id.as_deref(), Some("abc"));
            }
            other => panic!("unexpected message: {:?}", other),
        }
    }

    #[test]
    fn test_parse_heartbeat() {
        let msg: Inbound = serde_json::from_str(r#"{"type":"heartbeat"}"#).unwrap();
        assert!(matches!(msg, Inbound::Heartbeat));
    }

    #[test]
    fn test_parse_offer_with_target() {
        let frame = r#"{"type":"offer","target":7,"payload":{"sdp":"v=0"}}"#;
        let msg: Inbound = serde_json::from_str(frame).unwrap();

        match msg {
            Inbound::Offer { target, payload } => {
                assert_eq!(target, ParticipantId(7));
                assert_eq!(payload["sdp"], "v=0");
            }
            other => panic!("unexpected message: {:?}", other),
        }
    }

    #[test]
    fn test_parse_room_message_tag() {
        let frame = r#"{"type":"room-message","payload":"hello"}"#;
        let msg: Inbound = serde_json::from_str(frame).unwrap();
        assert!(matches!(msg, Inbound::RoomMessage { .. }));
    }

    #[test]
    fn test_unknown_type_is_an_error() {
        let result = serde_json::from_str::<Inbound>(r#"{"type":"teleport"}"#);
        assert!(result.is_err());
    }

    #[test]
    fn test_missing_type_is_an_error() {
        let result = serde_json::from_str::<Inbound>(r#"{"role":"listener"}"#);
        assert!(result.is_err());
    }

    #[test]
    fn test_serialize_room_assigned_orphan() {
        let msg = Outbound::RoomAssigned {
            label: "fm1234".to_string(),
            parent: None,
        };
        let value = serde_json::to_value(&msg).unwrap();

        assert_eq!(value["type"], "room-assigned");
        assert_eq!(value["label"], "fm1234");
        assert!(value["parent"].is_null());
    }

    #[test]
    fn test_serialize_listener_joined() {
        let msg = Outbound::ListenerJoined {
            id: ParticipantId(3),
            child_label: "fm99041".to_string(),
        };
        let value = serde_json::to_value(&msg).unwrap();

        assert_eq!(value["type"], "listener-joined");
        assert_eq!(value["id"], 3);
        assert_eq!(value["child_label"], "fm99041");
    }

    #[test]
    fn test_serialize_relayed_candidate() {
        let msg = Outbound::Candidate {
            from: ParticipantId(12),
            payload: json!({"candidate": "udp 1 ..."}),
        };
        let value = serde_json::to_value(&msg).unwrap();

        assert_eq!(value["type"], "candidate");
        assert_eq!(value["from"], 12);
        assert_eq!(value["payload"]["candidate"], "udp 1 ...");
    }

    #[test]
    fn test_serialize_metadata_merges_payload_fields() {
        let mut fields = Map::new();
        fields.insert("title".to_string(), json!("late night set"));
        fields.insert("bitrate".to_string(), json!(128));

        let value = serde_json::to_value(&Outbound::Metadata { fields }).unwrap();

        // Payload fields sit directly next to the tag, not nested.
        assert_eq!(value["type"], "metadata");
        assert_eq!(value["title"], "late night set");
        assert_eq!(value["bitrate"], 128);
        assert!(value.get("payload").is_none());
    }

    #[test]
    fn test_serialize_cmd_envelope() {
        let msg = Outbound::Cmd {
            cmd: json!({"action": "mute"}),
        };
        let value = serde_json::to_value(&msg).unwrap();

        assert_eq!(value["type"], "cmd");
        assert_eq!(value["cmd"]["action"], "mute");
    }
}
