//! Wire format for the signaling socket.
//!
//! Every text frame is one JSON envelope:
//!
//! ```json
//! {"type": "join-room", "data": {"roomId": "abc123", "username": "ana"}}
//! ```
//!
//! Payloads stay loosely typed (`serde_json::Value`) where the relay only
//! forwards them: SDP offers, ICE candidates and whiteboard strokes are
//! never interpreted.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::registry::Member;

pub const JOIN_ROOM: &str = "join-room";
pub const LEAVE_ROOM: &str = "leave-room";
pub const ROOM_USERS: &str = "room-users";
pub const USER_JOINED: &str = "user-joined";
pub const USER_LEFT: &str = "user-left";
pub const READY: &str = "ready";
pub const OFFER: &str = "offer";
pub const ANSWER: &str = "answer";
pub const ICE_CANDIDATE: &str = "ice-candidate";
pub const CHAT_MESSAGE: &str = "chat message";
pub const CAPTION: &str = "caption";
pub const WHITEBOARD_DRAW: &str = "whiteboard-draw";
pub const WHITEBOARD_STATE: &str = "whiteboard-state";
pub const WHITEBOARD_CLEAR: &str = "whiteboard-clear";
pub const ERROR: &str = "error";

/// One message on the socket, in either direction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(rename = "type")]
    pub event: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl Envelope {
    pub fn new(event: &str, data: Value) -> Self {
        Self {
            event: event.to_string(),
            data: Some(data),
        }
    }

    pub fn bare(event: &str) -> Self {
        Self {
            event: event.to_string(),
            data: None,
        }
    }

    pub fn room_users(members: &[Member]) -> Self {
        Self::new(ROOM_USERS, json!(members))
    }

    pub fn user_joined(member: &Member) -> Self {
        Self::new(USER_JOINED, json!(member))
    }

    pub fn user_left(member: &Member) -> Self {
        Self::new(USER_LEFT, json!(member))
    }

    pub fn ready() -> Self {
        Self::bare(READY)
    }

    pub fn error(message: &str, retry_after: Option<u64>) -> Self {
        let data = match retry_after {
            Some(secs) => json!({ "message": message, "retryAfter": secs }),
            None => json!({ "message": message }),
        };
        Self::new(ERROR, data)
    }

    /// Field lookup on the payload object.
    fn field(&self, key: &str) -> Option<&Value> {
        self.data.as_ref().and_then(|d| d.get(key))
    }

    fn str_field(&self, key: &str) -> Option<String> {
        self.field(key).and_then(Value::as_str).map(str::to_string)
    }
}

/// Which half of the session-description handshake a relay carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalKind {
    Offer,
    Answer,
    IceCandidate,
}

impl SignalKind {
    /// Event name, which is also the rate-limit kind.
    pub fn event(self) -> &'static str {
        match self {
            Self::Offer => OFFER,
            Self::Answer => ANSWER,
            Self::IceCandidate => ICE_CANDIDATE,
        }
    }

    /// Payload field holding the forwarded value.
    pub fn field(self) -> &'static str {
        match self {
            Self::Offer => "offer",
            Self::Answer => "answer",
            Self::IceCandidate => "candidate",
        }
    }
}

/// A client event after envelope decoding.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientEvent {
    /// `roomId` and `username` are kept raw; validation happens at join.
    JoinRoom {
        room_id: Option<Value>,
        username: Option<Value>,
    },
    LeaveRoom {
        room_id: Option<String>,
    },
    Signal {
        kind: SignalKind,
        payload: Option<Value>,
        target_id: Option<String>,
    },
    ChatMessage {
        message: Option<Value>,
    },
    /// Forwarded as received.
    Caption(Value),
    WhiteboardDraw {
        room: Option<String>,
        stroke: Option<Value>,
    },
    WhiteboardClear {
        room: Option<String>,
    },
}

impl ClientEvent {
    /// Decode an inbound envelope. Unknown events yield `None`.
    pub fn from_envelope(env: &Envelope) -> Option<Self> {
        let event = match env.event.as_str() {
            JOIN_ROOM => Self::JoinRoom {
                room_id: env.field("roomId").cloned(),
                username: env.field("username").cloned(),
            },
            LEAVE_ROOM => Self::LeaveRoom {
                room_id: env.str_field("roomId"),
            },
            OFFER => Self::signal(env, SignalKind::Offer),
            ANSWER => Self::signal(env, SignalKind::Answer),
            ICE_CANDIDATE => Self::signal(env, SignalKind::IceCandidate),
            CHAT_MESSAGE => Self::ChatMessage {
                message: env.field("message").cloned(),
            },
            CAPTION => Self::Caption(env.data.clone().unwrap_or(Value::Null)),
            WHITEBOARD_DRAW => Self::WhiteboardDraw {
                room: env.str_field("room"),
                stroke: env.field("drawData").filter(|v| !v.is_null()).cloned(),
            },
            WHITEBOARD_CLEAR => Self::WhiteboardClear {
                room: env.str_field("room"),
            },
            _ => return None,
        };
        Some(event)
    }

    fn signal(env: &Envelope, kind: SignalKind) -> Self {
        Self::Signal {
            kind,
            payload: env.field(kind.field()).cloned(),
            target_id: env.str_field("targetId"),
        }
    }

    /// Event name for logging.
    pub fn name(&self) -> &'static str {
        match self {
            Self::JoinRoom { .. } => JOIN_ROOM,
            Self::LeaveRoom { .. } => LEAVE_ROOM,
            Self::Signal { kind, .. } => kind.event(),
            Self::ChatMessage { .. } => CHAT_MESSAGE,
            Self::Caption(_) => CAPTION,
            Self::WhiteboardDraw { .. } => WHITEBOARD_DRAW,
            Self::WhiteboardClear { .. } => WHITEBOARD_CLEAR,
        }
    }
}
