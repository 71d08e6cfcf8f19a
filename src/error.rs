//! Relay error taxonomy.
//!
//! Every failure is handled where it is detected. Signaling failures are
//! either reported to the peer through an `error` event or dropped
//! silently; HTTP failures become a JSON `{error}` response.

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RelayError {
    /// Bad or missing room id, malformed payload.
    #[error("{0}")]
    InvalidInput(String),

    /// Room already holds the maximum number of members.
    #[error("Room {room} is full (max {capacity} users)")]
    RoomFull { room: String, capacity: usize },

    /// Per-event admission budget exhausted.
    #[error("Too many {kind} requests. Please wait {retry_after} seconds.")]
    RateLimited { kind: String, retry_after: u64 },

    /// Directed relay target is not connected.
    #[error("Peer {0} is not connected")]
    TargetUnreachable(String),

    /// Summary API or network failure.
    #[error("Upstream request failed: {0}")]
    Upstream(String),

    /// Feature not configured on this server.
    #[error("{0}")]
    Unavailable(String),
}

impl RelayError {
    pub fn invalid(msg: impl Into<String>) -> Self {
        Self::InvalidInput(msg.into())
    }

    /// Seconds the client should wait before retrying, if any.
    pub fn retry_after(&self) -> Option<u64> {
        match self {
            Self::RateLimited { retry_after, .. } => Some(*retry_after),
            _ => None,
        }
    }

    /// Whether the peer is told about this failure. Unreachable targets
    /// are dropped silently; staleness surfaces through `user-left`.
    pub fn is_reported(&self) -> bool {
        !matches!(self, Self::TargetUnreachable(_))
    }
}

pub type Result<T> = std::result::Result<T, RelayError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rate_limited_carries_retry_hint() {
        let err = RelayError::RateLimited {
            kind: "chat-message".into(),
            retry_after: 7,
        };
        assert_eq!(err.retry_after(), Some(7));
        assert!(err.to_string().contains("7 seconds"));
    }

    #[test]
    fn room_full_message_names_capacity() {
        let err = RelayError::RoomFull {
            room: "abc".into(),
            capacity: 4,
        };
        assert_eq!(err.to_string(), "Room abc is full (max 4 users)");
        assert_eq!(err.retry_after(), None);
    }

    #[test]
    fn unreachable_target_is_silent() {
        assert!(!RelayError::TargetUnreachable("x".into()).is_reported());
        assert!(RelayError::invalid("Invalid room ID").is_reported());
    }
}
