//! Per-connection state.

/// Where a connection is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Connected, not in a room
    Connected,
    InRoom,
    /// Transport gone; terminal
    Closed,
}

/// State the router keeps for one live connection.
///
/// Owned by the connection's task and handed to the router by `&mut` for
/// every event, so it never needs a lock.
#[derive(Debug)]
pub struct ConnectionSession {
    id: String,
    room: Option<String>,
    username: Option<String>,
    state: SessionState,
}

impl ConnectionSession {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            room: None,
            username: None,
            state: SessionState::Connected,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn room(&self) -> Option<&str> {
        self.room.as_deref()
    }

    pub fn username(&self) -> Option<&str> {
        self.username.as_deref()
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn is_closed(&self) -> bool {
        self.state == SessionState::Closed
    }

    pub(crate) fn enter(&mut self, room: &str, username: &str) {
        self.room = Some(room.to_string());
        self.username = Some(username.to_string());
        self.state = SessionState::InRoom;
    }

    /// Clear room and username, returning the room that was left.
    pub(crate) fn exit(&mut self) -> Option<String> {
        self.username = None;
        if self.state == SessionState::InRoom {
            self.state = SessionState::Connected;
        }
        self.room.take()
    }

    pub(crate) fn close(&mut self) {
        self.room = None;
        self.username = None;
        self.state = SessionState::Closed;
    }
}
