//! In-memory room table.
//!
//! A room is created on its first join and destroyed, whiteboard included,
//! when its last member leaves. All mutations go through one mutex so a
//! join's capacity check and its insert are a single step.

use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};

use serde::Serialize;
use serde_json::Value;
use tracing::info;

use crate::error::{RelayError, Result};

pub const MAX_USERS_PER_ROOM: usize = 4;
pub const MAX_WHITEBOARD_STROKES: usize = 5000;
pub const MAX_ROOM_ID_LEN: usize = 20;
pub const MAX_USERNAME_LEN: usize = 50;

/// A connection's membership in a room.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Member {
    pub id: String,
    pub username: String,
}

/// Result of a successful join.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JoinOutcome {
    /// The joiner as stored, with its sanitized name
    pub member: Member,
    /// Members that were already in the room, in join order
    pub others: Vec<Member>,
    pub is_new_room: bool,
    /// Member count including the joiner
    pub room_size: usize,
    /// The connection was already a member; nothing changed
    pub rejoined: bool,
    /// Departure from the previous room, when the join moved rooms
    pub left: Option<LeaveOutcome>,
}

/// Result of removing a member.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeaveOutcome {
    pub room: String,
    pub member: Member,
    pub remaining: Vec<Member>,
    pub room_closed: bool,
}

#[derive(Debug, Default)]
struct Room {
    members: Vec<Member>,
    whiteboard: VecDeque<Value>,
}

impl Room {
    fn position(&self, conn_id: &str) -> Option<usize> {
        self.members.iter().position(|m| m.id == conn_id)
    }
}

/// Validate a room id: a non-empty string of at most 20 characters.
pub fn validate_room_id(raw: Option<&Value>) -> Result<&str> {
    let id = raw
        .and_then(Value::as_str)
        .ok_or_else(|| RelayError::invalid("Invalid room ID"))?;
    check_room_id(id)?;
    Ok(id)
}

fn check_room_id(id: &str) -> Result<()> {
    if id.is_empty() || id.chars().count() > MAX_ROOM_ID_LEN {
        return Err(RelayError::invalid("Invalid room ID"));
    }
    Ok(())
}

/// Trim and truncate a display name, or derive `User-<shortId>` when the
/// name is absent, blank or not a string.
pub fn sanitize_username(raw: Option<&Value>, conn_id: &str) -> String {
    match raw.and_then(Value::as_str).map(str::trim) {
        Some(name) if !name.is_empty() => name.chars().take(MAX_USERNAME_LEN).collect(),
        _ => placeholder_username(conn_id),
    }
}

fn placeholder_username(conn_id: &str) -> String {
    let short: String = conn_id.chars().filter(|c| *c != '-').take(6).collect();
    format!("User-{short}")
}

fn remove_member(rooms: &mut HashMap<String, Room>, room_id: &str, conn_id: &str) -> Option<LeaveOutcome> {
    let room = rooms.get_mut(room_id)?;
    let idx = room.position(conn_id)?;
    let member = room.members.remove(idx);
    let remaining = room.members.clone();
    let room_closed = remaining.is_empty();

    if room_closed {
        rooms.remove(room_id);
        info!(room = %room_id, "Room closed");
    }

    Some(LeaveOutcome {
        room: room_id.to_string(),
        member,
        remaining,
        room_closed,
    })
}

#[derive(Debug)]
pub struct RoomRegistry {
    rooms: Mutex<HashMap<String, Room>>,
    max_users: usize,
    max_strokes: usize,
}

impl Default for RoomRegistry {
    fn default() -> Self {
        Self::new(MAX_USERS_PER_ROOM, MAX_WHITEBOARD_STROKES)
    }
}

impl RoomRegistry {
    pub fn new(max_users: usize, max_strokes: usize) -> Self {
        Self {
            rooms: Mutex::new(HashMap::new()),
            max_users,
            max_strokes,
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Room>> {
        // A panicked holder cannot leave a room half-mutated: the
        // mutations below are plain push/remove steps that never panic.
        self.rooms.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Add `conn_id` to `room_id`, creating the room if needed.
    ///
    /// Re-joining a room the connection is already in is not an error; the
    /// membership is left unchanged.
    pub fn join(&self, room_id: &str, conn_id: &str, username: Option<&Value>) -> Result<JoinOutcome> {
        self.join_from(None, room_id, conn_id, username)
    }

    /// Like [`join`](Self::join), but also moves the connection out of
    /// `previous` once the target room has accepted it. A rejected join
    /// leaves the previous membership untouched.
    pub fn join_from(
        &self,
        previous: Option<&str>,
        room_id: &str,
        conn_id: &str,
        username: Option<&Value>,
    ) -> Result<JoinOutcome> {
        check_room_id(room_id)?;
        let username = sanitize_username(username, conn_id);

        let mut rooms = self.lock();
        if let Some(room) = rooms.get(room_id) {
            if let Some(idx) = room.position(conn_id) {
                return Ok(JoinOutcome {
                    member: room.members[idx].clone(),
                    others: room.members.iter().filter(|m| m.id != conn_id).cloned().collect(),
                    is_new_room: false,
                    room_size: room.members.len(),
                    rejoined: true,
                    left: None,
                });
            }
            if room.members.len() >= self.max_users {
                return Err(RelayError::RoomFull {
                    room: room_id.to_string(),
                    capacity: self.max_users,
                });
            }
        } else if self.max_users == 0 {
            return Err(RelayError::RoomFull {
                room: room_id.to_string(),
                capacity: 0,
            });
        }

        let left = previous
            .filter(|prev| *prev != room_id)
            .and_then(|prev| remove_member(&mut rooms, prev, conn_id));

        let is_new_room = !rooms.contains_key(room_id);
        let room = rooms.entry(room_id.to_string()).or_default();
        let others = room.members.clone();
        let member = Member {
            id: conn_id.to_string(),
            username,
        };
        room.members.push(member.clone());
        let room_size = room.members.len();

        if is_new_room {
            info!(room = %room_id, "Room created");
        }

        Ok(JoinOutcome {
            member,
            others,
            is_new_room,
            room_size,
            rejoined: false,
            left,
        })
    }

    /// Remove `conn_id` from `room_id`. Returns `None` when it was not a
    /// member, so repeated leaves are harmless.
    pub fn leave(&self, room_id: &str, conn_id: &str) -> Option<LeaveOutcome> {
        remove_member(&mut self.lock(), room_id, conn_id)
    }

    /// Current members in join order; empty for unknown rooms.
    pub fn members(&self, room_id: &str) -> Vec<Member> {
        self.lock()
            .get(room_id)
            .map(|room| room.members.clone())
            .unwrap_or_default()
    }

    /// Member ids, optionally without `exclude`. Read at call time so a
    /// multicast always sees the live list.
    pub fn member_ids(&self, room_id: &str, exclude: Option<&str>) -> Vec<String> {
        self.lock()
            .get(room_id)
            .map(|room| {
                room.members
                    .iter()
                    .filter(|m| Some(m.id.as_str()) != exclude)
                    .map(|m| m.id.clone())
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn is_member(&self, room_id: &str, conn_id: &str) -> bool {
        self.lock()
            .get(room_id)
            .is_some_and(|room| room.position(conn_id).is_some())
    }

    pub fn whiteboard_state(&self, room_id: &str) -> Vec<Value> {
        self.lock()
            .get(room_id)
            .map(|room| room.whiteboard.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Append a stroke, dropping the oldest ones past the cap. Returns
    /// `false` if the room does not exist.
    pub fn append_stroke(&self, room_id: &str, stroke: Value) -> bool {
        let mut rooms = self.lock();
        let Some(room) = rooms.get_mut(room_id) else {
            return false;
        };
        room.whiteboard.push_back(stroke);
        while room.whiteboard.len() > self.max_strokes {
            room.whiteboard.pop_front();
        }
        true
    }

    pub fn clear_whiteboard(&self, room_id: &str) -> bool {
        match self.lock().get_mut(room_id) {
            Some(room) => {
                room.whiteboard.clear();
                true
            }
            None => false,
        }
    }

    pub fn room_count(&self) -> usize {
        self.lock().len()
    }

    pub fn contains_room(&self, room_id: &str) -> bool {
        self.lock().contains_key(room_id)
    }
}
