//! Signaling router: dispatches client events, applies admission control,
//! mutates the room registry and relays to peers.
//!
//! Handlers are synchronous and short. Outbound messages go onto each
//! connection's unbounded queue, so a slow peer never stalls the sender.
//! Delivery is best effort: a message for a connection that is gone is
//! dropped, and the peer learns about it from `user-left`.

use std::sync::Arc;

use chrono::Utc;
use dashmap::DashMap;
use serde_json::{json, Map, Value};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{RelayError, Result};
use crate::protocol::{self, ClientEvent, Envelope, SignalKind};
use crate::rate_limit::{Admission, RateLimiter};
use crate::registry::{self, LeaveOutcome, RoomRegistry};
use crate::session::ConnectionSession;

/// Sending half of a connection's outbound queue.
pub type Outbound = mpsc::UnboundedSender<Envelope>;

pub const MAX_CHAT_MESSAGE_LEN: usize = 1000;

/// Rate-limit kind for an event, when it is limited at all.
fn limit_kind(event: &ClientEvent) -> Option<&'static str> {
    match event {
        ClientEvent::JoinRoom { .. } => Some("join-room"),
        ClientEvent::Signal { kind, .. } => Some(kind.event()),
        ClientEvent::ChatMessage { .. } => Some("chat-message"),
        ClientEvent::Caption(_) => Some("caption"),
        ClientEvent::WhiteboardDraw { .. } => Some("whiteboard-draw"),
        // Unlimited.
        ClientEvent::LeaveRoom { .. } | ClientEvent::WhiteboardClear { .. } => None,
    }
}

/// Snapshot of router occupancy.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RouterStats {
    pub rooms: usize,
    pub connections: usize,
}

/// Handle to the signaling router. Cheap to clone.
#[derive(Clone)]
pub struct SignalingRouter {
    inner: Arc<RouterInner>,
}

struct RouterInner {
    registry: RoomRegistry,
    limiter: RateLimiter,
    /// Live connections by id
    connections: DashMap<String, Outbound>,
}

impl SignalingRouter {
    pub fn new(registry: RoomRegistry, limiter: RateLimiter) -> Self {
        Self {
            inner: Arc::new(RouterInner {
                registry,
                limiter,
                connections: DashMap::new(),
            }),
        }
    }

    pub fn registry(&self) -> &RoomRegistry {
        &self.inner.registry
    }

    pub fn limiter(&self) -> &RateLimiter {
        &self.inner.limiter
    }

    pub fn stats(&self) -> RouterStats {
        RouterStats {
            rooms: self.inner.registry.room_count(),
            connections: self.inner.connections.len(),
        }
    }

    /// Register a new connection and return its session.
    pub fn connect(&self, tx: Outbound) -> ConnectionSession {
        let id = Uuid::new_v4().to_string();
        self.inner.connections.insert(id.clone(), tx);
        info!(conn = %id, "Connection opened");
        ConnectionSession::new(id)
    }

    /// Decode and handle one inbound envelope. Unknown events are ignored.
    pub fn handle_envelope(&self, session: &mut ConnectionSession, envelope: &Envelope) {
        match ClientEvent::from_envelope(envelope) {
            Some(event) => self.handle(session, event),
            None => debug!(conn = %session.id(), event = %envelope.event, "Ignoring unknown event"),
        }
    }

    /// Handle one client event. Failures are reported to the sender or
    /// dropped here; nothing propagates to the transport.
    pub fn handle(&self, session: &mut ConnectionSession, event: ClientEvent) {
        if session.is_closed() {
            return;
        }

        if let Some(kind) = limit_kind(&event) {
            if let Admission::Denied { retry_after, log } = self.inner.limiter.admit(kind, session.id()) {
                if log {
                    warn!(conn = %session.id(), event = kind, retry_after, "Rate limit exceeded");
                }
                self.report(
                    session,
                    &RelayError::RateLimited {
                        kind: kind.to_string(),
                        retry_after,
                    },
                );
                return;
            }
        }

        let name = event.name();
        let result = match event {
            ClientEvent::JoinRoom { room_id, username } => {
                self.join(session, room_id.as_ref(), username.as_ref())
            }
            ClientEvent::LeaveRoom { .. } => {
                self.leave(session);
                Ok(())
            }
            ClientEvent::Signal {
                kind,
                payload,
                target_id,
            } => self.relay_signal(session, kind, payload, target_id),
            ClientEvent::ChatMessage { message } => self.chat(session, message),
            ClientEvent::Caption(payload) => self.caption(session, payload),
            ClientEvent::WhiteboardDraw { room, stroke } => self.draw(session, room, stroke),
            ClientEvent::WhiteboardClear { room } => self.clear(session, room),
        };

        if let Err(err) = result {
            debug!(conn = %session.id(), event = name, error = %err, "Event rejected");
            // Only join failures are surfaced; other bad input is dropped.
            if name == protocol::JOIN_ROOM {
                self.report(session, &err);
            }
        }
    }

    /// Tear down a connection. Safe to call more than once.
    pub fn disconnect(&self, session: &mut ConnectionSession) {
        if session.is_closed() {
            return;
        }
        self.leave(session);
        session.close();
        self.inner.connections.remove(session.id());
        self.inner.limiter.forget(session.id());
        info!(conn = %session.id(), "Connection closed");
    }

    fn join(
        &self,
        session: &mut ConnectionSession,
        room_id: Option<&Value>,
        username: Option<&Value>,
    ) -> Result<()> {
        let room_id = registry::validate_room_id(room_id)?;

        // One room per connection: the registry moves the connection out of
        // its current room only once the new one has accepted the join.
        let outcome = self
            .inner
            .registry
            .join_from(session.room(), room_id, session.id(), username)?;
        if let Some(left) = &outcome.left {
            self.announce_departure(session.id(), left);
        }
        session.enter(room_id, &outcome.member.username);

        self.send(session.id(), Envelope::room_users(&outcome.others));

        let strokes = self.inner.registry.whiteboard_state(room_id);
        if !strokes.is_empty() {
            self.send(session.id(), Envelope::new(protocol::WHITEBOARD_STATE, json!(strokes)));
        }

        if outcome.rejoined {
            debug!(conn = %session.id(), room = %room_id, "Rejoined room");
            return Ok(());
        }
        info!(
            conn = %session.id(),
            room = %room_id,
            username = %outcome.member.username,
            size = outcome.room_size,
            "Joined room"
        );

        self.multicast(room_id, Some(session.id()), &Envelope::user_joined(&outcome.member));

        // Fires on every join that leaves two or more members, not only on
        // the 1 -> 2 edge.
        if outcome.room_size >= 2 {
            self.multicast(room_id, None, &Envelope::ready());
        }
        Ok(())
    }

    fn leave(&self, session: &mut ConnectionSession) {
        let Some(room_id) = session.exit() else {
            return;
        };
        if let Some(outcome) = self.inner.registry.leave(&room_id, session.id()) {
            self.announce_departure(session.id(), &outcome);
        }
    }

    fn announce_departure(&self, conn_id: &str, outcome: &LeaveOutcome) {
        info!(
            conn = %conn_id,
            room = %outcome.room,
            remaining = outcome.remaining.len(),
            "Left room"
        );
        if !outcome.room_closed {
            self.multicast(&outcome.room, None, &Envelope::user_left(&outcome.member));
        }
    }

    fn relay_signal(
        &self,
        session: &ConnectionSession,
        kind: SignalKind,
        payload: Option<Value>,
        target_id: Option<String>,
    ) -> Result<()> {
        let room = session.room().ok_or_else(|| RelayError::invalid("Not in a room"))?;
        let payload = payload.ok_or_else(|| RelayError::invalid("Missing signal payload"))?;
        let target = target_id.ok_or_else(|| RelayError::invalid("Missing targetId"))?;
        if !self.inner.registry.is_member(room, &target) {
            return Err(RelayError::TargetUnreachable(target));
        }

        let mut data = Map::new();
        data.insert(kind.field().to_string(), payload);
        data.insert("senderId".to_string(), json!(session.id()));
        if kind == SignalKind::Offer {
            data.insert("senderName".to_string(), json!(session.username()));
        }

        if !self.send(&target, Envelope::new(kind.event(), Value::Object(data))) {
            return Err(RelayError::TargetUnreachable(target));
        }
        debug!(conn = %session.id(), target = %target, event = kind.event(), "Relayed signal");
        Ok(())
    }

    fn chat(&self, session: &ConnectionSession, message: Option<Value>) -> Result<()> {
        let room = session.room().ok_or_else(|| RelayError::invalid("Not in a room"))?;
        let text = message
            .as_ref()
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|m| !m.is_empty())
            .ok_or_else(|| RelayError::invalid("Empty chat message"))?;
        let text: String = text.chars().take(MAX_CHAT_MESSAGE_LEN).collect();

        let data = json!({
            "message": text,
            "sender": session.username(),
            "senderId": session.id(),
            "timestamp": Utc::now().timestamp_millis(),
        });
        self.multicast(room, Some(session.id()), &Envelope::new(protocol::CHAT_MESSAGE, data));
        Ok(())
    }

    fn caption(&self, session: &ConnectionSession, payload: Value) -> Result<()> {
        let room = session.room().ok_or_else(|| RelayError::invalid("Not in a room"))?;
        let has_text = payload
            .get("caption")
            .and_then(Value::as_str)
            .is_some_and(|c| !c.trim().is_empty());
        if !has_text {
            return Err(RelayError::invalid("Empty caption"));
        }
        self.multicast(room, Some(session.id()), &Envelope::new(protocol::CAPTION, payload));
        Ok(())
    }

    fn draw(&self, session: &ConnectionSession, room: Option<String>, stroke: Option<Value>) -> Result<()> {
        let room = self.own_room(session, room)?;
        let stroke = stroke.ok_or_else(|| RelayError::invalid("Missing drawData"))?;
        self.inner.registry.append_stroke(room, stroke.clone());
        self.multicast(room, Some(session.id()), &Envelope::new(protocol::WHITEBOARD_DRAW, stroke));
        Ok(())
    }

    fn clear(&self, session: &ConnectionSession, room: Option<String>) -> Result<()> {
        let room = self.own_room(session, room)?;
        self.inner.registry.clear_whiteboard(room);
        self.multicast(
            room,
            Some(session.id()),
            &Envelope::new(protocol::WHITEBOARD_CLEAR, json!({ "room": room })),
        );
        Ok(())
    }

    /// The sender's room, provided the payload names that same room.
    fn own_room<'s>(&self, session: &'s ConnectionSession, named: Option<String>) -> Result<&'s str> {
        match (session.room(), named) {
            (Some(current), Some(named)) if current == named => Ok(current),
            _ => Err(RelayError::invalid("Room mismatch")),
        }
    }

    fn report(&self, session: &ConnectionSession, err: &RelayError) {
        if err.is_reported() {
            self.send(session.id(), Envelope::error(&err.to_string(), err.retry_after()));
        }
    }

    /// Unicast. Returns `false` if the connection is not live.
    fn send(&self, conn_id: &str, envelope: Envelope) -> bool {
        match self.inner.connections.get(conn_id) {
            Some(tx) => tx.send(envelope).is_ok(),
            None => false,
        }
    }

    /// Deliver to every current member of `room_id` except `exclude`.
    fn multicast(&self, room_id: &str, exclude: Option<&str>, envelope: &Envelope) {
        for id in self.inner.registry.member_ids(room_id, exclude) {
            self.send(&id, envelope.clone());
        }
    }
}
