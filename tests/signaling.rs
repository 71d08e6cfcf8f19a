//! End-to-end signaling flows through the router, with channel-backed
//! connections standing in for WebSockets.

use std::sync::Barrier;
use std::thread;

use serde_json::{json, Value};
use tokio::sync::mpsc::{self, UnboundedReceiver};

use roomrelay::protocol::{self, Envelope};
use roomrelay::{
    BucketConfig, ConnectionSession, RateLimitConfig, RateLimiter, RoomRegistry, SessionState,
    SignalingRouter,
};

struct Peer {
    session: ConnectionSession,
    rx: UnboundedReceiver<Envelope>,
}

impl Peer {
    fn connect(router: &SignalingRouter) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            session: router.connect(tx),
            rx,
        }
    }

    fn id(&self) -> String {
        self.session.id().to_string()
    }

    fn send(&mut self, router: &SignalingRouter, event: &str, data: Value) {
        router.handle_envelope(&mut self.session, &Envelope::new(event, data));
    }

    fn join(&mut self, router: &SignalingRouter, room: &str, name: &str) {
        self.send(router, protocol::JOIN_ROOM, json!({ "roomId": room, "username": name }));
    }

    fn drain(&mut self) -> Vec<Envelope> {
        let mut out = Vec::new();
        while let Ok(env) = self.rx.try_recv() {
            out.push(env);
        }
        out
    }

    fn events(&mut self) -> Vec<String> {
        self.drain().into_iter().map(|e| e.event).collect()
    }
}

fn router() -> SignalingRouter {
    SignalingRouter::new(RoomRegistry::default(), RateLimiter::new(RateLimitConfig::default()))
}

fn unlimited_router() -> SignalingRouter {
    SignalingRouter::new(RoomRegistry::default(), RateLimiter::new(RateLimitConfig::empty()))
}

#[test]
fn two_peers_negotiate_and_part() {
    let router = router();
    let mut a = Peer::connect(&router);
    let mut b = Peer::connect(&router);

    a.join(&router, "abc123", "ana");
    let to_a = a.drain();
    assert_eq!(to_a.len(), 1);
    assert_eq!(to_a[0].event, protocol::ROOM_USERS);
    assert_eq!(to_a[0].data, Some(json!([])));

    b.join(&router, "abc123", "bo");
    let to_b = b.drain();
    assert_eq!(to_b[0].event, protocol::ROOM_USERS);
    assert_eq!(
        to_b[0].data,
        Some(json!([{ "id": a.id(), "username": "ana" }]))
    );
    assert_eq!(to_b[1].event, protocol::READY);

    let to_a = a.drain();
    assert_eq!(to_a[0].event, protocol::USER_JOINED);
    assert_eq!(
        to_a[0].data,
        Some(json!({ "id": b.id(), "username": "bo" }))
    );
    assert_eq!(to_a[1].event, protocol::READY);

    let offer = json!({ "type": "offer", "sdp": "v=0 a" });
    a.send(&router, protocol::OFFER, json!({ "offer": offer, "targetId": b.id() }));
    let to_b = b.drain();
    assert_eq!(to_b.len(), 1);
    assert_eq!(to_b[0].event, protocol::OFFER);
    let data = to_b[0].data.clone().unwrap();
    assert_eq!(data["offer"], offer);
    assert_eq!(data["senderId"], a.id());
    assert_eq!(data["senderName"], "ana");

    let answer = json!({ "type": "answer", "sdp": "v=0 b" });
    b.send(&router, protocol::ANSWER, json!({ "answer": answer, "targetId": a.id() }));
    let to_a = a.drain();
    assert_eq!(to_a[0].event, protocol::ANSWER);
    let data = to_a[0].data.clone().unwrap();
    assert_eq!(data["answer"], answer);
    assert_eq!(data["senderId"], b.id());
    assert!(data.get("senderName").is_none());

    let candidate = json!({ "candidate": "candidate:1 1 udp 2122260223 10.0.0.1 5000 typ host" });
    a.send(
        &router,
        protocol::ICE_CANDIDATE,
        json!({ "candidate": candidate, "targetId": b.id() }),
    );
    let to_b = b.drain();
    assert_eq!(to_b[0].data.as_ref().unwrap()["candidate"], candidate);

    router.disconnect(&mut a.session);
    let to_b = b.drain();
    assert_eq!(to_b.len(), 1);
    assert_eq!(to_b[0].event, protocol::USER_LEFT);
    assert_eq!(to_b[0].data.as_ref().unwrap()["id"], a.id());
}

#[test]
fn room_caps_at_four_members() {
    let router = unlimited_router();
    let mut peers: Vec<Peer> = (0..5).map(|_| Peer::connect(&router)).collect();

    for (n, peer) in peers.iter_mut().take(4).enumerate() {
        peer.join(&router, "cap", &format!("p{n}"));
        assert_eq!(router.registry().members("cap").len(), n + 1);
    }

    let last = &mut peers[4];
    last.join(&router, "cap", "late");
    let msgs = last.drain();
    assert_eq!(msgs.len(), 1);
    assert_eq!(msgs[0].event, protocol::ERROR);
    assert!(msgs[0].data.as_ref().unwrap()["message"]
        .as_str()
        .unwrap()
        .contains("full"));
    assert_eq!(last.session.state(), SessionState::Connected);
    assert_eq!(router.registry().members("cap").len(), 4);
}

#[test]
fn ready_fires_on_every_join_past_two() {
    let router = unlimited_router();
    let mut a = Peer::connect(&router);
    let mut b = Peer::connect(&router);
    let mut c = Peer::connect(&router);

    a.join(&router, "r", "a");
    assert!(!a.events().contains(&protocol::READY.to_string()));
    b.join(&router, "r", "b");
    a.drain();
    b.drain();

    c.join(&router, "r", "c");
    assert_eq!(a.events(), vec![protocol::USER_JOINED, protocol::READY]);
    assert_eq!(c.events(), vec![protocol::ROOM_USERS, protocol::READY]);
}

#[test]
fn long_room_id_is_rejected() {
    let router = router();
    let mut a = Peer::connect(&router);
    a.join(&router, &"r".repeat(21), "ana");
    let msgs = a.drain();
    assert_eq!(msgs[0].event, protocol::ERROR);
    assert_eq!(msgs[0].data.as_ref().unwrap()["message"], "Invalid room ID");
    assert_eq!(router.registry().room_count(), 0);
}

#[test]
fn usernames_are_truncated_or_derived() {
    let router = unlimited_router();
    let mut a = Peer::connect(&router);
    let mut b = Peer::connect(&router);

    a.join(&router, "r", &"n".repeat(80));
    b.send(&router, protocol::JOIN_ROOM, json!({ "roomId": "r", "username": 42 }));

    let members = router.registry().members("r");
    assert_eq!(members[0].username.chars().count(), 50);
    assert!(members[1].username.starts_with("User-"));
    assert!(members[1].username.len() > "User-".len());
}

#[test]
fn whiteboard_replays_to_late_joiner_and_clears() {
    let router = unlimited_router();
    let mut a = Peer::connect(&router);
    let mut b = Peer::connect(&router);
    a.join(&router, "board", "ana");

    for i in 0..3 {
        a.send(
            &router,
            protocol::WHITEBOARD_DRAW,
            json!({ "room": "board", "drawData": { "type": "pen", "x": i } }),
        );
    }
    // Missing payload and wrong room are ignored.
    a.send(&router, protocol::WHITEBOARD_DRAW, json!({ "room": "board" }));
    a.send(
        &router,
        protocol::WHITEBOARD_DRAW,
        json!({ "room": "elsewhere", "drawData": { "x": 9 } }),
    );
    assert_eq!(router.registry().whiteboard_state("board").len(), 3);

    b.join(&router, "board", "bo");
    let to_b = b.drain();
    assert_eq!(to_b[1].event, protocol::WHITEBOARD_STATE);
    assert_eq!(to_b[1].data.as_ref().unwrap().as_array().unwrap().len(), 3);
    a.drain();

    a.send(&router, protocol::WHITEBOARD_DRAW, json!({ "room": "board", "drawData": { "x": 3 } }));
    let to_b = b.drain();
    assert_eq!(to_b[0].event, protocol::WHITEBOARD_DRAW);
    assert_eq!(to_b[0].data, Some(json!({ "x": 3 })));

    b.send(&router, protocol::WHITEBOARD_CLEAR, json!({ "room": "board" }));
    assert!(router.registry().whiteboard_state("board").is_empty());
    assert_eq!(a.events(), vec![protocol::WHITEBOARD_CLEAR]);
}

#[test]
fn whiteboard_keeps_most_recent_strokes() {
    let router = unlimited_router();
    let mut a = Peer::connect(&router);
    a.join(&router, "big", "ana");
    for i in 0..5001 {
        a.send(&router, protocol::WHITEBOARD_DRAW, json!({ "room": "big", "drawData": i }));
    }
    let state = router.registry().whiteboard_state("big");
    assert_eq!(state.len(), 5000);
    assert_eq!(state[0], json!(1));
    assert_eq!(state[4999], json!(5000));
}

#[test]
fn last_leave_discards_whiteboard() {
    let router = unlimited_router();
    let mut a = Peer::connect(&router);
    a.join(&router, "tmp", "ana");
    a.send(&router, protocol::WHITEBOARD_DRAW, json!({ "room": "tmp", "drawData": { "x": 1 } }));
    a.send(&router, protocol::LEAVE_ROOM, json!({ "roomId": "tmp" }));
    assert!(!router.registry().contains_room("tmp"));
    assert_eq!(a.session.room(), None);
    a.drain();

    a.join(&router, "tmp", "ana");
    assert_eq!(a.events(), vec![protocol::ROOM_USERS]);
}

#[test]
fn disconnect_after_leave_is_silent() {
    let router = router();
    let mut a = Peer::connect(&router);
    let mut b = Peer::connect(&router);
    a.join(&router, "r", "ana");
    b.join(&router, "r", "bo");
    b.drain();

    a.send(&router, protocol::LEAVE_ROOM, json!({ "roomId": "r" }));
    assert_eq!(b.events(), vec![protocol::USER_LEFT]);

    router.disconnect(&mut a.session);
    router.disconnect(&mut a.session);
    assert!(b.drain().is_empty());
    assert_eq!(router.registry().members("r").len(), 1);
}

#[test]
fn chat_and_captions_reach_other_members_only() {
    let router = router();
    let mut a = Peer::connect(&router);
    let mut b = Peer::connect(&router);
    let mut outsider = Peer::connect(&router);
    a.join(&router, "talk", "ana");
    b.join(&router, "talk", "bo");
    outsider.join(&router, "other", "zed");
    a.drain();
    b.drain();
    outsider.drain();

    a.send(&router, protocol::CHAT_MESSAGE, json!({ "message": "  hello  ", "room": "talk" }));
    assert!(a.drain().is_empty());
    let to_b = b.drain();
    let data = to_b[0].data.clone().unwrap();
    assert_eq!(data["message"], "hello");
    assert_eq!(data["sender"], "ana");
    assert_eq!(data["senderId"], a.id());
    assert!(data["timestamp"].as_i64().unwrap() > 0);

    let caption = json!({ "room": "talk", "caption": "hi all", "sender": "ana", "senderId": a.id() });
    a.send(&router, protocol::CAPTION, caption.clone());
    let to_b = b.drain();
    assert_eq!(to_b[0].event, protocol::CAPTION);
    assert_eq!(to_b[0].data, Some(caption));

    a.send(&router, protocol::CHAT_MESSAGE, json!({ "message": "   ", "room": "talk" }));
    assert!(b.drain().is_empty());
    assert!(outsider.drain().is_empty());
}

#[test]
fn relay_to_missing_target_is_silently_dropped() {
    let router = router();
    let mut a = Peer::connect(&router);
    a.join(&router, "r", "ana");
    a.drain();
    a.send(
        &router,
        protocol::OFFER,
        json!({ "offer": { "sdp": "x" }, "targetId": "no-such-peer" }),
    );
    assert!(a.drain().is_empty());
}

#[test]
fn exhausted_chat_budget_leaves_ice_unaffected() {
    let limits = RateLimitConfig::default()
        .with_limit("chat-message", BucketConfig::new(2, 60, 30));
    let router = SignalingRouter::new(RoomRegistry::default(), RateLimiter::new(limits));
    let mut a = Peer::connect(&router);
    let mut b = Peer::connect(&router);
    a.join(&router, "r", "ana");
    b.join(&router, "r", "bo");
    a.drain();
    b.drain();

    for _ in 0..2 {
        a.send(&router, protocol::CHAT_MESSAGE, json!({ "message": "hi", "room": "r" }));
    }
    a.send(&router, protocol::CHAT_MESSAGE, json!({ "message": "hi", "room": "r" }));
    assert_eq!(b.drain().len(), 2);

    let to_a = a.drain();
    assert_eq!(to_a.len(), 1);
    assert_eq!(to_a[0].event, protocol::ERROR);
    assert_eq!(to_a[0].data.as_ref().unwrap()["retryAfter"], 30);

    a.send(
        &router,
        protocol::ICE_CANDIDATE,
        json!({ "candidate": { "candidate": "c" }, "targetId": b.id() }),
    );
    assert_eq!(b.events(), vec![protocol::ICE_CANDIDATE]);
}

#[test]
fn rejected_join_keeps_current_room() {
    let router = unlimited_router();
    let mut fillers: Vec<Peer> = (0..4).map(|_| Peer::connect(&router)).collect();
    for (n, peer) in fillers.iter_mut().enumerate() {
        peer.join(&router, "full", &format!("p{n}"));
    }
    let mut a = Peer::connect(&router);
    let mut b = Peer::connect(&router);
    a.join(&router, "home", "ana");
    b.join(&router, "home", "bo");
    a.send(&router, protocol::WHITEBOARD_DRAW, json!({ "room": "home", "drawData": { "x": 1 } }));
    a.drain();
    b.drain();

    a.join(&router, "full", "ana");
    assert_eq!(a.events(), vec![protocol::ERROR]);
    assert_eq!(a.session.room(), Some("home"));
    assert_eq!(a.session.state(), SessionState::InRoom);
    assert_eq!(router.registry().members("home").len(), 2);
    assert_eq!(router.registry().whiteboard_state("home").len(), 1);
    assert_eq!(router.registry().members("full").len(), 4);
    assert!(b.drain().is_empty());
}

#[test]
fn rejoining_same_room_keeps_membership_and_board() {
    let router = unlimited_router();
    let mut a = Peer::connect(&router);
    a.join(&router, "wb", "ana");
    a.send(&router, protocol::WHITEBOARD_DRAW, json!({ "room": "wb", "drawData": { "x": 1 } }));
    a.drain();

    a.join(&router, "wb", "ana");
    assert_eq!(router.registry().whiteboard_state("wb").len(), 1);
    assert_eq!(a.events(), vec![protocol::ROOM_USERS, protocol::WHITEBOARD_STATE]);

    let mut b = Peer::connect(&router);
    b.join(&router, "wb", "bo");
    a.drain();
    b.drain();

    a.join(&router, "wb", "ana");
    let to_a = a.drain();
    assert_eq!(to_a[0].event, protocol::ROOM_USERS);
    assert_eq!(to_a[0].data, Some(json!([{ "id": b.id(), "username": "bo" }])));
    assert!(b.drain().is_empty());
    assert_eq!(router.registry().members("wb").len(), 2);
}

#[test]
fn relay_to_peer_in_another_room_is_dropped() {
    let router = router();
    let mut a = Peer::connect(&router);
    let mut b = Peer::connect(&router);
    a.join(&router, "one", "ana");
    b.join(&router, "two", "bo");
    a.drain();
    b.drain();

    a.send(
        &router,
        protocol::OFFER,
        json!({ "offer": { "sdp": "x" }, "targetId": b.id() }),
    );
    assert!(a.drain().is_empty());
    assert!(b.drain().is_empty());
}

#[test]
fn concurrent_joins_stop_at_capacity() {
    const PEERS: usize = 16;
    let router = unlimited_router();
    let barrier = Barrier::new(PEERS);

    let peers: Vec<Peer> = thread::scope(|s| {
        let handles: Vec<_> = (0..PEERS)
            .map(|n| {
                let router = &router;
                let barrier = &barrier;
                s.spawn(move || {
                    let mut peer = Peer::connect(router);
                    barrier.wait();
                    peer.join(router, "rush", &format!("p{n}"));
                    peer
                })
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });

    assert_eq!(router.registry().members("rush").len(), 4);
    let admitted = peers
        .iter()
        .filter(|p| p.session.room() == Some("rush"))
        .count();
    assert_eq!(admitted, 4);

    let mut rejected = 0;
    for mut peer in peers {
        if peer.session.room().is_none() {
            assert_eq!(peer.events(), vec![protocol::ERROR]);
            rejected += 1;
        }
    }
    assert_eq!(rejected, PEERS - 4);
}
