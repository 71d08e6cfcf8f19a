//! Room-based WebRTC signaling relay.
//!
//! Peers join a room of up to four members over a WebSocket, exchange
//! offers, answers and ICE candidates through the relay, and share chat,
//! live captions and a whiteboard. Media never passes through the server.
//!
//! - [`router::SignalingRouter`] dispatches client events
//! - [`registry::RoomRegistry`] owns room membership and whiteboard state
//! - [`rate_limit::RateLimiter`] gates every event kind per connection
//! - [`http::app`] wires the WebSocket endpoint and the HTTP API

pub mod config;
pub mod error;
pub mod http;
pub mod protocol;
pub mod rate_limit;
pub mod registry;
pub mod router;
pub mod session;
pub mod summary;
pub mod ws;

pub use error::{RelayError, Result};
pub use protocol::{ClientEvent, Envelope};
pub use rate_limit::{Admission, BucketConfig, RateLimitConfig, RateLimiter};
pub use registry::{Member, RoomRegistry};
pub use router::SignalingRouter;
pub use session::{ConnectionSession, SessionState};
