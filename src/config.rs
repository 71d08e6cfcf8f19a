//! Server configuration from command line and environment.

use std::net::SocketAddr;
use std::time::Duration;

use clap::{Parser, ValueEnum};

use crate::rate_limit::{BucketConfig, RateLimitConfig};
use crate::registry::{MAX_USERS_PER_ROOM, MAX_WHITEBOARD_STROKES};

/// Rate-limit kind used by the HTTP throttle.
pub const HTTP_KIND: &str = "http";

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    Pretty,
    Json,
}

#[derive(Debug, Clone, Parser)]
#[command(name = "roomrelay", version, about = "WebRTC room signaling relay")]
pub struct Config {
    /// Address to listen on for HTTP and WebSocket traffic
    #[arg(long, env = "ROOMRELAY_BIND", default_value = "0.0.0.0:3000")]
    pub bind: SocketAddr,

    /// Maximum members per room
    #[arg(long, env = "ROOMRELAY_MAX_USERS", default_value_t = MAX_USERS_PER_ROOM)]
    pub max_users_per_room: usize,

    /// Whiteboard strokes kept per room
    #[arg(long, env = "ROOMRELAY_MAX_STROKES", default_value_t = MAX_WHITEBOARD_STROKES)]
    pub max_whiteboard_strokes: usize,

    /// Chat-completion endpoint used by /api/summarize
    #[arg(
        long,
        env = "ROOMRELAY_SUMMARY_API_URL",
        default_value = "https://api.openai.com/v1/chat/completions"
    )]
    pub summary_api_url: String,

    /// API key for the summary endpoint; summaries are disabled without it
    #[arg(long, env = "ROOMRELAY_SUMMARY_API_KEY", hide_env_values = true)]
    pub summary_api_key: Option<String>,

    #[arg(long, env = "ROOMRELAY_SUMMARY_MODEL", default_value = "gpt-4o-mini")]
    pub summary_model: String,

    /// HTTP API requests allowed per client per window
    #[arg(long, env = "ROOMRELAY_HTTP_RATE_LIMIT", default_value_t = 100)]
    pub http_rate_limit: u32,

    #[arg(long, env = "ROOMRELAY_HTTP_RATE_WINDOW", default_value_t = 900)]
    pub http_rate_window_secs: u64,

    #[arg(long, env = "ROOMRELAY_LOG_FORMAT", value_enum, default_value_t = LogFormat::Pretty)]
    pub log_format: LogFormat,
}

impl Config {
    /// Limits for the HTTP throttle: one bucket kind, blocked for a full
    /// window once exhausted.
    pub fn http_rate_limits(&self) -> RateLimitConfig {
        RateLimitConfig::empty().with_limit(
            HTTP_KIND,
            BucketConfig::new(
                self.http_rate_limit,
                self.http_rate_window_secs,
                self.http_rate_window_secs,
            ),
        )
    }

    pub fn summary(&self) -> SummaryConfig {
        SummaryConfig {
            api_url: self.summary_api_url.clone(),
            api_key: self.summary_api_key.clone().filter(|k| !k.is_empty()),
            model: self.summary_model.clone(),
            timeout: Duration::from_secs(30),
        }
    }
}

/// Settings for the upstream summary API.
#[derive(Debug, Clone)]
pub struct SummaryConfig {
    pub api_url: String,
    pub api_key: Option<String>,
    pub model: String,
    pub timeout: Duration,
}
