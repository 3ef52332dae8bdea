//! Shared HTTP-surface plumbing used by both framework adapters. spec.md C6.
//!
//! Keeping header names, MIME constants, and [`Config`] here (rather than
//! duplicated per-framework, as the teacher's `common/http_header.rs` does
//! for its own adapters) is what lets `axum` and `actix_web` stay read-alike
//! siblings instead of drifting apart.

#[cfg(feature = "axum")]
pub mod axum;
#[cfg(feature = "actix-web")]
pub mod actix_web;

use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;

use crate::transport::session::InboxItem;

pub const HEADER_SESSION_ID: &str = "Mcp-Session-Id";
pub const HEADER_LAST_EVENT_ID: &str = "Last-Event-ID";
pub const HEADER_X_ACCEL_BUFFERING: &str = "X-Accel-Buffering";
pub const EVENT_STREAM_MIME_TYPE: &str = "text/event-stream";
pub const JSON_MIME_TYPE: &str = "application/json";

/// `supportsResumability` (spec.md §4.4): whether a negotiated protocol
/// version is new enough to receive resumability priming/replay. A thin
/// newtype so it reads as a policy at call sites, not a bare closure.
#[derive(Clone)]
pub struct ProtocolVersionPolicy(Arc<dyn Fn(&str) -> bool + Send + Sync>);

impl ProtocolVersionPolicy {
    pub fn new(f: impl Fn(&str) -> bool + Send + Sync + 'static) -> Self {
        Self(Arc::new(f))
    }

    pub fn supports(&self, protocol_version: &str) -> bool {
        (self.0)(protocol_version)
    }

    pub(crate) fn into_inner(self) -> Arc<dyn Fn(&str) -> bool + Send + Sync> {
        self.0
    }
}

impl Default for ProtocolVersionPolicy {
    /// Conservative default: no negotiated version is treated as resumable
    /// until the caller opts a version in.
    fn default() -> Self {
        Self::new(|_| false)
    }
}

/// Mirrors the teacher's `StreamableHttpServerConfig`. spec.md §6 "not a
/// CLI surface": constructed in code, never parsed from argv or env.
#[derive(Clone)]
pub struct Config {
    /// Idle interval on which a `:ping\n\n` comment frame is written to
    /// every open SSE body, so intermediary proxies don't time it out.
    pub sse_keep_alive: Option<Duration>,
    /// If true, sessions are created and tracked across requests. If
    /// false, every POST is handled without session state (spec.md §3).
    pub stateful_mode: bool,
    /// `retry:` value sent on priming frames (spec.md §5 "Timeouts").
    pub retry_interval: Duration,
    /// How long a stream's persisted events remain replayable (spec.md §6).
    pub event_retention: Option<Duration>,
    pub supports_resumability: ProtocolVersionPolicy,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            sse_keep_alive: Some(Duration::from_secs(15)),
            stateful_mode: true,
            retry_interval: Duration::from_secs(1),
            event_retention: Some(Duration::from_secs(24 * 60 * 60)),
            supports_resumability: ProtocolVersionPolicy::default(),
        }
    }
}

/// What the dispatcher (an external collaborator; spec.md §1 "Out of
/// scope") does with an inbound message once this crate has correlated it
/// with the right outbound channel. Framework adapters spawn one draining
/// task per session inbox and call this for each item.
pub type Dispatch = Arc<dyn Fn(InboxItem) -> BoxFuture<'static, ()> + Send + Sync>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_matches_teacher_defaults_plus_new_fields() {
        let config = Config::default();
        assert_eq!(config.sse_keep_alive, Some(Duration::from_secs(15)));
        assert!(config.stateful_mode);
        assert_eq!(config.retry_interval, Duration::from_secs(1));
        assert!(!config.supports_resumability.supports("2024-11-05"));
    }
}
