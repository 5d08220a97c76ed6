//! Channel identity, connection states and the reconnect policy shared by
//! the three WebSocket supervisors.

use std::time::Duration;

use anyhow::{anyhow, Result};
use rand::Rng;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChannelKind {
    Message,
    User,
    Group,
}

impl ChannelKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ChannelKind::Message => "message",
            ChannelKind::User => "user",
            ChannelKind::Group => "group",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Closed,
    Connecting,
    Open,
}

/// Exponential backoff with random jitter for channel re-establishment.
#[derive(Debug, Clone, Copy)]
pub struct ReconnectPolicy {
    pub base: Duration,
    pub cap: Duration,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            base: Duration::from_millis(500),
            cap: Duration::from_secs(30),
        }
    }
}

impl ReconnectPolicy {
    /// Delay before reconnect attempt `attempt` (0-based): `base * 2^attempt`
    /// capped at `cap`, plus up to half of that again as jitter.
    pub fn delay(&self, attempt: u32) -> Duration {
        let exp = self
            .base
            .saturating_mul(1u32.checked_shl(attempt.min(16)).unwrap_or(u32::MAX));
        let capped = exp.min(self.cap);
        let jitter_ms = rand::thread_rng().gen_range(0..=capped.as_millis() as u64 / 2);
        capped + Duration::from_millis(jitter_ms)
    }
}

/// Rewrite the REST base URL into the matching WebSocket endpoint with the
/// credential as a query parameter (the transport cannot carry headers at
/// connect time).
pub(crate) fn websocket_url(base_url: &str, path: &str, token: &str) -> Result<String> {
    let ws_base = if let Some(rest) = base_url.strip_prefix("https://") {
        format!("wss://{rest}")
    } else if let Some(rest) = base_url.strip_prefix("http://") {
        format!("ws://{rest}")
    } else {
        return Err(anyhow!("base url must start with http:// or https://"));
    };
    Ok(format!("{ws_base}{path}?token={token}"))
}

#[cfg(test)]
#[path = "tests/channel_tests.rs"]
mod tests;
