//! Runtime configuration for the telemed backend.
//!
//! `ChatConfig` represents the top-level `config.toml` controlling the
//! messaging core's timeouts, retry policy, and token lifetime.

use serde::{Deserialize, Serialize};

/// Tunables for the messaging core.
///
/// Loaded from `~/.telemed/config.toml`. All fields have sensible defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatConfig {
    /// Per-connection send timeout during broadcast fan-out, in milliseconds.
    /// One unresponsive peer must not stall delivery to the others.
    #[serde(default = "default_send_timeout_ms")]
    pub send_timeout_ms: u64,

    /// Seconds without inbound traffic before the server probes the
    /// connection with a `ping` event.
    #[serde(default = "default_idle_ping_secs")]
    pub idle_ping_secs: u64,

    /// Seconds of continued silence after the probe before the connection
    /// is closed and unregistered.
    #[serde(default = "default_idle_grace_secs")]
    pub idle_grace_secs: u64,

    /// Maximum attempts for a message append that hits a transient
    /// concurrent-write conflict.
    #[serde(default = "default_retry_attempts")]
    pub retry_attempts: u32,

    /// Base backoff between retry attempts, in milliseconds. Each attempt
    /// waits `attempt * base` plus a random jitter.
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,

    /// Lifetime of an issued WebSocket chat token, in seconds.
    #[serde(default = "default_token_ttl_secs")]
    pub token_ttl_secs: u64,

    /// Capacity of each connection's outbound event queue.
    #[serde(default = "default_outbound_capacity")]
    pub outbound_capacity: usize,
}

fn default_send_timeout_ms() -> u64 {
    500
}

fn default_idle_ping_secs() -> u64 {
    60
}

fn default_idle_grace_secs() -> u64 {
    30
}

fn default_retry_attempts() -> u32 {
    3
}

fn default_retry_backoff_ms() -> u64 {
    200
}

fn default_token_ttl_secs() -> u64 {
    300
}

fn default_outbound_capacity() -> usize {
    64
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            send_timeout_ms: default_send_timeout_ms(),
            idle_ping_secs: default_idle_ping_secs(),
            idle_grace_secs: default_idle_grace_secs(),
            retry_attempts: default_retry_attempts(),
            retry_backoff_ms: default_retry_backoff_ms(),
            token_ttl_secs: default_token_ttl_secs(),
            outbound_capacity: default_outbound_capacity(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_values() {
        let config = ChatConfig::default();
        assert_eq!(config.send_timeout_ms, 500);
        assert_eq!(config.retry_attempts, 3);
        assert_eq!(config.token_ttl_secs, 300);
    }

    #[test]
    fn test_deserialize_empty_toml_uses_defaults() {
        let config: ChatConfig = toml::from_str("").unwrap();
        assert_eq!(config.idle_ping_secs, 60);
        assert_eq!(config.outbound_capacity, 64);
    }

    #[test]
    fn test_deserialize_partial_toml() {
        let config: ChatConfig = toml::from_str(
            r#"
send_timeout_ms = 250
retry_attempts = 5
"#,
        )
        .unwrap();
        assert_eq!(config.send_timeout_ms, 250);
        assert_eq!(config.retry_attempts, 5);
        // Untouched fields keep defaults
        assert_eq!(config.retry_backoff_ms, 200);
    }

    #[test]
    fn test_serde_roundtrip() {
        let config = ChatConfig {
            token_ttl_secs: 120,
            ..ChatConfig::default()
        };
        let json = serde_json::to_string(&config).unwrap();
        let parsed: ChatConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.token_ttl_secs, 120);
    }
}
