use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::orchestrator::Backpressure;

/// Host-tunable knobs for an [`crate::orchestrator::Orchestrator`] (§5, §9).
/// Constructed directly or loaded from environment variables the way the
/// transport crate's `main.rs` reads `STATECRAFT_*` overrides.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct StatecraftConfig {
    /// Default `sendAndWait` timeout, milliseconds.
    pub send_and_wait_timeout_ms: u64,
    /// Per-machine mailbox capacity before backpressure kicks in.
    pub mailbox_capacity: usize,
    pub backpressure: BackpressureConfig,
}

/// Serializable mirror of [`Backpressure`] (the engine type has no serde
/// impl — it is an internal enum, not part of the wire contract).
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum BackpressureConfig {
    BlockSender,
    DropNewest,
    DropOldest,
}

impl From<BackpressureConfig> for Backpressure {
    fn from(value: BackpressureConfig) -> Self {
        match value {
            BackpressureConfig::BlockSender => Backpressure::BlockSender,
            BackpressureConfig::DropNewest => Backpressure::DropNewest,
            BackpressureConfig::DropOldest => Backpressure::DropOldest,
        }
    }
}

impl Default for StatecraftConfig {
    fn default() -> Self {
        Self {
            send_and_wait_timeout_ms: 5_000,
            mailbox_capacity: 256,
            backpressure: BackpressureConfig::BlockSender,
        }
    }
}

impl StatecraftConfig {
    /// Overlays `STATECRAFT_SEND_TIMEOUT_MS` / `STATECRAFT_MAILBOX_CAPACITY`
    /// on top of the defaults, mirroring how the transport crate's
    /// `main.rs` resolves its listen address: explicit argument, then
    /// environment, then a hardcoded fallback.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(raw) = std::env::var("STATECRAFT_SEND_TIMEOUT_MS") {
            if let Ok(ms) = raw.parse() {
                config.send_and_wait_timeout_ms = ms;
            }
        }
        if let Ok(raw) = std::env::var("STATECRAFT_MAILBOX_CAPACITY") {
            if let Ok(cap) = raw.parse() {
                config.mailbox_capacity = cap;
            }
        }
        config
    }

    pub fn send_and_wait_timeout(&self) -> Duration {
        Duration::from_millis(self.send_and_wait_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let config = StatecraftConfig::default();
        assert_eq!(config.mailbox_capacity, 256);
        assert_eq!(config.backpressure, BackpressureConfig::BlockSender);
    }
}
