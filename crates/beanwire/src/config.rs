//! Dispatcher configuration.

use std::time::Duration;

use serde::Deserialize;
use tracing::warn;

// ---------------------------------------------------------------------------
// UnknownTypePolicy
// ---------------------------------------------------------------------------

/// What to do with a frame whose type id has no registered bean.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnknownTypePolicy {
    /// Close the session with `CloseReason::Protocol`.
    #[default]
    Strict,
    /// Hand the raw payload to `SessionListener::on_unknown_frame` and
    /// carry on with the next frame.
    Tolerant,
}

// ---------------------------------------------------------------------------
// DispatcherConfig
// ---------------------------------------------------------------------------

/// Settings for a [`Dispatcher`](crate::Dispatcher).
///
/// Every field has a default, so a partial TOML or JSON document
/// deserializes into a complete config:
///
/// ```rust
/// use beanwire::{DispatcherConfig, UnknownTypePolicy};
///
/// let config: DispatcherConfig =
///     serde_json::from_str(r#"{ "unknown_type_policy": "tolerant" }"#).unwrap();
/// assert_eq!(config.unknown_type_policy, UnknownTypePolicy::Tolerant);
/// assert_eq!(config.ask_timeout_secs, 10);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct DispatcherConfig {
    /// Bytes requested from the socket per read. Default: 32 KiB.
    pub recv_chunk_size: usize,
    /// Seconds an ask waits for its reply before the callback gets `None`.
    /// Default: 10.
    pub ask_timeout_secs: u64,
    /// Largest accepted frame payload for types that do not declare their
    /// own limit, and for unknown types. Default: 65536.
    pub max_frame_size: usize,
    pub unknown_type_policy: UnknownTypePolicy,
    /// Pending-connection backlog passed to `listen`. Default: 128.
    pub listen_backlog: u32,
}

impl DispatcherConfig {
    pub const MIN_RECV_CHUNK_SIZE: usize = 512;
    pub const MAX_RECV_CHUNK_SIZE: usize = 1024 * 1024;
    /// A frame limit below this could not hold even a small bean.
    pub const MIN_FRAME_SIZE: usize = 16;

    /// Clamps out-of-range values, logging each correction.
    pub fn validated(mut self) -> Self {
        let chunk = self
            .recv_chunk_size
            .clamp(Self::MIN_RECV_CHUNK_SIZE, Self::MAX_RECV_CHUNK_SIZE);
        if chunk != self.recv_chunk_size {
            warn!(
                requested = self.recv_chunk_size,
                using = chunk,
                "recv_chunk_size out of range, clamping"
            );
            self.recv_chunk_size = chunk;
        }
        if self.max_frame_size < Self::MIN_FRAME_SIZE {
            warn!(
                requested = self.max_frame_size,
                using = Self::MIN_FRAME_SIZE,
                "max_frame_size too small, clamping"
            );
            self.max_frame_size = Self::MIN_FRAME_SIZE;
        }
        self
    }

    pub fn ask_timeout(&self) -> Duration {
        Duration::from_secs(self.ask_timeout_secs)
    }
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            recv_chunk_size: 32 * 1024,
            ask_timeout_secs: 10,
            max_frame_size: 65536,
            unknown_type_policy: UnknownTypePolicy::Strict,
            listen_backlog: 128,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_matches_documented_values() {
        let config = DispatcherConfig::default();
        assert_eq!(config.recv_chunk_size, 32 * 1024);
        assert_eq!(config.ask_timeout(), Duration::from_secs(10));
        assert_eq!(config.max_frame_size, 65536);
        assert_eq!(config.unknown_type_policy, UnknownTypePolicy::Strict);
    }

    #[test]
    fn test_validated_clamps_chunk_size_both_ways() {
        let small = DispatcherConfig {
            recv_chunk_size: 1,
            ..Default::default()
        }
        .validated();
        assert_eq!(small.recv_chunk_size, DispatcherConfig::MIN_RECV_CHUNK_SIZE);

        let large = DispatcherConfig {
            recv_chunk_size: usize::MAX,
            ..Default::default()
        }
        .validated();
        assert_eq!(large.recv_chunk_size, DispatcherConfig::MAX_RECV_CHUNK_SIZE);
    }

    #[test]
    fn test_validated_raises_tiny_frame_limit() {
        let config = DispatcherConfig {
            max_frame_size: 0,
            ..Default::default()
        }
        .validated();
        assert_eq!(config.max_frame_size, DispatcherConfig::MIN_FRAME_SIZE);
    }

    #[test]
    fn test_validated_keeps_valid_config() {
        let config = DispatcherConfig::default();
        assert_eq!(config.clone().validated(), config);
    }

    #[test]
    fn test_deserialize_partial_document_fills_defaults() {
        let config: DispatcherConfig =
            serde_json::from_str(r#"{ "ask_timeout_secs": 3, "unknown_type_policy": "tolerant" }"#).unwrap();
        assert_eq!(config.ask_timeout_secs, 3);
        assert_eq!(config.unknown_type_policy, UnknownTypePolicy::Tolerant);
        assert_eq!(config.max_frame_size, 65536);
    }
}
