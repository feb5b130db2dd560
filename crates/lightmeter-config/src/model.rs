// SPDX-FileCopyrightText: 2026 Lightmeter Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Configuration model structs for the Lightmeter delivery tracker.
//!
//! All structs use `#[serde(deny_unknown_fields)]` so a misspelled key fails
//! at startup instead of silently falling back to a default.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Maximum number of filter rules the tracker accepts.
pub const MAX_FILTER_RULES: usize = 12;

/// Top-level configuration.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct LightmeterConfig {
    /// Tracking pipeline settings.
    #[serde(default)]
    pub tracker: TrackerConfig,

    /// Log output settings.
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Result acceptance rules.
    #[serde(default)]
    pub filters: FiltersConfig,
}

/// Topology of the observed Postfix deployment.
#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    Deserialize,
    Serialize,
    strum::Display,
    strum::EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum NodeType {
    /// One Postfix instance; every queue has a known origin.
    #[default]
    Single,
    /// Several Postfix instances whose logs may interleave or arrive late.
    Multi,
}

/// Tracking pipeline settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct TrackerConfig {
    /// Directory holding `logtracker.db`.
    #[serde(default = "default_workspace_dir")]
    pub workspace_dir: PathBuf,

    #[serde(default)]
    pub node_type: NodeType,

    /// Intake channel slots. The only memory bound on pending records.
    #[serde(default = "default_intake_capacity")]
    pub intake_capacity: usize,

    /// Wall-clock interval between periodic commits.
    #[serde(default = "default_commit_interval_ms")]
    pub commit_interval_ms: u64,

    /// Commit early once this many records are pending.
    #[serde(default = "default_max_batch_size")]
    pub max_batch_size: usize,

    /// Slots of the committer to notifier channel, in batches.
    #[serde(default = "default_notifier_capacity")]
    pub notifier_capacity: usize,

    /// Results handed to the notifier per batch.
    #[serde(default = "default_notification_batch_size")]
    pub notification_batch_size: usize,

    /// Upper bound on the graceful drain at shutdown.
    #[serde(default = "default_shutdown_timeout_secs")]
    pub shutdown_timeout_secs: u64,

    /// Longest relay chain the resolver walks.
    #[serde(default = "default_max_relay_depth")]
    pub max_relay_depth: usize,

    /// Read-only connections available to readers.
    #[serde(default = "default_read_pool_size")]
    pub read_pool_size: usize,

    #[serde(default = "default_read_timeout_ms")]
    pub read_timeout_ms: u64,

    /// How long delivery-attempt fingerprints are kept for replay detection.
    #[serde(default = "default_replay_window_secs")]
    pub replay_window_secs: i64,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            workspace_dir: default_workspace_dir(),
            node_type: NodeType::default(),
            intake_capacity: default_intake_capacity(),
            commit_interval_ms: default_commit_interval_ms(),
            max_batch_size: default_max_batch_size(),
            notifier_capacity: default_notifier_capacity(),
            notification_batch_size: default_notification_batch_size(),
            shutdown_timeout_secs: default_shutdown_timeout_secs(),
            max_relay_depth: default_max_relay_depth(),
            read_pool_size: default_read_pool_size(),
            read_timeout_ms: default_read_timeout_ms(),
            replay_window_secs: default_replay_window_secs(),
        }
    }
}

impl TrackerConfig {
    pub fn commit_interval(&self) -> Duration {
        Duration::from_millis(self.commit_interval_ms)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }
}

fn default_workspace_dir() -> PathBuf {
    PathBuf::from(".")
}

fn default_intake_capacity() -> usize {
    10240
}

fn default_commit_interval_ms() -> u64 {
    1000
}

fn default_max_batch_size() -> usize {
    4096
}

fn default_notifier_capacity() -> usize {
    1024
}

fn default_notification_batch_size() -> usize {
    128
}

fn default_shutdown_timeout_secs() -> u64 {
    30
}

fn default_max_relay_depth() -> usize {
    16
}

fn default_read_pool_size() -> usize {
    4
}

fn default_read_timeout_ms() -> u64 {
    5000
}

fn default_replay_window_secs() -> i64 {
    7 * 24 * 60 * 60
}

/// Log output settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct LoggingConfig {
    /// Default level for the `lightmeter` targets (overridden by `RUST_LOG`).
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Ordered result acceptance rules.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct FiltersConfig {
    #[serde(default)]
    pub rules: Vec<FilterRule>,
}

/// One rule slot. Each populated field becomes one filter, in field order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct FilterRule {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub accept_outbound_sender: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub accept_inbound_recipient: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reject_inbound_recipient: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub accept_outbound_message_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub accept_in_reply_to: Option<String>,
}

impl FilterRule {
    /// Populated `(field name, pattern)` pairs in evaluation order.
    pub fn patterns(&self) -> Vec<(&'static str, &str)> {
        [
            ("accept_outbound_sender", &self.accept_outbound_sender),
            ("accept_inbound_recipient", &self.accept_inbound_recipient),
            ("reject_inbound_recipient", &self.reject_inbound_recipient),
            ("accept_outbound_message_id", &self.accept_outbound_message_id),
            ("accept_in_reply_to", &self.accept_in_reply_to),
        ]
        .into_iter()
        .filter_map(|(name, value)| value.as_deref().map(|v| (name, v)))
        .filter(|(_, v)| !v.is_empty())
        .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let config = TrackerConfig::default();
        assert_eq!(config.intake_capacity, 10240);
        assert_eq!(config.commit_interval(), Duration::from_secs(1));
        assert_eq!(config.shutdown_timeout(), Duration::from_secs(30));
        assert_eq!(config.max_relay_depth, 16);
        assert_eq!(config.node_type, NodeType::Single);
    }

    #[test]
    fn node_type_parses_lowercase() {
        use std::str::FromStr;
        assert_eq!(NodeType::from_str("multi").unwrap(), NodeType::Multi);
        assert_eq!(NodeType::Single.to_string(), "single");
    }

    #[test]
    fn empty_patterns_are_skipped() {
        let rule = FilterRule {
            accept_outbound_sender: Some(String::new()),
            reject_inbound_recipient: Some("spam".into()),
            ..Default::default()
        };
        assert_eq!(rule.patterns(), vec![("reject_inbound_recipient", "spam")]);
    }
}
