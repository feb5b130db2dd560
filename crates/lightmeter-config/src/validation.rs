// SPDX-FileCopyrightText: 2026 Lightmeter Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Post-deserialization validation.
//!
//! Checks the constraints serde cannot express: positive capacities, the
//! resolver depth range, and that every filter pattern compiles.

use crate::diagnostic::ConfigError;
use crate::model::{LightmeterConfig, MAX_FILTER_RULES};

/// Validate a deserialized configuration, collecting every problem found.
pub fn validate_config(config: &LightmeterConfig) -> Result<(), Vec<ConfigError>> {
    let mut errors = Vec::new();
    let tracker = &config.tracker;

    let positive = [
        ("tracker.intake_capacity", tracker.intake_capacity as u64),
        ("tracker.commit_interval_ms", tracker.commit_interval_ms),
        ("tracker.max_batch_size", tracker.max_batch_size as u64),
        ("tracker.notifier_capacity", tracker.notifier_capacity as u64),
        (
            "tracker.notification_batch_size",
            tracker.notification_batch_size as u64,
        ),
        ("tracker.read_pool_size", tracker.read_pool_size as u64),
        ("tracker.read_timeout_ms", tracker.read_timeout_ms),
    ];
    for (key, value) in positive {
        if value == 0 {
            errors.push(ConfigError::Validation {
                message: format!("{key} must be greater than zero"),
            });
        }
    }

    if !(1..=256).contains(&tracker.max_relay_depth) {
        errors.push(ConfigError::Validation {
            message: format!(
                "tracker.max_relay_depth must be between 1 and 256, got {}",
                tracker.max_relay_depth
            ),
        });
    }

    if tracker.replay_window_secs < 0 {
        errors.push(ConfigError::Validation {
            message: format!(
                "tracker.replay_window_secs must be non-negative, got {}",
                tracker.replay_window_secs
            ),
        });
    }

    if tracker.workspace_dir.as_os_str().is_empty() {
        errors.push(ConfigError::Validation {
            message: "tracker.workspace_dir must not be empty".to_string(),
        });
    }

    if config.logging.level.parse::<tracing::Level>().is_err() {
        errors.push(ConfigError::Validation {
            message: format!("logging.level `{}` is not a log level", config.logging.level),
        });
    }

    let rules = &config.filters.rules;
    if rules.len() > MAX_FILTER_RULES {
        errors.push(ConfigError::Validation {
            message: format!(
                "at most {MAX_FILTER_RULES} filter rules are supported, got {}",
                rules.len()
            ),
        });
    }

    for (index, rule) in rules.iter().enumerate() {
        let patterns = rule.patterns();
        if patterns.is_empty() {
            errors.push(ConfigError::Validation {
                message: format!("filter rule {} has no pattern", index + 1),
            });
        }
        for (field, pattern) in patterns {
            if let Err(e) = regex::Regex::new(pattern) {
                errors.push(ConfigError::InvalidPattern {
                    rule: index + 1,
                    field,
                    reason: e.to_string(),
                });
            }
        }
    }

    if errors.is_empty() { Ok(()) } else { Err(errors) }
}
