// SPDX-FileCopyrightText: 2026 Lightmeter Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Integration tests for the configuration system.

use lightmeter_config::diagnostic::ConfigError;
use lightmeter_config::{NodeType, load_and_validate_str, load_config_from_str};

#[test]
fn full_document_deserializes() {
    let toml = r#"
[tracker]
workspace_dir = "/var/lib/lightmeter"
node_type = "multi"
intake_capacity = 512
commit_interval_ms = 200
max_batch_size = 64
shutdown_timeout_secs = 5
max_relay_depth = 8
read_pool_size = 2

[logging]
level = "debug"

[[filters.rules]]
accept_outbound_sender = "^.*@example\\.com$"

[[filters.rules]]
reject_inbound_recipient = "^spam@"
accept_in_reply_to = "@example\\.com>$"
"#;

    let config = load_and_validate_str(toml).expect("valid document");
    assert_eq!(config.tracker.node_type, NodeType::Multi);
    assert_eq!(config.tracker.workspace_dir.to_str(), Some("/var/lib/lightmeter"));
    assert_eq!(config.tracker.intake_capacity, 512);
    assert_eq!(config.tracker.max_relay_depth, 8);
    assert_eq!(config.logging.level, "debug");
    assert_eq!(config.filters.rules.len(), 2);
    assert_eq!(config.filters.rules[1].patterns().len(), 2);
}

#[test]
fn unknown_tracker_key_suggests_correction() {
    let toml = r#"
[tracker]
node_tpye = "multi"
"#;

    let errors = load_and_validate_str(toml).expect_err("typo must be rejected");
    match &errors[0] {
        ConfigError::UnknownKey {
            key, suggestion, ..
        } => {
            assert_eq!(key, "node_tpye");
            assert_eq!(suggestion.as_deref(), Some("node_type"));
        }
        other => panic!("expected UnknownKey, got {other:?}"),
    }
}

#[test]
fn unknown_node_type_is_rejected() {
    let err = load_config_from_str(
        r#"
[tracker]
node_type = "cluster"
"#,
    )
    .expect_err("cluster is not a node type");
    assert!(err.to_string().contains("cluster"));
}

#[test]
fn unknown_filter_field_is_rejected() {
    let toml = r#"
[[filters.rules]]
accept_sender = "x"
"#;
    let errors = load_and_validate_str(toml).expect_err("unknown rule field");
    assert!(matches!(errors[0], ConfigError::UnknownKey { .. }));
}

#[test]
fn invalid_filter_pattern_is_a_diagnostic() {
    let toml = r#"
[[filters.rules]]
accept_outbound_message_id = "[a-"
"#;
    let errors = load_and_validate_str(toml).expect_err("pattern must compile");
    let rendered = errors[0].to_string();
    assert!(rendered.contains("accept_outbound_message_id"), "{rendered}");
}

#[test]
fn empty_document_gives_defaults() {
    let config = load_and_validate_str("").expect("defaults validate");
    assert_eq!(config.tracker.node_type, NodeType::Single);
    assert_eq!(config.tracker.intake_capacity, 10240);
    assert!(config.filters.rules.is_empty());
}

#[test]
fn environment_overrides_reach_every_section() {
    figment::Jail::expect_with(|jail| {
        jail.create_file(
            "lightmeter.toml",
            r#"
[tracker]
max_relay_depth = 16
"#,
        )?;
        jail.set_env("LIGHTMETER_TRACKER_MAX_RELAY_DEPTH", "4");
        jail.set_env("LIGHTMETER_TRACKER_NODE_TYPE", "multi");
        jail.set_env("LIGHTMETER_LOGGING_LEVEL", "trace");

        let config = lightmeter_config::load_and_validate_path(std::path::Path::new("lightmeter.toml"))
            .expect("environment overrides are known keys");
        assert_eq!(config.tracker.max_relay_depth, 4);
        assert_eq!(config.tracker.node_type, NodeType::Multi);
        assert_eq!(config.logging.level, "trace");
        Ok(())
    });
}
