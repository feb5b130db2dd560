// SPDX-FileCopyrightText: 2026 Lightmeter Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Layered configuration loading with Figment.
//!
//! Lookup order, later wins: compiled defaults, `/etc/lightmeter/lightmeter.toml`,
//! `~/.config/lightmeter/lightmeter.toml`, `./lightmeter.toml`, then
//! `LIGHTMETER_*` environment variables.

#![allow(clippy::result_large_err)] // figment::Error is external and cannot be boxed without wrapper

use std::path::{Path, PathBuf};

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};

use crate::model::LightmeterConfig;

pub(crate) const SYSTEM_CONFIG: &str = "/etc/lightmeter/lightmeter.toml";
pub(crate) const LOCAL_CONFIG: &str = "lightmeter.toml";

/// Path of the per-user config file, if the platform has a config dir.
pub(crate) fn user_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("lightmeter/lightmeter.toml"))
}

/// Load from the standard hierarchy with environment overrides.
pub fn load_config() -> Result<LightmeterConfig, figment::Error> {
    build_figment().extract()
}

/// Load from an inline TOML document only. No files, no environment.
pub fn load_config_from_str(toml_content: &str) -> Result<LightmeterConfig, figment::Error> {
    Figment::new()
        .merge(Serialized::defaults(LightmeterConfig::default()))
        .merge(Toml::string(toml_content))
        .extract()
}

/// Load from one explicit file, still honouring environment overrides.
pub fn load_config_from_path(path: &Path) -> Result<LightmeterConfig, figment::Error> {
    Figment::new()
        .merge(Serialized::defaults(LightmeterConfig::default()))
        .merge(Toml::file(path))
        .merge(env_provider())
        .extract()
}

/// The Figment behind [`load_config`], before extraction.
pub fn build_figment() -> Figment {
    let mut figment = Figment::new()
        .merge(Serialized::defaults(LightmeterConfig::default()))
        .merge(Toml::file(SYSTEM_CONFIG));
    if let Some(user) = user_config_path() {
        figment = figment.merge(Toml::file(user));
    }
    figment.merge(Toml::file(LOCAL_CONFIG)).merge(env_provider())
}

/// `LIGHTMETER_TRACKER_NODE_TYPE` -> `tracker.node_type`.
///
/// Only the section prefix is turned into a dot; key names keep their
/// underscores. `Env::split("_")` would break `node_type` apart. Figment
/// hands keys over in their original (upper) case.
fn env_provider() -> Env {
    Env::prefixed("LIGHTMETER_").map(|key| {
        let key = key.as_str().to_ascii_lowercase();
        let mapped = ["tracker_", "logging_"]
            .iter()
            .find_map(|section| {
                key.strip_prefix(section)
                    .map(|rest| format!("{}.{rest}", section.trim_end_matches('_')))
            })
            .unwrap_or(key);
        mapped.into()
    })
}
