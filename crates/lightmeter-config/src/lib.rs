// SPDX-FileCopyrightText: 2026 Lightmeter Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Configuration for the Lightmeter delivery tracker.
//!
//! TOML files merged over compiled defaults, `LIGHTMETER_*` environment
//! overrides, strict unknown-key rejection, and miette diagnostics.
//!
//! ```no_run
//! let config = lightmeter_config::load_and_validate().expect("config errors");
//! println!("node type: {}", config.tracker.node_type);
//! ```

pub mod diagnostic;
pub mod loader;
pub mod model;
pub mod validation;

use std::path::Path;

pub use diagnostic::{ConfigError, render_errors};
pub use loader::{load_config, load_config_from_path, load_config_from_str};
pub use model::{FilterRule, FiltersConfig, LightmeterConfig, NodeType, TrackerConfig};

/// Load from the standard hierarchy and validate.
pub fn load_and_validate() -> Result<LightmeterConfig, Vec<ConfigError>> {
    finish(loader::load_config(), collect_toml_sources)
}

/// Load from an explicit file and validate.
pub fn load_and_validate_path(path: &Path) -> Result<LightmeterConfig, Vec<ConfigError>> {
    finish(loader::load_config_from_path(path), || {
        read_source(path).into_iter().collect()
    })
}

/// Load from an inline TOML document and validate.
pub fn load_and_validate_str(toml_content: &str) -> Result<LightmeterConfig, Vec<ConfigError>> {
    finish(loader::load_config_from_str(toml_content), || {
        vec![("<inline>".to_string(), toml_content.to_string())]
    })
}

fn finish(
    loaded: Result<LightmeterConfig, figment::Error>,
    sources: impl FnOnce() -> Vec<(String, String)>,
) -> Result<LightmeterConfig, Vec<ConfigError>> {
    match loaded {
        Ok(config) => {
            validation::validate_config(&config)?;
            Ok(config)
        }
        Err(err) => Err(diagnostic::figment_to_config_errors(err, &sources())),
    }
}

/// Figment records the resolved path of each file, so key on the same.
fn read_source(path: &Path) -> Option<(String, String)> {
    let content = std::fs::read_to_string(path).ok()?;
    let resolved = path.canonicalize().unwrap_or_else(|_| path.to_path_buf());
    Some((resolved.display().to_string(), content))
}

/// Contents of every config file in the hierarchy that exists.
fn collect_toml_sources() -> Vec<(String, String)> {
    let local = std::env::current_dir()
        .map(|d| d.join(loader::LOCAL_CONFIG))
        .unwrap_or_else(|_| loader::LOCAL_CONFIG.into());

    [
        Some(local),
        loader::user_config_path(),
        Some(loader::SYSTEM_CONFIG.into()),
    ]
    .into_iter()
    .flatten()
    .filter_map(|p| read_source(&p))
    .collect()
}
