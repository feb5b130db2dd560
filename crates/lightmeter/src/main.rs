// SPDX-FileCopyrightText: 2026 Lightmeter Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Lightmeter - Postfix log to delivery result tracker.
//!
//! This is the binary entry point. Parsed log records come in as JSON
//! lines, delivery results go out as JSON lines on stdout, diagnostics go
//! to stderr.

#[cfg(not(target_env = "msvc"))]
use tikv_jemallocator::Jemalloc;

#[cfg(not(target_env = "msvc"))]
#[global_allocator]
static GLOBAL: Jemalloc = Jemalloc;

mod status;
mod track;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use lightmeter_config::{LightmeterConfig, NodeType};

/// Lightmeter - Postfix log to delivery result tracker.
#[derive(Parser, Debug)]
#[command(name = "lightmeter", version, about, long_about = None)]
struct Cli {
    /// Configuration file, instead of the standard search path.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Directory holding the correlation store.
    #[arg(long, global = true)]
    workspace: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

/// Available subcommands.
#[derive(Subcommand, Debug)]
enum Commands {
    /// Track parsed records and print delivery results.
    Track {
        /// Topology of the observed Postfix deployment.
        #[arg(long)]
        node_type: Option<NodeType>,

        /// JSON-lines record file; stdin when omitted or `-`.
        input: Option<PathBuf>,
    },
    /// Show what the correlation store still holds.
    Status {
        /// Output as JSON.
        #[arg(long)]
        json: bool,
    },
}

fn load_config(cli: &Cli) -> LightmeterConfig {
    let loaded = match &cli.config {
        Some(path) => lightmeter_config::load_and_validate_path(path),
        None => lightmeter_config::load_and_validate(),
    };
    let mut config = match loaded {
        Ok(config) => config,
        Err(errors) => {
            lightmeter_config::render_errors(&errors);
            std::process::exit(1);
        }
    };
    if let Some(workspace) = &cli.workspace {
        config.tracker.workspace_dir = workspace.clone();
    }
    config
}

/// Initialize the tracing subscriber. `RUST_LOG` takes precedence over the
/// configured level; output goes to stderr so stdout carries only results.
fn init_tracing(log_level: &str) {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("lightmeter={log_level},warn")));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_thread_names(false)
        .init();
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let mut config = load_config(&cli);

    let outcome = match cli.command {
        Commands::Track { node_type, input } => {
            if let Some(node_type) = node_type {
                config.tracker.node_type = node_type;
            }
            init_tracing(&config.logging.level);
            track::run_track(config, input).await
        }
        Commands::Status { json } => status::run_status(&config, json).await,
    };

    if let Err(err) = outcome {
        eprintln!("lightmeter: {err}");
        std::process::exit(if err.is_fatal() { 2 } else { 1 });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    #[cfg(not(target_env = "msvc"))]
    fn jemalloc_is_active() {
        // Only jemalloc supports advancing the epoch.
        use tikv_jemalloc_ctl::{epoch, stats};
        epoch::advance().unwrap();
        let allocated = stats::allocated::read().unwrap();
        assert!(allocated > 0, "jemalloc should report non-zero allocation");
    }

    #[test]
    fn track_accepts_node_type_and_input() {
        let cli = Cli::try_parse_from([
            "lightmeter",
            "--workspace",
            "/var/lib/lightmeter",
            "track",
            "--node-type",
            "multi",
            "records.jsonl",
        ])
        .unwrap();
        assert_eq!(cli.workspace, Some(PathBuf::from("/var/lib/lightmeter")));
        match cli.command {
            Commands::Track { node_type, input } => {
                assert_eq!(node_type, Some(NodeType::Multi));
                assert_eq!(input, Some(PathBuf::from("records.jsonl")));
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn unknown_node_type_is_rejected() {
        assert!(Cli::try_parse_from(["lightmeter", "track", "--node-type", "mesh"]).is_err());
    }
}
