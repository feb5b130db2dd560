// SPDX-FileCopyrightText: 2026 Lightmeter Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! `lightmeter status` command implementation.
//!
//! Reads the correlation store of the configured workspace on a read-only
//! connection, so it is safe to run next to a tracker.

use std::io::IsTerminal;
use std::time::Duration;

use chrono::DateTime;
use lightmeter_config::LightmeterConfig;
use lightmeter_core::TrackerError;
use lightmeter_storage::queries::stats;
use lightmeter_storage::{DATABASE_FILENAME, ReadPool, TableCounts};
use serde::Serialize;

/// Structured status output for `--json` mode.
#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub store: String,
    pub exists: bool,
    /// RFC 3339 time a restarted log reader can resume from.
    pub resume_from: Option<String>,
    pub pending: Option<PendingCounts>,
}

/// Tracking rows still waiting for their log lines.
#[derive(Debug, Serialize)]
pub struct PendingCounts {
    pub connections: i64,
    pub queues: i64,
    pub results: i64,
    pub notifications: i64,
    pub prenotifications: i64,
}

impl From<TableCounts> for PendingCounts {
    fn from(counts: TableCounts) -> Self {
        Self {
            connections: counts.connections,
            queues: counts.queues,
            results: counts.results,
            notifications: counts.notification_queues,
            prenotifications: counts.prenotification_results,
        }
    }
}

/// Run the `lightmeter status` command.
pub async fn run_status(config: &LightmeterConfig, json: bool) -> Result<(), TrackerError> {
    let path = config.tracker.workspace_dir.join(DATABASE_FILENAME);
    let mut response = StatusResponse {
        store: path.display().to_string(),
        exists: path.exists(),
        resume_from: None,
        pending: None,
    };

    if response.exists {
        let pool = ReadPool::open(&path, 1, Duration::from_millis(config.tracker.read_timeout_ms)).await?;
        let (counts, recent) = pool
            .query(|conn| Ok((stats::table_counts(conn)?, stats::most_recent_log_time(conn)?)))
            .await?;
        pool.close().await?;

        response.resume_from = recent
            .and_then(|secs| DateTime::from_timestamp(secs, 0))
            .map(|t| t.to_rfc3339());
        response.pending = Some(counts.into());
    }

    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(&response).unwrap_or_else(|_| "{}".to_string())
        );
    } else {
        print_status(&response, std::io::stdout().is_terminal());
    }
    Ok(())
}

fn print_status(status: &StatusResponse, use_color: bool) {
    println!();
    println!("  lightmeter status");
    println!("  {}", "-".repeat(35));
    println!("    Store:    {}", status.store);

    let Some(pending) = &status.pending else {
        if use_color {
            use colored::Colorize;
            println!("    State:    {}", "no store yet".yellow());
        } else {
            println!("    State:    [--] no store yet");
        }
        println!();
        return;
    };

    if use_color {
        use colored::Colorize;
        println!("    State:    {}", "ok".green());
    } else {
        println!("    State:    [OK]");
    }
    println!(
        "    Resume:   {}",
        status.resume_from.as_deref().unwrap_or("from the start")
    );
    println!("    Open:     {} connections, {} queues", pending.connections, pending.queues);
    println!(
        "    Results:  {} held, {} to notify, {} awaiting upstream",
        pending.results, pending.notifications, pending.prenotifications
    );
    println!();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pending_counts_pick_tracking_rows() {
        let counts = TableCounts {
            connections: 2,
            queues: 3,
            results: 4,
            notification_queues: 1,
            prenotification_results: 5,
            ..Default::default()
        };
        let pending = PendingCounts::from(counts);
        assert_eq!(pending.queues, 3);
        assert_eq!(pending.prenotifications, 5);
    }

    #[test]
    fn missing_store_serializes() {
        let resp = StatusResponse {
            store: "/tmp/logtracker.db".into(),
            exists: false,
            resume_from: None,
            pending: None,
        };
        let json = serde_json::to_string(&resp).unwrap();
        assert!(json.contains("\"exists\":false"));
        assert!(json.contains("\"pending\":null"));
    }

    #[tokio::test]
    async fn status_reads_an_existing_store() {
        let dir = tempfile::TempDir::new().unwrap();
        let db = lightmeter_storage::Database::open_in(dir.path()).await.unwrap();
        db.close().await.unwrap();

        let mut config = LightmeterConfig::default();
        config.tracker.workspace_dir = dir.path().to_path_buf();
        run_status(&config, true).await.unwrap();
    }
}
