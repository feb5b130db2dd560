// SPDX-FileCopyrightText: 2026 Lightmeter Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Read-side summaries of the store.

use lightmeter_core::{ResultKey, TrackerError};
use rusqlite::{Connection, params};

use crate::models::TableCounts;

pub fn table_counts(conn: &Connection) -> Result<TableCounts, TrackerError> {
    let count = |table: &str| -> Result<i64, TrackerError> {
        Ok(conn.query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |row| row.get(0))?)
    };

    Ok(TableCounts {
        pids: count("pids")?,
        connections: count("connections")?,
        connection_data: count("connection_data")?,
        queues: count("queues")?,
        queue_data: count("queue_data")?,
        queue_parenting: count("queue_parenting")?,
        results: count("results")?,
        result_data: count("result_data")?,
        notification_queues: count("notification_queues")?,
        prenotification_results: count("prenotification_results")?,
    })
}

/// Newest log timestamp (unix seconds) still known to the store.
///
/// Lets the embedding program resume reading logs where a previous run
/// stopped.
pub fn most_recent_log_time(conn: &Connection) -> Result<Option<i64>, TrackerError> {
    Ok(conn.query_row(
        "SELECT MAX(ts) FROM (
             SELECT MAX(value) AS ts FROM connection_data WHERE key IN (?1, ?2)
             UNION ALL
             SELECT MAX(value) FROM queue_data WHERE key IN (?3, ?4)
             UNION ALL
             SELECT MAX(value) FROM result_data WHERE key = ?5
             UNION ALL
             SELECT MAX(delivery_ts) FROM delivery_fingerprints
         )",
        params![
            ResultKey::ConnectionBegin.id(),
            ResultKey::ConnectionEnd.id(),
            ResultKey::QueueBegin.id(),
            ResultKey::QueueEnd.id(),
            ResultKey::ResultDeliveryTime.id(),
        ],
        |row| row.get(0),
    )?)
}
