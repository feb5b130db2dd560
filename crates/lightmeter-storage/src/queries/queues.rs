// SPDX-FileCopyrightText: 2026 Lightmeter Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Postfix queue entries.

use lightmeter_core::TrackerError;
use rusqlite::{Connection, OptionalExtension, Row, params};

use super::usage;
use crate::models::{ConnectionId, QueueId, QueueRow};

fn from_row(row: &Row<'_>) -> rusqlite::Result<QueueRow> {
    Ok(QueueRow {
        id: row.get(0)?,
        connection_id: row.get(1)?,
        name: row.get(2)?,
        usage_count: row.get(3)?,
    })
}

pub fn insert(
    conn: &Connection,
    connection_id: ConnectionId,
    name: &str,
    usage_count: i64,
) -> Result<QueueId, TrackerError> {
    conn.prepare_cached(
        "INSERT INTO queues (connection_id, name, usage_count) VALUES (?1, ?2, ?3)",
    )?
    .execute(params![connection_id, name, usage_count])?;
    Ok(QueueId(conn.last_insert_rowid()))
}

pub fn get(conn: &Connection, id: QueueId) -> Result<Option<QueueRow>, TrackerError> {
    Ok(conn
        .prepare_cached("SELECT id, connection_id, name, usage_count FROM queues WHERE id = ?1")?
        .query_row(params![id], from_row)
        .optional()?)
}

/// The newest queue carrying `name`. Postfix recycles queue ids, so older
/// rows with the same name belong to earlier messages.
pub fn find_latest_by_name(conn: &Connection, name: &str) -> Result<Option<QueueRow>, TrackerError> {
    Ok(conn
        .prepare_cached(
            "SELECT id, connection_id, name, usage_count FROM queues
             WHERE name = ?1 ORDER BY id DESC LIMIT 1",
        )?
        .query_row(params![name], from_row)
        .optional()?)
}

/// Bind a placeholder queue to the connection it really came from.
pub fn set_connection(
    conn: &Connection,
    id: QueueId,
    connection_id: ConnectionId,
) -> Result<(), TrackerError> {
    conn.prepare_cached("UPDATE queues SET connection_id = ?2 WHERE id = ?1")?
        .execute(params![id, connection_id])?;
    Ok(())
}

pub fn increment_usage(conn: &Connection, id: QueueId) -> Result<(), TrackerError> {
    usage::increment(conn, "queues", id.0)
}

/// New usage count, `None` if the queue no longer exists.
pub fn decrement_usage(conn: &Connection, id: QueueId) -> Result<Option<i64>, TrackerError> {
    usage::decrement(conn, "queues", id.0)
}

pub fn delete(conn: &Connection, id: QueueId) -> Result<(), TrackerError> {
    conn.prepare_cached("DELETE FROM queues WHERE id = ?1")?
        .execute(params![id])?;
    Ok(())
}
