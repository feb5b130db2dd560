// SPDX-FileCopyrightText: 2026 Lightmeter Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! SMTP sessions (real or synthesized for locally injected mail).

use lightmeter_core::TrackerError;
use rusqlite::{Connection, OptionalExtension, Row, params};

use super::usage;
use crate::models::{ConnectionId, ConnectionRow, PidId};

fn from_row(row: &Row<'_>) -> rusqlite::Result<ConnectionRow> {
    Ok(ConnectionRow {
        id: row.get(0)?,
        pid_id: row.get(1)?,
        usage_count: row.get(2)?,
    })
}

pub fn insert(conn: &Connection, pid_id: PidId) -> Result<ConnectionId, TrackerError> {
    conn.prepare_cached("INSERT INTO connections (pid_id, usage_count) VALUES (?1, 0)")?
        .execute(params![pid_id])?;
    Ok(ConnectionId(conn.last_insert_rowid()))
}

pub fn get(conn: &Connection, id: ConnectionId) -> Result<Option<ConnectionRow>, TrackerError> {
    Ok(conn
        .prepare_cached("SELECT id, pid_id, usage_count FROM connections WHERE id = ?1")?
        .query_row(params![id], from_row)
        .optional()?)
}

/// The most recent connection handled by the `(host, pid)` worker.
pub fn find_latest_by_pid(
    conn: &Connection,
    host: &str,
    pid: i64,
) -> Result<Option<ConnectionRow>, TrackerError> {
    Ok(conn
        .prepare_cached(
            "SELECT c.id, c.pid_id, c.usage_count
             FROM connections c JOIN pids p ON p.id = c.pid_id
             WHERE p.host = ?1 AND p.pid = ?2
             ORDER BY c.id DESC LIMIT 1",
        )?
        .query_row(params![host, pid], from_row)
        .optional()?)
}

pub fn increment_usage(conn: &Connection, id: ConnectionId) -> Result<(), TrackerError> {
    usage::increment(conn, "connections", id.0)
}

/// New usage count, `None` if the connection no longer exists.
pub fn decrement_usage(conn: &Connection, id: ConnectionId) -> Result<Option<i64>, TrackerError> {
    usage::decrement(conn, "connections", id.0)
}

/// Delete the row only; attributes and the pid are the caller's business.
pub fn delete(conn: &Connection, id: ConnectionId) -> Result<(), TrackerError> {
    conn.prepare_cached("DELETE FROM connections WHERE id = ?1")?
        .execute(params![id])?;
    Ok(())
}
