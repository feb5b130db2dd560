// SPDX-FileCopyrightText: 2026 Lightmeter Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Postfix worker processes, shared by consecutive connections.

use lightmeter_core::TrackerError;
use rusqlite::{Connection, OptionalExtension, params};

use super::usage;
use crate::models::PidId;

/// Reference the `(host, pid)` worker, creating it on first sight.
pub fn acquire(conn: &Connection, host: &str, pid: i64) -> Result<PidId, TrackerError> {
    let existing: Option<PidId> = conn
        .prepare_cached("SELECT id FROM pids WHERE host = ?1 AND pid = ?2 ORDER BY id DESC LIMIT 1")?
        .query_row(params![host, pid], |row| row.get(0))
        .optional()?;

    match existing {
        Some(id) => {
            usage::increment(conn, "pids", id.0)?;
            Ok(id)
        }
        None => {
            conn.prepare_cached("INSERT INTO pids (host, pid, usage_count) VALUES (?1, ?2, 1)")?
                .execute(params![host, pid])?;
            Ok(PidId(conn.last_insert_rowid()))
        }
    }
}

/// Drop one reference; the row is deleted when none remain.
/// Returns whether the pid was deleted.
pub fn release(conn: &Connection, id: PidId) -> Result<bool, TrackerError> {
    match usage::decrement(conn, "pids", id.0)? {
        Some(0) => {
            conn.prepare_cached("DELETE FROM pids WHERE id = ?1")?
                .execute(params![id])?;
            Ok(true)
        }
        _ => Ok(false),
    }
}

/// Host the worker runs on.
pub fn host(conn: &Connection, id: PidId) -> Result<Option<String>, TrackerError> {
    Ok(conn
        .prepare_cached("SELECT host FROM pids WHERE id = ?1")?
        .query_row(params![id], |row| row.get(0))
        .optional()?)
}
