// SPDX-FileCopyrightText: 2026 Lightmeter Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Delivery attempts bound to a queue.

use lightmeter_core::TrackerError;
use rusqlite::{Connection, OptionalExtension, params};

use crate::models::{QueueId, ResultId};

pub fn insert(conn: &Connection, queue_id: QueueId) -> Result<ResultId, TrackerError> {
    conn.prepare_cached("INSERT INTO results (queue_id) VALUES (?1)")?
        .execute(params![queue_id])?;
    Ok(ResultId(conn.last_insert_rowid()))
}

pub fn queue_of(conn: &Connection, id: ResultId) -> Result<Option<QueueId>, TrackerError> {
    Ok(conn
        .prepare_cached("SELECT queue_id FROM results WHERE id = ?1")?
        .query_row(params![id], |row| row.get(0))
        .optional()?)
}

/// Results of `queue_id` that are neither waiting for a missing upstream
/// nor already queued for publication.
pub fn promotable_for_queue(conn: &Connection, queue_id: QueueId) -> Result<Vec<ResultId>, TrackerError> {
    Ok(conn
        .prepare_cached(
            "SELECT r.id FROM results r
             WHERE r.queue_id = ?1
               AND NOT EXISTS (SELECT 1 FROM prenotification_results p WHERE p.result_id = r.id)
               AND NOT EXISTS (SELECT 1 FROM notification_queues n WHERE n.result_id = r.id)
             ORDER BY r.id",
        )?
        .query_map(params![queue_id], |row| row.get(0))?
        .collect::<Result<Vec<_>, _>>()?)
}

/// Delete the row only; attributes are the caller's business.
pub fn delete(conn: &Connection, id: ResultId) -> Result<bool, TrackerError> {
    let changed = conn
        .prepare_cached("DELETE FROM results WHERE id = ?1")?
        .execute(params![id])?;
    Ok(changed == 1)
}
