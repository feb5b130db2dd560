// SPDX-FileCopyrightText: 2026 Lightmeter Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! `notification_queues` and `prenotification_results`.

use lightmeter_core::{RecordLocation, TrackerError};
use rusqlite::{Connection, params};

use crate::models::{NotificationEntry, QueueId, ResultId};

/// Queue a result for publication. At most one row exists per result;
/// returns `false` if it was already queued.
pub fn enqueue(
    conn: &Connection,
    result_id: ResultId,
    location: &RecordLocation,
) -> Result<bool, TrackerError> {
    let changed = conn
        .prepare_cached(
            "INSERT OR IGNORE INTO notification_queues (result_id, filename, line)
             VALUES (?1, ?2, ?3)",
        )?
        .execute(params![result_id, location.filename, location.line as i64])?;
    Ok(changed == 1)
}

/// Mark up to `limit` pending notifications as dispatched and return them
/// in queueing order.
pub fn take_undispatched(
    conn: &Connection,
    limit: usize,
) -> Result<Vec<NotificationEntry>, TrackerError> {
    let mut entries = conn
        .prepare_cached(
            "UPDATE notification_queues SET dispatched = 1
             WHERE id IN (SELECT id FROM notification_queues
                          WHERE dispatched = 0 ORDER BY id LIMIT ?1)
             RETURNING id, result_id, filename, line",
        )?
        .query_map(params![limit as i64], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                NotificationEntry {
                    result_id: row.get(1)?,
                    location: RecordLocation {
                        filename: row.get(2)?,
                        line: row.get::<_, i64>(3)? as u64,
                    },
                },
            ))
        })?
        .collect::<Result<Vec<_>, _>>()?;

    // RETURNING gives no ordering guarantee.
    entries.sort_by_key(|(id, _)| *id);
    Ok(entries.into_iter().map(|(_, e)| e).collect())
}

pub fn delete_for_result(conn: &Connection, result_id: ResultId) -> Result<(), TrackerError> {
    conn.prepare_cached("DELETE FROM notification_queues WHERE result_id = ?1")?
        .execute(params![result_id])?;
    Ok(())
}

/// Make every dispatched-but-unconfirmed notification dispatchable again.
pub fn reset_dispatched(conn: &Connection) -> Result<usize, TrackerError> {
    Ok(conn.execute(
        "UPDATE notification_queues SET dispatched = 0 WHERE dispatched = 1",
        [],
    )?)
}

/// Park a result until `queue_id` gets linked to its upstream.
pub fn add_prenotification(
    conn: &Connection,
    queue_id: QueueId,
    result_id: ResultId,
) -> Result<(), TrackerError> {
    conn.prepare_cached(
        "INSERT INTO prenotification_results (queue_id, result_id) VALUES (?1, ?2)",
    )?
    .execute(params![queue_id, result_id])?;
    Ok(())
}

/// Remove and return every result parked on `queue_id`.
pub fn take_prenotifications(
    conn: &Connection,
    queue_id: QueueId,
) -> Result<Vec<ResultId>, TrackerError> {
    let ids = conn
        .prepare_cached(
            "SELECT result_id FROM prenotification_results WHERE queue_id = ?1 ORDER BY id",
        )?
        .query_map(params![queue_id], |row| row.get(0))?
        .collect::<Result<Vec<ResultId>, _>>()?;

    conn.prepare_cached("DELETE FROM prenotification_results WHERE queue_id = ?1")?
        .execute(params![queue_id])?;
    Ok(ids)
}

pub fn delete_prenotifications_for_result(
    conn: &Connection,
    result_id: ResultId,
) -> Result<(), TrackerError> {
    conn.prepare_cached("DELETE FROM prenotification_results WHERE result_id = ?1")?
        .execute(params![result_id])?;
    Ok(())
}
