// SPDX-FileCopyrightText: 2026 Lightmeter Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Queue-to-queue edges (relay hops and bounce creation).

use lightmeter_core::TrackerError;
use rusqlite::{Connection, OptionalExtension, params};

use crate::models::{ParentingKind, QueueId};

/// Record `parent -> child`. Returns `false` if the edge already existed.
pub fn insert(
    conn: &Connection,
    parent: QueueId,
    child: QueueId,
    kind: ParentingKind,
) -> Result<bool, TrackerError> {
    if parent == child {
        return Err(TrackerError::invariant(format!(
            "queue {parent} cannot be its own parent"
        )));
    }
    let changed = conn
        .prepare_cached(
            "INSERT OR IGNORE INTO queue_parenting (parent_queue_id, child_queue_id, kind)
             VALUES (?1, ?2, ?3)",
        )?
        .execute(params![parent, child, kind])?;
    Ok(changed == 1)
}

/// The queue that relayed its message into `child`, if known.
pub fn relay_parent(conn: &Connection, child: QueueId) -> Result<Option<QueueId>, TrackerError> {
    Ok(conn
        .prepare_cached(
            "SELECT parent_queue_id FROM queue_parenting
             WHERE child_queue_id = ?1 AND kind = ?2
             ORDER BY id DESC LIMIT 1",
        )?
        .query_row(params![child, ParentingKind::Relay], |row| row.get(0))
        .optional()?)
}

pub fn has_children(conn: &Connection, parent: QueueId) -> Result<bool, TrackerError> {
    Ok(conn
        .prepare_cached("SELECT 1 FROM queue_parenting WHERE parent_queue_id = ?1 LIMIT 1")?
        .query_row(params![parent], |_| Ok(()))
        .optional()?
        .is_some())
}

/// Remove every edge that points at `child` and return the parents it had.
pub fn detach_child(conn: &Connection, child: QueueId) -> Result<Vec<QueueId>, TrackerError> {
    let parents = conn
        .prepare_cached(
            "SELECT parent_queue_id FROM queue_parenting WHERE child_queue_id = ?1 ORDER BY id",
        )?
        .query_map(params![child], |row| row.get(0))?
        .collect::<Result<Vec<QueueId>, _>>()?;

    conn.prepare_cached("DELETE FROM queue_parenting WHERE child_queue_id = ?1")?
        .execute(params![child])?;
    Ok(parents)
}
