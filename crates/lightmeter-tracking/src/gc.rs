// SPDX-FileCopyrightText: 2026 Lightmeter Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Reference-counted garbage collection of tracking entities.
//!
//! Usage counters hold:
//! - pids: one per connection;
//! - connections: one per queue bound to them;
//! - queues: one live handle (dropped at `qmgr removed` or a reject), one per
//!   result and one per child parenting edge.
//!
//! Deletion cascades eagerly inside the caller's transaction.

use lightmeter_core::{ResultKey, TrackerError};
use lightmeter_storage::queries::{connections, data, notifications, parenting, pids, queues, results};
use lightmeter_storage::{ConnectionId, QueueId, ResultId};
use rusqlite::Connection;
use tracing::trace;

/// Drop one reference to a queue, deleting it when none is left.
pub fn release_queue(conn: &Connection, id: QueueId) -> Result<(), TrackerError> {
    match queues::decrement_usage(conn, id)? {
        Some(0) => delete_queue(conn, id),
        _ => Ok(()),
    }
}

/// Delete a queue, its attributes and its edges to parent queues, then
/// release the parents and the owning connection.
pub fn delete_queue(conn: &Connection, id: QueueId) -> Result<(), TrackerError> {
    let Some(row) = queues::get(conn, id)? else {
        return Ok(());
    };
    if parenting::has_children(conn, id)? {
        return Err(TrackerError::invariant(format!(
            "queue {id} ({}) deleted while child queues remain",
            row.name
        )));
    }

    data::delete_all(conn, id)?;
    queues::delete(conn, id)?;
    trace!(queue = %row.name, id = %id, "queue deleted");

    for parent in parenting::detach_child(conn, id)? {
        release_queue(conn, parent)?;
    }

    if !row.connection_id.is_unknown() {
        release_connection(conn, row.connection_id)?;
    }
    Ok(())
}

/// Drop one queue reference to a connection. The connection goes away once
/// it holds no queue and is closed.
pub fn release_connection(conn: &Connection, id: ConnectionId) -> Result<(), TrackerError> {
    match connections::decrement_usage(conn, id)? {
        Some(0) if is_closed(conn, id)? => delete_connection(conn, id),
        _ => Ok(()),
    }
}

/// A connection is closed once `disconnect` was seen. Synthesized
/// connections have no client and never see a `disconnect`, so they count
/// as closed from the start.
pub fn is_closed(conn: &Connection, id: ConnectionId) -> Result<bool, TrackerError> {
    Ok(data::has(conn, id, ResultKey::ConnectionEnd)?
        || !data::has(conn, id, ResultKey::ConnectionClientHostname)?)
}

pub fn delete_connection(conn: &Connection, id: ConnectionId) -> Result<(), TrackerError> {
    let Some(row) = connections::get(conn, id)? else {
        return Ok(());
    };
    data::delete_all(conn, id)?;
    connections::delete(conn, id)?;
    pids::release(conn, row.pid_id)?;
    trace!(connection = %id, "connection deleted");
    Ok(())
}

/// Forget a result after it was published (or filtered out) and release
/// the queue it was bound to.
pub fn discard_result(conn: &Connection, id: ResultId) -> Result<(), TrackerError> {
    let Some(queue) = results::queue_of(conn, id)? else {
        return Ok(());
    };
    data::delete_all(conn, id)?;
    notifications::delete_for_result(conn, id)?;
    notifications::delete_prenotifications_for_result(conn, id)?;
    results::delete(conn, id)?;
    release_queue(conn, queue)
}

#[cfg(test)]
mod tests {
    use super::*;
    use lightmeter_storage::{Database, ParentingKind};
    use lightmeter_storage::queries::stats;
    use tempfile::TempDir;

    async fn open() -> (TempDir, Database) {
        let dir = TempDir::new().unwrap();
        let db = Database::open_in(dir.path()).await.unwrap();
        (dir, db)
    }

    #[tokio::test]
    async fn queue_release_cascades_to_connection_and_pid() {
        let (_dir, db) = open().await;
        let counts = db
            .call(|conn| {
                let pid = pids::acquire(conn, "mx", 1)?;
                let c = connections::insert(conn, pid)?;
                data::insert(conn, c, ResultKey::ConnectionClientHostname, "client")?;
                data::insert(conn, c, ResultKey::ConnectionEnd, 10i64)?;
                let q = queues::insert(conn, c, "Q", 1)?;
                connections::increment_usage(conn, c)?;
                data::insert(conn, q, ResultKey::QueueBegin, 5i64)?;

                release_queue(conn, q)?;
                stats::table_counts(conn)
            })
            .await
            .unwrap();
        assert!(counts.is_empty(), "{counts:?}");
    }

    #[tokio::test]
    async fn open_connection_survives_its_last_queue() {
        let (_dir, db) = open().await;
        let counts = db
            .call(|conn| {
                let pid = pids::acquire(conn, "mx", 1)?;
                let c = connections::insert(conn, pid)?;
                data::insert(conn, c, ResultKey::ConnectionClientHostname, "client")?;
                let q = queues::insert(conn, c, "Q", 1)?;
                connections::increment_usage(conn, c)?;
                release_queue(conn, q)?;
                stats::table_counts(conn)
            })
            .await
            .unwrap();
        assert_eq!(counts.connections, 1);
        assert_eq!(counts.pids, 1);
        assert_eq!(counts.queues, 0);
    }

    #[tokio::test]
    async fn deleting_child_releases_parent() {
        let (_dir, db) = open().await;
        let counts = db
            .call(|conn| {
                let parent = queues::insert(conn, ConnectionId::UNKNOWN, "P", 1)?;
                let child = queues::insert(conn, ConnectionId::UNKNOWN, "C", 1)?;
                parenting::insert(conn, parent, child, ParentingKind::Relay)?;
                queues::increment_usage(conn, parent)?;

                // The parent loses its live handle first but the edge keeps it.
                release_queue(conn, parent)?;
                assert!(queues::get(conn, parent)?.is_some());

                release_queue(conn, child)?;
                stats::table_counts(conn)
            })
            .await
            .unwrap();
        assert!(counts.is_empty(), "{counts:?}");
    }

    #[tokio::test]
    async fn discarding_result_releases_queue() {
        let (_dir, db) = open().await;
        let counts = db
            .call(|conn| {
                let q = queues::insert(conn, ConnectionId::UNKNOWN, "Q", 1)?;
                let r = results::insert(conn, q)?;
                queues::increment_usage(conn, q)?;
                data::insert(conn, r, ResultKey::ResultDsn, "2.0.0")?;
                notifications::enqueue(
                    conn,
                    r,
                    &lightmeter_core::RecordLocation {
                        filename: "mail.log".into(),
                        line: 3,
                    },
                )?;
                release_queue(conn, q)?;

                discard_result(conn, r)?;
                // A second cleanup of the same result is harmless.
                discard_result(conn, r)?;
                stats::table_counts(conn)
            })
            .await
            .unwrap();
        assert!(counts.is_empty(), "{counts:?}");
    }

    #[tokio::test]
    async fn deleting_a_parent_with_children_is_fatal() {
        let (_dir, db) = open().await;
        let err = db
            .call(|conn| {
                let parent = queues::insert(conn, ConnectionId::UNKNOWN, "P", 1)?;
                let child = queues::insert(conn, ConnectionId::UNKNOWN, "C", 1)?;
                parenting::insert(conn, parent, child, ParentingKind::Relay)?;
                delete_queue(conn, parent)
            })
            .await
            .unwrap_err();
        assert!(err.is_fatal());
    }
}
