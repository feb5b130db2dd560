// SPDX-FileCopyrightText: 2026 Lightmeter Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Relay chain walks.
//!
//! With several Postfix nodes feeding one tracker, a queue's upstream can
//! be logged by another node, possibly later. The walks below follow
//! `relay` parenting edges from child to parent; bounce edges are never
//! followed. Every walk is bounded, so a cycle in the edges cannot hang the
//! writer.

use lightmeter_config::NodeType;
use lightmeter_core::{ResultKey, TrackerError};
use lightmeter_storage::QueueId;
use lightmeter_storage::queries::{data, parenting, queues};
use rusqlite::Connection;

/// Whether a delivery seen on a queue can be published.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    /// An ancestor was submitted over an authenticated session.
    Deliver,
    /// The chain ends at `top` without authentication; the result waits
    /// until `top` gets linked to its upstream.
    Defer { top: QueueId },
    /// More relay hops than the configured limit.
    TooDeep,
}

/// Successful `AUTH` commands on the session that created `queue`.
///
/// A session that has not been closed yet reports 0.
pub fn auth_success_count(conn: &Connection, queue: QueueId) -> Result<i64, TrackerError> {
    let Some(row) = queues::get(conn, queue)? else {
        return Ok(0);
    };
    if row.connection_id.is_unknown() {
        return Ok(0);
    }
    Ok(data::get_int(conn, row.connection_id, ResultKey::ConnectionAuthSuccessCount)?.unwrap_or(0))
}

/// Walk up from `start` looking for an authenticated submission.
///
/// At most `max_depth` relay edges are followed.
pub fn resolve(
    conn: &Connection,
    start: QueueId,
    max_depth: usize,
) -> Result<Resolution, TrackerError> {
    let mut current = start;
    for _ in 0..=max_depth {
        if auth_success_count(conn, current)? > 0 {
            return Ok(Resolution::Deliver);
        }
        match parenting::relay_parent(conn, current)? {
            Some(parent) => current = parent,
            None => return Ok(Resolution::Defer { top: current }),
        }
    }
    Ok(Resolution::TooDeep)
}

/// The queue whose connection and sender attributes describe a delivery
/// made from `start`.
///
/// Placeholders are skipped. On a multi node setup the walk stops at the
/// first authenticated ancestor; otherwise it climbs to the topmost known
/// queue.
pub fn origin_queue(
    conn: &Connection,
    start: QueueId,
    node_type: NodeType,
    max_depth: usize,
) -> Result<QueueId, TrackerError> {
    let mut origin = None;
    let mut current = start;

    for _ in 0..=max_depth {
        let Some(row) = queues::get(conn, current)? else {
            break;
        };
        if !row.is_placeholder() {
            if node_type == NodeType::Multi && auth_success_count(conn, row.id)? > 0 {
                return Ok(row.id);
            }
            origin = Some(row.id);
        }
        match parenting::relay_parent(conn, current)? {
            Some(parent) => current = parent,
            None => break,
        }
    }

    Ok(origin.unwrap_or(start))
}

#[cfg(test)]
mod tests {
    use super::*;
    use lightmeter_storage::queries::{connections, pids};
    use lightmeter_storage::{ConnectionId, Database, ParentingKind};
    use tempfile::TempDir;

    /// `names[0]` is the root; each following queue is relayed from the previous one.
    fn chain(conn: &Connection, names: &[&str], root_auth: Option<i64>) -> Result<Vec<QueueId>, TrackerError> {
        let pid = pids::acquire(conn, "mx", 1)?;
        let c = connections::insert(conn, pid)?;
        if let Some(auth) = root_auth {
            data::insert(conn, c, ResultKey::ConnectionAuthSuccessCount, auth)?;
        }
        let mut ids: Vec<QueueId> = Vec::new();
        for (i, name) in names.iter().enumerate() {
            let owner = if i == 0 { c } else { ConnectionId::UNKNOWN };
            let id = queues::insert(conn, owner, name, 1)?;
            if let Some(parent) = ids.last() {
                parenting::insert(conn, *parent, id, ParentingKind::Relay)?;
            }
            ids.push(id);
        }
        Ok(ids)
    }

    #[tokio::test]
    async fn authenticated_root_delivers() {
        let dir = TempDir::new().unwrap();
        let db = Database::open_in(dir.path()).await.unwrap();
        let resolution = db
            .call(|conn| {
                let ids = chain(conn, &["A", "B", "C"], Some(1))?;
                resolve(conn, ids[2], 16)
            })
            .await
            .unwrap();
        assert_eq!(resolution, Resolution::Deliver);
    }

    #[tokio::test]
    async fn unauthenticated_chain_defers_on_its_top() {
        let dir = TempDir::new().unwrap();
        let db = Database::open_in(dir.path()).await.unwrap();
        let (resolution, top) = db
            .call(|conn| {
                let ids = chain(conn, &["A", "B"], None)?;
                Ok((resolve(conn, ids[1], 16)?, ids[0]))
            })
            .await
            .unwrap();
        assert_eq!(resolution, Resolution::Defer { top });
    }

    #[tokio::test]
    async fn depth_limit_counts_edges() {
        let dir = TempDir::new().unwrap();
        let db = Database::open_in(dir.path()).await.unwrap();
        let (at_limit, beyond) = db
            .call(|conn| {
                let ids = chain(conn, &["A", "B", "C", "D"], Some(1))?;
                Ok((resolve(conn, ids[3], 3)?, resolve(conn, ids[3], 2)?))
            })
            .await
            .unwrap();
        assert_eq!(at_limit, Resolution::Deliver);
        assert_eq!(beyond, Resolution::TooDeep);
    }

    #[tokio::test]
    async fn cycles_are_cut() {
        let dir = TempDir::new().unwrap();
        let db = Database::open_in(dir.path()).await.unwrap();
        let resolution = db
            .call(|conn| {
                let a = queues::insert(conn, ConnectionId::UNKNOWN, "A", 1)?;
                let b = queues::insert(conn, ConnectionId::UNKNOWN, "B", 1)?;
                parenting::insert(conn, a, b, ParentingKind::Relay)?;
                parenting::insert(conn, b, a, ParentingKind::Relay)?;
                resolve(conn, a, 8)
            })
            .await
            .unwrap();
        assert_eq!(resolution, Resolution::TooDeep);
    }

    #[tokio::test]
    async fn origin_skips_placeholders_and_bounces() {
        let dir = TempDir::new().unwrap();
        let db = Database::open_in(dir.path()).await.unwrap();
        let (origin, root, bounce_origin, bounce) = db
            .call(|conn| {
                let ids = chain(conn, &["A", "B", "C"], None)?;
                let bounce = queues::insert(conn, ConnectionId::UNKNOWN, "BOUNCE", 1)?;
                parenting::insert(conn, ids[2], bounce, ParentingKind::BounceCreation)?;
                Ok((
                    origin_queue(conn, ids[2], NodeType::Single, 16)?,
                    ids[0],
                    origin_queue(conn, bounce, NodeType::Single, 16)?,
                    bounce,
                ))
            })
            .await
            .unwrap();
        assert_eq!(origin, root);
        assert_eq!(bounce_origin, bounce);
    }
}
