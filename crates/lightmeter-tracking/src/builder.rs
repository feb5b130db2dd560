// SPDX-FileCopyrightText: 2026 Lightmeter Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Assembles a published [`DeliveryResult`] from the correlation store.
//!
//! Runs on a read-only connection against the last committed state. The
//! result is flat: attributes of the originating connection, the
//! originating queue, the delivering queue and the result itself, merged
//! in that order.

use lightmeter_config::NodeType;
use lightmeter_core::{DeliveryResult, ResultKey, TrackerError};
use lightmeter_storage::queries::{connections, data, pids, queues, results};
use lightmeter_storage::{AttributeOwner, ConnectionId, ResultId};
use rusqlite::Connection;

use crate::resolver;

#[derive(Debug, Clone, Copy)]
pub struct ResultBuilder {
    node_type: NodeType,
    max_relay_depth: usize,
}

impl ResultBuilder {
    pub fn new(node_type: NodeType, max_relay_depth: usize) -> Self {
        Self {
            node_type,
            max_relay_depth,
        }
    }

    /// Build the result for `result_id`, or `None` if the result is gone.
    pub fn build(
        &self,
        conn: &Connection,
        result_id: ResultId,
    ) -> Result<Option<DeliveryResult>, TrackerError> {
        let Some(queue_id) = results::queue_of(conn, result_id)? else {
            return Ok(None);
        };
        let Some(delivery_queue) = queues::get(conn, queue_id)? else {
            return Err(TrackerError::invariant(format!(
                "result {result_id} bound to missing queue {queue_id}"
            )));
        };

        let origin = resolver::origin_queue(conn, queue_id, self.node_type, self.max_relay_depth)?;
        let origin_row = queues::get(conn, origin)?;

        let mut result = DeliveryResult::new();

        if let Some(row) = &origin_row {
            if !row.connection_id.is_unknown() {
                merge(conn, &mut result, row.connection_id)?;
            }
        }
        merge(conn, &mut result, origin)?;

        if origin != queue_id {
            // The hop that delivered carries the size after content filtering.
            if let Some(size) = data::get(conn, queue_id, ResultKey::QueueOriginalMessageSize)? {
                result.set(ResultKey::QueueProcessedMessageSize, size);
            }
            for key in [ResultKey::QueueMessageId, ResultKey::QueueRelayedBounceJson] {
                if result.contains(key) {
                    continue;
                }
                if let Some(value) = data::get(conn, queue_id, key)? {
                    result.set(key, value);
                }
            }
        }
        result.set(ResultKey::QueueDeliveryName, delivery_queue.name.as_str());

        if let Some(server) = delivery_server(conn, delivery_queue.connection_id)? {
            result.set(ResultKey::ResultDeliveryServer, server);
        }

        merge(conn, &mut result, result_id)?;
        Ok(Some(result))
    }
}

fn merge<E: AttributeOwner>(
    conn: &Connection,
    result: &mut DeliveryResult,
    owner: E,
) -> Result<(), TrackerError> {
    for (key, entry) in data::all(conn, owner)? {
        result.set(key, entry);
    }
    Ok(())
}

/// Host whose Postfix delivered the message.
fn delivery_server(
    conn: &Connection,
    connection: ConnectionId,
) -> Result<Option<String>, TrackerError> {
    if connection.is_unknown() {
        return Ok(None);
    }
    let Some(row) = connections::get(conn, connection)? else {
        return Ok(None);
    };
    pids::host(conn, row.pid_id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use lightmeter_core::{ResultEntry, SmtpStatus};
    use lightmeter_storage::queries::parenting;
    use lightmeter_storage::{Database, ParentingKind};
    use tempfile::TempDir;

    #[tokio::test]
    async fn merges_connection_queue_and_result() {
        let dir = TempDir::new().unwrap();
        let db = Database::open_in(dir.path()).await.unwrap();
        let result = db
            .call(|conn| {
                let pid = pids::acquire(conn, "mx", 7)?;
                let c = connections::insert(conn, pid)?;
                data::insert(conn, c, ResultKey::ConnectionClientHostname, "client")?;
                let q = queues::insert(conn, c, "Q1", 1)?;
                data::insert(conn, q, ResultKey::QueueSenderLocalPart, "alice")?;
                data::insert(conn, q, ResultKey::QueueMessageId, "m@example.com")?;
                let r = results::insert(conn, q)?;
                data::insert(conn, r, ResultKey::ResultStatus, SmtpStatus::Sent.code())?;

                ResultBuilder::new(NodeType::Single, 16).build(conn, r)
            })
            .await
            .unwrap()
            .unwrap();

        assert_eq!(result.text(ResultKey::ConnectionClientHostname), Some("client"));
        assert_eq!(result.text(ResultKey::QueueSenderLocalPart), Some("alice"));
        assert_eq!(result.text(ResultKey::QueueDeliveryName), Some("Q1"));
        assert_eq!(result.text(ResultKey::ResultDeliveryServer), Some("mx"));
        assert_eq!(result.status(), Some(SmtpStatus::Sent));
        assert!(!result.contains(ResultKey::QueueProcessedMessageSize));
    }

    #[tokio::test]
    async fn relayed_result_takes_origin_attributes() {
        let dir = TempDir::new().unwrap();
        let db = Database::open_in(dir.path()).await.unwrap();
        let result = db
            .call(|conn| {
                let pid = pids::acquire(conn, "mx", 7)?;
                let c = connections::insert(conn, pid)?;
                let origin = queues::insert(conn, c, "A", 1)?;
                data::insert(conn, origin, ResultKey::QueueSenderLocalPart, "alice")?;
                data::insert(conn, origin, ResultKey::QueueOriginalMessageSize, 100i64)?;
                data::insert(conn, origin, ResultKey::QueueMessageId, "orig@example.com")?;

                let filtered = queues::insert(conn, c, "B", 1)?;
                data::insert(conn, filtered, ResultKey::QueueOriginalMessageSize, 140i64)?;
                data::insert(conn, filtered, ResultKey::QueueMessageId, "other@example.com")?;
                parenting::insert(conn, origin, filtered, ParentingKind::Relay)?;

                let r = results::insert(conn, filtered)?;
                ResultBuilder::new(NodeType::Single, 16).build(conn, r)
            })
            .await
            .unwrap()
            .unwrap();

        assert_eq!(result.text(ResultKey::QueueSenderLocalPart), Some("alice"));
        assert_eq!(result.int64(ResultKey::QueueOriginalMessageSize), Some(100));
        assert_eq!(result.int64(ResultKey::QueueProcessedMessageSize), Some(140));
        assert_eq!(result.text(ResultKey::QueueMessageId), Some("orig@example.com"));
        assert_eq!(result.text(ResultKey::QueueDeliveryName), Some("B"));
    }

    #[tokio::test]
    async fn placeholder_queue_has_no_delivery_server() {
        let dir = TempDir::new().unwrap();
        let db = Database::open_in(dir.path()).await.unwrap();
        let result = db
            .call(|conn| {
                let q = queues::insert(conn, ConnectionId::UNKNOWN, "P", 1)?;
                data::insert(conn, q, ResultKey::QueueMessageId, "late@example.com")?;
                let r = results::insert(conn, q)?;
                ResultBuilder::new(NodeType::Multi, 16).build(conn, r)
            })
            .await
            .unwrap()
            .unwrap();
        assert!(!result.contains(ResultKey::ResultDeliveryServer));
        assert_eq!(
            result.get(ResultKey::QueueMessageId),
            Some(&ResultEntry::Text("late@example.com".into()))
        );
    }

    #[tokio::test]
    async fn missing_result_builds_nothing() {
        let dir = TempDir::new().unwrap();
        let db = Database::open_in(dir.path()).await.unwrap();
        let result = db
            .call(|conn| ResultBuilder::new(NodeType::Single, 16).build(conn, ResultId(42)))
            .await
            .unwrap();
        assert!(result.is_none());
    }
}
