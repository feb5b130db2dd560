// SPDX-FileCopyrightText: 2026 Lightmeter Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Topology-dependent parts of the state machine.
//!
//! A single Postfix node sees every queue from its first line, so a record
//! about an unknown queue is a gap in the log. Several nodes feeding one
//! tracker can log a downstream hop before its upstream one; unknown queues
//! then become placeholders and deliveries wait for their origin.

use lightmeter_config::NodeType;
use lightmeter_core::record::SmtpSentStatus;
use lightmeter_core::{MessageDirection, Record, TrackerError};
use lightmeter_storage::queries::{connections, notifications, queues, results};
use lightmeter_storage::{ConnectionId, QueueId};
use rusqlite::Connection;
use tracing::{debug, warn};

use crate::actions::{commit_location, create_delivery_result, create_queue, link_relay};
use crate::resolver::{self, Resolution};

/// Strategy seam between single and multi node tracking.
pub trait NodeTypeHandler: Send + Sync {
    fn node_type(&self) -> NodeType;

    /// Create (or complete) the queue of a message accepted over `connection`.
    fn create_queue(
        &self,
        conn: &Connection,
        connection: ConnectionId,
        name: &str,
        record: &Record,
    ) -> Result<QueueId, TrackerError>;

    /// Look up the queue a `qmgr` line refers to.
    fn find_queue(
        &self,
        conn: &Connection,
        name: &str,
        record: &Record,
    ) -> Result<Option<QueueId>, TrackerError>;

    /// Apply an `smtp`/`lmtp` status line.
    fn handle_sent(
        &self,
        conn: &Connection,
        record: &Record,
        status: &SmtpSentStatus,
    ) -> Result<(), TrackerError>;
}

pub fn handler_for(node_type: NodeType, max_relay_depth: usize) -> Box<dyn NodeTypeHandler> {
    match node_type {
        NodeType::Single => Box::new(SingleNode),
        NodeType::Multi => Box::new(MultiNode { max_relay_depth }),
    }
}

pub struct SingleNode;

impl NodeTypeHandler for SingleNode {
    fn node_type(&self) -> NodeType {
        NodeType::Single
    }

    fn create_queue(
        &self,
        conn: &Connection,
        connection: ConnectionId,
        name: &str,
        record: &Record,
    ) -> Result<QueueId, TrackerError> {
        create_queue(conn, connection, name, record)
    }

    fn find_queue(
        &self,
        conn: &Connection,
        name: &str,
        _record: &Record,
    ) -> Result<Option<QueueId>, TrackerError> {
        Ok(queues::find_latest_by_name(conn, name)?.map(|q| q.id))
    }

    fn handle_sent(
        &self,
        conn: &Connection,
        record: &Record,
        status: &SmtpSentStatus,
    ) -> Result<(), TrackerError> {
        let Some(orig) = queues::find_latest_by_name(conn, &status.queue)? else {
            debug!(queue = %status.queue, "delivery for a queue seen before the log window, dropping");
            return Ok(());
        };

        let Some(requeued) = status.sent_queued() else {
            create_delivery_result(conn, record, orig.id, status)?;
            return Ok(());
        };

        // Handed to a content filter or back to ourselves: the new queue
        // already exists by the time its parent logs the hand-off.
        let Some(new) = queues::find_latest_by_name(conn, &requeued.queue)? else {
            warn!(
                queue = %status.queue,
                new_queue = %requeued.queue,
                file = %record.location.filename,
                line = record.location.line,
                "re-queued message lost, ignoring"
            );
            return Ok(());
        };
        link_relay(conn, orig.id, new.id)?;
        Ok(())
    }
}

pub struct MultiNode {
    max_relay_depth: usize,
}

impl MultiNode {
    fn deliver(
        &self,
        conn: &Connection,
        record: &Record,
        queue: QueueId,
        status: &SmtpSentStatus,
    ) -> Result<(), TrackerError> {
        // Relayed inbound mail is not traced back across nodes.
        let resolution = if MessageDirection::from_daemon(&record.header.daemon)
            == MessageDirection::Incoming
        {
            Resolution::Deliver
        } else {
            resolver::resolve(conn, queue, self.max_relay_depth)?
        };

        match resolution {
            Resolution::Deliver => {
                create_delivery_result(conn, record, queue, status)?;
            }
            Resolution::Defer { top } => {
                if let Some(result) = create_delivery_result(conn, record, queue, status)? {
                    debug!(queue = %status.queue, top = %top, "delivery waits for its upstream hop");
                    notifications::add_prenotification(conn, top, result)?;
                }
            }
            Resolution::TooDeep => {
                warn!(
                    queue = %status.queue,
                    max_depth = self.max_relay_depth,
                    "relay chain deeper than the limit, dropping delivery"
                );
            }
        }
        Ok(())
    }

    fn requeue(
        &self,
        conn: &Connection,
        record: &Record,
        orig: QueueId,
        new_name: &str,
    ) -> Result<(), TrackerError> {
        let new = match queues::find_latest_by_name(conn, new_name)? {
            Some(q) => q.id,
            None => create_queue(conn, ConnectionId::UNKNOWN, new_name, record)?,
        };
        link_relay(conn, orig, new)?;

        // The hand-off fills the gap results of `new` were waiting for.
        for result in notifications::take_prenotifications(conn, new)? {
            let Some(queue) = results::queue_of(conn, result)? else {
                continue;
            };
            // Results of queues still alive are promoted at their removal.
            if let Some(location) = commit_location(conn, queue)? {
                notifications::enqueue(conn, result, &location)?;
            }
        }
        Ok(())
    }
}

impl NodeTypeHandler for MultiNode {
    fn node_type(&self) -> NodeType {
        NodeType::Multi
    }

    fn create_queue(
        &self,
        conn: &Connection,
        connection: ConnectionId,
        name: &str,
        record: &Record,
    ) -> Result<QueueId, TrackerError> {
        match queues::find_latest_by_name(conn, name)? {
            Some(existing) if existing.is_placeholder() => {
                queues::set_connection(conn, existing.id, connection)?;
                connections::increment_usage(conn, connection)?;
                debug!(queue = %name, "placeholder queue bound to its connection");
                Ok(existing.id)
            }
            _ => create_queue(conn, connection, name, record),
        }
    }

    fn find_queue(
        &self,
        conn: &Connection,
        name: &str,
        record: &Record,
    ) -> Result<Option<QueueId>, TrackerError> {
        if let Some(existing) = queues::find_latest_by_name(conn, name)? {
            return Ok(Some(existing.id));
        }
        // The upstream node has not been read yet.
        create_queue(conn, ConnectionId::UNKNOWN, name, record).map(Some)
    }

    fn handle_sent(
        &self,
        conn: &Connection,
        record: &Record,
        status: &SmtpSentStatus,
    ) -> Result<(), TrackerError> {
        let Some(orig) = queues::find_latest_by_name(conn, &status.queue)? else {
            debug!(queue = %status.queue, "delivery for a queue seen before the log window, dropping");
            return Ok(());
        };

        match status.sent_queued() {
            Some(requeued) if requeued.internal_mta || status.relay_port != Some(25) => {
                self.requeue(conn, record, orig.id, &requeued.queue)
            }
            _ => self.deliver(conn, record, orig.id, status),
        }
    }
}
