// SPDX-FileCopyrightText: 2026 Lightmeter Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The tracking state machine.
//!
//! Every record is applied to the correlation store inside the writer's
//! open transaction. Records about state that predates the log window are
//! gaps: they are logged and dropped, never reported as errors.

use lightmeter_config::NodeType;
use lightmeter_core::record::{
    BounceCreated, CleanupMessageAccepted, LightmeterDumpedHeader, LightmeterRelayedBounce, Pickup,
    QmgrMailQueued, QmgrMessageExpired, SmtpSentStatus, SmtpdConnect, SmtpdDisconnect,
    SmtpdMailAccepted,
};
use lightmeter_core::{
    MessageDirection, Payload, Record, RecordLocation, ResultEntry, ResultKey, SmtpStatus,
    TrackerError,
};
use lightmeter_storage::queries::{
    connections, data, fingerprints, notifications, parenting, pids, queues, results,
};
use lightmeter_storage::{ConnectionId, ParentingKind, QueueId, ResultId};
use rusqlite::Connection;
use tracing::{debug, trace, warn};

use crate::fingerprint;
use crate::gc;
use crate::node_type::{NodeTypeHandler, handler_for};

/// Queue name Postfix logs for messages rejected before a queue was assigned.
pub const NOQUEUE: &str = "NOQUEUE";

/// Applies records to the store.
pub struct StateMachine {
    handler: Box<dyn NodeTypeHandler>,
}

impl StateMachine {
    pub fn new(node_type: NodeType, max_relay_depth: usize) -> Self {
        Self {
            handler: handler_for(node_type, max_relay_depth),
        }
    }

    pub fn node_type(&self) -> NodeType {
        self.handler.node_type()
    }

    /// Apply one record. Errors abort the caller's transaction.
    pub fn apply(&self, conn: &Connection, record: &Record) -> Result<(), TrackerError> {
        if record.payload.queue() == Some(NOQUEUE) {
            warn!(
                kind = record.payload.kind(),
                file = %record.location.filename,
                line = record.location.line,
                "NOQUEUE records are not tracked, dropping"
            );
            return Ok(());
        }

        trace!(kind = record.payload.kind(), line = record.location.line, "applying record");

        let handler = self.handler.as_ref();
        match &record.payload {
            Payload::SmtpdConnect(p) => connect(conn, record, p),
            Payload::SmtpdDisconnect(p) => disconnect(conn, record, p),
            Payload::SmtpdMailAccepted(p) => mail_accepted(conn, handler, record, p),
            Payload::SmtpdReject(p) => release_live_handle(conn, record, &p.queue, "smtpd reject"),
            Payload::CleanupMessageAccepted(p) => cleanup_accepted(conn, handler, record, p),
            Payload::CleanupMilterReject(p) => {
                release_live_handle(conn, record, &p.queue, "milter reject")
            }
            Payload::QmgrMailQueued(p) => mail_queued(conn, handler, record, p),
            Payload::QmgrRemoved(p) => removed(conn, record, &p.queue),
            Payload::QmgrMessageExpired(p) => expired(conn, record, p),
            Payload::SmtpSentStatus(p) => match p.status {
                SmtpStatus::Sent | SmtpStatus::Received => handler.handle_sent(conn, record, p),
                SmtpStatus::Bounced | SmtpStatus::Deferred => failed_attempt(conn, record, p),
                SmtpStatus::Expired | SmtpStatus::Returned => {
                    debug!(queue = %p.queue, status = %p.status, "status line has no tracking semantics, dropping");
                    Ok(())
                }
            },
            Payload::BounceCreated(p) => bounce_created(conn, handler, record, p),
            Payload::Pickup(p) => pickup(conn, handler, record, p),
            Payload::LightmeterDumpedHeader(p) => dumped_header(conn, p),
            Payload::LightmeterRelayedBounce(p) => relayed_bounce(conn, record, p),
            Payload::QmgrReturnedToSender(_) | Payload::Warning(_) => {
                debug!(kind = record.payload.kind(), "payload has no tracking semantics, dropping");
                Ok(())
            }
        }
    }
}

fn connect(conn: &Connection, record: &Record, p: &SmtpdConnect) -> Result<(), TrackerError> {
    let pid = pids::acquire(conn, &record.header.host, record.header.pid)?;
    let id = connections::insert(conn, pid)?;
    data::insert(conn, id, ResultKey::ConnectionBegin, record.unix_time())?;
    data::insert(conn, id, ResultKey::ConnectionClientHostname, p.host.as_str())?;
    if let Some(ip) = p.ip {
        data::insert(conn, id, ResultKey::ConnectionClientIp, ip)?;
    }
    Ok(())
}

fn disconnect(conn: &Connection, record: &Record, p: &SmtpdDisconnect) -> Result<(), TrackerError> {
    let Some(row) =
        connections::find_latest_by_pid(conn, &record.header.host, record.header.pid)?
    else {
        debug!(host = %record.header.host, pid = record.header.pid, "disconnect without connect, dropping");
        return Ok(());
    };

    if !data::insert_if_absent(conn, row.id, ResultKey::ConnectionEnd, record.unix_time())? {
        debug!(connection = %row.id, "connection already closed");
        return Ok(());
    }

    let auth = p.stats.get("auth").copied().unwrap_or_default();
    data::insert_if_absent(conn, row.id, ResultKey::ConnectionAuthSuccessCount, auth.success)?;
    data::insert_if_absent(conn, row.id, ResultKey::ConnectionAuthTotalCount, auth.total)?;
    data::insert_if_absent(
        conn,
        row.id,
        ResultKey::ConnectionCommandStats,
        serde_json::to_string(&p.stats)?,
    )?;

    if row.usage_count == 0 {
        gc::delete_connection(conn, row.id)?;
    }
    Ok(())
}

fn mail_accepted(
    conn: &Connection,
    handler: &dyn NodeTypeHandler,
    record: &Record,
    p: &SmtpdMailAccepted,
) -> Result<(), TrackerError> {
    let Some(connection) =
        connections::find_latest_by_pid(conn, &record.header.host, record.header.pid)?
    else {
        debug!(queue = %p.queue, "mail accepted on an unknown connection, dropping");
        return Ok(());
    };
    handler.create_queue(conn, connection.id, &p.queue, record)?;
    Ok(())
}

fn cleanup_accepted(
    conn: &Connection,
    handler: &dyn NodeTypeHandler,
    record: &Record,
    p: &CleanupMessageAccepted,
) -> Result<(), TrackerError> {
    let queue = match queues::find_latest_by_name(conn, &p.queue)? {
        Some(q) if data::has(conn, q.id, ResultKey::QueueEnd)? => {
            warn!(
                queue = %p.queue,
                file = %record.location.filename,
                line = record.location.line,
                "cleanup logged after the queue was removed, dropping"
            );
            return Ok(());
        }
        Some(q) => q.id,
        None => {
            // Injected locally (sendmail, a re-injected bounce, ...).
            let connection = synthesize_connection(conn, record)?;
            handler.create_queue(conn, connection, &p.queue, record)?
        }
    };
    data::insert_if_absent(conn, queue, ResultKey::QueueMessageId, p.message_id.as_str())?;
    Ok(())
}

fn mail_queued(
    conn: &Connection,
    handler: &dyn NodeTypeHandler,
    record: &Record,
    p: &QmgrMailQueued,
) -> Result<(), TrackerError> {
    let Some(queue) = handler.find_queue(conn, &p.queue, record)? else {
        debug!(queue = %p.queue, "queued message seen before the log window, dropping");
        return Ok(());
    };
    data::insert_if_absent(conn, queue, ResultKey::QueueSenderLocalPart, p.sender_local_part.as_str())?;
    data::insert_if_absent(conn, queue, ResultKey::QueueSenderDomainPart, p.sender_domain_part.as_str())?;
    data::insert_if_absent(conn, queue, ResultKey::QueueOriginalMessageSize, p.size)?;
    data::insert_if_absent(conn, queue, ResultKey::QueueNrcpt, p.nrcpt)?;
    data::insert_if_absent(conn, queue, ResultKey::QueueBegin, record.unix_time())?;
    Ok(())
}

fn removed(conn: &Connection, record: &Record, name: &str) -> Result<(), TrackerError> {
    let Some(queue) = queues::find_latest_by_name(conn, name)? else {
        debug!(queue = %name, "removal of a queue seen before the log window, dropping");
        return Ok(());
    };

    if !data::insert_if_absent(conn, queue.id, ResultKey::QueueEnd, record.unix_time())? {
        debug!(queue = %name, "queue already removed");
        return Ok(());
    }
    data::insert(conn, queue.id, ResultKey::QueueCommitFilename, record.location.filename.as_str())?;
    data::insert(conn, queue.id, ResultKey::QueueCommitLine, record.location.line as i64)?;

    let promoted = results::promotable_for_queue(conn, queue.id)?;
    for result in &promoted {
        notifications::enqueue(conn, *result, &record.location)?;
    }
    if !promoted.is_empty() {
        debug!(queue = %name, results = promoted.len(), "results queued for notification");
    }

    gc::release_queue(conn, queue.id)
}

fn release_live_handle(
    conn: &Connection,
    record: &Record,
    name: &str,
    reason: &str,
) -> Result<(), TrackerError> {
    let Some(queue) = queues::find_latest_by_name(conn, name)? else {
        debug!(queue = %name, reason, "reject for an unknown queue, dropping");
        return Ok(());
    };
    if data::has(conn, queue.id, ResultKey::QueueEnd)? {
        // The live handle went with the removal.
        return Ok(());
    }
    // Mark the queue ended so a later removal does not release twice.
    data::insert(conn, queue.id, ResultKey::QueueEnd, record.unix_time())?;
    debug!(queue = %name, reason, "message rejected");
    gc::release_queue(conn, queue.id)
}

/// A bounced or deferred attempt. It is reported as it happened, whatever
/// the node type, without waiting for the relay chain to resolve.
fn failed_attempt(conn: &Connection, record: &Record, p: &SmtpSentStatus) -> Result<(), TrackerError> {
    let Some(queue) = queues::find_latest_by_name(conn, &p.queue)? else {
        warn!(
            queue = %p.queue,
            file = %record.location.filename,
            line = record.location.line,
            "failed delivery for an unknown queue, dropping"
        );
        return Ok(());
    };
    create_delivery_result(conn, record, queue.id, p)?;
    Ok(())
}

fn expired(conn: &Connection, record: &Record, p: &QmgrMessageExpired) -> Result<(), TrackerError> {
    let Some(queue) = queues::find_latest_by_name(conn, &p.queue)? else {
        debug!(queue = %p.queue, "expiry of a queue seen before the log window, dropping");
        return Ok(());
    };

    let checksum = fingerprint::expiry(record, p);
    if !fingerprints::record(conn, checksum, record.unix_time())? {
        debug!(queue = %p.queue, "expiry already tracked, skipping replay");
        return Ok(());
    }

    let result = new_result(conn, queue.id)?;
    data::insert(conn, result, ResultKey::ResultStatus, SmtpStatus::Expired.code())?;
    data::insert(conn, result, ResultKey::MessageExpiredTime, record.unix_time())?;
    data::insert(conn, result, ResultKey::ResultDeliveryTime, record.unix_time())?;
    data::insert(
        conn,
        result,
        ResultKey::ResultMessageDirection,
        MessageDirection::Outbound.code(),
    )?;
    write_provenance(conn, result, &record.location)?;
    data::insert(conn, result, ResultKey::ResultDeliveryLineChecksum, checksum)?;
    Ok(())
}

fn bounce_created(
    conn: &Connection,
    handler: &dyn NodeTypeHandler,
    record: &Record,
    p: &BounceCreated,
) -> Result<(), TrackerError> {
    let Some(orig) = queues::find_latest_by_name(conn, &p.queue)? else {
        debug!(queue = %p.queue, "bounce for a queue seen before the log window, dropping");
        return Ok(());
    };

    let child = match queues::find_latest_by_name(conn, &p.child_queue)? {
        Some(q) => q.id,
        None => {
            // The bounce daemon injects the notification itself.
            let connection = synthesize_connection(conn, record)?;
            handler.create_queue(conn, connection, &p.child_queue, record)?
        }
    };

    if orig.id == child {
        warn!(queue = %p.queue, "bounce notification reuses its own queue, ignoring");
        return Ok(());
    }
    if parenting::insert(conn, orig.id, child, ParentingKind::BounceCreation)? {
        queues::increment_usage(conn, orig.id)?;
    }
    Ok(())
}

fn pickup(
    conn: &Connection,
    handler: &dyn NodeTypeHandler,
    record: &Record,
    p: &Pickup,
) -> Result<(), TrackerError> {
    let queue = match queues::find_latest_by_name(conn, &p.queue)? {
        Some(q) => q.id,
        None => {
            let connection = synthesize_connection(conn, record)?;
            handler.create_queue(conn, connection, &p.queue, record)?
        }
    };
    data::insert_if_absent(conn, queue, ResultKey::PickupUid, p.uid)?;
    data::insert_if_absent(conn, queue, ResultKey::PickupSender, p.sender.as_str())?;
    Ok(())
}

fn dumped_header(conn: &Connection, p: &LightmeterDumpedHeader) -> Result<(), TrackerError> {
    let Some(queue) = queues::find_latest_by_name(conn, &p.queue)? else {
        debug!(queue = %p.queue, header = %p.key, "header for an unknown queue, dropping");
        return Ok(());
    };

    match p.key.as_str() {
        "In-Reply-To" => {
            if let Some(first) = p.values.first() {
                data::insert_if_absent(conn, queue.id, ResultKey::QueueInReplyToHeader, first.as_str())?;
            }
        }
        "References" => {
            data::insert_if_absent(
                conn,
                queue.id,
                ResultKey::QueueReferencesHeader,
                serde_json::to_string(&p.values)?,
            )?;
        }
        other => trace!(header = %other, "header not tracked"),
    }
    Ok(())
}

fn relayed_bounce(
    conn: &Connection,
    record: &Record,
    p: &LightmeterRelayedBounce,
) -> Result<(), TrackerError> {
    let Some(queue) = queues::find_latest_by_name(conn, &p.queue)? else {
        debug!(queue = %p.queue, "relayed bounce for an unknown queue, dropping");
        return Ok(());
    };
    let report = serde_json::json!({
        "parser_infos": p,
        "record_time": record.time,
    });
    data::insert_if_absent(conn, queue.id, ResultKey::QueueRelayedBounceJson, report.to_string())?;
    Ok(())
}

/// A connection for mail that did not arrive over SMTP. It carries no
/// client and counts as closed, so it goes away with its last queue.
fn synthesize_connection(conn: &Connection, record: &Record) -> Result<ConnectionId, TrackerError> {
    let pid = pids::acquire(conn, &record.header.host, record.header.pid)?;
    let id = connections::insert(conn, pid)?;
    data::insert(conn, id, ResultKey::ConnectionBegin, record.unix_time())?;
    Ok(id)
}

/// Insert a queue holding its live handle, bound to `connection` unless it
/// is a placeholder.
pub(crate) fn create_queue(
    conn: &Connection,
    connection: ConnectionId,
    name: &str,
    record: &Record,
) -> Result<QueueId, TrackerError> {
    let id = queues::insert(conn, connection, name, 1)?;
    data::insert(conn, id, ResultKey::QueueBegin, record.unix_time())?;
    if !connection.is_unknown() {
        connections::increment_usage(conn, connection)?;
    }
    trace!(queue = %name, id = %id, placeholder = connection.is_unknown(), "queue created");
    Ok(id)
}

/// Record that `parent` handed its message to `child`.
pub(crate) fn link_relay(
    conn: &Connection,
    parent: QueueId,
    child: QueueId,
) -> Result<(), TrackerError> {
    if parent == child {
        warn!(queue = %parent, "queue relayed to itself, ignoring");
        return Ok(());
    }
    if parenting::insert(conn, parent, child, ParentingKind::Relay)? {
        queues::increment_usage(conn, parent)?;
    }
    Ok(())
}

/// Where a removed queue was committed; `None` while it is still alive.
pub(crate) fn commit_location(
    conn: &Connection,
    queue: QueueId,
) -> Result<Option<RecordLocation>, TrackerError> {
    let filename = data::get(conn, queue, ResultKey::QueueCommitFilename)?;
    let line = data::get_int(conn, queue, ResultKey::QueueCommitLine)?;
    Ok(match (filename, line) {
        (Some(ResultEntry::Text(filename)), Some(line)) => Some(RecordLocation {
            filename,
            line: line as u64,
        }),
        _ => None,
    })
}

fn new_result(conn: &Connection, queue: QueueId) -> Result<ResultId, TrackerError> {
    let id = results::insert(conn, queue)?;
    queues::increment_usage(conn, queue)?;
    Ok(id)
}

fn write_provenance(
    conn: &Connection,
    result: ResultId,
    location: &RecordLocation,
) -> Result<(), TrackerError> {
    data::insert(conn, result, ResultKey::ResultDeliveryFilename, location.filename.as_str())?;
    data::insert(conn, result, ResultKey::ResultDeliveryFileLine, location.line as i64)?;
    Ok(())
}

fn optional<T: Into<ResultEntry>>(value: Option<T>) -> ResultEntry {
    value.map_or(ResultEntry::None, Into::into)
}

/// Create the result of a delivery attempt on `queue`.
///
/// Returns `None` when the same status line was already tracked.
pub(crate) fn create_delivery_result(
    conn: &Connection,
    record: &Record,
    queue: QueueId,
    p: &SmtpSentStatus,
) -> Result<Option<ResultId>, TrackerError> {
    let checksum = fingerprint::delivery_attempt(record, p);
    if !fingerprints::record(conn, checksum, record.unix_time())? {
        debug!(queue = %p.queue, line = record.location.line, "delivery attempt already tracked, skipping replay");
        return Ok(None);
    }

    let id = new_result(conn, queue)?;
    let direction = MessageDirection::from_daemon(&record.header.daemon);

    data::insert(conn, id, ResultKey::ResultRecipientLocalPart, p.recipient_local_part.as_str())?;
    data::insert(conn, id, ResultKey::ResultRecipientDomainPart, p.recipient_domain_part.as_str())?;
    data::insert(
        conn,
        id,
        ResultKey::ResultOrigRecipientLocalPart,
        optional(p.orig_recipient_local_part.as_deref()),
    )?;
    data::insert(
        conn,
        id,
        ResultKey::ResultOrigRecipientDomainPart,
        optional(p.orig_recipient_domain_part.as_deref()),
    )?;
    data::insert(conn, id, ResultKey::ResultDelay, p.delay)?;
    data::insert(conn, id, ResultKey::ResultDelaySmtpd, p.delays.smtpd)?;
    data::insert(conn, id, ResultKey::ResultDelayCleanup, p.delays.cleanup)?;
    data::insert(conn, id, ResultKey::ResultDelayQmgr, p.delays.qmgr)?;
    data::insert(conn, id, ResultKey::ResultDelaySmtp, p.delays.smtp)?;
    data::insert(conn, id, ResultKey::ResultDsn, p.dsn.as_str())?;
    data::insert(conn, id, ResultKey::ResultStatus, p.status.code())?;
    write_provenance(conn, id, &record.location)?;
    data::insert(conn, id, ResultKey::ResultDeliveryTime, record.unix_time())?;
    data::insert(conn, id, ResultKey::ResultMessageDirection, direction.code())?;
    data::insert(conn, id, ResultKey::ResultRelayName, optional(p.relay_name.as_deref()))?;
    data::insert(conn, id, ResultKey::ResultRelayIp, optional(p.relay_ip))?;
    data::insert(conn, id, ResultKey::ResultRelayPort, optional(p.relay_port))?;
    data::insert(conn, id, ResultKey::ResultDeliveryLineChecksum, checksum)?;

    trace!(queue = %p.queue, result = %id, status = %p.status, "delivery result created");
    Ok(Some(id))
}
