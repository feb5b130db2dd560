// SPDX-FileCopyrightText: 2026 Lightmeter Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Record builders that read like the Postfix log lines they stand for.
//!
//! Every record a builder hands out is one line further down the same log
//! file and one second later than the previous one, so a sequence of calls
//! reads like an excerpt of `mail.log`.

use std::cell::Cell;
use std::collections::BTreeMap;
use std::net::IpAddr;

use chrono::{DateTime, Duration, Utc};
use lightmeter_core::record::{
    BounceCreated, CleanupMessageAccepted, CleanupMilterReject, CommandStat, Delays, ExtraMessage,
    LightmeterDumpedHeader, LightmeterRelayedBounce, Pickup, QmgrMailQueued, QmgrMessageExpired, QmgrRemoved,
    QmgrReturnedToSender, SentQueued, SmtpSentStatus, SmtpdConnect, SmtpdDisconnect,
    SmtpdMailAccepted, SmtpdReject, Warning,
};
use lightmeter_core::{Header, Payload, Record, RecordLocation, SmtpStatus};

/// 2026-01-10T10:00:00Z
const START_EPOCH: i64 = 1_768_039_200;

/// Builds consecutive records of one host's log.
#[derive(Debug)]
pub struct RecordBuilder {
    host: String,
    filename: String,
    start: DateTime<Utc>,
    line: Cell<u64>,
    smtpd_pid: i64,
}

impl RecordBuilder {
    pub const SMTPD_PID: i64 = 1001;
    pub const CLEANUP_PID: i64 = 1002;
    pub const QMGR_PID: i64 = 1003;
    pub const SMTP_PID: i64 = 1004;
    pub const BOUNCE_PID: i64 = 1005;
    pub const PICKUP_PID: i64 = 1006;
    pub const LMTP_PID: i64 = 1007;

    pub fn new(host: &str) -> Self {
        Self {
            host: host.to_string(),
            filename: "mail.log".to_string(),
            start: DateTime::from_timestamp(START_EPOCH, 0).expect("valid start epoch"),
            line: Cell::new(0),
            smtpd_pid: Self::SMTPD_PID,
        }
    }

    /// Records of a second `smtpd` process on the same host.
    pub fn with_smtpd_pid(mut self, pid: i64) -> Self {
        self.smtpd_pid = pid;
        self
    }

    pub fn with_filename(mut self, filename: &str) -> Self {
        self.filename = filename.to_string();
        self
    }

    fn record(&self, daemon: &str, pid: i64, payload: Payload) -> Record {
        let line = self.line.get() + 1;
        self.line.set(line);
        Record {
            time: self.start + Duration::seconds(line as i64),
            location: RecordLocation {
                filename: self.filename.clone(),
                line,
            },
            header: Header {
                host: self.host.clone(),
                process: "postfix".to_string(),
                daemon: daemon.to_string(),
                pid,
            },
            payload,
        }
    }

    fn ip(ip: &str) -> Option<IpAddr> {
        ip.parse().ok()
    }

    /// `smtpd: connect from client[ip]`
    pub fn connect(&self, client: &str, ip: &str) -> Record {
        self.record(
            "smtpd",
            self.smtpd_pid,
            Payload::SmtpdConnect(SmtpdConnect {
                host: client.to_string(),
                ip: Self::ip(ip),
            }),
        )
    }

    /// `smtpd: QUEUE: client=client[ip]`
    pub fn mail_accepted(&self, queue: &str, client: &str, ip: &str) -> Record {
        self.record(
            "smtpd",
            self.smtpd_pid,
            Payload::SmtpdMailAccepted(SmtpdMailAccepted {
                queue: queue.to_string(),
                host: client.to_string(),
                ip: Self::ip(ip),
            }),
        )
    }

    /// `smtpd: NOQUEUE: reject: RCPT from ...`
    pub fn noqueue_reject(&self) -> Record {
        self.smtpd_reject("NOQUEUE")
    }

    /// `smtpd: QUEUE: reject: ...`
    pub fn smtpd_reject(&self, queue: &str) -> Record {
        self.record(
            "smtpd",
            self.smtpd_pid,
            Payload::SmtpdReject(SmtpdReject {
                queue: queue.to_string(),
            }),
        )
    }

    /// `cleanup: QUEUE: message-id=<message_id>`
    pub fn cleanup(&self, queue: &str, message_id: &str) -> Record {
        self.record(
            "cleanup",
            Self::CLEANUP_PID,
            Payload::CleanupMessageAccepted(CleanupMessageAccepted {
                queue: queue.to_string(),
                message_id: message_id.to_string(),
            }),
        )
    }

    /// `cleanup: QUEUE: milter-reject: END-OF-MESSAGE ...`
    pub fn milter_reject(&self, queue: &str) -> Record {
        self.record(
            "cleanup",
            Self::CLEANUP_PID,
            Payload::CleanupMilterReject(CleanupMilterReject {
                queue: queue.to_string(),
            }),
        )
    }

    /// `qmgr: QUEUE: from=<local@domain>, size=N, nrcpt=N (queue active)`
    pub fn mail_queued(&self, queue: &str, local: &str, domain: &str, size: i64, nrcpt: i64) -> Record {
        self.record(
            "qmgr",
            Self::QMGR_PID,
            Payload::QmgrMailQueued(QmgrMailQueued {
                queue: queue.to_string(),
                sender_local_part: local.to_string(),
                sender_domain_part: domain.to_string(),
                size,
                nrcpt,
            }),
        )
    }

    /// `smtp: QUEUE: to=<local@domain>, relay=..., status=...`
    pub fn status(
        &self,
        queue: &str,
        local: &str,
        domain: &str,
        status: SmtpStatus,
        dsn: &str,
    ) -> Record {
        self.record("smtp", Self::SMTP_PID, Payload::SmtpSentStatus(remote_status(queue, local, domain, status, dsn)))
    }

    pub fn sent(&self, queue: &str, local: &str, domain: &str) -> Record {
        self.status(queue, local, domain, SmtpStatus::Sent, "2.0.0")
    }

    pub fn bounced(&self, queue: &str, local: &str, domain: &str, dsn: &str) -> Record {
        self.status(queue, local, domain, SmtpStatus::Bounced, dsn)
    }

    pub fn deferred(&self, queue: &str, local: &str, domain: &str) -> Record {
        self.status(queue, local, domain, SmtpStatus::Deferred, "4.4.1")
    }

    /// `lmtp: QUEUE: to=<local@domain>, relay=...[private/dovecot-lmtp], status=sent`
    pub fn delivered_locally(&self, queue: &str, local: &str, domain: &str) -> Record {
        let mut status = remote_status(queue, local, domain, SmtpStatus::Sent, "2.0.0");
        status.relay_name = Some(self.host.clone());
        status.relay_ip = None;
        status.relay_port = None;
        self.record("lmtp", Self::LMTP_PID, Payload::SmtpSentStatus(status))
    }

    /// `smtp: QUEUE: to=<...>, relay=...:port, status=sent (250 2.0.0 Ok: queued as NEW)`
    pub fn sent_queued(
        &self,
        queue: &str,
        local: &str,
        domain: &str,
        new_queue: &str,
        internal_mta: bool,
        port: i64,
    ) -> Record {
        let mut status = remote_status(queue, local, domain, SmtpStatus::Sent, "2.0.0");
        status.relay_name = Some("relay.internal".to_string());
        status.relay_ip = Self::ip("10.0.0.2");
        status.relay_port = Some(port);
        status.extra = Some(ExtraMessage::SentQueued(SentQueued {
            smtp_code: 250,
            dsn: "2.0.0".to_string(),
            ip: Self::ip("10.0.0.2"),
            port,
            queue: new_queue.to_string(),
            internal_mta,
        }));
        self.record("smtp", Self::SMTP_PID, Payload::SmtpSentStatus(status))
    }

    /// `bounce: QUEUE: sender non-delivery notification: CHILD`
    pub fn bounce_created(&self, queue: &str, child: &str) -> Record {
        self.record(
            "bounce",
            Self::BOUNCE_PID,
            Payload::BounceCreated(BounceCreated {
                queue: queue.to_string(),
                child_queue: child.to_string(),
            }),
        )
    }

    /// `qmgr: QUEUE: removed`
    pub fn removed(&self, queue: &str) -> Record {
        self.record(
            "qmgr",
            Self::QMGR_PID,
            Payload::QmgrRemoved(QmgrRemoved {
                queue: queue.to_string(),
            }),
        )
    }

    /// `qmgr: QUEUE: from=<local@domain>, status=expired, returned to sender`
    pub fn expired(&self, queue: &str, local: &str, domain: &str) -> Record {
        self.record(
            "qmgr",
            Self::QMGR_PID,
            Payload::QmgrMessageExpired(QmgrMessageExpired {
                queue: queue.to_string(),
                sender_local_part: local.to_string(),
                sender_domain_part: domain.to_string(),
                message: "expired, returned to sender".to_string(),
            }),
        )
    }

    /// `qmgr: QUEUE: returned to sender`
    pub fn returned_to_sender(&self, queue: &str) -> Record {
        self.record(
            "qmgr",
            Self::QMGR_PID,
            Payload::QmgrReturnedToSender(QmgrReturnedToSender {
                queue: queue.to_string(),
            }),
        )
    }

    /// `smtpd: disconnect from client[ip] ehlo=1 auth=S/T mail=1 rcpt=1 data=1 quit=1`
    pub fn disconnect(&self, client: &str, auth_success: i64, auth_total: i64) -> Record {
        let mut stats = BTreeMap::new();
        for command in ["ehlo", "mail", "rcpt", "data", "quit"] {
            stats.insert(command.to_string(), CommandStat { success: 1, total: 1 });
        }
        if auth_total > 0 {
            stats.insert(
                "auth".to_string(),
                CommandStat {
                    success: auth_success,
                    total: auth_total,
                },
            );
        }
        self.record(
            "smtpd",
            self.smtpd_pid,
            Payload::SmtpdDisconnect(SmtpdDisconnect {
                host: client.to_string(),
                ip: None,
                stats,
            }),
        )
    }

    /// `pickup: QUEUE: uid=N from=<sender>`
    pub fn pickup(&self, queue: &str, uid: i64, sender: &str) -> Record {
        self.record(
            "pickup",
            Self::PICKUP_PID,
            Payload::Pickup(Pickup {
                queue: queue.to_string(),
                uid,
                sender: sender.to_string(),
            }),
        )
    }

    /// A header dumped by the Lightmeter milter.
    pub fn header(&self, queue: &str, key: &str, values: &[&str]) -> Record {
        self.record(
            "cleanup",
            Self::CLEANUP_PID,
            Payload::LightmeterDumpedHeader(LightmeterDumpedHeader {
                queue: queue.to_string(),
                key: key.to_string(),
                values: values.iter().map(|v| v.to_string()).collect(),
            }),
        )
    }

    /// A bounce report for `recipient` relayed back to us in queue `queue`.
    pub fn relayed_bounce(&self, queue: &str, recipient: &str, delivery_code: &str) -> Record {
        self.record(
            "cleanup",
            Self::CLEANUP_PID,
            Payload::LightmeterRelayedBounce(LightmeterRelayedBounce {
                queue: queue.to_string(),
                sender: format!("postmaster@{}", self.host),
                recipient: recipient.to_string(),
                delivery_code: delivery_code.to_string(),
                delivery_message: "user unknown".to_string(),
                reporting_mta: "mx.example.com".to_string(),
            }),
        )
    }

    /// `smtpd: warning: ...`
    pub fn warning(&self, message: &str) -> Record {
        self.record(
            "smtpd",
            self.smtpd_pid,
            Payload::Warning(Warning {
                message: message.to_string(),
            }),
        )
    }
}

fn remote_status(
    queue: &str,
    local: &str,
    domain: &str,
    status: SmtpStatus,
    dsn: &str,
) -> SmtpSentStatus {
    SmtpSentStatus {
        queue: queue.to_string(),
        recipient_local_part: local.to_string(),
        recipient_domain_part: domain.to_string(),
        orig_recipient_local_part: None,
        orig_recipient_domain_part: None,
        relay_name: Some(format!("mx.{domain}")),
        relay_ip: "8.8.8.8".parse().ok(),
        relay_port: Some(25),
        delay: 1.5,
        delays: Delays {
            smtpd: 0.1,
            cleanup: 0.2,
            qmgr: 0.3,
            smtp: 0.9,
        },
        dsn: dsn.to_string(),
        status,
        extra: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn records_advance_line_and_time() {
        let b = RecordBuilder::new("mx");
        let first = b.connect("client", "1.2.3.4");
        let second = b.removed("Q1");
        assert_eq!(first.location.line, 1);
        assert_eq!(second.location.line, 2);
        assert_eq!(second.time - first.time, Duration::seconds(1));
        assert_eq!(first.header.daemon, "smtpd");
        assert_eq!(second.header.pid, RecordBuilder::QMGR_PID);
    }

    #[test]
    fn local_delivery_uses_lmtp() {
        let b = RecordBuilder::new("mx");
        let record = b.delivered_locally("Q1", "local", "our.tld");
        assert_eq!(record.header.daemon, "lmtp");
    }
}
