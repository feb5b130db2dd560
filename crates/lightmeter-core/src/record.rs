// SPDX-FileCopyrightText: 2026 Lightmeter Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Typed log records as produced by the Postfix log parser.
//!
//! The parser itself lives outside this workspace. Its output reaches the
//! tracker as [`Record`] values whose [`Payload`] is a closed tagged union:
//! the state machine dispatches on the tag, never on strings.

use std::collections::BTreeMap;
use std::net::IpAddr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::IntoStaticStr;

/// Where a record came from in the original log stream.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RecordLocation {
    pub filename: String,
    pub line: u64,
}

/// The syslog-style prefix of a Postfix log line.
///
/// `postfix/smtp[2417]` on `mail.example.com` becomes
/// `{host: "mail.example.com", process: "postfix", daemon: "smtp", pid: 2417}`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Header {
    pub host: String,
    pub process: String,
    pub daemon: String,
    pub pid: i64,
}

/// One parsed log line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub time: DateTime<Utc>,
    pub location: RecordLocation,
    pub header: Header,
    pub payload: Payload,
}

impl Record {
    /// Unix timestamp (seconds) of the record.
    pub fn unix_time(&self) -> i64 {
        self.time.timestamp()
    }
}

/// Outcome of a delivery attempt, as logged by `smtp`/`lmtp`.
///
/// The numeric codes are persisted and published; never renumber them.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, strum::Display, strum::EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum SmtpStatus {
    Sent = 1,
    Bounced = 2,
    Deferred = 3,
    Expired = 4,
    Returned = 5,
    Received = 6,
}

impl SmtpStatus {
    pub fn code(self) -> i64 {
        self as i64
    }

    pub fn from_code(code: i64) -> Option<Self> {
        match code {
            1 => Some(SmtpStatus::Sent),
            2 => Some(SmtpStatus::Bounced),
            3 => Some(SmtpStatus::Deferred),
            4 => Some(SmtpStatus::Expired),
            5 => Some(SmtpStatus::Returned),
            6 => Some(SmtpStatus::Received),
            _ => None,
        }
    }
}

/// Per-stage delay breakdown from the `delays=a/b/c/d` field.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Delays {
    pub smtpd: f64,
    pub cleanup: f64,
    pub qmgr: f64,
    pub smtp: f64,
}

/// Success/total counters for one SMTP command in a disconnect summary.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandStat {
    pub success: i64,
    pub total: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SmtpdConnect {
    pub host: String,
    #[serde(default)]
    pub ip: Option<IpAddr>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SmtpdDisconnect {
    pub host: String,
    #[serde(default)]
    pub ip: Option<IpAddr>,
    /// Keyed by lowercase command name (`ehlo`, `mail`, `auth`, ...).
    #[serde(default)]
    pub stats: BTreeMap<String, CommandStat>,
}

impl SmtpdDisconnect {
    /// Successful `AUTH` commands in the session, 0 when not reported.
    pub fn auth_success(&self) -> i64 {
        self.stats.get("auth").map(|s| s.success).unwrap_or(0)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SmtpdMailAccepted {
    pub queue: String,
    pub host: String,
    #[serde(default)]
    pub ip: Option<IpAddr>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SmtpdReject {
    pub queue: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CleanupMessageAccepted {
    pub queue: String,
    pub message_id: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CleanupMilterReject {
    pub queue: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QmgrMailQueued {
    pub queue: String,
    pub sender_local_part: String,
    pub sender_domain_part: String,
    pub size: i64,
    pub nrcpt: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QmgrRemoved {
    pub queue: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QmgrMessageExpired {
    pub queue: String,
    #[serde(default)]
    pub sender_local_part: String,
    #[serde(default)]
    pub sender_domain_part: String,
    #[serde(default)]
    pub message: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QmgrReturnedToSender {
    pub queue: String,
}

/// `status=sent (250 2.0.0 Ok: queued as 4F1C3...)` parsed out of the
/// free-text trailer of a delivery line.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SentQueued {
    pub smtp_code: i64,
    pub dsn: String,
    #[serde(default)]
    pub ip: Option<IpAddr>,
    pub port: i64,
    pub queue: String,
    /// The receiving side is a content filter or another internal MTA.
    #[serde(default)]
    pub internal_mta: bool,
}

/// Structured trailers of an `smtp` status line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ExtraMessage {
    SentQueued(SentQueued),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SmtpSentStatus {
    pub queue: String,
    pub recipient_local_part: String,
    pub recipient_domain_part: String,
    #[serde(default)]
    pub orig_recipient_local_part: Option<String>,
    #[serde(default)]
    pub orig_recipient_domain_part: Option<String>,
    #[serde(default)]
    pub relay_name: Option<String>,
    #[serde(default)]
    pub relay_ip: Option<IpAddr>,
    #[serde(default)]
    pub relay_port: Option<i64>,
    pub delay: f64,
    #[serde(default)]
    pub delays: Delays,
    pub dsn: String,
    pub status: SmtpStatus,
    #[serde(default)]
    pub extra: Option<ExtraMessage>,
}

impl SmtpSentStatus {
    /// The re-queue trailer, if this attempt handed the message to another queue.
    pub fn sent_queued(&self) -> Option<&SentQueued> {
        match &self.extra {
            Some(ExtraMessage::SentQueued(q)) => Some(q),
            None => None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BounceCreated {
    pub queue: String,
    pub child_queue: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Pickup {
    pub queue: String,
    pub uid: i64,
    pub sender: String,
}

/// A message header dumped into the log by Lightmeter's own milter.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LightmeterDumpedHeader {
    pub queue: String,
    pub key: String,
    #[serde(default)]
    pub values: Vec<String>,
}

/// A bounce report another MTA relayed back through us, as decoded by
/// Lightmeter's own milter.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LightmeterRelayedBounce {
    pub queue: String,
    pub sender: String,
    pub recipient: String,
    pub delivery_code: String,
    pub delivery_message: String,
    pub reporting_mta: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Warning {
    pub message: String,
}

/// The closed set of payloads the parser can emit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, IntoStaticStr)]
#[serde(tag = "type")]
pub enum Payload {
    SmtpdConnect(SmtpdConnect),
    SmtpdDisconnect(SmtpdDisconnect),
    SmtpdMailAccepted(SmtpdMailAccepted),
    SmtpdReject(SmtpdReject),
    CleanupMessageAccepted(CleanupMessageAccepted),
    CleanupMilterReject(CleanupMilterReject),
    QmgrMailQueued(QmgrMailQueued),
    QmgrRemoved(QmgrRemoved),
    QmgrMessageExpired(QmgrMessageExpired),
    QmgrReturnedToSender(QmgrReturnedToSender),
    SmtpSentStatus(SmtpSentStatus),
    BounceCreated(BounceCreated),
    Pickup(Pickup),
    LightmeterDumpedHeader(LightmeterDumpedHeader),
    LightmeterRelayedBounce(LightmeterRelayedBounce),
    Warning(Warning),
}

impl Payload {
    /// Variant name, for logs.
    pub fn kind(&self) -> &'static str {
        self.into()
    }

    /// The queue name the payload refers to, if any.
    pub fn queue(&self) -> Option<&str> {
        match self {
            Payload::SmtpdMailAccepted(p) => Some(&p.queue),
            Payload::SmtpdReject(p) => Some(&p.queue),
            Payload::CleanupMessageAccepted(p) => Some(&p.queue),
            Payload::CleanupMilterReject(p) => Some(&p.queue),
            Payload::QmgrMailQueued(p) => Some(&p.queue),
            Payload::QmgrRemoved(p) => Some(&p.queue),
            Payload::QmgrMessageExpired(p) => Some(&p.queue),
            Payload::QmgrReturnedToSender(p) => Some(&p.queue),
            Payload::SmtpSentStatus(p) => Some(&p.queue),
            Payload::BounceCreated(p) => Some(&p.queue),
            Payload::Pickup(p) => Some(&p.queue),
            Payload::LightmeterDumpedHeader(p) => Some(&p.queue),
            Payload::LightmeterRelayedBounce(p) => Some(&p.queue),
            Payload::SmtpdConnect(_) | Payload::SmtpdDisconnect(_) | Payload::Warning(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn payload_deserializes_from_tagged_json() {
        let json = r#"{
            "time": "2026-01-10T10:00:00Z",
            "location": {"filename": "mail.log", "line": 3},
            "header": {"host": "mx1", "process": "postfix", "daemon": "smtpd", "pid": 42},
            "payload": {"type": "SmtpdConnect", "host": "client1", "ip": "1.2.3.4"}
        }"#;

        let record: Record = serde_json::from_str(json).expect("should deserialize");
        assert_eq!(record.header.pid, 42);
        assert_eq!(record.payload.kind(), "SmtpdConnect");
        match record.payload {
            Payload::SmtpdConnect(c) => {
                assert_eq!(c.host, "client1");
                assert_eq!(c.ip, Some("1.2.3.4".parse().unwrap()));
            }
            other => panic!("unexpected payload {other:?}"),
        }
    }

    #[test]
    fn sent_status_with_queued_trailer() {
        let json = r#"{"type": "SmtpSentStatus", "queue": "Q1",
            "recipient_local_part": "bob", "recipient_domain_part": "example.com",
            "relay_name": "relay.internal", "relay_port": 10025,
            "delay": 1.5, "dsn": "2.0.0", "status": "sent",
            "extra": {"type": "SentQueued", "smtp_code": 250, "dsn": "2.0.0",
                      "port": 10025, "queue": "Q2", "internal_mta": true}}"#;

        let payload: Payload = serde_json::from_str(json).expect("should deserialize");
        let Payload::SmtpSentStatus(status) = payload else {
            panic!("wrong variant");
        };
        let queued = status.sent_queued().expect("trailer present");
        assert_eq!(queued.queue, "Q2");
        assert!(queued.internal_mta);
        assert_eq!(status.status, SmtpStatus::Sent);
    }

    #[test]
    fn relayed_bounce_names_its_queue() {
        let json = r#"{"type": "LightmeterRelayedBounce", "queue": "B7",
            "sender": "me@our.tld", "recipient": "gone@example.com",
            "delivery_code": "5.1.1", "delivery_message": "user unknown",
            "reporting_mta": "mx.example.com"}"#;

        let payload: Payload = serde_json::from_str(json).expect("should deserialize");
        assert_eq!(payload.kind(), "LightmeterRelayedBounce");
        assert_eq!(payload.queue(), Some("B7"));
    }

    #[test]
    fn status_codes_are_stable() {
        assert_eq!(SmtpStatus::Sent.code(), 1);
        assert_eq!(SmtpStatus::Bounced.code(), 2);
        assert_eq!(SmtpStatus::Deferred.code(), 3);
        assert_eq!(SmtpStatus::Expired.code(), 4);
        for code in 1..=6 {
            assert_eq!(SmtpStatus::from_code(code).unwrap().code(), code);
        }
        assert_eq!(SmtpStatus::from_code(0), None);
    }

    #[test]
    fn auth_success_defaults_to_zero() {
        let mut d = SmtpdDisconnect::default();
        assert_eq!(d.auth_success(), 0);
        d.stats.insert("auth".into(), CommandStat { success: 2, total: 3 });
        assert_eq!(d.auth_success(), 2);
    }
}
