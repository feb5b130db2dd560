// SPDX-FileCopyrightText: 2026 Lightmeter Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The flat delivery result handed to downstream consumers.
//!
//! A [`DeliveryResult`] is an ordered map from [`ResultKey`] to a typed
//! [`ResultEntry`]. Key ids double as the attribute keys of the store's
//! `*_data` side tables, so they are part of the persisted schema:
//! new keys are appended, existing ids never change.

use std::collections::BTreeMap;

use serde::ser::SerializeMap;
use serde::{Deserialize, Serialize, Serializer};
use strum::{EnumCount, EnumIter, FromRepr, IntoStaticStr};

use crate::record::SmtpStatus;

/// Attribute keys with stable numeric identities.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    EnumIter,
    EnumCount,
    FromRepr,
    IntoStaticStr,
    strum::Display,
    strum::EnumString,
)]
#[repr(i64)]
pub enum ResultKey {
    #[strum(serialize = "conn_ts_begin")]
    ConnectionBegin = 1,
    #[strum(serialize = "conn_ts_end")]
    ConnectionEnd = 2,
    #[strum(serialize = "client_hostname")]
    ConnectionClientHostname = 3,
    #[strum(serialize = "client_ip")]
    ConnectionClientIp = 4,

    #[strum(serialize = "queue_ts_begin")]
    QueueBegin = 5,
    #[strum(serialize = "queue_ts_end")]
    QueueEnd = 6,
    #[strum(serialize = "sender_local_part")]
    QueueSenderLocalPart = 7,
    #[strum(serialize = "sender_domain_part")]
    QueueSenderDomainPart = 8,
    #[strum(serialize = "orig_size")]
    QueueOriginalMessageSize = 9,
    #[strum(serialize = "processed_size")]
    QueueProcessedMessageSize = 10,
    #[strum(serialize = "nrcpt")]
    QueueNrcpt = 11,
    #[strum(serialize = "message_id")]
    QueueMessageId = 12,
    #[strum(serialize = "delivery_queue")]
    QueueDeliveryName = 13,

    #[strum(serialize = "delivery_ts")]
    ResultDeliveryTime = 14,
    #[strum(serialize = "recipient_local_part")]
    ResultRecipientLocalPart = 15,
    #[strum(serialize = "recipient_domain_part")]
    ResultRecipientDomainPart = 16,
    #[strum(serialize = "orig_recipient_local_part")]
    ResultOrigRecipientLocalPart = 17,
    #[strum(serialize = "orig_recipient_domain_part")]
    ResultOrigRecipientDomainPart = 18,
    #[strum(serialize = "delay")]
    ResultDelay = 19,
    #[strum(serialize = "delay_smtpd")]
    ResultDelaySmtpd = 20,
    #[strum(serialize = "delay_cleanup")]
    ResultDelayCleanup = 21,
    #[strum(serialize = "delay_qmgr")]
    ResultDelayQmgr = 22,
    #[strum(serialize = "delay_smtp")]
    ResultDelaySmtp = 23,
    #[strum(serialize = "dsn")]
    ResultDsn = 24,
    #[strum(serialize = "status")]
    ResultStatus = 25,
    #[strum(serialize = "delivery_filename")]
    ResultDeliveryFilename = 26,
    #[strum(serialize = "delivery_line")]
    ResultDeliveryFileLine = 27,
    #[strum(serialize = "relay_name")]
    ResultRelayName = 28,
    #[strum(serialize = "relay_ip")]
    ResultRelayIp = 29,
    #[strum(serialize = "relay_port")]
    ResultRelayPort = 30,
    #[strum(serialize = "delivery_server")]
    ResultDeliveryServer = 31,
    #[strum(serialize = "message_direction")]
    ResultMessageDirection = 32,

    #[strum(serialize = "pickup_uid")]
    PickupUid = 33,
    #[strum(serialize = "pickup_sender")]
    PickupSender = 34,

    #[strum(serialize = "auth_success_count")]
    ConnectionAuthSuccessCount = 35,
    #[strum(serialize = "auth_total_count")]
    ConnectionAuthTotalCount = 36,
    #[strum(serialize = "command_stats")]
    ConnectionCommandStats = 37,
    #[strum(serialize = "message_expired_ts")]
    MessageExpiredTime = 38,
    #[strum(serialize = "in_reply_to")]
    QueueInReplyToHeader = 39,
    #[strum(serialize = "references")]
    QueueReferencesHeader = 40,
    #[strum(serialize = "delivery_line_checksum")]
    ResultDeliveryLineChecksum = 41,
    #[strum(serialize = "queue_commit_filename")]
    QueueCommitFilename = 42,
    #[strum(serialize = "queue_commit_line")]
    QueueCommitLine = 43,
    #[strum(serialize = "relayed_bounce")]
    QueueRelayedBounceJson = 44,
}

impl ResultKey {
    /// The persisted numeric id.
    pub fn id(self) -> i64 {
        self as i64
    }

    /// Looks a key up by persisted id.
    pub fn from_id(id: i64) -> Option<Self> {
        Self::from_repr(id)
    }

    /// Human readable label used in JSON output.
    pub fn label(self) -> &'static str {
        self.into()
    }
}

/// Whether a delivery left the server or was handed to a local mailbox.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, strum::Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum MessageDirection {
    Outbound = 0,
    Incoming = 1,
}

impl MessageDirection {
    pub fn code(self) -> i64 {
        self as i64
    }

    pub fn from_code(code: i64) -> Option<Self> {
        match code {
            0 => Some(MessageDirection::Outbound),
            1 => Some(MessageDirection::Incoming),
            _ => None,
        }
    }

    /// Local delivery agents (`lmtp`, `pipe`, `virtual`, `local`) hand mail
    /// to a mailbox on this server; everything else relays out.
    pub fn from_daemon(daemon: &str) -> Self {
        const LOCAL_AGENTS: [&str; 4] = ["lmtp", "pipe", "virtual", "local"];
        if LOCAL_AGENTS.iter().any(|agent| daemon.ends_with(agent)) {
            MessageDirection::Incoming
        } else {
            MessageDirection::Outbound
        }
    }
}

/// A typed attribute value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "lowercase")]
pub enum ResultEntry {
    None,
    Text(String),
    Blob(#[serde(with = "base64_bytes")] Vec<u8>),
    Int64(i64),
    Float64(f64),
}

impl ResultEntry {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            ResultEntry::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_int64(&self) -> Option<i64> {
        match self {
            ResultEntry::Int64(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_float64(&self) -> Option<f64> {
        match self {
            ResultEntry::Float64(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_blob(&self) -> Option<&[u8]> {
        match self {
            ResultEntry::Blob(b) => Some(b),
            _ => None,
        }
    }

    pub fn is_none(&self) -> bool {
        matches!(self, ResultEntry::None)
    }
}

impl From<String> for ResultEntry {
    fn from(v: String) -> Self {
        ResultEntry::Text(v)
    }
}

impl From<&str> for ResultEntry {
    fn from(v: &str) -> Self {
        ResultEntry::Text(v.to_string())
    }
}

impl From<i64> for ResultEntry {
    fn from(v: i64) -> Self {
        ResultEntry::Int64(v)
    }
}

impl From<f64> for ResultEntry {
    fn from(v: f64) -> Self {
        ResultEntry::Float64(v)
    }
}

impl From<Vec<u8>> for ResultEntry {
    fn from(v: Vec<u8>) -> Self {
        ResultEntry::Blob(v)
    }
}

impl From<std::net::IpAddr> for ResultEntry {
    fn from(ip: std::net::IpAddr) -> Self {
        match ip {
            std::net::IpAddr::V4(v4) => ResultEntry::Blob(v4.octets().to_vec()),
            std::net::IpAddr::V6(v6) => ResultEntry::Blob(v6.octets().to_vec()),
        }
    }
}

mod base64_bytes {
    use base64::Engine;
    use base64::engine::general_purpose::STANDARD;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(d)?;
        STANDARD.decode(encoded).map_err(serde::de::Error::custom)
    }
}

/// One published delivery: a self-contained record of everything the
/// tracker knows about a single attempt.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DeliveryResult {
    entries: BTreeMap<ResultKey, ResultEntry>,
}

impl DeliveryResult {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets a key. `None` entries are not stored.
    pub fn set(&mut self, key: ResultKey, entry: impl Into<ResultEntry>) {
        let entry = entry.into();
        if entry.is_none() {
            self.entries.remove(&key);
        } else {
            self.entries.insert(key, entry);
        }
    }

    pub fn get(&self, key: ResultKey) -> Option<&ResultEntry> {
        self.entries.get(&key)
    }

    pub fn contains(&self, key: ResultKey) -> bool {
        self.entries.contains_key(&key)
    }

    pub fn text(&self, key: ResultKey) -> Option<&str> {
        self.get(key).and_then(ResultEntry::as_text)
    }

    pub fn int64(&self, key: ResultKey) -> Option<i64> {
        self.get(key).and_then(ResultEntry::as_int64)
    }

    pub fn float64(&self, key: ResultKey) -> Option<f64> {
        self.get(key).and_then(ResultEntry::as_float64)
    }

    pub fn blob(&self, key: ResultKey) -> Option<&[u8]> {
        self.get(key).and_then(ResultEntry::as_blob)
    }

    pub fn status(&self) -> Option<SmtpStatus> {
        self.int64(ResultKey::ResultStatus).and_then(SmtpStatus::from_code)
    }

    pub fn direction(&self) -> Option<MessageDirection> {
        self.int64(ResultKey::ResultMessageDirection)
            .and_then(MessageDirection::from_code)
    }

    /// `local@domain` for the sender, if both parts are known.
    /// The null sender of bounces renders as an empty local and domain part.
    pub fn sender(&self) -> Option<String> {
        join_address(
            self.text(ResultKey::QueueSenderLocalPart),
            self.text(ResultKey::QueueSenderDomainPart),
        )
    }

    pub fn recipient(&self) -> Option<String> {
        join_address(
            self.text(ResultKey::ResultRecipientLocalPart),
            self.text(ResultKey::ResultRecipientDomainPart),
        )
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (ResultKey, &ResultEntry)> {
        self.entries.iter().map(|(k, v)| (*k, v))
    }
}

fn join_address(local: Option<&str>, domain: Option<&str>) -> Option<String> {
    match (local, domain) {
        (Some(""), Some("")) => Some(String::new()),
        (Some(l), Some(d)) => Some(format!("{l}@{d}")),
        (Some(l), None) => Some(l.to_string()),
        _ => None,
    }
}

impl Serialize for DeliveryResult {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for (key, entry) in &self.entries {
            map.serialize_entry(key.label(), entry)?;
        }
        map.end()
    }
}
