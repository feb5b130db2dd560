// SPDX-FileCopyrightText: 2026 Lightmeter Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Delivery-attempt fingerprints.
//!
//! A replayed log feeds the very same status lines again. Each line that
//! would create a result is hashed over everything that identifies the
//! attempt; a fingerprint seen before means the line was already tracked.

use lightmeter_core::Record;
use lightmeter_core::record::{QmgrMessageExpired, SmtpSentStatus};
use sha2::{Digest, Sha256};

/// Fingerprint of an `smtp`/`lmtp` status line.
pub fn delivery_attempt(record: &Record, status: &SmtpSentStatus) -> i64 {
    let mut hasher = header(record);
    field(&mut hasher, status.queue.as_bytes());
    field(&mut hasher, status.recipient_local_part.as_bytes());
    field(&mut hasher, status.recipient_domain_part.as_bytes());
    field(&mut hasher, &status.status.code().to_le_bytes());
    field(&mut hasher, status.dsn.as_bytes());
    field(&mut hasher, status.relay_name.as_deref().unwrap_or("").as_bytes());
    field(&mut hasher, &status.delay.to_bits().to_le_bytes());
    finish(hasher)
}

/// Fingerprint of a `qmgr` expiry line.
pub fn expiry(record: &Record, expired: &QmgrMessageExpired) -> i64 {
    let mut hasher = header(record);
    field(&mut hasher, expired.queue.as_bytes());
    field(&mut hasher, expired.message.as_bytes());
    finish(hasher)
}

fn header(record: &Record) -> Sha256 {
    let mut hasher = Sha256::new();
    field(&mut hasher, &record.unix_time().to_le_bytes());
    field(&mut hasher, &record.time.timestamp_subsec_nanos().to_le_bytes());
    field(&mut hasher, record.header.host.as_bytes());
    field(&mut hasher, record.header.process.as_bytes());
    field(&mut hasher, record.header.daemon.as_bytes());
    field(&mut hasher, &record.header.pid.to_le_bytes());
    hasher
}

// Length-prefixed so adjacent fields cannot run into each other.
fn field(hasher: &mut Sha256, bytes: &[u8]) {
    hasher.update((bytes.len() as u64).to_le_bytes());
    hasher.update(bytes);
}

fn finish(hasher: Sha256) -> i64 {
    let digest = hasher.finalize();
    let mut head = [0u8; 8];
    head.copy_from_slice(&digest[..8]);
    i64::from_le_bytes(head)
}
