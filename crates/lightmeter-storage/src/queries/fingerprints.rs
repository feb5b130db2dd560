// SPDX-FileCopyrightText: 2026 Lightmeter Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Delivery-attempt fingerprints used to recognise replayed log lines.

use lightmeter_core::TrackerError;
use rusqlite::{Connection, params};

/// Remember a fingerprint. Returns `false` if it was already known.
pub fn record(conn: &Connection, checksum: i64, delivery_ts: i64) -> Result<bool, TrackerError> {
    let changed = conn
        .prepare_cached(
            "INSERT OR IGNORE INTO delivery_fingerprints (checksum, delivery_ts) VALUES (?1, ?2)",
        )?
        .execute(params![checksum, delivery_ts])?;
    Ok(changed == 1)
}

/// Forget fingerprints more than `window_secs` older than the newest one.
pub fn prune(conn: &Connection, window_secs: i64) -> Result<usize, TrackerError> {
    Ok(conn
        .prepare_cached(
            "DELETE FROM delivery_fingerprints
             WHERE delivery_ts < (SELECT MAX(delivery_ts) FROM delivery_fingerprints) - ?1",
        )?
        .execute(params![window_secs])?)
}
