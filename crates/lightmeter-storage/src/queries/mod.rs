// SPDX-FileCopyrightText: 2026 Lightmeter Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Typed statements per table.
//!
//! Every function takes a plain `&rusqlite::Connection` so the writer can run
//! a whole batch inside one transaction (a `Transaction` derefs to it).
//! Statements go through `prepare_cached`, so each connection keeps its own
//! prepared copy.

pub mod connections;
pub mod data;
pub mod fingerprints;
pub mod notifications;
pub mod parenting;
pub mod pids;
pub mod queues;
pub mod results;
pub mod stats;

use lightmeter_core::TrackerError;
use rusqlite::{Connection, OptionalExtension, params};

/// Usage counter adjustments shared by `pids`, `connections` and `queues`.
pub(crate) mod usage {
    use super::*;

    pub fn increment(conn: &Connection, table: &str, id: i64) -> Result<(), TrackerError> {
        let changed = conn
            .prepare_cached(&format!(
                "UPDATE {table} SET usage_count = usage_count + 1 WHERE id = ?1"
            ))?
            .execute(params![id])?;
        if changed == 0 {
            return Err(TrackerError::invariant(format!(
                "cannot reference missing {table} row {id}"
            )));
        }
        Ok(())
    }

    /// Decrement and return the new count, `None` if the row is gone.
    ///
    /// Going below zero is an invariant violation.
    pub fn decrement(conn: &Connection, table: &str, id: i64) -> Result<Option<i64>, TrackerError> {
        let updated: Option<i64> = conn
            .prepare_cached(&format!(
                "UPDATE {table} SET usage_count = usage_count - 1
                 WHERE id = ?1 AND usage_count > 0
                 RETURNING usage_count"
            ))?
            .query_row(params![id], |row| row.get(0))
            .optional()?;

        if updated.is_some() {
            return Ok(updated);
        }

        let exists: Option<i64> = conn
            .prepare_cached(&format!("SELECT usage_count FROM {table} WHERE id = ?1"))?
            .query_row(params![id], |row| row.get(0))
            .optional()?;
        match exists {
            Some(_) => Err(TrackerError::invariant(format!(
                "usage count of {table} row {id} would go below zero"
            ))),
            None => Ok(None),
        }
    }
}
