// SPDX-FileCopyrightText: 2026 Lightmeter Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Attribute side tables (`connection_data`, `queue_data`, `result_data`).

use lightmeter_core::{ResultEntry, ResultKey, TrackerError};
use rusqlite::types::Value;
use rusqlite::{Connection, ErrorCode, OptionalExtension, params};

use crate::models::AttributeOwner;
use crate::values::{entry_to_value, value_to_entry};

fn is_unique_violation(e: &rusqlite::Error) -> bool {
    matches!(e, rusqlite::Error::SqliteFailure(f, _) if f.code == ErrorCode::ConstraintViolation)
}

/// Write an attribute that must not exist yet. A second write of the same
/// key is an invariant violation.
pub fn insert<E: AttributeOwner>(
    conn: &Connection,
    entity: E,
    key: ResultKey,
    entry: impl Into<ResultEntry>,
) -> Result<(), TrackerError> {
    let entry = entry.into();
    if entry.is_none() {
        return Ok(());
    }
    let sql = format!(
        "INSERT INTO {} ({}, key, value) VALUES (?1, ?2, ?3)",
        E::TABLE.table(),
        E::TABLE.entity_column()
    );
    match conn
        .prepare_cached(&sql)?
        .execute(params![entity.raw(), key.id(), entry_to_value(&entry)])
    {
        Ok(_) => Ok(()),
        Err(e) if is_unique_violation(&e) => Err(TrackerError::invariant(format!(
            "attribute {key} written twice for {} {entity}",
            E::TABLE.table()
        ))),
        Err(e) => Err(e.into()),
    }
}

/// Write an attribute unless one is already present. Returns whether it was written.
///
/// Attributes latch at first sighting; replays and repeated log lines leave
/// the original value in place.
pub fn insert_if_absent<E: AttributeOwner>(
    conn: &Connection,
    entity: E,
    key: ResultKey,
    entry: impl Into<ResultEntry>,
) -> Result<bool, TrackerError> {
    let entry = entry.into();
    if entry.is_none() {
        return Ok(false);
    }
    let sql = format!(
        "INSERT OR IGNORE INTO {} ({}, key, value) VALUES (?1, ?2, ?3)",
        E::TABLE.table(),
        E::TABLE.entity_column()
    );
    let changed = conn
        .prepare_cached(&sql)?
        .execute(params![entity.raw(), key.id(), entry_to_value(&entry)])?;
    Ok(changed == 1)
}

pub fn get<E: AttributeOwner>(
    conn: &Connection,
    entity: E,
    key: ResultKey,
) -> Result<Option<ResultEntry>, TrackerError> {
    let sql = format!(
        "SELECT value FROM {} WHERE {} = ?1 AND key = ?2",
        E::TABLE.table(),
        E::TABLE.entity_column()
    );
    let value = conn
        .prepare_cached(&sql)?
        .query_row(params![entity.raw(), key.id()], |row| row.get::<_, Value>(0))
        .optional()?;
    Ok(value.map(value_to_entry))
}

pub fn get_int<E: AttributeOwner>(
    conn: &Connection,
    entity: E,
    key: ResultKey,
) -> Result<Option<i64>, TrackerError> {
    Ok(get(conn, entity, key)?.and_then(|e| e.as_int64()))
}

pub fn has<E: AttributeOwner>(
    conn: &Connection,
    entity: E,
    key: ResultKey,
) -> Result<bool, TrackerError> {
    Ok(get(conn, entity, key)?.is_some())
}

/// Every attribute of an entity, ordered by key id.
pub fn all<E: AttributeOwner>(
    conn: &Connection,
    entity: E,
) -> Result<Vec<(ResultKey, ResultEntry)>, TrackerError> {
    let sql = format!(
        "SELECT key, value FROM {} WHERE {} = ?1 ORDER BY key",
        E::TABLE.table(),
        E::TABLE.entity_column()
    );
    let mut stmt = conn.prepare_cached(&sql)?;
    let rows = stmt
        .query_map(params![entity.raw()], |row| {
            Ok((row.get::<_, i64>(0)?, row.get::<_, Value>(1)?))
        })?
        .collect::<Result<Vec<_>, _>>()?;

    rows.into_iter()
        .map(|(id, value)| {
            let key = ResultKey::from_id(id).ok_or_else(|| {
                TrackerError::invariant(format!(
                    "unknown attribute key id {id} in {}",
                    E::TABLE.table()
                ))
            })?;
            Ok((key, value_to_entry(value)))
        })
        .collect()
}

pub fn delete_all<E: AttributeOwner>(conn: &Connection, entity: E) -> Result<usize, TrackerError> {
    let sql = format!(
        "DELETE FROM {} WHERE {} = ?1",
        E::TABLE.table(),
        E::TABLE.entity_column()
    );
    Ok(conn.prepare_cached(&sql)?.execute(params![entity.raw()])?)
}
