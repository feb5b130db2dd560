// SPDX-FileCopyrightText: 2026 Lightmeter Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Row handles and row types of the correlation store.
//!
//! Entities are referred to by integer ids wrapped in distinct newtypes, so
//! a queue id can never be passed where a connection id is expected.

use std::fmt;

use lightmeter_core::RecordLocation;
use rusqlite::ToSql;
use rusqlite::types::{FromSql, FromSqlResult, ToSqlOutput, ValueRef};

/// Which `*_data` side table an entity's attributes live in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataTable {
    Connection,
    Queue,
    Result,
}

impl DataTable {
    pub(crate) fn table(self) -> &'static str {
        match self {
            DataTable::Connection => "connection_data",
            DataTable::Queue => "queue_data",
            DataTable::Result => "result_data",
        }
    }

    pub(crate) fn entity_column(self) -> &'static str {
        match self {
            DataTable::Connection => "connection_id",
            DataTable::Queue => "queue_id",
            DataTable::Result => "result_id",
        }
    }
}

/// An entity that owns attribute rows.
pub trait AttributeOwner: Copy + fmt::Display {
    const TABLE: DataTable;
    fn raw(self) -> i64;
}

macro_rules! entity_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(pub i64);

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl ToSql for $name {
            fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
                Ok(ToSqlOutput::from(self.0))
            }
        }

        impl FromSql for $name {
            fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
                i64::column_result(value).map($name)
            }
        }
    };
}

entity_id!(
    /// A `pids` row.
    PidId
);
entity_id!(
    /// A `connections` row, or the placeholder sentinel.
    ConnectionId
);
entity_id!(
    /// A `queues` row.
    QueueId
);
entity_id!(
    /// A `results` row.
    ResultId
);

impl ConnectionId {
    /// Owner of placeholder queues whose upstream has not been seen yet.
    pub const UNKNOWN: ConnectionId = ConnectionId(-99);

    pub fn is_unknown(self) -> bool {
        self == Self::UNKNOWN
    }
}

impl AttributeOwner for ConnectionId {
    const TABLE: DataTable = DataTable::Connection;
    fn raw(self) -> i64 {
        self.0
    }
}

impl AttributeOwner for QueueId {
    const TABLE: DataTable = DataTable::Queue;
    fn raw(self) -> i64 {
        self.0
    }
}

impl AttributeOwner for ResultId {
    const TABLE: DataTable = DataTable::Result;
    fn raw(self) -> i64 {
        self.0
    }
}

/// Kind of a `queue_parenting` edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ParentingKind {
    /// The message was handed from the parent queue to the child queue.
    Relay,
    /// The child queue carries the bounce notification for the parent.
    BounceCreation,
}

impl ParentingKind {
    pub fn code(self) -> i64 {
        match self {
            ParentingKind::Relay => 1,
            ParentingKind::BounceCreation => 2,
        }
    }

    pub fn from_code(code: i64) -> Option<Self> {
        match code {
            1 => Some(ParentingKind::Relay),
            2 => Some(ParentingKind::BounceCreation),
            _ => None,
        }
    }
}

impl fmt::Display for ParentingKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ParentingKind::Relay => "relay",
            ParentingKind::BounceCreation => "bounce-creation",
        })
    }
}

impl ToSql for ParentingKind {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.code()))
    }
}

impl FromSql for ParentingKind {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        let code = i64::column_result(value)?;
        ParentingKind::from_code(code).ok_or(rusqlite::types::FromSqlError::OutOfRange(code))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionRow {
    pub id: ConnectionId,
    pub pid_id: PidId,
    pub usage_count: i64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueRow {
    pub id: QueueId,
    pub connection_id: ConnectionId,
    pub name: String,
    pub usage_count: i64,
}

impl QueueRow {
    /// A queue created ahead of its upstream record.
    pub fn is_placeholder(&self) -> bool {
        self.connection_id.is_unknown()
    }
}

/// A result waiting to be handed to the notifier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotificationEntry {
    pub result_id: ResultId,
    pub location: RecordLocation,
}

/// Row counts of every tracking table.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TableCounts {
    pub pids: i64,
    pub connections: i64,
    pub connection_data: i64,
    pub queues: i64,
    pub queue_data: i64,
    pub queue_parenting: i64,
    pub results: i64,
    pub result_data: i64,
    pub notification_queues: i64,
    pub prenotification_results: i64,
}

impl TableCounts {
    /// Whether no tracking entity is left.
    pub fn is_empty(&self) -> bool {
        *self == TableCounts::default()
    }
}
