// SPDX-FileCopyrightText: 2026 Lightmeter Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Single-writer documentation.
//!
//! All writes to `logtracker.db` are serialized through `tokio-rusqlite`'s
//! single background thread. The [`Database`](crate::Database) struct IS the
//! single writer; the tracker applies each batch of records and the cleanup
//! of published results inside one `Database::call` transaction.
//!
//! **Do NOT create additional Connection instances for writes.** Readers use
//! [`ReadPool`](crate::ReadPool), whose connections are opened read-only.

// The single-writer pattern is enforced by construction:
// - `Database` wraps the only read-write `tokio_rusqlite::Connection`
// - query functions take `&rusqlite::Connection` and run inside `Database::call`
// - `ReadPool` opens with SQLITE_OPEN_READ_ONLY and `query_only = ON`
