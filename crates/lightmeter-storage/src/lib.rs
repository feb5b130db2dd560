// SPDX-FileCopyrightText: 2026 Lightmeter Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Correlation store of the Lightmeter delivery tracker.
//!
//! A WAL-mode SQLite file (`logtracker.db`) with embedded migrations, a
//! single write connection driven through `tokio-rusqlite`, a read-only
//! connection pool, and typed statements for every tracking table.

pub mod database;
pub mod migrations;
pub mod models;
pub mod pool;
pub mod queries;
pub mod values;
pub mod writer;

pub use database::{DATABASE_FILENAME, Database};
pub use models::*;
pub use pool::ReadPool;
