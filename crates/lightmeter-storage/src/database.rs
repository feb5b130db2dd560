// SPDX-FileCopyrightText: 2026 Lightmeter Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Database connection management with PRAGMA setup, WAL mode, and lifecycle.
//!
//! All writes are serialized through tokio-rusqlite's single background thread.
//! Do NOT create additional Connection instances for writes; readers go
//! through [`ReadPool`](crate::pool::ReadPool).

use std::path::{Path, PathBuf};
use std::time::Duration;

use lightmeter_core::TrackerError;
use tracing::{debug, info};

use crate::migrations::run_migrations;
use crate::queries;

/// File name of the correlation store inside the workspace directory.
pub const DATABASE_FILENAME: &str = "logtracker.db";

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Map a tokio-rusqlite error into a storage error.
pub fn map_tr_err(e: tokio_rusqlite::Error<rusqlite::Error>) -> TrackerError {
    TrackerError::Storage {
        source: Box::new(e),
    }
}

/// The single write connection to `logtracker.db`.
pub struct Database {
    conn: tokio_rusqlite::Connection,
    path: PathBuf,
}

impl Database {
    /// Open (creating if needed) `logtracker.db` inside `workspace_dir`.
    pub async fn open_in(workspace_dir: &Path) -> Result<Self, TrackerError> {
        std::fs::create_dir_all(workspace_dir).map_err(|e| TrackerError::Storage {
            source: Box::new(e),
        })?;
        Self::open(&workspace_dir.join(DATABASE_FILENAME)).await
    }

    /// Open the database file, apply PRAGMAs and run pending migrations.
    ///
    /// Notifications that were dispatched but never confirmed by a previous
    /// process are made dispatchable again.
    pub async fn open(path: &Path) -> Result<Self, TrackerError> {
        let conn = tokio_rusqlite::Connection::open(path)
            .await
            .map_err(TrackerError::from)?;

        let db = Self {
            conn,
            path: path.to_path_buf(),
        };

        let redispatched = db
            .call(|conn| {
                apply_write_pragmas(conn)?;
                run_migrations(conn)?;
                queries::notifications::reset_dispatched(conn)
            })
            .await?;

        if redispatched > 0 {
            info!(
                count = redispatched,
                "re-dispatching notifications left over from a previous run"
            );
        }
        debug!(path = %db.path.display(), "tracker database opened");
        Ok(db)
    }

    /// The underlying tokio-rusqlite connection.
    pub fn connection(&self) -> &tokio_rusqlite::Connection {
        &self.conn
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Run `f` on the writer thread.
    ///
    /// Unlike a raw `call`, domain errors returned by `f` come back as they
    /// are instead of being wrapped as storage errors.
    pub async fn call<T, F>(&self, f: F) -> Result<T, TrackerError>
    where
        F: FnOnce(&mut rusqlite::Connection) -> Result<T, TrackerError> + Send + 'static,
        T: Send + 'static,
    {
        self.conn
            .call(move |conn| Ok::<_, rusqlite::Error>(f(conn)))
            .await
            .map_err(map_tr_err)?
    }

    /// Checkpoint the WAL and close the connection.
    pub async fn close(self) -> Result<(), TrackerError> {
        self.conn
            .call(|conn| -> Result<(), rusqlite::Error> {
                conn.execute_batch("PRAGMA wal_checkpoint(TRUNCATE);")?;
                Ok(())
            })
            .await
            .map_err(map_tr_err)?;
        debug!("WAL checkpoint complete");
        self.conn.close().await.map_err(map_tr_err)
    }
}

fn apply_write_pragmas(conn: &rusqlite::Connection) -> Result<(), TrackerError> {
    let mode: String =
        conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;
    if !mode.eq_ignore_ascii_case("wal") {
        return Err(TrackerError::Config(format!(
            "database refused WAL journal mode (got {mode})"
        )));
    }
    conn.pragma_update(None, "synchronous", "NORMAL")?;
    conn.pragma_update(None, "foreign_keys", "OFF")?;
    conn.busy_timeout(BUSY_TIMEOUT)?;
    Ok(())
}
