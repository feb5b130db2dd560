// SPDX-FileCopyrightText: 2026 Lightmeter Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Read-only connection pool.
//!
//! Readers never touch the write connection. Each pooled connection is a
//! tokio-rusqlite connection opened with `SQLITE_OPEN_READ_ONLY`; in WAL
//! mode it sees the last committed state while the writer keeps going.

use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use lightmeter_core::TrackerError;
use rusqlite::{InterruptHandle, OpenFlags};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::database::map_tr_err;

struct Reader {
    conn: tokio_rusqlite::Connection,
    interrupt: Arc<InterruptHandle>,
}

/// A fixed-size pool of read-only connections. Cheap to clone.
#[derive(Clone)]
pub struct ReadPool {
    idle: Arc<Mutex<Vec<Reader>>>,
    permits: Arc<Semaphore>,
    timeout: Duration,
}

impl std::fmt::Debug for ReadPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReadPool")
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

/// A reader checked out of the pool; returned on drop.
struct Lease {
    reader: Option<Reader>,
    idle: Arc<Mutex<Vec<Reader>>>,
    _permit: OwnedSemaphorePermit,
}

impl Drop for Lease {
    fn drop(&mut self) {
        if let Some(reader) = self.reader.take() {
            if let Ok(mut idle) = self.idle.lock() {
                idle.push(reader);
            }
        }
    }
}

impl ReadPool {
    /// Open `size` read-only connections to an existing database file.
    pub async fn open(path: &Path, size: usize, timeout: Duration) -> Result<Self, TrackerError> {
        let mut readers = Vec::with_capacity(size);
        for _ in 0..size {
            let conn = tokio_rusqlite::Connection::open_with_flags(
                path,
                OpenFlags::SQLITE_OPEN_READ_ONLY
                    | OpenFlags::SQLITE_OPEN_NO_MUTEX
                    | OpenFlags::SQLITE_OPEN_URI,
            )
            .await
            .map_err(TrackerError::from)?;

            let interrupt = conn
                .call(|conn| -> Result<InterruptHandle, rusqlite::Error> {
                    conn.pragma_update(None, "query_only", true)?;
                    conn.busy_timeout(Duration::from_secs(5))?;
                    Ok(conn.get_interrupt_handle())
                })
                .await
                .map_err(map_tr_err)?;

            readers.push(Reader {
                conn,
                interrupt: Arc::new(interrupt),
            });
        }
        debug!(size, path = %path.display(), "read pool opened");

        Ok(Self {
            idle: Arc::new(Mutex::new(readers)),
            permits: Arc::new(Semaphore::new(size)),
            timeout,
        })
    }

    /// Run a read-only query with the pool's default timeout.
    pub async fn query<T, F>(&self, f: F) -> Result<T, TrackerError>
    where
        F: FnOnce(&rusqlite::Connection) -> Result<T, TrackerError> + Send + 'static,
        T: Send + 'static,
    {
        self.query_with_timeout(self.timeout, f).await
    }

    /// Run a read-only query that must finish within `timeout`, waiting for
    /// a free connection included. On expiry the running statement is
    /// interrupted and the connection goes back to the pool.
    pub async fn query_with_timeout<T, F>(&self, timeout: Duration, f: F) -> Result<T, TrackerError>
    where
        F: FnOnce(&rusqlite::Connection) -> Result<T, TrackerError> + Send + 'static,
        T: Send + 'static,
    {
        let deadline = Instant::now() + timeout;
        let expired = || TrackerError::Timeout { duration: timeout };

        let permit = tokio::time::timeout_at(deadline, self.permits.clone().acquire_owned())
            .await
            .map_err(|_| expired())?
            .map_err(|_| TrackerError::Internal("read pool closed".into()))?;

        let reader = self
            .idle
            .lock()
            .map_err(|_| TrackerError::Internal("read pool lock poisoned".into()))?
            .pop()
            .ok_or_else(|| TrackerError::Internal("read pool permit without connection".into()))?;

        let lease = Lease {
            reader: Some(reader),
            idle: self.idle.clone(),
            _permit: permit,
        };
        let Some(reader) = lease.reader.as_ref() else {
            return Err(TrackerError::Internal("read pool lease is empty".into()));
        };

        let interrupt = reader.interrupt.clone();
        let call = reader
            .conn
            .call(move |conn| Ok::<_, rusqlite::Error>(f(conn)));

        match tokio::time::timeout_at(deadline, call).await {
            Ok(result) => result.map_err(map_tr_err)?,
            Err(_) => {
                warn!(?timeout, "read query timed out, interrupting");
                interrupt.interrupt();
                Err(expired())
            }
        }
    }

    /// Close every idle connection.
    pub async fn close(self) -> Result<(), TrackerError> {
        let readers = match self.idle.lock() {
            Ok(mut idle) => std::mem::take(&mut *idle),
            Err(_) => return Err(TrackerError::Internal("read pool lock poisoned".into())),
        };
        for reader in readers {
            reader.conn.close().await.map_err(map_tr_err)?;
        }
        Ok(())
    }
}
