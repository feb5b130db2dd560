// SPDX-FileCopyrightText: 2026 Lightmeter Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The tracker supervisor.
//!
//! Two cooperative tasks share the store. The writer drains the intake
//! channel through the state machine and commits in batches (every
//! `commit_interval_ms`, or once `max_batch_size` records are pending);
//! after each commit it hands the notifications that became ready to the
//! notifier over a bounded channel. The notifier reports every processed
//! result back on an unbounded channel, so it never waits on the writer
//! and the two cannot deadlock.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use lightmeter_config::{LightmeterConfig, TrackerConfig};
use lightmeter_core::{Record, ResultPublisher, TrackerError};
use lightmeter_storage::queries::{fingerprints, notifications, stats};
use lightmeter_storage::{Database, NotificationEntry, ReadPool, ResultId, TableCounts};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::actions::StateMachine;
use crate::builder::ResultBuilder;
use crate::filters::Filters;
use crate::gc;
use crate::intake::Publisher;
use crate::notifier::Notifier;

/// An opened tracker, ready to [`run`](Tracker::run).
pub struct Tracker {
    config: TrackerConfig,
    db: Database,
    reader: ReadPool,
    machine: Arc<StateMachine>,
    builder: ResultBuilder,
    filters: Arc<Filters>,
    consumer: Arc<dyn ResultPublisher>,
    intake_tx: mpsc::Sender<Record>,
    intake_rx: mpsc::Receiver<Record>,
}

impl Tracker {
    /// Open the store in the configured workspace and prepare both tasks.
    ///
    /// Published results go to `consumer`.
    pub async fn open(
        config: &LightmeterConfig,
        consumer: Arc<dyn ResultPublisher>,
    ) -> Result<Self, TrackerError> {
        let tracker = config.tracker.clone();
        let filters = Filters::compile(&config.filters.rules)?;

        let db = Database::open_in(&tracker.workspace_dir).await?;
        let reader = ReadPool::open(db.path(), tracker.read_pool_size, tracker.read_timeout()).await?;
        let (intake_tx, intake_rx) = mpsc::channel(tracker.intake_capacity);

        info!(
            workspace = %tracker.workspace_dir.display(),
            node_type = %tracker.node_type,
            filters = filters.len(),
            "tracker opened"
        );

        Ok(Self {
            machine: Arc::new(StateMachine::new(tracker.node_type, tracker.max_relay_depth)),
            builder: ResultBuilder::new(tracker.node_type, tracker.max_relay_depth),
            filters: Arc::new(filters),
            config: tracker,
            db,
            reader,
            consumer,
            intake_tx,
            intake_rx,
        })
    }

    /// A handle the log reader publishes records through.
    pub fn publisher(&self) -> Publisher {
        Publisher::new(self.intake_tx.clone())
    }

    /// Read-only access to the committed state.
    pub fn reader(&self) -> ReadPool {
        self.reader.clone()
    }

    /// Newest log time still referenced by the store, for resuming a log
    /// reader after a restart.
    pub async fn most_recent_log_time(&self) -> Result<Option<DateTime<Utc>>, TrackerError> {
        let secs = self.reader.query(|conn| stats::most_recent_log_time(conn)).await?;
        Ok(secs.and_then(|s| DateTime::from_timestamp(s, 0)))
    }

    pub async fn table_counts(&self) -> Result<TableCounts, TrackerError> {
        self.reader.query(|conn| stats::table_counts(conn)).await
    }

    /// Run until `cancel` fires or every [`Publisher`] is dropped, then
    /// drain and close the store.
    ///
    /// Resolves to the first error either task hit.
    pub async fn run(self, cancel: CancellationToken) -> Result<(), TrackerError> {
        let Tracker {
            config,
            db,
            reader,
            machine,
            builder,
            filters,
            consumer,
            intake_tx,
            intake_rx,
        } = self;
        // Only external publishers keep the intake open.
        drop(intake_tx);

        let (dispatch_tx, dispatch_rx) = mpsc::channel(config.notifier_capacity);
        let (cleanup_tx, cleanup_rx) = mpsc::unbounded_channel();

        let notifier = Notifier::new(reader.clone(), builder, filters, consumer, cleanup_tx);
        let mut notifier_task = tokio::spawn(notifier.run(dispatch_rx));

        let shutdown_timeout = config.shutdown_timeout();
        let mut writer = Writer {
            db,
            machine,
            intake: intake_rx,
            cleanup_rx,
            dispatch_tx: Some(dispatch_tx),
            pending: Vec::new(),
            cleanups: Vec::new(),
            dirty: true,
            notifier_gone: false,
            max_batch_size: config.max_batch_size,
            notification_batch_size: config.notification_batch_size,
            replay_window_secs: config.replay_window_secs,
        };

        let ran = writer.run(&cancel, config.commit_interval()).await;
        let writer_result = match ran {
            Ok(()) => {
                info!("tracker shutting down");
                let drained = tokio::time::timeout(shutdown_timeout, writer.drain()).await;
                match drained {
                    Ok(result) => result,
                    Err(_) => {
                        notifier_task.abort();
                        error!(
                            pending = writer.pending.len(),
                            timeout = ?shutdown_timeout,
                            "graceful drain timed out, discarding uncommitted records"
                        );
                        return Err(TrackerError::Timeout {
                            duration: shutdown_timeout,
                        });
                    }
                }
            }
            Err(err) => Err(err),
        };

        let notifier_gone = writer.notifier_gone;
        let Writer { db, dispatch_tx, .. } = writer;
        drop(dispatch_tx);

        let notifier_result = join_notifier(&mut notifier_task, shutdown_timeout).await;

        let result = match (writer_result, notifier_result) {
            (Ok(()), notifier) => notifier,
            (Err(writer_err), Err(notifier_err)) if notifier_gone => {
                error!(error = %writer_err, "writer stopped after the notifier failed");
                Err(notifier_err)
            }
            (Err(writer_err), notifier) => {
                if let Err(notifier_err) = notifier {
                    error!(error = %notifier_err, "notifier failed after the writer");
                }
                Err(writer_err)
            }
        };

        let closed = close_store(db, reader).await;
        match (result, closed) {
            (Ok(()), closed) => {
                if closed.is_ok() {
                    info!("tracker stopped");
                }
                closed
            }
            (Err(err), Ok(())) => Err(err),
            (Err(err), Err(close_err)) => {
                error!(error = %close_err, "closing the store failed");
                Err(err)
            }
        }
    }
}

async fn join_notifier(
    task: &mut JoinHandle<Result<(), TrackerError>>,
    timeout: Duration,
) -> Result<(), TrackerError> {
    match tokio::time::timeout(timeout, &mut *task).await {
        Ok(Ok(result)) => result,
        Ok(Err(join_err)) => Err(TrackerError::Internal(format!(
            "notifier task failed: {join_err}"
        ))),
        Err(_) => {
            task.abort();
            Err(TrackerError::Timeout { duration: timeout })
        }
    }
}

async fn close_store(db: Database, reader: ReadPool) -> Result<(), TrackerError> {
    reader.close().await?;
    db.close().await
}

fn notifier_stopped() -> TrackerError {
    TrackerError::Internal("notifier stopped unexpectedly".into())
}

/// State owned by the writer task.
struct Writer {
    db: Database,
    machine: Arc<StateMachine>,
    intake: mpsc::Receiver<Record>,
    cleanup_rx: mpsc::UnboundedReceiver<ResultId>,
    /// `None` once the notifier has been told to finish.
    dispatch_tx: Option<mpsc::Sender<Vec<NotificationEntry>>>,
    pending: Vec<Record>,
    cleanups: Vec<ResultId>,
    /// Notifications left over from a previous process still need dispatching.
    dirty: bool,
    notifier_gone: bool,
    max_batch_size: usize,
    notification_batch_size: usize,
    replay_window_secs: i64,
}

impl Writer {
    async fn run(
        &mut self,
        cancel: &CancellationToken,
        commit_interval: Duration,
    ) -> Result<(), TrackerError> {
        let mut ticker = tokio::time::interval(commit_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;

                _ = cancel.cancelled() => {
                    debug!("cancellation requested");
                    return Ok(());
                }
                record = self.intake.recv() => match record {
                    Some(record) => {
                        self.pending.push(record);
                        if self.pending.len() >= self.max_batch_size {
                            self.flush().await?;
                        }
                    }
                    None => {
                        debug!("every publisher dropped, intake closed");
                        return Ok(());
                    }
                },
                id = self.cleanup_rx.recv() => match id {
                    Some(id) => self.cleanups.push(id),
                    None => {
                        self.notifier_gone = true;
                        return Err(notifier_stopped());
                    }
                },
                _ = ticker.tick() => self.flush().await?,
            }
        }
    }

    /// Graceful shutdown: apply what is still queued, let the notifier
    /// finish, then commit its cleanups.
    async fn drain(&mut self) -> Result<(), TrackerError> {
        self.intake.close();
        while let Some(record) = self.intake.recv().await {
            self.pending.push(record);
        }
        debug!(records = self.pending.len(), "intake drained");
        self.flush().await?;

        self.dispatch_tx = None;
        while let Some(id) = self.cleanup_rx.recv().await {
            self.cleanups.push(id);
        }
        debug!(results = self.cleanups.len(), "notifier drained");
        self.flush().await
    }

    /// Apply pending records and cleanups in one transaction, then
    /// dispatch every notification that became ready.
    async fn flush(&mut self) -> Result<(), TrackerError> {
        if self.pending.is_empty() && self.cleanups.is_empty() && !self.dirty {
            return Ok(());
        }

        let records = std::mem::take(&mut self.pending);
        let cleanups = std::mem::take(&mut self.cleanups);
        let machine = self.machine.clone();
        let dispatch = self.dispatch_tx.is_some();
        let batch_size = self.notification_batch_size;
        let window = self.replay_window_secs;
        let started = Instant::now();

        let (applied, cleaned, batches) = self
            .db
            .call(move |conn| {
                let tx = conn.transaction()?;
                for record in &records {
                    machine.apply(&tx, record)?;
                }
                for id in &cleanups {
                    gc::discard_result(&tx, *id)?;
                }
                fingerprints::prune(&tx, window)?;

                let mut batches = Vec::new();
                if dispatch {
                    loop {
                        let batch = notifications::take_undispatched(&tx, batch_size)?;
                        if batch.is_empty() {
                            break;
                        }
                        batches.push(batch);
                    }
                }
                tx.commit()?;
                Ok((records.len(), cleanups.len(), batches))
            })
            .await?;
        self.dirty = false;

        let notified: usize = batches.iter().map(Vec::len).sum();
        debug!(
            records = applied,
            cleanups = cleaned,
            notifications = notified,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "batch committed"
        );

        if let Some(tx) = &self.dispatch_tx {
            for batch in batches {
                if tx.send(batch).await.is_err() {
                    self.notifier_gone = true;
                    warn!("notifier is gone, notifications stay queued for the next run");
                    return Err(notifier_stopped());
                }
            }
        }
        Ok(())
    }
}
