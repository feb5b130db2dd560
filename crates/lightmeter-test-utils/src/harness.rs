// SPDX-FileCopyrightText: 2026 Lightmeter Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Test harness for end-to-end tracking tests.
//!
//! `TrackerHarness` opens a tracker on a temp workspace, runs it in a
//! background task and collects everything it publishes. Tests feed records
//! with [`publish_all`](TrackerHarness::publish_all) and assert on
//! [`results`](TrackerHarness::results) and the leftover table counts.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use lightmeter_config::{FilterRule, LightmeterConfig, NodeType};
use lightmeter_core::{DeliveryResult, Record, TrackerError};
use lightmeter_storage::queries::stats;
use lightmeter_storage::{DATABASE_FILENAME, ReadPool, TableCounts};
use lightmeter_tracking::{Publisher, Tracker};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::publisher::CollectingPublisher;

/// Builder for creating tracking environments with configurable options.
pub struct TrackerHarnessBuilder {
    node_type: NodeType,
    max_relay_depth: Option<usize>,
    rules: Vec<FilterRule>,
    commit_interval_ms: u64,
    failing_consumer: bool,
}

impl TrackerHarnessBuilder {
    fn new() -> Self {
        Self {
            node_type: NodeType::Single,
            max_relay_depth: None,
            rules: Vec::new(),
            commit_interval_ms: 20,
            failing_consumer: false,
        }
    }

    pub fn with_node_type(mut self, node_type: NodeType) -> Self {
        self.node_type = node_type;
        self
    }

    pub fn with_max_relay_depth(mut self, depth: usize) -> Self {
        self.max_relay_depth = Some(depth);
        self
    }

    pub fn with_filter(mut self, rule: FilterRule) -> Self {
        self.rules.push(rule);
        self
    }

    pub fn with_commit_interval(mut self, interval: Duration) -> Self {
        self.commit_interval_ms = interval.as_millis() as u64;
        self
    }

    /// Publish into a consumer that rejects every result.
    pub fn with_failing_consumer(mut self) -> Self {
        self.failing_consumer = true;
        self
    }

    /// Open the tracker on a fresh temp workspace and start it.
    pub async fn build(self) -> Result<TrackerHarness, TrackerError> {
        let temp_dir = tempfile::TempDir::new().map_err(|e| TrackerError::Storage {
            source: Box::new(e),
        })?;

        let mut config = LightmeterConfig::default();
        config.tracker.workspace_dir = temp_dir.path().to_path_buf();
        config.tracker.node_type = self.node_type;
        config.tracker.commit_interval_ms = self.commit_interval_ms;
        config.tracker.shutdown_timeout_secs = 10;
        if let Some(depth) = self.max_relay_depth {
            config.tracker.max_relay_depth = depth;
        }
        config.filters.rules = self.rules;

        let collector = Arc::new(if self.failing_consumer {
            CollectingPublisher::failing()
        } else {
            CollectingPublisher::new()
        });

        let mut harness = TrackerHarness {
            config,
            collector,
            publisher: None,
            cancel: CancellationToken::new(),
            task: None,
            _temp_dir: temp_dir,
        };
        harness.start().await?;
        Ok(harness)
    }
}

/// A running tracker on a temp workspace.
pub struct TrackerHarness {
    /// Configuration the tracker was opened with.
    pub config: LightmeterConfig,
    /// Everything the tracker published, across restarts.
    pub collector: Arc<CollectingPublisher>,
    publisher: Option<Publisher>,
    cancel: CancellationToken,
    task: Option<JoinHandle<Result<(), TrackerError>>>,
    /// Temp directory kept alive for cleanup on drop.
    _temp_dir: tempfile::TempDir,
}

impl TrackerHarness {
    pub fn builder() -> TrackerHarnessBuilder {
        TrackerHarnessBuilder::new()
    }

    async fn start(&mut self) -> Result<(), TrackerError> {
        let tracker = Tracker::open(&self.config, self.collector.clone()).await?;
        self.publisher = Some(tracker.publisher());
        self.cancel = CancellationToken::new();
        self.task = Some(tokio::spawn(tracker.run(self.cancel.clone())));
        Ok(())
    }

    pub fn workspace(&self) -> &Path {
        &self.config.tracker.workspace_dir
    }

    /// A handle to the running tracker's intake.
    pub fn publisher(&self) -> Result<Publisher, TrackerError> {
        self.publisher.clone().ok_or(TrackerError::IntakeClosed)
    }

    /// Publish `records` in order.
    pub async fn publish_all(
        &self,
        records: impl IntoIterator<Item = Record>,
    ) -> Result<(), TrackerError> {
        let publisher = self.publisher()?;
        for record in records {
            publisher.publish(record).await?;
        }
        Ok(())
    }

    /// Give the tracker a few commit rounds to catch up.
    pub async fn settle(&self) {
        let round = self.config.tracker.commit_interval();
        tokio::time::sleep(round * 10).await;
    }

    /// Wait until `n` results were published, failing after a generous timeout.
    pub async fn wait_for_results(&self, n: usize) -> Result<Vec<DeliveryResult>, TrackerError> {
        let timeout = Duration::from_secs(10);
        self.collector
            .wait_for(n, timeout)
            .await
            .ok_or(TrackerError::Timeout { duration: timeout })
    }

    pub fn results(&self) -> Vec<DeliveryResult> {
        self.collector.results()
    }

    /// Cancel the tracker and wait for its graceful drain.
    pub async fn stop(&mut self) -> Result<(), TrackerError> {
        self.cancel.cancel();
        self.join().await
    }

    /// Drop the intake handle, so the tracker drains and stops on its own.
    pub async fn finish(&mut self) -> Result<(), TrackerError> {
        self.publisher = None;
        self.join().await
    }

    /// Stop the tracker and open a new one on the same workspace.
    pub async fn restart(&mut self) -> Result<(), TrackerError> {
        self.stop().await?;
        self.start().await
    }

    async fn join(&mut self) -> Result<(), TrackerError> {
        self.publisher = None;
        match self.task.take() {
            Some(task) => task
                .await
                .map_err(|e| TrackerError::Internal(format!("tracker task failed: {e}")))?,
            None => Ok(()),
        }
    }

    /// Committed row counts, read on a connection of its own.
    pub async fn counts(&self) -> Result<TableCounts, TrackerError> {
        let path = self.workspace().join(DATABASE_FILENAME);
        let pool = ReadPool::open(&path, 1, Duration::from_secs(5)).await?;
        let counts = pool.query(|conn| stats::table_counts(conn)).await;
        pool.close().await?;
        counts
    }
}

impl Drop for TrackerHarness {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
