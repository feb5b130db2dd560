// SPDX-FileCopyrightText: 2026 Lightmeter Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The downstream notifier task.
//!
//! Receives batches of committed notifications from the writer, builds each
//! result on a read-only connection, runs it through the filters and hands
//! it to the consumer. Every processed result id goes back to the writer,
//! which deletes the result and releases what it held in its next
//! transaction.

use std::sync::Arc;

use async_trait::async_trait;
use lightmeter_core::{DeliveryResult, ResultPublisher, TrackerError};
use lightmeter_storage::{NotificationEntry, ReadPool, ResultId};
use tokio::sync::mpsc;
use tracing::{debug, trace, warn};

use crate::builder::ResultBuilder;
use crate::filters::Filters;

pub struct Notifier {
    reader: ReadPool,
    builder: ResultBuilder,
    filters: Arc<Filters>,
    publisher: Arc<dyn ResultPublisher>,
    cleanup: mpsc::UnboundedSender<ResultId>,
}

impl Notifier {
    pub fn new(
        reader: ReadPool,
        builder: ResultBuilder,
        filters: Arc<Filters>,
        publisher: Arc<dyn ResultPublisher>,
        cleanup: mpsc::UnboundedSender<ResultId>,
    ) -> Self {
        Self {
            reader,
            builder,
            filters,
            publisher,
            cleanup,
        }
    }

    /// Process batches until the writer drops its end of the channel.
    pub async fn run(
        self,
        mut batches: mpsc::Receiver<Vec<NotificationEntry>>,
    ) -> Result<(), TrackerError> {
        let mut published = 0u64;
        let mut rejected = 0u64;

        while let Some(batch) = batches.recv().await {
            for entry in batch {
                match self.notify(&entry).await? {
                    Outcome::Published => published += 1,
                    Outcome::Rejected => rejected += 1,
                    Outcome::Missing => {}
                }
                // The writer may already be gone during a forced shutdown.
                let _ = self.cleanup.send(entry.result_id);
            }
        }

        debug!(published, rejected, "notifier drained");
        Ok(())
    }

    async fn notify(&self, entry: &NotificationEntry) -> Result<Outcome, TrackerError> {
        let builder = self.builder;
        let id = entry.result_id;
        let Some(result) = self.reader.query(move |conn| builder.build(conn, id)).await? else {
            warn!(
                result = %entry.result_id,
                file = %entry.location.filename,
                line = entry.location.line,
                "notified result no longer exists"
            );
            return Ok(Outcome::Missing);
        };

        if !self.filters.accepts(&result) {
            debug!(result = %entry.result_id, "result rejected by filters");
            return Ok(Outcome::Rejected);
        }

        trace!(
            result = %entry.result_id,
            file = %entry.location.filename,
            line = entry.location.line,
            "publishing result"
        );
        self.publisher.publish(result).await?;
        Ok(Outcome::Published)
    }
}

enum Outcome {
    Published,
    Rejected,
    Missing,
}

/// Forwards results into a bounded channel; a full channel holds the
/// notifier back.
#[derive(Debug, Clone)]
pub struct ChannelPublisher {
    tx: mpsc::Sender<DeliveryResult>,
}

impl ChannelPublisher {
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<DeliveryResult>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self { tx }, rx)
    }
}

#[async_trait]
impl ResultPublisher for ChannelPublisher {
    async fn publish(&self, result: DeliveryResult) -> Result<(), TrackerError> {
        self.tx
            .send(result)
            .await
            .map_err(|_| TrackerError::PublisherClosed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use lightmeter_config::{FilterRule, NodeType};
    use lightmeter_core::{MessageDirection, RecordLocation, ResultKey};
    use lightmeter_storage::Database;
    use lightmeter_storage::queries::{data, queues, results};
    use lightmeter_storage::ConnectionId;
    use lightmeter_test_utils::CollectingPublisher;
    use tempfile::TempDir;

    fn entry(id: ResultId) -> NotificationEntry {
        NotificationEntry {
            result_id: id,
            location: RecordLocation {
                filename: "mail.log".into(),
                line: 1,
            },
        }
    }

    async fn seed(db: &Database) -> (ResultId, ResultId) {
        db.call(|conn| {
            let q = queues::insert(conn, ConnectionId::UNKNOWN, "Q", 1)?;
            let kept = results::insert(conn, q)?;
            data::insert(conn, kept, ResultKey::ResultRecipientLocalPart, "alice")?;
            data::insert(conn, kept, ResultKey::ResultRecipientDomainPart, "example.com")?;
            data::insert(conn, kept, ResultKey::ResultMessageDirection, MessageDirection::Incoming.code())?;
            let dropped = results::insert(conn, q)?;
            data::insert(conn, dropped, ResultKey::ResultRecipientLocalPart, "spam")?;
            data::insert(conn, dropped, ResultKey::ResultRecipientDomainPart, "example.com")?;
            data::insert(conn, dropped, ResultKey::ResultMessageDirection, MessageDirection::Incoming.code())?;
            Ok((kept, dropped))
        })
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn filtered_and_missing_results_are_still_cleaned_up() {
        let dir = TempDir::new().unwrap();
        let db = Database::open_in(dir.path()).await.unwrap();
        let (kept, dropped) = seed(&db).await;

        let reader = ReadPool::open(db.path(), 1, Duration::from_secs(5)).await.unwrap();
        let filters = Filters::compile(&[FilterRule {
            reject_inbound_recipient: Some("^spam@".into()),
            ..Default::default()
        }])
        .unwrap();
        let publisher = Arc::new(CollectingPublisher::new());
        let (cleanup_tx, mut cleanup_rx) = mpsc::unbounded_channel();
        let notifier = Notifier::new(
            reader,
            ResultBuilder::new(NodeType::Single, 16),
            Arc::new(filters),
            publisher.clone(),
            cleanup_tx,
        );

        let (tx, rx) = mpsc::channel(4);
        tx.send(vec![entry(kept), entry(dropped), entry(ResultId(999))])
            .await
            .unwrap();
        drop(tx);
        notifier.run(rx).await.unwrap();

        let results = publisher.results();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].recipient().as_deref(), Some("alice@example.com"));

        let mut cleaned = Vec::new();
        while let Ok(id) = cleanup_rx.try_recv() {
            cleaned.push(id);
        }
        assert_eq!(cleaned, vec![kept, dropped, ResultId(999)]);
    }

    #[tokio::test]
    async fn closed_consumer_stops_the_notifier() {
        let dir = TempDir::new().unwrap();
        let db = Database::open_in(dir.path()).await.unwrap();
        let (kept, _) = seed(&db).await;

        let reader = ReadPool::open(db.path(), 1, Duration::from_secs(5)).await.unwrap();
        let (publisher, rx_results) = ChannelPublisher::new(1);
        drop(rx_results);
        let (cleanup_tx, _cleanup_rx) = mpsc::unbounded_channel();
        let notifier = Notifier::new(
            reader,
            ResultBuilder::new(NodeType::Single, 16),
            Arc::new(Filters::default()),
            Arc::new(publisher),
            cleanup_tx,
        );

        let (tx, rx) = mpsc::channel(1);
        tx.send(vec![entry(kept)]).await.unwrap();
        drop(tx);
        let err = notifier.run(rx).await.unwrap_err();
        assert!(matches!(err, TrackerError::PublisherClosed));
    }
}
