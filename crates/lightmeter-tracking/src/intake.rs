// SPDX-FileCopyrightText: 2026 Lightmeter Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Record intake.
//!
//! The log reader hands parsed records to a [`Publisher`]. The intake
//! channel is bounded: once it is full, `publish` waits until the writer
//! has caught up, which is how the state machine slows the reader down.

use lightmeter_core::{Payload, Record, SmtpStatus, TrackerError};
use tokio::sync::mpsc;
use tracing::debug;

/// Producer side of the intake channel. Cheap to clone.
#[derive(Debug, Clone)]
pub struct Publisher {
    tx: mpsc::Sender<Record>,
}

/// Reject payloads the state machine has nothing to do with. Status lines
/// only count as delivery attempts when they sent, received, bounced or
/// deferred the message.
pub fn classify(payload: &Payload) -> Result<(), TrackerError> {
    match payload {
        Payload::QmgrReturnedToSender(_) | Payload::Warning(_) => {
            Err(TrackerError::UnsupportedAction {
                kind: payload.kind(),
            })
        }
        Payload::SmtpSentStatus(p) if matches!(p.status, SmtpStatus::Expired | SmtpStatus::Returned) => {
            Err(TrackerError::UnsupportedAction {
                kind: payload.kind(),
            })
        }
        _ => Ok(()),
    }
}

impl Publisher {
    pub(crate) fn new(tx: mpsc::Sender<Record>) -> Self {
        Self { tx }
    }

    /// Queue a record, waiting for a free slot.
    ///
    /// Unsupported payloads are dropped here. Fails with
    /// [`TrackerError::IntakeClosed`] once the tracker is shutting down.
    pub async fn publish(&self, record: Record) -> Result<(), TrackerError> {
        if !self.accept(&record) {
            return Ok(());
        }
        self.tx
            .send(record)
            .await
            .map_err(|_| TrackerError::IntakeClosed)
    }

    /// [`publish`](Self::publish) for synchronous readers. Must not be
    /// called from inside the async runtime.
    pub fn blocking_publish(&self, record: Record) -> Result<(), TrackerError> {
        if !self.accept(&record) {
            return Ok(());
        }
        self.tx
            .blocking_send(record)
            .map_err(|_| TrackerError::IntakeClosed)
    }

    /// Free intake slots.
    pub fn capacity(&self) -> usize {
        self.tx.capacity()
    }

    fn accept(&self, record: &Record) -> bool {
        match classify(&record.payload) {
            Ok(()) => true,
            Err(err) => {
                debug!(
                    file = %record.location.filename,
                    line = record.location.line,
                    error = %err,
                    "dropping record"
                );
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lightmeter_test_utils::RecordBuilder;
    use tracing_test::traced_test;

    #[test]
    fn tracked_payloads_are_accepted() {
        let b = RecordBuilder::new("mx");
        for record in [
            b.connect("client", "1.2.3.4"),
            b.cleanup("Q1", "id@example.com"),
            b.sent("Q1", "rcpt", "example.com"),
            b.removed("Q1"),
        ] {
            assert!(classify(&record.payload).is_ok(), "{}", record.payload.kind());
        }
    }

    #[test]
    fn warnings_are_unsupported() {
        let b = RecordBuilder::new("mx");
        let err = classify(&b.warning("hostname verification failed").payload).unwrap_err();
        assert!(matches!(err, TrackerError::UnsupportedAction { kind: "Warning" }));
        assert!(classify(&b.returned_to_sender("Q1").payload).is_err());
    }

    #[test]
    fn only_attempt_statuses_are_tracked() {
        let b = RecordBuilder::new("mx");
        for status in [SmtpStatus::Sent, SmtpStatus::Received, SmtpStatus::Bounced, SmtpStatus::Deferred] {
            assert!(classify(&b.status("Q1", "rcpt", "example.com", status, "2.0.0").payload).is_ok());
        }
        for status in [SmtpStatus::Expired, SmtpStatus::Returned] {
            let err = classify(&b.status("Q1", "rcpt", "example.com", status, "5.4.7").payload).unwrap_err();
            assert!(matches!(err, TrackerError::UnsupportedAction { kind: "SmtpSentStatus" }));
        }
    }

    #[tokio::test]
    #[traced_test]
    async fn unsupported_records_never_reach_the_channel() {
        let (tx, mut rx) = mpsc::channel(4);
        let publisher = Publisher::new(tx);
        let b = RecordBuilder::new("mx");

        publisher.publish(b.warning("hostname verification failed")).await.unwrap();
        publisher.publish(b.connect("client", "1.2.3.4")).await.unwrap();
        drop(publisher);

        let received = rx.recv().await.unwrap();
        assert_eq!(received.payload.kind(), "SmtpdConnect");
        assert!(rx.recv().await.is_none());
        assert!(logs_contain("unsupported action type: Warning"));
    }

    #[tokio::test]
    async fn publishing_after_close_fails() {
        let (tx, mut rx) = mpsc::channel(1);
        let publisher = Publisher::new(tx);
        rx.close();
        let err = publisher
            .publish(RecordBuilder::new("mx").connect("client", "1.2.3.4"))
            .await
            .unwrap_err();
        assert!(matches!(err, TrackerError::IntakeClosed));
    }

    #[tokio::test]
    async fn full_channel_applies_backpressure() {
        let (tx, mut rx) = mpsc::channel(1);
        let publisher = Publisher::new(tx);
        let b = RecordBuilder::new("mx");
        publisher.publish(b.connect("c1", "1.2.3.4")).await.unwrap();
        assert_eq!(publisher.capacity(), 0);

        let blocked = tokio::spawn({
            let publisher = publisher.clone();
            let record = b.connect("c2", "1.2.3.5");
            async move { publisher.publish(record).await }
        });
        tokio::task::yield_now().await;
        assert!(!blocked.is_finished());

        rx.recv().await.unwrap();
        blocked.await.unwrap().unwrap();
        assert_eq!(rx.recv().await.unwrap().location.line, 2);
    }
}
