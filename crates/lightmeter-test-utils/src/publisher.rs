// SPDX-FileCopyrightText: 2026 Lightmeter Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Result sink that captures everything it is handed.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use lightmeter_core::{DeliveryResult, ResultPublisher, TrackerError};
use tokio::sync::Notify;

/// A [`ResultPublisher`] for assertions.
///
/// Published results are kept in order and retrievable via [`results`](Self::results).
/// A publisher built with [`failing`](Self::failing) rejects every result
/// the way a closed consumer would.
pub struct CollectingPublisher {
    results: Arc<Mutex<Vec<DeliveryResult>>>,
    notify: Arc<Notify>,
    fail: bool,
}

impl CollectingPublisher {
    pub fn new() -> Self {
        Self {
            results: Arc::new(Mutex::new(Vec::new())),
            notify: Arc::new(Notify::new()),
            fail: false,
        }
    }

    /// A consumer that has gone away.
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::new()
        }
    }

    /// Everything published so far, in publication order.
    pub fn results(&self) -> Vec<DeliveryResult> {
        self.results.lock().expect("results lock poisoned").clone()
    }

    pub fn count(&self) -> usize {
        self.results.lock().expect("results lock poisoned").len()
    }

    /// Wait until at least `n` results were published.
    ///
    /// Returns the results collected so far, or `None` if `timeout` passed
    /// first.
    pub async fn wait_for(&self, n: usize, timeout: Duration) -> Option<Vec<DeliveryResult>> {
        let wait = async {
            loop {
                let notified = self.notify.notified();
                tokio::pin!(notified);
                // Register before checking, so a publish in between is not missed.
                notified.as_mut().enable();
                if self.count() >= n {
                    return self.results();
                }
                notified.await;
            }
        };
        tokio::time::timeout(timeout, wait).await.ok()
    }
}

impl Default for CollectingPublisher {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ResultPublisher for CollectingPublisher {
    async fn publish(&self, result: DeliveryResult) -> Result<(), TrackerError> {
        if self.fail {
            return Err(TrackerError::PublisherClosed);
        }
        self.results
            .lock()
            .expect("results lock poisoned")
            .push(result);
        self.notify.notify_waiters();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lightmeter_core::ResultKey;

    #[tokio::test]
    async fn wait_for_wakes_on_publish() {
        let publisher = Arc::new(CollectingPublisher::new());
        let waiter = tokio::spawn({
            let publisher = publisher.clone();
            async move { publisher.wait_for(2, Duration::from_secs(5)).await }
        });

        for local in ["a", "b"] {
            let mut result = DeliveryResult::new();
            result.set(ResultKey::ResultRecipientLocalPart, local);
            publisher.publish(result).await.unwrap();
        }

        let results = waiter.await.unwrap().expect("two results");
        assert_eq!(results.len(), 2);
    }

    #[tokio::test]
    async fn wait_for_times_out() {
        let publisher = CollectingPublisher::new();
        assert!(publisher.wait_for(1, Duration::from_millis(20)).await.is_none());
    }

    #[tokio::test]
    async fn failing_publisher_reports_closed() {
        let publisher = CollectingPublisher::failing();
        let err = publisher.publish(DeliveryResult::new()).await.unwrap_err();
        assert!(matches!(err, TrackerError::PublisherClosed));
        assert_eq!(publisher.count(), 0);
    }
}
