// SPDX-FileCopyrightText: 2026 Lightmeter Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The downstream seam of the tracker.

use async_trait::async_trait;

use crate::error::TrackerError;
use crate::result::DeliveryResult;

/// Sink for delivery results (the delivery database, a JSON printer, a test collector).
///
/// `publish` may suspend: a bounded consumer applies backpressure to the
/// notifier through it.
#[async_trait]
pub trait ResultPublisher: Send + Sync {
    async fn publish(&self, result: DeliveryResult) -> Result<(), TrackerError>;
}
