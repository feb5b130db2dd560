// SPDX-FileCopyrightText: 2026 Lightmeter Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Core types for the Lightmeter delivery tracker.
//!
//! Holds the parsed record model the tracker consumes, the flat result model
//! it publishes, the shared error type, and the publisher trait that connects
//! the tracker to its consumer.

pub mod error;
pub mod record;
pub mod result;
pub mod traits;

pub use error::TrackerError;
pub use record::{Header, Payload, Record, RecordLocation, SmtpStatus};
pub use result::{DeliveryResult, MessageDirection, ResultEntry, ResultKey};
pub use traits::ResultPublisher;
