// SPDX-FileCopyrightText: 2026 Lightmeter Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Test utilities for Lightmeter tracking tests.
//!
//! Provides record builders, a collecting result sink and a harness that
//! runs a real tracker on a temp workspace.
//!
//! # Components
//!
//! - [`RecordBuilder`] - Postfix-shaped records with advancing line numbers and times
//! - [`CollectingPublisher`] - Result sink capturing published results for assertions
//! - [`TrackerHarness`] - A running tracker on a temp `logtracker.db`

pub mod harness;
pub mod publisher;
pub mod records;

pub use harness::{TrackerHarness, TrackerHarnessBuilder};
pub use publisher::CollectingPublisher;
pub use records::RecordBuilder;
