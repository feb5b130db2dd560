// SPDX-FileCopyrightText: 2026 Lightmeter Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Log-to-delivery correlation for Postfix.
//!
//! Parsed log records go in through a [`Publisher`]; the [`Tracker`]
//! correlates them into connections, queues and delivery attempts inside
//! the store, and publishes one flat [`DeliveryResult`] per attempt once
//! the message it belongs to has left the queue.
//!
//! [`DeliveryResult`]: lightmeter_core::DeliveryResult

pub mod actions;
pub mod builder;
pub mod filters;
pub mod fingerprint;
pub mod gc;
pub mod intake;
pub mod node_type;
pub mod notifier;
pub mod resolver;
pub mod runner;
pub mod shutdown;

pub use actions::StateMachine;
pub use builder::ResultBuilder;
pub use filters::{Decision, Filters};
pub use intake::{Publisher, classify};
pub use notifier::ChannelPublisher;
pub use runner::Tracker;
pub use shutdown::install_signal_handler;
