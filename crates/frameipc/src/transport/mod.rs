// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Transport adapter contract.
//!
//! A transport is a pure object pipe: directed writes by [`Route`], a stream
//! of inbound `(route, envelope)` pairs and three lifecycle signals. It
//! carries no addressing, correlation or retry logic; all of that lives in
//! [`Ipc`](crate::ipc::Ipc).

pub mod memory;

pub use memory::MemoryTransport;

use crate::address::Route;
use crate::envelope::{Envelope, EnvelopeError};
use crate::error::TransportError;
use tokio::sync::mpsc;

/// Directed, fire-and-forget write side of a physical channel.
pub trait Transport: Send + Sync + 'static {
    /// Write one envelope toward `route`. Per-route FIFO is typical but not
    /// guaranteed.
    fn send_raw(&self, route: Route, envelope: &Envelope) -> Result<(), TransportError>;
}

/// Everything the physical channel reports back.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    /// An envelope arrived from the context behind `route`.
    Message { route: Route, envelope: Envelope },
    /// The guest is about to navigate; traffic sent now would be lost.
    AboutToUnload,
    /// The guest document is ready again.
    Ready,
    /// The channel is gone for good.
    Destroyed,
}

impl TransportEvent {
    /// Decode a raw JSON message received from `route`.
    pub fn message_from_json(route: Route, text: &str) -> Result<Self, EnvelopeError> {
        Ok(Self::Message {
            route,
            envelope: Envelope::from_json(text)?,
        })
    }
}

/// Producer half of a transport's event stream.
pub type EventSender = mpsc::UnboundedSender<TransportEvent>;
/// Consumer half of a transport's event stream.
pub type EventReceiver = mpsc::UnboundedReceiver<TransportEvent>;

/// Create the event stream a driver task consumes.
pub fn event_channel() -> (EventSender, EventReceiver) {
    mpsc::unbounded_channel()
}
