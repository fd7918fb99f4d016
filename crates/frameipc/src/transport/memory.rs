// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! In-process transport.
//!
//! Records every physical write and forwards it to whatever guest is attached
//! behind the route. Used by the tests and by `frameipc-probe`.

use super::Transport;
use crate::address::Route;
use crate::envelope::Envelope;
use crate::error::TransportError;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;

/// Transport whose "wire" is a set of in-process channels.
#[derive(Default)]
pub struct MemoryTransport {
    /// Every write, in order.
    sent: Mutex<Vec<(Route, Envelope)>>,
    /// Attached guests by route.
    peers: Mutex<HashMap<Route, mpsc::UnboundedSender<Envelope>>>,
    closed: AtomicBool,
}

impl MemoryTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Attach a guest behind `route`; it receives every envelope written there.
    pub fn attach(&self, route: Route) -> mpsc::UnboundedReceiver<Envelope> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.peers.lock().insert(route, tx);
        rx
    }

    pub fn detach(&self, route: Route) {
        self.peers.lock().remove(&route);
    }

    /// Refuse all further writes.
    pub fn close(&self) {
        self.closed.store(true, Ordering::Relaxed);
        self.peers.lock().clear();
    }

    /// Snapshot of all writes so far.
    pub fn sent(&self) -> Vec<(Route, Envelope)> {
        self.sent.lock().clone()
    }

    pub fn sent_count(&self) -> usize {
        self.sent.lock().len()
    }

    /// Writes whose name contains `name`.
    pub fn sent_named(&self, name: &str) -> Vec<(Route, Envelope)> {
        self.sent
            .lock()
            .iter()
            .filter(|(_, env)| env.name.contains(name))
            .cloned()
            .collect()
    }

    /// Drain the write log.
    pub fn take_sent(&self) -> Vec<(Route, Envelope)> {
        std::mem::take(&mut *self.sent.lock())
    }
}

impl Transport for MemoryTransport {
    fn send_raw(&self, route: Route, envelope: &Envelope) -> Result<(), TransportError> {
        if self.closed.load(Ordering::Relaxed) {
            return Err(TransportError::Closed);
        }
        self.sent.lock().push((route, envelope.clone()));

        let mut peers = self.peers.lock();
        if let Some(peer) = peers.get(&route) {
            if peer.send(envelope.clone()).is_err() {
                peers.remove(&route);
                return Err(TransportError::Detached(route));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::address::Address;
    use serde_json::json;

    #[test]
    fn records_and_forwards() {
        let transport = MemoryTransport::new();
        let mut rx = transport.attach(Route::Frame(7));
        let env = Envelope::notification(Address::named("a"), "hello", json!(1));

        transport.send_raw(Route::Frame(7), &env).unwrap();
        transport.send_raw(Route::Frame(8), &env).unwrap();

        assert_eq!(transport.sent_count(), 2);
        assert_eq!(rx.try_recv().unwrap(), env);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn dropped_peer_reports_detached() {
        let transport = MemoryTransport::new();
        drop(transport.attach(Route::Primary));
        let env = Envelope::notification(Address::Main, "hello", json!(null));
        assert_eq!(
            transport.send_raw(Route::Primary, &env),
            Err(TransportError::Detached(Route::Primary))
        );
    }

    #[test]
    fn closed_transport_refuses_writes() {
        let transport = MemoryTransport::new();
        transport.close();
        let env = Envelope::notification(Address::Main, "hello", json!(null));
        assert_eq!(transport.send_raw(Route::Primary, &env), Err(TransportError::Closed));
        assert_eq!(transport.sent_count(), 0);
    }
}
