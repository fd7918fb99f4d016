// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Guest side of the protocol.
//!
//! A [`GuestEndpoint`] lives inside one guest context. It only sees
//! envelopes addressed to itself or to `*`, answers them from its own
//! listener table, and calls the host with envelopes carrying its own
//! address so the host can learn the route back.
//!
//! Guest calls never retry and are not held across navigation; the guest
//! context itself goes away when the host holds.

use crate::address::{Address, Route};
use crate::config::{IpcConfig, GUEST_ACK_PREFIX};
use crate::envelope::{Envelope, Names};
use crate::error::{CallError, CallResult};
use crate::pending::{AckMinter, PendingCallTable};
use crate::registry::{Handler, ListenerId, ListenerRegistry, MessageInfo, Reply};
use crate::transport::{EventSender, TransportEvent};
use parking_lot::Mutex;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

struct GuestInner {
    address: Address,
    route: Route,
    is_main: bool,
    host: EventSender,
    config: IpcConfig,
    minter: AckMinter,
    listeners: Mutex<ListenerRegistry>,
    pending: Mutex<PendingCallTable>,
}

/// Messaging endpoint of one guest context.
#[derive(Clone)]
pub struct GuestEndpoint {
    inner: Arc<GuestInner>,
}

impl GuestEndpoint {
    /// Endpoint for the primary context.
    pub fn main(host: EventSender, config: IpcConfig) -> Self {
        Self::new(Address::Main, Route::Primary, host, config)
    }

    /// Endpoint for a nested context reached through `route`, with a fresh id.
    pub fn nested(route: Route, host: EventSender, config: IpcConfig) -> Self {
        Self::new(Address::mint(), route, host, config)
    }

    pub fn new(address: Address, route: Route, host: EventSender, config: IpcConfig) -> Self {
        let is_main = address.is_main();
        Self {
            inner: Arc::new(GuestInner {
                address,
                route,
                is_main,
                host,
                config,
                minter: AckMinter::new(GUEST_ACK_PREFIX),
                listeners: Mutex::new(ListenerRegistry::new()),
                pending: Mutex::new(PendingCallTable::new()),
            }),
        }
    }

    pub fn address(&self) -> &Address {
        &self.inner.address
    }

    pub fn route(&self) -> Route {
        self.inner.route
    }

    pub fn is_main(&self) -> bool {
        self.inner.is_main
    }

    /// Feed host envelopes from `inbound` until the channel closes; then
    /// every in-flight call fails with [`CallError::Destroyed`].
    pub fn spawn(&self, mut inbound: mpsc::UnboundedReceiver<Envelope>) -> JoinHandle<()> {
        let guest = self.clone();
        tokio::spawn(async move {
            while let Some(envelope) = inbound.recv().await {
                guest.receive(envelope);
            }
            let rejected = guest.inner.pending.lock().reject_all(&CallError::Destroyed);
            tracing::debug!("guest {} detached, {} calls rejected", guest.inner.address, rejected);
        })
    }

    /// Answer host requests named `names`.
    pub fn on<F, R>(&self, names: impl Into<Names>, handler: F) -> ListenerId
    where
        F: Fn(Value, &MessageInfo) -> R + Send + Sync + 'static,
        R: Into<Reply>,
    {
        self.register(names.into(), Arc::new(handler), false)
    }

    pub fn once<F, R>(&self, names: impl Into<Names>, handler: F) -> ListenerId
    where
        F: Fn(Value, &MessageInfo) -> R + Send + Sync + 'static,
        R: Into<Reply>,
    {
        self.register(names.into(), Arc::new(handler), true)
    }

    pub fn off(&self, names: impl Into<Names>, id: Option<ListenerId>) -> usize {
        self.inner
            .listeners
            .lock()
            .off(&Address::Wildcard, &names.into(), id)
    }

    fn register(&self, names: Names, handler: Arc<dyn Handler>, once: bool) -> ListenerId {
        self.inner
            .listeners
            .lock()
            .on(Address::Wildcard, names, handler, once)
    }

    /// Call the host with the default timeout.
    pub async fn send(&self, names: impl Into<Names>, payload: Value) -> CallResult<Value> {
        self.send_with(names, payload, self.inner.config.default_timeout())
            .await
    }

    pub async fn send_with(
        &self,
        names: impl Into<Names>,
        payload: Value,
        timeout: Duration,
    ) -> CallResult<Value> {
        match names.into() {
            Names::One(name) => self.call(name, payload, timeout).await,
            Names::Many(names) => {
                let calls = names
                    .into_iter()
                    .map(|name| self.call(name, payload.clone(), timeout));
                Ok(Value::Array(futures::future::try_join_all(calls).await?))
            }
        }
    }

    pub fn notify(&self, names: impl Into<Names>, payload: Value) {
        let envelope = Envelope::notification(self.inner.address.clone(), names, payload)
            .with_main_flag(self.inner.is_main);
        if self.post(envelope).is_err() {
            tracing::debug!("guest {}: host gone, notify dropped", self.inner.address);
        }
    }

    async fn call(&self, name: String, payload: Value, timeout: Duration) -> CallResult<Value> {
        let token = self.inner.minter.mint(&name);
        let attempt = self.inner.pending.lock().insert(
            token.clone(),
            self.inner.address.clone(),
            &name,
            0,
        );
        let envelope = Envelope::request(
            self.inner.address.clone(),
            name.as_str(),
            token.as_str(),
            payload.clone(),
        )
        .with_main_flag(self.inner.is_main);

        if self.post(envelope).is_err() {
            self.inner.pending.lock().cancel(&token);
            return Err(CallError::Destroyed);
        }

        match tokio::time::timeout(timeout, attempt.reply).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(_)) => Err(CallError::Destroyed),
            Err(_) => {
                self.inner.pending.lock().cancel(&token);
                Err(CallError::timeout(&name, &self.inner.address, &payload))
            }
        }
    }

    fn post(&self, envelope: Envelope) -> Result<(), mpsc::error::SendError<TransportEvent>> {
        self.inner.host.send(TransportEvent::Message {
            route: self.inner.route,
            envelope,
        })
    }

    /// Handle one envelope delivered by the host.
    pub fn receive(&self, envelope: Envelope) {
        let inner = &self.inner;
        if !envelope.address.is_wildcard() && envelope.address != inner.address {
            tracing::trace!(
                "guest {}: ignoring {} for {}",
                inner.address,
                envelope.name,
                envelope.address
            );
            return;
        }

        if envelope.is_ack {
            if let Some(token) = envelope.answered_token() {
                let outcome = envelope.outcome();
                inner.pending.lock().resolve(&inner.address, token, outcome);
            }
            return;
        }

        let selected = inner
            .listeners
            .lock()
            .select(&envelope.address, &envelope.name);
        let Some(selected) = selected else {
            tracing::debug!("guest {}: no listener for {}", inner.address, envelope.name);
            return;
        };

        let info = MessageInfo {
            address: envelope.address.clone(),
            route: Some(inner.route),
            name: selected.name.clone(),
            ack_name: envelope.ack_name.clone(),
            is_main_address: inner.is_main,
        };
        let reply = selected.invoke(envelope.payload, &info);
        let Some(ack_name) = envelope.ack_name else {
            if let Reply::Pending(future) = reply {
                tokio::spawn(future);
            }
            return;
        };

        match reply {
            Reply::Ready(result) => self.ack(ack_name, result),
            Reply::Pending(future) => {
                let guest = self.clone();
                tokio::spawn(async move {
                    let result = future.await;
                    guest.ack(ack_name, result);
                });
            }
        }
    }

    fn ack(&self, ack_name: String, result: Result<Value, Value>) {
        let envelope = Envelope::ack(self.inner.address.clone(), ack_name, result)
            .with_main_flag(self.inner.is_main);
        if self.post(envelope).is_err() {
            tracing::debug!("guest {}: host gone, ack dropped", self.inner.address);
        }
    }
}

impl std::fmt::Debug for GuestEndpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GuestEndpoint")
            .field("address", &self.inner.address)
            .field("route", &self.inner.route)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::{event_channel, EventReceiver};
    use serde_json::json;

    fn next_message(rx: &mut EventReceiver) -> (Route, Envelope) {
        match rx.try_recv() {
            Ok(TransportEvent::Message { route, envelope }) => (route, envelope),
            other => panic!("Expected message, got {:?}", other),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn answers_requests_for_itself() {
        let (host, mut rx) = event_channel();
        let guest = GuestEndpoint::new(Address::named("frameA"), Route::Frame(5), host, IpcConfig::default());
        guest.on("echo", |payload: Value, _info: &MessageInfo| payload);

        guest.receive(Envelope::request(Address::named("frameB"), "echo", "t0", json!(0)));
        assert!(rx.try_recv().is_err());

        guest.receive(Envelope::request(Address::named("frameA"), "echo", "t1", json!({"v": 7})));
        let (route, ack) = next_message(&mut rx);
        assert_eq!(route, Route::Frame(5));
        assert!(ack.is_ack);
        assert_eq!(ack.address, Address::named("frameA"));
        assert!(!ack.is_main_address);
        assert_eq!(ack.payload, json!({"v": 7}));
    }

    #[tokio::test(start_paused = true)]
    async fn wildcard_requests_reach_every_guest() {
        let (host, mut rx) = event_channel();
        let guest = GuestEndpoint::main(host, IpcConfig::default());
        guest.on("announce", |_p: Value, info: &MessageInfo| json!(info.name));

        guest.receive(Envelope::request(Address::Wildcard, "announce", "t1", json!(null)));
        let (route, ack) = next_message(&mut rx);
        assert_eq!(route, Route::Primary);
        assert!(ack.is_main_address);
        assert_eq!(ack.address, Address::Main);
        assert_eq!(ack.payload, json!("announce"));
    }

    #[tokio::test(start_paused = true)]
    async fn call_resolves_from_host_ack() {
        let (host, mut rx) = event_channel();
        let guest = GuestEndpoint::nested(Route::Frame(2), host, IpcConfig::default());

        let caller = {
            let guest = guest.clone();
            tokio::spawn(async move { guest.send("frame.register", json!({"url": "about:blank"})).await })
        };
        tokio::task::yield_now().await;

        let (route, request) = next_message(&mut rx);
        assert_eq!(route, Route::Frame(2));
        assert_eq!(&request.address, guest.address());
        let token = request.ack_name.unwrap();
        assert!(token.starts_with("ack_p2r_frame.register_"));

        guest.receive(Envelope::ack(guest.address().clone(), token, Ok(json!({"hostId": 1}))));
        assert_eq!(caller.await.unwrap(), Ok(json!({"hostId": 1})));
    }

    #[tokio::test(start_paused = true)]
    async fn call_times_out_without_retry() {
        let (host, mut rx) = event_channel();
        let guest = GuestEndpoint::main(host, IpcConfig::default());
        let result = guest
            .send_with("slow", json!(1), Duration::from_millis(500))
            .await;
        assert!(result.unwrap_err().is_timeout());

        let mut writes = 0;
        while rx.try_recv().is_ok() {
            writes += 1;
        }
        assert_eq!(writes, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn closed_inbound_rejects_calls() {
        let (host, _rx) = event_channel();
        let guest = GuestEndpoint::main(host, IpcConfig::default());
        let (tx, inbound) = mpsc::unbounded_channel();
        let driver = guest.spawn(inbound);

        let caller = {
            let guest = guest.clone();
            tokio::spawn(async move { guest.send("x", json!(null)).await })
        };
        tokio::task::yield_now().await;
        drop(tx);
        driver.await.unwrap();
        assert_eq!(caller.await.unwrap(), Err(CallError::Destroyed));
    }

    #[tokio::test(start_paused = true)]
    async fn host_gone_fails_immediately() {
        let (host, rx) = event_channel();
        drop(rx);
        let guest = GuestEndpoint::main(host, IpcConfig::default());
        assert_eq!(guest.send("x", json!(null)).await, Err(CallError::Destroyed));
    }
}
