// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Host-side messaging engine.
//!
//! One [`Ipc`] exists per physical transport and exclusively owns that
//! transport's address directory, listener registry, pending-call table and
//! suspension state. Clones share the same state.
//!
//! # Call lifecycle
//!
//! ```text
//! send() ──> suspension ──(Active)──> mint token ─> pending table ─> resolve route ─> transport
//!               │                                                         │
//!               └─(Holding)─> FIFO queue ──(ready)──> same path           └─ ack ─> resolve / Remote error
//!               └─(Destroyed)─> CallError::Destroyed
//! ```
//!
//! A timed-out attempt is removed from the table and, if the retry budget
//! allows, reissued under a new token.
//!
//! Handlers that return [`Reply::Pending`] are driven on a tokio task, so
//! events must be fed from inside a tokio runtime.

use crate::address::{Address, Route};
use crate::config::IpcConfig;
use crate::directory::AddressDirectory;
use crate::envelope::{Envelope, Names};
use crate::error::{CallError, CallResult};
use crate::facade::BoundIpc;
use crate::pending::{AckMinter, Attempt, PendingCallTable, PendingInfo};
use crate::registry::{Handler, ListenerId, ListenerRegistry, MessageInfo, Reply};
use crate::suspension::{Admission, Phase, Suspension};
use crate::transport::{EventReceiver, Transport, TransportEvent};
use parking_lot::Mutex;
use serde_json::Value;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

/// One call attempt as submitted by the caller.
#[derive(Debug, Clone)]
struct CallRequest {
    address: Address,
    name: String,
    payload: Value,
    timeout: Duration,
    retries_left: u32,
}

/// Outbound work gated by the suspension controller.
enum QueuedOp {
    /// Start an attempt and hand it to the waiting caller.
    Call {
        request: CallRequest,
        start: oneshot::Sender<CallResult<Attempt>>,
    },
    /// Request without an ack.
    Notify(Envelope),
    /// Reply to a request received on `route`.
    Ack { route: Route, envelope: Envelope },
}

impl QueuedOp {
    fn reject(self) {
        if let Self::Call { start, .. } = self {
            let _ = start.send(Err(CallError::Destroyed));
        }
    }
}

struct Shared {
    transport: Arc<dyn Transport>,
    config: IpcConfig,
    minter: AckMinter,
    directory: Mutex<AddressDirectory>,
    listeners: Mutex<ListenerRegistry>,
    pending: Mutex<PendingCallTable>,
    /// Lock order: `suspension` before `directory` / `pending`.
    suspension: Mutex<Suspension<QueuedOp>>,
}

/// Messaging engine bound to one transport.
#[derive(Clone)]
pub struct Ipc {
    shared: Arc<Shared>,
}

/// Non-owning handle; lets handlers reach the engine without a cycle.
#[derive(Clone)]
pub struct WeakIpc {
    shared: Weak<Shared>,
}

impl WeakIpc {
    pub fn upgrade(&self) -> Option<Ipc> {
        self.shared.upgrade().map(|shared| Ipc { shared })
    }
}

impl Ipc {
    pub fn new<T: Transport>(transport: Arc<T>, config: IpcConfig) -> Self {
        let transport: Arc<dyn Transport> = transport;
        Self::from_dyn(transport, config)
    }

    pub(crate) fn from_dyn(transport: Arc<dyn Transport>, config: IpcConfig) -> Self {
        let minter = AckMinter::new(config.ack_prefix.clone());
        Self {
            shared: Arc::new(Shared {
                transport,
                config,
                minter,
                directory: Mutex::new(AddressDirectory::new()),
                listeners: Mutex::new(ListenerRegistry::new()),
                pending: Mutex::new(PendingCallTable::new()),
                suspension: Mutex::new(Suspension::new()),
            }),
        }
    }

    pub fn downgrade(&self) -> WeakIpc {
        WeakIpc {
            shared: Arc::downgrade(&self.shared),
        }
    }

    pub fn config(&self) -> &IpcConfig {
        &self.shared.config
    }

    /// Per-address handle sharing this engine.
    pub fn bind(&self, address: impl Into<Address>) -> BoundIpc {
        BoundIpc::new(self.clone(), address.into())
    }

    /// Consume the transport's event stream until it ends or is destroyed.
    ///
    /// A closed stream counts as `destroyed`.
    pub fn spawn_driver(&self, mut events: EventReceiver) -> JoinHandle<()> {
        let ipc = self.clone();
        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                let destroyed = matches!(event, TransportEvent::Destroyed);
                ipc.handle_event(event);
                if destroyed {
                    return;
                }
            }
            ipc.destroy();
        })
    }

    /// Apply one transport event.
    pub fn handle_event(&self, event: TransportEvent) {
        match event {
            TransportEvent::Message { route, envelope } => self.receive(route, envelope),
            TransportEvent::AboutToUnload => self.hold(),
            TransportEvent::Ready => self.ready(),
            TransportEvent::Destroyed => self.destroy(),
        }
    }

    // ---------------------------------------------------------------
    // Outbound
    // ---------------------------------------------------------------

    /// Call `names` on `address` with the configured timeout and retry.
    ///
    /// A single name resolves to the ack payload. A list of names issues one
    /// independent call per name sharing `payload` and resolves to an array
    /// of results once all succeed; the first failure fails the whole call.
    pub async fn send(
        &self,
        address: impl Into<Address>,
        names: impl Into<Names>,
        payload: Value,
    ) -> CallResult<Value> {
        let config = &self.shared.config;
        self.send_with(address, names, payload, config.default_timeout(), config.default_retry)
            .await
    }

    /// [`send`](Self::send) with an explicit per-attempt timeout and retry budget.
    pub async fn send_with(
        &self,
        address: impl Into<Address>,
        names: impl Into<Names>,
        payload: Value,
        timeout: Duration,
        retry: u32,
    ) -> CallResult<Value> {
        let address = address.into();
        match names.into() {
            Names::One(name) => {
                self.call(CallRequest {
                    address,
                    name,
                    payload,
                    timeout,
                    retries_left: retry,
                })
                .await
            }
            Names::Many(names) => {
                let calls = names.into_iter().map(|name| {
                    self.call(CallRequest {
                        address: address.clone(),
                        name,
                        payload: payload.clone(),
                        timeout,
                        retries_left: retry,
                    })
                });
                let values = futures::future::try_join_all(calls).await?;
                Ok(Value::Array(values))
            }
        }
    }

    /// Emit a request nobody waits on.
    pub fn notify(&self, address: impl Into<Address>, names: impl Into<Names>, payload: Value) {
        let envelope = Envelope::notification(address.into(), names, payload);
        self.shared.submit(QueuedOp::Notify(envelope));
    }

    /// Whenever `trigger` arrives from `address`, notify the sender with
    /// `names`/`payload`. No reply is awaited and nothing is retried.
    pub fn send_on(
        &self,
        address: impl Into<Address>,
        trigger: impl Into<Names>,
        names: impl Into<Names>,
        payload: Value,
    ) -> ListenerId {
        let weak = self.downgrade();
        let names = names.into();
        self.on(address, trigger, move |_trigger: Value, info: &MessageInfo| {
            if let Some(ipc) = weak.upgrade() {
                ipc.notify(info.address.clone(), names.clone(), payload.clone());
            }
        })
    }

    async fn call(&self, mut request: CallRequest) -> CallResult<Value> {
        loop {
            let (start, started) = oneshot::channel();
            self.shared.submit(QueuedOp::Call {
                request: request.clone(),
                start,
            });
            let attempt = started.await.map_err(|_| CallError::Destroyed)??;

            let token = attempt.token.clone();
            match tokio::time::timeout(request.timeout, attempt.reply).await {
                Ok(Ok(outcome)) => return outcome,
                Ok(Err(_)) => return Err(CallError::Destroyed),
                Err(_) => {
                    self.shared.pending.lock().cancel(&token);
                    if self.shared.config.log_traffic {
                        tracing::debug!(
                            "ipc timeout: name={} ack={} address={} retries_left={}",
                            request.name,
                            token,
                            request.address,
                            request.retries_left
                        );
                    }
                    if request.retries_left == 0 {
                        return Err(CallError::timeout(
                            &request.name,
                            &request.address,
                            &request.payload,
                        ));
                    }
                    request.retries_left -= 1;
                }
            }
        }
    }

    // ---------------------------------------------------------------
    // Listeners
    // ---------------------------------------------------------------

    /// Answer requests named `names` from `address` (`Wildcard` for anyone).
    pub fn on<F, R>(&self, address: impl Into<Address>, names: impl Into<Names>, handler: F) -> ListenerId
    where
        F: Fn(Value, &MessageInfo) -> R + Send + Sync + 'static,
        R: Into<Reply>,
    {
        self.register(address.into(), names.into(), Arc::new(handler), false)
    }

    /// Like [`on`](Self::on) but first removes listeners with the same key.
    pub fn on_unique<F, R>(
        &self,
        address: impl Into<Address>,
        names: impl Into<Names>,
        handler: F,
    ) -> ListenerId
    where
        F: Fn(Value, &MessageInfo) -> R + Send + Sync + 'static,
        R: Into<Reply>,
    {
        let address = address.into();
        let names = names.into();
        self.shared.listeners.lock().off(&address, &names, None);
        self.register(address, names, Arc::new(handler), false)
    }

    /// Answer the next matching request only.
    pub fn once<F, R>(&self, address: impl Into<Address>, names: impl Into<Names>, handler: F) -> ListenerId
    where
        F: Fn(Value, &MessageInfo) -> R + Send + Sync + 'static,
        R: Into<Reply>,
    {
        self.register(address.into(), names.into(), Arc::new(handler), true)
    }

    /// Remove listeners registered for exactly `address`/`names`, or only `id`.
    pub fn off(&self, address: impl Into<Address>, names: impl Into<Names>, id: Option<ListenerId>) -> usize {
        self.shared
            .listeners
            .lock()
            .off(&address.into(), &names.into(), id)
    }

    fn register(&self, address: Address, names: Names, handler: Arc<dyn Handler>, once: bool) -> ListenerId {
        self.shared.listeners.lock().on(address, names, handler, once)
    }

    /// Run the dispatcher locally as if `name` had arrived from `address`.
    ///
    /// No ack is sent; the selected handler's reply is returned instead.
    pub fn dispatch(&self, address: impl Into<Address>, name: &str, payload: Value) -> Option<Reply> {
        let envelope = Envelope::notification(address.into(), name, payload);
        self.shared.invoke(None, envelope)
    }

    // ---------------------------------------------------------------
    // Inbound
    // ---------------------------------------------------------------

    /// Handle one envelope that arrived on `route`.
    pub fn receive(&self, route: Route, envelope: Envelope) {
        Shared::receive(&self.shared, route, envelope);
    }

    // ---------------------------------------------------------------
    // Lifecycle
    // ---------------------------------------------------------------

    /// `about-to-unload`: buffer all outbound traffic.
    pub fn hold(&self) {
        if self.shared.suspension.lock().hold() {
            tracing::info!("ipc hold");
        }
    }

    /// `ready`: replay buffered traffic in submission order.
    pub fn ready(&self) {
        let mut suspension = self.shared.suspension.lock();
        if let Some(ops) = suspension.release() {
            tracing::info!("ipc recover, replaying {} buffered operations", ops.len());
            for op in ops {
                self.shared.perform(op);
            }
        }
    }

    /// `destroyed`: fail everything in flight; later sends fail immediately.
    pub fn destroy(&self) {
        let leftover = self.shared.suspension.lock().destroy();
        let Some(leftover) = leftover else {
            return;
        };
        let buffered = leftover.len();
        for op in leftover {
            op.reject();
        }
        let rejected = self.shared.pending.lock().reject_all(&CallError::Destroyed);
        tracing::info!(
            "ipc destroyed: {} pending calls rejected, {} buffered operations dropped",
            rejected,
            buffered
        );
    }

    pub fn phase(&self) -> Phase {
        self.shared.suspension.lock().phase()
    }

    // ---------------------------------------------------------------
    // Directory
    // ---------------------------------------------------------------

    /// Teach the directory a route learned out of band (e.g. a handshake).
    pub fn learn(&self, address: &Address, route: Route) {
        self.shared.directory.lock().learn(address, route);
    }

    pub fn forget(&self, address: &Address) -> Option<Route> {
        self.shared.directory.lock().forget(address)
    }

    pub fn resolve(&self, address: &Address) -> Option<Route> {
        self.shared.directory.lock().resolve(address)
    }

    /// In-flight calls.
    pub fn pending_calls(&self) -> Vec<PendingInfo> {
        self.shared.pending.lock().snapshot()
    }

    /// True if both handles share one engine.
    pub fn same_engine(&self, other: &Ipc) -> bool {
        Arc::ptr_eq(&self.shared, &other.shared)
    }
}

impl Shared {
    fn submit(&self, op: QueuedOp) {
        let mut suspension = self.suspension.lock();
        match suspension.admit(op) {
            Admission::Proceed(op) => self.perform(op),
            Admission::Queued => tracing::trace!("ipc holding, {} queued", suspension.queued()),
            Admission::Rejected(op) => op.reject(),
        }
    }

    /// Put an admitted operation on the wire. Called with `suspension` held.
    fn perform(&self, op: QueuedOp) {
        match op {
            QueuedOp::Call { request, start } => {
                let result = self.start_attempt(&request);
                if let Err(Ok(attempt)) = start.send(result) {
                    // Caller went away before the attempt started.
                    self.pending.lock().cancel(&attempt.token);
                }
            }
            QueuedOp::Notify(envelope) => {
                if let Err(err) = self.emit(&envelope) {
                    tracing::warn!("ipc notify {} dropped: {}", envelope.name, err);
                }
            }
            QueuedOp::Ack { route, envelope } => {
                if self.config.log_traffic {
                    tracing::debug!(
                        "ipc reply: name={} address={} route={} error={:?}",
                        envelope.name,
                        envelope.address,
                        route,
                        envelope.error
                    );
                }
                if let Err(err) = self.transport.send_raw(route, &envelope) {
                    tracing::warn!("ipc reply {} lost: {}", envelope.name, err);
                }
            }
        }
    }

    fn start_attempt(&self, request: &CallRequest) -> CallResult<Attempt> {
        let token = self.minter.mint(&request.name);
        let attempt = self.pending.lock().insert(
            token.clone(),
            request.address.clone(),
            &request.name,
            request.retries_left,
        );
        let envelope = Envelope::request(
            request.address.clone(),
            request.name.as_str(),
            token.as_str(),
            request.payload.clone(),
        );
        if self.config.log_traffic {
            tracing::debug!(
                "ipc send: name={} ack={} address={} payload={}",
                request.name,
                token,
                request.address,
                request.payload
            );
        }
        match self.emit(&envelope) {
            Ok(_) => Ok(attempt),
            Err(err) => {
                self.pending.lock().cancel(&token);
                Err(err)
            }
        }
    }

    /// Resolve the envelope's address and write it. Returns the number of
    /// physical writes.
    ///
    /// An unroutable address is only an error with `fail_fast_unroutable`;
    /// otherwise the envelope is dropped and the caller's timer decides.
    fn emit(&self, envelope: &Envelope) -> CallResult<usize> {
        let routes: Vec<Route> = {
            let directory = self.directory.lock();
            if envelope.address.is_wildcard() {
                directory.resolve_broadcast().into_iter().collect()
            } else {
                directory.resolve(&envelope.address).into_iter().collect()
            }
        };

        if routes.is_empty() {
            if self.config.fail_fast_unroutable {
                return Err(CallError::Unroutable(envelope.address.clone()));
            }
            tracing::warn!(
                "ipc: no route for {}, dropping {}",
                envelope.address,
                envelope.name
            );
            return Ok(0);
        }

        let mut written = 0;
        for route in routes {
            match self.transport.send_raw(route, envelope) {
                Ok(()) => written += 1,
                Err(err) => tracing::warn!("ipc: write of {} to {} failed: {}", envelope.name, route, err),
            }
        }
        Ok(written)
    }

    fn receive(self: &Arc<Self>, route: Route, envelope: Envelope) {
        if envelope.is_ack {
            if self.config.log_traffic {
                tracing::debug!(
                    "ipc ack: name={} address={} route={}",
                    envelope.name,
                    envelope.address,
                    route
                );
            }
            if let Some(token) = envelope.answered_token() {
                let outcome = envelope.outcome();
                if !self.pending.lock().resolve(&envelope.address, token, outcome) {
                    tracing::debug!("ipc: late or unknown ack {} ignored", token);
                }
            }
            return;
        }

        if self.config.log_traffic {
            tracing::debug!(
                "ipc receive: name={} ack={:?} address={} route={} payload={}",
                envelope.name,
                envelope.ack_name,
                envelope.address,
                route,
                envelope.payload
            );
        }
        self.directory.lock().learn(&envelope.address, route);

        let address = envelope.address.clone();
        let ack_name = envelope.ack_name.clone();
        let is_main_address = envelope.is_main_address;
        let Some(reply) = self.invoke(Some(route), envelope) else {
            return;
        };

        match (ack_name, reply) {
            (Some(ack_name), Reply::Ready(result)) => {
                self.reply(route, address, ack_name, result, is_main_address);
            }
            (Some(ack_name), Reply::Pending(future)) => {
                let shared = Arc::clone(self);
                tokio::spawn(async move {
                    let result = future.await;
                    shared.reply(route, address, ack_name, result, is_main_address);
                });
            }
            (None, Reply::Pending(future)) => {
                tokio::spawn(async move {
                    let _ = future.await;
                });
            }
            (None, Reply::Ready(_)) => {}
        }
    }

    /// Select the single responder and run it.
    fn invoke(&self, route: Option<Route>, envelope: Envelope) -> Option<Reply> {
        let selected = self
            .listeners
            .lock()
            .select(&envelope.address, &envelope.name);
        let Some(selected) = selected else {
            if envelope.ack_name.is_some() {
                tracing::debug!(
                    "ipc: no listener for {} from {}; caller will time out",
                    envelope.name,
                    envelope.address
                );
            }
            return None;
        };

        let info = MessageInfo {
            address: envelope.address,
            route,
            name: selected.name.clone(),
            ack_name: envelope.ack_name,
            is_main_address: envelope.is_main_address,
        };
        Some(selected.invoke(envelope.payload, &info))
    }

    fn reply(
        &self,
        route: Route,
        address: Address,
        ack_name: String,
        result: Result<Value, Value>,
        is_main_address: bool,
    ) {
        let envelope = Envelope::ack(address, ack_name, result).with_main_flag(is_main_address);
        self.submit(QueuedOp::Ack { route, envelope });
    }
}
