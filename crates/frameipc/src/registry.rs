// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Listener registry and single-responder selection.
//!
//! Records are kept in registration order, which is dispatch priority. For
//! each inbound request exactly one record is selected: the first whose
//! address pattern accepts the sender and whose names contain the request
//! name. Acks never reach this table; they are matched by token in the
//! [`PendingCallTable`](crate::pending::PendingCallTable).

use crate::address::{Address, Route};
use crate::envelope::Names;
use futures::FutureExt;
use serde_json::Value;
use std::any::Any;
use std::fmt;
use std::future::Future;
use std::panic::{self, AssertUnwindSafe};
use std::pin::Pin;
use std::sync::Arc;

/// Settled handler outcome: the reply value or a carried error.
pub type HandlerResult = Result<Value, Value>;

/// Awaitable handler outcome.
pub type HandlerFuture = Pin<Box<dyn Future<Output = HandlerResult> + Send + 'static>>;

/// What a handler hands back to the dispatcher.
pub enum Reply {
    /// Settled immediately; acked before dispatch returns.
    Ready(HandlerResult),
    /// Settles later; the ack is sent once the future completes.
    Pending(HandlerFuture),
}

impl Reply {
    pub fn value(value: Value) -> Self {
        Self::Ready(Ok(value))
    }

    pub fn none() -> Self {
        Self::Ready(Ok(Value::Null))
    }

    pub fn error(error: impl Into<Value>) -> Self {
        Self::Ready(Err(error.into()))
    }

    pub fn pending<F>(future: F) -> Self
    where
        F: Future<Output = HandlerResult> + Send + 'static,
    {
        Self::Pending(Box::pin(future))
    }

    /// Await the outcome regardless of variant.
    pub async fn settle(self) -> HandlerResult {
        match self {
            Self::Ready(result) => result,
            Self::Pending(future) => future.await,
        }
    }
}

impl From<Value> for Reply {
    fn from(value: Value) -> Self {
        Self::value(value)
    }
}

impl From<()> for Reply {
    fn from((): ()) -> Self {
        Self::none()
    }
}

impl From<HandlerResult> for Reply {
    fn from(result: HandlerResult) -> Self {
        Self::Ready(result)
    }
}

impl fmt::Debug for Reply {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ready(result) => f.debug_tuple("Ready").field(result).finish(),
            Self::Pending(_) => f.write_str("Pending(..)"),
        }
    }
}

/// Context of the request being handled.
#[derive(Debug, Clone, PartialEq)]
pub struct MessageInfo {
    /// Sender address.
    pub address: Address,
    /// Route it arrived on; `None` for local dispatch.
    pub route: Option<Route>,
    /// The name the listener matched.
    pub name: String,
    pub ack_name: Option<String>,
    pub is_main_address: bool,
}

/// Request handler.
pub trait Handler: Send + Sync + 'static {
    fn handle(&self, payload: Value, info: &MessageInfo) -> Reply;
}

impl<F, R> Handler for F
where
    F: Fn(Value, &MessageInfo) -> R + Send + Sync + 'static,
    R: Into<Reply>,
{
    fn handle(&self, payload: Value, info: &MessageInfo) -> Reply {
        self(payload, info).into()
    }
}

/// Handle returned by registration; used to remove one specific listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

struct ListenerRecord {
    id: ListenerId,
    address: Address,
    names: Names,
    handler: Arc<dyn Handler>,
    once: bool,
}

/// The listener chosen for a request.
pub struct Selected {
    pub id: ListenerId,
    pub handler: Arc<dyn Handler>,
    pub name: String,
}

impl Selected {
    /// Run the handler.
    ///
    /// A panic, either in the call itself or while a pending reply settles,
    /// becomes a carried error naming the listener so the dispatch loop
    /// survives and the caller is rejected.
    pub fn invoke(&self, payload: Value, info: &MessageInfo) -> Reply {
        let handler = &self.handler;
        match panic::catch_unwind(AssertUnwindSafe(|| handler.handle(payload, info))) {
            Ok(Reply::Ready(result)) => Reply::Ready(result),
            Ok(Reply::Pending(future)) => {
                let name = self.name.clone();
                Reply::Pending(Box::pin(AssertUnwindSafe(future).catch_unwind().map(
                    move |settled| settled.unwrap_or_else(|cause| Err(panic_error(&name, &*cause))),
                )))
            }
            Err(cause) => Reply::Ready(Err(panic_error(&self.name, &*cause))),
        }
    }
}

fn panic_error(name: &str, cause: &(dyn Any + Send)) -> Value {
    let message = cause
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| cause.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string());
    tracing::warn!("listener {} panicked: {}", name, message);
    Value::String(format!("listener {} panicked: {}", name, message))
}

#[derive(Default)]
pub struct ListenerRegistry {
    records: Vec<ListenerRecord>,
    next_id: u64,
}

impl ListenerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a listener; later registrations have lower priority.
    pub fn on(
        &mut self,
        address: Address,
        names: Names,
        handler: Arc<dyn Handler>,
        once: bool,
    ) -> ListenerId {
        self.next_id += 1;
        let id = ListenerId(self.next_id);
        self.records.push(ListenerRecord {
            id,
            address,
            names,
            handler,
            once,
        });
        id
    }

    /// Remove listeners registered for exactly `address` and `names`,
    /// optionally only the one with `id`. Returns how many were removed.
    pub fn off(&mut self, address: &Address, names: &Names, id: Option<ListenerId>) -> usize {
        let key = names.to_string();
        let before = self.records.len();
        self.records.retain(|r| {
            let hit = &r.address == address
                && r.names.to_string() == key
                && id.map_or(true, |id| r.id == id);
            !hit
        });
        before - self.records.len()
    }

    /// Remove one listener by id.
    pub fn remove(&mut self, id: ListenerId) -> bool {
        let before = self.records.len();
        self.records.retain(|r| r.id != id);
        before != self.records.len()
    }

    /// Pick the single responder for a request from `sender` named `name`.
    ///
    /// A `once` listener is removed as it is selected.
    pub fn select(&mut self, sender: &Address, name: &Names) -> Option<Selected> {
        let index = self
            .records
            .iter()
            .position(|r| r.address.accepts(sender) && name.intersects(&r.names))?;

        let record = &self.records[index];
        let matched = name
            .iter()
            .find(|n| record.names.contains(n))
            .unwrap_or_default()
            .to_string();
        let selected = Selected {
            id: record.id,
            handler: Arc::clone(&record.handler),
            name: matched,
        };
        if record.once {
            self.records.remove(index);
        }
        Some(selected)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}
