// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Per-address handles.
//!
//! A [`BoundIpc`] fixes the target address so callers can write
//! `frame.send("click", ..)`. Handles for the same transport share one
//! [`Ipc`]; the [`IpcPool`] hands out that shared engine keyed by the
//! identity of the transport object.

use crate::address::Address;
use crate::config::IpcConfig;
use crate::envelope::Names;
use crate::error::CallResult;
use crate::ipc::{Ipc, WeakIpc};
use crate::registry::{ListenerId, MessageInfo, Reply};
use crate::transport::Transport;
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

/// [`Ipc`] with a fixed address.
#[derive(Clone)]
pub struct BoundIpc {
    ipc: Ipc,
    address: Address,
}

impl BoundIpc {
    pub(crate) fn new(ipc: Ipc, address: Address) -> Self {
        Self { ipc, address }
    }

    pub fn address(&self) -> &Address {
        &self.address
    }

    /// Shared engine behind this handle.
    pub fn ipc(&self) -> &Ipc {
        &self.ipc
    }

    pub async fn send(&self, names: impl Into<Names>, payload: Value) -> CallResult<Value> {
        self.ipc.send(self.address.clone(), names, payload).await
    }

    pub async fn send_with(
        &self,
        names: impl Into<Names>,
        payload: Value,
        timeout: Duration,
        retry: u32,
    ) -> CallResult<Value> {
        self.ipc
            .send_with(self.address.clone(), names, payload, timeout, retry)
            .await
    }

    pub fn notify(&self, names: impl Into<Names>, payload: Value) {
        self.ipc.notify(self.address.clone(), names, payload);
    }

    pub fn send_on(&self, trigger: impl Into<Names>, names: impl Into<Names>, payload: Value) -> ListenerId {
        self.ipc.send_on(self.address.clone(), trigger, names, payload)
    }

    pub fn on<F, R>(&self, names: impl Into<Names>, handler: F) -> ListenerId
    where
        F: Fn(Value, &MessageInfo) -> R + Send + Sync + 'static,
        R: Into<Reply>,
    {
        self.ipc.on(self.address.clone(), names, handler)
    }

    pub fn on_unique<F, R>(&self, names: impl Into<Names>, handler: F) -> ListenerId
    where
        F: Fn(Value, &MessageInfo) -> R + Send + Sync + 'static,
        R: Into<Reply>,
    {
        self.ipc.on_unique(self.address.clone(), names, handler)
    }

    pub fn once<F, R>(&self, names: impl Into<Names>, handler: F) -> ListenerId
    where
        F: Fn(Value, &MessageInfo) -> R + Send + Sync + 'static,
        R: Into<Reply>,
    {
        self.ipc.once(self.address.clone(), names, handler)
    }

    pub fn off(&self, names: impl Into<Names>, id: Option<ListenerId>) -> usize {
        self.ipc.off(self.address.clone(), names, id)
    }

    pub fn dispatch(&self, name: &str, payload: Value) -> Option<Reply> {
        self.ipc.dispatch(self.address.clone(), name, payload)
    }
}

impl std::fmt::Debug for BoundIpc {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BoundIpc")
            .field("address", &self.address)
            .finish_non_exhaustive()
    }
}

/// Shared engines keyed by transport identity.
///
/// Entries hold weak references; an engine lives as long as some handle does.
pub struct IpcPool {
    config: IpcConfig,
    engines: Mutex<HashMap<usize, WeakIpc>>,
}

impl IpcPool {
    pub fn new(config: IpcConfig) -> Self {
        Self {
            config,
            engines: Mutex::new(HashMap::new()),
        }
    }

    /// The engine for `transport`, created on first use.
    pub fn ipc_for<T: Transport>(&self, transport: &Arc<T>) -> Ipc {
        let key = Arc::as_ptr(transport) as *const () as usize;
        let mut engines = self.engines.lock();
        engines.retain(|_, weak| weak.upgrade().is_some());
        if let Some(ipc) = engines.get(&key).and_then(WeakIpc::upgrade) {
            return ipc;
        }
        let transport: Arc<dyn Transport> = Arc::clone(transport) as Arc<dyn Transport>;
        let ipc = Ipc::from_dyn(transport, self.config.clone());
        engines.insert(key, ipc.downgrade());
        tracing::debug!("ipc pool: new engine, {} live", engines.len());
        ipc
    }

    /// Handle for `address` on `transport`.
    pub fn bind<T: Transport>(&self, transport: &Arc<T>, address: impl Into<Address>) -> BoundIpc {
        self.ipc_for(transport).bind(address)
    }

    /// Live engines.
    pub fn len(&self) -> usize {
        self.engines
            .lock()
            .values()
            .filter(|weak| weak.upgrade().is_some())
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for IpcPool {
    fn default() -> Self {
        Self::new(IpcConfig::default())
    }
}
