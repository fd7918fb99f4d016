// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Frame registry.
//!
//! Guests announce themselves with `frame.register` once their document is
//! up and say goodbye with `frame.unregister`. Parents report their nested
//! children with `childFrame.register` / `childFrame.unregister`. Records
//! live in an arena keyed by address; parent links are addresses, never
//! references, so ancestry is walked by lookup.

use crate::address::{Address, Route};
use crate::ipc::{Ipc, WeakIpc};
use crate::registry::{MessageInfo, Reply};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::broadcast;

pub const FRAME_REGISTER: &str = "frame.register";
pub const FRAME_UNREGISTER: &str = "frame.unregister";
pub const CHILD_FRAME_REGISTER: &str = "childFrame.register";
pub const CHILD_FRAME_UNREGISTER: &str = "childFrame.unregister";

/// What a guest reports about itself.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FrameInfo {
    pub address: Address,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_address: Option<Address>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub routing_id: Option<i64>,
    #[serde(default)]
    pub is_main_frame: bool,
}

impl FrameInfo {
    /// Route advertised by the frame itself.
    pub fn route(&self) -> Option<Route> {
        if self.is_main_frame {
            Some(Route::Primary)
        } else {
            self.routing_id.map(Route::Frame)
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameRecord {
    pub address: Address,
    pub route: Option<Route>,
    pub parent: Option<Address>,
    pub name: String,
    pub url: String,
    pub is_main: bool,
}

impl FrameRecord {
    fn from_info(info: FrameInfo, route: Option<Route>) -> Self {
        Self {
            route: route.or_else(|| info.route()),
            address: info.address,
            parent: info.parent_address,
            name: info.name,
            url: info.url,
            is_main: info.is_main_frame,
        }
    }

    /// Fold a newer report into this record, keeping known fields the
    /// report leaves out.
    fn merge(&mut self, newer: FrameRecord) {
        self.route = newer.route.or(self.route);
        self.parent = newer.parent.or_else(|| self.parent.take());
        if !newer.name.is_empty() {
            self.name = newer.name;
        }
        if !newer.url.is_empty() {
            self.url = newer.url;
        }
        self.is_main = newer.is_main;
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FrameEvent {
    /// A nested frame was seen for the first time.
    Attached(FrameRecord),
    /// A new document took over a slot already held by another address.
    Navigated(FrameRecord),
    /// The primary context (re)connected.
    Connected(FrameRecord),
    Detached(FrameRecord),
}

#[derive(Debug, Default)]
pub struct FrameRegistry {
    records: HashMap<Address, FrameRecord>,
    order: Vec<Address>,
}

impl FrameRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a `frame.register` report. `route` is where it came from, if
    /// known; otherwise the route advertised in `info` is used.
    pub fn register(&mut self, info: FrameInfo, route: Option<Route>) -> FrameEvent {
        let record = FrameRecord::from_info(info, route);
        if record.is_main {
            let stored = self.upsert(record);
            return FrameEvent::Connected(stored);
        }

        let navigated = record.route.is_some()
            && self
                .records
                .values()
                .any(|r| r.route == record.route && r.address != record.address && !r.is_main);
        let stored = self.upsert(record);
        if navigated {
            FrameEvent::Navigated(stored)
        } else {
            FrameEvent::Attached(stored)
        }
    }

    /// Record a child reported by its parent.
    pub fn adopt(&mut self, info: FrameInfo) -> FrameRecord {
        self.upsert(FrameRecord::from_info(info, None))
    }

    fn upsert(&mut self, record: FrameRecord) -> FrameRecord {
        match self.records.get_mut(&record.address) {
            Some(existing) => {
                existing.merge(record);
                existing.clone()
            }
            None => {
                self.order.push(record.address.clone());
                self.records.insert(record.address.clone(), record.clone());
                record
            }
        }
    }

    pub fn unregister(&mut self, address: &Address) -> Option<FrameRecord> {
        let record = self.records.remove(address)?;
        self.order.retain(|a| a != address);
        Some(record)
    }

    pub fn get(&self, address: &Address) -> Option<&FrameRecord> {
        self.records.get(address)
    }

    pub fn parent(&self, address: &Address) -> Option<&FrameRecord> {
        let parent = self.records.get(address)?.parent.as_ref()?;
        self.records.get(parent)
    }

    /// Known ancestors, nearest first. Stops at the first unknown parent.
    pub fn ancestors(&self, address: &Address) -> Vec<Address> {
        let mut chain = Vec::new();
        let mut current = address;
        while let Some(parent) = self.records.get(current).and_then(|r| r.parent.as_ref()) {
            if parent == address || chain.contains(parent) || !self.records.contains_key(parent) {
                break;
            }
            chain.push(parent.clone());
            current = parent;
        }
        chain
    }

    pub fn children(&self, address: &Address) -> Vec<&FrameRecord> {
        self.order
            .iter()
            .filter_map(|a| self.records.get(a))
            .filter(|r| r.parent.as_ref() == Some(address))
            .collect()
    }

    /// All records in registration order.
    pub fn frames(&self) -> Vec<&FrameRecord> {
        self.order.iter().filter_map(|a| self.records.get(a)).collect()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// Keeps a [`FrameRegistry`] in sync with guest announcements on one engine.
#[derive(Clone)]
pub struct FrameTracker {
    registry: Arc<Mutex<FrameRegistry>>,
    events: broadcast::Sender<FrameEvent>,
    ipc: WeakIpc,
}

impl FrameTracker {
    /// Register the frame listeners on `ipc`. Registration requests are
    /// answered with `{"hostId": host_id}`.
    pub fn install(ipc: &Ipc, host_id: impl Into<String>) -> Self {
        let (events, _) = broadcast::channel(64);
        let tracker = Self {
            registry: Arc::new(Mutex::new(FrameRegistry::new())),
            events,
            ipc: ipc.downgrade(),
        };
        let host_id: String = host_id.into();

        let t = tracker.clone();
        ipc.on_unique(Address::Wildcard, FRAME_REGISTER, move |payload: Value, info: &MessageInfo| {
            let frame: FrameInfo = match serde_json::from_value(payload) {
                Ok(frame) => frame,
                Err(err) => return Reply::error(format!("Error: bad frame info: {}", err)),
            };
            t.on_register(frame, info.route);
            Reply::value(json!({ "hostId": host_id }))
        });

        let t = tracker.clone();
        ipc.on_unique(Address::Wildcard, FRAME_UNREGISTER, move |_payload: Value, info: &MessageInfo| {
            t.on_unregister(&info.address);
        });

        let t = tracker.clone();
        ipc.on_unique(Address::Wildcard, CHILD_FRAME_REGISTER, move |payload: Value, _info: &MessageInfo| {
            match serde_json::from_value::<FrameInfo>(payload) {
                Ok(child) => t.on_child(child),
                Err(err) => tracing::warn!("frames: bad child frame info: {}", err),
            }
        });

        let t = tracker.clone();
        ipc.on_unique(Address::Wildcard, CHILD_FRAME_UNREGISTER, move |payload: Value, _info: &MessageInfo| {
            if let Some(address) = payload.get("address").and_then(Value::as_str) {
                t.on_unregister(&Address::from(address));
            }
        });

        tracker
    }

    fn on_register(&self, frame: FrameInfo, route: Option<Route>) {
        let event = self.registry.lock().register(frame, route);
        tracing::debug!("frames: {:?}", event);
        let _ = self.events.send(event);
    }

    fn on_child(&self, child: FrameInfo) {
        if let (Some(ipc), Some(route)) = (self.ipc.upgrade(), child.route()) {
            ipc.learn(&child.address, route);
        }
        let record = self.registry.lock().adopt(child);
        tracing::debug!("frames: child {} of {:?}", record.address, record.parent);
    }

    fn on_unregister(&self, address: &Address) {
        let removed = self.registry.lock().unregister(address);
        if let Some(ipc) = self.ipc.upgrade() {
            ipc.forget(address);
        }
        if let Some(record) = removed {
            let _ = self.events.send(FrameEvent::Detached(record));
        }
    }

    /// Re-run a registration that was emitted before this tracker existed.
    pub fn replay(&self, frame: &FrameInfo) -> Result<bool, serde_json::Error> {
        let Some(ipc) = self.ipc.upgrade() else {
            return Ok(false);
        };
        let payload = serde_json::to_value(frame)?;
        Ok(ipc.dispatch(frame.address.clone(), FRAME_REGISTER, payload).is_some())
    }

    pub fn subscribe(&self) -> broadcast::Receiver<FrameEvent> {
        self.events.subscribe()
    }

    pub fn get(&self, address: &Address) -> Option<FrameRecord> {
        self.registry.lock().get(address).cloned()
    }

    pub fn parent(&self, address: &Address) -> Option<FrameRecord> {
        self.registry.lock().parent(address).cloned()
    }

    pub fn children(&self, address: &Address) -> Vec<FrameRecord> {
        self.registry
            .lock()
            .children(address)
            .into_iter()
            .cloned()
            .collect()
    }

    pub fn frames(&self) -> Vec<FrameRecord> {
        self.registry.lock().frames().into_iter().cloned().collect()
    }
}
