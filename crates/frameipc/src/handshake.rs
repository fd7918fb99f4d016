// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Parent discovery for nested guests.
//!
//! A nested context cannot see who its parent is on the envelope channel,
//! so before registering with the host it asks its parent window over the
//! string-framed protocol:
//!
//! ```text
//! child  -> parent   child.register(childAddress, childRoute, url)
//! parent -> child    [frameName, parentAddress, parentRoute]
//! parent -> host     childFrame.register { address, parentAddress, routingId, .. }
//! child  -> host     frame.register { address, parentAddress, .. }
//! ```
//!
//! A handshake that fails or times out is not fatal; the child registers
//! without parent information.

use crate::address::{Address, Route};
use crate::envelope::Names;
use crate::error::{CallError, CallResult};
use crate::frames::{FrameInfo, CHILD_FRAME_REGISTER, CHILD_FRAME_UNREGISTER, FRAME_REGISTER};
use crate::guest::GuestEndpoint;
use crate::postmessage::{FrameCallError, FrameMessenger, WindowId};
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;

pub const CHILD_REGISTER: &str = "child.register";
pub const CHILD_UNREGISTER: &str = "child.unregister";

#[derive(Debug, Error)]
pub enum HandshakeError {
    #[error(transparent)]
    Call(#[from] FrameCallError),

    #[error("Malformed handshake reply: {0}")]
    Malformed(String),
}

/// What the parent told us about ourselves.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParentInfo {
    pub frame_name: String,
    pub parent_address: Address,
    pub parent_route: Route,
}

/// Ask the parent window who we are.
pub async fn announce_to_parent(
    messenger: &FrameMessenger,
    parent: WindowId,
    guest: &GuestEndpoint,
    url: &str,
) -> Result<ParentInfo, HandshakeError> {
    let args = [
        guest.address().to_string(),
        guest.route().to_string(),
        url.to_string(),
    ];
    let reply = messenger.send(parent, CHILD_REGISTER, &args).await?;
    let [frame_name, parent_address, parent_route] = reply.as_slice() else {
        return Err(HandshakeError::Malformed(format!("{:?}", reply)));
    };
    let parent_route = parent_route
        .parse::<Route>()
        .map_err(|_| HandshakeError::Malformed(format!("bad route {:?}", parent_route)))?;
    Ok(ParentInfo {
        frame_name: frame_name.clone(),
        parent_address: Address::from(parent_address.as_str()),
        parent_route,
    })
}

/// Tell the parent window we are going away.
pub fn leave_parent(messenger: &FrameMessenger, parent: WindowId) -> bool {
    messenger.notify(parent, CHILD_UNREGISTER, &[])
}

/// Register `guest` with the host, discovering its parent first when it is
/// nested.
pub async fn register_frame(
    guest: &GuestEndpoint,
    parent: Option<(&FrameMessenger, WindowId)>,
    url: &str,
) -> CallResult<Value> {
    let parent_info = match parent {
        Some((messenger, window)) if !guest.is_main() => {
            match announce_to_parent(messenger, window, guest, url).await {
                Ok(info) => Some(info),
                Err(err) => {
                    tracing::warn!("handshake: {} registering without parent: {}", guest.address(), err);
                    None
                }
            }
        }
        _ => None,
    };

    let info = FrameInfo {
        address: guest.address().clone(),
        name: parent_info
            .as_ref()
            .map(|p| p.frame_name.clone())
            .unwrap_or_default(),
        url: url.to_string(),
        parent_address: parent_info.as_ref().map(|p| p.parent_address.clone()),
        routing_id: match guest.route() {
            Route::Frame(id) => Some(id),
            Route::Primary => None,
        },
        is_main_frame: guest.is_main(),
    };
    let payload = serde_json::to_value(&info).map_err(|err| {
        tracing::warn!("handshake: cannot encode {}: {}", FRAME_REGISTER, err);
        CallError::from(err)
    })?;
    guest.send(FRAME_REGISTER, payload).await
}

/// Children registered through a parent window, by window.
#[derive(Debug, Clone, Default)]
pub struct ChildRegistrations {
    children: Arc<Mutex<HashMap<WindowId, FrameInfo>>>,
}

impl ChildRegistrations {
    pub fn get(&self, window: WindowId) -> Option<FrameInfo> {
        self.children.lock().get(&window).cloned()
    }

    pub fn len(&self) -> usize {
        self.children.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.children.lock().is_empty()
    }
}

/// Answer `child.register` / `child.unregister` from nested windows on
/// behalf of `guest`, and relay each child to the host.
///
/// `lookup` names the embedding element of the posting window (given its
/// claimed url); children it cannot place are answered but not relayed.
pub fn serve_child_registrations<F>(
    messenger: &FrameMessenger,
    guest: &GuestEndpoint,
    lookup: F,
) -> ChildRegistrations
where
    F: Fn(WindowId, &str) -> Option<String> + Send + Sync + 'static,
{
    let registrations = ChildRegistrations::default();

    let children = registrations.clone();
    let parent = guest.clone();
    messenger.on(CHILD_REGISTER, move |source: WindowId, args: Vec<String>| {
        let child_address = args.first().cloned().unwrap_or_default();
        let child_route = args.get(1).and_then(|r| r.parse::<Route>().ok());
        let child_url = args.get(2).cloned().unwrap_or_default();

        let name = lookup(source, &child_url);
        if let (Some(name), false) = (&name, child_address.is_empty()) {
            let info = FrameInfo {
                address: Address::from(child_address.as_str()),
                name: name.clone(),
                url: child_url,
                parent_address: Some(parent.address().clone()),
                routing_id: match child_route {
                    Some(Route::Frame(id)) => Some(id),
                    _ => None,
                },
                is_main_frame: false,
            };
            relay(&parent, CHILD_FRAME_REGISTER, &info);
            children.children.lock().insert(source, info);
        }

        vec![
            name.unwrap_or_default(),
            parent.address().to_string(),
            parent.route().to_string(),
        ]
    });

    let children = registrations.clone();
    let parent = guest.clone();
    messenger.on(CHILD_UNREGISTER, move |source: WindowId, _args: Vec<String>| {
        let removed = children.children.lock().remove(&source);
        if let Some(info) = removed {
            relay(&parent, CHILD_FRAME_UNREGISTER, &info);
        }
    });

    registrations
}

fn relay(guest: &GuestEndpoint, name: &str, info: &FrameInfo) {
    match serde_json::to_value(info) {
        Ok(payload) => guest.notify(Names::from(name), payload),
        Err(err) => tracing::warn!("handshake: cannot encode {}: {}", name, err),
    }
}
