// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Error types for calls issued through the messaging layer.
//!
//! Every failure resolves as an error for the specific call that caused it;
//! nothing here is fatal to the transport or the process.

use crate::address::{Address, Route};
use serde_json::Value;
use thiserror::Error;

/// Result type for request/reply calls.
pub type CallResult<T> = Result<T, CallError>;

/// Longest payload rendering kept in a timeout error.
const PAYLOAD_PREVIEW_LEN: usize = 200;

/// Errors surfaced to the issuer of a call.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum CallError {
    /// No matching ack arrived within the budget (after all retries).
    #[error("ipc.timeout.send: {name}@{address}, payload: {payload}")]
    Timeout {
        name: String,
        address: Address,
        payload: String,
    },

    /// The transport was torn down permanently.
    #[error("ipc transport destroyed")]
    Destroyed,

    /// The address has no known route (only with `fail_fast_unroutable`).
    #[error("no route known for address {0}")]
    Unroutable(Address),

    /// The remote handler failed; carries the ack's `error` field.
    #[error("remote handler failed: {0}")]
    Remote(Value),

    /// The payload could not be turned into JSON; nothing was sent.
    #[error("cannot encode payload: {0}")]
    Encode(String),
}

impl From<serde_json::Error> for CallError {
    fn from(err: serde_json::Error) -> Self {
        Self::Encode(err.to_string())
    }
}

impl CallError {
    /// Build a timeout error naming the request.
    pub fn timeout(name: &str, address: &Address, payload: &Value) -> Self {
        Self::Timeout {
            name: name.to_string(),
            address: address.clone(),
            payload: payload_preview(payload),
        }
    }

    /// True for [`CallError::Timeout`], the only retryable kind.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }
}

/// Failures reported by a [`Transport`](crate::transport::Transport) write.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    /// The physical channel is gone.
    #[error("transport closed")]
    Closed,

    /// Nothing is attached behind the route.
    #[error("route {0} is not attached")]
    Detached(Route),

    #[error("transport error: {0}")]
    Other(String),
}

fn payload_preview(payload: &Value) -> String {
    let mut rendered = payload.to_string();
    if rendered.len() > PAYLOAD_PREVIEW_LEN {
        let mut cut = PAYLOAD_PREVIEW_LEN;
        while !rendered.is_char_boundary(cut) {
            cut -= 1;
        }
        rendered.truncate(cut);
        rendered.push_str("...");
    }
    rendered
}
