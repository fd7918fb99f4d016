// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Pending-call table: in-flight requests keyed by ack token.
//!
//! Each attempt of a call gets a freshly minted token, so an ack belonging
//! to a timed-out attempt can never resolve a later one. Once an entry is
//! gone (answered, timed out, rejected) any further ack for its token is
//! ignored.

use crate::address::Address;
use crate::error::{CallError, CallResult};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::oneshot;
use tokio::time::Instant;

/// Process-wide counter so tokens never repeat across transports.
static NEXT_TOKEN: AtomicU64 = AtomicU64::new(1);

/// Mints ack tokens of the form `<prefix><name>_<n>`.
#[derive(Debug, Clone)]
pub struct AckMinter {
    prefix: String,
}

impl AckMinter {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    pub fn mint(&self, name: &str) -> String {
        let n = NEXT_TOKEN.fetch_add(1, Ordering::Relaxed);
        format!("{}{}_{}", self.prefix, name, n)
    }
}

/// One transmitted attempt waiting for its ack.
#[derive(Debug)]
pub struct Attempt {
    pub token: String,
    pub reply: oneshot::Receiver<CallResult<Value>>,
}

#[derive(Debug)]
struct PendingCall {
    /// Who may answer; `Wildcard` accepts an ack from anyone.
    address: Address,
    name: String,
    retries_left: u32,
    sent_at: Instant,
    reply: oneshot::Sender<CallResult<Value>>,
}

/// Snapshot of an in-flight call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingInfo {
    pub token: String,
    pub address: Address,
    pub name: String,
    pub retries_left: u32,
}

#[derive(Debug, Default)]
pub struct PendingCallTable {
    calls: HashMap<String, PendingCall>,
}

impl PendingCallTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an attempt under `token`.
    pub fn insert(&mut self, token: String, address: Address, name: &str, retries_left: u32) -> Attempt {
        let (tx, rx) = oneshot::channel();
        self.calls.insert(
            token.clone(),
            PendingCall {
                address,
                name: name.to_string(),
                retries_left,
                sent_at: Instant::now(),
                reply: tx,
            },
        );
        Attempt { token, reply: rx }
    }

    /// Settle the call waiting on `token` with an ack from `sender`.
    ///
    /// Returns false for unknown tokens (late or duplicate acks) and for acks
    /// from an address the call was not sent to.
    pub fn resolve(&mut self, sender: &Address, token: &str, outcome: Result<Value, Value>) -> bool {
        match self.calls.get(token) {
            Some(call) if call.address.accepts(sender) => {}
            Some(call) => {
                tracing::debug!(
                    "ack {} from {} ignored; call was sent to {}",
                    token,
                    sender,
                    call.address
                );
                return false;
            }
            None => return false,
        }
        let Some(call) = self.calls.remove(token) else {
            return false;
        };
        tracing::trace!(
            "ack {} for {} after {:?}",
            token,
            call.name,
            call.sent_at.elapsed()
        );
        // The caller may have stopped waiting; that's fine.
        let _ = call.reply.send(outcome.map_err(CallError::Remote));
        true
    }

    /// Drop the entry for a timed-out attempt.
    pub fn cancel(&mut self, token: &str) -> bool {
        self.calls.remove(token).is_some()
    }

    /// Fail every in-flight call with `error`. Returns how many were failed.
    pub fn reject_all(&mut self, error: &CallError) -> usize {
        let count = self.calls.len();
        for (_, call) in self.calls.drain() {
            let _ = call.reply.send(Err(error.clone()));
        }
        count
    }

    pub fn contains(&self, token: &str) -> bool {
        self.calls.contains_key(token)
    }

    pub fn snapshot(&self) -> Vec<PendingInfo> {
        self.calls
            .iter()
            .map(|(token, call)| PendingInfo {
                token: token.clone(),
                address: call.address.clone(),
                name: call.name.clone(),
                retries_left: call.retries_left,
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.calls.len()
    }

    pub fn is_empty(&self) -> bool {
        self.calls.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn minted_tokens_are_distinct() {
        let minter = AckMinter::new("ack_r2p_");
        let a = minter.mint("ping");
        let b = minter.mint("ping");
        assert_ne!(a, b);
        assert!(a.starts_with("ack_r2p_ping_"));
    }

    #[tokio::test]
    async fn resolve_delivers_payload_once() {
        let mut table = PendingCallTable::new();
        let attempt = table.insert("t1".into(), Address::named("a"), "echo", 0);

        assert!(table.resolve(&Address::named("a"), "t1", Ok(json!({"v": 7}))));
        assert!(table.is_empty());
        assert_eq!(attempt.reply.await.unwrap(), Ok(json!({"v": 7})));

        // Duplicate ack is inert.
        assert!(!table.resolve(&Address::named("a"), "t1", Ok(json!(0))));
    }

    #[tokio::test]
    async fn carried_error_becomes_remote() {
        let mut table = PendingCallTable::new();
        let attempt = table.insert("t1".into(), Address::Main, "click", 0);
        table.resolve(&Address::Main, "t1", Err(json!("no element")));
        assert_eq!(
            attempt.reply.await.unwrap(),
            Err(CallError::Remote(json!("no element")))
        );
    }

    #[test]
    fn ack_from_wrong_address_is_ignored() {
        let mut table = PendingCallTable::new();
        let _attempt = table.insert("t1".into(), Address::named("a"), "echo", 0);
        assert!(!table.resolve(&Address::named("b"), "t1", Ok(json!(1))));
        assert!(table.contains("t1"));

        let _any = table.insert("t2".into(), Address::Wildcard, "announce", 0);
        assert!(table.resolve(&Address::named("b"), "t2", Ok(json!(1))));
    }

    #[tokio::test]
    async fn reject_all_fails_everything() {
        let mut table = PendingCallTable::new();
        let a = table.insert("t1".into(), Address::Main, "x", 1);
        let b = table.insert("t2".into(), Address::Main, "y", 0);
        assert_eq!(table.snapshot().len(), 2);

        assert_eq!(table.reject_all(&CallError::Destroyed), 2);
        assert_eq!(a.reply.await.unwrap(), Err(CallError::Destroyed));
        assert_eq!(b.reply.await.unwrap(), Err(CallError::Destroyed));
        assert!(table.is_empty());
    }

    #[test]
    fn cancel_makes_late_ack_inert() {
        let mut table = PendingCallTable::new();
        let _attempt = table.insert("t1".into(), Address::Main, "x", 0);
        assert!(table.cancel("t1"));
        assert!(!table.resolve(&Address::Main, "t1", Ok(json!(1))));
    }
}
