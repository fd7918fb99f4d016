// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! String-framed window messaging.
//!
//! Same request/reply/ack pattern as the envelope protocol, squeezed into a
//! single string so it survives any window-to-window channel:
//!
//! ```text
//! frameipc.<name>/<ack>/<arg1>/<arg2>/...
//! ```
//!
//! Every segment is percent-encoded (`encodeURIComponent` rules) before the
//! join, so `/` never appears inside a segment. An ack is a message named
//! after the request's ack token with an empty ack segment. Calls use a
//! fixed 5000 ms timeout and are never retried.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

pub const MESSAGE_PREFIX: &str = "frameipc.";

/// Reply budget of a window call.
pub const FRAME_CALL_TIMEOUT: Duration = Duration::from_millis(5000);

const HEX_UPPER: &[u8; 16] = b"0123456789ABCDEF";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FrameCodecError {
    #[error("malformed escape in {0:?}")]
    BadEscape(String),

    #[error("segment is not UTF-8 after decoding")]
    Utf8,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FrameCallError {
    #[error("postMessage.timeout: {0}")]
    Timeout(String),

    #[error("window {0} is closed")]
    Closed(WindowId),
}

/// `encodeURIComponent`.
pub fn percent_encode(s: &str) -> String {
    let mut out = String::with_capacity(s.len() * 2);
    for b in s.bytes() {
        match b {
            b'A'..=b'Z'
            | b'a'..=b'z'
            | b'0'..=b'9'
            | b'-'
            | b'_'
            | b'.'
            | b'!'
            | b'~'
            | b'*'
            | b'\''
            | b'('
            | b')' => out.push(b as char),
            _ => {
                out.push('%');
                out.push(HEX_UPPER[(b >> 4) as usize] as char);
                out.push(HEX_UPPER[(b & 0x0f) as usize] as char);
            }
        }
    }
    out
}

/// `decodeURIComponent`; rejects truncated escapes and invalid UTF-8.
pub fn percent_decode(s: &str) -> Result<String, FrameCodecError> {
    let mut bytes = Vec::with_capacity(s.len());
    let mut iter = s.bytes();
    while let Some(b) = iter.next() {
        if b != b'%' {
            bytes.push(b);
            continue;
        }
        let hi = iter.next().and_then(hex_val);
        let lo = iter.next().and_then(hex_val);
        match (hi, lo) {
            (Some(h), Some(l)) => bytes.push(h << 4 | l),
            _ => return Err(FrameCodecError::BadEscape(s.to_string())),
        }
    }
    String::from_utf8(bytes).map_err(|_| FrameCodecError::Utf8)
}

fn hex_val(b: u8) -> Option<u8> {
    match b {
        b'0'..=b'9' => Some(b - b'0'),
        b'a'..=b'f' => Some(b - b'a' + 10),
        b'A'..=b'F' => Some(b - b'A' + 10),
        _ => None,
    }
}

/// A decoded window message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameMessage {
    pub name: String,
    /// `None` when no reply is wanted (and on acks).
    pub ack: Option<String>,
    pub args: Vec<String>,
}

pub fn encode(name: &str, ack: Option<&str>, args: &[String]) -> String {
    let mut segments = Vec::with_capacity(args.len() + 2);
    segments.push(percent_encode(&format!("{}{}", MESSAGE_PREFIX, name)));
    segments.push(percent_encode(ack.unwrap_or_default()));
    segments.extend(args.iter().map(|a| percent_encode(a)));
    segments.join("/")
}

/// Decode `data`. Strings without the protocol prefix are someone else's
/// traffic and yield `Ok(None)`.
pub fn decode(data: &str) -> Result<Option<FrameMessage>, FrameCodecError> {
    let mut segments = data.split('/');
    let head = percent_decode(segments.next().unwrap_or_default())?;
    let Some(name) = head.strip_prefix(MESSAGE_PREFIX) else {
        return Ok(None);
    };
    let ack = match segments.next() {
        Some(raw) => percent_decode(raw)?,
        None => String::new(),
    };
    let args = segments.map(percent_decode).collect::<Result<Vec<_>, _>>()?;
    Ok(Some(FrameMessage {
        name: name.to_string(),
        ack: (!ack.is_empty()).then_some(ack),
        args,
    }))
}

/// Identity of a window (a browsing context) on a [`WindowChannel`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WindowId(pub u64);

impl fmt::Display for WindowId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "window#{}", self.0)
    }
}

/// Posts strings between windows. The receiver learns the sender's id.
pub trait WindowChannel: Send + Sync + 'static {
    /// Returns false if `to` no longer exists.
    fn post(&self, from: WindowId, to: WindowId, data: String) -> bool;
}

/// Window inboxes backed by tokio channels.
#[derive(Debug, Default)]
pub struct MemoryWindows {
    inboxes: Mutex<HashMap<WindowId, mpsc::UnboundedSender<(WindowId, String)>>>,
}

impl MemoryWindows {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Create the inbox of `window`.
    pub fn open(&self, window: WindowId) -> mpsc::UnboundedReceiver<(WindowId, String)> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.inboxes.lock().insert(window, tx);
        rx
    }

    pub fn close(&self, window: WindowId) {
        self.inboxes.lock().remove(&window);
    }
}

impl WindowChannel for MemoryWindows {
    fn post(&self, from: WindowId, to: WindowId, data: String) -> bool {
        match self.inboxes.lock().get(&to) {
            Some(inbox) => inbox.send((from, data)).is_ok(),
            None => false,
        }
    }
}

/// Listener outcome.
pub enum FrameReply {
    Ready(Vec<String>),
    Pending(Pin<Box<dyn Future<Output = Vec<String>> + Send + 'static>>),
}

impl FrameReply {
    pub fn pending<F>(future: F) -> Self
    where
        F: Future<Output = Vec<String>> + Send + 'static,
    {
        Self::Pending(Box::pin(future))
    }
}

impl From<Vec<String>> for FrameReply {
    fn from(values: Vec<String>) -> Self {
        Self::Ready(values)
    }
}

impl From<()> for FrameReply {
    fn from((): ()) -> Self {
        Self::Ready(Vec::new())
    }
}

pub trait FrameHandler: Send + Sync + 'static {
    fn handle(&self, source: WindowId, args: Vec<String>) -> FrameReply;
}

impl<F, R> FrameHandler for F
where
    F: Fn(WindowId, Vec<String>) -> R + Send + Sync + 'static,
    R: Into<FrameReply>,
{
    fn handle(&self, source: WindowId, args: Vec<String>) -> FrameReply {
        self(source, args).into()
    }
}

struct FrameListener {
    id: u64,
    name: String,
    handler: Arc<dyn FrameHandler>,
    once: bool,
}

struct MessengerInner {
    window: WindowId,
    channel: Arc<dyn WindowChannel>,
    listeners: Mutex<Vec<FrameListener>>,
    pending: Mutex<HashMap<String, oneshot::Sender<Vec<String>>>>,
    next_id: AtomicU64,
}

/// One window's end of the string-framed protocol.
#[derive(Clone)]
pub struct FrameMessenger {
    inner: Arc<MessengerInner>,
}

impl FrameMessenger {
    pub fn new<C: WindowChannel>(window: WindowId, channel: Arc<C>) -> Self {
        Self {
            inner: Arc::new(MessengerInner {
                window,
                channel,
                listeners: Mutex::new(Vec::new()),
                pending: Mutex::new(HashMap::new()),
                next_id: AtomicU64::new(1),
            }),
        }
    }

    pub fn window(&self) -> WindowId {
        self.inner.window
    }

    /// Feed `(source, data)` pairs until the inbox closes.
    pub fn spawn(&self, mut inbox: mpsc::UnboundedReceiver<(WindowId, String)>) -> JoinHandle<()> {
        let messenger = self.clone();
        tokio::spawn(async move {
            while let Some((source, data)) = inbox.recv().await {
                messenger.receive(source, &data);
            }
            messenger.inner.pending.lock().clear();
        })
    }

    fn next_id(&self) -> u64 {
        self.inner.next_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Call `name` on `target` and wait for its reply values.
    pub async fn send(&self, target: WindowId, name: &str, args: &[String]) -> Result<Vec<String>, FrameCallError> {
        self.send_with(target, name, args, FRAME_CALL_TIMEOUT).await
    }

    pub async fn send_with(
        &self,
        target: WindowId,
        name: &str,
        args: &[String],
        timeout: Duration,
    ) -> Result<Vec<String>, FrameCallError> {
        let ack = format!("{}.ack.{}", name, self.next_id());
        let (tx, rx) = oneshot::channel();
        self.inner.pending.lock().insert(ack.clone(), tx);

        let data = encode(name, Some(&ack), args);
        if !self.inner.channel.post(self.inner.window, target, data) {
            self.inner.pending.lock().remove(&ack);
            return Err(FrameCallError::Closed(target));
        }

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(values)) => Ok(values),
            Ok(Err(_)) => Err(FrameCallError::Closed(self.inner.window)),
            Err(_) => {
                self.inner.pending.lock().remove(&ack);
                Err(FrameCallError::Timeout(name.to_string()))
            }
        }
    }

    /// Post `name` without waiting for a reply.
    pub fn notify(&self, target: WindowId, name: &str, args: &[String]) -> bool {
        self.inner
            .channel
            .post(self.inner.window, target, encode(name, None, args))
    }

    pub fn on<F, R>(&self, name: &str, handler: F) -> u64
    where
        F: Fn(WindowId, Vec<String>) -> R + Send + Sync + 'static,
        R: Into<FrameReply>,
    {
        self.register(name, Arc::new(handler), false)
    }

    pub fn once<F, R>(&self, name: &str, handler: F) -> u64
    where
        F: Fn(WindowId, Vec<String>) -> R + Send + Sync + 'static,
        R: Into<FrameReply>,
    {
        self.register(name, Arc::new(handler), true)
    }

    pub fn off(&self, id: u64) -> bool {
        let mut listeners = self.inner.listeners.lock();
        let before = listeners.len();
        listeners.retain(|l| l.id != id);
        before != listeners.len()
    }

    fn register(&self, name: &str, handler: Arc<dyn FrameHandler>, once: bool) -> u64 {
        let id = self.next_id();
        self.inner.listeners.lock().push(FrameListener {
            id,
            name: name.to_string(),
            handler,
            once,
        });
        id
    }

    /// Handle one string posted by `source`.
    pub fn receive(&self, source: WindowId, data: &str) {
        let message = match decode(data) {
            Ok(Some(message)) => message,
            Ok(None) => return,
            Err(err) => {
                tracing::debug!("postmessage: undecodable message from {}: {}", source, err);
                return;
            }
        };

        if let Some(waiter) = self.inner.pending.lock().remove(&message.name) {
            let _ = waiter.send(message.args);
            return;
        }

        let handler = {
            let mut listeners = self.inner.listeners.lock();
            let Some(index) = listeners.iter().position(|l| l.name == message.name) else {
                tracing::trace!("postmessage: no listener for {}", message.name);
                return;
            };
            let handler = Arc::clone(&listeners[index].handler);
            if listeners[index].once {
                listeners.remove(index);
            }
            handler
        };

        let args = message.args;
        let reply = match panic::catch_unwind(AssertUnwindSafe(|| handler.handle(source, args))) {
            Ok(reply) => reply,
            Err(_) => {
                // The string protocol has no error slot; the caller times out.
                tracing::warn!("postmessage: listener {} panicked", message.name);
                return;
            }
        };
        let Some(ack) = message.ack else {
            if let FrameReply::Pending(future) = reply {
                tokio::spawn(future);
            }
            return;
        };

        match reply {
            FrameReply::Ready(values) => self.reply(source, &ack, &values),
            FrameReply::Pending(future) => {
                let messenger = self.clone();
                tokio::spawn(async move {
                    let values = future.await;
                    messenger.reply(source, &ack, &values);
                });
            }
        }
    }

    fn reply(&self, to: WindowId, ack: &str, values: &[String]) {
        if !self.inner.channel.post(self.inner.window, to, encode(ack, None, values)) {
            tracing::debug!("postmessage: {} closed before reply {}", to, ack);
        }
    }
}

impl fmt::Debug for FrameMessenger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FrameMessenger")
            .field("window", &self.inner.window)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strings(values: &[&str]) -> Vec<String> {
        values.iter().map(|v| v.to_string()).collect()
    }

    #[test]
    fn encoding_matches_uri_component_rules() {
        assert_eq!(percent_encode("a b/c"), "a%20b%2Fc");
        assert_eq!(percent_encode("it's (ok)!*~"), "it's (ok)!*~");
        assert_eq!(percent_encode("é"), "%C3%A9");
        assert_eq!(percent_decode("%C3%A9").unwrap(), "é");
        assert!(percent_decode("%E").is_err());
        assert!(percent_decode("%FF").is_err());
    }

    #[test]
    fn frame_layout() {
        let data = encode("child.register", Some("child.register.ack.1"), &strings(&["uuid_1", "https://x.test/a?b=c"]));
        assert_eq!(
            data,
            "frameipc.child.register/child.register.ack.1/uuid_1/https%3A%2F%2Fx.test%2Fa%3Fb%3Dc"
        );

        let msg = decode(&data).unwrap().unwrap();
        assert_eq!(msg.name, "child.register");
        assert_eq!(msg.ack.as_deref(), Some("child.register.ack.1"));
        assert_eq!(msg.args[1], "https://x.test/a?b=c");
    }

    #[test]
    fn empty_segments_survive() {
        let data = encode("tok", None, &strings(&["", "x"]));
        let msg = decode(&data).unwrap().unwrap();
        assert_eq!(msg.ack, None);
        assert_eq!(msg.args, strings(&["", "x"]));

        let bare = decode(&encode("tok", None, &[])).unwrap().unwrap();
        assert!(bare.args.is_empty());
    }

    #[test]
    fn foreign_traffic_is_ignored() {
        assert_eq!(decode("webpackHotUpdate/abc").unwrap(), None);
        assert_eq!(decode("").unwrap(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn call_and_reply_between_windows() {
        let windows = MemoryWindows::new();
        let parent = FrameMessenger::new(WindowId(1), Arc::clone(&windows));
        let child = FrameMessenger::new(WindowId(2), Arc::clone(&windows));
        parent.spawn(windows.open(WindowId(1)));
        child.spawn(windows.open(WindowId(2)));

        parent.on("whoami", |source: WindowId, args: Vec<String>| {
            vec![source.to_string(), args.join("+")]
        });

        let values = child
            .send(WindowId(1), "whoami", &strings(&["a", "b"]))
            .await
            .unwrap();
        assert_eq!(values, strings(&["window#2", "a+b"]));
    }

    #[tokio::test(start_paused = true)]
    async fn unanswered_call_times_out() {
        let windows = MemoryWindows::new();
        let child = FrameMessenger::new(WindowId(2), Arc::clone(&windows));
        let _parent_inbox = windows.open(WindowId(1));
        child.spawn(windows.open(WindowId(2)));

        let started = tokio::time::Instant::now();
        let err = child.send(WindowId(1), "child.register", &[]).await.unwrap_err();
        assert_eq!(err, FrameCallError::Timeout("child.register".into()));
        assert!(started.elapsed() >= FRAME_CALL_TIMEOUT);
    }

    #[tokio::test(start_paused = true)]
    async fn missing_window_fails_fast() {
        let windows = MemoryWindows::new();
        let child = FrameMessenger::new(WindowId(2), Arc::clone(&windows));
        let err = child.send(WindowId(9), "x", &[]).await.unwrap_err();
        assert_eq!(err, FrameCallError::Closed(WindowId(9)));
    }

    #[tokio::test(start_paused = true)]
    async fn once_listener_answers_once() {
        let windows = MemoryWindows::new();
        let parent = FrameMessenger::new(WindowId(1), Arc::clone(&windows));
        let mut child_inbox = windows.open(WindowId(2));
        parent.once("ping", |_s: WindowId, _a: Vec<String>| vec!["pong".to_string()]);

        parent.receive(WindowId(2), &encode("ping", Some("t1"), &[]));
        parent.receive(WindowId(2), &encode("ping", Some("t2"), &[]));

        let (from, data) = child_inbox.try_recv().unwrap();
        assert_eq!(from, WindowId(1));
        assert_eq!(decode(&data).unwrap().unwrap().name, "t1");
        assert!(child_inbox.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn panicking_listener_sends_no_reply() {
        let windows = MemoryWindows::new();
        let parent = FrameMessenger::new(WindowId(1), Arc::clone(&windows));
        let mut child_inbox = windows.open(WindowId(2));
        parent.on("boom", |_s: WindowId, _a: Vec<String>| -> Vec<String> { panic!("bad frame") });
        parent.on("ping", |_s: WindowId, _a: Vec<String>| vec!["pong".to_string()]);

        parent.receive(WindowId(2), &encode("boom", Some("t1"), &[]));
        parent.receive(WindowId(2), &encode("ping", Some("t2"), &[]));

        let (_, data) = child_inbox.try_recv().unwrap();
        assert_eq!(decode(&data).unwrap().unwrap().name, "t2");
        assert!(child_inbox.try_recv().is_err());
    }
}
