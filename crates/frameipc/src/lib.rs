// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Addressed request/reply messaging between a host and its guest frames
//!
//! A host drives one or more guest execution contexts (a primary context
//! and any number of nested frames) over a single asynchronous channel.
//! This crate provides the protocol that makes calls across that channel
//! reliable.
//!
//! # Features
//!
//! - **Addressing**: `Main`, `*` (broadcast) and per-frame ids, resolved to
//!   physical routes learned from inbound traffic
//! - **Request/Reply**: one-time ack tokens, per-attempt timeout and retry
//! - **Single-Responder Dispatch**: ordered listener table, exactly one ack per request
//! - **Navigation Hold**: outbound traffic buffered across guest reloads and
//!   replayed in order
//! - **Frame Tracking**: frame registry and parent discovery over a
//!   string-framed window protocol
//!
//! # Quick Start
//!
//! ```ignore
//! use frameipc::{Ipc, IpcConfig, MemoryTransport};
//! use serde_json::json;
//!
//! let transport = MemoryTransport::new();
//! let ipc = Ipc::new(transport, IpcConfig::default());
//! let frame = ipc.bind("uuid_3f2a");
//! let title = frame.send("page.title", json!(null)).await?;
//! ```
//!
//! # Configuration File
//!
//! ```toml
//! default_timeout_ms = 10000
//! default_retry = 1
//! fail_fast_unroutable = false
//! log_traffic = true
//! ```

pub mod address;
pub mod config;
pub mod directory;
pub mod envelope;
pub mod error;
pub mod facade;
pub mod frames;
pub mod guest;
pub mod handshake;
pub mod ipc;
pub mod pending;
pub mod postmessage;
pub mod registry;
pub mod suspension;
pub mod transport;

pub use address::{Address, Route};
pub use config::{ConfigError, IpcConfig};
pub use directory::AddressDirectory;
pub use envelope::{Envelope, EnvelopeError, Names};
pub use error::{CallError, CallResult, TransportError};
pub use facade::{BoundIpc, IpcPool};
pub use frames::{FrameEvent, FrameInfo, FrameRecord, FrameRegistry, FrameTracker};
pub use guest::GuestEndpoint;
pub use ipc::{Ipc, WeakIpc};
pub use pending::{PendingCallTable, PendingInfo};
pub use postmessage::{FrameMessenger, MemoryWindows, WindowChannel, WindowId};
pub use registry::{Handler, ListenerId, ListenerRegistry, MessageInfo, Reply};
pub use suspension::{Phase, Suspension};
pub use transport::{event_channel, MemoryTransport, Transport, TransportEvent};
