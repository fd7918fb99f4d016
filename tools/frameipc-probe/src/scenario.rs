// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Scripted host/guest scenarios.
//!
//! Each scenario builds a fresh host engine on a [`MemoryTransport`], wires
//! guest endpoints behind it, drives some traffic and records what was
//! observed.

use crate::report::Report;
use clap::ValueEnum;
use frameipc::handshake::{register_frame, serve_child_registrations};
use frameipc::transport::EventSender;
use frameipc::{
    event_channel, Address, FrameMessenger, FrameTracker, GuestEndpoint, Ipc, IpcConfig,
    MemoryTransport, MemoryWindows, MessageInfo, Route, TransportEvent, WindowId,
};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Scenario {
    /// Round trip through an echo handler
    Echo,
    /// Unanswered call with retry
    Retry,
    /// Wildcard call over shared routes
    Broadcast,
    /// Traffic issued across a navigation
    Hold,
    /// Frame registration with parent discovery
    Frames,
    /// Everything above
    All,
}

impl Scenario {
    pub fn expand(self) -> Vec<Scenario> {
        match self {
            Scenario::All => vec![
                Scenario::Echo,
                Scenario::Retry,
                Scenario::Broadcast,
                Scenario::Hold,
                Scenario::Frames,
            ],
            other => vec![other],
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Scenario::Echo => "echo",
            Scenario::Retry => "retry",
            Scenario::Broadcast => "broadcast",
            Scenario::Hold => "hold",
            Scenario::Frames => "frames",
            Scenario::All => "all",
        }
    }
}

/// Host engine plus the plumbing guests need to reach it.
struct Rig {
    transport: Arc<MemoryTransport>,
    ipc: Ipc,
    host: EventSender,
    config: IpcConfig,
}

impl Rig {
    fn new(config: &IpcConfig) -> Self {
        let transport = MemoryTransport::new();
        let ipc = Ipc::new(Arc::clone(&transport), config.clone());
        let (host, events) = event_channel();
        ipc.spawn_driver(events);
        Self {
            transport,
            ipc,
            host,
            config: config.clone(),
        }
    }

    fn guest(&self, address: Address, route: Route) -> GuestEndpoint {
        let guest = GuestEndpoint::new(address, route, self.host.clone(), self.config.clone());
        guest.spawn(self.transport.attach(route));
        guest
    }
}

async fn settle() {
    tokio::time::sleep(Duration::from_millis(20)).await;
}

pub async fn run(scenario: Scenario, config: &IpcConfig, frames: usize) -> Report {
    tracing::info!("running scenario {}", scenario.name());
    match scenario {
        Scenario::Echo => echo(config).await,
        Scenario::Retry => retry(config).await,
        Scenario::Broadcast => broadcast(config, frames).await,
        Scenario::Hold => hold(config).await,
        Scenario::Frames => frame_tree(config, frames).await,
        Scenario::All => {
            let mut report = Report::new("all");
            report.check(false, "expand 'all' before running");
            report
        }
    }
}

async fn echo(config: &IpcConfig) -> Report {
    let mut report = Report::new("echo");
    let rig = Rig::new(config);
    let frame = Address::named("frameA");
    let guest = rig.guest(frame.clone(), Route::Frame(1));
    guest.on("echo", |payload: Value, _info: &MessageInfo| payload);

    guest.notify("frame.hello", json!(null));
    settle().await;
    report.check(
        rig.ipc.resolve(&frame) == Some(Route::Frame(1)),
        format!("learned {} -> {:?}", frame, rig.ipc.resolve(&frame)),
    );

    let reply = rig.ipc.bind(frame).send("echo", json!({"v": 7})).await;
    report.check(reply == Ok(json!({"v": 7})), format!("echo replied {:?}", reply));
    report.traffic(rig.transport.sent());
    report
}

async fn retry(config: &IpcConfig) -> Report {
    let mut report = Report::new("retry");
    let rig = Rig::new(config);
    let frame = Address::named("frameA");
    rig.ipc.learn(&frame, Route::Frame(1));

    let retries = config.default_retry.max(1);
    let timeout = config.default_timeout();
    let started = Instant::now();
    let result = rig
        .ipc
        .send_with(frame, "ping", json!({"n": 1}), timeout, retries)
        .await;
    let elapsed = started.elapsed();

    let writes = rig.transport.sent_named("ping").len();
    report.check(
        writes == retries as usize + 1,
        format!("{} physical sends for retry = {}", writes, retries),
    );
    match result {
        Err(err) if err.is_timeout() => report.check(true, format!("rejected: {}", err)),
        other => report.check(false, format!("expected timeout, got {:?}", other)),
    }
    report.note(format!("elapsed {:?}", elapsed));
    report.traffic(rig.transport.sent());
    report
}

async fn broadcast(config: &IpcConfig, frames: usize) -> Report {
    let mut report = Report::new("broadcast");
    let rig = Rig::new(config);
    let frames = frames.max(1);

    // Two addresses behind every route; only the first answers.
    let mut guests = Vec::new();
    for i in 0..frames {
        let route = Route::Frame(i as i64 + 1);
        let address = Address::named(format!("frame{}", i));
        rig.ipc.learn(&address, route);
        rig.ipc.learn(&Address::named(format!("frame{}-alias", i)), route);
        guests.push(rig.guest(address, route));
    }
    if let Some(first) = guests.first() {
        let name = first.address().to_string();
        first.on("announce", move |_p: Value, _i: &MessageInfo| json!(name.clone()));
    }

    let reply = rig.ipc.send(Address::Wildcard, "announce", json!(null)).await;
    report.check(reply.is_ok(), format!("first answer {:?}", reply));

    let writes = rig.transport.sent_named("announce").len();
    report.check(
        writes == frames,
        format!("{} addresses over {} routes gave {} writes", frames * 2, frames, writes),
    );
    report.traffic(rig.transport.sent());
    report
}

async fn hold(config: &IpcConfig) -> Report {
    let mut report = Report::new("hold");
    let rig = Rig::new(config);
    let guest = rig.guest(Address::Main, Route::Primary);
    guest.on("state", |_p: Value, info: &MessageInfo| json!(info.name));

    let _ = rig.host.send(TransportEvent::AboutToUnload);
    settle().await;
    report.note(format!("phase {:?}", rig.ipc.phase()));

    let calls: Vec<_> = ["first", "second", "third"]
        .into_iter()
        .map(|label| {
            let ipc = rig.ipc.clone();
            tokio::spawn(async move { ipc.send(Address::Main, "state", json!(label)).await })
        })
        .collect();
    settle().await;
    report.check(
        rig.transport.sent_count() == 0,
        format!("{} writes while holding", rig.transport.sent_count()),
    );

    let _ = rig.host.send(TransportEvent::Ready);
    let results = futures::future::join_all(calls).await;
    let answered = results
        .iter()
        .filter(|r| matches!(r, Ok(Ok(_))))
        .count();
    report.check(answered == 3, format!("{} of 3 held calls answered", answered));

    let order: Vec<Value> = rig
        .transport
        .sent_named("state")
        .into_iter()
        .map(|(_, e)| e.payload)
        .collect();
    report.note(format!("replay order {:?}", order));
    report.traffic(rig.transport.sent());
    report
}

async fn frame_tree(config: &IpcConfig, frames: usize) -> Report {
    let mut report = Report::new("frames");
    let rig = Rig::new(config);
    let tracker = FrameTracker::install(&rig.ipc, uuid::Uuid::new_v4().to_string());

    let main = rig.guest(Address::Main, Route::Primary);
    let reply = register_frame(&main, None, "https://host.test/").await;
    report.check(reply.is_ok(), format!("main registered: {:?}", reply));

    let windows = MemoryWindows::new();
    let main_window = FrameMessenger::new(WindowId(0), Arc::clone(&windows));
    main_window.spawn(windows.open(WindowId(0)));
    serve_child_registrations(&main_window, &main, |window, _url| {
        Some(format!("slot{}", window.0))
    });

    for i in 1..=frames.max(1) {
        let window = WindowId(i as u64);
        let messenger = FrameMessenger::new(window, Arc::clone(&windows));
        messenger.spawn(windows.open(window));
        let child = rig.guest(Address::mint(), Route::Frame(i as i64 + 100));
        let url = format!("https://child{}.test/", i);
        let reply = register_frame(&child, Some((&messenger, WindowId(0))), &url).await;
        report.check(reply.is_ok(), format!("{} registered: {:?}", child.address(), reply));
    }

    for record in tracker.frames() {
        report.note(format!(
            "{} route={:?} parent={:?} name={:?}",
            record.address, record.route, record.parent, record.name
        ));
    }
    report.check(
        tracker.children(&Address::Main).len() == frames.max(1),
        "every child is attached under Main",
    );
    report.traffic(rig.transport.sent());
    report
}
