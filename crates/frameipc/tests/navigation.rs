// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

#![allow(clippy::uninlined_format_args)] // Test code readability over pedantic
#![allow(clippy::missing_panics_doc)] // Tests panic on failure

//! Navigation hold integration tests
//!
//! Traffic issued between `about-to-unload` and `ready` must reach the guest
//! only after `ready`, in submission order.

use frameipc::{
    event_channel, Address, CallError, Envelope, Ipc, IpcConfig, MemoryTransport, MessageInfo,
    Phase, Route, TransportEvent,
};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;

fn engine() -> (Arc<MemoryTransport>, Ipc) {
    let transport = MemoryTransport::new();
    let ipc = Ipc::new(Arc::clone(&transport), IpcConfig::default());
    (transport, ipc)
}

fn names(transport: &MemoryTransport) -> Vec<String> {
    transport
        .sent()
        .into_iter()
        .map(|(_, e)| e.name.to_string())
        .collect()
}

#[tokio::test(start_paused = true)]
async fn test_held_traffic_replays_in_order() {
    let (transport, ipc) = engine();
    ipc.hold();
    assert_eq!(ipc.phase(), Phase::Holding);

    let first = {
        let ipc = ipc.clone();
        tokio::spawn(async move { ipc.send(Address::Main, "first", json!(1)).await })
    };
    tokio::task::yield_now().await;
    ipc.notify(Address::Main, "second", json!(2));
    let third = {
        let ipc = ipc.clone();
        tokio::spawn(async move { ipc.send(Address::Main, "third", json!(3)).await })
    };
    tokio::task::yield_now().await;

    // Longer than the default call timeout: timers only start at replay.
    tokio::time::sleep(Duration::from_secs(30)).await;
    assert_eq!(transport.sent_count(), 0);
    assert!(ipc.pending_calls().is_empty());

    ipc.ready();
    assert_eq!(names(&transport), vec!["first", "second", "third"]);
    assert_eq!(ipc.pending_calls().len(), 2);

    for (route, env) in transport.sent() {
        if let Some(token) = env.ack_name {
            ipc.receive(route, Envelope::ack(Address::Main, token, Ok(env.payload)));
        }
    }
    assert_eq!(first.await.unwrap(), Ok(json!(1)));
    assert_eq!(third.await.unwrap(), Ok(json!(3)));
}

#[tokio::test(start_paused = true)]
async fn test_acks_are_held_too() {
    let (transport, ipc) = engine();
    ipc.on(Address::Main, "state", |_p: Value, _i: &MessageInfo| json!("ok"));

    ipc.hold();
    ipc.receive(
        Route::Primary,
        Envelope::request(Address::Main, "state", "ack_p2r_state_1", json!(null)),
    );
    assert_eq!(transport.sent_count(), 0);

    ipc.ready();
    let sent = transport.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].1.answered_token(), Some("ack_p2r_state_1"));
}

#[tokio::test(start_paused = true)]
async fn test_lifecycle_events_drive_the_engine() {
    let (transport, ipc) = engine();
    let (events_tx, events_rx) = event_channel();
    let driver = ipc.spawn_driver(events_rx);

    events_tx.send(TransportEvent::AboutToUnload).unwrap();
    tokio::time::sleep(Duration::from_millis(1)).await;
    assert_eq!(ipc.phase(), Phase::Holding);

    ipc.notify(Address::Main, "queued", json!(null));
    assert_eq!(transport.sent_count(), 0);

    events_tx.send(TransportEvent::Ready).unwrap();
    tokio::time::sleep(Duration::from_millis(1)).await;
    assert_eq!(ipc.phase(), Phase::Active);
    assert_eq!(names(&transport), vec!["queued"]);

    events_tx.send(TransportEvent::Destroyed).unwrap();
    driver.await.unwrap();
    assert_eq!(ipc.phase(), Phase::Destroyed);
}

#[tokio::test(start_paused = true)]
async fn test_destroy_while_holding_drops_queue() {
    let (transport, ipc) = engine();
    ipc.hold();
    let held = {
        let ipc = ipc.clone();
        tokio::spawn(async move { ipc.send(Address::Main, "held", json!(null)).await })
    };
    tokio::task::yield_now().await;
    ipc.notify(Address::Main, "held.notify", json!(null));

    ipc.destroy();
    assert_eq!(held.await.unwrap(), Err(CallError::Destroyed));

    // Recovery after destruction is not possible.
    ipc.ready();
    assert_eq!(ipc.phase(), Phase::Destroyed);
    assert_eq!(transport.sent_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_route_changes_across_navigation() {
    let (transport, ipc) = engine();
    ipc.learn(&Address::named("frameA"), Route::Frame(1));

    ipc.hold();
    ipc.notify("frameA", "after.reload", json!(null));
    // frameA reappears behind a new route before the replay.
    ipc.receive(
        Route::Frame(9),
        Envelope::notification(Address::named("frameA"), "frame.hello", json!(null)),
    );
    ipc.ready();

    let sent = transport.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].0, Route::Frame(9));
}
