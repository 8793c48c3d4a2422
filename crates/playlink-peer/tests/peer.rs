//! Integration tests for the host peer layer over the in-memory relay.
//!
//! Time is paused, so cool-downs and capture retries run in virtual time.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use bytes::Bytes;
use playlink_peer::{
    CaptureConfig, ConnectionAttemptState, FanoutError, HostEvent, ManagerStatus,
    MediaCallState, PeerConfig, PeerConnectionManager, ScriptedCapture, StreamFanout,
};
use playlink_protocol::{InputEvent, InputKind, PeerId, PlayerId, SessionId};
use playlink_retry::{Backoff, RetryPolicy};
use playlink_transport::{MemoryRelay, PeerDelivery, SignalingServer};
use serde_json::json;
use tokio::sync::mpsc;
use tokio::time::Instant;

fn config(names: &[&str]) -> PeerConfig {
    PeerConfig::with_servers(
        names
            .iter()
            .map(|name| SignalingServer::insecure(*name, format!("{name}.relay.test"), 9000))
            .collect(),
    )
}

async fn wait_status(manager: &PeerConnectionManager, want: ManagerStatus) {
    let mut status = manager.watch_status();
    tokio::time::timeout(Duration::from_secs(120), status.wait_for(|s| *s == want))
        .await
        .expect("timed out waiting for status")
        .map(|_| ())
        .expect("manager stopped");
}

async fn wait_peers(manager: &PeerConnectionManager, count: usize) {
    let mut peers = manager.watch_peers();
    tokio::time::timeout(Duration::from_secs(5), peers.wait_for(|p| p.len() == count))
        .await
        .expect("timed out waiting for peers")
        .map(|_| ())
        .expect("manager stopped");
}

async fn settle() {
    tokio::time::sleep(Duration::from_millis(1)).await;
}

async fn ready(manager: &PeerConnectionManager) -> PeerId {
    manager
        .start(SessionId::from("ABC123"), PlayerId::from("host"))
        .await
        .unwrap();
    wait_status(manager, ManagerStatus::Ready).await;
    manager.current_identity().expect("identity after ready")
}

fn quick_capture() -> CaptureConfig {
    CaptureConfig {
        fps: 30,
        retry: RetryPolicy::new(Backoff::fixed(Duration::from_millis(100)), 3),
    }
}

// =========================================================================
// Failover and circuit breaker
// =========================================================================

#[tokio::test(start_paused = true)]
async fn test_start_fails_over_to_second_server() {
    let relay = MemoryRelay::new();
    relay.fail_server("a");
    let manager = PeerConnectionManager::spawn(relay.clone(), config(&["a", "b"]));
    let mut events = manager.subscribe();

    let identity = ready(&manager).await;

    assert_eq!(relay.open_attempts(), vec!["a", "b"]);
    assert!(relay.is_registered(&identity));
    assert!(identity.as_str().starts_with("host-ABC123-host-"));
    assert_eq!(events.recv().await.unwrap(), HostEvent::IdentityReady(identity));

    let attempts = manager.attempt_state().await.unwrap();
    assert_eq!(attempts.server_index, 1);
    assert_eq!(attempts.attempt_count, 0);
    assert!(!attempts.circuit_open);
}

#[tokio::test(start_paused = true)]
async fn test_start_all_servers_down_opens_circuit() {
    let relay = MemoryRelay::new();
    relay.fail_server("a");
    relay.fail_server("b");
    let manager = PeerConnectionManager::spawn(relay.clone(), config(&["a", "b"]));
    let mut events = manager.subscribe();
    let started = Instant::now();

    manager
        .start(SessionId::from("ABC123"), PlayerId::from("host"))
        .await
        .unwrap();
    wait_status(&manager, ManagerStatus::Unavailable).await;

    // Two full cycles with one cool-down between them.
    assert_eq!(relay.open_attempts(), vec!["a", "b", "a", "b"]);
    assert!(started.elapsed() >= Duration::from_secs(8));
    assert!(manager.current_identity().is_none());
    assert!(manager.attempt_state().await.unwrap().circuit_open);
    assert_eq!(events.recv().await.unwrap(), HostEvent::Unavailable);

    // Nothing more happens on its own.
    tokio::time::sleep(Duration::from_secs(60)).await;
    assert_eq!(relay.open_attempts().len(), 4);
}

#[tokio::test(start_paused = true)]
async fn test_start_while_circuit_open_is_noop() {
    let relay = MemoryRelay::new();
    relay.fail_server("a");
    let manager = PeerConnectionManager::spawn(relay.clone(), config(&["a"]));
    manager
        .start(SessionId::from("ABC123"), PlayerId::from("host"))
        .await
        .unwrap();
    wait_status(&manager, ManagerStatus::Unavailable).await;
    let before = relay.open_attempts().len();

    manager.stop().await;
    assert_eq!(manager.status(), ManagerStatus::Idle);
    manager
        .start(SessionId::from("ABC123"), PlayerId::from("host"))
        .await
        .unwrap();
    settle().await;

    assert_eq!(manager.status(), ManagerStatus::Unavailable);
    assert_eq!(relay.open_attempts().len(), before);
}

#[tokio::test(start_paused = true)]
async fn test_retry_after_circuit_opens_reconnects() {
    let relay = MemoryRelay::new();
    relay.fail_server("a");
    let manager = PeerConnectionManager::spawn(relay.clone(), config(&["a"]));
    manager
        .start(SessionId::from("ABC123"), PlayerId::from("host"))
        .await
        .unwrap();
    wait_status(&manager, ManagerStatus::Unavailable).await;

    relay.restore_server("a");
    manager.retry().await.unwrap();
    wait_status(&manager, ManagerStatus::Ready).await;

    assert!(manager.current_identity().is_some());
    assert!(!manager.attempt_state().await.unwrap().circuit_open);
}

#[tokio::test(start_paused = true)]
async fn test_spawn_with_open_circuit_never_connects() {
    let relay = MemoryRelay::new();
    let attempts = ConnectionAttemptState {
        circuit_open: true,
        ..ConnectionAttemptState::default()
    };
    let manager =
        PeerConnectionManager::spawn_with_attempts(relay.clone(), config(&["a"]), attempts);

    manager
        .start(SessionId::from("ABC123"), PlayerId::from("host"))
        .await
        .unwrap();
    settle().await;

    assert_eq!(manager.status(), ManagerStatus::Unavailable);
    assert!(relay.open_attempts().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_server_recovers_during_cooldown() {
    let relay = MemoryRelay::new();
    relay.fail_server_times("a", 1);
    let manager = PeerConnectionManager::spawn(relay.clone(), config(&["a"]));
    let started = Instant::now();

    ready(&manager).await;

    assert_eq!(relay.open_attempts(), vec!["a", "a"]);
    assert!(started.elapsed() >= Duration::from_secs(8));
}

// =========================================================================
// Identity maintenance
// =========================================================================

#[tokio::test(start_paused = true)]
async fn test_expired_identity_reconnects_in_place() {
    let relay = MemoryRelay::new();
    let manager = PeerConnectionManager::spawn(relay.clone(), config(&["a"]));
    let identity = ready(&manager).await;
    let peer = relay.connect_peer(&identity, "p1").unwrap();
    wait_peers(&manager, 1).await;

    relay.expire(&identity);
    settle().await;
    wait_status(&manager, ManagerStatus::Ready).await;

    assert_eq!(relay.reconnect_attempts(), 1);
    assert_eq!(manager.current_identity(), Some(identity));
    assert_eq!(relay.open_attempts().len(), 1);
    // Existing links survive an in-place reconnect.
    assert!(manager.connected_peers().contains(peer.id()));
}

#[tokio::test(start_paused = true)]
async fn test_reconnect_bound_starts_over() {
    let relay = MemoryRelay::new();
    let manager = PeerConnectionManager::spawn(relay.clone(), config(&["a"]));
    let identity = ready(&manager).await;

    relay.fail_reconnects(3);
    relay.drop_socket(&identity);
    settle().await;
    wait_status(&manager, ManagerStatus::Ready).await;

    assert_eq!(relay.reconnect_attempts(), 3);
    assert_eq!(relay.open_attempts().len(), 2);
    assert!(manager.current_identity().is_some());
}

#[tokio::test(start_paused = true)]
async fn test_stop_is_idempotent() {
    let relay = MemoryRelay::new();
    let manager = PeerConnectionManager::spawn(relay.clone(), config(&["a"]));
    manager.stop().await;

    let identity = ready(&manager).await;
    let mut peer = relay.connect_peer(&identity, "p1").unwrap();
    wait_peers(&manager, 1).await;

    manager.stop().await;
    manager.stop().await;

    assert_eq!(manager.status(), ManagerStatus::Idle);
    assert!(manager.current_identity().is_none());
    assert!(manager.connected_peers().is_empty());
    assert!(!relay.is_registered(&identity));
    assert_eq!(peer.recv().await, Some(PeerDelivery::Disconnected));
}

#[tokio::test(start_paused = true)]
async fn test_dropping_last_handle_releases_identity() {
    let relay = MemoryRelay::new();
    let manager = PeerConnectionManager::spawn(relay.clone(), config(&["a"]));
    let identity = ready(&manager).await;

    drop(manager);
    settle().await;

    assert!(!relay.is_registered(&identity));
}

// =========================================================================
// Peer links
// =========================================================================

#[tokio::test(start_paused = true)]
async fn test_peer_left_fires_once() {
    let relay = MemoryRelay::new();
    let manager = PeerConnectionManager::spawn(relay.clone(), config(&["a"]));
    let joined = Arc::new(AtomicUsize::new(0));
    let left = Arc::new(AtomicUsize::new(0));
    let (j, l) = (Arc::clone(&joined), Arc::clone(&left));
    manager
        .on_peer_joined(move |_: &PeerId| {
            j.fetch_add(1, Ordering::SeqCst);
        })
        .await
        .unwrap();
    manager
        .on_peer_left(move |_: &PeerId| {
            l.fetch_add(1, Ordering::SeqCst);
        })
        .await
        .unwrap();
    let identity = ready(&manager).await;

    let peer = relay.connect_peer(&identity, "p1").unwrap();
    wait_peers(&manager, 1).await;
    peer.close().unwrap();
    peer.close().unwrap();
    wait_peers(&manager, 0).await;
    settle().await;

    assert_eq!(joined.load(Ordering::SeqCst), 1);
    assert_eq!(left.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn test_peer_failure_is_isolated() {
    let relay = MemoryRelay::new();
    let manager = PeerConnectionManager::spawn(relay.clone(), config(&["a"]));
    let identity = ready(&manager).await;
    let mut events = manager.subscribe();

    let bad = relay.connect_peer(&identity, "p1").unwrap();
    let mut good = relay.connect_peer(&identity, "p2").unwrap();
    wait_peers(&manager, 2).await;

    bad.fail("ice failed").unwrap();
    wait_peers(&manager, 1).await;

    let mut saw_failure = false;
    while let Ok(event) = events.try_recv() {
        if event
            == (HostEvent::PeerFailed {
                peer: PeerId::from("p1"),
                reason: "ice failed".into(),
            })
        {
            saw_failure = true;
        }
    }
    assert!(saw_failure);
    assert_eq!(manager.status(), ManagerStatus::Ready);

    manager.send_to(good.id(), json!({"hello": 1})).await.unwrap();
    assert_eq!(good.recv().await, Some(PeerDelivery::Data(json!({"hello": 1}))));
}

#[tokio::test(start_paused = true)]
async fn test_send_to_unknown_peer_errors() {
    let relay = MemoryRelay::new();
    let manager = PeerConnectionManager::spawn(relay.clone(), config(&["a"]));

    let err = manager
        .send_to(&PeerId::from("p1"), json!({}))
        .await
        .unwrap_err();
    assert!(matches!(err, playlink_peer::PeerError::NotConnected));

    ready(&manager).await;
    let err = manager
        .send_to(&PeerId::from("p1"), json!({}))
        .await
        .unwrap_err();
    assert!(matches!(err, playlink_peer::PeerError::UnknownPeer(_)));
}

#[tokio::test(start_paused = true)]
async fn test_broadcast_reaches_every_peer() {
    let relay = MemoryRelay::new();
    let manager = PeerConnectionManager::spawn(relay.clone(), config(&["a"]));
    let identity = ready(&manager).await;
    let mut p1 = relay.connect_peer(&identity, "p1").unwrap();
    let mut p2 = relay.connect_peer(&identity, "p2").unwrap();
    wait_peers(&manager, 2).await;

    let delivered = manager.broadcast(json!({"pause": true})).await.unwrap();

    assert_eq!(delivered, 2);
    assert_eq!(p1.recv().await, Some(PeerDelivery::Data(json!({"pause": true}))));
    assert_eq!(p2.recv().await, Some(PeerDelivery::Data(json!({"pause": true}))));
}

// =========================================================================
// Input relay
// =========================================================================

#[tokio::test(start_paused = true)]
async fn test_input_reaches_sink_unchanged() {
    let relay = MemoryRelay::new();
    let manager = PeerConnectionManager::spawn(relay.clone(), config(&["a"]));
    let (tx, mut rx) = mpsc::unbounded_channel();
    manager
        .on_input_received(move |peer: &PeerId, event: InputEvent| {
            let _ = tx.send((peer.clone(), event));
        })
        .await
        .unwrap();
    let identity = ready(&manager).await;
    let peer = relay.connect_peer(&identity, "p1").unwrap();
    wait_peers(&manager, 1).await;

    let press = InputEvent::new(InputKind::Press, "KeyZ", "z", 1_700_000_000_001);
    let release = InputEvent::new(InputKind::Release, "KeyZ", "z", 1_700_000_000_050);
    peer.send(json!({"chat": "gg"})).unwrap();
    peer.send_input(&press).unwrap();
    peer.send_input(&release).unwrap();

    assert_eq!(rx.recv().await, Some((PeerId::from("p1"), press)));
    assert_eq!(rx.recv().await, Some((PeerId::from("p1"), release)));
    settle().await;
    assert!(rx.try_recv().is_err());
}

#[tokio::test(start_paused = true)]
async fn test_input_accepts_browser_event_shape() {
    let relay = MemoryRelay::new();
    let manager = PeerConnectionManager::spawn(relay.clone(), config(&["a"]));
    let (tx, mut rx) = mpsc::unbounded_channel();
    manager
        .on_input_received(move |_: &PeerId, event: InputEvent| {
            let _ = tx.send(event);
        })
        .await
        .unwrap();
    let identity = ready(&manager).await;
    let peer = relay.connect_peer(&identity, "p1").unwrap();
    wait_peers(&manager, 1).await;

    peer.send(json!({"type": "keydown", "code": "ArrowUp", "key": "ArrowUp", "timestamp": 7}))
        .unwrap();

    let event = rx.recv().await.unwrap();
    assert_eq!(event.kind, InputKind::Press);
    assert_eq!(event.code, "ArrowUp");
    assert_eq!(event.timestamp_ms, 7);
}

// =========================================================================
// Stream fan-out
// =========================================================================

#[tokio::test(start_paused = true)]
async fn test_late_joiner_gets_stream_without_interrupting_others() {
    let relay = MemoryRelay::new();
    let manager = PeerConnectionManager::spawn(relay.clone(), config(&["a"]));
    let identity = ready(&manager).await;
    let fanout = StreamFanout::new(ScriptedCapture::ready(), manager.clone(), quick_capture());

    let mut p1 = relay.connect_peer(&identity, "p1").unwrap();
    wait_peers(&manager, 1).await;
    let stream = fanout.start_streaming("canvas").await.unwrap();
    assert!(matches!(p1.recv().await, Some(PeerDelivery::CallStarted { .. })));

    stream.push(Bytes::from_static(b"frame-0"), 0);
    assert_eq!(p1.next_frame().await.unwrap().seq, 0);

    let mut p2 = relay.connect_peer(&identity, "p2").unwrap();
    wait_peers(&manager, 2).await;
    assert!(matches!(p2.recv().await, Some(PeerDelivery::CallStarted { .. })));

    stream.push(Bytes::from_static(b"frame-1"), 16);
    assert_eq!(p1.next_frame().await.unwrap().seq, 1);
    assert_eq!(p2.next_frame().await.unwrap().seq, 1);

    let links = manager.links().await.unwrap();
    assert_eq!(links.len(), 2);
    assert!(links.iter().all(|l| l.media == MediaCallState::Sending));
    assert!(p1.drain().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_start_streaming_twice_keeps_one_stream() {
    let relay = MemoryRelay::new();
    let manager = PeerConnectionManager::spawn(relay.clone(), config(&["a"]));
    ready(&manager).await;
    let capture = ScriptedCapture::ready();
    let fanout = StreamFanout::new(capture.clone(), manager.clone(), quick_capture());

    let first = fanout.start_streaming("canvas").await.unwrap();
    let second = fanout.start_streaming("canvas").await.unwrap();

    assert!(first.same_stream(&second));
    assert_eq!(capture.attempts(), 1);
    assert_eq!(first.fps(), 30);
}

#[tokio::test(start_paused = true)]
async fn test_stop_streaming_is_idempotent() {
    let relay = MemoryRelay::new();
    let manager = PeerConnectionManager::spawn(relay.clone(), config(&["a"]));
    let identity = ready(&manager).await;
    let fanout = StreamFanout::new(ScriptedCapture::ready(), manager.clone(), quick_capture());
    fanout.stop_streaming().await;

    let mut p1 = relay.connect_peer(&identity, "p1").unwrap();
    wait_peers(&manager, 1).await;
    let stream = fanout.start_streaming("canvas").await.unwrap();
    assert!(matches!(p1.recv().await, Some(PeerDelivery::CallStarted { .. })));

    fanout.stop_streaming().await;
    fanout.stop_streaming().await;

    assert!(matches!(p1.recv().await, Some(PeerDelivery::CallEnded { .. })));
    assert!(stream.is_ended());
    assert!(!fanout.is_streaming().await);
    assert_eq!(manager.connected_peers().len(), 1);

    // A peer joining now gets no media.
    let mut p2 = relay.connect_peer(&identity, "p2").unwrap();
    wait_peers(&manager, 2).await;
    settle().await;
    assert!(p2.drain().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_start_streaming_waits_for_surface() {
    let relay = MemoryRelay::new();
    let manager = PeerConnectionManager::spawn(relay.clone(), config(&["a"]));
    ready(&manager).await;
    let capture = ScriptedCapture::not_ready_for(2);
    let fanout = StreamFanout::new(capture.clone(), manager.clone(), quick_capture());
    let started = Instant::now();

    fanout.start_streaming("canvas").await.unwrap();

    assert_eq!(capture.attempts(), 3);
    assert_eq!(started.elapsed(), Duration::from_millis(200));
}

#[tokio::test(start_paused = true)]
async fn test_start_streaming_surface_never_ready() {
    let relay = MemoryRelay::new();
    let manager = PeerConnectionManager::spawn(relay.clone(), config(&["a"]));
    ready(&manager).await;
    let capture = ScriptedCapture::never_ready();
    let fanout = StreamFanout::new(capture.clone(), manager.clone(), quick_capture());

    let err = fanout.start_streaming("canvas").await.unwrap_err();

    assert!(matches!(err, FanoutError::CaptureNotReady { attempts: 3 }));
    assert_eq!(capture.attempts(), 3);
    assert!(!fanout.is_streaming().await);
}

#[tokio::test(start_paused = true)]
async fn test_start_streaming_capture_failure_not_retried() {
    let relay = MemoryRelay::new();
    let manager = PeerConnectionManager::spawn(relay.clone(), config(&["a"]));
    let capture = ScriptedCapture::failing("no canvas");
    let fanout = StreamFanout::new(capture.clone(), manager.clone(), quick_capture());

    let err = fanout.start_streaming("canvas").await.unwrap_err();

    assert!(matches!(err, FanoutError::Capture(_)));
    assert_eq!(capture.attempts(), 1);
}
