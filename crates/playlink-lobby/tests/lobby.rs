//! Integration tests for the lobby against a scripted directory.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use playlink_directory::{DirectoryError, DirectoryOp, InMemoryDirectory, SessionFilter};
use playlink_lobby::{Lobby, LobbyConfig, LobbyError, LobbyMode};
use playlink_protocol::{PlayerId, SessionId, SessionRecord, SessionStatus, Visibility};
use tokio::time::Instant;

fn record(id: &str) -> SessionRecord {
    SessionRecord {
        id: SessionId::from(id),
        host_id: PlayerId::from("host"),
        host_display_name: "Host".into(),
        game_id: "sf2".into(),
        game_title: "Street Fighter II".into(),
        platform: "snes".into(),
        visibility: Visibility::Public,
        max_players: 2,
        players: vec![PlayerId::from("p1")],
        status: SessionStatus::Waiting,
        created_at: Utc::now(),
        signaling_id: None,
        signaling_ready: false,
        last_player_number: 0,
    }
}

fn corrupt() -> DirectoryError {
    DirectoryError::CorruptState("INTERNAL ASSERTION FAILED: unexpected state".into())
}

fn setup() -> (Arc<InMemoryDirectory>, Lobby<InMemoryDirectory>) {
    let directory = Arc::new(InMemoryDirectory::new());
    let lobby = Lobby::new(Arc::clone(&directory), LobbyConfig::default());
    (directory, lobby)
}

// =========================================================================
// Filtering
// =========================================================================

#[tokio::test]
async fn test_lists_only_joinable_rooms() {
    let (directory, lobby) = setup();
    directory.seed(record("OPEN01"));
    directory.seed(SessionRecord {
        players: vec!["p1".into(), "p2".into()],
        ..record("FULL01")
    });
    directory.seed(SessionRecord {
        status: SessionStatus::Playing,
        ..record("PLAY01")
    });
    directory.seed(SessionRecord {
        visibility: Visibility::Private,
        ..record("PRIV01")
    });

    let listing = lobby.list_joinable(&SessionFilter::all()).await.unwrap();
    assert!(!listing.degraded);
    let ids: Vec<_> = listing.sessions.iter().map(|r| r.id.as_str()).collect();
    assert_eq!(ids, vec!["OPEN01"]);

    let private = lobby
        .list_joinable(&SessionFilter::all().with_visibility(Visibility::Private))
        .await
        .unwrap();
    assert_eq!(private.sessions.len(), 1);
    assert_eq!(private.sessions[0].id.as_str(), "PRIV01");
}

#[tokio::test]
async fn test_orphans_are_hidden_and_swept() {
    let (directory, lobby) = setup();
    directory.seed(SessionRecord {
        players: vec![],
        created_at: Utc::now() - chrono::Duration::minutes(45),
        ..record("ORPH01")
    });
    directory.seed(SessionRecord {
        players: vec![],
        ..record("NEW001")
    });

    let listing = lobby.list_joinable(&SessionFilter::all()).await.unwrap();
    let ids: Vec<_> = listing.sessions.iter().map(|r| r.id.as_str()).collect();
    assert_eq!(ids, vec!["NEW001"]);

    for _ in 0..10 {
        if directory.peek(&"ORPH01".into()).is_none() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert!(directory.peek(&"ORPH01".into()).is_none());
    assert!(directory.peek(&"NEW001".into()).is_some());
}

// =========================================================================
// Corrupt state
// =========================================================================

#[tokio::test(start_paused = true)]
async fn test_corrupt_state_degrades_then_recovers_in_background() {
    let (directory, lobby) = setup();
    directory.seed(record("OPEN01"));
    directory.fail_times(DirectoryOp::Query, corrupt(), 3);
    let mut mode = lobby.watch_mode();

    for _ in 0..3 {
        let listing = lobby.list_joinable(&SessionFilter::all()).await.unwrap();
        assert!(listing.degraded);
        assert!(listing.sessions.is_empty());
    }
    assert_eq!(lobby.mode(), LobbyMode::Degraded);
    assert_eq!(directory.calls(DirectoryOp::Query), 3);

    let start = Instant::now();
    mode.wait_for(|m| *m == LobbyMode::Normal).await.unwrap();
    assert_eq!(start.elapsed(), Duration::from_secs(5));
    assert_eq!(directory.calls(DirectoryOp::Query), 4);

    let listing = lobby.list_joinable(&SessionFilter::all()).await.unwrap();
    assert!(!listing.degraded);
    assert_eq!(listing.sessions.len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_recovery_keeps_probing_until_success() {
    let (directory, lobby) = setup();
    directory.fail_times(DirectoryOp::Query, corrupt(), 3);

    let listing = lobby.list_joinable(&SessionFilter::all()).await.unwrap();
    assert!(listing.degraded);

    let start = Instant::now();
    lobby
        .watch_mode()
        .wait_for(|m| *m == LobbyMode::Normal)
        .await
        .unwrap();
    // Two failed probes, the third succeeds.
    assert_eq!(start.elapsed(), Duration::from_secs(15));
    assert_eq!(directory.calls(DirectoryOp::Query), 4);
}

#[tokio::test(start_paused = true)]
async fn test_foreground_success_leaves_degraded_mode() {
    let (directory, lobby) = setup();
    directory.fail_next(DirectoryOp::Query, corrupt());

    assert!(lobby.list_joinable(&SessionFilter::all()).await.unwrap().degraded);
    assert!(!lobby.list_joinable(&SessionFilter::all()).await.unwrap().degraded);
    assert_eq!(lobby.mode(), LobbyMode::Normal);

    tokio::time::sleep(Duration::from_secs(30)).await;
    assert_eq!(directory.calls(DirectoryOp::Query), 2);
}

// =========================================================================
// Transient failures
// =========================================================================

#[tokio::test(start_paused = true)]
async fn test_transient_failures_are_retried_with_backoff() {
    let (directory, lobby) = setup();
    directory.seed(record("OPEN01"));
    directory.fail_times(DirectoryOp::Query, DirectoryError::Transient("unavailable".into()), 2);

    let start = Instant::now();
    let listing = lobby.list_joinable(&SessionFilter::all()).await.unwrap();
    assert!(!listing.degraded);
    assert_eq!(listing.sessions.len(), 1);
    // 1.5s + 2.7s
    assert_eq!(start.elapsed(), Duration::from_millis(4_200));
    assert_eq!(lobby.mode(), LobbyMode::Normal);
}

#[tokio::test(start_paused = true)]
async fn test_exhausted_transient_budget_degrades() {
    let (directory, lobby) = setup();
    directory.fail_times(DirectoryOp::Query, DirectoryError::Transient("unavailable".into()), 3);

    let listing = lobby.list_joinable(&SessionFilter::all()).await.unwrap();
    assert!(listing.degraded);
    assert_eq!(directory.calls(DirectoryOp::Query), 3);
    assert_eq!(lobby.mode(), LobbyMode::Degraded);
}

#[tokio::test(start_paused = true)]
async fn test_slow_query_times_out_as_transient() {
    let (directory, lobby) = setup();
    directory.set_latency(Duration::from_secs(60));

    let start = Instant::now();
    let listing = lobby.list_joinable(&SessionFilter::all()).await.unwrap();
    assert!(listing.degraded);
    // Three 10s deadlines plus 1.5s and 2.7s of backoff.
    assert_eq!(start.elapsed(), Duration::from_millis(34_200));
}

// =========================================================================
// Hard failures
// =========================================================================

#[tokio::test]
async fn test_permission_errors_surface() {
    let (directory, lobby) = setup();
    directory.fail_next(DirectoryOp::Query, DirectoryError::Forbidden("rules".into()));

    let err = lobby.list_joinable(&SessionFilter::all()).await.unwrap_err();
    assert!(matches!(err, LobbyError::Directory(DirectoryError::Forbidden(_))));
    assert_eq!(lobby.mode(), LobbyMode::Normal);
}
