//! Integration tests for the grace-period reaper.
//!
//! Time is paused: sleeps auto-advance the clock once every task is idle,
//! so timers fire in virtual time.

use std::sync::Arc;
use std::time::Duration;

use playlink_directory::{
    DirectoryError, DirectoryOp, InMemoryDirectory, NewSession, SessionService,
};
use playlink_protocol::{PlayerId, SessionId, Visibility};
use playlink_room::{ReaperConfig, ReaperError, ReaperEvent, ReaperState, spawn_reaper};

struct Fixture {
    directory: Arc<InMemoryDirectory>,
    service: SessionService<InMemoryDirectory>,
    session_id: SessionId,
}

async fn room_with_player(player: &str) -> Fixture {
    let directory = Arc::new(InMemoryDirectory::new());
    let service = SessionService::new(Arc::clone(&directory));
    let record = service
        .create_session(NewSession {
            host_id: PlayerId::from("host"),
            host_display_name: "Host".into(),
            game_id: "contra".into(),
            game_title: "Contra".into(),
            platform: "nes".into(),
            visibility: Visibility::Public,
            max_players: 4,
        })
        .await
        .unwrap();
    service.join(&record.id, &player.into(), player).await.unwrap();
    Fixture {
        directory,
        service,
        session_id: record.id,
    }
}

async fn settle() {
    tokio::time::sleep(Duration::from_millis(1)).await;
}

// =========================================================================
// Grace period
// =========================================================================

#[tokio::test(start_paused = true)]
async fn test_empty_room_deleted_after_grace() {
    let fx = room_with_player("alice").await;
    let (handle, mut events) =
        spawn_reaper(Arc::clone(&fx.directory), fx.session_id.clone(), ReaperConfig::default())
            .await
            .unwrap();
    settle().await;
    assert_eq!(handle.status().await.unwrap().state, ReaperState::Occupied);

    fx.service.leave(&fx.session_id, &"alice".into()).await.unwrap();
    settle().await;
    assert_eq!(handle.status().await.unwrap().state, ReaperState::GracePeriod);

    tokio::time::sleep(Duration::from_millis(9_000)).await;
    assert!(fx.directory.peek(&fx.session_id).is_some());

    tokio::time::sleep(Duration::from_millis(1_500)).await;
    assert!(fx.directory.peek(&fx.session_id).is_none());
    assert_eq!(
        events.recv().await,
        Some(ReaperEvent::Closed {
            session_id: fx.session_id.clone()
        })
    );
    assert_eq!(fx.directory.deletions(&fx.session_id), 1);
}

#[tokio::test(start_paused = true)]
async fn test_rejoin_cancels_grace() {
    let fx = room_with_player("alice").await;
    let (handle, mut events) =
        spawn_reaper(Arc::clone(&fx.directory), fx.session_id.clone(), ReaperConfig::default())
            .await
            .unwrap();
    settle().await;

    fx.service.leave(&fx.session_id, &"alice".into()).await.unwrap();
    tokio::time::sleep(Duration::from_secs(5)).await;
    fx.service.join(&fx.session_id, &"bob".into(), "bob").await.unwrap();
    tokio::time::sleep(Duration::from_secs(30)).await;

    assert!(fx.directory.peek(&fx.session_id).is_some());
    let status = handle.status().await.unwrap();
    assert_eq!(status.state, ReaperState::Occupied);
    assert_eq!(status.players, 1);
    assert!(events.try_recv().is_err());
}

#[tokio::test(start_paused = true)]
async fn test_fresh_empty_room_is_not_reaped() {
    let directory = Arc::new(InMemoryDirectory::new());
    let service = SessionService::new(Arc::clone(&directory));
    let record = service
        .create_session(NewSession {
            host_id: "host".into(),
            host_display_name: "Host".into(),
            game_id: "pong".into(),
            game_title: "Pong".into(),
            platform: "atari".into(),
            visibility: Visibility::Private,
            max_players: 2,
        })
        .await
        .unwrap();

    let (handle, _events) =
        spawn_reaper(Arc::clone(&directory), record.id.clone(), ReaperConfig::default())
            .await
            .unwrap();
    tokio::time::sleep(Duration::from_secs(60)).await;

    assert!(directory.peek(&record.id).is_some());
    assert_eq!(handle.status().await.unwrap().state, ReaperState::Idle);
}

#[tokio::test(start_paused = true)]
async fn test_failed_expiry_check_rechecks() {
    let fx = room_with_player("alice").await;
    let (_handle, mut events) =
        spawn_reaper(Arc::clone(&fx.directory), fx.session_id.clone(), ReaperConfig::default())
            .await
            .unwrap();
    settle().await;

    fx.directory.fail_next(DirectoryOp::Get, DirectoryError::Transient("timeout".into()));
    fx.service.leave(&fx.session_id, &"alice".into()).await.unwrap();

    tokio::time::sleep(Duration::from_millis(10_500)).await;
    assert!(fx.directory.peek(&fx.session_id).is_some());

    tokio::time::sleep(Duration::from_secs(1)).await;
    assert!(fx.directory.peek(&fx.session_id).is_none());
    assert!(matches!(events.recv().await, Some(ReaperEvent::Closed { .. })));
}

// =========================================================================
// Other deleters
// =========================================================================

#[tokio::test(start_paused = true)]
async fn test_explicit_close_reports_gone() {
    let fx = room_with_player("alice").await;
    let (handle, mut events) =
        spawn_reaper(Arc::clone(&fx.directory), fx.session_id.clone(), ReaperConfig::default())
            .await
            .unwrap();

    fx.service.leave(&fx.session_id, &"alice".into()).await.unwrap();
    fx.service.close(&fx.session_id, &"host".into()).await.unwrap();

    assert_eq!(
        events.recv().await,
        Some(ReaperEvent::Gone {
            session_id: fx.session_id.clone()
        })
    );
    tokio::time::sleep(Duration::from_secs(20)).await;
    assert_eq!(fx.directory.deletions(&fx.session_id), 1);
    assert!(!handle.is_running());
}

#[tokio::test(start_paused = true)]
async fn test_delete_during_grace_is_not_repeated() {
    let fx = room_with_player("alice").await;
    let (_handle, mut events) =
        spawn_reaper(Arc::clone(&fx.directory), fx.session_id.clone(), ReaperConfig::default())
            .await
            .unwrap();
    settle().await;

    fx.service.leave(&fx.session_id, &"alice".into()).await.unwrap();
    tokio::time::sleep(Duration::from_secs(3)).await;
    playlink_room::spawn_orphan_sweep(Arc::clone(&fx.directory), vec![fx.session_id.clone()])
        .await
        .unwrap();

    assert!(matches!(events.recv().await, Some(ReaperEvent::Gone { .. })));
    tokio::time::sleep(Duration::from_secs(20)).await;
    assert_eq!(fx.directory.deletions(&fx.session_id), 1);
    assert_eq!(fx.directory.calls(DirectoryOp::Delete), 1);
}

// =========================================================================
// Handle
// =========================================================================

#[tokio::test(start_paused = true)]
async fn test_shutdown_leaves_record_alone() {
    let fx = room_with_player("alice").await;
    let (handle, _events) =
        spawn_reaper(Arc::clone(&fx.directory), fx.session_id.clone(), ReaperConfig::default())
            .await
            .unwrap();
    settle().await;

    fx.service.leave(&fx.session_id, &"alice".into()).await.unwrap();
    handle.shutdown().await;
    tokio::time::sleep(Duration::from_secs(30)).await;

    assert!(fx.directory.peek(&fx.session_id).is_some());
    assert!(matches!(handle.status().await, Err(ReaperError::Unavailable(_))));
    handle.shutdown().await;
}

#[tokio::test]
async fn test_spawn_fails_when_subscribe_fails() {
    let directory = Arc::new(InMemoryDirectory::new());
    directory.fail_next(DirectoryOp::Subscribe, DirectoryError::CorruptState("bad".into()));
    let result = spawn_reaper(directory, "ABCDEF".into(), ReaperConfig::default()).await;
    assert!(matches!(result, Err(ReaperError::Directory(DirectoryError::CorruptState(_)))));
}
