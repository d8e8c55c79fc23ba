use tempfile::TempDir;

use mergebot_core::users::SqliteUserStore;
use mergebot_core::{QuotaSection, SessionError, SessionStore, Tier, VideoRef};

fn quota() -> QuotaSection {
    QuotaSection {
        free_limit: 2,
        premium_limit: 10,
        min_merge_videos: 2,
    }
}

fn build_store(base: &TempDir) -> (SessionStore, SqliteUserStore) {
    let users = SqliteUserStore::builder()
        .path(base.path().join("users.sqlite"))
        .build()
        .unwrap();
    users.initialize().unwrap();
    (SessionStore::new(users.clone(), quota()), users)
}

fn reference(label: &str) -> VideoRef {
    VideoRef::new(format!("file:///videos/{label}.mp4"))
}

#[test]
fn free_tier_caps_at_two() {
    let base = TempDir::new().unwrap();
    let (sessions, _) = build_store(&base);

    assert_eq!(sessions.touch(1).unwrap(), Tier::Free);
    assert_eq!(sessions.add_video(1, reference("a")).unwrap(), 1);
    assert_eq!(sessions.add_video(1, reference("b")).unwrap(), 2);
    let err = sessions.add_video(1, reference("c")).unwrap_err();
    assert!(matches!(err, SessionError::QuotaExceeded { limit: 2 }));
    assert_eq!(sessions.pending(1), 2);
}

#[test]
fn premium_tier_caps_at_ten() {
    let base = TempDir::new().unwrap();
    let (sessions, users) = build_store(&base);
    users.set_premium(2, true).unwrap();

    assert_eq!(sessions.touch(2).unwrap(), Tier::Premium);
    for n in 1..=10 {
        assert_eq!(sessions.add_video(2, reference(&format!("v{n}"))).unwrap(), n);
    }
    let err = sessions.add_video(2, reference("v11")).unwrap_err();
    assert!(matches!(err, SessionError::QuotaExceeded { limit: 10 }));
    assert_eq!(sessions.pending(2), 10);
}

#[test]
fn promotion_takes_effect_on_next_touch() {
    let base = TempDir::new().unwrap();
    let (sessions, users) = build_store(&base);

    sessions.add_video(3, reference("a")).unwrap();
    sessions.add_video(3, reference("b")).unwrap();
    assert!(sessions.add_video(3, reference("c")).is_err());

    users.set_premium(3, true).unwrap();
    assert_eq!(sessions.add_video(3, reference("c")).unwrap(), 3);
}

#[test]
fn drain_below_minimum_is_a_noop() {
    let base = TempDir::new().unwrap();
    let (sessions, _) = build_store(&base);

    sessions.add_video(4, reference("only")).unwrap();
    let err = sessions.drain(4).unwrap_err();
    assert!(matches!(
        err,
        SessionError::InsufficientVideos {
            count: 1,
            minimum: 2
        }
    ));
    assert_eq!(sessions.pending(4), 1);

    // And the same for a user with no session at all.
    let err = sessions.drain(5).unwrap_err();
    assert!(matches!(err, SessionError::InsufficientVideos { count: 0, .. }));
}

#[test]
fn drain_returns_insertion_order_and_empties() {
    let base = TempDir::new().unwrap();
    let (sessions, users) = build_store(&base);
    users.set_premium(6, true).unwrap();

    for label in ["first", "second", "third"] {
        sessions.add_video(6, reference(label)).unwrap();
    }
    let drained = sessions.drain(6).unwrap();
    let tokens: Vec<&str> = drained.iter().map(|r| r.as_str()).collect();
    assert_eq!(
        tokens,
        vec![
            "file:///videos/first.mp4",
            "file:///videos/second.mp4",
            "file:///videos/third.mp4"
        ]
    );
    assert_eq!(sessions.pending(6), 0);
}

#[test]
fn attempt_guard_is_exclusive_per_user() {
    let base = TempDir::new().unwrap();
    let (sessions, _) = build_store(&base);

    sessions.begin_attempt(7).unwrap();
    assert!(matches!(
        sessions.begin_attempt(7).unwrap_err(),
        SessionError::AttemptInProgress
    ));
    // Other users are unaffected.
    sessions.begin_attempt(8).unwrap();

    sessions.end_attempt(7);
    sessions.begin_attempt(7).unwrap();

    // Clearing the session also releases the guard.
    sessions.clear(7);
    sessions.begin_attempt(7).unwrap();
}
