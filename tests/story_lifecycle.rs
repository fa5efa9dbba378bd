//! End-to-end: a real server on a loopback port driven through the HTTP client.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tempfile::TempDir;

use story_engine::api::{router, AppState};
use story_engine::client::{Category, HttpStoryApi, StoryApi, StoryCache, StorySession, ViewOutcome};
use story_engine::clock::{Clock, ManualClock};
use story_engine::config::StoryPolicy;
use story_engine::storage::{ExpirySweeper, StorageConfig, StoryStore};
use story_engine::story::{StoryContent, UserSummary};

struct TestServer {
    _dir: TempDir,
    base_url: String,
    clock: Arc<ManualClock>,
    store: Arc<StoryStore>,
    sweeper: ExpirySweeper,
}

impl TestServer {
    fn session(&self, user_id: &str) -> StorySession<HttpStoryApi> {
        StorySession::new(
            HttpStoryApi::new(&self.base_url),
            StoryCache::new(user_id),
            self.clock.clone(),
        )
    }
}

fn t0() -> DateTime<Utc> {
    DateTime::from_timestamp(1_700_000_000, 0).unwrap()
}

async fn spawn_server() -> TestServer {
    let dir = tempfile::tempdir().unwrap();
    let policy = StoryPolicy::default()
        .with_ttl(Duration::hours(24))
        .with_purge_grace(Duration::hours(2));

    let config = StorageConfig::new(dir.path().join("e2e.sled").to_string_lossy().to_string());
    let store = Arc::new(StoryStore::open(config, policy.ttl).unwrap());
    let clock = Arc::new(ManualClock::new(t0()));
    let sweeper = ExpirySweeper::new(store.clone(), clock.clone(), &policy);

    let app = router(Arc::new(AppState::new(store.clone(), clock.clone())));
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    TestServer {
        _dir: dir,
        base_url: format!("http://{}", addr),
        clock,
        store,
        sweeper,
    }
}

#[tokio::test]
async fn test_story_lifecycle() {
    let server = spawn_server().await;
    server
        .store
        .put_user(&UserSummary::new("alice", "Alice"))
        .unwrap();
    server.store.follow("bob", "alice").unwrap();

    let alice = server.session("alice");
    let bob = server.session("bob");

    // Create at t0
    let story = alice
        .create(StoryContent::image("https://cdn.example.com/beach.png"))
        .await
        .unwrap();
    assert_eq!(story.owner.username, "Alice");
    assert_eq!(story.expires_at, t0() + Duration::hours(24));

    // Still active an hour later
    server.clock.advance(Duration::hours(1));
    bob.refresh().await.unwrap();
    let feed = bob.feed();
    assert_eq!(feed.unviewed, 1);
    assert_eq!(feed.following[0].owner.id, "alice");

    // Bob views it
    assert_eq!(bob.view(&story.id).await.unwrap(), ViewOutcome::Recorded);
    assert_eq!(bob.feed().unviewed, 0);
    let stored = server.store.get(&story.id, server.clock.now()).unwrap();
    assert!(stored.has_viewed("bob"));
    assert!(!stored.has_viewed("carol"));

    // The owner's own view is not recorded
    assert_eq!(alice.view(&story.id).await.unwrap(), ViewOutcome::Skipped);
    let api = HttpStoryApi::new(&server.base_url);
    let own_view = api.record_view(&story.id, "alice").await.unwrap();
    assert!(!own_view.value.has_viewed("alice"));

    // Past expiry: listings and the sweeper agree
    server.clock.advance(Duration::hours(24));
    let listed = api.list(Category::Own, "alice").await.unwrap();
    assert!(listed.value.is_empty());
    assert!(api.record_view(&story.id, "bob").await.unwrap_err().is_not_found());

    assert_eq!(bob.expire(), 1);
    assert_eq!(bob.view(&story.id).await.unwrap(), ViewOutcome::Expired);

    let report = server.sweeper.sweep_now().unwrap();
    assert_eq!(report.expired, 1);
    assert_eq!(report.purged, 0);
    assert_eq!(server.store.archived_by_owner("alice").unwrap().len(), 1);

    // Purged once the grace period is over
    server.clock.advance(Duration::hours(1));
    let report = server.sweeper.sweep_now().unwrap();
    assert_eq!(report.purged, 1);
    assert!(server.store.archived_by_owner("alice").unwrap().is_empty());
    assert!(server
        .store
        .get_by_owner("alice", server.clock.now())
        .unwrap()
        .is_empty());
}

#[tokio::test]
async fn test_repeated_views_are_recorded_once() {
    let server = spawn_server().await;
    server.store.follow("bob", "alice").unwrap();

    let alice = server.session("alice");
    let story = alice
        .create(StoryContent::video("https://cdn.example.com/clip.mp4"))
        .await
        .unwrap();

    let api = HttpStoryApi::new(&server.base_url);
    let first = api.record_view(&story.id, "bob").await.unwrap();
    server.clock.advance(Duration::seconds(1));
    let second = api.record_view(&story.id, "bob").await.unwrap();
    assert!(second.acked_at > first.acked_at);
    assert_eq!(second.value.viewers.len(), 1);

    // A session that refreshed after both views sees bob exactly once
    server.clock.advance(Duration::seconds(1));
    let bob = server.session("bob");
    bob.load(Category::Following).await.unwrap();
    let cache = bob.snapshot();
    let cached = cache.get(&story.id).unwrap();
    assert_eq!(cached.story.viewers.iter().filter(|v| *v == "bob").count(), 1);
    assert_eq!(bob.view(&story.id).await.unwrap(), ViewOutcome::Skipped);
}

#[tokio::test]
async fn test_delete_is_owner_only() {
    let server = spawn_server().await;
    let alice = server.session("alice");
    let story = alice
        .create(StoryContent::image("https://cdn.example.com/x.png"))
        .await
        .unwrap();

    let api = HttpStoryApi::new(&server.base_url);
    let err = api.delete(&story.id, "mallory").await.unwrap_err();
    assert_eq!(err.code(), "forbidden");

    alice.delete(&story.id).await.unwrap();
    assert!(alice.snapshot().is_empty());
    assert!(api.delete(&story.id, "alice").await.unwrap_err().is_not_found());
}

#[tokio::test]
async fn test_ids_with_reserved_characters() {
    let server = spawn_server().await;
    let api = HttpStoryApi::new(&server.base_url);

    for user_id in ["team/alpha", "who?", "a b#c"] {
        let session = server.session(user_id);
        let story = session
            .create(StoryContent::image("https://cdn.example.com/r.png"))
            .await
            .unwrap();
        assert_eq!(story.owner.id, user_id);

        let listed = api.list(Category::Own, user_id).await.unwrap();
        assert_eq!(listed.value.len(), 1, "listing for {user_id:?}");
        assert_eq!(listed.value[0].id, story.id);

        session.delete(&story.id).await.unwrap();
        assert!(api.list(Category::Own, user_id).await.unwrap().value.is_empty());
    }
}
