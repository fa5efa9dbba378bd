//! Client story cache.
//!
//! The cache is a plain value mutated through reducer-style methods; it does
//! no I/O and reads no clock. Two rules keep it consistent with the server:
//!
//! - Authoritative records replace local ones wholesale, and only when their
//!   acknowledgment time is not older than what the cache already holds.
//!   Load results carry a per-category sequence number and a result older
//!   than the last applied load is discarded.
//! - Optimistic views are tracked as a pending set per story. Every
//!   replacement re-applies the pending viewers the server does not show yet,
//!   so a view never flips back to unviewed until it is explicitly rolled back.

use chrono::{DateTime, Duration, Utc};
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, error, warn};

use super::{Ack, Category};
use crate::config::DEFAULT_TTL_SECS;
use crate::error::{StoryError, StoryResult};
use crate::story::{Story, StoryContent, StoryId, UserId, UserSummary};

/// Prefix of ids assigned to stories that the server has not confirmed yet
const LOCAL_ID_PREFIX: &str = "local-";

/// Client-observed lifecycle of a cached story. Expired and purged stories
/// are simply absent from the cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum StoryPhase {
    /// Created locally, waiting for the server
    PendingCreate,
    /// Known to the server, not viewed by the session user
    Active,
    /// Viewed by the session user, confirmation in flight
    ViewedLocally,
    /// View confirmed by the server
    ViewedConfirmed,
}

/// A story as held by the cache
#[derive(Debug, Clone, PartialEq)]
pub struct CachedStory {
    /// Server record with pending viewers applied on top
    pub story: Story,
    pub phase: StoryPhase,
    /// Acknowledgment time of the server record, `None` while pending create
    pub acked_at: Option<DateTime<Utc>>,
    pending_views: BTreeSet<UserId>,
}

impl CachedStory {
    /// Build the cache entry for an authoritative record, carrying over the
    /// optimistic state of the entry it replaces.
    fn from_server(
        server: Story,
        acked_at: DateTime<Utc>,
        user_id: &str,
        previous: Option<&CachedStory>,
    ) -> Self {
        let mut story = server;
        let confirmed_by_server = story.viewers.contains(user_id);

        let mut pending = previous
            .map(|p| p.pending_views.clone())
            .unwrap_or_default();
        pending.retain(|viewer| !story.viewers.contains(viewer));
        story.viewers.extend(pending.iter().cloned());

        let phase = if confirmed_by_server {
            StoryPhase::ViewedConfirmed
        } else if pending.contains(user_id) {
            StoryPhase::ViewedLocally
        } else if previous.map(|p| p.phase) == Some(StoryPhase::ViewedConfirmed) {
            warn!(
                "Server record for {} no longer lists a confirmed view; keeping it",
                story.id
            );
            story.viewers.insert(user_id.to_string());
            StoryPhase::ViewedConfirmed
        } else {
            StoryPhase::Active
        };

        Self {
            story,
            phase,
            acked_at: Some(acked_at),
            pending_views: pending,
        }
    }

    /// Viewers added locally and not yet confirmed
    pub fn pending_views(&self) -> &BTreeSet<UserId> {
        &self.pending_views
    }

    pub fn is_provisional(&self) -> bool {
        self.phase == StoryPhase::PendingCreate || !self.pending_views.is_empty()
    }

    fn is_newer_than(&self, acked_at: DateTime<Utc>) -> bool {
        self.acked_at.map_or(false, |mine| mine > acked_at)
    }
}

/// Why the last load of a category failed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadError {
    pub message: String,
    /// Transport failure, as opposed to a server-side rejection
    pub network: bool,
}

/// Handle for one in-flight load
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoadTicket {
    pub category: Category,
    pub seq: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadOutcome {
    /// The result replaced the category's contents
    Applied,
    /// A newer load already landed; the result was dropped
    Superseded,
    /// The load failed; previous contents stay visible
    Failed,
}

/// Outcome of [`StoryCache::reconcile`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileOutcome {
    Applied,
    /// The cache already holds a record acknowledged later
    Stale,
    /// The server record is already past its expiry; the story was dropped
    Expired,
}

#[derive(Debug, Clone, Default)]
struct Partition {
    stories: BTreeMap<StoryId, CachedStory>,
    applied_seq: u64,
    error: Option<LoadError>,
}

/// In-memory view of the session user's own and following stories
#[derive(Debug, Clone)]
pub struct StoryCache {
    profile: UserSummary,
    ttl: Duration,
    own: Partition,
    following: Partition,
    next_seq: u64,
    version: u64,
    /// Pending creates a load already delivered, local id to server id
    absorbed: BTreeMap<StoryId, StoryId>,
}

impl StoryCache {
    pub fn new(user_id: impl Into<String>) -> Self {
        let user_id = user_id.into();
        Self {
            profile: UserSummary::unknown(&user_id),
            ttl: Duration::seconds(DEFAULT_TTL_SECS),
            own: Partition::default(),
            following: Partition::default(),
            next_seq: 0,
            version: 0,
            absorbed: BTreeMap::new(),
        }
    }

    /// Summary used as owner of locally created stories
    pub fn with_profile(mut self, profile: UserSummary) -> Self {
        self.profile = profile;
        self
    }

    /// Lifetime assumed for locally created stories until the server answers
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    pub fn user_id(&self) -> &str {
        &self.profile.id
    }

    /// Incremented on every visible mutation
    pub fn version(&self) -> u64 {
        self.version
    }

    // ------------------------------------------------------------------
    // Reads
    // ------------------------------------------------------------------

    pub fn get(&self, story_id: &str) -> Option<&CachedStory> {
        self.own
            .stories
            .get(story_id)
            .or_else(|| self.following.stories.get(story_id))
    }

    pub fn stories(&self, category: Category) -> impl Iterator<Item = &CachedStory> {
        self.partition(category).stories.values()
    }

    /// Stories of both categories that are active at `now`
    pub fn get_active_stories(&self, now: DateTime<Utc>) -> Vec<&Story> {
        Category::ALL
            .iter()
            .flat_map(|c| self.stories(*c))
            .map(|entry| &entry.story)
            .filter(|story| story.is_active_at(now))
            .collect()
    }

    /// Error flag of the last failed load, cleared by the next applied one
    pub fn load_error(&self, category: Category) -> Option<&LoadError> {
        self.partition(category).error.as_ref()
    }

    pub fn len(&self) -> usize {
        self.own.stories.len() + self.following.stories.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    // ------------------------------------------------------------------
    // Loads
    // ------------------------------------------------------------------

    /// Reserve a sequence number for a load that is about to be issued
    pub fn begin_load(&mut self, category: Category) -> LoadTicket {
        self.next_seq += 1;
        LoadTicket {
            category,
            seq: self.next_seq,
        }
    }

    /// Replace a category with a successful load result
    pub fn apply_load(&mut self, ticket: LoadTicket, ack: Ack<Vec<Story>>, now: DateTime<Utc>) -> LoadOutcome {
        let user_id = self.profile.id.clone();
        let partition = self.partition_mut(ticket.category);

        if ticket.seq <= partition.applied_seq {
            debug!("Discarding superseded {:?} load #{}", ticket.category, ticket.seq);
            return LoadOutcome::Superseded;
        }
        partition.applied_seq = ticket.seq;
        partition.error = None;

        let acked_at = ack.acked_at;
        let mut previous = std::mem::take(&mut partition.stories);
        let mut next = BTreeMap::new();
        let mut unseen = Vec::new();

        for story in ack.value {
            if !story.is_active_at(now) {
                continue;
            }
            let entry = match previous.remove(&story.id) {
                Some(existing) if existing.is_newer_than(acked_at) => existing,
                existing => {
                    if existing.is_none() {
                        unseen.push(story.id.clone());
                    }
                    CachedStory::from_server(story, acked_at, &user_id, existing.as_ref())
                }
            };
            next.insert(entry.story.id.clone(), entry);
        }

        // Entries the load does not know about survive only if they are
        // newer than it: unconfirmed creates, or records acknowledged later.
        // A pending create the load already returned gives way to the
        // server record.
        let mut absorbed = Vec::new();
        for (id, existing) in previous {
            if existing.phase == StoryPhase::PendingCreate {
                let delivered = unseen.iter().position(|server_id| {
                    next.get(server_id)
                        .map_or(false, |loaded: &CachedStory| same_story(&loaded.story, &existing.story))
                });
                if let Some(index) = delivered {
                    let server_id = unseen.remove(index);
                    debug!("Load delivered pending create {} as {}", id, server_id);
                    absorbed.push((id, server_id));
                    continue;
                }
            }
            let keep = existing.phase == StoryPhase::PendingCreate || existing.is_newer_than(acked_at);
            if keep && existing.story.is_active_at(now) {
                next.insert(id, existing);
            }
        }

        partition.stories = next;
        self.absorbed.extend(absorbed);
        self.version += 1;
        LoadOutcome::Applied
    }

    /// Record a failed load; the previous contents stay as they are
    pub fn record_load_error(&mut self, ticket: LoadTicket, err: &StoryError) -> LoadOutcome {
        let partition = self.partition_mut(ticket.category);
        if ticket.seq <= partition.applied_seq {
            return LoadOutcome::Superseded;
        }

        warn!("{:?} load #{} failed: {}", ticket.category, ticket.seq, err);
        partition.error = Some(LoadError {
            message: err.to_string(),
            network: err.is_network(),
        });
        self.version += 1;
        LoadOutcome::Failed
    }

    // ------------------------------------------------------------------
    // Views
    // ------------------------------------------------------------------

    /// Mark a story viewed before the server confirms it.
    ///
    /// Returns `Ok(false)` when there is nothing to do: the viewer owns the
    /// story or has already viewed it. A story found expired at `now` is
    /// dropped and reported as not found.
    pub fn mark_viewed_optimistic(&mut self, story_id: &str, viewer_id: &str, now: DateTime<Utc>) -> StoryResult<bool> {
        let user_id = self.profile.id.clone();
        let Some(entry) = self.entry_mut(story_id) else {
            return Err(StoryError::NotFound(story_id.to_string()));
        };

        if !entry.story.is_active_at(now) {
            self.remove(story_id);
            return Err(StoryError::NotFound(story_id.to_string()));
        }
        if entry.phase == StoryPhase::PendingCreate {
            return Err(StoryError::InvalidTransition(format!(
                "story {} is not confirmed yet",
                story_id
            )));
        }
        if entry.story.owner_id() == viewer_id || entry.story.has_viewed(viewer_id) {
            return Ok(false);
        }

        entry.story.viewers.insert(viewer_id.to_string());
        entry.pending_views.insert(viewer_id.to_string());
        if viewer_id == user_id {
            entry.phase = StoryPhase::ViewedLocally;
        }
        self.version += 1;
        Ok(true)
    }

    /// Undo an optimistic view after the server refused it.
    ///
    /// `NotFound` means the story expired or was deleted, so it is dropped
    /// from the cache altogether. Any other failure reverts just the pending
    /// viewer.
    pub fn fail_view(&mut self, story_id: &str, viewer_id: &str, err: &StoryError) {
        if err.is_not_found() {
            debug!("Story {} is gone server-side, dropping it", story_id);
            self.remove(story_id);
            return;
        }

        let user_id = self.profile.id.clone();
        let Some(entry) = self.entry_mut(story_id) else {
            return;
        };
        if entry.pending_views.remove(viewer_id) {
            entry.story.viewers.remove(viewer_id);
            if viewer_id == user_id && entry.phase == StoryPhase::ViewedLocally {
                entry.phase = StoryPhase::Active;
            }
            self.version += 1;
        }
    }

    // ------------------------------------------------------------------
    // Reconciliation
    // ------------------------------------------------------------------

    /// Replace a story with the server's version of it
    pub fn reconcile(&mut self, ack: Ack<Story>, now: DateTime<Utc>) -> ReconcileOutcome {
        let Ack { value: server, acked_at } = ack;

        if !server.is_active_at(now) {
            self.remove(&server.id);
            return ReconcileOutcome::Expired;
        }

        let user_id = self.profile.id.clone();
        let category = self
            .category_of(&server.id)
            .unwrap_or_else(|| self.category_for_owner(server.owner_id()));
        let partition = self.partition_mut(category);

        let previous = partition.stories.get(&server.id);
        if previous.map_or(false, |p| p.is_newer_than(acked_at)) {
            debug!("Ignoring stale record for {} acked at {}", server.id, acked_at);
            return ReconcileOutcome::Stale;
        }

        let entry = CachedStory::from_server(server, acked_at, &user_id, previous);
        partition.stories.insert(entry.story.id.clone(), entry);
        self.version += 1;
        ReconcileOutcome::Applied
    }

    // ------------------------------------------------------------------
    // Creates
    // ------------------------------------------------------------------

    /// Insert a provisional story authored by the session user. Returns the
    /// local id to confirm or fail it with.
    pub fn begin_create(&mut self, content: StoryContent, now: DateTime<Utc>) -> StoryResult<StoryId> {
        content.validate()?;

        let local_id = format!("{}{}", LOCAL_ID_PREFIX, uuid::Uuid::new_v4());
        let story = Story {
            id: local_id.clone(),
            owner: self.profile.clone(),
            content,
            created_at: now,
            expires_at: now
                .checked_add_signed(self.ttl)
                .unwrap_or(DateTime::<Utc>::MAX_UTC),
            viewers: BTreeSet::new(),
        };

        self.own.stories.insert(
            local_id.clone(),
            CachedStory {
                story,
                phase: StoryPhase::PendingCreate,
                acked_at: None,
                pending_views: BTreeSet::new(),
            },
        );
        self.version += 1;
        Ok(local_id)
    }

    /// Swap a provisional story for the record the server created
    pub fn confirm_create(&mut self, local_id: &str, ack: Ack<Story>, now: DateTime<Utc>) -> StoryResult<()> {
        if self.absorbed.remove(local_id).is_none() {
            self.take_pending_create(local_id)?;
        }
        self.reconcile(ack, now);
        Ok(())
    }

    /// Drop a provisional story the server refused
    pub fn fail_create(&mut self, local_id: &str) -> StoryResult<()> {
        if let Some(server_id) = self.absorbed.remove(local_id) {
            warn!("Create {} failed but a load already returned it as {}", local_id, server_id);
            return Ok(());
        }
        self.take_pending_create(local_id)?;
        self.version += 1;
        Ok(())
    }

    fn take_pending_create(&mut self, local_id: &str) -> StoryResult<CachedStory> {
        match self.own.stories.get(local_id) {
            Some(entry) if entry.phase == StoryPhase::PendingCreate => {}
            Some(entry) => {
                error!("Story {} is {:?}, not pending create", local_id, entry.phase);
                return Err(StoryError::InvalidTransition(format!(
                    "story {} is not pending create",
                    local_id
                )));
            }
            None => {
                error!("No pending create {}", local_id);
                return Err(StoryError::InvalidTransition(format!(
                    "no pending create {}",
                    local_id
                )));
            }
        }
        self.own
            .stories
            .remove(local_id)
            .ok_or_else(|| StoryError::InvalidTransition(format!("no pending create {}", local_id)))
    }

    // ------------------------------------------------------------------
    // Removal
    // ------------------------------------------------------------------

    /// Drop every story whose expiry has passed. Returns how many went.
    pub fn filter_expired(&mut self, now: DateTime<Utc>) -> usize {
        let mut removed = 0;
        for partition in [&mut self.own, &mut self.following] {
            let before = partition.stories.len();
            partition.stories.retain(|_, entry| entry.story.is_active_at(now));
            removed += before - partition.stories.len();
        }
        if removed > 0 {
            debug!("Dropped {} expired stories from cache", removed);
            self.version += 1;
        }
        removed
    }

    /// Drop a story, e.g. after a confirmed delete. Returns whether it was cached.
    pub fn remove(&mut self, story_id: &str) -> bool {
        let removed = self.own.stories.remove(story_id).is_some()
            | self.following.stories.remove(story_id).is_some();
        if removed {
            self.version += 1;
        }
        removed
    }

    // ------------------------------------------------------------------
    // Helpers
    // ------------------------------------------------------------------

    fn partition(&self, category: Category) -> &Partition {
        match category {
            Category::Own => &self.own,
            Category::Following => &self.following,
        }
    }

    fn partition_mut(&mut self, category: Category) -> &mut Partition {
        match category {
            Category::Own => &mut self.own,
            Category::Following => &mut self.following,
        }
    }

    fn category_of(&self, story_id: &str) -> Option<Category> {
        Category::ALL
            .into_iter()
            .find(|c| self.partition(*c).stories.contains_key(story_id))
    }

    fn category_for_owner(&self, owner_id: &str) -> Category {
        if owner_id == self.profile.id {
            Category::Own
        } else {
            Category::Following
        }
    }

    fn entry_mut(&mut self, story_id: &str) -> Option<&mut CachedStory> {
        let category = self.category_of(story_id)?;
        self.partition_mut(category).stories.get_mut(story_id)
    }
}

/// Whether a loaded record is the server's copy of a local pending create
fn same_story(loaded: &Story, pending: &Story) -> bool {
    loaded.owner_id() == pending.owner_id() && loaded.content == pending.content
}

#[cfg(test)]
mod tests {
    use super::*;

    fn t0() -> DateTime<Utc> {
        DateTime::from_timestamp(1_700_000_000, 0).unwrap()
    }

    fn story(id: &str, owner: &str, created_at: DateTime<Utc>) -> Story {
        Story {
            id: id.to_string(),
            owner: UserSummary::unknown(owner),
            content: StoryContent::image(format!("https://cdn.example.com/{}.png", id)),
            created_at,
            expires_at: created_at + Duration::hours(24),
            viewers: BTreeSet::new(),
        }
    }

    fn viewed_by(mut s: Story, viewer: &str) -> Story {
        s.viewers.insert(viewer.to_string());
        s
    }

    fn loaded(stories: Vec<Story>, at: DateTime<Utc>) -> StoryCache {
        let mut cache = StoryCache::new("bob");
        let ticket = cache.begin_load(Category::Following);
        assert_eq!(cache.apply_load(ticket, Ack::new(stories, at), at), LoadOutcome::Applied);
        cache
    }

    #[test]
    fn test_load_replaces_category() {
        let now = t0();
        let mut cache = loaded(vec![story("s1", "alice", now), story("s2", "alice", now)], now);
        assert_eq!(cache.len(), 2);

        let ticket = cache.begin_load(Category::Following);
        cache.apply_load(ticket, Ack::new(vec![story("s2", "alice", now)], now + Duration::seconds(1)), now);

        assert!(cache.get("s1").is_none());
        assert!(cache.get("s2").is_some());
    }

    #[test]
    fn test_superseded_load_is_discarded() {
        let now = t0();
        let mut cache = StoryCache::new("bob");
        let older = cache.begin_load(Category::Following);
        let newer = cache.begin_load(Category::Following);

        let fresh = Ack::new(vec![story("s2", "alice", now)], now + Duration::seconds(2));
        assert_eq!(cache.apply_load(newer, fresh, now), LoadOutcome::Applied);

        let stale = Ack::new(vec![story("s1", "alice", now)], now + Duration::seconds(1));
        assert_eq!(cache.apply_load(older, stale, now), LoadOutcome::Superseded);

        assert!(cache.get("s1").is_none());
        assert!(cache.get("s2").is_some());
    }

    #[test]
    fn test_failed_load_keeps_stale_data() {
        let now = t0();
        let mut cache = loaded(vec![story("s1", "alice", now)], now);

        let ticket = cache.begin_load(Category::Following);
        let outcome = cache.record_load_error(ticket, &StoryError::Network("connection refused".into()));

        assert_eq!(outcome, LoadOutcome::Failed);
        assert!(cache.get("s1").is_some());
        assert!(cache.load_error(Category::Following).unwrap().network);

        let ticket = cache.begin_load(Category::Following);
        cache.apply_load(ticket, Ack::new(vec![story("s1", "alice", now)], now), now);
        assert!(cache.load_error(Category::Following).is_none());
    }

    #[test]
    fn test_optimistic_view_converges_with_reconcile() {
        let now = t0();
        let server = viewed_by(story("s1", "alice", now), "bob");
        let ack_at = now + Duration::seconds(5);

        let mut optimistic = loaded(vec![story("s1", "alice", now)], now);
        assert!(optimistic.mark_viewed_optimistic("s1", "bob", now).unwrap());
        assert_eq!(optimistic.get("s1").unwrap().phase, StoryPhase::ViewedLocally);
        optimistic.reconcile(Ack::new(server.clone(), ack_at), now);

        let mut direct = loaded(vec![story("s1", "alice", now)], now);
        direct.reconcile(Ack::new(server, ack_at), now);

        assert_eq!(optimistic.get("s1"), direct.get("s1"));
        assert_eq!(direct.get("s1").unwrap().phase, StoryPhase::ViewedConfirmed);
        assert!(!direct.get("s1").unwrap().is_provisional());
    }

    #[test]
    fn test_owner_and_repeat_views_are_noops() {
        let now = t0();
        let mut cache = loaded(vec![story("s1", "alice", now)], now);

        assert!(!cache.mark_viewed_optimistic("s1", "alice", now).unwrap());
        assert!(cache.mark_viewed_optimistic("s1", "bob", now).unwrap());
        assert!(!cache.mark_viewed_optimistic("s1", "bob", now).unwrap());
        assert_eq!(cache.get("s1").unwrap().story.viewers.len(), 1);

        assert!(cache.mark_viewed_optimistic("missing", "bob", now).unwrap_err().is_not_found());
    }

    #[test]
    fn test_pending_view_survives_refresh_without_it() {
        let now = t0();
        let mut cache = loaded(vec![story("s1", "alice", now)], now);
        cache.mark_viewed_optimistic("s1", "bob", now).unwrap();

        // A refresh that raced ahead of the view request
        let ticket = cache.begin_load(Category::Following);
        cache.apply_load(ticket, Ack::new(vec![story("s1", "alice", now)], now + Duration::seconds(1)), now);

        let entry = cache.get("s1").unwrap();
        assert!(entry.story.has_viewed("bob"));
        assert_eq!(entry.phase, StoryPhase::ViewedLocally);
    }

    #[test]
    fn test_out_of_order_view_responses() {
        let now = t0();
        let mut cache = loaded(vec![story("s1", "alice", now)], now);
        cache.mark_viewed_optimistic("s1", "bob", now).unwrap();

        // Refresh acknowledged after both view requests were processed
        let ticket = cache.begin_load(Category::Following);
        let refreshed = viewed_by(story("s1", "alice", now), "bob");
        cache.apply_load(ticket, Ack::new(vec![refreshed], now + Duration::seconds(10)), now);

        // Both view responses arrive late, second one first
        let late = viewed_by(story("s1", "alice", now), "bob");
        assert_eq!(
            cache.reconcile(Ack::new(late.clone(), now + Duration::seconds(4)), now),
            ReconcileOutcome::Stale
        );
        assert_eq!(
            cache.reconcile(Ack::new(late, now + Duration::seconds(3)), now),
            ReconcileOutcome::Stale
        );

        let entry = cache.get("s1").unwrap();
        assert_eq!(entry.story.viewers.iter().filter(|v| *v == "bob").count(), 1);
        assert_eq!(entry.phase, StoryPhase::ViewedConfirmed);
        assert_eq!(entry.acked_at, Some(now + Duration::seconds(10)));
    }

    #[test]
    fn test_reconcile_with_expired_snapshot_drops_story() {
        let now = t0();
        let mut cache = loaded(vec![story("s1", "alice", now)], now);

        let later = now + Duration::hours(24);
        let outcome = cache.reconcile(Ack::new(story("s1", "alice", now), later), later);

        assert_eq!(outcome, ReconcileOutcome::Expired);
        assert!(cache.get_active_stories(later).is_empty());
        assert!(cache.is_empty());
    }

    #[test]
    fn test_failed_view_rollback() {
        let now = t0();
        let mut cache = loaded(vec![story("s1", "alice", now), story("s2", "alice", now)], now);

        cache.mark_viewed_optimistic("s1", "bob", now).unwrap();
        cache.fail_view("s1", "bob", &StoryError::Network("timeout".into()));
        let entry = cache.get("s1").unwrap();
        assert!(!entry.story.has_viewed("bob"));
        assert_eq!(entry.phase, StoryPhase::Active);

        cache.mark_viewed_optimistic("s2", "bob", now).unwrap();
        cache.fail_view("s2", "bob", &StoryError::NotFound("s2".into()));
        assert!(cache.get("s2").is_none());
    }

    #[test]
    fn test_filter_expired_and_remove() {
        let now = t0();
        let mut cache = loaded(
            vec![story("old", "alice", now), story("new", "alice", now + Duration::hours(12))],
            now + Duration::hours(12),
        );

        assert_eq!(cache.filter_expired(now + Duration::hours(23)), 0);
        assert_eq!(cache.filter_expired(now + Duration::hours(24)), 1);
        assert_eq!(cache.filter_expired(now + Duration::hours(24)), 0);
        assert!(cache.get("new").is_some());

        let version = cache.version();
        assert!(cache.remove("new"));
        assert!(!cache.remove("new"));
        assert_eq!(cache.version(), version + 1);
    }

    #[test]
    fn test_create_lifecycle() {
        let now = t0();
        let mut cache = StoryCache::new("alice").with_profile(UserSummary::new("alice", "Alice"));

        let local = cache.begin_create(StoryContent::image("https://x/a.png"), now).unwrap();
        let pending = cache.get(&local).unwrap();
        assert_eq!(pending.phase, StoryPhase::PendingCreate);
        assert_eq!(pending.story.owner.username, "Alice");

        // Loads that do not know the story yet leave it alone
        let ticket = cache.begin_load(Category::Own);
        cache.apply_load(ticket, Ack::new(vec![], now), now);
        assert!(cache.get(&local).is_some());

        let server = story("s9", "alice", now);
        cache.confirm_create(&local, Ack::new(server, now), now).unwrap();
        assert!(cache.get(&local).is_none());
        assert_eq!(cache.stories(Category::Own).count(), 1);
        assert_eq!(cache.get("s9").unwrap().phase, StoryPhase::Active);

        assert!(matches!(
            cache.confirm_create(&local, Ack::new(story("s9", "alice", now), now), now),
            Err(StoryError::InvalidTransition(_))
        ));
        assert!(matches!(cache.fail_create("s9"), Err(StoryError::InvalidTransition(_))));
    }

    #[test]
    fn test_load_delivering_pending_create_keeps_one_entry() {
        let now = t0();
        let mut cache = StoryCache::new("alice");
        let content = StoryContent::image("https://cdn.example.com/s9.png");
        let local = cache.begin_create(content.clone(), now).unwrap();

        // Own load lands before the create response
        let mut server = story("s9", "alice", now);
        server.content = content;
        let ticket = cache.begin_load(Category::Own);
        cache.apply_load(ticket, Ack::new(vec![server.clone()], now), now);

        assert_eq!(cache.stories(Category::Own).count(), 1);
        assert!(cache.get(&local).is_none());
        assert_eq!(cache.get("s9").unwrap().phase, StoryPhase::Active);

        cache.confirm_create(&local, Ack::new(server, now), now).unwrap();
        assert_eq!(cache.stories(Category::Own).count(), 1);
        assert!(matches!(
            cache.confirm_create(&local, Ack::new(story("s9", "alice", now), now), now),
            Err(StoryError::InvalidTransition(_))
        ));
    }

    #[test]
    fn test_known_story_with_same_content_does_not_absorb_create() {
        let now = t0();
        let mut cache = StoryCache::new("alice");
        let ticket = cache.begin_load(Category::Own);
        cache.apply_load(ticket, Ack::new(vec![story("s1", "alice", now)], now), now);

        // Reposting the same media
        let local = cache
            .begin_create(StoryContent::image("https://cdn.example.com/s1.png"), now)
            .unwrap();
        let ticket = cache.begin_load(Category::Own);
        cache.apply_load(ticket, Ack::new(vec![story("s1", "alice", now)], now), now);

        assert_eq!(cache.stories(Category::Own).count(), 2);
        assert_eq!(cache.get(&local).unwrap().phase, StoryPhase::PendingCreate);
    }

    #[test]
    fn test_expired_reconcile_bumps_version_once() {
        let now = t0();
        let mut cache = loaded(vec![story("s1", "alice", now)], now);
        let later = now + Duration::hours(24);

        let version = cache.version();
        cache.reconcile(Ack::new(story("s1", "alice", now), later), later);
        assert_eq!(cache.version(), version + 1);

        cache.reconcile(Ack::new(story("s2", "alice", now), later), later);
        assert_eq!(cache.version(), version + 1);
    }

    #[test]
    fn test_failed_create_is_removed() {
        let now = t0();
        let mut cache = StoryCache::new("alice");
        let local = cache.begin_create(StoryContent::video("https://x/v.mp4"), now).unwrap();
        cache.fail_create(&local).unwrap();
        assert!(cache.is_empty());

        assert!(cache.begin_create(StoryContent::video("nope"), now).is_err());
    }
}
