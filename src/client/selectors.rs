//! View-model selectors.
//!
//! Pure functions over a cache snapshot. They never mutate the cache and the
//! same cache always yields the same output, so a UI can recompute them on
//! every change and compare by value.

use chrono::{DateTime, Utc};
use std::collections::BTreeMap;

use super::cache::{CachedStory, LoadError, StoryCache};
use super::Category;
use crate::story::{Story, UserSummary};

/// One owner's stories, newest first
#[derive(Debug, Clone, PartialEq)]
pub struct OwnerStories {
    pub owner: UserSummary,
    pub stories: Vec<Story>,
    /// Stories in this group the session user has not viewed
    pub unviewed: usize,
}

impl OwnerStories {
    /// Creation time of the newest story in the group
    pub fn latest_at(&self) -> Option<DateTime<Utc>> {
        self.stories.first().map(|s| s.created_at)
    }

    pub fn all_viewed(&self) -> bool {
        self.unviewed == 0
    }
}

/// Group a category by owner.
///
/// Stories inside a group run newest first; groups are ordered by their
/// newest story, ties broken by owner id.
pub fn stories_by_owner(cache: &StoryCache, category: Category) -> Vec<OwnerStories> {
    let user_id = cache.user_id();
    let mut groups: BTreeMap<&str, Vec<&Story>> = BTreeMap::new();
    for entry in cache.stories(category) {
        groups.entry(entry.story.owner_id()).or_default().push(&entry.story);
    }

    let mut grouped: Vec<OwnerStories> = groups
        .into_values()
        .map(|mut stories| {
            stories.sort_by(|a, b| {
                b.created_at
                    .cmp(&a.created_at)
                    .then_with(|| a.id.cmp(&b.id))
            });
            let unviewed = stories
                .iter()
                .filter(|s| s.owner_id() != user_id && !s.has_viewed(user_id))
                .count();
            OwnerStories {
                owner: stories[0].owner.clone(),
                stories: stories.into_iter().cloned().collect(),
                unviewed,
            }
        })
        .collect();

    grouped.sort_by(|a, b| {
        b.latest_at()
            .cmp(&a.latest_at())
            .then_with(|| a.owner.id.cmp(&b.owner.id))
    });
    grouped
}

/// Following stories the session user has not viewed, optimistic views included
pub fn unviewed_count(cache: &StoryCache) -> usize {
    let user_id = cache.user_id();
    cache
        .stories(Category::Following)
        .filter(|entry| !entry.story.has_viewed(user_id))
        .count()
}

pub fn find_story<'a>(cache: &'a StoryCache, story_id: &str) -> Option<&'a CachedStory> {
    cache.get(story_id)
}

/// Everything a story tray needs, derived from one cache snapshot
#[derive(Debug, Clone, PartialEq)]
pub struct StoryFeed {
    /// Cache version the feed was derived from
    pub version: u64,
    pub own: Vec<OwnerStories>,
    pub following: Vec<OwnerStories>,
    pub unviewed: usize,
    pub own_error: Option<LoadError>,
    pub following_error: Option<LoadError>,
}

impl StoryFeed {
    pub fn from_cache(cache: &StoryCache) -> Self {
        Self {
            version: cache.version(),
            own: stories_by_owner(cache, Category::Own),
            following: stories_by_owner(cache, Category::Following),
            unviewed: unviewed_count(cache),
            own_error: cache.load_error(Category::Own).cloned(),
            following_error: cache.load_error(Category::Following).cloned(),
        }
    }

    pub fn has_error(&self) -> bool {
        self.own_error.is_some() || self.following_error.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::Ack;
    use crate::error::StoryError;
    use crate::story::StoryContent;
    use chrono::Duration;
    use std::collections::BTreeSet;

    fn t0() -> DateTime<Utc> {
        DateTime::from_timestamp(1_700_000_000, 0).unwrap()
    }

    fn story(id: &str, owner: &str, minutes: i64) -> Story {
        let created_at = t0() + Duration::minutes(minutes);
        Story {
            id: id.to_string(),
            owner: UserSummary::unknown(owner),
            content: StoryContent::image("https://cdn.example.com/p.png"),
            created_at,
            expires_at: created_at + Duration::hours(24),
            viewers: BTreeSet::new(),
        }
    }

    fn following_cache(stories: Vec<Story>) -> StoryCache {
        let mut cache = StoryCache::new("bob");
        let ticket = cache.begin_load(Category::Following);
        let now = t0() + Duration::hours(1);
        cache.apply_load(ticket, Ack::new(stories, now), now);
        cache
    }

    #[test]
    fn test_grouping_order() {
        let cache = following_cache(vec![
            story("a1", "alice", 0),
            story("c1", "carol", 10),
            story("a2", "alice", 20),
        ]);

        let groups = stories_by_owner(&cache, Category::Following);
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].owner.id, "alice");
        let ids: Vec<&str> = groups[0].stories.iter().map(|s| s.id.as_str()).collect();
        assert_eq!(ids, vec!["a2", "a1"]);
        assert_eq!(groups[1].owner.id, "carol");

        assert!(stories_by_owner(&cache, Category::Own).is_empty());
    }

    #[test]
    fn test_unviewed_tracks_optimistic_views() {
        let mut cache = following_cache(vec![story("a1", "alice", 0), story("a2", "alice", 5)]);
        assert_eq!(unviewed_count(&cache), 2);

        cache
            .mark_viewed_optimistic("a1", "bob", t0() + Duration::hours(1))
            .unwrap();
        assert_eq!(unviewed_count(&cache), 1);
        assert_eq!(stories_by_owner(&cache, Category::Following)[0].unviewed, 1);

        cache.fail_view("a1", "bob", &StoryError::Network("offline".into()));
        assert_eq!(unviewed_count(&cache), 2);
    }

    #[test]
    fn test_selectors_are_pure() {
        let cache = following_cache(vec![story("a1", "alice", 0), story("c1", "carol", 0)]);
        let version = cache.version();

        let first = StoryFeed::from_cache(&cache);
        let second = StoryFeed::from_cache(&cache);
        assert_eq!(first, second);
        assert_eq!(cache.version(), version);
        assert_eq!(first.following[0].owner.id, "alice");
        assert!(!first.has_error());

        assert!(find_story(&cache, "c1").is_some());
        assert!(find_story(&cache, "zz").is_none());
    }
}
