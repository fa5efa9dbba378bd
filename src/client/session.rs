//! Story session: one user's cache wired to a [`StoryApi`].
//!
//! Cache mutations happen under a short `parking_lot` lock that is never held
//! across an `.await`. After every mutation the derived [`StoryFeed`] is
//! published on a watch channel, so subscribers always see a consistent
//! snapshot.

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use super::cache::{LoadOutcome, StoryCache};
use super::selectors::StoryFeed;
use super::{Category, StoryApi};
use crate::clock::Clock;
use crate::error::{StoryError, StoryResult};
use crate::story::{Story, StoryContent};

/// Result of [`StorySession::view`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ViewOutcome {
    /// The server recorded the view
    Recorded,
    /// Own story, or already viewed; no request was sent
    Skipped,
    /// The story is gone, expired or deleted, and is no longer cached
    Expired,
}

pub struct StorySession<A: StoryApi> {
    api: A,
    clock: Arc<dyn Clock>,
    cache: Mutex<StoryCache>,
    feed_tx: watch::Sender<Arc<StoryFeed>>,
}

impl<A: StoryApi> StorySession<A> {
    pub fn new(api: A, cache: StoryCache, clock: Arc<dyn Clock>) -> Self {
        let (feed_tx, _) = watch::channel(Arc::new(StoryFeed::from_cache(&cache)));
        Self {
            api,
            clock,
            cache: Mutex::new(cache),
            feed_tx,
        }
    }

    pub fn user_id(&self) -> String {
        self.cache.lock().user_id().to_string()
    }

    /// Latest published feed
    pub fn feed(&self) -> Arc<StoryFeed> {
        self.feed_tx.borrow().clone()
    }

    /// Receive every feed published from now on
    pub fn subscribe(&self) -> watch::Receiver<Arc<StoryFeed>> {
        self.feed_tx.subscribe()
    }

    /// Copy of the current cache
    pub fn snapshot(&self) -> StoryCache {
        self.cache.lock().clone()
    }

    /// Apply a reducer call and publish the resulting feed. Publishing
    /// happens under the cache lock so feeds go out in version order.
    fn mutate<R>(&self, f: impl FnOnce(&mut StoryCache) -> R) -> R {
        let mut cache = self.cache.lock();
        let before = cache.version();
        let result = f(&mut cache);
        if cache.version() != before {
            self.feed_tx.send_replace(Arc::new(StoryFeed::from_cache(&cache)));
        }
        result
    }

    /// Fetch one category and apply it. A failed fetch leaves the cached
    /// stories in place and sets the category's error flag.
    pub async fn load(&self, category: Category) -> StoryResult<LoadOutcome> {
        let (ticket, user_id) = self.mutate(|c| (c.begin_load(category), c.user_id().to_string()));

        match self.api.list(category, &user_id).await {
            Ok(ack) => {
                let now = self.clock.now();
                let outcome = self.mutate(|c| c.apply_load(ticket, ack, now));
                debug!("{:?} load #{}: {:?}", category, ticket.seq, outcome);
                Ok(outcome)
            }
            Err(err) => {
                self.mutate(|c| c.record_load_error(ticket, &err));
                Err(err)
            }
        }
    }

    /// Load both categories. Stops at the first failure.
    pub async fn refresh(&self) -> StoryResult<()> {
        for category in Category::ALL {
            self.load(category).await?;
        }
        Ok(())
    }

    /// Mark a story viewed and confirm it with the server
    pub async fn view(&self, story_id: &str) -> StoryResult<ViewOutcome> {
        let now = self.clock.now();
        let user_id = self.user_id();

        let marked = match self.mutate(|c| c.mark_viewed_optimistic(story_id, &user_id, now)) {
            Ok(marked) => marked,
            Err(StoryError::NotFound(_)) => return Ok(ViewOutcome::Expired),
            Err(err) => return Err(err),
        };
        if !marked {
            return Ok(ViewOutcome::Skipped);
        }

        match self.api.record_view(story_id, &user_id).await {
            Ok(ack) => {
                let now = self.clock.now();
                self.mutate(|c| c.reconcile(ack, now));
                Ok(ViewOutcome::Recorded)
            }
            Err(err) => {
                self.mutate(|c| c.fail_view(story_id, &user_id, &err));
                if err.is_not_found() {
                    info!("Story {} expired before the view landed", story_id);
                    Ok(ViewOutcome::Expired)
                } else {
                    warn!("View of {} rolled back: {}", story_id, err);
                    Err(err)
                }
            }
        }
    }

    /// Publish a story, showing it immediately as pending
    pub async fn create(&self, content: StoryContent) -> StoryResult<Story> {
        let now = self.clock.now();
        let user_id = self.user_id();
        let local_id = self.mutate(|c| c.begin_create(content.clone(), now))?;

        match self.api.create(&user_id, &content).await {
            Ok(ack) => {
                let story = ack.value.clone();
                let now = self.clock.now();
                self.mutate(|c| c.confirm_create(&local_id, ack, now))?;
                info!("Published story {}", story.id);
                Ok(story)
            }
            Err(err) => {
                self.mutate(|c| c.fail_create(&local_id))?;
                Err(err)
            }
        }
    }

    /// Delete one of the session user's stories. A story the server no
    /// longer has is dropped locally as well.
    pub async fn delete(&self, story_id: &str) -> StoryResult<()> {
        let user_id = self.user_id();
        match self.api.delete(story_id, &user_id).await {
            Ok(_) => {
                self.mutate(|c| c.remove(story_id));
                Ok(())
            }
            Err(err) => {
                if err.is_not_found() {
                    self.mutate(|c| c.remove(story_id));
                }
                Err(err)
            }
        }
    }

    /// Drop stories whose expiry has passed on the local clock
    pub fn expire(&self) -> usize {
        let now = self.clock.now();
        self.mutate(|c| c.filter_expired(now))
    }
}
