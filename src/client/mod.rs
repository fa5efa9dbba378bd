//! Client-side story core.
//!
//! This module provides:
//! - The [`StoryApi`] seam and its reqwest implementation
//! - [`StoryCache`], a reducer-style materialized view with optimistic overlay
//! - Pure view-model selectors over a cache snapshot
//! - [`StorySession`], which serializes cache mutations around network calls

mod cache;
mod http;
pub mod selectors;
mod session;

pub use cache::{
    CachedStory, LoadError, LoadOutcome, LoadTicket, ReconcileOutcome, StoryCache, StoryPhase,
};
pub use http::HttpStoryApi;
pub use selectors::{OwnerStories, StoryFeed};
pub use session::{StorySession, ViewOutcome};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::error::StoryResult;
use crate::story::{Story, StoryContent};

/// Cache partition a story belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Category {
    /// Stories authored by the session user
    Own,
    /// Stories from accounts the session user follows
    Following,
}

impl Category {
    pub const ALL: [Category; 2] = [Category::Own, Category::Following];
}

/// An authoritative server response and the instant the server acknowledged it
#[derive(Debug, Clone, PartialEq)]
pub struct Ack<T> {
    pub value: T,
    pub acked_at: DateTime<Utc>,
}

impl<T> Ack<T> {
    pub fn new(value: T, acked_at: DateTime<Utc>) -> Self {
        Self { value, acked_at }
    }
}

/// Operations the client needs from the story server
#[async_trait]
pub trait StoryApi: Send + Sync {
    /// Active stories for a category, as seen by `user_id`
    async fn list(&self, category: Category, user_id: &str) -> StoryResult<Ack<Vec<Story>>>;

    async fn create(&self, owner_id: &str, content: &StoryContent) -> StoryResult<Ack<Story>>;

    async fn record_view(&self, story_id: &str, viewer_id: &str) -> StoryResult<Ack<Story>>;

    async fn delete(&self, story_id: &str, requester_id: &str) -> StoryResult<Ack<()>>;
}

#[async_trait]
impl<T: StoryApi + ?Sized> StoryApi for Arc<T> {
    async fn list(&self, category: Category, user_id: &str) -> StoryResult<Ack<Vec<Story>>> {
        (**self).list(category, user_id).await
    }

    async fn create(&self, owner_id: &str, content: &StoryContent) -> StoryResult<Ack<Story>> {
        (**self).create(owner_id, content).await
    }

    async fn record_view(&self, story_id: &str, viewer_id: &str) -> StoryResult<Ack<Story>> {
        (**self).record_view(story_id, viewer_id).await
    }

    async fn delete(&self, story_id: &str, requester_id: &str) -> StoryResult<Ack<()>> {
        (**self).delete(story_id, requester_id).await
    }
}
