//! Storage module for persistent story documents using Sled.
//!
//! Stories, their view ledger, the follow graph and user summaries each live
//! in their own sled tree. Values are bincode-encoded; composite keys are
//! NUL-separated so prefix scans stay within one owner/story/follower.

mod ledger;
mod sled_store;
mod sweeper;

pub use ledger::ViewLedger;
pub use sled_store::{StorageError, StorageResult, StorageStats, StoryStore};
pub use sweeper::{ExpirySweeper, SweepReport};

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use crate::story::{is_active, Story, StoryContent, StoryId, UserId, UserSummary};

/// Key separator for composite keys
const SEP: char = '\0';

/// Persisted story record. Holds exactly the document fields; viewers are
/// stored in the ledger tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoryDocument {
    #[serde(rename = "_id")]
    pub id: StoryId,
    #[serde(rename = "userId")]
    pub user_id: UserId,
    pub content: StoryContent,
    #[serde(rename = "createdAt")]
    pub created_at: DateTime<Utc>,
    #[serde(rename = "expiresAt")]
    pub expires_at: DateTime<Utc>,
}

impl StoryDocument {
    pub fn new(
        user_id: impl Into<String>,
        content: StoryContent,
        created_at: DateTime<Utc>,
        ttl: Duration,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            user_id: user_id.into(),
            content,
            created_at,
            expires_at: created_at
                .checked_add_signed(ttl)
                .unwrap_or(DateTime::<Utc>::MAX_UTC),
        }
    }

    pub fn is_active_at(&self, now: DateTime<Utc>) -> bool {
        is_active(self.expires_at, now)
    }

    /// Key in the owner index, ordered by creation time
    pub(crate) fn owner_key(&self) -> String {
        owner_index_key(&self.user_id, self.created_at, &self.id)
    }

    /// Key in the expiry index, ordered by expiry time
    pub(crate) fn expiry_key(&self) -> String {
        expiry_index_key(self.expires_at, &self.id)
    }

    /// Join the owner summary and ledger viewers into a served story
    pub fn into_story(self, owner: UserSummary, viewers: BTreeSet<UserId>) -> Story {
        Story {
            id: self.id,
            owner,
            content: self.content,
            created_at: self.created_at,
            expires_at: self.expires_at,
            viewers,
        }
    }
}

/// Tombstone kept after expiry for audit until the purge grace period ends
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArchivedStory {
    pub document: StoryDocument,
    pub archived_at: DateTime<Utc>,
}

/// Configuration for the storage layer
#[derive(Debug, Clone)]
pub struct StorageConfig {
    /// Path to the Sled database directory
    pub path: String,
    /// Cache size in bytes (default: 256MB)
    pub cache_size: u64,
    /// Flush interval in milliseconds (0 = only on explicit flush)
    pub flush_interval_ms: u64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            path: "./data/stories.sled".to_string(),
            cache_size: 256 * 1024 * 1024,
            flush_interval_ms: 500,
        }
    }
}

impl StorageConfig {
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            ..Default::default()
        }
    }

    pub fn with_cache_size(mut self, size: u64) -> Self {
        self.cache_size = size;
        self
    }

    pub fn with_flush_interval(mut self, ms: u64) -> Self {
        self.flush_interval_ms = ms;
        self
    }
}

fn millis(at: DateTime<Utc>) -> i64 {
    at.timestamp_millis().max(0)
}

pub(crate) fn owner_index_key(user_id: &str, created_at: DateTime<Utc>, story_id: &str) -> String {
    format!("{}{SEP}{:020}{SEP}{}", user_id, millis(created_at), story_id)
}

pub(crate) fn expiry_index_key(expires_at: DateTime<Utc>, story_id: &str) -> String {
    format!("{:020}{SEP}{}", millis(expires_at), story_id)
}

/// Exclusive upper bound for expiry keys at or before `now`
pub(crate) fn expiry_index_upper_bound(now: DateTime<Utc>) -> String {
    // NUL sorts first, so the next millisecond's prefix bounds every key at `now`
    format!("{:020}{SEP}", millis(now) + 1)
}

pub(crate) fn pair_key(left: &str, right: &str) -> String {
    format!("{}{SEP}{}", left, right)
}

pub(crate) fn prefix(id: &str) -> String {
    format!("{}{SEP}", id)
}

/// Last NUL-separated segment of a composite key
pub(crate) fn last_segment(key: &[u8]) -> String {
    let key = String::from_utf8_lossy(key);
    key.rsplit(SEP).next().unwrap_or_default().to_string()
}
