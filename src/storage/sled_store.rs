//! Sled-based story store.
//!
//! This module owns the authoritative story records. It supports:
//! - Story creation with TTL-derived expiry
//! - Owner and following listings that never serve expired stories
//! - Idempotent view recording, atomic with the expiry check
//! - Owner-only deletion
//! - Archiving of expired stories and their eventual purge

use chrono::{DateTime, Duration, Utc};
use sled::transaction::{ConflictableTransactionError, TransactionError};
use sled::{Db, Transactional, Tree};
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info};

use super::{
    expiry_index_upper_bound, last_segment, pair_key, prefix, ArchivedStory, StorageConfig,
    StoryDocument, ViewLedger,
};
use crate::config::MAX_POLICY_SECS;
use crate::error::{StoryError, StoryResult};
use crate::story::{validate_user_id, Story, StoryContent, StoryId, UserId, UserSummary};

/// Errors that can occur in the storage layer itself
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Sled database error: {0}")]
    Sled(#[from] sled::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] bincode::Error),

    #[error("Corruption detected in story index: {0}")]
    Corruption(String),

    #[error("Storage initialization failed: {0}")]
    InitFailed(String),
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Tree names for different data types
const TREE_STORIES: &str = "stories";
const TREE_OWNER_INDEX: &str = "stories_by_owner";
const TREE_EXPIRY_INDEX: &str = "stories_by_expiry";
const TREE_VIEWS: &str = "views";
const TREE_ARCHIVE: &str = "archive";
const TREE_FOLLOWS: &str = "follows";
const TREE_USERS: &str = "users";

/// Sled-backed store for stories, views, follows and user summaries
#[derive(Clone)]
pub struct StoryStore {
    db: Arc<Db>,
    stories: Tree,
    owner_index: Tree,
    expiry_index: Tree,
    ledger: ViewLedger,
    archive: Tree,
    follows: Tree,
    users: Tree,
    ttl: Duration,
}

impl StoryStore {
    /// Open or create a store at the configured path. Every story created
    /// through it expires `ttl` after creation.
    pub fn open(config: StorageConfig, ttl: Duration) -> StorageResult<Self> {
        if ttl <= Duration::zero() {
            return Err(StorageError::InitFailed("story TTL must be positive".into()));
        }
        if ttl > Duration::seconds(MAX_POLICY_SECS) {
            return Err(StorageError::InitFailed(format!(
                "story TTL must not exceed {} seconds",
                MAX_POLICY_SECS
            )));
        }

        let path = Path::new(&config.path);

        // Ensure parent directory exists
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                StorageError::InitFailed(format!("Failed to create directory: {}", e))
            })?;
        }

        let db = sled::Config::new()
            .path(&config.path)
            .cache_capacity(config.cache_size)
            .flush_every_ms(if config.flush_interval_ms > 0 {
                Some(config.flush_interval_ms)
            } else {
                None
            })
            .open()?;

        Ok(Self {
            stories: db.open_tree(TREE_STORIES)?,
            owner_index: db.open_tree(TREE_OWNER_INDEX)?,
            expiry_index: db.open_tree(TREE_EXPIRY_INDEX)?,
            ledger: ViewLedger::new(db.open_tree(TREE_VIEWS)?),
            archive: db.open_tree(TREE_ARCHIVE)?,
            follows: db.open_tree(TREE_FOLLOWS)?,
            users: db.open_tree(TREE_USERS)?,
            db: Arc::new(db),
            ttl,
        })
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn ledger(&self) -> &ViewLedger {
        &self.ledger
    }

    // ------------------------------------------------------------------
    // Stories
    // ------------------------------------------------------------------

    /// Create a story owned by `owner_id`, expiring one TTL after `now`
    pub fn create(&self, owner_id: &str, content: StoryContent, now: DateTime<Utc>) -> StoryResult<Story> {
        validate_user_id(owner_id)?;
        content.validate()?;

        let doc = StoryDocument::new(owner_id, content, now, self.ttl);
        let bytes = bincode::serialize(&doc)?;
        let owner_key = doc.owner_key();
        let expiry_key = doc.expiry_key();

        (&self.stories, &self.owner_index, &self.expiry_index)
            .transaction(|(stories, owner_index, expiry_index)| {
                stories.insert(doc.id.as_bytes(), bytes.as_slice())?;
                owner_index.insert(owner_key.as_bytes(), doc.id.as_bytes())?;
                expiry_index.insert(expiry_key.as_bytes(), doc.id.as_bytes())?;
                Ok::<_, ConflictableTransactionError<StoryError>>(())
            })
            .map_err(from_tx)?;

        info!("Created story {} for {} (expires {})", doc.id, owner_id, doc.expires_at);
        self.populate(doc)
    }

    /// Fetch a single active story
    pub fn get(&self, story_id: &str, now: DateTime<Utc>) -> StoryResult<Story> {
        match self.load_document(story_id)? {
            Some(doc) if doc.is_active_at(now) => self.populate(doc),
            _ => Err(StoryError::NotFound(story_id.to_string())),
        }
    }

    /// Raw persisted record, regardless of expiry
    pub fn load_document(&self, story_id: &str) -> StorageResult<Option<StoryDocument>> {
        match self.stories.get(story_id.as_bytes())? {
            Some(bytes) => Ok(Some(bincode::deserialize(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Active stories of one owner, oldest first
    pub fn get_by_owner(&self, owner_id: &str, now: DateTime<Utc>) -> StoryResult<Vec<Story>> {
        let owner = self.user(owner_id)?;
        let mut stories = Vec::new();

        for item in self.owner_index.scan_prefix(prefix(owner_id).as_bytes()) {
            let (key, story_id) = item?;
            let story_id = String::from_utf8_lossy(&story_id).to_string();

            let doc = self.load_document(&story_id)?.ok_or_else(|| {
                StorageError::Corruption(format!(
                    "owner index entry {:?} points at missing story {}",
                    String::from_utf8_lossy(&key),
                    story_id
                ))
            })?;

            if doc.is_active_at(now) {
                let viewers = self.ledger.viewers(&doc.id)?;
                stories.push(doc.into_story(owner.clone(), viewers));
            }
        }

        Ok(stories)
    }

    /// Active stories of every account `viewer_id` follows, oldest first
    pub fn get_following_stories(&self, viewer_id: &str, now: DateTime<Utc>) -> StoryResult<Vec<Story>> {
        let mut stories = Vec::new();
        for followee in self.following(viewer_id)? {
            if followee == viewer_id {
                continue;
            }
            stories.extend(self.get_by_owner(&followee, now)?);
        }
        stories.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(stories)
    }

    /// Record that `viewer_id` saw a story.
    ///
    /// Idempotent. The expiry check and the ledger insert happen in one
    /// transaction, so a view racing the sweeper is rejected with `NotFound`
    /// rather than landing on an expired record. Owners viewing their own
    /// story are not recorded.
    pub fn record_view(&self, story_id: &str, viewer_id: &str, now: DateTime<Utc>) -> StoryResult<Story> {
        validate_user_id(viewer_id)?;

        let (doc, inserted) = (&self.stories, self.ledger.tree())
            .transaction(|(stories, views)| {
                let bytes = stories
                    .get(story_id.as_bytes())?
                    .ok_or_else(|| abort(StoryError::NotFound(story_id.to_string())))?;
                let doc: StoryDocument =
                    bincode::deserialize(&bytes).map_err(|e| abort(StoryError::from(e)))?;

                if !doc.is_active_at(now) {
                    return Err(abort(StoryError::NotFound(story_id.to_string())));
                }
                if doc.user_id == viewer_id {
                    return Ok((doc, false));
                }

                let inserted = ViewLedger::add_in(views, story_id, viewer_id, now)?;
                Ok((doc, inserted))
            })
            .map_err(from_tx)?;

        if inserted {
            debug!("Recorded view of {} by {}", story_id, viewer_id);
        }
        self.populate(doc)
    }

    /// Delete a story on behalf of its owner. Expired stories still awaiting
    /// purge can be deleted too.
    pub fn delete(&self, story_id: &str, requester_id: &str) -> StoryResult<()> {
        let removed = (&self.stories, &self.owner_index, &self.expiry_index)
            .transaction(|(stories, owner_index, expiry_index)| {
                let Some(bytes) = stories.get(story_id.as_bytes())? else {
                    return Ok(false);
                };
                let doc: StoryDocument =
                    bincode::deserialize(&bytes).map_err(|e| abort(StoryError::from(e)))?;

                if doc.user_id != requester_id {
                    return Err(abort(forbidden(story_id, requester_id)));
                }

                stories.remove(story_id.as_bytes())?;
                owner_index.remove(doc.owner_key().as_bytes())?;
                expiry_index.remove(doc.expiry_key().as_bytes())?;
                Ok(true)
            })
            .map_err(from_tx)?;

        if !removed {
            let archived = self
                .load_archived(story_id)?
                .ok_or_else(|| StoryError::NotFound(story_id.to_string()))?;
            if archived.document.user_id != requester_id {
                return Err(forbidden(story_id, requester_id));
            }
            self.archive.remove(story_id.as_bytes())?;
        }

        let views = self.ledger.remove_story(story_id)?;
        info!("Deleted story {} ({} views dropped)", story_id, views);
        Ok(())
    }

    // ------------------------------------------------------------------
    // Expiry support
    // ------------------------------------------------------------------

    /// Ids whose expiry index entry is at or before `now`
    pub fn expired_candidates(&self, now: DateTime<Utc>) -> StorageResult<Vec<StoryId>> {
        let upper = expiry_index_upper_bound(now);
        let mut ids = Vec::new();
        for item in self.expiry_index.range(..upper.as_bytes()) {
            let (key, _) = item?;
            ids.push(last_segment(&key));
        }
        Ok(ids)
    }

    /// Move one story from the active trees into the archive if, and only if,
    /// it is still present and expired at `now`. Returns whether it moved.
    pub fn archive_if_expired(&self, story_id: &str, now: DateTime<Utc>) -> StoryResult<bool> {
        let moved = (&self.stories, &self.owner_index, &self.expiry_index, &self.archive)
            .transaction(|(stories, owner_index, expiry_index, archive)| {
                let Some(bytes) = stories.get(story_id.as_bytes())? else {
                    return Ok(false);
                };
                let doc: StoryDocument =
                    bincode::deserialize(&bytes).map_err(|e| abort(StoryError::from(e)))?;

                if doc.is_active_at(now) {
                    return Ok(false);
                }

                let tombstone = ArchivedStory {
                    document: doc.clone(),
                    archived_at: now,
                };
                let tombstone = bincode::serialize(&tombstone).map_err(|e| abort(StoryError::from(e)))?;

                stories.remove(story_id.as_bytes())?;
                owner_index.remove(doc.owner_key().as_bytes())?;
                expiry_index.remove(doc.expiry_key().as_bytes())?;
                archive.insert(story_id.as_bytes(), tombstone)?;
                Ok(true)
            })
            .map_err(from_tx)?;
        Ok(moved)
    }

    fn load_archived(&self, story_id: &str) -> StorageResult<Option<ArchivedStory>> {
        match self.archive.get(story_id.as_bytes())? {
            Some(bytes) => Ok(Some(bincode::deserialize(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Every archived tombstone
    pub fn archived(&self) -> StorageResult<Vec<ArchivedStory>> {
        let mut out = Vec::new();
        for item in self.archive.iter() {
            let (_, bytes) = item?;
            out.push(bincode::deserialize(&bytes)?);
        }
        Ok(out)
    }

    /// Archived stories of one owner, kept for audit until purged
    pub fn archived_by_owner(&self, owner_id: &str) -> StorageResult<Vec<ArchivedStory>> {
        let mut out: Vec<ArchivedStory> = self
            .archived()?
            .into_iter()
            .filter(|a| a.document.user_id == owner_id)
            .collect();
        out.sort_by_key(|a| a.document.created_at);
        Ok(out)
    }

    /// Hard-delete an archived story and its ledger entries
    pub fn purge(&self, story_id: &str) -> StorageResult<bool> {
        let removed = self.archive.remove(story_id.as_bytes())?.is_some();
        if removed {
            self.ledger.remove_story(story_id)?;
        }
        Ok(removed)
    }

    // ------------------------------------------------------------------
    // Users and follow graph
    // ------------------------------------------------------------------

    /// Insert or replace a user summary
    pub fn put_user(&self, summary: &UserSummary) -> StoryResult<()> {
        summary.validate()?;
        let bytes = bincode::serialize(summary)?;
        self.users.insert(summary.id.as_bytes(), bytes)?;
        Ok(())
    }

    /// Summary for a user, or a placeholder if none was registered
    pub fn user(&self, user_id: &str) -> StorageResult<UserSummary> {
        match self.users.get(user_id.as_bytes())? {
            Some(bytes) => Ok(bincode::deserialize(&bytes)?),
            None => Ok(UserSummary::unknown(user_id)),
        }
    }

    /// Returns `true` if the edge is new
    pub fn follow(&self, follower: &str, followee: &str) -> StoryResult<bool> {
        validate_user_id(follower)?;
        validate_user_id(followee)?;
        let previous = self
            .follows
            .insert(pair_key(follower, followee).as_bytes(), &[] as &[u8])?;
        Ok(previous.is_none())
    }

    /// Returns `true` if an edge was removed
    pub fn unfollow(&self, follower: &str, followee: &str) -> StoryResult<bool> {
        Ok(self
            .follows
            .remove(pair_key(follower, followee).as_bytes())?
            .is_some())
    }

    /// Accounts `follower` follows
    pub fn following(&self, follower: &str) -> StorageResult<Vec<UserId>> {
        let mut out = Vec::new();
        for item in self.follows.scan_prefix(prefix(follower).as_bytes()) {
            let (key, _) = item?;
            out.push(last_segment(&key));
        }
        Ok(out)
    }

    // ------------------------------------------------------------------
    // Maintenance
    // ------------------------------------------------------------------

    fn populate(&self, doc: StoryDocument) -> StoryResult<Story> {
        let owner = self.user(&doc.user_id)?;
        let viewers = self.ledger.viewers(&doc.id)?;
        Ok(doc.into_story(owner, viewers))
    }

    /// Force flush all pending writes to disk
    pub fn flush(&self) -> StorageResult<()> {
        self.db.flush()?;
        Ok(())
    }

    /// Get storage statistics
    pub fn stats(&self) -> StorageStats {
        StorageStats {
            story_count: self.stories.len(),
            archived_count: self.archive.len(),
            view_count: self.ledger.len(),
            follow_count: self.follows.len(),
            total_size_bytes: self.db.size_on_disk().unwrap_or(0),
        }
    }
}

/// Statistics about the storage
#[derive(Debug, Clone)]
pub struct StorageStats {
    pub story_count: usize,
    pub archived_count: usize,
    pub view_count: usize,
    pub follow_count: usize,
    pub total_size_bytes: u64,
}

fn abort(err: StoryError) -> ConflictableTransactionError<StoryError> {
    ConflictableTransactionError::Abort(err)
}

fn from_tx(err: TransactionError<StoryError>) -> StoryError {
    match err {
        TransactionError::Abort(err) => err,
        TransactionError::Storage(err) => StoryError::from(err),
    }
}

fn forbidden(story_id: &str, requester_id: &str) -> StoryError {
    StoryError::Forbidden {
        story_id: story_id.to_string(),
        requester: requester_id.to_string(),
    }
}

impl Drop for StoryStore {
    fn drop(&mut self) {
        // Attempt to flush on drop, but don't panic
        let _ = self.flush();
    }
}
