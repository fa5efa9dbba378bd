//! Append-only view ledger.
//!
//! One entry per `(story, viewer)` pair, keyed `story\0viewer`, valued with the
//! view time in big-endian milliseconds. Inserting an existing pair is a no-op.

use chrono::{DateTime, Utc};
use sled::transaction::{TransactionalTree, UnabortableTransactionError};
use sled::Tree;
use std::collections::BTreeSet;

use super::sled_store::StorageResult;
use super::{last_segment, pair_key, prefix};
use crate::story::UserId;

#[derive(Clone)]
pub struct ViewLedger {
    tree: Tree,
}

impl ViewLedger {
    pub fn new(tree: Tree) -> Self {
        Self { tree }
    }

    /// Record a view. Returns `true` if the pair was not already present.
    pub fn add(&self, story_id: &str, viewer_id: &str, at: DateTime<Utc>) -> StorageResult<bool> {
        let key = pair_key(story_id, viewer_id);
        let inserted = self
            .tree
            .compare_and_swap(key.as_bytes(), None::<&[u8]>, Some(encode_time(at)))?
            .is_ok();
        Ok(inserted)
    }

    /// Same as [`ViewLedger::add`], inside a multi-tree transaction
    pub(crate) fn add_in(
        tx: &TransactionalTree,
        story_id: &str,
        viewer_id: &str,
        at: DateTime<Utc>,
    ) -> Result<bool, UnabortableTransactionError> {
        let key = pair_key(story_id, viewer_id);
        if tx.get(key.as_bytes())?.is_some() {
            return Ok(false);
        }
        tx.insert(key.as_bytes(), encode_time(at))?;
        Ok(true)
    }

    pub fn has(&self, story_id: &str, viewer_id: &str) -> StorageResult<bool> {
        Ok(self.tree.contains_key(pair_key(story_id, viewer_id).as_bytes())?)
    }

    /// All viewers recorded for a story
    pub fn viewers(&self, story_id: &str) -> StorageResult<BTreeSet<UserId>> {
        let mut viewers = BTreeSet::new();
        for item in self.tree.scan_prefix(prefix(story_id).as_bytes()) {
            let (key, _) = item?;
            viewers.insert(last_segment(&key));
        }
        Ok(viewers)
    }

    /// When a viewer first saw a story
    pub fn viewed_at(&self, story_id: &str, viewer_id: &str) -> StorageResult<Option<DateTime<Utc>>> {
        Ok(self
            .tree
            .get(pair_key(story_id, viewer_id).as_bytes())?
            .and_then(|raw| decode_time(&raw)))
    }

    /// Drop every entry for a story. Returns the number removed.
    pub fn remove_story(&self, story_id: &str) -> StorageResult<usize> {
        let mut to_remove = Vec::new();
        for item in self.tree.scan_prefix(prefix(story_id).as_bytes()) {
            let (key, _) = item?;
            to_remove.push(key);
        }
        let removed = to_remove.len();
        for key in to_remove {
            self.tree.remove(key)?;
        }
        Ok(removed)
    }

    pub fn len(&self) -> usize {
        self.tree.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tree.is_empty()
    }

    pub(crate) fn tree(&self) -> &Tree {
        &self.tree
    }
}

fn encode_time(at: DateTime<Utc>) -> Vec<u8> {
    at.timestamp_millis().to_be_bytes().to_vec()
}

fn decode_time(raw: &[u8]) -> Option<DateTime<Utc>> {
    let bytes: [u8; 8] = raw.try_into().ok()?;
    DateTime::from_timestamp_millis(i64::from_be_bytes(bytes))
}
