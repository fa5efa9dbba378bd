//! Story domain types.
//!
//! These are the shapes exchanged on the wire and held by the client cache.
//! The persisted form lives in [`crate::storage`]; viewers are kept apart from
//! it in the view ledger and joined back in when a story is served.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use crate::error::{StoryError, StoryResult};

/// Unique identifier for a story
pub type StoryId = String;

/// Unique identifier for a user
pub type UserId = String;

/// Longest user id accepted by the store
const MAX_USER_ID_LEN: usize = 128;

/// Longest display name accepted by the store
const MAX_USERNAME_LEN: usize = 64;

/// Longest media URI accepted by the store
const MAX_URI_LEN: usize = 4096;

/// A story is active strictly before its expiry instant.
pub fn is_active(expires_at: DateTime<Utc>, now: DateTime<Utc>) -> bool {
    now < expires_at
}

/// Media type of a story
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Image,
    Video,
}

impl fmt::Display for MediaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MediaKind::Image => write!(f, "image"),
            MediaKind::Video => write!(f, "video"),
        }
    }
}

impl FromStr for MediaKind {
    type Err = StoryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "image" => Ok(MediaKind::Image),
            "video" => Ok(MediaKind::Video),
            other => Err(StoryError::validation(format!(
                "unsupported content type '{}'",
                other
            ))),
        }
    }
}

/// Story payload: what kind of media and where it lives
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoryContent {
    #[serde(rename = "type")]
    pub kind: MediaKind,
    /// URI of the media
    pub data: String,
}

impl StoryContent {
    pub fn new(kind: MediaKind, data: impl Into<String>) -> Self {
        Self {
            kind,
            data: data.into(),
        }
    }

    pub fn image(data: impl Into<String>) -> Self {
        Self::new(MediaKind::Image, data)
    }

    pub fn video(data: impl Into<String>) -> Self {
        Self::new(MediaKind::Video, data)
    }

    pub fn validate(&self) -> StoryResult<()> {
        validate_uri(&self.data)
    }
}

/// Content as received from a client, before validation
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ContentDraft {
    #[serde(rename = "type", default)]
    pub kind: Option<String>,
    #[serde(default)]
    pub data: Option<String>,
}

impl ContentDraft {
    pub fn into_content(self) -> StoryResult<StoryContent> {
        let kind = self
            .kind
            .ok_or_else(|| StoryError::validation("content.type is required"))?
            .parse::<MediaKind>()?;
        let data = self
            .data
            .ok_or_else(|| StoryError::validation("content.data is required"))?;

        let content = StoryContent::new(kind, data);
        content.validate()?;
        Ok(content)
    }
}

impl From<&StoryContent> for ContentDraft {
    fn from(content: &StoryContent) -> Self {
        Self {
            kind: Some(content.kind.to_string()),
            data: Some(content.data.clone()),
        }
    }
}

/// Public profile fields joined into every story
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserSummary {
    #[serde(rename = "_id")]
    pub id: UserId,
    pub username: String,
    pub profile_picture: Option<String>,
}

impl UserSummary {
    pub fn new(id: impl Into<String>, username: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            username: username.into(),
            profile_picture: None,
        }
    }

    pub fn with_picture(mut self, uri: impl Into<String>) -> Self {
        self.profile_picture = Some(uri.into());
        self
    }

    /// Placeholder for a user that never registered a profile
    pub fn unknown(id: &str) -> Self {
        Self::new(id, id)
    }

    pub fn validate(&self) -> StoryResult<()> {
        validate_user_id(&self.id)?;
        if self.username.trim().is_empty() {
            return Err(StoryError::validation("username must not be blank"));
        }
        if self.username.chars().count() > MAX_USERNAME_LEN {
            return Err(StoryError::validation("username is too long"));
        }
        match &self.profile_picture {
            Some(uri) => validate_uri(uri),
            None => Ok(()),
        }
    }
}

/// A story as served to consumers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Story {
    #[serde(rename = "_id")]
    pub id: StoryId,
    /// Populated owner summary
    #[serde(rename = "userId")]
    pub owner: UserSummary,
    pub content: StoryContent,
    #[serde(rename = "createdAt")]
    pub created_at: DateTime<Utc>,
    #[serde(rename = "expiresAt")]
    pub expires_at: DateTime<Utc>,
    #[serde(default)]
    pub viewers: BTreeSet<UserId>,
}

impl Story {
    pub fn owner_id(&self) -> &str {
        &self.owner.id
    }

    pub fn is_active_at(&self, now: DateTime<Utc>) -> bool {
        is_active(self.expires_at, now)
    }

    pub fn has_viewed(&self, user_id: &str) -> bool {
        self.viewers.contains(user_id)
    }

    /// Time left before expiry, zero once expired
    pub fn remaining(&self, now: DateTime<Utc>) -> Duration {
        (self.expires_at - now).max(Duration::zero())
    }
}

/// Reject ids that are empty, oversized or would break composite sled keys.
pub fn validate_user_id(id: &str) -> StoryResult<()> {
    if id.trim().is_empty() {
        return Err(StoryError::validation("user id must not be empty"));
    }
    if id.len() > MAX_USER_ID_LEN {
        return Err(StoryError::validation("user id is too long"));
    }
    if id.contains('\0') {
        return Err(StoryError::validation("user id contains a NUL byte"));
    }
    Ok(())
}

/// Accept `scheme:rest` URIs with an RFC 3986 scheme and no whitespace.
fn validate_uri(data: &str) -> StoryResult<()> {
    if data.is_empty() {
        return Err(StoryError::validation("content.data must not be empty"));
    }
    if data.len() > MAX_URI_LEN {
        return Err(StoryError::validation("content.data is too long"));
    }
    if data.chars().any(char::is_whitespace) {
        return Err(StoryError::validation("content.data must be a URI"));
    }

    let (scheme, rest) = data
        .split_once(':')
        .ok_or_else(|| StoryError::validation("content.data must be a URI"))?;

    let mut chars = scheme.chars();
    let scheme_ok = chars.next().map_or(false, |c| c.is_ascii_alphabetic())
        && chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'));

    if !scheme_ok || rest.is_empty() {
        return Err(StoryError::validation("content.data must be a URI"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_story() -> Story {
        let created_at = Utc::now();
        Story {
            id: "story-1".to_string(),
            owner: UserSummary::new("alice", "Alice"),
            content: StoryContent::image("https://cdn.example.com/a.png"),
            created_at,
            expires_at: created_at + Duration::hours(24),
            viewers: BTreeSet::new(),
        }
    }

    #[test]
    fn test_story_json_shape() {
        let story = sample_story();
        let json = serde_json::to_value(&story).unwrap();

        assert_eq!(json["_id"], "story-1");
        assert_eq!(json["userId"]["_id"], "alice");
        assert_eq!(json["userId"]["username"], "Alice");
        assert!(json["userId"]["profilePicture"].is_null());
        assert_eq!(json["content"]["type"], "image");
        assert_eq!(json["content"]["data"], "https://cdn.example.com/a.png");
        assert!(json["createdAt"].as_str().unwrap().contains('T'));
        assert!(json["expiresAt"].is_string());
    }

    #[test]
    fn test_activity_boundary() {
        let story = sample_story();
        assert!(story.is_active_at(story.expires_at - Duration::seconds(1)));
        assert!(!story.is_active_at(story.expires_at));
        assert_eq!(story.remaining(story.expires_at + Duration::hours(1)), Duration::zero());
    }

    #[test]
    fn test_content_draft_validation() {
        let draft = ContentDraft {
            kind: Some("video".to_string()),
            data: Some("file:///tmp/clip.mp4".to_string()),
        };
        assert_eq!(draft.into_content().unwrap().kind, MediaKind::Video);

        let missing = ContentDraft::default();
        assert!(matches!(missing.into_content(), Err(StoryError::Validation(_))));

        let bad_kind = ContentDraft {
            kind: Some("audio".to_string()),
            data: Some("https://x/y.mp3".to_string()),
        };
        assert!(matches!(bad_kind.into_content(), Err(StoryError::Validation(_))));

        for bad in ["", "not a uri", "no-scheme", "1http://x", "https:"] {
            assert!(StoryContent::image(bad).validate().is_err(), "{bad:?} accepted");
        }
    }

    #[test]
    fn test_user_summary_validation() {
        assert!(UserSummary::new("alice", "Alice").validate().is_ok());
        assert!(UserSummary::new("alice", "Alice")
            .with_picture("https://x/a.png")
            .validate()
            .is_ok());

        assert!(UserSummary::new("alice", "  ").validate().is_err());
        assert!(UserSummary::new("alice", "x".repeat(MAX_USERNAME_LEN + 1)).validate().is_err());
        assert!(UserSummary::new("alice", "Alice")
            .with_picture("not a uri")
            .validate()
            .is_err());
    }

    #[test]
    fn test_user_id_validation() {
        assert!(validate_user_id("bob").is_ok());
        assert!(validate_user_id("").is_err());
        assert!(validate_user_id("a\0b").is_err());
        assert!(validate_user_id(&"x".repeat(MAX_USER_ID_LEN + 1)).is_err());
    }
}
