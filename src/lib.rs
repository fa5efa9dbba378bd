//! Story Engine - ephemeral stories with follower-scoped visibility
//!
//! The server half keeps stories in sled with a separate view ledger and
//! archives them once they pass their expiry. The client half holds an
//! optimistic cache that converges with the server on every response.

pub mod api;
pub mod client;
pub mod clock;
pub mod config;
pub mod error;
pub mod storage;
pub mod story;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{ServerConfig, StoryPolicy};
pub use error::{StoryError, StoryResult};
pub use story::{MediaKind, Story, StoryContent, StoryId, UserId, UserSummary};
