//! REST surface for the story store.
//!
//! Every successful response carries an `x-server-time` header with the
//! instant the server used for the operation. Clients order competing
//! responses by that acknowledgment time rather than by issue order.

mod error;
mod handlers;

pub use error::ErrorBody;
pub use handlers::{CreateStoryRequest, FollowResponse, RecordViewRequest, UserProfileRequest};

use axum::http::Method;
use axum::routing::{get, post, put};
use axum::Router;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Instant;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::clock::Clock;
use crate::storage::StoryStore;
use handlers::*;

/// Name of the acknowledgment-time response header
pub const SERVER_TIME_HEADER: &str = "x-server-time";

/// Shared application state
pub struct AppState {
    /// Authoritative story store
    pub store: Arc<StoryStore>,
    /// Time source for expiry decisions
    pub clock: Arc<dyn Clock>,
    /// Server start time
    pub started_at: Instant,
}

impl AppState {
    pub fn new(store: Arc<StoryStore>, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            clock,
            started_at: Instant::now(),
        }
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }
}

/// Build the application router
pub fn router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers(Any)
        .expose_headers([axum::http::HeaderName::from_static(SERVER_TIME_HEADER)]);

    Router::new()
        // Health check
        .route("/health", get(health_check))
        // Stories
        .route("/api/stories", post(create_story))
        .route("/api/stories/views", post(record_view))
        .route("/api/stories/:story_id", get(get_story).delete(delete_story))
        // Listings
        .route("/api/users/:user_id/stories", get(list_own_stories))
        .route("/api/users/:user_id/stories/following", get(list_following_stories))
        // Profiles and follow graph
        .route("/api/users/:user_id", put(put_user))
        .route(
            "/api/users/:user_id/following/:target_id",
            put(follow).delete(unfollow),
        )
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
}
