use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;

use super::{AppState, SERVER_TIME_HEADER};
use crate::error::{StoryError, StoryResult};
use crate::story::{ContentDraft, UserSummary};

// ============================================================================
// API TYPES
// ============================================================================

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: String,
    version: String,
    uptime_seconds: u64,
    active_stories: usize,
    archived_stories: usize,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateStoryRequest {
    pub owner_id: Option<String>,
    pub content: Option<ContentDraft>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordViewRequest {
    pub story_id: String,
    pub viewer_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteQuery {
    pub requester_id: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserProfileRequest {
    pub username: String,
    pub profile_picture: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct FollowResponse {
    pub follower: String,
    pub followee: String,
    pub created: bool,
}

/// Header carrying the acknowledgment time of a successful write or read
fn acked(now: DateTime<Utc>) -> [(&'static str, String); 1] {
    [(SERVER_TIME_HEADER, now.to_rfc3339_opts(SecondsFormat::Millis, true))]
}

fn json_body<T>(payload: Result<Json<T>, JsonRejection>) -> StoryResult<T> {
    payload
        .map(|Json(body)| body)
        .map_err(|rejection| StoryError::validation(rejection.body_text()))
}

// ============================================================================
// HTTP HANDLERS
// ============================================================================

/// Health check endpoint
pub async fn health_check(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let stats = state.store.stats();

    Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_seconds: state.started_at.elapsed().as_secs(),
        active_stories: stats.story_count,
        archived_stories: stats.archived_count,
    })
}

/// Create a story
pub async fn create_story(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<CreateStoryRequest>, JsonRejection>,
) -> StoryResult<impl IntoResponse> {
    let payload = json_body(payload)?;
    let owner_id = payload
        .owner_id
        .ok_or_else(|| StoryError::validation("ownerId is required"))?;
    let content = payload
        .content
        .ok_or_else(|| StoryError::validation("content is required"))?
        .into_content()?;

    let now = state.now();
    let story = state.store.create(&owner_id, content, now)?;

    Ok((StatusCode::CREATED, acked(now), Json(story)))
}

/// Record that a viewer saw a story
pub async fn record_view(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<RecordViewRequest>, JsonRejection>,
) -> StoryResult<impl IntoResponse> {
    let payload = json_body(payload)?;
    let now = state.now();
    let story = state
        .store
        .record_view(&payload.story_id, &payload.viewer_id, now)?;

    Ok((acked(now), Json(story)))
}

/// Fetch a single active story
pub async fn get_story(
    State(state): State<Arc<AppState>>,
    Path(story_id): Path<String>,
) -> StoryResult<impl IntoResponse> {
    let now = state.now();
    let story = state.store.get(&story_id, now)?;
    Ok((acked(now), Json(story)))
}

/// "My stories": the user's own active stories
pub async fn list_own_stories(
    State(state): State<Arc<AppState>>,
    Path(user_id): Path<String>,
) -> StoryResult<impl IntoResponse> {
    let now = state.now();
    let stories = state.store.get_by_owner(&user_id, now)?;
    Ok((acked(now), Json(stories)))
}

/// Active stories from every account the user follows
pub async fn list_following_stories(
    State(state): State<Arc<AppState>>,
    Path(user_id): Path<String>,
) -> StoryResult<impl IntoResponse> {
    let now = state.now();
    let stories = state.store.get_following_stories(&user_id, now)?;
    Ok((acked(now), Json(stories)))
}

/// Delete a story on behalf of its owner
pub async fn delete_story(
    State(state): State<Arc<AppState>>,
    Path(story_id): Path<String>,
    Query(query): Query<DeleteQuery>,
) -> StoryResult<impl IntoResponse> {
    let requester_id = query
        .requester_id
        .ok_or_else(|| StoryError::validation("requesterId is required"))?;

    state.store.delete(&story_id, &requester_id)?;
    Ok((StatusCode::NO_CONTENT, acked(state.now())))
}

/// Insert or replace a user's public summary
pub async fn put_user(
    State(state): State<Arc<AppState>>,
    Path(user_id): Path<String>,
    payload: Result<Json<UserProfileRequest>, JsonRejection>,
) -> StoryResult<impl IntoResponse> {
    let payload = json_body(payload)?;
    let summary = UserSummary {
        id: user_id,
        username: payload.username,
        profile_picture: payload.profile_picture,
    };
    state.store.put_user(&summary)?;

    info!("Updated user summary for {}", summary.id);
    Ok(Json(summary))
}

/// Follow another account
pub async fn follow(
    State(state): State<Arc<AppState>>,
    Path((user_id, target_id)): Path<(String, String)>,
) -> StoryResult<impl IntoResponse> {
    let created = state.store.follow(&user_id, &target_id)?;
    Ok(Json(FollowResponse {
        follower: user_id,
        followee: target_id,
        created,
    }))
}

/// Stop following an account
pub async fn unfollow(
    State(state): State<Arc<AppState>>,
    Path((user_id, target_id)): Path<(String, String)>,
) -> StoryResult<impl IntoResponse> {
    state.store.unfollow(&user_id, &target_id)?;
    Ok(StatusCode::NO_CONTENT)
}
