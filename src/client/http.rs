//! reqwest implementation of [`StoryApi`].

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{Response, StatusCode, Url};
use serde::de::DeserializeOwned;
use serde_json::json;
use tracing::{debug, warn};

use super::{Ack, Category, StoryApi};
use crate::api::{ErrorBody, SERVER_TIME_HEADER};
use crate::error::{StoryError, StoryResult};
use crate::story::{ContentDraft, Story, StoryContent};

/// Talks to the story REST API over HTTP
#[derive(Debug, Clone)]
pub struct HttpStoryApi {
    client: reqwest::Client,
    base_url: String,
}

impl HttpStoryApi {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self::with_client(reqwest::Client::new(), base_url)
    }

    pub fn with_client(client: reqwest::Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    /// Endpoint URL from path segments. Each segment is percent-encoded, so
    /// ids containing `/`, `?` or `#` stay a single segment.
    fn url(&self, segments: &[&str]) -> StoryResult<Url> {
        let mut url = Url::parse(&self.base_url)
            .map_err(|e| StoryError::validation(format!("invalid base url {}: {}", self.base_url, e)))?;
        url.path_segments_mut()
            .map_err(|_| StoryError::validation(format!("base url {} cannot hold a path", self.base_url)))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    /// Turn a response into an acknowledged value or a typed error.
    /// `subject` names the story (or user) the request was about, `actor` the
    /// user making it.
    async fn finish<T: DeserializeOwned>(
        response: Response,
        subject: &str,
        actor: &str,
    ) -> StoryResult<Ack<T>> {
        let acked_at = server_time(&response);
        let status = response.status();

        if !status.is_success() {
            return Err(error_from(response, subject, actor).await);
        }

        let value = response.json::<T>().await.map_err(transport)?;
        Ok(Ack::new(value, acked_at))
    }
}

#[async_trait]
impl StoryApi for HttpStoryApi {
    async fn list(&self, category: Category, user_id: &str) -> StoryResult<Ack<Vec<Story>>> {
        let url = match category {
            Category::Own => self.url(&["api", "users", user_id, "stories"])?,
            Category::Following => self.url(&["api", "users", user_id, "stories", "following"])?,
        };
        debug!("GET {}", url);

        let response = self.client.get(url).send().await.map_err(transport)?;
        Self::finish(response, user_id, user_id).await
    }

    async fn create(&self, owner_id: &str, content: &StoryContent) -> StoryResult<Ack<Story>> {
        let body = json!({
            "ownerId": owner_id,
            "content": ContentDraft::from(content),
        });

        let response = self
            .client
            .post(self.url(&["api", "stories"])?)
            .json(&body)
            .send()
            .await
            .map_err(transport)?;
        Self::finish(response, owner_id, owner_id).await
    }

    async fn record_view(&self, story_id: &str, viewer_id: &str) -> StoryResult<Ack<Story>> {
        let body = json!({ "storyId": story_id, "viewerId": viewer_id });

        let response = self
            .client
            .post(self.url(&["api", "stories", "views"])?)
            .json(&body)
            .send()
            .await
            .map_err(transport)?;
        Self::finish(response, story_id, viewer_id).await
    }

    async fn delete(&self, story_id: &str, requester_id: &str) -> StoryResult<Ack<()>> {
        let response = self
            .client
            .delete(self.url(&["api", "stories", story_id])?)
            .query(&[("requesterId", requester_id)])
            .send()
            .await
            .map_err(transport)?;

        let acked_at = server_time(&response);
        if !response.status().is_success() {
            return Err(error_from(response, story_id, requester_id).await);
        }
        Ok(Ack::new((), acked_at))
    }
}

fn transport(err: reqwest::Error) -> StoryError {
    StoryError::Network(err.to_string())
}

fn server_time(response: &Response) -> DateTime<Utc> {
    response
        .headers()
        .get(SERVER_TIME_HEADER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| DateTime::parse_from_rfc3339(v).ok())
        .map(|t| t.with_timezone(&Utc))
        .unwrap_or_else(|| {
            warn!("Response without {} header, using local time", SERVER_TIME_HEADER);
            Utc::now()
        })
}

async fn error_from(response: Response, subject: &str, actor: &str) -> StoryError {
    let status = response.status();
    let body = response.json::<ErrorBody>().await.ok();

    // Statuses without an API error body come from routing, not from the store
    let Some(body) = body else {
        return StoryError::Network(format!("{} without an error body", status));
    };
    let message = body.error;

    match status {
        StatusCode::BAD_REQUEST => StoryError::Validation(message),
        StatusCode::NOT_FOUND => StoryError::NotFound(subject.to_string()),
        StatusCode::FORBIDDEN => StoryError::Forbidden {
            story_id: subject.to_string(),
            requester: actor.to_string(),
        },
        _ => StoryError::Network(format!("{}: {}", status, message)),
    }
}
