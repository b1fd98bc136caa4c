use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::StatusCode;
use serde::Serialize;
use shared::{
    domain::{Context, EventId, Identity, UserId},
    error::{ApiError, ErrorCode},
    protocol::{ConfirmedMessage, IdentityResponse, RsvpEntry, SendMessageRequest},
};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::debug;

#[derive(Debug, Error)]
pub enum BackendError {
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error(transparent)]
    Api(#[from] ApiError),
}

impl BackendError {
    pub fn is_permission(&self) -> bool {
        match self {
            BackendError::Http(err) => matches!(
                err.status(),
                Some(StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN)
            ),
            BackendError::Api(err) => err.is_permission(),
        }
    }
}

#[async_trait]
pub trait SyncBackend: Send + Sync {
    async fn resolve_identity(&self) -> Result<Identity, BackendError>;

    async fn fetch_history(
        &self,
        context: Context,
        limit: u32,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<ConfirmedMessage>, BackendError>;

    async fn send_message(
        &self,
        request: SendMessageRequest,
    ) -> Result<ConfirmedMessage, BackendError>;

    async fn fetch_event_responses(
        &self,
        event_id: EventId,
    ) -> Result<Vec<RsvpEntry>, BackendError>;
}

#[derive(Serialize)]
struct HistoryQuery {
    user_id: UserId,
    limit: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    since: Option<DateTime<Utc>>,
}

pub struct HttpSyncBackend {
    http: reqwest::Client,
    service_url: String,
    viewer: Mutex<Option<Identity>>,
}

impl HttpSyncBackend {
    pub fn new(service_url: impl Into<String>) -> Self {
        let service_url: String = service_url.into();
        Self {
            http: reqwest::Client::new(),
            service_url: service_url.trim_end_matches('/').to_string(),
            viewer: Mutex::new(None),
        }
    }

    async fn viewer_id(&self) -> Result<UserId, BackendError> {
        let viewer = self.viewer.lock().await;
        match viewer.as_ref() {
            Some(identity) => Ok(identity.user_id),
            None => Err(BackendError::Api(ApiError::new(
                ErrorCode::Unauthorized,
                "identity not resolved yet",
            ))),
        }
    }

    fn history_url(&self, context: Context) -> String {
        match context {
            Context::Group(id) => format!("{}/groups/{}/messages", self.service_url, id.0),
            Context::Event(id) => format!("{}/events/{}/messages", self.service_url, id.0),
            Context::Private(peer) => {
                format!("{}/conversations/{}/messages", self.service_url, peer.0)
            }
        }
    }
}

#[async_trait]
impl SyncBackend for HttpSyncBackend {
    async fn resolve_identity(&self) -> Result<Identity, BackendError> {
        let response = self
            .http
            .get(format!("{}/identity", self.service_url))
            .send()
            .await?
            .error_for_status()?;
        let body = response.json::<IdentityResponse>().await?;
        let identity = Identity {
            user_id: body.user_id,
        };
        *self.viewer.lock().await = Some(identity);
        debug!(user_id = identity.user_id.0, "identity resolved");
        Ok(identity)
    }

    async fn fetch_history(
        &self,
        context: Context,
        limit: u32,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<ConfirmedMessage>, BackendError> {
        let user_id = self.viewer_id().await?;
        let response = self
            .http
            .get(self.history_url(context))
            .query(&HistoryQuery {
                user_id,
                limit,
                since,
            })
            .send()
            .await?
            .error_for_status()?;
        Ok(response.json::<Vec<ConfirmedMessage>>().await?)
    }

    async fn send_message(
        &self,
        request: SendMessageRequest,
    ) -> Result<ConfirmedMessage, BackendError> {
        let response = self
            .http
            .post(format!("{}/messages", self.service_url))
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        if matches!(status, StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN) {
            let api = response.json::<ApiError>().await.unwrap_or_else(|_| {
                ApiError::new(ErrorCode::Forbidden, format!("send rejected ({status})"))
            });
            return Err(BackendError::Api(api));
        }

        Ok(response
            .error_for_status()?
            .json::<ConfirmedMessage>()
            .await?)
    }

    async fn fetch_event_responses(
        &self,
        event_id: EventId,
    ) -> Result<Vec<RsvpEntry>, BackendError> {
        let user_id = self.viewer_id().await?;
        let response = self
            .http
            .get(format!(
                "{}/events/{}/responses",
                self.service_url, event_id.0
            ))
            .query(&[("user_id", user_id.0)])
            .send()
            .await?
            .error_for_status()?;
        Ok(response.json::<Vec<RsvpEntry>>().await?)
    }
}

#[cfg(test)]
#[path = "tests/backend_tests.rs"]
mod tests;
