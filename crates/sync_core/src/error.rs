use shared::{domain::Context, error::ApiError};
use thiserror::Error;

use crate::backend::BackendError;

#[derive(Debug, Clone, Error)]
pub enum TransportError {
    #[error("channel is not open")]
    NotOpen,
    #[error("connect failed: {0}")]
    Connect(String),
    #[error("send failed: {0}")]
    Send(String),
}

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("malformed envelope: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error("unsupported frame payload")]
    UnsupportedFrame,
}

/// Send-path failure. The original content always rides back to the caller.
#[derive(Debug, Error)]
#[error("send rejected: {reason}")]
pub struct SendRejection {
    pub content: String,
    pub reason: SendErrorKind,
}

impl SendRejection {
    pub(crate) fn new(content: impl Into<String>, reason: SendErrorKind) -> Self {
        Self {
            content: content.into(),
            reason,
        }
    }
}

#[derive(Debug, Error)]
pub enum SendErrorKind {
    #[error("no active session for {0}")]
    NoSession(Context),
    #[error("permission denied: {0}")]
    Permission(ApiError),
    #[error("durable write failed: {0}")]
    Backend(BackendError),
}

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("client has not been started")]
    NotStarted,
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error(transparent)]
    Backend(#[from] BackendError),
}
