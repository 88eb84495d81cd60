use std::time::Duration;

use thiserror::Error;

use crate::decoder::DecodeError;

pub type Result<T> = std::result::Result<T, AgentError>;

#[derive(Debug, Error)]
pub enum AgentError {
    #[error("unsupported service: {0}")]
    UnsupportedService(String),

    #[error("container name already in use: {0}")]
    NameConflict(String),

    #[error("docker: {0}")]
    Docker(#[from] bollard::errors::Error),

    #[error("container runtime: {0}")]
    Runtime(String),

    #[error("config store request failed: {0}")]
    Store(#[from] reqwest::Error),

    #[error("config store returned {status}: {body}")]
    StoreResponse { status: u16, body: String },

    #[error("config store value for {key} is not valid base64: {source}")]
    InvalidValue {
        key: String,
        #[source]
        source: base64::DecodeError,
    },

    #[error("configure rpc failed: {0}")]
    Rpc(#[from] tonic::Status),

    #[error("configure rpc transport: {0}")]
    Transport(#[from] tonic::transport::Error),

    #[error("{op} timed out after {after:?}")]
    Timeout { op: &'static str, after: Duration },

    #[error(transparent)]
    Decode(#[from] DecodeError),

    #[error("json: {0}")]
    Json(#[from] serde_json::Error),
}

impl AgentError {
    /// Whether the watch loop must stop instead of retrying.
    pub fn is_fatal(&self) -> bool {
        matches!(self, AgentError::Decode(_))
    }
}

/// Runs `fut` under a deadline, mapping expiry to [`AgentError::Timeout`].
pub async fn with_deadline<T, F>(op: &'static str, after: Duration, fut: F) -> Result<T>
where
    F: std::future::Future<Output = Result<T>>,
{
    match tokio::time::timeout(after, fut).await {
        Ok(res) => res,
        Err(_) => Err(AgentError::Timeout { op, after }),
    }
}
