use dune_interchange::{DecodeError, Operation, ParameterError};

use crate::config::ConfigError;
use crate::dashboard::DashboardError;
use crate::transport::TransportError;

/// All errors that can be returned by the client.
#[derive(Debug, thiserror::Error)]
pub enum DuneError {
    /// Login or token refresh failed. Never retried internally.
    #[error("authentication failed: {0}")]
    Auth(String),

    /// The response carried an application-level `errors` payload.
    ///
    /// `fetch` reads this as an expired or invalid session and restarts
    /// the execute-and-await sequence after logging in again.
    #[error("remote request {operation} failed: {message}")]
    RemoteRequest {
        operation: Operation,
        message: String,
    },

    /// The response did not have the expected structure. Not retried.
    #[error("malformed response: {0}")]
    MalformedResponse(#[from] DecodeError),

    /// The retry budget of `fetch` was used up.
    #[error("maximum retries ({max_retries}) exceeded")]
    RetriesExhausted { max_retries: u32 },

    /// Non-success HTTP status without an `errors` payload.
    #[error("{operation} returned HTTP status {status}")]
    Http { operation: Operation, status: u16 },

    /// The job finished but the service reported an error for it.
    #[error("query job {result_id} failed: {message}")]
    JobFailed { result_id: String, message: String },

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Dashboard(#[from] DashboardError),

    #[error(transparent)]
    Parameter(#[from] ParameterError),
}

impl DuneError {
    /// Whether `fetch` treats this error as a stale session.
    pub fn is_session_failure(&self) -> bool {
        matches!(self, DuneError::RemoteRequest { .. })
    }
}
