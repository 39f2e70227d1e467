use shared::{domain::UserId, error::ApiError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("not logged in")]
    NotLoggedIn,
    #[error("session ended while the request was in flight")]
    SessionEnded,
    #[error("server rejected the request: {0}")]
    Api(#[from] ApiError),
    #[error("realtime connection is not open")]
    NotConnected,
}

/// A direct-message send that did not reach the server. The optimistic entry
/// has been rolled back and `draft` holds the text to put back in the composer.
#[derive(Debug, Error)]
#[error("failed to send message to user {}: {source}", peer.0)]
pub struct SendFailure {
    pub peer: UserId,
    pub draft: String,
    #[source]
    pub source: anyhow::Error,
}
