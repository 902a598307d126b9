use thiserror::Error;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("session not found: {0}")]
    NotFound(String),

    #[error("no live session for repository {0}")]
    NoSessionForRepo(String),

    /// The map lock was poisoned by a panicking writer.
    #[error("session store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("update of session {id} rejected: {source}")]
    UpdateRejected {
        id: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
}
