//! Error taxonomy for the relay core.
//!
//! None of these are fatal: the routing engine logs them, answers the
//! requester where that makes sense, and keeps the connection alive.

#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    /// Empty text, missing reply target, oversized body.
    #[error("invalid request: {0}")]
    Validation(String),

    /// Wrong admin password (or no admin password configured).
    #[error("admin authentication failed")]
    Auth,

    /// The message store could not commit or answer the query.
    #[error("persistence failed: {0}")]
    Persistence(#[from] sqlx::Error),

    /// A recipient vanished or its outbox is full.
    #[error("delivery to {connection_id} failed")]
    Delivery { connection_id: String },

    /// The connection id is already registered by another live link.
    #[error("connection {connection_id} is already registered")]
    AlreadyConnected { connection_id: String },
}

impl RelayError {
    pub fn validation(msg: impl Into<String>) -> Self {
        RelayError::Validation(msg.into())
    }
}

pub type RelayResult<T> = Result<T, RelayError>;
