use thiserror::Error;

#[derive(Error, Debug)]
pub enum AuditError {
    #[error("Invalid payload: {0}")]
    InvalidPayload(String),

    #[error("Anchor network unavailable: {0}")]
    AnchorUnavailable(String),

    #[error("Anchor submission rejected: {0}")]
    AnchorRejected(String),

    #[error("Confirmation timed out for batch: {0}")]
    ConfirmationTimeout(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl AuditError {
    /// Transient errors are retried by the anchor client and never
    /// surfaced to event producers.
    pub fn is_transient(&self) -> bool {
        matches!(self, AuditError::AnchorUnavailable(_))
    }
}

pub type Result<T> = std::result::Result<T, AuditError>;
