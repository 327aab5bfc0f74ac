use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    /// A uniqueness or exclusion constraint rejected the write.
    #[error("Constraint violation: {0}")]
    Conflict(String),

    #[error("Record not found: {0}")]
    NotFound(String),

    #[error("Data store error: {0}")]
    Backend(String),

    #[error("Failed to parse record: {0}")]
    Serialization(#[from] serde_json::Error),
}
