use thiserror::Error;

#[derive(Error, Debug)]
pub enum MergeError {
    #[error("Invalid merge plan: {0}")]
    InvalidPlan(String),

    #[error("Unknown table: {0}")]
    UnknownTable(String),

    #[error("Invalid join keys in step {step}: {reason}")]
    InvalidJoinKeys { step: usize, reason: String },

    #[error("Unsupported join type: {0}")]
    UnsupportedJoinType(String),

    #[error("Invalid relation: {0}")]
    InvalidRelation(String),

    #[error("Step {step} exceeded the result row limit of {limit}")]
    RowLimitExceeded { step: usize, limit: usize },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Polars error: {0}")]
    Polars(String),
}

pub type Result<T> = std::result::Result<T, MergeError>;
