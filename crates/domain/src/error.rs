/// Shared error type used across all Gatekeeper crates.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("IO: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("policy: {0}")]
    Policy(String),

    #[error("config: {0}")]
    Config(String),

    #[error("approval: {0}")]
    Approval(String),

    #[error("idempotency: {0}")]
    Idempotency(String),

    #[error("execution: {0}")]
    Execution(String),

    #[error("{0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, Error>;
