/// Shared error type used across all Hermes crates.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("IO: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("sandbox runtime unreachable: {0}")]
    SandboxUnavailable(String),

    #[error("sandbox: {0}")]
    Sandbox(String),

    #[error("retrieval store: {0}")]
    Retrieval(String),

    #[error("storage: {0}")]
    Storage(String),
}

pub type Result<T> = std::result::Result<T, Error>;
