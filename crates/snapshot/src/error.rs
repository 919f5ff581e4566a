use thiserror::Error;

/// Errors surfaced while scanning a site directory and driving the
/// snapshot pipeline against the remote service.
#[derive(Debug, Error)]
pub enum RunnerError {
    #[error("base URL must start with a slash, got {0:?}")]
    InvalidBaseUrl(String),

    #[error("no root resources found, does the directory contain HTML files?")]
    NoRootResources,

    #[error("invalid snapshot pattern: {0}")]
    Pattern(#[from] regex::Error),

    #[error(transparent)]
    Client(#[from] snapgate_client::ClientError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("worker task failed: {0}")]
    Task(#[from] tokio::task::JoinError),

    #[error("worker pool closed")]
    Pool(#[from] tokio::sync::AcquireError),
}
