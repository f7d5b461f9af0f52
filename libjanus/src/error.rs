//! Error types for Janus

use thiserror::Error;

use crate::post::PostSummary;

pub type Result<T> = std::result::Result<T, JanusError>;

#[derive(Error, Debug)]
pub enum JanusError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Tabular store error: {0}")]
    Store(#[from] StoreError),

    #[error("Feed error: {0}")]
    Feed(#[from] FeedError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Malformed post: {0}")]
    MalformedPost(String),

    /// Every post of the batch, so the report can name each one
    #[error("Batch rejected with status {status} ({} posts): {detail}", .posts.len())]
    BatchRejected {
        status: u16,
        posts: Vec<PostSummary>,
        detail: String,
    },

    #[error("Refused: {0}")]
    Precondition(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

impl JanusError {
    /// Returns the appropriate exit code for this error
    pub fn exit_code(&self) -> i32 {
        match self {
            JanusError::InvalidInput(_) => 3,
            JanusError::Feed(FeedError::Authentication(_)) => 2,
            JanusError::Store(StoreError::Authentication(_)) => 2,
            JanusError::Precondition(_) => 4,
            _ => 1,
        }
    }

    /// Whether the error is worth a cool-down and another attempt
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            JanusError::Feed(FeedError::RateLimit(_)) | JanusError::Feed(FeedError::Network(_))
        )
    }
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),

    #[error("Failed to parse config: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("Missing required field: {0}")]
    MissingField(String),

    #[error("Invalid value for {field}: {reason}")]
    InvalidValue { field: String, reason: String },
}

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Database operation failed: {0}")]
    Sqlx(#[from] sqlx::Error),

    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Authentication failed: {0}")]
    Authentication(String),

    #[error("Query failed with status {status}: {detail}")]
    Query { status: u16, detail: String },

    #[error("Unexpected response: {0}")]
    Response(String),
}

#[derive(Error, Debug, Clone)]
pub enum FeedError {
    #[error("Authentication failed: {0}")]
    Authentication(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Rate limit exceeded: {0}")]
    RateLimit(String),

    #[error("Request failed with status {status}: {detail}")]
    Request { status: u16, detail: String },

    #[error("Unexpected response: {0}")]
    Response(String),
}

impl From<reqwest::Error> for FeedError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            FeedError::Response(err.to_string())
        } else {
            FeedError::Network(err.to_string())
        }
    }
}
