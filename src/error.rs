//! Error types for the feed multiplexer.

use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum FeedError {
    #[error("unknown service: {0}")]
    UnknownService(String),

    #[error("invalid symbol: {0:?}")]
    InvalidSymbol(String),

    #[error("connection timed out after {}s", .0.as_secs())]
    ConnectTimeout(Duration),

    #[error("connection failed: {0}")]
    ConnectFailed(String),

    #[error("unusable upstream response: {0}")]
    BadResponse(String),

    #[error("start superseded by stop")]
    Superseded,

    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

impl FeedError {
    /// Misuse errors are surfaced to the caller; everything else is an upstream failure.
    pub fn is_misuse(&self) -> bool {
        matches!(self, FeedError::UnknownService(_) | FeedError::InvalidSymbol(_))
    }
}

pub type Result<T> = std::result::Result<T, FeedError>;
