use thiserror::Error;

use crate::correlation::CorrelationError;

#[derive(Debug, Error)]
pub enum QlikFetcherError {
    #[error("missing field: {0}")]
    MissingField(&'static str),

    #[error("invalid parameter: {0}")]
    InvalidParam(String),

    #[error("correlation fault: {0}")]
    Correlation(#[from] CorrelationError),

    #[error("Engine API error {code}: {message}")]
    EngineApi { code: i64, message: String },

    #[error("connection closed before the exchange completed")]
    ConnectionClosed,

    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("URL error: {0}")]
    Url(#[from] url::ParseError),

    #[error("invalid handshake header: {0}")]
    Http(String),
}

pub type Result<T> = std::result::Result<T, QlikFetcherError>;
