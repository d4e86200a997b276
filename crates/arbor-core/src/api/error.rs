use thiserror::Error;

/// Failure while streaming a response body into deltas.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StreamError {
    #[error("Request cancelled")]
    Cancelled,

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Decode error: {0}")]
    Decode(String),
}

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("{provider} server error (Status: {status_code}): {details}")]
    ServerError {
        provider: String,
        status_code: u16,
        details: String,
    },

    #[error("Request cancelled for {provider}")]
    Cancelled { provider: String },

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Stream error from {provider}: {details}")]
    StreamError { provider: String, details: String },
}

impl ApiError {
    /// Errors that mean the caller gave up, as opposed to the request failing.
    pub fn is_cancellation(&self) -> bool {
        matches!(self, ApiError::Cancelled { .. })
    }
}

impl From<ApiError> for StreamError {
    fn from(err: ApiError) -> Self {
        if err.is_cancellation() {
            StreamError::Cancelled
        } else {
            StreamError::Transport(err.to_string())
        }
    }
}
