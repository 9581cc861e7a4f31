use async_trait::async_trait;
use sleuth_core::Message;
use thiserror::Error;

/// Transport-class failures of the language model. None of these are
/// retried internally.
#[derive(Error, Debug)]
pub enum LlmError {
    #[error("request timed out")]
    Timeout,

    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("rate limited: {0}")]
    RateLimited(String),

    #[error("upstream unavailable: {0}")]
    Unavailable(String),

    #[error("API error (HTTP {status}): {body}")]
    Api { status: u16, body: String },

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("invalid response: {0}")]
    InvalidResponse(String),
}

impl LlmError {
    /// Classify a non-success HTTP status.
    pub fn from_status(status: u16, body: String) -> Self {
        match status {
            401 | 403 => LlmError::Unauthorized(body),
            429 => LlmError::RateLimited(body),
            502..=504 => LlmError::Unavailable(body),
            _ => LlmError::Api { status, body },
        }
    }

    /// Classify a reqwest failure that never produced a status.
    pub fn from_transport(error: reqwest::Error) -> Self {
        if error.is_timeout() {
            LlmError::Timeout
        } else if error.is_connect() {
            LlmError::Unavailable(error.to_string())
        } else {
            LlmError::Http(error)
        }
    }

    /// Message shown to the person waiting on the stream.
    pub fn user_message(&self) -> String {
        match self {
            LlmError::Timeout => {
                "The language model did not respond in time. Please try again later.".to_string()
            }
            LlmError::Unauthorized(_) => {
                "The language model rejected the configured credentials. Check the API key."
                    .to_string()
            }
            LlmError::RateLimited(_) => {
                "The language model is rate limiting requests. Please retry in a moment."
                    .to_string()
            }
            LlmError::Unavailable(_) => {
                "The language model service is currently unavailable.".to_string()
            }
            LlmError::Api { status, .. } => {
                format!("The language model returned an error (HTTP {status}).")
            }
            LlmError::Http(_) => "Could not reach the language model service.".to_string(),
            LlmError::InvalidResponse(_) => {
                "The language model returned a response that could not be read.".to_string()
            }
        }
    }
}

pub type Result<T> = std::result::Result<T, LlmError>;

#[async_trait]
pub trait LlmClient: Send + Sync {
    /// Send the ordered conversation and return the assistant reply.
    async fn invoke(&self, messages: &[Message]) -> Result<Message>;

    fn model_name(&self) -> &str {
        "unknown"
    }
}
