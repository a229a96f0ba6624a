//! Chat-completion clients.
//!
//! [`ChatModel`] is the seam between the answer pipeline and the hosted LLM.
//! [`groq::GroqClient`] talks to any OpenAI-compatible endpoint (Groq by
//! default); [`mock::MockChatModel`] answers from a closure for tests.
pub mod groq;
pub mod mock;

use async_trait::async_trait;
use thiserror::Error;

pub use groq::GroqClient;
pub use mock::MockChatModel;

/// Failures talking to the LLM provider, classified by what the caller
/// should do about them.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum LlmError {
    #[error("API key is missing")]
    MissingCredential,

    #[error("provider rejected the API key ({status}): {message}")]
    Unauthorized { status: u16, message: String },

    #[error("provider rate limit reached (429): {message}")]
    RateLimited {
        /// Seconds to wait, from the `retry-after` header when present.
        retry_after: Option<u64>,
        message: String,
    },

    #[error("provider returned {status}: {message}")]
    Provider { status: u16, message: String },

    #[error("request to provider failed: {0}")]
    Transport(String),

    #[error("invalid provider response: {0}")]
    InvalidResponse(String),
}

impl LlmError {
    /// The key is absent or was refused.
    #[must_use]
    pub fn is_credential_error(&self) -> bool {
        matches!(self, Self::MissingCredential | Self::Unauthorized { .. })
    }

    #[must_use]
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, Self::RateLimited { .. })
    }
}

/// A model that turns a single prompt into a completion.
#[async_trait]
pub trait ChatModel: Send + Sync {
    /// Send `prompt` as one user message and return the reply text.
    async fn complete(&self, prompt: &str) -> Result<String, LlmError>;

    /// Model identifier, for diagnostics.
    fn model_name(&self) -> &str;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_classification() {
        assert!(LlmError::MissingCredential.is_credential_error());
        assert!(
            LlmError::Unauthorized {
                status: 401,
                message: "bad key".into()
            }
            .is_credential_error()
        );
        assert!(
            LlmError::RateLimited {
                retry_after: Some(30),
                message: "slow down".into()
            }
            .is_rate_limited()
        );

        let generic = LlmError::Provider {
            status: 500,
            message: "boom".into(),
        };
        assert!(!generic.is_rate_limited());
        assert!(!generic.is_credential_error());
        assert!(!LlmError::Transport("refused".into()).is_rate_limited());
    }

    #[test]
    fn test_error_display() {
        let err = LlmError::RateLimited {
            retry_after: None,
            message: "too many requests".into(),
        };
        assert_eq!(
            err.to_string(),
            "provider rate limit reached (429): too many requests"
        );
    }
}
