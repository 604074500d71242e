// Text generation capability and personalization context

mod chat;
mod offers;
mod prompt;
mod template;

pub use chat::{ChatCompletionsGenerator, ChatSettings};
pub use offers::{Offer, OfferDirectory};
pub use prompt::{build_prompt, context_fingerprint, finalize_message, ProfileDirectory, Prompt, UserProfile};
pub use template::{fallback_message, TemplateGenerator, FALLBACK_TEMPLATE};

use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum GenerationError {
    #[error("generator request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("generator returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("malformed generator response: {0}")]
    Malformed(String),

    #[error("generator returned no text")]
    Empty,
}

/// Produces notification text from a prompt.
///
/// Implementations should not retry on their own: the message cache bounds
/// the call with a timeout and falls back on failure.
#[async_trait]
pub trait Generator: Send + Sync {
    async fn generate(&self, prompt: &Prompt) -> Result<String, GenerationError>;

    fn name(&self) -> &str;
}
