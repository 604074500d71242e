use super::{GenerationError, Generator, Prompt};
use async_trait::async_trait;

/// Message used whenever generation fails or times out.
pub const FALLBACK_TEMPLATE: &str = "Discover {name} just a few steps away!";

pub fn fallback_message(poi_name: &str) -> String {
    FALLBACK_TEMPLATE.replace("{name}", poi_name)
}

/// Deterministic generator that always renders the fallback template.
///
/// Used when no text generation endpoint is configured.
#[derive(Debug, Default, Clone)]
pub struct TemplateGenerator;

#[async_trait]
impl Generator for TemplateGenerator {
    async fn generate(&self, prompt: &Prompt) -> Result<String, GenerationError> {
        Ok(fallback_message(&prompt.poi_name))
    }

    fn name(&self) -> &str {
        "template"
    }
}
