#[cfg(feature = "mock")]
use crate::mock::MockProvider;
use crate::error::LlmError;
use crate::ollama::OllamaProvider;
use crate::openai::OpenAiProvider;
use crate::provider::EmbeddingProvider;

/// Generates a match over all `AnyProvider` variants, binding the inner provider
/// and evaluating the given closure for each arm.
macro_rules! delegate_provider {
    ($self:expr, |$p:ident| $expr:expr) => {
        match $self {
            AnyProvider::Ollama($p) => $expr,
            AnyProvider::OpenAi($p) => $expr,
            #[cfg(feature = "mock")]
            AnyProvider::Mock($p) => $expr,
        }
    };
}

/// Provider selected at startup from configuration.
#[derive(Debug, Clone)]
pub enum AnyProvider {
    Ollama(OllamaProvider),
    OpenAi(OpenAiProvider),
    #[cfg(feature = "mock")]
    Mock(MockProvider),
}

impl EmbeddingProvider for AnyProvider {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, LlmError> {
        delegate_provider!(self, |p| p.embed(text).await)
    }

    fn name(&self) -> &str {
        delegate_provider!(self, |p| p.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn name_delegates_to_inner() {
        let p = AnyProvider::Ollama(OllamaProvider::new("http://localhost:11434", "m".into()));
        assert_eq!(p.name(), "ollama");
    }

    #[cfg(feature = "mock")]
    #[tokio::test]
    async fn embed_delegates_to_mock() {
        let p = AnyProvider::Mock(MockProvider::new(16));
        let v = p.embed("parse config").await.unwrap();
        assert_eq!(v.len(), 16);
        assert_eq!(p.name(), "mock");
    }
}
