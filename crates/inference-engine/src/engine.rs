//! Generation backends

use async_trait::async_trait;
use tracing::debug;

use common::error::{Error, Result};
use model_manager::LoadedArtifact;

/// Produces text from a loaded model
#[async_trait]
pub trait TextGenerator: Send + Sync {
    /// Backend name
    fn name(&self) -> &str;

    /// Generates a completion for `prompt`
    ///
    /// `max_length` bounds the output in tokens, prompt included.
    async fn generate(&self, artifact: &LoadedArtifact, prompt: &str, max_length: usize) -> Result<String>;
}

/// Backend for deployments without a decoding runtime
///
/// Returns the prompt itself, capped at `max_length` whitespace tokens.
#[derive(Debug, Default, Clone, Copy)]
pub struct EchoGenerator;

#[async_trait]
impl TextGenerator for EchoGenerator {
    fn name(&self) -> &str {
        "echo"
    }

    async fn generate(&self, artifact: &LoadedArtifact, prompt: &str, max_length: usize) -> Result<String> {
        if max_length == 0 {
            return Err(Error::InvalidArgument("max_length must be at least 1".into()));
        }

        let text = prompt.split_whitespace().take(max_length).collect::<Vec<_>>().join(" ");
        debug!("{} generated {} characters with {}", self.name(), text.len(), artifact.id);
        Ok(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use common::models::{ArtifactId, CacheKey};
    use common::types::ArtifactSource;

    fn artifact() -> LoadedArtifact {
        LoadedArtifact {
            id: ArtifactId::parse("acme/widget").unwrap(),
            key: CacheKey::new("acme--widget"),
            root: PathBuf::from("/tmp/acme--widget"),
            manifest: Some(serde_json::json!({})),
            files: Vec::new(),
            source: ArtifactSource::Local,
            load_time: chrono::Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_echo_caps_tokens() {
        let generator = EchoGenerator;
        let artifact = artifact();
        assert_eq!(generator.name(), "echo");

        assert_eq!(generator.generate(&artifact, "a  b c d", 2).await.unwrap(), "a b");
        assert_eq!(generator.generate(&artifact, "hello world", 100).await.unwrap(), "hello world");
        assert_eq!(generator.generate(&artifact, "", 5).await.unwrap(), "");
    }

    #[tokio::test]
    async fn test_echo_rejects_zero_length() {
        let err = EchoGenerator.generate(&artifact(), "hi", 0).await.unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(_)));
    }
}
