use async_trait::async_trait;
use autopilot_core::{CompletionChunk, Error, LanguageModel, Result, TokenStream};
use futures::stream;
use serde::Deserialize;
use serde_json::{Value, from_value};

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct EchoParams {
    reply: Option<String>,
}

/// Deterministic offline model that streams the prompt (or a fixed reply) back word by word.
#[derive(Debug, Clone, Default)]
pub struct EchoModel {
    reply: Option<String>,
}

impl EchoModel {
    /// Model echoing prompts.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Model always answering `reply`.
    #[must_use]
    pub fn with_reply(reply: impl Into<String>) -> Self {
        Self {
            reply: Some(reply.into()),
        }
    }

    /// Builds the model from `{reply?: String}`.
    ///
    /// # Errors
    /// Returns a configuration error for unknown keys.
    pub fn from_parameters(parameters: &Value) -> Result<Self> {
        if parameters.is_null() {
            return Ok(Self::new());
        }
        let params: EchoParams = from_value(parameters.clone())
            .map_err(|error| Error::Configuration(format!("echo_model parameters: {error}")))?;
        Ok(Self {
            reply: params.reply,
        })
    }
}

#[async_trait]
impl LanguageModel for EchoModel {
    fn name(&self) -> &str {
        "echo_model"
    }

    async fn complete(&self, prompt: &str, streaming: bool) -> Result<TokenStream> {
        let text = self.reply.as_deref().unwrap_or(prompt);
        let mut chunks: Vec<Result<CompletionChunk>> = if streaming {
            text.split_inclusive(char::is_whitespace)
                .map(|word| Ok(CompletionChunk::Token(word.to_owned())))
                .collect()
        } else {
            vec![Ok(CompletionChunk::Token(text.to_owned()))]
        };
        chunks.push(Ok(CompletionChunk::End));
        Ok(Box::pin(stream::iter(chunks)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt as _;

    async fn tokens(model: &EchoModel, prompt: &str, streaming: bool) -> Vec<CompletionChunk> {
        match model.complete(prompt, streaming).await {
            Ok(stream) => stream
                .filter_map(|chunk| async move { chunk.ok() })
                .collect()
                .await,
            Err(error) => panic!("complete failed: {error}"),
        }
    }

    #[tokio::test]
    async fn test_streams_words_then_end() {
        let chunks = tokens(&EchoModel::new(), "hello big world", true).await;
        assert_eq!(
            chunks,
            [
                CompletionChunk::Token("hello ".to_owned()),
                CompletionChunk::Token("big ".to_owned()),
                CompletionChunk::Token("world".to_owned()),
                CompletionChunk::End,
            ]
        );
    }

    #[tokio::test]
    async fn test_fixed_reply_without_streaming() {
        let chunks = tokens(&EchoModel::with_reply("fn main() {}"), "ignored", false).await;
        assert_eq!(
            chunks,
            [CompletionChunk::Token("fn main() {}".to_owned()), CompletionChunk::End]
        );
    }
}
