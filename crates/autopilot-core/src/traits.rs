use core::pin::Pin;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use futures::Stream;

use crate::Result;
use crate::types::{ContextItem, Observation};

/// One item of a streamed completion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CompletionChunk {
    /// A text token
    Token(String),
    /// Explicit end of the completion
    End,
}

/// Lazily produced completion tokens.
pub type TokenStream = Pin<Box<dyn Stream<Item = Result<CompletionChunk>> + Send>>;

/// Language-model capability.
#[async_trait]
pub trait LanguageModel: Send + Sync {
    /// Returns the identifier for this model.
    fn name(&self) -> &str;

    /// Starts a completion for `prompt`.
    ///
    /// The stream must finish with [`CompletionChunk::End`]; a stream that ends
    /// without it is treated as a failed completion.
    ///
    /// # Errors
    ///
    /// Returns a capability error if the request cannot be started.
    async fn complete(&self, prompt: &str, streaming: bool) -> Result<TokenStream>;
}

/// Editor capability.
#[async_trait]
pub trait Editor: Send + Sync {
    /// Files currently visible to the user, in display order.
    ///
    /// # Errors
    ///
    /// Returns an error if the workspace cannot be listed.
    async fn visible_files(&self) -> Result<Vec<PathBuf>>;

    /// Applies `instruction` to the file at `path`.
    ///
    /// # Errors
    ///
    /// Returns a capability error if the edit cannot be applied.
    async fn edit_file(&self, path: &Path, instruction: &str) -> Result<Observation>;
}

/// Context-provider capability.
#[async_trait]
pub trait ContextProvider: Send + Sync {
    /// Provider title, used as the first half of produced item ids.
    fn title(&self) -> &str;

    /// Produces the context item for `query_id`.
    ///
    /// # Errors
    ///
    /// Returns an error if the item cannot be produced.
    async fn provide(&self, query_id: &str) -> Result<ContextItem>;
}

/// Source of user input for `WaitForInput` steps.
#[async_trait]
pub trait UserInput: Send + Sync {
    /// Waits for the next input, showing `prompt`.
    ///
    /// # Errors
    ///
    /// Returns an error if the input source has closed.
    async fn next_input(&self, prompt: &str) -> Result<String>;
}
