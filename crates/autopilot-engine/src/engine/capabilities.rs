use std::sync::Arc;

use async_trait::async_trait;
use autopilot_core::{ContextProvider, Editor, Error, LanguageModel, Result, UserInput};
use tokio::sync::{Mutex, mpsc};
use tracing::debug;

/// One resolved capability plugin.
#[derive(Clone)]
pub enum Capability {
    /// Language model
    Model(Arc<dyn LanguageModel>),
    /// Editor
    Editor(Arc<dyn Editor>),
    /// Context provider
    ContextProvider(Arc<dyn ContextProvider>),
    /// User input source
    Input(Arc<dyn UserInput>),
}

/// Capabilities available to the steps of one session.
#[derive(Clone, Default)]
pub struct Capabilities {
    /// Language model for `ModelComplete` steps
    pub model: Option<Arc<dyn LanguageModel>>,
    /// Editor for `EditFile` steps
    pub editor: Option<Arc<dyn Editor>>,
    /// Context providers, looked up by title
    pub context_providers: Vec<Arc<dyn ContextProvider>>,
    /// Input source for `WaitForInput` steps
    pub input: Option<Arc<dyn UserInput>>,
}

impl Capabilities {
    /// Empty capability set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a capability; a later model, editor, or input replaces an earlier one.
    pub fn install(&mut self, capability: Capability) {
        match capability {
            Capability::Model(model) => self.model = Some(model),
            Capability::Editor(editor) => self.editor = Some(editor),
            Capability::ContextProvider(provider) => self.context_providers.push(provider),
            Capability::Input(input) => self.input = Some(input),
        }
    }

    /// Builder form of [`Self::install`].
    #[must_use]
    pub fn with(mut self, capability: Capability) -> Self {
        self.install(capability);
        self
    }

    /// Language model, or a capability error if none is configured.
    ///
    /// # Errors
    /// Returns a capability error when no model is installed.
    pub fn model(&self) -> Result<&Arc<dyn LanguageModel>> {
        self.model
            .as_ref()
            .ok_or_else(|| Error::Capability("no language model configured".to_owned()))
    }

    /// Editor, or a capability error if none is configured.
    ///
    /// # Errors
    /// Returns a capability error when no editor is installed.
    pub fn editor(&self) -> Result<&Arc<dyn Editor>> {
        self.editor
            .as_ref()
            .ok_or_else(|| Error::Capability("no editor configured".to_owned()))
    }

    /// Input source, or a capability error if none is configured.
    ///
    /// # Errors
    /// Returns a capability error when no input source is installed.
    pub fn input(&self) -> Result<&Arc<dyn UserInput>> {
        self.input
            .as_ref()
            .ok_or_else(|| Error::Capability("no user input configured".to_owned()))
    }

    /// Context provider registered under `title`.
    ///
    /// # Errors
    /// Returns a configuration error when no provider has that title.
    pub fn context_provider(&self, title: &str) -> Result<&Arc<dyn ContextProvider>> {
        self.context_providers
            .iter()
            .find(|provider| provider.title() == title)
            .ok_or_else(|| Error::Configuration(format!("unknown context provider '{title}'")))
    }
}

/// User input fed through a channel, one message per `WaitForInput` step.
pub struct ChannelInput {
    /// Receiving end, shared by the attempts that wait on it
    receiver: Mutex<mpsc::UnboundedReceiver<String>>,
}

impl ChannelInput {
    /// Input source plus the sender used to feed it.
    #[must_use]
    pub fn channel() -> (Self, mpsc::UnboundedSender<String>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (
            Self {
                receiver: Mutex::new(receiver),
            },
            sender,
        )
    }
}

#[async_trait]
impl UserInput for ChannelInput {
    async fn next_input(&self, prompt: &str) -> Result<String> {
        debug!(prompt, "Waiting for user input");
        self.receiver
            .lock()
            .await
            .recv()
            .await
            .ok_or_else(|| Error::Capability("user input channel closed".to_owned()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builtin::EchoModel;

    #[tokio::test]
    async fn test_channel_input_delivers_in_order() {
        let (input, sender) = ChannelInput::channel();
        for text in ["first", "second"] {
            if sender.send(text.to_owned()).is_err() {
                panic!("send failed");
            }
        }
        drop(sender);
        assert_eq!(input.next_input("?").await.ok().as_deref(), Some("first"));
        assert_eq!(input.next_input("?").await.ok().as_deref(), Some("second"));
        assert!(matches!(input.next_input("?").await, Err(Error::Capability(_))));
    }

    #[test]
    fn test_missing_capabilities_are_errors() {
        let capabilities = Capabilities::new();
        assert!(matches!(capabilities.model(), Err(Error::Capability(_))));
        assert!(matches!(capabilities.context_provider("file"), Err(Error::Configuration(_))));

        let capabilities = capabilities.with(Capability::Model(Arc::new(EchoModel::new())));
        assert!(capabilities.model().is_ok());
    }
}
