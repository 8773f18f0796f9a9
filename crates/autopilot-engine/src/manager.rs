//! Session management: creates, drives, inspects, and tears down sessions.
//!
//! Each run gets its own bus, cancellation token, and input channel. The bus is
//! closed when the run ends, which ends every open subscription.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use autopilot_core::{
    AutopilotConfig, ContextItemId, Error, Result, SessionId, SessionSummary, Step,
};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::bus::{EventBus, SessionEvent, Subscription, Topic, TopicKey};
use crate::engine::{Capabilities, Capability, ChannelInput, StepEngine};
use crate::plugins::{PluginLoader, ResolvedPlugins};
use crate::session::{SessionState, SessionStore};

/// Handles of one run of a session.
struct RunningSession {
    /// Bus the run publishes on
    bus: EventBus,
    /// Cancels the run
    cancel: CancellationToken,
    /// Feeds `WaitForInput` steps
    input: mpsc::UnboundedSender<String>,
    /// Task driving the engine
    task: Option<JoinHandle<Result<SessionState>>>,
}

impl RunningSession {
    fn is_active(&self) -> bool {
        self.task.as_ref().is_some_and(|task| !task.is_finished())
    }
}

/// Entry point for collaborators: session lifecycle, streaming, and input.
pub struct SessionManager {
    config: AutopilotConfig,
    loader: PluginLoader,
    store: SessionStore,
    sessions: Mutex<HashMap<SessionId, RunningSession>>,
}

impl SessionManager {
    /// Manager with the built-in plugins, storing sessions where `config` says.
    #[must_use]
    pub fn new(config: AutopilotConfig) -> Self {
        let loader = PluginLoader::with_builtins(config.workspace.root_path.clone());
        Self::with_loader(config, loader)
    }

    /// Manager resolving plugins through `loader`.
    #[must_use]
    pub fn with_loader(config: AutopilotConfig, loader: PluginLoader) -> Self {
        let store = SessionStore::new(config.storage.sessions_dir.clone());
        Self {
            config,
            loader,
            store,
            sessions: Mutex::new(HashMap::new()),
        }
    }

    /// Store holding the persisted sessions.
    #[must_use]
    pub fn store(&self) -> &SessionStore {
        &self.store
    }

    /// Plugin loader used for new runs.
    #[must_use]
    pub fn loader(&self) -> &PluginLoader {
        &self.loader
    }

    fn sessions(&self) -> MutexGuard<'_, HashMap<SessionId, RunningSession>> {
        self.sessions.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn resolve(&self) -> Result<ResolvedPlugins> {
        self.loader.resolve(
            &self.config.session,
            Duration::from_millis(self.config.engine.validator_timeout_ms),
        )
    }

    fn is_active(&self, session_id: SessionId) -> bool {
        self.sessions()
            .get(&session_id)
            .is_some_and(RunningSession::is_active)
    }

    fn ensure_idle(&self, session_id: SessionId) -> Result<()> {
        if self.is_active(session_id) {
            return Err(Error::Other(format!("Session {session_id} is running")));
        }
        Ok(())
    }

    /// Creates a session and starts running it.
    ///
    /// Plugins are resolved before the session exists, so a configuration
    /// error leaves nothing behind.
    ///
    /// # Errors
    /// Returns a configuration error for unresolvable plugins, or an I/O error
    /// if the new session cannot be persisted.
    pub async fn create_session(&self, initial: Option<Step>) -> Result<SessionId> {
        let resolved = self.resolve()?;
        let state = SessionState::new(self.loader.workspace_root().to_path_buf());
        let session_id = state.session_id;
        self.store.save(&state).await?;
        info!(session_id = %session_id, "Created session");
        self.start(state, initial, resolved);
        Ok(session_id)
    }

    /// Continues a persisted, unfinished session with freshly resolved plugins.
    ///
    /// # Errors
    /// Returns an error if the session is unknown, running, finished, or its
    /// plugins cannot be resolved.
    pub async fn resume_session(&self, session_id: SessionId) -> Result<()> {
        self.ensure_idle(session_id)?;
        let state = self.store.load(session_id).await?;
        if state.status().is_terminal() {
            return Err(Error::Other(format!(
                "Session {session_id} already finished with status {:?}",
                state.status()
            )));
        }
        let resolved = self.resolve()?;
        info!(session_id = %session_id, history_len = state.history().len(), "Resuming session");
        self.start(state, None, resolved);
        Ok(())
    }

    fn start(&self, state: SessionState, initial: Option<Step>, resolved: ResolvedPlugins) {
        let session_id = state.session_id;
        let (input, sender) = ChannelInput::channel();
        let mut capabilities = resolved.capabilities;
        if capabilities.input.is_none() {
            capabilities.install(Capability::Input(Arc::new(input)));
        }

        let bus = EventBus::new();
        let cancel = CancellationToken::new();
        let engine = StepEngine::new(self.config.engine.clone(), bus.clone())
            .with_capabilities(capabilities)
            .with_validators(resolved.validators)
            .with_loader(self.loader.clone())
            .with_store(self.store.clone())
            .with_cancellation(cancel.clone())
            .with_disallowed_kinds(resolved.disallowed_kinds);
        let policy = resolved.policy;

        let teardown = bus.clone();
        let task = tokio::spawn(async move {
            let result = engine.run_session(initial, policy.as_ref(), state).await;
            if let Err(run_error) = &result {
                error!(session_id = %session_id, "Session run failed: {run_error}");
            }
            teardown.close();
            result
        });

        self.sessions().insert(
            session_id,
            RunningSession {
                bus,
                cancel,
                input: sender,
                task: Some(task),
            },
        );
    }

    /// Latest persisted snapshot of a session.
    ///
    /// # Errors
    /// Returns `SessionNotFound` for an unknown id.
    pub async fn get_session(&self, session_id: SessionId) -> Result<SessionState> {
        self.store.load(session_id).await
    }

    /// Summaries of every persisted session, oldest first.
    ///
    /// # Errors
    /// Returns an error if the storage directory cannot be read.
    pub async fn list_sessions(&self) -> Result<Vec<SessionSummary>> {
        self.store.list().await
    }

    /// Cancels any run of the session, then removes its record.
    ///
    /// # Errors
    /// Returns `SessionNotFound` for an unknown id.
    pub async fn delete_session(&self, session_id: SessionId) -> Result<()> {
        let running = self.sessions().remove(&session_id);
        if let Some(mut running) = running {
            running.cancel.cancel();
            if let Some(task) = running.task.take()
                && let Err(join_error) = task.await
            {
                error!(session_id = %session_id, "Session task ended abnormally: {join_error}");
            }
        }
        self.store.delete(session_id).await?;
        info!(session_id = %session_id, "Deleted session");
        Ok(())
    }

    /// Subscribes to one topic of the session's current run.
    ///
    /// Only events published after this call are delivered.
    ///
    /// # Errors
    /// Returns `SessionNotFound` for an unknown id, or an error if the session
    /// has no run in progress.
    pub async fn subscribe(
        &self,
        session_id: SessionId,
        topic: Topic,
    ) -> Result<Subscription<SessionEvent>> {
        if let Some(running) = self.sessions().get(&session_id)
            && running.is_active()
        {
            return Ok(running.bus.subscribe(&TopicKey { session_id, topic }));
        }
        if self.store.contains(session_id).await {
            Err(Error::Other(format!("Session {session_id} is not running")))
        } else {
            Err(Error::SessionNotFound(session_id))
        }
    }

    /// Supplies text to the session's next `WaitForInput` step.
    ///
    /// # Errors
    /// Returns `SessionNotFound` if the session has no run in progress.
    pub fn give_input(&self, session_id: SessionId, text: impl Into<String>) -> Result<()> {
        let sessions = self.sessions();
        let running = sessions
            .get(&session_id)
            .ok_or(Error::SessionNotFound(session_id))?;
        running
            .input
            .send(text.into())
            .map_err(|_closed| Error::Capability(format!("Session {session_id} no longer accepts input")))
    }

    /// Signals cancellation to the session's run. Idle sessions are unaffected.
    ///
    /// # Errors
    /// Returns `SessionNotFound` for an unknown id.
    pub async fn cancel_session(&self, session_id: SessionId) -> Result<()> {
        if let Some(running) = self.sessions().get(&session_id) {
            debug!(session_id = %session_id, "Cancelling session");
            running.cancel.cancel();
            return Ok(());
        }
        if self.store.contains(session_id).await {
            Ok(())
        } else {
            Err(Error::SessionNotFound(session_id))
        }
    }

    /// Waits for the session's run to end and returns its final state.
    ///
    /// An idle session returns its persisted state.
    ///
    /// # Errors
    /// Returns the run's error, or `SessionNotFound` for an unknown id.
    pub async fn wait(&self, session_id: SessionId) -> Result<SessionState> {
        let task = self
            .sessions()
            .get_mut(&session_id)
            .and_then(|running| running.task.take());
        match task {
            Some(task) => task
                .await
                .map_err(|join_error| Error::Other(format!("Session task failed: {join_error}")))?,
            None => self.store.load(session_id).await,
        }
    }

    /// Renames an idle session.
    ///
    /// # Errors
    /// Returns an error if the session is unknown or running.
    pub async fn set_title(&self, session_id: SessionId, title: impl Into<String>) -> Result<()> {
        self.ensure_idle(session_id)?;
        let mut state = self.store.load(session_id).await?;
        state.title = title.into();
        self.store.save(&state).await
    }

    fn capabilities(&self) -> Result<Capabilities> {
        let mut capabilities = Capabilities::new();
        for spec in &self.config.session.capabilities {
            capabilities.install(self.loader.load_capability(spec)?);
        }
        Ok(capabilities)
    }

    fn publish_context(&self, state: &SessionState) {
        if let Some(running) = self.sessions().get(&state.session_id) {
            let event = SessionEvent::ContextUpdated {
                session_id: state.session_id,
                item_count: state.context_items().len(),
            };
            running.bus.publish(&TopicKey::lifecycle(state.session_id), event);
        }
    }

    /// Asks the context provider titled `provider` for `query_id` and adds the
    /// item to an idle session.
    ///
    /// # Errors
    /// Returns an error if the session is unknown or running, the provider is
    /// not configured, or the provider fails.
    pub async fn add_context(
        &self,
        session_id: SessionId,
        provider: &str,
        query_id: &str,
    ) -> Result<ContextItemId> {
        self.ensure_idle(session_id)?;
        let mut state = self.store.load(session_id).await?;
        let capabilities = self.capabilities()?;
        let item = capabilities.context_provider(provider)?.provide(query_id).await?;
        let item_id = item.id.clone();
        state.add_context_item(item);
        self.store.save(&state).await?;
        debug!(session_id = %session_id, item = %item_id, "Added context item");
        self.publish_context(&state);
        Ok(item_id)
    }

    /// Removes a context item from an idle session.
    ///
    /// # Errors
    /// Returns an error if the session is unknown, running, or lacks the item.
    pub async fn remove_context(&self, session_id: SessionId, item_id: &ContextItemId) -> Result<()> {
        self.ensure_idle(session_id)?;
        let mut state = self.store.load(session_id).await?;
        state
            .remove_context_item(item_id)
            .ok_or_else(|| Error::Other(format!("Context item {item_id} not found")))?;
        self.store.save(&state).await?;
        self.publish_context(&state);
        Ok(())
    }

    /// Replaces the content of an editable context item in an idle session.
    ///
    /// # Errors
    /// Returns an error if the session is unknown or running, or the item is
    /// missing or not editable.
    pub async fn edit_context(
        &self,
        session_id: SessionId,
        item_id: &ContextItemId,
        content: &str,
    ) -> Result<()> {
        self.ensure_idle(session_id)?;
        let mut state = self.store.load(session_id).await?;
        state.edit_context_item(item_id, content)?;
        self.store.save(&state).await?;
        debug!(session_id = %session_id, item = %item_id, "Edited context item");
        self.publish_context(&state);
        Ok(())
    }

    /// Removes every context item from an idle session.
    ///
    /// # Errors
    /// Returns an error if the session is unknown or running.
    pub async fn clear_context(&self, session_id: SessionId) -> Result<()> {
        self.ensure_idle(session_id)?;
        let mut state = self.store.load(session_id).await?;
        state.clear_context();
        self.store.save(&state).await?;
        self.publish_context(&state);
        Ok(())
    }
}
