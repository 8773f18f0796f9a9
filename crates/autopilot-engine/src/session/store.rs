use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use autopilot_core::{Error, Result, SessionId, SessionSummary};
use serde_json::{from_slice, to_vec_pretty};
use tokio::fs;
use tokio::io::AsyncWriteExt as _;
use tracing::{debug, warn};
use uuid::Uuid;

use super::SessionState;

/// Durable storage for session records: one JSON file per session.
#[derive(Debug, Clone)]
pub struct SessionStore {
    /// Directory holding the records
    dir: PathBuf,
}

impl SessionStore {
    /// Store rooted at `dir`. The directory is created on first write.
    #[must_use]
    pub fn new(dir: PathBuf) -> Self {
        Self { dir }
    }

    /// Storage directory.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn record_path(&self, session_id: SessionId) -> PathBuf {
        self.dir.join(format!("{session_id}.json"))
    }

    /// Writes `state` atomically (temporary file, fsync, rename).
    ///
    /// Every write uses its own temporary file, so overlapping saves of one
    /// session never rename each other's file away.
    ///
    /// # Errors
    /// Returns an error if the record cannot be serialized or written.
    pub async fn save(&self, state: &SessionState) -> Result<()> {
        fs::create_dir_all(&self.dir).await?;
        let path = self.record_path(state.session_id);
        let tmp_path = self
            .dir
            .join(format!("{}.{}.tmp", state.session_id, Uuid::new_v4()));

        let mut contents = to_vec_pretty(state)?;
        contents.push(b'\n');

        let mut file = fs::File::create(&tmp_path).await?;
        file.write_all(&contents).await?;
        file.sync_all().await?;
        drop(file);
        fs::rename(&tmp_path, &path).await?;

        debug!(
            session_id = %state.session_id,
            entries = state.history().len(),
            path = %path.display(),
            "Persisted session"
        );
        Ok(())
    }

    /// Reads the record for `session_id`.
    ///
    /// # Errors
    /// Returns `SessionNotFound` if no record exists, or an error if it cannot be parsed.
    pub async fn load(&self, session_id: SessionId) -> Result<SessionState> {
        let path = self.record_path(session_id);
        let contents = match fs::read(&path).await {
            Ok(contents) => contents,
            Err(error) if error.kind() == ErrorKind::NotFound => {
                return Err(Error::SessionNotFound(session_id));
            }
            Err(error) => return Err(error.into()),
        };
        let state: SessionState = from_slice(&contents)?;
        debug!(session_id = %session_id, entries = state.history().len(), "Loaded session");
        Ok(state)
    }

    /// Whether a record exists for `session_id`.
    pub async fn contains(&self, session_id: SessionId) -> bool {
        fs::try_exists(self.record_path(session_id))
            .await
            .unwrap_or(false)
    }

    /// Deletes the record for `session_id`.
    ///
    /// # Errors
    /// Returns `SessionNotFound` if no record exists.
    pub async fn delete(&self, session_id: SessionId) -> Result<()> {
        match fs::remove_file(self.record_path(session_id)).await {
            Ok(()) => {
                debug!(session_id = %session_id, "Deleted session record");
                Ok(())
            }
            Err(error) if error.kind() == ErrorKind::NotFound => {
                Err(Error::SessionNotFound(session_id))
            }
            Err(error) => Err(error.into()),
        }
    }

    /// Summaries of every stored session, ordered by creation time then id.
    ///
    /// Unreadable records are skipped with a warning.
    ///
    /// # Errors
    /// Returns an error if the directory cannot be read.
    pub async fn list(&self) -> Result<Vec<SessionSummary>> {
        let mut entries = match fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(error) if error.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(error) => return Err(error.into()),
        };

        let mut summaries = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some("json") {
                continue;
            }
            let parsed = fs::read(&path)
                .await
                .map_err(Error::from)
                .and_then(|contents| from_slice::<SessionState>(&contents).map_err(Error::from));
            match parsed {
                Ok(state) => summaries.push(state.summary()),
                Err(error) => warn!(path = %path.display(), "Skipping unreadable session record: {error}"),
            }
        }

        summaries.sort_by(|left, right| {
            left.created_at
                .cmp(&right.created_at)
                .then_with(|| left.session_id.cmp(&right.session_id))
        });
        Ok(summaries)
    }
}
