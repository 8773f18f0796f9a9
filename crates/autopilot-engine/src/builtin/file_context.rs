use std::path::{Path, PathBuf};

use async_trait::async_trait;
use autopilot_core::{ContextItem, ContextItemId, ContextProvider, Error, Result};
use tokio::fs;

use super::resolve_in_workspace;

/// Provides workspace files as editable context items.
///
/// The query id is a path relative to the workspace root.
#[derive(Debug, Clone)]
pub struct FileContextProvider {
    root: PathBuf,
}

impl FileContextProvider {
    /// Provider reading files under `root`.
    #[must_use]
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }
}

/// Item key for a path: characters outside `[0-9A-Za-z_-]` become `_`.
fn item_key(path: &str) -> String {
    path.chars()
        .map(|ch| {
            if ch.is_ascii_alphanumeric() || ch == '_' || ch == '-' {
                ch
            } else {
                '_'
            }
        })
        .collect()
}

#[async_trait]
impl ContextProvider for FileContextProvider {
    fn title(&self) -> &str {
        "file"
    }

    async fn provide(&self, query_id: &str) -> Result<ContextItem> {
        let path = resolve_in_workspace(&self.root, Path::new(query_id))?;
        let content = fs::read_to_string(&path).await.map_err(|error| {
            Error::Capability(format!("cannot read {}: {error}", path.display()))
        })?;
        Ok(ContextItem {
            id: ContextItemId::new(self.title(), item_key(query_id))?,
            name: query_id.to_owned(),
            description: format!("Contents of {query_id}"),
            content,
            editable: true,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_reads_file_into_editable_item() {
        let dir = match TempDir::new() {
            Ok(dir) => dir,
            Err(error) => panic!("tempdir failed: {error}"),
        };
        if let Err(error) = std::fs::write(dir.path().join("notes.md"), "remember the milk") {
            panic!("write failed: {error}");
        }
        let provider = FileContextProvider::new(dir.path().to_path_buf());

        let item = match provider.provide("notes.md").await {
            Ok(item) => item,
            Err(error) => panic!("provide failed: {error}"),
        };
        assert_eq!(item.id.to_string(), "file-notes_md");
        assert_eq!(item.content, "remember the milk");
        assert!(item.editable);

        assert!(matches!(
            provider.provide("missing.md").await,
            Err(Error::Capability(_))
        ));
    }
}
