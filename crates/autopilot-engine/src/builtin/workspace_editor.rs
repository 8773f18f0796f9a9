use std::path::{Path, PathBuf};

use async_trait::async_trait;
use autopilot_core::{Editor, Error, Observation, Result};
use tokio::fs;
use tokio::task::spawn_blocking;
use tracing::debug;
use walkdir::{DirEntry, WalkDir};

use super::resolve_in_workspace;

/// Directories never listed as visible files.
const SKIPPED_DIRS: [&str; 3] = ["target", "node_modules", ".git"];

/// Editor over the files of a workspace root.
///
/// Visible files are every regular file under the root, relative and sorted.
/// An edit replaces the file's contents with the instruction text.
#[derive(Debug, Clone)]
pub struct WorkspaceEditor {
    root: PathBuf,
}

impl WorkspaceEditor {
    /// Editor rooted at `root`.
    #[must_use]
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    /// Workspace root.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }
}

fn is_skipped(entry: &DirEntry) -> bool {
    entry.depth() > 0
        && entry.file_type().is_dir()
        && entry
            .file_name()
            .to_str()
            .is_some_and(|name| SKIPPED_DIRS.contains(&name) || name.starts_with('.'))
}

fn list_files(root: &Path) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for entry in WalkDir::new(root).into_iter().filter_entry(|entry| !is_skipped(entry)) {
        let entry = entry.map_err(|error| Error::Capability(format!("walk failed: {error}")))?;
        if entry.file_type().is_file()
            && let Ok(relative) = entry.path().strip_prefix(root)
        {
            files.push(relative.to_path_buf());
        }
    }
    files.sort();
    Ok(files)
}

#[async_trait]
impl Editor for WorkspaceEditor {
    async fn visible_files(&self) -> Result<Vec<PathBuf>> {
        let root = self.root.clone();
        spawn_blocking(move || list_files(&root))
            .await
            .map_err(|error| Error::Capability(format!("listing task failed: {error}")))?
    }

    async fn edit_file(&self, path: &Path, instruction: &str) -> Result<Observation> {
        let target = resolve_in_workspace(&self.root, path)?;
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent).await?;
        }
        let mut tmp_name = target.as_os_str().to_owned();
        tmp_name.push(".autopilot.tmp");
        let tmp_path = PathBuf::from(tmp_name);
        fs::write(&tmp_path, instruction).await?;
        fs::rename(&tmp_path, &target).await?;

        debug!(path = %target.display(), bytes = instruction.len(), "Edited file");
        Ok(Observation::success(format!("Edited {}", path.display()))
            .with_payload("path", path.display().to_string())
            .with_payload("bytes", instruction.len()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn workspace() -> (TempDir, WorkspaceEditor) {
        let dir = match TempDir::new() {
            Ok(dir) => dir,
            Err(error) => panic!("tempdir failed: {error}"),
        };
        let editor = WorkspaceEditor::new(dir.path().to_path_buf());
        (dir, editor)
    }

    #[tokio::test]
    async fn test_edit_then_list() {
        let (_dir, editor) = workspace();
        for path in ["src/main.rs", "README.md", "target/debug/out", ".git/HEAD"] {
            let full = editor.root().join(path);
            if let Some(parent) = full.parent()
                && let Err(error) = std::fs::create_dir_all(parent)
            {
                panic!("mkdir failed: {error}");
            }
            if let Err(error) = std::fs::write(&full, "x") {
                panic!("write failed: {error}");
            }
        }

        let observation = match editor.edit_file(Path::new("src/lib.rs"), "pub fn answer() {}").await {
            Ok(observation) => observation,
            Err(error) => panic!("edit failed: {error}"),
        };
        assert!(observation.success);
        assert_eq!(observation.payload_str("path"), Some("src/lib.rs"));

        let files = match editor.visible_files().await {
            Ok(files) => files,
            Err(error) => panic!("list failed: {error}"),
        };
        assert_eq!(
            files,
            [
                PathBuf::from("README.md"),
                PathBuf::from("src/lib.rs"),
                PathBuf::from("src/main.rs")
            ]
        );
        assert!(matches!(
            std::fs::read_to_string(editor.root().join("src/lib.rs")).as_deref(),
            Ok("pub fn answer() {}")
        ));
    }

    #[tokio::test]
    async fn test_edit_outside_workspace_fails() {
        let (_dir, editor) = workspace();
        assert!(matches!(
            editor.edit_file(Path::new("../escape.txt"), "nope").await,
            Err(Error::Capability(_))
        ));
    }
}
