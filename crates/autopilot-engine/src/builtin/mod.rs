//! Built-in capability implementations.

use std::path::{Component, Path, PathBuf};

use autopilot_core::{Error, Result};

mod echo_model;
mod file_context;
mod workspace_editor;

pub use echo_model::EchoModel;
pub use file_context::FileContextProvider;
pub use workspace_editor::WorkspaceEditor;

/// Resolves `path` inside `root`, rejecting paths that would leave it.
pub(crate) fn resolve_in_workspace(root: &Path, path: &Path) -> Result<PathBuf> {
    let relative = if path.is_absolute() {
        path.strip_prefix(root).map_err(|_| {
            Error::Capability(format!(
                "{} is outside the workspace {}",
                path.display(),
                root.display()
            ))
        })?
    } else {
        path
    };
    if relative
        .components()
        .any(|component| !matches!(component, Component::Normal(_) | Component::CurDir))
    {
        return Err(Error::Capability(format!(
            "{} escapes the workspace",
            path.display()
        )));
    }
    Ok(root.join(relative))
}
