//! Tracing setup for binaries and tests embedding the engine.

use std::fs::{OpenOptions, create_dir_all};
use std::io::stderr;
use std::path::Path;
use std::sync::Arc;

use autopilot_core::Result;
use tracing_subscriber::{
    EnvFilter, Registry, fmt, layer::SubscriberExt as _, util::SubscriberInitExt as _,
};

/// Filter used when `RUST_LOG` is unset.
pub const DEFAULT_FILTER: &str = "autopilot_engine=info,autopilot_core=info";

/// Installs the global tracing subscriber.
///
/// Logs go to stderr, or are appended to `log_file` without ANSI colors.
/// Returns `Ok(false)` when a subscriber was already installed.
///
/// # Errors
/// Returns an error if the log file cannot be opened.
pub fn init_tracing(log_file: Option<&Path>) -> Result<bool> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| DEFAULT_FILTER.into());

    let installed = match log_file {
        Some(path) => {
            if let Some(parent) = path.parent() {
                create_dir_all(parent)?;
            }
            let file = OpenOptions::new().create(true).append(true).open(path)?;
            Registry::default()
                .with(filter)
                .with(
                    fmt::layer()
                        .with_writer(Arc::new(file))
                        .with_ansi(false)
                        .with_target(true)
                        .with_level(true),
                )
                .try_init()
                .is_ok()
        }
        None => Registry::default()
            .with(filter)
            .with(fmt::layer().with_writer(stderr).with_target(true))
            .try_init()
            .is_ok(),
    };
    Ok(installed)
}
