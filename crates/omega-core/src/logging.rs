//! Diagnostics go to `$XDG_STATE_HOME/omega/omega.log`; the status reporter
//! owns the terminal while `omega run` is active. Stderr is the fallback.

use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::{anyhow, Context, Result};
use tracing_subscriber::EnvFilter;

const DEFAULT_FILTER: &str = "info,omega=debug,omega_core=debug,omega_cli=debug";

pub fn default_log_path() -> Result<PathBuf> {
    let dirs = xdg::BaseDirectories::with_prefix("omega")?;
    Ok(dirs.get_state_home().join("omega.log"))
}

fn open_append(path: &Path) -> Result<File> {
    if let Some(dir) = path.parent() {
        fs::create_dir_all(dir).with_context(|| format!("create {}", dir.display()))?;
    }
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("open {}", path.display()))
}

/// Install the global subscriber, appending to the log file. Returns the file
/// path. On `Err` the caller should use `init_logging_stderr` instead.
pub fn init_logging() -> Result<PathBuf> {
    let path = default_log_path()?;
    let file = open_append(&path)?;

    tracing_subscriber::fmt()
        .with_env_filter(env_filter())
        .with_writer(Mutex::new(file))
        .with_ansi(false)
        .try_init()
        .map_err(|e| anyhow!("install tracing subscriber: {}", e))?;

    tracing::info!(path = %path.display(), "omega logging initialized");
    Ok(path)
}

pub fn init_logging_stderr() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter())
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .try_init();
}

/// `RUST_LOG` wins over the built-in filter.
fn env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER))
}
