use std::fs::{self, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use tracing_subscriber::{fmt, EnvFilter};

use crate::app_dirs::AppDirs;

/// Install the global subscriber. Output goes to `pocketed.log` in the state
/// dir so it never interleaves with the terminal status line; `RUST_LOG`
/// overrides the default `info` filter. Returns the log file path, or `None`
/// if logging stays off because the file could not be opened.
pub fn init() -> Option<PathBuf> {
    let path = AppDirs::log_path()?;
    init_at(&path).ok().map(|()| path)
}

pub fn init_at(path: &Path) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let file = OpenOptions::new().create(true).append(true).open(path)?;

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let _ = fmt()
        .with_env_filter(env_filter)
        .with_ansi(false)
        .with_writer(Mutex::new(file))
        .try_init();
    Ok(())
}
