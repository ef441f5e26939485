// Shared application state
// Built once at startup and shared read-only across all connections

use std::io;
use std::path::{Path, PathBuf};

use super::types::Config;

/// Immutable state shared by every connection task.
///
/// The root directory is canonicalized once at startup; a missing or
/// inaccessible root is a startup error that terminates the process.
pub struct AppState {
    pub config: Config,
    /// Canonical root directory, the boundary for all path resolution
    pub root: PathBuf,
}

impl AppState {
    pub fn new(config: Config) -> io::Result<Self> {
        let root = Path::new(&config.site.root).canonicalize().map_err(|e| {
            io::Error::new(
                e.kind(),
                format!("root directory '{}' is not usable: {e}", config.site.root),
            )
        })?;

        if !root.is_dir() {
            return Err(io::Error::new(
                io::ErrorKind::NotADirectory,
                format!("root path '{}' is not a directory", root.display()),
            ));
        }

        Ok(Self { config, root })
    }
}
