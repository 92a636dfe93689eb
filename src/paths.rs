//! Resolve snapshot file names to writable absolute paths.

use std::path::{Path, PathBuf};

const APP_DIR: &str = "convo-rag";

/// Maps a file name to a writable absolute path. Never fails.
pub trait PathResolver: Send + Sync {
    fn resolve(&self, file_name: &str) -> PathBuf;
}

/// Uses the host-provided directory when there is one, otherwise the platform
/// local data directory, otherwise `./data`.
#[derive(Debug, Clone, Default)]
pub struct DataDirResolver {
    host_dir: Option<PathBuf>,
}

impl DataDirResolver {
    pub fn new(host_dir: Option<PathBuf>) -> Self {
        Self { host_dir }
    }

    /// Directory that [`resolve`](PathResolver::resolve) joins file names onto.
    pub fn base_dir(&self) -> PathBuf {
        if let Some(dir) = &self.host_dir {
            return absolutize(dir);
        }
        match dirs::data_local_dir() {
            Some(dir) => dir.join(APP_DIR),
            None => absolutize(Path::new("data")),
        }
    }
}

impl PathResolver for DataDirResolver {
    fn resolve(&self, file_name: &str) -> PathBuf {
        let base = self.base_dir();
        if let Err(e) = std::fs::create_dir_all(&base) {
            tracing::warn!(dir = %base.display(), error = %e, "could not create data directory");
        }
        base.join(file_name)
    }
}

fn absolutize(path: &Path) -> PathBuf {
    if path.is_absolute() {
        return path.to_path_buf();
    }
    std::env::current_dir()
        .map(|cwd| cwd.join(path))
        .unwrap_or_else(|_| path.to_path_buf())
}
