// Copyright © 2026 Hypermesh Foundation. All rights reserved.
// Licensed under the Business Source License 1.1.
// See the LICENSE file in the repository root for full license text.

//! Tick lock -- at most one engine process ticks at a time.

use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use tracing::warn;

#[derive(Debug, thiserror::Error)]
pub enum LockError {
    #[error("lock file {0} exists; another engine is running or a previous run crashed")]
    Held(PathBuf),

    #[error("lock file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Lock file held for the lifetime of the value; removed on drop.
#[derive(Debug)]
pub struct TickLock {
    path: PathBuf,
}

impl TickLock {
    pub fn acquire(path: &Path) -> Result<Self, LockError> {
        let mut file = match OpenOptions::new().write(true).create_new(true).open(path) {
            Ok(f) => f,
            Err(e) if e.kind() == ErrorKind::AlreadyExists => return Err(LockError::Held(path.to_path_buf())),
            Err(source) => return Err(LockError::Io { path: path.to_path_buf(), source }),
        };
        writeln!(file, "{}", std::process::id())
            .map_err(|source| LockError::Io { path: path.to_path_buf(), source })?;
        Ok(Self { path: path.to_path_buf() })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for TickLock {
    fn drop(&mut self) {
        if let Err(e) = fs::remove_file(&self.path) {
            warn!(path = %self.path.display(), error = %e, "failed to remove lock file");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_acquire_fails_until_release() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("engine.lock");
        let lock = TickLock::acquire(&path).unwrap();
        assert!(matches!(TickLock::acquire(&path), Err(LockError::Held(_))));
        drop(lock);
        assert!(!path.exists());
        let again = TickLock::acquire(&path).unwrap();
        assert_eq!(again.path(), path.as_path());
    }

    #[test]
    fn missing_directory_is_io_error() {
        let err = TickLock::acquire(Path::new("/nonexistent-dir/engine.lock")).unwrap_err();
        assert!(matches!(err, LockError::Io { .. }));
    }
}
