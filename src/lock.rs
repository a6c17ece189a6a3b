// Host-wide run lock serializing reconciliation passes

use anyhow::{Context, Result};
use nix::errno::Errno;
use nix::fcntl::{Flock, FlockArg};
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Exclusive advisory lock, released on drop
pub struct RunLock {
    path: PathBuf,
    _lock: Flock<File>,
}

impl RunLock {
    /// Take the lock without waiting. Fails if another run holds it.
    pub fn acquire(path: &Path) -> Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(path)
            .with_context(|| format!("Failed to open lock file {}", path.display()))?;

        let lock = match Flock::lock(file, FlockArg::LockExclusiveNonblock) {
            Ok(lock) => lock,
            Err((_, Errno::EWOULDBLOCK)) => anyhow::bail!(
                "Another regauth run holds {}. Try again once it finishes.",
                path.display()
            ),
            Err((_, errno)) => {
                return Err(errno).with_context(|| format!("Failed to lock {}", path.display()))
            }
        };

        debug!("Acquired run lock {}", path.display());
        Ok(Self {
            path: path.to_path_buf(),
            _lock: lock,
        })
    }

    #[cfg_attr(not(test), allow(dead_code))]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_second_acquire_fails_while_held() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("regauth.lock");

        let first = RunLock::acquire(&path).unwrap();
        assert_eq!(first.path(), path);
        assert!(RunLock::acquire(&path).is_err());

        drop(first);
        assert!(RunLock::acquire(&path).is_ok());
    }
}
