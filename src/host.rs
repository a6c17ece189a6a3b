// Filesystem and account primitives used by the reconciler

use anyhow::{anyhow, Context, Result};
use nix::unistd::{Gid, Uid, User};
use std::fs::{self, DirBuilder, File, OpenOptions};
use std::io::Write;
use std::os::fd::AsRawFd;
use std::os::unix::fs::{DirBuilderExt, OpenOptionsExt, PermissionsExt};
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::store;

/// A local account from the user database
#[derive(Debug, Clone)]
pub struct UserAccount {
    pub name: String,
    pub uid: Uid,
    pub gid: Gid,
    pub home: PathBuf,
}

/// Look up an account by name
pub fn lookup_user(name: &str) -> Result<UserAccount> {
    let user = User::from_name(name)
        .with_context(|| format!("Failed to look up user '{}'", name))?
        .ok_or_else(|| anyhow!("User '{}' does not exist", name))?;

    Ok(UserAccount {
        name: user.name,
        uid: user.uid,
        gid: user.gid,
        home: user.dir,
    })
}

/// Host state the reconciler reads and mutates.
///
/// Implementations only perform the primitive; deciding whether a step is
/// needed is the reconciler's job.
pub trait Host {
    /// Home directory of `user`, or of the process owner when `None`
    fn home_dir(&self, user: Option<&str>) -> Result<PathBuf>;

    fn dir_exists(&self, path: &Path) -> bool;

    fn file_exists(&self, path: &Path) -> bool;

    /// Create `path` (and missing parents) with `mode`, owned by `owner` if given
    fn create_dir(&self, path: &Path, mode: u32, owner: Option<&str>) -> Result<()>;

    /// Create `path` holding `contents` with `mode`, owned by `owner` if given
    fn create_file(&self, path: &Path, contents: &str, mode: u32, owner: Option<&str>)
        -> Result<()>;

    /// Insert an auth entry for `registry` into the store. True if it changed.
    fn ensure_auth_entry(&self, store: &Path, registry: &str) -> Result<bool>;

    /// Drop the auth entry for `registry` from the store. True if it changed.
    fn remove_auth_entry(&self, store: &Path, registry: &str) -> Result<bool>;
}

/// The local machine
#[derive(Debug, Default)]
pub struct SystemHost;

impl SystemHost {
    /// Set `mode` and ownership through an already opened descriptor, so a
    /// path swapped for a symlink in the meantime is never followed.
    fn secure(file: &File, path: &Path, mode: u32, owner: Option<&str>) -> Result<()> {
        // Creation modes are filtered by the umask
        file.set_permissions(fs::Permissions::from_mode(mode))
            .with_context(|| format!("Failed to set mode on {}", path.display()))?;

        let Some(name) = owner else {
            return Ok(());
        };
        let account = lookup_user(name)?;

        // Only root can hand files to another account
        if !nix::unistd::geteuid().is_root() {
            debug!(
                "Not running as root, leaving ownership of {} unchanged",
                path.display()
            );
            return Ok(());
        }

        nix::unistd::fchown(file.as_raw_fd(), Some(account.uid), Some(account.gid))
            .with_context(|| format!("Failed to chown {} to {}", path.display(), name))?;
        Ok(())
    }
}

impl Host for SystemHost {
    fn home_dir(&self, user: Option<&str>) -> Result<PathBuf> {
        match user {
            Some(name) => Ok(lookup_user(name)?.home),
            None => dirs::home_dir().context("Failed to get home directory"),
        }
    }

    fn dir_exists(&self, path: &Path) -> bool {
        fs::symlink_metadata(path)
            .map(|meta| meta.is_dir())
            .unwrap_or(false)
    }

    /// True for anything at `path`, dangling symlinks included
    fn file_exists(&self, path: &Path) -> bool {
        fs::symlink_metadata(path).is_ok()
    }

    fn create_dir(&self, path: &Path, mode: u32, owner: Option<&str>) -> Result<()> {
        DirBuilder::new()
            .recursive(true)
            .mode(mode)
            .create(path)
            .with_context(|| format!("Failed to create directory {}", path.display()))?;

        // Fails with ELOOP when the last component is a symlink
        let dir = OpenOptions::new()
            .read(true)
            .custom_flags(nix::libc::O_NOFOLLOW | nix::libc::O_DIRECTORY)
            .open(path)
            .with_context(|| format!("Failed to open directory {}", path.display()))?;

        Self::secure(&dir, path, mode, owner)
    }

    fn create_file(
        &self,
        path: &Path,
        contents: &str,
        mode: u32,
        owner: Option<&str>,
    ) -> Result<()> {
        let mut file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .custom_flags(nix::libc::O_NOFOLLOW)
            .mode(mode)
            .open(path)
            .with_context(|| format!("Failed to create {}", path.display()))?;
        file.write_all(contents.as_bytes())
            .with_context(|| format!("Failed to write {}", path.display()))?;

        Self::secure(&file, path, mode, owner)
    }

    fn ensure_auth_entry(&self, store: &Path, registry: &str) -> Result<bool> {
        store::ensure_auth_entry(store, registry)
    }

    fn remove_auth_entry(&self, store: &Path, registry: &str) -> Result<bool> {
        store::remove_auth_entry(store, registry)
    }
}
