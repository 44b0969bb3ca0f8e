// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Exclusive per-repository lock.
//!
//! Restore, sync, commit, and backup all rewrite the tracked directory in
//! several steps. Two processes interleaving those steps on the same
//! directory can lose data, so each operation holds an OS-level exclusive
//! lock for its whole duration. The lock lives in a sibling file named
//! `.<name>.lock` next to the tracked directory, since the directory itself
//! is deleted and recreated during a working tree restore.
//!
//! Acquisition blocks until the current holder is done. The lock is released
//! when the guard is dropped.

use fs2::FileExt;
use std::{
    fs::{self, File, OpenOptions},
    path::{Path, PathBuf},
};
use tracing::{debug, info};

/// Exclusive lock on a tracked directory.
#[derive(Debug)]
pub struct RepoLock {
    path: PathBuf,
    file: File,
}

impl RepoLock {
    /// Acquire exclusive lock for tracked directory at `repo_path`.
    ///
    /// # Errors
    ///
    /// - Return [`LockError::Create`] if lock file cannot be created.
    /// - Return [`LockError::Acquire`] if OS lock cannot be taken.
    pub fn acquire(repo_path: impl AsRef<Path>) -> Result<Self> {
        let path = lock_path(repo_path.as_ref())?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|err| LockError::Create {
                source: err,
                path: path.clone(),
            })?;
        }

        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&path)
            .map_err(|err| LockError::Create {
                source: err,
                path: path.clone(),
            })?;

        match file.try_lock_exclusive() {
            Ok(()) => (),
            Err(err) if err.kind() == fs2::lock_contended_error().kind() => {
                info!("waiting for lock on {:?}", path.display());
                file.lock_exclusive().map_err(|err| LockError::Acquire {
                    source: err,
                    path: path.clone(),
                })?;
            }
            Err(err) => {
                return Err(LockError::Acquire {
                    source: err,
                    path: path.clone(),
                })
            }
        }

        debug!("acquired lock {:?}", path.display());
        Ok(Self { path, file })
    }

    /// Path to lock file.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for RepoLock {
    fn drop(&mut self) {
        if let Err(err) = FileExt::unlock(&self.file) {
            debug!("failed to release lock {:?}: {err}", self.path.display());
        }
    }
}

/// Path of the lock file guarding `repo_path`.
///
/// # Errors
///
/// - Return [`LockError::NoName`] if `repo_path` has no final component.
pub fn lock_path(repo_path: &Path) -> Result<PathBuf> {
    let name = repo_path
        .file_name()
        .ok_or_else(|| LockError::NoName(repo_path.to_path_buf()))?;
    let mut lock_name = std::ffi::OsString::from(".");
    lock_name.push(name);
    lock_name.push(".lock");

    Ok(repo_path.with_file_name(lock_name))
}

/// Lock error types.
#[derive(Debug, thiserror::Error)]
pub enum LockError {
    #[error("cannot derive lock file name from {:?}", .0.display())]
    NoName(PathBuf),

    #[error("failed to create lock file {:?}", path.display())]
    Create {
        #[source]
        source: std::io::Error,
        path: PathBuf,
    },

    #[error("failed to acquire lock {:?}", path.display())]
    Acquire {
        #[source]
        source: std::io::Error,
        path: PathBuf,
    },
}

/// Friendly result alias :3
pub type Result<T, E = LockError> = std::result::Result<T, E>;
