// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Path resolution utilities.
//!
//! Determine where pilo keeps its per-user files: the tracked configuration
//! directory, the settings file, and the backup store. None of these
//! functions check whether the returned path actually exists.

use std::path::PathBuf;

/// Determine absolute path to user's home directory.
///
/// # Errors
///
/// - Return [`NoWayHome`] if home directory path cannot be determined.
pub fn home_dir() -> Result<PathBuf> {
    dirs::home_dir().ok_or(NoWayHome)
}

/// Determine default absolute path to the tracked configuration directory.
///
/// Uses `$XDG_CONFIG_HOME/pilo`.
///
/// # Errors
///
/// - Return [`NoWayHome`] if home directory path cannot be determined.
pub fn default_repo_dir() -> Result<PathBuf> {
    dirs::config_dir()
        .map(|path| path.join("pilo"))
        .ok_or(NoWayHome)
}

/// Determine default absolute path to the settings file.
///
/// Uses `$XDG_CONFIG_HOME/pilo.toml`, which sits beside the tracked
/// configuration directory rather than inside it. Machine-specific values
/// like SSH key paths never end up in commit history this way.
///
/// # Errors
///
/// - Return [`NoWayHome`] if home directory path cannot be determined.
pub fn default_settings_file() -> Result<PathBuf> {
    dirs::config_dir()
        .map(|path| path.join("pilo.toml"))
        .ok_or(NoWayHome)
}

/// Determine default absolute path to the backup store.
///
/// Uses XDG Base Directory path `$XDG_DATA_HOME/pilo/backups`.
///
/// # Errors
///
/// - Return [`NoWayHome`] if home directory path cannot be determined.
///
/// # See Also
///
/// - [XDG Base Directory](https://wiki.archlinux.org/title/XDG_Base_Directory)
pub fn default_backup_store_dir() -> Result<PathBuf> {
    dirs::data_dir()
        .map(|path| path.join("pilo").join("backups"))
        .ok_or(NoWayHome)
}

/// No way to determine user's home directory.
///
/// # See Also
///
/// - [`dirs::home_dir`](https://docs.rs/dirs/latest/dirs/fn.home_dir.html)
#[derive(Clone, Debug, thiserror::Error)]
#[error("cannot determine absolute path to user's home directory")]
pub struct NoWayHome;

/// Friendly result alias :3
pub type Result<T, E = NoWayHome> = std::result::Result<T, E>;
