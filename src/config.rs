// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Configuration layout.
//!
//! Specify the layout of the settings file that pilo uses to decide where the
//! tracked configuration directory lives, which remote it synchronizes with,
//! and how commits are published.
//!
//! Settings are plain data. Nothing in the synchronization engine reads them
//! implicitly; the caller converts them into an explicit
//! [`SyncCoordinator`](crate::sync::SyncCoordinator) once at start up.

use crate::path::{default_backup_store_dir, default_repo_dir, NoWayHome};

use serde::{Deserialize, Serialize};
use std::{
    fmt::{Display, Error as FmtError, Formatter, Result as FmtResult},
    fs,
    io::ErrorKind,
    path::{Path, PathBuf},
    str::FromStr,
};

/// Settings file layout.
///
/// # General Layout
///
/// Top-level keys describe the local side: which directory is tracked, where
/// backups go, which SSH key to use, and commit policy. The `[remote]` table
/// describes the single remote named "origin" that the tracked directory is
/// synchronized with.
///
/// Every key is optional. Missing keys fall back to defaults derived from
/// the XDG base directories.
#[derive(Default, Debug, PartialEq, Eq, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct Settings {
    /// Tracked configuration directory.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub repo_path: Option<PathBuf>,

    /// Directory holding backup archives.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub backup_store: Option<PathBuf>,

    /// Explicit private key to use for remote operations.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ssh_key_path: Option<PathBuf>,

    /// Synchronize with remote after every successful commit.
    pub push_on_commit: bool,

    /// Names of actions that should produce an automatic commit.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub commit_triggers: Vec<String>,

    /// Remote to synchronize with.
    pub remote: RemoteSettings,
}

impl Settings {
    /// Load settings from file.
    ///
    /// A missing file is not an error, default settings are returned
    /// instead.
    ///
    /// # Errors
    ///
    /// - Return [`ConfigError::Read`] if settings file exists but cannot be
    ///   read.
    /// - Return [`ConfigError::Deserialize`] if settings file is malformed.
    /// - Return [`ConfigError::ShellExpansion`] if a path cannot be expanded.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        match fs::read_to_string(path.as_ref()) {
            Ok(data) => data.parse(),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(Self::default()),
            Err(err) => Err(ConfigError::Read {
                source: err,
                path: path.as_ref().to_path_buf(),
            }),
        }
    }

    /// Write settings to file, creating parent directories as needed.
    ///
    /// # Errors
    ///
    /// - Return [`ConfigError::Serialize`] if settings cannot be serialized.
    /// - Return [`ConfigError::Write`] if settings file cannot be written.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let data = toml::ser::to_string_pretty(self)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|err| ConfigError::Write {
                source: err,
                path: path.to_path_buf(),
            })?;
        }

        fs::write(path, data).map_err(|err| ConfigError::Write {
            source: err,
            path: path.to_path_buf(),
        })
    }

    /// Tracked configuration directory, or the XDG default.
    ///
    /// # Errors
    ///
    /// - Return [`ConfigError::NoWayHome`] if no default can be determined.
    pub fn repo_path(&self) -> Result<PathBuf> {
        match &self.repo_path {
            Some(path) => Ok(path.clone()),
            None => Ok(default_repo_dir()?),
        }
    }

    /// Backup store directory, or the XDG default.
    ///
    /// # Errors
    ///
    /// - Return [`ConfigError::NoWayHome`] if no default can be determined.
    pub fn backup_store(&self) -> Result<PathBuf> {
        match &self.backup_store {
            Some(path) => Ok(path.clone()),
            None => Ok(default_backup_store_dir()?),
        }
    }
}

impl FromStr for Settings {
    type Err = ConfigError;

    fn from_str(data: &str) -> Result<Self, Self::Err> {
        let mut settings: Settings = toml::de::from_str(data).map_err(ConfigError::Deserialize)?;

        // INVARIANT: Perform shell expansion on every path field.
        settings.repo_path = settings.repo_path.map(expand_path).transpose()?;
        settings.backup_store = settings.backup_store.map(expand_path).transpose()?;
        settings.ssh_key_path = settings.ssh_key_path.map(expand_path).transpose()?;

        Ok(settings)
    }
}

impl Display for Settings {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        fmt.write_str(
            toml::ser::to_string_pretty(self)
                .map_err(ConfigError::Serialize)?
                .as_str(),
        )
    }
}

/// Remote settings.
///
/// The remote is always registered as "origin" in the tracked repository.
#[derive(Default, Debug, PartialEq, Eq, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RemoteSettings {
    /// URL of remote repository. Empty means no remote is configured.
    pub url: String,

    /// Branch to restore from instead of the remote's default branch.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub branch: Option<String>,
}

impl RemoteSettings {
    /// Remote URL, if one is configured.
    pub fn url(&self) -> Option<&str> {
        let url = self.url.trim();
        (!url.is_empty()).then_some(url)
    }
}

fn expand_path(path: PathBuf) -> Result<PathBuf> {
    Ok(PathBuf::from(
        shellexpand::full(path.to_string_lossy().as_ref())
            .map_err(ConfigError::ShellExpansion)?
            .into_owned(),
    ))
}

/// Configuration error types.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to deserialize configuration.
    #[error(transparent)]
    Deserialize(#[from] toml::de::Error),

    /// Failed to serialize configuration.
    #[error(transparent)]
    Serialize(#[from] toml::ser::Error),

    /// Failed to perform shell expansion on configuration.
    #[error(transparent)]
    ShellExpansion(#[from] shellexpand::LookupError<std::env::VarError>),

    /// Failed to read settings file.
    #[error("failed to read settings file at {:?}", path.display())]
    Read {
        #[source]
        source: std::io::Error,
        path: PathBuf,
    },

    /// Failed to write settings file.
    #[error("failed to write settings file at {:?}", path.display())]
    Write {
        #[source]
        source: std::io::Error,
        path: PathBuf,
    },

    /// Failed to determine default path.
    #[error(transparent)]
    NoWayHome(#[from] NoWayHome),
}

impl From<ConfigError> for FmtError {
    fn from(_: ConfigError) -> Self {
        FmtError
    }
}

/// Friendly result alias :3
type Result<T, E = ConfigError> = std::result::Result<T, E>;
