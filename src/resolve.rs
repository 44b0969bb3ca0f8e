// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Dirty working tree resolution.
//!
//! Before a destructive operation like a hard reset to the remote, a dirty
//! working tree must first be driven back to a clean state. The caller
//! always picks how through a [`RestoreStrategy`]; nothing in here guesses.
//!
//! Resolution walks through `Dirty -> Resolving -> Clean`, or ends in
//! `Failed`. Every strategy except [`RestoreStrategy::Discard`] durably
//! persists local changes first, either as a commit or as a backup archive.

use crate::{
    archive::{ArchiveError, BackupId, BackupStore},
    gateway::{CommitOutcome, GatewayError, VersionControl, WorkTreeStatus},
};

use chrono::Utc;
use git2::Oid;
use std::{
    fmt::{Display, Formatter, Result as FmtResult},
    path::{Path, PathBuf},
    str::FromStr,
};
use tracing::{info, instrument, warn};

const DEFAULT_COMMIT_MESSAGE: &str = "pilo: commit local changes before restore";

/// How to get rid of uncommitted changes before a destructive operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestoreStrategy {
    /// Commit all changes, then proceed.
    Commit,

    /// Hard reset, losing all uncommitted changes.
    Discard,

    /// Snapshot into the backup store, commit, then hard reset.
    Backup,
}

impl FromStr for RestoreStrategy {
    type Err = ResolveError;

    fn from_str(data: &str) -> Result<Self, Self::Err> {
        match data.trim().to_ascii_lowercase().as_str() {
            "commit" => Ok(Self::Commit),
            "discard" => Ok(Self::Discard),
            "backup" => Ok(Self::Backup),
            _ => Err(ResolveError::UnknownStrategy(data.to_string())),
        }
    }
}

impl Display for RestoreStrategy {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        match self {
            Self::Commit => fmt.write_str("commit"),
            Self::Discard => fmt.write_str("discard"),
            Self::Backup => fmt.write_str("backup"),
        }
    }
}

/// Resolution progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolveState {
    Dirty,
    Resolving,
    Clean,
    Failed,
}

impl Display for ResolveState {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        match self {
            Self::Dirty => fmt.write_str("dirty"),
            Self::Resolving => fmt.write_str("resolving"),
            Self::Clean => fmt.write_str("clean"),
            Self::Failed => fmt.write_str("failed"),
        }
    }
}

/// What a successful resolution did to persist local changes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    /// Changes committed, if there was anything left to commit.
    Committed(Option<Oid>),

    /// Changes thrown away.
    Discarded,

    /// Changes archived, and committed if possible.
    BackedUp {
        backup: BackupId,
        commit: Option<Oid>,
    },
}

/// Drive a dirty working tree back to clean.
#[derive(Debug)]
pub struct DirtyStateResolver<'a, V>
where
    V: VersionControl,
{
    vcs: &'a V,
    store: &'a BackupStore,
}

impl<'a, V> DirtyStateResolver<'a, V>
where
    V: VersionControl,
{
    /// Construct new resolver.
    pub fn new(vcs: &'a V, store: &'a BackupStore) -> Self {
        Self { vcs, store }
    }

    /// Resolve dirty working tree at `path` through `strategy`.
    ///
    /// The commit message is only used by [`RestoreStrategy::Commit`]. A
    /// generic message is used when none is given.
    ///
    /// # Errors
    ///
    /// - Return [`ResolveError::Commit`] if commit strategy cannot commit.
    /// - Return [`ResolveError::Archive`] if backup strategy cannot snapshot.
    ///   Nothing is modified in that case.
    /// - Return [`ResolveError::StillDirty`] if working tree is not clean
    ///   afterwards.
    /// - Return [`ResolveError::Gateway`] if any other git operation fails.
    #[instrument(skip(self), level = "debug")]
    pub fn resolve(
        &self,
        path: &Path,
        strategy: RestoreStrategy,
        message: Option<&str>,
    ) -> Result<Resolution> {
        info!("working tree is {}, resolving with {strategy}", ResolveState::Dirty);
        info!("working tree is {}", ResolveState::Resolving);

        let resolution = self
            .apply(path, strategy, message)
            .and_then(|resolution| match self.vcs.status(path)? {
                WorkTreeStatus::Clean => Ok(resolution),
                WorkTreeStatus::Dirty => Err(ResolveError::StillDirty {
                    path: path.to_path_buf(),
                    strategy,
                }),
            });

        match &resolution {
            Ok(_) => info!("working tree is {}", ResolveState::Clean),
            Err(err) => warn!("working tree resolution {}: {err}", ResolveState::Failed),
        }

        resolution
    }

    fn apply(
        &self,
        path: &Path,
        strategy: RestoreStrategy,
        message: Option<&str>,
    ) -> Result<Resolution> {
        match strategy {
            RestoreStrategy::Commit => {
                let message = message
                    .filter(|message| !message.trim().is_empty())
                    .unwrap_or(DEFAULT_COMMIT_MESSAGE);
                let commit = self.add_and_commit(path, message).map_err(ResolveError::Commit)?;
                Ok(Resolution::Committed(commit))
            }
            RestoreStrategy::Discard => {
                self.vcs.reset(path)?;
                Ok(Resolution::Discarded)
            }
            RestoreStrategy::Backup => {
                // INVARIANT: Snapshot must exist before anything is touched.
                let backup = self.store.create(path)?;
                info!("backed up working tree as {backup}");

                let message = format!("pilo-backup-{}", Utc::now().format("%Y%m%d-%H%M%S"));
                let commit = match self.add_and_commit(path, &message) {
                    Ok(commit) => commit,
                    Err(err) => {
                        warn!("backup commit failed, relying on archive {backup}: {err}");
                        None
                    }
                };

                self.vcs.reset(path)?;
                Ok(Resolution::BackedUp { backup, commit })
            }
        }
    }

    fn add_and_commit(&self, path: &Path, message: &str) -> Result<Option<Oid>, GatewayError> {
        self.vcs.add(path)?;
        match self.vcs.commit(path, message)? {
            CommitOutcome::Created(oid) => Ok(Some(oid)),
            CommitOutcome::NothingToCommit => Ok(None),
        }
    }
}

/// Dirty state resolution error types.
#[derive(Debug, thiserror::Error)]
pub enum ResolveError {
    /// Failed to commit local changes.
    #[error("failed to commit local changes")]
    Commit(#[source] GatewayError),

    /// Failed to snapshot local changes.
    #[error(transparent)]
    Archive(#[from] ArchiveError),

    #[error(transparent)]
    Gateway(#[from] GatewayError),

    /// Working tree did not come out clean.
    #[error("working tree at {:?} is still dirty after {strategy}", path.display())]
    StillDirty {
        path: PathBuf,
        strategy: RestoreStrategy,
    },

    #[error("unknown restore strategy {0:?}, expected one of commit, discard, backup")]
    UnknownStrategy(String),
}

/// Friendly result alias :3
pub type Result<T, E = ResolveError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::Git2Gateway;
    use git2::Repository;
    use pretty_assertions::assert_eq;
    use simple_test_case::test_case;
    use std::fs;

    struct Workspace {
        _root: tempfile::TempDir,
        repo: PathBuf,
        store: BackupStore,
    }

    fn dirty_workspace(gateway: &Git2Gateway) -> anyhow::Result<Workspace> {
        let root = tempfile::tempdir()?;
        let repo = root.path().join("repo");
        let store = BackupStore::new(root.path().join("backups"));

        gateway.init(&repo)?;
        fs::write(repo.join("a.txt"), "x")?;
        gateway.add(&repo)?;
        gateway.commit(&repo, "add a")?;
        fs::write(repo.join("a.txt"), "y")?;
        fs::write(repo.join("b.txt"), "new")?;

        Ok(Workspace {
            _root: root,
            repo,
            store,
        })
    }

    fn head_message(path: &Path) -> String {
        let repository = Repository::open(path).unwrap();
        let commit = repository.head().unwrap().peel_to_commit().unwrap();
        commit.message().unwrap_or_default().to_string()
    }

    #[test_case("commit", RestoreStrategy::Commit; "commit")]
    #[test_case("Discard", RestoreStrategy::Discard; "mixed case")]
    #[test_case(" backup ", RestoreStrategy::Backup; "padded")]
    #[test]
    fn parse_restore_strategy(input: &str, expect: RestoreStrategy) -> anyhow::Result<()> {
        pretty_assertions::assert_eq!(input.parse::<RestoreStrategy>()?, expect);
        Ok(())
    }

    #[test]
    fn reject_unknown_strategy() {
        assert!(matches!(
            "merge".parse::<RestoreStrategy>(),
            Err(ResolveError::UnknownStrategy(_))
        ));
    }

    #[test]
    fn commit_strategy_keeps_changes() -> anyhow::Result<()> {
        let gateway = Git2Gateway::new();
        let ws = dirty_workspace(&gateway)?;
        let resolver = DirtyStateResolver::new(&gateway, &ws.store);

        let resolution = resolver.resolve(&ws.repo, RestoreStrategy::Commit, Some("keep it"))?;
        assert!(matches!(resolution, Resolution::Committed(Some(_))));
        assert_eq!(gateway.status(&ws.repo)?, WorkTreeStatus::Clean);
        assert_eq!(fs::read_to_string(ws.repo.join("a.txt"))?, "y");
        assert_eq!(head_message(&ws.repo), "keep it");

        Ok(())
    }

    #[test]
    fn commit_strategy_without_message_uses_default() -> anyhow::Result<()> {
        let gateway = Git2Gateway::new();
        let ws = dirty_workspace(&gateway)?;
        let resolver = DirtyStateResolver::new(&gateway, &ws.store);

        resolver.resolve(&ws.repo, RestoreStrategy::Commit, Some("   "))?;
        assert_eq!(head_message(&ws.repo), DEFAULT_COMMIT_MESSAGE);

        Ok(())
    }

    #[test]
    fn discard_strategy_drops_changes() -> anyhow::Result<()> {
        let gateway = Git2Gateway::new();
        let ws = dirty_workspace(&gateway)?;
        let resolver = DirtyStateResolver::new(&gateway, &ws.store);

        let resolution = resolver.resolve(&ws.repo, RestoreStrategy::Discard, None)?;
        assert_eq!(resolution, Resolution::Discarded);
        assert_eq!(fs::read_to_string(ws.repo.join("a.txt"))?, "x");
        assert!(!ws.repo.join("b.txt").exists());
        assert!(ws.store.list()?.is_empty());

        Ok(())
    }

    #[test]
    fn backup_strategy_snapshots_before_reset() -> anyhow::Result<()> {
        let gateway = Git2Gateway::new();
        let ws = dirty_workspace(&gateway)?;
        let resolver = DirtyStateResolver::new(&gateway, &ws.store);

        let resolution = resolver.resolve(&ws.repo, RestoreStrategy::Backup, None)?;
        let Resolution::BackedUp { backup, commit } = resolution else {
            panic!("expected backup resolution, got {resolution:?}");
        };
        assert!(commit.is_some());
        assert!(head_message(&ws.repo).starts_with("pilo-backup-"));
        assert_eq!(ws.store.list()?, vec![backup.clone()]);
        assert_eq!(gateway.status(&ws.repo)?, WorkTreeStatus::Clean);

        let extracted = tempfile::tempdir()?;
        ws.store.restore(&backup, extracted.path())?;
        assert_eq!(fs::read_to_string(extracted.path().join("a.txt"))?, "y");
        assert_eq!(fs::read_to_string(extracted.path().join("b.txt"))?, "new");
        assert!(!extracted.path().join(".git").exists());

        Ok(())
    }

    #[test]
    fn backup_strategy_fails_before_touching_tree() -> anyhow::Result<()> {
        let gateway = Git2Gateway::new();
        let ws = dirty_workspace(&gateway)?;

        // A regular file where the store directory should be.
        let blocked = BackupStore::new(ws.repo.join("a.txt").join("store"));
        let resolver = DirtyStateResolver::new(&gateway, &blocked);

        let result = resolver.resolve(&ws.repo, RestoreStrategy::Backup, None);
        assert!(matches!(result, Err(ResolveError::Archive(_))));
        assert_eq!(fs::read_to_string(ws.repo.join("a.txt"))?, "y");
        assert_eq!(gateway.status(&ws.repo)?, WorkTreeStatus::Dirty);

        Ok(())
    }
}
