// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Synchronization of a tracked configuration directory.
//!
//! [`SyncCoordinator`] is the only entry point surrounding code should call.
//! It strings together the primitives of [`VersionControl`], the
//! [`BackupStore`], and the [`CredentialResolver`] into the caller-facing
//! operations: init, status, diff, commit, backup, restore, and sync.
//!
//! # Restore
//!
//! Restore makes the tracked directory match a remote branch. A missing
//! repository is simply cloned. An existing one is first driven clean
//! through a caller-chosen [`RestoreStrategy`], then hard reset to the
//! remote branch. A dirty repository without a strategy is refused with
//! [`SyncError::DirtyRepository`], so the caller can ask the user.
//!
//! # Sync
//!
//! Sync publishes local content even if the remote has diverged. It does
//! __not__ merge. The working tree content at the time of the call always
//! wins:
//!
//! 1. Snapshot the working tree into the backup store.
//! 2. Fetch the remote.
//! 3. Restore the working tree from that snapshot, keeping git metadata.
//! 4. Check out the target branch at the fetched remote tip without touching
//!    the working tree. The target branch is the configured branch, else the
//!    remote's default branch, else "main", else "master". A remote with
//!    none of these receives the local branch as is.
//! 5. Commit everything that differs from the remote tip.
//! 6. Push.
//!
//! Any change that exists only on the remote is therefore overwritten by
//! the next sync. Remote history is kept, remote content is not. Use
//! [`SyncCoordinator::restore`] to take remote content instead.
//!
//! # Locking
//!
//! Every operation that changes the tracked directory holds a [`RepoLock`]
//! for its whole duration. Operations on the same directory from different
//! processes run one after another.

use crate::{
    archive::{ArchiveError, BackupId, BackupStore},
    config::{ConfigError, Settings},
    credential::{CredentialError, CredentialResolver},
    gateway::{
        CommitOutcome, GatewayError, Git2Gateway, InitOutcome, RepositoryState, VersionControl,
        WorkTreeStatus, ORIGIN,
    },
    lock::{LockError, RepoLock},
    resolve::{DirtyStateResolver, ResolveError, Resolution, RestoreStrategy},
};

use git2::Oid;
use std::{
    fs,
    path::{Path, PathBuf},
};
use tracing::{debug, error, info, instrument, warn};

const SYNC_MESSAGE: &str = "pilo: sync local changes";
const METADATA_DIR: &str = ".git";
const FALLBACK_BRANCHES: [&str; 2] = ["main", "master"];

/// What [`SyncCoordinator::restore`] ended up doing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RestoreOutcome {
    /// Repository did not exist and was cloned.
    Cloned,

    /// Existing repository was reset to remote branch.
    Reset {
        resolution: Option<Resolution>,
        branch: String,
        commit: Oid,
    },
}

/// What [`SyncCoordinator::sync`] ended up doing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncOutcome {
    /// Snapshot of the working tree taken before anything else.
    pub backup: BackupId,

    /// Sync commit, if local content differed from the remote.
    pub commit: Option<Oid>,
}

/// What [`SyncCoordinator::restore_backup`] ended up doing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RestoredBackup {
    /// Snapshot now in the working tree.
    pub restored: BackupId,

    /// Snapshot of the uncommitted content that was replaced, if any.
    pub safety: Option<BackupId>,
}

/// Coordinate synchronization of one tracked directory.
///
/// Every input is explicit, nothing is read from global state after
/// construction. Use [`SyncCoordinator::from_settings`] to build one from a
/// settings file.
#[derive(Debug)]
pub struct SyncCoordinator<V = Git2Gateway>
where
    V: VersionControl,
{
    repo_path: PathBuf,
    remote_url: Option<String>,
    remote_branch: Option<String>,
    push_on_commit: bool,
    commit_triggers: Vec<String>,
    store: BackupStore,
    credentials: CredentialResolver,
    vcs: V,
}

impl SyncCoordinator<Git2Gateway> {
    /// Construct new coordinator from settings using libgit2.
    ///
    /// # Errors
    ///
    /// - Return [`SyncError::Config`] if default paths cannot be determined.
    pub fn from_settings(settings: &Settings) -> Result<Self> {
        Self::from_settings_with(settings, Git2Gateway::new())
    }
}

impl<V> SyncCoordinator<V>
where
    V: VersionControl,
{
    /// Construct new coordinator.
    pub fn new(
        repo_path: impl Into<PathBuf>,
        store: BackupStore,
        credentials: CredentialResolver,
        vcs: V,
    ) -> Self {
        Self {
            repo_path: repo_path.into(),
            remote_url: None,
            remote_branch: None,
            push_on_commit: false,
            commit_triggers: Vec::new(),
            store,
            credentials,
            vcs,
        }
    }

    /// Construct new coordinator from settings with custom version control.
    ///
    /// # Errors
    ///
    /// - Return [`SyncError::Config`] if default paths cannot be determined.
    pub fn from_settings_with(settings: &Settings, vcs: V) -> Result<Self> {
        let coordinator = Self::new(
            settings.repo_path()?,
            BackupStore::new(settings.backup_store()?),
            CredentialResolver::from_env(settings.ssh_key_path.clone()),
            vcs,
        )
        .with_remote(
            settings.remote.url().map(str::to_string),
            settings.remote.branch.clone(),
        )
        .with_push_on_commit(settings.push_on_commit)
        .with_commit_triggers(settings.commit_triggers.clone());

        Ok(coordinator)
    }

    /// Set remote to synchronize with.
    pub fn with_remote(mut self, url: Option<String>, branch: Option<String>) -> Self {
        self.remote_url = url;
        self.remote_branch = branch;
        self
    }

    /// Synchronize after every commit that created something.
    pub fn with_push_on_commit(mut self, push_on_commit: bool) -> Self {
        self.push_on_commit = push_on_commit;
        self
    }

    /// Actions that should produce an automatic commit.
    pub fn with_commit_triggers(
        mut self,
        triggers: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        self.commit_triggers = triggers.into_iter().map(Into::into).collect();
        self
    }

    pub fn repo_path(&self) -> &Path {
        &self.repo_path
    }

    pub fn remote_url(&self) -> Option<&str> {
        self.remote_url.as_deref()
    }

    pub fn remote_branch(&self) -> Option<&str> {
        self.remote_branch.as_deref()
    }

    pub fn store(&self) -> &BackupStore {
        &self.store
    }

    /// Initialize tracked directory as a repository, if it is not one yet.
    ///
    /// # Errors
    ///
    /// - Return [`SyncError::Lock`] if lock cannot be taken.
    /// - Return [`SyncError::Gateway`] if initialization fails.
    pub fn init(&self) -> Result<InitOutcome> {
        let _lock = self.lock()?;
        Ok(self.vcs.init(&self.repo_path)?)
    }

    /// Whether tracked directory is a repository yet.
    pub fn state(&self) -> Result<RepositoryState> {
        Ok(self.vcs.state(&self.repo_path)?)
    }

    /// Whether tracked directory has uncommitted changes.
    ///
    /// A directory that is not a repository counts as clean.
    pub fn status(&self) -> Result<WorkTreeStatus> {
        Ok(self.vcs.status(&self.repo_path)?)
    }

    /// Patch of working tree against HEAD.
    pub fn diff(&self) -> Result<String> {
        Ok(self.vcs.diff(&self.repo_path)?)
    }

    /// Snapshot tracked directory into the backup store.
    ///
    /// # Errors
    ///
    /// - Return [`SyncError::Archive`] if snapshot cannot be written.
    pub fn backup(&self) -> Result<BackupId> {
        let _lock = self.lock()?;
        let id = self.store.create(&self.repo_path)?;
        info!("backed up {:?} as {id}", self.repo_path.display());
        Ok(id)
    }

    /// All snapshots in the backup store, oldest first.
    pub fn list_backups(&self) -> Result<Vec<BackupId>> {
        Ok(self.store.list()?)
    }

    /// Replace working tree with a snapshot, keeping git history.
    ///
    /// Restores the latest snapshot unless `id` is given. Only the working
    /// tree changes; commits, branches, and remotes stay as they are, so
    /// the restored content shows up as uncommitted changes.
    ///
    /// Uncommitted content about to be replaced is snapshotted first. That
    /// snapshot is reported as [`RestoredBackup::safety`].
    ///
    /// # Errors
    ///
    /// - Return [`SyncError::Archive`] if there is no snapshot to restore,
    ///   or if the safety snapshot cannot be written. Nothing is modified in
    ///   either case.
    /// - Return [`SyncError::Relocate`] if git metadata cannot be moved.
    #[instrument(skip(self), level = "debug")]
    pub fn restore_backup(&self, id: Option<BackupId>) -> Result<RestoredBackup> {
        let _lock = self.lock()?;
        let path = self.repo_path.as_path();
        let restored = match id {
            Some(id) => id,
            None => self
                .store
                .latest()?
                .ok_or_else(|| ArchiveError::NoBackups(self.store.path().to_path_buf()))?,
        };
        if !self.store.archive_path(&restored).is_file() {
            return Err(ArchiveError::MissingBackup(self.store.archive_path(&restored)).into());
        }

        // INVARIANT: Snapshot uncommitted content before it gets replaced.
        let unsaved = path.exists()
            && (self.vcs.state(path)? == RepositoryState::Uninitialized
                || self.vcs.status(path)? == WorkTreeStatus::Dirty);
        let safety = if unsaved {
            let safety = self.store.create(path)?;
            info!("saved uncommitted changes as {safety}");
            Some(safety)
        } else {
            None
        };

        self.restore_working_tree(&restored)?;
        info!("restored working tree from {restored}");
        Ok(RestoredBackup { restored, safety })
    }

    /// Point origin at `url`.
    pub fn set_remote(&self, url: &str) -> Result<()> {
        let _lock = self.lock()?;
        Ok(self.vcs.set_remote(&self.repo_path, url)?)
    }

    /// Stage and commit everything in the tracked directory.
    ///
    /// Committing a clean tree is a successful no-op. If push on commit is
    /// enabled and a remote is configured, a new commit is followed by a
    /// [`sync`](Self::sync). A failed sync is logged, never returned: the
    /// local commit stands either way.
    ///
    /// # Errors
    ///
    /// - Return [`SyncError::Gateway`] if staging or committing fails.
    #[instrument(skip(self), level = "debug")]
    pub fn commit(&self, message: &str) -> Result<CommitOutcome> {
        let _lock = self.lock()?;
        self.vcs.add(&self.repo_path)?;
        let outcome = self.vcs.commit(&self.repo_path, message)?;

        if let CommitOutcome::Created(_) = outcome {
            self.publish_commit();
        }

        Ok(outcome)
    }

    /// Commit only when `trigger` is one of the configured commit triggers.
    ///
    /// Returns `None` when the trigger is not configured.
    pub fn commit_on_trigger(
        &self,
        trigger: &str,
        message: &str,
    ) -> Result<Option<CommitOutcome>> {
        if !self.commit_triggers.iter().any(|known| known == trigger) {
            debug!("{trigger:?} is not a commit trigger");
            return Ok(None);
        }

        info!("commit triggered by {trigger:?}");
        self.commit(message).map(Some)
    }

    /// Make tracked directory match a remote branch.
    ///
    /// Target branch is `branch` if given, else the remote's default
    /// branch, else "main", else "master".
    ///
    /// # Errors
    ///
    /// - Return [`SyncError::Credential`] if no credential is available.
    /// - Return [`SyncError::NotEmpty`] if there is no repository to reset
    ///   and the directory cannot be cloned into.
    /// - Return [`SyncError::DirtyRepository`] if working tree is dirty and
    ///   no strategy is given. Nothing is modified in that case.
    /// - Return [`SyncError::Resolve`] if strategy fails.
    /// - Return [`SyncError::BranchNotFound`] if `branch` is not on remote.
    /// - Return [`SyncError::NoDefaultBranch`] if no target can be found.
    #[instrument(skip(self), level = "debug")]
    pub fn restore(
        &self,
        url: &str,
        branch: Option<&str>,
        strategy: Option<RestoreStrategy>,
        message: Option<&str>,
    ) -> Result<RestoreOutcome> {
        let _lock = self.lock()?;
        let path = self.repo_path.as_path();
        let branch = branch.filter(|branch| !branch.trim().is_empty());
        let credential = self.credentials.resolve()?;

        if self.vcs.state(path)? == RepositoryState::Uninitialized {
            if has_entries(path)? {
                return Err(SyncError::NotEmpty(path.to_path_buf()));
            }
            info!("cloning {url} into {:?}", path.display());
            self.vcs.clone_remote(url, path, branch, &credential)?;
            return Ok(RestoreOutcome::Cloned);
        }

        let resolution = match (self.vcs.status(path)?, strategy) {
            (WorkTreeStatus::Clean, _) => None,
            (WorkTreeStatus::Dirty, None) => {
                return Err(SyncError::DirtyRepository(path.to_path_buf()));
            }
            (WorkTreeStatus::Dirty, Some(strategy)) => Some(
                DirtyStateResolver::new(&self.vcs, &self.store).resolve(path, strategy, message)?,
            ),
        };

        self.reconcile_remote(url)?;
        self.vcs.fetch(path, ORIGIN, &credential)?;

        let (branch, commit) = self.select_target(branch)?;
        self.vcs.reset_branch_to(path, &branch, commit)?;

        info!("restored {:?} to {ORIGIN}/{branch}", path.display());
        Ok(RestoreOutcome::Reset {
            resolution,
            branch,
            commit,
        })
    }

    /// Publish local content to the remote.
    ///
    /// See the [module documentation](self) for the exact protocol. Local
    /// content always wins over remote content.
    ///
    /// # Errors
    ///
    /// - Return [`SyncError::NotInitialized`] if there is no repository.
    /// - Return [`SyncError::NoRemote`] if no remote is configured.
    /// - Return [`SyncError::Credential`] if no credential is available.
    /// - Return [`SyncError::Archive`] if the snapshot cannot be taken or
    ///   restored.
    /// - Return [`SyncError::Relocate`] if git metadata cannot be moved.
    /// - Return [`SyncError::Gateway`] if fetch or push fails.
    pub fn sync(&self) -> Result<SyncOutcome> {
        let _lock = self.lock()?;
        self.sync_locked()
    }

    #[instrument(skip(self), level = "debug")]
    fn sync_locked(&self) -> Result<SyncOutcome> {
        let path = self.repo_path.as_path();
        if self.vcs.state(path)? == RepositoryState::Uninitialized {
            return Err(SyncError::NotInitialized(path.to_path_buf()));
        }

        match &self.remote_url {
            Some(url) => self.reconcile_remote(url)?,
            None if self.vcs.remote_url(path)?.is_none() => {
                return Err(SyncError::NoRemote(path.to_path_buf()));
            }
            None => (),
        }
        let credential = self.credentials.resolve()?;

        let backup = self.store.create(path)?;
        debug!("sync snapshot {backup}");

        self.vcs.fetch(path, ORIGIN, &credential)?;
        self.restore_working_tree(&backup)?;

        // INVARIANT: Sync commit must land on top of the remote tip.
        let (branch, tip) = self.sync_target()?;
        let base = match tip {
            Some(tip) => Some(tip),
            None => self.vcs.head(path)?,
        };
        if let Some(base) = base {
            self.vcs.move_branch_to(path, &branch, base)?;
            debug!("publishing on {branch} from {base}");
        }

        let commit = match self.add_and_commit(SYNC_MESSAGE) {
            Ok(CommitOutcome::Created(oid)) => Some(oid),
            Ok(CommitOutcome::NothingToCommit) => {
                debug!("local content already matches {ORIGIN}/{branch}");
                None
            }
            Err(err) => {
                warn!("sync commit failed, pushing existing history: {err}");
                None
            }
        };

        self.vcs.push(path, &credential)?;
        info!("synchronized {:?} with {ORIGIN}/{branch}", path.display());

        Ok(SyncOutcome { backup, commit })
    }

    fn add_and_commit(&self, message: &str) -> Result<CommitOutcome> {
        self.vcs.add(&self.repo_path)?;
        Ok(self.vcs.commit(&self.repo_path, message)?)
    }

    fn publish_commit(&self) {
        if !self.push_on_commit {
            return;
        }

        let has_remote = match (&self.remote_url, self.vcs.remote_url(&self.repo_path)) {
            (Some(_), _) | (None, Ok(Some(_))) => true,
            (None, Ok(None)) => false,
            (None, Err(err)) => {
                warn!("cannot determine remote, skipping sync after commit: {err}");
                return;
            }
        };
        if !has_remote {
            debug!("push on commit enabled but no remote configured");
            return;
        }

        if let Err(err) = self.sync_locked() {
            warn!("commit kept locally, but sync after commit failed: {err}");
        }
    }

    fn reconcile_remote(&self, url: &str) -> Result<()> {
        let current = self.vcs.remote_url(&self.repo_path)?;
        if current.as_deref() != Some(url) {
            debug!("{ORIGIN} points at {current:?}, switching to {url}");
            self.vcs.set_remote(&self.repo_path, url)?;
        }

        Ok(())
    }

    fn select_target(&self, branch: Option<&str>) -> Result<(String, Oid)> {
        let path = self.repo_path.as_path();
        if let Some(branch) = branch {
            let commit = self
                .vcs
                .remote_branch(path, branch)?
                .ok_or_else(|| SyncError::BranchNotFound(branch.to_string()))?;
            return Ok((branch.to_string(), commit));
        }

        if let Some(default) = self.vcs.remote_default_branch(path)? {
            if let Some(commit) = self.vcs.remote_branch(path, &default)? {
                return Ok((default, commit));
            }
            debug!("remote default branch {default:?} does not resolve");
        }

        let branches = self.vcs.remote_branches(path)?;
        let fallback = select_fallback_branch(&branches).ok_or(SyncError::NoDefaultBranch)?;
        let commit = self
            .vcs
            .remote_branch(path, fallback)?
            .ok_or(SyncError::NoDefaultBranch)?;

        Ok((fallback.to_string(), commit))
    }

    // Branch a sync publishes to, with its remote tip if the remote has it.
    fn sync_target(&self) -> Result<(String, Option<Oid>)> {
        let path = self.repo_path.as_path();
        if let Some(branch) = self.remote_branch().filter(|branch| !branch.trim().is_empty()) {
            return Ok((branch.to_string(), self.vcs.remote_branch(path, branch)?));
        }

        match self.select_target(None) {
            Ok((branch, tip)) => Ok((branch, Some(tip))),
            Err(SyncError::NoDefaultBranch) => {
                let branch = self.vcs.current_branch(path)?;
                debug!("remote has no default branch, publishing {branch} as is");
                Ok((branch, None))
            }
            Err(err) => Err(err),
        }
    }

    fn restore_working_tree(&self, backup: &BackupId) -> Result<()> {
        let path = self.repo_path.as_path();
        let metadata = path.join(METADATA_DIR);
        if fs::symlink_metadata(&metadata).is_err() {
            debug!("no git metadata to preserve at {:?}", metadata.display());
            return Ok(self.store.restore(backup, path)?);
        }

        let parent = path
            .parent()
            .ok_or_else(|| SyncError::NoParent(path.to_path_buf()))?;
        let holding = tempfile::Builder::new()
            .prefix(".pilo-metadata-")
            .tempdir_in(parent)
            .map_err(|err| SyncError::Relocate {
                source: err,
                from: metadata.clone(),
                to: parent.to_path_buf(),
            })?;
        let parked = holding.path().join(METADATA_DIR);

        fs::rename(&metadata, &parked).map_err(|err| SyncError::Relocate {
            source: err,
            from: metadata.clone(),
            to: parked.clone(),
        })?;

        let restored = self.store.restore(backup, path);

        // INVARIANT: Metadata goes back whether or not extraction worked.
        if let Err(err) = move_back(&parked, &metadata) {
            let kept = holding.keep();
            error!(
                "git metadata could not be moved back, it is kept at {:?}",
                kept.join(METADATA_DIR).display()
            );
            return Err(err);
        }

        Ok(restored?)
    }

    fn lock(&self) -> Result<RepoLock> {
        Ok(RepoLock::acquire(&self.repo_path)?)
    }
}

/// Pick "main", else "master", among remote branch names.
pub fn select_fallback_branch(branches: &[String]) -> Option<&str> {
    FALLBACK_BRANCHES
        .into_iter()
        .find(|fallback| branches.iter().any(|branch| branch.as_str() == *fallback))
}

fn has_entries(path: &Path) -> Result<bool> {
    let io_err = |err: std::io::Error| SyncError::Io {
        source: err,
        path: path.to_path_buf(),
    };

    match fs::read_dir(path) {
        Ok(mut entries) => Ok(entries.next().transpose().map_err(io_err)?.is_some()),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(err) => Err(io_err(err)),
    }
}

fn move_back(parked: &Path, metadata: &Path) -> Result<()> {
    let relocate = |err: std::io::Error| SyncError::Relocate {
        source: err,
        from: parked.to_path_buf(),
        to: metadata.to_path_buf(),
    };

    // Extraction may have failed after removing the directory itself.
    if let Some(root) = metadata.parent() {
        fs::create_dir_all(root).map_err(relocate)?;
    }

    if let Err(err) = fs::rename(parked, metadata) {
        warn!("failed to move git metadata back, retrying: {err}");
        if fs::symlink_metadata(metadata).is_ok() {
            fs::remove_dir_all(metadata).map_err(relocate)?;
        }
        fs::rename(parked, metadata).map_err(relocate)?;
    }

    Ok(())
}

/// Synchronization error types.
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    /// Working tree has uncommitted changes and no strategy was chosen.
    #[error("working tree at {:?} has uncommitted changes, pick a restore strategy", .0.display())]
    DirtyRepository(PathBuf),

    /// Requested branch does not exist on remote.
    #[error("branch {0:?} does not exist on remote")]
    BranchNotFound(String),

    /// Remote has no usable default branch.
    #[error("cannot determine default branch of remote")]
    NoDefaultBranch,

    #[error("no remote configured for {:?}", .0.display())]
    NoRemote(PathBuf),

    #[error("no repository at {:?}", .0.display())]
    NotInitialized(PathBuf),

    /// Directory holds files but no repository, so it cannot be cloned into.
    #[error(
        "{:?} is not empty and not a repository, run `pilo init` or move it out of the way",
        .0.display()
    )]
    NotEmpty(PathBuf),

    #[error("{:?} has no parent directory", .0.display())]
    NoParent(PathBuf),

    /// Failed to move git metadata around.
    #[error("failed to move git metadata from {:?} to {:?}", from.display(), to.display())]
    Relocate {
        #[source]
        source: std::io::Error,
        from: PathBuf,
        to: PathBuf,
    },

    #[error("failed to read {:?}", path.display())]
    Io {
        #[source]
        source: std::io::Error,
        path: PathBuf,
    },

    #[error(transparent)]
    Credential(#[from] CredentialError),

    #[error(transparent)]
    Archive(#[from] ArchiveError),

    #[error(transparent)]
    Gateway(#[from] GatewayError),

    #[error(transparent)]
    Resolve(#[from] ResolveError),

    #[error(transparent)]
    Lock(#[from] LockError),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// Friendly result alias :3
pub type Result<T, E = SyncError> = std::result::Result<T, E>;
