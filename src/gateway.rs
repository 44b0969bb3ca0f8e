// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Version control primitives.
//!
//! Small, composable operations over a git repository that the
//! synchronization engine strings together. Nothing in here decides policy:
//! no operation commits, backs up, or pushes on its own accord. Policy lives
//! in [`DirtyStateResolver`](crate::resolve::DirtyStateResolver) and
//! [`SyncCoordinator`](crate::sync::SyncCoordinator).
//!
//! The [`VersionControl`] trait is the seam the rest of the crate programs
//! against. [`Git2Gateway`] implements it through libgit2.

use crate::credential::Credential;

use auth_git2::GitAuthenticator;
use git2::{
    build::{CheckoutBuilder, RepoBuilder},
    BranchType, Commit, Config, DiffFormat, DiffOptions, Direction, ErrorCode, FetchOptions,
    IndexAddOption, Oid, PushOptions, RemoteCallbacks, Repository, RepositoryInitOptions,
    RepositoryOpenFlags, ResetType, Signature, StatusOptions,
};
use indicatif::ProgressBar;
use std::{
    cell::RefCell,
    ffi::OsStr,
    fs,
    path::{Path, PathBuf},
    time,
};
use tracing::{debug, info, instrument};

/// Default branch name of freshly initialized repositories.
pub const DEFAULT_BRANCH: &str = "main";

/// Name of the single remote a repository tracks.
pub const ORIGIN: &str = "origin";

const BOOTSTRAP_FILE: &str = ".gitkeep";
const BOOTSTRAP_MESSAGE: &str = "Initial commit";
const SYNTHETIC_NAME: &str = "pilo";
const SYNTHETIC_EMAIL: &str = "pilo@localhost";

/// Whether a directory carries version control metadata.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RepositoryState {
    Uninitialized,
    Initialized,
}

/// Result of [`VersionControl::init`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InitOutcome {
    Created,
    AlreadyInitialized,
}

/// Whether a working tree has changes not captured by any commit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkTreeStatus {
    Clean,
    Dirty,
}

/// Result of [`VersionControl::commit`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitOutcome {
    Created(Oid),
    NothingToCommit,
}

pub trait VersionControl {
    fn state(&self, path: &Path) -> Result<RepositoryState>;

    fn init(&self, path: &Path) -> Result<InitOutcome>;

    fn status(&self, path: &Path) -> Result<WorkTreeStatus>;

    fn add(&self, path: &Path) -> Result<()>;

    fn commit(&self, path: &Path, message: &str) -> Result<CommitOutcome>;

    fn reset(&self, path: &Path) -> Result<()>;

    fn reset_branch_to(&self, path: &Path, branch: &str, target: Oid) -> Result<()>;

    fn move_branch_to(&self, path: &Path, branch: &str, target: Oid) -> Result<()>;

    fn head(&self, path: &Path) -> Result<Option<Oid>>;

    fn fetch(&self, path: &Path, remote: &str, credential: &Credential) -> Result<()>;

    fn push(&self, path: &Path, credential: &Credential) -> Result<()>;

    fn diff(&self, path: &Path) -> Result<String>;

    fn set_remote(&self, path: &Path, url: &str) -> Result<()>;

    fn remote_url(&self, path: &Path) -> Result<Option<String>>;

    fn remote_branch(&self, path: &Path, branch: &str) -> Result<Option<Oid>>;

    fn remote_default_branch(&self, path: &Path) -> Result<Option<String>>;

    fn remote_branches(&self, path: &Path) -> Result<Vec<String>>;

    fn current_branch(&self, path: &Path) -> Result<String>;

    fn clone_remote(
        &self,
        url: &str,
        path: &Path,
        branch: Option<&str>,
        credential: &Credential,
    ) -> Result<()>;
}

/// Version control through libgit2.
///
/// Transfer progress of clone and fetch is reported on the attached progress
/// bar, if any.
#[derive(Debug, Default, Clone)]
pub struct Git2Gateway {
    progress: Option<ProgressBar>,
}

impl Git2Gateway {
    /// Construct new gateway without progress reporting.
    pub fn new() -> Self {
        Self::default()
    }

    /// Construct new gateway reporting transfer progress on `bar`.
    pub fn with_progress(bar: ProgressBar) -> Self {
        Self {
            progress: Some(bar),
        }
    }

    fn try_open(&self, path: &Path) -> Result<Option<Repository>> {
        match Repository::open_ext(path, RepositoryOpenFlags::NO_SEARCH, &[] as &[&OsStr]) {
            Ok(repository) => Ok(Some(repository)),
            Err(err) if err.code() == ErrorCode::NotFound => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    fn open(&self, path: &Path) -> Result<Repository> {
        self.try_open(path)?
            .ok_or_else(|| GatewayError::NotARepository(path.to_path_buf()))
    }

    fn callbacks<'a>(
        &'a self,
        authenticator: &'a GitAuthenticator,
        config: &'a Config,
    ) -> RemoteCallbacks<'a> {
        let mut rc = RemoteCallbacks::new();
        rc.credentials(authenticator.credentials(config));

        if let Some(bar) = &self.progress {
            let mut throttle = time::Instant::now();
            rc.transfer_progress(move |progress| {
                if throttle.elapsed() > time::Duration::from_millis(10) {
                    throttle = time::Instant::now();
                    bar.set_length(progress.total_objects() as u64);
                    bar.set_position(progress.received_objects() as u64);
                }
                true
            });
        }

        rc
    }
}

impl VersionControl for Git2Gateway {
    fn state(&self, path: &Path) -> Result<RepositoryState> {
        match self.try_open(path)? {
            Some(_) => Ok(RepositoryState::Initialized),
            None => Ok(RepositoryState::Uninitialized),
        }
    }

    #[instrument(skip(self), level = "debug")]
    fn init(&self, path: &Path) -> Result<InitOutcome> {
        if self.state(path)? == RepositoryState::Initialized {
            debug!("repository already initialized at {:?}", path.display());
            return Ok(InitOutcome::AlreadyInitialized);
        }

        fs::create_dir_all(path).map_err(|err| GatewayError::Io {
            source: err,
            path: path.to_path_buf(),
        })?;

        let mut opts = RepositoryInitOptions::new();
        opts.initial_head(DEFAULT_BRANCH);
        let repository = Repository::init_opts(path, &opts)?;

        let placeholder = path.join(BOOTSTRAP_FILE);
        if !placeholder.exists() {
            fs::write(&placeholder, "").map_err(|err| GatewayError::Io {
                source: err,
                path: placeholder.clone(),
            })?;
        }

        let mut index = repository.index()?;
        index.add_path(Path::new(BOOTSTRAP_FILE))?;
        index.write()?;
        let tree = repository.find_tree(index.write_tree()?)?;

        let signature = Signature::now(SYNTHETIC_NAME, SYNTHETIC_EMAIL)?;
        let oid = repository.commit(None, &signature, &signature, BOOTSTRAP_MESSAGE, &tree, &[])?;

        // INVARIANT: Default branch must exist and be checked out after bootstrap.
        let commit = repository.find_commit(oid)?;
        repository.branch(DEFAULT_BRANCH, &commit, true)?;
        repository.set_head(&format!("refs/heads/{DEFAULT_BRANCH}"))?;

        info!("initialized repository at {:?}", path.display());
        Ok(InitOutcome::Created)
    }

    fn status(&self, path: &Path) -> Result<WorkTreeStatus> {
        let Some(repository) = self.try_open(path)? else {
            return Ok(WorkTreeStatus::Clean);
        };

        let mut opts = StatusOptions::new();
        opts.include_untracked(true)
            .recurse_untracked_dirs(true)
            .include_ignored(false);
        let statuses = repository.statuses(Some(&mut opts))?;

        if statuses.is_empty() {
            Ok(WorkTreeStatus::Clean)
        } else {
            debug!("{} paths differ from HEAD", statuses.len());
            Ok(WorkTreeStatus::Dirty)
        }
    }

    #[instrument(skip(self), level = "debug")]
    fn add(&self, path: &Path) -> Result<()> {
        let repository = self.open(path)?;
        let mut index = repository.index()?;
        index.add_all(["*"].iter(), IndexAddOption::DEFAULT, None)?;
        index.update_all(["*"].iter(), None)?;
        index.write()?;

        Ok(())
    }

    #[instrument(skip(self), level = "debug")]
    fn commit(&self, path: &Path, message: &str) -> Result<CommitOutcome> {
        let repository = self.open(path)?;
        let mut index = repository.index()?;
        let tree_id = index.write_tree()?;
        let parent = head_commit(&repository)?;

        let unchanged = match &parent {
            Some(parent) => parent.tree_id() == tree_id,
            None => index.is_empty(),
        };
        if unchanged {
            debug!("nothing to commit");
            return Ok(CommitOutcome::NothingToCommit);
        }

        let tree = repository.find_tree(tree_id)?;
        let signature = repository
            .signature()
            .or_else(|_| Signature::now(SYNTHETIC_NAME, SYNTHETIC_EMAIL))?;
        let parents = parent.iter().collect::<Vec<&Commit<'_>>>();
        let oid = repository.commit(
            Some("HEAD"),
            &signature,
            &signature,
            message,
            &tree,
            &parents,
        )?;

        info!("created commit {oid}");
        Ok(CommitOutcome::Created(oid))
    }

    #[instrument(skip(self), level = "debug")]
    fn reset(&self, path: &Path) -> Result<()> {
        let repository = self.open(path)?;
        let head = repository.head()?.peel_to_commit()?;
        repository.reset(head.as_object(), ResetType::Hard, None)?;
        remove_untracked(&repository)?;

        Ok(())
    }

    #[instrument(skip(self), level = "debug")]
    fn reset_branch_to(&self, path: &Path, branch: &str, target: Oid) -> Result<()> {
        let repository = self.open(path)?;
        let commit = repository.find_commit(target)?;
        switch_branch(&repository, path, branch, &commit)?;
        repository.reset(commit.as_object(), ResetType::Hard, None)?;
        remove_untracked(&repository)?;

        info!("reset {branch} to {target}");
        Ok(())
    }

    #[instrument(skip(self), level = "debug")]
    fn move_branch_to(&self, path: &Path, branch: &str, target: Oid) -> Result<()> {
        let repository = self.open(path)?;
        let commit = repository.find_commit(target)?;
        switch_branch(&repository, path, branch, &commit)?;

        // INVARIANT: Mixed reset, working tree stays as it is.
        repository.reset(commit.as_object(), ResetType::Mixed, None)?;

        debug!("moved {branch} to {target}");
        Ok(())
    }

    fn head(&self, path: &Path) -> Result<Option<Oid>> {
        let repository = self.open(path)?;
        let head = head_commit(&repository)?.map(|commit| commit.id());

        Ok(head)
    }

    #[instrument(skip(self, credential), level = "debug")]
    fn fetch(&self, path: &Path, remote: &str, credential: &Credential) -> Result<()> {
        let repository = self.open(path)?;
        let mut handle = repository.find_remote(remote)?;
        let config = repository.config()?;
        let authenticator = credential.authenticator();

        // Ask the remote which branch its HEAD points at before downloading.
        let default_branch = {
            let callbacks = self.callbacks(&authenticator, &config);
            let connection = handle.connect_auth(Direction::Fetch, Some(callbacks), None)?;
            match connection.default_branch() {
                Ok(name) => name.as_str().map(str::to_string),
                Err(err) => {
                    debug!("remote does not advertise a default branch: {err}");
                    None
                }
            }
        };

        let mut fo = FetchOptions::new();
        fo.remote_callbacks(self.callbacks(&authenticator, &config));
        handle.fetch(&[] as &[&str], Some(&mut fo), None)?;

        let default_branch = default_branch
            .as_deref()
            .and_then(|name| name.strip_prefix("refs/heads/"));
        if let Some(name) = default_branch {
            let symbolic = format!("refs/remotes/{remote}/HEAD");
            let target = format!("refs/remotes/{remote}/{name}");
            repository.reference_symbolic(
                &symbolic,
                &target,
                true,
                "pilo: record remote default branch",
            )?;
            debug!("recorded {symbolic} -> {target}");
        }

        info!("fetched {remote}");
        Ok(())
    }

    #[instrument(skip(self, credential), level = "debug")]
    fn push(&self, path: &Path, credential: &Credential) -> Result<()> {
        let repository = self.open(path)?;
        let branch = current_branch(&repository, path)?;
        let refspec = format!("refs/heads/{branch}:refs/heads/{branch}");
        let mut remote = repository.find_remote(ORIGIN)?;
        let config = repository.config()?;
        let authenticator = credential.authenticator();
        let rejection: RefCell<Option<(String, String)>> = RefCell::new(None);

        {
            let mut rc = self.callbacks(&authenticator, &config);
            rc.push_update_reference(|refname, status| {
                if let Some(message) = status {
                    *rejection.borrow_mut() = Some((refname.to_string(), message.to_string()));
                }
                Ok(())
            });

            let mut po = PushOptions::new();
            po.remote_callbacks(rc);
            remote.push(&[refspec.as_str()], Some(&mut po))?;
        }

        if let Some((refname, message)) = rejection.into_inner() {
            return Err(GatewayError::PushRejected { refname, message });
        }

        info!("pushed {branch} to {ORIGIN}");
        Ok(())
    }

    fn diff(&self, path: &Path) -> Result<String> {
        let Some(repository) = self.try_open(path)? else {
            return Ok(String::new());
        };

        // INVARIANT: Unborn HEAD diffs against the empty tree.
        let tree = match head_commit(&repository)? {
            Some(commit) => Some(commit.tree()?),
            None => None,
        };

        let mut opts = DiffOptions::new();
        opts.include_untracked(true)
            .recurse_untracked_dirs(true)
            .show_untracked_content(true);
        let diff = repository.diff_tree_to_workdir_with_index(tree.as_ref(), Some(&mut opts))?;

        let mut patch = String::new();
        diff.print(DiffFormat::Patch, |_, _, line| {
            if matches!(line.origin(), '+' | '-' | ' ') {
                patch.push(line.origin());
            }
            patch.push_str(&String::from_utf8_lossy(line.content()));
            true
        })?;

        Ok(patch)
    }

    #[instrument(skip(self), level = "debug")]
    fn set_remote(&self, path: &Path, url: &str) -> Result<()> {
        let repository = self.open(path)?;

        // INVARIANT: Recreate origin so no stale transport state survives.
        match repository.find_remote(ORIGIN) {
            Ok(_) => repository.remote_delete(ORIGIN)?,
            Err(err) if err.code() == ErrorCode::NotFound => (),
            Err(err) => return Err(err.into()),
        }
        repository.remote(ORIGIN, url)?;

        info!("set {ORIGIN} to {url}");
        Ok(())
    }

    fn remote_url(&self, path: &Path) -> Result<Option<String>> {
        let repository = self.open(path)?;
        let url = match repository.find_remote(ORIGIN) {
            Ok(remote) => remote.url().map(str::to_string),
            Err(err) if err.code() == ErrorCode::NotFound => None,
            Err(err) => return Err(err.into()),
        };

        Ok(url)
    }

    fn remote_branch(&self, path: &Path, branch: &str) -> Result<Option<Oid>> {
        let repository = self.open(path)?;
        let tip = match repository.find_reference(&format!("refs/remotes/{ORIGIN}/{branch}")) {
            Ok(reference) => Some(reference.peel_to_commit()?.id()),
            Err(err) if err.code() == ErrorCode::NotFound => None,
            Err(err) => return Err(err.into()),
        };

        Ok(tip)
    }

    fn remote_default_branch(&self, path: &Path) -> Result<Option<String>> {
        let repository = self.open(path)?;
        let prefix = format!("refs/remotes/{ORIGIN}/");
        let reference = match repository.find_reference(&format!("{prefix}HEAD")) {
            Ok(reference) => reference,
            Err(err) if err.code() == ErrorCode::NotFound => return Ok(None),
            Err(err) => return Err(err.into()),
        };

        // INVARIANT: Only report a default branch that actually resolves.
        if reference.resolve().is_err() {
            return Ok(None);
        }

        Ok(reference
            .symbolic_target()
            .and_then(|target| target.strip_prefix(prefix.as_str()))
            .map(str::to_string))
    }

    fn remote_branches(&self, path: &Path) -> Result<Vec<String>> {
        let repository = self.open(path)?;
        let prefix = format!("{ORIGIN}/");
        let mut names = Vec::new();

        for entry in repository.branches(Some(BranchType::Remote))? {
            let (branch, _) = entry?;
            let Some(name) = branch.name()? else {
                continue;
            };

            match name.strip_prefix(prefix.as_str()) {
                Some("HEAD") | None => continue,
                Some(name) => names.push(name.to_string()),
            }
        }

        Ok(names)
    }

    fn current_branch(&self, path: &Path) -> Result<String> {
        let repository = self.open(path)?;
        current_branch(&repository, path)
    }

    #[instrument(skip(self, credential), level = "debug")]
    fn clone_remote(
        &self,
        url: &str,
        path: &Path,
        branch: Option<&str>,
        credential: &Credential,
    ) -> Result<()> {
        let config = Config::open_default().or_else(|_| Config::new())?;
        let authenticator = credential.authenticator();

        let mut fo = FetchOptions::new();
        fo.remote_callbacks(self.callbacks(&authenticator, &config));

        let mut builder = RepoBuilder::new();
        builder.fetch_options(fo);
        if let Some(branch) = branch {
            builder.branch(branch);
        }
        builder.clone(url, path)?;

        info!("cloned {url} into {:?}", path.display());
        Ok(())
    }
}

fn head_commit(repository: &Repository) -> Result<Option<Commit<'_>>> {
    match repository.head() {
        Ok(head) => Ok(Some(head.peel_to_commit()?)),
        Err(err) if matches!(err.code(), ErrorCode::UnbornBranch | ErrorCode::NotFound) => {
            Ok(None)
        }
        Err(err) => Err(err.into()),
    }
}

fn current_branch(repository: &Repository, path: &Path) -> Result<String> {
    let head = repository.find_reference("HEAD")?;
    head.symbolic_target()
        .and_then(|target| target.strip_prefix("refs/heads/"))
        .map(str::to_string)
        .ok_or_else(|| GatewayError::DetachedHead(path.to_path_buf()))
}

// Point HEAD at `branch`, creating or moving it to `commit` first. Leaves the
// index and working tree alone.
fn switch_branch(
    repository: &Repository,
    path: &Path,
    branch: &str,
    commit: &Commit<'_>,
) -> Result<()> {
    // INVARIANT: Cannot force update the branch HEAD currently points at.
    if current_branch(repository, path)? == branch {
        return Ok(());
    }

    let mut local = repository.branch(branch, commit, true)?;
    if let Err(err) = local.set_upstream(Some(format!("{ORIGIN}/{branch}").as_str())) {
        debug!("cannot track {ORIGIN}/{branch}: {err}");
    }
    repository.set_head(&format!("refs/heads/{branch}"))?;

    Ok(())
}

// Hard reset only restores tracked content, so sweep away untracked files too.
fn remove_untracked(repository: &Repository) -> Result<()> {
    let mut checkout = CheckoutBuilder::new();
    checkout.force().remove_untracked(true);
    repository.checkout_head(Some(&mut checkout))?;

    Ok(())
}

/// Version control error types.
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error(transparent)]
    Git2(#[from] git2::Error),

    #[error("no repository found at {:?}", .0.display())]
    NotARepository(PathBuf),

    #[error("repository at {:?} has a detached HEAD", .0.display())]
    DetachedHead(PathBuf),

    #[error("remote rejected update of {refname}: {message}")]
    PushRejected { refname: String, message: String },

    #[error("failed to write {:?}", path.display())]
    Io {
        #[source]
        source: std::io::Error,
        path: PathBuf,
    },
}

/// Friendly result alias :3
pub type Result<T, E = GatewayError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn key() -> Credential {
        // Local transport never asks for credentials.
        Credential::KeyFile(PathBuf::from("/dev/null"))
    }

    fn commit_count(path: &Path) -> usize {
        let repository = Repository::open(path).unwrap();
        let mut walk = repository.revwalk().unwrap();
        walk.push_head().unwrap();
        walk.count()
    }

    fn bare_remote_with(path: &Path, branch: &str, file: &str, content: &str) -> Oid {
        let mut opts = RepositoryInitOptions::new();
        opts.bare(true).initial_head(branch);
        let repository = Repository::init_opts(path, &opts).unwrap();
        let blob = repository.blob(content.as_bytes()).unwrap();
        let mut builder = repository.treebuilder(None).unwrap();
        builder.insert(file, blob, 0o100644).unwrap();
        let tree = repository.find_tree(builder.write().unwrap()).unwrap();
        let signature = Signature::now("remote", "remote@localhost").unwrap();
        repository
            .commit(
                Some(format!("refs/heads/{branch}").as_str()),
                &signature,
                &signature,
                "remote commit",
                &tree,
                &[],
            )
            .unwrap()
    }

    #[test]
    fn init_is_idempotent() -> anyhow::Result<()> {
        let root = tempfile::tempdir()?;
        let path = root.path().join("repo");
        let gateway = Git2Gateway::new();

        assert_eq!(gateway.state(&path)?, RepositoryState::Uninitialized);
        assert_eq!(gateway.init(&path)?, InitOutcome::Created);
        assert_eq!(gateway.state(&path)?, RepositoryState::Initialized);
        assert_eq!(gateway.current_branch(&path)?, DEFAULT_BRANCH);
        assert_eq!(commit_count(&path), 1);

        assert_eq!(gateway.init(&path)?, InitOutcome::AlreadyInitialized);
        assert_eq!(commit_count(&path), 1);
        assert_eq!(gateway.status(&path)?, WorkTreeStatus::Clean);

        Ok(())
    }

    #[test]
    fn uninitialized_directory_reports_clean() -> anyhow::Result<()> {
        let root = tempfile::tempdir()?;
        fs::write(root.path().join("flake.nix"), "{}")?;
        let gateway = Git2Gateway::new();

        assert_eq!(gateway.status(root.path())?, WorkTreeStatus::Clean);
        assert_eq!(gateway.diff(root.path())?, "");
        assert!(matches!(
            gateway.add(root.path()),
            Err(GatewayError::NotARepository(_))
        ));

        Ok(())
    }

    #[test]
    fn commit_captures_whole_tree() -> anyhow::Result<()> {
        let root = tempfile::tempdir()?;
        let gateway = Git2Gateway::new();
        gateway.init(root.path())?;

        fs::create_dir_all(root.path().join("modules"))?;
        fs::write(root.path().join("modules/home.nix"), "{ }")?;
        fs::remove_file(root.path().join(BOOTSTRAP_FILE))?;
        assert_eq!(gateway.status(root.path())?, WorkTreeStatus::Dirty);

        gateway.add(root.path())?;
        let outcome = gateway.commit(root.path(), "add home module")?;
        assert!(matches!(outcome, CommitOutcome::Created(_)));
        assert_eq!(gateway.status(root.path())?, WorkTreeStatus::Clean);
        assert_eq!(commit_count(root.path()), 2);

        Ok(())
    }

    #[test]
    fn commit_on_clean_tree_is_noop() -> anyhow::Result<()> {
        let root = tempfile::tempdir()?;
        let gateway = Git2Gateway::new();
        gateway.init(root.path())?;

        gateway.add(root.path())?;
        assert_eq!(
            gateway.commit(root.path(), "nothing")?,
            CommitOutcome::NothingToCommit
        );
        assert_eq!(commit_count(root.path()), 1);

        Ok(())
    }

    #[test]
    fn reset_discards_changes_and_untracked_files() -> anyhow::Result<()> {
        let root = tempfile::tempdir()?;
        let gateway = Git2Gateway::new();
        gateway.init(root.path())?;
        fs::write(root.path().join("a.txt"), "x")?;
        gateway.add(root.path())?;
        gateway.commit(root.path(), "add a")?;

        fs::write(root.path().join("a.txt"), "y")?;
        fs::write(root.path().join("stray.nix"), "{ }")?;
        gateway.reset(root.path())?;

        assert_eq!(fs::read_to_string(root.path().join("a.txt"))?, "x");
        assert!(!root.path().join("stray.nix").exists());
        assert_eq!(gateway.status(root.path())?, WorkTreeStatus::Clean);

        Ok(())
    }

    #[test]
    fn diff_of_unborn_repository_shows_additions() -> anyhow::Result<()> {
        let root = tempfile::tempdir()?;
        Repository::init(root.path())?;
        fs::write(root.path().join("flake.nix"), "hello\n")?;

        let patch = Git2Gateway::new().diff(root.path())?;
        assert!(patch.contains("flake.nix"));
        assert!(patch.contains("+hello"));

        Ok(())
    }

    #[test]
    fn diff_shows_modifications() -> anyhow::Result<()> {
        let root = tempfile::tempdir()?;
        let gateway = Git2Gateway::new();
        gateway.init(root.path())?;
        fs::write(root.path().join("a.txt"), "x\n")?;
        gateway.add(root.path())?;
        gateway.commit(root.path(), "add a")?;
        fs::write(root.path().join("a.txt"), "y\n")?;

        let patch = gateway.diff(root.path())?;
        assert!(patch.contains("-x"));
        assert!(patch.contains("+y"));

        Ok(())
    }

    #[test]
    fn set_remote_replaces_origin() -> anyhow::Result<()> {
        let root = tempfile::tempdir()?;
        let gateway = Git2Gateway::new();
        gateway.init(root.path())?;

        assert_eq!(gateway.remote_url(root.path())?, None);
        gateway.set_remote(root.path(), "/srv/git/old.git")?;
        gateway.set_remote(root.path(), "/srv/git/new.git")?;
        assert_eq!(
            gateway.remote_url(root.path())?,
            Some("/srv/git/new.git".into())
        );

        Ok(())
    }

    #[test]
    fn fetch_records_remote_default_branch() -> anyhow::Result<()> {
        let root = tempfile::tempdir()?;
        let remote = root.path().join("remote.git");
        let local = root.path().join("local");
        let tip = bare_remote_with(&remote, "trunk", "flake.nix", "{ }");

        let gateway = Git2Gateway::new();
        gateway.init(&local)?;
        gateway.set_remote(&local, remote.to_string_lossy().as_ref())?;
        gateway.fetch(&local, ORIGIN, &key())?;
        gateway.fetch(&local, ORIGIN, &key())?;

        assert_eq!(gateway.remote_default_branch(&local)?, Some("trunk".into()));
        assert_eq!(gateway.remote_branches(&local)?, vec!["trunk".to_string()]);
        assert_eq!(gateway.remote_branch(&local, "trunk")?, Some(tip));
        assert_eq!(gateway.remote_branch(&local, "main")?, None);

        gateway.reset_branch_to(&local, "trunk", tip)?;
        assert_eq!(gateway.current_branch(&local)?, "trunk");
        assert_eq!(fs::read_to_string(local.join("flake.nix"))?, "{ }");
        assert!(!local.join(BOOTSTRAP_FILE).exists());

        Ok(())
    }

    #[test]
    fn move_branch_to_keeps_working_tree() -> anyhow::Result<()> {
        let root = tempfile::tempdir()?;
        let remote = root.path().join("remote.git");
        let local = root.path().join("local");
        let tip = bare_remote_with(&remote, "trunk", "flake.nix", "{ }");

        let gateway = Git2Gateway::new();
        gateway.init(&local)?;
        gateway.set_remote(&local, remote.to_string_lossy().as_ref())?;
        gateway.fetch(&local, ORIGIN, &key())?;
        fs::write(local.join("home.nix"), "{ }")?;

        gateway.move_branch_to(&local, "trunk", tip)?;
        assert_eq!(gateway.current_branch(&local)?, "trunk");
        assert_eq!(gateway.head(&local)?, Some(tip));
        assert!(local.join("home.nix").exists());
        assert!(!local.join("flake.nix").exists());
        assert_eq!(gateway.status(&local)?, WorkTreeStatus::Dirty);

        Ok(())
    }

    #[test]
    fn push_publishes_current_branch() -> anyhow::Result<()> {
        let root = tempfile::tempdir()?;
        let remote = root.path().join("remote.git");
        let mut opts = RepositoryInitOptions::new();
        opts.bare(true).initial_head(DEFAULT_BRANCH);
        Repository::init_opts(&remote, &opts)?;

        let local = root.path().join("local");
        let gateway = Git2Gateway::new();
        gateway.init(&local)?;
        gateway.set_remote(&local, remote.to_string_lossy().as_ref())?;
        gateway.push(&local, &key())?;
        gateway.push(&local, &key())?;

        let remote = Repository::open_bare(&remote)?;
        let pushed = remote.find_reference("refs/heads/main")?.peel_to_commit()?;
        let local = Repository::open(&local)?;
        assert_eq!(pushed.id(), local.head()?.peel_to_commit()?.id());

        Ok(())
    }

    #[test]
    fn clone_remote_at_branch() -> anyhow::Result<()> {
        let root = tempfile::tempdir()?;
        let remote = root.path().join("remote.git");
        bare_remote_with(&remote, "main", "flake.nix", "{ inputs = { }; }");

        let local = root.path().join("local");
        let gateway = Git2Gateway::new();
        gateway.clone_remote(
            remote.to_string_lossy().as_ref(),
            &local,
            Some("main"),
            &key(),
        )?;

        assert_eq!(gateway.state(&local)?, RepositoryState::Initialized);
        assert_eq!(
            fs::read_to_string(local.join("flake.nix"))?,
            "{ inputs = { }; }"
        );

        Ok(())
    }
}
