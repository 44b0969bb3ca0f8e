// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

use pilo::{
    gateway::{CommitOutcome, InitOutcome, RepositoryState},
    path::default_settings_file,
    sync::RestoreOutcome,
    BackupId, Git2Gateway, RestoreStrategy, Settings, SyncCoordinator, SyncError, WorkTreeStatus,
};

use anyhow::{anyhow, Result};
use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use inquire::{Select, Text};
use std::{
    io::IsTerminal,
    path::{Path, PathBuf},
    process::exit,
    time::Duration,
};
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Debug, Clone, Parser)]
#[command(
    about,
    override_usage = "pilo [options] <command>",
    subcommand_help_heading = "Commands",
    version
)]
struct Cli {
    /// Path to settings file.
    #[arg(short, long, global = true, value_name = "path")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

impl Cli {
    fn run(self) -> Result<()> {
        let settings_file = match self.config {
            Some(path) => path,
            None => default_settings_file()?,
        };
        let settings = Settings::load(&settings_file)?;

        match self.command {
            Command::Init => run_init(&settings),
            Command::Status => run_status(&settings),
            Command::Diff => run_diff(&settings),
            Command::Commit(opts) => run_commit(&settings, opts),
            Command::Backup(opts) => run_backup(&settings, opts),
            Command::Restore(opts) => run_restore(&settings, opts),
            Command::Sync => run_sync(&settings),
            Command::Remote(opts) => run_remote(settings, &settings_file, opts),
        }
    }
}

#[derive(Debug, Clone, Subcommand)]
enum Command {
    /// Initialize configuration directory as a repository.
    #[command(override_usage = "pilo init [options]")]
    Init,

    /// Show whether configuration directory has uncommitted changes.
    #[command(override_usage = "pilo status [options]")]
    Status,

    /// Show uncommitted changes.
    #[command(override_usage = "pilo diff [options]")]
    Diff,

    /// Commit all changes.
    #[command(override_usage = "pilo commit [options] <message>")]
    Commit(CommitOptions),

    /// Snapshot configuration directory, or list and restore snapshots.
    #[command(override_usage = "pilo backup [options]")]
    Backup(BackupOptions),

    /// Reset configuration directory to remote branch.
    #[command(override_usage = "pilo restore [options]")]
    Restore(RestoreOptions),

    /// Publish local content to remote.
    #[command(override_usage = "pilo sync [options]")]
    Sync,

    /// Set remote to synchronize with.
    #[command(override_usage = "pilo remote [options] <url>")]
    Remote(RemoteOptions),
}

#[derive(Parser, Clone, Debug)]
#[command(author, about, long_about)]
struct CommitOptions {
    /// Commit message.
    #[arg(required = true, value_name = "message")]
    pub message: String,

    /// Only commit if this action is a configured commit trigger.
    #[arg(short, long, value_name = "name")]
    pub trigger: Option<String>,
}

#[derive(Parser, Clone, Debug)]
#[command(author, about, long_about)]
struct BackupOptions {
    /// List snapshots, oldest first.
    #[arg(short, long, group = "action")]
    pub list: bool,

    /// Restore working tree from snapshot, latest by default.
    #[arg(
        short,
        long,
        group = "action",
        value_name = "id",
        num_args = 0..=1,
        default_missing_value = "latest"
    )]
    pub restore: Option<String>,
}

#[derive(Parser, Clone, Debug)]
#[command(author, about, long_about)]
struct RestoreOptions {
    /// URL of remote to restore from instead of the configured one.
    #[arg(short, long, value_name = "url")]
    pub url: Option<String>,

    /// Target branch to use instead of the default branch.
    #[arg(short, long, value_name = "branch")]
    pub branch: Option<String>,

    /// How to handle uncommitted changes: commit, discard, or backup.
    #[arg(short, long, value_name = "strategy")]
    pub strategy: Option<RestoreStrategy>,

    /// Commit message for the commit strategy.
    #[arg(short, long, value_name = "message")]
    pub message: Option<String>,
}

#[derive(Parser, Clone, Debug)]
#[command(author, about, long_about)]
struct RemoteOptions {
    /// URL of remote repository.
    #[arg(required = true, value_name = "url")]
    pub url: String,
}

fn main() {
    let layer = fmt::layer()
        .compact()
        .with_target(false)
        .with_timer(false)
        .without_time();
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(layer)
        .with(filter)
        .init();

    if let Err(error) = Cli::parse().run() {
        error!("{error:?}");
        exit(1);
    }

    exit(0)
}

fn run_init(settings: &Settings) -> Result<()> {
    let coordinator = SyncCoordinator::from_settings(settings)?;
    match coordinator.init()? {
        InitOutcome::Created => info!("initialized {:?}", coordinator.repo_path().display()),
        InitOutcome::AlreadyInitialized => {
            info!("{:?} is already initialized", coordinator.repo_path().display())
        }
    }

    if let Some(url) = coordinator.remote_url() {
        coordinator.set_remote(url)?;
    }

    Ok(())
}

fn run_status(settings: &Settings) -> Result<()> {
    let coordinator = SyncCoordinator::from_settings(settings)?;
    match coordinator.status()? {
        WorkTreeStatus::Clean => println!("clean"),
        WorkTreeStatus::Dirty => println!("dirty"),
    }

    Ok(())
}

fn run_diff(settings: &Settings) -> Result<()> {
    let coordinator = SyncCoordinator::from_settings(settings)?;
    print!("{}", coordinator.diff()?);

    Ok(())
}

fn run_commit(settings: &Settings, opts: CommitOptions) -> Result<()> {
    let coordinator = SyncCoordinator::from_settings(settings)?;
    let outcome = match opts.trigger {
        Some(trigger) => coordinator.commit_on_trigger(&trigger, &opts.message)?,
        None => Some(coordinator.commit(&opts.message)?),
    };

    match outcome {
        Some(CommitOutcome::Created(oid)) => info!("committed {oid}"),
        Some(CommitOutcome::NothingToCommit) => info!("nothing to commit"),
        None => info!("not a commit trigger, skipping commit"),
    }

    Ok(())
}

fn run_backup(settings: &Settings, opts: BackupOptions) -> Result<()> {
    let coordinator = SyncCoordinator::from_settings(settings)?;

    if opts.list {
        for id in coordinator.list_backups()? {
            println!("{id}");
        }
    } else if let Some(target) = opts.restore {
        let id = match target.as_str() {
            "latest" => None,
            name => Some(name.parse::<BackupId>()?),
        };
        let outcome = coordinator.restore_backup(id)?;
        if let Some(safety) = outcome.safety {
            info!("uncommitted changes saved as {safety}");
        }
        info!("restored working tree from {}", outcome.restored);
    } else {
        let id = coordinator.backup()?;
        println!("{}", coordinator.store().archive_path(&id).display());
    }

    Ok(())
}

fn run_restore(settings: &Settings, opts: RestoreOptions) -> Result<()> {
    let bar = transfer_bar()?;
    let coordinator =
        SyncCoordinator::from_settings_with(settings, Git2Gateway::with_progress(bar.clone()))?;
    let url = opts
        .url
        .or_else(|| coordinator.remote_url().map(str::to_string))
        .ok_or_else(|| anyhow!("no remote configured, use `pilo remote <url>` first"))?;
    let branch = opts.branch.or_else(|| coordinator.remote_branch().map(str::to_string));

    let mut strategy = opts.strategy;
    let mut message = opts.message;
    let outcome = loop {
        match coordinator.restore(&url, branch.as_deref(), strategy, message.as_deref()) {
            Err(SyncError::DirtyRepository(path))
                if strategy.is_none() && std::io::stdin().is_terminal() =>
            {
                bar.finish_and_clear();
                info!("{:?} has uncommitted changes", path.display());
                match prompt_strategy()? {
                    Some((choice, choice_message)) => {
                        strategy = Some(choice);
                        message = choice_message;
                    }
                    None => {
                        info!("restore cancelled");
                        return Ok(());
                    }
                }
            }
            result => break result?,
        }
    };
    bar.finish_and_clear();

    match outcome {
        RestoreOutcome::Cloned => info!("cloned {url}"),
        RestoreOutcome::Reset { branch, commit, .. } => {
            info!("reset to {branch} at {commit}")
        }
    }

    Ok(())
}

fn run_sync(settings: &Settings) -> Result<()> {
    let bar = transfer_bar()?;
    let coordinator =
        SyncCoordinator::from_settings_with(settings, Git2Gateway::with_progress(bar.clone()))?;
    let outcome = coordinator.sync();
    bar.finish_and_clear();

    let outcome = outcome?;
    match outcome.commit {
        Some(oid) => info!("pushed {oid}, snapshot kept as {}", outcome.backup),
        None => info!("nothing new to push, snapshot kept as {}", outcome.backup),
    }

    Ok(())
}

fn run_remote(mut settings: Settings, settings_file: &Path, opts: RemoteOptions) -> Result<()> {
    settings.remote.url = opts.url.clone();
    let coordinator = SyncCoordinator::from_settings(&settings)?;
    if coordinator.state()? == RepositoryState::Initialized {
        coordinator.set_remote(&opts.url)?;
    }

    settings.save(settings_file)?;
    info!("remote set to {}", opts.url);

    Ok(())
}

fn transfer_bar() -> Result<ProgressBar> {
    let style = ProgressStyle::with_template(
        "{elapsed_precise:.green}  {msg:<30}  [{wide_bar:.yellow/blue}]",
    )?
    .progress_chars("-Cco.");
    let bar = ProgressBar::new(0).with_style(style);
    bar.set_message("transferring objects");
    bar.enable_steady_tick(Duration::from_millis(100));

    Ok(bar)
}

fn prompt_strategy() -> Result<Option<(RestoreStrategy, Option<String>)>> {
    let choices = vec!["commit", "discard", "backup", "cancel"];
    let choice = Select::new("How should uncommitted changes be handled?", choices).prompt()?;

    match choice {
        "cancel" => Ok(None),
        "commit" => {
            let message = Text::new("Commit message").prompt()?;
            Ok(Some((RestoreStrategy::Commit, Some(message))))
        }
        choice => Ok(Some((choice.parse()?, None))),
    }
}
