// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Keep a Nix configuration directory under version control.
//!
//! Pilo treats a configuration directory as a git repository and keeps it
//! consistent across local edits, remote updates, and recovery from a bad
//! state, without ever silently losing user data. Every destructive step is
//! preceded by either a commit or a snapshot in a backup store that lives
//! outside of git.
//!
//! Start at [`SyncCoordinator`], the single entry point for the caller-facing
//! operations.

pub mod archive;
pub mod config;
pub mod credential;
pub mod gateway;
pub mod lock;
pub mod path;
pub mod resolve;
pub mod sync;

pub use archive::{BackupId, BackupStore};
pub use config::Settings;
pub use credential::{Credential, CredentialResolver};
pub use gateway::{Git2Gateway, VersionControl, WorkTreeStatus};
pub use resolve::{DirtyStateResolver, RestoreStrategy};
pub use sync::{SyncCoordinator, SyncError};
