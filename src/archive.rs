// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Point-in-time snapshots of a directory tree.
//!
//! The __backup store__ is a flat directory of gzip-compressed tar archives,
//! one per snapshot. It exists independently of Git history so that a
//! configuration directory can always be recovered, even when its Git
//! metadata is in a bad state.
//!
//! # Backup Store Layout
//!
//! Each archive is named `backup-YYYYMMDD-HHMMSS.tar.gz` using UTC time with
//! second resolution. The name doubles as the sort key. A second snapshot
//! taken within the same second receives a `-N` suffix, e.g.,
//! `backup-20250101-120000-1.tar.gz`, so that archives are never
//! overwritten. Archives are written under a temporary `.partial` name and
//! renamed into place once complete, thus a crash never leaves a truncated
//! archive that looks like the most recent snapshot.
//!
//! Files in the store that do not follow this naming scheme are ignored.
//! Archives are never pruned.
//!
//! # Archive Layout
//!
//! Entry names are relative to the snapshot root and always use forward
//! slashes. Git metadata (`.git`) and in-tree backup directories (`.backups`)
//! are excluded by name at any depth. The backup store itself is excluded by
//! path when it happens to live inside the snapshot root. Only directories
//! and regular files carry content. Symlinks are recorded with their target
//! and recreated on extraction after every other entry, so nothing is ever
//! extracted through a link. Any other entry, e.g., a FIFO, is recorded as a
//! header without content and skipped during extraction.

use chrono::{NaiveDateTime, Timelike, Utc};
use flate2::{read::GzDecoder, write::GzEncoder, Compression};
use ignore::WalkBuilder;
use std::{
    cmp::Ordering,
    fmt::{Display, Formatter, Result as FmtResult},
    fs::{self, File, OpenOptions},
    io::{self, ErrorKind},
    path::{Component, Path, PathBuf},
    str::FromStr,
    time::UNIX_EPOCH,
};
use tar::{Builder, EntryType, Header};
use tracing::{debug, info, instrument};

/// Directory names that are never archived, at any depth.
pub const EXCLUDED_NAMES: [&str; 2] = [".git", ".backups"];

const STAMP_FORMAT: &str = "%Y%m%d-%H%M%S";
const PREFIX: &str = "backup-";
const EXTENSION: &str = ".tar.gz";

/// Identity of one archive in the backup store.
///
/// Ordered by creation time, then by collision sequence number.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BackupId {
    created: NaiveDateTime,
    seq: u32,
}

impl BackupId {
    fn new(created: NaiveDateTime, seq: u32) -> Self {
        Self { created, seq }
    }

    /// Creation time in UTC at second resolution.
    pub fn created(&self) -> NaiveDateTime {
        self.created
    }

    /// Archive file name within the backup store.
    pub fn file_name(&self) -> String {
        self.to_string()
    }
}

impl Ord for BackupId {
    fn cmp(&self, other: &Self) -> Ordering {
        self.created
            .cmp(&other.created)
            .then(self.seq.cmp(&other.seq))
    }
}

impl PartialOrd for BackupId {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Display for BackupId {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        let stamp = self.created.format(STAMP_FORMAT);
        if self.seq == 0 {
            write!(fmt, "{PREFIX}{stamp}{EXTENSION}")
        } else {
            write!(fmt, "{PREFIX}{stamp}-{}{EXTENSION}", self.seq)
        }
    }
}

impl FromStr for BackupId {
    type Err = ArchiveError;

    fn from_str(name: &str) -> Result<Self, Self::Err> {
        let invalid = || ArchiveError::InvalidBackupName(name.to_string());
        let body = name
            .strip_prefix(PREFIX)
            .and_then(|rest| rest.strip_suffix(EXTENSION))
            .ok_or_else(invalid)?;

        // INVARIANT: Stamp is always 15 characters wide, e.g., "20250101-120000".
        if body.len() < 15 || !body.is_char_boundary(15) {
            return Err(invalid());
        }
        let (stamp, suffix) = body.split_at(15);
        let created = NaiveDateTime::parse_from_str(stamp, STAMP_FORMAT).map_err(|_| invalid())?;
        let seq = match suffix {
            "" => 0,
            suffix => suffix
                .strip_prefix('-')
                .and_then(|seq| seq.parse::<u32>().ok())
                .filter(|seq| *seq > 0)
                .ok_or_else(invalid)?,
        };

        Ok(Self::new(created, seq))
    }
}

/// Flat directory of snapshot archives.
#[derive(Debug, Clone)]
pub struct BackupStore {
    dir: PathBuf,
}

impl BackupStore {
    /// Construct new backup store handle.
    ///
    /// The directory is created lazily on first snapshot.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Path to backup store directory.
    pub fn path(&self) -> &Path {
        &self.dir
    }

    /// Absolute path to archive of target backup.
    pub fn archive_path(&self, id: &BackupId) -> PathBuf {
        self.dir.join(id.file_name())
    }

    /// Snapshot directory tree into a new archive.
    ///
    /// # Errors
    ///
    /// - Return [`ArchiveError::ReadSource`] if source cannot be read.
    /// - Return [`ArchiveError::CreateStore`] if backup store cannot be made.
    /// - Return [`ArchiveError::Walk`] if directory traversal fails.
    /// - Return [`ArchiveError::Io`] if archive cannot be written.
    #[instrument(skip(self, source), level = "debug")]
    pub fn create(&self, source: impl AsRef<Path>) -> Result<BackupId> {
        let source = source.as_ref();
        let metadata = fs::metadata(source).map_err(|err| ArchiveError::ReadSource {
            source: err,
            path: source.to_path_buf(),
        })?;
        if !metadata.is_dir() {
            return Err(ArchiveError::ReadSource {
                source: io::Error::new(ErrorKind::InvalidInput, "not a directory"),
                path: source.to_path_buf(),
            });
        }

        fs::create_dir_all(&self.dir).map_err(|err| ArchiveError::CreateStore {
            source: err,
            path: self.dir.clone(),
        })?;

        let (id, file, partial) = self.reserve()?;
        let result = self.write_archive(source, file);
        if let Err(err) = result {
            if let Err(cleanup) = fs::remove_file(&partial) {
                debug!("failed to remove {:?}: {cleanup}", partial.display());
            }
            return Err(err);
        }

        let target = self.archive_path(&id);
        fs::rename(&partial, &target).map_err(|err| ArchiveError::Io {
            source: err,
            path: target.clone(),
        })?;
        info!("created backup {:?} of {:?}", target.display(), source.display());

        Ok(id)
    }

    /// List all archives in backup store, oldest first.
    ///
    /// A missing backup store directory is treated as an empty store.
    ///
    /// # Errors
    ///
    /// - Return [`ArchiveError::Io`] if backup store cannot be read.
    pub fn list(&self) -> Result<Vec<BackupId>> {
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => {
                return Err(ArchiveError::Io {
                    source: err,
                    path: self.dir.clone(),
                })
            }
        };

        let mut ids = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|err| ArchiveError::Io {
                source: err,
                path: self.dir.clone(),
            })?;
            if !entry.file_type().map(|kind| kind.is_file()).unwrap_or(false) {
                continue;
            }

            match entry.file_name().to_str().map(str::parse::<BackupId>) {
                Some(Ok(id)) => ids.push(id),
                _ => debug!("skip foreign file {:?} in backup store", entry.file_name()),
            }
        }
        ids.sort();

        Ok(ids)
    }

    /// Most recent archive in backup store, if any.
    ///
    /// # Errors
    ///
    /// - Return [`ArchiveError::Io`] if backup store cannot be read.
    pub fn latest(&self) -> Result<Option<BackupId>> {
        Ok(self.list()?.into_iter().max())
    }

    /// Restore most recent archive into destination.
    ///
    /// Destructive: destination is deleted and recreated before extraction.
    /// Nothing is touched when the store holds no archives.
    ///
    /// # Errors
    ///
    /// - Return [`ArchiveError::NoBackups`] if backup store is empty.
    /// - Return any error of [`BackupStore::restore`].
    pub fn restore_latest(&self, destination: impl AsRef<Path>) -> Result<BackupId> {
        let id = self
            .latest()?
            .ok_or_else(|| ArchiveError::NoBackups(self.dir.clone()))?;
        self.restore(&id, destination)?;

        Ok(id)
    }

    /// Restore target archive into destination.
    ///
    /// Destructive: destination is deleted and recreated before extraction.
    /// Directories and regular files are recreated, everything else in the
    /// archive is skipped.
    ///
    /// # Errors
    ///
    /// - Return [`ArchiveError::MissingBackup`] if archive does not exist.
    /// - Return [`ArchiveError::UnsafeEntry`] if an entry escapes destination.
    /// - Return [`ArchiveError::Io`] if extraction fails.
    #[instrument(skip(self, destination), level = "debug")]
    pub fn restore(&self, id: &BackupId, destination: impl AsRef<Path>) -> Result<()> {
        let destination = destination.as_ref();
        let archive_path = self.archive_path(id);
        let file = File::open(&archive_path).map_err(|err| match err.kind() {
            ErrorKind::NotFound => ArchiveError::MissingBackup(archive_path.clone()),
            _ => ArchiveError::Io {
                source: err,
                path: archive_path.clone(),
            },
        })?;

        let io_err = |path: &Path| {
            let path = path.to_path_buf();
            move |err| ArchiveError::Io { source: err, path }
        };

        if destination.exists() {
            fs::remove_dir_all(destination).map_err(io_err(destination))?;
        }
        fs::create_dir_all(destination).map_err(io_err(destination))?;

        let mut links = Vec::new();
        let mut archive = tar::Archive::new(GzDecoder::new(file));
        for entry in archive.entries().map_err(io_err(&archive_path))? {
            let mut entry = entry.map_err(io_err(&archive_path))?;
            let name = entry.path().map_err(io_err(&archive_path))?.into_owned();

            // INVARIANT: Entries never escape the destination directory.
            if !name
                .components()
                .all(|component| matches!(component, Component::Normal(_) | Component::CurDir))
            {
                return Err(ArchiveError::UnsafeEntry(name));
            }

            let target = destination.join(&name);
            match entry.header().entry_type() {
                EntryType::Directory => {
                    fs::create_dir_all(&target).map_err(io_err(&target))?;
                }
                EntryType::Regular | EntryType::Continuous => {
                    if let Some(parent) = target.parent() {
                        fs::create_dir_all(parent).map_err(io_err(parent))?;
                    }
                    entry.unpack(&target).map_err(io_err(&target))?;
                }
                EntryType::Symlink => match entry.link_name().map_err(io_err(&archive_path))? {
                    Some(link) => links.push((target, link.into_owned())),
                    None => debug!("skip symlink {:?} without target", name.display()),
                },
                kind => debug!("skip irregular entry {:?} ({kind:?})", name.display()),
            }
        }

        for (target, link) in links {
            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent).map_err(io_err(parent))?;
            }
            symlink(&link, &target).map_err(io_err(&target))?;
        }
        info!("restored backup {id} into {:?}", destination.display());

        Ok(())
    }

    // Claim a fresh archive name. Collisions within the same second bump the
    // sequence number instead of overwriting an existing archive.
    fn reserve(&self) -> Result<(BackupId, File, PathBuf)> {
        let created = now();
        let mut seq = 0;
        loop {
            let id = BackupId::new(created, seq);
            let target = self.archive_path(&id);
            let partial = self.dir.join(format!("{}.partial", id.file_name()));
            if target.exists() {
                seq += 1;
                continue;
            }

            match OpenOptions::new().write(true).create_new(true).open(&partial) {
                Ok(file) => return Ok((id, file, partial)),
                Err(err) if err.kind() == ErrorKind::AlreadyExists => seq += 1,
                Err(err) => {
                    return Err(ArchiveError::Io {
                        source: err,
                        path: partial,
                    })
                }
            }
        }
    }

    fn write_archive(&self, source: &Path, file: File) -> Result<()> {
        // INVARIANT: Compare canonical paths, so the store is excluded even
        // when referenced through a different but equivalent path.
        let root = fs::canonicalize(source).unwrap_or_else(|_| source.to_path_buf());
        let store = fs::canonicalize(&self.dir).unwrap_or_else(|_| self.dir.clone());

        let mut builder = Builder::new(GzEncoder::new(file, Compression::default()));
        builder.follow_symlinks(false);

        let walker = WalkBuilder::new(&root)
            .standard_filters(false)
            .follow_links(false)
            .sort_by_file_name(|a, b| a.cmp(b))
            .filter_entry(move |entry| {
                let excluded_name = entry
                    .file_name()
                    .to_str()
                    .map(|name| EXCLUDED_NAMES.contains(&name))
                    .unwrap_or(false);
                let is_dir = entry.file_type().map(|kind| kind.is_dir()).unwrap_or(false);
                !(is_dir && (excluded_name || entry.path() == store))
            })
            .build();

        for entry in walker {
            let entry = entry?;
            if entry.depth() == 0 {
                continue;
            }

            let path = entry.path();
            let relative = path.strip_prefix(&root).unwrap_or(path);
            let name = archive_name(relative);
            let metadata = fs::symlink_metadata(path).map_err(|err| ArchiveError::Io {
                source: err,
                path: path.to_path_buf(),
            })?;
            let io_err = |err| ArchiveError::Io {
                source: err,
                path: path.to_path_buf(),
            };

            if metadata.is_dir() {
                builder.append_dir(&name, path).map_err(io_err)?;
            } else if metadata.is_file() {
                let mut file = File::open(path).map_err(io_err)?;
                builder.append_file(&name, &mut file).map_err(io_err)?;
            } else {
                let mut header = Header::new_gnu();
                header.set_size(0);
                header.set_mode(0o644);
                header.set_mtime(mtime(&metadata));
                if metadata.file_type().is_symlink() {
                    header.set_entry_type(EntryType::Symlink);
                    let target = fs::read_link(path).map_err(io_err)?;
                    builder
                        .append_link(&mut header, &name, target)
                        .map_err(io_err)?;
                } else {
                    header.set_entry_type(irregular_entry_type(&metadata));
                    builder
                        .append_data(&mut header, &name, io::empty())
                        .map_err(io_err)?;
                }
            }
        }

        let encoder = builder.into_inner().map_err(|err| ArchiveError::Io {
            source: err,
            path: self.dir.clone(),
        })?;
        let file = encoder.finish().map_err(|err| ArchiveError::Io {
            source: err,
            path: self.dir.clone(),
        })?;
        file.sync_all().map_err(|err| ArchiveError::Io {
            source: err,
            path: self.dir.clone(),
        })?;

        Ok(())
    }
}

/// Convert relative path into archive entry name with forward slashes.
pub fn archive_name(relative: &Path) -> String {
    relative
        .components()
        .filter_map(|component| match component {
            Component::Normal(part) => Some(part.to_string_lossy().into_owned()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("/")
}

fn now() -> NaiveDateTime {
    let now = Utc::now().naive_utc();
    // INVARIANT: Second resolution, matching the archive name.
    now.with_nanosecond(0).unwrap_or(now)
}

fn mtime(metadata: &fs::Metadata) -> u64 {
    metadata
        .modified()
        .ok()
        .and_then(|time| time.duration_since(UNIX_EPOCH).ok())
        .map(|duration| duration.as_secs())
        .unwrap_or(0)
}

#[cfg(unix)]
fn irregular_entry_type(metadata: &fs::Metadata) -> EntryType {
    use std::os::unix::fs::FileTypeExt;

    let kind = metadata.file_type();
    if kind.is_block_device() {
        EntryType::Block
    } else if kind.is_char_device() {
        EntryType::Char
    } else {
        EntryType::Fifo
    }
}

#[cfg(not(unix))]
fn irregular_entry_type(_: &fs::Metadata) -> EntryType {
    EntryType::Fifo
}

#[cfg(unix)]
fn symlink(link: &Path, target: &Path) -> io::Result<()> {
    std::os::unix::fs::symlink(link, target)
}

#[cfg(windows)]
fn symlink(link: &Path, target: &Path) -> io::Result<()> {
    std::os::windows::fs::symlink_file(link, target)
}

#[cfg(not(any(unix, windows)))]
fn symlink(_: &Path, _: &Path) -> io::Result<()> {
    Err(io::Error::from(ErrorKind::Unsupported))
}

/// Archive error types.
#[derive(Debug, thiserror::Error)]
pub enum ArchiveError {
    /// Snapshot source cannot be read.
    #[error("cannot read backup source {:?}", path.display())]
    ReadSource {
        #[source]
        source: io::Error,
        path: PathBuf,
    },

    /// Backup store directory cannot be created.
    #[error("cannot create backup store at {:?}", path.display())]
    CreateStore {
        #[source]
        source: io::Error,
        path: PathBuf,
    },

    /// Backup store holds no archives.
    #[error("no backups found in {:?}", .0.display())]
    NoBackups(PathBuf),

    /// Requested archive does not exist.
    #[error("backup archive {:?} does not exist", .0.display())]
    MissingBackup(PathBuf),

    /// File name does not follow backup naming scheme.
    #[error("invalid backup name {0:?}")]
    InvalidBackupName(String),

    /// Archive entry would be extracted outside of destination.
    #[error("refusing to extract unsafe entry {:?}", .0.display())]
    UnsafeEntry(PathBuf),

    /// Directory traversal fails.
    #[error(transparent)]
    Walk(#[from] ignore::Error),

    /// Archive I/O fails.
    #[error("backup I/O failed at {:?}", path.display())]
    Io {
        #[source]
        source: io::Error,
        path: PathBuf,
    },
}

/// Friendly result alias :3
pub type Result<T, E = ArchiveError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use pretty_assertions::assert_eq;
    use simple_test_case::test_case;
    use std::collections::BTreeMap;

    fn stamp(h: u32, m: u32, s: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2025, 1, 2)
            .and_then(|date| date.and_hms_opt(h, m, s))
            .unwrap()
    }

    fn read_archive(path: &Path) -> BTreeMap<String, Option<Vec<u8>>> {
        let mut archive = tar::Archive::new(GzDecoder::new(File::open(path).unwrap()));
        let mut entries = BTreeMap::new();
        for entry in archive.entries().unwrap() {
            let mut entry = entry.unwrap();
            let name = entry
                .path()
                .unwrap()
                .to_string_lossy()
                .trim_end_matches('/')
                .to_string();
            let content = match entry.header().entry_type() {
                EntryType::Regular => {
                    let mut buf = Vec::new();
                    io::Read::read_to_end(&mut entry, &mut buf).unwrap();
                    Some(buf)
                }
                _ => None,
            };
            entries.insert(name, content);
        }
        entries
    }

    #[test_case("backup-20250102-030405.tar.gz", stamp(3, 4, 5), 0; "plain")]
    #[test_case("backup-20250102-030405-3.tar.gz", stamp(3, 4, 5), 3; "collision suffix")]
    #[test]
    fn parse_backup_id(name: &str, created: NaiveDateTime, seq: u32) -> anyhow::Result<()> {
        let id: BackupId = name.parse()?;
        pretty_assertions::assert_eq!(id, BackupId::new(created, seq));
        pretty_assertions::assert_eq!(id.to_string(), name);

        Ok(())
    }

    #[test_case("backup-20250102-030405.tar"; "wrong extension")]
    #[test_case("snapshot-20250102-030405.tar.gz"; "wrong prefix")]
    #[test_case("backup-2025-01-02.tar.gz"; "bad stamp")]
    #[test_case("backup-20250102-030405-0.tar.gz"; "zero suffix")]
    #[test_case("backup-20250102-030405.tar.gz.partial"; "partial archive")]
    #[test]
    fn reject_foreign_backup_name(name: &str) {
        assert!(name.parse::<BackupId>().is_err());
    }

    #[test]
    fn backup_ids_order_by_time_then_sequence() {
        let mut ids = vec![
            BackupId::new(stamp(3, 0, 0), 1),
            BackupId::new(stamp(4, 0, 0), 0),
            BackupId::new(stamp(3, 0, 0), 0),
        ];
        ids.sort();
        assert_eq!(
            ids,
            vec![
                BackupId::new(stamp(3, 0, 0), 0),
                BackupId::new(stamp(3, 0, 0), 1),
                BackupId::new(stamp(4, 0, 0), 0),
            ]
        );
    }

    #[test]
    fn archive_name_uses_forward_slashes() {
        let relative: PathBuf = ["flake", "modules", "home.nix"].iter().collect();
        assert_eq!(archive_name(&relative), "flake/modules/home.nix");
    }

    #[test]
    fn create_excludes_metadata_and_store() -> anyhow::Result<()> {
        let root = tempfile::tempdir()?;
        let source = root.path().join("config");
        fs::create_dir_all(source.join("flake/modules"))?;
        fs::create_dir_all(source.join(".git/objects"))?;
        fs::create_dir_all(source.join("nested/.backups"))?;
        fs::write(source.join("flake/modules/home.nix"), "{ }")?;
        fs::write(source.join(".git/HEAD"), "ref: refs/heads/main")?;
        fs::write(source.join("nested/.backups/old.tar.gz"), "junk")?;
        fs::write(source.join("a.txt"), "x")?;

        // Store nested inside source is excluded by path.
        let store = BackupStore::new(source.join("store"));
        let id = store.create(&source)?;

        let entries = read_archive(&store.archive_path(&id));
        let names = entries.keys().cloned().collect::<Vec<_>>();
        assert_eq!(
            names,
            vec![
                "a.txt",
                "flake",
                "flake/modules",
                "flake/modules/home.nix",
                "nested",
            ]
        );
        assert_eq!(entries["a.txt"], Some(b"x".to_vec()));

        Ok(())
    }

    #[cfg(unix)]
    #[test]
    fn symlinks_survive_round_trip() -> anyhow::Result<()> {
        let root = tempfile::tempdir()?;
        let source = root.path().join("config");
        fs::create_dir_all(&source)?;
        fs::write(source.join("real.nix"), "{ }")?;
        std::os::unix::fs::symlink("real.nix", source.join("link.nix"))?;

        let store = BackupStore::new(root.path().join("store"));
        let id = store.create(&source)?;
        let entries = read_archive(&store.archive_path(&id));
        assert_eq!(entries["link.nix"], None);
        assert_eq!(entries["real.nix"], Some(b"{ }".to_vec()));

        let restored = root.path().join("restored");
        store.restore(&id, &restored)?;
        assert!(restored.join("real.nix").is_file());
        assert_eq!(fs::read_link(restored.join("link.nix"))?, Path::new("real.nix"));
        assert_eq!(fs::read_to_string(restored.join("link.nix"))?, "{ }");

        Ok(())
    }

    #[test]
    fn create_never_overwrites_existing_archive() -> anyhow::Result<()> {
        let root = tempfile::tempdir()?;
        let source = root.path().join("config");
        fs::create_dir_all(&source)?;
        fs::write(source.join("a.txt"), "x")?;

        let store = BackupStore::new(root.path().join("store"));
        let first = store.create(&source)?;
        let second = store.create(&source)?;
        assert_ne!(first, second);
        assert_eq!(store.list()?.len(), 2);
        assert_eq!(store.latest()?, Some(first.max(second)));

        Ok(())
    }

    #[test]
    fn create_fails_for_missing_source() {
        let root = tempfile::tempdir().unwrap();
        let store = BackupStore::new(root.path().join("store"));
        let result = store.create(root.path().join("missing"));
        assert!(matches!(result, Err(ArchiveError::ReadSource { .. })));
    }

    #[test]
    fn restore_replaces_destination_content() -> anyhow::Result<()> {
        let root = tempfile::tempdir()?;
        let source = root.path().join("config");
        fs::create_dir_all(source.join("flake"))?;
        fs::write(source.join("flake/base.json"), "{}")?;
        fs::write(source.join("a.txt"), "y")?;

        let store = BackupStore::new(root.path().join("store"));
        store.create(&source)?;

        let destination = root.path().join("restored");
        fs::create_dir_all(&destination)?;
        fs::write(destination.join("stale.txt"), "stale")?;
        store.restore_latest(&destination)?;

        assert_eq!(fs::read_to_string(destination.join("a.txt"))?, "y");
        assert_eq!(fs::read_to_string(destination.join("flake/base.json"))?, "{}");
        assert!(!destination.join("stale.txt").exists());

        Ok(())
    }

    #[test]
    fn restore_latest_with_empty_store_leaves_destination_alone() -> anyhow::Result<()> {
        let root = tempfile::tempdir()?;
        let destination = root.path().join("config");
        fs::create_dir_all(&destination)?;
        fs::write(destination.join("a.txt"), "keep")?;

        let store = BackupStore::new(root.path().join("store"));
        let result = store.restore_latest(&destination);
        assert!(matches!(result, Err(ArchiveError::NoBackups(_))));
        assert_eq!(fs::read_to_string(destination.join("a.txt"))?, "keep");

        Ok(())
    }

    #[test]
    fn list_skips_foreign_files() -> anyhow::Result<()> {
        let root = tempfile::tempdir()?;
        let store = BackupStore::new(root.path());
        fs::write(root.path().join("notes.txt"), "hi")?;
        fs::write(root.path().join("backup-20250102-030405.tar.gz"), "")?;
        fs::write(root.path().join("backup-20250102-030406.tar.gz.partial"), "")?;

        assert_eq!(store.list()?, vec![BackupId::new(stamp(3, 4, 5), 0)]);

        Ok(())
    }
}
