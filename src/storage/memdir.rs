//! Directory-backed record store.
//!
//! Layout under the root:
//!
//! ```text
//! <root>/
//! ├── tmp/   staging area, never holds an observable record
//! ├── new/   unclaimed records, named <token>
//! └── cur/   processed records, named <token>:2,<flags>
//! ```
//!
//! Every state transition is a single `rename(2)` within the root, so a
//! record is always in exactly one of `new` or `cur`. The directory listing is
//! the only index; nothing is cached between calls.

use std::fmt;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

use super::filename::{MAX_FILENAME_LEN, UniqueToken, base_name, info_suffix, parse_filename};
use super::flags::{Flag, FlagSet};
use crate::entry::MemoryEntry;
use crate::error::StorageError;

/// Staging directory name.
pub const TMP_DIR: &str = "tmp";
/// Inbox directory name.
pub const NEW_DIR: &str = "new";
/// Processed directory name.
pub const CUR_DIR: &str = "cur";

/// Attempts at drawing a token that is not already taken in `new`.
const MAX_NAME_ATTEMPTS: usize = 8;

/// Which directory a record lives in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MemoryState {
    /// Unclaimed, unprocessed.
    New,
    /// Processed and flag-tagged.
    Cur,
}

impl MemoryState {
    pub fn dir_name(&self) -> &'static str {
        match self {
            Self::New => NEW_DIR,
            Self::Cur => CUR_DIR,
        }
    }
}

impl fmt::Display for MemoryState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.dir_name())
    }
}

/// Filesystem-backed state store for memory entries.
#[derive(Debug, Clone)]
pub struct MemoryStorage {
    root: PathBuf,
}

impl MemoryStorage {
    /// Create a store rooted at `root`. Call [`ensure_dirs`](Self::ensure_dirs)
    /// before first use.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Create a store and its directory layout.
    pub async fn open(root: impl Into<PathBuf>) -> Result<Self, StorageError> {
        let storage = Self::new(root);
        storage.ensure_dirs().await?;
        Ok(storage)
    }

    /// Ensure `tmp`, `new` and `cur` exist. Idempotent.
    pub async fn ensure_dirs(&self) -> Result<(), StorageError> {
        for dir in [TMP_DIR, NEW_DIR, CUR_DIR] {
            let path = self.root.join(dir);
            fs::create_dir_all(&path)
                .await
                .map_err(|source| StorageError::Write {
                    path: path.clone(),
                    source,
                })?;
        }
        Ok(())
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Absolute directory for a state.
    pub fn state_dir(&self, state: MemoryState) -> PathBuf {
        self.root.join(state.dir_name())
    }

    fn tmp_dir(&self) -> PathBuf {
        self.root.join(TMP_DIR)
    }

    /// Path of `filename` inside `state`.
    pub fn path_of(&self, state: MemoryState, filename: &str) -> PathBuf {
        self.state_dir(state).join(filename)
    }

    // ── Listing ─────────────────────────────────────────────────────

    /// Records currently in `new`, in arrival order.
    pub async fn list_inbox(&self) -> Result<Vec<String>, StorageError> {
        self.list_files(MemoryState::New).await
    }

    /// Records currently in `state`, ordered by their uniqueness token.
    ///
    /// Hidden files and names that do not decode are skipped; they are not
    /// records.
    pub async fn list_files(&self, state: MemoryState) -> Result<Vec<String>, StorageError> {
        let dir = self.state_dir(state);
        let list_err = |source| StorageError::List {
            path: dir.clone(),
            source,
        };

        let mut read_dir = fs::read_dir(&dir).await.map_err(list_err)?;
        let mut records = Vec::new();
        while let Some(entry) = read_dir.next_entry().await.map_err(list_err)? {
            let Ok(name) = entry.file_name().into_string() else {
                warn!(dir = %dir.display(), "Skipping non-UTF-8 filename");
                continue;
            };
            if name.starts_with('.') {
                continue;
            }
            // Vanished between readdir and stat: simply not listed
            let Ok(file_type) = entry.file_type().await else {
                continue;
            };
            if !file_type.is_file() {
                continue;
            }
            match parse_filename(&name) {
                Ok(parsed) => records.push((parsed.token, name)),
                Err(e) => {
                    warn!(state = %state, filename = %name, error = %e, "Skipping undecodable filename");
                }
            }
        }

        records.sort();
        Ok(records.into_iter().map(|(_, name)| name).collect())
    }

    // ── Read / write ────────────────────────────────────────────────

    /// Serialize `entry` into `new` under a fresh name.
    ///
    /// The bytes are written and synced in `tmp` first, then renamed into
    /// `new`, so a lister never sees a partial file.
    pub async fn write_new(&self, entry: &MemoryEntry) -> Result<String, StorageError> {
        let bytes = serde_json::to_vec_pretty(entry)?;

        for _ in 0..MAX_NAME_ATTEMPTS {
            let filename = UniqueToken::generate().to_string();
            let dest = self.path_of(MemoryState::New, &filename);
            if path_exists(&dest).await {
                debug!(filename = %filename, "Generated name already taken, drawing again");
                continue;
            }

            let staged = self.stage(&bytes).await?;
            if let Err(source) = fs::rename(&staged, &dest).await {
                discard_staged(&staged).await;
                return Err(StorageError::Move {
                    from: staged,
                    to: dest,
                    source,
                });
            }

            debug!(
                entry_id = %entry.entry_id,
                entry_type = entry.entry_type.label(),
                filename = %filename,
                "Wrote entry to new"
            );
            return Ok(filename);
        }

        Err(StorageError::Write {
            path: self.state_dir(MemoryState::New),
            source: std::io::Error::new(
                std::io::ErrorKind::AlreadyExists,
                "could not draw an unused filename",
            ),
        })
    }

    /// Read and decode a record.
    pub async fn read(
        &self,
        state: MemoryState,
        filename: &str,
    ) -> Result<MemoryEntry, StorageError> {
        let path = self.path_of(state, filename);
        if !is_plain_component(filename) {
            return Err(StorageError::Read {
                path,
                reason: "not a plain filename".into(),
            });
        }

        let bytes = fs::read(&path).await.map_err(|e| StorageError::Read {
            path: path.clone(),
            reason: e.to_string(),
        })?;
        serde_json::from_slice(&bytes).map_err(|e| StorageError::Read {
            path,
            reason: format!("malformed record: {e}"),
        })
    }

    /// Move a record from `source_state` into `cur` with `flags` encoded in
    /// its new name, replacing its content with `entry`.
    ///
    /// The "Seen" flag is always added. Steps, each a single rename:
    ///
    /// 1. stage the new content in `tmp`;
    /// 2. rename the staged content over the source, so the record is still
    ///    in `source_state` but already holds its new content;
    /// 3. rename the source to its `cur` name (the state transition).
    ///
    /// If step 2 fails the source is untouched. If step 3 fails the record
    /// stays in `source_state` with its new content and can be processed
    /// again. A name in `cur` never points at stale content.
    pub async fn relocate(
        &self,
        source_state: MemoryState,
        filename: &str,
        entry: &MemoryEntry,
        flags: &FlagSet,
    ) -> Result<String, StorageError> {
        parse_filename(filename)?;

        let mut flags = flags.clone();
        flags.insert(Flag::seen());
        let new_filename = format!("{}{}", base_name(filename), info_suffix(&flags));
        if new_filename.len() > MAX_FILENAME_LEN {
            return Err(StorageError::decode(
                new_filename,
                format!("name longer than {MAX_FILENAME_LEN} bytes"),
            ));
        }

        let from_path = self.path_of(source_state, filename);
        let dest = self.path_of(MemoryState::Cur, &new_filename);
        let in_place = from_path == dest;

        if !path_exists(&from_path).await {
            return Err(StorageError::Move {
                from: from_path,
                to: dest,
                source: std::io::Error::new(
                    std::io::ErrorKind::NotFound,
                    "source no longer exists",
                ),
            });
        }
        if !in_place && path_exists(&dest).await {
            return Err(StorageError::Move {
                from: from_path,
                to: dest,
                source: std::io::Error::new(
                    std::io::ErrorKind::AlreadyExists,
                    "destination already exists in cur",
                ),
            });
        }

        let bytes = serde_json::to_vec_pretty(entry)?;
        let staged = self.stage(&bytes).await?;

        if let Err(e) = fs::rename(&staged, &from_path).await {
            discard_staged(&staged).await;
            return Err(StorageError::Write {
                path: from_path,
                source: e,
            });
        }

        if !in_place {
            if let Err(e) = fs::rename(&from_path, &dest).await {
                warn!(
                    filename = %filename,
                    from = %source_state,
                    "Content updated but record not moved, left in place"
                );
                return Err(StorageError::Move {
                    from: from_path,
                    to: dest,
                    source: e,
                });
            }
        }

        info!(
            entry_id = %entry.entry_id,
            from = %source_state,
            filename = %filename,
            new_filename = %new_filename,
            "Relocated entry to cur"
        );
        Ok(new_filename)
    }

    /// Remove staged files older than `max_age`, left behind by a crash
    /// between staging and rename. Returns how many were removed.
    pub async fn sweep_staging(&self, max_age: Duration) -> Result<usize, StorageError> {
        let dir = self.tmp_dir();
        let list_err = |source| StorageError::List {
            path: dir.clone(),
            source,
        };

        let now = SystemTime::now();
        let mut removed = 0;
        let mut read_dir = fs::read_dir(&dir).await.map_err(list_err)?;
        while let Some(entry) = read_dir.next_entry().await.map_err(list_err)? {
            let Ok(meta) = entry.metadata().await else {
                continue;
            };
            let age = meta
                .modified()
                .ok()
                .and_then(|m| now.duration_since(m).ok())
                .unwrap_or_default();
            if meta.is_file() && age >= max_age {
                match fs::remove_file(entry.path()).await {
                    Ok(()) => removed += 1,
                    Err(e) => warn!(path = %entry.path().display(), error = %e, "Failed to remove stale staged file"),
                }
            }
        }

        if removed > 0 {
            info!(removed, "Swept stale staged files");
        }
        Ok(removed)
    }

    /// Write `bytes` to a fresh file in `tmp` and sync it.
    async fn stage(&self, bytes: &[u8]) -> Result<PathBuf, StorageError> {
        let path = self
            .tmp_dir()
            .join(format!("{}.staged", UniqueToken::generate()));
        let write_err = |source| StorageError::Write {
            path: path.clone(),
            source,
        };

        let mut file = fs::File::create(&path).await.map_err(write_err)?;
        let written = async {
            file.write_all(bytes).await?;
            file.sync_all().await
        }
        .await;
        if let Err(source) = written {
            drop(file);
            discard_staged(&path).await;
            return Err(write_err(source));
        }
        Ok(path)
    }
}

fn is_plain_component(filename: &str) -> bool {
    !filename.is_empty()
        && filename != "."
        && filename != ".."
        && !filename.contains('/')
        && !filename.contains('\\')
        && !filename.contains('\0')
}

async fn path_exists(path: &Path) -> bool {
    fs::try_exists(path).await.unwrap_or(false)
}

async fn discard_staged(path: &Path) {
    if let Err(e) = fs::remove_file(path).await
        && e.kind() != std::io::ErrorKind::NotFound
    {
        warn!(path = %path.display(), error = %e, "Failed to remove staged file");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entry::{EntryMetadata, EntryType};
    use serde_json::json;
    use tempfile::TempDir;

    async fn test_storage() -> (MemoryStorage, TempDir) {
        let dir = TempDir::new().unwrap();
        let storage = MemoryStorage::open(dir.path().join("memdir")).await.unwrap();
        (storage, dir)
    }

    fn signal(symbol: &str) -> MemoryEntry {
        MemoryEntry::from_json(EntryType::Signal, "Test", json!({"symbol": symbol}))
    }

    async fn tmp_is_empty(storage: &MemoryStorage) -> bool {
        let mut rd = fs::read_dir(storage.tmp_dir()).await.unwrap();
        rd.next_entry().await.unwrap().is_none()
    }

    #[tokio::test]
    async fn ensure_dirs_creates_layout() {
        let (storage, _dir) = test_storage().await;
        for d in [TMP_DIR, NEW_DIR, CUR_DIR] {
            assert!(storage.root().join(d).is_dir());
        }
        // idempotent
        storage.ensure_dirs().await.unwrap();
    }

    #[tokio::test]
    async fn write_new_then_read() {
        let (storage, _dir) = test_storage().await;
        let entry = signal("AAPL");
        let filename = storage.write_new(&entry).await.unwrap();

        assert!(parse_filename(&filename).unwrap().flags.is_none());
        assert_eq!(storage.list_inbox().await.unwrap(), vec![filename.clone()]);
        let back = storage.read(MemoryState::New, &filename).await.unwrap();
        assert_eq!(back, entry);
        assert!(tmp_is_empty(&storage).await);
    }

    #[tokio::test]
    async fn inbox_lists_in_creation_order() {
        let (storage, _dir) = test_storage().await;
        let mut written = Vec::new();
        for i in 0..12 {
            let entry = MemoryEntry::from_json(EntryType::Metric, "Test", json!({"i": i}));
            written.push(storage.write_new(&entry).await.unwrap());
        }
        assert_eq!(storage.list_inbox().await.unwrap(), written);
    }

    #[tokio::test]
    async fn listing_skips_hidden_and_foreign_files() {
        let (storage, _dir) = test_storage().await;
        let filename = storage.write_new(&signal("MSFT")).await.unwrap();
        let new_dir = storage.state_dir(MemoryState::New);
        fs::write(new_dir.join(".hidden"), b"{}").await.unwrap();
        fs::write(new_dir.join("notes.txt"), b"hello").await.unwrap();
        fs::create_dir(new_dir.join("1700000000.000000_1_1_deadbeef")).await.unwrap();

        assert_eq!(storage.list_inbox().await.unwrap(), vec![filename]);
    }

    #[tokio::test]
    async fn listing_missing_dir_is_an_error() {
        let dir = TempDir::new().unwrap();
        let storage = MemoryStorage::new(dir.path().join("absent"));
        let err = storage.list_inbox().await.unwrap_err();
        assert!(matches!(err, StorageError::List { .. }));
    }

    #[tokio::test]
    async fn read_missing_file_is_read_error() {
        let (storage, _dir) = test_storage().await;
        let err = storage
            .read(MemoryState::New, "does_not_exist.json")
            .await
            .unwrap_err();
        assert!(err.is_read_failure());
    }

    #[tokio::test]
    async fn read_malformed_file_is_read_error() {
        let (storage, _dir) = test_storage().await;
        let name = "1700000000.000000_1_1_deadbeef";
        fs::write(storage.path_of(MemoryState::New, name), b"{not json")
            .await
            .unwrap();
        let err = storage.read(MemoryState::New, name).await.unwrap_err();
        assert!(err.is_read_failure());
        assert!(err.to_string().contains("malformed"));
    }

    #[tokio::test]
    async fn read_rejects_path_traversal() {
        let (storage, _dir) = test_storage().await;
        let err = storage.read(MemoryState::New, "../cur/x").await.unwrap_err();
        assert!(err.is_read_failure());
    }

    #[tokio::test]
    async fn relocate_moves_exactly_once() {
        let (storage, _dir) = test_storage().await;
        let entry = signal("AAPL");
        let filename = storage.write_new(&entry).await.unwrap();

        let mut flags = FlagSet::new();
        flags.insert_token("Symbol_AAPL").unwrap();
        let enriched = entry.clone().with_metadata(EntryMetadata {
            keywords: vec!["apple".into()],
            summary: "buy".into(),
            suggested_flags: vec![],
        });

        let new_name = storage
            .relocate(MemoryState::New, &filename, &enriched, &flags)
            .await
            .unwrap();

        assert!(new_name.starts_with(&filename));
        assert!(new_name.ends_with(":2,S,Symbol_AAPL"));
        assert!(storage.list_inbox().await.unwrap().is_empty());
        assert_eq!(
            storage.list_files(MemoryState::Cur).await.unwrap(),
            vec![new_name.clone()]
        );
        let stored = storage.read(MemoryState::Cur, &new_name).await.unwrap();
        assert_eq!(stored, enriched);
        assert!(stored.same_content(&entry));
        assert!(tmp_is_empty(&storage).await);
    }

    #[tokio::test]
    async fn relocate_always_adds_seen() {
        let (storage, _dir) = test_storage().await;
        let entry = signal("X");
        let filename = storage.write_new(&entry).await.unwrap();
        let new_name = storage
            .relocate(MemoryState::New, &filename, &entry, &FlagSet::new())
            .await
            .unwrap();
        let parsed = parse_filename(&new_name).unwrap();
        assert_eq!(parsed.flags_str(), "S");
    }

    #[tokio::test]
    async fn relocate_vanished_source_is_move_error() {
        let (storage, _dir) = test_storage().await;
        let entry = signal("AAPL");
        let filename = storage.write_new(&entry).await.unwrap();
        storage
            .relocate(MemoryState::New, &filename, &entry, &FlagSet::seen())
            .await
            .unwrap();

        // A second consumer racing on the same name
        let err = storage
            .relocate(MemoryState::New, &filename, &entry, &FlagSet::seen())
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::Move { .. }));
        assert_eq!(storage.list_files(MemoryState::Cur).await.unwrap().len(), 1);
        assert!(tmp_is_empty(&storage).await);
    }

    #[tokio::test]
    async fn failed_move_keeps_updated_record_in_source_only() {
        let (storage, _dir) = test_storage().await;
        let entry = signal("AAPL");
        let filename = storage.write_new(&entry).await.unwrap();
        fs::remove_dir(storage.state_dir(MemoryState::Cur)).await.unwrap();

        let enriched = entry.clone().with_metadata(EntryMetadata {
            keywords: vec!["apple".into()],
            summary: "buy".into(),
            suggested_flags: vec!["F1".into()],
        });
        let mut flags = FlagSet::seen();
        flags.insert_token("F1").unwrap();

        let err = storage
            .relocate(MemoryState::New, &filename, &enriched, &flags)
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::Move { .. }));

        // Exactly one copy, still in new, holding the content it was given
        storage.ensure_dirs().await.unwrap();
        assert_eq!(storage.list_inbox().await.unwrap(), vec![filename.clone()]);
        assert!(storage.list_files(MemoryState::Cur).await.unwrap().is_empty());
        assert_eq!(storage.read(MemoryState::New, &filename).await.unwrap(), enriched);
        assert!(tmp_is_empty(&storage).await);

        // And it can still be moved later
        let moved = storage
            .relocate(MemoryState::New, &filename, &enriched, &flags)
            .await
            .unwrap();
        assert_eq!(storage.read(MemoryState::Cur, &moved).await.unwrap(), enriched);
        assert!(storage.list_inbox().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn failed_content_swap_leaves_source_untouched() {
        let (storage, _dir) = test_storage().await;
        // A directory at the source name makes the content rename fail
        let name = "1700000000.000000_1_1_deadbeef";
        let source = storage.path_of(MemoryState::New, name);
        fs::create_dir(&source).await.unwrap();

        let err = storage
            .relocate(MemoryState::New, name, &signal("AAPL"), &FlagSet::seen())
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::Write { .. }));
        assert!(source.is_dir());
        assert!(storage.list_files(MemoryState::Cur).await.unwrap().is_empty());
        assert!(tmp_is_empty(&storage).await);
    }

    #[tokio::test]
    async fn relocate_rejects_overlong_name() {
        let (storage, _dir) = test_storage().await;
        let entry = signal("AAPL");
        let filename = storage.write_new(&entry).await.unwrap();

        let mut flags = FlagSet::seen();
        for i in 0..5 {
            flags.insert_token(&format!("Flag_{i}_{}", "x".repeat(50))).unwrap();
        }
        let err = storage
            .relocate(MemoryState::New, &filename, &entry, &flags)
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::Decode { .. }));
        assert_eq!(storage.list_inbox().await.unwrap(), vec![filename.clone()]);
        assert_eq!(storage.read(MemoryState::New, &filename).await.unwrap(), entry);
        assert!(tmp_is_empty(&storage).await);
    }

    #[tokio::test]
    async fn relocate_rejects_undecodable_source_name() {
        let (storage, _dir) = test_storage().await;
        let err = storage
            .relocate(MemoryState::New, "garbage", &signal("A"), &FlagSet::seen())
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::Decode { .. }));
    }

    #[tokio::test]
    async fn relocate_within_cur_retags() {
        let (storage, _dir) = test_storage().await;
        let entry = signal("AAPL");
        let filename = storage.write_new(&entry).await.unwrap();
        let first = storage
            .relocate(MemoryState::New, &filename, &entry, &FlagSet::seen())
            .await
            .unwrap();

        let mut flags = FlagSet::seen();
        flags.insert_token("Reviewed").unwrap();
        let second = storage
            .relocate(MemoryState::Cur, &first, &entry, &flags)
            .await
            .unwrap();
        assert!(second.ends_with(":2,Reviewed,S"));
        assert_eq!(
            storage.list_files(MemoryState::Cur).await.unwrap(),
            vec![second.clone()]
        );

        // Same flags again: content rewritten in place
        let third = storage
            .relocate(MemoryState::Cur, &second, &entry, &flags)
            .await
            .unwrap();
        assert_eq!(third, second);
        assert_eq!(storage.list_files(MemoryState::Cur).await.unwrap(), vec![third]);
    }

    #[tokio::test]
    async fn sweep_staging_removes_leftovers() {
        let (storage, _dir) = test_storage().await;
        fs::write(storage.tmp_dir().join("orphan.staged"), b"partial")
            .await
            .unwrap();
        assert_eq!(storage.sweep_staging(Duration::from_secs(3600)).await.unwrap(), 0);
        assert_eq!(storage.sweep_staging(Duration::ZERO).await.unwrap(), 1);
        assert!(tmp_is_empty(&storage).await);
    }
}
