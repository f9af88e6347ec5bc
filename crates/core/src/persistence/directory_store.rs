use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use thiserror::Error;

use crate::persistence::record_codec::{self, DecodeError};
use crate::registry::domain::identity_record::IdentityRecord;
use crate::registry::domain::template_comparator::TemplateComparator;
use crate::registry::identity_registry::Registry;
use crate::shared::constants::{PARTIAL_EXTENSION, RECORD_EXTENSION};
use crate::shared::identity_key::IdentityKey;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("store directory not found: {0}")]
    DirectoryNotFound(PathBuf),
    #[error("store directory unreadable: {path}: {source}")]
    DirectoryUnreadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to write {path}: {source}")]
    DirectoryUnwritable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("store operation cancelled")]
    Cancelled,
}

/// Why a single file was skipped during [`DirectoryStore::load`].
#[derive(Error, Debug)]
pub enum SkipReason {
    #[error("file name does not name an identity")]
    UnparsableName,
    #[error("read failed: {0}")]
    Read(#[source] std::io::Error),
    #[error("corrupt record: {0}")]
    Corrupt(#[source] DecodeError),
}

#[derive(Debug)]
pub struct LoadFailure {
    pub path: PathBuf,
    pub reason: SkipReason,
}

/// A populated registry plus every file that could not be loaded into it.
pub struct LoadReport<K: IdentityKey> {
    pub registry: Registry<K>,
    pub failures: Vec<LoadFailure>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SaveReport {
    pub written: usize,
    pub pruned: usize,
}

/// Persists a registry as one record file per identity in a directory.
///
/// Save and load both use [`RECORD_EXTENSION`]; other files in the directory
/// are left alone.
pub struct DirectoryStore {
    dir: PathBuf,
    cancelled: Option<Arc<AtomicBool>>,
}

impl DirectoryStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            cancelled: None,
        }
    }

    /// Checked between files; once set, save/load stop with
    /// [`StoreError::Cancelled`].
    pub fn with_cancel_flag(mut self, cancelled: Arc<AtomicBool>) -> Self {
        self.cancelled = Some(cancelled);
        self
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn record_path<K: IdentityKey>(&self, key: &K) -> PathBuf {
        self.dir
            .join(format!("{}.{RECORD_EXTENSION}", key.file_stem()))
    }

    fn check_cancelled(&self) -> Result<(), StoreError> {
        match &self.cancelled {
            Some(flag) if flag.load(Ordering::Relaxed) => Err(StoreError::Cancelled),
            _ => Ok(()),
        }
    }

    /// Writes every record of `registry`, overwriting existing files for the
    /// same key, then removes the record files of identities the registry
    /// has removed or merged away. Files the registry never held (corrupt
    /// records skipped on load, strays) are left alone.
    ///
    /// Works from a snapshot, so concurrent mutation never tears a record.
    pub fn save<K: IdentityKey>(&self, registry: &Registry<K>) -> Result<SaveReport, StoreError> {
        self.check_cancelled()?;
        fs::create_dir_all(&self.dir).map_err(|e| StoreError::DirectoryUnwritable {
            path: self.dir.clone(),
            source: e,
        })?;

        let snapshot = registry.snapshot();
        let mut kept: HashSet<String> = HashSet::with_capacity(snapshot.len());

        for (key, record) in &snapshot {
            self.check_cancelled()?;
            let path = self.record_path(key);
            write_atomic(&path, &record_codec::encode(record))?;
            kept.insert(key.file_stem());
        }

        let retired: Vec<String> = registry
            .retired_keys()
            .iter()
            .map(IdentityKey::file_stem)
            .filter(|stem| !kept.contains(stem))
            .collect();
        let pruned = self.prune(&retired);
        log::info!(
            "Saved {} identities to {} ({pruned} stale removed)",
            snapshot.len(),
            self.dir.display()
        );
        Ok(SaveReport {
            written: snapshot.len(),
            pruned,
        })
    }

    fn prune(&self, stems: &[String]) -> usize {
        let mut pruned = 0;
        for stem in stems {
            let path = self.dir.join(format!("{stem}.{RECORD_EXTENSION}"));
            match fs::remove_file(&path) {
                Ok(()) => pruned += 1,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => log::warn!("Could not remove stale record {}: {e}", path.display()),
            }
        }
        pruned
    }

    /// Loads every record file into a fresh registry using `comparator`.
    pub fn load<K: IdentityKey>(
        &self,
        comparator: Arc<dyn TemplateComparator>,
    ) -> Result<LoadReport<K>, StoreError> {
        self.load_into(Registry::new(comparator))
    }

    /// Loads every record file into `registry`, which the caller has already
    /// configured (record factory, worker threads). Loaded keys replace any
    /// record already present under the same key.
    ///
    /// Files that fail to parse or decode are reported in
    /// [`LoadReport::failures`] and do not stop the load.
    pub fn load_into<K: IdentityKey>(
        &self,
        registry: Registry<K>,
    ) -> Result<LoadReport<K>, StoreError> {
        if !self.dir.is_dir() {
            return Err(StoreError::DirectoryNotFound(self.dir.clone()));
        }

        let mut failures = Vec::new();
        let mut loaded = 0;

        for path in self.record_files()? {
            self.check_cancelled()?;
            match load_file::<K>(&path) {
                Ok((key, record)) => {
                    registry.insert_record(key, record);
                    loaded += 1;
                }
                Err(reason) => {
                    log::warn!("Skipping {}: {reason}", path.display());
                    failures.push(LoadFailure { path, reason });
                }
            }
        }

        log::info!(
            "Loaded {loaded} identities from {} ({} skipped)",
            self.dir.display(),
            failures.len()
        );
        Ok(LoadReport { registry, failures })
    }

    /// Regular files with the record extension, sorted by path.
    fn record_files(&self) -> Result<Vec<PathBuf>, StoreError> {
        let unreadable = |e| StoreError::DirectoryUnreadable {
            path: self.dir.clone(),
            source: e,
        };
        let mut files = Vec::new();
        for entry in fs::read_dir(&self.dir).map_err(unreadable)? {
            let path = entry.map_err(unreadable)?.path();
            let is_record = path.extension().and_then(|e| e.to_str()) == Some(RECORD_EXTENSION);
            if is_record && path.is_file() {
                files.push(path);
            }
        }
        files.sort();
        Ok(files)
    }
}

fn load_file<K: IdentityKey>(path: &Path) -> Result<(K, IdentityRecord), SkipReason> {
    let key = path
        .file_stem()
        .and_then(|s| s.to_str())
        .and_then(K::from_file_stem)
        .ok_or(SkipReason::UnparsableName)?;
    let bytes = fs::read(path).map_err(SkipReason::Read)?;
    let record = record_codec::decode(&bytes).map_err(SkipReason::Corrupt)?;
    Ok((key, record))
}

/// Write to a temp file first, then rename, so a crash never leaves a
/// half-written record under the canonical name.
fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), StoreError> {
    let temp_path = path.with_extension(PARTIAL_EXTENSION);
    fs::write(&temp_path, bytes).map_err(|e| StoreError::DirectoryUnwritable {
        path: temp_path.clone(),
        source: e,
    })?;
    fs::rename(&temp_path, path).map_err(|e| {
        let _ = fs::remove_file(&temp_path);
        StoreError::DirectoryUnwritable {
            path: path.to_path_buf(),
            source: e,
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::domain::template_comparator::fakes::{t, LineComparator};

    fn comparator() -> Arc<dyn TemplateComparator> {
        Arc::new(LineComparator)
    }

    fn sorted_snapshot<K: IdentityKey + Ord>(
        registry: &Registry<K>,
    ) -> Vec<(K, IdentityRecord)> {
        let mut s = registry.snapshot();
        s.sort_by(|a, b| a.0.cmp(&b.0));
        s
    }

    fn alice_and_bob() -> Registry<String> {
        let reg = Registry::new(comparator());
        reg.enroll("alice".to_string(), t(10)).unwrap();
        reg.add_template(&"alice".to_string(), t(20)).unwrap();
        reg.enroll("bob".to_string(), t(200)).unwrap();
        reg
    }

    #[test]
    fn test_save_then_load_restores_registry() {
        let dir = tempfile::tempdir().unwrap();
        let store = DirectoryStore::new(dir.path());
        let original = alice_and_bob();

        let report = store.save(&original).unwrap();
        let loaded = store.load::<String>(comparator()).unwrap();

        assert_eq!(report, SaveReport { written: 2, pruned: 0 });
        assert!(loaded.failures.is_empty());
        assert_eq!(sorted_snapshot(&loaded.registry), sorted_snapshot(&original));
    }

    #[test]
    fn test_save_uses_canonical_extension_and_leaves_no_temp_files() {
        let dir = tempfile::tempdir().unwrap();
        let store = DirectoryStore::new(dir.path());
        store.save(&alice_and_bob()).unwrap();

        let mut names: Vec<String> = fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();

        assert_eq!(names, vec!["alice.fir", "bob.fir"]);
    }

    #[test]
    fn test_save_creates_missing_directory() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("a").join("b");
        DirectoryStore::new(&nested).save(&alice_and_bob()).unwrap();
        assert!(nested.join("alice.fir").exists());
    }

    #[test]
    fn test_save_overwrites_existing_record() {
        let dir = tempfile::tempdir().unwrap();
        let store = DirectoryStore::new(dir.path());
        let reg = alice_and_bob();
        store.save(&reg).unwrap();

        reg.add_template(&"bob".to_string(), t(210)).unwrap();
        store.save(&reg).unwrap();

        let loaded = store.load::<String>(comparator()).unwrap();
        assert_eq!(
            loaded.registry.get(&"bob".to_string()).unwrap().templates(),
            &[t(200), t(210)]
        );
    }

    #[test]
    fn test_save_prunes_merged_identity() {
        let dir = tempfile::tempdir().unwrap();
        let store = DirectoryStore::new(dir.path());
        let reg = alice_and_bob();
        store.save(&reg).unwrap();

        reg.merge(&"alice".to_string(), &"bob".to_string()).unwrap();
        let report = store.save(&reg).unwrap();

        assert_eq!(report, SaveReport { written: 1, pruned: 1 });
        assert!(!dir.path().join("bob.fir").exists());
        let loaded = store.load::<String>(comparator()).unwrap();
        assert_eq!(loaded.registry.keys(), vec!["alice".to_string()]);
    }

    #[test]
    fn test_save_leaves_record_files_it_never_loaded() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("not%zzkey.fir"), b"x").unwrap();
        let reg: Registry<u32> = Registry::new(comparator());
        reg.enroll(1, t(5)).unwrap();
        fs::write(dir.path().join("alice.fir"), b"x").unwrap();

        let report = DirectoryStore::new(dir.path()).save(&reg).unwrap();

        assert_eq!(report.pruned, 0);
        assert!(dir.path().join("alice.fir").exists());
    }

    #[test]
    fn test_save_to_unwritable_location() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("file");
        fs::write(&blocker, b"not a dir").unwrap();

        let err = DirectoryStore::new(blocker.join("store"))
            .save(&alice_and_bob())
            .unwrap_err();

        assert!(matches!(err, StoreError::DirectoryUnwritable { .. }));
    }

    #[test]
    fn test_load_missing_directory() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("missing");

        let err = DirectoryStore::new(&missing)
            .load::<String>(comparator())
            .err()
            .unwrap();

        assert!(matches!(err, StoreError::DirectoryNotFound(p) if p == missing));
    }

    #[test]
    fn test_load_skips_foreign_extensions_silently() {
        let dir = tempfile::tempdir().unwrap();
        let store = DirectoryStore::new(dir.path());
        store.save(&alice_and_bob()).unwrap();
        fs::write(dir.path().join("notes.txt"), b"hello").unwrap();
        fs::write(dir.path().join("carol.xml"), b"<x/>").unwrap();

        let loaded = store.load::<String>(comparator()).unwrap();

        assert_eq!(loaded.registry.len(), 2);
        assert!(loaded.failures.is_empty());
    }

    #[test]
    fn test_load_reports_corrupt_file_and_keeps_going() {
        let dir = tempfile::tempdir().unwrap();
        let store = DirectoryStore::new(dir.path());
        store.save(&alice_and_bob()).unwrap();
        let broken = dir.path().join("carol.fir");
        fs::write(&broken, [9, 0, 0]).unwrap();

        let loaded = store.load::<String>(comparator()).unwrap();

        assert_eq!(loaded.registry.len(), 2);
        assert_eq!(loaded.failures.len(), 1);
        assert_eq!(loaded.failures[0].path, broken);
        assert!(matches!(loaded.failures[0].reason, SkipReason::Corrupt(_)));
    }

    #[test]
    fn test_load_reports_unparsable_names() {
        let dir = tempfile::tempdir().unwrap();
        let reg: Registry<u32> = Registry::new(comparator());
        reg.enroll(7, t(5)).unwrap();
        let store = DirectoryStore::new(dir.path());
        store.save(&reg).unwrap();
        fs::write(dir.path().join("alice.fir"), b"x").unwrap();

        let loaded = store.load::<u32>(comparator()).unwrap();

        assert_eq!(loaded.registry.keys(), vec![7]);
        assert_eq!(loaded.failures.len(), 1);
        assert!(matches!(loaded.failures[0].reason, SkipReason::UnparsableName));
    }

    #[test]
    fn test_escaped_names_roundtrip_through_files() {
        let dir = tempfile::tempdir().unwrap();
        let store = DirectoryStore::new(dir.path());
        let reg = Registry::new(comparator());
        reg.enroll("Jean Luc".to_string(), t(40)).unwrap();
        reg.enroll("../escape".to_string(), t(50)).unwrap();

        store.save(&reg).unwrap();
        let loaded = store.load::<String>(comparator()).unwrap();

        assert!(dir.path().join("%4Aean%20%4Cuc.fir").exists());
        assert_eq!(sorted_snapshot(&loaded.registry), sorted_snapshot(&reg));
    }

    #[test]
    fn test_load_into_keeps_registry_configuration() {
        let dir = tempfile::tempdir().unwrap();
        let store = DirectoryStore::new(dir.path());
        store.save(&alice_and_bob()).unwrap();

        let configured = Registry::new(comparator())
            .with_record_factory(Box::new(|k: &String| k.to_uppercase()));
        let loaded = store.load_into(configured).unwrap().registry;
        loaded.enroll("carol".to_string(), t(90)).unwrap();

        assert_eq!(loaded.get(&"carol".to_string()).unwrap().display_name(), "CAROL");
        assert_eq!(loaded.get(&"alice".to_string()).unwrap().display_name(), "alice");
    }

    #[test]
    fn test_cancelled_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        DirectoryStore::new(dir.path()).save(&alice_and_bob()).unwrap();
        let flag = Arc::new(AtomicBool::new(true));
        let store = DirectoryStore::new(dir.path()).with_cancel_flag(flag);

        assert!(matches!(store.save(&alice_and_bob()), Err(StoreError::Cancelled)));
        assert!(matches!(
            store.load::<String>(comparator()),
            Err(StoreError::Cancelled)
        ));
    }

    #[test]
    fn test_save_keeps_corrupt_record_skipped_on_load() {
        let dir = tempfile::tempdir().unwrap();
        let store = DirectoryStore::new(dir.path());
        let carol = dir.path().join("carol.fir");
        fs::write(&carol, [9, 0, 0]).unwrap();

        let loaded = store.load::<String>(comparator()).unwrap();
        assert_eq!(loaded.failures.len(), 1);
        loaded.registry.enroll("dave".to_string(), t(70)).unwrap();
        let report = store.save(&loaded.registry).unwrap();

        assert_eq!(report, SaveReport { written: 1, pruned: 0 });
        assert_eq!(fs::read(&carol).unwrap(), vec![9, 0, 0]);
    }

    #[test]
    fn test_save_prunes_removed_identity_after_reload() {
        let dir = tempfile::tempdir().unwrap();
        let store = DirectoryStore::new(dir.path());
        store.save(&alice_and_bob()).unwrap();

        let reloaded = store.load::<String>(comparator()).unwrap().registry;
        assert!(reloaded.remove(&"bob".to_string()));
        let report = store.save(&reloaded).unwrap();

        assert_eq!(report.pruned, 1);
        assert!(!dir.path().join("bob.fir").exists());
        assert!(dir.path().join("alice.fir").exists());
    }

    #[test]
    fn test_save_keeps_file_of_reenrolled_identity() {
        let dir = tempfile::tempdir().unwrap();
        let store = DirectoryStore::new(dir.path());
        let reg = alice_and_bob();
        reg.remove(&"bob".to_string());
        reg.enroll("bob".to_string(), t(150)).unwrap();

        store.save(&reg).unwrap();

        assert!(dir.path().join("bob.fir").exists());
    }

    #[test]
    fn test_failed_rename_removes_temp_file() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("alice.fir");
        fs::create_dir(&target).unwrap();
        fs::write(target.join("occupied"), b"x").unwrap();

        let err = write_atomic(&target, b"record").unwrap_err();

        assert!(matches!(err, StoreError::DirectoryUnwritable { .. }));
        assert!(!target.with_extension(PARTIAL_EXTENSION).exists());
    }
}
