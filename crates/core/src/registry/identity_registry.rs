use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, RwLock, RwLockReadGuard, RwLockWriteGuard};

use rayon::prelude::*;

use crate::registry::domain::identity_record::IdentityRecord;
use crate::registry::domain::match_result::MatchResult;
use crate::registry::domain::template_comparator::TemplateComparator;
use crate::registry::registry_error::RegistryError;
use crate::shared::identity_key::IdentityKey;
use crate::shared::template::Template;

/// Builds the display name of a freshly enrolled identity.
pub type RecordFactory<K> = Box<dyn Fn(&K) -> String + Send + Sync>;

type Records<K> = HashMap<K, RwLock<IdentityRecord>>;

/// In-memory mapping from identity key to record.
///
/// Locking: the outer lock guards the key set, each record has its own lock
/// for its template sequence. Scans and appends take the outer lock shared,
/// so they run concurrently with each other; enroll, merge and remove take it
/// exclusively. An append holds the shared lock until its push completes,
/// which orders it strictly before or after any merge touching its key.
///
/// Keys dropped by `remove` or `merge` are remembered as retired until they
/// are enrolled again, so persistence can tell a deleted identity apart from
/// one that was never loaded.
pub struct Registry<K: IdentityKey> {
    records: RwLock<Records<K>>,
    retired: Mutex<HashSet<K>>,
    comparator: Arc<dyn TemplateComparator>,
    factory: RecordFactory<K>,
    pool: Option<rayon::ThreadPool>,
}

impl<K: IdentityKey> Registry<K> {
    pub fn new(comparator: Arc<dyn TemplateComparator>) -> Self {
        Self {
            records: RwLock::new(HashMap::new()),
            retired: Mutex::new(HashSet::new()),
            comparator,
            factory: Box::new(|key: &K| key.to_string()),
            pool: None,
        }
    }

    pub fn with_record_factory(mut self, factory: RecordFactory<K>) -> Self {
        self.factory = factory;
        self
    }

    /// Runs match scans on a dedicated pool of `threads` workers instead of
    /// the global rayon pool.
    pub fn with_worker_threads(
        mut self,
        threads: usize,
    ) -> Result<Self, rayon::ThreadPoolBuildError> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .thread_name(|i| format!("registry-match-{i}"))
            .build()?;
        self.pool = Some(pool);
        Ok(self)
    }

    pub fn comparator(&self) -> &Arc<dyn TemplateComparator> {
        &self.comparator
    }

    fn read(&self) -> RwLockReadGuard<'_, Records<K>> {
        self.records.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, Records<K>> {
        self.records.write().unwrap_or_else(|e| e.into_inner())
    }

    /// Lock order: always after the records lock.
    fn retired_mut(&self) -> MutexGuard<'_, HashSet<K>> {
        self.retired.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn enroll(&self, key: K, template: Template) -> Result<(), RegistryError> {
        if !self.comparator.is_valid(&template) {
            return Err(RegistryError::InvalidTemplate);
        }
        let mut records = self.write();
        if records.contains_key(&key) {
            return Err(RegistryError::DuplicateKey(key.to_string()));
        }
        let record = IdentityRecord::new((self.factory)(&key), template);
        log::debug!("Enrolled identity {key}");
        self.retired_mut().remove(&key);
        records.insert(key, RwLock::new(record));
        Ok(())
    }

    /// Inserts a fully built record, replacing any record under `key`.
    ///
    /// Used by bulk loading, which bypasses per-template validation.
    pub fn insert_record(&self, key: K, record: IdentityRecord) {
        let mut records = self.write();
        self.retired_mut().remove(&key);
        records.insert(key, RwLock::new(record));
    }

    pub fn add_template(&self, key: &K, template: Template) -> Result<(), RegistryError> {
        let records = self.read();
        let record = records
            .get(key)
            .ok_or_else(|| RegistryError::KeyNotFound(key.to_string()))?;
        record
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .add_template(template);
        Ok(())
    }

    pub fn rename(&self, key: &K, display_name: impl Into<String>) -> Result<(), RegistryError> {
        let records = self.read();
        let record = records
            .get(key)
            .ok_or_else(|| RegistryError::KeyNotFound(key.to_string()))?;
        record
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .set_display_name(display_name);
        Ok(())
    }

    /// Moves every template of `from` onto the end of `into`, then removes
    /// `from`. `into` survives.
    pub fn merge(&self, into: &K, from: &K) -> Result<(), RegistryError> {
        if into == from {
            return Err(RegistryError::SelfMerge(into.to_string()));
        }
        let mut records = self.write();
        if !records.contains_key(into) {
            return Err(RegistryError::KeyNotFound(into.to_string()));
        }
        let absorbed = records
            .remove(from)
            .ok_or_else(|| RegistryError::KeyNotFound(from.to_string()))?
            .into_inner()
            .unwrap_or_else(|e| e.into_inner());
        let moved = absorbed.len();
        self.retired_mut().insert(from.clone());
        if let Some(survivor) = records.get_mut(into) {
            survivor
                .get_mut()
                .unwrap_or_else(|e| e.into_inner())
                .merge_from(absorbed);
        }
        log::debug!("Merged identity {from} into {into} ({moved} templates)");
        Ok(())
    }

    pub fn remove(&self, key: &K) -> bool {
        let mut records = self.write();
        let removed = records.remove(key).is_some();
        if removed {
            self.retired_mut().insert(key.clone());
            log::debug!("Removed identity {key}");
        }
        removed
    }

    /// Keys removed or merged away and not enrolled since.
    pub fn retired_keys(&self) -> Vec<K> {
        let _records = self.read();
        self.retired_mut().iter().cloned().collect()
    }

    /// Snapshot of the current keys, in map iteration order.
    pub fn keys(&self) -> Vec<K> {
        self.read().keys().cloned().collect()
    }

    pub fn contains(&self, key: &K) -> bool {
        self.read().contains_key(key)
    }

    pub fn get(&self, key: &K) -> Option<IdentityRecord> {
        self.read()
            .get(key)
            .map(|r| r.read().unwrap_or_else(|e| e.into_inner()).clone())
    }

    /// Copy of every record, taken under one shared lock so the key set is
    /// consistent and each record is copied whole.
    pub fn snapshot(&self) -> Vec<(K, IdentityRecord)> {
        self.read()
            .iter()
            .map(|(k, r)| (k.clone(), r.read().unwrap_or_else(|e| e.into_inner()).clone()))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    pub fn template_count(&self) -> usize {
        self.read()
            .values()
            .map(|r| r.read().unwrap_or_else(|e| e.into_inner()).len())
            .sum()
    }

    /// Identity whose closest template is most similar to `query`.
    pub fn best_match(&self, query: &Template) -> MatchResult<K> {
        let never = AtomicBool::new(false);
        self.scan(query, &never)
    }

    /// Like [`Registry::best_match`], but stops comparing once `cancelled`
    /// is set and reports [`RegistryError::Cancelled`] instead of a partial
    /// result.
    pub fn best_match_cancellable(
        &self,
        query: &Template,
        cancelled: &AtomicBool,
    ) -> Result<MatchResult<K>, RegistryError> {
        let result = self.scan(query, cancelled);
        if cancelled.load(Ordering::Relaxed) {
            return Err(RegistryError::Cancelled);
        }
        Ok(result)
    }

    /// `best_match` gated by a minimum confidence.
    pub fn identify(&self, query: &Template, threshold: f64) -> MatchResult<K> {
        self.best_match(query).at_least(threshold)
    }

    fn scan(&self, query: &Template, cancelled: &AtomicBool) -> MatchResult<K> {
        match &self.pool {
            Some(pool) => pool.install(|| self.scan_parallel(query, cancelled)),
            None => self.scan_parallel(query, cancelled),
        }
    }

    fn scan_parallel(&self, query: &Template, cancelled: &AtomicBool) -> MatchResult<K> {
        let records = self.read();
        let comparator = self.comparator.as_ref();

        let best = records
            .par_iter()
            .filter_map(|(key, record)| {
                if cancelled.load(Ordering::Relaxed) {
                    return None;
                }
                let record = record.read().unwrap_or_else(|e| e.into_inner());
                Some((key, record.similarity(comparator, query)))
            })
            .reduce_with(|a, b| if b.1 > a.1 { b } else { a });

        match best {
            Some((key, confidence)) => MatchResult::new(key.clone(), confidence),
            None => MatchResult::no_match(),
        }
    }
}
