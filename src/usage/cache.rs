//! Incremental event store and short-lived result caches

use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant, SystemTime};

use log::{debug, warn};

use crate::usage::catalog::{discover_filtered, FileFilter};
use crate::usage::error::Result;
use crate::usage::models::{FileRecord, UsageEvent, UsageSession, UsageStats};
use crate::usage::pricing::PricingCalculator;
use crate::usage::reader::parse_file;

/// Cached data for a single file
#[derive(Debug, Clone)]
struct FileCacheEntry {
    /// File modification time when cached
    mtime: SystemTime,
    /// Parsed entries from this file
    entries: Vec<UsageEvent>,
}

#[derive(Debug, Default)]
struct StoreState {
    /// Cached data per file path
    file_cache: BTreeMap<PathBuf, FileCacheEntry>,
    /// All cached events, sorted by timestamp
    events: Arc<Vec<UsageEvent>>,
    /// Last refresh time
    last_refresh: Option<Instant>,
}

/// Result of checking file changes
#[derive(Debug, Default)]
pub struct FileChanges {
    /// Files whose modification time advanced
    pub modified: Vec<FileRecord>,
    /// New files not in cache
    pub new_files: Vec<FileRecord>,
    /// Cached files no longer discovered
    pub deleted: Vec<PathBuf>,
}

impl FileChanges {
    pub fn is_empty(&self) -> bool {
        self.modified.is_empty() && self.new_files.is_empty() && self.deleted.is_empty()
    }
}

/// Outcome of one refresh
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RefreshSummary {
    pub reloaded: usize,
    pub removed: usize,
    pub failed: usize,
}

impl RefreshSummary {
    pub fn has_changes(&self) -> bool {
        self.reloaded > 0 || self.removed > 0
    }
}

impl StoreState {
    /// Detect file changes compared to cache
    fn check_file_changes(&self, current_files: Vec<FileRecord>) -> FileChanges {
        let mut changes = FileChanges::default();
        let current_set: HashSet<PathBuf> = current_files.iter().map(|r| r.path.clone()).collect();

        for record in current_files {
            match self.file_cache.get(&record.path) {
                Some(cached) if record.modified > cached.mtime => changes.modified.push(record),
                Some(_) => {}
                None => changes.new_files.push(record),
            }
        }

        changes.deleted = self
            .file_cache
            .keys()
            .filter(|path| !current_set.contains(*path))
            .cloned()
            .collect();

        changes
    }

    /// Rebuild the sorted event list from the per-file cache
    fn rebuild_events(&mut self) {
        let mut events: Vec<UsageEvent> = self
            .file_cache
            .values()
            .flat_map(|entry| entry.entries.iter().cloned())
            .collect();
        // Stable sort over path-ordered files keeps ties consistent
        events.sort_by_key(|e| e.timestamp);
        self.events = Arc::new(events);
    }
}

/// Incremental cache of usage events for one data root
///
/// Files are re-parsed only when their modification time has moved forward
/// since they were last loaded. All access goes through an internal lock, so
/// concurrent refreshes queue instead of loading the same file twice.
#[derive(Debug)]
pub struct UsageStore {
    root: PathBuf,
    filter: FileFilter,
    pricing: PricingCalculator,
    state: Mutex<StoreState>,
}

impl UsageStore {
    /// Create a store over `<root>/projects` restricted to files accepted by `filter`
    pub fn new(root: impl Into<PathBuf>, filter: FileFilter, pricing: PricingCalculator) -> Self {
        Self {
            root: root.into(),
            filter,
            pricing,
            state: Mutex::new(StoreState::default()),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Lock the state, discarding it if a previous holder panicked
    ///
    /// A panic mid-refresh can leave the per-file map and the event list out
    /// of step, so a poisoned store starts over from empty.
    fn lock_state(&self) -> MutexGuard<'_, StoreState> {
        self.state.lock().unwrap_or_else(|poisoned| {
            warn!("Usage store for {:?} was poisoned, resetting", self.root);
            let mut state = poisoned.into_inner();
            *state = StoreState::default();
            self.state.clear_poison();
            state
        })
    }

    /// Clear all cached data
    pub fn clear_cache(&self) -> Result<()> {
        let mut state = self.lock_state();
        *state = StoreState::default();
        Ok(())
    }

    /// Check if cache is empty (first load)
    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.lock_state().file_cache.is_empty())
    }

    /// Number of files currently cached
    pub fn file_count(&self) -> Result<usize> {
        Ok(self.lock_state().file_cache.len())
    }

    /// Time since the last refresh
    pub fn since_last_refresh(&self) -> Result<Option<Duration>> {
        Ok(self.lock_state().last_refresh.map(|t| t.elapsed()))
    }

    /// Check if there are any file changes without processing
    pub fn has_changes(&self) -> Result<bool> {
        let state = self.lock_state();
        if state.file_cache.is_empty() {
            return Ok(true);
        }
        let current = discover_filtered(&self.root, &self.filter);
        Ok(!state.check_file_changes(current).is_empty())
    }

    /// Reload files whose modification time advanced and drop vanished ones
    pub fn refresh(&self) -> Result<RefreshSummary> {
        let mut state = self.lock_state();
        let current = discover_filtered(&self.root, &self.filter);
        let changes = state.check_file_changes(current);
        let mut summary = RefreshSummary::default();

        for deleted in &changes.deleted {
            state.file_cache.remove(deleted);
            summary.removed += 1;
        }

        for record in changes.modified.iter().chain(changes.new_files.iter()) {
            let mut dedup = HashSet::new();
            match parse_file(&record.path, &record.project_name, &mut dedup, &self.pricing) {
                Ok(entries) => {
                    state.file_cache.insert(
                        record.path.clone(),
                        FileCacheEntry {
                            mtime: record.modified,
                            entries,
                        },
                    );
                    summary.reloaded += 1;
                }
                Err(e) => {
                    warn!("Failed to read file {:?}: {}", record.path, e);
                    summary.failed += 1;
                }
            }
        }

        if summary.has_changes() {
            state.rebuild_events();
        }
        state.last_refresh = Some(Instant::now());

        debug!(
            "Refreshed {:?}: {} reloaded, {} removed, {} failed, {} events",
            self.root,
            summary.reloaded,
            summary.removed,
            summary.failed,
            state.events.len()
        );

        Ok(summary)
    }

    /// Refresh, then return the sorted event snapshot
    pub fn events(&self) -> Result<Arc<Vec<UsageEvent>>> {
        self.refresh()?;
        self.snapshot()
    }

    /// Current event snapshot without touching the file system
    pub fn snapshot(&self) -> Result<Arc<Vec<UsageEvent>>> {
        Ok(Arc::clone(&self.lock_state().events))
    }
}

/// A cached value and when it was computed
#[derive(Debug, Clone)]
pub struct CacheEntry<T> {
    pub value: T,
    pub computed_at: Instant,
}

impl<T> CacheEntry<T> {
    pub fn is_fresh(&self, now: Instant, ttl: Duration) -> bool {
        now.saturating_duration_since(self.computed_at) < ttl
    }
}

/// Memoizes one computed value for a short time
///
/// The lock is held while computing, so a burst of callers runs the
/// computation once and the rest read the fresh value.
#[derive(Debug)]
pub struct TtlCache<T> {
    ttl: Duration,
    entry: Mutex<Option<CacheEntry<T>>>,
}

/// Windowed sessions, memoized
pub type SessionCache = TtlCache<Arc<Vec<UsageSession>>>;

/// Aggregated statistics, memoized
pub type StatsCache = TtlCache<Arc<UsageStats>>;

impl<T: Clone> TtlCache<T> {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entry: Mutex::new(None),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Lock the entry, dropping any value left by a panicked computation
    fn lock_entry(&self) -> MutexGuard<'_, Option<CacheEntry<T>>> {
        self.entry.lock().unwrap_or_else(|poisoned| {
            let mut entry = poisoned.into_inner();
            *entry = None;
            self.entry.clear_poison();
            entry
        })
    }

    /// Return the cached value if still fresh, otherwise compute and cache it
    pub fn get_or_compute<F>(&self, compute: F) -> Result<T>
    where
        F: FnOnce() -> Result<T>,
    {
        self.get_or_compute_at(Instant::now(), compute)
    }

    /// As `get_or_compute`, judging freshness at `now`
    pub fn get_or_compute_at<F>(&self, now: Instant, compute: F) -> Result<T>
    where
        F: FnOnce() -> Result<T>,
    {
        let mut entry = self.lock_entry();
        if let Some(cached) = entry.as_ref().filter(|e| e.is_fresh(now, self.ttl)) {
            return Ok(cached.value.clone());
        }

        let value = compute()?;
        *entry = Some(CacheEntry {
            value: value.clone(),
            computed_at: now,
        });
        Ok(value)
    }

    /// The cached value, if still fresh
    pub fn cached(&self) -> Result<Option<T>> {
        let now = Instant::now();
        Ok(self
            .lock_entry()
            .as_ref()
            .filter(|e| e.is_fresh(now, self.ttl))
            .map(|e| e.value.clone()))
    }

    /// Drop the cached value so the next access recomputes
    pub fn invalidate(&self) -> Result<()> {
        *self.lock_entry() = None;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::{self, File, OpenOptions};
    use std::io::Write;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    fn line(message_id: &str, timestamp: &str, input: u64) -> String {
        format!(
            r#"{{"type":"assistant","timestamp":"{}","requestId":"req-{}","message":{{"id":"{}","model":"claude-sonnet-4","usage":{{"input_tokens":{},"output_tokens":1}}}}}}"#,
            timestamp, message_id, message_id, input
        )
    }

    fn write_file(path: &Path, lines: &[String], mtime: SystemTime) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        let mut file = File::create(path).unwrap();
        for l in lines {
            writeln!(file, "{}", l).unwrap();
        }
        file.set_modified(mtime).unwrap();
    }

    fn set_mtime(path: &Path, mtime: SystemTime) {
        let file = OpenOptions::new().write(true).open(path).unwrap();
        file.set_modified(mtime).unwrap();
    }

    fn store(root: &Path) -> UsageStore {
        UsageStore::new(root, FileFilter::all(), PricingCalculator::new())
    }

    #[test]
    fn test_missing_root_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(&dir.path().join("missing"));
        assert!(store.events().unwrap().is_empty());
        assert!(store.is_empty().unwrap());
    }

    #[test]
    fn test_events_sorted_across_files() {
        let dir = tempfile::tempdir().unwrap();
        let t = SystemTime::now() - Duration::from_secs(60);
        write_file(
            &dir.path().join("projects/-a-alpha/one.jsonl"),
            &[line("m2", "2025-03-01T12:00:00.000Z", 10)],
            t,
        );
        write_file(
            &dir.path().join("projects/-a-beta/two.jsonl"),
            &[
                line("m1", "2025-03-01T11:00:00.000Z", 10),
                line("m3", "2025-03-01T13:00:00.000Z", 10),
            ],
            t,
        );

        let events = store(dir.path()).events().unwrap();
        let ids: Vec<_> = events.iter().map(|e| e.message_id.as_deref().unwrap()).collect();
        assert_eq!(ids, vec!["m1", "m2", "m3"]);
        assert_eq!(events[1].project, "alpha");
    }

    #[test]
    fn test_unchanged_reload_does_not_duplicate() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("projects/-x-proj/s.jsonl");
        write_file(&path, &[line("m1", "2025-03-01T10:00:00.000Z", 10)], SystemTime::now());

        let store = store(dir.path());
        let first = store.refresh().unwrap();
        assert_eq!(first.reloaded, 1);
        let second = store.refresh().unwrap();
        assert_eq!(second, RefreshSummary::default());
        assert_eq!(store.events().unwrap().len(), 1);
        assert!(!store.has_changes().unwrap());
    }

    #[test]
    fn test_modified_file_replaces_its_events() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("projects/-x-proj/s.jsonl");
        let t0 = SystemTime::now() - Duration::from_secs(3600);
        write_file(&path, &[line("m1", "2025-03-01T10:00:00.000Z", 10)], t0);

        let store = store(dir.path());
        assert_eq!(store.events().unwrap().len(), 1);

        write_file(
            &path,
            &[
                line("m1", "2025-03-01T10:00:00.000Z", 10),
                line("m2", "2025-03-01T10:05:00.000Z", 20),
            ],
            t0 + Duration::from_secs(10),
        );
        assert!(store.has_changes().unwrap());
        let events = store.events().unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[1].tokens.input_tokens, 20);
    }

    #[test]
    fn test_older_mtime_is_not_reloaded() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("projects/-x-proj/s.jsonl");
        let t0 = SystemTime::now() - Duration::from_secs(3600);
        write_file(&path, &[line("m1", "2025-03-01T10:00:00.000Z", 10)], t0);

        let store = store(dir.path());
        store.refresh().unwrap();
        set_mtime(&path, t0 - Duration::from_secs(10));
        assert_eq!(store.refresh().unwrap().reloaded, 0);
    }

    #[test]
    fn test_deleted_file_is_dropped() {
        let dir = tempfile::tempdir().unwrap();
        let keep = dir.path().join("projects/-x-proj/keep.jsonl");
        let gone = dir.path().join("projects/-x-proj/gone.jsonl");
        write_file(&keep, &[line("m1", "2025-03-01T10:00:00.000Z", 10)], SystemTime::now());
        write_file(&gone, &[line("m2", "2025-03-01T11:00:00.000Z", 10)], SystemTime::now());

        let store = store(dir.path());
        assert_eq!(store.events().unwrap().len(), 2);
        fs::remove_file(&gone).unwrap();
        let summary = store.refresh().unwrap();
        assert_eq!(summary.removed, 1);
        assert_eq!(store.snapshot().unwrap().len(), 1);
    }

    #[test]
    fn test_clear_cache_resets_store() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("projects/-x-proj/s.jsonl");
        write_file(&path, &[line("m1", "2025-03-01T10:00:00.000Z", 10)], SystemTime::now());

        let store = store(dir.path());
        store.refresh().unwrap();
        assert_eq!(store.file_count().unwrap(), 1);

        store.clear_cache().unwrap();
        assert!(store.is_empty().unwrap());
        assert!(store.snapshot().unwrap().is_empty());
        assert!(store.since_last_refresh().unwrap().is_none());

        assert_eq!(store.refresh().unwrap().reloaded, 1);
        assert_eq!(store.snapshot().unwrap().len(), 1);
    }

    #[test]
    fn test_filter_limits_store() {
        let dir = tempfile::tempdir().unwrap();
        let old = SystemTime::now() - Duration::from_secs(48 * 3600);
        write_file(
            &dir.path().join("projects/-x-proj/old.jsonl"),
            &[line("m1", "2025-03-01T10:00:00.000Z", 10)],
            old,
        );
        write_file(
            &dir.path().join("projects/-x-proj/new.jsonl"),
            &[line("m2", "2025-03-03T10:00:00.000Z", 10)],
            SystemTime::now(),
        );

        let recent = UsageStore::new(
            dir.path(),
            FileFilter::modified_within(10.0),
            PricingCalculator::new(),
        );
        let events = recent.events().unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].message_id.as_deref(), Some("m2"));
    }

    #[test]
    fn test_overflowing_line_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let huge = format!(
            r#"{{"type":"assistant","timestamp":"2025-03-01T09:00:00.000Z","requestId":"req-big","message":{{"id":"big","model":"claude-sonnet-4","usage":{{"input_tokens":{},"output_tokens":1}}}}}}"#,
            u64::MAX
        );
        write_file(
            &dir.path().join("projects/-x-proj/s.jsonl"),
            &[huge, line("m1", "2025-03-01T10:00:00.000Z", 10)],
            SystemTime::now(),
        );
        write_file(
            &dir.path().join("projects/-x-proj/t.jsonl"),
            &[line("m2", "2025-03-01T11:00:00.000Z", 10)],
            SystemTime::now(),
        );

        let store = store(dir.path());
        let summary = store.refresh().unwrap();
        assert_eq!(summary.reloaded, 2);
        assert_eq!(summary.failed, 0);
        let ids: Vec<_> = store
            .snapshot()
            .unwrap()
            .iter()
            .map(|e| e.message_id.clone().unwrap())
            .collect();
        assert_eq!(ids, vec!["m1", "m2"]);
    }

    #[test]
    fn test_poisoned_store_recovers() {
        let dir = tempfile::tempdir().unwrap();
        write_file(
            &dir.path().join("projects/-x-proj/s.jsonl"),
            &[line("m1", "2025-03-01T10:00:00.000Z", 10)],
            SystemTime::now(),
        );
        let store = store(dir.path());
        store.refresh().unwrap();

        let panicked = std::thread::scope(|scope| {
            scope
                .spawn(|| {
                    let _state = store.state.lock().unwrap();
                    panic!("refresh interrupted");
                })
                .join()
                .is_err()
        });
        assert!(panicked);
        assert!(store.state.is_poisoned());

        assert!(store.snapshot().unwrap().is_empty());
        assert_eq!(store.events().unwrap().len(), 1);
        store.clear_cache().unwrap();
        assert!(!store.state.is_poisoned());
    }

    #[test]
    fn test_unreadable_file_is_skipped_and_keeps_previous_state() {
        let dir = tempfile::tempdir().unwrap();
        let good = dir.path().join("projects/-x-proj/good.jsonl");
        let flaky = dir.path().join("projects/-x-proj/flaky.jsonl");
        let t0 = SystemTime::now() - Duration::from_secs(3600);
        write_file(&good, &[line("m1", "2025-03-01T10:00:00.000Z", 10)], t0);
        write_file(&flaky, &[line("m2", "2025-03-01T11:00:00.000Z", 20)], t0);

        // Removes the flaky file after discovery, so the following read fails
        let sabotage = Arc::new(AtomicBool::new(false));
        let filter = {
            let sabotage = Arc::clone(&sabotage);
            let flaky = flaky.clone();
            FileFilter::new(move |record| {
                if sabotage.load(Ordering::SeqCst) && record.path == flaky {
                    let _ = fs::remove_file(&flaky);
                }
                true
            })
        };
        let store = UsageStore::new(dir.path(), filter, PricingCalculator::new());
        assert_eq!(store.events().unwrap().len(), 2);
        let loaded_mtime = store.lock_state().file_cache[&flaky].mtime;

        write_file(
            &good,
            &[
                line("m1", "2025-03-01T10:00:00.000Z", 10),
                line("m3", "2025-03-01T12:00:00.000Z", 30),
            ],
            t0 + Duration::from_secs(10),
        );
        set_mtime(&flaky, t0 + Duration::from_secs(10));
        sabotage.store(true, Ordering::SeqCst);

        let summary = store.refresh().unwrap();
        assert_eq!(summary.reloaded, 1);
        assert_eq!(summary.failed, 1);

        let ids: Vec<_> = store
            .snapshot()
            .unwrap()
            .iter()
            .map(|e| e.message_id.clone().unwrap())
            .collect();
        assert_eq!(ids, vec!["m1", "m2", "m3"]);
        assert_eq!(store.lock_state().file_cache[&flaky].mtime, loaded_mtime);

        // Once gone from discovery the file's events go too
        let summary = store.refresh().unwrap();
        assert_eq!(summary.removed, 1);
        assert_eq!(store.snapshot().unwrap().len(), 2);
    }

    #[test]
    fn test_ttl_cache_recovers_from_panicked_compute() {
        let cache: TtlCache<u32> = TtlCache::new(Duration::from_secs(60));
        let panicked = std::thread::scope(|scope| {
            scope
                .spawn(|| cache.get_or_compute(|| panic!("compute failed")))
                .join()
                .is_err()
        });
        assert!(panicked);
        assert_eq!(cache.cached().unwrap(), None);
        assert_eq!(cache.get_or_compute(|| Ok(7)).unwrap(), 7);
    }

    #[test]
    fn test_concurrent_refreshes_load_once() {
        let dir = tempfile::tempdir().unwrap();
        write_file(
            &dir.path().join("projects/-x-proj/s.jsonl"),
            &[line("m1", "2025-03-01T10:00:00.000Z", 10)],
            SystemTime::now(),
        );
        let store = Arc::new(store(dir.path()));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let store = Arc::clone(&store);
                std::thread::spawn(move || store.refresh().unwrap().reloaded)
            })
            .collect();
        let reloaded: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();
        assert_eq!(reloaded, 1);
        assert_eq!(store.snapshot().unwrap().len(), 1);
    }

    #[test]
    fn test_ttl_cache_returns_cached_value_within_ttl() {
        let cache = TtlCache::new(Duration::from_secs(2));
        let calls = AtomicUsize::new(0);
        let compute = || {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok(calls.load(Ordering::SeqCst))
        };

        let t0 = Instant::now();
        assert_eq!(cache.get_or_compute_at(t0, compute).unwrap(), 1);
        assert_eq!(cache.get_or_compute_at(t0 + Duration::from_millis(1500), compute).unwrap(), 1);
        assert_eq!(cache.get_or_compute_at(t0 + Duration::from_secs(2), compute).unwrap(), 2);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_ttl_cache_invalidate() {
        let cache: TtlCache<u32> = TtlCache::new(Duration::from_secs(60));
        assert_eq!(cache.get_or_compute(|| Ok(1)).unwrap(), 1);
        assert_eq!(cache.cached().unwrap(), Some(1));
        cache.invalidate().unwrap();
        assert_eq!(cache.cached().unwrap(), None);
        assert_eq!(cache.get_or_compute(|| Ok(2)).unwrap(), 2);
    }

    #[test]
    fn test_ttl_cache_does_not_store_errors() {
        let cache: TtlCache<u32> = TtlCache::new(Duration::from_secs(60));
        let failed = cache.get_or_compute(|| Err(crate::usage::error::UsageError::LockPoisoned("test")));
        assert!(failed.is_err());
        assert_eq!(cache.cached().unwrap(), None);
    }

    #[test]
    fn test_zero_ttl_always_recomputes() {
        let cache: TtlCache<u32> = TtlCache::new(Duration::ZERO);
        assert_eq!(cache.get_or_compute(|| Ok(1)).unwrap(), 1);
        assert_eq!(cache.get_or_compute(|| Ok(2)).unwrap(), 2);
    }
}
