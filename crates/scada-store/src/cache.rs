//! Per-day minute/hour snapshot table cache with LRU + time-based eviction
//! (spec §4.2, component B).

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Instant, SystemTime};

use chrono::NaiveDate;
use parking_lot::{Mutex, RwLock};

use crate::codec;
use crate::error::Result;
use crate::snapshot::SnapshotTable;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TableKind {
    Minute,
    Hour,
}

impl TableKind {
    fn capacity(&self) -> usize {
        match self {
            Self::Minute => 5,
            Self::Hour => 10,
        }
    }

    fn file_prefix(&self) -> char {
        match self {
            Self::Minute => 'm',
            Self::Hour => 'h',
        }
    }
}

/// Storage period: entries unused for this long are dropped on sweep (spec §4.2).
pub const STORAGE_PERIOD_SECS: u64 = 10 * 60;

pub fn archive_file_name(kind: TableKind, date: NaiveDate) -> String {
    format!(
        "{}{:02}{:02}{:02}.dat",
        kind.file_prefix(),
        date.format("%y"),
        date.format("%m"),
        date.format("%d")
    )
}

/// One day's cached table plus the bookkeeping needed to decide whether a
/// re-read is necessary (spec §4.2's `fill` contract).
pub struct CacheEntry {
    pub date: NaiveDate,
    pub path: PathBuf,
    pub table: SnapshotTable,
    pub last_access: Instant,
    last_read_mtime: Option<SystemTime>,
    loaded: bool,
}

impl CacheEntry {
    fn new(date: NaiveDate, path: PathBuf) -> Self {
        Self {
            date,
            path,
            table: SnapshotTable::new(),
            last_access: Instant::now(),
            last_read_mtime: None,
            loaded: false,
        }
    }

    pub fn touch(&mut self) {
        self.last_access = Instant::now();
    }
}

/// `fill(entry)`: re-read the file iff its mtime changed since last read, or
/// it has never been loaded. No-op otherwise — this is what makes repeated
/// `fill` calls with an unchanged file free (spec §8's cache-fill law).
pub fn fill(entry: &mut CacheEntry) -> Result<()> {
    let mtime = std::fs::metadata(&entry.path).ok().and_then(|m| m.modified().ok());
    if entry.loaded && mtime == entry.last_read_mtime {
        return Ok(());
    }
    entry.table = codec::load_table(&entry.path)?;
    entry.last_read_mtime = mtime;
    entry.loaded = true;
    Ok(())
}

pub struct SnapshotCache {
    kind: TableKind,
    dir: PathBuf,
    entries: RwLock<HashMap<NaiveDate, Arc<Mutex<CacheEntry>>>>,
}

impl SnapshotCache {
    pub fn new(kind: TableKind, dir: impl Into<PathBuf>) -> Self {
        Self { kind, dir: dir.into(), entries: RwLock::new(HashMap::new()) }
    }

    fn path_for(&self, date: NaiveDate) -> PathBuf {
        self.dir.join(archive_file_name(self.kind, date))
    }

    /// On miss, build an empty entry with its file path and return it without
    /// reading the file — the caller decides whether to `fill()` it (spec §4.2).
    pub fn get_or_load(&self, date: NaiveDate) -> Arc<Mutex<CacheEntry>> {
        if let Some(entry) = self.entries.read().get(&date) {
            entry.lock().touch();
            return entry.clone();
        }
        let mut entries = self.entries.write();
        let entry = entries
            .entry(date)
            .or_insert_with(|| Arc::new(Mutex::new(CacheEntry::new(date, self.path_for(date)))))
            .clone();
        entry.lock().touch();
        entry
    }

    /// Eviction sweep: run at least once per minute. Drops entries older than
    /// the storage period, then (if still above capacity) drops the
    /// least-recently-accessed entries — `today` is never evicted.
    pub fn sweep(&self, today: NaiveDate) {
        let mut entries = self.entries.write();
        let storage_period = std::time::Duration::from_secs(STORAGE_PERIOD_SECS);
        let now = Instant::now();
        entries.retain(|date, entry| {
            *date == today || now.duration_since(entry.lock().last_access) < storage_period
        });

        let capacity = self.kind.capacity();
        if entries.len() > capacity {
            let mut by_access: Vec<(NaiveDate, Instant)> = entries
                .iter()
                .filter(|(date, _)| **date != today)
                .map(|(date, entry)| (*date, entry.lock().last_access))
                .collect();
            by_access.sort_by_key(|(_, t)| *t);
            let overflow = entries.len().saturating_sub(capacity);
            for (date, _) in by_access.into_iter().take(overflow) {
                entries.remove(&date);
            }
        }
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }
}

pub fn current_snapshot_path(dir: &Path) -> PathBuf {
    dir.join("cur.dat")
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use tempfile::TempDir;

    #[test]
    fn get_or_load_does_not_touch_filesystem() {
        let dir = TempDir::new().unwrap();
        let cache = SnapshotCache::new(TableKind::Minute, dir.path());
        let date = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        let entry = cache.get_or_load(date);
        assert!(!entry.lock().loaded);
    }

    #[test]
    fn fill_is_idempotent_with_unchanged_mtime() {
        let dir = TempDir::new().unwrap();
        let date = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        let path = dir.path().join(archive_file_name(TableKind::Minute, date));
        let table = SnapshotTable::new();
        codec::save_table(&path, &table).unwrap();

        let cache = SnapshotCache::new(TableKind::Minute, dir.path());
        let entry = cache.get_or_load(date);
        fill(&mut entry.lock()).unwrap();
        let mtime_after_first = entry.lock().last_read_mtime;
        fill(&mut entry.lock()).unwrap();
        assert_eq!(entry.lock().last_read_mtime, mtime_after_first);
    }

    #[test]
    fn today_is_never_evicted() {
        let dir = TempDir::new().unwrap();
        let cache = SnapshotCache::new(TableKind::Minute, dir.path());
        let today = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        cache.get_or_load(today);
        cache.sweep(today);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn sweep_respects_capacity() {
        let dir = TempDir::new().unwrap();
        let cache = SnapshotCache::new(TableKind::Minute, dir.path());
        let today = NaiveDate::from_ymd_opt(2024, 1, 10).unwrap();
        for day in 1..=8 {
            let date = NaiveDate::from_ymd_opt(2024, 1, day).unwrap();
            cache.get_or_load(date);
        }
        cache.get_or_load(today);
        cache.sweep(today);
        assert!(cache.len() <= 5);
    }
}
