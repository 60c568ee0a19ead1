//! Persistent ISO index
//!
//! The authoritative, cross-process-durable list of known ISO image paths.
//! The backing file is newline-delimited UTF-8 absolute paths, no header,
//! deduplicated, capped at a configured entry count. Readers take a shared
//! flock, writers an exclusive one; the file is rewritten in place under
//! the held lock, so concurrent processes never see a torn index.
//!
//! Entries are created by [`traverse_roots`], removed by [`IsoIndex::prune`]
//! when the underlying file has disappeared, and persisted by
//! [`IsoIndex::save`].

mod lock;
mod traverse;

pub use traverse::{traverse_roots, ScanOutcome, TraverseOptions};

use crate::config::{Config, EvictionOrder};
use crate::pool::ThreadPool;
use lock::FileLock;
use std::collections::BTreeSet;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Errors from index file operations
///
/// An index error aborts only the index operation at hand, never the
/// surrounding batch or process.
#[derive(Debug, Error)]
pub enum IndexError {
    #[error("cannot create index directory {}: {}", .0.display(), .1)]
    DirectoryCreate(PathBuf, #[source] io::Error),

    #[error("cannot open index file {}: {}", .0.display(), .1)]
    Open(PathBuf, #[source] io::Error),

    #[error("cannot lock index file {}: {}", .0.display(), .1)]
    Lock(PathBuf, #[source] io::Error),

    #[error("cannot read index file {}: {}", .0.display(), .1)]
    Read(PathBuf, #[source] io::Error),

    #[error("cannot write index file {}: {}", .0.display(), .1)]
    Write(PathBuf, #[source] io::Error),
}

pub type IndexResult<T> = Result<T, IndexError>;

/// Index statistics for display
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexStats {
    pub entries: usize,
    pub file_bytes: u64,
    pub max_entries: usize,
}

/// Handle to the on-disk ISO index
pub struct IsoIndex {
    file_path: PathBuf,
    max_entries: usize,
    eviction: EvictionOrder,
}

impl IsoIndex {
    pub fn new(file_path: PathBuf, max_entries: usize, eviction: EvictionOrder) -> Self {
        Self {
            file_path,
            max_entries,
            eviction,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(
            config.index.file.clone(),
            config.index.max_entries,
            config.index.eviction,
        )
    }

    pub fn file_path(&self) -> &Path {
        &self.file_path
    }

    /// Load the deduplicated entry set, tolerating a missing or unreadable
    /// file by returning an empty set.
    pub fn load(&self) -> BTreeSet<PathBuf> {
        match self.try_load() {
            Ok(entries) => entries,
            Err(e) => {
                log::warn!("failed to load ISO index: {e}");
                BTreeSet::new()
            }
        }
    }

    /// Load the entry set under a shared lock. A missing file is an empty
    /// index, not an error.
    pub fn try_load(&self) -> IndexResult<BTreeSet<PathBuf>> {
        if !self.file_path.exists() {
            return Ok(BTreeSet::new());
        }
        let file =
            File::open(&self.file_path).map_err(|e| IndexError::Open(self.file_path.clone(), e))?;
        let _lock =
            FileLock::shared(&file).map_err(|e| IndexError::Lock(self.file_path.clone(), e))?;
        read_entries(&file).map_err(|e| IndexError::Read(self.file_path.clone(), e))
    }

    /// Merge `new_paths` into the index under an exclusive lock, trimming
    /// the configured end of the ordered set while over capacity, and
    /// rewrite the file in place. Returns the resulting entry count.
    pub fn save(&self, new_paths: &[PathBuf]) -> IndexResult<usize> {
        let file = self.open_for_update()?;
        let _lock =
            FileLock::exclusive(&file).map_err(|e| IndexError::Lock(self.file_path.clone(), e))?;

        let mut entries =
            read_entries(&file).map_err(|e| IndexError::Read(self.file_path.clone(), e))?;
        entries.extend(new_paths.iter().cloned());

        let evicted = self.evict_over_cap(&mut entries);
        if evicted > 0 {
            log::info!(
                "ISO index over capacity, evicted {evicted} entries (cap {})",
                self.max_entries
            );
        }

        rewrite(&file, &entries).map_err(|e| IndexError::Write(self.file_path.clone(), e))?;
        Ok(entries.len())
    }

    /// Drop entries whose path no longer exists on disk.
    ///
    /// Existence checks run as pool tasks over batches of
    /// `max(total / workers, 2)` entries; the surviving set is rewritten
    /// under an exclusive lock. Returns the number of entries removed.
    pub fn prune(&self, pool: &ThreadPool) -> IndexResult<usize> {
        let entries: Vec<PathBuf> = self.try_load()?.into_iter().collect();
        if entries.is_empty() {
            return Ok(0);
        }

        let batch = (entries.len() / pool.worker_count()).max(2);
        let mut pending = Vec::new();
        for chunk in entries.chunks(batch) {
            let chunk = chunk.to_vec();
            let input = chunk.clone();
            let handle = pool.spawn(move || {
                input
                    .into_iter()
                    .filter(|path| path.exists())
                    .collect::<Vec<_>>()
            });
            pending.push((chunk, handle));
        }

        let mut survivors = BTreeSet::new();
        for (fallback, handle) in pending {
            match handle.join() {
                Ok(kept) => survivors.extend(kept),
                // A failed batch keeps its entries; pruning must never
                // drop paths it did not positively check.
                Err(e) => {
                    log::warn!("prune batch failed ({e}), keeping its entries");
                    survivors.extend(fallback);
                }
            }
        }

        let removed = entries.len() - survivors.len();
        if removed > 0 {
            let file = self.open_for_update()?;
            let _lock = FileLock::exclusive(&file)
                .map_err(|e| IndexError::Lock(self.file_path.clone(), e))?;
            rewrite(&file, &survivors)
                .map_err(|e| IndexError::Write(self.file_path.clone(), e))?;
            log::info!("pruned {removed} stale entries from the ISO index");
        }
        Ok(removed)
    }

    /// Entry count and on-disk size for display.
    pub fn stats(&self) -> IndexStats {
        let file_bytes = fs::metadata(&self.file_path).map(|m| m.len()).unwrap_or(0);
        IndexStats {
            entries: self.load().len(),
            file_bytes,
            max_entries: self.max_entries,
        }
    }

    /// Delete the backing file. A missing file is fine.
    pub fn clear(&self) -> IndexResult<()> {
        match fs::remove_file(&self.file_path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(IndexError::Write(self.file_path.clone(), e)),
        }
    }

    fn open_for_update(&self) -> IndexResult<File> {
        if let Some(dir) = self.file_path.parent() {
            fs::create_dir_all(dir).map_err(|e| IndexError::DirectoryCreate(dir.to_owned(), e))?;
        }
        OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(&self.file_path)
            .map_err(|e| IndexError::Open(self.file_path.clone(), e))
    }

    fn evict_over_cap(&self, entries: &mut BTreeSet<PathBuf>) -> usize {
        let mut evicted = 0;
        while entries.len() > self.max_entries {
            match self.eviction {
                EvictionOrder::SmallestFirst => entries.pop_first(),
                EvictionOrder::LargestFirst => entries.pop_last(),
            };
            evicted += 1;
        }
        evicted
    }
}

/// Read the index file into an ordered, deduplicated set of lines.
/// Reads through `&File` so the caller can keep its lock guard alive.
fn read_entries(mut file: &File) -> io::Result<BTreeSet<PathBuf>> {
    let mut text = String::new();
    file.read_to_string(&mut text)?;
    Ok(text
        .lines()
        .filter(|line| !line.trim().is_empty())
        .map(PathBuf::from)
        .collect())
}

/// Rewrite the file in place while the caller holds the exclusive lock:
/// seek to the start, write every entry, truncate the tail.
fn rewrite(mut file: &File, entries: &BTreeSet<PathBuf>) -> io::Result<()> {
    file.seek(SeekFrom::Start(0))?;
    let mut buffer = String::new();
    for path in entries {
        buffer.push_str(&path.to_string_lossy());
        buffer.push('\n');
    }
    file.write_all(buffer.as_bytes())?;
    let end = file.stream_position()?;
    file.set_len(end)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn index_in(dir: &TempDir) -> IsoIndex {
        IsoIndex::new(
            dir.path().join("index.txt"),
            100_000,
            EvictionOrder::SmallestFirst,
        )
    }

    #[test]
    fn load_of_missing_file_is_empty() {
        let dir = TempDir::new().unwrap();
        assert!(index_in(&dir).load().is_empty());
    }

    #[test]
    fn saving_the_same_path_twice_keeps_one_entry() {
        let dir = TempDir::new().unwrap();
        let index = index_in(&dir);

        let path = PathBuf::from("/data/game.iso");
        index.save(&[path.clone()]).unwrap();
        index.save(&[path.clone()]).unwrap();

        let entries = index.load();
        assert_eq!(entries.len(), 1);
        assert!(entries.contains(&path));
    }

    #[test]
    fn save_merges_with_existing_entries() {
        let dir = TempDir::new().unwrap();
        let index = index_in(&dir);

        index.save(&[PathBuf::from("/data/a.iso")]).unwrap();
        let total = index.save(&[PathBuf::from("/data/b.iso")]).unwrap();

        assert_eq!(total, 2);
        assert_eq!(index.load().len(), 2);
    }

    #[test]
    fn cap_is_enforced_exactly() {
        let dir = TempDir::new().unwrap();
        let index = IsoIndex::new(
            dir.path().join("index.txt"),
            5,
            EvictionOrder::SmallestFirst,
        );

        let paths: Vec<PathBuf> = (0..9)
            .map(|i| PathBuf::from(format!("/data/{i:02}.iso")))
            .collect();
        index.save(&paths).unwrap();

        let entries = index.load();
        assert_eq!(entries.len(), 5);
        // Smallest-first eviction trims the low end of the ordered set.
        assert!(!entries.contains(&PathBuf::from("/data/00.iso")));
        assert!(entries.contains(&PathBuf::from("/data/08.iso")));
    }

    #[test]
    fn largest_first_eviction_trims_the_high_end() {
        let dir = TempDir::new().unwrap();
        let index = IsoIndex::new(dir.path().join("index.txt"), 2, EvictionOrder::LargestFirst);

        index
            .save(&[
                PathBuf::from("/data/a.iso"),
                PathBuf::from("/data/b.iso"),
                PathBuf::from("/data/c.iso"),
            ])
            .unwrap();

        let entries = index.load();
        assert!(entries.contains(&PathBuf::from("/data/a.iso")));
        assert!(entries.contains(&PathBuf::from("/data/b.iso")));
        assert!(!entries.contains(&PathBuf::from("/data/c.iso")));
    }

    #[test]
    fn prune_removes_only_missing_paths() {
        let dir = TempDir::new().unwrap();
        let index = index_in(&dir);

        let alive = dir.path().join("a.iso");
        let dead = dir.path().join("b.iso");
        fs::write(&alive, b"x").unwrap();
        index.save(&[alive.clone(), dead.clone()]).unwrap();

        let pool = ThreadPool::new(2);
        let removed = index.prune(&pool).unwrap();

        assert_eq!(removed, 1);
        let entries = index.load();
        assert_eq!(entries.into_iter().collect::<Vec<_>>(), vec![alive]);
    }

    #[test]
    fn prune_of_empty_index_is_a_no_op() {
        let dir = TempDir::new().unwrap();
        let pool = ThreadPool::new(2);
        assert_eq!(index_in(&dir).prune(&pool).unwrap(), 0);
    }

    #[test]
    fn prune_self_heals_many_entries() {
        let dir = TempDir::new().unwrap();
        let index = index_in(&dir);

        let mut paths = Vec::new();
        for i in 0..20 {
            let path = dir.path().join(format!("{i}.iso"));
            if i % 4 != 0 {
                fs::write(&path, b"x").unwrap();
            }
            paths.push(path);
        }
        index.save(&paths).unwrap();

        let pool = ThreadPool::new(4);
        let removed = index.prune(&pool).unwrap();
        assert_eq!(removed, 5);
        assert_eq!(index.load().len(), 15);
    }

    #[test]
    fn clear_removes_the_backing_file() {
        let dir = TempDir::new().unwrap();
        let index = index_in(&dir);
        index.save(&[PathBuf::from("/data/a.iso")]).unwrap();

        index.clear().unwrap();
        assert!(!index.file_path().exists());
        // Clearing an already-missing file is not an error.
        index.clear().unwrap();
    }

    #[test]
    fn stats_reports_entry_count_and_size() {
        let dir = TempDir::new().unwrap();
        let index = index_in(&dir);
        index
            .save(&[PathBuf::from("/data/a.iso"), PathBuf::from("/data/b.iso")])
            .unwrap();

        let stats = index.stats();
        assert_eq!(stats.entries, 2);
        assert!(stats.file_bytes > 0);
        assert_eq!(stats.max_entries, 100_000);
    }
}
