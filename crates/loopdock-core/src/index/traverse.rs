//! Concurrent filesystem traversal for ISO discovery
//!
//! Each root is walked on its own thread; an admission counter caps how
//! many walks run at once (2× the worker count by default) so a long list
//! of roots cannot oversubscribe the machine. Discovered paths buffer
//! locally and flush to the shared accumulator in batches, which keeps
//! lock traffic proportional to finds rather than to files examined.
//!
//! Error handling is deliberately soft: a failure on one entry is recorded
//! and the walk continues; an unreadable root aborts only that root's walk.

use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Condvar, Mutex};
use std::thread;
use walkdir::WalkDir;

/// Finds are flushed to the shared accumulator in batches of this size.
const FLUSH_BATCH: usize = 100;

#[derive(Debug, Clone)]
pub struct TraverseOptions {
    /// Recursion depth; 0 scans only entries directly under a root,
    /// -1 means unbounded.
    pub max_depth: i32,
    /// Cap on concurrently walking roots.
    pub max_walks: usize,
}

impl Default for TraverseOptions {
    fn default() -> Self {
        Self {
            max_depth: -1,
            max_walks: crate::pool::detected_parallelism() * 2,
        }
    }
}

/// Result of walking a set of roots.
#[derive(Debug, Default)]
pub struct ScanOutcome {
    /// ISO image paths discovered (absolute; may repeat across runs,
    /// deduplication happens at save time)
    pub found: Vec<PathBuf>,
    /// Descriptive per-entry and per-root error strings
    pub errors: BTreeSet<String>,
    /// Regular files examined, for progress display
    pub files_seen: usize,
}

/// Walk `roots` concurrently, collecting every regular file whose extension
/// case-insensitively equals "iso".
///
/// Roots are canonicalized first (entries must be absolute paths) and roots
/// nested inside another requested root are skipped rather than walked
/// twice.
pub fn traverse_roots(roots: &[PathBuf], options: &TraverseOptions) -> ScanOutcome {
    let mut initial_errors = BTreeSet::new();
    let prepared = prepare_roots(roots, &mut initial_errors);

    let found = Mutex::new(Vec::new());
    let errors = Mutex::new(initial_errors);
    let files_seen = AtomicUsize::new(0);
    let gate = (Mutex::new(0usize), Condvar::new());
    let max_walks = options.max_walks.max(1);
    let max_depth = options.max_depth;

    thread::scope(|scope| {
        for root in &prepared {
            let mut active = gate.0.lock().unwrap();
            while *active >= max_walks {
                active = gate.1.wait(active).unwrap();
            }
            *active += 1;
            drop(active);

            let found = &found;
            let errors = &errors;
            let files_seen = &files_seen;
            let gate = &gate;
            scope.spawn(move || {
                walk_root(root, max_depth, found, errors, files_seen);
                *gate.0.lock().unwrap() -= 1;
                gate.1.notify_one();
            });
        }
    });

    let outcome = ScanOutcome {
        found: found.into_inner().unwrap(),
        errors: errors.into_inner().unwrap(),
        files_seen: files_seen.into_inner(),
    };
    log::info!(
        "traversal finished: {} ISO images across {} files ({} errors)",
        outcome.found.len(),
        outcome.files_seen,
        outcome.errors.len()
    );
    outcome
}

/// Canonicalize the requested roots and drop any root nested inside
/// another, so no subtree is walked twice.
fn prepare_roots(roots: &[PathBuf], errors: &mut BTreeSet<String>) -> Vec<PathBuf> {
    let mut canonical = Vec::new();
    for root in roots {
        match fs::canonicalize(root) {
            Ok(path) if path.is_dir() => canonical.push(path),
            Ok(path) => {
                errors.insert(format!("not a directory: {}", path.display()));
            }
            Err(e) => {
                errors.insert(format!("cannot traverse {}: {e}", root.display()));
            }
        }
    }

    canonical.sort_by_key(|path| path.as_os_str().len());
    let mut kept: Vec<PathBuf> = Vec::new();
    for path in canonical {
        if !kept.iter().any(|prefix| path.starts_with(prefix)) {
            kept.push(path);
        }
    }
    kept
}

fn walk_root(
    root: &Path,
    max_depth: i32,
    found: &Mutex<Vec<PathBuf>>,
    errors: &Mutex<BTreeSet<String>>,
    files_seen: &AtomicUsize,
) {
    let mut walker = WalkDir::new(root);
    if max_depth >= 0 {
        // walkdir counts the root itself as depth 0; depth 0 here selects
        // entries directly under the root.
        walker = walker.max_depth(max_depth as usize + 1);
    }

    let mut local = Vec::new();
    let mut local_errors = Vec::new();
    for entry in walker {
        let entry = match entry {
            Ok(entry) => entry,
            Err(err) => {
                if err.depth() == 0 {
                    // The root itself is unreadable; abandon this walk only.
                    local_errors.push(format!("cannot traverse {}: {err}", root.display()));
                    break;
                }
                let at = err
                    .path()
                    .map(|p| p.display().to_string())
                    .unwrap_or_else(|| root.display().to_string());
                local_errors.push(format!("error processing {at}: {err}"));
                continue;
            }
        };

        if !entry.file_type().is_file() {
            continue;
        }
        files_seen.fetch_add(1, Ordering::Relaxed);

        if entry
            .path()
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("iso"))
        {
            local.push(entry.into_path());
            if local.len() >= FLUSH_BATCH {
                found.lock().unwrap().append(&mut local);
            }
        }
    }

    if !local.is_empty() {
        found.lock().unwrap().append(&mut local);
    }
    if !local_errors.is_empty() {
        errors.lock().unwrap().extend(local_errors);
    }
}
