//! Mount/unmount batch orchestration
//!
//! State machine per image:
//! `Unmounted --mount--> Mounted | Skipped | Failed`;
//! `Mounted --unmount--> Unmounted | Failed`.
//!
//! Per-item failures never abort a batch; every item is classified and the
//! batch always completes and reports.

use super::{
    mount_point_for, HostMounter, LinuxMounter, MountFailure, MountOutcomes, MountRecord,
    UnmountOutcomes,
};
use crate::batch::{chunk_size, ProgressReporter};
use crate::config::Config;
use crate::pool::ThreadPool;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::Ordering;
use std::sync::{Arc, Mutex};

/// Orchestrates bringing ISO images to the mounted state and back.
///
/// Cheap to clone: chunk tasks each carry a clone onto the pool.
#[derive(Clone)]
pub struct MountOrchestrator {
    host: Arc<dyn HostMounter>,
    mount_root: PathBuf,
    fs_types: Vec<String>,
}

impl MountOrchestrator {
    pub fn new(host: Arc<dyn HostMounter>, mount_root: PathBuf, fs_types: Vec<String>) -> Self {
        Self {
            host,
            mount_root,
            fs_types,
        }
    }

    /// Production orchestrator for the given configuration.
    pub fn from_config(config: &Config) -> Self {
        Self::new(
            Arc::new(LinuxMounter),
            config.mount.root.clone(),
            config.mount.fs_types.clone(),
        )
    }

    /// Deterministic mount point for an image under this orchestrator's root.
    pub fn mount_point_for(&self, iso_path: &Path) -> PathBuf {
        mount_point_for(iso_path, &self.mount_root)
    }

    /// Mount points currently live under this orchestrator's root:
    /// directories named `iso_*` that appear in the mount table.
    pub fn list_mounted(&self) -> Vec<PathBuf> {
        let entries = match fs::read_dir(&self.mount_root) {
            Ok(entries) => entries,
            Err(e) => {
                log::warn!("cannot read {}: {e}", self.mount_root.display());
                return Vec::new();
            }
        };

        let mut mounted: Vec<PathBuf> = entries
            .flatten()
            .map(|entry| entry.path())
            .filter(|path| {
                path.file_name()
                    .and_then(|name| name.to_str())
                    .is_some_and(|name| name.starts_with("iso_"))
            })
            .filter(|path| self.host.is_mounted(path))
            .collect();
        mounted.sort();
        mounted
    }

    /// Mount a single image, classifying the outcome into `out`.
    ///
    /// Mounting an already-mounted image is skipped, not an error; a failed
    /// mount removes the mount point directory it created.
    pub fn mount_one(&self, iso_path: &Path, out: &mut MountOutcomes) {
        let mount_point = self.mount_point_for(iso_path);

        if !self.host.has_privilege() {
            out.failed.push(MountFailure::Permission {
                path: iso_path.to_path_buf(),
            });
            return;
        }

        if self.host.is_mounted(&mount_point) {
            log::debug!(
                "{} already mounted at {}",
                iso_path.display(),
                mount_point.display()
            );
            out.skipped.push(iso_path.to_path_buf());
            return;
        }

        if let Err(e) = fs::create_dir_all(&mount_point) {
            out.failed.push(MountFailure::DirectoryCreate {
                path: iso_path.to_path_buf(),
                reason: e.to_string(),
            });
            return;
        }

        match self.host.mount_image(iso_path, &mount_point, &self.fs_types) {
            Ok(fs_type_used) => {
                log::info!(
                    "mounted {} at {} ({fs_type_used})",
                    iso_path.display(),
                    mount_point.display()
                );
                out.done.push(MountRecord {
                    iso_path: iso_path.to_path_buf(),
                    mount_point,
                    fs_type_used,
                });
            }
            Err(reason) => {
                // Don't leave an empty mount point behind.
                let _ = fs::remove_dir(&mount_point);
                out.failed.push(MountFailure::Mount {
                    path: iso_path.to_path_buf(),
                    reason,
                });
            }
        }
    }

    /// Mount a batch of images: one pool task per chunk, each mounting its
    /// chunk sequentially into a local accumulator that is merged into the
    /// shared sets when the chunk completes. A progress reporter runs
    /// alongside and is joined once every chunk handle has been awaited.
    pub fn mount_many(&self, pool: &ThreadPool, isos: &[PathBuf]) -> MountOutcomes {
        let shared = Arc::new(Mutex::new(MountOutcomes::default()));
        let reporter = ProgressReporter::start("mounting", isos.len());

        let mut handles = Vec::new();
        for chunk in isos.chunks(chunk_size(isos.len(), pool.worker_count())) {
            let worker = self.clone();
            let chunk = chunk.to_vec();
            let shared = Arc::clone(&shared);
            let counter = reporter.counter();
            handles.push(pool.spawn(move || {
                let mut local = MountOutcomes::default();
                for iso in &chunk {
                    worker.mount_one(iso, &mut local);
                    counter.fetch_add(1, Ordering::Relaxed);
                }
                shared.lock().unwrap().merge(local);
            }));
        }

        join_chunks(handles);
        reporter.finish();
        take_shared(&shared)
    }

    /// Unmount a batch of mount points, then remove each directory that is
    /// empty afterwards. Detach calls are lazy, so busy targets release
    /// once their users exit; a target whose directory stays non-empty is
    /// classified as failed and its directory is left alone.
    ///
    /// Unmount invocations are batched per chunk, since the platform
    /// utility accepts many targets per call. A nonexistent target is
    /// already in the desired state and lands in the skipped set.
    pub fn unmount_many(&self, pool: &ThreadPool, targets: &[PathBuf]) -> UnmountOutcomes {
        let shared = Arc::new(Mutex::new(UnmountOutcomes::default()));
        let reporter = ProgressReporter::start("unmounting", targets.len());

        let mut handles = Vec::new();
        for chunk in targets.chunks(chunk_size(targets.len(), pool.worker_count())) {
            let worker = self.clone();
            let chunk = chunk.to_vec();
            let shared = Arc::clone(&shared);
            let counter = reporter.counter();
            handles.push(pool.spawn(move || {
                let mut local = UnmountOutcomes::default();
                worker.unmount_chunk(&chunk, &mut local);
                counter.fetch_add(chunk.len(), Ordering::Relaxed);
                shared.lock().unwrap().merge(local);
            }));
        }

        join_chunks(handles);
        reporter.finish();
        take_shared(&shared)
    }

    /// One batched detach invocation for a chunk, then per-target
    /// classification.
    fn unmount_chunk(&self, targets: &[PathBuf], out: &mut UnmountOutcomes) {
        let mut live = Vec::new();
        for target in targets {
            if target.exists() {
                live.push(target.clone());
            } else {
                // Nothing mounted there and no directory left: already in
                // the desired state.
                out.skipped.push(target.clone());
            }
        }

        self.host.unmount_targets(&live, true);

        for target in live {
            if directory_is_empty(&target) {
                match fs::remove_dir(&target) {
                    Ok(()) => {
                        log::info!("unmounted {}", target.display());
                        out.done.push(target);
                    }
                    Err(e) => {
                        log::warn!("cannot remove {}: {e}", target.display());
                        out.failed.push(MountFailure::Unmount { path: target });
                    }
                }
            } else {
                out.failed.push(MountFailure::Unmount { path: target });
            }
        }
    }
}

/// Surface-level emptiness check; anything that is not a readable, empty
/// directory counts as non-empty.
fn directory_is_empty(path: &Path) -> bool {
    match fs::read_dir(path) {
        Ok(mut entries) => entries.next().is_none(),
        Err(_) => false,
    }
}

fn join_chunks(handles: Vec<crate::pool::TaskHandle<()>>) {
    for handle in handles {
        if let Err(e) = handle.join() {
            log::warn!("batch chunk task failed: {e}");
        }
    }
}

fn take_shared<T: Default>(shared: &Arc<Mutex<T>>) -> T {
    let mut guard = shared.lock().unwrap();
    std::mem::take(&mut *guard)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mount::FS_TYPE_CANDIDATES;
    use std::collections::BTreeSet;
    use std::collections::HashSet;
    use tempfile::TempDir;

    /// In-memory host: a mount table plus per-path scripted failures.
    #[derive(Default)]
    struct FakeHost {
        privileged: bool,
        table: Mutex<BTreeSet<PathBuf>>,
        denied_sources: Mutex<HashSet<PathBuf>>,
    }

    impl FakeHost {
        fn privileged() -> Self {
            Self {
                privileged: true,
                ..Self::default()
            }
        }

        fn deny(&self, source: &Path) {
            self.denied_sources
                .lock()
                .unwrap()
                .insert(source.to_path_buf());
        }
    }

    impl HostMounter for FakeHost {
        fn has_privilege(&self) -> bool {
            self.privileged
        }

        fn is_mounted(&self, target: &Path) -> bool {
            self.table.lock().unwrap().contains(target)
        }

        fn mount_image(
            &self,
            source: &Path,
            target: &Path,
            fs_types: &[String],
        ) -> Result<String, String> {
            if self.denied_sources.lock().unwrap().contains(source) {
                return Err("permission denied".to_string());
            }
            self.table.lock().unwrap().insert(target.to_path_buf());
            Ok(fs_types[0].clone())
        }

        fn unmount_targets(&self, targets: &[PathBuf], _lazy: bool) {
            let mut table = self.table.lock().unwrap();
            for target in targets {
                table.remove(target);
            }
        }
    }

    fn orchestrator(host: Arc<FakeHost>, root: &Path) -> MountOrchestrator {
        MountOrchestrator::new(
            host,
            root.to_path_buf(),
            FS_TYPE_CANDIDATES.iter().map(|s| s.to_string()).collect(),
        )
    }

    #[test]
    fn mount_then_retry_yields_mounted_then_skipped() {
        let root = TempDir::new().unwrap();
        let host = Arc::new(FakeHost::privileged());
        let orch = orchestrator(Arc::clone(&host), root.path());
        let iso = PathBuf::from("/x/game.iso");

        let mut first = MountOutcomes::default();
        orch.mount_one(&iso, &mut first);
        assert_eq!(first.done.len(), 1);
        assert_eq!(first.done[0].fs_type_used, "iso9660");
        assert!(first.done[0].mount_point.is_dir());

        let mut second = MountOutcomes::default();
        orch.mount_one(&iso, &mut second);
        assert!(second.done.is_empty());
        assert_eq!(second.skipped, vec![iso]);
        assert!(second.failed.is_empty());
    }

    #[test]
    fn unprivileged_mount_fails_with_permission() {
        let root = TempDir::new().unwrap();
        let host = Arc::new(FakeHost::default());
        let orch = orchestrator(host, root.path());

        let mut out = MountOutcomes::default();
        orch.mount_one(Path::new("/x/game.iso"), &mut out);
        assert_eq!(out.failed.len(), 1);
        assert!(matches!(out.failed[0], MountFailure::Permission { .. }));
        // No mount point directory was created.
        assert_eq!(fs::read_dir(root.path()).unwrap().count(), 0);
    }

    #[test]
    fn failed_mount_removes_its_mount_point_directory() {
        let root = TempDir::new().unwrap();
        let host = Arc::new(FakeHost::privileged());
        let iso = PathBuf::from("/x/bad.iso");
        host.deny(&iso);
        let orch = orchestrator(Arc::clone(&host), root.path());

        let mut out = MountOutcomes::default();
        orch.mount_one(&iso, &mut out);
        assert_eq!(out.failed.len(), 1);
        assert!(matches!(out.failed[0], MountFailure::Mount { .. }));
        assert_eq!(fs::read_dir(root.path()).unwrap().count(), 0);
    }

    #[test]
    fn batch_isolates_partial_failures() {
        let root = TempDir::new().unwrap();
        let host = Arc::new(FakeHost::privileged());
        let isos: Vec<PathBuf> = (0..10)
            .map(|i| PathBuf::from(format!("/data/{i}.iso")))
            .collect();
        for iso in isos.iter().take(3) {
            host.deny(iso);
        }
        let orch = orchestrator(Arc::clone(&host), root.path());

        let pool = ThreadPool::new(4);
        let out = orch.mount_many(&pool, &isos);

        assert_eq!(out.failed.len(), 3);
        assert_eq!(out.done.len(), 7);
        assert!(out.skipped.is_empty());

        // No item appears in two sets.
        let mut seen = HashSet::new();
        for record in &out.done {
            assert!(seen.insert(record.iso_path.clone()));
        }
        for failure in &out.failed {
            assert!(seen.insert(failure.path().to_path_buf()));
        }
        assert_eq!(seen.len(), 10);
    }

    #[test]
    fn unmount_releases_and_removes_empty_targets() {
        let root = TempDir::new().unwrap();
        let host = Arc::new(FakeHost::privileged());
        let orch = orchestrator(Arc::clone(&host), root.path());
        let iso = PathBuf::from("/x/game.iso");

        let mut mounted = MountOutcomes::default();
        orch.mount_one(&iso, &mut mounted);
        let target = mounted.done[0].mount_point.clone();

        let pool = ThreadPool::new(2);
        let out = orch.unmount_many(&pool, &[target.clone()]);

        assert_eq!(out.done, vec![target.clone()]);
        assert!(out.failed.is_empty());
        assert!(!target.exists());
        assert!(!host.is_mounted(&target));
    }

    #[test]
    fn busy_target_fails_and_keeps_its_directory() {
        let root = TempDir::new().unwrap();
        let host = Arc::new(FakeHost::privileged());
        let orch = orchestrator(Arc::clone(&host), root.path());

        // A still-busy mount shows residual content after the lazy detach.
        let target = root.path().join("iso_busy~00000000");
        fs::create_dir(&target).unwrap();
        fs::write(target.join("file"), b"x").unwrap();

        let pool = ThreadPool::new(2);
        let out = orch.unmount_many(&pool, &[target.clone()]);

        assert!(out.done.is_empty());
        assert_eq!(out.failed.len(), 1);
        assert!(matches!(out.failed[0], MountFailure::Unmount { .. }));
        assert!(target.is_dir());
    }

    #[test]
    fn unmounting_a_nonexistent_target_is_skipped() {
        let root = TempDir::new().unwrap();
        let host = Arc::new(FakeHost::privileged());
        let orch = orchestrator(host, root.path());

        let ghost = root.path().join("iso_gone~00000000");
        let pool = ThreadPool::new(2);
        let out = orch.unmount_many(&pool, &[ghost.clone()]);

        assert!(out.done.is_empty());
        assert!(out.failed.is_empty());
        assert_eq!(out.skipped, vec![ghost]);
    }

    #[test]
    fn list_mounted_reports_only_live_iso_mount_points() {
        let root = TempDir::new().unwrap();
        let host = Arc::new(FakeHost::privileged());
        let orch = orchestrator(Arc::clone(&host), root.path());

        let mut out = MountOutcomes::default();
        orch.mount_one(Path::new("/x/a.iso"), &mut out);
        let live_point = out.done[0].mount_point.clone();

        // A leftover mount point directory with no live mount, and an
        // unrelated directory: neither may appear in the listing.
        fs::create_dir(root.path().join("iso_stale~00000000")).unwrap();
        fs::create_dir(root.path().join("other")).unwrap();

        assert_eq!(orch.list_mounted(), vec![live_point]);
    }
}
