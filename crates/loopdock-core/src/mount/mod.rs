//! Mount orchestration
//!
//! This module brings selected ISO images to the "mounted" state (or back)
//! with three-way outcome classification:
//!
//! - done: the image reached the desired state in this batch
//! - skipped: it was already there (not an error)
//! - failed: it could not get there, with the reason attached
//!
//! All interaction with the operating system goes through the narrow
//! [`HostMounter`] seam; the orchestrator itself only classifies.

mod host;
mod orchestrator;

pub use host::{HostMounter, LinuxMounter};
pub use orchestrator::MountOrchestrator;

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Filesystem types attempted for a loopback mount, in priority order.
/// The first type the host accepts wins.
pub const FS_TYPE_CANDIDATES: &[&str] = &[
    "iso9660", "udf", "hfsplus", "rockridge", "joliet", "isofs", "auto",
];

/// A successful mount: ephemeral, never persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountRecord {
    pub iso_path: PathBuf,
    pub mount_point: PathBuf,
    pub fs_type_used: String,
}

/// Why an item landed in the failed set.
///
/// "Already in the desired state" is deliberately absent: that is the
/// skipped set, not a failure.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum MountFailure {
    #[error("{}: root privileges are required for mounting", path.display())]
    Permission { path: PathBuf },

    #[error("{}: cannot create mount point: {reason}", path.display())]
    DirectoryCreate { path: PathBuf, reason: String },

    #[error("{}: mount failed: {reason}", path.display())]
    Mount { path: PathBuf, reason: String },

    #[error("{}: unmount failed: target busy or directory not empty", path.display())]
    Unmount { path: PathBuf },
}

impl MountFailure {
    /// The item this failure is keyed by.
    pub fn path(&self) -> &Path {
        match self {
            MountFailure::Permission { path }
            | MountFailure::DirectoryCreate { path, .. }
            | MountFailure::Mount { path, .. }
            | MountFailure::Unmount { path } => path,
        }
    }
}

/// Per-batch outcome accumulator, owned by the batch caller.
///
/// The three sets are disjoint by construction: every processed item lands
/// in exactly one. Merging is associative and order-independent, so chunk
/// tasks can fold their local sets into a shared one in any order.
#[derive(Debug, Clone)]
pub struct OutcomeSets<T> {
    pub done: Vec<T>,
    pub skipped: Vec<PathBuf>,
    pub failed: Vec<MountFailure>,
}

/// Outcomes of a mount batch; `done` holds the new [`MountRecord`]s.
pub type MountOutcomes = OutcomeSets<MountRecord>;

/// Outcomes of an unmount batch; `done` holds the released mount points.
pub type UnmountOutcomes = OutcomeSets<PathBuf>;

impl<T> Default for OutcomeSets<T> {
    fn default() -> Self {
        Self {
            done: Vec::new(),
            skipped: Vec::new(),
            failed: Vec::new(),
        }
    }
}

impl<T> OutcomeSets<T> {
    /// Fold another accumulator into this one.
    pub fn merge(&mut self, other: OutcomeSets<T>) {
        self.done.extend(other.done);
        self.skipped.extend(other.skipped);
        self.failed.extend(other.failed);
    }

    /// Total number of classified items.
    pub fn total(&self) -> usize {
        self.done.len() + self.skipped.len() + self.failed.len()
    }
}

/// Derive the mount point for an ISO image: `<root>/iso_<stem>~<hash>`.
///
/// A pure function of the path: identical input always yields an identical
/// mount point. Images with the same file-name stem in different
/// directories are disambiguated by a short hash of the full path; the
/// residual collision probability (same stem and same 32-bit digest) is
/// accepted and documented, not eliminated.
pub fn mount_point_for(iso_path: &Path, mount_root: &Path) -> PathBuf {
    let stem = iso_path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "image".to_string());

    let mut hasher = DefaultHasher::new();
    iso_path.hash(&mut hasher);
    let digest = hasher.finish() as u32;

    mount_root.join(format!("iso_{stem}~{digest:08x}"))
}
