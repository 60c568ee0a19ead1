//! Host mount facility
//!
//! The one place that talks to the operating system about mounts. The rest
//! of the crate sees four operations: privilege check, mount-table query,
//! mount, unmount. Tests substitute an in-memory implementation.

use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

/// Narrow seam to the platform mount machinery.
pub trait HostMounter: Send + Sync {
    /// Whether this process may mount at all (effective uid 0 on Linux).
    fn has_privilege(&self) -> bool;

    /// Whether `target` currently appears in the process mount table.
    fn is_mounted(&self, target: &Path) -> bool;

    /// Attempt a read-only loopback mount of `source` at `target`, trying
    /// each filesystem type in order. Returns the type that succeeded, or
    /// a descriptive reason when every candidate was rejected.
    fn mount_image(
        &self,
        source: &Path,
        target: &Path,
        fs_types: &[String],
    ) -> Result<String, String>;

    /// Detach `targets` (lazily when requested), batching them into a
    /// single invocation where the platform supports it. Best-effort: the
    /// caller classifies success by re-inspecting the targets afterwards.
    fn unmount_targets(&self, targets: &[PathBuf], lazy: bool);
}

/// Production implementation: mount table via procfs, mount/unmount via
/// the platform utilities (which handle loop-device setup and teardown).
#[derive(Debug, Default, Clone, Copy)]
pub struct LinuxMounter;

impl HostMounter for LinuxMounter {
    fn has_privilege(&self) -> bool {
        unsafe { libc::geteuid() == 0 }
    }

    fn is_mounted(&self, target: &Path) -> bool {
        let mounts = procfs::process::Process::myself().and_then(|p| p.mountinfo());
        match mounts {
            Ok(mounts) => mounts.iter().any(|m| m.mount_point == target),
            Err(e) => {
                // An unreadable mount table degrades to "not mounted"; the
                // mount attempt that follows will report the real failure.
                log::warn!("cannot read mount table: {e}");
                false
            }
        }
    }

    fn mount_image(
        &self,
        source: &Path,
        target: &Path,
        fs_types: &[String],
    ) -> Result<String, String> {
        for fs_type in fs_types {
            let status = Command::new("mount")
                .arg("-t")
                .arg(fs_type)
                .arg("-o")
                .arg("loop,ro")
                .arg(source)
                .arg(target)
                .stdout(Stdio::null())
                .stderr(Stdio::null())
                .status();
            match status {
                Ok(status) if status.success() => {
                    log::debug!(
                        "mounted {} at {} as {fs_type}",
                        source.display(),
                        target.display()
                    );
                    return Ok(fs_type.clone());
                }
                Ok(_) => continue,
                Err(e) => return Err(format!("cannot invoke mount: {e}")),
            }
        }
        Err("no filesystem type candidate succeeded".to_string())
    }

    fn unmount_targets(&self, targets: &[PathBuf], lazy: bool) {
        if targets.is_empty() {
            return;
        }
        let mut command = Command::new("umount");
        if lazy {
            command.arg("-l");
        }
        command
            .args(targets)
            .stdout(Stdio::null())
            .stderr(Stdio::null());

        // Exit status is deliberately ignored: umount reports per-target
        // failures we classify afterwards by looking at the directories.
        match command.status() {
            Ok(status) => {
                log::debug!("umount of {} targets exited with {status}", targets.len());
            }
            Err(e) => log::warn!("cannot invoke umount: {e}"),
        }
    }
}
