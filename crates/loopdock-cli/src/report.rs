//! Outcome rendering
//!
//! The core hands over its outcome sets and this module prints them; it is
//! a pure sink. Output is plain text, one line per item, grouped in the
//! order done / skipped / failed.

use loopdock_core::{MountOutcomes, UnmountOutcomes};

pub fn render_mount_outcomes(out: &MountOutcomes) {
    for record in &out.done {
        println!(
            "mounted: {} at {} ({})",
            record.iso_path.display(),
            record.mount_point.display(),
            record.fs_type_used
        );
    }
    for iso in &out.skipped {
        println!("skipped (already mounted): {}", iso.display());
    }
    for failure in &out.failed {
        eprintln!("failed: {failure}");
    }
    println!(
        "{} mounted, {} skipped, {} failed",
        out.done.len(),
        out.skipped.len(),
        out.failed.len()
    );
}

pub fn render_unmount_outcomes(out: &UnmountOutcomes) {
    for target in &out.done {
        println!("unmounted: {}", target.display());
    }
    for target in &out.skipped {
        println!("skipped (not mounted): {}", target.display());
    }
    for failure in &out.failed {
        eprintln!("failed: {failure}");
    }
    println!(
        "{} unmounted, {} skipped, {} failed",
        out.done.len(),
        out.skipped.len(),
        out.failed.len()
    );
}
