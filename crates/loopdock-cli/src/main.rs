//! loopdock - index ISO images and mount them as read-only loopback filesystems

mod report;
mod select;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use loopdock_core::{
    default_config_path, load_config, traverse_roots, Config, IsoIndex, MountOrchestrator,
    ThreadPool, TraverseOptions,
};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "loopdock", version, about = "Index and mount ISO disk images")]
struct Cli {
    /// Alternate configuration file
    #[arg(long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Scan directories for ISO images and merge them into the index
    Scan {
        /// Directories to walk
        roots: Vec<PathBuf>,
        /// Recursion depth (0 = only entries directly under a root, -1 = unbounded)
        #[arg(long, default_value_t = -1, allow_hyphen_values = true)]
        max_depth: i32,
    },
    /// List indexed images, pruning entries whose file has disappeared
    List,
    /// Mount selected images ("1 3 5-7" against the `list` numbering, or "all")
    Mount {
        /// Selection tokens; omit to print the list with a hint
        selection: Vec<String>,
    },
    /// Unmount selected images ("1 3 5-7" against the mounted list, or "all")
    Unmount {
        /// Selection tokens; omit to print what is currently mounted
        selection: Vec<String>,
    },
    /// Show index statistics
    Stats {
        /// Delete the index file instead
        #[arg(long)]
        clear: bool,
    },
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let cli = Cli::parse();
    let config_path = cli.config.unwrap_or_else(default_config_path);
    log::debug!("using config at {}", config_path.display());
    let config = load_config(&config_path);

    match cli.command {
        Command::Scan { roots, max_depth } => cmd_scan(&config, &roots, max_depth),
        Command::List => cmd_list(&config),
        Command::Mount { selection } => cmd_mount(&config, &selection),
        Command::Unmount { selection } => cmd_unmount(&config, &selection),
        Command::Stats { clear } => cmd_stats(&config, clear),
    }
}

fn cmd_scan(config: &Config, roots: &[PathBuf], max_depth: i32) -> Result<()> {
    if roots.is_empty() {
        bail!("scan requires at least one directory");
    }

    let options = TraverseOptions {
        max_depth,
        max_walks: config.worker_threads() * 2,
    };
    let outcome = traverse_roots(roots, &options);
    for error in &outcome.errors {
        eprintln!("{error}");
    }

    let index = IsoIndex::from_config(config);
    let total = index
        .save(&outcome.found)
        .context("saving the ISO index")?;
    println!(
        "{} files examined, {} ISO images found, index now holds {} entries",
        outcome.files_seen,
        outcome.found.len(),
        total
    );
    Ok(())
}

/// Prune the index, then return its entries in display order. The ordering
/// is what the selection indices of `mount` refer to.
fn pruned_entries(config: &Config, pool: &ThreadPool) -> Result<Vec<PathBuf>> {
    let index = IsoIndex::from_config(config);
    index.prune(pool).context("pruning the ISO index")?;
    Ok(index.load().into_iter().collect())
}

fn cmd_list(config: &Config) -> Result<()> {
    let pool = ThreadPool::new(config.worker_threads());
    let entries = pruned_entries(config, &pool)?;
    if entries.is_empty() {
        println!("the index is empty; run `loopdock scan <dir>` first");
        return Ok(());
    }
    print_listing(&entries);
    Ok(())
}

fn cmd_mount(config: &Config, selection: &[String]) -> Result<()> {
    let pool = ThreadPool::new(config.worker_threads());
    let entries = pruned_entries(config, &pool)?;
    if entries.is_empty() {
        println!("the index is empty; run `loopdock scan <dir>` first");
        return Ok(());
    }
    if selection.is_empty() {
        print_listing(&entries);
        println!("pass a selection to mount, e.g. `loopdock mount 1 3-5` or `loopdock mount all`");
        return Ok(());
    }

    let selected = select::parse_selection(selection, entries.len());
    for error in &selected.errors {
        eprintln!("{error}");
    }
    if selected.indices.is_empty() {
        bail!("nothing selected");
    }

    let chosen: Vec<PathBuf> = selected
        .indices
        .iter()
        .map(|&i| entries[i - 1].clone())
        .collect();

    let orchestrator = MountOrchestrator::from_config(config);
    let outcomes = orchestrator.mount_many(&pool, &chosen);
    report::render_mount_outcomes(&outcomes);
    Ok(())
}

fn cmd_unmount(config: &Config, selection: &[String]) -> Result<()> {
    let orchestrator = MountOrchestrator::from_config(config);

    let mounted = orchestrator.list_mounted();
    if mounted.is_empty() {
        println!("nothing is currently mounted under {}", config.mount.root.display());
        return Ok(());
    }
    if selection.is_empty() {
        print_listing(&mounted);
        println!("pass a selection to unmount, e.g. `loopdock unmount 1` or `loopdock unmount all`");
        return Ok(());
    }

    let selected = select::parse_selection(selection, mounted.len());
    for error in &selected.errors {
        eprintln!("{error}");
    }
    if selected.indices.is_empty() {
        bail!("nothing selected");
    }

    let targets: Vec<PathBuf> = selected
        .indices
        .iter()
        .map(|&i| mounted[i - 1].clone())
        .collect();

    let pool = ThreadPool::new(config.worker_threads());
    let outcomes = orchestrator.unmount_many(&pool, &targets);
    report::render_unmount_outcomes(&outcomes);
    Ok(())
}

fn cmd_stats(config: &Config, clear: bool) -> Result<()> {
    let index = IsoIndex::from_config(config);
    if clear {
        index.clear().context("clearing the ISO index")?;
        println!("index cleared: {}", index.file_path().display());
        return Ok(());
    }

    let stats = index.stats();
    println!("location: {}", index.file_path().display());
    println!("entries:  {} (cap {})", stats.entries, stats.max_entries);
    println!("size:     {} bytes", stats.file_bytes);
    Ok(())
}

fn print_listing(entries: &[PathBuf]) {
    for (number, path) in entries.iter().enumerate() {
        println!("{:>4}  {}", number + 1, path.display());
    }
}
