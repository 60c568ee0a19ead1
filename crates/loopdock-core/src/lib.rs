//! Loopdock Core - persistent ISO index and loopback mount orchestration
//!
//! # Architecture
//!
//! ```text
//! CLI / caller
//!     │
//!     ├── index ──── walkdir traversal, flock-guarded index file
//!     ├── mount ──── orchestrator ──► HostMounter seam ──► platform
//!     ├── batch ──── chunking + progress reporting
//!     └── pool ───── work-stealing substrate for all of the above
//! ```
//!
//! The index file is shared across processes and guarded by advisory file
//! locks; everything else is per-process state owned by the caller.

pub mod batch;
pub mod config;
pub mod index;
pub mod mount;
pub mod pool;

pub use config::{default_config_path, load_config, Config, EvictionOrder};
pub use index::{traverse_roots, IsoIndex, ScanOutcome, TraverseOptions};
pub use mount::{MountOrchestrator, MountOutcomes, MountRecord, UnmountOutcomes};
pub use pool::ThreadPool;
