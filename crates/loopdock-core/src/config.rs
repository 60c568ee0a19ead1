//! Global configuration for loopdock
//!
//! Configuration is stored as YAML under the user config directory.
//! Default location: ~/.config/loopdock/config.yaml
//!
//! A missing file yields defaults; an unreadable or invalid file logs a
//! warning and yields defaults, so a broken config never blocks mounting.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::mount::FS_TYPE_CANDIDATES;

/// Root configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Index file settings
    pub index: IndexConfig,
    /// Mount orchestration settings
    pub mount: MountConfig,
    /// Worker thread override; 0 means detected hardware parallelism
    pub threads: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            index: IndexConfig::default(),
            mount: MountConfig::default(),
            threads: 0,
        }
    }
}

impl Config {
    /// Effective worker count: the override if set, detected parallelism otherwise.
    pub fn worker_threads(&self) -> usize {
        if self.threads > 0 {
            self.threads
        } else {
            crate::pool::detected_parallelism()
        }
    }
}

/// Index file configuration section
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexConfig {
    /// Backing file for the ISO index
    pub file: PathBuf,
    /// Maximum number of index entries kept on disk
    pub max_entries: usize,
    /// Which end of the ordered entry set is trimmed when over capacity
    pub eviction: EvictionOrder,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            file: default_index_path(),
            max_entries: 100_000,
            eviction: EvictionOrder::default(),
        }
    }
}

/// Over-capacity eviction order.
///
/// The historical behavior trimmed the lexicographically smallest entries,
/// an artifact of ordered-set deduplication rather than a deliberate policy,
/// so the order is configurable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum EvictionOrder {
    /// Trim from the low end of the ordered set
    #[default]
    SmallestFirst,
    /// Trim from the high end of the ordered set
    LargestFirst,
}

/// Mount orchestration configuration section
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MountConfig {
    /// Directory under which mount points are created (e.g. "/mnt")
    pub root: PathBuf,
    /// Filesystem types attempted for a loopback mount, in priority order
    pub fs_types: Vec<String>,
}

impl Default for MountConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("/mnt"),
            fs_types: FS_TYPE_CANDIDATES.iter().map(|s| s.to_string()).collect(),
        }
    }
}

/// Get the default config file path
///
/// Returns: ~/.config/loopdock/config.yaml
pub fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("loopdock")
        .join("config.yaml")
}

/// Default index file location under the user data directory
///
/// Returns: ~/.local/share/loopdock/index.txt
pub fn default_index_path() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("loopdock")
        .join("index.txt")
}

/// Load configuration from a YAML file
///
/// If the file doesn't exist, returns default config.
/// If the file exists but is invalid, logs a warning and returns default config.
pub fn load_config(path: &Path) -> Config {
    if !path.exists() {
        log::debug!("no config at {:?}, using defaults", path);
        return Config::default();
    }

    match std::fs::read_to_string(path) {
        Ok(contents) => match serde_yaml::from_str::<Config>(&contents) {
            Ok(config) => config,
            Err(e) => {
                log::warn!("invalid config at {:?}: {}, using defaults", path, e);
                Config::default()
            }
        },
        Err(e) => {
            log::warn!("cannot read config at {:?}: {}, using defaults", path, e);
            Config::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn missing_file_yields_defaults() {
        let config = load_config(Path::new("/nonexistent/loopdock.yaml"));
        assert_eq!(config.index.max_entries, 100_000);
        assert_eq!(config.mount.root, PathBuf::from("/mnt"));
        assert_eq!(config.index.eviction, EvictionOrder::SmallestFirst);
    }

    #[test]
    fn partial_file_fills_remaining_defaults() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("config.yaml");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(file, "index:\n  max_entries: 42\n  eviction: largest-first").unwrap();

        let config = load_config(&path);
        assert_eq!(config.index.max_entries, 42);
        assert_eq!(config.index.eviction, EvictionOrder::LargestFirst);
        // Untouched sections keep their defaults.
        assert_eq!(config.mount.fs_types[0], "iso9660");
        assert_eq!(config.threads, 0);
    }

    #[test]
    fn invalid_file_yields_defaults() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("config.yaml");
        std::fs::write(&path, "mount: [this is not a mapping]").unwrap();

        let config = load_config(&path);
        assert_eq!(config.mount.root, PathBuf::from("/mnt"));
    }
}
