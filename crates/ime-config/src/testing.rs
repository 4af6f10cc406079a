//! Test environment abstraction for isolated testing.
//!
//! Provides `TestEnvironment` to manage:
//! - A temporary backing-store root
//! - A fake managed namespace prefix
//! - The environment map a snapshot would be built from
//!
//! # Usage
//!
//! ```ignore
//! use ime_config::testing::TestEnvironment;
//!
//! let env = TestEnvironment::new()?;
//! let cfg = env.config();
//! assert_eq!(cfg.backing_root(), Some(env.backing_root_str()));
//! ```

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU32, Ordering};
use tempfile::TempDir;

use crate::{Config, BFS_PATH_ENV};

/// Atomic counter for unique test IDs
static TEST_COUNTER: AtomicU32 = AtomicU32::new(0);

/// Managed namespace prefix used by test backends
pub const TEST_MANAGED_ROOT: &str = "/mnt/ime";

/// Isolated test environment with a real backing directory
pub struct TestEnvironment {
    /// Temporary directory (dropped on cleanup)
    _temp_dir: TempDir,
    /// Backing-store root for this test
    pub backing_root: PathBuf,
    /// Managed namespace prefix
    pub managed_root: String,
    /// Unique test ID
    pub test_id: u32,
}

impl TestEnvironment {
    /// Create a new isolated test environment
    pub fn new() -> anyhow::Result<Self> {
        let test_id = TEST_COUNTER.fetch_add(1, Ordering::Relaxed);
        let temp_dir = TempDir::new()?;
        let backing_root = temp_dir.path().join(format!("bfs-{}", test_id));
        std::fs::create_dir_all(&backing_root)?;

        Ok(Self {
            _temp_dir: temp_dir,
            backing_root,
            managed_root: TEST_MANAGED_ROOT.to_string(),
            test_id,
        })
    }

    pub fn backing_root_str(&self) -> &str {
        self.backing_root.to_str().unwrap_or_default()
    }

    /// Environment map with the backing root set and every flag at its default
    pub fn env_map(&self) -> HashMap<String, String> {
        let mut vars = HashMap::new();
        vars.insert(BFS_PATH_ENV.to_string(), self.backing_root_str().to_string());
        vars
    }

    /// Snapshot built from `env_map()` plus `extra` variables
    pub fn config_with(&self, extra: &[&str]) -> Config {
        let mut vars = self.env_map();
        for key in extra {
            vars.insert(key.to_string(), String::new());
        }
        Config::from_env(&mut vars)
    }

    pub fn config(&self) -> Config {
        self.config_with(&[])
    }

    /// Managed path for `relative` (which starts with '/')
    pub fn managed_path(&self, relative: &str) -> String {
        format!("{}{}", self.managed_root, relative)
    }

    /// Backing path for `relative` (which starts with '/')
    pub fn backing_path(&self, relative: &str) -> PathBuf {
        self.backing_root.join(relative.trim_start_matches('/'))
    }

    /// Create a directory under the backing root
    pub fn create_backing_dir(&self, relative: &str) -> anyhow::Result<PathBuf> {
        let path = self.backing_path(relative);
        std::fs::create_dir_all(&path)?;
        Ok(path)
    }

    /// Create a file with content under the backing root
    pub fn create_backing_file(&self, relative: &str, content: &[u8]) -> anyhow::Result<PathBuf> {
        let path = self.backing_path(relative);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&path, content)?;
        Ok(path)
    }
}

impl Default for TestEnvironment {
    fn default() -> Self {
        Self::new().expect("Failed to create test environment")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_environment_creates_backing_root() {
        let env = TestEnvironment::new().unwrap();
        assert!(env.backing_root.is_dir());
    }

    #[test]
    fn test_environment_roots_are_unique() {
        let env1 = TestEnvironment::new().unwrap();
        let env2 = TestEnvironment::new().unwrap();
        assert_ne!(env1.backing_root, env2.backing_root);
    }

    #[test]
    fn test_config_points_at_backing_root() {
        let env = TestEnvironment::new().unwrap();
        let cfg = env.config();
        assert_eq!(cfg.backing_root(), Some(env.backing_root_str()));
        assert!(cfg.create_via_mknod);
    }

    #[test]
    fn test_paths() {
        let env = TestEnvironment::new().unwrap();
        assert_eq!(env.managed_path("/data/f.txt"), "/mnt/ime/data/f.txt");
        assert_eq!(env.backing_path("/data/f.txt"), env.backing_root.join("data/f.txt"));
    }
}
