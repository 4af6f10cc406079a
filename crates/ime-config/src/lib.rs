//! # ime-config
//!
//! Configuration snapshot for the IME preload layer.
//!
//! The snapshot is built exactly once, from environment variables, while the
//! process start hook runs. It is immutable afterwards:
//!
//! 1. `IM_CLIENT_BFS_PATH` enables redirection into a backing filesystem.
//! 2. `IM_CLIENT_NO_*` variables switch individual redirections off.
//! 3. `IM_CLIENT_CONNECTION` is defaulted for the native client if absent.

pub mod logging;
pub mod testing;

use serde::Serialize;
use std::collections::HashMap;
use std::ffi::CString;
use std::fmt;

/// Root of the backing filesystem. Unset disables backing-store redirection.
pub const BFS_PATH_ENV: &str = "IM_CLIENT_BFS_PATH";
/// Present: serve managed directory listings from the original path.
pub const NO_BFS_OPENDIR_ENV: &str = "IM_CLIENT_NO_BFS_OPENDIR";
/// Present: keep the libc default buffer for redirected directory streams.
pub const NO_LARGE_DIRBUF_ENV: &str = "IM_CLIENT_NO_LARGE_DIRBUF";
/// Present: let the managed client create files itself.
pub const NO_BFS_MKNOD_ENV: &str = "IM_CLIENT_NO_BFS_MKNOD";
/// Connection mode consumed by the native client, never read back here.
pub const CONNECTION_ENV: &str = "IM_CLIENT_CONNECTION";
pub const DEFAULT_CONNECTION: &str = "native";
/// Shared object providing the `ime_native_*` entry points.
pub const NATIVE_LIB_ENV: &str = "IM_CLIENT_NATIVE_LIB";
pub const DEFAULT_NATIVE_LIB: &str = "libim_client.so";

/// Longest backing root accepted, terminating NUL included.
pub const MAX_PATH_LEN: usize = libc::PATH_MAX as usize;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to set {key}: {source}")]
    SetEnv {
        key: String,
        #[source]
        source: std::io::Error,
    },
    #[error("environment value for {0} contains an interior NUL")]
    InteriorNul(String),
    #[error("backing root is {len} bytes, limit is {limit}")]
    BackingRootTooLong { len: usize, limit: usize },
    #[error("logging init failed: {0}")]
    Logging(String),
}

/// Read/write access to the variables the snapshot is built from.
pub trait Environment {
    fn var(&self, key: &str) -> Option<String>;

    /// Set `key` to `value` unless it already has a value.
    fn set_default(&mut self, key: &str, value: &str) -> Result<(), ConfigError>;
}

/// The real process environment.
///
/// Writes go through `setenv(3)` so the native client, which reads the C
/// environment, sees them.
#[derive(Debug, Default, Clone, Copy)]
pub struct ProcessEnv;

impl Environment for ProcessEnv {
    fn var(&self, key: &str) -> Option<String> {
        std::env::var_os(key).map(|v| v.to_string_lossy().into_owned())
    }

    fn set_default(&mut self, key: &str, value: &str) -> Result<(), ConfigError> {
        let c_key = CString::new(key).map_err(|_| ConfigError::InteriorNul(key.to_string()))?;
        let c_value = CString::new(value).map_err(|_| ConfigError::InteriorNul(key.to_string()))?;
        // overwrite = 0 keeps a value the user already exported
        if unsafe { libc::setenv(c_key.as_ptr(), c_value.as_ptr(), 0) } != 0 {
            return Err(ConfigError::SetEnv {
                key: key.to_string(),
                source: std::io::Error::last_os_error(),
            });
        }
        Ok(())
    }
}

impl Environment for HashMap<String, String> {
    fn var(&self, key: &str) -> Option<String> {
        self.get(key).cloned()
    }

    fn set_default(&mut self, key: &str, value: &str) -> Result<(), ConfigError> {
        self.entry(key.to_string())
            .or_insert_with(|| value.to_string());
        Ok(())
    }
}

/// Immutable feature snapshot consulted by the redirect dispatcher.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Config {
    /// Backing filesystem root, `None` when backing redirection is off
    pub backing_root: Option<String>,
    /// opendir on managed paths lists the backing directory instead
    pub redirect_opendir: bool,
    /// Redirected directory streams get the large read buffer
    pub grow_dir_buffer: bool,
    /// O_CREAT opens create the node in the backing store first
    pub create_via_mknod: bool,
    /// Native client library to load
    pub native_lib: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            backing_root: None,
            redirect_opendir: false,
            grow_dir_buffer: false,
            create_via_mknod: false,
            native_lib: DEFAULT_NATIVE_LIB.to_string(),
        }
    }
}

impl Config {
    /// Load from the process environment.
    pub fn load() -> Self {
        Self::from_env(&mut ProcessEnv)
    }

    /// Build the snapshot from `env`.
    ///
    /// Never fails: a rejected backing root or an unwritable connection
    /// default is logged and otherwise ignored.
    pub fn from_env<E: Environment>(env: &mut E) -> Self {
        let backing_root = match env.var(BFS_PATH_ENV) {
            Some(root) if !root.is_empty() => match check_backing_root(&root) {
                Ok(()) => Some(root),
                Err(e) => {
                    tracing::warn!(component = "CONFIG", error = %e, "backing root rejected");
                    None
                }
            },
            _ => None,
        };
        let has_root = backing_root.is_some();

        let redirect_opendir = has_root && env.var(NO_BFS_OPENDIR_ENV).is_none();
        let grow_dir_buffer = redirect_opendir && env.var(NO_LARGE_DIRBUF_ENV).is_none();
        let create_via_mknod = has_root && env.var(NO_BFS_MKNOD_ENV).is_none();

        if let Err(e) = env.set_default(CONNECTION_ENV, DEFAULT_CONNECTION) {
            tracing::warn!(component = "CONFIG", error = %e, "connection default not written");
        }

        let native_lib = env
            .var(NATIVE_LIB_ENV)
            .filter(|v| !v.is_empty())
            .unwrap_or_else(|| DEFAULT_NATIVE_LIB.to_string());

        Self {
            backing_root,
            redirect_opendir,
            grow_dir_buffer,
            create_via_mknod,
            native_lib,
        }
    }

    pub fn backing_root(&self) -> Option<&str> {
        self.backing_root.as_deref()
    }

    /// JSON form embedded in the status export.
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }
}

fn check_backing_root(root: &str) -> Result<(), ConfigError> {
    if root.len() >= MAX_PATH_LEN {
        return Err(ConfigError::BackingRootTooLong {
            len: root.len(),
            limit: MAX_PATH_LEN - 1,
        });
    }
    if root.as_bytes().contains(&0) {
        return Err(ConfigError::InteriorNul(BFS_PATH_ENV.to_string()));
    }
    Ok(())
}

fn on_off(v: bool) -> &'static str {
    if v {
        "on"
    } else {
        "off"
    }
}

/// The startup status line.
impl fmt::Display for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "POSIX 2 IME Library Loaded (bfs={}, bfs-opendir={}, large-dirbuf={}, bfs-mknod={})",
            self.backing_root.as_deref().unwrap_or("<none>"),
            on_off(self.redirect_opendir),
            on_off(self.grow_dir_buffer),
            on_off(self.create_via_mknod),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn env(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_unset_root_disables_everything() {
        let cfg = Config::from_env(&mut env(&[]));
        assert_eq!(cfg.backing_root, None);
        assert!(!cfg.redirect_opendir);
        assert!(!cfg.grow_dir_buffer);
        assert!(!cfg.create_via_mknod);
    }

    #[test]
    fn test_root_enables_defaults() {
        let cfg = Config::from_env(&mut env(&[(BFS_PATH_ENV, "/bfs")]));
        assert_eq!(cfg.backing_root(), Some("/bfs"));
        assert!(cfg.redirect_opendir);
        assert!(cfg.grow_dir_buffer);
        assert!(cfg.create_via_mknod);
    }

    #[test]
    fn test_disable_flags_by_presence() {
        let cfg = Config::from_env(&mut env(&[
            (BFS_PATH_ENV, "/bfs"),
            (NO_BFS_MKNOD_ENV, ""),
            (NO_LARGE_DIRBUF_ENV, "1"),
        ]));
        assert!(cfg.redirect_opendir);
        assert!(!cfg.grow_dir_buffer);
        assert!(!cfg.create_via_mknod);
    }

    #[test]
    fn test_no_opendir_implies_no_dirbuf() {
        let cfg = Config::from_env(&mut env(&[(BFS_PATH_ENV, "/bfs"), (NO_BFS_OPENDIR_ENV, "")]));
        assert!(!cfg.redirect_opendir);
        assert!(!cfg.grow_dir_buffer);
        assert!(cfg.create_via_mknod);
    }

    #[test]
    fn test_empty_root_is_unset() {
        let cfg = Config::from_env(&mut env(&[(BFS_PATH_ENV, "")]));
        assert_eq!(cfg.backing_root, None);
        assert!(!cfg.create_via_mknod);
    }

    #[test]
    fn test_overlong_root_rejected() {
        let long = format!("/{}", "a".repeat(MAX_PATH_LEN));
        let cfg = Config::from_env(&mut env(&[(BFS_PATH_ENV, long.as_str())]));
        assert_eq!(cfg.backing_root, None);
        assert!(!cfg.redirect_opendir);
    }

    #[test]
    fn test_connection_default_written_once() {
        let mut vars = env(&[]);
        Config::from_env(&mut vars);
        assert_eq!(vars.get(CONNECTION_ENV).map(String::as_str), Some(DEFAULT_CONNECTION));

        let mut vars = env(&[(CONNECTION_ENV, "rdma")]);
        Config::from_env(&mut vars);
        assert_eq!(vars.get(CONNECTION_ENV).map(String::as_str), Some("rdma"));
    }

    #[test]
    fn test_native_lib_override() {
        let cfg = Config::from_env(&mut env(&[]));
        assert_eq!(cfg.native_lib, DEFAULT_NATIVE_LIB);
        let cfg = Config::from_env(&mut env(&[(NATIVE_LIB_ENV, "/opt/ddn/lib/libim_client.so")]));
        assert_eq!(cfg.native_lib, "/opt/ddn/lib/libim_client.so");
    }

    #[test]
    fn test_status_line() {
        let cfg = Config::from_env(&mut env(&[(BFS_PATH_ENV, "/bfs"), (NO_BFS_MKNOD_ENV, "")]));
        let line = cfg.to_string();
        assert!(line.starts_with("POSIX 2 IME Library Loaded"));
        assert!(line.contains("bfs=/bfs"));
        assert!(line.contains("bfs-mknod=off"));
        assert!(line.contains("large-dirbuf=on"));
    }

    #[test]
    fn test_json_export() {
        let cfg = Config::from_env(&mut env(&[(BFS_PATH_ENV, "/bfs")]));
        let v = cfg.to_json();
        assert_eq!(v["backing_root"], "/bfs");
        assert_eq!(v["create_via_mknod"], true);
    }
}
