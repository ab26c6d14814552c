//! Cache directory path management
//!
//! This module provides the `CachePaths` struct which manages all filesystem paths
//! for the cache directory layout:
//!
//! ```text
//! <cache-root>/
//! ├── <identity>/         # git working copy
//! ├── <identity>.lock     # lock marker, only while a sync is in flight
//! └── <identity>.lock.<pid>.<n>.tmp   # marker staging file, briefly
//! ```

use std::ffi::OsString;
use std::path::{Path, PathBuf};

use super::identity::RepoIdentity;

/// Environment variable overriding the default cache root.
pub const REPO_PATH_ENV: &str = "REPO_PATH";

/// Directory name of the default cache root inside the system temp dir.
pub const DEFAULT_CACHE_DIR_NAME: &str = "konn-jsonnet-plugin-repos";

/// Suffix appended to a working copy path to form its lock marker.
const LOCK_SUFFIX: &str = ".lock";

/// Suffix of a lock marker's staging file.
const STAGING_SUFFIX: &str = ".tmp";

/// Manages all filesystem paths for the cache directory layout
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachePaths {
    root: PathBuf,
}

impl CachePaths {
    /// Creates a new CachePaths with the specified root directory
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Returns the root cache directory
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Returns the working copy directory: `{root}/{identity}`
    pub fn working_copy(&self, identity: &RepoIdentity) -> PathBuf {
        self.root.join(identity.as_str())
    }

    /// Returns the lock marker path: `{root}/{identity}.lock`
    pub fn lock_path(&self, identity: &RepoIdentity) -> PathBuf {
        self.root.join(format!("{}{}", identity.as_str(), LOCK_SUFFIX))
    }

    /// Returns true if `path` looks like a lock marker inside this cache root.
    pub fn is_lock_marker(&self, path: &Path) -> bool {
        path.parent() == Some(self.root.as_path())
            && path
                .file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.ends_with(LOCK_SUFFIX) && n.len() > LOCK_SUFFIX.len())
    }

    /// Returns true if `path` looks like a marker staging file inside this
    /// cache root. These only outlive an acquisition when the process crashed.
    pub fn is_staging_leftover(&self, path: &Path) -> bool {
        path.parent() == Some(self.root.as_path())
            && path
                .file_name()
                .and_then(|n| n.to_str())
                .and_then(|n| n.strip_suffix(STAGING_SUFFIX))
                .and_then(|n| n.split_once(".lock."))
                .is_some_and(|(name, _)| !name.is_empty())
    }
}

/// Resolve the cache root from the value of `REPO_PATH`, falling back to
/// `<system-temp>/konn-jsonnet-plugin-repos` when it is unset or empty.
pub fn root_from_env(value: Option<OsString>) -> PathBuf {
    match value {
        Some(v) if !v.is_empty() => PathBuf::from(v),
        _ => std::env::temp_dir().join(DEFAULT_CACHE_DIR_NAME),
    }
}

impl Default for CachePaths {
    /// Creates a CachePaths rooted at `$REPO_PATH`, or the temp dir default.
    fn default() -> Self {
        Self::new(root_from_env(std::env::var_os(REPO_PATH_ENV)))
    }
}
