//! Synchronizer configuration.

use std::path::{Path, PathBuf};
use std::time::Duration;

use super::git::{GitCli, validate_git_ref};
use super::paths::CachePaths;
use super::repo::SyncError;

/// How often a waiter re-checks a lock marker held by someone else.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Default lock wait timeout (5 minutes) - prevents indefinite hangs
pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(5 * 60);

/// Ref checked out after every clone or pull.
pub const DEFAULT_CHECKOUT_REF: &str = "HEAD";

/// Settings shared by every sync in a process. Fixed once the synchronizer
/// is built.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    paths: CachePaths,
    poll_interval: Duration,
    lock_timeout: Option<Duration>,
    reclaim_stale_locks: bool,
    checkout_ref: String,
    git: GitCli,
}

impl SyncConfig {
    /// Create a configuration with default settings rooted at `cache_root`.
    pub fn new(cache_root: impl Into<PathBuf>) -> Self {
        Self::with_paths(CachePaths::new(cache_root))
    }

    fn with_paths(paths: CachePaths) -> Self {
        Self {
            paths,
            poll_interval: DEFAULT_POLL_INTERVAL,
            lock_timeout: Some(DEFAULT_LOCK_TIMEOUT),
            reclaim_stale_locks: true,
            checkout_ref: DEFAULT_CHECKOUT_REF.to_string(),
            git: GitCli::new(),
        }
    }

    /// Set how often a held lock marker is re-checked.
    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    /// Set the maximum time to wait for another sync of the same repository.
    /// `None` waits forever.
    pub fn with_lock_timeout(mut self, lock_timeout: Option<Duration>) -> Self {
        self.lock_timeout = lock_timeout;
        self
    }

    /// Set whether markers left by dead processes are removed and re-acquired.
    pub fn with_reclaim_stale_locks(mut self, reclaim: bool) -> Self {
        self.reclaim_stale_locks = reclaim;
        self
    }

    /// Set the ref checked out after clone or pull.
    pub fn with_checkout_ref(mut self, reference: impl Into<String>) -> Self {
        self.checkout_ref = reference.into();
        self
    }

    /// Set the git executable.
    pub fn with_git(mut self, git: GitCli) -> Self {
        self.git = git;
        self
    }

    pub fn paths(&self) -> &CachePaths {
        &self.paths
    }

    pub fn cache_root(&self) -> &Path {
        self.paths.root()
    }

    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    pub fn lock_timeout(&self) -> Option<Duration> {
        self.lock_timeout
    }

    pub fn reclaim_stale_locks(&self) -> bool {
        self.reclaim_stale_locks
    }

    pub fn checkout_ref(&self) -> &str {
        &self.checkout_ref
    }

    pub fn git(&self) -> &GitCli {
        &self.git
    }

    /// Check the settings are usable.
    pub fn validate(&self) -> Result<(), SyncError> {
        if self.paths.root().as_os_str().is_empty() {
            return Err(SyncError::InvalidConfig(
                "cache root cannot be empty".to_string(),
            ));
        }
        if self.poll_interval.is_zero() {
            return Err(SyncError::InvalidConfig(
                "poll interval must be greater than zero".to_string(),
            ));
        }
        validate_git_ref(&self.checkout_ref, "checkout ref")
            .map_err(|e| SyncError::InvalidConfig(e.to_string()))?;
        Ok(())
    }
}

impl Default for SyncConfig {
    /// Rooted at `$REPO_PATH`, or `<system-temp>/konn-jsonnet-plugin-repos`.
    fn default() -> Self {
        Self::with_paths(CachePaths::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = SyncConfig::new("cache");
        assert_eq!(config.cache_root(), Path::new("cache"));
        assert_eq!(config.poll_interval(), Duration::from_millis(100));
        assert_eq!(config.lock_timeout(), Some(Duration::from_secs(300)));
        assert!(config.reclaim_stale_locks());
        assert_eq!(config.checkout_ref(), "HEAD");
        assert_eq!(config.git(), &GitCli::new());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn builders_override_defaults() {
        let config = SyncConfig::new("cache")
            .with_poll_interval(Duration::from_millis(5))
            .with_lock_timeout(None)
            .with_reclaim_stale_locks(false)
            .with_checkout_ref("main")
            .with_git(GitCli::with_program("/usr/local/bin/git"));
        assert_eq!(config.poll_interval(), Duration::from_millis(5));
        assert_eq!(config.lock_timeout(), None);
        assert!(!config.reclaim_stale_locks());
        assert_eq!(config.checkout_ref(), "main");
        assert_eq!(config.git().program(), "/usr/local/bin/git");
    }

    #[test]
    fn validate_rejects_empty_root() {
        let config = SyncConfig::new("");
        assert!(matches!(config.validate(), Err(SyncError::InvalidConfig(_))));
    }

    #[test]
    fn validate_rejects_zero_poll_interval() {
        let config = SyncConfig::new("cache").with_poll_interval(Duration::ZERO);
        assert!(matches!(config.validate(), Err(SyncError::InvalidConfig(_))));
    }

    #[test]
    fn validate_rejects_unsafe_checkout_ref() {
        let config = SyncConfig::new("cache").with_checkout_ref("--orphan");
        assert!(matches!(config.validate(), Err(SyncError::InvalidConfig(_))));
    }
}
