//! Repository synchronizer
//!
//! Brings one repository's working copy up to date: clone when absent, pull
//! when present, then always check out the configured ref so the tree on disk
//! matches what was just fetched. The whole sequence runs under the
//! repository's lock marker. A caller that finds the marker held waits for it
//! to go away and reports the working copy without running git itself.

use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use thiserror::Error;

use super::git::{GitError, origin_url};
use super::identity::{IdentityError, RepoIdentity};
use super::lock::{LockMarker, LockOwner, WaitOutcome, wait_for_release};
use super::{CachePaths, SyncConfig};

/// Errors returned by a repository sync.
#[derive(Error, Debug)]
pub enum SyncError {
    /// The cache root could not be created.
    #[error("failed to create cache root {}: {source}", path.display())]
    CacheRootUnavailable {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    /// No identity can be derived from the URL.
    #[error("invalid repository url {url:?}: {source}")]
    InvalidRepository {
        url: String,
        #[source]
        source: IdentityError,
    },
    /// The lock marker could not be created or inspected.
    #[error("failed to lock {}: {source}", path.display())]
    LockUnavailable {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    /// Another sync held the lock for longer than the configured timeout.
    #[error("timed out after {waited:?} waiting for {} to be released", path.display())]
    LockTimeout { path: PathBuf, waited: Duration },
    /// Two different URLs map to the same working copy.
    #[error(
        "repository {requested} and {existing} both resolve to working copy '{identity}'"
    )]
    IdentityCollision {
        identity: String,
        existing: String,
        requested: String,
    },
    #[error("failed to clone {url} into {}: {source}", path.display())]
    CloneFailed {
        url: String,
        path: PathBuf,
        #[source]
        source: GitError,
    },
    #[error("failed to pull {url} in {}: {source}", path.display())]
    PullFailed {
        url: String,
        path: PathBuf,
        #[source]
        source: GitError,
    },
    #[error("failed to checkout {url} in {}: {source}", path.display())]
    CheckoutFailed {
        url: String,
        path: PathBuf,
        #[source]
        source: GitError,
    },
    /// No thread could be started to run the sync.
    #[error("failed to start sync of {url}: {source}")]
    WorkerUnavailable {
        url: String,
        #[source]
        source: io::Error,
    },
    /// The synchronizer was given unusable settings.
    #[error("invalid sync configuration: {0}")]
    InvalidConfig(String),
}

/// What a sync did to bring the working copy up to date.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncAction {
    /// The working copy was absent and has been cloned.
    Cloned,
    /// The working copy existed and has been pulled.
    Pulled,
    /// Another sync held the lock; this caller only waited for it.
    Waited,
}

/// Result of a successful repository sync.
#[derive(Debug, Clone)]
pub struct SyncOutcome {
    pub url: String,
    pub identity: RepoIdentity,
    /// Filesystem path to the working copy.
    pub path: PathBuf,
    pub action: SyncAction,
}

/// Syncs single repositories into the cache root.
#[derive(Debug, Clone)]
pub struct RepoSynchronizer {
    config: SyncConfig,
}

impl RepoSynchronizer {
    /// Create a synchronizer, validating the configuration once.
    pub fn new(config: SyncConfig) -> Result<Self, SyncError> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    pub fn paths(&self) -> &CachePaths {
        self.config.paths()
    }

    /// Create the cache root if needed. Safe to call concurrently.
    pub fn ensure_cache_root(&self) -> Result<(), SyncError> {
        let root = self.config.cache_root();
        std::fs::create_dir_all(root).map_err(|source| {
            log::error!("Failed to create cache root {}: {}", root.display(), source);
            SyncError::CacheRootUnavailable {
                path: root.to_path_buf(),
                source,
            }
        })
    }

    /// Bring the working copy for `url` up to date and return where it is.
    pub fn sync(&self, url: &str) -> Result<SyncOutcome, SyncError> {
        log::debug!("Syncing repo: {}", url);

        self.ensure_cache_root()?;

        let identity =
            RepoIdentity::from_url(url).map_err(|source| SyncError::InvalidRepository {
                url: url.to_string(),
                source,
            })?;
        let path = self.paths().working_copy(&identity);
        let lock_path = self.paths().lock_path(&identity);
        let owner = LockOwner::current(url);

        loop {
            let marker = LockMarker::try_acquire(&lock_path, &owner).map_err(|source| {
                log::error!("Failed to create lock marker {}: {}", lock_path.display(), source);
                SyncError::LockUnavailable {
                    path: lock_path.clone(),
                    source,
                }
            })?;

            let Some(marker) = marker else {
                log::debug!("Lock marker exists: {}", lock_path.display());
                match self.wait_for_peer(&lock_path)? {
                    WaitOutcome::Released => {
                        log::debug!("Lock marker was removed: {}", lock_path.display());
                        return Ok(SyncOutcome {
                            url: url.to_string(),
                            identity,
                            path,
                            action: SyncAction::Waited,
                        });
                    }
                    // The previous owner died mid-sync; take over and redo it.
                    WaitOutcome::Reclaimed => continue,
                }
            };

            let result = self.update_working_copy(url, &identity, &path);
            drop(marker);

            let action = result?;
            log::info!("Synced {} ({:?}) at {}", url, action, path.display());
            return Ok(SyncOutcome {
                url: url.to_string(),
                identity,
                path,
                action,
            });
        }
    }

    fn wait_for_peer(&self, lock_path: &Path) -> Result<WaitOutcome, SyncError> {
        let timeout = self.config.lock_timeout();
        match wait_for_release(
            lock_path,
            self.config.poll_interval(),
            timeout,
            self.config.reclaim_stale_locks(),
        ) {
            Ok(outcome) => Ok(outcome),
            Err(e) if e.kind() == io::ErrorKind::TimedOut => Err(SyncError::LockTimeout {
                path: lock_path.to_path_buf(),
                waited: timeout.unwrap_or_default(),
            }),
            Err(source) => Err(SyncError::LockUnavailable {
                path: lock_path.to_path_buf(),
                source,
            }),
        }
    }

    /// Clone or pull, then checkout. Must be called with the lock held.
    fn update_working_copy(
        &self,
        url: &str,
        identity: &RepoIdentity,
        path: &Path,
    ) -> Result<SyncAction, SyncError> {
        let git = self.config.git();

        let action = if path.exists() {
            self.check_origin(url, identity, path)?;

            log::debug!("Repo exists, pulling: {}", url);
            git.pull(path).map_err(|source| {
                log::error!("Failed to pull repo {}: {}", url, source);
                SyncError::PullFailed {
                    url: url.to_string(),
                    path: path.to_path_buf(),
                    source,
                }
            })?;
            SyncAction::Pulled
        } else {
            log::debug!("Repo does not exist, cloning: {}", url);
            git.clone(url, path).map_err(|source| {
                log::error!("Failed to clone repo {}: {}", url, source);
                SyncError::CloneFailed {
                    url: url.to_string(),
                    path: path.to_path_buf(),
                    source,
                }
            })?;
            SyncAction::Cloned
        };

        log::debug!("Checking out latest commit: {}", url);
        git.checkout(path, self.config.checkout_ref())
            .map_err(|source| {
                log::error!("Failed to checkout repo {}: {}", url, source);
                SyncError::CheckoutFailed {
                    url: url.to_string(),
                    path: path.to_path_buf(),
                    source,
                }
            })?;

        Ok(action)
    }

    /// Refuse to pull into a working copy that was cloned from another URL.
    fn check_origin(
        &self,
        url: &str,
        identity: &RepoIdentity,
        path: &Path,
    ) -> Result<(), SyncError> {
        match origin_url(path) {
            Ok(Some(existing)) if existing != url => {
                log::error!(
                    "Working copy {} belongs to {}, not {}",
                    path.display(),
                    existing,
                    url
                );
                Err(SyncError::IdentityCollision {
                    identity: identity.to_string(),
                    existing,
                    requested: url.to_string(),
                })
            }
            Ok(_) => Ok(()),
            // Not readable as a repository; let pull report the real problem.
            Err(e) => {
                log::debug!("Could not read origin of {}: {}", path.display(), e);
                Ok(())
            }
        }
    }
}
