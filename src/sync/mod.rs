//! Git repository synchronizer

mod config;
mod fleet;
mod git;
mod identity;
mod lock;
mod paths;
mod repo;
#[cfg(test)]
pub(crate) mod testing;

pub use config::SyncConfig;
pub use fleet::{FleetSynchronizer, SyncErrors};
pub use git::{GitCli, GitError};
pub use identity::{IdentityError, RepoIdentity};
pub use lock::{LockOwner, read_owner};
pub use paths::{CachePaths, REPO_PATH_ENV};
pub use repo::{RepoSynchronizer, SyncAction, SyncError, SyncOutcome};
