//! Fleet synchronizer: runs one repository sync per URL concurrently.
//!
//! Each URL gets its own thread. Results come back over a channel tagged with
//! the URL's index and are reassembled in input order once every thread has
//! finished. Any failure fails the whole batch, and every failure is reported.

use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::thread;

use crossbeam_channel::unbounded;

use super::identity::RepoIdentity;
use super::repo::{RepoSynchronizer, SyncError, SyncOutcome};

/// One or more repository sync failures, in input order.
#[derive(Debug)]
pub struct SyncErrors(Vec<SyncError>);

impl SyncErrors {
    /// Returns None for an empty list; the type is never empty.
    fn from_vec(errors: Vec<SyncError>) -> Option<Self> {
        if errors.is_empty() {
            None
        } else {
            Some(Self(errors))
        }
    }

    pub fn errors(&self) -> &[SyncError] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn into_inner(self) -> Vec<SyncError> {
        self.0
    }
}

impl From<SyncError> for SyncErrors {
    fn from(error: SyncError) -> Self {
        Self(vec![error])
    }
}

impl fmt::Display for SyncErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let [error] = self.0.as_slice() {
            return write!(f, "{}", error);
        }
        write!(f, "failed to sync {} repositories:", self.0.len())?;
        for error in &self.0 {
            write!(f, "\n  - {}", error)?;
        }
        Ok(())
    }
}

impl std::error::Error for SyncErrors {}

/// Syncs a list of repositories concurrently.
#[derive(Debug, Clone)]
pub struct FleetSynchronizer {
    repo: RepoSynchronizer,
}

impl FleetSynchronizer {
    pub fn new(repo: RepoSynchronizer) -> Self {
        Self { repo }
    }

    pub fn repo(&self) -> &RepoSynchronizer {
        &self.repo
    }

    /// Sync every URL and return the working copy paths in input order.
    pub fn sync_all<S>(&self, urls: &[S]) -> Result<Vec<PathBuf>, SyncErrors>
    where
        S: AsRef<str> + Sync,
    {
        let outcomes = self.sync_all_outcomes(urls)?;
        Ok(outcomes.into_iter().map(|o| o.path).collect())
    }

    /// Sync every URL and return the full outcome for each, in input order.
    pub fn sync_all_outcomes<S>(&self, urls: &[S]) -> Result<Vec<SyncOutcome>, SyncErrors>
    where
        S: AsRef<str> + Sync,
    {
        if urls.is_empty() {
            return Ok(Vec::new());
        }
        log::debug!("Syncing {} repos", urls.len());

        // Fatal for the whole batch
        self.repo.ensure_cache_root()?;

        if let Some(collisions) = SyncErrors::from_vec(find_collisions(urls)) {
            log::error!("Failed to sync repos: {}", collisions);
            return Err(collisions);
        }

        let (sender, receiver) = unbounded();
        thread::scope(|scope| {
            for (index, url) in urls.iter().enumerate() {
                let worker_sender = sender.clone();
                let repo = &self.repo;
                let spawned = thread::Builder::new()
                    .name(format!("konn-sync-{}", index))
                    .spawn_scoped(scope, move || {
                        let result = repo.sync(url.as_ref());
                        let _ = worker_sender.send((index, result));
                    });
                if let Err(source) = spawned {
                    log::error!("Failed to spawn sync thread for {}: {}", url.as_ref(), source);
                    let _ = sender.send((index, Err(spawn_failed(url.as_ref(), source))));
                }
            }
        });
        drop(sender);

        let mut slots: Vec<Option<SyncOutcome>> = urls.iter().map(|_| None).collect();
        let mut failures = Vec::new();
        for (index, result) in receiver.iter() {
            match result {
                Ok(outcome) => slots[index] = Some(outcome),
                Err(e) => failures.push((index, e)),
            }
        }

        failures.sort_by_key(|(index, _)| *index);
        let failures = failures.into_iter().map(|(_, e)| e).collect();
        if let Some(errors) = SyncErrors::from_vec(failures) {
            log::error!("Failed to sync repos: {}", errors);
            return Err(errors);
        }

        Ok(slots.into_iter().flatten().collect())
    }
}

fn spawn_failed(url: &str, source: std::io::Error) -> SyncError {
    SyncError::WorkerUnavailable {
        url: url.to_string(),
        source,
    }
}

/// Distinct URLs that would share a working copy. Identical URLs are fine;
/// URLs without a valid identity are left for the per-repository sync to report.
fn find_collisions<S: AsRef<str>>(urls: &[S]) -> Vec<SyncError> {
    let mut seen: HashMap<RepoIdentity, &str> = HashMap::new();
    let mut collisions = Vec::new();

    for url in urls {
        let url = url.as_ref();
        let Ok(identity) = RepoIdentity::from_url(url) else {
            continue;
        };
        match seen.get(&identity).copied() {
            Some(existing) if existing != url => collisions.push(SyncError::IdentityCollision {
                identity: identity.to_string(),
                existing: existing.to_string(),
                requested: url.to_string(),
            }),
            Some(_) => {}
            None => {
                seen.insert(identity, url);
            }
        }
    }

    collisions
}
