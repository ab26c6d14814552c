//! Filesystem-visible lock markers.
//!
//! A marker file at `<cache-root>/<identity>.lock` means some process is
//! syncing that working copy. Its existence is the lock; it is removed by the
//! owner when the sync finishes, successfully or not.
//!
//! The owner also holds an exclusive advisory OS lock (`flock`) on the marker
//! for as long as it exists. The OS drops that lock when the owning process
//! dies, so a waiter that manages to take it has proof the marker is stale.
//! To keep that proof sound the marker is published already locked: it is
//! written and locked under a unique staging name, then hard-linked to the
//! marker name. The hard link fails if the marker exists, which makes
//! check-and-create a single step.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::os::unix::fs::MetadataExt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use fs2::FileExt;
use serde::{Deserialize, Serialize};

/// Counter for unique staging file names within a process
static STAGING_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Who holds a lock marker. Serialized as JSON into the marker file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockOwner {
    pub pid: u32,
    pub url: String,
    /// Unix timestamp (seconds) at which the marker was created.
    pub acquired_at: u64,
}

impl LockOwner {
    /// Describe the current process as the owner of a sync for `url`.
    pub fn current(url: &str) -> Self {
        let acquired_at = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);
        Self {
            pid: std::process::id(),
            url: url.to_string(),
            acquired_at,
        }
    }
}

/// How a wait on someone else's marker ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    /// The owner removed the marker.
    Released,
    /// The owner was dead; the stale marker has been removed by the waiter.
    Reclaimed,
}

/// A held lock marker. The marker file is removed when dropped.
#[derive(Debug)]
pub struct LockMarker {
    path: PathBuf,
    file: File,
}

impl LockMarker {
    /// Try to create the marker at `lock_path` without blocking.
    /// Returns None if the marker already exists.
    pub fn try_acquire(lock_path: &Path, owner: &LockOwner) -> io::Result<Option<Self>> {
        let (staging_path, mut file) = create_staging_file(lock_path)?;
        let published = publish(&mut file, &staging_path, lock_path, owner);
        let _ = fs::remove_file(&staging_path);

        match published {
            Ok(()) => Ok(Some(Self {
                path: lock_path.to_path_buf(),
                file,
            })),
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Path of the marker file.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for LockMarker {
    fn drop(&mut self) {
        // Unlink before unlocking so a waiter never sees an unlocked marker
        // that is still in place.
        if let Err(e) = fs::remove_file(self.path()) {
            if e.kind() != io::ErrorKind::NotFound {
                log::warn!(
                    "Failed to remove lock marker {}: {}",
                    self.path().display(),
                    e
                );
            }
        }
        let _ = self.file.unlock();
    }
}

fn create_staging_file(lock_path: &Path) -> io::Result<(PathBuf, File)> {
    let name = lock_path.file_name().ok_or_else(|| {
        io::Error::new(io::ErrorKind::InvalidInput, "lock path has no file name")
    })?;

    loop {
        // {marker}.{pid}.{counter}.tmp is unique across threads and processes.
        // Retry if a prior crash left the same name behind.
        let counter = STAGING_COUNTER.fetch_add(1, Ordering::Relaxed);
        let mut staging_name = name.to_os_string();
        staging_name.push(format!(".{}.{}.tmp", std::process::id(), counter));
        let staging_path = lock_path.with_file_name(staging_name);

        match OpenOptions::new()
            .read(true)
            .write(true)
            .create_new(true)
            .open(&staging_path)
        {
            Ok(file) => return Ok((staging_path, file)),
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => continue,
            Err(e) => return Err(e),
        }
    }
}

fn publish(
    file: &mut File,
    staging_path: &Path,
    lock_path: &Path,
    owner: &LockOwner,
) -> io::Result<()> {
    file.try_lock_exclusive()?;
    serde_json::to_writer(&mut *file, owner)?;
    file.flush()?;
    fs::hard_link(staging_path, lock_path)
}

/// Read the owner recorded in a marker.
/// Returns None if the marker is gone or its contents are not an owner record.
pub fn read_owner(lock_path: &Path) -> io::Result<Option<LockOwner>> {
    let contents = match fs::read(lock_path) {
        Ok(contents) => contents,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e),
    };
    Ok(serde_json::from_slice(&contents).ok())
}

/// Block until the marker at `lock_path` disappears, polling every
/// `poll_interval`.
///
/// With `reclaim_stale`, a marker whose owner has died is removed and
/// `Reclaimed` is returned; otherwise a stale marker is waited on like any
/// other. Returns an error with `ErrorKind::TimedOut` once `timeout` elapses;
/// `None` waits forever.
pub fn wait_for_release(
    lock_path: &Path,
    poll_interval: Duration,
    timeout: Option<Duration>,
    reclaim_stale: bool,
) -> io::Result<WaitOutcome> {
    let start = Instant::now();
    let mut stale_reported = false;

    loop {
        match probe(lock_path, reclaim_stale)? {
            Probe::Absent => return Ok(WaitOutcome::Released),
            Probe::Reclaimed => {
                log::warn!("Reclaimed stale lock marker {}", lock_path.display());
                return Ok(WaitOutcome::Reclaimed);
            }
            Probe::Stale if !stale_reported => {
                log::warn!(
                    "Lock marker {} has no live owner; waiting for manual removal",
                    lock_path.display()
                );
                stale_reported = true;
            }
            Probe::Stale | Probe::Held => {}
        }

        if let Some(timeout) = timeout {
            if start.elapsed() >= timeout {
                return Err(io::Error::new(
                    io::ErrorKind::TimedOut,
                    format!("lock wait timed out after {:?}", timeout),
                ));
            }
        }
        thread::sleep(poll_interval);
    }
}

enum Probe {
    Absent,
    Held,
    Stale,
    Reclaimed,
}

fn probe(lock_path: &Path, reclaim_stale: bool) -> io::Result<Probe> {
    let file = match File::open(lock_path) {
        Ok(file) => file,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Probe::Absent),
        Err(e) => return Err(e),
    };

    match file.try_lock_exclusive() {
        Ok(()) => {}
        Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(Probe::Held),
        Err(e) => return Err(e),
    }

    // We hold the OS lock on the inode we opened. It only proves staleness if
    // that inode is still the one linked at the marker path.
    let opened = file.metadata()?;
    let current = match fs::metadata(lock_path) {
        Ok(meta) => meta,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Probe::Absent),
        Err(e) => return Err(e),
    };
    if opened.dev() != current.dev() || opened.ino() != current.ino() {
        return Ok(Probe::Held);
    }

    if !reclaim_stale {
        return Ok(Probe::Stale);
    }

    // Removal happens while the OS lock is held, so competing reclaimers
    // serialize here and the later ones see a different inode or no file.
    match fs::remove_file(lock_path) {
        Ok(()) => Ok(Probe::Reclaimed),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(Probe::Absent),
        Err(e) => Err(e),
    }
}
