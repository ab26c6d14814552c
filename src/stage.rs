//! Revision-scoped workspace of symlinks to synced working copies.
//!
//! The renderer gets a single library search path, `<system-temp>/konn-<rev>`,
//! holding one symlink per repository. The directory is rebuilt from scratch
//! on every call.

use std::collections::HashSet;
use std::io;
use std::os::unix::fs::symlink;
use std::path::{Path, PathBuf};

use thiserror::Error;

/// Prefix of the staged workspace directory name.
pub const STAGE_PREFIX: &str = "konn";

/// Errors returned while staging a workspace.
#[derive(Error, Debug)]
pub enum StageError {
    #[error("invalid deployment revision {0:?}")]
    InvalidRevision(String),
    #[error("failed to remove stale workspace {}: {source}", path.display())]
    Remove {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to create workspace {}: {source}", path.display())]
    Create {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("working copy path {} has no directory name", .0.display())]
    MissingName(PathBuf),
    #[error("failed to link {} -> {}: {source}", link.display(), target.display())]
    Symlink {
        link: PathBuf,
        target: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Path of the staged workspace for `revision` under the system temp dir.
pub fn staged_workspace_dir(revision: &str) -> Result<PathBuf, StageError> {
    staged_workspace_dir_in(&std::env::temp_dir(), revision)
}

/// Path of the staged workspace for `revision` under `base`.
pub fn staged_workspace_dir_in(base: &Path, revision: &str) -> Result<PathBuf, StageError> {
    if revision.is_empty()
        || revision == "."
        || revision.contains("..")
        || revision.contains('/')
        || revision.contains('\\')
        || revision.chars().any(char::is_control)
    {
        return Err(StageError::InvalidRevision(revision.to_string()));
    }
    Ok(base.join(format!("{}-{}", STAGE_PREFIX, revision)))
}

/// Recreate `dir` with one symlink per working copy, named after the working
/// copy's directory. Anything already in `dir` is removed first.
pub fn stage_workspace(dir: &Path, working_copies: &[PathBuf]) -> Result<(), StageError> {
    log::debug!("Creating staged workspace {}", dir.display());

    remove_existing(dir)?;

    std::fs::create_dir_all(dir).map_err(|source| StageError::Create {
        path: dir.to_path_buf(),
        source,
    })?;

    let mut linked = HashSet::new();
    for working_copy in working_copies {
        let name = working_copy
            .file_name()
            .ok_or_else(|| StageError::MissingName(working_copy.clone()))?;
        if !linked.insert(name.to_os_string()) {
            // Same repository listed twice
            continue;
        }

        let target = std::path::absolute(working_copy).map_err(|source| StageError::Symlink {
            link: dir.join(name),
            target: working_copy.clone(),
            source,
        })?;
        let link = dir.join(name);

        log::debug!("Creating symlink {} -> {}", link.display(), target.display());
        symlink(&target, &link).map_err(|source| StageError::Symlink {
            link,
            target,
            source,
        })?;
    }

    Ok(())
}

fn remove_existing(dir: &Path) -> Result<(), StageError> {
    let metadata = match std::fs::symlink_metadata(dir) {
        Ok(metadata) => metadata,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
        Err(source) => {
            return Err(StageError::Remove {
                path: dir.to_path_buf(),
                source,
            });
        }
    };

    log::warn!("Staged workspace {} already exists, removing it", dir.display());

    // Never follows symlinks, so working copies behind the links survive
    let result = if metadata.is_dir() {
        std::fs::remove_dir_all(dir)
    } else {
        std::fs::remove_file(dir)
    };
    result.map_err(|source| StageError::Remove {
        path: dir.to_path_buf(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn names(dir: &Path) -> Vec<String> {
        let mut names: Vec<String> = fs::read_dir(dir)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        names
    }

    fn working_copy(root: &Path, name: &str) -> PathBuf {
        let path = root.join("cache").join(name);
        fs::create_dir_all(&path).unwrap();
        fs::write(path.join("main.libsonnet"), "{}").unwrap();
        path
    }

    #[test]
    fn test_dir_name_uses_prefix_and_revision() {
        let dir = staged_workspace_dir_in(Path::new("/tmp"), "abc123").unwrap();
        assert_eq!(dir, PathBuf::from("/tmp/konn-abc123"));
        assert!(staged_workspace_dir("abc123")
            .unwrap()
            .starts_with(std::env::temp_dir()));
    }

    #[test]
    fn test_invalid_revisions_rejected() {
        for revision in ["", ".", "..", "../x", "a/b", "a\\b", "a\nb"] {
            assert!(
                matches!(
                    staged_workspace_dir_in(Path::new("/tmp"), revision),
                    Err(StageError::InvalidRevision(_))
                ),
                "revision {revision:?} should be rejected"
            );
        }
    }

    #[test]
    fn test_stage_creates_symlinks() {
        let temp_dir = TempDir::new().unwrap();
        let lib_a = working_copy(temp_dir.path(), "lib-a");
        let lib_b = working_copy(temp_dir.path(), "lib-b");
        let dir = temp_dir.path().join("konn-abc123");

        stage_workspace(&dir, &[lib_a.clone(), lib_b.clone()]).unwrap();

        assert_eq!(names(&dir), vec!["lib-a", "lib-b"]);
        assert!(dir.join("lib-a").is_symlink());
        assert_eq!(fs::read_link(dir.join("lib-a")).unwrap(), lib_a);
        assert_eq!(fs::read_link(dir.join("lib-b")).unwrap(), lib_b);
        assert!(dir.join("lib-b").join("main.libsonnet").exists());
    }

    #[test]
    fn test_stage_rebuild_drops_stale_entries() {
        let temp_dir = TempDir::new().unwrap();
        let lib_a = working_copy(temp_dir.path(), "lib-a");
        let lib_b = working_copy(temp_dir.path(), "lib-b");
        let dir = temp_dir.path().join("konn-abc123");

        stage_workspace(&dir, &[lib_a.clone(), lib_b.clone()]).unwrap();
        fs::write(dir.join("leftover.txt"), "stale").unwrap();

        stage_workspace(&dir, &[lib_b.clone()]).unwrap();

        assert_eq!(names(&dir), vec!["lib-b"]);
        // Removing the old links must not touch the working copies
        assert!(lib_a.join("main.libsonnet").exists());
    }

    #[test]
    fn test_stage_replaces_plain_file() {
        let temp_dir = TempDir::new().unwrap();
        let lib_a = working_copy(temp_dir.path(), "lib-a");
        let dir = temp_dir.path().join("konn-abc123");
        fs::write(&dir, "not a directory").unwrap();

        stage_workspace(&dir, &[lib_a]).unwrap();
        assert!(dir.is_dir());
        assert_eq!(names(&dir), vec!["lib-a"]);
    }

    #[test]
    fn test_stage_skips_duplicate_working_copies() {
        let temp_dir = TempDir::new().unwrap();
        let lib_a = working_copy(temp_dir.path(), "lib-a");
        let dir = temp_dir.path().join("konn-abc123");

        stage_workspace(&dir, &[lib_a.clone(), lib_a]).unwrap();
        assert_eq!(names(&dir), vec!["lib-a"]);
    }

    #[test]
    fn test_stage_rejects_nameless_path() {
        let temp_dir = TempDir::new().unwrap();
        let dir = temp_dir.path().join("konn-abc123");
        let err = stage_workspace(&dir, &[PathBuf::from("/")]).unwrap_err();
        assert!(matches!(err, StageError::MissingName(_)));
    }
}
