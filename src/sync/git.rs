//! Git operations using a hybrid CLI + libgit2 approach.
//!
//! **CLI (with hardening) for operations that touch the network or the tree:**
//! - `clone` - `git clone -- <url> <dir>`
//! - `pull` - `git -C <dir> pull`
//! - `checkout` - `git -C <dir> checkout --force <ref>`
//!
//! The CLI picks up whatever credentials the local git installation is
//! configured with (ssh-agent, credential helpers, tokens in ~/.gitconfig).
//!
//! **libgit2 for read operations:**
//! - `open_repository` - clean API for opening existing repos
//! - `origin_url` - reads the `origin` remote of a working copy

use git2::Repository;
use std::ffi::OsString;
use std::path::Path;
use std::process::{Command, Output, Stdio};
use thiserror::Error;

/// Errors returned by git operations.
#[derive(Error, Debug)]
pub enum GitError {
    /// libgit2 reported an error.
    #[error("git operation failed: {0}")]
    Git(#[from] git2::Error),
    /// Repository path does not contain a git repo.
    #[error("repository not found at {0}")]
    NotFound(String),
    /// Clone failed.
    #[error("clone failed: {0}")]
    CloneError(String),
    /// Pull failed.
    #[error("pull failed: {0}")]
    PullError(String),
    /// Checkout failed.
    #[error("checkout failed: {0}")]
    CheckoutError(String),
    /// Underlying IO error, typically git not being installed.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    /// Invalid inputs were provided.
    #[error("invalid input: {0}")]
    InvalidInput(String),
}

/// Validate that a git ref does not contain dangerous patterns.
///
/// Rejects:
/// - Empty strings
/// - Strings containing `..` (path traversal)
/// - Strings starting with `-` (could be interpreted as flags)
/// - Strings containing null bytes or control characters
pub(crate) fn validate_git_ref(value: &str, name: &str) -> Result<(), GitError> {
    if value.is_empty() {
        return Err(GitError::InvalidInput(format!("{} cannot be empty", name)));
    }
    if value.contains("..") {
        return Err(GitError::InvalidInput(format!(
            "{} cannot contain '..'",
            name
        )));
    }
    if value.starts_with('-') {
        return Err(GitError::InvalidInput(format!(
            "{} cannot start with '-'",
            name
        )));
    }
    if value.bytes().any(|b| b < 0x20) {
        return Err(GitError::InvalidInput(format!(
            "{} cannot contain null or control characters",
            name
        )));
    }
    Ok(())
}

/// Validate that a repository URL cannot be mistaken for an option.
fn validate_url(url: &str) -> Result<(), GitError> {
    if url.is_empty() {
        return Err(GitError::InvalidInput("url cannot be empty".to_string()));
    }
    if url.starts_with('-') {
        return Err(GitError::InvalidInput(
            "url cannot start with '-'".to_string(),
        ));
    }
    if url.bytes().any(|b| b < 0x20) {
        return Err(GitError::InvalidInput(
            "url cannot contain null or control characters".to_string(),
        ));
    }
    Ok(())
}

fn stderr_message(output: &Output) -> String {
    let stderr = String::from_utf8_lossy(&output.stderr);
    let stderr = stderr.trim();
    if stderr.is_empty() {
        format!("git exited with {}", output.status)
    } else {
        stderr.to_string()
    }
}

/// Git CLI wrapper with security hardening.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GitCli {
    git_path: OsString,
}

impl Default for GitCli {
    fn default() -> Self {
        Self::new()
    }
}

impl GitCli {
    /// Create a new GitCli instance using the system git.
    pub fn new() -> Self {
        Self::with_program("git")
    }

    /// Create a GitCli that runs a specific git executable.
    pub fn with_program(git_path: impl Into<OsString>) -> Self {
        Self {
            git_path: git_path.into(),
        }
    }

    /// The git executable this instance runs.
    pub fn program(&self) -> &std::ffi::OsStr {
        &self.git_path
    }

    /// Create a hardened Command with security settings.
    ///
    /// Applies:
    /// - `GIT_TERMINAL_PROMPT=0` - disable interactive prompts
    /// - `core.hooksPath=` - disable hooks execution
    fn command(&self) -> Command {
        let mut cmd = Command::new(&self.git_path);
        cmd.env("GIT_TERMINAL_PROMPT", "0");
        cmd.args(["-c", "core.hooksPath="]);
        cmd.stdin(Stdio::null());
        cmd
    }

    /// Clone `url` into `dest`.
    ///
    /// A partially created `dest` is removed on failure, unless it existed
    /// before the clone started.
    pub fn clone(&self, url: &str, dest: &Path) -> Result<(), GitError> {
        validate_url(url)?;

        let dest_existed = dest.exists();

        let output = self
            .command()
            .arg("clone")
            .arg("--")
            .arg(url)
            .arg(dest)
            .output()?;

        if !output.status.success() {
            if !dest_existed {
                let _ = std::fs::remove_dir_all(dest);
            }
            return Err(GitError::CloneError(stderr_message(&output)));
        }

        Ok(())
    }

    /// Pull updates into the working copy at `dir`.
    pub fn pull(&self, dir: &Path) -> Result<(), GitError> {
        let output = self.command().arg("-C").arg(dir).arg("pull").output()?;

        if !output.status.success() {
            return Err(GitError::PullError(stderr_message(&output)));
        }

        Ok(())
    }

    /// Check out `reference` in the working copy at `dir`, discarding local
    /// changes to tracked files.
    pub fn checkout(&self, dir: &Path, reference: &str) -> Result<(), GitError> {
        validate_git_ref(reference, "reference")?;

        let output = self
            .command()
            .arg("-C")
            .arg(dir)
            .arg("checkout")
            .arg("--force")
            .arg(reference)
            .output()?;

        if !output.status.success() {
            return Err(GitError::CheckoutError(stderr_message(&output)));
        }

        Ok(())
    }

    /// Returns true if the git executable can be run.
    pub fn is_available(&self) -> bool {
        Command::new(&self.git_path)
            .arg("--version")
            .stdin(Stdio::null())
            .output()
            .map(|o| o.status.success())
            .unwrap_or(false)
    }
}

/// Open an existing repository at the given path.
pub fn open_repository(path: &Path) -> Result<Repository, GitError> {
    let repo = Repository::open(path).map_err(|e| {
        if e.code() == git2::ErrorCode::NotFound {
            GitError::NotFound(path.display().to_string())
        } else {
            GitError::Git(e)
        }
    })?;
    Ok(repo)
}

/// Read the URL of the `origin` remote of the repository at `path`.
/// Returns None if there is no `origin` remote.
pub fn origin_url(path: &Path) -> Result<Option<String>, GitError> {
    let repo = open_repository(path)?;
    let remote = match repo.find_remote("origin") {
        Ok(remote) => remote,
        Err(e) if e.code() == git2::ErrorCode::NotFound => return Ok(None),
        Err(e) => return Err(GitError::Git(e)),
    };
    Ok(remote.url().map(str::to_string))
}
