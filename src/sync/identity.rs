//! Repository identity resolution.
//!
//! A repository's identity is the name of its working copy directory under the
//! cache root. It is derived from the URL alone (last path segment, `.git`
//! stripped) so a later invocation finds the working copy an earlier one left.

use std::fmt;

use thiserror::Error;

/// Error type for identity resolution failures
#[derive(Debug, Error, PartialEq, Eq)]
pub enum IdentityError {
    #[error("repository url cannot be empty")]
    EmptyUrl,
    #[error("repository url has no name segment")]
    MissingName,
    #[error("'{0}' is not a usable directory name")]
    ReservedName(String),
    #[error("invalid character in repository name: {0:?}")]
    InvalidCharacter(char),
    #[error("repository name cannot start with '-'")]
    InvalidStart,
}

/// Local directory name of a repository's working copy.
///
/// Validation rules:
/// - Non-empty, and not `.` or `..`
/// - No path separators, NUL or control characters
/// - Cannot start with a hyphen
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RepoIdentity(String);

impl RepoIdentity {
    /// Derive the identity of a repository URL.
    ///
    /// Takes the text after the final `/` (or after the `:` of an scp-style
    /// `git@host:repo` URL that has no `/`), then strips a trailing `.git`.
    /// Trailing slashes are ignored.
    pub fn from_url(url: &str) -> Result<Self, IdentityError> {
        let trimmed = url.trim().trim_end_matches('/');
        if trimmed.is_empty() {
            return Err(IdentityError::EmptyUrl);
        }

        let segment = match trimmed.rfind('/') {
            Some(idx) => &trimmed[idx + 1..],
            None => match trimmed.rfind(':') {
                Some(idx) => &trimmed[idx + 1..],
                None => trimmed,
            },
        };

        let name = segment.strip_suffix(".git").unwrap_or(segment);
        Self::validate(name)?;

        Ok(Self(name.to_string()))
    }

    fn validate(name: &str) -> Result<(), IdentityError> {
        if name.is_empty() {
            return Err(IdentityError::MissingName);
        }
        if name == "." || name == ".." {
            return Err(IdentityError::ReservedName(name.to_string()));
        }
        if name.starts_with('-') {
            return Err(IdentityError::InvalidStart);
        }
        if let Some(c) = name.chars().find(|c| *c == '\\' || c.is_control()) {
            return Err(IdentityError::InvalidCharacter(c));
        }
        Ok(())
    }

    /// Returns the identity as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RepoIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
