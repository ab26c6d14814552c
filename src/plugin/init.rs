use std::path::{Path, PathBuf};

use super::{PluginError, PluginParams};
use crate::stage::{stage_workspace, staged_workspace_dir_in};
use crate::sync::FleetSynchronizer;

/// Sync every git library and stage them for `revision`.
///
/// Returns the staged workspace, or None when there are no git libraries.
pub fn run_init(
    params: &PluginParams,
    fleet: &FleetSynchronizer,
    revision: Option<&str>,
) -> Result<Option<PathBuf>, PluginError> {
    let revision = require_revision(revision)?;
    let git_repos = params.git_repos();
    log::debug!("Matched git repos from libs: {:?}", git_repos);

    sync_and_stage(fleet, &git_repos, revision, &std::env::temp_dir())
}

pub(super) fn require_revision(revision: Option<&str>) -> Result<&str, PluginError> {
    revision
        .filter(|r| !r.is_empty())
        .ok_or(PluginError::MissingRevision)
}

fn sync_and_stage(
    fleet: &FleetSynchronizer,
    urls: &[&str],
    revision: &str,
    stage_base: &Path,
) -> Result<Option<PathBuf>, PluginError> {
    // Bad revisions fail before any clone
    let dir = staged_workspace_dir_in(stage_base, revision)?;

    let paths = fleet.sync_all(urls)?;
    if paths.is_empty() {
        return Ok(None);
    }

    stage_workspace(&dir, &paths)?;
    log::info!("Staged {} repos in {}", paths.len(), dir.display());
    Ok(Some(dir))
}
