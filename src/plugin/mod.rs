//! Config management plugin commands: `init` syncs and stages the git
//! libraries, `generate` renders the application with jsonnet.

mod generate;
mod init;
mod params;

pub use generate::{jsonnet_args, run_generate};
pub use init::run_init;
pub use params::{PluginParams, app_parameters};

use std::path::PathBuf;
use std::process::ExitStatus;

use thiserror::Error;

use crate::stage::StageError;
use crate::sync::SyncErrors;

/// JSON list of plugin parameters set by the GitOps tool.
pub const PARAMETERS_ENV: &str = "ARGOCD_APP_PARAMETERS";

/// Short revision of the application being rendered.
pub const REVISION_ENV: &str = "ARGOCD_APP_REVISION_SHORT";

#[derive(Error, Debug)]
pub enum PluginError {
    #[error("{0} is not set")]
    MissingEnv(&'static str),
    #[error("invalid plugin parameters: {0}")]
    InvalidParameters(#[from] serde_json::Error),
    #[error("deployment revision is required ({REVISION_ENV} is not set)")]
    MissingRevision,
    #[error(transparent)]
    Sync(#[from] SyncErrors),
    #[error(transparent)]
    Stage(#[from] StageError),
    #[error("failed to run {}: {source}", program.display())]
    Spawn {
        program: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("{} exited with {status}", program.display())]
    Render { program: PathBuf, status: ExitStatus },
}
