pub mod plugin;
pub mod stage;
pub mod sync;

use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::{Args, Parser, Subcommand};

use crate::plugin::{PluginParams, REVISION_ENV, app_parameters};
use crate::sync::{CachePaths, FleetSynchronizer, REPO_PATH_ENV, RepoSynchronizer, SyncConfig};

#[derive(Parser)]
#[command(
    name = "konn-jsonnet",
    about = "Jsonnet config management plugin with shared git library cache"
)]
struct Cli {
    #[command(flatten)]
    sync: SyncArgs,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct SyncArgs {
    /// Directory holding the cached working copies
    #[arg(long, global = true, env = REPO_PATH_ENV)]
    cache_root: Option<PathBuf>,

    /// Maximum seconds to wait for another sync of the same repo (0 waits forever)
    #[arg(long, global = true, default_value_t = 300)]
    lock_timeout_secs: u64,

    /// Keep lock markers left behind by dead processes instead of taking them over
    #[arg(long, global = true)]
    no_reclaim: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Sync git libraries and stage them for the current revision
    Init {
        #[arg(long, env = REVISION_ENV)]
        revision: Option<String>,
    },

    /// Render the application manifest to stdout
    Generate {
        #[arg(long, env = REVISION_ENV)]
        revision: Option<String>,

        /// jsonnet executable
        #[arg(long, default_value = "jsonnet")]
        jsonnet: PathBuf,
    },

    /// Sync repositories and print their working copy paths
    Sync {
        /// Repository URLs
        #[arg(required = true)]
        urls: Vec<String>,
    },

    /// Stage working copies for a revision
    Stage {
        #[arg(long)]
        revision: String,

        /// Working copy paths
        paths: Vec<PathBuf>,
    },

    /// Check dependencies
    Doctor,
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::new().filter_or("LOG_LEVEL", "info")).init();

    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Init { revision } => cmd_init(&cli.sync, revision.as_deref()),
        Commands::Generate { revision, jsonnet } => {
            cmd_generate(revision.as_deref(), &jsonnet)
        }
        Commands::Sync { urls } => cmd_sync(&cli.sync, &urls),
        Commands::Stage { revision, paths } => cmd_stage(&revision, &paths),
        Commands::Doctor => cmd_doctor(&cli.sync),
    };

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

impl SyncArgs {
    fn config(&self) -> SyncConfig {
        // An empty REPO_PATH counts as unset
        let config = match self.cache_root.as_ref().filter(|p| !p.as_os_str().is_empty()) {
            Some(root) => SyncConfig::new(root),
            None => SyncConfig::default(),
        };
        let lock_timeout = match self.lock_timeout_secs {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        };
        config
            .with_lock_timeout(lock_timeout)
            .with_reclaim_stale_locks(!self.no_reclaim)
    }

    fn fleet(&self) -> Result<FleetSynchronizer, Box<dyn std::error::Error>> {
        Ok(FleetSynchronizer::new(RepoSynchronizer::new(
            self.config(),
        )?))
    }
}

fn plugin_params() -> Result<PluginParams, Box<dyn std::error::Error>> {
    let params = PluginParams::from_parameters(&app_parameters()?);
    log::debug!("Plugin params: {}", serde_json::to_string(&params)?);
    Ok(params)
}

fn cmd_init(args: &SyncArgs, revision: Option<&str>) -> Result<(), Box<dyn std::error::Error>> {
    let params = plugin_params()?;
    let fleet = args.fleet()?;
    if let Some(dir) = plugin::run_init(&params, &fleet, revision)? {
        log::debug!("Libraries staged in {}", dir.display());
    }
    Ok(())
}

fn cmd_generate(revision: Option<&str>, jsonnet: &Path) -> Result<(), Box<dyn std::error::Error>> {
    let params = plugin_params()?;
    plugin::run_generate(&params, revision, jsonnet)?;
    Ok(())
}

fn cmd_sync(args: &SyncArgs, urls: &[String]) -> Result<(), Box<dyn std::error::Error>> {
    let fleet = args.fleet()?;
    for path in fleet.sync_all(urls)? {
        println!("{}", path.display());
    }
    Ok(())
}

fn cmd_stage(revision: &str, paths: &[PathBuf]) -> Result<(), Box<dyn std::error::Error>> {
    let dir = stage::staged_workspace_dir(revision)?;
    stage::stage_workspace(&dir, paths)?;
    println!("{}", dir.display());
    Ok(())
}

fn cmd_doctor(args: &SyncArgs) -> Result<(), Box<dyn std::error::Error>> {
    println!("konn-jsonnet System Check\n");

    let config = args.config();

    let git_ok = config.git().is_available();
    println!(
        "[{}] git: {}",
        if git_ok { "OK" } else { "FAIL" },
        if git_ok { "available" } else { "not found" }
    );

    let jsonnet_ok = std::process::Command::new("jsonnet")
        .arg("--version")
        .output()
        .map(|o| o.status.success())
        .unwrap_or(false);
    println!(
        "[{}] jsonnet: {}",
        if jsonnet_ok { "OK" } else { "FAIL" },
        if jsonnet_ok { "available" } else { "not found" }
    );

    let paths = config.paths();
    let cache_ok = paths.root().is_dir();
    println!(
        "[{}] Cache root: {}",
        if cache_ok { "OK" } else { "INFO" },
        paths.root().display()
    );

    let leftover = leftover_lock_markers(paths);
    println!(
        "[{}] Lock markers: {}",
        if leftover.is_empty() { "OK" } else { "WARN" },
        if leftover.is_empty() {
            "none".to_string()
        } else {
            format!("{} present", leftover.len())
        }
    );
    for marker in &leftover {
        match sync::read_owner(marker) {
            Ok(Some(owner)) => println!(
                "      {} (pid {}, {})",
                marker.display(),
                owner.pid,
                owner.url
            ),
            _ => println!("      {}", marker.display()),
        }
    }

    let staging = leftover_staging_files(paths);
    if !staging.is_empty() {
        println!(
            "[WARN] Staging files: {} left by crashed syncs, safe to delete",
            staging.len()
        );
        for file in &staging {
            println!("      {}", file.display());
        }
    }

    if !git_ok || !jsonnet_ok {
        std::process::exit(1);
    }

    Ok(())
}

fn leftover_lock_markers(paths: &CachePaths) -> Vec<PathBuf> {
    cache_entries(paths, |p| paths.is_lock_marker(p))
}

fn leftover_staging_files(paths: &CachePaths) -> Vec<PathBuf> {
    cache_entries(paths, |p| paths.is_staging_leftover(p))
}

fn cache_entries(paths: &CachePaths, keep: impl Fn(&Path) -> bool) -> Vec<PathBuf> {
    let Ok(entries) = std::fs::read_dir(paths.root()) else {
        return Vec::new();
    };
    let mut found: Vec<PathBuf> = entries
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| keep(p))
        .collect();
    found.sort();
    found
}
