pub mod commands;
pub mod render;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;

use bootkit::config::AppConfig;
use bootkit::{Context, Orchestrator, Result};

#[derive(Parser)]
#[command(name = "bootkit")]
#[command(version)]
#[command(about = "Provision a self-contained runtime and start its backend")]
#[command(long_about = "Downloads an interpreter toolchain and a VCS client into <root>/environment, \
syncs the application source tree, installs its dependencies and starts the backend.\n\n\
Every step re-checks the disk first, so re-running after a failure resumes where it stopped.")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Application root (default: config `app_root`, else the executable's directory)
    #[arg(long, global = true, env = "BOOTKIT_ROOT")]
    pub root: Option<PathBuf>,

    /// Print progress events and results as JSON lines
    #[arg(long, global = true)]
    pub json: bool,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Show which parts of the environment are present
    Status,

    /// Install one component
    Install {
        #[command(subcommand)]
        command: InstallCommands,
    },

    /// Clone or update the application source tree
    Sync {
        /// Repository mirror key or URL (`ask` to choose)
        #[arg(long)]
        repo: Option<String>,

        /// Branch to clone
        #[arg(long)]
        branch: Option<String>,
    },

    /// Start the backend and wait until it is ready
    Start {
        /// Return once the backend is ready instead of following its output
        #[arg(long)]
        detach: bool,
    },

    /// Provision everything that is missing, then start the backend
    Bootstrap {
        #[arg(long)]
        toolchain_mirror: Option<String>,

        #[arg(long)]
        vcs_mirror: Option<String>,

        #[arg(long)]
        package_mirror: Option<String>,

        /// Repository mirror key or URL
        #[arg(long)]
        repo: Option<String>,

        /// Pull the source tree even if it is already present
        #[arg(long)]
        update: bool,

        /// Provision only; do not start the backend
        #[arg(long)]
        no_start: bool,

        /// Return once the backend is ready instead of following its output
        #[arg(long)]
        detach: bool,
    },

    /// Inspect mirrors
    Mirrors {
        #[command(subcommand)]
        command: MirrorCommands,
    },

    /// Check or request administrator privileges
    Elevate {
        #[command(subcommand)]
        command: ElevateCommands,
    },

    /// Manage configuration
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
}

#[derive(Subcommand)]
pub enum InstallCommands {
    /// Interpreter toolchain (and its package manager)
    Toolchain {
        /// Mirror key or URL (`ask` to choose)
        #[arg(short, long)]
        mirror: Option<String>,
    },

    /// Version-control client
    Vcs {
        /// Mirror key or URL (`ask` to choose)
        #[arg(short, long)]
        mirror: Option<String>,
    },

    /// Package manager for an already installed toolchain
    Pip,

    /// Application dependencies from the manifest
    Deps {
        /// Package index key or URL (`ask` to choose)
        #[arg(short, long)]
        mirror: Option<String>,
    },
}

#[derive(Subcommand)]
pub enum MirrorCommands {
    /// List mirrors of a kind (toolchain, vcs, packages, repository)
    List { kind: String },

    /// Measure latency of every mirror of a kind and sort by it
    Rank { kind: String },
}

#[derive(Subcommand)]
pub enum ElevateCommands {
    /// Report whether this process runs elevated
    Check,

    /// Relaunch this command elevated and exit
    Relaunch,
}

#[derive(Subcommand)]
pub enum ConfigCommands {
    /// Show current configuration
    Show,

    /// Set a configuration value
    Set {
        /// Configuration key
        key: String,
        /// Configuration value
        value: String,
    },

    /// Print the configuration file path
    Path,
}

impl Cli {
    pub async fn execute(self, cancel: CancellationToken) -> Result<()> {
        let json = self.json;

        if let Commands::Config { command } = &self.command {
            return match command {
                ConfigCommands::Show => commands::config::show(json),
                ConfigCommands::Set { key, value } => commands::config::set(key, value.clone()),
                ConfigCommands::Path => commands::config::path(),
            };
        }

        let mut config = AppConfig::load()?;
        if let Some(root) = &self.root {
            config.app_root = root.display().to_string();
        }
        if let Commands::Sync { branch: Some(branch), .. } = &self.command {
            config.branch = branch.clone();
        }
        let root = config.resolve_root()?;
        let orchestrator = Orchestrator::new(Context::new(config, root)?.with_cancel(cancel.clone()));

        match self.command {
            Commands::Status => commands::status::execute(&orchestrator, json),
            Commands::Install { command } => match command {
                InstallCommands::Toolchain { mirror } => {
                    commands::install::toolchain(&orchestrator, mirror, json).await
                }
                InstallCommands::Vcs { mirror } => commands::install::vcs(&orchestrator, mirror, json).await,
                InstallCommands::Pip => commands::install::package_manager(&orchestrator, json).await,
                InstallCommands::Deps { mirror } => {
                    commands::install::dependencies(&orchestrator, mirror, json).await
                }
            },
            Commands::Sync { repo, .. } => commands::install::sync(&orchestrator, repo, json).await,
            Commands::Start { detach } => commands::start::execute(&orchestrator, detach, json, &cancel).await,
            Commands::Bootstrap {
                toolchain_mirror,
                vcs_mirror,
                package_mirror,
                repo,
                update,
                no_start,
                detach,
            } => {
                let options = commands::bootstrap::Choices {
                    toolchain_mirror,
                    vcs_mirror,
                    package_mirror,
                    repo,
                    update,
                    start: !no_start,
                    detach,
                };
                commands::bootstrap::execute(&orchestrator, options, json, &cancel).await
            }
            Commands::Mirrors { command } => match command {
                MirrorCommands::List { kind } => commands::mirrors::list(&orchestrator, &kind, json),
                MirrorCommands::Rank { kind } => commands::mirrors::rank(&orchestrator, &kind, json).await,
            },
            Commands::Elevate { command } => match command {
                ElevateCommands::Check => commands::elevate::check(&orchestrator, json),
                ElevateCommands::Relaunch => commands::elevate::relaunch(&orchestrator, json),
            },
            Commands::Config { .. } => Ok(()),
        }
    }
}
