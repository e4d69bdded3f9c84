use anyhow::Result;
use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

use ensemble::catalog::RunMode;

mod cmd;

#[derive(Parser)]
#[command(name = "ensemble")]
#[command(version, about = "Git-backed playbook catalog and runner")]
pub struct Cli {
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Path to ensemble.toml. Defaults to ./ensemble.toml, then the user config directory.
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Write an ensemble.toml and create the catalog
    Init {
        /// Directory holding project working copies
        #[arg(long)]
        path: Option<PathBuf>,
        /// Catalog database file
        #[arg(long)]
        database: Option<PathBuf>,
        /// Overwrite an existing config file
        #[arg(long)]
        force: bool,
    },
    /// Manage projects
    Project {
        #[command(subcommand)]
        command: ProjectCommands,
    },
    /// Synchronize a project (or all projects) with its repository
    Sync {
        /// Project id or name
        project: Option<String>,
        #[arg(long, conflicts_with = "project")]
        all: bool,
    },
    /// List the playbooks of a project
    Playbooks { project: String },
    /// Mark a playbook as locked
    Lock { playbook: String },
    /// Clear a playbook's lock
    Unlock { playbook: String },
    /// Run a playbook and wait for it to finish
    Run {
        playbook: String,
        #[arg(long, value_enum, default_value = "check")]
        mode: ModeArg,
        /// Id of the user starting the run
        #[arg(long, default_value = "cli")]
        user: String,
    },
    /// Show the sync history of a project
    History {
        project: String,
        /// Print each attempt's log
        #[arg(long)]
        log: bool,
    },
    /// List the runs of a playbook
    Runs { playbook: String },
    /// Show the captured output of a run
    Result {
        run: String,
        /// Print the raw output instead of a recap
        #[arg(long)]
        raw: bool,
    },
}

#[derive(Subcommand, Clone)]
pub enum ProjectCommands {
    /// Register a repository
    Add {
        name: String,
        url: String,
        #[arg(long, default_value = ensemble::catalog::DEFAULT_BRANCH)]
        branch: String,
        #[arg(long, default_value = "")]
        description: String,
        #[arg(long)]
        login: Option<String>,
        #[arg(long)]
        password: Option<String>,
        #[arg(long)]
        vault_password: Option<String>,
    },
    List,
    Show { project: String },
    /// Select the inventory and extra-variables file used by runs
    Select {
        project: String,
        #[arg(long)]
        inventory: Option<String>,
        /// Variables file under vars/, or "" for none
        #[arg(long)]
        variables: Option<String>,
    },
    Remove { project: String },
}

#[derive(Clone, Copy, ValueEnum)]
pub enum ModeArg {
    Check,
    Execute,
    Syntax,
}

impl From<ModeArg> for RunMode {
    fn from(mode: ModeArg) -> Self {
        match mode {
            ModeArg::Check => RunMode::Check,
            ModeArg::Execute => RunMode::Execute,
            ModeArg::Syntax => RunMode::Syntax,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    ensemble::logging::init(cli.verbose)?;

    let config_path = cli.config.as_deref();
    match &cli.command {
        Commands::Init {
            path,
            database,
            force,
        } => cmd::cmd_init(config_path, path.clone(), database.clone(), *force).await?,
        Commands::Project { command } => {
            let ctx = cmd::Context::open(config_path)?;
            cmd::cmd_project(&ctx, command.clone()).await?
        }
        Commands::Sync { project, all } => {
            let ctx = cmd::Context::open(config_path)?;
            cmd::cmd_sync(&ctx, project.as_deref(), *all).await?
        }
        Commands::Playbooks { project } => {
            let ctx = cmd::Context::open(config_path)?;
            cmd::cmd_playbooks(&ctx, project).await?
        }
        Commands::Lock { playbook } => {
            let ctx = cmd::Context::open(config_path)?;
            cmd::cmd_lock(&ctx, playbook, true).await?
        }
        Commands::Unlock { playbook } => {
            let ctx = cmd::Context::open(config_path)?;
            cmd::cmd_lock(&ctx, playbook, false).await?
        }
        Commands::Run {
            playbook,
            mode,
            user,
        } => {
            let ctx = cmd::Context::open(config_path)?;
            cmd::cmd_run(&ctx, playbook, (*mode).into(), user).await?
        }
        Commands::History { project, log } => {
            let ctx = cmd::Context::open(config_path)?;
            cmd::cmd_history(&ctx, project, *log).await?
        }
        Commands::Runs { playbook } => {
            let ctx = cmd::Context::open(config_path)?;
            cmd::cmd_runs(&ctx, playbook).await?
        }
        Commands::Result { run, raw } => {
            let ctx = cmd::Context::open(config_path)?;
            cmd::cmd_result(&ctx, run, *raw).await?
        }
    }

    Ok(())
}
