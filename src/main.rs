use anyhow::{Context, Result};
use api_mender::config::Config;
use api_mender::orchestrator::{FixType, Orchestrator};
use api_mender::{server, staging};
use clap::{Parser, Subcommand};
use serde::Serialize;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(
    name = "mender",
    about = "Check and repair Python API modules in place",
    version
)]
struct Cli {
    /// Config file (defaults to ./mender.toml, then the user config dir)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Module root directory (overrides config and MENDER_MODULES_ROOT)
    #[arg(long, global = true)]
    root: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Validate one module and list its issues
    Check { module: String },
    /// Validate every module and list their issues
    CheckAll,
    /// Repair one module
    Fix {
        module: String,
        #[arg(long, value_enum, default_value_t = FixType::StringLiterals)]
        fix_type: FixType,
    },
    /// Repair every module
    FixAll {
        #[arg(long, value_enum, default_value_t = FixType::StringLiterals)]
        fix_type: FixType,
    },
    /// Add a missing router import or definition to one module
    FixRouter { module: String },
    /// Add missing router imports and definitions everywhere
    FixAllRouters,
    /// Add missing operation IDs to one module
    FixOperationIds { module: String },
    /// Find and rename operation IDs shared across modules
    OperationIds {
        /// Report the planned renames without writing
        #[arg(long)]
        dry_run: bool,
    },
    /// Report router, model and error-handling conventions per module
    Consistency,
    /// Parse (and optionally import) every module
    Health,
    /// Serve the HTTP API
    Serve {
        #[arg(long)]
        bind: Option<String>,
    },
    /// Copy the module tree into a staging directory
    Stage {
        #[arg(long)]
        staging: Option<PathBuf>,
    },
    /// Copy repaired entry files from staging back to the module root
    Promote {
        #[arg(long)]
        staging: Option<PathBuf>,
    },
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!(
        "{}",
        serde_json::to_string_pretty(value).context("Failed to serialize report")?
    );
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();

    let mut config = Config::load(cli.config.as_deref()).context("Failed to load config")?;
    if let Some(root) = cli.root {
        config.modules_root = root;
    }

    match cli.command {
        Commands::Serve { bind } => {
            let bind = bind.unwrap_or_else(|| config.server.bind.clone());
            server::serve(Orchestrator::new(config), &bind).await
        }
        command => {
            tokio::task::spawn_blocking(move || run_command(Orchestrator::new(config), command))
                .await
                .context("Command task failed")?
        }
    }
}

fn staging_dir(flag: Option<PathBuf>, config: &Config) -> Result<PathBuf> {
    flag.or_else(|| config.staging_dir.clone())
        .context("No staging directory: pass --staging or set staging_dir in the config")
}

fn run_command(orchestrator: Orchestrator, command: Commands) -> Result<()> {
    match command {
        Commands::Check { module } => print_json(&orchestrator.check_module(&module)?),
        Commands::CheckAll => print_json(&orchestrator.check_all_modules()?),
        Commands::Fix { module, fix_type } => {
            print_json(&orchestrator.fix_module(&module, fix_type)?)
        }
        Commands::FixAll { fix_type } => print_json(&orchestrator.fix_all(fix_type)?),
        Commands::FixRouter { module } => print_json(&orchestrator.fix_router(&module)?),
        Commands::FixAllRouters => print_json(&orchestrator.fix_all_routers()?),
        Commands::FixOperationIds { module } => {
            print_json(&orchestrator.fix_operation_ids(&module)?)
        }
        Commands::OperationIds { dry_run } => {
            print_json(&orchestrator.scan_operation_ids(dry_run)?)
        }
        Commands::Consistency => print_json(&orchestrator.consistency_check()?),
        Commands::Health => {
            let report = orchestrator.health_check();
            print_json(&report)?;
            match report.error {
                Some(err) => Err(anyhow::anyhow!(err)),
                None => Ok(()),
            }
        }
        Commands::Stage { staging: dir } => {
            let config = orchestrator.config();
            let dir = staging_dir(dir, config)?;
            print_json(&staging::stage(&config.modules_root, &dir)?)
        }
        Commands::Promote { staging: dir } => {
            let config = orchestrator.config();
            let dir = staging_dir(dir, config)?;
            let promoted = staging::promote(
                &dir,
                &config.modules_root,
                &config.entry_file,
                orchestrator.locks(),
            )?;
            print_json(&promoted)
        }
        Commands::Serve { .. } => Ok(()),
    }
}
