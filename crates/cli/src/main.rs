//! provision — deployment orchestration CLI.
//!
//! Usage:
//!   provision deploy --target refresh --region eastus2   # full pipeline
//!   provision package refresh                            # locate built package
//!   provision record refresh                             # show artifact record

use clap::{Args, Parser, Subcommand};
use color_eyre::eyre::eyre;
use colored::Colorize;
use pv_core::artifacts::{load_record, record_path};
use pv_core::config::{load_config, resolve_parameters_from_env, ParameterOverrides};
use pv_core::engine::EngineConfig;
use pv_core::package::find_package;
use pv_core::reconcile::AzCli;
use pv_core::run::RunManager;
use pv_protocol::{Event, StageStatus};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "provision")]
#[command(about = "Multi-stage cloud deployment orchestrator", long_about = None)]
struct Cli {
    /// Path to the configuration file
    #[arg(long, default_value = "provision.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the full deployment pipeline for a target
    Deploy(Box<DeployArgs>),

    /// Locate a previously built app package for a target
    Package {
        /// Target name the package was built for
        target: String,

        /// Directory to search under
        #[arg(long, default_value = ".")]
        root: PathBuf,
    },

    /// Show the persisted artifact record of the last successful run
    Record {
        /// Target name
        target: String,

        /// Directory artifact records are kept in
        #[arg(long, default_value = ".provision")]
        state_dir: PathBuf,
    },
}

#[derive(Args)]
struct DeployArgs {
    /// Target name every resource name is derived from
    #[arg(long)]
    target: Option<String>,

    /// Cloud region for created resources
    #[arg(long)]
    region: Option<String>,

    /// Azure OpenAI endpoint URL
    #[arg(long)]
    openai_endpoint: Option<String>,

    /// Azure OpenAI API key
    #[arg(long)]
    openai_key: Option<String>,

    /// Model deployment name
    #[arg(long)]
    openai_deployment: Option<String>,

    /// Blob storage connection string (optional feature)
    #[arg(long)]
    storage_connection: Option<String>,

    /// Tenant id override; discovered from the provider when omitted
    #[arg(long)]
    tenant_id: Option<String>,

    /// Directory holding the application source
    #[arg(long, default_value = ".")]
    workspace: PathBuf,

    /// Directory artifact records are written to
    #[arg(long, default_value = ".provision")]
    state_dir: PathBuf,

    /// Print raw event frames as JSON lines instead of formatted output
    #[arg(long)]
    json: bool,
}

#[tokio::main]
async fn main() -> color_eyre::Result<()> {
    color_eyre::install()?;
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "pv_core=info,warn".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Deploy(args) => deploy(&cli.config, *args).await,
        Commands::Package { target, root } => match find_package(&target, &root) {
            Some(path) => {
                println!("{}", path.display());
                Ok(())
            }
            None => Err(eyre!("no app package found for target '{target}'")),
        },
        Commands::Record { target, state_dir } => {
            let record = load_record(&record_path(&state_dir, &target))?;
            println!("{}", serde_json::to_string_pretty(&record)?);
            Ok(())
        }
    }
}

async fn deploy(config_path: &std::path::Path, args: DeployArgs) -> color_eyre::Result<()> {
    let file = load_config(config_path)?;
    let overrides = ParameterOverrides {
        target_name: args.target,
        region: args.region,
        openai_endpoint: args.openai_endpoint,
        openai_key: args.openai_key,
        openai_deployment: args.openai_deployment,
        storage_connection: args.storage_connection,
        tenant_id: args.tenant_id,
    };
    let params = resolve_parameters_from_env(&file, &overrides);

    let manager = RunManager::new(
        Arc::new(AzCli::default()),
        EngineConfig {
            state_dir: args.state_dir,
            ..EngineConfig::default()
        },
        args.workspace,
    );

    let mut handle = manager.start_run(params);
    let run_id = handle.run_id;

    let mut failed = false;
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                eprintln!("{}", "Cancelling run...".yellow());
                manager.cancel_run(run_id);
            }
            event = handle.events.recv() => {
                let Some(event) = event else { break };
                if args.json {
                    println!("{}", serde_json::to_string(&event)?);
                } else {
                    render(&event);
                }
                if matches!(event, Event::RunError { .. }) {
                    failed = true;
                }
            }
        }
    }

    if failed {
        return Err(eyre!("deployment failed"));
    }
    Ok(())
}

fn render(event: &Event) {
    match event {
        Event::RunStarted {
            run_id,
            target_name,
        } => {
            println!(
                "{} deploying '{}' (run {})",
                "▶".bold(),
                target_name.bold(),
                run_id
            );
        }
        Event::StageUpdate {
            stage_id,
            status,
            message,
            ..
        } => {
            let badge = match status {
                StageStatus::Pending => "PENDING".dimmed(),
                StageStatus::Active => "ACTIVE".yellow().bold(),
                StageStatus::Completed => "DONE".green().bold(),
                StageStatus::Failed => "FAILED".red().bold(),
            };
            println!("[{badge}] {stage_id}: {message}");
        }
        Event::LogLine { text, .. } => {
            println!("  {} {}", "│".dimmed(), text.dimmed());
        }
        Event::ArtifactCaptured { key, value, .. } => {
            println!("  {} {} = {}", "◆".cyan(), key.cyan(), value);
        }
        Event::RunError { message, .. } => {
            println!("{} {}", "✗".red().bold(), message.red());
        }
        Event::RunCompleted { artifacts, .. } => {
            println!("{} deployment complete", "✓".green().bold());
            for (key, value) in artifacts {
                println!("  {} = {}", key.green(), value);
            }
        }
    }
}
