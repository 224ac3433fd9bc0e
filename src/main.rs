use std::collections::HashMap;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use vigil::config::{Credentials, VigilConfig};
use vigil::detect::RunStatus;
use vigil::domains::DomainKind;
use vigil::scheduler::WatchPlan;
use vigil::RunOptions;

#[derive(Parser)]
#[command(
    name = "vigil",
    about = "Anomaly detection and remediation agents for cloud cost, service health and data integrity",
    version,
    long_about = None
)]
struct Cli {
    /// Path to the TOML configuration file
    #[arg(long, global = true, env = "VIGIL_CONFIG")]
    config: Option<PathBuf>,

    /// Emit logs as JSON lines on stderr
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Project month-end spend against the budget
    Cost {
        /// Log actions instead of dispatching them
        #[arg(long)]
        dry_run: bool,
    },

    /// Diagnose deploy failures, latency spikes and error rates
    Health {
        /// Log actions instead of dispatching them
        #[arg(long)]
        dry_run: bool,
    },

    /// Run referential-integrity and data-sanity checks
    Integrity {
        /// Log actions instead of dispatching them
        #[arg(long)]
        dry_run: bool,
    },

    /// Run every scheduled domain on its cron expression until interrupted
    Watch {
        /// Log actions instead of dispatching them
        #[arg(long)]
        dry_run: bool,
    },

    /// Print persisted metrics for a domain
    History {
        #[arg(value_enum)]
        domain: DomainKind,

        /// How far back to look
        #[arg(long, default_value = "24")]
        hours: u32,
    },
}

fn init_tracing(config: &VigilConfig, json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.logging.level));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if json || config.logging.json {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    let config = match VigilConfig::load_or_default(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("error: {}", e);
            return Ok(ExitCode::FAILURE);
        }
    };
    init_tracing(&config, cli.log_json);

    match cli.command {
        Commands::Cost { dry_run } => run_domain(DomainKind::Cost, &config, dry_run).await,
        Commands::Health { dry_run } => run_domain(DomainKind::Health, &config, dry_run).await,
        Commands::Integrity { dry_run } => run_domain(DomainKind::Integrity, &config, dry_run).await,
        Commands::Watch { dry_run } => {
            let plan = match WatchPlan::from_config(&config.schedule, chrono::Utc::now()) {
                Ok(plan) => plan,
                Err(e) => {
                    eprintln!("error: {}", e);
                    return Ok(ExitCode::FAILURE);
                }
            };
            if plan.is_empty() {
                eprintln!("error: no domain has a schedule configured");
                return Ok(ExitCode::FAILURE);
            }

            let mut credentials = HashMap::new();
            for domain in plan.domains() {
                match Credentials::resolve(&config, domain, dry_run) {
                    Ok(creds) => {
                        credentials.insert(domain, creds);
                    }
                    Err(e) => {
                        eprintln!("error: {}", e);
                        return Ok(ExitCode::FAILURE);
                    }
                }
            }

            tracing::info!(domains = ?plan.domains(), dry_run, "starting watch loop");
            vigil::scheduler::run_watch_loop(Arc::new(config), plan, credentials, dry_run).await?;
            Ok(ExitCode::SUCCESS)
        }
        Commands::History { domain, hours } => {
            let metrics = vigil::history(domain, &config, hours).await?;
            println!("{}", serde_json::to_string_pretty(&metrics)?);
            Ok(ExitCode::SUCCESS)
        }
    }
}

async fn run_domain(domain: DomainKind, config: &VigilConfig, dry_run: bool) -> Result<ExitCode> {
    // Credentials are checked before any source, store or endpoint is touched.
    let credentials = match Credentials::resolve(config, domain, dry_run) {
        Ok(creds) => creds,
        Err(e) => {
            eprintln!("error: {}", e);
            return Ok(ExitCode::FAILURE);
        }
    };

    let opts = RunOptions { dry_run, credentials };
    let result = vigil::run_once(domain, config, &opts).await?;
    println!("{}", serde_json::to_string_pretty(&result)?);

    if result.status == RunStatus::Critical {
        Ok(ExitCode::FAILURE)
    } else {
        Ok(ExitCode::SUCCESS)
    }
}
