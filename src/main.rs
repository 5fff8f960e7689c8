use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use uuid::Uuid;

use opsmedic::config::Config;
use opsmedic::incident::Incident;
use opsmedic::pipeline::{PipelineEvent, PipelineOutcome};
use tokio::sync::broadcast::{self, error::TryRecvError};
use opsmedic::simulate::Scenario;
use opsmedic::storage::{IncidentStore, SqliteIncidentStore};

#[derive(Parser)]
#[command(
    name = "opsmedic",
    about = "Incident decision engine: fuse signals, remediate, validate, write the post-mortem",
    version,
    long_about = None
)]
struct Cli {
    /// Path to a TOML config file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Override the SQLite database path
    #[arg(long, global = true)]
    db: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the pipeline once against the live platform
    Run {
        /// JSON file of signals to use instead of live acquisition
        #[arg(long)]
        signals: Option<PathBuf>,
    },

    /// Run a built-in scenario against a simulated platform
    Simulate {
        /// outage, oom, unknown or flaky-restart
        #[arg(long, default_value = "outage")]
        scenario: Scenario,
    },

    /// Run the pipeline on the configured cron schedule until Ctrl-C
    Watch,

    /// List recent incidents
    Incidents {
        /// Number of incidents to show
        #[arg(long, default_value = "10")]
        limit: usize,
    },

    /// Print the post-mortem for an incident
    Postmortem {
        /// Incident ID
        id: Uuid,
    },
}

fn env_filter() -> tracing_subscriber::EnvFilter {
    tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"))
}

fn init_tracing(json: bool) {
    let builder = tracing_subscriber::fmt()
        .with_env_filter(env_filter())
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

/// Resolve configuration under a plain stderr subscriber, since the log
/// format is only known once the config is loaded.
fn resolve_config(explicit: Option<&Path>) -> Result<Config> {
    let bootstrap = tracing_subscriber::fmt()
        .with_env_filter(env_filter())
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::with_default(bootstrap, || Config::resolve(explicit))
}

/// Print every stage notice the run published, in order.
fn print_events(rx: &mut broadcast::Receiver<PipelineEvent>) {
    loop {
        let event = match rx.try_recv() {
            Ok(event) => event,
            Err(TryRecvError::Lagged(skipped)) => {
                println!("  [{} events not shown]", skipped);
                continue;
            }
            Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => break,
        };
        match &event {
            PipelineEvent::RemediationAction { action, .. } => println!(
                "  -> {} {} ({})",
                action.action_type,
                action.target_service,
                if action.success { "ok" } else { "FAILED" }
            ),
            other => {
                if let Ok(line) = serde_json::to_string(other) {
                    println!("  [{}]", line);
                }
            }
        }
    }
}

fn print_outcome(outcome: &PipelineOutcome) {
    match outcome {
        PipelineOutcome::NoSignals => println!("No signals found."),
        PipelineOutcome::NoIncident => println!("Signals found, but no incident could be classified."),
        PipelineOutcome::Completed(incident) => {
            println!("\n=== Incident {} ===", incident.id);
            println!("Title:      {}", incident.title);
            println!("Severity:   {}", incident.severity);
            println!("Root cause: {}", incident.root_cause.as_deref().unwrap_or("under investigation"));
            println!("Resolved:   {}", if incident.is_resolved() { "yes" } else { "no" });
            if let Some(pm) = &incident.post_mortem {
                println!("\n{}", pm.to_markdown());
            }
        }
    }
}

fn print_incidents(incidents: &[Incident]) {
    if incidents.is_empty() {
        println!("No incidents recorded.");
        return;
    }
    println!("{:<36} | {:<8} | {:<8} | Title", "ID", "Severity", "Resolved");
    println!("{:-<36}-|-{:-<8}-|-{:-<8}-|-{:-<30}", "", "", "", "");
    for i in incidents {
        println!(
            "{:<36} | {:<8} | {:<8} | {}",
            i.id,
            i.severity,
            if i.is_resolved() { "yes" } else { "no" },
            i.title
        );
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = resolve_config(cli.config.as_deref())?;
    if let Some(db) = cli.db {
        config.storage.db_path = db;
    }
    init_tracing(config.logging.json);

    let pool = opsmedic::storage::open_pool(&config.storage.db_path)
        .with_context(|| format!("failed to open database at {}", config.storage.db_path))?;

    match cli.command {
        Commands::Run { signals } => {
            let batch = match signals {
                Some(path) => Some(opsmedic::detect::load_signals(&path)?),
                None => None,
            };
            let pipeline = opsmedic::build_live_pipeline(&config, pool)?;
            let mut events = pipeline.subscribe();
            let outcome = pipeline.run(batch).await?;
            print_events(&mut events);
            print_outcome(&outcome);
        }
        Commands::Simulate { scenario } => {
            tracing::info!(?scenario, "Running simulated scenario");
            config.engine.validation_delay_secs = 0;
            config.classifier.extra_services.push(opsmedic::simulate::DEMO_SERVICE.to_string());
            let target = Arc::new(scenario.target());
            let pipeline = opsmedic::build_pipeline(&config, pool, target, Vec::new());
            let mut events = pipeline.subscribe();
            let outcome = pipeline.run(Some(scenario.signals())).await?;
            print_events(&mut events);
            print_outcome(&outcome);
        }
        Commands::Watch => {
            let pipeline = Arc::new(opsmedic::build_live_pipeline(&config, pool)?);
            let cancel = pipeline.cancellation_token();
            let shutdown = cancel.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    tracing::info!("Shutdown requested");
                    shutdown.cancel();
                }
            });
            opsmedic::scheduler::run_watch_loop(pipeline, &config.watch.cron, cancel).await?;
        }
        Commands::Incidents { limit } => {
            let store = SqliteIncidentStore::new(pool);
            let incidents = store.list_recent(limit).await?;
            print_incidents(&incidents);
        }
        Commands::Postmortem { id } => {
            let store = SqliteIncidentStore::new(pool);
            match store.get_incident(id).await? {
                Some(Incident { post_mortem: Some(pm), .. }) => println!("{}", pm.to_markdown()),
                Some(_) => println!("Incident {} has no post-mortem yet.", id),
                None => anyhow::bail!("Incident {} not found", id),
            }
        }
    }

    Ok(())
}
