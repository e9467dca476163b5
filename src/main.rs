use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};

use rollsync::backup::BackupLog;
use rollsync::config::Config;
use rollsync::engine::docker::DockerCli;
use rollsync::metrics::RuntimeMetrics;
use rollsync::notify::{LogNotifier, Notifier, WebhookNotifier};
use rollsync::orchestrator::Orchestrator;
use rollsync::strategy::StrategyKind;

#[derive(Parser)]
#[command(name = "rollsync")]
#[command(about = "Zero-downtime rolling image updates for docker-compose services", long_about = None)]
struct Cli {
    /// Path to the rollsync configuration file
    #[arg(long, global = true, default_value = "rollsync.toml")]
    config: PathBuf,

    /// Compose file to operate on (overrides config and auto-detection)
    #[arg(long, global = true)]
    file: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Update a service to a new image tag
    Update {
        service: String,
        tag: String,

        /// Strategy kind: one-at-a-time, percentage, blue-green, canary
        #[arg(long)]
        strategy: Option<String>,

        /// Batch / initial cohort size as a percentage of the replicas
        #[arg(long)]
        percentage: Option<u32>,

        /// Strategy deadline in seconds
        #[arg(long)]
        timeout: Option<u64>,

        /// Leave a partial update in place on failure
        #[arg(long)]
        no_rollback: bool,
    },

    /// Roll a service back to a recorded snapshot
    Rollback {
        service: String,

        /// Restore the snapshot recorded at this image tag instead of the
        /// newest one
        #[arg(long)]
        version: Option<String>,
    },

    /// List recorded snapshots for a service, newest first
    History { service: String },

    /// Show detected replicas
    Replicas { service: Option<String> },

    /// Write a default configuration file
    InitConfig,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = Config::load_or_default(&cli.config);
    init_tracing(&config);

    match &cli.command {
        Commands::Update {
            service,
            tag,
            strategy,
            percentage,
            timeout,
            no_rollback,
        } => {
            let mut strategy_config = config.strategy_config();
            if let Some(kind) = strategy {
                strategy_config.kind = kind.parse::<StrategyKind>()?;
            }
            if let Some(pct) = percentage {
                strategy_config.percentage = Some(*pct);
            }
            if let Some(secs) = timeout {
                strategy_config.timeout = std::time::Duration::from_secs(*secs);
            }
            if *no_rollback {
                strategy_config.rollback_on_failure = false;
            }

            let orchestrator = build_orchestrator(&cli, &config, Some(strategy_config))?;
            orchestrator.update(service, tag).await?;
            println!("{service} updated to {tag}");
        }

        Commands::Rollback { service, version } => {
            let orchestrator = build_orchestrator(&cli, &config, None)?;
            match version {
                Some(version) => {
                    orchestrator.rollback_to_version(service, version).await?;
                    println!("{service} rolled back to {version}");
                }
                None => {
                    orchestrator.rollback(service).await?;
                    println!("{service} rolled back to the previous snapshot");
                }
            }
        }

        Commands::History { service } => {
            let backups = BackupLog::new(config.backup.directory(), config.backup.max_history)?;
            let history = backups.history(service)?;
            if history.is_empty() {
                println!("no snapshots recorded for {service}");
            }
            for entry in history {
                println!(
                    "{}  {}  {}",
                    entry.timestamp.format("%Y-%m-%d %H:%M:%S"),
                    entry.image_tag,
                    entry.compose_file_path.display()
                );
            }
        }

        Commands::Replicas { service } => {
            let orchestrator = build_orchestrator(&cli, &config, None)?;
            let all = orchestrator.replicas().get_all().await?;
            let mut services: Vec<&String> = all
                .keys()
                .filter(|name| service.as_deref().map_or(true, |s| s == name.as_str()))
                .collect();
            services.sort();
            for name in services {
                for replica in &all[name] {
                    println!(
                        "{}  {}  {}  {}",
                        replica.service_id(),
                        replica.status,
                        replica.image,
                        replica.ip_address.as_deref().unwrap_or("-")
                    );
                }
            }
        }

        Commands::InitConfig => {
            Config::default()
                .save_to_file(&cli.config)
                .with_context(|| format!("writing {}", cli.config.display()))?;
            println!("wrote {}", cli.config.display());
        }
    }

    Ok(())
}

fn build_orchestrator(
    cli: &Cli,
    config: &Config,
    strategy_config: Option<rollsync::strategy::StrategyConfig>,
) -> anyhow::Result<Orchestrator> {
    let compose_path = match &cli.file {
        Some(path) => path.clone(),
        None => config.resolve_compose_file()?,
    };
    let engine = Arc::new(DockerCli::new(config.engine.binary.clone()));
    let backups = BackupLog::new(config.backup.directory(), config.backup.max_history)?;
    let notifier: Arc<dyn Notifier> = match &config.notifications.webhook_url {
        Some(url) => Arc::new(WebhookNotifier::new(url.clone(), config.notify_events())?),
        None => Arc::new(LogNotifier),
    };

    Ok(Orchestrator::new(
        compose_path,
        engine,
        strategy_config.unwrap_or_else(|| config.strategy_config()),
        backups,
        notifier,
        Arc::new(RuntimeMetrics),
    ))
}

fn init_tracing(config: &Config) {
    let level = config
        .logging
        .level
        .parse::<tracing::Level>()
        .unwrap_or(tracing::Level::INFO);
    if config.logging.format == "pretty" {
        tracing_subscriber::fmt()
            .pretty()
            .with_max_level(level)
            .init();
    } else {
        tracing_subscriber::fmt()
            .compact()
            .with_max_level(level)
            .init();
    }
}
