use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tokio::signal;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use sentinel_limiter::config::{AppConfig, LoggingConfig};
use sentinel_limiter::ratelimit::{ConfigPublisher, RateLimiter, RulesDocument};
use sentinel_limiter::store::{self, SharedStateStore};

#[derive(Debug, Parser)]
#[command(name = "sentinel-limiter", version, about = "Distributed rate limiting engine")]
struct Cli {
    /// Path to the configuration file
    #[arg(short, long)]
    config: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run admission checks for a service endpoint
    Check {
        #[arg(short, long)]
        service: String,
        #[arg(short, long)]
        endpoint: String,
        /// Number of consecutive checks
        #[arg(short = 'n', long, default_value_t = 1)]
        count: u32,
        /// Publish these rules first (useful with the memory backend)
        #[arg(long)]
        rules: Option<String>,
    },
    /// Publish rate limit rules once
    Publish {
        /// Rules file, overriding `sync.rules_path`
        #[arg(long)]
        rules: Option<String>,
    },
    /// Republish rate limit rules periodically until interrupted
    Sync {
        /// Rules file, overriding `sync.rules_path`
        #[arg(long)]
        rules: Option<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = AppConfig::load(cli.config.as_deref()).context("Failed to load configuration")?;

    init_tracing(&config.logging);
    info!("Sentinel Limiter {}", env!("CARGO_PKG_VERSION"));

    let store = store::connect(&config.store)
        .await
        .context("Failed to connect to the shared state store")?;

    match cli.command {
        Command::Check {
            service,
            endpoint,
            count,
            rules,
        } => {
            if let Some(path) = rules {
                publish_once(&store, &config, &path, None).await?;
            }
            check(store, &config, &service, &endpoint, count).await
        }
        Command::Publish { rules } => {
            let path = rules_path(rules, &config)?;
            publish_once(&store, &config, &path, None).await
        }
        Command::Sync { rules } => {
            let path = rules_path(rules, &config)?;
            sync(store, &config, &path).await
        }
    }
}

fn init_tracing(logging: &LoggingConfig) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&logging.level));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(true);

    if logging.json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn rules_path(flag: Option<String>, config: &AppConfig) -> anyhow::Result<String> {
    flag.or_else(|| config.sync.rules_path.clone())
        .context("No rules file given; pass --rules or set sync.rules_path")
}

async fn publish_once(
    store: &Arc<dyn SharedStateStore>,
    config: &AppConfig,
    path: &str,
    record_ttl: Option<Duration>,
) -> anyhow::Result<()> {
    let rules = RulesDocument::from_file(path)?;
    let mut publisher = ConfigPublisher::new(store.clone(), config.limiter.key_prefix.clone());
    if let Some(ttl) = record_ttl {
        publisher = publisher.with_record_ttl(ttl);
    }
    publisher.publish(&rules).await?;
    Ok(())
}

async fn check(
    store: Arc<dyn SharedStateStore>,
    config: &AppConfig,
    service: &str,
    endpoint: &str,
    count: u32,
) -> anyhow::Result<()> {
    let limiter = RateLimiter::new(store, &config.limiter.key_prefix);

    for attempt in 1..=count {
        let outcome = limiter.allow(service, endpoint).await;
        let admitted = match config.limiter.failure_policy {
            Some(policy) => policy.decide(service, endpoint, outcome),
            None => outcome?,
        };
        println!(
            "{} {}{} #{}: {}",
            if admitted { "ALLOW" } else { "DENY " },
            service,
            endpoint,
            attempt,
            if admitted { "admitted" } else { "rate limited" }
        );
    }
    Ok(())
}

async fn sync(
    store: Arc<dyn SharedStateStore>,
    config: &AppConfig,
    path: &str,
) -> anyhow::Result<()> {
    let mut ticker = tokio::time::interval(config.sync.interval());
    let record_ttl = config.sync.record_ttl();
    info!(path, interval = ?config.sync.interval(), ?record_ttl, "Starting rules sync");

    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                // Records outlive one failed round; rules dropped from the file expire
                if let Err(e) = publish_once(&store, config, path, Some(record_ttl)).await {
                    error!(error = %e, "Rules sync failed");
                }
            }
            _ = &mut shutdown => break,
        }
    }

    info!("Rules sync stopped");
    Ok(())
}

/// Wait for a shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, shutting down");
        }
        _ = terminate => {
            info!("Received SIGTERM, shutting down");
        }
    }
}
