use anyhow::{Context, Result};
use cbs_refresh::auth::{FixedLifetimeNegotiator, LoopExit, RefreshEvent, RefreshScheduler};
use cbs_refresh::config::Config;
use cbs_refresh::startup::{init_logging, StartupLogger};
use cbs_refresh::DEFAULT_CONFIG_FILE;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{error, info, warn};

#[derive(Parser)]
#[command(name = env!("CARGO_PKG_NAME"))]
#[command(about = env!("CARGO_PKG_DESCRIPTION"))]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, default_value = DEFAULT_CONFIG_FILE)]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long)]
    log_level: Option<String>,

    /// Service host name (overrides config)
    #[arg(long)]
    host_name: Option<String>,

    /// Device identifier (overrides config)
    #[arg(long)]
    device_id: Option<String>,

    /// Lifetime of tokens granted by the local negotiator
    #[arg(long, default_value_t = 600)]
    token_lifetime_secs: u64,

    /// Stop after this many seconds (runs until Ctrl-C when omitted)
    #[arg(long)]
    run_for_secs: Option<u64>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = Config::load(&cli.config).context("Failed to load configuration")?;
    if let Some(level) = cli.log_level {
        config.logging.level = level;
    }
    config.apply_identity_overrides(cli.host_name, cli.device_id);
    config.validate()?;

    init_logging(&config.logging)?;
    StartupLogger::display_startup_info(&config, cbs_refresh::VERSION);

    let identity = config
        .identity
        .clone()
        .context("No identity configured; set identity in the config file or pass --host-name and --device-id")?;

    let negotiator = Arc::new(FixedLifetimeNegotiator::new(Duration::from_secs(cli.token_lifetime_secs)));
    let scheduler = RefreshScheduler::from_config(identity, negotiator, &config.refresh);
    let mut events = scheduler.subscribe();

    scheduler
        .initialize(config.refresh.initialize_timeout())
        .await
        .context("Initial token negotiation failed")?;

    let run_for = cli.run_for_secs.map(Duration::from_secs);
    let deadline = async {
        match run_for {
            Some(run_for) => tokio::time::sleep(run_for).await,
            None => std::future::pending::<()>().await,
        }
    };
    tokio::pin!(deadline);

    loop {
        tokio::select! {
            _ = &mut deadline => {
                info!("Run time elapsed");
                break;
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted");
                break;
            }
            event = events.recv() => match event {
                Ok(RefreshEvent::TokenRenewed { expiry, next_refresh_in, .. }) => {
                    info!("Token renewed until {}, next refresh in {:?}", expiry, next_refresh_in);
                }
                Ok(RefreshEvent::LoopExited { exit: LoopExit::Failed { category, message }, .. }) => {
                    error!(category, "Refresh loop failed: {}", message);
                    break;
                }
                Ok(RefreshEvent::LoopExited { exit, .. }) => {
                    info!(?exit, "Refresh loop exited");
                    if exit == LoopExit::NeverExpires {
                        break;
                    }
                }
                Ok(_) => {}
                Err(broadcast::error::RecvError::Closed) => break,
                Err(e) => warn!("Refresh event stream: {}", e),
            }
        }
    }

    scheduler.stop();
    scheduler.dispose();

    let stats = serde_json::to_string_pretty(&scheduler.stats())?;
    println!("{}", stats);
    Ok(())
}
