mod config;

use std::sync::Arc;

use anyhow::Result;
use logwarden_analyzer::Dispatcher;
use logwarden_ban::{BanRegistry, CsvAuditSink};
use logwarden_common::UnbanPolicy;
use logwarden_rate_limit::WindowPool;
use tracing::{info, warn};
use tracing_subscriber::{fmt, EnvFilter};

use crate::config::CliConfig;

/// Idle windows kept for reuse across keys.
const WINDOW_POOL_SIZE: usize = 1024;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .json()
        .init();

    // Parse command-line args: config path, then an optional log file
    let mut args = std::env::args().skip(1);
    let config_path = args
        .next()
        .unwrap_or_else(|| "config/logwarden.yaml".to_string());
    let input_override = args.next();

    info!(config_path = %config_path, "starting logwarden");

    let cli = CliConfig::load(&config_path, input_override)?;
    let config = cli.config;

    let sink = Arc::new(CsvAuditSink::open(&config.audit.path)?);
    let registry = BanRegistry::new(sink);
    let dispatcher = Dispatcher::new(config.rules.clone(), registry.clone(), config.unban.policy)?
        .with_pool(WindowPool::new(WINDOW_POOL_SIZE));

    info!(
        input = %config.input.display(),
        rules = config.rules.len(),
        policy = ?config.unban.policy,
        "analysing access log"
    );

    let run = dispatcher.run_file(&config.input);
    tokio::pin!(run);
    let report = tokio::select! {
        report = &mut run => report?,
        _ = tokio::signal::ctrl_c() => {
            warn!("interrupted, releasing pending bans");
            registry.shutdown();
            run.await?
        }
    };

    println!("{}", serde_json::to_string_pretty(&report)?);

    if config.unban.policy == UnbanPolicy::Detach && registry.pending_unbans() > 0 {
        info!(
            pending = registry.pending_unbans(),
            "waiting for pending unbans; Ctrl-C releases them now"
        );
        tokio::select! {
            _ = registry.drain() => {}
            _ = tokio::signal::ctrl_c() => {
                registry.shutdown();
                registry.drain().await;
            }
        }
    }

    info!("logwarden finished");
    Ok(())
}
