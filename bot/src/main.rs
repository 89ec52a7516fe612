use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use slurper_bot::config::BotConfig;
use slurper_bot::db::pool::{create_pool, run_migrations};
use slurper_bot::engine::aggregator::{LogSink, PlaylistAggregator};
use slurper_bot::engine::bot::Bot;
use slurper_bot::engine::buffer::RecommendationBuffer;
use slurper_bot::engine::flusher::run_flusher;
use slurper_bot::engine::guild_config::GuildConfigStore;
use slurper_bot::engine::scheduler::run_weekly;
use slurper_bot::gateway::listener::start_bridge_listener;

/// Collects music recommendations from chat channels and builds weekly playlists.
#[derive(Parser)]
#[command(version)]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(long, default_value = "slurper.toml")]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let config = BotConfig::load(&cli.config)
        .with_context(|| format!("failed to load config from {}", cli.config.display()))?;

    if let Some(dir) = config.state.snapshot_path.parent()
        && !dir.as_os_str().is_empty()
    {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("failed to create state directory {}", dir.display()))?;
    }

    let pool = create_pool(&config.database.url)
        .await
        .context("failed to connect to database")?;
    run_migrations(&pool)
        .await
        .context("failed to run database migrations")?;

    let guilds = Arc::new(GuildConfigStore::load(&config.state.snapshot_path));
    let buffer = Arc::new(RecommendationBuffer::new(config.recommendations.collect));
    let (outbox, _) = broadcast::channel(256);
    let bot = Arc::new(Bot::new(
        guilds.clone(),
        buffer.clone(),
        pool.clone(),
        config.bot.user_id,
        outbox.clone(),
    ));

    // Intake stops first; the flusher gets its own token so its final
    // flush only starts once nothing can append any more.
    let intake_cancel = CancellationToken::new();
    let flush_cancel = CancellationToken::new();

    let flusher = tokio::spawn(run_flusher(
        buffer,
        pool.clone(),
        config.flush_interval(),
        flush_cancel.clone(),
    ));

    let aggregator = Arc::new(PlaylistAggregator::new(
        pool.clone(),
        guilds.clone(),
        LogSink,
        config.window(),
        config.recommendations.uri_identity,
        outbox,
    ));
    let scheduler = tokio::spawn(run_weekly(
        aggregator,
        config.weekly_schedule()?,
        intake_cancel.clone(),
    ));

    let listener = tokio::net::TcpListener::bind(&config.bot.bridge_address)
        .await
        .with_context(|| format!("failed to bind bridge listener on {}", config.bot.bridge_address))?;
    let bridge = tokio::spawn(start_bridge_listener(listener, bot, intake_cancel.clone()));

    info!(
        bridge = %config.bot.bridge_address,
        guilds = guilds.len(),
        "slurper bot started"
    );

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for shutdown signal")?;
    info!("shutting down");

    intake_cancel.cancel();
    if let Err(e) = bridge.await {
        error!(error = %e, "bridge listener task failed");
    }
    if let Err(e) = scheduler.await {
        error!(error = %e, "weekly scheduler task failed");
    }

    flush_cancel.cancel();
    match flusher.await {
        Ok(Ok(count)) => info!(count, "final flush complete"),
        Ok(Err(e)) => error!(error = %e, "final flush failed, buffered recommendations lost"),
        Err(e) => error!(error = %e, "flusher task failed"),
    }

    guilds
        .save(&config.state.snapshot_path)
        .context("failed to save guild configuration")?;
    pool.close().await;
    Ok(())
}
