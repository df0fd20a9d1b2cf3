//! Campus query bot, LINE webhook server.

use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use cq_bot::{AppState, BotConfig, DataSources, build_router};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .json()
        .init();

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "cq-bot starting");

    let config = match std::env::var("CQ_BOT_CONFIG") {
        Ok(path) => {
            tracing::info!(path = %path, "loading config file");
            BotConfig::from_file(&path)?
        }
        Err(_) => BotConfig::from_env(),
    };

    // No campus database wired yet; serve the bundled sample catalog.
    let sources = DataSources::sample();
    let state = AppState::from_config(&config, &sources)?;

    let shutdown = CancellationToken::new();
    let janitors = [
        state
            .user_limiter
            .spawn_janitor(config.janitor_interval(), shutdown.clone()),
        state
            .llm_limiter
            .spawn_janitor(config.janitor_interval(), shutdown.clone()),
    ];

    let app = build_router(state);

    let addr = config.listen_addr();
    let listener = TcpListener::bind(&addr).await?;
    tracing::info!(addr = %addr, "listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            if let Err(err) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %err, "failed to listen for shutdown signal");
            }
            tracing::info!("shutdown signal received");
        })
        .await?;

    shutdown.cancel();
    for janitor in janitors {
        let _ = janitor.await;
    }
    tracing::info!("cq-bot stopped");

    Ok(())
}
