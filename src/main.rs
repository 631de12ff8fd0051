//! researchflow - HTTP Server Entry Point
//!
//! Serves the research-flow engine for the workspace named by
//! `RESEARCHFLOW_ROOT`.

use researchflow::{api, config::Config};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "researchflow=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env()?;
    info!(
        root = %config.root.display(),
        env_id = %config.env_id,
        "Loaded configuration"
    );

    api::serve(config).await?;
    Ok(())
}
