use std::sync::Arc;

use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use master::{api, config::Config, sweep, MasterState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "master=debug,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env()?;
    info!(
        port = config.port,
        health_timeout_secs = config.health_timeout.as_secs(),
        sweep_interval_secs = config.sweep_interval.as_secs(),
        "master starting"
    );

    let state = MasterState::new(&config)?;

    // Spawn health sweep
    tokio::spawn(sweep::run_health_sweep(
        Arc::clone(&state),
        config.sweep_interval,
    ));

    let app = api::router(state);

    let addr = format!("{}:{}", config.host, config.port);
    info!("listening on {addr}; waiting for workers to register");
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}
