use tokio::signal;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use worker::{
    api,
    app_state::{LifecycleSettings, WorkerState},
    bootstrap::{self, BindPolicy},
    config::WorkerConfig,
    lifecycle,
    master_client::MasterClient,
    tools::ToolTable,
};

fn load_env_file() {
    let cwd = match std::env::current_dir() {
        Ok(dir) => dir,
        Err(e) => {
            tracing::warn!(error = %e, "Could not determine current directory for .env lookup");
            return;
        }
    };

    match worker::tools::find_upwards(&cwd, ".env") {
        Some(path) => match dotenvy::from_path(&path) {
            Ok(()) => tracing::info!(path = %path.display(), "Loaded environment from .env"),
            Err(e) => tracing::warn!(path = %path.display(), error = %e, "Failed to load .env file"),
        },
        None => tracing::debug!(cwd = %cwd.display(), "No .env file found; using process environment only"),
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C, shutting down"),
        _ = terminate => info!("Received SIGTERM, shutting down"),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "worker=debug,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    load_env_file();
    let config = WorkerConfig::from_env()?;

    let cwd = std::env::current_dir()?;
    let tools = ToolTable::load(config.tools_config.as_deref(), &cwd)?;
    if tools.is_empty() {
        tracing::warn!("No tools loaded; this worker will not be routed any instances");
    }

    let policy = BindPolicy {
        host: config.host.clone(),
        preferred_port: config.port,
        max_attempts: config.bind_max_attempts,
        backoff: config.bind_backoff,
    };
    let listener = bootstrap::bind_listener(&policy, &config.worker_id).await?;
    let port = listener.local_addr()?.port();

    let address = bootstrap::address_from(config.advertise_host.as_deref());
    let worker_url = address.worker_url(port);

    let master = match &config.master_url {
        Some(url) => Some(MasterClient::new(url.as_str())?),
        None => None,
    };

    let state = WorkerState::new(&config.worker_id, &worker_url, tools, master)
        .with_host_info(address.host_info(port))
        .with_settings(LifecycleSettings {
            heartbeat_interval: config.heartbeat_interval,
            register_backoff: config.register_backoff,
            register_max_attempts: config.register_max_attempts,
        });

    info!(
        worker_id = %config.worker_id,
        %worker_url,
        tools = ?state.tools().names(),
        master_url = ?config.master_url,
        "worker starting"
    );

    let app = api::router(state.clone());
    lifecycle::spawn_registration(&state, config.register_delay);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    lifecycle::unregister_on_shutdown(&state).await;
    Ok(())
}
