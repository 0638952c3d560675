//! Voice bridge server entry point

use anyhow::Context;
use std::net::SocketAddr;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, Layer};

use voice_bridge_config::{load_settings, Settings};
use voice_bridge_server::{create_router, init_metrics, AppState, Providers};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // .env values win over the inherited environment
    let dotenv = dotenvy::dotenv_override();

    // Priority: env vars > config/{env}.* > config/default.* > defaults
    let env = std::env::var("VOICE_BRIDGE_ENV").ok();
    let settings = load_settings(env.as_deref()).context("failed to load configuration")?;

    init_tracing(&settings);

    tracing::info!("Starting voice bridge v{}", env!("CARGO_PKG_VERSION"));
    match dotenv {
        Ok(path) => tracing::debug!(path = %path.display(), "Loaded .env"),
        Err(e) => tracing::debug!(error = %e, "No .env loaded"),
    }
    tracing::info!(
        env = env.as_deref().unwrap_or("default"),
        input_rate = settings.audio.input_sample_rate,
        output_rate = settings.audio.output_sample_rate,
        semantic_turns = settings.turn.semantic_enabled,
        "Configuration loaded"
    );

    let providers = Providers::from_settings(&settings).context("failed to set up providers")?;

    let mut state = AppState::new(settings.clone(), providers);
    if settings.observability.metrics_enabled {
        let handle = init_metrics().context("failed to install metrics recorder")?;
        state = state.with_metrics(handle);
        tracing::info!("Prometheus metrics at /metrics");
    }

    let app = create_router(state);

    let addr: SocketAddr = format!("{}:{}", settings.server.host, settings.server.port)
        .parse()
        .with_context(|| format!("invalid listen address {}", settings.server.host))?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {}", addr))?;
    tracing::info!(%addr, ws_path = %settings.server.ws_path, "Listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    tracing::info!("Server shutdown complete");
    Ok(())
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
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
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating graceful shutdown...");
        }
        _ = terminate => {
            tracing::info!("Received SIGTERM, initiating graceful shutdown...");
        }
    }
}

fn init_tracing(settings: &Settings) {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        let level = &settings.observability.log_level;
        format!("voice_bridge={},tower_http=debug", level).into()
    });

    let fmt_layer = if settings.observability.log_json {
        tracing_subscriber::fmt::layer().json().boxed()
    } else {
        tracing_subscriber::fmt::layer().boxed()
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .init();
}
