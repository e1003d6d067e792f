use credential_engine::{config::EngineConfig, CredentialEngine, EngineError};
use service_core::observability::logging::init_tracing;
use tokio::signal;

#[tokio::main]
async fn main() -> Result<(), EngineError> {
    // Fail fast on bad configuration
    let config = EngineConfig::from_env()?;

    init_tracing(
        &config.service_name,
        &config.common.log_level,
        config.common.otlp_endpoint.as_deref(),
    )?;

    tracing::info!(
        service = %config.service_name,
        version = env!("CARGO_PKG_VERSION"),
        environment = ?config.environment,
        redis = config.redis.is_some(),
        database = config.database.is_some(),
        "Starting credential engine"
    );

    let engine = CredentialEngine::build(config).await?;
    engine.health_check().await?;

    let jwks = engine.jwks()?;
    tracing::info!(
        keys = jwks.keys.len(),
        document = %serde_json::to_string(&jwks).unwrap_or_default(),
        "Publishing key set"
    );

    shutdown_signal().await;

    drop(engine);
    tracing::info!("Credential engine shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
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
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received, stopping");
}
