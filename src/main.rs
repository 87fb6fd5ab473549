use car_price_api::{http, AppConfig, ServiceHandle};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cfg = AppConfig::from_env()?;
    tracing::info!(
        "feature schema {}; artifact {} ({:?}, {:?} mode)",
        cfg.feature_schema,
        cfg.artifact.path.display(),
        cfg.artifact.format,
        cfg.artifact.mode
    );

    let handle = Arc::new(ServiceHandle::new(&cfg));
    if cfg.artifact.eager {
        // A missing or broken artifact is fatal before we accept traffic
        let svc = handle.get().await?;
        tracing::info!("model ready; contract {:?}", svc.contract());
    }

    let state = http::AppState {
        service: handle,
        validate_inputs: cfg.validate_inputs,
        log_predictions: cfg.log_predictions,
    };
    let app = http::router(state);

    tracing::info!("listening on {}", cfg.bind_addr);
    let listener = tokio::net::TcpListener::bind(&cfg.bind_addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}
