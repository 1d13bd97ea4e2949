use anyhow::{Context, Result};
use common::ServiceConfig;
use gpu_server::{create_router, AppState};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_target(false)
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "gpu_server=info,tower_http=info".into()),
        )
        .init();

    info!("======================================================================");
    info!("GPU Matrix Addition Server v{} - Starting", env!("CARGO_PKG_VERSION"));
    info!("======================================================================");

    let config = ServiceConfig::from_env()?;
    info!("Requested device: {:?}", config.device);
    info!("Upload limit: {} MB", config.max_upload_mb);
    info!("GPU probe: {}", config.nvidia_smi);

    let state = AppState::from_config(&config).context("Failed to initialise compute device")?;
    info!("✓ Compute backend ready: {}", state.device_label());

    let app = create_router(state, config.max_upload_bytes());

    let addr = config.bind_address();
    info!("Server ready on http://{}", addr);
    info!("======================================================================");

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    axum::serve(listener, app).await?;

    Ok(())
}
