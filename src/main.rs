use imagematch::{create_router, init, AppState, Config};

use std::net::SocketAddr;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize the application
    init()?;

    let config = Config::from_env()?;
    let addr: SocketAddr = format!("{}:{}", config.bind_addr, config.port).parse()?;

    log::info!("Backend: {}", config.catalog.backend_api_url);
    if let Some(path) = &config.catalog.catalog_file {
        log::info!("Serving static catalog from {}", path.display());
    }

    // Initialize application state
    let state = AppState::new(config)?;
    log::info!(
        "Embedding generator: {} ({} dimensions)",
        state.generator.model_name(),
        state.generator.dimension()
    );

    let app = create_router(state);

    // Set up the server
    let listener = tokio::net::TcpListener::bind(addr).await?;
    log::info!("Server listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    log::info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        log::error!("Failed to listen for shutdown signal: {}", e);
    }
}
