use std::env;
use std::path::PathBuf;

use anyhow::anyhow;
use tokio::net::TcpListener;

use aria::{AriaConfig, AppState, routes};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt::init();

    // Handle CLI arguments: an optional --config <file>
    let mut args = env::args();
    let _ = args.next();
    let config = match args.next() {
        Some(flag) if flag == "--config" || flag == "-c" => {
            let path = args
                .next()
                .map(PathBuf::from)
                .ok_or_else(|| anyhow!("--config requires a file path"))?;
            if let Some(extra) = args.next() {
                anyhow::bail!("Unexpected argument '{extra}' after config path");
            }
            AriaConfig::from_file(&path).map_err(|e| anyhow!(e.to_string()))?
        }
        Some(other) => {
            anyhow::bail!("Unknown argument '{other}'. Usage: aria [--config <file>]");
        }
        None => AriaConfig::from_env().map_err(|e| anyhow!(e.to_string()))?,
    };

    let address = config.server.address();

    // Create application state (engines + conversation handler)
    let app_state = AppState::new(config)?;

    // Combine REST and WebSocket routes
    let app = routes::api::create_api_router()
        .merge(routes::ws::create_ws_router())
        .with_state(app_state);

    let listener = TcpListener::bind(&address).await?;
    tracing::info!("Server listening on {address}");

    axum::serve(listener, app).await?;

    Ok(())
}
