use std::sync::Arc;

use ride_dispatch::{config::AppConfig, handlers, state::AppState};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();
    let config = AppConfig::from_env();

    tracing_subscriber::fmt().with_max_level(config.log_level).init();

    let bind_address = config.bind_address();
    let app_state = AppState::new(config).await?;
    let app = handlers::router(Arc::new(app_state));

    let listener = tokio::net::TcpListener::bind(&bind_address).await?;
    tracing::info!("ride-dispatch listening on {}", bind_address);
    axum::serve(listener, app).await?;
    Ok(())
}
