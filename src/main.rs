use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use gw2auth_core::{app, config::Config, state::AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    dotenvy::dotenv().ok();

    let config = Config::from_env()?;
    tracing::info!("✅ Configuration loaded successfully");

    let state = AppState::new(&config)?;
    tracing::info!("✅ AppState initialized");

    let listener = tokio::net::TcpListener::bind(config.bind_address).await?;
    tracing::info!("🚀 Server listening on http://{}", config.bind_address);

    axum::serve(listener, app(state)).await?;

    Ok(())
}
