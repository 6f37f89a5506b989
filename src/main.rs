// src/main.rs
use keyfort::utils::config::Config;
use keyfort::Application;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();

    // Log to a daily-rotated file; level via RUST_LOG.
    let file_appender = tracing_appender::rolling::daily("logs", "keyfort.log");
    let (non_blocking, _guard) = tracing_appender::non_blocking(file_appender);
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with_writer(non_blocking)
        .with_ansi(false)
        .init();

    let config = Config::new()?;

    info!("Starting Keyfort Server v{}", env!("CARGO_PKG_VERSION"));
    let application = Application::new(config).await?;
    application.serve().await?;

    Ok(())
}
