use anyhow::Result;
use app_server::{config::Config, logging, server, ConfigSource};
use tracing::{info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    // Logging is configured from the loaded settings, so load first
    let (config, source) = Config::load();
    logging::init(&config.log);

    match &source {
        ConfigSource::Defaults => info!("No config file found, using defaults"),
        ConfigSource::File(path) => info!(path = %path.display(), "Loaded config file"),
        ConfigSource::Fallback { path, reason } => warn!(
            path = %path.display(),
            reason = %reason,
            "Config file could not be used, falling back to defaults"
        ),
    }

    info!("Starting {}...", config.app.name);

    server::start_server(config).await?;

    Ok(())
}
