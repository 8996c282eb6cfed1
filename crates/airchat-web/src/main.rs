use tracing::info;

use airchat_server::config::GatewayConfig;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let config = GatewayConfig::from_env()?;
    info!(irc_port = config.irc_port, data_dir = %config.data_dir.display(), "airchat-web starting");
    airchat_web::run(config).await
}
