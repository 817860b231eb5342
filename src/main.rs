use anyhow::Context;
use chat_gateway::config::GatewayConfig;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,chat_gateway=debug")),
        )
        .init();

    let config = GatewayConfig::from_env();
    info!(
        providers = ?config.configured_providers(),
        bind_addr = config.bind_addr.as_str(),
        "starting chat gateway"
    );

    chat_gateway::server::serve(config)
        .await
        .context("gateway server failed")
}
