use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive("taxobot=info".parse()?)
                .add_directive("taxobot_sdk=info".parse()?),
        )
        .init();

    let config = taxobot::config::BotConfig::parse();
    tracing::info!(
        "Starting taxobot as {} on {}",
        config.nick,
        config.server_addr()
    );
    taxobot::bot::run(config).await
}
