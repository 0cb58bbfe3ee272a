use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use taxobot_sdk::client;
use taxobot_sdk::event::Event;
use taxobot_sdk::transcript::FileTranscript;
use tokio::net::TcpListener;

use crate::config::BotConfig;
use crate::relay::{self, RelayState};

/// How long a QUIT gets to reach the server on shutdown.
const QUIT_GRACE: Duration = Duration::from_secs(5);

/// Run the bot until the supervisor gives up or the process is interrupted.
pub async fn run(config: BotConfig) -> Result<()> {
    let transcript = FileTranscript::open(&config.logfile)?;

    let listen_addr = config.listen_addr();
    let listener = TcpListener::bind(&listen_addr)
        .await
        .with_context(|| format!("Failed to bind HTTP relay on {listen_addr}"))?;

    let (handle, mut events, mut supervisor) =
        client::connect(config.connect_config(), Box::new(transcript));

    tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            log_event(&event);
        }
    });

    let state = Arc::new(RelayState {
        handle: handle.clone(),
        network: config.network.clone(),
        query_timeout: config.query_timeout(),
    });
    let router = relay::router(state);
    tracing::info!("HTTP relay listening on {listen_addr}");
    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, router).await {
            tracing::error!("HTTP server error: {e}");
        }
    });

    let interrupted = tokio::select! {
        result = &mut supervisor => return result.context("Supervisor task failed")?,
        signal = tokio::signal::ctrl_c() => signal,
    };
    interrupted.context("Failed to listen for Ctrl-C")?;

    tracing::info!("Interrupted, quitting");
    handle.quit(Some("Shutting down")).await?;
    if tokio::time::timeout(QUIT_GRACE, supervisor).await.is_err() {
        tracing::warn!("Server did not close the link in time");
    }
    Ok(())
}

fn log_event(event: &Event) {
    match event {
        Event::Connected => tracing::info!("Connected, registering"),
        Event::Registered { nick } => tracing::info!("Registered as {nick}"),
        Event::Disconnected { reason } => tracing::debug!(%reason, "Link closed"),
        Event::ConnectFailed { reason, retry_in } => {
            tracing::debug!(%reason, retry_in = ?retry_in, "Connection attempt failed")
        }
    }
}
