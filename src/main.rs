//! stream-relay entry point.
//!
//! Connects to the stream configured in the environment, joins the rooms in
//! `STREAM_ROOMS`, and logs every payload until Ctrl-C.

use anyhow::Context;
use tracing_subscriber::EnvFilter;

use stream_relay::config::ClientConfig;
use stream_relay::domain::ConnectionEvent;
use stream_relay::service::Client;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    if std::env::var("LOG_FORMAT").is_ok_and(|v| v.eq_ignore_ascii_case("json")) {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }

    // Load configuration
    let config = ClientConfig::from_env().context("loading configuration")?;
    let rooms: Vec<String> = std::env::var("STREAM_ROOMS")
        .unwrap_or_else(|_| "latest".to_string())
        .split(',')
        .map(str::trim)
        .filter(|room| !room.is_empty())
        .map(str::to_string)
        .collect();

    let client = Client::with_config(config).context("starting stream client")?;

    for room in &rooms {
        client.join(room.as_str())?;
        let name = room.clone();
        client.on(room.as_str(), move |data| {
            tracing::info!(
                room = %name,
                received_at = %chrono::Utc::now().to_rfc3339(),
                %data,
                "stream update"
            );
        });
    }
    tracing::info!(?rooms, "joined rooms");

    let mut status = client.status();
    let watcher = tokio::spawn(async move {
        while let Ok(event) = status.recv().await {
            match &event {
                ConnectionEvent::ReconnectAbandoned { attempts, .. } => {
                    tracing::error!(
                        attempts,
                        at = %event.timestamp().to_rfc3339(),
                        "stream unreachable, no further reconnects"
                    );
                }
                other => tracing::debug!(
                    event = other.kind(),
                    role = ?other.role(),
                    at = %other.timestamp().to_rfc3339(),
                    "connection status"
                ),
            }
        }
    });

    tokio::signal::ctrl_c()
        .await
        .context("waiting for shutdown signal")?;
    tracing::info!("shutting down");

    client.shutdown().await?;
    watcher.abort();

    Ok(())
}
