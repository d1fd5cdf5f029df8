//! pawtraild — runner-side tracking daemon.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::sync::broadcast;

use pawtrail_core::config::PawtrailConfig;
use pawtrail_tracking::{
    geolocation, ConnectionManager, DeliverySession, EnvToken, FeedStatus, LocationSampler,
    RunnerApi, RunnerPresence, TokenProvider, WsTransport,
};

enum Mode {
    Online,
    Track(String),
}

fn print_usage() {
    println!("Usage: pawtraild [command]");
    println!();
    println!("Commands:");
    println!("  online              Go online and upload position until Ctrl-C (default)");
    println!("  track <booking_id>  Follow a delivery's tracking feed until Ctrl-C");
    println!();
    println!("The bearer token is read from the variable named by auth.token_env.");
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let args: Vec<&str> = args.iter().map(String::as_str).collect();
    let mode = match args.as_slice() {
        ["online"] | [] => Mode::Online,
        ["track", booking_id] => Mode::Track(booking_id.to_string()),
        ["help"] | ["--help"] | ["-h"] => {
            print_usage();
            return Ok(());
        }
        other => {
            eprintln!("Unknown command: {}", other.join(" "));
            eprintln!();
            print_usage();
            std::process::exit(1);
        }
    };

    // Load config
    if let Err(e) = PawtrailConfig::write_default_if_missing() {
        tracing::warn!(error = %e, "failed to write default config");
    }
    let config = PawtrailConfig::load().unwrap_or_else(|e| {
        tracing::warn!(error = %e, "failed to load config, using defaults");
        PawtrailConfig::default()
    });
    tracing::info!(
        base_url = %config.api.base_url,
        ws_url = %config.api.ws_url,
        source = ?config.geolocation.source,
        "pawtraild starting"
    );

    let tokens: Arc<dyn TokenProvider> = Arc::new(EnvToken::new(config.auth.token_env.clone()));
    if tokens.access_token().is_none() {
        tracing::warn!(var = %config.auth.token_env, "no token in environment, backend calls will fail");
    }

    let source = geolocation::from_config(&config.geolocation).context("failed to set up positioning")?;
    let api = Arc::new(RunnerApi::new(&config.api, tokens.clone()).context("failed to build HTTP client")?);
    let sampler = Arc::new(LocationSampler::new(
        source.clone(),
        api.clone(),
        config.sampler.clone(),
    ));

    // ── Shutdown channel ─────────────────────────────────────────────────────
    let (shutdown_tx, _) = broadcast::channel::<()>(1);

    {
        let shutdown = shutdown_tx.clone();
        tokio::spawn(async move {
            tokio::signal::ctrl_c().await.ok();
            tracing::info!("shutdown signal received");
            let _ = shutdown.send(());
        });
    }

    match mode {
        Mode::Online => {
            let presence = RunnerPresence::new(source, api, sampler, config.sampler.fix_timeout());
            run_online(presence, shutdown_tx.subscribe()).await
        }
        Mode::Track(booking_id) => {
            let connection = ConnectionManager::from_config(
                Arc::new(WsTransport),
                tokens,
                &config.api,
                &config.tracking,
            );
            let session = DeliverySession::new(connection, sampler);
            run_track(session, &booking_id, shutdown_tx.subscribe()).await
        }
    }
}

async fn run_online(presence: RunnerPresence, mut shutdown: broadcast::Receiver<()>) -> Result<()> {
    let coords = presence.go_online().await.context("failed to go online")?;
    tracing::info!(lat = coords.latitude, lng = coords.longitude, "online, sampling position");

    let mut health = presence.sampler().subscribe_health();
    let mut status = tokio::time::interval(Duration::from_secs(60));
    status.tick().await;

    loop {
        tokio::select! {
            _ = shutdown.recv() => break,
            changed = health.changed() => {
                if changed.is_err() {
                    break;
                }
                let current = *health.borrow_and_update();
                tracing::info!(health = ?current, "positioning health changed");
            }
            _ = status.tick() => {
                let last = presence.sampler().last_known();
                tracing::info!(
                    lat = last.map(|c| c.latitude),
                    lng = last.map(|c| c.longitude),
                    failures = presence.sampler().consecutive_failures(),
                    "sampler status"
                );
            }
        }
    }

    if let Err(e) = presence.go_offline().await {
        tracing::warn!(error = %e, "failed to go offline");
    }
    Ok(())
}

async fn run_track(
    session: DeliverySession,
    booking_id: &str,
    mut shutdown: broadcast::Receiver<()>,
) -> Result<()> {
    let mut view = session.subscribe();
    session.start(booking_id);

    let result = loop {
        tokio::select! {
            _ = shutdown.recv() => break Ok(()),
            changed = view.changed() => {
                if changed.is_err() {
                    break Ok(());
                }
                let current = view.borrow_and_update().clone();
                if let Some(position) = &current.position {
                    tracing::info!(
                        lat = position.latitude,
                        lng = position.longitude,
                        speed_kmh = position.speed_kmh,
                        heading = position.heading_degrees,
                        status = ?current.status,
                        degraded = current.degraded,
                        elapsed = %session.elapsed_label(),
                        "position"
                    );
                }
                if let FeedStatus::Unavailable(reason) = current.status {
                    break Err(anyhow::anyhow!("tracking unavailable: {reason}"));
                }
            }
        }
    };

    let elapsed = session.elapsed_label();
    let status = session.view().status;
    session.stop();
    tracing::info!(booking_id, status = ?status, elapsed = %elapsed, "tracking finished");
    result
}
