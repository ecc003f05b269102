// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Daemon orchestration: wires the dispatcher, services and timers together
//! from an already-parsed [`Config`] and runs the UDP ingress loop until the
//! cancellation token fires.

use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use thiserror::Error;
use tokio::time::{interval, timeout};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::aggregator_service::{AggregatorHandle, AggregatorService, MetricsReceiver};
use crate::config::Config;
use crate::dispatcher::Dispatcher;
use crate::forwarder::{ForwarderError, ForwarderHandle, ForwarderService, RelayReceiver};
use crate::graphite::{self, GraphiteSink};
use crate::health::run_health_server;
use crate::rate::{RateReceiver, RateTracker, RATE_WINDOWS_SECS};
use crate::server::Server;

// Bounds one flush delivery so a wedged sink can't stall later ticks.
const FLUSH_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Error)]
pub enum DaemonError {
    #[error("invalid forwarding configuration: {0}")]
    Forwarding(#[from] ForwarderError),
    #[error("couldn't bind statsd listener on {addr}: {source}")]
    Bind {
        addr: String,
        source: std::io::Error,
    },
}

fn unix_timestamp() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_secs() as i64)
        .unwrap_or_default()
}

/// Runs the daemon to completion (i.e. until `cancel_token` is cancelled).
///
/// Receivers are registered in a fixed order - aggregator, forwarder,
/// rate-counter - so every datagram reaches them deterministically.
pub async fn run(config: Config, cancel_token: CancellationToken) -> Result<(), DaemonError> {
    let mut dispatcher = Dispatcher::new();

    let (aggregator_service, aggregator_handle) = AggregatorService::new();
    tokio::spawn(aggregator_service.run());
    dispatcher.register_receiver(Box::new(MetricsReceiver::new(aggregator_handle.clone())));

    if config.forwarding {
        let forwarder_handle = start_forwarder(&config, &cancel_token).await?;
        dispatcher.register_receiver(Box::new(RelayReceiver::new(forwarder_handle)));
    }

    if let Some(health_port) = config.health_port {
        let tracker = Arc::new(RateTracker::new());
        dispatcher.register_receiver(Box::new(RateReceiver::new(Arc::clone(&tracker))));
        start_rate_timers(&tracker, &cancel_token);

        let bind = config.bind.clone();
        let health_token = cancel_token.clone();
        tokio::spawn(async move {
            if let Err(e) = run_health_server(&bind, health_port, tracker, health_token).await {
                error!("couldn't start the health endpoint on port {health_port}: {e}");
            }
        });
    }

    start_flush_timer(&config, aggregator_handle.clone(), &cancel_token);

    let server = Server::bind(
        &config.bind,
        config.port,
        dispatcher,
        cancel_token.clone(),
    )
    .await
    .map_err(|source| DaemonError::Bind {
        addr: format!("{}:{}", config.bind, config.port),
        source,
    })?;

    server.spin().await;

    if aggregator_handle.shutdown().is_err() {
        debug!("aggregator service already stopped");
    }
    Ok(())
}

/// Builds the forwarder service, applies the configured destinations and
/// performs the initial pool build, then schedules the periodic rebuild.
async fn start_forwarder(
    config: &Config,
    cancel_token: &CancellationToken,
) -> Result<ForwarderHandle, DaemonError> {
    let (service, handle) = ForwarderService::new();
    tokio::spawn(service.run());

    handle
        .set_destinations(config.forwarding_destinations.clone())
        .await?;
    match handle.rebuild().await {
        Ok(live) => info!("forwarding enabled: {live} destination(s) live"),
        Err(e) => warn!("initial forwarder socket build failed: {e}"),
    }

    let lifetime = Duration::from_secs(config.forwarding_socket_lifetime.max(1));
    let rebuild_handle = handle.clone();
    let rebuild_token = cancel_token.clone();
    tokio::spawn(async move {
        let mut ticker = interval(lifetime);
        ticker.tick().await; // discard first tick, which is instantaneous
        loop {
            tokio::select! {
                () = rebuild_token.cancelled() => break,
                _ = ticker.tick() => {
                    if let Err(e) = rebuild_handle.rebuild().await {
                        warn!("forwarder socket rebuild failed: {e}");
                    }
                }
            }
        }
    });

    Ok(handle)
}

fn start_rate_timers(tracker: &Arc<RateTracker>, cancel_token: &CancellationToken) {
    for seconds in RATE_WINDOWS_SECS {
        let tracker = Arc::clone(tracker);
        let token = cancel_token.clone();
        tokio::spawn(async move {
            let mut ticker = interval(Duration::from_secs(seconds));
            ticker.tick().await;
            loop {
                tokio::select! {
                    () = token.cancelled() => break,
                    _ = ticker.tick() => tracker.tick_window(seconds),
                }
            }
        });
    }
}

/// Periodic flush: drain the aggregator, render the Carbon payload, ship it
/// over a fresh connection. A failed delivery drops this window's payload.
fn start_flush_timer(
    config: &Config,
    aggregator_handle: AggregatorHandle,
    cancel_token: &CancellationToken,
) {
    let sink = GraphiteSink::new(config.graphite_host.clone(), config.graphite_port);
    let flush_interval = Duration::from_secs(config.flush_interval.max(1));
    let token = cancel_token.clone();

    tokio::spawn(async move {
        let mut ticker = interval(flush_interval);
        ticker.tick().await; // discard first tick, which is instantaneous
        loop {
            tokio::select! {
                () = token.cancelled() => break,
                _ = ticker.tick() => {
                    let snapshot = match aggregator_handle.flush().await {
                        Ok(snapshot) => snapshot,
                        Err(e) => {
                            error!("flush failed: {e}");
                            continue;
                        }
                    };
                    debug!(
                        "Flushing {} counters and {} timers to Graphite",
                        snapshot.counters.len(),
                        snapshot.timers.len()
                    );
                    let payload = graphite::render(&snapshot, unix_timestamp());
                    match timeout(FLUSH_TIMEOUT, sink.ship(&payload)).await {
                        Ok(Ok(())) => {}
                        Ok(Err(e)) => warn!("dropping this window's payload: {e}"),
                        Err(_) => warn!("graphite delivery timed out; dropping payload"),
                    }
                }
            }
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timestamps_are_unix_seconds() {
        let ts = unix_timestamp();
        // 2023-01-01 in seconds; sanity-bound the clock reading.
        assert!(ts > 1_672_531_200);
    }
}
