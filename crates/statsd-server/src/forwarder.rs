// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Raw datagram relay to downstream statsd peers.
//!
//! The forwarder keeps a list of destinations and a pool of connected
//! outbound UDP sockets, one per destination that could actually be reached.
//! The pool is rebuilt wholesale on a periodic "socket lifetime" timer to
//! absorb DNS and route changes; a destination missing from the pool is
//! simply skipped on relay. Failures are isolated per destination: a send
//! error evicts that one socket, a rebuild error prunes that one destination.

use std::io;

use derive_more::Display;
use hashbrown::HashMap;
use serde::Deserialize;
use thiserror::Error;
use tokio::net::UdpSocket;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, warn};

use crate::dispatcher::Receiver;

/// One downstream statsd peer, identified by value equality of both fields.
///
/// Deserialization rejects anything but exactly `{hostname, port}`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Deserialize, Display)]
#[serde(deny_unknown_fields)]
#[display("{hostname}:{port}")]
pub struct ForwardDestination {
    pub hostname: String,
    pub port: u16,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ForwarderError {
    #[error("forwarding destination has an empty hostname")]
    EmptyHostname,
    #[error("forwarding destination '{0}' has port 0")]
    ZeroPort(String),
    #[error("forwarder service unavailable: {0}")]
    ServiceUnavailable(String),
}

#[derive(Default)]
pub struct Forwarder {
    destinations: Vec<ForwardDestination>,
    sockets: HashMap<ForwardDestination, UdpSocket>,
}

impl Forwarder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the destination list wholesale after validating every entry.
    /// On a validation error no partial state is applied.
    pub fn set_destinations(
        &mut self,
        destinations: Vec<ForwardDestination>,
    ) -> Result<(), ForwarderError> {
        for destination in &destinations {
            if destination.hostname.trim().is_empty() {
                return Err(ForwarderError::EmptyHostname);
            }
            if destination.port == 0 {
                return Err(ForwarderError::ZeroPort(destination.hostname.clone()));
            }
        }
        self.destinations = destinations;
        Ok(())
    }

    /// Tears the pool down and reconnects every current destination.
    ///
    /// A destination that can't be connected (e.g. resolution failure) is
    /// pruned from the list entirely, not just from the pool, so only the
    /// destinations with a live socket remain. Returns the pool size.
    pub async fn rebuild_socket_pool(&mut self) -> usize {
        self.sockets.clear();
        let mut kept = Vec::with_capacity(self.destinations.len());
        for destination in std::mem::take(&mut self.destinations) {
            match connect(&destination).await {
                Ok(socket) => {
                    self.sockets.insert(destination.clone(), socket);
                    kept.push(destination);
                }
                Err(e) => {
                    warn!("Couldn't create a socket to {destination}. Pruning destination from forwarder. ({e})");
                }
            }
        }
        self.destinations = kept;
        debug!(
            "forwarder socket pool rebuilt: {} destination(s) live",
            self.sockets.len()
        );
        self.sockets.len()
    }

    /// Broadcasts the raw message to every pooled destination.
    ///
    /// A send failure evicts only that destination's socket; the destination
    /// stays in the list so the next rebuild retries it. Never fails out.
    pub fn relay(&mut self, msg: &[u8]) {
        let mut dead = Vec::new();
        for (destination, socket) in &self.sockets {
            if let Err(e) = socket.try_send(msg) {
                error!("Couldn't send message to {destination}. Stopping this output. ({e})");
                dead.push(destination.clone());
            }
        }
        for destination in dead {
            self.sockets.remove(&destination);
        }
    }

    #[must_use]
    pub fn destinations(&self) -> &[ForwardDestination] {
        &self.destinations
    }

    #[must_use]
    pub fn pool_size(&self) -> usize {
        self.sockets.len()
    }
}

async fn connect(destination: &ForwardDestination) -> io::Result<UdpSocket> {
    let socket = UdpSocket::bind("0.0.0.0:0").await?;
    socket
        .connect((destination.hostname.as_str(), destination.port))
        .await?;
    Ok(socket)
}

#[derive(Debug)]
pub enum ForwarderCommand {
    Relay(Vec<u8>),
    SetDestinations(
        Vec<ForwardDestination>,
        oneshot::Sender<Result<(), ForwarderError>>,
    ),
    Rebuild(oneshot::Sender<usize>),
    Shutdown,
}

/// Cloneable handle to the forwarder's owning task.
#[derive(Clone)]
pub struct ForwarderHandle {
    tx: mpsc::UnboundedSender<ForwarderCommand>,
}

impl ForwarderHandle {
    pub fn relay(&self, msg: Vec<u8>) -> Result<(), mpsc::error::SendError<ForwarderCommand>> {
        self.tx.send(ForwarderCommand::Relay(msg))
    }

    pub async fn set_destinations(
        &self,
        destinations: Vec<ForwardDestination>,
    ) -> Result<(), ForwarderError> {
        let (response_tx, response_rx) = oneshot::channel();
        self.tx
            .send(ForwarderCommand::SetDestinations(destinations, response_tx))
            .map_err(|e| ForwarderError::ServiceUnavailable(e.to_string()))?;
        response_rx
            .await
            .map_err(|e| ForwarderError::ServiceUnavailable(e.to_string()))?
    }

    /// Rebuilds the socket pool and reports how many destinations are live.
    pub async fn rebuild(&self) -> Result<usize, ForwarderError> {
        let (response_tx, response_rx) = oneshot::channel();
        self.tx
            .send(ForwarderCommand::Rebuild(response_tx))
            .map_err(|e| ForwarderError::ServiceUnavailable(e.to_string()))?;
        response_rx
            .await
            .map_err(|e| ForwarderError::ServiceUnavailable(e.to_string()))
    }

    pub fn shutdown(&self) -> Result<(), mpsc::error::SendError<ForwarderCommand>> {
        self.tx.send(ForwarderCommand::Shutdown)
    }
}

/// Single-owner task around [`Forwarder`], shared lock-free between the
/// dispatcher hot path and the periodic rebuild timer.
pub struct ForwarderService {
    forwarder: Forwarder,
    rx: mpsc::UnboundedReceiver<ForwarderCommand>,
}

impl ForwarderService {
    #[must_use]
    pub fn new() -> (Self, ForwarderHandle) {
        let (tx, rx) = mpsc::unbounded_channel();
        let service = Self {
            forwarder: Forwarder::new(),
            rx,
        };
        (service, ForwarderHandle { tx })
    }

    pub async fn run(mut self) {
        debug!("Forwarder service started");

        while let Some(command) = self.rx.recv().await {
            match command {
                ForwarderCommand::Relay(msg) => {
                    self.forwarder.relay(&msg);
                }
                ForwarderCommand::SetDestinations(destinations, response_tx) => {
                    let result = self.forwarder.set_destinations(destinations);
                    if response_tx.send(result).is_err() {
                        error!("Failed to send set_destinations response - receiver dropped");
                    }
                }
                ForwarderCommand::Rebuild(response_tx) => {
                    let live = self.forwarder.rebuild_socket_pool().await;
                    if response_tx.send(live).is_err() {
                        error!("Failed to send rebuild response - receiver dropped");
                    }
                }
                ForwarderCommand::Shutdown => {
                    debug!("Forwarder service shutting down");
                    break;
                }
            }
        }

        debug!("Forwarder service stopped");
    }
}

/// Dispatcher receiver that relays every raw datagram downstream.
pub struct RelayReceiver {
    handle: ForwarderHandle,
}

impl RelayReceiver {
    #[must_use]
    pub fn new(handle: ForwarderHandle) -> Self {
        Self { handle }
    }
}

impl Receiver for RelayReceiver {
    fn name(&self) -> &'static str {
        "forwarder"
    }

    fn ingest(&mut self, msg: &[u8]) {
        if let Err(e) = self.handle.relay(msg.to_vec()) {
            error!("Failed to send datagram to forwarder: {}", e);
        }
    }
}
