// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Single-owner task wrapping the [`Aggregator`].
//!
//! All table mutation is routed through one service task reached via message
//! passing, so a flush can never observe a half-applied datagram and the hot
//! ingestion path never contends on a lock.

use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error};

use crate::aggregator::{Aggregator, Snapshot};
use crate::dispatcher::Receiver;

#[derive(Debug)]
pub enum AggregatorCommand {
    Ingest(Vec<u8>),
    Flush(oneshot::Sender<Snapshot>),
    Shutdown,
}

#[derive(Clone)]
pub struct AggregatorHandle {
    tx: mpsc::UnboundedSender<AggregatorCommand>,
}

impl AggregatorHandle {
    pub fn ingest(
        &self,
        msg: Vec<u8>,
    ) -> Result<(), mpsc::error::SendError<AggregatorCommand>> {
        self.tx.send(AggregatorCommand::Ingest(msg))
    }

    /// Drains the tables for this flush window.
    pub async fn flush(&self) -> Result<Snapshot, String> {
        let (response_tx, response_rx) = oneshot::channel();
        self.tx
            .send(AggregatorCommand::Flush(response_tx))
            .map_err(|e| format!("Failed to send flush command: {}", e))?;

        response_rx
            .await
            .map_err(|e| format!("Failed to receive flush response: {}", e))
    }

    pub fn shutdown(&self) -> Result<(), mpsc::error::SendError<AggregatorCommand>> {
        self.tx.send(AggregatorCommand::Shutdown)
    }
}

pub struct AggregatorService {
    aggregator: Aggregator,
    rx: mpsc::UnboundedReceiver<AggregatorCommand>,
}

impl AggregatorService {
    #[must_use]
    pub fn new() -> (Self, AggregatorHandle) {
        let (tx, rx) = mpsc::unbounded_channel();
        let service = Self {
            aggregator: Aggregator::new(),
            rx,
        };
        (service, AggregatorHandle { tx })
    }

    pub async fn run(mut self) {
        debug!("Aggregator service started");

        while let Some(command) = self.rx.recv().await {
            match command {
                AggregatorCommand::Ingest(msg) => {
                    self.aggregator.ingest(&msg);
                }

                AggregatorCommand::Flush(response_tx) => {
                    let snapshot = self.aggregator.drain_and_clear();
                    if response_tx.send(snapshot).is_err() {
                        error!("Failed to send flush response - receiver dropped");
                    }
                }

                AggregatorCommand::Shutdown => {
                    debug!("Aggregator service shutting down");
                    break;
                }
            }
        }

        debug!("Aggregator service stopped");
    }
}

/// Dispatcher receiver that feeds raw datagrams to the aggregator service.
pub struct MetricsReceiver {
    handle: AggregatorHandle,
}

impl MetricsReceiver {
    #[must_use]
    pub fn new(handle: AggregatorHandle) -> Self {
        Self { handle }
    }
}

impl Receiver for MetricsReceiver {
    fn name(&self) -> &'static str {
        "aggregator"
    }

    fn ingest(&mut self, msg: &[u8]) {
        if let Err(e) = self.handle.ingest(msg.to_vec()) {
            error!("Failed to send datagram to aggregator: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn ingest_then_flush_round_trip() {
        let (service, handle) = AggregatorService::new();
        let service_task = tokio::spawn(service.run());

        handle
            .ingest(b"foo:1|c\nfoo:1|c".to_vec())
            .expect("Failed to send datagram");
        handle
            .ingest(b"bar:25|ms".to_vec())
            .expect("Failed to send datagram");

        let snapshot = handle.flush().await.expect("Failed to flush");
        assert_eq!(snapshot.counters["foo"], 2.0);
        assert_eq!(snapshot.timers["bar"], vec![25]);

        handle.shutdown().expect("Failed to shutdown");
        service_task.await.expect("Service task failed");
    }

    #[tokio::test]
    async fn flush_is_atomic_with_respect_to_queued_ingests() {
        let (service, handle) = AggregatorService::new();
        let service_task = tokio::spawn(service.run());

        // Commands are applied in channel order: both datagrams land before
        // the flush that was enqueued after them.
        handle.ingest(b"n:1|c".to_vec()).expect("send failed");
        handle.ingest(b"n:1|c".to_vec()).expect("send failed");
        let snapshot = handle.flush().await.expect("Failed to flush");
        assert_eq!(snapshot.counters["n"], 2.0);

        let after = handle.flush().await.expect("Failed to flush");
        assert_eq!(after.counters["n"], 0.0);

        handle.shutdown().expect("Failed to shutdown");
        service_task.await.expect("Service task failed");
    }
}
