// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! UDP ingress loop.
//!
//! Binds the statsd listening socket and hands every datagram, byte for byte,
//! to the [`Dispatcher`](crate::dispatcher::Dispatcher). UDP gives no ordering
//! or delivery guarantee between packets and none is reconstructed here;
//! datagrams that overflow the OS receive buffer are the kernel's to drop.

use std::io;
use std::net::SocketAddr;

use tokio_util::sync::CancellationToken;
use tracing::{error, info, trace};

use crate::dispatcher::Dispatcher;

// Large enough for any payload the bundled client emits; statsd senders are
// expected to keep datagrams under the path MTU anyway.
const BUFFER_SIZE: usize = 8192;

// BufferReader abstracts the datagram source so tests can replay fixed bytes.
enum BufferReader {
    UdpSocket(tokio::net::UdpSocket),

    /// Mirror reader for testing - replays a fixed buffer
    #[allow(dead_code)]
    MirrorTest(Vec<u8>, SocketAddr),
}

impl BufferReader {
    async fn read(&self) -> io::Result<(Vec<u8>, SocketAddr)> {
        match self {
            BufferReader::UdpSocket(socket) => {
                // UDP socket: blocks until a packet arrives
                let mut buf = [0; BUFFER_SIZE];
                let (amt, src) = socket.recv_from(&mut buf).await?;
                Ok((buf[..amt].to_owned(), src))
            }
            BufferReader::MirrorTest(data, src) => {
                // Mirror Reader: returns immediately with stored data
                Ok((data.clone(), *src))
            }
        }
    }
}

/// Statsd server: receives datagrams and fans them out.
pub struct Server {
    cancel_token: CancellationToken,
    dispatcher: Dispatcher,
    buffer_reader: BufferReader,
}

impl Server {
    /// Binds the listening socket. This is the one bootstrap step whose
    /// failure is fatal to the daemon.
    pub async fn bind(
        bind: &str,
        port: u16,
        dispatcher: Dispatcher,
        cancel_token: CancellationToken,
    ) -> io::Result<Server> {
        let addr = format!("{}:{}", bind, port);
        let socket = tokio::net::UdpSocket::bind(&addr).await?;
        info!("statsd server listening on {}", addr);
        Ok(Server {
            cancel_token,
            dispatcher,
            buffer_reader: BufferReader::UdpSocket(socket),
        })
    }

    /// Main event loop: consume datagrams until cancelled.
    pub async fn spin(mut self) {
        let cancel_token = self.cancel_token.clone();
        loop {
            tokio::select! {
                () = cancel_token.cancelled() => break,
                () = self.consume() => {}
            }
        }
        info!("statsd server stopped");
    }

    /// Receives one datagram and dispatches it.
    async fn consume(&mut self) {
        match self.buffer_reader.read().await {
            Ok((buf, src)) => {
                trace!("Received {} bytes from {}", buf.len(), src);
                self.dispatcher.dispatch(&buf);
            }
            Err(e) => {
                error!("Failed to read datagram: {}", e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregator_service::{AggregatorService, MetricsReceiver};
    use std::net::{IpAddr, Ipv4Addr};

    #[tokio::test]
    async fn mirror_datagram_reaches_the_aggregator() {
        let (service, handle) = AggregatorService::new();
        let service_task = tokio::spawn(service.run());

        let mut dispatcher = Dispatcher::new();
        dispatcher.register_receiver(Box::new(MetricsReceiver::new(handle.clone())));

        let mut server = Server {
            cancel_token: CancellationToken::new(),
            dispatcher,
            buffer_reader: BufferReader::MirrorTest(
                b"foo:1|c\nfoo:1|c".to_vec(),
                SocketAddr::new(IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1)), 0),
            ),
        };
        server.consume().await;

        let snapshot = handle.flush().await.expect("Failed to flush");
        assert_eq!(snapshot.counters["foo"], 2.0);

        handle.shutdown().expect("Failed to shutdown");
        service_task.await.expect("Service task failed");
    }
}
