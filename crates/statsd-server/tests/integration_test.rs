// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use statsd_server::config::Config;
use statsd_server::daemon;
use statsd_server::forwarder::ForwardDestination;
use tokio::io::AsyncReadExt;
use tokio::net::{TcpListener, UdpSocket};
use tokio::time::{sleep, timeout, Duration};
use tokio_util::sync::CancellationToken;

async fn free_udp_port() -> u16 {
    let socket = UdpSocket::bind("127.0.0.1:0")
        .await
        .expect("unable to bind UDP socket");
    socket.local_addr().expect("no local addr").port()
}

/// Accepts one Carbon connection and returns everything written on it.
async fn accept_carbon_payload(listener: &TcpListener) -> String {
    let (mut stream, _) = timeout(Duration::from_secs(10), listener.accept())
        .await
        .expect("timed out waiting for a graphite flush")
        .expect("accept failed");
    let mut payload = String::new();
    stream
        .read_to_string(&mut payload)
        .await
        .expect("read failed");
    payload
}

#[tokio::test]
async fn daemon_aggregates_and_flushes_to_graphite() {
    let statsd_port = free_udp_port().await;
    let carbon = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("unable to bind TCP listener");
    let carbon_port = carbon.local_addr().expect("no local addr").port();

    let config = Config {
        port: statsd_port,
        flush_interval: 1,
        graphite_host: "127.0.0.1".to_string(),
        graphite_port: carbon_port,
        ..Config::default()
    };

    let cancel_token = CancellationToken::new();
    let daemon_token = cancel_token.clone();
    let daemon_task = tokio::spawn(async move {
        daemon::run(config, daemon_token)
            .await
            .expect("daemon failed");
    });

    // Give the UDP listener a moment to come up before sending.
    sleep(Duration::from_millis(100)).await;

    let sender = UdpSocket::bind("127.0.0.1:0")
        .await
        .expect("unable to bind UDP socket");
    sender
        .send_to(b"foo:1|c\nfoo:1|c", ("127.0.0.1", statsd_port))
        .await
        .expect("send failed");

    // First flush carries the aggregated counter.
    let payload = accept_carbon_payload(&carbon).await;
    let lines: Vec<&str> = payload.lines().collect();
    assert!(
        lines.iter().any(|l| l.starts_with("foo 2 ")),
        "missing counter line in {payload:?}"
    );
    assert!(
        lines.iter().any(|l| l.starts_with("statsd.numStats 1 ")),
        "missing trailer in {payload:?}"
    );

    // The counter was reset, not removed: the next window renders zero.
    let payload = accept_carbon_payload(&carbon).await;
    assert!(
        payload.lines().any(|l| l.starts_with("foo 0 ")),
        "expected idle counter to render zero in {payload:?}"
    );

    cancel_token.cancel();
    // Nudge the UDP listener out of its blocking read so spin() can observe
    // the cancellation.
    let _ = sender.send_to(b"\n", ("127.0.0.1", statsd_port)).await;
    timeout(Duration::from_secs(5), daemon_task)
        .await
        .expect("daemon didn't shut down")
        .expect("daemon task failed");
}

#[tokio::test]
async fn daemon_renders_timer_summaries() {
    let statsd_port = free_udp_port().await;
    let carbon = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("unable to bind TCP listener");
    let carbon_port = carbon.local_addr().expect("no local addr").port();

    let config = Config {
        port: statsd_port,
        flush_interval: 1,
        graphite_host: "127.0.0.1".to_string(),
        graphite_port: carbon_port,
        ..Config::default()
    };

    let cancel_token = CancellationToken::new();
    let daemon_token = cancel_token.clone();
    tokio::spawn(async move {
        daemon::run(config, daemon_token)
            .await
            .expect("daemon failed");
    });
    sleep(Duration::from_millis(100)).await;

    let sender = UdpSocket::bind("127.0.0.1:0")
        .await
        .expect("unable to bind UDP socket");
    let samples: Vec<String> = (1..=100).map(|ms| format!("glork:{ms}|ms")).collect();
    sender
        .send_to(samples.join("\n").as_bytes(), ("127.0.0.1", statsd_port))
        .await
        .expect("send failed");

    let payload = accept_carbon_payload(&carbon).await;
    let lines: Vec<&str> = payload.lines().collect();
    assert!(lines.iter().any(|l| l.starts_with("glork.mean 50 ")));
    assert!(lines.iter().any(|l| l.starts_with("glork.upper 100 ")));
    assert!(lines.iter().any(|l| l.starts_with("glork.upper_90 90 ")));
    assert!(lines.iter().any(|l| l.starts_with("glork.lower 1 ")));
    assert!(lines.iter().any(|l| l.starts_with("glork.count 100 ")));

    cancel_token.cancel();
    let _ = sender.send_to(b"\n", ("127.0.0.1", statsd_port)).await;
}

#[tokio::test]
async fn daemon_relays_raw_datagrams_to_every_peer() {
    let statsd_port = free_udp_port().await;
    let peer_a = UdpSocket::bind("127.0.0.1:0")
        .await
        .expect("unable to bind UDP socket");
    let peer_b = UdpSocket::bind("127.0.0.1:0")
        .await
        .expect("unable to bind UDP socket");
    let carbon = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("unable to bind TCP listener");

    let config = Config {
        port: statsd_port,
        flush_interval: 60,
        graphite_host: "127.0.0.1".to_string(),
        graphite_port: carbon.local_addr().expect("no local addr").port(),
        forwarding: true,
        forwarding_destinations: vec![
            ForwardDestination {
                hostname: "127.0.0.1".to_string(),
                port: peer_a.local_addr().expect("no local addr").port(),
            },
            ForwardDestination {
                hostname: "127.0.0.1".to_string(),
                port: peer_b.local_addr().expect("no local addr").port(),
            },
        ],
        ..Config::default()
    };

    let cancel_token = CancellationToken::new();
    let daemon_token = cancel_token.clone();
    tokio::spawn(async move {
        daemon::run(config, daemon_token)
            .await
            .expect("daemon failed");
    });
    sleep(Duration::from_millis(100)).await;

    let sender = UdpSocket::bind("127.0.0.1:0")
        .await
        .expect("unable to bind UDP socket");
    sender
        .send_to(b"app.thing.speed:10|ms\n", ("127.0.0.1", statsd_port))
        .await
        .expect("send failed");

    let mut buf = [0u8; 1024];
    let amt = timeout(Duration::from_secs(5), peer_a.recv(&mut buf))
        .await
        .expect("peer A never got the relay")
        .expect("recv failed");
    assert_eq!(&buf[..amt], b"app.thing.speed:10|ms\n");

    let amt = timeout(Duration::from_secs(5), peer_b.recv(&mut buf))
        .await
        .expect("peer B never got the relay")
        .expect("recv failed");
    assert_eq!(&buf[..amt], b"app.thing.speed:10|ms\n");

    cancel_token.cancel();
    let _ = sender.send_to(b"\n", ("127.0.0.1", statsd_port)).await;
}
