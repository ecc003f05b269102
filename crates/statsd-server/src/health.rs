// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Minimal HTTP liveness endpoint.
//!
//! Any request, regardless of method or path, is answered `200 OK` with a
//! JSON body reporting ingestion rates over the 5/10/60 second windows, and
//! the connection is closed once the response is written.

use std::convert::Infallible;
use std::io;
use std::sync::Arc;

use http_body_util::Full;
use hyper::body::Bytes;
use hyper::header::{CONNECTION, CONTENT_TYPE};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::Response;
use hyper_util::rt::TokioIo;
use serde_json::{json, Map, Value};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::rate::RateTracker;

fn status_body(tracker: &RateTracker) -> String {
    let mut body = Map::new();
    body.insert("status".to_string(), json!("ok"));
    for (seconds, rate) in tracker.rates() {
        body.insert(format!("{}_seconds", seconds), json!(rate));
    }
    Value::Object(body).to_string()
}

fn status_response(tracker: &RateTracker) -> Response<Full<Bytes>> {
    let body = status_body(tracker);
    #[allow(clippy::expect_used)]
    Response::builder()
        .status(hyper::StatusCode::OK)
        .header(CONTENT_TYPE, "application/json")
        .header(CONNECTION, "close")
        .body(Full::new(Bytes::from(body)))
        .expect("building the health response cannot fail")
}

/// Serves the health endpoint until cancelled.
///
/// Binding failure is returned to the caller; per-connection errors are
/// logged and swallowed.
pub async fn run_health_server(
    bind: &str,
    port: u16,
    tracker: Arc<RateTracker>,
    cancel_token: CancellationToken,
) -> io::Result<()> {
    let addr = format!("{}:{}", bind, port);
    let listener = TcpListener::bind(&addr).await?;
    info!("health endpoint listening on {}", addr);

    loop {
        let (stream, peer) = tokio::select! {
            () = cancel_token.cancelled() => break,
            accepted = listener.accept() => match accepted {
                Ok(accepted) => accepted,
                Err(e) => {
                    debug!("health endpoint failed to accept connection: {}", e);
                    continue;
                }
            },
        };

        let tracker = Arc::clone(&tracker);
        tokio::spawn(async move {
            let io = TokioIo::new(stream);
            let service =
                service_fn(move |_req| {
                    let response = status_response(&tracker);
                    async move { Ok::<_, Infallible>(response) }
                });
            if let Err(e) = http1::Builder::new().serve_connection(io, service).await {
                debug!("health connection from {} ended with error: {}", peer, e);
            }
        });
    }

    info!("health endpoint stopped");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpStream;

    #[test]
    fn body_reports_status_and_all_windows() {
        let tracker = RateTracker::new();
        for _ in 0..25 {
            tracker.increment();
        }
        tracker.tick_window(5);

        let body: Value = serde_json::from_str(&status_body(&tracker)).unwrap();
        assert_eq!(body["status"], "ok");
        assert_eq!(body["5_seconds"], 5.0);
        assert_eq!(body["10_seconds"], 0.0);
        assert_eq!(body["60_seconds"], 0.0);
    }

    #[tokio::test]
    async fn any_request_gets_json_ok_and_a_closed_connection() {
        let tracker = Arc::new(RateTracker::new());
        let cancel_token = CancellationToken::new();

        // Grab a free local port for the server to bind.
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let server_tracker = Arc::clone(&tracker);
        let server_token = cancel_token.clone();
        let server = tokio::spawn(async move {
            run_health_server("127.0.0.1", port, server_tracker, server_token)
                .await
                .unwrap();
        });

        // The listener may need a moment to come up.
        let mut stream = loop {
            match TcpStream::connect(("127.0.0.1", port)).await {
                Ok(stream) => break stream,
                Err(_) => tokio::time::sleep(tokio::time::Duration::from_millis(10)).await,
            }
        };

        stream
            .write_all(b"GET /anything?whatever HTTP/1.1\r\nHost: localhost\r\n\r\n")
            .await
            .unwrap();

        // Connection: close means the peer EOFs after one response.
        let mut raw = Vec::new();
        stream.read_to_end(&mut raw).await.unwrap();
        let raw = String::from_utf8(raw).unwrap();

        assert!(raw.starts_with("HTTP/1.1 200 OK"));
        assert!(raw.contains("content-type: application/json"));
        let body = raw.split("\r\n\r\n").nth(1).unwrap();
        let body: Value = serde_json::from_str(body.trim()).unwrap();
        assert_eq!(body["status"], "ok");
        assert!(body.get("5_seconds").is_some());

        cancel_token.cancel();
        server.await.unwrap();
    }
}
