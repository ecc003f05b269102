// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Thin statsd client.
//!
//! Formats wire lines (`key:value|type[|@rate]`) and sends them over UDP to a
//! statsd daemon. Supports an optional key prefix, client-side sampling, and
//! batching of several lines into one newline-joined datagram.
//!
//! Send failures are swallowed: instrumenting an application must never be
//! able to take it down. Only construction reports errors.

use std::io;
use std::net::UdpSocket;
use std::time::Instant;

const DEFAULT_BATCH_SIZE: usize = 10;

pub struct StatsdClient {
    socket: UdpSocket,
    host: String,
    port: u16,
    prefix: Option<String>,
    batch_size: usize,
}

impl StatsdClient {
    /// Creates a client sending to `host:port`. The hostname is re-resolved
    /// on every send, so long-lived processes follow DNS changes.
    pub fn new(host: impl Into<String>, port: u16) -> io::Result<StatsdClient> {
        let socket = UdpSocket::bind("0.0.0.0:0")?;
        Ok(StatsdClient {
            socket,
            host: host.into(),
            port,
            prefix: None,
            batch_size: DEFAULT_BATCH_SIZE,
        })
    }

    /// Prepends `prefix.` to every stat key.
    #[must_use]
    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = Some(prefix.into());
        self
    }

    /// Number of lines a [`Batch`] accumulates before it sends a datagram.
    #[must_use]
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    pub fn increment(&self, stat: &str) {
        self.count(stat, 1);
    }

    pub fn decrement(&self, stat: &str) {
        self.count(stat, -1);
    }

    pub fn count(&self, stat: &str, delta: i64) {
        self.send_line(self.line(stat, &format!("{}|c", delta)));
    }

    /// Counter that the application only reports a `sample_rate` fraction of
    /// the time; the daemon reweights by the attached rate.
    pub fn count_sampled(&self, stat: &str, delta: i64, sample_rate: f64) {
        if let Some(line) = sample(self.line(stat, &format!("{}|c", delta)), sample_rate) {
            self.send_line(line);
        }
    }

    pub fn timing(&self, stat: &str, ms: u64) {
        self.send_line(self.line(stat, &format!("{}|ms", ms)));
    }

    pub fn timing_sampled(&self, stat: &str, ms: u64, sample_rate: f64) {
        if let Some(line) = sample(self.line(stat, &format!("{}|ms", ms)), sample_rate) {
            self.send_line(line);
        }
    }

    /// Measures the closure and reports its wall time in whole milliseconds.
    pub fn time<T>(&self, stat: &str, f: impl FnOnce() -> T) -> T {
        let start = Instant::now();
        let value = f();
        self.timing(stat, start.elapsed().as_millis() as u64);
        value
    }

    pub fn gauge(&self, stat: &str, value: i64) {
        self.send_line(self.line(stat, &format!("{}|g", value)));
    }

    /// Starts a batch: lines accumulate and go out as one newline-joined
    /// datagram when `batch_size` is reached or the batch is dropped.
    #[must_use]
    pub fn batch(&self) -> Batch<'_> {
        Batch {
            client: self,
            backlog: Vec::with_capacity(self.batch_size),
        }
    }

    fn line(&self, stat: &str, suffix: &str) -> String {
        match &self.prefix {
            Some(prefix) => format!("{}.{}:{}", prefix, stat, suffix),
            None => format!("{}:{}", stat, suffix),
        }
    }

    fn send_line(&self, line: String) {
        self.send_raw(&line);
    }

    fn send_raw(&self, payload: &str) {
        // Silently dropped on failure; UDP gives no delivery promise anyway.
        let _ = self
            .socket
            .send_to(payload.as_bytes(), (self.host.as_str(), self.port));
    }
}

/// Applies client-side sampling: below a rate of 1.0 the line is sent with
/// probability `rate` and tagged `|@rate` so the daemon can reweight it.
fn sample(line: String, rate: f64) -> Option<String> {
    if rate >= 1.0 {
        return Some(line);
    }
    sample_with_roll(line, rate, rand::random::<f64>())
}

fn sample_with_roll(line: String, rate: f64, roll: f64) -> Option<String> {
    (roll <= rate).then(|| format!("{}|@{}", line, rate))
}

/// Accumulates lines and flushes them as single datagrams.
///
/// Keep batches under the path MTU: one datagram carries the whole backlog.
pub struct Batch<'a> {
    client: &'a StatsdClient,
    backlog: Vec<String>,
}

impl Batch<'_> {
    pub fn increment(&mut self, stat: &str) {
        self.count(stat, 1);
    }

    pub fn decrement(&mut self, stat: &str) {
        self.count(stat, -1);
    }

    pub fn count(&mut self, stat: &str, delta: i64) {
        self.push(self.client.line(stat, &format!("{}|c", delta)));
    }

    pub fn timing(&mut self, stat: &str, ms: u64) {
        self.push(self.client.line(stat, &format!("{}|ms", ms)));
    }

    pub fn gauge(&mut self, stat: &str, value: i64) {
        self.push(self.client.line(stat, &format!("{}|g", value)));
    }

    pub fn flush(&mut self) {
        if !self.backlog.is_empty() {
            self.client.send_raw(&self.backlog.join("\n"));
            self.backlog.clear();
        }
    }

    fn push(&mut self, line: String) {
        self.backlog.push(line);
        if self.backlog.len() >= self.client.batch_size {
            self.flush();
        }
    }
}

impl Drop for Batch<'_> {
    fn drop(&mut self) {
        self.flush();
    }
}
