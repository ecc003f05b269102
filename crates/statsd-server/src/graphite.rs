// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Flush rendering and delivery to a Graphite/Carbon sink.
//!
//! Once per flush interval the aggregator's snapshot is rendered into Carbon
//! plaintext lines (`name value unix-timestamp`) and shipped as a single
//! write over a fresh TCP connection. A failed delivery drops this window's
//! payload; the next tick starts over from a fresh snapshot. Gauges are
//! drained from the aggregator but intentionally not rendered, matching the
//! reference behavior.

use std::fmt::Write as _;
use std::io;

use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tracing::debug;

use crate::aggregator::Snapshot;

const PCT_THRESHOLD: u64 = 90;

/// Summary statistics for one timer key's samples within a window.
#[derive(Debug, PartialEq, Eq)]
struct TimerSummary {
    count: usize,
    min: i64,
    max: i64,
    mean: i64,
    max_at_threshold: i64,
}

fn summarize(samples: &[i64]) -> TimerSummary {
    let mut sorted = samples.to_vec();
    sorted.sort_unstable();
    let count = sorted.len();
    let min = sorted[0];
    let max = sorted[count - 1];

    // Truncating integer mean, not a floating-point average.
    let mean = if count > 1 {
        sorted.iter().sum::<i64>() / count as i64
    } else {
        min
    };

    // Trim exactly round((100 - threshold)% * count) samples off the tail; a
    // zero trim reuses the untrimmed max.
    let threshold_index =
        (((100 - PCT_THRESHOLD) as f64 / 100.0) * count as f64).round() as usize;
    let max_at_threshold = if threshold_index == 0 {
        max
    } else {
        sorted[count - 1 - threshold_index]
    };

    TimerSummary {
        count,
        min,
        max,
        mean,
        max_at_threshold,
    }
}

// Counter accumulators are floats because of sample-rate reweighting, but
// whole values ship without the trailing ".0" Graphite has no use for.
fn format_counter(value: f64) -> String {
    if value.fract() == 0.0 && value.abs() < i64::MAX as f64 {
        format!("{}", value as i64)
    } else {
        format!("{}", value)
    }
}

/// Renders a snapshot into one Carbon plaintext payload.
///
/// Emits one line per counter, five lines per timer key with at least one
/// sample, and always a trailing `statsd.numStats` line counting the keys
/// rendered this tick. Keys are emitted in sorted order so payloads are
/// stable.
#[must_use]
pub fn render(snapshot: &Snapshot, timestamp: i64) -> String {
    let mut payload = String::new();
    let mut num_stats = 0usize;

    let mut counter_keys: Vec<&String> = snapshot.counters.keys().collect();
    counter_keys.sort_unstable();
    for key in counter_keys {
        let value = snapshot.counters[key];
        let _ = writeln!(payload, "{} {} {}", key, format_counter(value), timestamp);
        num_stats += 1;
    }

    let mut timer_keys: Vec<&String> = snapshot.timers.keys().collect();
    timer_keys.sort_unstable();
    for key in timer_keys {
        let samples = &snapshot.timers[key];
        if samples.is_empty() {
            continue;
        }
        let summary = summarize(samples);
        let _ = writeln!(payload, "{}.mean {} {}", key, summary.mean, timestamp);
        let _ = writeln!(payload, "{}.upper {} {}", key, summary.max, timestamp);
        let _ = writeln!(
            payload,
            "{}.upper_{} {} {}",
            key, PCT_THRESHOLD, summary.max_at_threshold, timestamp
        );
        let _ = writeln!(payload, "{}.lower {} {}", key, summary.min, timestamp);
        let _ = writeln!(payload, "{}.count {} {}", key, summary.count, timestamp);
        num_stats += 1;
    }

    let _ = writeln!(payload, "statsd.numStats {} {}", num_stats, timestamp);
    payload
}

/// Plaintext Carbon sink reached over a short-lived TCP connection per tick.
pub struct GraphiteSink {
    host: String,
    port: u16,
}

impl GraphiteSink {
    #[must_use]
    pub fn new(host: String, port: u16) -> Self {
        Self { host, port }
    }

    /// Delivers one payload: connect, write everything, close. No retries;
    /// the caller logs and drops the payload on failure.
    pub async fn ship(&self, payload: &str) -> io::Result<()> {
        let mut stream = TcpStream::connect((self.host.as_str(), self.port)).await?;
        stream.write_all(payload.as_bytes()).await?;
        stream.shutdown().await?;
        debug!(
            "shipped {} bytes to graphite at {}:{}",
            payload.len(),
            self.host,
            self.port
        );
        Ok(())
    }
}
