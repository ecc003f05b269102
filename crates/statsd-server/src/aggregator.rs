// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! In-memory accumulation of counters, timers and gauges.
//!
//! Keys are created lazily on first observation and, for counters and timers,
//! survive indefinitely once seen: a flush resets their values but never
//! removes them. Gauges are first-write-wins within a flush window and the
//! gauge table is emptied wholesale at flush.

use hashbrown::HashMap;
use tracing::{trace, warn};

use crate::errors::ParseError;
use crate::metric::{parse_record, sanitize_key, MetricValue};

/// Point-in-time copy of the three tables, handed to the flush renderer.
#[derive(Debug, Clone, Default)]
pub struct Snapshot {
    pub counters: HashMap<String, f64>,
    pub timers: HashMap<String, Vec<i64>>,
    pub gauges: HashMap<String, i64>,
}

#[derive(Debug, Default)]
pub struct Aggregator {
    counters: HashMap<String, f64>,
    timers: HashMap<String, Vec<i64>>,
    gauges: HashMap<String, i64>,
}

impl Aggregator {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Applies one raw datagram to the tables.
    ///
    /// Every newline-separated row is processed independently; rows whose key
    /// sanitizes to nothing are dropped, malformed records are skipped, and an
    /// unsupported type token costs only a diagnostic. Nothing in here can
    /// fail ingestion of the rest of the datagram.
    pub fn ingest(&mut self, msg: &[u8]) {
        let text = String::from_utf8_lossy(msg);
        for row in text.split('\n') {
            self.ingest_row(row);
        }
    }

    fn ingest_row(&mut self, row: &str) {
        let mut segments = row.split(':');
        let key = sanitize_key(segments.next().unwrap_or(""));
        if key.is_empty() {
            if !row.is_empty() {
                trace!("dropping row without a parseable key: {row:?}");
            }
            return;
        }

        for record in segments {
            match parse_record(record) {
                Ok(MetricValue::Count(delta)) => {
                    *self.counters.entry_ref(key.as_str()).or_insert(0.0) += delta;
                }
                Ok(MetricValue::Time(ms)) => {
                    self.timers.entry_ref(key.as_str()).or_default().push(ms);
                }
                Ok(MetricValue::Gauge(level)) => {
                    // First write wins until the table is cleared at flush.
                    self.gauges.entry_ref(key.as_str()).or_insert(level);
                }
                Err(ParseError::Malformed) => {
                    trace!("skipping malformed record {record:?} for key {key}");
                }
                Err(err @ ParseError::UnsupportedType(_)) => {
                    warn!("invalid statistic {record:?} for key {key}: {err}; ignoring");
                }
            }
        }
    }

    /// Atomically snapshots the tables and resets them for the next window.
    ///
    /// Counter entries go back to `0.0` and timer entries to empty with their
    /// keys retained; the gauge table is cleared outright.
    pub fn drain_and_clear(&mut self) -> Snapshot {
        let snapshot = Snapshot {
            counters: self.counters.clone(),
            timers: self.timers.clone(),
            gauges: self.gauges.clone(),
        };
        for value in self.counters.values_mut() {
            *value = 0.0;
        }
        for samples in self.timers.values_mut() {
            samples.clear();
        }
        self.gauges.clear();
        snapshot
    }
}
