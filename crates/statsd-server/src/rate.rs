// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Ingestion-rate tracking for the health endpoint.
//!
//! A dispatcher receiver bumps one cumulative datagram counter; independent
//! periodic timers (one per window) turn the counter's delta since their last
//! tick into a messages-per-second figure.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};

use hashbrown::HashMap;

use crate::dispatcher::Receiver;

/// The reporting windows, in seconds.
pub const RATE_WINDOWS_SECS: [u64; 3] = [5, 10, 60];

#[derive(Debug, Default, Clone, Copy)]
struct RateWindow {
    previous_count: u64,
    rate: f64,
}

#[derive(Debug)]
pub struct RateTracker {
    message_count: AtomicU64,
    windows: Mutex<HashMap<u64, RateWindow>>,
}

impl Default for RateTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl RateTracker {
    #[must_use]
    pub fn new() -> Self {
        let mut windows = HashMap::new();
        for seconds in RATE_WINDOWS_SECS {
            windows.insert(seconds, RateWindow::default());
        }
        Self {
            message_count: AtomicU64::new(0),
            windows: Mutex::new(windows),
        }
    }

    pub fn increment(&self) {
        self.message_count.fetch_add(1, Ordering::Relaxed);
    }

    #[must_use]
    pub fn message_count(&self) -> u64 {
        self.message_count.load(Ordering::Relaxed)
    }

    /// One timer tick for the given window: derive the rate from the delta
    /// since the previous tick, then advance the snapshot.
    pub fn tick_window(&self, seconds: u64) {
        let count = self.message_count();
        let mut windows = self
            .windows
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let window = windows.entry(seconds).or_default();
        window.rate = (count - window.previous_count) as f64 / seconds as f64;
        window.previous_count = count;
    }

    /// Current rates keyed by window seconds, sorted ascending.
    #[must_use]
    pub fn rates(&self) -> Vec<(u64, f64)> {
        let windows = self
            .windows
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let mut rates: Vec<(u64, f64)> = windows
            .iter()
            .map(|(seconds, window)| (*seconds, window.rate))
            .collect();
        rates.sort_unstable_by_key(|(seconds, _)| *seconds);
        rates
    }
}

/// Dispatcher receiver counting every inbound datagram.
pub struct RateReceiver {
    tracker: std::sync::Arc<RateTracker>,
}

impl RateReceiver {
    #[must_use]
    pub fn new(tracker: std::sync::Arc<RateTracker>) -> Self {
        Self { tracker }
    }
}

impl Receiver for RateReceiver {
    fn name(&self) -> &'static str {
        "rate-counter"
    }

    fn ingest(&mut self, _msg: &[u8]) {
        self.tracker.increment();
    }
}
