// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Statsd wire-format decoding.
//!
//! A datagram carries one or more newline-separated rows of the form
//! `key(:value|type[|@rate])+`. The first colon-delimited segment is the
//! metric key; every later segment is an independent record applied to that
//! key, so one row can report several samples at once.

use crate::errors::ParseError;

/// A single decoded record, dispatched on its type token exactly once.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MetricValue {
    /// `c`: counter increment, already reweighted by the sample rate.
    Count(f64),
    /// `ms`: one timer sample in milliseconds.
    Time(i64),
    /// `g`: gauge level.
    Gauge(i64),
}

/// Normalizes a raw key into the character set Graphite accepts.
///
/// Whitespace runs collapse to `_`, `/` becomes `-`, and anything outside
/// `[A-Za-z0-9_.-]` is dropped.
pub fn sanitize_key(raw: &str) -> String {
    let mut key = String::with_capacity(raw.len());
    let mut pending_separator = false;
    for ch in raw.chars() {
        if ch.is_whitespace() {
            pending_separator = true;
            continue;
        }
        if pending_separator {
            key.push('_');
            pending_separator = false;
        }
        match ch {
            '/' => key.push('-'),
            'A'..='Z' | 'a'..='z' | '0'..='9' | '_' | '.' | '-' => key.push(ch),
            _ => {}
        }
    }
    if pending_separator {
        key.push('_');
    }
    key
}

/// Decodes one `value|type[|@rate]` record.
///
/// Non-numeric values fall back to the type's neutral element (`0` for timers
/// and gauges, `1` for counters, so a bare counter token still counts one
/// event). Counter values are divided by the sample rate to compensate for
/// sender-side under-reporting.
pub fn parse_record(record: &str) -> Result<MetricValue, ParseError> {
    let mut fields = record.split('|');
    let value = fields.next().unwrap_or("");
    let Some(type_token) = fields.next() else {
        return Err(ParseError::Malformed);
    };

    match type_token.trim() {
        "ms" => Ok(MetricValue::Time(value.parse().unwrap_or(0))),
        "c" => {
            let sample_rate = fields.next().and_then(parse_sample_rate).unwrap_or(1.0);
            let count = value.parse::<i64>().unwrap_or(1);
            Ok(MetricValue::Count(count as f64 * (1.0 / sample_rate)))
        }
        "g" => Ok(MetricValue::Gauge(value.parse().unwrap_or(0))),
        other => Err(ParseError::UnsupportedType(other.to_string())),
    }
}

/// Reads a `@<float>` sample tag. Rates that are zero, negative or
/// non-numeric are ignored rather than dividing the count into nonsense.
fn parse_sample_rate(field: &str) -> Option<f64> {
    let rate: f64 = field.strip_prefix('@')?.trim().parse().ok()?;
    (rate > 0.0 && rate.is_finite()).then_some(rate)
}
