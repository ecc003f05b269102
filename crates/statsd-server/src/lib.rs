// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Statsd-compatible metrics collection daemon.
//!
//! Listens for UDP datagrams in the statsd wire format (`key:value|type[|@rate]`),
//! aggregates counters, timers and gauges over a flush window, renders the
//! aggregates as Carbon plaintext lines shipped to a Graphite sink, and can
//! relay every raw datagram unmodified to a set of downstream statsd peers.

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

pub mod aggregator;
pub mod aggregator_service;
pub mod config;
pub mod daemon;
pub mod dispatcher;
pub mod errors;
pub mod forwarder;
pub mod graphite;
pub mod health;
pub mod metric;
pub mod rate;
pub mod server;
