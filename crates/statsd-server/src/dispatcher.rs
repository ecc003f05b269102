// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Fan-out of inbound datagrams to the interested subsystems.
//!
//! The dispatcher owns an ordered list of receivers and hands every datagram
//! to each of them in registration order. Receivers are narrow by design:
//! they expose a single fire-and-forget `ingest` and must contain their own
//! failures so one misbehaving receiver can never starve the ones after it.

use tracing::debug;

/// One subsystem interested in every inbound datagram.
pub trait Receiver: Send {
    /// Stable identity used for idempotent registration.
    fn name(&self) -> &'static str;

    /// Consumes one raw datagram. Must not panic and must not propagate
    /// errors; anything that goes wrong stays inside the receiver.
    fn ingest(&mut self, msg: &[u8]);
}

#[derive(Default)]
pub struct Dispatcher {
    receivers: Vec<Box<dyn Receiver>>,
}

impl Dispatcher {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a receiver unless one with the same name is already present.
    pub fn register_receiver(&mut self, receiver: Box<dyn Receiver>) {
        if self.receivers.iter().any(|r| r.name() == receiver.name()) {
            debug!("receiver '{}' already registered; ignoring", receiver.name());
            return;
        }
        debug!("registered receiver '{}'", receiver.name());
        self.receivers.push(receiver);
    }

    /// Invokes every receiver on the identical raw bytes, in order.
    pub fn dispatch(&mut self, msg: &[u8]) {
        for receiver in &mut self.receivers {
            receiver.ingest(msg);
        }
    }

    #[must_use]
    pub fn receiver_names(&self) -> Vec<&'static str> {
        self.receivers.iter().map(|r| r.name()).collect()
    }
}
