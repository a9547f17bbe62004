// Copyright (c) Sean Lawlor
//
// This source code is licensed under both the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree.

//! The pluggable asynchronous connection service, and the per-peer connection pools
//! built on top of it.
//!
//! A connection service only knows how to open and accept byte streams. Framing,
//! authentication, request multiplexing and pooling all happen above it, so any
//! transport which can hand out a bidirectional stream (TCP, TLS over TCP, in-process
//! pipes) plugs in unchanged.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use relay::RelayErr;

use crate::net::NetworkStream;

pub mod memory;
pub mod pool;
pub mod tcp;

#[cfg(test)]
mod tests;

pub use memory::{MemoryConnectionService, MemoryHub};
pub use pool::{ConnectionPool, Lease, PoolConfig};
pub use tcp::TcpConnectionService;

/// Opens outgoing streams to peers and accepts incoming ones
#[async_trait::async_trait]
pub trait AsyncConnectionService: Send + Sync + 'static {
    /// Open a stream to the instance listening at `address`
    async fn connect(&self, address: &str) -> Result<NetworkStream, RelayErr>;

    /// Start accepting streams at `address`
    async fn listen(&self, address: &str) -> Result<Box<dyn Acceptor>, RelayErr>;
}

/// A bound listener handing out accepted streams
#[async_trait::async_trait]
pub trait Acceptor: Send + 'static {
    /// Wait for the next incoming stream
    async fn accept(&mut self) -> Result<NetworkStream, RelayErr>;

    /// The address peers should connect to
    fn local_address(&self) -> String;
}

/// Counters of transport activity, shared by every pool and server of an instance
#[derive(Debug, Clone, Default)]
pub struct TransportStats {
    inner: Arc<TransportCounters>,
}

#[derive(Debug, Default)]
struct TransportCounters {
    envelopes_sent: AtomicU64,
    envelopes_received: AtomicU64,
    connections_opened: AtomicU64,
}

impl TransportStats {
    /// Invocation envelopes written to the wire
    pub fn envelopes_sent(&self) -> u64 {
        self.inner.envelopes_sent.load(Ordering::Relaxed)
    }

    /// Invocation envelopes read off the wire
    pub fn envelopes_received(&self) -> u64 {
        self.inner.envelopes_received.load(Ordering::Relaxed)
    }

    /// Streams opened by this instance's pools
    pub fn connections_opened(&self) -> u64 {
        self.inner.connections_opened.load(Ordering::Relaxed)
    }

    pub(crate) fn record_sent(&self) {
        self.inner.envelopes_sent.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_received(&self) {
        self.inner.envelopes_received.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_connection(&self) {
        self.inner.connections_opened.fetch_add(1, Ordering::Relaxed);
    }
}
