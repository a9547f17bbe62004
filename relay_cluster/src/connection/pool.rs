// Copyright (c) Sean Lawlor
//
// This source code is licensed under both the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree.

//! A pool of multiplexed connections to one peer instance.
//!
//! Each connection runs a reader and a writer task. Requests are written with a fresh
//! correlation id and the caller parks on a oneshot until the reader task routes the
//! matching reply back. Many requests share one connection, and the pool grows from
//! `min_connections` towards `max_connections` while every open connection is busy.

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use relay::concurrency::{
    mpsc_unbounded, oneshot, Duration, JoinHandle, MpscUnboundedSender, OneshotSender,
};
use relay::RelayErr;
use tokio::sync::Mutex;

use super::{AsyncConnectionService, TransportStats};
use crate::auth::client_handshake;
use crate::net::frame::{Frame, FrameReader, FrameWriter};
use crate::protocol::{NetworkMessage, Payload};

/// Pool sizing and session settings
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Connections kept open even while idle
    pub min_connections: usize,
    /// Upper bound on concurrently open connections
    pub max_connections: usize,
    /// Largest accepted frame
    pub max_frame_bytes: usize,
    /// Shared secret for the session handshake. [None] skips the handshake.
    pub cookie: Option<String>,
    /// The name announced during the handshake
    pub local_name: String,
}

type PendingMap = DashMap<u64, OneshotSender<NetworkMessage>>;

struct Connection {
    id: u64,
    outgoing: MpscUnboundedSender<NetworkMessage>,
    pending: Arc<PendingMap>,
    alive: Arc<AtomicBool>,
    in_flight: AtomicUsize,
    reader: JoinHandle<()>,
    writer: JoinHandle<()>,
}

impl Connection {
    async fn open(
        id: u64,
        service: &dyn AsyncConnectionService,
        address: &str,
        config: &PoolConfig,
        stats: &TransportStats,
    ) -> Result<Self, RelayErr> {
        let stream = service.connect(address).await?;
        let (read, write) = stream.into_split();
        let mut reader = FrameReader::new(read, config.max_frame_bytes);
        let mut writer = FrameWriter::new(write);

        if let Some(cookie) = &config.cookie {
            if let Err(err) =
                client_handshake(&mut reader, &mut writer, cookie, &config.local_name, address)
                    .await
            {
                writer.shutdown().await;
                return Err(err);
            }
        }
        stats.record_connection();

        let pending = Arc::new(PendingMap::new());
        let alive = Arc::new(AtomicBool::new(true));
        let (tx, mut rx) = mpsc_unbounded::<NetworkMessage>();

        let writer_pending = pending.clone();
        let writer_alive = alive.clone();
        let writer_address = address.to_string();
        let writer = relay::concurrency::spawn(async move {
            while let Some(msg) = rx.recv().await {
                if let Err(err) = writer.write(&msg).await {
                    log::warn!("Error writing to {writer_address}: {err}");
                    break;
                }
            }
            // queued and waiting requests fail now rather than at their timeout
            drop(rx);
            writer_alive.store(false, Ordering::SeqCst);
            writer_pending.clear();
            writer.shutdown().await;
        });

        let reader_pending = pending.clone();
        let reader_alive = alive.clone();
        let reader_stats = stats.clone();
        let reader_address = address.to_string();
        let reader = relay::concurrency::spawn(async move {
            loop {
                match reader.read().await {
                    Ok(Frame::Message(msg)) => {
                        let correlation_id = match &msg.message {
                            Some(Payload::Invocation(envelope)) => {
                                reader_stats.record_received();
                                envelope.correlation_id
                            }
                            Some(Payload::Control(control)) => control.correlation_id,
                            _ => {
                                log::warn!(
                                    "Unexpected message from {reader_address} outside of a handshake"
                                );
                                continue;
                            }
                        };
                        match reader_pending.remove(&correlation_id) {
                            Some((_, waiter)) => {
                                let _ = waiter.send(msg);
                            }
                            None => log::debug!(
                                "Discarding late reply {correlation_id} from {reader_address}"
                            ),
                        }
                    }
                    Ok(Frame::Corrupt(err)) => {
                        log::warn!("Discarding corrupt frame from {reader_address}: {err}");
                    }
                    Ok(Frame::Closed) => {
                        log::info!("Session to {reader_address} closed");
                        break;
                    }
                    Err(err) => {
                        log::warn!("Session to {reader_address} failed: {err}");
                        break;
                    }
                }
            }
            // fail everything still waiting on this connection
            reader_alive.store(false, Ordering::SeqCst);
            reader_pending.clear();
        });

        Ok(Self {
            id,
            outgoing: tx,
            pending,
            alive,
            in_flight: AtomicUsize::new(0),
            reader,
            writer,
        })
    }

    fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    fn close(&self) {
        self.alive.store(false, Ordering::SeqCst);
        self.reader.abort();
        self.writer.abort();
        self.pending.clear();
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.close();
    }
}

/// A connection checked out of a [ConnectionPool]. Returns to the pool on drop.
pub struct Lease {
    connection: Arc<Connection>,
    address: String,
    correlation: Arc<AtomicU64>,
    stats: TransportStats,
}

impl std::fmt::Debug for Lease {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Lease")
            .field("address", &self.address)
            .field("connection", &self.connection.id)
            .finish()
    }
}

struct PendingGuard {
    pending: Arc<PendingMap>,
    correlation_id: u64,
}

impl Drop for PendingGuard {
    fn drop(&mut self) {
        // no-op when the reply already arrived
        self.pending.remove(&self.correlation_id);
    }
}

impl Lease {
    /// The identifier of the leased connection within its pool
    pub fn connection_id(&self) -> u64 {
        self.connection.id
    }

    /// Send a request built around a fresh correlation id and wait for its reply
    pub async fn exchange<F>(&self, build: F) -> Result<NetworkMessage, RelayErr>
    where
        F: FnOnce(u64) -> NetworkMessage,
    {
        let correlation_id = self.correlation.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot();
        self.connection.pending.insert(correlation_id, tx);
        let _guard = PendingGuard {
            pending: self.connection.pending.clone(),
            correlation_id,
        };
        if !self.connection.is_alive() {
            return Err(self.lost());
        }

        let msg = build(correlation_id);
        let is_envelope = matches!(msg.message, Some(Payload::Invocation(_)));
        self.connection.outgoing.send(msg).map_err(|_| self.lost())?;
        if is_envelope {
            self.stats.record_sent();
        }
        rx.await.map_err(|_| self.lost())
    }

    fn lost(&self) -> RelayErr {
        RelayErr::instance_not_found(format!(
            "Connection to {} closed before a reply arrived",
            self.address
        ))
    }
}

impl Drop for Lease {
    fn drop(&mut self) {
        self.connection.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Connections to a single peer address
pub struct ConnectionPool {
    address: String,
    service: Arc<dyn AsyncConnectionService>,
    config: PoolConfig,
    stats: TransportStats,
    connections: Mutex<Vec<Arc<Connection>>>,
    next_connection: AtomicU64,
    correlation: Arc<AtomicU64>,
    closed: AtomicBool,
}

impl std::fmt::Debug for ConnectionPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionPool")
            .field("address", &self.address)
            .field("config", &self.config)
            .finish()
    }
}

impl ConnectionPool {
    /// Create an empty pool. No connection is opened until [ConnectionPool::maintain]
    /// or the first lease.
    pub fn new(
        address: String,
        service: Arc<dyn AsyncConnectionService>,
        config: PoolConfig,
        stats: TransportStats,
    ) -> Self {
        Self {
            address,
            service,
            config,
            stats,
            connections: Mutex::new(Vec::new()),
            next_connection: AtomicU64::new(0),
            correlation: Arc::new(AtomicU64::new(1)),
            closed: AtomicBool::new(false),
        }
    }

    /// The peer address
    pub fn address(&self) -> &str {
        &self.address
    }

    /// Open connections
    pub async fn open_connections(&self) -> usize {
        self.connections.lock().await.len()
    }

    /// Requests currently waiting on a reply, across every connection
    pub async fn in_flight(&self) -> usize {
        self.connections
            .lock()
            .await
            .iter()
            .map(|c| c.in_flight())
            .sum()
    }

    fn unreachable(&self, err: RelayErr) -> RelayErr {
        let message = format!("Instance at {} is unreachable: {err}", self.address);
        RelayErr::instance_not_found(message).with_cause(Box::new(err))
    }

    async fn open(&self) -> Result<Arc<Connection>, RelayErr> {
        let id = self.next_connection.fetch_add(1, Ordering::Relaxed);
        let connection = Connection::open(
            id,
            self.service.as_ref(),
            &self.address,
            &self.config,
            &self.stats,
        )
        .await
        .map_err(|err| self.unreachable(err))?;
        log::debug!("Opened connection {id} to {}", self.address);
        Ok(Arc::new(connection))
    }

    fn checkout(&self, connection: Arc<Connection>) -> Lease {
        connection.in_flight.fetch_add(1, Ordering::SeqCst);
        Lease {
            connection,
            address: self.address.clone(),
            correlation: self.correlation.clone(),
            stats: self.stats.clone(),
        }
    }

    /// Check out the least busy connection, opening a new one while every open
    /// connection is busy and the pool is below its maximum
    pub async fn lease(&self) -> Result<Lease, RelayErr> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(RelayErr::instance_not_found(format!(
                "Pool to {} is closed",
                self.address
            )));
        }
        {
            let mut connections = self.connections.lock().await;
            connections.retain(|c| c.is_alive());
            if let Some(best) = connections.iter().min_by_key(|c| c.in_flight()) {
                if best.in_flight() == 0 || connections.len() >= self.config.max_connections {
                    return Ok(self.checkout(best.clone()));
                }
            }
        }

        let fresh = self.open().await?;
        let mut connections = self.connections.lock().await;
        if self.closed.load(Ordering::SeqCst) {
            fresh.close();
            return Err(RelayErr::instance_not_found(format!(
                "Pool to {} is closed",
                self.address
            )));
        }
        if connections.len() < self.config.max_connections {
            connections.push(fresh.clone());
            Ok(self.checkout(fresh))
        } else {
            // lost the race to another opener
            fresh.close();
            match connections.iter().min_by_key(|c| c.in_flight()) {
                Some(best) => Ok(self.checkout(best.clone())),
                None => Err(RelayErr::instance_not_found(format!(
                    "No connection to {} available",
                    self.address
                ))),
            }
        }
    }

    /// Send a request and wait for the reply, bounded by `timeout`
    pub async fn exchange<F>(&self, build: F, timeout: Duration) -> Result<NetworkMessage, RelayErr>
    where
        F: FnOnce(u64) -> NetworkMessage,
    {
        relay::concurrency::timeout(timeout, async {
            let lease = self.lease().await?;
            lease.exchange(build).await
        })
        .await
        .map_err(|_| {
            RelayErr::handler_timeout(format!(
                "No reply from {} within {}ms",
                self.address,
                timeout.as_millis()
            ))
        })?
    }

    /// Drop dead connections, re-open up to `min_connections`, and close idle
    /// connections above it
    pub async fn maintain(&self) -> Result<(), RelayErr> {
        if self.closed.load(Ordering::SeqCst) {
            return Ok(());
        }
        let missing = {
            let mut connections = self.connections.lock().await;
            connections.retain(|c| c.is_alive());
            while connections.len() > self.config.min_connections {
                match connections.iter().position(|c| c.in_flight() == 0) {
                    Some(idle) => {
                        let surplus = connections.remove(idle);
                        log::debug!(
                            "Closing idle connection {} to {}",
                            surplus.id,
                            self.address
                        );
                        surplus.close();
                    }
                    None => break,
                }
            }
            self.config
                .min_connections
                .saturating_sub(connections.len())
        };

        for _ in 0..missing {
            let fresh = self.open().await?;
            let mut connections = self.connections.lock().await;
            if connections.len() < self.config.max_connections {
                connections.push(fresh);
            } else {
                fresh.close();
            }
        }
        Ok(())
    }

    /// Close every connection. Requests still waiting fail with
    /// [relay::ErrorKind::InstanceNotFound].
    pub async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        let connections = std::mem::take(&mut *self.connections.lock().await);
        for connection in connections {
            connection.close();
        }
        log::debug!("Closed pool to {}", self.address);
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}
