// Copyright (c) Sean Lawlor
//
// This source code is licensed under both the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree.

use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};

use relay::concurrency::{Duration, Instant, JoinHandle};
use relay::{ErrorKind, RelayErr};

use super::*;
use crate::auth::server_handshake;
use crate::net::frame::{Frame, FrameReader, FrameWriter};
use crate::net::NetworkStream;
use crate::protocol::control::{control_message, ControlMessage, MetadataRequest};
use crate::protocol::{NetworkMessage, Payload};

const MAX_FRAME: usize = 1024 * 1024;

fn pool_config(min: usize, max: usize) -> PoolConfig {
    PoolConfig {
        min_connections: min,
        max_connections: max,
        max_frame_bytes: MAX_FRAME,
        cookie: None,
        local_name: "test-client".to_string(),
    }
}

fn request(correlation_id: u64) -> NetworkMessage {
    NetworkMessage {
        message: Some(Payload::Control(ControlMessage {
            correlation_id,
            msg: Some(control_message::Msg::MetadataRequest(MetadataRequest {})),
        })),
    }
}

/// How the fake peer treats each request
#[derive(Clone, Copy)]
enum Behavior {
    Echo,
    Silent,
    HangUp,
}

/// Accept sessions forever, answering each according to `behavior`
fn spawn_peer(
    mut acceptor: Box<dyn Acceptor>,
    behavior: Behavior,
    cookie: Option<&'static str>,
) -> JoinHandle<()> {
    relay::concurrency::spawn(async move {
        while let Ok(stream) = acceptor.accept().await {
            relay::concurrency::spawn(async move {
                let (read, write) = stream.into_split();
                let mut reader = FrameReader::new(read, MAX_FRAME);
                let mut writer = FrameWriter::new(write);
                if let Some(cookie) = cookie {
                    if server_handshake(&mut reader, &mut writer, cookie, "peer", "client")
                        .await
                        .is_err()
                    {
                        writer.shutdown().await;
                        return;
                    }
                }
                while let Ok(Frame::Message(msg)) = reader.read().await {
                    match behavior {
                        Behavior::Echo => {
                            if writer.write(&msg).await.is_err() {
                                return;
                            }
                        }
                        Behavior::Silent => {}
                        Behavior::HangUp => {
                            writer.shutdown().await;
                            return;
                        }
                    }
                }
            });
        }
    })
}

fn correlation_of(msg: &NetworkMessage) -> u64 {
    match &msg.message {
        Some(Payload::Control(control)) => control.correlation_id,
        other => panic!("Unexpected reply {:?}", other),
    }
}

#[relay::concurrency::test]
async fn memory_connect_without_listener_is_refused() {
    let service = MemoryConnectionService::new(MemoryHub::new());
    let err = service.connect("memory://nowhere").await.unwrap_err();
    assert_eq!(ErrorKind::Transport, err.kind());
}

#[relay::concurrency::test]
async fn memory_addresses_are_released_on_drop() {
    let hub = MemoryHub::new();
    let service = MemoryConnectionService::new(hub.clone());
    let acceptor = service.listen("memory://fixed").await.unwrap();
    assert!(hub.is_listening("memory://fixed"));
    assert!(service.listen("memory://fixed").await.is_err());

    drop(acceptor);
    assert!(!hub.is_listening("memory://fixed"));
    assert!(service.listen("memory://fixed").await.is_ok());
}

#[relay::concurrency::test]
async fn ephemeral_memory_addresses_are_unique() {
    let service = MemoryConnectionService::new(MemoryHub::new());
    let a = service.listen("127.0.0.1:0").await.unwrap();
    let b = service.listen("127.0.0.1:0").await.unwrap();
    assert_ne!(a.local_address(), b.local_address());
}

#[relay::concurrency::test]
async fn replies_are_routed_by_correlation_id() {
    let service = Arc::new(MemoryConnectionService::new(MemoryHub::new()));
    let acceptor = service.listen("").await.unwrap();
    let address = acceptor.local_address();
    let _peer = spawn_peer(acceptor, Behavior::Echo, None);

    let stats = TransportStats::default();
    let pool = Arc::new(ConnectionPool::new(
        address,
        service,
        pool_config(1, 2),
        stats.clone(),
    ));

    let mut calls = relay::concurrency::JoinSet::new();
    for _ in 0..50 {
        let pool = pool.clone();
        calls.spawn(async move {
            let mut sent = 0;
            let reply = pool
                .exchange(
                    |correlation_id| {
                        sent = correlation_id;
                        request(correlation_id)
                    },
                    Duration::from_secs(5),
                )
                .await
                .expect("Exchange failed");
            assert_eq!(sent, correlation_of(&reply));
        });
    }
    while let Some(result) = calls.join_next().await {
        result.expect("Call task panicked");
    }

    assert!(pool.open_connections().await <= 2);
    assert_eq!(0, pool.in_flight().await);
    // control traffic is not counted as envelopes
    assert_eq!(0, stats.envelopes_sent());
}

#[relay::concurrency::test]
async fn silent_peers_time_out() {
    let service = Arc::new(MemoryConnectionService::new(MemoryHub::new()));
    let acceptor = service.listen("").await.unwrap();
    let address = acceptor.local_address();
    let _peer = spawn_peer(acceptor, Behavior::Silent, None);

    let pool = ConnectionPool::new(
        address,
        service,
        pool_config(1, 1),
        TransportStats::default(),
    );
    let err = pool
        .exchange(request, Duration::from_millis(100))
        .await
        .unwrap_err();
    assert_eq!(ErrorKind::HandlerTimeout, err.kind());
    // the abandoned request doesn't hold the lease
    assert_eq!(0, pool.in_flight().await);
}

#[relay::concurrency::test]
async fn dropped_connections_fail_pending_requests() {
    let service = Arc::new(MemoryConnectionService::new(MemoryHub::new()));
    let acceptor = service.listen("").await.unwrap();
    let address = acceptor.local_address();
    let _peer = spawn_peer(acceptor, Behavior::HangUp, None);

    let pool = ConnectionPool::new(
        address,
        service,
        pool_config(1, 1),
        TransportStats::default(),
    );
    let err = pool
        .exchange(request, Duration::from_secs(5))
        .await
        .unwrap_err();
    assert_eq!(ErrorKind::InstanceNotFound, err.kind());
}

/// A write half which always fails
struct BrokenPipe;

impl tokio::io::AsyncWrite for BrokenPipe {
    fn poll_write(
        self: Pin<&mut Self>,
        _: &mut Context<'_>,
        _: &[u8],
    ) -> Poll<std::io::Result<usize>> {
        Poll::Ready(Err(std::io::ErrorKind::BrokenPipe.into()))
    }

    fn poll_flush(self: Pin<&mut Self>, _: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        Poll::Ready(Ok(()))
    }
}

/// Connects streams whose reads stay open while every write fails
#[derive(Default)]
struct WriteFailingService {
    peers: Mutex<Vec<tokio::io::DuplexStream>>,
}

#[async_trait::async_trait]
impl AsyncConnectionService for WriteFailingService {
    async fn connect(&self, address: &str) -> Result<NetworkStream, RelayErr> {
        let (local, remote) = tokio::io::duplex(1024);
        self.peers.lock().unwrap().push(remote);
        let (reader, _) = tokio::io::split(local);
        Ok(NetworkStream::External {
            peer_label: address.to_string(),
            local_label: "test-client".to_string(),
            reader: Box::new(reader),
            writer: Box::new(BrokenPipe),
        })
    }

    async fn listen(&self, _: &str) -> Result<Box<dyn Acceptor>, RelayErr> {
        Err(RelayErr::configuration("Nothing listens here"))
    }
}

#[relay::concurrency::test]
async fn failed_writes_fail_pending_requests() {
    let pool = ConnectionPool::new(
        "memory://write-failing".to_string(),
        Arc::new(WriteFailingService::default()),
        pool_config(1, 1),
        TransportStats::default(),
    );
    let started = Instant::now();
    let err = pool
        .exchange(request, Duration::from_secs(5))
        .await
        .unwrap_err();
    assert_eq!(ErrorKind::InstanceNotFound, err.kind());
    assert!(started.elapsed() < Duration::from_secs(1));
}

#[relay::concurrency::test]
async fn unreachable_peers_are_not_found() {
    let service = Arc::new(MemoryConnectionService::new(MemoryHub::new()));
    let pool = ConnectionPool::new(
        "memory://gone".to_string(),
        service,
        pool_config(1, 1),
        TransportStats::default(),
    );
    let err = pool.maintain().await.unwrap_err();
    assert_eq!(ErrorKind::InstanceNotFound, err.kind());
}

#[relay::concurrency::test]
async fn maintain_keeps_the_minimum_open() {
    let service = Arc::new(MemoryConnectionService::new(MemoryHub::new()));
    let acceptor = service.listen("").await.unwrap();
    let address = acceptor.local_address();
    let _peer = spawn_peer(acceptor, Behavior::Echo, None);

    let stats = TransportStats::default();
    let pool = ConnectionPool::new(address, service, pool_config(3, 5), stats.clone());
    pool.maintain().await.unwrap();
    assert_eq!(3, pool.open_connections().await);
    assert_eq!(3, stats.connections_opened());

    // idempotent once warm
    pool.maintain().await.unwrap();
    assert_eq!(3, pool.open_connections().await);

    pool.close().await;
    assert_eq!(0, pool.open_connections().await);
    assert!(pool.lease().await.is_err());
}

#[relay::concurrency::test]
async fn authenticated_pools_exchange() {
    let service = Arc::new(MemoryConnectionService::new(MemoryHub::new()));
    let acceptor = service.listen("").await.unwrap();
    let address = acceptor.local_address();
    let _peer = spawn_peer(acceptor, Behavior::Echo, Some("secret"));

    let mut config = pool_config(1, 1);
    config.cookie = Some("secret".to_string());
    let pool = ConnectionPool::new(
        address.clone(),
        service.clone(),
        config,
        TransportStats::default(),
    );
    let reply = pool
        .exchange(request, Duration::from_secs(5))
        .await
        .expect("Authenticated exchange failed");
    assert!(correlation_of(&reply) > 0);

    let mut wrong = pool_config(1, 1);
    wrong.cookie = Some("guess".to_string());
    let pool = ConnectionPool::new(address, service, wrong, TransportStats::default());
    assert!(pool.exchange(request, Duration::from_secs(5)).await.is_err());
}

#[relay::concurrency::test]
async fn tcp_round_trip() {
    let service = Arc::new(TcpConnectionService::new());
    let acceptor = service.listen("tcp://127.0.0.1:0").await.unwrap();
    let address = acceptor.local_address();
    let _peer = spawn_peer(acceptor, Behavior::Echo, None);

    let pool = ConnectionPool::new(
        address,
        service,
        pool_config(1, 1),
        TransportStats::default(),
    );
    let reply = pool
        .exchange(request, Duration::from_secs(5))
        .await
        .expect("TCP exchange failed");
    assert!(correlation_of(&reply) > 0);
}
