// Copyright (c) Sean Lawlor
//
// This source code is licensed under both the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree.

//! In-process connection service. Instances sharing a [MemoryHub] reach each other
//! over `tokio::io::duplex` pipes, with no sockets involved.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use relay::concurrency::{mpsc_bounded, MpscReceiver, MpscSender};
use relay::{ErrorKind, RelayErr};

use super::{Acceptor, AsyncConnectionService};
use crate::net::NetworkStream;

const PIPE_BUFFER_BYTES: usize = 64 * 1024;
const ACCEPT_BACKLOG: usize = 128;

/// Registry of in-process listeners, keyed by address
#[derive(Debug, Default)]
pub struct MemoryHub {
    listeners: DashMap<String, MpscSender<NetworkStream>>,
    next_port: AtomicU64,
}

impl MemoryHub {
    /// Create an empty hub
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Whether an instance is currently listening at the address
    pub fn is_listening(&self, address: &str) -> bool {
        self.listeners.contains_key(address)
    }

    fn assign_address(&self, requested: &str) -> String {
        if requested.is_empty() || requested.ends_with(":0") {
            let port = self.next_port.fetch_add(1, Ordering::Relaxed) + 1;
            format!("memory://{port}")
        } else {
            requested.to_string()
        }
    }
}

/// Connection service over a shared [MemoryHub]
#[derive(Debug, Clone)]
pub struct MemoryConnectionService {
    hub: Arc<MemoryHub>,
}

impl MemoryConnectionService {
    /// Create a service reaching every instance registered on the hub
    pub fn new(hub: Arc<MemoryHub>) -> Self {
        Self { hub }
    }
}

fn refused(address: &str) -> RelayErr {
    RelayErr::from(std::io::Error::new(
        std::io::ErrorKind::ConnectionRefused,
        format!("Nothing is listening at {address}"),
    ))
}

#[async_trait::async_trait]
impl AsyncConnectionService for MemoryConnectionService {
    async fn connect(&self, address: &str) -> Result<NetworkStream, RelayErr> {
        let sender = match self.hub.listeners.get(address) {
            Some(sender) => sender.value().clone(),
            None => return Err(refused(address)),
        };
        let (client, server) = tokio::io::duplex(PIPE_BUFFER_BYTES);
        let local_label = format!("client-of-{address}");
        sender
            .send(NetworkStream::duplex(
                server,
                local_label.clone(),
                address.to_string(),
            ))
            .await
            .map_err(|_| refused(address))?;
        log::debug!("In-process session opened to {address}");
        Ok(NetworkStream::duplex(
            client,
            address.to_string(),
            local_label,
        ))
    }

    async fn listen(&self, address: &str) -> Result<Box<dyn Acceptor>, RelayErr> {
        let address = self.hub.assign_address(address);
        let (tx, rx) = mpsc_bounded(ACCEPT_BACKLOG);
        match self.hub.listeners.entry(address.clone()) {
            dashmap::mapref::entry::Entry::Occupied(_) => {
                return Err(RelayErr::new(
                    ErrorKind::Transport,
                    format!("Address {address} is already in use"),
                ));
            }
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(tx);
            }
        }
        log::debug!("Listening for in-process sessions on {address}");
        Ok(Box::new(MemoryAcceptor {
            hub: self.hub.clone(),
            address,
            incoming: rx,
        }))
    }
}

struct MemoryAcceptor {
    hub: Arc<MemoryHub>,
    address: String,
    incoming: MpscReceiver<NetworkStream>,
}

#[async_trait::async_trait]
impl Acceptor for MemoryAcceptor {
    async fn accept(&mut self) -> Result<NetworkStream, RelayErr> {
        self.incoming.recv().await.ok_or_else(|| {
            RelayErr::new(
                ErrorKind::Transport,
                format!("Listener at {} closed", self.address),
            )
        })
    }

    fn local_address(&self) -> String {
        self.address.clone()
    }
}

impl Drop for MemoryAcceptor {
    fn drop(&mut self) {
        self.hub.listeners.remove(&self.address);
    }
}
