// Copyright (c) Sean Lawlor
//
// This source code is licensed under both the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree.

//! TCP connection service, optionally encrypted with TLS

use relay::{ErrorKind, RelayErr};
use tokio::net::{TcpListener, TcpStream};

use super::{Acceptor, AsyncConnectionService};
use crate::net::{IncomingEncryptionMode, NetworkStream, OutgoingEncryptionMode};

const SCHEME: &str = "tcp://";

fn socket_address(address: &str) -> &str {
    address.strip_prefix(SCHEME).unwrap_or(address)
}

/// Opens and accepts TCP sockets
#[derive(Debug, Clone)]
pub struct TcpConnectionService {
    incoming: IncomingEncryptionMode,
    outgoing: OutgoingEncryptionMode,
}

impl Default for TcpConnectionService {
    fn default() -> Self {
        Self::new()
    }
}

impl TcpConnectionService {
    /// Unencrypted TCP in both directions
    pub fn new() -> Self {
        Self {
            incoming: IncomingEncryptionMode::Raw,
            outgoing: OutgoingEncryptionMode::Raw,
        }
    }

    /// TCP with the given encryption for accepted and opened sockets
    pub fn with_encryption(
        incoming: IncomingEncryptionMode,
        outgoing: OutgoingEncryptionMode,
    ) -> Self {
        Self { incoming, outgoing }
    }
}

#[async_trait::async_trait]
impl AsyncConnectionService for TcpConnectionService {
    async fn connect(&self, address: &str) -> Result<NetworkStream, RelayErr> {
        // connect to the socket
        let stream = TcpStream::connect(socket_address(address)).await?;
        stream.set_nodelay(true)?;
        let peer_addr = stream.peer_addr()?;
        let local_addr = stream.local_addr()?;

        let stream = match &self.outgoing {
            OutgoingEncryptionMode::Raw => NetworkStream::Raw {
                peer_addr,
                local_addr,
                stream,
            },
            OutgoingEncryptionMode::Tls {
                connector,
                server_name,
            } => {
                let stream = connector.connect(server_name.clone(), stream).await?;
                NetworkStream::TlsClient {
                    peer_addr,
                    local_addr,
                    stream,
                }
            }
        };
        log::info!("TCP Session opened for {peer_addr}");
        Ok(stream)
    }

    async fn listen(&self, address: &str) -> Result<Box<dyn Acceptor>, RelayErr> {
        let listener = TcpListener::bind(socket_address(address)).await?;
        let local_addr = listener.local_addr()?;
        log::info!("Listening for TCP sessions on {local_addr}");
        Ok(Box::new(TcpAcceptor {
            listener,
            local_address: local_addr.to_string(),
            encryption: self.incoming.clone(),
        }))
    }
}

struct TcpAcceptor {
    listener: TcpListener,
    local_address: String,
    encryption: IncomingEncryptionMode,
}

#[async_trait::async_trait]
impl Acceptor for TcpAcceptor {
    async fn accept(&mut self) -> Result<NetworkStream, RelayErr> {
        let (stream, peer_addr) = self.listener.accept().await?;
        let local_addr = stream.local_addr()?;
        let stream = match &self.encryption {
            IncomingEncryptionMode::Raw => NetworkStream::Raw {
                peer_addr,
                local_addr,
                stream,
            },
            IncomingEncryptionMode::Tls(acceptor) => match acceptor.accept(stream).await {
                Ok(stream) => NetworkStream::TlsServer {
                    peer_addr,
                    local_addr,
                    stream,
                },
                Err(err) => {
                    log::warn!("Error establishing secure socket with {peer_addr}: {err}");
                    return Err(RelayErr::new(
                        ErrorKind::Transport,
                        format!("TLS negotiation with {peer_addr} failed"),
                    )
                    .with_cause(Box::new(err)));
                }
            },
        };
        log::info!("TCP Session opened for {peer_addr}");
        Ok(stream)
    }

    fn local_address(&self) -> String {
        self.local_address.clone()
    }
}
