// Copyright (c) Sean Lawlor
//
// This source code is licensed under both the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree.

//! Network streams which transmit [prost::Message] encoded messages

use std::net::SocketAddr;

use tokio::net::TcpStream;

pub(crate) mod frame;

/// Boxed async read half of a connected stream
pub type BoxRead = Box<dyn tokio::io::AsyncRead + Unpin + Send + 'static>;
/// Boxed async write half of a connected stream
pub type BoxWrite = Box<dyn tokio::io::AsyncWrite + Unpin + Send + 'static>;

/// A network data stream which can either be
/// 1. unencrypted
/// 2. encrypted and the server-side of the session
/// 3. encrypted and the client-side of the session
/// 4. an externally provided byte stream (e.g. an in-process duplex pipe)
pub enum NetworkStream {
    /// Unencrypted session
    Raw {
        /// The peer's address
        peer_addr: SocketAddr,
        /// The local address
        local_addr: SocketAddr,
        /// The stream
        stream: TcpStream,
    },
    /// Encrypted as the server-side of the session
    TlsServer {
        /// The peer's address
        peer_addr: SocketAddr,
        /// The local address
        local_addr: SocketAddr,
        /// The stream
        stream: tokio_rustls::server::TlsStream<TcpStream>,
    },
    /// Encrypted as the client-side of the session
    TlsClient {
        /// The peer's address
        peer_addr: SocketAddr,
        /// The local address
        local_addr: SocketAddr,
        /// The stream
        stream: tokio_rustls::client::TlsStream<TcpStream>,
    },
    /// External transport. The reader/writer must be a connected, bidirectional byte
    /// stream using the same framing (u64 big-endian length prefix + prost payload).
    External {
        /// Label for the peer, used for diagnostics
        peer_label: String,
        /// Label for the local endpoint, used for diagnostics
        local_label: String,
        /// Read half
        reader: BoxRead,
        /// Write half
        writer: BoxWrite,
    },
}

impl NetworkStream {
    /// Wrap an in-process duplex pipe
    pub fn duplex(
        stream: tokio::io::DuplexStream,
        peer_label: String,
        local_label: String,
    ) -> Self {
        let (reader, writer) = tokio::io::split(stream);
        Self::External {
            peer_label,
            local_label,
            reader: Box::new(reader),
            writer: Box::new(writer),
        }
    }

    /// A printable label of the remote end
    pub fn peer_label(&self) -> String {
        match self {
            Self::Raw { peer_addr, .. } => peer_addr.to_string(),
            Self::TlsServer { peer_addr, .. } => peer_addr.to_string(),
            Self::TlsClient { peer_addr, .. } => peer_addr.to_string(),
            Self::External { peer_label, .. } => peer_label.clone(),
        }
    }

    /// A printable label of the local end
    pub fn local_label(&self) -> String {
        match self {
            Self::Raw { local_addr, .. } => local_addr.to_string(),
            Self::TlsServer { local_addr, .. } => local_addr.to_string(),
            Self::TlsClient { local_addr, .. } => local_addr.to_string(),
            Self::External { local_label, .. } => local_label.clone(),
        }
    }

    /// Split the stream into independently owned read and write halves
    pub fn into_split(self) -> (BoxRead, BoxWrite) {
        match self {
            Self::Raw { stream, .. } => {
                let (read, write) = stream.into_split();
                (Box::new(read), Box::new(write))
            }
            Self::TlsServer { stream, .. } => {
                let (read, write) = tokio::io::split(stream);
                (Box::new(read), Box::new(write))
            }
            Self::TlsClient { stream, .. } => {
                let (read, write) = tokio::io::split(stream);
                (Box::new(read), Box::new(write))
            }
            Self::External { reader, writer, .. } => (reader, writer),
        }
    }
}

impl std::fmt::Debug for NetworkStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mode = match self {
            Self::Raw { .. } => "Raw",
            Self::TlsServer { .. } => "TlsServer",
            Self::TlsClient { .. } => "TlsClient",
            Self::External { .. } => "External",
        };
        f.debug_struct("NetworkStream")
            .field("mode", &mode)
            .field("peer", &self.peer_label())
            .field("local", &self.local_label())
            .finish()
    }
}

/// Incoming encryption mode
#[derive(Clone)]
pub enum IncomingEncryptionMode {
    /// Accept sockets raw, with no encryption
    Raw,
    /// Accept sockets and establish a secure connection
    Tls(tokio_rustls::TlsAcceptor),
}

impl std::fmt::Debug for IncomingEncryptionMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut wip = f.debug_struct("IncomingEncryptionMode");
        match &self {
            Self::Raw => {
                _ = wip.field("mode", &"Raw");
            }
            Self::Tls(_) => {
                _ = wip.field("mode", &"Tls");
            }
        }
        wip.finish()
    }
}

/// Outgoing encryption mode
#[derive(Clone)]
pub enum OutgoingEncryptionMode {
    /// Connect raw, with no encryption
    Raw,
    /// Connect and establish a secure connection, verifying the server's name
    Tls {
        /// The connector with the client configuration
        connector: tokio_rustls::TlsConnector,
        /// The name the server's certificate must carry
        server_name: rustls::ServerName,
    },
}

impl std::fmt::Debug for OutgoingEncryptionMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut wip = f.debug_struct("OutgoingEncryptionMode");
        match &self {
            Self::Raw => {
                _ = wip.field("mode", &"Raw");
            }
            Self::Tls { server_name, .. } => {
                _ = wip.field("mode", &"Tls").field("server_name", server_name);
            }
        }
        wip.finish()
    }
}
