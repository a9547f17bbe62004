// Copyright (c) Sean Lawlor
//
// This source code is licensed under both the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree.

//! The invocation server accepts sessions from peer instances and answers their
//! invocation envelopes and metadata requests.
//!
//! Every session reads frames in order, but each invocation executes in its own
//! task, so a slow handler never holds up the other requests multiplexed on the same
//! connection. Replies go back through a single writer task per session.

use std::convert::TryFrom;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use prost::Message;
use relay::concurrency::{mpsc_unbounded, JoinHandle, MpscUnboundedSender};
use relay::{InstanceMetadataSource, Invocation, NodeId, RelayErr, Reply, ResourceId};

use crate::auth::server_handshake;
use crate::connection::{Acceptor, TransportStats};
use crate::metadata::InFlight;
use crate::net::frame::{Frame, FrameReader, FrameWriter};
use crate::net::NetworkStream;
use crate::node::NodeTable;
use crate::protocol::control::{control_message, ControlMessage, InstanceStatus};
use crate::protocol::invocation::{Envelope, ErrorDetail, InvocationPayload, OutcomeKind};
use crate::protocol::{NetworkMessage, Payload};

/// Everything a session needs to answer its peer
pub struct ServerContext {
    /// The nodes invocations execute on
    pub nodes: Arc<NodeTable>,
    /// The source of the metadata reported to peers
    pub metadata: Arc<dyn InstanceMetadataSource>,
    /// Tracks executing invocations
    pub in_flight: InFlight,
    /// Transport counters
    pub stats: TransportStats,
    /// Largest accepted frame
    pub max_frame_bytes: usize,
    /// Shared secret peers must prove they hold. [None] skips the handshake.
    pub cookie: Option<String>,
    /// The name announced during the handshake
    pub name: String,
}

struct AbortOnDrop(JoinHandle<()>);

impl Drop for AbortOnDrop {
    fn drop(&mut self) {
        self.0.abort();
    }
}

/// A running invocation server
pub struct InvocationServer {
    local_address: String,
    accepting: Arc<AtomicBool>,
    closed: AtomicBool,
    listener: JoinHandle<()>,
    sessions: Arc<DashMap<u64, JoinHandle<()>>>,
}

impl std::fmt::Debug for InvocationServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InvocationServer")
            .field("local_address", &self.local_address)
            .field("accepting", &self.is_accepting())
            .field("sessions", &self.sessions.len())
            .finish()
    }
}

impl InvocationServer {
    /// Start accepting sessions from `acceptor`
    pub fn serve(mut acceptor: Box<dyn Acceptor>, context: ServerContext) -> Self {
        let local_address = acceptor.local_address();
        let accepting = Arc::new(AtomicBool::new(true));
        let sessions = Arc::new(DashMap::new());
        let context = Arc::new(context);

        let listener = {
            let accepting = accepting.clone();
            let sessions = sessions.clone();
            let local_address = local_address.clone();
            relay::concurrency::spawn(async move {
                let next_session = AtomicU64::new(0);
                loop {
                    match acceptor.accept().await {
                        Ok(stream) => {
                            let id = next_session.fetch_add(1, Ordering::Relaxed);
                            let handle = relay::concurrency::spawn(run_session(
                                id,
                                stream,
                                context.clone(),
                                accepting.clone(),
                                sessions.clone(),
                            ));
                            sessions.insert(id, handle);
                        }
                        Err(err) => {
                            log::warn!("Error accepting session on {local_address}: {err}");
                        }
                    }
                }
            })
        };
        log::info!("Invocation server listening on {local_address}");

        Self {
            local_address,
            accepting,
            closed: AtomicBool::new(false),
            listener,
            sessions,
        }
    }

    /// The address peers connect to
    pub fn local_address(&self) -> &str {
        &self.local_address
    }

    /// Whether new invocations are executed
    pub fn is_accepting(&self) -> bool {
        self.accepting.load(Ordering::SeqCst)
    }

    /// Reject every invocation arriving from now on with
    /// [relay::ErrorKind::Shutdown]. Executing ones run to completion.
    pub fn stop_accepting(&self) {
        self.accepting.store(false, Ordering::SeqCst);
    }

    /// Stop listening and drop every session
    pub fn close(&self) {
        self.stop_accepting();
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.listener.abort();
        let ids = self.sessions.iter().map(|e| *e.key()).collect::<Vec<_>>();
        for id in ids {
            if let Some((_, session)) = self.sessions.remove(&id) {
                session.abort();
            }
        }
        log::info!("Invocation server on {} closed", self.local_address);
    }
}

impl Drop for InvocationServer {
    fn drop(&mut self) {
        self.close();
    }
}

async fn run_session(
    id: u64,
    stream: NetworkStream,
    context: Arc<ServerContext>,
    accepting: Arc<AtomicBool>,
    sessions: Arc<DashMap<u64, JoinHandle<()>>>,
) {
    let peer = stream.peer_label();
    let (read, write) = stream.into_split();
    let mut reader = FrameReader::new(read, context.max_frame_bytes);
    let mut writer = FrameWriter::new(write);

    if let Some(cookie) = &context.cookie {
        if let Err(err) =
            server_handshake(&mut reader, &mut writer, cookie, &context.name, &peer).await
        {
            log::warn!("Rejected session from {peer}: {err}");
            writer.shutdown().await;
            sessions.remove(&id);
            return;
        }
    }

    let (tx, mut rx) = mpsc_unbounded::<NetworkMessage>();
    let writer_peer = peer.clone();
    let _writer = AbortOnDrop(relay::concurrency::spawn(async move {
        while let Some(msg) = rx.recv().await {
            if let Err(err) = writer.write(&msg).await {
                log::warn!("Error writing to {writer_peer}: {err}");
                break;
            }
        }
        writer.shutdown().await;
    }));

    loop {
        match reader.read().await {
            Ok(Frame::Message(msg)) => match msg.message {
                Some(Payload::Invocation(envelope)) => {
                    if envelope.outcome_kind != OutcomeKind::Request as i32 {
                        log::warn!("Discarding a response envelope sent as a request by {peer}");
                        continue;
                    }
                    context.stats.record_received();
                    relay::concurrency::spawn(answer_invocation(
                        envelope,
                        context.clone(),
                        accepting.clone(),
                        tx.clone(),
                    ));
                }
                Some(Payload::Control(ControlMessage {
                    correlation_id,
                    msg: Some(control_message::Msg::MetadataRequest(_)),
                })) => {
                    let status = InstanceStatus::from(&context.metadata.report_async().await);
                    let _ = tx.send(NetworkMessage {
                        message: Some(Payload::Control(ControlMessage {
                            correlation_id,
                            msg: Some(control_message::Msg::Status(status)),
                        })),
                    });
                }
                other => {
                    log::warn!("Unexpected message from {peer}: {other:?}");
                }
            },
            Ok(Frame::Corrupt(err)) => {
                log::warn!("Discarding corrupt frame from {peer}: {err}");
            }
            Ok(Frame::Closed) => {
                log::info!("Session from {peer} closed");
                break;
            }
            Err(err) => {
                log::warn!("Session from {peer} failed: {err}");
                break;
            }
        }
    }
    sessions.remove(&id);
}

fn decode_request(
    envelope: &Envelope,
) -> Result<(NodeId, Option<ResourceId>, Invocation), RelayErr> {
    let node = NodeId::from_bytes(&envelope.destination_node_id)?;
    let resource = envelope
        .destination_resource_id
        .as_deref()
        .map(ResourceId::from_bytes)
        .transpose()?;
    if let Some(resource) = &resource {
        if resource.node_id() != node {
            return Err(RelayErr::routing(format!(
                "Resource {resource} does not belong to node {node}"
            )));
        }
    }
    let payload = InvocationPayload::decode(envelope.payload.as_slice()).map_err(|err| {
        RelayErr::corrupt_envelope(format!("Undecodable invocation payload: {err}"))
    })?;
    let invocation = Invocation::try_from(payload)?;
    Ok((node, resource, invocation))
}

async fn answer_invocation(
    envelope: Envelope,
    context: Arc<ServerContext>,
    accepting: Arc<AtomicBool>,
    reply: MpscUnboundedSender<NetworkMessage>,
) {
    let _in_flight = context.in_flight.enter();

    let outcome = if accepting.load(Ordering::SeqCst) {
        match decode_request(&envelope) {
            Ok((node, resource, invocation)) => {
                context
                    .nodes
                    .invoke(&node, resource.as_ref(), &invocation)
                    .await
            }
            Err(err) => Err(err),
        }
    } else {
        Err(RelayErr::shutdown("Instance is shutting down"))
    };

    let (outcome_kind, payload) = match outcome {
        Ok(Reply::Value(value)) => (OutcomeKind::Result, value),
        Ok(Reply::Acknowledged) => (OutcomeKind::Ack, Vec::new()),
        Ok(Reply::Aggregate(_)) => {
            let err = RelayErr::routing("Nodes don't produce aggregate replies");
            (OutcomeKind::Error, ErrorDetail::from(&err).encode_to_vec())
        }
        Err(err) => {
            log::debug!("Invocation {} failed: {err}", envelope.correlation_id);
            (OutcomeKind::Error, ErrorDetail::from(&err).encode_to_vec())
        }
    };

    let response = NetworkMessage {
        message: Some(Payload::Invocation(Envelope {
            correlation_id: envelope.correlation_id,
            destination_node_id: envelope.destination_node_id,
            destination_resource_id: envelope.destination_resource_id,
            dispatch_type: envelope.dispatch_type,
            payload,
            outcome_kind: outcome_kind as i32,
        })),
    };
    if reply.send(response).is_ok() {
        context.stats.record_sent();
    }
}
