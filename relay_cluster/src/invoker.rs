// Copyright (c) Sean Lawlor
//
// This source code is licensed under both the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree.

//! A remote invoker is the client side of one peer instance. It owns the connection
//! pool to the peer's address and translates invocations and metadata requests into
//! wire messages and back.

use std::convert::TryFrom;
use std::sync::Arc;

use once_cell::sync::OnceCell;
use prost::Message;
use relay::concurrency::Duration;
use relay::{InstanceId, InstanceMetadata, Invocation, NodeId, RelayErr, Reply, ResourceId};

use crate::connection::{AsyncConnectionService, ConnectionPool, PoolConfig, TransportStats};
use crate::protocol::control::{control_message, ControlMessage, MetadataRequest};
use crate::protocol::invocation::{
    DispatchKind, Envelope, ErrorDetail, InvocationPayload, OutcomeKind,
};
use crate::protocol::{NetworkMessage, Payload};

/// The client side of one peer instance
#[derive(Debug)]
pub struct RemoteInvoker {
    address: String,
    instance_id: OnceCell<InstanceId>,
    pool: ConnectionPool,
}

impl RemoteInvoker {
    /// Create an invoker for the peer at `address`. No connection is opened yet.
    pub fn new(
        address: String,
        service: Arc<dyn AsyncConnectionService>,
        config: PoolConfig,
        stats: TransportStats,
    ) -> Self {
        Self {
            pool: ConnectionPool::new(address.clone(), service, config, stats),
            address,
            instance_id: OnceCell::new(),
        }
    }

    /// The peer address
    pub fn address(&self) -> &str {
        &self.address
    }

    /// The instance this invoker is bound to, once it has reported metadata
    pub fn instance_id(&self) -> Option<InstanceId> {
        self.instance_id.get().copied()
    }

    /// Bind the invoker to the instance behind its address. An invoker binds exactly
    /// once; returns false if it is already bound to a different instance.
    pub fn bind(&self, instance: InstanceId) -> bool {
        *self.instance_id.get_or_init(|| instance) == instance
    }

    /// The connection pool to the peer
    pub fn pool(&self) -> &ConnectionPool {
        &self.pool
    }

    /// Ask the peer for its current metadata
    pub async fn fetch_metadata(&self, timeout: Duration) -> Result<InstanceMetadata, RelayErr> {
        let reply = self
            .pool
            .exchange(
                |correlation_id| NetworkMessage {
                    message: Some(Payload::Control(ControlMessage {
                        correlation_id,
                        msg: Some(control_message::Msg::MetadataRequest(MetadataRequest {})),
                    })),
                },
                timeout,
            )
            .await?;

        match reply.message {
            Some(Payload::Control(ControlMessage {
                msg: Some(control_message::Msg::Status(status)),
                ..
            })) => InstanceMetadata::try_from(status),
            Some(Payload::Control(ControlMessage {
                msg: Some(control_message::Msg::Error(detail)),
                ..
            })) => Err(RelayErr::from(detail)),
            other => Err(RelayErr::corrupt_envelope(format!(
                "Unexpected metadata reply from {}: {other:?}",
                self.address
            ))),
        }
    }

    /// Execute an invocation on a node hosted by the peer
    ///
    /// * `node`: The destination node
    /// * `resource`: The addressed resource, if the invocation targets one
    /// * `invocation`: The invocation
    /// * `timeout`: How long to wait for the outcome
    pub async fn invoke(
        &self,
        node: NodeId,
        resource: Option<ResourceId>,
        invocation: &Invocation,
        timeout: Duration,
    ) -> Result<Reply, RelayErr> {
        let payload = InvocationPayload::from(invocation).encode_to_vec();
        let dispatch_type = DispatchKind::from(invocation.dispatch) as i32;
        let reply = self
            .pool
            .exchange(
                |correlation_id| NetworkMessage {
                    message: Some(Payload::Invocation(Envelope {
                        correlation_id,
                        destination_node_id: node.to_bytes(),
                        destination_resource_id: resource.map(|r| r.to_bytes()),
                        dispatch_type,
                        payload,
                        outcome_kind: OutcomeKind::Request as i32,
                    })),
                },
                timeout,
            )
            .await?;

        let envelope = match reply.message {
            Some(Payload::Invocation(envelope)) => envelope,
            other => {
                return Err(RelayErr::corrupt_envelope(format!(
                    "Unexpected invocation reply from {}: {other:?}",
                    self.address
                )))
            }
        };
        match OutcomeKind::from_i32(envelope.outcome_kind) {
            Some(OutcomeKind::Result) => Ok(Reply::Value(envelope.payload)),
            Some(OutcomeKind::Ack) => Ok(Reply::Acknowledged),
            Some(OutcomeKind::Error) => {
                let detail = ErrorDetail::decode(envelope.payload.as_slice()).map_err(|err| {
                    RelayErr::corrupt_envelope(format!("Undecodable error detail: {err}"))
                })?;
                Err(RelayErr::from(detail))
            }
            Some(OutcomeKind::Request) | None => Err(RelayErr::corrupt_envelope(format!(
                "Invalid outcome kind {} from {}",
                envelope.outcome_kind, self.address
            ))),
        }
    }

    /// Re-open connections down to the pool minimum
    pub async fn maintain(&self) -> Result<(), RelayErr> {
        self.pool.maintain().await
    }

    /// Close every connection to the peer. Outstanding calls fail with
    /// [relay::ErrorKind::InstanceNotFound].
    pub async fn stop(&self) {
        self.pool.close().await;
    }

    /// Whether [RemoteInvoker::stop] has been called
    pub fn is_stopped(&self) -> bool {
        self.pool.is_closed()
    }
}
