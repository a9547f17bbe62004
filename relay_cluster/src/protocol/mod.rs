// Copyright (c) Sean Lawlor
//
// This source code is licensed under both the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree.

//! Protobuf messages for over-the-wire intercommunication
//! between instances, declared directly with [prost]'s derive macros.
//!
//! This module also owns the conversions between the core model and its wire form,
//! so identifiers and errors are mapped to bytes and codes exactly once, here.

use std::collections::BTreeSet;
use std::convert::TryFrom;
use std::time::{Duration, UNIX_EPOCH};

use relay::routing::RoutingStrategy;
use relay::{DispatchType, InstanceId, InstanceMetadata, Invocation, NodeId, RelayErr};

/// Instance authentication protocol
pub mod auth;

/// Control messages between instances
pub mod control;

/// Invocation envelopes
pub mod invocation;

/// Meta types which include all base network protocol message types
pub mod meta;

#[cfg(test)]
mod tests;

pub use meta::network_message::Message as Payload;
pub use meta::NetworkMessage;

impl From<DispatchType> for invocation::DispatchKind {
    fn from(value: DispatchType) -> Self {
        match value {
            DispatchType::Synchronous => Self::Synchronous,
            DispatchType::Future => Self::Future,
            DispatchType::Consumer => Self::Consumer,
        }
    }
}

impl From<invocation::DispatchKind> for DispatchType {
    fn from(value: invocation::DispatchKind) -> Self {
        match value {
            invocation::DispatchKind::Synchronous => Self::Synchronous,
            invocation::DispatchKind::Future => Self::Future,
            invocation::DispatchKind::Consumer => Self::Consumer,
        }
    }
}

impl From<RoutingStrategy> for invocation::StrategyKind {
    fn from(value: RoutingStrategy) -> Self {
        match value {
            RoutingStrategy::Addressed => Self::Addressed,
            RoutingStrategy::Aggregate => Self::Aggregate,
            RoutingStrategy::Any => Self::Any,
        }
    }
}

impl From<invocation::StrategyKind> for RoutingStrategy {
    fn from(value: invocation::StrategyKind) -> Self {
        match value {
            invocation::StrategyKind::Addressed => Self::Addressed,
            invocation::StrategyKind::Aggregate => Self::Aggregate,
            invocation::StrategyKind::Any => Self::Any,
        }
    }
}

/// Decode a wire dispatch type, rejecting unknown values
pub fn dispatch_from_wire(value: i32) -> Result<DispatchType, RelayErr> {
    invocation::DispatchKind::from_i32(value)
        .map(DispatchType::from)
        .ok_or_else(|| RelayErr::corrupt_envelope(format!("Unknown dispatch type {value}")))
}

impl From<&Invocation> for invocation::InvocationPayload {
    fn from(value: &Invocation) -> Self {
        Self {
            type_name: value.type_name.clone(),
            name: value.name.clone(),
            method: value.method.clone(),
            parameters: value.parameters.clone(),
            arguments: value.arguments.clone(),
            dispatch_type: invocation::DispatchKind::from(value.dispatch) as i32,
            strategy: invocation::StrategyKind::from(value.strategy) as i32,
            result_consumers: value.result_consumers,
        }
    }
}

impl TryFrom<invocation::InvocationPayload> for Invocation {
    type Error = RelayErr;

    fn try_from(value: invocation::InvocationPayload) -> Result<Self, Self::Error> {
        if value.parameters.len() != value.arguments.len() {
            return Err(RelayErr::corrupt_envelope(format!(
                "{} parameter types but {} arguments",
                value.parameters.len(),
                value.arguments.len()
            )));
        }
        let dispatch = dispatch_from_wire(value.dispatch_type)?;
        let strategy = invocation::StrategyKind::from_i32(value.strategy)
            .map(RoutingStrategy::from)
            .ok_or_else(|| {
                RelayErr::corrupt_envelope(format!("Unknown routing strategy {}", value.strategy))
            })?;
        Ok(Invocation {
            type_name: value.type_name,
            name: value.name,
            method: value.method,
            parameters: value.parameters,
            arguments: value.arguments,
            dispatch,
            strategy,
            result_consumers: value.result_consumers,
        })
    }
}

impl From<&RelayErr> for invocation::ErrorDetail {
    fn from(value: &RelayErr) -> Self {
        Self {
            code: value.kind().code(),
            message: value.message().to_string(),
        }
    }
}

impl From<invocation::ErrorDetail> for RelayErr {
    fn from(value: invocation::ErrorDetail) -> Self {
        RelayErr::from_remote(value.code, value.message)
    }
}

impl From<&InstanceMetadata> for control::InstanceStatus {
    fn from(value: &InstanceMetadata) -> Self {
        let timestamp_millis = value
            .timestamp
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or_default();
        Self {
            instance_id: value.instance_id.to_bytes().to_vec(),
            quality: value.quality,
            node_ids: value.node_ids.iter().map(NodeId::to_bytes).collect(),
            timestamp_millis,
        }
    }
}

impl TryFrom<control::InstanceStatus> for InstanceMetadata {
    type Error = RelayErr;

    fn try_from(value: control::InstanceStatus) -> Result<Self, Self::Error> {
        let instance_id = InstanceId::from_bytes(&value.instance_id)?;
        let node_ids = value
            .node_ids
            .iter()
            .map(|bytes| NodeId::from_bytes(bytes))
            .collect::<Result<BTreeSet<_>, _>>()?;
        Ok(InstanceMetadata {
            instance_id,
            quality: value.quality,
            node_ids,
            timestamp: UNIX_EPOCH + Duration::from_millis(value.timestamp_millis),
        })
    }
}
