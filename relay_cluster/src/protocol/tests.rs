// Copyright (c) Sean Lawlor
//
// This source code is licensed under both the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree.

use std::collections::BTreeSet;
use std::convert::TryFrom;

use prost::Message;
use relay::dispatch::{ParamKind, ReturnShape};
use relay::{
    ApplicationId, DispatchType, ErrorKind, InstanceId, InstanceMetadata, Invocation,
    MethodSignature, MethodTable, NodeId, RelayErr, ResourceId, RoutingStrategy,
};

use super::invocation::{Envelope, InvocationPayload, OutcomeKind};
use super::*;

fn encode<M: Message>(msg: &M) -> Vec<u8> {
    msg.encode_to_vec()
}

#[test]
fn invocation_survives_the_wire() {
    let table = MethodTable::builder()
        .register(
            MethodSignature::new("Leaderboard", "submit")
                .param(ParamKind::value("PlayerId"))
                .param(ParamKind::value("u64"))
                .param(ParamKind::value("String"))
                .returns(ReturnShape::Future),
            RoutingStrategy::Any,
        )
        .build()
        .unwrap();
    let invocation = table
        .lookup("Leaderboard", "submit")
        .unwrap()
        .invocation(vec![b"p-1".to_vec(), 42u64.to_be_bytes().to_vec(), b"".to_vec()])
        .unwrap();

    let bytes = encode(&InvocationPayload::from(&invocation));
    let decoded =
        Invocation::try_from(InvocationPayload::decode(bytes.as_slice()).unwrap()).unwrap();

    assert_eq!(invocation, decoded);
    assert_eq!(DispatchType::Future, decoded.dispatch);
    assert_eq!(
        vec!["PlayerId".to_string(), "u64".to_string(), "String".to_string()],
        decoded.parameters
    );
}

#[test]
fn every_dispatch_type_survives_the_envelope() {
    for dispatch in [
        DispatchType::Synchronous,
        DispatchType::Future,
        DispatchType::Consumer,
    ] {
        let node = NodeId::new(InstanceId::random(), ApplicationId::random());
        let resource = ResourceId::new(node);
        let envelope = Envelope {
            correlation_id: 7,
            destination_node_id: node.to_bytes(),
            destination_resource_id: Some(resource.to_bytes()),
            dispatch_type: invocation::DispatchKind::from(dispatch) as i32,
            payload: vec![1, 2, 3],
            outcome_kind: OutcomeKind::Request as i32,
        };
        let message = NetworkMessage {
            message: Some(Payload::Invocation(envelope.clone())),
        };

        let decoded = NetworkMessage::decode(encode(&message).as_slice()).unwrap();
        match decoded.message {
            Some(Payload::Invocation(received)) => {
                assert_eq!(envelope, received);
                assert_eq!(dispatch, dispatch_from_wire(received.dispatch_type).unwrap());
                assert_eq!(
                    resource,
                    ResourceId::from_bytes(&received.destination_resource_id.unwrap()).unwrap()
                );
            }
            other => panic!("Unexpected message {:?}", other),
        }
    }
}

#[test]
fn unknown_enumerations_are_corrupt() {
    let err = dispatch_from_wire(42).unwrap_err();
    assert_eq!(ErrorKind::CorruptEnvelope, err.kind());

    let payload = InvocationPayload {
        type_name: "T".to_string(),
        method: "m".to_string(),
        strategy: 17,
        ..Default::default()
    };
    let err = Invocation::try_from(payload).unwrap_err();
    assert_eq!(ErrorKind::CorruptEnvelope, err.kind());
}

#[test]
fn mismatched_arguments_are_corrupt() {
    let payload = InvocationPayload {
        type_name: "T".to_string(),
        method: "m".to_string(),
        parameters: vec!["u8".to_string()],
        ..Default::default()
    };
    let err = Invocation::try_from(payload).unwrap_err();
    assert_eq!(ErrorKind::CorruptEnvelope, err.kind());
}

#[test]
fn metadata_survives_the_wire() {
    let instance = InstanceId::random();
    let nodes = (0..3)
        .map(|_| NodeId::new(instance, ApplicationId::random()))
        .chain(std::iter::once(NodeId::for_master(instance)))
        .collect::<BTreeSet<_>>();
    let metadata = InstanceMetadata::new(instance, 3.5, nodes);

    let status = control::InstanceStatus::from(&metadata);
    let decoded = control::InstanceStatus::decode(encode(&status).as_slice()).unwrap();
    let restored = InstanceMetadata::try_from(decoded).unwrap();

    assert_eq!(metadata.instance_id, restored.instance_id);
    assert_eq!(metadata.quality, restored.quality);
    assert_eq!(metadata.node_ids, restored.node_ids);
}

#[test]
fn errors_map_to_codes_at_the_boundary() {
    let err = RelayErr::new(ErrorKind::DeadResource, "resource died");
    let detail = invocation::ErrorDetail::from(&err);
    assert_eq!(ErrorKind::DeadResource.code(), detail.code);
    assert_eq!(err, RelayErr::from(detail));

    let err = RelayErr::handler("application failure".into());
    let relayed = RelayErr::from(invocation::ErrorDetail::from(&err));
    assert_eq!(ErrorKind::RemoteThrown, relayed.kind());
    assert_eq!("application failure", relayed.message());
}
