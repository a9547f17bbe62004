// Copyright (c) Sean Lawlor
//
// This source code is licensed under both the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree.

//! The service every test instance hosts

use std::io::{Read, Write};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use relay::dispatch::{ParamKind, ReturnShape};
use relay::{
    ApplicationId, BoxedErr, Invocation, MethodSignature, MethodTable, NodeId, RelayErr, Resource,
    RoutingStrategy, Target,
};
use relay_cluster::{Call, InstanceBuilder, Node};

pub const GREETER: &str = "Greeter";

/// Answers `hello` with its name and counts the `bump` calls it has seen
#[derive(Debug)]
pub struct Greeter {
    name: String,
    bumps: AtomicU64,
}

impl Greeter {
    pub fn new<S: Into<String>>(name: S) -> Self {
        Self {
            name: name.into(),
            bumps: AtomicU64::new(0),
        }
    }
}

#[async_trait::async_trait]
impl Resource for Greeter {
    async fn invoke(&self, invocation: &Invocation) -> Result<Vec<u8>, BoxedErr> {
        match invocation.method.as_str() {
            "hello" => Ok(format!("hello from {}", self.name).into_bytes()),
            "bump" => {
                let bumps = self.bumps.fetch_add(1, Ordering::SeqCst) + 1;
                Ok(bumps.to_be_bytes().to_vec())
            }
            "refuse" => Err(format!("{} refuses", self.name).into()),
            other => Err(format!("Greeter has no method {other}").into()),
        }
    }

    fn serialize(&self, sink: &mut dyn Write) -> std::io::Result<()> {
        sink.write_all(&self.bumps.load(Ordering::SeqCst).to_be_bytes())?;
        sink.write_all(self.name.as_bytes())
    }

    fn deserialize(source: &mut dyn Read) -> std::io::Result<Self> {
        let mut bumps = [0u8; 8];
        source.read_exact(&mut bumps)?;
        let mut name = String::new();
        source.read_to_string(&mut name)?;
        Ok(Self {
            name,
            bumps: AtomicU64::new(u64::from_be_bytes(bumps)),
        })
    }
}

/// The greeter's registered methods
pub fn methods() -> Result<MethodTable, RelayErr> {
    MethodTable::builder()
        .register(MethodSignature::new(GREETER, "hello"), RoutingStrategy::Any)
        .register(
            MethodSignature::new(GREETER, "bump").returns(ReturnShape::Future),
            RoutingStrategy::Addressed,
        )
        .register(
            MethodSignature::new(GREETER, "refuse").param(ParamKind::ErrorCallback),
            RoutingStrategy::Addressed,
        )
        .build()
}

/// A call to a greeter method, routed with `strategy`
pub fn call(
    methods: &MethodTable,
    method: &str,
    strategy: RoutingStrategy,
    target: Target,
) -> Result<Call, RelayErr> {
    let descriptor = methods
        .lookup(GREETER, method)
        .ok_or_else(|| RelayErr::routing(format!("Greeter has no method {method}")))?;
    let mut invocation = descriptor.invocation(vec![])?;
    invocation.strategy = strategy;
    Ok(Call::new(invocation, target))
}

/// Add a greeter node of `application` to the instance being built
pub fn with_greeter(
    builder: InstanceBuilder,
    application: ApplicationId,
    name: &str,
) -> (InstanceBuilder, NodeId) {
    let node = NodeId::new(builder.instance_id(), application);
    let greeter: Arc<dyn Resource> = Arc::new(Greeter::new(name));
    (
        builder.with_node(Node::new(node).with_service(GREETER, greeter)),
        node,
    )
}
