// Copyright (c) Sean Lawlor
//
// This source code is licensed under both the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree.

//! Shared test fixtures

use std::io::{Read, Write};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use relay::concurrency::{sleep, Duration, Instant};
use relay::dispatch::{ParamKind, ReturnShape};
use relay::{
    ApplicationId, BoxedErr, Invocation, MethodSignature, MethodTable, NodeId, Resource,
    RoutingStrategy,
};

use crate::connection::{MemoryConnectionService, MemoryHub};
use crate::discovery::DynamicInstanceDiscovery;
use crate::instance::{Instance, InstanceBuilder};
use crate::node::Node;
use crate::ClusterConfig;

/// Periodic check for condition
pub(crate) async fn periodic_check<F>(check: F, timeout: Duration)
where
    F: Fn() -> bool,
{
    let start = Instant::now();
    while start.elapsed() < timeout {
        if check() {
            break;
        }
        sleep(Duration::from_millis(50)).await;
    }
    assert!(check());
}

pub(crate) const SERVICE: &str = "Probe";

/// A resource which answers a handful of probe methods
///
/// * `label`: returns the label it was created with
/// * `echo`: returns its arguments concatenated
/// * `add`: adds the big-endian u64 argument to its counter, returns the total
/// * `sleep`: sleeps for the big-endian u64 argument in milliseconds, then labels
/// * `fail`: always fails
#[derive(Debug, Default)]
pub(crate) struct Probe {
    label: String,
    total: AtomicU64,
}

impl Probe {
    pub(crate) fn new<S: Into<String>>(label: S) -> Self {
        Self {
            label: label.into(),
            total: AtomicU64::new(0),
        }
    }

    pub(crate) fn arc<S: Into<String>>(label: S) -> Arc<dyn Resource> {
        Arc::new(Self::new(label))
    }

    pub(crate) fn total(&self) -> u64 {
        self.total.load(Ordering::SeqCst)
    }
}

fn u64_arg(invocation: &Invocation) -> Result<u64, BoxedErr> {
    let bytes = invocation
        .arguments
        .first()
        .ok_or("missing argument")?
        .as_slice();
    let mut buf = [0u8; 8];
    if bytes.len() != 8 {
        return Err("argument is not a u64".into());
    }
    buf.copy_from_slice(bytes);
    Ok(u64::from_be_bytes(buf))
}

#[async_trait::async_trait]
impl Resource for Probe {
    async fn invoke(&self, invocation: &Invocation) -> Result<Vec<u8>, BoxedErr> {
        match invocation.method.as_str() {
            "label" => Ok(self.label.as_bytes().to_vec()),
            "echo" => Ok(invocation.arguments.concat()),
            "add" => {
                let delta = u64_arg(invocation)?;
                let total = self.total.fetch_add(delta, Ordering::SeqCst) + delta;
                Ok(total.to_be_bytes().to_vec())
            }
            "sleep" => {
                sleep(Duration::from_millis(u64_arg(invocation)?)).await;
                Ok(self.label.as_bytes().to_vec())
            }
            "fail" => Err(format!("{} refused", self.label).into()),
            other => Err(format!("no method {other}").into()),
        }
    }

    fn serialize(&self, sink: &mut dyn Write) -> std::io::Result<()> {
        sink.write_all(&self.total().to_be_bytes())?;
        sink.write_all(self.label.as_bytes())
    }

    fn deserialize(source: &mut dyn Read) -> std::io::Result<Self> {
        let mut total = [0u8; 8];
        source.read_exact(&mut total)?;
        let mut label = String::new();
        source.read_to_string(&mut label)?;
        Ok(Self {
            label,
            total: AtomicU64::new(u64::from_be_bytes(total)),
        })
    }
}

/// The probe methods, registered the way an application would
pub(crate) fn probe_table() -> MethodTable {
    MethodTable::builder()
        .register(
            MethodSignature::new(SERVICE, "label"),
            RoutingStrategy::Any,
        )
        .register(
            MethodSignature::new(SERVICE, "echo").param(ParamKind::value("Vec<u8>")),
            RoutingStrategy::Addressed,
        )
        .register(
            MethodSignature::new(SERVICE, "add")
                .param(ParamKind::value("u64"))
                .returns(ReturnShape::Future),
            RoutingStrategy::Addressed,
        )
        .register(
            MethodSignature::new(SERVICE, "sleep").param(ParamKind::value("u64")),
            RoutingStrategy::Addressed,
        )
        .register(
            MethodSignature::new(SERVICE, "fail")
                .param(ParamKind::ResultCallback)
                .param(ParamKind::ErrorCallback),
            RoutingStrategy::Addressed,
        )
        .build()
        .expect("Probe methods failed to register")
}

/// An invocation of a probe method, routed with `strategy`
pub(crate) fn probe_call(
    method: &str,
    strategy: RoutingStrategy,
    arguments: Vec<Vec<u8>>,
) -> Invocation {
    let mut invocation = probe_table()
        .lookup(SERVICE, method)
        .expect("Unknown probe method")
        .invocation(arguments)
        .expect("Bad probe arguments");
    invocation.strategy = strategy;
    invocation
}

/// Fast refresh settings for tests
pub(crate) fn test_config() -> ClusterConfig {
    ClusterConfig::default()
        .with_refresh_interval(Duration::from_millis(100))
        .with_refresh_timeout(Duration::from_millis(500))
        .with_refresh_total_timeout(Duration::from_millis(1000))
        .with_call_timeout(Duration::from_secs(5))
        .with_shutdown_grace(Duration::from_secs(2))
}

/// A node of `application` on `instance` running a labelled probe service
pub(crate) fn probe_node(node: NodeId, label: &str) -> Node {
    Node::new(node).with_service(SERVICE, Probe::arc(label))
}

/// A set of instances sharing one in-process hub and one discovery service
pub(crate) struct TestCluster {
    pub(crate) hub: Arc<MemoryHub>,
    pub(crate) discovery: Arc<DynamicInstanceDiscovery>,
    pub(crate) application: ApplicationId,
}

impl TestCluster {
    pub(crate) fn new() -> Self {
        let _ = env_logger::builder().is_test(true).try_init();
        Self {
            hub: MemoryHub::new(),
            discovery: Arc::new(DynamicInstanceDiscovery::new()),
            application: ApplicationId::random(),
        }
    }

    /// A builder wired to the shared hub and discovery
    pub(crate) fn builder(&self, config: ClusterConfig) -> InstanceBuilder {
        InstanceBuilder::new(config)
            .with_discovery(self.discovery.clone())
            .with_connection_service(Arc::new(MemoryConnectionService::new(self.hub.clone())))
    }

    /// Start an instance hosting one probe node of the cluster's application, and
    /// announce it to every other member
    pub(crate) async fn spawn_member(&self, label: &str, quality: f64) -> Instance {
        let builder = self.builder(test_config());
        let node = NodeId::new(builder.instance_id(), self.application);
        let instance = builder
            .with_load_monitor(Arc::new(relay::metadata::FixedLoad(quality)))
            .with_node(probe_node(node, label))
            .build()
            .expect("Failed to build instance");
        instance.start().await.expect("Failed to start instance");
        if let Some(address) = instance.local_address() {
            self.discovery.add_host(address);
        }
        instance
    }
}
