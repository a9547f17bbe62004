// Copyright (c) Sean Lawlor
//
// This source code is licensed under both the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree.

//! An [Instance] is one running process participating in the cluster. It owns the
//! local nodes, the invocation server peers call into, the remote invoker registry,
//! and the dispatcher local callers use.
//!
//! An instance moves through [LifecycleState::Created], [LifecycleState::Starting],
//! [LifecycleState::Running], [LifecycleState::Stopping] and finally
//! [LifecycleState::Stopped]. It does not restart once stopped.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as SyncMutex};

use relay::metadata::LoadMonitor;
use relay::{BoxedErr, InstanceId, NodeId, RelayErr};
use tokio::sync::Mutex;

use crate::config::ClusterConfig;
use crate::connection::{AsyncConnectionService, TcpConnectionService, TransportStats};
use crate::discovery::{InstanceDiscoveryService, StaticInstanceDiscovery};
use crate::dispatcher::InvocationDispatcher;
use crate::metadata::{InFlight, LocalMetadataContext};
use crate::node::{Node, NodeTable};
use crate::registry::RemoteInvokerRegistry;
use crate::server::{InvocationServer, ServerContext};

/// Where an instance is in its lifetime
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    /// Built, not started
    Created,
    /// Running pre-start hooks, opening the listener, and running the first refresh
    Starting,
    /// Serving calls
    Running,
    /// Rejecting new calls and draining executing ones
    Stopping,
    /// Terminal
    Stopped,
}

/// Hooks run around an instance's lifetime. Each runs at most once.
#[async_trait::async_trait]
pub trait InstanceLifecycle: Send + Sync + 'static {
    /// Runs before the instance starts serving. A failure aborts the start and leaves
    /// the instance [LifecycleState::Stopped].
    async fn pre_start(&self, _instance: InstanceId) -> Result<(), BoxedErr> {
        Ok(())
    }

    /// Runs once the instance stopped serving and released its connections
    async fn post_stop(&self, _instance: InstanceId) -> Result<(), BoxedErr> {
        Ok(())
    }
}

/// Assembles an [Instance] from its collaborators
pub struct InstanceBuilder {
    config: ClusterConfig,
    instance_id: InstanceId,
    discovery: Option<Arc<dyn InstanceDiscoveryService>>,
    service: Option<Arc<dyn AsyncConnectionService>>,
    load: Option<Arc<dyn LoadMonitor>>,
    lifecycle: Vec<Arc<dyn InstanceLifecycle>>,
    nodes: Vec<Node>,
}

impl InstanceBuilder {
    /// Start building an instance with a fresh random identity
    pub fn new(config: ClusterConfig) -> Self {
        Self {
            config,
            instance_id: InstanceId::random(),
            discovery: None,
            service: None,
            load: None,
            lifecycle: Vec::new(),
            nodes: Vec::new(),
        }
    }

    /// Use a fixed identity
    pub fn with_instance_id(mut self, instance_id: InstanceId) -> Self {
        self.instance_id = instance_id;
        self
    }

    /// The identity the instance will have, for deriving its node ids
    pub fn instance_id(&self) -> InstanceId {
        self.instance_id
    }

    /// Discover peers with `discovery`. Defaults to the configured static hosts.
    pub fn with_discovery(mut self, discovery: Arc<dyn InstanceDiscoveryService>) -> Self {
        self.discovery = Some(discovery);
        self
    }

    /// Reach peers with `service`. Defaults to plain TCP.
    pub fn with_connection_service(mut self, service: Arc<dyn AsyncConnectionService>) -> Self {
        self.service = Some(service);
        self
    }

    /// Score the instance's load with `load`. Defaults to its in-flight call count.
    pub fn with_load_monitor(mut self, load: Arc<dyn LoadMonitor>) -> Self {
        self.load = Some(load);
        self
    }

    /// Add lifecycle hooks. Hooks run in the order they were added.
    pub fn with_lifecycle(mut self, lifecycle: Arc<dyn InstanceLifecycle>) -> Self {
        self.lifecycle.push(lifecycle);
        self
    }

    /// Host `node` from the start
    pub fn with_node(mut self, node: Node) -> Self {
        self.nodes.push(node);
        self
    }

    /// Validate the configuration and the nodes, and assemble the instance
    pub fn build(self) -> Result<Instance, RelayErr> {
        let Self {
            config,
            instance_id,
            discovery,
            service,
            load,
            lifecycle,
            nodes: initial_nodes,
        } = self;
        config.validate()?;

        let nodes = Arc::new(NodeTable::new());
        for node in initial_nodes {
            if node.id().instance_id() != instance_id {
                return Err(RelayErr::configuration(format!(
                    "Node {} does not belong to instance {instance_id}",
                    node.id()
                )));
            }
            if nodes.insert(Arc::new(node)).is_some() {
                return Err(RelayErr::configuration(format!(
                    "Instance {instance_id} hosts a node twice"
                )));
            }
        }

        let in_flight = InFlight::default();
        let load =
            load.unwrap_or_else(|| Arc::new(in_flight.clone()) as Arc<dyn LoadMonitor>);
        let discovery = discovery.unwrap_or_else(|| {
            Arc::new(StaticInstanceDiscovery::new(config.static_hosts.clone()))
        });
        let service = service.unwrap_or_else(|| Arc::new(TcpConnectionService::new()));

        let name = instance_id.to_string();
        let stats = TransportStats::default();
        let local = Arc::new(LocalMetadataContext::new(instance_id, nodes.clone(), load));
        let registry = Arc::new(RemoteInvokerRegistry::new(
            instance_id,
            config.registry_config(&name),
            discovery,
            service.clone(),
            stats.clone(),
        ));
        let open = Arc::new(AtomicBool::new(false));
        let dispatcher = InvocationDispatcher::new(
            local.clone(),
            nodes.clone(),
            registry.clone(),
            in_flight.clone(),
            config.call_timeout,
            open.clone(),
        );

        Ok(Instance {
            id: instance_id,
            config,
            name,
            service,
            stats,
            nodes,
            local,
            registry,
            dispatcher,
            in_flight,
            open,
            lifecycle,
            state: SyncMutex::new(LifecycleState::Created),
            transition: Mutex::new(()),
            server: SyncMutex::new(None),
        })
    }
}

/// One running process participating in the cluster
pub struct Instance {
    id: InstanceId,
    config: ClusterConfig,
    name: String,
    service: Arc<dyn AsyncConnectionService>,
    stats: TransportStats,
    nodes: Arc<NodeTable>,
    local: Arc<LocalMetadataContext>,
    registry: Arc<RemoteInvokerRegistry>,
    dispatcher: InvocationDispatcher,
    in_flight: InFlight,
    open: Arc<AtomicBool>,
    lifecycle: Vec<Arc<dyn InstanceLifecycle>>,
    state: SyncMutex<LifecycleState>,
    // held for the whole of start and stop
    transition: Mutex<()>,
    server: SyncMutex<Option<Arc<InvocationServer>>>,
}

impl std::fmt::Debug for Instance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Instance")
            .field("id", &self.id)
            .field("state", &self.state())
            .field("address", &self.local_address())
            .finish()
    }
}

impl Instance {
    /// The instance's identity
    pub fn id(&self) -> InstanceId {
        self.id
    }

    /// The current lifecycle state
    pub fn state(&self) -> LifecycleState {
        self.state
            .lock()
            .map(|state| *state)
            .unwrap_or(LifecycleState::Stopped)
    }

    fn set_state(&self, next: LifecycleState) {
        if let Ok(mut state) = self.state.lock() {
            log::debug!("Instance {} {:?} -> {next:?}", self.id, *state);
            *state = next;
        }
    }

    fn current_server(&self) -> Option<Arc<InvocationServer>> {
        self.server.lock().ok().and_then(|server| server.clone())
    }

    fn take_server(&self) -> Option<Arc<InvocationServer>> {
        self.server.lock().ok().and_then(|mut server| server.take())
    }

    /// The address peers reach this instance at, once started
    pub fn local_address(&self) -> Option<String> {
        self.current_server()
            .map(|server| server.local_address().to_string())
    }

    /// The dispatcher local callers issue invocations through
    pub fn dispatcher(&self) -> &InvocationDispatcher {
        &self.dispatcher
    }

    /// The registry of remote members
    pub fn registry(&self) -> &Arc<RemoteInvokerRegistry> {
        &self.registry
    }

    /// The locally hosted nodes
    pub fn nodes(&self) -> &Arc<NodeTable> {
        &self.nodes
    }

    /// Calls executing on, or issued by, this instance
    pub fn in_flight(&self) -> &InFlight {
        &self.in_flight
    }

    /// Envelope and connection counters of this instance's transport
    pub fn transport_stats(&self) -> &TransportStats {
        &self.stats
    }

    /// The metadata this instance reports to its peers
    pub fn metadata(&self) -> &Arc<LocalMetadataContext> {
        &self.local
    }

    /// Start the instance: run the pre-start hooks, start the nodes, open the
    /// listener, run the first refresh and schedule the following ones.
    ///
    /// Starting a running instance does nothing. A failure leaves the instance
    /// [LifecycleState::Stopped].
    pub async fn start(&self) -> Result<(), RelayErr> {
        let _transition = self.transition.lock().await;
        match self.state() {
            LifecycleState::Created => {}
            LifecycleState::Running => return Ok(()),
            other => {
                return Err(RelayErr::shutdown(format!(
                    "Instance {} cannot start from {other:?}",
                    self.id
                )))
            }
        }
        self.set_state(LifecycleState::Starting);

        if let Err(err) = self.start_inner().await {
            log::error!("Instance {} failed to start: {err}", self.id);
            self.open.store(false, Ordering::SeqCst);
            if let Some(server) = self.take_server() {
                server.close();
            }
            self.registry.stop().await;
            for node in self.nodes.all() {
                node.stop().await;
            }
            self.set_state(LifecycleState::Stopped);
            return Err(err);
        }

        self.set_state(LifecycleState::Running);
        log::info!(
            "Instance {} running on {}",
            self.id,
            self.local_address().unwrap_or_default()
        );
        Ok(())
    }

    async fn start_inner(&self) -> Result<(), RelayErr> {
        for hook in self.lifecycle.iter() {
            hook.pre_start(self.id).await.map_err(|err| {
                RelayErr::new(
                    relay::ErrorKind::Handler,
                    format!("Instance {} pre-start hook failed: {err}", self.id),
                )
                .with_cause(err)
            })?;
        }
        for node in self.nodes.all() {
            node.start().await?;
        }

        let acceptor = self.service.listen(&self.config.bind_address).await?;
        self.registry.exclude_address(acceptor.local_address());
        let server = InvocationServer::serve(
            acceptor,
            ServerContext {
                nodes: self.nodes.clone(),
                metadata: self.local.clone(),
                in_flight: self.in_flight.clone(),
                stats: self.stats.clone(),
                max_frame_bytes: self.config.max_frame_bytes,
                cookie: self.config.cookie.clone(),
                name: self.name.clone(),
            },
        );
        if let Ok(mut slot) = self.server.lock() {
            *slot = Some(Arc::new(server));
        }

        self.dispatcher
            .bind_runtime(tokio::runtime::Handle::current());
        self.open.store(true, Ordering::SeqCst);

        // the registry may be empty after this, peers announce themselves later
        if let Err(err) = self.registry.refresh().await {
            log::warn!("First refresh of instance {} failed: {err}", self.id);
        }
        self.registry.start();
        Ok(())
    }

    /// Stop the instance gracefully. New calls are rejected right away, executing
    /// ones get up to `shutdown_grace` to finish, then connections are released and
    /// the post-stop hooks run. Stopping twice does nothing.
    pub async fn stop(&self) {
        let _transition = self.transition.lock().await;
        match self.state() {
            LifecycleState::Stopped | LifecycleState::Stopping => return,
            LifecycleState::Created => {
                self.set_state(LifecycleState::Stopped);
                return;
            }
            LifecycleState::Starting | LifecycleState::Running => {}
        }
        self.set_state(LifecycleState::Stopping);
        self.open.store(false, Ordering::SeqCst);

        let server = self.take_server();
        if let Some(server) = &server {
            server.stop_accepting();
        }
        if !self.in_flight.wait_idle(self.config.shutdown_grace).await {
            log::warn!(
                "Instance {} stopped with {} call(s) still in flight",
                self.id,
                self.in_flight.count()
            );
        }
        if let Some(server) = server {
            server.close();
        }
        self.registry.stop().await;
        for node in self.nodes.all() {
            node.stop().await;
        }
        for hook in self.lifecycle.iter() {
            if let Err(err) = hook.post_stop(self.id).await {
                log::warn!("Instance {} post-stop hook failed: {err}", self.id);
            }
        }
        self.set_state(LifecycleState::Stopped);
        log::info!("Instance {} stopped", self.id);
    }

    /// Stop the instance abruptly, as if its process died. Sessions are dropped
    /// mid-call, nothing drains and no hook runs.
    pub async fn kill(&self) {
        let _transition = self.transition.lock().await;
        self.open.store(false, Ordering::SeqCst);
        if let Some(server) = self.take_server() {
            server.close();
        }
        self.registry.stop().await;
        self.set_state(LifecycleState::Stopped);
        log::info!("Instance {} killed", self.id);
    }

    /// Start hosting `node` on the running instance. Peers see it after their next
    /// refresh.
    pub async fn open_node(&self, node: Node) -> Result<NodeId, RelayErr> {
        let id = node.id();
        if id.instance_id() != self.id {
            return Err(RelayErr::configuration(format!(
                "Node {id} does not belong to instance {}",
                self.id
            )));
        }
        if self.nodes.get(&id).is_some() {
            return Err(RelayErr::configuration(format!(
                "Node {id} is already hosted"
            )));
        }
        let node = Arc::new(node);
        node.start().await?;
        self.nodes.insert(node);
        Ok(id)
    }

    /// Stop hosting a node. Returns whether it was hosted.
    pub async fn close_node(&self, node: &NodeId) -> bool {
        match self.nodes.remove(node) {
            Some(node) => {
                node.stop().await;
                true
            }
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use super::*;
    use crate::common_test::{probe_node, test_config, TestCluster};
    use relay::{ApplicationId, ErrorKind, InstanceMetadataSource};

    #[derive(Default)]
    struct Counting {
        pre_start: AtomicUsize,
        post_stop: AtomicUsize,
        refuse: bool,
    }

    #[async_trait::async_trait]
    impl InstanceLifecycle for Counting {
        async fn pre_start(&self, _instance: InstanceId) -> Result<(), BoxedErr> {
            self.pre_start.fetch_add(1, Ordering::SeqCst);
            if self.refuse {
                return Err("refused".into());
            }
            Ok(())
        }

        async fn post_stop(&self, _instance: InstanceId) -> Result<(), BoxedErr> {
            self.post_stop.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[relay::concurrency::test]
    async fn hooks_run_once_across_repeated_transitions() {
        let cluster = TestCluster::new();
        let hooks = Arc::new(Counting::default());
        let instance = cluster
            .builder(test_config())
            .with_lifecycle(hooks.clone())
            .build()
            .unwrap();
        assert_eq!(LifecycleState::Created, instance.state());

        instance.start().await.unwrap();
        instance.start().await.unwrap();
        assert_eq!(LifecycleState::Running, instance.state());
        assert!(instance.local_address().is_some());

        instance.stop().await;
        instance.stop().await;
        assert_eq!(LifecycleState::Stopped, instance.state());
        assert_eq!(1, hooks.pre_start.load(Ordering::SeqCst));
        assert_eq!(1, hooks.post_stop.load(Ordering::SeqCst));
        assert!(instance.local_address().is_none());

        let err = instance.start().await.unwrap_err();
        assert_eq!(ErrorKind::Shutdown, err.kind());
    }

    #[relay::concurrency::test]
    async fn failed_pre_start_aborts_the_start() {
        let cluster = TestCluster::new();
        let hooks = Arc::new(Counting {
            refuse: true,
            ..Default::default()
        });
        let builder = cluster.builder(test_config()).with_lifecycle(hooks.clone());
        let node = NodeId::new(builder.instance_id(), ApplicationId::random());
        let instance = builder.with_node(probe_node(node, "a")).build().unwrap();

        let err = instance.start().await.unwrap_err();
        assert_eq!(ErrorKind::Handler, err.kind());
        assert_eq!(LifecycleState::Stopped, instance.state());
        assert!(instance.local_address().is_none());
        assert!(instance.nodes().running_node_ids().is_empty());

        instance.stop().await;
        assert_eq!(0, hooks.post_stop.load(Ordering::SeqCst));
    }

    #[test]
    fn build_rejects_foreign_nodes_and_bad_config() {
        let foreign = NodeId::new(InstanceId::random(), ApplicationId::random());
        let err = InstanceBuilder::new(ClusterConfig::default())
            .with_node(Node::new(foreign))
            .build()
            .unwrap_err();
        assert_eq!(ErrorKind::Configuration, err.kind());

        let err = InstanceBuilder::new(ClusterConfig::default().with_connections(5, 1))
            .build()
            .unwrap_err();
        assert_eq!(ErrorKind::Configuration, err.kind());
    }

    #[relay::concurrency::test]
    async fn nodes_open_and_close_on_a_running_instance() {
        let cluster = TestCluster::new();
        let instance = cluster.builder(test_config()).build().unwrap();
        instance.start().await.unwrap();

        let node = NodeId::new(instance.id(), cluster.application);
        assert_eq!(node, instance.open_node(probe_node(node, "late")).await.unwrap());
        assert!(instance.metadata().report().hosts(&node));
        assert!(instance.open_node(probe_node(node, "again")).await.is_err());

        assert!(instance.close_node(&node).await);
        assert!(!instance.close_node(&node).await);
        assert!(!instance.metadata().report().hosts(&node));
        instance.stop().await;
    }
}
