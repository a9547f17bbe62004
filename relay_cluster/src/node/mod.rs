// Copyright (c) Sean Lawlor
//
// This source code is licensed under both the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree.

//! Nodes are the execution units an instance hosts. A node carries the services of
//! one application (targets of AGGREGATE and ANY invocations) and the individually
//! addressed resources created on it (targets of ADDRESSED invocations).
//!
//! Resource slots move from live to dead when a resource is killed, and destroyed
//! resource ids are remembered so late callers can tell "destroyed" apart from
//! "never existed".

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use dashmap::{DashMap, DashSet};
use relay::{BoxedErr, ErrorKind, Invocation, NodeId, RelayErr, Reply, Resource, ResourceId};


/// Hooks run around a node's lifetime
#[async_trait::async_trait]
pub trait NodeLifecycle: Send + Sync + 'static {
    /// Runs before the node is reported as running. A failure aborts the start.
    async fn pre_start(&self, _node: &Node) -> Result<(), BoxedErr> {
        Ok(())
    }

    /// Runs after the node stopped being reported
    async fn post_stop(&self, _node: &Node) -> Result<(), BoxedErr> {
        Ok(())
    }
}

enum Slot {
    Live(Arc<dyn Resource>),
    Dead,
}

/// A node hosted by the local instance
pub struct Node {
    id: NodeId,
    resources: DashMap<ResourceId, Slot>,
    tombstones: DashSet<ResourceId>,
    services: DashMap<String, Arc<dyn Resource>>,
    lifecycle: Option<Arc<dyn NodeLifecycle>>,
    running: AtomicBool,
}

impl std::fmt::Debug for Node {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Node")
            .field("id", &self.id)
            .field("resources", &self.resources.len())
            .field("services", &self.services.len())
            .field("running", &self.is_running())
            .finish()
    }
}

impl Node {
    /// Create a stopped node
    pub fn new(id: NodeId) -> Self {
        Self {
            id,
            resources: DashMap::new(),
            tombstones: DashSet::new(),
            services: DashMap::new(),
            lifecycle: None,
            running: AtomicBool::new(false),
        }
    }

    /// Attach lifecycle hooks
    pub fn with_lifecycle(mut self, lifecycle: Arc<dyn NodeLifecycle>) -> Self {
        self.lifecycle = Some(lifecycle);
        self
    }

    /// Register the service answering invocations on `type_name`
    pub fn with_service<S: Into<String>>(self, type_name: S, service: Arc<dyn Resource>) -> Self {
        self.register_service(type_name, service);
        self
    }

    /// The node's identity
    pub fn id(&self) -> NodeId {
        self.id
    }

    /// Whether the node is started and accepting invocations
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Run the pre-start hook and mark the node running
    pub async fn start(&self) -> Result<(), RelayErr> {
        if let Some(lifecycle) = &self.lifecycle {
            lifecycle.pre_start(self).await.map_err(|err| {
                RelayErr::new(
                    ErrorKind::Handler,
                    format!("Node {} failed to start: {err}", self.id),
                )
                .with_cause(err)
            })?;
        }
        self.running.store(true, Ordering::SeqCst);
        log::debug!("Node {} started", self.id);
        Ok(())
    }

    /// Mark the node stopped and run the post-stop hook. Hook failures are logged.
    pub async fn stop(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }
        if let Some(lifecycle) = &self.lifecycle {
            if let Err(err) = lifecycle.post_stop(self).await {
                log::warn!("Node {} post-stop hook failed: {err}", self.id);
            }
        }
        log::debug!("Node {} stopped", self.id);
    }

    /// Register the service answering invocations on `type_name`, replacing any
    /// previous one
    pub fn register_service<S: Into<String>>(&self, type_name: S, service: Arc<dyn Resource>) {
        self.services.insert(type_name.into(), service);
    }

    /// Host a resource under a fresh [ResourceId] of this node
    pub fn insert_resource(&self, resource: Arc<dyn Resource>) -> ResourceId {
        let id = ResourceId::new(self.id);
        self.resources.insert(id, Slot::Live(resource));
        id
    }

    /// Whether the resource is hosted here and alive
    pub fn is_live(&self, resource: &ResourceId) -> bool {
        matches!(
            self.resources.get(resource).as_deref(),
            Some(Slot::Live(_))
        )
    }

    /// Mark a resource dead. Invocations on it fail with
    /// [ErrorKind::DeadResource] until it is destroyed.
    pub fn kill_resource(&self, resource: &ResourceId) -> bool {
        match self.resources.get_mut(resource) {
            Some(mut slot) => {
                *slot = Slot::Dead;
                true
            }
            None => false,
        }
    }

    /// Remove a resource. Invocations on it fail with
    /// [ErrorKind::ResourceDestroyed] from now on.
    pub fn destroy_resource(&self, resource: &ResourceId) -> bool {
        if self.resources.remove(resource).is_some() {
            self.tombstones.insert(*resource);
            true
        } else {
            false
        }
    }

    /// Serialize a live resource and remove it from this node, so it can be restored
    /// elsewhere
    pub fn export_resource(&self, resource: &ResourceId) -> Result<Vec<u8>, RelayErr> {
        let live = self.live_resource(resource)?;
        let mut bytes = Vec::new();
        live.serialize(&mut bytes)?;
        self.destroy_resource(resource);
        log::debug!("Exported resource {resource} ({} bytes)", bytes.len());
        Ok(bytes)
    }

    /// Deserialize an exported resource and host it under a fresh [ResourceId]
    pub fn restore_resource<R: Resource>(&self, bytes: &[u8]) -> Result<ResourceId, RelayErr> {
        let mut source = bytes;
        let restored = R::deserialize(&mut source)?;
        let id = self.insert_resource(Arc::new(restored));
        log::debug!("Restored resource {id}");
        Ok(id)
    }

    fn live_resource(&self, resource: &ResourceId) -> Result<Arc<dyn Resource>, RelayErr> {
        if resource.node_id() != self.id {
            return Err(RelayErr::instance_not_found(format!(
                "Resource {resource} does not belong to node {}",
                self.id
            )));
        }
        match self.resources.get(resource).as_deref() {
            Some(Slot::Live(live)) => Ok(live.clone()),
            Some(Slot::Dead) => Err(RelayErr::new(
                ErrorKind::DeadResource,
                format!("Resource {resource} is dead"),
            )),
            None if self.tombstones.contains(resource) => Err(RelayErr::new(
                ErrorKind::ResourceDestroyed,
                format!("Resource {resource} was destroyed"),
            )),
            None => Err(RelayErr::instance_not_found(format!(
                "Resource {resource} is not hosted on node {}",
                self.id
            ))),
        }
    }

    fn service(&self, type_name: &str) -> Result<Arc<dyn Resource>, RelayErr> {
        match self.services.get(type_name) {
            Some(service) => Ok(service.value().clone()),
            None => Err(RelayErr::routing(format!(
                "Node {} has no service for {type_name}",
                self.id
            ))),
        }
    }

    /// Execute an invocation on a resource of this node, or on the service of the
    /// invocation's type when no resource is addressed
    pub async fn invoke(
        &self,
        resource: Option<&ResourceId>,
        invocation: &Invocation,
    ) -> Result<Reply, RelayErr> {
        let handler = match resource {
            Some(resource) => self.live_resource(resource)?,
            None => self.service(&invocation.type_name)?,
        };
        let value = handler
            .invoke(invocation)
            .await
            .map_err(RelayErr::handler)?;
        if invocation.is_acknowledge_only() {
            Ok(Reply::Acknowledged)
        } else {
            Ok(Reply::Value(value))
        }
    }
}

/// The nodes hosted by one instance
#[derive(Debug, Default)]
pub struct NodeTable {
    nodes: DashMap<NodeId, Arc<Node>>,
}

impl NodeTable {
    /// Create an empty table
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a node, replacing any node with the same id
    pub fn insert(&self, node: Arc<Node>) -> Option<Arc<Node>> {
        self.nodes.insert(node.id(), node)
    }

    /// Remove a node
    pub fn remove(&self, node: &NodeId) -> Option<Arc<Node>> {
        self.nodes.remove(node).map(|(_, node)| node)
    }

    /// Look up a node
    pub fn get(&self, node: &NodeId) -> Option<Arc<Node>> {
        self.nodes.get(node).map(|entry| entry.value().clone())
    }

    /// Every node, running or not
    pub fn all(&self) -> Vec<Arc<Node>> {
        self.nodes.iter().map(|entry| entry.value().clone()).collect()
    }

    /// The ids of every running node. Only these are reported to peers.
    pub fn running_node_ids(&self) -> BTreeSet<NodeId> {
        self.nodes
            .iter()
            .filter(|entry| entry.value().is_running())
            .map(|entry| *entry.key())
            .collect()
    }

    /// Execute an invocation on a running node of this instance
    pub async fn invoke(
        &self,
        node: &NodeId,
        resource: Option<&ResourceId>,
        invocation: &Invocation,
    ) -> Result<Reply, RelayErr> {
        match self.get(node) {
            Some(found) if found.is_running() => found.invoke(resource, invocation).await,
            _ => Err(RelayErr::instance_not_found(format!(
                "Node {node} is not running on this instance"
            ))),
        }
    }
}
