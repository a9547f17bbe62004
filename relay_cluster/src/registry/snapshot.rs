// Copyright (c) Sean Lawlor
//
// This source code is licensed under both the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree.

//! An immutable view of the remote members of the cluster, as of one refresh

use std::collections::{BTreeMap, HashMap};
use std::fmt::Write;
use std::sync::Arc;

use relay::routing::{Candidate, MembershipView};
use relay::{ApplicationId, InstanceId, InstanceMetadata, NodeId, RelayErr};

use crate::invoker::RemoteInvoker;

/// The remote invokers and their last reported metadata, published atomically by
/// each refresh. Readers hold on to one snapshot for the length of a call.
#[derive(Debug, Default)]
pub struct RegistrySnapshot {
    generation: u64,
    invokers: HashMap<InstanceId, Arc<RemoteInvoker>>,
    metadata: BTreeMap<InstanceId, InstanceMetadata>,
    nodes: HashMap<NodeId, InstanceId>,
    applications: HashMap<ApplicationId, Vec<Candidate>>,
}

impl RegistrySnapshot {
    /// A snapshot with no members
    pub fn empty() -> Self {
        Self::default()
    }

    /// Incremented by every published snapshot
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// The number of remote instances
    pub fn len(&self) -> usize {
        self.invokers.len()
    }

    /// Whether no remote instance is known
    pub fn is_empty(&self) -> bool {
        self.invokers.is_empty()
    }

    /// Every remote instance, in [InstanceId] order
    pub fn instances(&self) -> impl Iterator<Item = &InstanceId> {
        self.metadata.keys()
    }

    /// The last metadata reported by a remote instance
    pub fn metadata(&self, instance: &InstanceId) -> Option<&InstanceMetadata> {
        self.metadata.get(instance)
    }

    /// The invoker bound to a remote instance
    pub fn remote_invoker(&self, instance: &InstanceId) -> Result<Arc<RemoteInvoker>, RelayErr> {
        self.invokers.get(instance).cloned().ok_or_else(|| {
            RelayErr::instance_not_found(format!("Instance {instance} is not a known member"))
        })
    }

    /// Every remote node hosting the application, least loaded first
    pub fn all_for_application(&self, application: &ApplicationId) -> &[Candidate] {
        self.applications
            .get(application)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// The least loaded remote node hosting the application
    pub fn best_for_application(&self, application: &ApplicationId) -> Option<&Candidate> {
        self.all_for_application(application).first()
    }

    /// A printable table of every member: its address, quality and hosted nodes
    pub fn report(&self) -> String {
        let mut out = format!(
            "generation {} ({} instance(s))",
            self.generation,
            self.len()
        );
        for (instance, metadata) in self.metadata.iter() {
            let address = self
                .invokers
                .get(instance)
                .map(|invoker| invoker.address())
                .unwrap_or("?");
            let _ = write!(
                out,
                "\n  {instance} @ {address} quality={} nodes=[",
                metadata.quality
            );
            for (i, node) in metadata.node_ids.iter().enumerate() {
                if i > 0 {
                    out.push_str(", ");
                }
                let _ = write!(out, "{node}");
            }
            out.push(']');
        }
        out
    }

    /// A copy of this snapshot without the given instance
    pub(crate) fn without(&self, removed: &InstanceId, generation: u64) -> Self {
        let mut builder = SnapshotBuilder::new(generation);
        for (instance, metadata) in self.metadata.iter() {
            if instance == removed {
                continue;
            }
            if let Some(invoker) = self.invokers.get(instance) {
                builder.add(invoker.clone(), metadata.clone());
            }
        }
        builder.build()
    }
}

impl MembershipView for RegistrySnapshot {
    fn instance_hosting(&self, node: &NodeId) -> Option<InstanceId> {
        self.nodes.get(node).copied()
    }

    fn candidates(&self, application: &ApplicationId) -> Vec<Candidate> {
        self.all_for_application(application).to_vec()
    }
}

/// Collects one refresh cycle's successful replies into a snapshot
#[derive(Debug)]
pub(crate) struct SnapshotBuilder {
    generation: u64,
    members: BTreeMap<InstanceId, (Arc<RemoteInvoker>, InstanceMetadata)>,
}

impl SnapshotBuilder {
    pub(crate) fn new(generation: u64) -> Self {
        Self {
            generation,
            members: BTreeMap::new(),
        }
    }

    /// Add a member. The first report for an instance wins.
    pub(crate) fn add(&mut self, invoker: Arc<RemoteInvoker>, metadata: InstanceMetadata) -> bool {
        match self.members.entry(metadata.instance_id) {
            std::collections::btree_map::Entry::Occupied(_) => false,
            std::collections::btree_map::Entry::Vacant(slot) => {
                slot.insert((invoker, metadata));
                true
            }
        }
    }

    pub(crate) fn build(self) -> RegistrySnapshot {
        let mut snapshot = RegistrySnapshot {
            generation: self.generation,
            ..Default::default()
        };
        // members iterate in instance order, so a node claimed twice goes to the lower id
        for (instance, (invoker, metadata)) in self.members {
            for node in metadata.node_ids.iter() {
                snapshot.nodes.entry(*node).or_insert(instance);
                snapshot
                    .applications
                    .entry(node.application_id())
                    .or_default()
                    .push(Candidate {
                        instance_id: instance,
                        node_id: *node,
                        quality: metadata.quality,
                    });
            }
            snapshot.invokers.insert(instance, invoker);
            snapshot.metadata.insert(instance, metadata);
        }
        for candidates in snapshot.applications.values_mut() {
            candidates.sort_by(|a, b| a.load_order(b));
        }
        snapshot
    }
}
