// Copyright (c) Sean Lawlor
//
// This source code is licensed under both the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree.

//! Routing strategies map an invocation's strategy and target onto a concrete set of
//! destination nodes.
//!
//! Resolution is a pure function of the local instance's own [InstanceMetadata] (read
//! in-process, never over the wire) and a [MembershipView] of every other instance.
//! The view is expected to be one consistent snapshot for the whole resolution.

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt::Display;

use crate::invocation::Target;
use crate::{ApplicationId, InstanceId, InstanceMetadata, NodeId, RelayErr};

/// The policy selecting destination node(s) for an invocation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RoutingStrategy {
    /// Exactly the node hosting the addressed resource
    Addressed,
    /// Every node hosting the target application, all-or-nothing
    Aggregate,
    /// Exactly one node hosting the target application, the least loaded
    Any,
}

impl Display for RoutingStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Addressed => write!(f, "ADDRESSED"),
            Self::Aggregate => write!(f, "AGGREGATE"),
            Self::Any => write!(f, "ANY"),
        }
    }
}

/// Where a resolved invocation is executed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Destination {
    /// In-process, without touching the transport
    Local(NodeId),
    /// On the remote instance hosting the node
    Remote {
        /// The hosting instance
        instance: InstanceId,
        /// The destination node on that instance
        node: NodeId,
    },
}

impl Destination {
    /// The destination node
    pub fn node_id(&self) -> NodeId {
        match self {
            Self::Local(node) => *node,
            Self::Remote { node, .. } => *node,
        }
    }

    /// Whether the destination bypasses the transport
    pub fn is_local(&self) -> bool {
        matches!(self, Self::Local(_))
    }
}

/// A node hosting an application, along with its instance's reported quality
#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    /// The hosting instance
    pub instance_id: InstanceId,
    /// The node hosting the application
    pub node_id: NodeId,
    /// The hosting instance's load score. Lower is less loaded.
    pub quality: f64,
}

impl Candidate {
    /// Order candidates by quality, then by instance identity
    pub fn load_order(&self, other: &Self) -> Ordering {
        self.quality
            .total_cmp(&other.quality)
            .then_with(|| self.instance_id.cmp(&other.instance_id))
            .then_with(|| self.node_id.cmp(&other.node_id))
    }
}

/// The least loaded candidate. Ties on quality go to the lower [InstanceId].
pub fn least_loaded<'a, I>(candidates: I) -> Option<&'a Candidate>
where
    I: IntoIterator<Item = &'a Candidate>,
{
    candidates.into_iter().min_by(|a, b| a.load_order(b))
}

/// A read-only view of the remote members of the cluster
pub trait MembershipView {
    /// The remote instance which currently reports hosting the node, if any
    fn instance_hosting(&self, node: &NodeId) -> Option<InstanceId>;

    /// Every remote node hosting the application
    fn candidates(&self, application: &ApplicationId) -> Vec<Candidate>;
}

/// Resolve an invocation's strategy and target to its destination(s)
///
/// * `strategy`: The invocation's routing strategy
/// * `target`: The addressed resource or application
/// * `local`: The local instance's own metadata
/// * `view`: The remote membership snapshot
///
/// Returns the destinations ordered by [NodeId]. [RoutingStrategy::Addressed] and
/// [RoutingStrategy::Any] always resolve to exactly one destination.
pub fn resolve<V>(
    strategy: RoutingStrategy,
    target: &Target,
    local: &InstanceMetadata,
    view: &V,
) -> Result<Vec<Destination>, RelayErr>
where
    V: MembershipView + ?Sized,
{
    match (strategy, target) {
        (RoutingStrategy::Addressed, Target::Resource(resource)) => {
            let node = resource.node_id();
            if local.hosts(&node) {
                return Ok(vec![Destination::Local(node)]);
            }
            match view.instance_hosting(&node) {
                Some(instance) if instance != local.instance_id => {
                    Ok(vec![Destination::Remote { instance, node }])
                }
                _ => Err(RelayErr::instance_not_found(format!(
                    "No instance currently hosts resource {resource}"
                ))),
            }
        }
        (RoutingStrategy::Aggregate, Target::Application(application)) => {
            let mut destinations = BTreeMap::new();
            for node in local.nodes_for(application) {
                destinations.insert(node, Destination::Local(node));
            }
            for candidate in remote_candidates(view, application, local) {
                destinations
                    .entry(candidate.node_id)
                    .or_insert(Destination::Remote {
                        instance: candidate.instance_id,
                        node: candidate.node_id,
                    });
            }
            if destinations.is_empty() {
                return Err(RelayErr::routing(format!(
                    "No node hosts application {application}"
                )));
            }
            Ok(destinations.into_values().collect())
        }
        (RoutingStrategy::Any, Target::Application(application)) => {
            let mut candidates = local
                .nodes_for(application)
                .map(|node_id| Candidate {
                    instance_id: local.instance_id,
                    node_id,
                    quality: local.quality,
                })
                .collect::<Vec<_>>();
            candidates.extend(remote_candidates(view, application, local));

            match least_loaded(&candidates) {
                Some(best) if best.instance_id == local.instance_id => {
                    Ok(vec![Destination::Local(best.node_id)])
                }
                Some(best) => Ok(vec![Destination::Remote {
                    instance: best.instance_id,
                    node: best.node_id,
                }]),
                None => Err(RelayErr::routing(format!(
                    "No node hosts application {application}"
                ))),
            }
        }
        (strategy, target) => Err(RelayErr::routing(format!(
            "Strategy {strategy} cannot route to {target}"
        ))),
    }
}

fn remote_candidates<V>(
    view: &V,
    application: &ApplicationId,
    local: &InstanceMetadata,
) -> Vec<Candidate>
where
    V: MembershipView + ?Sized,
{
    view.candidates(application)
        .into_iter()
        .filter(|c| c.instance_id != local.instance_id)
        .collect()
}
