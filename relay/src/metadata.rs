// Copyright (c) Sean Lawlor
//
// This source code is licensed under both the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree.

//! Instance metadata: the load score ("quality") an instance reports about itself and
//! the set of nodes it currently hosts. Produced by each instance, consumed by peers
//! during refresh and by routing. Every report is superseded by the next one.

use std::collections::BTreeSet;
use std::time::SystemTime;

use crate::{ApplicationId, InstanceId, NodeId};

/// A point-in-time report of one instance's load and hosted nodes
#[derive(Debug, Clone, PartialEq)]
pub struct InstanceMetadata {
    /// The reporting instance
    pub instance_id: InstanceId,
    /// Scalar load score. Lower is less loaded.
    pub quality: f64,
    /// The nodes the instance currently hosts
    pub node_ids: BTreeSet<NodeId>,
    /// When the report was produced
    pub timestamp: SystemTime,
}

impl InstanceMetadata {
    /// Create a report stamped with the current time
    pub fn new(instance_id: InstanceId, quality: f64, node_ids: BTreeSet<NodeId>) -> Self {
        Self {
            instance_id,
            quality,
            node_ids,
            timestamp: SystemTime::now(),
        }
    }

    /// Whether the report lists the node as hosted
    pub fn hosts(&self, node: &NodeId) -> bool {
        self.node_ids.contains(node)
    }

    /// The hosted nodes serving an application
    pub fn nodes_for<'a>(
        &'a self,
        application: &'a ApplicationId,
    ) -> impl Iterator<Item = NodeId> + 'a {
        self.node_ids
            .iter()
            .filter(move |node| node.application_id() == *application)
            .copied()
    }
}

/// A source of [InstanceMetadata]
#[async_trait::async_trait]
pub trait InstanceMetadataSource: Send + Sync + 'static {
    /// Report quality and hosted nodes
    fn report(&self) -> InstanceMetadata;

    /// Report quality and hosted nodes asynchronously
    async fn report_async(&self) -> InstanceMetadata {
        self.report()
    }
}

/// Computes the quality an instance reports about itself
pub trait LoadMonitor: Send + Sync + 'static {
    /// The current load score. Lower is less loaded.
    fn quality(&self) -> f64;
}

impl<F> LoadMonitor for F
where
    F: Fn() -> f64 + Send + Sync + 'static,
{
    fn quality(&self) -> f64 {
        self()
    }
}

/// A load monitor which always reports the same score
#[derive(Debug, Clone, Copy)]
pub struct FixedLoad(pub f64);

impl LoadMonitor for FixedLoad {
    fn quality(&self) -> f64 {
        self.0
    }
}
