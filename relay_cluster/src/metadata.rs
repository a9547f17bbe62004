// Copyright (c) Sean Lawlor
//
// This source code is licensed under both the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree.

//! The local instance's own metadata, and the in-flight call tracking that feeds its
//! default quality

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use relay::concurrency::{Duration, Notify};
use relay::{InstanceId, InstanceMetadata, InstanceMetadataSource, LoadMonitor};

use crate::node::NodeTable;

#[derive(Debug, Default)]
struct InFlightInner {
    count: AtomicUsize,
    idle: Notify,
}

/// Counts calls currently executing on (or issued by) this instance
#[derive(Debug, Clone, Default)]
pub struct InFlight {
    inner: Arc<InFlightInner>,
}

/// Marks one call as in flight until dropped
#[derive(Debug)]
pub struct InFlightGuard {
    inner: Arc<InFlightInner>,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        if self.inner.count.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.inner.idle.notify_waiters();
        }
    }
}

impl InFlight {
    /// Register a call
    pub fn enter(&self) -> InFlightGuard {
        self.inner.count.fetch_add(1, Ordering::SeqCst);
        InFlightGuard {
            inner: self.inner.clone(),
        }
    }

    /// The number of calls in flight
    pub fn count(&self) -> usize {
        self.inner.count.load(Ordering::SeqCst)
    }

    /// Wait until no call is in flight, for at most `grace`. Returns whether the
    /// instance drained.
    pub async fn wait_idle(&self, grace: Duration) -> bool {
        let drained = async {
            loop {
                let notified = self.inner.idle.notified();
                if self.count() == 0 {
                    return;
                }
                notified.await;
            }
        };
        relay::concurrency::timeout(grace, drained).await.is_ok()
    }
}

impl LoadMonitor for InFlight {
    fn quality(&self) -> f64 {
        self.count() as f64
    }
}

/// Produces the metadata this instance reports about itself: its quality and the
/// nodes it runs
pub struct LocalMetadataContext {
    instance_id: InstanceId,
    nodes: Arc<NodeTable>,
    load: Arc<dyn LoadMonitor>,
}

impl std::fmt::Debug for LocalMetadataContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalMetadataContext")
            .field("instance_id", &self.instance_id)
            .field("nodes", &self.nodes)
            .finish()
    }
}

impl LocalMetadataContext {
    /// Create a context reporting on `nodes`, scored by `load`
    pub fn new(instance_id: InstanceId, nodes: Arc<NodeTable>, load: Arc<dyn LoadMonitor>) -> Self {
        Self {
            instance_id,
            nodes,
            load,
        }
    }

    /// The reporting instance
    pub fn instance_id(&self) -> InstanceId {
        self.instance_id
    }
}

impl InstanceMetadataSource for LocalMetadataContext {
    fn report(&self) -> InstanceMetadata {
        InstanceMetadata::new(
            self.instance_id,
            self.load.quality(),
            self.nodes.running_node_ids(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use relay::{ApplicationId, NodeId};

    use crate::common_test::probe_node;

    #[relay::concurrency::test]
    async fn quality_defaults_to_the_in_flight_count() {
        let in_flight = InFlight::default();
        let nodes = Arc::new(NodeTable::new());
        let instance = InstanceId::random();
        let context = LocalMetadataContext::new(instance, nodes.clone(), Arc::new(in_flight.clone()));

        let node = Arc::new(probe_node(NodeId::new(instance, ApplicationId::random()), "a"));
        node.start().await.unwrap();
        nodes.insert(node.clone());

        let first = in_flight.enter();
        let second = in_flight.enter();
        let report = context.report_async().await;
        assert_eq!(2.0, report.quality);
        assert!(report.hosts(&node.id()));

        drop(first);
        drop(second);
        assert_eq!(0.0, context.report().quality);
    }

    #[relay::concurrency::test]
    async fn waiting_for_idle_respects_the_grace_period() {
        let in_flight = InFlight::default();
        assert!(in_flight.wait_idle(Duration::from_millis(10)).await);

        let guard = in_flight.enter();
        assert!(!in_flight.wait_idle(Duration::from_millis(50)).await);

        let waiter = {
            let in_flight = in_flight.clone();
            relay::concurrency::spawn(async move { in_flight.wait_idle(Duration::from_secs(5)).await })
        };
        relay::concurrency::sleep(Duration::from_millis(20)).await;
        drop(guard);
        assert!(waiter.await.unwrap());
    }
}
