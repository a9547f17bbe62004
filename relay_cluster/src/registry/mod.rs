// Copyright (c) Sean Lawlor
//
// This source code is licensed under both the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree.

//! The remote invoker registry keeps one [RemoteInvoker] per peer instance and
//! periodically refreshes their metadata into an immutable [RegistrySnapshot].
//!
//! A refresh cycle
//! 1. lists the known hosts from discovery,
//! 2. polls every host's metadata concurrently, each bounded by the per-peer timeout
//!    and the whole cycle bounded by the total timeout,
//! 3. publishes a new snapshot built from the replies in a single atomic swap,
//! 4. stops the invokers of peers discovery dropped or whose failures exceeded the
//!    failure budget.
//!
//! A peer whose poll fails is absent from that cycle's snapshot. Its invoker is kept
//! until the budget runs out, so a peer that answers again rejoins on the same pools.
//!
//! A cycle which runs out of total time publishes nothing, and readers keep using the
//! previous snapshot.

use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex as SyncMutex};

use arc_swap::ArcSwap;
use dashmap::DashSet;
use relay::concurrency::{Duration, JoinHandle, JoinSet};
use relay::{InstanceId, InstanceMetadata, RelayErr};
use tokio::sync::Mutex;

use crate::connection::{AsyncConnectionService, PoolConfig, TransportStats};
use crate::discovery::{DiscoveryEvent, InstanceDiscoveryService};
use crate::invoker::RemoteInvoker;

mod snapshot;


pub use snapshot::RegistrySnapshot;
use snapshot::SnapshotBuilder;

/// Timing and pooling settings of the registry
#[derive(Debug, Clone)]
pub struct RegistryConfig {
    /// Time between refresh cycles
    pub refresh_interval: Duration,
    /// Bound on one peer's metadata reply
    pub refresh_timeout: Duration,
    /// Bound on a whole refresh cycle
    pub refresh_total_timeout: Duration,
    /// Consecutive failed polls a peer may have before its invoker is torn down
    pub failure_budget: u32,
    /// Time between invocation table dumps
    pub report_interval: Duration,
    /// Pool settings for every invoker
    pub pool: PoolConfig,
}

struct Peer {
    invoker: Arc<RemoteInvoker>,
    failures: u32,
}

/// Registry of remote invokers
pub struct RemoteInvokerRegistry {
    local: InstanceId,
    config: RegistryConfig,
    discovery: Arc<dyn InstanceDiscoveryService>,
    service: Arc<dyn AsyncConnectionService>,
    stats: TransportStats,
    snapshot: ArcSwap<RegistrySnapshot>,
    // the refresh lock. Only its holder mutates peers or publishes snapshots
    peers: Mutex<HashMap<String, Peer>>,
    local_addresses: DashSet<String>,
    generation: AtomicU64,
    task: SyncMutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for RemoteInvokerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteInvokerRegistry")
            .field("local", &self.local)
            .field("generation", &self.generation.load(Ordering::SeqCst))
            .finish()
    }
}

impl RemoteInvokerRegistry {
    /// Create a registry for the local instance. Nothing is polled until
    /// [RemoteInvokerRegistry::refresh] or [RemoteInvokerRegistry::start].
    pub fn new(
        local: InstanceId,
        config: RegistryConfig,
        discovery: Arc<dyn InstanceDiscoveryService>,
        service: Arc<dyn AsyncConnectionService>,
        stats: TransportStats,
    ) -> Self {
        Self {
            local,
            config,
            discovery,
            service,
            stats,
            snapshot: ArcSwap::from_pointee(RegistrySnapshot::empty()),
            peers: Mutex::new(HashMap::new()),
            local_addresses: DashSet::new(),
            generation: AtomicU64::new(0),
            task: SyncMutex::new(None),
        }
    }

    /// The current snapshot. Hold on to it for the whole of one call.
    pub fn snapshot(&self) -> Arc<RegistrySnapshot> {
        self.snapshot.load_full()
    }

    /// Never poll `address`: it is one of the local instance's own
    pub fn exclude_address<S: Into<String>>(&self, address: S) {
        self.local_addresses.insert(address.into());
    }

    fn invoker_for(&self, address: &str) -> Arc<RemoteInvoker> {
        Arc::new(RemoteInvoker::new(
            address.to_string(),
            self.service.clone(),
            self.config.pool.clone(),
            self.stats.clone(),
        ))
    }

    fn next_generation(&self) -> u64 {
        self.generation.fetch_add(1, Ordering::SeqCst) + 1
    }

    async fn retire(invokers: Vec<Arc<RemoteInvoker>>) {
        for invoker in invokers {
            log::debug!("Stopping invoker for {}", invoker.address());
            invoker.stop().await;
        }
    }

    /// Run one refresh cycle and publish the resulting snapshot
    ///
    /// Returns the published snapshot's generation. Fails without publishing when
    /// discovery fails or the cycle exceeds the total refresh timeout.
    pub async fn refresh(&self) -> Result<u64, RelayErr> {
        let mut peers = self.peers.lock().await;

        let hosts = self
            .discovery
            .known_hosts()
            .await?
            .into_iter()
            .filter(|host| !self.local_addresses.contains(host))
            .collect::<BTreeSet<_>>();
        for host in hosts.iter() {
            peers.entry(host.clone()).or_insert_with(|| Peer {
                invoker: self.invoker_for(host),
                failures: 0,
            });
        }

        let per_peer = self.config.refresh_timeout;
        let mut polls = JoinSet::new();
        for host in hosts.iter() {
            if let Some(peer) = peers.get(host) {
                let invoker = peer.invoker.clone();
                let host = host.clone();
                polls.spawn(async move {
                    let polled = relay::concurrency::timeout(per_peer, async {
                        let metadata = invoker.fetch_metadata(per_peer).await?;
                        if let Err(err) = invoker.maintain().await {
                            log::debug!("Pool maintenance for {host} failed: {err}");
                        }
                        Ok::<_, RelayErr>(metadata)
                    })
                    .await
                    .map_err(|_| {
                        RelayErr::handler_timeout(format!(
                            "No metadata from {host} within {}ms",
                            per_peer.as_millis()
                        ))
                    })
                    .and_then(|result| result);
                    (host, polled)
                });
            }
        }

        let collect = async {
            let mut replies = Vec::with_capacity(polls.len());
            while let Some(joined) = polls.join_next().await {
                if let Ok(reply) = joined {
                    replies.push(reply);
                }
            }
            replies
        };
        let replies = match relay::concurrency::timeout(self.config.refresh_total_timeout, collect)
            .await
        {
            Ok(replies) => replies,
            Err(_) => {
                log::warn!("Timed out. Skipping refresh this cycle.");
                return Err(RelayErr::handler_timeout(format!(
                    "Refresh exceeded {}ms",
                    self.config.refresh_total_timeout.as_millis()
                )));
            }
        };

        let mut retired = Vec::new();
        let mut builder = SnapshotBuilder::new(self.next_generation());
        for (host, reply) in replies {
            match reply {
                Ok(metadata) => {
                    self.accept_reply(&mut peers, &mut builder, &mut retired, host, metadata)
                }
                Err(err) => {
                    let (failures, invoker) = match peers.get_mut(&host) {
                        Some(peer) => {
                            peer.failures += 1;
                            (peer.failures, peer.invoker.clone())
                        }
                        None => continue,
                    };
                    let budget = self.config.failure_budget;
                    log::warn!("Failed to refresh instance at {host} ({failures}/{budget}): {err}");
                    // absent from this snapshot, the invoker survives until the budget runs out
                    if failures > budget {
                        peers.remove(&host);
                        retired.push(invoker);
                    }
                }
            }
        }

        // hosts discovery no longer lists
        let unlisted = peers
            .keys()
            .filter(|host| !hosts.contains(*host))
            .cloned()
            .collect::<Vec<_>>();
        for host in unlisted {
            if let Some(peer) = peers.remove(&host) {
                log::info!("Instance at {host} is no longer listed");
                retired.push(peer.invoker);
            }
        }

        let snapshot = builder.build();
        let generation = snapshot.generation();
        log::debug!(
            "Publishing registry snapshot {generation} with {} instance(s)",
            snapshot.len()
        );
        self.snapshot.store(Arc::new(snapshot));
        drop(peers);

        Self::retire(retired).await;
        Ok(generation)
    }

    fn accept_reply(
        &self,
        peers: &mut HashMap<String, Peer>,
        builder: &mut SnapshotBuilder,
        retired: &mut Vec<Arc<RemoteInvoker>>,
        host: String,
        metadata: InstanceMetadata,
    ) {
        if metadata.instance_id == self.local {
            log::debug!("{host} is the local instance, excluding it");
            if let Some(peer) = peers.remove(&host) {
                retired.push(peer.invoker);
            }
            self.local_addresses.insert(host);
            return;
        }
        let peer = match peers.get_mut(&host) {
            Some(peer) => peer,
            None => return,
        };
        if !peer.invoker.bind(metadata.instance_id) {
            log::info!(
                "Instance at {host} changed identity to {}, replacing its invoker",
                metadata.instance_id
            );
            let fresh = self.invoker_for(&host);
            fresh.bind(metadata.instance_id);
            retired.push(std::mem::replace(&mut peer.invoker, fresh));
        }
        peer.failures = 0;
        if !builder.add(peer.invoker.clone(), metadata) {
            log::warn!("Instance at {host} duplicates an instance already listed");
        }
    }

    /// Drop the peer at `address` from the published snapshot right away
    pub async fn remove_address(&self, address: &str) {
        let mut peers = self.peers.lock().await;
        let peer = match peers.remove(address) {
            Some(peer) => peer,
            None => return,
        };
        if let Some(instance) = peer.invoker.instance_id() {
            let current = self.snapshot();
            self.snapshot
                .store(Arc::new(current.without(&instance, self.next_generation())));
        }
        drop(peers);
        log::info!("Instance at {address} was lost");
        Self::retire(vec![peer.invoker]).await;
    }

    /// Start refreshing every `refresh_interval`, reacting to discovery events, and
    /// dumping the invocation table every `report_interval`
    pub fn start(self: &Arc<Self>) {
        let registry = self.clone();
        let mut events = self.discovery.subscribe();
        let handle = relay::concurrency::spawn(async move {
            let mut refresh = relay::concurrency::interval(registry.config.refresh_interval);
            let mut report = relay::concurrency::interval(registry.config.report_interval);
            loop {
                tokio::select! {
                    _ = refresh.tick() => {
                        if let Err(err) = registry.refresh().await {
                            log::debug!("Refresh cycle failed: {err}");
                        }
                    }
                    _ = report.tick() => {
                        log::info!("Invocation table: {}", registry.snapshot().report());
                    }
                    event = next_event(&mut events) => match event {
                        Some(DiscoveryEvent::Discovered(host)) => {
                            log::debug!("Discovered {host}, refreshing");
                            if let Err(err) = registry.refresh().await {
                                log::debug!("Refresh cycle failed: {err}");
                            }
                        }
                        Some(DiscoveryEvent::Lost(host)) => registry.remove_address(&host).await,
                        None => events = None,
                    },
                }
            }
        });
        if let Ok(mut task) = self.task.lock() {
            if let Some(previous) = task.replace(handle) {
                previous.abort();
            }
        }
    }

    /// Stop refreshing and tear down every invoker. Outstanding remote calls fail
    /// with [relay::ErrorKind::InstanceNotFound].
    pub async fn stop(&self) {
        if let Ok(mut task) = self.task.lock() {
            if let Some(handle) = task.take() {
                handle.abort();
            }
        }
        let mut peers = self.peers.lock().await;
        let retired = peers.drain().map(|(_, peer)| peer.invoker).collect();
        self.snapshot.store(Arc::new(RegistrySnapshot::empty()));
        drop(peers);
        Self::retire(retired).await;
    }
}

async fn next_event(
    events: &mut Option<relay::concurrency::BroadcastReceiver<DiscoveryEvent>>,
) -> Option<DiscoveryEvent> {
    use tokio::sync::broadcast::error::RecvError;
    match events {
        Some(receiver) => loop {
            match receiver.recv().await {
                Ok(event) => return Some(event),
                Err(RecvError::Lagged(skipped)) => {
                    log::warn!("Missed {skipped} discovery event(s)");
                }
                Err(RecvError::Closed) => return None,
            }
        },
        None => futures::future::pending().await,
    }
}
