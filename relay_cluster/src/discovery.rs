// Copyright (c) Sean Lawlor
//
// This source code is licensed under both the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree.

//! Instance discovery: which peer addresses the registry should be talking to

use std::collections::BTreeSet;
use std::sync::RwLock;

use relay::concurrency::{broadcast, BroadcastReceiver, BroadcastSender};
use relay::RelayErr;

const EVENT_BUFFER: usize = 64;

/// A change in the set of known peer addresses
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiscoveryEvent {
    /// A peer address became known
    Discovered(String),
    /// A peer address is gone
    Lost(String),
}

/// Lists the addresses of peer instances
#[async_trait::async_trait]
pub trait InstanceDiscoveryService: Send + Sync + 'static {
    /// Every currently known peer address
    async fn known_hosts(&self) -> Result<Vec<String>, RelayErr>;

    /// A stream of membership changes, for services which can push them
    fn subscribe(&self) -> Option<BroadcastReceiver<DiscoveryEvent>> {
        None
    }
}

/// A fixed list of peer addresses
#[derive(Debug, Clone, Default)]
pub struct StaticInstanceDiscovery {
    hosts: Vec<String>,
}

impl StaticInstanceDiscovery {
    /// Create the discovery service from a list of addresses. Duplicates are dropped.
    pub fn new<I, S>(hosts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let hosts = hosts
            .into_iter()
            .map(Into::into)
            .filter(|host: &String| !host.is_empty())
            .collect::<BTreeSet<_>>();
        Self {
            hosts: hosts.into_iter().collect(),
        }
    }
}

#[async_trait::async_trait]
impl InstanceDiscoveryService for StaticInstanceDiscovery {
    async fn known_hosts(&self) -> Result<Vec<String>, RelayErr> {
        Ok(self.hosts.clone())
    }
}

/// Peer addresses added and removed at runtime. Every change is published to
/// subscribers.
#[derive(Debug)]
pub struct DynamicInstanceDiscovery {
    hosts: RwLock<BTreeSet<String>>,
    events: BroadcastSender<DiscoveryEvent>,
}

impl Default for DynamicInstanceDiscovery {
    fn default() -> Self {
        Self::new()
    }
}

impl DynamicInstanceDiscovery {
    /// Create an empty discovery service
    pub fn new() -> Self {
        let (events, _) = broadcast(EVENT_BUFFER);
        Self {
            hosts: RwLock::new(BTreeSet::new()),
            events,
        }
    }

    /// Announce a peer. Returns whether it was previously unknown.
    pub fn add_host<S: Into<String>>(&self, host: S) -> bool {
        let host = host.into();
        let added = match self.hosts.write() {
            Ok(mut hosts) => hosts.insert(host.clone()),
            Err(poisoned) => poisoned.into_inner().insert(host.clone()),
        };
        if added {
            log::debug!("Discovered instance at {host}");
            // no subscribers is fine
            let _ = self.events.send(DiscoveryEvent::Discovered(host));
        }
        added
    }

    /// Withdraw a peer. Returns whether it was known.
    pub fn remove_host(&self, host: &str) -> bool {
        let removed = match self.hosts.write() {
            Ok(mut hosts) => hosts.remove(host),
            Err(poisoned) => poisoned.into_inner().remove(host),
        };
        if removed {
            log::debug!("Lost instance at {host}");
            let _ = self.events.send(DiscoveryEvent::Lost(host.to_string()));
        }
        removed
    }
}

#[async_trait::async_trait]
impl InstanceDiscoveryService for DynamicInstanceDiscovery {
    async fn known_hosts(&self) -> Result<Vec<String>, RelayErr> {
        let hosts = match self.hosts.read() {
            Ok(hosts) => hosts.iter().cloned().collect(),
            Err(poisoned) => poisoned.into_inner().iter().cloned().collect(),
        };
        Ok(hosts)
    }

    fn subscribe(&self) -> Option<BroadcastReceiver<DiscoveryEvent>> {
        Some(self.events.subscribe())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[relay::concurrency::test]
    async fn static_hosts_are_deduplicated() {
        let discovery = StaticInstanceDiscovery::new(vec!["b:1", "a:1", "b:1", ""]);
        assert_eq!(
            vec!["a:1".to_string(), "b:1".to_string()],
            discovery.known_hosts().await.unwrap()
        );
        assert!(discovery.subscribe().is_none());
    }

    #[relay::concurrency::test]
    async fn dynamic_changes_are_published() {
        let discovery = DynamicInstanceDiscovery::new();
        let mut events = discovery.subscribe().unwrap();

        assert!(discovery.add_host("a:1"));
        assert!(!discovery.add_host("a:1"));
        assert!(discovery.remove_host("a:1"));
        assert!(!discovery.remove_host("a:1"));

        assert_eq!(
            DiscoveryEvent::Discovered("a:1".to_string()),
            events.recv().await.unwrap()
        );
        assert_eq!(
            DiscoveryEvent::Lost("a:1".to_string()),
            events.recv().await.unwrap()
        );
        assert!(discovery.known_hosts().await.unwrap().is_empty());
    }
}
