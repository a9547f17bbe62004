// Copyright (c) Sean Lawlor
//
// This source code is licensed under both the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree.

//! # Networked cluster runtime for [relay]
//!
//! An [Instance] is one process in the cluster. It hosts [Node]s, each running the
//! services of one application and the resources created on it, and it reaches the
//! other instances through a pluggable [AsyncConnectionService].
//!
//! Peers are found by an [InstanceDiscoveryService] and tracked by the
//! [RemoteInvokerRegistry], which holds one [RemoteInvoker] per peer and periodically
//! refreshes their metadata (load and hosted nodes) into an immutable
//! [RegistrySnapshot]. Every call issued through the [InvocationDispatcher] resolves
//! its destinations against exactly one snapshot:
//!
//! * ADDRESSED calls go to the node hosting the target resource, in-process when it
//!   is local
//! * AGGREGATE calls go to every node of the target application, and fail as a whole
//!   if any participant fails
//! * ANY calls go to the least loaded node of the target application
//!
//! ## Example
//!
//! ```no_run
//! use relay::{ApplicationId, NodeId, Target};
//! use relay_cluster::{ClusterConfig, InstanceBuilder, Node};
//!
//! # async fn run(service: std::sync::Arc<dyn relay::Resource>, invocation: relay::Invocation) -> Result<(), relay::RelayErr> {
//! let config = ClusterConfig::default().with_static_hosts(vec!["10.0.0.2:7000"]);
//! let builder = InstanceBuilder::new(config);
//! let application = ApplicationId::random();
//! let node = NodeId::new(builder.instance_id(), application);
//! let instance = builder
//!     .with_node(Node::new(node).with_service("Greeter", service))
//!     .build()?;
//! instance.start().await?;
//!
//! let call = relay_cluster::Call::new(invocation, Target::Application(application));
//! let _reply = instance.dispatcher().invoke(call).await?;
//! instance.stop().await;
//! # Ok(())
//! # }
//! ```

#![warn(unused_imports)]
#![warn(unsafe_code)]
#![warn(missing_docs)]
#![warn(unused_crate_dependencies)]
#![cfg_attr(docsrs, feature(doc_cfg))]

mod auth;
mod hash;
mod net;
mod protocol;

pub mod config;
pub mod connection;
pub mod discovery;
pub mod dispatcher;
pub mod instance;
pub mod invoker;
pub mod metadata;
pub mod node;
pub mod registry;
pub mod server;

#[cfg(test)]
pub(crate) mod common_test;

// ============== Re-exports ============== //
pub use config::ClusterConfig;
pub use connection::{
    AsyncConnectionService, MemoryConnectionService, MemoryHub, TcpConnectionService,
    TransportStats,
};
pub use discovery::{
    DiscoveryEvent, DynamicInstanceDiscovery, InstanceDiscoveryService,
    StaticInstanceDiscovery,
};
pub use dispatcher::{Call, Completion, Dispatch, InvocationDispatcher, InvocationFuture};
pub use instance::{Instance, InstanceBuilder, InstanceLifecycle, LifecycleState};
pub use invoker::RemoteInvoker;
pub use metadata::{InFlight, LocalMetadataContext};
pub use net::{IncomingEncryptionMode, NetworkStream, OutgoingEncryptionMode};
pub use node::{Node, NodeLifecycle, NodeTable};
pub use registry::{RegistryConfig, RegistrySnapshot, RemoteInvokerRegistry};
