// Copyright (c) Sean Lawlor
//
// This source code is licensed under both the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree.

//! # relay
//!
//! The transport-independent core of a clustered remote-invocation runtime. Many
//! independent processes (**instances**) cooperate to host addressable, stateful units
//! of work (**resources**). Each instance hosts one **node** per application it serves,
//! and every call to a resource or application is an [invocation::Invocation] which is
//! routed to the right node(s) and delivered with a calling convention that was decided
//! once, when the method was registered.
//!
//! This crate holds the model that both sides of the wire share:
//!
//! * [id]: typed identifiers for instances, applications, nodes and resources, with
//!   their canonical string and byte encodings
//! * [dispatch]: the [dispatch::DispatchType] classifier which deduces a calling
//!   convention from a method's declared shape
//! * [method]: the registration-time [method::MethodTableBuilder] which validates every
//!   callable once and records its dispatch type and routing strategy
//! * [routing]: resolution of a [routing::RoutingStrategy] plus target into concrete
//!   destinations against a membership view
//! * [metadata]: the per-instance load ("quality") and hosted-node report consumed by
//!   routing
//! * [resource]: the narrow contract a hosted unit of work must satisfy
//! * [errors]: the error taxonomy and its wire codes
//!
//! The networked runtime (connection pools, discovery, the remote invoker registry
//! and the dispatcher) lives in `relay_cluster`.
//!
//! ## Example
//!
//! ```rust
//! use relay::dispatch::{DispatchType, ParamKind, ReturnShape};
//! use relay::method::{MethodSignature, MethodTable};
//! use relay::routing::RoutingStrategy;
//!
//! let table = MethodTable::builder()
//!     .register(
//!         MethodSignature::new("Counter", "increment")
//!             .param(ParamKind::value("i64"))
//!             .returns(ReturnShape::Value),
//!         RoutingStrategy::Addressed,
//!     )
//!     .register(
//!         MethodSignature::new("Counter", "watch")
//!             .param(ParamKind::ResultCallback)
//!             .param(ParamKind::ErrorCallback),
//!         RoutingStrategy::Addressed,
//!     )
//!     .build()
//!     .expect("Both methods classify");
//!
//! let increment = table.lookup("Counter", "increment").unwrap();
//! assert_eq!(DispatchType::Synchronous, increment.dispatch());
//! let watch = table.lookup("Counter", "watch").unwrap();
//! assert_eq!(DispatchType::Consumer, watch.dispatch());
//! ```

#![warn(unused_imports)]
#![warn(unsafe_code)]
#![warn(missing_docs)]
#![warn(unused_crate_dependencies)]
#![cfg_attr(docsrs, feature(doc_cfg))]

pub mod concurrency;
pub mod dispatch;
pub mod errors;
pub mod id;
pub mod invocation;
pub mod metadata;
pub mod method;
pub mod resource;
pub mod routing;


// ============== Re-exports ============== //
pub use dispatch::DispatchType;
pub use errors::{BoxedErr, ErrorKind, RelayErr};
pub use id::{ApplicationId, InstanceId, NodeId, ResourceId};
pub use invocation::{Invocation, Reply, Target};
pub use metadata::{InstanceMetadata, InstanceMetadataSource, LoadMonitor};
pub use method::{MethodDescriptor, MethodKey, MethodSignature, MethodTable};
pub use resource::Resource;
pub use routing::{Destination, MembershipView, RoutingStrategy};

// The async-trait crate is re-exported so resource implementors don't need a direct
// dependency
pub use async_trait::async_trait;
