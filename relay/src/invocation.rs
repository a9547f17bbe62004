// Copyright (c) Sean Lawlor
//
// This source code is licensed under both the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree.

//! Invocations, their targets, and their outcomes

use std::fmt::Display;

use crate::routing::RoutingStrategy;
use crate::{ApplicationId, DispatchType, NodeId, RelayErr, ResourceId};

/// What an invocation is addressed to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Target {
    /// A single resource, wherever it is currently hosted
    Resource(ResourceId),
    /// Every (or any) node serving an application
    Application(ApplicationId),
}

impl Target {
    /// The addressed resource, if any
    pub fn resource(&self) -> Option<&ResourceId> {
        match self {
            Self::Resource(resource) => Some(resource),
            Self::Application(_) => None,
        }
    }
}

impl Display for Target {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Resource(resource) => write!(f, "resource {resource}"),
            Self::Application(application) => write!(f, "application {application}"),
        }
    }
}

/// One routed, dispatch-typed call. Immutable once dispatched.
#[derive(Debug, Clone, PartialEq)]
pub struct Invocation {
    /// The type hosting the method
    pub type_name: String,
    /// The service name within the type, empty for resources and default services
    pub name: String,
    /// The method to invoke
    pub method: String,
    /// The type names of the value parameters, in order
    pub parameters: Vec<String>,
    /// The serialized arguments, in the same order as `parameters`
    pub arguments: Vec<Vec<u8>>,
    /// The resolved calling convention
    pub dispatch: DispatchType,
    /// The routing strategy
    pub strategy: RoutingStrategy,
    /// How many result callbacks the caller holds
    pub result_consumers: u32,
}

impl Invocation {
    /// Whether the remote side should send back only an acknowledgement
    pub fn is_acknowledge_only(&self) -> bool {
        self.dispatch == DispatchType::Consumer && self.result_consumers == 0
    }
}

/// The successful outcome of an invocation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    /// A single serialized value
    Value(Vec<u8>),
    /// The call completed and the return value was discarded
    Acknowledged,
    /// One serialized value per participating node, ordered by [NodeId]
    Aggregate(Vec<(NodeId, Vec<u8>)>),
}

impl Reply {
    /// The serialized value of a single reply. Acknowledgements carry no bytes.
    pub fn into_value(self) -> Option<Vec<u8>> {
        match self {
            Self::Value(bytes) => Some(bytes),
            Self::Acknowledged => Some(Vec::new()),
            Self::Aggregate(_) => None,
        }
    }
}

/// Receives the successful outcome of a call
pub type ResultCallback = Box<dyn FnOnce(Reply) + Send + 'static>;

/// Receives the failed outcome of a call
pub type ErrorCallback = Box<dyn FnOnce(RelayErr) + Send + 'static>;

/// The caller-side callbacks of an invocation. Never sent over the wire.
#[derive(Default)]
pub struct Callbacks {
    on_result: Option<ResultCallback>,
    on_error: Option<ErrorCallback>,
}

impl std::fmt::Debug for Callbacks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Callbacks")
            .field("on_result", &self.on_result.is_some())
            .field("on_error", &self.on_error.is_some())
            .finish()
    }
}

impl Callbacks {
    /// No callbacks
    pub fn none() -> Self {
        Self::default()
    }

    /// Set the result callback
    pub fn on_result<F>(mut self, callback: F) -> Self
    where
        F: FnOnce(Reply) + Send + 'static,
    {
        self.on_result = Some(Box::new(callback));
        self
    }

    /// Set the error callback
    pub fn on_error<F>(mut self, callback: F) -> Self
    where
        F: FnOnce(RelayErr) + Send + 'static,
    {
        self.on_error = Some(Box::new(callback));
        self
    }

    /// Whether a result callback is present
    pub fn has_result(&self) -> bool {
        self.on_result.is_some()
    }

    /// Whether an error callback is present
    pub fn has_error(&self) -> bool {
        self.on_error.is_some()
    }

    /// Hand the outcome to the matching callback, consuming both. Returns whether a
    /// callback received it.
    pub fn deliver(self, outcome: Result<Reply, RelayErr>) -> bool {
        match outcome {
            Ok(reply) => match self.on_result {
                Some(callback) => {
                    callback(reply);
                    true
                }
                None => false,
            },
            Err(err) => match self.on_error {
                Some(callback) => {
                    callback(err);
                    true
                }
                None => false,
            },
        }
    }
}
