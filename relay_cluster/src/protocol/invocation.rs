// Copyright (c) Sean Lawlor
//
// This source code is licensed under both the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree.

//! Invocation envelopes exchanged between instances

/// The calling convention of an invocation
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
#[repr(i32)]
pub enum DispatchKind {
    /// Caller waits for the outcome
    Synchronous = 0,
    /// Caller holds a future
    Future = 1,
    /// Outcome goes to callbacks
    Consumer = 2,
}

/// The routing strategy of an invocation
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
#[repr(i32)]
pub enum StrategyKind {
    /// Single resource
    Addressed = 0,
    /// All nodes of an application
    Aggregate = 1,
    /// Least loaded node of an application
    Any = 2,
}

/// Discriminates requests from the possible responses
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
#[repr(i32)]
pub enum OutcomeKind {
    /// A request, no outcome yet
    Request = 0,
    /// A successful outcome, the payload is the serialized value
    Result = 1,
    /// A failed outcome, the payload is an encoded [ErrorDetail]
    Error = 2,
    /// A successful outcome whose value was discarded
    Ack = 3,
}

/// The serialized form of an invocation
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct InvocationPayload {
    /// The type hosting the method
    #[prost(string, tag = "1")]
    pub type_name: ::prost::alloc::string::String,
    /// The service name within the type
    #[prost(string, tag = "2")]
    pub name: ::prost::alloc::string::String,
    /// The method name
    #[prost(string, tag = "3")]
    pub method: ::prost::alloc::string::String,
    /// The type names of the parameters, in order
    #[prost(string, repeated, tag = "4")]
    pub parameters: ::prost::alloc::vec::Vec<::prost::alloc::string::String>,
    /// The serialized arguments, in order
    #[prost(bytes = "vec", repeated, tag = "5")]
    pub arguments: ::prost::alloc::vec::Vec<::prost::alloc::vec::Vec<u8>>,
    /// The calling convention
    #[prost(enumeration = "DispatchKind", tag = "6")]
    pub dispatch_type: i32,
    /// The routing strategy
    #[prost(enumeration = "StrategyKind", tag = "7")]
    pub strategy: i32,
    /// The number of result callbacks held by the caller
    #[prost(uint32, tag = "8")]
    pub result_consumers: u32,
}

/// A failure carried in an [OutcomeKind::Error] envelope
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ErrorDetail {
    /// The wire code of the error's kind
    #[prost(uint32, tag = "1")]
    pub code: u32,
    /// The error's message
    #[prost(string, tag = "2")]
    pub message: ::prost::alloc::string::String,
}

/// An invocation request or response
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Envelope {
    /// Matches a response to its request
    #[prost(uint64, tag = "1")]
    pub correlation_id: u64,
    /// The destination node, in canonical byte form
    #[prost(bytes = "vec", tag = "2")]
    pub destination_node_id: ::prost::alloc::vec::Vec<u8>,
    /// The destination resource, in canonical byte form
    #[prost(bytes = "vec", optional, tag = "3")]
    pub destination_resource_id: ::core::option::Option<::prost::alloc::vec::Vec<u8>>,
    /// The calling convention
    #[prost(enumeration = "DispatchKind", tag = "4")]
    pub dispatch_type: i32,
    /// An encoded [InvocationPayload] for requests, the outcome for responses
    #[prost(bytes = "vec", tag = "5")]
    pub payload: ::prost::alloc::vec::Vec<u8>,
    /// Request, or which kind of response
    #[prost(enumeration = "OutcomeKind", tag = "6")]
    pub outcome_kind: i32,
}
