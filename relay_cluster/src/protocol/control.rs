// Copyright (c) Sean Lawlor
//
// This source code is licensed under both the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree.

//! Control messages between instances

/// Ask the peer for its current metadata
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct MetadataRequest {}

/// A peer's report of its quality and hosted nodes
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct InstanceStatus {
    /// The reporting instance's uuid bytes
    #[prost(bytes = "vec", tag = "1")]
    pub instance_id: ::prost::alloc::vec::Vec<u8>,
    /// The reported load score
    #[prost(double, tag = "2")]
    pub quality: f64,
    /// The hosted nodes, in canonical byte form
    #[prost(bytes = "vec", repeated, tag = "3")]
    pub node_ids: ::prost::alloc::vec::Vec<::prost::alloc::vec::Vec<u8>>,
    /// When the report was produced, in milliseconds since the unix epoch
    #[prost(uint64, tag = "4")]
    pub timestamp_millis: u64,
}

/// A control request or reply
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ControlMessage {
    /// Matches a reply to its request
    #[prost(uint64, tag = "1")]
    pub correlation_id: u64,
    /// The request or reply
    #[prost(oneof = "control_message::Msg", tags = "2, 3, 4")]
    pub msg: ::core::option::Option<control_message::Msg>,
}

/// Nested message and enum types in `ControlMessage`.
pub mod control_message {
    /// The request or reply
    #[derive(Clone, PartialEq, ::prost::Oneof)]
    pub enum Msg {
        /// Request the peer's metadata
        #[prost(message, tag = "2")]
        MetadataRequest(super::MetadataRequest),
        /// The peer's metadata
        #[prost(message, tag = "3")]
        Status(super::InstanceStatus),
        /// The request failed
        #[prost(message, tag = "4")]
        Error(super::super::invocation::ErrorDetail),
    }
}
