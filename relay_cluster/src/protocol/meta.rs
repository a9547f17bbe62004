// Copyright (c) Sean Lawlor
//
// This source code is licensed under both the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree.

//! The top-level frame which carries every other message

/// Every message sent on a connection is wrapped in a [NetworkMessage]
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct NetworkMessage {
    /// The wrapped message
    #[prost(oneof = "network_message::Message", tags = "1, 2, 3")]
    pub message: ::core::option::Option<network_message::Message>,
}

/// Nested message and enum types in `NetworkMessage`.
pub mod network_message {
    /// The wrapped message
    #[derive(Clone, PartialEq, ::prost::Oneof)]
    pub enum Message {
        /// A handshake step
        #[prost(message, tag = "1")]
        Auth(super::super::auth::AuthenticationMessage),
        /// An invocation request or response
        #[prost(message, tag = "2")]
        Invocation(super::super::invocation::Envelope),
        /// A control request or reply
        #[prost(message, tag = "3")]
        Control(super::super::control::ControlMessage),
    }
}
