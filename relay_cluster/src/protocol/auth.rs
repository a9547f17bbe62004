// Copyright (c) Sean Lawlor
//
// This source code is licensed under both the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree.

//! Instance authentication protocol

/// The connecting side introduces itself
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct NameMessage {
    /// The connecting instance's name
    #[prost(string, tag = "1")]
    pub name: ::prost::alloc::string::String,
}

/// The accepting side's reply to a [NameMessage]
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ServerStatus {
    /// Whether the server is willing to continue the handshake
    #[prost(bool, tag = "1")]
    pub ok: bool,
}

/// A challenge value which the receiving side must digest with the shared cookie
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Challenge {
    /// The challenging side's name
    #[prost(string, tag = "1")]
    pub name: ::prost::alloc::string::String,
    /// The challenge value
    #[prost(uint32, tag = "2")]
    pub challenge: u32,
}

/// The client's answer to the server's [Challenge], plus its own challenge
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ChallengeReply {
    /// The digest of the server's challenge
    #[prost(bytes = "vec", tag = "1")]
    pub digest: ::prost::alloc::vec::Vec<u8>,
    /// The client's challenge for the server
    #[prost(uint32, tag = "2")]
    pub challenge: u32,
}

/// The server's answer to the client's challenge
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ChallengeAck {
    /// The digest of the client's challenge
    #[prost(bytes = "vec", tag = "1")]
    pub digest: ::prost::alloc::vec::Vec<u8>,
}

/// A single step of the authentication handshake
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct AuthenticationMessage {
    /// The step's payload
    #[prost(oneof = "authentication_message::Msg", tags = "1, 2, 3, 4, 5")]
    pub msg: ::core::option::Option<authentication_message::Msg>,
}

/// Nested message and enum types in `AuthenticationMessage`.
pub mod authentication_message {
    /// The step's payload
    #[derive(Clone, PartialEq, ::prost::Oneof)]
    pub enum Msg {
        /// (1) client -> server
        #[prost(message, tag = "1")]
        Name(super::NameMessage),
        /// (2) server -> client
        #[prost(message, tag = "2")]
        ServerStatus(super::ServerStatus),
        /// (3) server -> client
        #[prost(message, tag = "3")]
        ServerChallenge(super::Challenge),
        /// (4) client -> server
        #[prost(message, tag = "4")]
        ClientChallenge(super::ChallengeReply),
        /// (5) server -> client
        #[prost(message, tag = "5")]
        ServerAck(super::ChallengeAck),
    }
}
