// Copyright (c) Sean Lawlor
//
// This source code is licensed under both the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree.

//! The contract a hosted unit of work satisfies
//!
//! The runtime treats resource state as opaque: it only needs to execute a method and
//! to move the state between nodes as a byte stream. The byte format belongs to the
//! resource implementation.

use std::io::{Read, Write};

use crate::{BoxedErr, Invocation};

/// A stateful, addressable unit of work hosted by exactly one node at a time. Also used
/// for node-level services, which are addressed by type name instead of id.
#[async_trait::async_trait]
pub trait Resource: Send + Sync + 'static {
    /// Execute the invocation's method against this resource
    ///
    /// Returns the serialized return value. An [Err] is an application-level failure
    /// and is relayed to remote callers opaquely.
    async fn invoke(&self, invocation: &Invocation) -> Result<Vec<u8>, BoxedErr>;

    /// Write this resource's state to the sink so it can be relocated or restored
    fn serialize(&self, sink: &mut dyn Write) -> std::io::Result<()>;

    /// Restore a resource from state previously written by [Resource::serialize]
    fn deserialize(source: &mut dyn Read) -> std::io::Result<Self>
    where
        Self: Sized;
}
