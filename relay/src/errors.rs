// Copyright (c) Sean Lawlor
//
// This source code is licensed under both the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree.

//! Invocation error types
//!
//! Every failure an invocation can end in is a [RelayErr], which is a tagged
//! [ErrorKind] plus a human readable message and an optional cause. The kind is what
//! crosses the wire (as a numeric code, see [ErrorKind::code]); the cause never does.

use std::fmt::Display;
use std::sync::Arc;

/// Represents a resource's (or hook's) internal processing error
pub type BoxedErr = Box<dyn std::error::Error + Send + Sync + 'static>;

/// The classification of a [RelayErr]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ErrorKind {
    /// No resolvable destination exists for a strategy + target pair
    Routing,
    /// The addressed instance, node or resource is not present in the current
    /// view of the cluster
    InstanceNotFound,
    /// The target resource exists but is no longer servable
    DeadResource,
    /// The target resource was destroyed (or relocated away)
    ResourceDestroyed,
    /// No outcome arrived within the call's timeout budget
    HandlerTimeout,
    /// The remote side completed with an application-level failure, relayed opaquely
    RemoteThrown,
    /// A malformed wire frame or identifier
    CorruptEnvelope,
    /// A resource's handler failed locally
    Handler,
    /// A registration or configuration error, fatal to startup
    Configuration,
    /// The instance is shutting down (or not yet running) and refuses new invocations
    Shutdown,
    /// An I/O failure on the transport
    Transport,
}

impl ErrorKind {
    /// The numeric code this kind is mapped to at the transport boundary
    pub fn code(self) -> u32 {
        match self {
            Self::Routing => 1,
            Self::InstanceNotFound => 2,
            Self::DeadResource => 3,
            Self::ResourceDestroyed => 4,
            Self::HandlerTimeout => 5,
            Self::RemoteThrown => 6,
            Self::CorruptEnvelope => 7,
            Self::Handler => 8,
            Self::Configuration => 9,
            Self::Shutdown => 10,
            Self::Transport => 11,
        }
    }

    /// Decode a wire code. Unknown codes are [None]
    pub fn from_code(code: u32) -> Option<Self> {
        let kind = match code {
            1 => Self::Routing,
            2 => Self::InstanceNotFound,
            3 => Self::DeadResource,
            4 => Self::ResourceDestroyed,
            5 => Self::HandlerTimeout,
            6 => Self::RemoteThrown,
            7 => Self::CorruptEnvelope,
            8 => Self::Handler,
            9 => Self::Configuration,
            10 => Self::Shutdown,
            11 => Self::Transport,
            _ => return None,
        };
        Some(kind)
    }

    /// Whether a caller may safely re-issue the call which failed with this kind
    pub fn is_retryable(self) -> bool {
        matches!(self, Self::CorruptEnvelope | Self::Transport)
    }
}

impl Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Routing => "RoutingError",
            Self::InstanceNotFound => "InstanceNotFoundError",
            Self::DeadResource => "DeadResourceError",
            Self::ResourceDestroyed => "ResourceDestroyedError",
            Self::HandlerTimeout => "HandlerTimeoutError",
            Self::RemoteThrown => "RemoteThrownError",
            Self::CorruptEnvelope => "CorruptEnvelopeError",
            Self::Handler => "HandlerError",
            Self::Configuration => "ConfigurationError",
            Self::Shutdown => "ShutdownError",
            Self::Transport => "TransportError",
        };
        write!(f, "{name}")
    }
}

/// An invocation, routing, or configuration failure
#[derive(Debug, Clone)]
pub struct RelayErr {
    kind: ErrorKind,
    message: String,
    cause: Option<Arc<dyn std::error::Error + Send + Sync + 'static>>,
}

impl RelayErr {
    /// Create a new error of the given kind
    pub fn new<M: Into<String>>(kind: ErrorKind, message: M) -> Self {
        Self {
            kind,
            message: message.into(),
            cause: None,
        }
    }

    /// Attach the underlying cause of this error
    pub fn with_cause(mut self, cause: BoxedErr) -> Self {
        self.cause = Some(Arc::from(cause));
        self
    }

    /// No resolvable destination
    pub fn routing<M: Into<String>>(message: M) -> Self {
        Self::new(ErrorKind::Routing, message)
    }

    /// The addressed instance or resource is unknown
    pub fn instance_not_found<M: Into<String>>(message: M) -> Self {
        Self::new(ErrorKind::InstanceNotFound, message)
    }

    /// The call's timeout budget elapsed
    pub fn handler_timeout<M: Into<String>>(message: M) -> Self {
        Self::new(ErrorKind::HandlerTimeout, message)
    }

    /// A remote application failure, relayed opaquely
    pub fn remote_thrown<M: Into<String>>(message: M) -> Self {
        Self::new(ErrorKind::RemoteThrown, message)
    }

    /// A malformed frame or identifier
    pub fn corrupt_envelope<M: Into<String>>(message: M) -> Self {
        Self::new(ErrorKind::CorruptEnvelope, message)
    }

    /// A registration or configuration error
    pub fn configuration<M: Into<String>>(message: M) -> Self {
        Self::new(ErrorKind::Configuration, message)
    }

    /// The instance is not accepting invocations
    pub fn shutdown<M: Into<String>>(message: M) -> Self {
        Self::new(ErrorKind::Shutdown, message)
    }

    /// A local handler failure
    pub fn handler(err: BoxedErr) -> Self {
        Self::new(ErrorKind::Handler, err.to_string()).with_cause(err)
    }

    /// The classification of this error
    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// The error's message, without the kind prefix
    pub fn message(&self) -> &str {
        &self.message
    }

    /// See [ErrorKind::is_retryable]
    pub fn is_retryable(&self) -> bool {
        self.kind.is_retryable()
    }

    /// Convert an error received from a remote peer into the error the local caller
    /// observes. Application failures are wrapped as [ErrorKind::RemoteThrown] since the
    /// remote's error type has no meaning in this address space; routing-level kinds
    /// keep their classification.
    pub fn from_remote(code: u32, message: String) -> Self {
        match ErrorKind::from_code(code) {
            Some(ErrorKind::Handler) | Some(ErrorKind::RemoteThrown) | None => {
                Self::remote_thrown(message)
            }
            Some(kind) => Self::new(kind, message),
        }
    }
}

impl std::error::Error for RelayErr {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match &self.cause {
            Some(inner) => Some(inner.as_ref()),
            None => None,
        }
    }
}

impl Display for RelayErr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if f.alternate() {
            if let Some(cause) = &self.cause {
                return write!(f, "{}: {} ({cause:#})", self.kind, self.message);
            }
        }
        write!(f, "{}: {}", self.kind, self.message)
    }
}

impl PartialEq for RelayErr {
    fn eq(&self, other: &Self) -> bool {
        self.kind == other.kind && self.message == other.message
    }
}

impl From<std::io::Error> for RelayErr {
    fn from(value: std::io::Error) -> Self {
        let message = value.to_string();
        Self::new(ErrorKind::Transport, message).with_cause(Box::new(value))
    }
}

impl From<crate::id::IdParseErr> for RelayErr {
    fn from(value: crate::id::IdParseErr) -> Self {
        Self::corrupt_envelope(value.to_string())
    }
}

impl From<crate::concurrency::Timeout> for RelayErr {
    fn from(_: crate::concurrency::Timeout) -> Self {
        Self::handler_timeout("no outcome arrived within the call timeout")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_codes_are_stable_and_unique() {
        let kinds = [
            ErrorKind::Routing,
            ErrorKind::InstanceNotFound,
            ErrorKind::DeadResource,
            ErrorKind::ResourceDestroyed,
            ErrorKind::HandlerTimeout,
            ErrorKind::RemoteThrown,
            ErrorKind::CorruptEnvelope,
            ErrorKind::Handler,
            ErrorKind::Configuration,
            ErrorKind::Shutdown,
            ErrorKind::Transport,
        ];
        let mut codes = kinds.iter().map(|k| k.code()).collect::<Vec<_>>();
        codes.sort_unstable();
        codes.dedup();
        assert_eq!(kinds.len(), codes.len());
        for kind in kinds {
            assert_eq!(Some(kind), ErrorKind::from_code(kind.code()));
        }
        assert_eq!(None, ErrorKind::from_code(0));
    }

    #[test]
    fn remote_handler_failures_become_remote_thrown() {
        let err = RelayErr::from_remote(ErrorKind::Handler.code(), "boom".to_string());
        assert_eq!(ErrorKind::RemoteThrown, err.kind());
        assert_eq!("boom", err.message());

        let err = RelayErr::from_remote(9999, "unknown".to_string());
        assert_eq!(ErrorKind::RemoteThrown, err.kind());

        let err = RelayErr::from_remote(ErrorKind::DeadResource.code(), "dead".to_string());
        assert_eq!(ErrorKind::DeadResource, err.kind());
    }

    #[test]
    fn only_corrupt_envelopes_and_transport_failures_retry() {
        assert!(RelayErr::corrupt_envelope("bad frame").is_retryable());
        assert!(!RelayErr::instance_not_found("gone").is_retryable());
        assert!(!RelayErr::handler_timeout("slow").is_retryable());
    }

    #[test]
    fn display_carries_kind_and_cause() {
        let io = std::io::Error::new(std::io::ErrorKind::ConnectionReset, "reset");
        let err = RelayErr::from(io);
        assert_eq!(ErrorKind::Transport, err.kind());
        assert_eq!("TransportError: reset", format!("{err}"));
        assert!(format!("{err:#}").contains("(reset)"));
        assert!(std::error::Error::source(&err).is_some());
    }
}
