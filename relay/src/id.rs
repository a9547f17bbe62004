// Copyright (c) Sean Lawlor
//
// This source code is licensed under both the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree.

//! Typed identifiers for the addressing model
//!
//! * [InstanceId]: one running process in the cluster
//! * [ApplicationId]: one logical application
//! * [NodeId]: the execution context for one application within one instance. Two
//!   [NodeId]s are equal iff both components are equal.
//! * [ResourceId]: one stateful unit of work. It embeds the [NodeId] of the node it was
//!   created on, so the hosting node can always be derived from the id.
//!
//! Compound ids have a canonical string form (`V1::I<uuid>:A<uuid>:R<uuid>`) and a
//! canonical byte form (a version byte followed by `(ordinal, 16 uuid bytes)` pairs)
//! which is what travels on the wire.

use std::fmt::Display;
use std::str::FromStr;

use uuid::Uuid;

const VERSION_BYTE: u8 = 1;
const VERSION_PREFIX: &str = "V1::";
const UUID_BYTES: usize = 16;
const FIELD_BYTES: usize = 1 + UUID_BYTES;

/// Error decoding an identifier from its string or byte form
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IdParseErr {
    /// The version prefix or byte is missing or unsupported
    UnsupportedVersion,
    /// A field is repeated, out of order, or unknown
    InvalidField(String),
    /// A required field is not present
    MissingField(&'static str),
    /// The uuid portion of a field failed to decode
    InvalidUuid(String),
    /// The byte encoding has the wrong length
    InvalidLength(usize),
}

impl std::error::Error for IdParseErr {}

impl Display for IdParseErr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::UnsupportedVersion => write!(f, "Unsupported identifier version"),
            Self::InvalidField(field) => write!(f, "Invalid identifier field '{field}'"),
            Self::MissingField(field) => write!(f, "Identifier is missing the {field} field"),
            Self::InvalidUuid(value) => write!(f, "Invalid uuid '{value}'"),
            Self::InvalidLength(len) => write!(f, "Invalid identifier length {len}"),
        }
    }
}

macro_rules! uuid_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(Uuid);

        impl $name {
            /// Generate a new random id
            pub fn random() -> Self {
                Self(Uuid::new_v4())
            }

            /// Wrap an existing uuid
            pub fn from_uuid(uuid: Uuid) -> Self {
                Self(uuid)
            }

            /// The underlying uuid
            pub fn as_uuid(&self) -> &Uuid {
                &self.0
            }

            /// The raw uuid bytes
            pub fn to_bytes(&self) -> [u8; UUID_BYTES] {
                *self.0.as_bytes()
            }

            /// Decode raw uuid bytes
            pub fn from_bytes(bytes: &[u8]) -> Result<Self, IdParseErr> {
                Uuid::from_slice(bytes)
                    .map(Self)
                    .map_err(|_| IdParseErr::InvalidLength(bytes.len()))
            }
        }

        impl Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl FromStr for $name {
            type Err = IdParseErr;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Uuid::parse_str(s)
                    .map(Self)
                    .map_err(|_| IdParseErr::InvalidUuid(s.to_string()))
            }
        }
    };
}

uuid_id!(
    /// Identifies one running process participating in the cluster
    InstanceId
);

uuid_id!(
    /// Identifies one logical application
    ApplicationId
);

/// The fields of a compound id, in their ordinal order
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum Field {
    Instance = 0,
    Application = 1,
    Resource = 2,
}

impl Field {
    fn code(self) -> char {
        match self {
            Self::Instance => 'I',
            Self::Application => 'A',
            Self::Resource => 'R',
        }
    }

    fn from_code(c: char) -> Option<Self> {
        match c {
            'I' => Some(Self::Instance),
            'A' => Some(Self::Application),
            'R' => Some(Self::Resource),
            _ => None,
        }
    }

    fn from_ordinal(ordinal: u8) -> Option<Self> {
        match ordinal {
            0 => Some(Self::Instance),
            1 => Some(Self::Application),
            2 => Some(Self::Resource),
            _ => None,
        }
    }
}

/// Decoded compound fields. Each field appears at most once and in ordinal order.
#[derive(Default)]
struct Compound {
    instance: Option<Uuid>,
    application: Option<Uuid>,
    resource: Option<Uuid>,
}

impl Compound {
    fn set(&mut self, field: Field, value: Uuid, last: &mut Option<Field>) -> Result<(), IdParseErr> {
        if let Some(previous) = last {
            if *previous >= field {
                return Err(IdParseErr::InvalidField(field.code().to_string()));
            }
        }
        *last = Some(field);
        match field {
            Field::Instance => self.instance = Some(value),
            Field::Application => self.application = Some(value),
            Field::Resource => self.resource = Some(value),
        }
        Ok(())
    }

    fn parse_str(s: &str) -> Result<Self, IdParseErr> {
        let body = s
            .strip_prefix(VERSION_PREFIX)
            .ok_or(IdParseErr::UnsupportedVersion)?;
        let mut compound = Self::default();
        let mut last = None;
        for part in body.split(':') {
            let mut chars = part.chars();
            let field = chars
                .next()
                .and_then(Field::from_code)
                .ok_or_else(|| IdParseErr::InvalidField(part.to_string()))?;
            let value = chars.as_str();
            let uuid =
                Uuid::parse_str(value).map_err(|_| IdParseErr::InvalidUuid(value.to_string()))?;
            compound.set(field, uuid, &mut last)?;
        }
        Ok(compound)
    }

    fn parse_bytes(bytes: &[u8]) -> Result<Self, IdParseErr> {
        match bytes.first() {
            Some(&VERSION_BYTE) => {}
            _ => return Err(IdParseErr::UnsupportedVersion),
        }
        let body = &bytes[1..];
        if body.is_empty() || body.len() % FIELD_BYTES != 0 {
            return Err(IdParseErr::InvalidLength(bytes.len()));
        }
        let mut compound = Self::default();
        let mut last = None;
        for chunk in body.chunks(FIELD_BYTES) {
            let field = Field::from_ordinal(chunk[0])
                .ok_or_else(|| IdParseErr::InvalidField(chunk[0].to_string()))?;
            let uuid = Uuid::from_slice(&chunk[1..])
                .map_err(|_| IdParseErr::InvalidLength(chunk.len()))?;
            compound.set(field, uuid, &mut last)?;
        }
        Ok(compound)
    }

    fn node_id(&self) -> Result<NodeId, IdParseErr> {
        let instance = self.instance.ok_or(IdParseErr::MissingField("instance"))?;
        let application = self
            .application
            .ok_or(IdParseErr::MissingField("application"))?;
        Ok(NodeId::new(
            InstanceId(instance),
            ApplicationId(application),
        ))
    }
}

fn write_field(buf: &mut Vec<u8>, field: Field, uuid: &Uuid) {
    buf.push(field as u8);
    buf.extend_from_slice(uuid.as_bytes());
}

/// Identifies the execution context of one application within one instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId {
    instance: InstanceId,
    application: ApplicationId,
}

impl NodeId {
    /// Derive the node id for an application hosted on an instance
    pub fn new(instance: InstanceId, application: ApplicationId) -> Self {
        Self {
            instance,
            application,
        }
    }

    /// The instance's master node, whose application id reuses the instance's uuid
    pub fn for_master(instance: InstanceId) -> Self {
        Self::new(instance, ApplicationId(instance.0))
    }

    /// The hosting instance
    pub fn instance_id(&self) -> InstanceId {
        self.instance
    }

    /// The hosted application
    pub fn application_id(&self) -> ApplicationId {
        self.application
    }

    /// Whether this is the master node of its instance
    pub fn is_master(&self) -> bool {
        self.instance.0 == self.application.0
    }

    /// The canonical byte encoding
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(1 + 2 * FIELD_BYTES);
        buf.push(VERSION_BYTE);
        write_field(&mut buf, Field::Instance, &self.instance.0);
        write_field(&mut buf, Field::Application, &self.application.0);
        buf
    }

    /// Decode the canonical byte encoding
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, IdParseErr> {
        let compound = Compound::parse_bytes(bytes)?;
        if compound.resource.is_some() {
            return Err(IdParseErr::InvalidField(Field::Resource.code().to_string()));
        }
        compound.node_id()
    }
}

impl Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{VERSION_PREFIX}I{}:A{}",
            self.instance.0, self.application.0
        )
    }
}

impl FromStr for NodeId {
    type Err = IdParseErr;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let compound = Compound::parse_str(s)?;
        if compound.resource.is_some() {
            return Err(IdParseErr::InvalidField(Field::Resource.code().to_string()));
        }
        compound.node_id()
    }
}

/// Identifies one stateful unit of work, hosted by exactly one node at a time
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResourceId {
    node: NodeId,
    resource: Uuid,
}

impl ResourceId {
    /// Allocate a new resource id on the given node
    pub fn new(node: NodeId) -> Self {
        Self {
            node,
            resource: Uuid::new_v4(),
        }
    }

    /// Build a resource id from its parts
    pub fn from_parts(node: NodeId, resource: Uuid) -> Self {
        Self { node, resource }
    }

    /// The node this resource was created on
    pub fn node_id(&self) -> NodeId {
        self.node
    }

    /// The resource-specific portion of the id
    pub fn resource_uuid(&self) -> &Uuid {
        &self.resource
    }

    /// The canonical byte encoding
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = self.node.to_bytes();
        buf.reserve(FIELD_BYTES);
        write_field(&mut buf, Field::Resource, &self.resource);
        buf
    }

    /// Decode the canonical byte encoding
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, IdParseErr> {
        let compound = Compound::parse_bytes(bytes)?;
        let resource = compound
            .resource
            .ok_or(IdParseErr::MissingField("resource"))?;
        Ok(Self {
            node: compound.node_id()?,
            resource,
        })
    }
}

impl Display for ResourceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:R{}", self.node, self.resource)
    }
}

impl FromStr for ResourceId {
    type Err = IdParseErr;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let compound = Compound::parse_str(s)?;
        let resource = compound
            .resource
            .ok_or(IdParseErr::MissingField("resource"))?;
        Ok(Self {
            node: compound.node_id()?,
            resource,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn node_ids_are_equal_iff_both_components_are() {
        let instance = InstanceId::random();
        let application = ApplicationId::random();
        assert_eq!(
            NodeId::new(instance, application),
            NodeId::new(instance, application)
        );
        assert_ne!(
            NodeId::new(instance, application),
            NodeId::new(instance, ApplicationId::random())
        );
        assert_ne!(
            NodeId::new(instance, application),
            NodeId::new(InstanceId::random(), application)
        );
    }

    #[test]
    fn master_node_reuses_the_instance_uuid() {
        let instance = InstanceId::random();
        let master = NodeId::for_master(instance);
        assert!(master.is_master());
        assert_eq!(instance.as_uuid(), master.application_id().as_uuid());
        assert!(!NodeId::new(instance, ApplicationId::random()).is_master());
    }

    #[test]
    fn string_form_parses_back() {
        let node = NodeId::new(InstanceId::random(), ApplicationId::random());
        let resource = ResourceId::new(node);

        let text = resource.to_string();
        assert!(text.starts_with("V1::I"));
        assert_eq!(resource, text.parse::<ResourceId>().unwrap());
        assert_eq!(node, node.to_string().parse::<NodeId>().unwrap());
        assert_eq!(resource.node_id(), node);
    }

    #[test]
    fn malformed_strings_are_rejected() {
        let node = NodeId::new(InstanceId::random(), ApplicationId::random());
        assert_eq!(
            Err(IdParseErr::UnsupportedVersion),
            "V2::I00000000-0000-0000-0000-000000000000".parse::<NodeId>()
        );
        assert!(matches!(
            format!("V1::A{}", node.application_id()).parse::<NodeId>(),
            Err(IdParseErr::MissingField("instance"))
        ));
        assert!(matches!(
            format!("V1::A{}:I{}", node.application_id(), node.instance_id()).parse::<NodeId>(),
            Err(IdParseErr::InvalidField(_))
        ));
        assert!(matches!(
            "V1::Inot-a-uuid".parse::<NodeId>(),
            Err(IdParseErr::InvalidUuid(_))
        ));
        assert!(matches!(
            node.to_string().parse::<ResourceId>(),
            Err(IdParseErr::MissingField("resource"))
        ));
    }

    #[test]
    fn byte_form_layout() {
        let node = NodeId::new(InstanceId::random(), ApplicationId::random());
        let bytes = node.to_bytes();
        assert_eq!(1 + 2 * FIELD_BYTES, bytes.len());
        assert_eq!(VERSION_BYTE, bytes[0]);
        assert_eq!(0, bytes[1]);
        assert_eq!(&bytes[2..18], node.instance_id().as_uuid().as_bytes());
        assert_eq!(1, bytes[18]);
        assert_eq!(node, NodeId::from_bytes(&bytes).unwrap());

        let resource = ResourceId::new(node);
        let bytes = resource.to_bytes();
        assert_eq!(2, bytes[1 + 2 * FIELD_BYTES]);
        assert_eq!(resource, ResourceId::from_bytes(&bytes).unwrap());
        assert!(NodeId::from_bytes(&bytes).is_err());
    }

    #[test]
    fn truncated_bytes_are_rejected() {
        let node = NodeId::new(InstanceId::random(), ApplicationId::random());
        let bytes = node.to_bytes();
        assert_eq!(
            Err(IdParseErr::InvalidLength(bytes.len() - 1)),
            NodeId::from_bytes(&bytes[..bytes.len() - 1])
        );
        assert_eq!(Err(IdParseErr::UnsupportedVersion), NodeId::from_bytes(&[]));
    }

    #[test]
    fn instance_ids_order_by_uuid_bytes() {
        let low = InstanceId::from_uuid(Uuid::from_u128(1));
        let high = InstanceId::from_uuid(Uuid::from_u128(2));
        assert!(low < high);
    }
}
