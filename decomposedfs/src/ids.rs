use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Identifiers shorter than this cannot be split into the four two-character
/// shards of the node layout plus a remainder.
pub const MIN_ID_LEN: usize = 9;

/// Parent id persisted on space roots.
pub const ROOT_PARENT_ID: &str = "root";

#[derive(Debug, Error, PartialEq)]
pub enum Error {
    #[error("identifier {0:?} is shorter than {MIN_ID_LEN} characters")]
    TooShort(String),

    #[error("invalid character {1:?} in identifier {0:?}")]
    InvalidChar(String, char),

    #[error("invalid name {0:?}")]
    InvalidName(String),
}

/// Opaque, immutable identifier of a node.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct NodeId(String);

/// Spaces are identified by the id of their root node.
pub type SpaceId = NodeId;

impl NodeId {
    pub fn new_random() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for NodeId {
    type Error = Error;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        if value.len() < MIN_ID_LEN {
            return Err(Error::TooShort(value));
        }
        if let Some(c) = value
            .chars()
            .find(|c| !(c.is_ascii_alphanumeric() || *c == '-' || *c == '_'))
        {
            return Err(Error::InvalidChar(value, c));
        }
        Ok(Self(value))
    }
}

impl TryFrom<&str> for NodeId {
    type Error = Error;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        value.to_string().try_into()
    }
}

impl FromStr for NodeId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.try_into()
    }
}

impl From<NodeId> for String {
    fn from(value: NodeId) -> Self {
        value.0
    }
}

impl AsRef<str> for NodeId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NodeId({})", self.0)
    }
}

/// Checks a single path component used as a child name.
pub fn validate_name(name: &str) -> Result<(), Error> {
    if name.is_empty() || name == "." || name == ".." || name.contains(['/', '\0']) {
        return Err(Error::InvalidName(name.to_string()));
    }
    Ok(())
}

/// Addresses a node by the space it lives in and its opaque id.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ResourceId {
    pub space_id: SpaceId,
    pub opaque_id: NodeId,
}

impl ResourceId {
    pub fn new(space_id: SpaceId, opaque_id: NodeId) -> Self {
        Self {
            space_id,
            opaque_id,
        }
    }

    /// The root node of the given space.
    pub fn space_root(space_id: SpaceId) -> Self {
        Self {
            opaque_id: space_id.clone(),
            space_id,
        }
    }
}

/// A reference is either id based (no path), or a path relative to the node
/// the resource id points to.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reference {
    pub resource_id: ResourceId,
    pub path: Option<String>,
}

impl Reference {
    pub fn by_id(resource_id: ResourceId) -> Self {
        Self {
            resource_id,
            path: None,
        }
    }

    pub fn with_path(resource_id: ResourceId, path: impl Into<String>) -> Self {
        Self {
            resource_id,
            path: Some(path.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::{validate_name, Error, NodeId};

    #[rstest]
    #[case::uuid("7f1ab7e4-5b1e-4e0b-9a0e-2c5d9f3e2b11", true)]
    #[case::underscore("user_einstein", true)]
    #[case::short("abcd", false)]
    #[case::dot("abcdefgh.T.x", false)]
    #[case::slash("abcd/efghij", false)]
    #[case::empty("", false)]
    fn parse_node_id(#[case] input: &str, #[case] valid: bool) {
        assert_eq!(valid, NodeId::try_from(input).is_ok(), "{input}");
    }

    #[test]
    fn random_ids_are_valid_and_distinct() {
        let a = NodeId::new_random();
        let b = NodeId::new_random();
        assert_ne!(a, b);
        assert_eq!(Ok(a.clone()), NodeId::try_from(a.as_str()));
    }

    #[test]
    fn serde_validates() {
        assert!(serde_json::from_str::<NodeId>("\"short\"").is_err());
        let id: NodeId = serde_json::from_str("\"abcdefghijk\"").unwrap();
        assert_eq!("abcdefghijk", id.as_str());
    }

    #[rstest]
    #[case::plain("a.txt", true)]
    #[case::dot(".", false)]
    #[case::dotdot("..", false)]
    #[case::slash("a/b", false)]
    #[case::empty("", false)]
    #[case::hidden(".hidden", true)]
    fn names(#[case] name: &str, #[case] valid: bool) {
        assert_eq!(valid, validate_name(name).is_ok());
        if !valid {
            assert_eq!(Err(Error::InvalidName(name.into())), validate_name(name));
        }
    }
}
