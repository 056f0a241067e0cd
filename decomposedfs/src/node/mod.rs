//! The node model: the atomic, id addressed unit of the tree.
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::{
    ids::{NodeId, SpaceId, ROOT_PARENT_ID},
    layout::{self, Layout},
    metadata::{keys, Attributes},
};

pub mod grants;
pub mod locks;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeType {
    #[default]
    Invalid,
    File,
    Container,
    Reference,
    Symlink,
}

impl NodeType {
    /// Value persisted in the type attribute.
    pub fn as_attr(self) -> &'static str {
        match self {
            NodeType::Invalid => "0",
            NodeType::File => "1",
            NodeType::Container => "2",
            NodeType::Reference => "3",
            NodeType::Symlink => "4",
        }
    }

    pub fn from_attr(value: &str) -> Option<Self> {
        Some(match value {
            "0" => NodeType::Invalid,
            "1" => NodeType::File,
            "2" => NodeType::Container,
            "3" => NodeType::Reference,
            "4" => NodeType::Symlink,
            _ => return None,
        })
    }
}

/// A node of a space.
///
/// `exists` is not persisted. It tells a node read from disk apart from one
/// that is about to be created.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Node {
    pub space_id: SpaceId,
    pub id: NodeId,
    /// None for the root of a space.
    pub parent_id: Option<NodeId>,
    pub name: String,
    pub node_type: NodeType,
    pub blob_id: Option<String>,
    pub blob_size: u64,
    pub exists: bool,

    internal_path: PathBuf,
}

impl Node {
    pub fn new(
        layout: &Layout,
        space_id: SpaceId,
        id: NodeId,
        parent_id: Option<NodeId>,
        name: impl Into<String>,
        node_type: NodeType,
    ) -> Self {
        let internal_path = layout.node_path(&space_id, &id);
        Self {
            space_id,
            id,
            parent_id,
            name: name.into(),
            node_type,
            blob_id: None,
            blob_size: 0,
            exists: false,
            internal_path,
        }
    }

    /// Points the node at a location other than its regular one, e.g. the
    /// trashed path of a deleted node.
    pub(crate) fn with_internal_path(mut self, path: PathBuf) -> Self {
        self.internal_path = path;
        self
    }

    /// Physical location of the node.
    pub fn internal_path(&self) -> &Path {
        &self.internal_path
    }

    pub fn is_dir(&self) -> bool {
        self.node_type == NodeType::Container
    }

    pub fn is_file(&self) -> bool {
        self.node_type == NodeType::File
    }

    pub fn is_space_root(&self) -> bool {
        self.id == self.space_id
    }

    pub fn lock_file_path(&self) -> PathBuf {
        layout::lock_file_path(&self.internal_path)
    }

    /// The fixed attribute set identifying the node inside the tree.
    pub fn node_metadata(&self) -> Attributes {
        let mut attrs = Attributes::new();
        attrs
            .set_str(
                keys::PARENT_ID,
                self.parent_id
                    .as_ref()
                    .map(NodeId::as_str)
                    .unwrap_or(ROOT_PARENT_ID),
            )
            .set_str(keys::NAME, &self.name)
            .set_str(keys::TYPE, self.node_type.as_attr());
        if self.node_type == NodeType::File {
            attrs
                .set_str(keys::BLOB_ID, self.blob_id.as_deref().unwrap_or_default())
                .set_u64(keys::BLOB_SIZE, self.blob_size);
        }
        attrs
    }

    /// The size this node contributes to its parent: the tree size for
    /// directories, the blob size otherwise.
    pub fn size(&self, attrs: &Attributes) -> u64 {
        if self.is_dir() {
            attrs.tree_size().unwrap_or_default()
        } else {
            self.blob_size
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{Node, NodeType};
    use crate::{ids::NodeId, layout::Layout, metadata::keys};

    #[test]
    fn type_attr_roundtrip() {
        for t in [
            NodeType::Invalid,
            NodeType::File,
            NodeType::Container,
            NodeType::Reference,
            NodeType::Symlink,
        ] {
            assert_eq!(Some(t), NodeType::from_attr(t.as_attr()));
        }
        assert_eq!(None, NodeType::from_attr("9"));
    }

    #[test]
    fn root_metadata_uses_sentinel_parent() {
        let layout = Layout::new("/data");
        let space = NodeId::try_from("space-0001").unwrap();
        let root = Node::new(&layout, space.clone(), space, None, "", NodeType::Container);

        assert!(root.is_space_root());
        let attrs = root.node_metadata();
        assert_eq!(Some("root"), attrs.get_str(keys::PARENT_ID));
        assert_eq!(Some("2"), attrs.get_str(keys::TYPE));
        assert!(!attrs.contains(keys::BLOB_ID));
    }

    #[test]
    fn file_metadata_carries_blob() {
        let layout = Layout::new("/data");
        let space = NodeId::try_from("space-0001").unwrap();
        let mut file = Node::new(
            &layout,
            space.clone(),
            NodeId::try_from("file-00001").unwrap(),
            Some(space),
            "a.txt",
            NodeType::File,
        );
        file.blob_id = Some("blob-1".into());
        file.blob_size = 100;

        let attrs = file.node_metadata();
        assert_eq!(Some("blob-1"), attrs.get_str(keys::BLOB_ID));
        assert_eq!(Some(100), attrs.blob_size());
        assert_eq!(100, file.size(&attrs));
    }
}
