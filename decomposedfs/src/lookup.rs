//! Translation between paths, references and physical node locations.
use std::{
    io,
    path::{Path, PathBuf},
    sync::Arc,
};

use tracing::{debug, instrument};

use crate::{
    binding::Binding,
    errors::Error,
    idcache::IdCache,
    ids::{validate_name, NodeId, Reference, ResourceId, SpaceId, ROOT_PARENT_ID},
    layout::Layout,
    metadata::{keys, AttributeStore, Attributes, NodeLocks},
    node::{Node, NodeType},
};

/// Refuse to walk up further than this, a longer chain means a parent cycle.
const MAX_DEPTH: usize = 4096;

pub struct Lookup {
    layout: Layout,
    metadata: Arc<dyn AttributeStore>,
    binding: Arc<dyn Binding>,
    id_cache: Arc<dyn IdCache>,
    locks: NodeLocks,
}

impl Lookup {
    pub fn new(
        layout: Layout,
        metadata: Arc<dyn AttributeStore>,
        binding: Arc<dyn Binding>,
        id_cache: Arc<dyn IdCache>,
    ) -> Self {
        Self {
            layout,
            metadata,
            binding,
            id_cache,
            locks: NodeLocks::default(),
        }
    }

    pub fn layout(&self) -> &Layout {
        &self.layout
    }

    pub fn metadata(&self) -> &dyn AttributeStore {
        self.metadata.as_ref()
    }

    pub fn binding(&self) -> &dyn Binding {
        self.binding.as_ref()
    }

    pub fn id_cache(&self) -> &dyn IdCache {
        self.id_cache.as_ref()
    }

    /// Metadata locks of the nodes handled by this instance.
    pub fn locks(&self) -> &NodeLocks {
        &self.locks
    }

    /// Reads the node `node_id` of space `space_id` from its regular location.
    pub fn read_node(&self, space_id: &SpaceId, node_id: &NodeId) -> Result<Node, Error> {
        let path = self.layout.node_path(space_id, node_id);
        self.read_node_at(space_id, node_id, path)
    }

    /// Reads a node from an explicit location, e.g. the trashed path of a
    /// deleted node.
    pub fn read_node_at(
        &self,
        space_id: &SpaceId,
        node_id: &NodeId,
        path: PathBuf,
    ) -> Result<Node, Error> {
        let attrs = match self.metadata.all(&path) {
            Ok(attrs) => attrs,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(Error::NotFound(format!("node {node_id}")))
            }
            Err(e) => return Err(Error::corrupt(node_id, format!("unreadable metadata: {e}"))),
        };
        self.node_from_attrs(space_id, node_id, path, &attrs)
    }

    pub(crate) fn node_from_attrs(
        &self,
        space_id: &SpaceId,
        node_id: &NodeId,
        path: PathBuf,
        attrs: &Attributes,
    ) -> Result<Node, Error> {
        let parent_id = match attrs.get_str(keys::PARENT_ID) {
            None => return Err(Error::corrupt(node_id, "missing parent id")),
            Some(ROOT_PARENT_ID) => None,
            Some(p) => Some(
                NodeId::try_from(p)
                    .map_err(|e| Error::corrupt(node_id, format!("invalid parent id: {e}")))?,
            ),
        };
        let name = attrs
            .get_str(keys::NAME)
            .ok_or_else(|| Error::corrupt(node_id, "missing name"))?;
        let node_type = match attrs.get_str(keys::TYPE).and_then(NodeType::from_attr) {
            Some(t) => t,
            None => type_from_filesystem(&path),
        };

        let mut node = Node::new(
            &self.layout,
            space_id.clone(),
            node_id.clone(),
            parent_id,
            name,
            node_type,
        )
        .with_internal_path(path);
        node.exists = true;

        if node_type == NodeType::File {
            node.blob_id = attrs
                .get_str(keys::BLOB_ID)
                .filter(|b| !b.is_empty())
                .map(str::to_string);
            node.blob_size = attrs.blob_size().unwrap_or_default();
        }
        Ok(node)
    }

    pub fn node_from_id(&self, id: &ResourceId) -> Result<Node, Error> {
        self.read_node(&id.space_id, &id.opaque_id)
    }

    /// Reads the root node of a space.
    pub fn node_from_space_id(&self, space_id: &SpaceId) -> Result<Node, Error> {
        let node = self.read_node(space_id, space_id)?;
        if !node.is_space_root() || node.parent_id.is_some() {
            return Err(Error::corrupt(space_id, "space root has a parent"));
        }
        Ok(node)
    }

    /// Resolves an id or path based reference. For path references the last
    /// segment may be unbound, the returned node then has `exists == false`.
    #[instrument(skip_all, err, fields(space = %r.resource_id.space_id, id = %r.resource_id.opaque_id, path = ?r.path))]
    pub fn node_from_resource(&self, r: &Reference) -> Result<Node, Error> {
        let start = self.node_from_id(&r.resource_id)?;
        match &r.path {
            None => Ok(start),
            Some(path) => self.walk_path(start, path),
        }
    }

    /// Walks `path` segment by segment, starting at `start`.
    pub fn walk_path(&self, start: Node, path: &str) -> Result<Node, Error> {
        let mut current = start;
        for segment in path.split('/').filter(|s| !s.is_empty() && *s != ".") {
            if !current.exists {
                return Err(Error::NotFound(format!(
                    "{} in path {path:?}",
                    current.name
                )));
            }
            if !current.is_dir() {
                return Err(Error::NotFound(format!(
                    "{} is not a directory in path {path:?}",
                    current.name
                )));
            }
            if segment == ".." {
                return Err(Error::InvalidRequest(format!(
                    "path must not contain '..': {path:?}"
                )));
            }
            current = self.child(&current, segment)?;
        }
        Ok(current)
    }

    /// Returns the child `name` of `parent`. An unbound name yields a node
    /// with a fresh id and `exists == false`, ready to be created.
    pub fn child(&self, parent: &Node, name: &str) -> Result<Node, Error> {
        validate_name(name)?;
        if !parent.exists {
            return Err(Error::NotFound(format!("parent of {name}")));
        }

        match self.resolve_child_id(parent.internal_path(), name)? {
            Some(id) => match self.read_node(&parent.space_id, &id) {
                Ok(node) => Ok(node),
                // the binding outlived the node, e.g. during a concurrent delete
                Err(e) if e.is_not_found() => {
                    debug!(%id, name, "dangling child binding");
                    Ok(Node::new(
                        &self.layout,
                        parent.space_id.clone(),
                        id,
                        Some(parent.id.clone()),
                        name,
                        NodeType::Invalid,
                    ))
                }
                Err(e) => Err(e),
            },
            None => Ok(Node::new(
                &self.layout,
                parent.space_id.clone(),
                NodeId::new_random(),
                Some(parent.id.clone()),
                name,
                NodeType::Invalid,
            )),
        }
    }

    /// Resolves the id bound to `name` inside the node at `parent_path`,
    /// consulting the id cache first.
    pub fn resolve_child_id(&self, parent_path: &Path, name: &str) -> Result<Option<NodeId>, Error> {
        if let Some(id) = self.id_cache.get(parent_path, name) {
            return Ok(Some(id));
        }
        let id = self.binding.resolve(parent_path, name)?;
        if let Some(id) = &id {
            self.id_cache.set(parent_path, name, id.clone());
        }
        Ok(id)
    }

    /// Removes the cached resolution of the binding `name` of `parent`.
    pub fn invalidate(&self, parent: &Node, name: &str) {
        self.id_cache.remove(parent.internal_path(), name);
    }

    /// Physical location of the parent node.
    pub fn parent_path(&self, node: &Node) -> Option<PathBuf> {
        node.parent_id
            .as_ref()
            .map(|p| self.layout.node_path(&node.space_id, p))
    }

    pub fn parent(&self, node: &Node) -> Result<Option<Node>, Error> {
        match &node.parent_id {
            None => Ok(None),
            Some(parent_id) => self.read_node(&node.space_id, parent_id).map(Some),
        }
    }

    /// Reconstructs the space relative path of `node` by walking up its parent
    /// links. Fails with [Error::NotFound] if any ancestor is missing.
    pub fn path(&self, node: &Node) -> Result<String, Error> {
        let mut segments = Vec::new();
        let mut current = node.clone();
        while let Some(parent_id) = current.parent_id.clone() {
            if segments.len() >= MAX_DEPTH {
                return Err(Error::corrupt(&node.id, "parent chain too deep"));
            }
            segments.push(std::mem::take(&mut current.name));
            current = self
                .read_node(&node.space_id, &parent_id)
                .map_err(|e| match e {
                    Error::NotFound(_) => {
                        Error::NotFound(format!("broken ancestor link {parent_id} of {}", node.id))
                    }
                    e => e,
                })?;
        }
        segments.reverse();
        Ok(format!("/{}", segments.join("/")))
    }

    /// The type of whatever lives at `path`, from its attributes or, if
    /// unset, from the filesystem.
    pub fn type_from_path(&self, path: &Path) -> NodeType {
        match self.metadata.get(path, keys::TYPE) {
            Ok(Some(v)) => std::str::from_utf8(&v)
                .ok()
                .and_then(NodeType::from_attr)
                .unwrap_or_else(|| type_from_filesystem(path)),
            _ => type_from_filesystem(path),
        }
    }

    pub fn attrs(&self, node: &Node) -> Result<Attributes, Error> {
        Ok(self.metadata.all(node.internal_path())?)
    }

    /// Writes a batch of attributes of the node.
    pub fn set_attrs(&self, node: &Node, attrs: &Attributes) -> Result<(), Error> {
        Ok(self.metadata.set_multiple(node.internal_path(), attrs)?)
    }

    pub fn set_attr(&self, node: &Node, key: &str, value: impl AsRef<[u8]>) -> Result<(), Error> {
        Ok(self
            .metadata
            .set(node.internal_path(), key, value.as_ref())?)
    }

    pub fn remove_attr(&self, node: &Node, key: &str) -> Result<(), Error> {
        Ok(self.metadata.remove(node.internal_path(), key)?)
    }

    /// The tree size of a directory, None if unset.
    pub fn tree_size(&self, node: &Node) -> Result<Option<u64>, Error> {
        Ok(self.attrs(node)?.tree_size())
    }

    /// Reads the blob id attribute stored at `path`.
    pub fn read_blob_id_attr(&self, path: &Path) -> Result<Option<String>, Error> {
        Ok(self
            .metadata
            .get(path, keys::BLOB_ID)?
            .and_then(|v| String::from_utf8(v).ok())
            .filter(|b| !b.is_empty()))
    }

    pub fn read_blob_size_attr(&self, path: &Path) -> Result<u64, Error> {
        Ok(self
            .metadata
            .get(path, keys::BLOB_SIZE)?
            .and_then(|v| String::from_utf8(v).ok())
            .and_then(|s| s.parse().ok())
            .unwrap_or_default())
    }
}

fn type_from_filesystem(path: &Path) -> NodeType {
    match std::fs::symlink_metadata(path) {
        Ok(m) if m.is_dir() => NodeType::Container,
        Ok(m) if m.is_symlink() => NodeType::Symlink,
        Ok(m) if m.is_file() => NodeType::File,
        _ => NodeType::Invalid,
    }
}
