//! The trash of a space: listing, restoring and purging deleted nodes.
//!
//! A deleted node keeps its place in the nodes directory, renamed with its
//! deletion time as suffix. The trash index of the space holds one link per
//! deleted node, keyed by the node id. Descendants of a deleted directory
//! stay bound inside it and are addressed by a path below the trash key.
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use tracing::{debug, instrument, warn};
use walkdir::WalkDir;

use super::{Tree, TrashItem};
use crate::{
    context::RequestContext,
    errors::Error,
    ids::{NodeId, SpaceId},
    layout::{self, parse_time},
    lookup::Lookup,
    metadata::{keys, Attributes},
    node::Node,
};

/// A trash item resolved to its current location.
struct RecycleEntry {
    /// The item, pointing at its location inside the trash.
    node: Node,
    trash_link: PathBuf,
    deletion_time: DateTime<Utc>,
    origin: String,
    /// Path below the trashed node, empty for the trashed node itself.
    path: String,
    /// Binding of a nested item inside its trashed parent.
    nested: Option<NestedBinding>,
}

/// Where a nested trash item is bound: inside its parent, which is either
/// trashed itself or a descendant of a trashed directory.
struct NestedBinding {
    /// Current location of the parent.
    parent_path: PathBuf,
    /// Regular location of the parent. Id cache entries written before the
    /// delete are keyed by it.
    regular_parent_path: PathBuf,
    name: String,
    /// Directories between the trashed top and the item, top first.
    ancestors: Vec<Node>,
}

impl NestedBinding {
    /// Detaches the item from the trashed tree and takes `size` off the tree
    /// sizes of its trashed ancestors.
    async fn unbind(&self, lookup: &Lookup, size: u64) -> Result<(), Error> {
        let res = lookup.binding().unbind(&self.parent_path, &self.name);
        lookup.id_cache().remove(&self.parent_path, &self.name);
        lookup.id_cache().remove(&self.regular_parent_path, &self.name);
        res?;

        if size == 0 {
            return Ok(());
        }
        for ancestor in &self.ancestors {
            let _guard = lookup.locks().lock(ancestor.internal_path()).await;
            if let Some(tree_size) = lookup.tree_size(ancestor)? {
                lookup.set_attr(
                    ancestor,
                    keys::TREE_SIZE,
                    tree_size.saturating_sub(size).to_string(),
                )?;
            }
        }
        Ok(())
    }
}

impl RecycleEntry {
    fn to_trash_item(&self, key: &str, size: u64) -> TrashItem {
        TrashItem {
            space_id: self.node.space_id.clone(),
            key: key.to_string(),
            path: self.path.clone(),
            node_id: self.node.id.clone(),
            origin: self.origin.clone(),
            deletion_time: self.deletion_time,
            node_type: self.node.node_type,
            size,
        }
    }
}

fn normalize_path(path: &str) -> Result<String, Error> {
    let mut segments = Vec::new();
    for segment in path.split('/').filter(|s| !s.is_empty() && *s != ".") {
        if segment == ".." {
            return Err(Error::InvalidRequest(format!(
                "path must not contain '..': {path:?}"
            )));
        }
        segments.push(segment);
    }
    if segments.is_empty() {
        return Ok(String::new());
    }
    Ok(format!("/{}", segments.join("/")))
}

/// Restores a trash item once [RestoreOperation::run] is called.
///
/// Created by [Tree::restore_recycle_item_func], which resolves item and
/// target so callers can authorize against both before anything changes.
pub struct RestoreOperation<'t> {
    tree: &'t Tree,
    /// The item to restore, at its location inside the trash.
    pub node: Node,
    /// The directory the item is restored into.
    pub parent: Node,
    target: Node,
    entry: RecycleEntry,
    size: u64,
}

/// Purges a trash item once [PurgeOperation::run] is called.
pub struct PurgeOperation<'t> {
    tree: &'t Tree,
    /// The item to purge, at its location inside the trash.
    pub node: Node,
    entry: RecycleEntry,
}

impl Tree {
    fn read_recycle_entry(
        &self,
        space_id: &SpaceId,
        key: &str,
        path: &str,
    ) -> Result<RecycleEntry, Error> {
        let key_id = NodeId::try_from(key)?;
        let path = normalize_path(path)?;
        let layout = self.lookup.layout();

        let trash_link = layout.trash_link_path(space_id, &key_id);
        let target = match std::fs::read_link(&trash_link) {
            Ok(target) => target,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(Error::NotFound(format!("trash item {key}")))
            }
            Err(e) => return Err(e.into()),
        };
        let target = target.to_string_lossy();
        let (node_id, time) = layout::parse_trash_link_target(&target)
            .ok_or_else(|| Error::corrupt(key, format!("invalid trash link {target:?}")))?;
        let deletion_time = parse_time(&time)
            .ok_or_else(|| Error::corrupt(key, format!("invalid deletion time {time:?}")))?;

        let trashed = layout::trashed_path(&layout.node_path(space_id, &node_id), &time);
        let top = self.lookup.read_node_at(space_id, &node_id, trashed)?;
        let top_origin = self
            .lookup
            .metadata()
            .get(top.internal_path(), keys::TRASH_ORIGIN)?
            .and_then(|v| String::from_utf8(v).ok())
            .unwrap_or_else(|| format!("/{}", top.name));

        let mut node = top;
        let mut nested: Option<NestedBinding> = None;
        let mut ancestors = Vec::new();
        for segment in path.split('/').filter(|s| !s.is_empty()) {
            if !node.is_dir() {
                return Err(Error::NotFound(format!("{path} in trash item {key}")));
            }
            let Some(child_id) = self.lookup.binding().resolve(node.internal_path(), segment)? else {
                return Err(Error::NotFound(format!("{path} in trash item {key}")));
            };
            let binding = NestedBinding {
                parent_path: node.internal_path().to_owned(),
                regular_parent_path: layout.node_path(space_id, &node.id),
                name: segment.to_string(),
                ancestors: Vec::new(),
            };
            ancestors.push(node);
            node = self.lookup.read_node(space_id, &child_id)?;
            nested = Some(binding);
        }
        if let Some(binding) = nested.as_mut() {
            binding.ancestors = ancestors;
        }

        Ok(RecycleEntry {
            node,
            trash_link,
            deletion_time,
            origin: format!("{}{}", top_origin.trim_end_matches('/'), path),
            path,
            nested,
        })
    }

    /// Reads the trash item `key`, or the item at `path` below it.
    pub async fn read_recycle_item(
        &self,
        _ctx: &RequestContext,
        space_id: &SpaceId,
        key: &str,
        path: &str,
    ) -> Result<TrashItem, Error> {
        let entry = self.read_recycle_entry(space_id, key, path)?;
        let size = self.node_size(&entry.node)?;
        Ok(entry.to_trash_item(key, size))
    }

    /// Lists the trash of a space. Without `key` all deleted nodes are
    /// returned; with `key` the children of the trashed directory at
    /// `path` below it.
    #[instrument(skip_all, err, fields(space = %space_id, key = ?key, path = path))]
    pub async fn list_recycle(
        &self,
        ctx: &RequestContext,
        space_id: &SpaceId,
        key: Option<&str>,
        path: &str,
    ) -> Result<Vec<TrashItem>, Error> {
        let Some(key) = key else {
            return self.list_trash_index(ctx, space_id).await;
        };

        let entry = self.read_recycle_entry(space_id, key, path)?;
        if !entry.node.is_dir() {
            let size = self.node_size(&entry.node)?;
            return Ok(vec![entry.to_trash_item(key, size)]);
        }

        let mut items = Vec::new();
        for name in self.lookup.binding().list(entry.node.internal_path())? {
            let child_path = format!("{}/{name}", entry.path);
            match self.read_recycle_item(ctx, space_id, key, &child_path).await {
                Ok(item) => items.push(item),
                Err(e) => warn!(err = %e, key, path = child_path, "skipping unreadable trash item"),
            }
        }
        Ok(items)
    }

    async fn list_trash_index(
        &self,
        ctx: &RequestContext,
        space_id: &SpaceId,
    ) -> Result<Vec<TrashItem>, Error> {
        let trash_dir = self.lookup.layout().trash_dir(space_id);
        let keys = tokio::task::spawn_blocking(move || -> Vec<String> {
            if !trash_dir.exists() {
                return Vec::new();
            }
            WalkDir::new(&trash_dir)
                .min_depth(1)
                .into_iter()
                .filter_map(|entry| match entry {
                    Ok(entry) => Some(entry),
                    Err(e) => {
                        warn!(err = %e, "unable to walk trash");
                        None
                    }
                })
                .filter(|entry| entry.path_is_symlink())
                .filter_map(|entry| {
                    entry
                        .path()
                        .strip_prefix(&trash_dir)
                        .ok()
                        .map(|p| p.to_string_lossy().replace('/', ""))
                })
                .collect()
        })
        .await?;

        let mut items = Vec::with_capacity(keys.len());
        for key in keys {
            match self.read_recycle_item(ctx, space_id, &key, "").await {
                Ok(item) => items.push(item),
                Err(e) => warn!(err = %e, key, "skipping unreadable trash item"),
            }
        }
        items.sort_by(|a, b| b.deletion_time.cmp(&a.deletion_time));
        Ok(items)
    }

    /// Prepares restoring the trash item `key` (or the item at `path`
    /// below it) to `target`. Without target the item goes back to where
    /// it was deleted from, which requires all ancestors to still exist.
    ///
    /// The target must not exist, so it cannot hold a lock of its own. The
    /// lock checked is the one of the directory the item is restored into.
    #[instrument(skip_all, err, fields(space = %space_id, key = key, path = path))]
    pub async fn restore_recycle_item_func(
        &self,
        ctx: &RequestContext,
        space_id: &SpaceId,
        key: &str,
        path: &str,
        target: Option<Node>,
    ) -> Result<RestoreOperation<'_>, Error> {
        let entry = self.read_recycle_entry(space_id, key, path)?;

        let target = match target {
            Some(target) => target,
            None => {
                let root = self.lookup.node_from_space_id(space_id)?;
                self.lookup.walk_path(root, &entry.origin)?
            }
        };
        if target.space_id != *space_id {
            return Err(Error::NotSupported(
                "cannot restore into another space".into(),
            ));
        }
        if target.exists {
            return Err(Error::AlreadyExists(format!(
                "restore target {}",
                target.name
            )));
        }
        let parent = self
            .lookup
            .parent(&target)?
            .ok_or_else(|| Error::InvalidRequest("cannot restore onto a space root".into()))?;
        self.check_lock(ctx, &parent).await?;

        let size = self.node_size(&entry.node)?;
        Ok(RestoreOperation {
            tree: self,
            node: entry.node.clone(),
            parent,
            target,
            entry,
            size,
        })
    }

    /// Prepares permanently removing the trash item `key` (or the item at
    /// `path` below it) with all of its descendants, revisions and blobs.
    #[instrument(skip_all, err, fields(space = %space_id, key = key, path = path))]
    pub async fn purge_recycle_item_func(
        &self,
        _ctx: &RequestContext,
        space_id: &SpaceId,
        key: &str,
        path: &str,
    ) -> Result<PurgeOperation<'_>, Error> {
        let entry = self.read_recycle_entry(space_id, key, path)?;
        Ok(PurgeOperation {
            tree: self,
            node: entry.node.clone(),
            entry,
        })
    }

    /// Restores a trash item to where it was deleted from.
    pub async fn restore_recycle_item(
        &self,
        ctx: &RequestContext,
        space_id: &SpaceId,
        key: &str,
        path: &str,
    ) -> Result<Node, Error> {
        self.restore_recycle_item_func(ctx, space_id, key, path, None)
            .await?
            .run()
            .await
    }

    pub async fn purge_recycle_item(
        &self,
        ctx: &RequestContext,
        space_id: &SpaceId,
        key: &str,
        path: &str,
    ) -> Result<(), Error> {
        self.purge_recycle_item_func(ctx, space_id, key, path)
            .await?
            .run()
            .await
    }

    /// All existing descendants of `node`, children before their parents.
    fn descendants_post_order(&self, node: &Node) -> Result<Vec<Node>, Error> {
        let mut pre_order = Vec::new();
        let mut stack = vec![node.clone()];
        while let Some(current) = stack.pop() {
            if current.is_dir() {
                for name in self.lookup.binding().list(current.internal_path())? {
                    let Some(id) = self.lookup.binding().resolve(current.internal_path(), &name)? else {
                        continue;
                    };
                    match self.lookup.read_node(&current.space_id, &id) {
                        Ok(child) => stack.push(child),
                        Err(e) if e.is_not_found() => {
                            debug!(%id, name, "skipping dangling child");
                        }
                        Err(e) => return Err(e),
                    }
                }
            }
            pre_order.push(current);
        }
        pre_order.reverse();
        Ok(pre_order)
    }
}

impl RestoreOperation<'_> {
    /// Runs the restore, returning the restored node at its new location.
    #[instrument(skip_all, err, fields(space = %self.node.space_id, node.id = %self.node.id, target = %self.target.name))]
    pub async fn run(self) -> Result<Node, Error> {
        let tree = self.tree;
        let lookup = &tree.lookup;
        let regular = lookup
            .layout()
            .node_path(&self.node.space_id, &self.node.id);

        let mut restored = self.node.clone().with_internal_path(regular.clone());
        restored.name = self.target.name.clone();
        restored.parent_id = Some(self.parent.id.clone());

        tree.bind_child(self.parent.internal_path(), &restored)?;
        lookup.invalidate(&self.parent, &restored.name);

        match &self.entry.nested {
            Some(binding) => binding.unbind(lookup, self.size).await?,
            None => {
                if let Err(e) = self.move_back(&regular).await {
                    if let Err(e) = lookup
                        .binding()
                        .unbind(self.parent.internal_path(), &restored.name)
                    {
                        warn!(err = %e, "unable to undo binding of failed restore");
                    }
                    lookup.invalidate(&self.parent, &restored.name);
                    return Err(e);
                }
            }
        }

        let mut attrs = Attributes::new();
        attrs
            .set_str(keys::NAME, &restored.name)
            .set_str(keys::PARENT_ID, self.parent.id.as_str());
        lookup.set_attrs(&restored, &attrs)?;
        lookup.remove_attr(&restored, keys::TRASH_ORIGIN)?;

        if self.entry.nested.is_none() {
            remove_trash_link(&self.entry.trash_link).await?;
        }

        tree.propagate(&restored, self.size as i64).await;
        Ok(restored)
    }

    async fn move_back(&self, regular: &Path) -> Result<(), Error> {
        let trashed = self.node.internal_path();
        tokio::fs::rename(trashed, regular).await?;
        if let Err(e) = self.tree.lookup.metadata().rename(trashed, regular) {
            if let Err(e) = tokio::fs::rename(regular, trashed).await {
                warn!(err = %e, "unable to undo rename of failed restore");
            }
            return Err(e.into());
        }
        Ok(())
    }
}

impl PurgeOperation<'_> {
    /// Runs the purge. Removed data cannot be recovered.
    #[instrument(skip_all, err, fields(space = %self.node.space_id, node.id = %self.node.id))]
    pub async fn run(self) -> Result<(), Error> {
        let tree = self.tree;
        let size = tree.node_size(&self.node)?;
        for node in tree.descendants_post_order(&self.node)? {
            tree.remove_node(node.internal_path(), &node).await?;
        }

        match &self.entry.nested {
            Some(binding) => binding.unbind(&tree.lookup, size).await?,
            None => remove_trash_link(&self.entry.trash_link).await?,
        }
        Ok(())
    }
}

async fn remove_trash_link(path: &Path) -> Result<(), Error> {
    match tokio::fs::remove_file(path).await {
        Err(e) if e.kind() != std::io::ErrorKind::NotFound => Err(e.into()),
        _ => Ok(()),
    }
}
