//! The tree orchestrates the on-disk mutations of nodes, delegates content
//! I/O to the [Blobstore] and keeps ancestor aggregates up to date through
//! the [Propagator].
use std::{io, path::PathBuf, sync::Arc};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use tokio::task::JoinSet;
use tracing::{debug, error, instrument, warn};

use crate::{
    binding::SymlinkBinding,
    blobstore::{BlobReader, Blobstore},
    context::RequestContext,
    errors::Error,
    idcache,
    ids::{validate_name, NodeId, SpaceId},
    layout::{self, format_time, Layout},
    lookup::Lookup,
    metadata::{keys, Attributes},
    node::{grants as node_grants, Node, NodeType},
    options::Options,
    propagator::{calculate_tree_size, Propagator, SyncPropagator},
    quota::{QuotaChecker, SpaceQuota},
};

mod grants;
mod locks;
pub mod recycle;
pub mod revisions;
mod upload;

pub use self::recycle::{PurgeOperation, RestoreOperation};
pub use self::revisions::Revision;

/// Options of [Tree::touch_file].
#[derive(Clone, Debug, Default)]
pub struct TouchOptions {
    /// On an existing node, only set the processing status instead of failing.
    pub mark_processing: bool,
    /// Modification time to record, defaults to now.
    pub mtime: Option<DateTime<Utc>>,
}

/// A soft deleted node, waiting to be restored or purged.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct TrashItem {
    pub space_id: SpaceId,
    /// Id of the node the trash index entry was created for.
    pub key: String,
    /// Path below the trashed node, empty for the trashed node itself.
    pub path: String,
    pub node_id: NodeId,
    /// Space relative path the node was deleted from.
    pub origin: String,
    pub deletion_time: DateTime<Utc>,
    pub node_type: NodeType,
    pub size: u64,
}

/// A node together with its derived metadata.
#[derive(Clone, Debug, Serialize)]
pub struct NodeInfo {
    pub id: NodeId,
    pub parent_id: Option<NodeId>,
    pub name: String,
    pub node_type: NodeType,
    /// Tree size for directories, blob size for files.
    pub size: u64,
    pub mtime: Option<DateTime<Utc>>,
    pub processing: bool,
}

/// Undo steps of a partially applied delete, executed in reverse.
enum Undo {
    RemoveOrigin(PathBuf),
    RemoveTrashLink(PathBuf),
    RenameBack { from: PathBuf, to: PathBuf },
    RenameMetadataBack { from: PathBuf, to: PathBuf },
}

pub struct Tree {
    lookup: Arc<Lookup>,
    blobstore: Arc<dyn Blobstore>,
    propagator: Arc<dyn Propagator>,
    quota: Arc<dyn QuotaChecker>,
    options: Options,
}

impl Tree {
    pub fn new(lookup: Arc<Lookup>, blobstore: Arc<dyn Blobstore>, options: Options) -> Self {
        Self {
            lookup,
            blobstore,
            propagator: Arc::new(SyncPropagator::new(&options)),
            quota: Arc::new(SpaceQuota),
            options,
        }
    }

    pub fn with_propagator(mut self, propagator: Arc<dyn Propagator>) -> Self {
        self.propagator = propagator;
        self
    }

    pub fn with_quota(mut self, quota: Arc<dyn QuotaChecker>) -> Self {
        self.quota = quota;
        self
    }

    /// Builds a tree with the metadata backend, symlink bindings and id cache
    /// configured in `options`, and prepares the storage root.
    pub async fn open(options: Options, blobstore: Arc<dyn Blobstore>) -> Result<Self, Error> {
        let options = options.validate()?;
        let lookup = Lookup::new(
            Layout::new(&options.root),
            options.metadata_backend.build(),
            Arc::new(SymlinkBinding),
            idcache::with_capacity(options.id_cache_capacity),
        );
        let tree = Self::new(Arc::new(lookup), blobstore, options);
        tree.setup().await?;
        Ok(tree)
    }

    /// Creates the top level directories of the storage root.
    pub async fn setup(&self) -> Result<(), Error> {
        let layout = self.lookup.layout();
        for dir in [layout.spaces_dir(), layout.indexes_dir(), layout.uploads_dir()] {
            tokio::fs::create_dir_all(dir).await?;
        }
        Ok(())
    }

    pub fn lookup(&self) -> &Arc<Lookup> {
        &self.lookup
    }

    pub fn blobstore(&self) -> &Arc<dyn Blobstore> {
        &self.blobstore
    }

    pub fn options(&self) -> &Options {
        &self.options
    }

    /// Runs propagation, logging instead of returning failures.
    pub(crate) async fn propagate(&self, node: &Node, size_diff: i64) {
        if let Err(e) = self
            .propagator
            .propagate(&self.lookup, node, size_diff)
            .await
        {
            warn!(err = %e, node.id = %node.id, size_diff, "propagation failed, aggregates may be stale");
        }
    }

    /// The size a node contributes to its parent. Directories without a
    /// tree size are recounted.
    pub(crate) fn node_size(&self, node: &Node) -> Result<u64, Error> {
        if !node.is_dir() {
            return Ok(node.blob_size);
        }
        match self.lookup.tree_size(node)? {
            Some(size) => Ok(size),
            None => calculate_tree_size(&self.lookup, node),
        }
    }

    pub fn node_info(&self, node: &Node) -> Result<NodeInfo, Error> {
        let attrs = self.lookup.attrs(node)?;
        let mtime = if node.is_dir() {
            attrs.tmtime().or_else(|| attrs.mtime())
        } else {
            attrs.mtime()
        };
        Ok(NodeInfo {
            id: node.id.clone(),
            parent_id: node.parent_id.clone(),
            name: node.name.clone(),
            node_type: node.node_type,
            size: node.size(&attrs),
            mtime: mtime.or_else(|| {
                std::fs::metadata(node.internal_path())
                    .and_then(|m| m.modified())
                    .ok()
                    .map(DateTime::<Utc>::from)
            }),
            processing: attrs.is_processing(),
        })
    }

    fn bind_child(&self, parent_path: &std::path::Path, node: &Node) -> Result<(), Error> {
        match self.lookup.binding().bind(parent_path, &node.name, &node.id) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                Err(Error::AlreadyExists(node.name.clone()))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Removes a node that was created but never became reachable.
    pub(crate) async fn remove_orphan(&self, node: &Node) {
        let path = node.internal_path();
        let res = if node.is_dir() {
            tokio::fs::remove_dir_all(path).await
        } else {
            tokio::fs::remove_file(path).await
        };
        if let Err(e) = res.and_then(|_| self.lookup.metadata().purge(path)) {
            error!(err = %e, node.id = %node.id, "unable to remove orphaned node");
        }
    }

    fn check_parent(parent: &Node) -> Result<(), Error> {
        if !parent.exists {
            return Err(Error::NotFound(format!("parent {}", parent.id)));
        }
        if !parent.is_dir() {
            return Err(Error::InvalidRequest(format!(
                "parent {} is not a directory",
                parent.id
            )));
        }
        Ok(())
    }

    /// Creates an empty file `name` in `parent`.
    #[instrument(skip_all, err, fields(space = %parent.space_id, parent.id = %parent.id, name = name))]
    pub async fn touch_file(
        &self,
        ctx: &RequestContext,
        parent: &Node,
        name: &str,
        opts: TouchOptions,
    ) -> Result<Node, Error> {
        Self::check_parent(parent)?;
        let mut node = self.lookup.child(parent, name)?;
        if node.exists {
            if opts.mark_processing {
                self.lookup
                    .set_attr(&node, keys::STATUS, keys::PROCESSING_STATUS)?;
                return Ok(node);
            }
            return Err(Error::AlreadyExists(name.to_string()));
        }
        if ctx.is_cancelled() {
            return Err(Error::Cancelled);
        }

        node.node_type = NodeType::File;
        let path = node.internal_path().to_owned();
        if let Some(dir) = path.parent() {
            tokio::fs::create_dir_all(dir).await?;
        }
        tokio::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .await
            .map_err(|e| match e.kind() {
                io::ErrorKind::AlreadyExists => Error::AlreadyExists(name.to_string()),
                _ => e.into(),
            })?;

        let mut attrs = node.node_metadata();
        attrs.set_time(keys::MTIME, &opts.mtime.unwrap_or_else(Utc::now));
        if opts.mark_processing {
            attrs.set_str(keys::STATUS, keys::PROCESSING_STATUS);
        }
        if let Err(e) = self
            .lookup
            .set_attrs(&node, &attrs)
            .and_then(|_| self.bind_child(parent.internal_path(), &node))
        {
            self.remove_orphan(&node).await;
            return Err(e);
        }
        node.exists = true;

        self.propagate(&node, 0).await;
        Ok(node)
    }

    /// Creates the directory `name` in `parent`.
    #[instrument(skip_all, err, fields(space = %parent.space_id, parent.id = %parent.id, name = name))]
    pub async fn create_dir(
        &self,
        ctx: &RequestContext,
        parent: &Node,
        name: &str,
    ) -> Result<Node, Error> {
        Self::check_parent(parent)?;
        let mut node = self.lookup.child(parent, name)?;
        if node.exists {
            return Err(Error::AlreadyExists(name.to_string()));
        }
        if ctx.is_cancelled() {
            return Err(Error::Cancelled);
        }

        node.node_type = NodeType::Container;
        let path = node.internal_path().to_owned();
        if let Some(dir) = path.parent() {
            tokio::fs::create_dir_all(dir).await?;
        }
        tokio::fs::create_dir(&path).await.map_err(|e| match e.kind() {
            io::ErrorKind::AlreadyExists => Error::AlreadyExists(name.to_string()),
            _ => e.into(),
        })?;

        let mut attrs = node.node_metadata();
        attrs
            .set_time(keys::MTIME, &Utc::now())
            .set_u64(keys::TREE_SIZE, 0);
        if self.options.propagation_enabled() {
            attrs.set_str(keys::PROPAGATION, "1");
        }
        if let Err(e) = self
            .lookup
            .set_attrs(&node, &attrs)
            .and_then(|_| self.bind_child(parent.internal_path(), &node))
        {
            self.remove_orphan(&node).await;
            return Err(e);
        }
        node.exists = true;

        self.propagate(&node, 0).await;
        Ok(node)
    }

    /// Moves `old` to the location described by `new`, which is usually the
    /// result of [Lookup::child] on the destination parent. An existing
    /// destination is removed first. Returns the moved node.
    #[instrument(skip_all, err, fields(space = %old.space_id, node.id = %old.id, from = %old.name, to = %new.name))]
    pub async fn move_node(
        &self,
        ctx: &RequestContext,
        old: &Node,
        new: &Node,
    ) -> Result<Node, Error> {
        if old.space_id != new.space_id {
            return Err(Error::NotSupported(
                "cross space move is not supported".into(),
            ));
        }
        let (Some(old_parent_path), Some(new_parent_path)) =
            (self.lookup.parent_path(old), self.lookup.parent_path(new))
        else {
            return Err(Error::NotSupported("cannot move a space root".into()));
        };

        let res = self.move_inner(ctx, old, new).await;

        // the old binding is gone or changed in any case
        self.lookup.id_cache().remove(&old_parent_path, &old.name);
        self.lookup.id_cache().remove(&new_parent_path, &new.name);
        res
    }

    async fn move_inner(
        &self,
        ctx: &RequestContext,
        old: &Node,
        new: &Node,
    ) -> Result<Node, Error> {
        validate_name(&new.name)?;
        if !old.exists {
            return Err(Error::NotFound(format!("node {}", old.id)));
        }
        if ctx.is_cancelled() {
            return Err(Error::Cancelled);
        }
        self.check_lock(ctx, old).await?;
        if new.exists && new.id == old.id {
            return Ok(old.clone());
        }

        let old_parent_id = old.parent_id.clone().unwrap_or_else(|| old.space_id.clone());
        let new_parent_id = new.parent_id.clone().unwrap_or_else(|| new.space_id.clone());

        if old.is_dir() {
            self.ensure_not_descendant(old, &new_parent_id)?;
        }

        let size = self.node_size(old)?;
        let mut removed = 0;
        if new.exists {
            self.check_lock(ctx, new).await?;
            removed = self.node_size(new)?;
            debug!(target.id = %new.id, "removing existing destination");
            self.remove_node(new.internal_path(), new).await?;
        }

        let layout = self.lookup.layout();
        let old_parent_path = layout.node_path(&old.space_id, &old_parent_id);
        let new_parent_path = layout.node_path(&new.space_id, &new_parent_id);
        self.lookup.binding().rebind(
            &old_parent_path,
            &old.name,
            &new_parent_path,
            &new.name,
        )?;
        self.lookup.id_cache().remove(&old_parent_path, &old.name);
        self.lookup.id_cache().remove(&new_parent_path, &new.name);

        let mut moved = old.clone();
        moved.name = new.name.clone();
        moved.parent_id = Some(new_parent_id.clone());

        if old_parent_id == new_parent_id {
            self.lookup.set_attr(&moved, keys::NAME, &new.name)?;
            self.propagate(&moved, -(removed as i64)).await;
            return Ok(moved);
        }

        let mut attrs = Attributes::new();
        attrs
            .set_str(keys::PARENT_ID, new_parent_id.as_str())
            .set_str(keys::NAME, &new.name);
        self.lookup.set_attrs(&moved, &attrs)?;

        self.propagate(old, -(size as i64)).await;
        self.propagate(&moved, size as i64 - removed as i64).await;
        Ok(moved)
    }

    /// Fails if `ancestor_id` or any of its ancestors is `node`.
    fn ensure_not_descendant(&self, node: &Node, ancestor_id: &NodeId) -> Result<(), Error> {
        let mut current = Some(ancestor_id.clone());
        while let Some(id) = current {
            if id == node.id {
                return Err(Error::InvalidRequest(format!(
                    "cannot move {} into its own subtree",
                    node.name
                )));
            }
            current = self.lookup.read_node(&node.space_id, &id)?.parent_id;
        }
        Ok(())
    }

    /// Moves `node` to the trash of its space.
    ///
    /// The node is renamed in place with its deletion time as suffix, linked
    /// into the trash index and unbound from its parent. If any step fails,
    /// the previous ones are undone before the error is returned.
    #[instrument(skip_all, err, fields(space = %node.space_id, node.id = %node.id, name = %node.name))]
    pub async fn delete(&self, ctx: &RequestContext, node: &Node) -> Result<TrashItem, Error> {
        if !node.exists {
            return Err(Error::NotFound(format!("node {}", node.id)));
        }
        let Some(parent_path) = self.lookup.parent_path(node) else {
            return Err(Error::NotSupported("cannot delete a space root".into()));
        };
        if ctx.is_cancelled() {
            return Err(Error::Cancelled);
        }
        self.check_lock(ctx, node).await?;

        let origin = self.lookup.path(node)?;
        let size = self.node_size(node)?;
        let node_path = node.internal_path().to_owned();
        let deletion_time = Utc::now();
        let time = format_time(&deletion_time);
        let trash_link = self
            .lookup
            .layout()
            .trash_link_path(&node.space_id, &node.id);
        let trashed = layout::trashed_path(&node_path, &time);

        let mut undo = Vec::new();
        let res = self
            .trash_steps(node, &parent_path, &origin, &time, &trash_link, &trashed, &mut undo)
            .await;
        if let Err(e) = res {
            self.undo(node, undo).await;
            return Err(e);
        }

        // a stale lock must not survive into the trash
        match tokio::fs::remove_file(layout::lock_file_path(&node_path)).await {
            Err(e) if e.kind() != io::ErrorKind::NotFound => {
                warn!(err = %e, node.id = %node.id, "unable to remove lock file of deleted node");
            }
            _ => {}
        }

        self.propagate(node, -(size as i64)).await;

        Ok(TrashItem {
            space_id: node.space_id.clone(),
            key: node.id.to_string(),
            path: String::new(),
            node_id: node.id.clone(),
            origin,
            deletion_time,
            node_type: node.node_type,
            size,
        })
    }

    #[allow(clippy::too_many_arguments)]
    async fn trash_steps(
        &self,
        node: &Node,
        parent_path: &std::path::Path,
        origin: &str,
        time: &str,
        trash_link: &std::path::Path,
        trashed: &std::path::Path,
        undo: &mut Vec<Undo>,
    ) -> Result<(), Error> {
        let node_path = node.internal_path();

        self.lookup.set_attr(node, keys::TRASH_ORIGIN, origin)?;
        undo.push(Undo::RemoveOrigin(node_path.to_owned()));

        if let Some(dir) = trash_link.parent() {
            tokio::fs::create_dir_all(dir).await?;
        }
        tokio::fs::symlink(layout::trash_link_target(&node.id, time), trash_link).await?;
        undo.push(Undo::RemoveTrashLink(trash_link.to_owned()));

        tokio::fs::rename(node_path, trashed).await?;
        undo.push(Undo::RenameBack {
            from: trashed.to_owned(),
            to: node_path.to_owned(),
        });

        self.lookup.metadata().rename(node_path, trashed)?;
        undo.push(Undo::RenameMetadataBack {
            from: trashed.to_owned(),
            to: node_path.to_owned(),
        });

        let res = self.lookup.binding().unbind(parent_path, &node.name);
        self.lookup.id_cache().remove(parent_path, &node.name);
        res?;
        Ok(())
    }

    async fn undo(&self, node: &Node, steps: Vec<Undo>) {
        for step in steps.into_iter().rev() {
            let res = match &step {
                Undo::RemoveOrigin(path) => self.lookup.metadata().remove(path, keys::TRASH_ORIGIN),
                Undo::RemoveTrashLink(path) => tokio::fs::remove_file(path).await,
                Undo::RenameBack { from, to } => tokio::fs::rename(from, to).await,
                Undo::RenameMetadataBack { from, to } => self.lookup.metadata().rename(from, to),
            };
            if let Err(e) = res {
                error!(err = %e, node.id = %node.id, "rollback of delete failed");
            }
        }
    }

    /// Removes the binding of `node` without trashing the node itself. Used
    /// when a share is removed rather than the owner's copy.
    #[instrument(skip_all, err, fields(space = %node.space_id, node.id = %node.id, name = %node.name))]
    pub async fn delete_shared_reference(
        &self,
        ctx: &RequestContext,
        node: &Node,
    ) -> Result<(), Error> {
        let Some(parent_path) = self.lookup.parent_path(node) else {
            return Err(Error::NotSupported("cannot unshare a space root".into()));
        };
        if ctx.is_cancelled() {
            return Err(Error::Cancelled);
        }
        let res = self.lookup.binding().unbind(&parent_path, &node.name);
        self.lookup.id_cache().remove(&parent_path, &node.name);
        Ok(res?)
    }

    /// Lists the children of `dir`, in no particular order.
    ///
    /// Children are read by a bounded set of blocking workers. The first
    /// failure stops all workers and is returned, no partial result is.
    /// Children explicitly denied to the request user are left out.
    #[instrument(skip_all, err, fields(space = %dir.space_id, node.id = %dir.id))]
    pub async fn list_folder(&self, ctx: &RequestContext, dir: &Node) -> Result<Vec<Node>, Error> {
        Self::check_parent(dir)?;

        let names = {
            let lookup = self.lookup.clone();
            let path = dir.internal_path().to_owned();
            tokio::task::spawn_blocking(move || lookup.binding().list(&path)).await??
        };
        if names.is_empty() {
            return Ok(Vec::new());
        }

        let workers = self.options.max_concurrency.clamp(1, names.len());
        let queue = Arc::new(Mutex::new(names.into_iter()));
        let stop = ctx.cancellation().child_token();

        let mut tasks = JoinSet::new();
        for _ in 0..workers {
            let queue = queue.clone();
            let stop = stop.clone();
            let lookup = self.lookup.clone();
            let dir = dir.clone();
            let user = ctx.user().cloned();

            tasks.spawn_blocking(move || -> Result<Vec<Node>, Error> {
                let mut out = Vec::new();
                while !stop.is_cancelled() {
                    let Some(name) = queue.lock().next() else {
                        break;
                    };
                    match read_child(&lookup, &dir, &name, user.as_ref()) {
                        Ok(Some(node)) => out.push(node),
                        Ok(None) => {}
                        Err(e) => {
                            stop.cancel();
                            return Err(e);
                        }
                    }
                }
                Ok(out)
            });
        }

        let mut children = Vec::new();
        while let Some(res) = tasks.join_next().await {
            match res {
                Ok(Ok(nodes)) => children.extend(nodes),
                Ok(Err(e)) => {
                    tasks.abort_all();
                    return Err(e);
                }
                Err(e) => {
                    stop.cancel();
                    tasks.abort_all();
                    return Err(e.into());
                }
            }
        }
        if ctx.is_cancelled() {
            return Err(Error::Cancelled);
        }
        Ok(children)
    }

    /// Opens the content of a file node. Nodes without content yield an
    /// empty reader.
    pub async fn read_blob(&self, node: &Node) -> Result<Box<dyn BlobReader>, Error> {
        Ok(self.blobstore.download(node).await?)
    }

    pub async fn delete_blob(&self, node: &Node) -> Result<(), Error> {
        if node.blob_id.is_none() {
            return Err(Error::InvalidRequest(format!(
                "node {} has no blob id",
                node.id
            )));
        }
        Ok(self.blobstore.delete(node).await?)
    }

    /// Physically removes a node: its location, metadata, blob and all of
    /// its content revisions.
    pub(crate) async fn remove_node(&self, path: &std::path::Path, node: &Node) -> Result<(), Error> {
        let res = match tokio::fs::symlink_metadata(path).await {
            Ok(m) if m.is_dir() => tokio::fs::remove_dir_all(path).await,
            Ok(_) => tokio::fs::remove_file(path).await,
            Err(e) => Err(e),
        };
        match res {
            Err(e) if e.kind() != io::ErrorKind::NotFound => return Err(e.into()),
            _ => {}
        }
        self.lookup.metadata().purge(path)?;

        if node.blob_id.is_some() {
            self.blobstore.delete(node).await?;
        }

        // revisions stay at the regular location, also for trashed nodes
        let regular = self.lookup.layout().node_path(&node.space_id, &node.id);
        for rev in self.revision_paths(&regular).await? {
            let blob_id = self.lookup.read_blob_id_attr(&rev)?;
            tokio::fs::remove_file(&rev).await?;
            self.lookup.metadata().purge(&rev)?;
            if let Some(blob_id) = blob_id {
                let mut rev_node = node.clone();
                rev_node.blob_id = Some(blob_id);
                self.blobstore.delete(&rev_node).await?;
            }
        }
        Ok(())
    }
}

/// Reads the child `name` of `dir`. Children that disappeared concurrently
/// and children denied to `user` yield None.
fn read_child(
    lookup: &Lookup,
    dir: &Node,
    name: &str,
    user: Option<&crate::context::User>,
) -> Result<Option<Node>, Error> {
    let Some(id) = lookup.resolve_child_id(dir.internal_path(), name)? else {
        return Ok(None);
    };
    let path = lookup.layout().node_path(&dir.space_id, &id);
    let attrs = match lookup.metadata().all(&path) {
        Ok(attrs) => attrs,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            debug!(%id, name, "child vanished while listing");
            return Ok(None);
        }
        Err(e) => return Err(Error::corrupt(&id, format!("unreadable metadata: {e}"))),
    };
    let node = lookup.node_from_attrs(&dir.space_id, &id, path, &attrs)?;
    if let Some(user) = user {
        if node_grants::is_denied(&attrs, user) {
            return Ok(None);
        }
    }
    Ok(Some(node))
}
