use std::{io, path::Path};

use chrono::Utc;
use tokio::io::AsyncRead;
use tracing::{instrument, warn};
use uuid::Uuid;

use super::Tree;
use crate::{
    context::RequestContext,
    errors::Error,
    metadata::{keys, Attributes, NodeLockGuard},
    node::{Node, NodeType},
};

impl Tree {
    /// Creates the placeholder of a new file node and binds it into its
    /// parent, after checking that `expected_size` bytes fit into the quota
    /// of the space.
    ///
    /// The returned guard holds the metadata lock of the node. Everything
    /// created is removed again if any step fails.
    #[instrument(skip_all, err, fields(space = %node.space_id, node.id = %node.id, name = %node.name))]
    pub async fn init_new_node(
        &self,
        ctx: &RequestContext,
        node: &Node,
        expected_size: u64,
    ) -> Result<NodeLockGuard, Error> {
        if node.exists {
            return Err(Error::AlreadyExists(node.name.clone()));
        }
        let Some(parent_path) = self.lookup.parent_path(node) else {
            return Err(Error::InvalidRequest("a new node needs a parent".into()));
        };
        if ctx.is_cancelled() {
            return Err(Error::Cancelled);
        }

        let path = node.internal_path();
        if let Some(dir) = path.parent() {
            tokio::fs::create_dir_all(dir).await?;
        }
        let guard = self.lookup.locks().lock(path).await;

        tokio::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(path)
            .await
            .map_err(|e| match e.kind() {
                io::ErrorKind::AlreadyExists => Error::AlreadyExists(node.name.clone()),
                _ => e.into(),
            })?;

        if let Err(e) = self.prepare_new_node(node, &parent_path, expected_size) {
            self.remove_orphan(node).await;
            return Err(e);
        }
        Ok(guard)
    }

    fn prepare_new_node(
        &self,
        node: &Node,
        parent_path: &Path,
        expected_size: u64,
    ) -> Result<(), Error> {
        let mut attrs = node.node_metadata();
        attrs
            .set_time(keys::MTIME, &Utc::now())
            .set_str(keys::STATUS, keys::PROCESSING_STATUS);
        self.lookup.set_attrs(node, &attrs)?;

        let root = self.lookup.node_from_space_id(&node.space_id)?;
        self.quota
            .check(&self.lookup, &root, false, 0, expected_size)?;

        self.bind_child(parent_path, node)
    }

    /// Stores the contents of `reader` as file `name` in `parent`. An
    /// existing file gets a new content revision instead.
    #[instrument(skip_all, err, fields(space = %parent.space_id, parent.id = %parent.id, name = name))]
    pub async fn upload(
        &self,
        ctx: &RequestContext,
        parent: &Node,
        name: &str,
        reader: &mut (dyn AsyncRead + Send + Unpin),
        expected_size: Option<u64>,
    ) -> Result<Node, Error> {
        Self::check_parent(parent)?;
        let mut node = self.lookup.child(parent, name)?;
        if node.exists {
            if !node.is_file() {
                return Err(Error::AlreadyExists(format!("{name} is not a file")));
            }
            return self.write_content(ctx, &node, reader).await;
        }

        node.node_type = NodeType::File;
        node.blob_id = Some(Uuid::new_v4().to_string());
        let guard = self
            .init_new_node(ctx, &node, expected_size.unwrap_or_default())
            .await?;

        let size = match self.blobstore.upload(&node, reader).await {
            Ok(size) if expected_size.is_some_and(|expected| expected != size) => {
                self.abort_new_node(parent, &node).await;
                return Err(Error::InvalidRequest(format!(
                    "expected {} bytes, got {size}",
                    expected_size.unwrap_or_default()
                )));
            }
            Ok(size) => size,
            Err(e) => {
                self.abort_new_node(parent, &node).await;
                return Err(e.into());
            }
        };
        node.blob_size = size;

        let mut attrs = Attributes::new();
        attrs.set_u64(keys::BLOB_SIZE, size);
        self.lookup.set_attrs(&node, &attrs)?;
        self.lookup.remove_attr(&node, keys::STATUS)?;
        node.exists = true;
        drop(guard);

        self.propagate(&node, size as i64).await;
        Ok(node)
    }

    /// Reverts [Tree::init_new_node] after a failed upload.
    async fn abort_new_node(&self, parent: &Node, node: &Node) {
        if let Err(e) = self
            .lookup
            .binding()
            .unbind(parent.internal_path(), &node.name)
        {
            warn!(err = %e, node.id = %node.id, "unable to unbind aborted upload");
        }
        self.lookup.invalidate(parent, &node.name);
        if let Err(e) = self.blobstore.delete(node).await {
            warn!(err = %e, node.id = %node.id, "unable to remove blob of aborted upload");
        }
        self.remove_orphan(node).await;
    }
}
