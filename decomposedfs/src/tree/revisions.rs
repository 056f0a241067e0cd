//! Content revisions of file nodes.
//!
//! Overwriting a file keeps the previous content as a revision: an empty
//! file next to the node, named after the node with the revision delimiter
//! and the modification time of the replaced content, carrying its blob
//! attributes.
use std::{
    io,
    path::{Path, PathBuf},
};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::io::AsyncRead;
use tracing::{debug, instrument, warn};
use uuid::Uuid;

use super::Tree;
use crate::{
    blobstore::BlobReader,
    context::RequestContext,
    errors::Error,
    layout::{self, format_time, parse_time, REVISION_DELIMITER},
    metadata::{keys, Attributes},
    node::Node,
};

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Revision {
    /// Identifies the revision, the formatted timestamp.
    pub key: String,
    pub timestamp: DateTime<Utc>,
    pub blob_id: Option<String>,
    pub blob_size: u64,
}

fn ensure_file(node: &Node) -> Result<(), Error> {
    if !node.exists {
        return Err(Error::NotFound(format!("node {}", node.id)));
    }
    if !node.is_file() {
        return Err(Error::InvalidRequest(format!("{} is not a file", node.name)));
    }
    Ok(())
}

impl Tree {
    /// Paths of all revisions of the node at `node_path`, oldest first.
    pub(crate) async fn revision_paths(&self, node_path: &Path) -> Result<Vec<PathBuf>, Error> {
        let (Some(dir), Some(file_name)) = (node_path.parent(), node_path.file_name()) else {
            return Ok(Vec::new());
        };
        let prefix = format!("{}{REVISION_DELIMITER}", file_name.to_string_lossy());

        let mut entries = match tokio::fs::read_dir(dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        let mut paths = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if entry.file_name().to_string_lossy().starts_with(&prefix)
                && !self.lookup.metadata().is_meta_file(&path)
            {
                paths.push(path);
            }
        }
        paths.sort();
        Ok(paths)
    }

    fn revision_path_for(&self, node: &Node, key: &str) -> Result<PathBuf, Error> {
        if parse_time(key).is_none() {
            return Err(Error::InvalidRequest(format!("invalid revision key {key:?}")));
        }
        let path = layout::revision_path(
            &self.lookup.layout().node_path(&node.space_id, &node.id),
            key,
        );
        if !path.exists() {
            return Err(Error::NotFound(format!("revision {key} of {}", node.id)));
        }
        Ok(path)
    }

    /// Turns the current content of `current` into a revision.
    async fn keep_as_revision(&self, current: &Node, attrs: &Attributes) -> Result<(), Error> {
        let node_path = self.lookup.layout().node_path(&current.space_id, &current.id);
        let mtime = attrs.mtime().unwrap_or_else(Utc::now);

        let mut path = layout::revision_path(&node_path, &format_time(&mtime));
        let mut f = tokio::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .await;
        if matches!(&f, Err(e) if e.kind() == io::ErrorKind::AlreadyExists) {
            path = layout::revision_path(&node_path, &format_time(&Utc::now()));
            f = tokio::fs::OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&path)
                .await;
        }
        f?;

        let mut rev_attrs = Attributes::new();
        rev_attrs
            .set_str(keys::BLOB_ID, current.blob_id.as_deref().unwrap_or_default())
            .set_u64(keys::BLOB_SIZE, current.blob_size)
            .set_time(keys::MTIME, &mtime);
        if let Err(e) = self.lookup.metadata().set_multiple(&path, &rev_attrs) {
            if let Err(rm_err) = tokio::fs::remove_file(&path).await {
                if rm_err.kind() != io::ErrorKind::NotFound {
                    warn!(err = %rm_err, revision = %path.display(), "unable to remove revision placeholder");
                }
            }
            return Err(e.into());
        }
        debug!(revision = %path.display(), "kept previous content");
        Ok(())
    }

    /// Replaces the content of the file `node` by the contents of `reader`.
    /// The previous content, if any, is kept as a revision.
    #[instrument(skip_all, err, fields(space = %node.space_id, node.id = %node.id))]
    pub async fn write_content(
        &self,
        ctx: &RequestContext,
        node: &Node,
        reader: &mut (dyn AsyncRead + Send + Unpin),
    ) -> Result<Node, Error> {
        ensure_file(node)?;
        self.check_lock(ctx, node).await?;
        let guard = self.lookup.locks().lock(node.internal_path()).await;

        let current = self.lookup.read_node(&node.space_id, &node.id)?;
        let attrs = self.lookup.attrs(&current)?;
        let old_size = current.blob_size;

        let mut updated = current.clone();
        updated.blob_id = Some(Uuid::new_v4().to_string());
        let size = self.blobstore.upload(&updated, reader).await?;
        updated.blob_size = size;

        let root = self.lookup.node_from_space_id(&node.space_id)?;
        if let Err(e) = self.quota.check(&self.lookup, &root, true, old_size, size) {
            self.discard_blob(&updated).await;
            return Err(e);
        }

        if current.blob_id.is_some() {
            if let Err(e) = self.keep_as_revision(&current, &attrs).await {
                self.discard_blob(&updated).await;
                return Err(e);
            }
        }

        let mut new_attrs = Attributes::new();
        new_attrs
            .set_str(keys::BLOB_ID, updated.blob_id.as_deref().unwrap_or_default())
            .set_u64(keys::BLOB_SIZE, size)
            .set_time(keys::MTIME, &Utc::now());
        self.lookup.set_attrs(&updated, &new_attrs)?;
        if attrs.is_processing() {
            self.lookup.remove_attr(&updated, keys::STATUS)?;
        }
        drop(guard);

        self.propagate(&updated, size as i64 - old_size as i64).await;
        Ok(updated)
    }

    async fn discard_blob(&self, node: &Node) {
        if let Err(e) = self.blobstore.delete(node).await {
            warn!(err = %e, node.id = %node.id, "unable to remove unused blob");
        }
    }

    /// Lists the revisions of the file `node`, oldest first.
    pub async fn list_revisions(
        &self,
        _ctx: &RequestContext,
        node: &Node,
    ) -> Result<Vec<Revision>, Error> {
        ensure_file(node)?;
        let node_path = self.lookup.layout().node_path(&node.space_id, &node.id);

        let mut revisions = Vec::new();
        for path in self.revision_paths(&node_path).await? {
            let name = path.file_name().unwrap_or_default().to_string_lossy();
            let Some((_, key)) = name.split_once(REVISION_DELIMITER) else {
                continue;
            };
            let Some(timestamp) = parse_time(key) else {
                warn!(revision = %path.display(), "skipping revision with invalid key");
                continue;
            };
            revisions.push(Revision {
                key: key.to_string(),
                timestamp,
                blob_id: self.lookup.read_blob_id_attr(&path)?,
                blob_size: self.lookup.read_blob_size_attr(&path)?,
            });
        }
        revisions.sort_by_key(|r| r.timestamp);
        Ok(revisions)
    }

    /// Opens the content of the revision `key` of `node`.
    pub async fn download_revision(
        &self,
        _ctx: &RequestContext,
        node: &Node,
        key: &str,
    ) -> Result<Box<dyn BlobReader>, Error> {
        ensure_file(node)?;
        let path = self.revision_path_for(node, key)?;
        let mut rev = node.clone();
        rev.blob_id = self.lookup.read_blob_id_attr(&path)?;
        self.read_blob(&rev).await
    }

    /// Makes the revision `key` the current content of `node`. The content
    /// it replaces becomes a revision itself.
    #[instrument(skip_all, err, fields(space = %node.space_id, node.id = %node.id, key = key))]
    pub async fn restore_revision(
        &self,
        ctx: &RequestContext,
        node: &Node,
        key: &str,
    ) -> Result<Node, Error> {
        ensure_file(node)?;
        self.check_lock(ctx, node).await?;
        let guard = self.lookup.locks().lock(node.internal_path()).await;

        let path = self.revision_path_for(node, key)?;
        let rev_attrs = self.lookup.metadata().all(&path)?;

        let current = self.lookup.read_node(&node.space_id, &node.id)?;
        let attrs = self.lookup.attrs(&current)?;
        if current.blob_id.is_some() {
            self.keep_as_revision(&current, &attrs).await?;
        }

        let mut restored = current.clone();
        restored.blob_id = rev_attrs
            .get_str(keys::BLOB_ID)
            .filter(|b| !b.is_empty())
            .map(str::to_string);
        restored.blob_size = rev_attrs.blob_size().unwrap_or_default();

        let mut new_attrs = Attributes::new();
        new_attrs
            .set_str(keys::BLOB_ID, restored.blob_id.as_deref().unwrap_or_default())
            .set_u64(keys::BLOB_SIZE, restored.blob_size)
            .set_time(keys::MTIME, &rev_attrs.mtime().unwrap_or_else(Utc::now));
        self.lookup.set_attrs(&restored, &new_attrs)?;

        tokio::fs::remove_file(&path).await?;
        self.lookup.metadata().purge(&path)?;
        drop(guard);

        self.propagate(
            &restored,
            restored.blob_size as i64 - current.blob_size as i64,
        )
        .await;
        Ok(restored)
    }

    /// Removes the revision `key` of `node` together with its blob.
    #[instrument(skip_all, err, fields(space = %node.space_id, node.id = %node.id, key = key))]
    pub async fn delete_revision(
        &self,
        ctx: &RequestContext,
        node: &Node,
        key: &str,
    ) -> Result<(), Error> {
        ensure_file(node)?;
        self.check_lock(ctx, node).await?;

        let path = self.revision_path_for(node, key)?;
        let mut rev = node.clone();
        rev.blob_id = self.lookup.read_blob_id_attr(&path)?;

        tokio::fs::remove_file(&path).await?;
        self.lookup.metadata().purge(&path)?;
        if rev.blob_id.is_some() {
            self.blobstore.delete(&rev).await?;
        }
        Ok(())
    }
}
