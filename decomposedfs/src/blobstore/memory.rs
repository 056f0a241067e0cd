use std::{collections::HashMap, io, sync::Arc};

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::RwLock;
use tokio::io::{AsyncRead, AsyncReadExt};
use tracing::instrument;

use super::{empty_reader, require_blob_id, BlobReader, Blobstore};
use crate::{ids::SpaceId, node::Node};

#[derive(Clone, Default)]
pub struct MemoryBlobstore {
    db: Arc<RwLock<HashMap<(SpaceId, String), Bytes>>>,
}

impl MemoryBlobstore {
    /// Number of blobs currently stored.
    pub fn len(&self) -> usize {
        self.db.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.db.read().is_empty()
    }
}

#[async_trait]
impl Blobstore for MemoryBlobstore {
    #[instrument(skip_all, err, fields(node.id = %node.id, blob.id = ?node.blob_id))]
    async fn upload(
        &self,
        node: &Node,
        reader: &mut (dyn AsyncRead + Send + Unpin),
    ) -> io::Result<u64> {
        let blob_id = require_blob_id(node)?.to_string();
        let mut buf = Vec::new();
        let n = reader.read_to_end(&mut buf).await?;

        self.db
            .write()
            .insert((node.space_id.clone(), blob_id), buf.into());
        Ok(n as u64)
    }

    async fn download(&self, node: &Node) -> io::Result<Box<dyn BlobReader>> {
        let Some(blob_id) = node.blob_id.clone() else {
            return Ok(empty_reader());
        };
        match self.db.read().get(&(node.space_id.clone(), blob_id)) {
            Some(data) => Ok(Box::new(io::Cursor::new(data.clone()))),
            None => Err(io::Error::new(
                io::ErrorKind::NotFound,
                format!("blob of node {} not found", node.id),
            )),
        }
    }

    async fn delete(&self, node: &Node) -> io::Result<()> {
        let blob_id = require_blob_id(node)?.to_string();
        self.db.write().remove(&(node.space_id.clone(), blob_id));
        Ok(())
    }
}
