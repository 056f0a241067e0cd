use std::{
    io,
    path::{Path, PathBuf},
};

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWriteExt};
use tracing::instrument;

use super::{empty_reader, require_blob_id, BlobReader, Blobstore};
use crate::{ids::SpaceId, layout::pathify, node::Node};

/// Stores blobs on a POSIX-compliant filesystem.
///
/// It takes an existing path and builds a `tmp` directory inside of it. All
/// uploads are staged in that `tmp` directory, then they are moved
/// **atomically** into `spaces/<space id sharded>/blobs/<blob id sharded>`, using the same
/// fan-out as the node layout.
#[derive(Clone)]
pub struct SimpleFilesystemBlobstore {
    /// Where the blobs are located on a filesystem already mounted.
    path: PathBuf,
}

impl SimpleFilesystemBlobstore {
    pub async fn new(path: PathBuf) -> io::Result<Self> {
        tokio::fs::create_dir_all(&path).await?;
        tokio::fs::create_dir_all(path.join("tmp")).await?;

        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

fn derive_path(root: &Path, space_id: &SpaceId, blob_id: &str) -> PathBuf {
    root.join("spaces")
        .join(pathify(space_id.as_str(), 1, 2))
        .join("blobs")
        .join(pathify(blob_id, 4, 2))
}

fn map_tempfile_error(e: async_tempfile::Error) -> io::Error {
    match e {
        async_tempfile::Error::Io(io_error) => io_error,
        async_tempfile::Error::InvalidFile => {
            io::Error::new(io::ErrorKind::NotFound, "invalid or missing file specified")
        }
        async_tempfile::Error::InvalidDirectory => io::Error::new(
            io::ErrorKind::NotFound,
            "invalid or missing directory specified",
        ),
    }
}

#[async_trait]
impl Blobstore for SimpleFilesystemBlobstore {
    #[instrument(skip_all, err, fields(node.id = %node.id, blob.id = ?node.blob_id))]
    async fn upload(
        &self,
        node: &Node,
        reader: &mut (dyn AsyncRead + Send + Unpin),
    ) -> io::Result<u64> {
        let blob_id = require_blob_id(node)?;
        if blob_id.contains(['/', '.']) {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("invalid blob id {blob_id:?}"),
            ));
        }

        let mut file = async_tempfile::TempFile::new_in(self.path.join("tmp"))
            .await
            .map_err(map_tempfile_error)?;
        let n = tokio::io::copy(reader, &mut file).await?;
        file.flush().await?;
        file.sync_all().await?;

        let dst_path = derive_path(&self.path, &node.space_id, blob_id);
        if let Some(parent) = dst_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::rename(file.file_path(), dst_path).await?;

        Ok(n)
    }

    #[instrument(skip_all, err, fields(node.id = %node.id, blob.id = ?node.blob_id))]
    async fn download(&self, node: &Node) -> io::Result<Box<dyn BlobReader>> {
        let Some(blob_id) = node.blob_id.as_deref() else {
            return Ok(empty_reader());
        };
        let file = tokio::fs::File::open(derive_path(&self.path, &node.space_id, blob_id)).await?;
        Ok(Box::new(file))
    }

    #[instrument(skip_all, err, fields(node.id = %node.id, blob.id = ?node.blob_id))]
    async fn delete(&self, node: &Node) -> io::Result<()> {
        let blob_id = require_blob_id(node)?;
        match tokio::fs::remove_file(derive_path(&self.path, &node.space_id, blob_id)).await {
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            r => r,
        }
    }
}
