//! Content storage, keyed by the blob id of a file node.
use std::io;

use async_trait::async_trait;
use tokio::io::AsyncRead;

use crate::node::Node;

mod from_addr;
mod memory;
mod simplefs;

#[cfg(test)]
mod tests;

pub use self::from_addr::from_addr;
pub use self::memory::MemoryBlobstore;
pub use self::simplefs::SimpleFilesystemBlobstore;

/// The base trait all blobstores need to implement.
///
/// Blobs are addressed by the space and blob id of the node passed in. The
/// store knows nothing about the tree structure.
#[async_trait]
pub trait Blobstore: Send + Sync {
    /// Stores the contents of `reader` as the blob of `node`, returning the
    /// number of bytes written. Fails with [io::ErrorKind::InvalidInput] if
    /// the node carries no blob id.
    async fn upload(
        &self,
        node: &Node,
        reader: &mut (dyn AsyncRead + Send + Unpin),
    ) -> io::Result<u64>;

    /// Opens the blob of `node`. A node without blob id yields an empty
    /// reader, a missing blob fails with [io::ErrorKind::NotFound].
    async fn download(&self, node: &Node) -> io::Result<Box<dyn BlobReader>>;

    /// Removes the blob of `node`. Removing a blob that does not exist is
    /// not an error.
    async fn delete(&self, node: &Node) -> io::Result<()>;
}

#[async_trait]
impl<A> Blobstore for A
where
    A: AsRef<dyn Blobstore> + Send + Sync,
{
    async fn upload(
        &self,
        node: &Node,
        reader: &mut (dyn AsyncRead + Send + Unpin),
    ) -> io::Result<u64> {
        self.as_ref().upload(node, reader).await
    }

    async fn download(&self, node: &Node) -> io::Result<Box<dyn BlobReader>> {
        self.as_ref().download(node).await
    }

    async fn delete(&self, node: &Node) -> io::Result<()> {
        self.as_ref().delete(node).await
    }
}

/// BlobReader is a [tokio::io::AsyncRead] handed out by [Blobstore::download].
pub trait BlobReader: tokio::io::AsyncRead + Send + Unpin + 'static {}

impl BlobReader for io::Cursor<&'static [u8]> {}
impl BlobReader for io::Cursor<Vec<u8>> {}
impl BlobReader for io::Cursor<bytes::Bytes> {}
impl BlobReader for tokio::fs::File {}

/// The blob id of `node`, or an [io::ErrorKind::InvalidInput] error.
pub(crate) fn require_blob_id(node: &Node) -> io::Result<&str> {
    node.blob_id.as_deref().ok_or_else(|| {
        io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("node {} has no blob id", node.id),
        )
    })
}

pub(crate) fn empty_reader() -> Box<dyn BlobReader> {
    Box::new(io::Cursor::new(&b""[..]))
}
