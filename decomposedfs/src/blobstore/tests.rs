//! This contains test scenarios that a given [Blobstore] needs to pass.
//! We use [rstest] and [rstest_reuse] to provide all stores we want to test
//! against, and then apply this template to all test functions.

use std::io;

use lazy_static::lazy_static;
use rstest::*;
use rstest_reuse::{self, *};
use tempfile::TempDir;
use tokio::io::AsyncReadExt;

use super::Blobstore;
use crate::{
    blobstore,
    fixtures::{file_node, BLOB_A, BLOB_B},
};

lazy_static! {
    static ref TMPDIR_FS: TempDir = TempDir::new().unwrap();
}

/// This produces a template, which will be applied to all individual test functions.
/// See https://github.com/la10736/rstest/issues/130#issuecomment-968864832
#[template]
#[rstest]
#[case::memory(blobstore::from_addr("memory://").await.unwrap())]
#[case::fs(blobstore::from_addr(&format!("fs://{}", TMPDIR_FS.path().display())).await.unwrap())]
pub fn blobstores(#[case] blobstore: impl Blobstore) {}

async fn read_all(blobstore: &impl Blobstore, node: &crate::node::Node) -> io::Result<Vec<u8>> {
    let mut r = blobstore.download(node).await?;
    let mut buf = Vec::new();
    r.read_to_end(&mut buf).await?;
    Ok(buf)
}

/// Upload a blob, get it back.
#[apply(blobstores)]
#[tokio::test]
async fn upload_download(blobstore: impl Blobstore) {
    for contents in [&*BLOB_A, &*BLOB_B] {
        let node = file_node(Some(uuid::Uuid::new_v4().to_string()));

        let n = blobstore
            .upload(&node, &mut io::Cursor::new(contents.clone()))
            .await
            .expect("upload must succeed");
        assert_eq!(contents.len() as u64, n, "written bytes must match blob length");

        let got = read_all(&blobstore, &node).await.expect("download must succeed");
        assert_eq!(contents.to_vec(), got);
    }
}

/// A node without blob id is a zero byte file.
#[apply(blobstores)]
#[tokio::test]
async fn no_blob_id_is_empty(blobstore: impl Blobstore) {
    let node = file_node(None);
    assert!(read_all(&blobstore, &node).await.expect("must succeed").is_empty());
}

/// Uploading for a node without blob id is refused.
#[apply(blobstores)]
#[tokio::test]
async fn upload_needs_blob_id(blobstore: impl Blobstore) {
    let node = file_node(None);
    let err = blobstore
        .upload(&node, &mut io::Cursor::new(b"x".to_vec()))
        .await
        .expect_err("must fail");
    assert_eq!(io::ErrorKind::InvalidInput, err.kind());
}

/// Reading a blob that was never written fails with NotFound.
#[apply(blobstores)]
#[tokio::test]
async fn missing_blob_not_found(blobstore: impl Blobstore) {
    let node = file_node(Some(uuid::Uuid::new_v4().to_string()));
    let err = read_all(&blobstore, &node).await.expect_err("must fail");
    assert_eq!(io::ErrorKind::NotFound, err.kind());
}

/// Delete removes the blob and is idempotent.
#[apply(blobstores)]
#[tokio::test]
async fn delete_idempotent(blobstore: impl Blobstore) {
    let node = file_node(Some(uuid::Uuid::new_v4().to_string()));
    blobstore
        .upload(&node, &mut io::Cursor::new(BLOB_A.clone()))
        .await
        .unwrap();

    blobstore.delete(&node).await.expect("delete must succeed");
    assert!(read_all(&blobstore, &node).await.is_err());
    blobstore.delete(&node).await.expect("second delete must succeed");
}
