use super::gen_tree;
use crate::{errors::Error, fixtures::{BLOB_A, BLOB_C}, metadata::keys};

/// Delete a file, check it's gone, restore it to where it was.
#[tokio::test]
async fn delete_restore_roundtrip() {
    let t = gen_tree().await;
    let docs = t.mkdir(&t.root, "docs").await;
    let a = t.put(&docs, "a.txt", &BLOB_A).await;
    assert_eq!(100, t.tree_size(&t.root));

    let item = t.tree.delete(&t.ctx, &a).await.unwrap();
    assert_eq!(a.id.to_string(), item.key);
    assert_eq!("/docs/a.txt", item.origin);
    assert_eq!(100, item.size);

    assert!(t.names(&docs).await.is_empty());
    assert!(!t.child(&docs, "a.txt").exists);
    assert_eq!(0, t.tree_size(&docs));
    assert_eq!(0, t.tree_size(&t.root));

    let restored = t
        .tree
        .restore_recycle_item(&t.ctx, &t.root.space_id, &item.key, "")
        .await
        .unwrap();
    assert_eq!(a.id, restored.id);
    assert_eq!("a.txt", restored.name);
    assert_eq!(Some(docs.id.clone()), restored.parent_id);

    let found = t.child(&docs, "a.txt");
    assert_eq!(a.id, found.id);
    assert_eq!(a.blob_id, found.blob_id);
    assert_eq!(BLOB_A.to_vec(), t.cat(&found).await);
    assert_eq!("/docs/a.txt", t.tree.lookup().path(&found).unwrap());
    assert!(!t.tree.lookup().attrs(&found).unwrap().contains(keys::TRASH_ORIGIN));

    assert_eq!(100, t.tree_size(&docs));
    assert_eq!(100, t.tree_size(&t.root));
    assert!(t
        .tree
        .list_recycle(&t.ctx, &t.root.space_id, None, "")
        .await
        .unwrap()
        .is_empty());
}

/// Delete, purge, then restoring the same key fails.
#[tokio::test]
async fn purge_is_final() {
    let t = gen_tree().await;
    let docs = t.mkdir(&t.root, "docs").await;
    let a = t.put(&docs, "a.txt", &BLOB_A).await;
    let item = t.tree.delete(&t.ctx, &a).await.unwrap();

    t.tree
        .purge_recycle_item(&t.ctx, &t.root.space_id, &item.key, "")
        .await
        .unwrap();

    assert!(t.blobstore.is_empty(), "blob must be removed");
    assert!(matches!(
        t.tree
            .restore_recycle_item(&t.ctx, &t.root.space_id, &item.key, "")
            .await,
        Err(Error::NotFound(_))
    ));
    assert!(matches!(
        t.tree.read_blob(&a).await,
        Err(e) if e.is_not_found()
    ));
}

#[tokio::test]
async fn purge_directory_with_revisions() {
    let t = gen_tree().await;
    let docs = t.mkdir(&t.root, "docs").await;
    t.put(&docs, "a.txt", &BLOB_A).await;
    t.put(&docs, "a.txt", &BLOB_C).await;
    let sub = t.mkdir(&docs, "sub").await;
    t.put(&sub, "b.txt", &BLOB_C).await;
    assert_eq!(3, t.blobstore.len());

    let item = t.tree.delete(&t.ctx, &docs).await.unwrap();
    assert_eq!(100, item.size);
    assert_eq!(0, t.tree_size(&t.root));

    let op = t
        .tree
        .purge_recycle_item_func(&t.ctx, &t.root.space_id, &item.key, "")
        .await
        .unwrap();
    assert_eq!(docs.id, op.node.id);
    op.run().await.unwrap();

    assert!(t.blobstore.is_empty());
    let nodes_dir = t.tree.lookup().layout().nodes_dir(&t.root.space_id);
    let left: Vec<_> = walkdir::WalkDir::new(&nodes_dir)
        .into_iter()
        .filter_map(Result::ok)
        .filter(|e| e.file_type().is_file() && !e.path().to_string_lossy().ends_with(".meta.json"))
        .collect();
    assert!(left.is_empty(), "only the space root may remain: {left:?}");
}

#[tokio::test]
async fn list_recycle_items() {
    let t = gen_tree().await;
    let docs = t.mkdir(&t.root, "docs").await;
    let sub = t.mkdir(&docs, "sub").await;
    t.put(&sub, "b.txt", &BLOB_C).await;
    let a = t.put(&t.root, "a.txt", &BLOB_A).await;

    let deleted_a = t.tree.delete(&t.ctx, &a).await.unwrap();
    let deleted_docs = t.tree.delete(&t.ctx, &docs).await.unwrap();

    let mut items = t
        .tree
        .list_recycle(&t.ctx, &t.root.space_id, None, "")
        .await
        .unwrap();
    items.sort_by(|a, b| a.origin.cmp(&b.origin));
    assert_eq!(vec![deleted_a.clone(), deleted_docs.clone()], items);

    let nested = t
        .tree
        .list_recycle(&t.ctx, &t.root.space_id, Some(&deleted_docs.key), "/sub")
        .await
        .unwrap();
    assert_eq!(1, nested.len());
    assert_eq!("/sub/b.txt", nested[0].path);
    assert_eq!("/docs/sub/b.txt", nested[0].origin);
    assert_eq!(50, nested[0].size);
}

/// Restore a file out of a trashed directory.
#[tokio::test]
async fn restore_nested_item() {
    let t = gen_tree().await;
    let docs = t.mkdir(&t.root, "docs").await;
    let sub = t.mkdir(&docs, "sub").await;
    let b = t.put(&sub, "b.txt", &BLOB_C).await;
    let item = t.tree.delete(&t.ctx, &docs).await.unwrap();

    // the original parent is gone, the default target cannot be resolved
    assert!(matches!(
        t.tree
            .restore_recycle_item(&t.ctx, &t.root.space_id, &item.key, "/sub/b.txt")
            .await,
        Err(Error::NotFound(_))
    ));

    let target = t.child(&t.root, "rescued.txt");
    let op = t
        .tree
        .restore_recycle_item_func(&t.ctx, &t.root.space_id, &item.key, "/sub/b.txt", Some(target))
        .await
        .unwrap();
    assert_eq!(b.id, op.node.id);
    assert_eq!(t.root.id, op.parent.id);
    let restored = op.run().await.unwrap();

    assert_eq!(b.id, restored.id);
    assert_eq!(vec!["rescued.txt"], t.names(&t.root).await);
    assert_eq!(BLOB_C.to_vec(), t.cat(&t.child(&t.root, "rescued.txt")).await);
    assert_eq!(50, t.tree_size(&t.root));

    // the rest of the trashed directory is still in the trash
    let nested = t
        .tree
        .list_recycle(&t.ctx, &t.root.space_id, Some(&item.key), "/sub")
        .await
        .unwrap();
    assert!(nested.is_empty());
    t.tree
        .restore_recycle_item(&t.ctx, &t.root.space_id, &item.key, "")
        .await
        .unwrap();
    assert_eq!(vec!["docs", "rescued.txt"], t.names(&t.root).await);
}

/// A cached resolution of a nested item must not survive restoring the item
/// elsewhere, nor purging it.
#[tokio::test]
async fn nested_items_leave_no_stale_resolution() {
    let t = gen_tree().await;
    let docs = t.mkdir(&t.root, "docs").await;
    let a = t.put(&docs, "a.txt", &BLOB_A).await;
    let b = t.put(&docs, "b.txt", &BLOB_C).await;
    assert_eq!(a.id, t.child(&docs, "a.txt").id);
    assert_eq!(b.id, t.child(&docs, "b.txt").id);

    let item = t.tree.delete(&t.ctx, &docs).await.unwrap();
    let target = t.child(&t.root, "moved.txt");
    t.tree
        .restore_recycle_item_func(&t.ctx, &t.root.space_id, &item.key, "/a.txt", Some(target))
        .await
        .unwrap()
        .run()
        .await
        .unwrap();
    t.tree
        .purge_recycle_item(&t.ctx, &t.root.space_id, &item.key, "/b.txt")
        .await
        .unwrap();
    t.tree
        .restore_recycle_item(&t.ctx, &t.root.space_id, &item.key, "")
        .await
        .unwrap();

    assert!(t.names(&docs).await.is_empty());
    assert!(!t.child(&docs, "a.txt").exists);
    assert!(!t.child(&docs, "b.txt").exists);

    let moved = t.child(&t.root, "moved.txt");
    assert_eq!(a.id, moved.id);
    assert_eq!("/moved.txt", t.tree.lookup().path(&moved).unwrap());
    assert_eq!(0, t.tree_size(&docs));
    assert_eq!(100, t.tree_size(&t.root));
}

/// A delete failing at its last step leaves the node where it was.
#[tokio::test]
async fn failed_delete_is_rolled_back() {
    let t = gen_tree().await;
    let docs = t.mkdir(&t.root, "docs").await;
    let a = t.put(&docs, "a.txt", &BLOB_A).await;

    // unbinding the node from its parent is the last step, make it fail
    t.tree.delete_shared_reference(&t.ctx, &a).await.unwrap();
    let err = t.tree.delete(&t.ctx, &a).await.expect_err("delete must fail");
    assert!(err.is_not_found(), "unexpected error: {err}");

    let back = t.reread(&a);
    assert_eq!(a.blob_id, back.blob_id);
    assert!(!t.tree.lookup().attrs(&back).unwrap().contains(keys::TRASH_ORIGIN));
    let trash_link = t
        .tree
        .lookup()
        .layout()
        .trash_link_path(&a.space_id, &a.id);
    assert!(std::fs::symlink_metadata(trash_link).is_err());
    assert!(t
        .tree
        .list_recycle(&t.ctx, &t.root.space_id, None, "")
        .await
        .unwrap()
        .is_empty());
    assert_eq!(100, t.tree_size(&docs));
}

#[tokio::test]
async fn restore_onto_existing_name_fails() {
    let t = gen_tree().await;
    let a = t.put(&t.root, "a.txt", &BLOB_A).await;
    let item = t.tree.delete(&t.ctx, &a).await.unwrap();
    t.put(&t.root, "a.txt", &BLOB_C).await;

    assert!(matches!(
        t.tree
            .restore_recycle_item(&t.ctx, &t.root.space_id, &item.key, "")
            .await,
        Err(Error::AlreadyExists(_))
    ));
    // still restorable elsewhere
    let target = t.child(&t.root, "a (restored).txt");
    let restored = t
        .tree
        .restore_recycle_item_func(&t.ctx, &t.root.space_id, &item.key, "", Some(target))
        .await
        .unwrap()
        .run()
        .await
        .unwrap();
    assert_eq!(a.id, restored.id);
    assert_eq!(150, t.tree_size(&t.root));
}

#[tokio::test]
async fn unknown_trash_key() {
    let t = gen_tree().await;
    assert!(matches!(
        t.tree
            .read_recycle_item(&t.ctx, &t.root.space_id, "00000000-missing", "")
            .await,
        Err(Error::NotFound(_))
    ));
    assert!(matches!(
        t.tree
            .purge_recycle_item_func(&t.ctx, &t.root.space_id, "bad/key", "")
            .await,
        Err(Error::InvalidRequest(_))
    ));
}
