use super::gen_tree;
use crate::{
    fixtures::{BLOB_A, BLOB_C},
    maintenance::{check_tree_size, detect_backend_on_disk},
    metadata::{keys, Backend},
};

#[tokio::test]
async fn consistent_tree_has_no_mismatches() {
    let t = gen_tree().await;
    let docs = t.mkdir(&t.root, "docs").await;
    t.put(&docs, "a.txt", &BLOB_A).await;
    t.put(&t.root, "c.txt", &BLOB_C).await;

    let mismatches = check_tree_size(&t.tree, &t.ctx, &t.root.space_id, false)
        .await
        .unwrap();
    assert!(mismatches.is_empty(), "{mismatches:?}");
}

#[tokio::test]
async fn repair_rewrites_stale_sizes() {
    let t = gen_tree().await;
    let docs = t.mkdir(&t.root, "docs").await;
    let sub = t.mkdir(&docs, "sub").await;
    t.put(&sub, "a.txt", &BLOB_A).await;
    t.put(&docs, "c.txt", &BLOB_C).await;

    t.tree.lookup().set_attr(&sub, keys::TREE_SIZE, "7").unwrap();
    t.tree.lookup().remove_attr(&docs, keys::TREE_SIZE).unwrap();

    let mismatches = check_tree_size(&t.tree, &t.ctx, &t.root.space_id, false)
        .await
        .unwrap();
    let mut found: Vec<_> = mismatches
        .iter()
        .map(|m| (m.path.as_str(), m.stored, m.computed))
        .collect();
    found.sort();
    assert_eq!(vec![("/docs", None, 150), ("/docs/sub", Some(7), 100)], found);
    assert_eq!(7, t.tree_size(&sub), "checking alone must not repair");

    let repaired = check_tree_size(&t.tree, &t.ctx, &t.root.space_id, true)
        .await
        .unwrap();
    assert_eq!(2, repaired.len());
    assert_eq!(100, t.tree_size(&sub));
    assert_eq!(150, t.tree_size(&docs));
    assert!(check_tree_size(&t.tree, &t.ctx, &t.root.space_id, false)
        .await
        .unwrap()
        .is_empty());
}

#[tokio::test]
async fn detects_sidecar_backend() {
    let t = gen_tree().await;
    let root = t.tree.options().root.clone();
    assert_eq!(Some(Backend::Sidecar), detect_backend_on_disk(&root));

    let empty = tempfile::TempDir::new().unwrap();
    assert_eq!(None, detect_backend_on_disk(empty.path()));
}
