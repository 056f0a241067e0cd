use chrono::{Duration, Utc};

use super::gen_tree;
use crate::{
    context::{RequestContext, User},
    errors::Error,
    fixtures::BLOB_A,
    node::locks::Lock,
};

fn lock_for(id: &str, user: &str) -> Lock {
    let mut lock = Lock::new(id);
    lock.user = Some(user.to_string());
    lock.expiration = Some(Utc::now() + Duration::minutes(10));
    lock
}

#[tokio::test]
async fn lock_lifecycle() {
    let t = gen_tree().await;
    let a = t.put(&t.root, "a.txt", &BLOB_A).await;
    let alice = RequestContext::new().with_user(User::new("alice"));

    assert_eq!(None, t.tree.read_lock(&alice, &a).await.unwrap());

    let lock = lock_for("lock-1", "alice");
    t.tree.set_lock(&alice, &a, &lock).await.unwrap();
    assert_eq!(Some(lock.clone()), t.tree.read_lock(&alice, &a).await.unwrap());

    assert!(matches!(
        t.tree.set_lock(&alice, &a, &lock_for("lock-2", "alice")).await,
        Err(Error::Locked(_))
    ));

    let mut refreshed = lock.clone();
    refreshed.expiration = Some(Utc::now() + Duration::hours(1));
    t.tree
        .refresh_lock(&alice, &a, &refreshed, None)
        .await
        .unwrap();
    assert_eq!(Some(refreshed.clone()), t.tree.read_lock(&alice, &a).await.unwrap());

    let bob = RequestContext::new().with_user(User::new("bob"));
    assert!(matches!(
        t.tree.unlock(&bob, &a, &lock_for("lock-1", "bob")).await,
        Err(Error::PermissionDenied(_))
    ));
    assert!(matches!(
        t.tree.unlock(&alice, &a, &lock_for("other", "alice")).await,
        Err(Error::Locked(_))
    ));

    t.tree.unlock(&alice, &a, &refreshed).await.unwrap();
    assert_eq!(None, t.tree.read_lock(&alice, &a).await.unwrap());
    assert!(matches!(
        t.tree.unlock(&alice, &a, &refreshed).await,
        Err(Error::PreconditionFailed(_))
    ));
    assert!(matches!(
        t.tree.refresh_lock(&alice, &a, &refreshed, None).await,
        Err(Error::PreconditionFailed(_))
    ));
}

#[tokio::test]
async fn expired_locks_are_ignored() {
    let t = gen_tree().await;
    let a = t.put(&t.root, "a.txt", &BLOB_A).await;

    let mut lock = Lock::new("old");
    lock.expiration = Some(Utc::now() - Duration::seconds(1));
    t.tree.set_lock(&t.ctx, &a, &lock).await.unwrap();

    assert_eq!(None, t.tree.read_lock(&t.ctx, &a).await.unwrap());
    t.tree.set_lock(&t.ctx, &a, &Lock::new("new")).await.unwrap();
}

/// Locked nodes can only be changed with the matching lock id.
#[tokio::test]
async fn locked_node_blocks_mutations() {
    let t = gen_tree().await;
    let a = t.put(&t.root, "a.txt", &BLOB_A).await;
    t.tree.set_lock(&t.ctx, &a, &Lock::new("lock-1")).await.unwrap();

    let target = t.child(&t.root, "b.txt");
    assert!(matches!(
        t.tree.move_node(&t.ctx, &a, &target).await,
        Err(Error::Locked(_))
    ));
    assert!(matches!(
        t.tree.delete(&t.ctx, &a).await,
        Err(Error::Locked(_))
    ));
    let wrong = RequestContext::new().with_lock_id("lock-2");
    assert!(matches!(
        t.tree.delete(&wrong, &a).await,
        Err(Error::PreconditionFailed(_))
    ));

    let holder = RequestContext::new().with_lock_id("lock-1");
    let moved = t.tree.move_node(&holder, &a, &target).await.unwrap();
    assert_eq!("b.txt", moved.name);
    t.tree.delete(&holder, &moved).await.unwrap();
    assert!(t.names(&t.root).await.is_empty());
    assert!(!moved.lock_file_path().exists(), "lock does not survive deletion");
}

#[tokio::test]
async fn lock_id_without_lock_fails() {
    let t = gen_tree().await;
    let a = t.put(&t.root, "a.txt", &BLOB_A).await;
    let ctx = RequestContext::new().with_lock_id("lock-1");
    assert!(matches!(
        t.tree.check_lock(&ctx, &a).await,
        Err(Error::PreconditionFailed(_))
    ));
    t.tree.check_lock(&t.ctx, &a).await.unwrap();
}

/// Restoring into a locked directory needs the directory's lock id.
#[tokio::test]
async fn restore_into_locked_directory() {
    let t = gen_tree().await;
    let docs = t.mkdir(&t.root, "docs").await;
    let a = t.put(&docs, "a.txt", &BLOB_A).await;
    let item = t.tree.delete(&t.ctx, &a).await.unwrap();

    let alice = RequestContext::new().with_user(User::new("alice"));
    t.tree
        .set_lock(&alice, &docs, &lock_for("dir-lock", "alice"))
        .await
        .unwrap();

    assert!(matches!(
        t.tree
            .restore_recycle_item(&t.ctx, &t.root.space_id, &item.key, "")
            .await,
        Err(Error::Locked(_))
    ));
    assert!(!t.child(&docs, "a.txt").exists);

    let holder = alice.with_lock_id("dir-lock");
    let restored = t
        .tree
        .restore_recycle_item(&holder, &t.root.space_id, &item.key, "")
        .await
        .unwrap();
    assert_eq!(a.id, restored.id);
    assert_eq!(100, t.tree_size(&docs));
}
