use std::sync::Arc;

use rstest::rstest;

use super::gen_tree;
use crate::{
    blobstore::MemoryBlobstore,
    errors::Error,
    ids::{NodeId, Reference, ResourceId},
    metadata::Backend,
    options::Options,
    registry::SpaceRegistry,
    spaces::{CreateSpace, SpaceFilter, SpaceType},
    tree::Tree,
};

#[rstest]
#[case::personal(SpaceType::Personal, "personal")]
#[case::project(SpaceType::Project, "project")]
#[case::mountpoint(SpaceType::ShareMountpoint, "mountpoint")]
#[case::publiclink(SpaceType::PublicLink, "publiclink")]
fn space_type_names(#[case] space_type: SpaceType, #[case] name: &str) {
    assert_eq!(name, space_type.as_str());
    assert_eq!(space_type, name.parse().unwrap());
}

#[tokio::test]
async fn create_read_list_disable() {
    let t = gen_tree().await;
    let home = t
        .tree
        .create_space(
            &t.ctx,
            CreateSpace::new(SpaceType::Personal, "Alice").with_owner("alice-0001"),
        )
        .await
        .unwrap();
    assert_eq!("alice-0001", home.id.as_str(), "personal spaces are keyed by owner");
    assert_eq!(Some("alice-0001".to_string()), home.owner);
    assert!(home.root.is_space_root());

    assert!(matches!(
        t.tree
            .create_space(
                &t.ctx,
                CreateSpace::new(SpaceType::Personal, "Alice").with_owner("alice-0001"),
            )
            .await,
        Err(Error::AlreadyExists(_))
    ));

    let read = t.tree.read_space(&t.ctx, &home.id).await.unwrap();
    assert_eq!("Alice", read.name);
    assert_eq!(SpaceType::Personal, read.space_type);
    assert_eq!(None, read.quota);

    let personal = SpaceFilter {
        space_type: Some(SpaceType::Personal),
        ..Default::default()
    };
    let listed = t.tree.list_spaces(&t.ctx, &personal).await.unwrap();
    assert_eq!(1, listed.len());
    assert_eq!(home.id, listed[0].id);
    assert_eq!(2, t.tree.list_spaces(&t.ctx, &SpaceFilter::default()).await.unwrap().len());

    t.tree.disable_space(&t.ctx, &home.id).await.unwrap();
    assert!(t.tree.list_spaces(&t.ctx, &personal).await.unwrap().is_empty());
    let all = SpaceFilter {
        space_type: Some(SpaceType::Personal),
        include_disabled: true,
    };
    let listed = t.tree.list_spaces(&t.ctx, &all).await.unwrap();
    assert_eq!(1, listed.len());
    assert!(listed[0].disabled);
}

#[tokio::test]
async fn personal_space_needs_owner() {
    let t = gen_tree().await;
    assert!(matches!(
        t.tree
            .create_space(&t.ctx, CreateSpace::new(SpaceType::Personal, "nobody"))
            .await,
        Err(Error::InvalidRequest(_))
    ));
}

#[tokio::test]
async fn unknown_space() {
    let t = gen_tree().await;
    let id = NodeId::try_from("does-not-exist").unwrap();
    assert!(matches!(
        t.tree.read_space(&t.ctx, &id).await,
        Err(Error::NotFound(_))
    ));
}

async fn open_tree(dir: &tempfile::TempDir) -> Arc<Tree> {
    let mut options = Options::new(dir.path());
    options.metadata_backend = Backend::Sidecar;
    Arc::new(
        Tree::open(options, Arc::new(MemoryBlobstore::default()))
            .await
            .unwrap(),
    )
}

#[tokio::test]
async fn registry_routes_by_type() {
    let homes_dir = tempfile::TempDir::new().unwrap();
    let projects_dir = tempfile::TempDir::new().unwrap();
    let homes = open_tree(&homes_dir).await;
    let projects = open_tree(&projects_dir).await;

    let mut registry = SpaceRegistry::new();
    registry
        .register("homes", [SpaceType::Personal], homes.clone())
        .unwrap();
    registry
        .register("projects", [SpaceType::Project], projects.clone())
        .unwrap();
    assert!(matches!(
        registry.register("homes", [SpaceType::Virtual], homes.clone()),
        Err(Error::AlreadyExists(_))
    ));

    let ctx = crate::context::RequestContext::new();
    let home = registry
        .create_space(
            &ctx,
            CreateSpace::new(SpaceType::Personal, "Bob").with_owner("bob-00001"),
        )
        .await
        .unwrap();
    assert_eq!("homes", home.provider_id);
    let project = registry
        .create_space(&ctx, CreateSpace::new(SpaceType::Project, "Apollo"))
        .await
        .unwrap();
    assert_eq!("projects", project.provider_id);

    assert!(matches!(
        registry
            .create_space(&ctx, CreateSpace::new(SpaceType::Virtual, "nope"))
            .await,
        Err(Error::NotSupported(_))
    ));

    let resolved = registry.resolve(&ctx, &project.space.id).await.unwrap();
    assert_eq!("projects", resolved.provider_id);
    assert_eq!("Apollo", resolved.space.name);
    assert!(matches!(
        registry
            .resolve(&ctx, &NodeId::try_from("unknown-space").unwrap())
            .await,
        Err(Error::NotFound(_))
    ));

    let docs = resolved
        .tree
        .create_dir(&ctx, &resolved.space.root, "docs")
        .await
        .unwrap();
    let (_, node) = registry
        .resolve_reference(
            &ctx,
            &Reference::with_path(ResourceId::space_root(project.space.id.clone()), "/docs"),
        )
        .await
        .unwrap();
    assert_eq!(docs.id, node.id);

    assert_eq!(2, registry.list_spaces(&ctx, &SpaceFilter::default()).await.unwrap().len());
}
