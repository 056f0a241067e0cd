use std::{io, sync::Arc};

use bytes::Bytes;
use tempfile::TempDir;
use tokio::io::AsyncReadExt;

use crate::{
    blobstore::MemoryBlobstore,
    context::RequestContext,
    metadata::Backend,
    node::Node,
    options::Options,
    spaces::{CreateSpace, SpaceType},
    tree::Tree,
};

mod locks;
mod maintenance;
mod recycle;
mod spaces;

/// A tree in a temporary storage root with one project space.
pub(crate) struct TestTree {
    pub tree: Arc<Tree>,
    pub blobstore: Arc<MemoryBlobstore>,
    pub ctx: RequestContext,
    pub root: Node,
    _dir: TempDir,
}

pub(crate) async fn gen_tree() -> TestTree {
    gen_tree_with(|o| o).await
}

pub(crate) async fn gen_tree_with(f: impl FnOnce(Options) -> Options) -> TestTree {
    let dir = TempDir::new().unwrap();
    let mut options = Options::new(dir.path());
    options.metadata_backend = Backend::Sidecar;
    let options = f(options);

    let blobstore = Arc::new(MemoryBlobstore::default());
    let tree = Tree::open(options, blobstore.clone())
        .await
        .expect("must open tree");
    let ctx = RequestContext::new();
    let space = tree
        .create_space(&ctx, CreateSpace::new(SpaceType::Project, "project"))
        .await
        .expect("must create space");

    TestTree {
        tree: Arc::new(tree),
        blobstore,
        ctx,
        root: space.root,
        _dir: dir,
    }
}

impl TestTree {
    pub async fn mkdir(&self, parent: &Node, name: &str) -> Node {
        self.tree
            .create_dir(&self.ctx, parent, name)
            .await
            .expect("create_dir must succeed")
    }

    pub async fn put(&self, parent: &Node, name: &str, contents: &Bytes) -> Node {
        self.tree
            .upload(
                &self.ctx,
                parent,
                name,
                &mut io::Cursor::new(contents.clone()),
                Some(contents.len() as u64),
            )
            .await
            .expect("upload must succeed")
    }

    pub async fn cat(&self, node: &Node) -> Vec<u8> {
        let mut r = self.tree.read_blob(node).await.expect("must open blob");
        let mut buf = Vec::new();
        r.read_to_end(&mut buf).await.expect("must read blob");
        buf
    }

    /// Re-reads a node from disk.
    pub fn reread(&self, node: &Node) -> Node {
        self.tree
            .lookup()
            .read_node(&node.space_id, &node.id)
            .expect("must read node")
    }

    pub fn tree_size(&self, node: &Node) -> u64 {
        self.tree
            .lookup()
            .tree_size(node)
            .expect("must read tree size")
            .expect("tree size must be set")
    }

    pub fn child(&self, parent: &Node, name: &str) -> Node {
        self.tree
            .lookup()
            .child(parent, name)
            .expect("child lookup must succeed")
    }

    pub async fn names(&self, dir: &Node) -> Vec<String> {
        let mut names: Vec<String> = self
            .tree
            .list_folder(&self.ctx, dir)
            .await
            .expect("list_folder must succeed")
            .into_iter()
            .map(|n| n.name)
            .collect();
        names.sort();
        names
    }
}
