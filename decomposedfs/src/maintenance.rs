//! Consistency checks and repairs of a storage root.
use std::path::Path;

use futures::future::BoxFuture;
use serde::Serialize;
use tracing::{info, instrument, warn};
use walkdir::WalkDir;

use crate::{
    context::RequestContext,
    errors::Error,
    ids::{NodeId, SpaceId},
    metadata::{keys, AttributeStore, Backend, SidecarBackend},
    node::Node,
    tree::Tree,
};

/// A directory whose stored tree size differs from the sum of its children.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct TreeSizeMismatch {
    pub node_id: NodeId,
    pub path: String,
    pub stored: Option<u64>,
    pub computed: u64,
}

/// Recomputes the tree sizes of all directories of a space bottom-up and
/// reports every directory whose stored size differs. With `repair`, the
/// computed sizes are written back.
///
/// Listing ignores the request user, so grants cannot hide children.
#[instrument(skip_all, err, fields(space = %space_id, repair = repair))]
pub async fn check_tree_size(
    tree: &Tree,
    ctx: &RequestContext,
    space_id: &SpaceId,
    repair: bool,
) -> Result<Vec<TreeSizeMismatch>, Error> {
    let ctx = RequestContext::new().with_cancellation(ctx.cancellation().clone());
    let root = tree.lookup().node_from_space_id(space_id)?;

    let mut mismatches = Vec::new();
    check_dir(tree, &ctx, &root, String::new(), repair, &mut mismatches).await?;
    if mismatches.is_empty() {
        info!("all tree sizes are consistent");
    }
    Ok(mismatches)
}

fn check_dir<'a>(
    tree: &'a Tree,
    ctx: &'a RequestContext,
    dir: &'a Node,
    path: String,
    repair: bool,
    mismatches: &'a mut Vec<TreeSizeMismatch>,
) -> BoxFuture<'a, Result<u64, Error>> {
    Box::pin(async move {
        let mut computed = 0u64;
        for child in tree.list_folder(ctx, dir).await? {
            let size = if child.is_dir() {
                let child_path = format!("{path}/{}", child.name);
                check_dir(tree, ctx, &child, child_path, repair, mismatches).await?
            } else {
                child.blob_size
            };
            computed = computed.saturating_add(size);
        }

        let stored = tree.lookup().tree_size(dir)?;
        if stored != Some(computed) {
            let path = if path.is_empty() { "/".to_string() } else { path };
            warn!(node.id = %dir.id, path, ?stored, computed, "tree size mismatch");
            if repair {
                let _guard = tree.lookup().locks().lock(dir.internal_path()).await;
                tree.lookup()
                    .set_attr(dir, keys::TREE_SIZE, computed.to_string())?;
            }
            mismatches.push(TreeSizeMismatch {
                node_id: dir.id.clone(),
                path,
                stored,
                computed,
            });
        }
        Ok(computed)
    })
}

/// Guesses the metadata backend a storage root was written with. Returns
/// None if the root holds no nodes yet.
pub fn detect_backend_on_disk(root: &Path) -> Option<Backend> {
    let sidecar = SidecarBackend::default();
    let mut saw_node = false;
    for entry in WalkDir::new(root.join("spaces"))
        .into_iter()
        .filter_map(Result::ok)
        .filter(|e| e.file_type().is_file() || e.file_type().is_dir())
    {
        if sidecar.is_meta_file(entry.path()) {
            return Some(Backend::Sidecar);
        }
        if entry
            .path()
            .components()
            .any(|c| c.as_os_str() == "nodes")
            && entry.depth() > 2
        {
            saw_node = true;
        }
    }
    saw_node.then_some(Backend::Xattrs)
}
