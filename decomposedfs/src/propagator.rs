//! Aggregation of tree size and tree modification time towards the space root.
use async_trait::async_trait;
use chrono::Utc;
use tracing::{debug, instrument, warn};

use crate::{
    errors::Error,
    lookup::Lookup,
    metadata::{keys, Attributes},
    node::Node,
    options::{Options, SizeAccounting},
};

/// Updates the aggregates of the ancestors of a changed node.
///
/// Propagation is best effort: callers log failures instead of failing the
/// operation that triggered it.
#[async_trait]
pub trait Propagator: Send + Sync {
    /// Walks from the parent of `node` up to the space root, applying
    /// `size_diff` to every ancestor taking part in propagation.
    async fn propagate(&self, lookup: &Lookup, node: &Node, size_diff: i64) -> Result<(), Error>;
}

/// Propagates on the caller's task, holding the metadata lock of one
/// ancestor at a time.
#[derive(Clone, Debug)]
pub struct SyncPropagator {
    tree_time_accounting: bool,
    tree_size_accounting: bool,
    size_accounting: SizeAccounting,
}

impl SyncPropagator {
    pub fn new(options: &Options) -> Self {
        Self {
            tree_time_accounting: options.tree_time_accounting,
            tree_size_accounting: options.tree_size_accounting,
            size_accounting: options.size_accounting,
        }
    }
}

fn apply_diff(tree_size: u64, size_diff: i64, node: &Node) -> u64 {
    if size_diff >= 0 {
        return tree_size.saturating_add(size_diff.unsigned_abs());
    }
    let sub = size_diff.unsigned_abs();
    if sub > tree_size {
        warn!(node.id = %node.id, tree_size, size_diff, "tree size would become negative, clamping to 0");
        return 0;
    }
    tree_size - sub
}

/// Sums up the sizes of the immediate children of the directory `dir`.
/// Children with unset sizes count as zero.
pub fn calculate_tree_size(lookup: &Lookup, dir: &Node) -> Result<u64, Error> {
    let mut size = 0u64;
    for name in lookup.binding().list(dir.internal_path())? {
        let Some(id) = lookup.resolve_child_id(dir.internal_path(), &name)? else {
            continue;
        };
        let child_path = lookup.layout().node_path(&dir.space_id, &id);
        let attrs = match lookup.metadata().all(&child_path) {
            Ok(attrs) => attrs,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(%id, name, "skipping dangling child");
                continue;
            }
            Err(e) => return Err(e.into()),
        };
        let child_size = if lookup.type_from_path(&child_path) == crate::node::NodeType::Container {
            attrs.tree_size()
        } else {
            attrs.blob_size()
        };
        size = size.saturating_add(child_size.unwrap_or_default());
    }
    Ok(size)
}

#[async_trait]
impl Propagator for SyncPropagator {
    #[instrument(skip_all, err, fields(space = %node.space_id, node.id = %node.id, size_diff = size_diff))]
    async fn propagate(&self, lookup: &Lookup, node: &Node, size_diff: i64) -> Result<(), Error> {
        if !self.tree_time_accounting && (!self.tree_size_accounting || size_diff == 0) {
            return Ok(());
        }

        let now = Utc::now();
        let mut current = node.clone();
        while !current.is_space_root() {
            let Some(parent_id) = current.parent_id.clone() else {
                break;
            };
            let parent_path = lookup.layout().node_path(&current.space_id, &parent_id);
            let _guard = lookup.locks().lock(&parent_path).await;

            let parent = lookup.read_node(&current.space_id, &parent_id)?;
            let attrs = lookup.attrs(&parent)?;
            if !attrs.has_propagation() {
                debug!(parent.id = %parent.id, "propagation disabled, stopping");
                break;
            }

            let mut update = Attributes::new();
            if self.tree_time_accounting {
                match attrs.tmtime() {
                    Some(tmtime) if tmtime >= now => {
                        debug!(parent.id = %parent.id, %tmtime, "parent tmtime is newer, not updating")
                    }
                    _ => {
                        update.set_time(keys::TMTIME, &now);
                    }
                }
            }

            if self.tree_size_accounting && size_diff != 0 {
                let new_size = match (self.size_accounting, attrs.tree_size()) {
                    (SizeAccounting::Delta, Some(tree_size)) => {
                        apply_diff(tree_size, size_diff, &parent)
                    }
                    // unset tree sizes are recounted
                    _ => calculate_tree_size(lookup, &parent)?,
                };
                update.set_u64(keys::TREE_SIZE, new_size);
            }

            if !update.is_empty() {
                lookup.set_attrs(&parent, &update)?;
            }
            current = parent;
        }
        Ok(())
    }
}
