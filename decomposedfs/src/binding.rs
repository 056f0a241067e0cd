//! Name to identifier bindings, which make a node visible inside its parent.
use std::{io, path::Path};

use tracing::{instrument, warn};

use crate::{
    ids::NodeId,
    layout::{child_link_target, id_from_child_link},
};

/// Associates a name inside a parent node with the id of a child node.
///
/// All mutations are atomic: a concurrent reader either sees the old or the
/// new binding, never an intermediate state.
pub trait Binding: Send + Sync {
    /// Creates the binding. Fails with [io::ErrorKind::AlreadyExists] if the
    /// name is already bound.
    fn bind(&self, parent: &Path, name: &str, child: &NodeId) -> io::Result<()>;

    /// Returns the id bound to `name`, None if the name is unbound.
    fn resolve(&self, parent: &Path, name: &str) -> io::Result<Option<NodeId>>;

    /// Removes the binding.
    fn unbind(&self, parent: &Path, name: &str) -> io::Result<()>;

    /// Moves a binding, replacing whatever is bound at the destination.
    fn rebind(
        &self,
        old_parent: &Path,
        old_name: &str,
        new_parent: &Path,
        new_name: &str,
    ) -> io::Result<()>;

    /// Lists all names bound inside `parent`.
    fn list(&self, parent: &Path) -> io::Result<Vec<String>>;
}

/// Bindings realized as relative symlinks inside the parent node directory,
/// pointing to the child node location.
#[derive(Clone, Copy, Debug, Default)]
pub struct SymlinkBinding;

impl Binding for SymlinkBinding {
    #[instrument(skip_all, err, fields(name = %name, child = %child))]
    fn bind(&self, parent: &Path, name: &str, child: &NodeId) -> io::Result<()> {
        std::os::unix::fs::symlink(child_link_target(child), parent.join(name))
    }

    fn resolve(&self, parent: &Path, name: &str) -> io::Result<Option<NodeId>> {
        let target = match std::fs::read_link(parent.join(name)) {
            Ok(target) => target,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e),
        };
        let target = target.to_string_lossy();
        id_from_child_link(&target).map(Some).ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::InvalidData,
                format!("invalid child link {name:?} -> {target:?}"),
            )
        })
    }

    fn unbind(&self, parent: &Path, name: &str) -> io::Result<()> {
        std::fs::remove_file(parent.join(name))
    }

    fn rebind(
        &self,
        old_parent: &Path,
        old_name: &str,
        new_parent: &Path,
        new_name: &str,
    ) -> io::Result<()> {
        std::fs::rename(old_parent.join(old_name), new_parent.join(new_name))
    }

    fn list(&self, parent: &Path) -> io::Result<Vec<String>> {
        let mut names = Vec::new();
        for entry in std::fs::read_dir(parent)? {
            let entry = entry?;
            if !entry.file_type()?.is_symlink() {
                continue;
            }
            match entry.file_name().into_string() {
                Ok(name) => names.push(name),
                Err(name) => warn!(?name, parent = %parent.display(), "skipping non-utf8 child"),
            }
        }
        Ok(names)
    }
}
