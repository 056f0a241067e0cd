//! Node metadata, stored as individually addressable key/value attributes of
//! the node's physical location.
use std::{io, path::Path, sync::Arc};

use serde::{Deserialize, Serialize};

mod attributes;
pub mod keys;
mod locks;
mod sidecar;
mod xattrs;


pub use self::attributes::Attributes;
pub use self::locks::{NodeLockGuard, NodeLocks};
pub use self::sidecar::SidecarBackend;
pub use self::xattrs::XattrsBackend;

/// The base trait all attribute backends need to implement.
///
/// Attributes are scoped to the physical location of a node. Each key is
/// stored independently: a failed write only affects the keys it was issued
/// for. Operating on a location that does not exist fails with
/// [io::ErrorKind::NotFound].
pub trait AttributeStore: Send + Sync {
    /// Name of the backend, for logging.
    fn name(&self) -> &'static str;

    /// Read a single attribute, None if unset.
    fn get(&self, path: &Path, key: &str) -> io::Result<Option<Vec<u8>>>;

    /// Read all attributes of the node.
    fn all(&self, path: &Path) -> io::Result<Attributes>;

    /// Write a single attribute.
    fn set(&self, path: &Path, key: &str, value: &[u8]) -> io::Result<()> {
        let mut attrs = Attributes::new();
        attrs.set(key, value);
        self.set_multiple(path, &attrs)
    }

    /// Write a batch of attributes.
    fn set_multiple(&self, path: &Path, attrs: &Attributes) -> io::Result<()>;

    /// Remove a single attribute. Removing an unset attribute is not an error.
    fn remove(&self, path: &Path, key: &str) -> io::Result<()>;

    /// Called after the node at `old` has been renamed to `new`.
    fn rename(&self, old: &Path, new: &Path) -> io::Result<()>;

    /// Called after the node at `path` has been removed.
    fn purge(&self, path: &Path) -> io::Result<()>;

    /// Whether `path` is a file owned by the backend rather than a node.
    fn is_meta_file(&self, path: &Path) -> bool;
}

impl<A> AttributeStore for A
where
    A: AsRef<dyn AttributeStore> + Send + Sync,
{
    fn name(&self) -> &'static str {
        self.as_ref().name()
    }

    fn get(&self, path: &Path, key: &str) -> io::Result<Option<Vec<u8>>> {
        self.as_ref().get(path, key)
    }

    fn all(&self, path: &Path) -> io::Result<Attributes> {
        self.as_ref().all(path)
    }

    fn set(&self, path: &Path, key: &str, value: &[u8]) -> io::Result<()> {
        self.as_ref().set(path, key, value)
    }

    fn set_multiple(&self, path: &Path, attrs: &Attributes) -> io::Result<()> {
        self.as_ref().set_multiple(path, attrs)
    }

    fn remove(&self, path: &Path, key: &str) -> io::Result<()> {
        self.as_ref().remove(path, key)
    }

    fn rename(&self, old: &Path, new: &Path) -> io::Result<()> {
        self.as_ref().rename(old, new)
    }

    fn purge(&self, path: &Path) -> io::Result<()> {
        self.as_ref().purge(path)
    }

    fn is_meta_file(&self, path: &Path) -> bool {
        self.as_ref().is_meta_file(path)
    }
}

/// Selects the attribute backend.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    /// Extended attributes of the filesystem.
    #[default]
    Xattrs,
    /// A JSON file next to every node.
    Sidecar,
}

impl Backend {
    pub fn build(self) -> Arc<dyn AttributeStore> {
        match self {
            Backend::Xattrs => Arc::new(XattrsBackend),
            Backend::Sidecar => Arc::new(SidecarBackend::default()),
        }
    }
}

impl std::str::FromStr for Backend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "xattrs" => Ok(Backend::Xattrs),
            "sidecar" => Ok(Backend::Sidecar),
            other => Err(format!("unknown metadata backend: {other}")),
        }
    }
}
