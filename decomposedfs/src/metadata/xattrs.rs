use std::{io, path::Path};

use tracing::instrument;

use super::{keys, AttributeStore, Attributes};

/// Stores attributes as extended attributes of the node file or directory.
///
/// Renames and removals of the node carry the attributes along, so
/// [AttributeStore::rename] and [AttributeStore::purge] have nothing to do.
#[derive(Clone, Copy, Debug, Default)]
pub struct XattrsBackend;

impl AttributeStore for XattrsBackend {
    fn name(&self) -> &'static str {
        "xattrs"
    }

    fn get(&self, path: &Path, key: &str) -> io::Result<Option<Vec<u8>>> {
        xattr::get(path, key)
    }

    #[instrument(skip_all, err, fields(path = %path.display()))]
    fn all(&self, path: &Path) -> io::Result<Attributes> {
        let mut attrs = Attributes::new();
        for name in xattr::list(path)? {
            let Some(key) = name.to_str() else { continue };
            if !key.starts_with(keys::OCIS_PREFIX) {
                continue;
            }
            // the attribute may have been removed since listing
            if let Some(value) = xattr::get(path, key)? {
                attrs.set(key, value);
            }
        }
        Ok(attrs)
    }

    fn set_multiple(&self, path: &Path, attrs: &Attributes) -> io::Result<()> {
        for (key, value) in attrs.iter() {
            xattr::set(path, key, value)?;
        }
        Ok(())
    }

    fn remove(&self, path: &Path, key: &str) -> io::Result<()> {
        if xattr::get(path, key)?.is_none() {
            return Ok(());
        }
        xattr::remove(path, key)
    }

    fn rename(&self, _old: &Path, _new: &Path) -> io::Result<()> {
        Ok(())
    }

    fn purge(&self, _path: &Path) -> io::Result<()> {
        Ok(())
    }

    fn is_meta_file(&self, _path: &Path) -> bool {
        false
    }
}

/// Checks whether the filesystem at `dir` accepts `user.` extended attributes.
pub fn supported(dir: &Path) -> bool {
    let probe = dir.join(".xattr-probe");
    let ok = std::fs::write(&probe, b"")
        .and_then(|_| xattr::set(&probe, "user.ocis.probe", b"1"))
        .is_ok();
    let _ = std::fs::remove_file(&probe);
    ok
}
