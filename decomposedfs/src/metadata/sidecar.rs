use std::{
    collections::{hash_map::DefaultHasher, BTreeMap},
    ffi::OsString,
    hash::{Hash, Hasher},
    io::{self, Write},
    path::{Path, PathBuf},
};

use data_encoding::BASE64;
use parking_lot::{Mutex, MutexGuard};
use tracing::{debug, instrument};

use super::{AttributeStore, Attributes};

const SIDECAR_SUFFIX: &str = ".meta.json";
const LOCK_STRIPES: usize = 64;

/// Stores all attributes of a node in a JSON document next to it, at
/// `<node path>.meta.json`. Values are base64 encoded.
///
/// Documents are replaced atomically by writing a temporary file in the same
/// directory and renaming it over the old one. Read-modify-write cycles of the
/// same document are serialized by a set of striped in-process locks.
pub struct SidecarBackend {
    stripes: Vec<Mutex<()>>,
}

impl Default for SidecarBackend {
    fn default() -> Self {
        Self {
            stripes: (0..LOCK_STRIPES).map(|_| Mutex::new(())).collect(),
        }
    }
}

fn sidecar_path(path: &Path) -> PathBuf {
    let mut s: OsString = path.as_os_str().to_owned();
    s.push(SIDECAR_SUFFIX);
    PathBuf::from(s)
}

fn ensure_node_exists(path: &Path) -> io::Result<()> {
    std::fs::symlink_metadata(path).map(|_| ())
}

impl SidecarBackend {
    fn stripe(&self, path: &Path) -> MutexGuard<'_, ()> {
        let mut hasher = DefaultHasher::new();
        path.hash(&mut hasher);
        self.stripes[hasher.finish() as usize % self.stripes.len()].lock()
    }

    fn read(&self, path: &Path) -> io::Result<Attributes> {
        let raw = match std::fs::read(sidecar_path(path)) {
            Ok(raw) => raw,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Attributes::new()),
            Err(e) => return Err(e),
        };
        let doc: BTreeMap<String, String> = serde_json::from_slice(&raw)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;

        doc.into_iter()
            .map(|(k, v)| {
                BASE64
                    .decode(v.as_bytes())
                    .map(|v| (k, v))
                    .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
            })
            .collect()
    }

    fn write(&self, path: &Path, attrs: &Attributes) -> io::Result<()> {
        let doc: BTreeMap<&str, String> =
            attrs.iter().map(|(k, v)| (k, BASE64.encode(v))).collect();
        let dst = sidecar_path(path);
        let dir = dst.parent().unwrap_or(Path::new("."));

        let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
        serde_json::to_writer(&mut tmp, &doc)?;
        tmp.flush()?;
        tmp.persist(&dst).map_err(|e| e.error)?;
        Ok(())
    }
}

impl AttributeStore for SidecarBackend {
    fn name(&self) -> &'static str {
        "sidecar"
    }

    fn get(&self, path: &Path, key: &str) -> io::Result<Option<Vec<u8>>> {
        Ok(self.all(path)?.remove(key))
    }

    fn all(&self, path: &Path) -> io::Result<Attributes> {
        ensure_node_exists(path)?;
        let _guard = self.stripe(path);
        self.read(path)
    }

    #[instrument(skip_all, err, fields(path = %path.display()))]
    fn set_multiple(&self, path: &Path, attrs: &Attributes) -> io::Result<()> {
        ensure_node_exists(path)?;
        let _guard = self.stripe(path);
        let mut current = self.read(path)?;
        current.extend(attrs.iter().map(|(k, v)| (k.to_string(), v.to_vec())));
        self.write(path, &current)
    }

    fn remove(&self, path: &Path, key: &str) -> io::Result<()> {
        ensure_node_exists(path)?;
        let _guard = self.stripe(path);
        let mut current = self.read(path)?;
        if current.remove(key).is_none() {
            return Ok(());
        }
        self.write(path, &current)
    }

    fn rename(&self, old: &Path, new: &Path) -> io::Result<()> {
        match std::fs::rename(sidecar_path(old), sidecar_path(new)) {
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!(path = %old.display(), "no sidecar to rename");
                Ok(())
            }
            r => r,
        }
    }

    fn purge(&self, path: &Path) -> io::Result<()> {
        match std::fs::remove_file(sidecar_path(path)) {
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            r => r,
        }
    }

    fn is_meta_file(&self, path: &Path) -> bool {
        path.as_os_str()
            .to_str()
            .is_some_and(|p| p.ends_with(SIDECAR_SUFFIX))
    }
}
