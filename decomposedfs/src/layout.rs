//! Mapping of identifiers to physical locations below the storage root.
//!
//! ```text
//! <root>/spaces/<sp[0:2]>/<sp[2:]>/nodes/<id[0:2]>/<id[2:4]>/<id[4:6]>/<id[6:8]>/<id[8:]>
//! <root>/spaces/<sp[0:2]>/<sp[2:]>/trash/<id[0:2]>/.../<id[8:]>  -> trashed node
//! <root>/indexes/by-type/<space type>/<space id>                 -> space root
//! ```
use std::{
    ffi::OsString,
    path::{Path, PathBuf},
};

use chrono::{DateTime, SecondsFormat, Utc};

use crate::ids::NodeId;

/// Separates a node path from the deletion time of a trashed node.
pub const TRASH_DELIMITER: &str = ".T.";
/// Separates a node path from the creation time of a content revision.
pub const REVISION_DELIMITER: &str = ".REV.";
/// Suffix of the file holding a WebDAV style lock of a node.
pub const LOCK_SUFFIX: &str = ".mlock";

/// Splits `id` into `depth` segments of `width` characters, followed by the
/// rest. Stops early when the remainder would be empty.
pub fn pathify(id: &str, depth: usize, width: usize) -> String {
    let mut out = String::with_capacity(id.len() + depth);
    let mut i = 0;
    while i < depth && id.len() > i * width + width {
        out.push_str(&id[i * width..i * width + width]);
        out.push('/');
        i += 1;
    }
    out.push_str(&id[i * width..]);
    out
}

pub fn format_time(t: &DateTime<Utc>) -> String {
    t.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

pub fn parse_time(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .ok()
        .map(|t| t.with_timezone(&Utc))
}

fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut s: OsString = path.as_os_str().to_owned();
    s.push(suffix);
    PathBuf::from(s)
}

/// Path of a node after it was moved to the trash at `deletion_time`.
pub fn trashed_path(node_path: &Path, deletion_time: &str) -> PathBuf {
    with_suffix(node_path, &format!("{TRASH_DELIMITER}{deletion_time}"))
}

/// Path of the revision of a node created at `time`.
pub fn revision_path(node_path: &Path, time: &str) -> PathBuf {
    with_suffix(node_path, &format!("{REVISION_DELIMITER}{time}"))
}

pub fn lock_file_path(node_path: &Path) -> PathBuf {
    with_suffix(node_path, LOCK_SUFFIX)
}

/// Target of the child binding symlink, relative to the parent node directory.
pub fn child_link_target(id: &NodeId) -> String {
    format!("../../../../../{}", pathify(id.as_str(), 4, 2))
}

/// Extracts the node id from a child binding symlink target.
pub fn id_from_child_link(target: &str) -> Option<NodeId> {
    target
        .trim_start_matches(['/', '.'])
        .replace('/', "")
        .try_into()
        .ok()
}

/// Target of a trash index link, relative to the link location.
pub fn trash_link_target(id: &NodeId, deletion_time: &str) -> String {
    format!(
        "../../../../../nodes/{}{TRASH_DELIMITER}{deletion_time}",
        pathify(id.as_str(), 4, 2)
    )
}

/// Splits a trash index link target into the trashed node id and its
/// deletion time.
pub fn parse_trash_link_target(target: &str) -> Option<(NodeId, String)> {
    let rest = target.trim_start_matches(['/', '.']);
    let rest = rest.strip_prefix("nodes/").unwrap_or(rest);
    let (id, time) = rest.split_once(TRASH_DELIMITER)?;
    let id = NodeId::try_from(id.replace('/', "")).ok()?;
    Some((id, time.to_string()))
}

/// Computes internal paths below a storage root.
#[derive(Clone, Debug)]
pub struct Layout {
    root: PathBuf,
}

impl Layout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn spaces_dir(&self) -> PathBuf {
        self.root.join("spaces")
    }

    pub fn space_dir(&self, space_id: &NodeId) -> PathBuf {
        self.spaces_dir().join(pathify(space_id.as_str(), 1, 2))
    }

    pub fn nodes_dir(&self, space_id: &NodeId) -> PathBuf {
        self.space_dir(space_id).join("nodes")
    }

    pub fn node_path(&self, space_id: &NodeId, id: &NodeId) -> PathBuf {
        self.nodes_dir(space_id).join(pathify(id.as_str(), 4, 2))
    }

    pub fn trash_dir(&self, space_id: &NodeId) -> PathBuf {
        self.space_dir(space_id).join("trash")
    }

    pub fn trash_link_path(&self, space_id: &NodeId, id: &NodeId) -> PathBuf {
        self.trash_dir(space_id).join(pathify(id.as_str(), 4, 2))
    }

    pub fn indexes_dir(&self) -> PathBuf {
        self.root.join("indexes").join("by-type")
    }

    pub fn type_index_dir(&self, space_type: &str) -> PathBuf {
        self.indexes_dir().join(space_type)
    }

    pub fn type_index_link(&self, space_type: &str, space_id: &NodeId) -> PathBuf {
        self.type_index_dir(space_type).join(space_id.as_str())
    }

    /// Target of a by-type index link, relative to the link location.
    pub fn type_index_target(space_id: &NodeId) -> String {
        format!(
            "../../../spaces/{}/nodes/{}",
            pathify(space_id.as_str(), 1, 2),
            pathify(space_id.as_str(), 4, 2)
        )
    }

    pub fn uploads_dir(&self) -> PathBuf {
        self.root.join("uploads")
    }
}
