//! Attribute keys of the node metadata.

pub const OCIS_PREFIX: &str = "user.ocis.";

pub const PARENT_ID: &str = "user.ocis.parentid";
pub const NAME: &str = "user.ocis.name";
pub const TYPE: &str = "user.ocis.type";
pub const BLOB_ID: &str = "user.ocis.blobid";
pub const BLOB_SIZE: &str = "user.ocis.blobsize";
pub const TREE_SIZE: &str = "user.ocis.treesize";
/// Tree modification time, maintained by propagation.
pub const TMTIME: &str = "user.ocis.tmtime";
pub const MTIME: &str = "user.ocis.mtime";
/// Directories with this flag take part in propagation.
pub const PROPAGATION: &str = "user.ocis.propagation";
pub const TRASH_ORIGIN: &str = "user.ocis.trash.origin";
pub const STATUS: &str = "user.ocis.nodestatus";

pub const SPACE_NAME: &str = "user.ocis.space.name";
pub const SPACE_TYPE: &str = "user.ocis.space.type";
pub const OWNER_ID: &str = "user.ocis.owner.id";
pub const QUOTA: &str = "user.ocis.quota";
/// Deletion time of a disabled space.
pub const DTIME: &str = "user.ocis.dtime";

pub const GRANT_PREFIX: &str = "user.ocis.grant.";

pub const PROCESSING_STATUS: &str = "processing:";
