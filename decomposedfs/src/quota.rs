use tracing::debug;

use crate::{errors::Error, lookup::Lookup, metadata::keys, node::Node};

/// Decides whether a write of `new_size` bytes may proceed in a space.
pub trait QuotaChecker: Send + Sync {
    /// `old_size` is the size being replaced when `overwrite` is set.
    fn check(
        &self,
        lookup: &Lookup,
        space_root: &Node,
        overwrite: bool,
        old_size: u64,
        new_size: u64,
    ) -> Result<(), Error>;
}

/// Compares the quota attribute of the space root against its tree size.
/// An unset, zero or negative quota means unlimited.
#[derive(Clone, Copy, Debug, Default)]
pub struct SpaceQuota;

impl QuotaChecker for SpaceQuota {
    fn check(
        &self,
        lookup: &Lookup,
        space_root: &Node,
        overwrite: bool,
        old_size: u64,
        new_size: u64,
    ) -> Result<(), Error> {
        let attrs = lookup.attrs(space_root)?;
        let quota = match attrs.get_str(keys::QUOTA).map(|q| q.parse::<i64>()) {
            None => return Ok(()),
            Some(Ok(q)) if q <= 0 => return Ok(()),
            Some(Ok(q)) => q.unsigned_abs(),
            Some(Err(e)) => {
                return Err(Error::corrupt(&space_root.id, format!("invalid quota: {e}")))
            }
        };
        let used = attrs.tree_size().unwrap_or_default();
        debug!(quota, used, old_size, new_size, overwrite, "checking quota");

        let exceeded = if overwrite {
            quota < used.saturating_sub(old_size).saturating_add(new_size)
        } else {
            quota < used || new_size > quota - used
        };
        if exceeded {
            return Err(Error::InsufficientStorage(format!(
                "quota exceeded in space {}",
                space_root.space_id
            )));
        }
        Ok(())
    }
}

/// Never rejects a write.
#[derive(Clone, Copy, Debug, Default)]
pub struct Unlimited;

impl QuotaChecker for Unlimited {
    fn check(&self, _: &Lookup, _: &Node, _: bool, _: u64, _: u64) -> Result<(), Error> {
        Ok(())
    }
}
