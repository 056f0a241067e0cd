use std::io;

use tracing::{debug, instrument};

use super::Tree;
use crate::{
    context::RequestContext,
    errors::Error,
    node::{
        locks::{read_lock_file, write_lock_file, Lock},
        Node,
    },
};

impl Tree {
    /// Locks `node`. Fails with [Error::Locked] if it is locked already.
    #[instrument(skip_all, err, fields(node.id = %node.id, lock.id = %lock.lock_id))]
    pub async fn set_lock(&self, ctx: &RequestContext, node: &Node, lock: &Lock) -> Result<(), Error> {
        ensure_exists(node)?;
        let path = node.lock_file_path();
        let _guard = self.lookup.locks().lock(&path).await;

        if let Some(existing) = read_lock_file(&path)? {
            return Err(Error::Locked(format!(
                "{} is locked by {}",
                node.id, existing.lock_id
            )));
        }
        debug!(user = ?ctx.user().map(|u| &u.id), "setting lock");
        write_lock_file(&path, lock, true)
    }

    /// Returns the active lock of `node`, if any.
    pub async fn read_lock(&self, _ctx: &RequestContext, node: &Node) -> Result<Option<Lock>, Error> {
        ensure_exists(node)?;
        let path = node.lock_file_path();
        let _guard = self.lookup.locks().lock(&path).await;
        read_lock_file(&path)
    }

    /// Replaces the active lock by `lock`, e.g. to extend its expiration.
    /// `existing_lock_id` selects the lock to replace when the id changes.
    #[instrument(skip_all, err, fields(node.id = %node.id, lock.id = %lock.lock_id))]
    pub async fn refresh_lock(
        &self,
        ctx: &RequestContext,
        node: &Node,
        lock: &Lock,
        existing_lock_id: Option<&str>,
    ) -> Result<(), Error> {
        ensure_exists(node)?;
        let path = node.lock_file_path();
        let _guard = self.lookup.locks().lock(&path).await;

        let Some(old) = read_lock_file(&path)? else {
            return Err(Error::PreconditionFailed("lock does not exist".into()));
        };
        let expected = existing_lock_id.unwrap_or(&lock.lock_id);
        if old.lock_id != expected {
            return Err(Error::PreconditionFailed("mismatching lock id".into()));
        }
        old.allows_modification(lock, ctx.user().map(|u| u.id.as_str()))?;
        write_lock_file(&path, lock, false)
    }

    /// Removes the lock `lock` from `node`.
    #[instrument(skip_all, err, fields(node.id = %node.id, lock.id = %lock.lock_id))]
    pub async fn unlock(&self, ctx: &RequestContext, node: &Node, lock: &Lock) -> Result<(), Error> {
        ensure_exists(node)?;
        let path = node.lock_file_path();
        let _guard = self.lookup.locks().lock(&path).await;

        let Some(old) = read_lock_file(&path)? else {
            return Err(Error::PreconditionFailed("lock does not exist".into()));
        };
        if old.lock_id != lock.lock_id {
            return Err(Error::Locked(format!(
                "{} is locked by {}",
                node.id, old.lock_id
            )));
        }
        old.allows_modification(lock, ctx.user().map(|u| u.id.as_str()))?;

        match tokio::fs::remove_file(&path).await {
            Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e.into()),
            _ => Ok(()),
        }
    }

    /// Verifies that the request may modify `node` with respect to its lock.
    ///
    /// A locked node requires the request to carry the matching lock id, a
    /// request carrying a lock id requires the node to be locked.
    pub async fn check_lock(&self, ctx: &RequestContext, node: &Node) -> Result<(), Error> {
        if !node.exists {
            return Ok(());
        }
        let lock = read_lock_file(&node.lock_file_path())?;
        match (lock, ctx.lock_id()) {
            (None, None) => Ok(()),
            (None, Some(_)) => Err(Error::PreconditionFailed(format!(
                "{} is not locked",
                node.id
            ))),
            (Some(lock), None) => Err(Error::Locked(format!(
                "{} is locked by {}",
                node.id, lock.lock_id
            ))),
            (Some(lock), Some(id)) if lock.lock_id == id => Ok(()),
            (Some(_), Some(_)) => Err(Error::PreconditionFailed("mismatching lock id".into())),
        }
    }
}

fn ensure_exists(node: &Node) -> Result<(), Error> {
    if node.exists {
        Ok(())
    } else {
        Err(Error::NotFound(format!("node {}", node.id)))
    }
}
