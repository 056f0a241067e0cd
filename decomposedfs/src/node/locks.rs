//! WebDAV style resource locks, persisted as JSON in a file next to the node.
use std::{
    fs::OpenOptions,
    io::{self, Write},
    path::Path,
};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::Error;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LockType {
    Shared,
    #[default]
    Exclusive,
    Write,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lock {
    pub lock_id: String,
    #[serde(default)]
    pub lock_type: LockType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
    #[serde(default)]
    pub app_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expiration: Option<DateTime<Utc>>,
}

impl Lock {
    pub fn new(lock_id: impl Into<String>) -> Self {
        Self {
            lock_id: lock_id.into(),
            lock_type: LockType::default(),
            user: None,
            app_name: String::new(),
            expiration: None,
        }
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expiration.is_some_and(|exp| now > exp)
    }

    /// Whether `new` may replace or remove this lock on behalf of `user`.
    pub fn allows_modification(&self, new: &Lock, user: Option<&str>) -> Result<(), Error> {
        if self.lock_type == LockType::Shared {
            return Ok(());
        }
        if self.app_name != new.app_name {
            return Err(Error::PermissionDenied(
                "app names of the locks are mismatching".into(),
            ));
        }
        if self.user.is_none() && new.user.is_none() {
            return Ok(());
        }
        if self.user != new.user {
            return Err(Error::PermissionDenied(
                "users of the locks are mismatching".into(),
            ));
        }
        if self.user.as_deref() != user {
            return Err(Error::PermissionDenied(
                "lock holder and current user are mismatching".into(),
            ));
        }
        Ok(())
    }
}

/// Reads the lock file. Returns None if there is none, or if it expired (in
/// which case it is removed).
pub fn read_lock_file(path: &Path) -> Result<Option<Lock>, Error> {
    let raw = match std::fs::read(path) {
        Ok(raw) => raw,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    let lock: Lock = serde_json::from_slice(&raw)
        .map_err(|e| Error::corrupt(path.display(), format!("invalid lock file: {e}")))?;

    if lock.is_expired(Utc::now()) {
        match std::fs::remove_file(path) {
            Err(e) if e.kind() != io::ErrorKind::NotFound => return Err(e.into()),
            _ => return Ok(None),
        }
    }
    Ok(Some(lock))
}

/// Writes the lock file. With `create_new`, fails if a lock file exists.
pub fn write_lock_file(path: &Path, lock: &Lock, create_new: bool) -> Result<(), Error> {
    let mut options = OpenOptions::new();
    options.write(true);
    if create_new {
        options.create_new(true);
    } else {
        options.truncate(true);
    }
    let mut f = options.open(path).map_err(|e| match e.kind() {
        io::ErrorKind::AlreadyExists => Error::PreconditionFailed("already locked".into()),
        io::ErrorKind::NotFound => Error::PreconditionFailed("lock does not exist".into()),
        _ => e.into(),
    })?;
    serde_json::to_writer(&mut f, lock).map_err(io::Error::from)?;
    f.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, Utc};
    use tempfile::TempDir;

    use super::*;

    #[test]
    fn write_read_expire() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("node.mlock");

        assert_eq!(None, read_lock_file(&path).unwrap());

        let mut lock = Lock::new("lock-1");
        write_lock_file(&path, &lock, true).unwrap();
        assert_eq!(Some(lock.clone()), read_lock_file(&path).unwrap());

        assert!(matches!(
            write_lock_file(&path, &lock, true),
            Err(Error::PreconditionFailed(_))
        ));

        lock.expiration = Some(Utc::now() - Duration::seconds(1));
        write_lock_file(&path, &lock, false).unwrap();
        assert_eq!(None, read_lock_file(&path).unwrap());
        assert!(!path.exists(), "expired lock must be removed");
    }

    #[test]
    fn modification_rules() {
        let mut held = Lock::new("lock-1");
        held.user = Some("einstein".into());
        held.app_name = "office".into();

        let same = held.clone();
        assert!(held.allows_modification(&same, Some("einstein")).is_ok());
        assert!(matches!(
            held.allows_modification(&same, Some("marie")),
            Err(Error::PermissionDenied(_))
        ));

        let mut other_app = held.clone();
        other_app.app_name = "editor".into();
        assert!(held.allows_modification(&other_app, Some("einstein")).is_err());

        held.lock_type = LockType::Shared;
        assert!(held.allows_modification(&other_app, None).is_ok());
    }
}
