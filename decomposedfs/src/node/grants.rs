//! Per grantee permission sets stored as node attributes.
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::{
    context::User,
    errors::Error,
    metadata::{keys, Attributes},
};

/// A set of permissions on a node. A set with every permission false is a
/// deny grant.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Permissions {
    pub stat: bool,
    pub list_container: bool,
    pub initiate_file_download: bool,
    pub initiate_file_upload: bool,
    pub create_container: bool,
    #[serde(rename = "move")]
    pub move_: bool,
    pub delete: bool,
    pub list_recycle: bool,
    pub restore_recycle_item: bool,
    pub purge_recycle: bool,
    pub list_grants: bool,
    pub add_grant: bool,
    pub remove_grant: bool,
    pub get_quota: bool,
}

impl Permissions {
    pub fn deny() -> Self {
        Self::default()
    }

    pub fn viewer() -> Self {
        Self {
            stat: true,
            list_container: true,
            initiate_file_download: true,
            ..Self::default()
        }
    }

    pub fn editor() -> Self {
        Self {
            initiate_file_upload: true,
            create_container: true,
            move_: true,
            delete: true,
            list_recycle: true,
            restore_recycle_item: true,
            ..Self::viewer()
        }
    }

    pub fn manager() -> Self {
        Self {
            purge_recycle: true,
            list_grants: true,
            add_grant: true,
            remove_grant: true,
            get_quota: true,
            ..Self::editor()
        }
    }

    pub fn is_deny(&self) -> bool {
        *self == Self::deny()
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Grantee {
    User(String),
    Group(String),
}

impl Grantee {
    /// Attribute key the grant of this grantee is stored at.
    pub fn attr_key(&self) -> String {
        match self {
            Grantee::User(id) => format!("{}u:{id}", keys::GRANT_PREFIX),
            Grantee::Group(id) => format!("{}g:{id}", keys::GRANT_PREFIX),
        }
    }

    pub fn from_attr_key(key: &str) -> Option<Self> {
        let rest = key.strip_prefix(keys::GRANT_PREFIX)?;
        if let Some(id) = rest.strip_prefix("u:") {
            Some(Grantee::User(id.to_string()))
        } else {
            rest.strip_prefix("g:").map(|id| Grantee::Group(id.to_string()))
        }
    }

    fn matches(&self, user: &User) -> bool {
        match self {
            Grantee::User(id) => *id == user.id,
            Grantee::Group(id) => user.groups.iter().any(|g| g == id),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Grant {
    pub grantee: Grantee,
    pub permissions: Permissions,
}

impl Grant {
    pub fn encode(&self) -> Result<Vec<u8>, Error> {
        serde_json::to_vec(&self.permissions)
            .map_err(|e| Error::StorageError(format!("unable to encode grant: {e}")))
    }
}

/// Parses all grants stored in `attrs`.
pub fn read_grants(attrs: &Attributes) -> Result<Vec<Grant>, Error> {
    attrs
        .with_prefix(keys::GRANT_PREFIX)
        .map(|(key, value)| {
            let grantee = Grantee::from_attr_key(key)
                .ok_or_else(|| Error::corrupt(key, "unknown grantee type"))?;
            let permissions = serde_json::from_slice(value)
                .map_err(|e| Error::corrupt(key, format!("invalid grant: {e}")))?;
            Ok(Grant {
                grantee,
                permissions,
            })
        })
        .collect()
}

/// Whether a deny grant applies to `user`. Unreadable grants count as denied.
pub fn is_denied(attrs: &Attributes, user: &User) -> bool {
    match read_grants(attrs) {
        Ok(grants) => grants
            .iter()
            .any(|g| g.permissions.is_deny() && g.grantee.matches(user)),
        Err(e) => {
            warn!(err = %e, user = %user.id, "unable to read grants, denying access");
            true
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn attrs_with(grants: &[Grant]) -> Attributes {
        let mut attrs = Attributes::new();
        for g in grants {
            attrs.set(g.grantee.attr_key(), g.encode().unwrap());
        }
        attrs
    }

    #[test]
    fn grantee_keys() {
        let g = Grantee::Group("physics".into());
        assert_eq!("user.ocis.grant.g:physics", g.attr_key());
        assert_eq!(Some(g), Grantee::from_attr_key("user.ocis.grant.g:physics"));
        assert_eq!(None, Grantee::from_attr_key("user.ocis.grant.x:physics"));
    }

    #[test]
    fn deny_grants() {
        let attrs = attrs_with(&[
            Grant {
                grantee: Grantee::User("einstein".into()),
                permissions: Permissions::deny(),
            },
            Grant {
                grantee: Grantee::User("marie".into()),
                permissions: Permissions::editor(),
            },
            Grant {
                grantee: Grantee::Group("sailing".into()),
                permissions: Permissions::deny(),
            },
        ]);

        assert_eq!(3, read_grants(&attrs).unwrap().len());
        assert!(is_denied(&attrs, &User::new("einstein")));
        assert!(!is_denied(&attrs, &User::new("marie")));
        assert!(is_denied(
            &attrs,
            &User::new("richard").with_groups(["sailing"])
        ));
    }

    #[test]
    fn unreadable_grants_deny() {
        let mut attrs = Attributes::new();
        attrs.set("user.ocis.grant.u:marie", b"{not json".to_vec());
        assert!(is_denied(&attrs, &User::new("marie")));
    }

    #[test]
    fn roles_are_not_deny() {
        assert!(Permissions::deny().is_deny());
        assert!(!Permissions::viewer().is_deny());
        assert!(Permissions::manager().purge_recycle);
        assert!(Permissions::manager().stat);
    }
}
