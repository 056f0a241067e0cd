use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::{errors::Error, metadata::Backend};

pub const DEFAULT_MAX_CONCURRENCY: usize = 100;
pub const DEFAULT_ID_CACHE_CAPACITY: usize = 1_000_000;

/// How the propagator computes the new tree size of an ancestor.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SizeAccounting {
    /// Apply the size difference of the change.
    #[default]
    Delta,
    /// Sum up the sizes of the immediate children.
    Recount,
}

/// Configuration of a storage engine instance.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Options {
    /// Storage root all spaces live below.
    pub root: PathBuf,
    pub tree_time_accounting: bool,
    pub tree_size_accounting: bool,
    pub size_accounting: SizeAccounting,
    /// Upper bound of concurrent workers in a folder listing.
    pub max_concurrency: usize,
    /// Entries of the child id cache, 0 disables it.
    pub id_cache_capacity: usize,
    pub metadata_backend: Backend,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            root: PathBuf::new(),
            tree_time_accounting: true,
            tree_size_accounting: true,
            size_accounting: SizeAccounting::default(),
            max_concurrency: DEFAULT_MAX_CONCURRENCY,
            id_cache_capacity: DEFAULT_ID_CACHE_CAPACITY,
            metadata_backend: Backend::default(),
        }
    }
}

impl Options {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            ..Self::default()
        }
    }

    pub fn from_json(s: &str) -> Result<Self, Error> {
        let options: Options = serde_json::from_str(s)
            .map_err(|e| Error::InvalidRequest(format!("invalid options: {e}")))?;
        options.validate()
    }

    /// Checks the options and fills in defaults for zero values.
    pub fn validate(mut self) -> Result<Self, Error> {
        if self.root.as_os_str().is_empty() {
            return Err(Error::InvalidRequest("root must be set".into()));
        }
        if self.max_concurrency == 0 {
            self.max_concurrency = DEFAULT_MAX_CONCURRENCY;
        }
        Ok(self)
    }

    /// Whether any aggregate is maintained, i.e. directories opt into propagation.
    pub fn propagation_enabled(&self) -> bool {
        self.tree_time_accounting || self.tree_size_accounting
    }
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use super::{Options, SizeAccounting, DEFAULT_MAX_CONCURRENCY};
    use crate::metadata::Backend;

    #[test]
    fn json_with_defaults() {
        let o = Options::from_json(
            r#"{"root": "/var/lib/storage", "metadata_backend": "sidecar", "max_concurrency": 0}"#,
        )
        .expect("must parse");

        assert_eq!(Path::new("/var/lib/storage"), o.root);
        assert_eq!(Backend::Sidecar, o.metadata_backend);
        assert_eq!(DEFAULT_MAX_CONCURRENCY, o.max_concurrency);
        assert_eq!(SizeAccounting::Delta, o.size_accounting);
        assert!(o.tree_size_accounting);
    }

    #[test]
    fn rejects_unknown_fields_and_missing_root() {
        assert!(Options::from_json(r#"{"root": "/x", "treetime": true}"#).is_err());
        assert!(Options::from_json(r#"{}"#).is_err());
    }

    #[test]
    fn recount_mode() {
        let o = Options::from_json(r#"{"root": "/x", "size_accounting": "recount"}"#).unwrap();
        assert_eq!(SizeAccounting::Recount, o.size_accounting);
    }
}
