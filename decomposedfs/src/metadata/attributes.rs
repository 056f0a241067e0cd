use std::collections::{btree_map, BTreeMap};

use chrono::{DateTime, Utc};

use super::keys;
use crate::layout::{format_time, parse_time};

/// A set of raw attribute values, keyed by attribute name.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Attributes(BTreeMap<String, Vec<u8>>);

impl Attributes {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<&[u8]> {
        self.0.get(key).map(Vec::as_slice)
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.get(key).and_then(|v| std::str::from_utf8(v).ok())
    }

    pub fn get_u64(&self, key: &str) -> Option<u64> {
        self.get_str(key).and_then(|s| s.parse().ok())
    }

    pub fn get_i64(&self, key: &str) -> Option<i64> {
        self.get_str(key).and_then(|s| s.parse().ok())
    }

    pub fn get_time(&self, key: &str) -> Option<DateTime<Utc>> {
        self.get_str(key).and_then(parse_time)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<Vec<u8>>) -> &mut Self {
        self.0.insert(key.into(), value.into());
        self
    }

    pub fn set_str(&mut self, key: impl Into<String>, value: impl AsRef<str>) -> &mut Self {
        self.set(key, value.as_ref().as_bytes().to_vec())
    }

    pub fn set_u64(&mut self, key: impl Into<String>, value: u64) -> &mut Self {
        self.set(key, value.to_string())
    }

    pub fn set_time(&mut self, key: impl Into<String>, value: &DateTime<Utc>) -> &mut Self {
        self.set(key, format_time(value))
    }

    pub fn remove(&mut self, key: &str) -> Option<Vec<u8>> {
        self.0.remove(key)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &[u8])> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_slice()))
    }

    /// Attributes whose key starts with `prefix`.
    pub fn with_prefix<'a>(&'a self, prefix: &'a str) -> impl Iterator<Item = (&'a str, &'a [u8])> {
        self.iter().filter(move |(k, _)| k.starts_with(prefix))
    }

    pub fn tree_size(&self) -> Option<u64> {
        self.get_u64(keys::TREE_SIZE)
    }

    pub fn blob_size(&self) -> Option<u64> {
        self.get_u64(keys::BLOB_SIZE)
    }

    pub fn tmtime(&self) -> Option<DateTime<Utc>> {
        self.get_time(keys::TMTIME)
    }

    pub fn mtime(&self) -> Option<DateTime<Utc>> {
        self.get_time(keys::MTIME)
    }

    pub fn has_propagation(&self) -> bool {
        self.get_str(keys::PROPAGATION) == Some("1")
    }

    pub fn is_processing(&self) -> bool {
        self.get_str(keys::STATUS)
            .is_some_and(|s| s.starts_with(keys::PROCESSING_STATUS))
    }
}

impl FromIterator<(String, Vec<u8>)> for Attributes {
    fn from_iter<T: IntoIterator<Item = (String, Vec<u8>)>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl IntoIterator for Attributes {
    type Item = (String, Vec<u8>);
    type IntoIter = btree_map::IntoIter<String, Vec<u8>>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

impl Extend<(String, Vec<u8>)> for Attributes {
    fn extend<T: IntoIterator<Item = (String, Vec<u8>)>>(&mut self, iter: T) {
        self.0.extend(iter)
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::{keys, Attributes};

    #[test]
    fn typed_accessors() {
        let now = Utc::now();
        let mut attrs = Attributes::new();
        attrs
            .set_u64(keys::TREE_SIZE, 150)
            .set_str(keys::PROPAGATION, "1")
            .set_time(keys::TMTIME, &now)
            .set_str(keys::STATUS, "processing:upload-1");

        assert_eq!(Some(150), attrs.tree_size());
        assert_eq!(None, attrs.blob_size());
        assert_eq!(Some(now), attrs.tmtime());
        assert!(attrs.has_propagation());
        assert!(attrs.is_processing());
    }

    #[test]
    fn garbage_is_unset() {
        let mut attrs = Attributes::new();
        attrs.set(keys::TREE_SIZE, vec![0xff, 0xfe]);
        attrs.set_str(keys::MTIME, "yesterday");
        assert_eq!(None, attrs.tree_size());
        assert_eq!(None, attrs.mtime());
    }
}
