//! Ordered custom field storage.
//!
//! Keys are unique and keep their insertion order for display. Reserved
//! key handling (OTP carriers, alternative URLs) lives in the aggregate.

use crate::{NodeFieldsError, Result};
use serde::{Deserialize, Serialize};

/// A custom field value with its protection flag.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StringValue {
    pub value: String,
    #[serde(default)]
    pub protected: bool,
}

impl StringValue {
    pub fn new(value: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            protected: false,
        }
    }

    /// Value that should be masked by callers (secrets, OTP seeds).
    pub fn protected(value: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            protected: true,
        }
    }
}

/// Insertion-ordered map of field name to [`StringValue`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CustomFieldStore {
    fields: Vec<(String, StringValue)>,
}

impl CustomFieldStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or overwrite. Overwriting keeps the key's original position.
    pub fn set(&mut self, key: impl Into<String>, value: StringValue) -> Result<()> {
        let key = key.into();
        if key.is_empty() {
            return Err(NodeFieldsError::InvalidInput(
                "Custom field key cannot be empty".to_string(),
            ));
        }

        match self.fields.iter_mut().find(|(existing, _)| *existing == key) {
            Some((_, slot)) => *slot = value,
            None => self.fields.push((key, value)),
        }
        Ok(())
    }

    /// Remove a key, returning its value if it was present.
    pub fn remove(&mut self, key: &str) -> Option<StringValue> {
        let index = self.fields.iter().position(|(existing, _)| existing == key)?;
        Some(self.fields.remove(index).1)
    }

    pub fn remove_all(&mut self) {
        self.fields.clear();
    }

    /// Keep only the entries for which `keep` returns true.
    pub fn retain<F>(&mut self, mut keep: F)
    where
        F: FnMut(&str, &StringValue) -> bool,
    {
        self.fields.retain(|(key, value)| keep(key, value));
    }

    pub fn get(&self, key: &str) -> Option<&StringValue> {
        self.fields
            .iter()
            .find(|(existing, _)| existing == key)
            .map(|(_, value)| value)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &StringValue)> {
        self.fields.iter().map(|(key, value)| (key.as_str(), value))
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|(key, _)| key.as_str())
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

impl<K: Into<String>> FromIterator<(K, StringValue)> for CustomFieldStore {
    fn from_iter<I: IntoIterator<Item = (K, StringValue)>>(iter: I) -> Self {
        let mut store = CustomFieldStore::new();
        for (key, value) in iter {
            // Empty keys cannot be stored; dropping them matches `set`.
            let _ = store.set(key, value);
        }
        store
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_overwrites_in_place() {
        let mut store = CustomFieldStore::new();
        store.set("first", StringValue::new("1")).unwrap();
        store.set("second", StringValue::new("2")).unwrap();
        store.set("first", StringValue::protected("one")).unwrap();

        let keys: Vec<&str> = store.keys().collect();
        assert_eq!(keys, vec!["first", "second"]);
        assert_eq!(store.get("first"), Some(&StringValue::protected("one")));
    }

    #[test]
    fn test_rejects_empty_key() {
        let mut store = CustomFieldStore::new();
        let err = store.set("", StringValue::new("x")).unwrap_err();
        assert!(err.to_string().contains("cannot be empty"));
        assert!(store.is_empty());
    }

    #[test]
    fn test_remove_and_remove_all() {
        let mut store: CustomFieldStore = [
            ("a", StringValue::new("1")),
            ("b", StringValue::new("2")),
        ]
        .into_iter()
        .collect();

        assert_eq!(store.remove("a"), Some(StringValue::new("1")));
        assert_eq!(store.remove("a"), None);
        assert_eq!(store.len(), 1);

        store.remove_all();
        assert!(store.is_empty());
    }

    #[test]
    fn test_clone_is_independent() {
        let mut original = CustomFieldStore::new();
        original.set("k", StringValue::new("v")).unwrap();

        let mut copy = original.clone();
        copy.set("k", StringValue::new("changed")).unwrap();
        copy.set("extra", StringValue::new("x")).unwrap();

        assert_eq!(original.get("k"), Some(&StringValue::new("v")));
        assert!(!original.contains_key("extra"));
    }
}
