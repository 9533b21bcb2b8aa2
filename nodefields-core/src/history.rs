//! Password history (flat list of prior passwords) and full-snapshot history.

use crate::fields::NodeFields;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Default number of prior passwords kept.
pub const DEFAULT_PASSWORD_HISTORY_MAX: usize = 3;

/// One prior password and when it was recorded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PasswordHistoryEntry {
    pub timestamp: DateTime<Utc>,
    pub password: String,
}

/// Bounded, oldest-first list of prior passwords.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PasswordHistory {
    pub enabled: bool,
    maximum_size: usize,
    entries: Vec<PasswordHistoryEntry>,
}

impl Default for PasswordHistory {
    fn default() -> Self {
        Self::new(true, DEFAULT_PASSWORD_HISTORY_MAX)
    }
}

impl PasswordHistory {
    pub fn new(enabled: bool, maximum_size: usize) -> Self {
        Self {
            enabled,
            maximum_size,
            entries: Vec::new(),
        }
    }

    pub fn maximum_size(&self) -> usize {
        self.maximum_size
    }

    /// Change the cap, evicting the oldest entries that no longer fit.
    pub fn set_maximum_size(&mut self, maximum_size: usize) {
        self.maximum_size = maximum_size;
        self.prune();
    }

    /// Record `password`. Repeating the most recent password is a no-op.
    pub fn add(&mut self, password: &str, timestamp: DateTime<Utc>) -> bool {
        if !self.enabled {
            return false;
        }
        if self.entries.last().map(|e| e.password.as_str()) == Some(password) {
            return false;
        }

        self.entries.push(PasswordHistoryEntry {
            timestamp,
            password: password.to_string(),
        });
        self.prune();
        true
    }

    pub fn entries(&self) -> &[PasswordHistoryEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Bulk restore from storage, preserving order and applying the cap.
    pub(crate) fn restore(&mut self, entries: Vec<PasswordHistoryEntry>) {
        self.entries = entries;
        self.prune();
    }

    fn prune(&mut self) {
        if self.entries.len() > self.maximum_size {
            let excess = self.entries.len() - self.maximum_size;
            self.entries.drain(..excess);
        }
    }
}

/// A prior full snapshot of an entry node.
#[derive(Debug, Clone, PartialEq)]
pub struct KeePassHistoryEntry {
    pub uuid: Uuid,
    pub title: String,
    pub fields: NodeFields,
}

impl KeePassHistoryEntry {
    /// Snapshot `fields`. Nested history is never carried into a snapshot.
    pub fn snapshot(uuid: Uuid, title: impl Into<String>, fields: &NodeFields) -> Self {
        Self {
            uuid,
            title: title.into(),
            fields: fields.clone_or_duplicate(true, true),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_evicts_oldest_beyond_cap() {
        let mut history = PasswordHistory::new(true, 2);
        let t0 = Utc::now();
        history.add("one", t0);
        history.add("two", t0 + Duration::seconds(1));
        history.add("three", t0 + Duration::seconds(2));

        let passwords: Vec<&str> = history.entries().iter().map(|e| e.password.as_str()).collect();
        assert_eq!(passwords, vec!["two", "three"]);
    }

    #[test]
    fn test_consecutive_duplicate_ignored() {
        let mut history = PasswordHistory::default();
        assert!(history.add("same", Utc::now()));
        assert!(!history.add("same", Utc::now()));
        assert_eq!(history.len(), 1);
    }

    #[test]
    fn test_disabled_history_records_nothing() {
        let mut history = PasswordHistory::new(false, 5);
        assert!(!history.add("pw", Utc::now()));
        assert!(history.is_empty());
    }

    #[test]
    fn test_shrinking_cap_prunes() {
        let mut history = PasswordHistory::new(true, 5);
        for pw in ["a", "b", "c", "d"] {
            history.add(pw, Utc::now());
        }
        history.set_maximum_size(1);
        assert_eq!(history.entries()[0].password, "d");
    }

    #[test]
    fn test_snapshot_drops_nested_history() {
        let mut fields = NodeFields::new("user", "", "pw", "", "");
        fields.touch(true);
        assert_eq!(fields.password_history().len(), 1);

        let snapshot = KeePassHistoryEntry::snapshot(Uuid::new_v4(), "Title", &fields);
        assert!(snapshot.fields.password_history().is_empty());
        assert_eq!(snapshot.fields.password(), "pw");
        assert_eq!(snapshot.fields.modified(), fields.modified());
    }
}
