//! References to attachment blobs owned by the database container.

use serde::{Deserialize, Serialize};

/// A named reference into the container's binary pool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeFileAttachment {
    pub filename: String,
    /// Opaque index of the blob in the container's storage.
    pub index: u32,
}

impl NodeFileAttachment {
    pub fn new(filename: impl Into<String>, index: u32) -> Self {
        Self {
            filename: filename.into(),
            index,
        }
    }
}

/// Ordered attachment references of one entry.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AttachmentList {
    items: Vec<NodeFileAttachment>,
}

impl AttachmentList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, attachment: NodeFileAttachment) {
        self.items.push(attachment);
    }

    /// Remove the first attachment with the given filename.
    pub fn remove(&mut self, filename: &str) -> Option<NodeFileAttachment> {
        let index = self.items.iter().position(|a| a.filename == filename)?;
        Some(self.items.remove(index))
    }

    pub fn rename(&mut self, from: &str, to: impl Into<String>) -> bool {
        match self.items.iter_mut().find(|a| a.filename == from) {
            Some(attachment) => {
                attachment.filename = to.into();
                true
            }
            None => false,
        }
    }

    pub fn get(&self, filename: &str) -> Option<&NodeFileAttachment> {
        self.items.iter().find(|a| a.filename == filename)
    }

    pub fn iter(&self) -> impl Iterator<Item = &NodeFileAttachment> {
        self.items.iter()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn clear(&mut self) {
        self.items.clear();
    }
}

impl FromIterator<NodeFileAttachment> for AttachmentList {
    fn from_iter<I: IntoIterator<Item = NodeFileAttachment>>(iter: I) -> Self {
        Self {
            items: iter.into_iter().collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_push_remove_rename() {
        let mut list = AttachmentList::new();
        list.push(NodeFileAttachment::new("id.png", 0));
        list.push(NodeFileAttachment::new("keys.txt", 3));

        assert!(list.rename("keys.txt", "recovery.txt"));
        assert!(!list.rename("missing", "x"));
        assert_eq!(list.get("recovery.txt").map(|a| a.index), Some(3));

        assert_eq!(list.remove("id.png"), Some(NodeFileAttachment::new("id.png", 0)));
        assert_eq!(list.len(), 1);
    }
}
