//! Per-key revision history
//!
//! A `RevisionList` holds every retained `(revision, value)` pair of one key,
//! newest first. A read at revision R sees the newest entry whose revision
//! is ≤ R.

use ember_core::{Blob, Error, Result, Revision};
use std::collections::VecDeque;

/// Revision history of one key, newest first
#[derive(Debug, Clone)]
pub struct RevisionList {
    /// Entries stored newest-first
    /// VecDeque provides O(1) push_front for new revisions
    entries: VecDeque<(Revision, Blob)>,
}

impl RevisionList {
    /// Create a list with a single entry
    pub fn new(revision: Revision, value: Blob) -> Self {
        let mut entries = VecDeque::with_capacity(2);
        entries.push_front((revision, value));
        RevisionList { entries }
    }

    /// Add a newer entry
    ///
    /// # Errors
    /// Returns `Error::IllegalArgument` if `revision` is not newer than the
    /// latest entry. Writing the same key twice in one revision is rejected.
    pub fn push(&mut self, revision: Revision, value: Blob) -> Result<()> {
        if let Some(&(latest, _)) = self.entries.front() {
            if revision == latest {
                return Err(Error::IllegalArgument(format!(
                    "Key already set in revision {}",
                    revision
                )));
            }
            if revision < latest {
                return Err(Error::IllegalArgument(format!(
                    "Revision {} is older than latest revision {}",
                    revision, latest
                )));
            }
        }
        self.entries.push_front((revision, value));
        Ok(())
    }

    /// Value visible at `revision`, if any entry is that old
    pub fn get(&self, revision: Revision) -> Option<&Blob> {
        self.entries
            .iter()
            .find(|(r, _)| *r <= revision)
            .map(|(_, value)| value)
    }

    /// Revision of the newest entry
    pub fn latest_revision(&self) -> Option<Revision> {
        self.entries.front().map(|(r, _)| *r)
    }

    /// Number of retained entries
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True if no entries remain
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// True if a purge could shrink this list
    pub fn has_old_revisions(&self) -> bool {
        self.entries.len() > 1 || self.entries.front().map_or(false, |(_, v)| v.is_empty())
    }

    /// Drop entries no reader at `oldest` or later can see
    ///
    /// The newest entry at or below `oldest` stays, since it is what those
    /// readers see, unless it is a tombstone. Returns true if the list is
    /// now empty and the key can be removed.
    pub fn purge_older_than(&mut self, oldest: Revision) -> bool {
        if let Some(base) = self.entries.iter().position(|(r, _)| *r <= oldest) {
            self.entries.truncate(base + 1);
            if self.entries[base].1.is_empty() {
                self.entries.truncate(base);
            }
        }
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn blob(s: &str) -> Blob {
        Blob::from(s)
    }

    #[test]
    fn test_get_sees_latest_at_or_before() {
        let mut list = RevisionList::new(2, blob("a"));
        list.push(5, blob("b")).unwrap();

        assert_eq!(list.get(1), None);
        assert_eq!(list.get(2), Some(&blob("a")));
        assert_eq!(list.get(4), Some(&blob("a")));
        assert_eq!(list.get(5), Some(&blob("b")));
        assert_eq!(list.get(100), Some(&blob("b")));
        assert_eq!(list.latest_revision(), Some(5));
    }

    #[test]
    fn test_push_same_revision_rejected() {
        let mut list = RevisionList::new(3, blob("a"));
        let err = list.push(3, blob("b")).unwrap_err();
        assert!(err.to_string().contains("already set"));
        assert!(list.push(2, blob("c")).is_err());
        assert_eq!(list.len(), 1);
    }

    #[test]
    fn test_purge_keeps_base_entry() {
        let mut list = RevisionList::new(1, blob("a"));
        list.push(3, blob("b")).unwrap();
        list.push(6, blob("c")).unwrap();

        assert!(!list.purge_older_than(4));
        assert_eq!(list.len(), 2);
        assert_eq!(list.get(4), Some(&blob("b")));
        assert_eq!(list.get(6), Some(&blob("c")));
        assert_eq!(list.get(2), None);
    }

    #[test]
    fn test_purge_drops_tombstone_base() {
        let mut list = RevisionList::new(1, blob("a"));
        list.push(2, Blob::empty()).unwrap();
        assert!(list.has_old_revisions());

        assert!(list.purge_older_than(2));
        assert!(list.is_empty());
    }

    #[test]
    fn test_purge_below_all_entries_is_noop() {
        let mut list = RevisionList::new(5, blob("a"));
        list.push(7, blob("b")).unwrap();
        assert!(!list.purge_older_than(4));
        assert_eq!(list.len(), 2);
    }

    #[test]
    fn test_single_value_has_no_old_revisions() {
        let list = RevisionList::new(1, blob("a"));
        assert!(!list.has_old_revisions());
    }

    proptest! {
        /// Purging below a reader's revision never changes what it sees
        #[test]
        fn prop_purge_preserves_visible_values(
            values in proptest::collection::vec(proptest::option::of("[a-c]"), 1..12),
            oldest_offset in 0u64..12,
            reader_offset in 0u64..12,
        ) {
            let mut list = RevisionList::new(1, Blob::from(values[0].as_deref().unwrap_or("")));
            for (i, v) in values.iter().enumerate().skip(1) {
                list.push(i as u64 + 1, Blob::from(v.as_deref().unwrap_or(""))).unwrap();
            }
            let oldest = oldest_offset + 1;
            let reader = oldest + reader_offset;
            let before = list.get(reader).cloned().unwrap_or_default();

            list.purge_older_than(oldest);
            let after = list.get(reader).cloned().unwrap_or_default();
            prop_assert_eq!(before, after);
        }
    }
}
