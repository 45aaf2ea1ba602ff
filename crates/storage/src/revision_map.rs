//! Ordered multiversion map of one table
//!
//! `RevisionMap` stores a `RevisionList` per key in a `BTreeMap` guarded by
//! a `parking_lot::RwLock`. Keys whose list may shrink are remembered in a
//! purge queue so that a purge pass only visits those.

use crate::revision_list::RevisionList;
use ember_core::{Blob, Result, Revision};
use parking_lot::{Mutex, RwLock};
use std::collections::{BTreeMap, BTreeSet};
use std::ops::Bound::{Excluded, Unbounded};

/// Multiversion key/value map
#[derive(Debug, Default)]
pub struct RevisionMap {
    data: RwLock<BTreeMap<Blob, RevisionList>>,
    purge_queue: Mutex<BTreeSet<Blob>>,
}

impl RevisionMap {
    /// Create an empty map
    pub fn new() -> Self {
        Self::default()
    }

    /// Value of `key` visible at `revision`
    ///
    /// Missing keys read as the empty blob.
    pub fn get(&self, key: &Blob, revision: Revision) -> Blob {
        self.data
            .read()
            .get(key)
            .and_then(|list| list.get(revision).cloned())
            .unwrap_or_default()
    }

    /// Revision of the newest write to `key`
    pub fn latest_revision(&self, key: &Blob) -> Option<Revision> {
        self.data.read().get(key).and_then(|list| list.latest_revision())
    }

    /// Store `value` for `key` at `revision`
    ///
    /// # Errors
    /// Returns `Error::IllegalArgument` if the key already has an entry at
    /// `revision` or later.
    pub fn put(&self, key: Blob, revision: Revision, value: Blob) -> Result<()> {
        let needs_purge = {
            let mut data = self.data.write();
            match data.get_mut(&key) {
                Some(list) => {
                    list.push(revision, value)?;
                    list.has_old_revisions()
                }
                None => {
                    let list = RevisionList::new(revision, value);
                    let needs_purge = list.has_old_revisions();
                    data.insert(key.clone(), list);
                    needs_purge
                }
            }
        };
        if needs_purge {
            self.purge_queue.lock().insert(key);
        }
        Ok(())
    }

    /// Smallest key with a non-empty value at `revision`
    pub fn first_key(&self, revision: Revision) -> Option<Blob> {
        let data = self.data.read();
        data.iter()
            .find(|(_, list)| Self::is_visible(list, revision))
            .map(|(key, _)| key.clone())
    }

    /// Smallest key above `key` with a non-empty value at `revision`
    pub fn next_key_after(&self, key: &Blob, revision: Revision) -> Option<Blob> {
        let data = self.data.read();
        data.range((Excluded(key), Unbounded))
            .find(|(_, list)| Self::is_visible(list, revision))
            .map(|(key, _)| key.clone())
    }

    fn is_visible(list: &RevisionList, revision: Revision) -> bool {
        list.get(revision).map_or(false, |value| !value.is_empty())
    }

    /// Drop revisions that no reader at `oldest` or later can see
    ///
    /// Returns the number of keys removed entirely.
    pub fn purge(&self, oldest: Revision) -> usize {
        let queued = std::mem::take(&mut *self.purge_queue.lock());
        if queued.is_empty() {
            return 0;
        }

        let mut removed = 0;
        let mut requeue = Vec::new();
        {
            let mut data = self.data.write();
            for key in queued {
                let Some(list) = data.get_mut(&key) else {
                    continue;
                };
                if list.purge_older_than(oldest) {
                    data.remove(&key);
                    removed += 1;
                } else if list.has_old_revisions() {
                    requeue.push(key);
                }
            }
        }
        if !requeue.is_empty() {
            self.purge_queue.lock().extend(requeue);
        }
        removed
    }

    /// Number of keys, including keys whose latest value is a tombstone
    pub fn len(&self) -> usize {
        self.data.read().len()
    }

    /// True if the map holds no keys
    pub fn is_empty(&self) -> bool {
        self.data.read().is_empty()
    }

    /// Number of keys waiting for a purge pass
    pub fn purge_queue_len(&self) -> usize {
        self.purge_queue.lock().len()
    }
}
