//! RevisionedStore: multiversion store with optimistic commit
//!
//! The store holds any number of named tables, each a [`RevisionMap`].
//! Connections read at the revision that was current when they opened and
//! buffer their writes; the writes reach the tables only at commit, all
//! under one new revision.
//!
//! # Commit Protocol
//!
//! ```text
//! prepare:  wait (bounded) for our keys to leave the locked-for-commit set
//!           fail if any of our keys was committed after our snapshot
//!           add our keys to the locked-for-commit set
//! commit:   revision = current + 1
//!           write every buffered value at revision
//!           current = revision, unlock our keys
//!           purge revisions older than the oldest open snapshot
//! rollback: unlock our keys
//! ```
//!
//! The revision counter, the locked-for-commit set and the open-snapshot
//! registry share one mutex. Lock order is commit state, then table.

use crate::connection::Connection;
use crate::revision_map::RevisionMap;
use dashmap::DashMap;
use ember_concurrency::Transaction;
use ember_core::{Blob, ConflictKind, Error, Result, Revision};
use parking_lot::{Condvar, Mutex};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};
use tracing::{debug, trace};

/// Name of the table behind `Connection::read`/`write`
pub const DEFAULT_TABLE: &str = "default";

/// Default bound on waiting for a key locked by another prepare
pub const DEFAULT_COMMIT_LOCK_WAIT: Duration = Duration::from_millis(50);

/// Key of the locked-for-commit set
pub(crate) type TableKey = (String, Blob);

/// Buffered writes of one connection, by table
pub(crate) type Updates = BTreeMap<String, BTreeMap<Blob, Blob>>;

#[derive(Debug, Default)]
struct CommitState {
    current: Revision,
    locked: HashSet<TableKey>,
    /// Open snapshots: revision → number of connections reading at it
    readers: BTreeMap<Revision, usize>,
    /// Open connection of each transaction, by transaction id
    connections: HashMap<u64, Weak<Connection>>,
}

impl CommitState {
    fn release_reader(&mut self, revision: Revision) {
        if let Some(count) = self.readers.get_mut(&revision) {
            *count -= 1;
            if *count == 0 {
                self.readers.remove(&revision);
            }
        }
    }

    fn oldest_revision_in_use(&self) -> Revision {
        self.readers
            .keys()
            .next()
            .copied()
            .unwrap_or(self.current)
    }
}

/// Multiversion store with snapshot-isolated connections
#[derive(Debug)]
pub struct RevisionedStore {
    tables: DashMap<String, Arc<RevisionMap>>,
    state: Mutex<CommitState>,
    key_unlocked: Condvar,
    commit_lock_wait: Duration,
}

impl RevisionedStore {
    /// Create an empty store at revision 0
    pub fn new() -> Self {
        Self::with_commit_lock_wait(DEFAULT_COMMIT_LOCK_WAIT)
    }

    /// Create an empty store with a custom bound on commit-lock waits
    pub fn with_commit_lock_wait(commit_lock_wait: Duration) -> Self {
        RevisionedStore {
            tables: DashMap::new(),
            state: Mutex::new(CommitState::default()),
            key_unlocked: Condvar::new(),
            commit_lock_wait,
        }
    }

    /// Open the connection of `tx`
    ///
    /// The connection reads at the current revision and joins `tx` as a
    /// participant. A transaction has at most one connection per store:
    /// opening again returns the connection already joined. Never blocks on
    /// other transactions.
    ///
    /// # Errors
    /// Returns `Error::TransactionRequired` if `tx` is not active.
    pub fn open_connection(self: &Arc<Self>, tx: &Arc<Transaction>) -> Result<Arc<Connection>> {
        tx.must_be_active()?;
        let mut state = self.state.lock();
        if let Some(existing) = state.connections.get(&tx.id()).and_then(Weak::upgrade) {
            if existing.belongs_to(tx) {
                trace!(target: "ember::storage", txn_id = tx.id(), "Connection reused");
                return Ok(existing);
            }
        }
        let read_revision = state.current;
        *state.readers.entry(read_revision).or_insert(0) += 1;
        let connection = Arc::new(Connection::new(Arc::clone(self), tx, read_revision));
        state.connections.insert(tx.id(), Arc::downgrade(&connection));
        drop(state);

        tx.join(connection.clone())?;
        trace!(target: "ember::storage", txn_id = tx.id(), read_revision, "Connection opened");
        Ok(connection)
    }

    /// Drop the registry entry of `tx_id` if it still points at `connection`
    pub(crate) fn forget_connection(&self, tx_id: u64, connection: *const Connection) {
        let mut state = self.state.lock();
        if let Some(entry) = state.connections.get(&tx_id) {
            if std::ptr::eq(entry.as_ptr(), connection) {
                state.connections.remove(&tx_id);
            }
        }
    }

    /// Revision of the newest commit
    pub fn current_revision(&self) -> Revision {
        self.state.lock().current
    }

    /// Oldest revision an open connection still reads at
    pub fn oldest_revision_in_use(&self) -> Revision {
        self.state.lock().oldest_revision_in_use()
    }

    /// Number of keys stored across all tables, tombstoned keys included
    pub fn key_count(&self) -> usize {
        self.tables.iter().map(|table| table.len()).sum()
    }

    /// Names of all tables ever written
    pub fn table_names(&self) -> Vec<String> {
        let mut names: Vec<_> = self.tables.iter().map(|t| t.key().clone()).collect();
        names.sort();
        names
    }

    pub(crate) fn table(&self, name: &str) -> Arc<RevisionMap> {
        if let Some(table) = self.tables.get(name) {
            return table.value().clone();
        }
        self.tables
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(RevisionMap::new()))
            .value()
            .clone()
    }

    /// Lock `keys` for commit after checking them against `snapshot`
    pub(crate) fn prepare(&self, keys: &[TableKey], snapshot: Revision) -> Result<()> {
        let mut state = self.state.lock();
        let deadline = Instant::now() + self.commit_lock_wait;

        loop {
            let contested = keys.iter().find(|k| state.locked.contains(*k)).cloned();
            let Some((table, key)) = contested else {
                break;
            };
            let timed_out = self
                .key_unlocked
                .wait_until(&mut state, deadline)
                .timed_out();
            if timed_out && state.locked.contains(&(table.clone(), key.clone())) {
                return Err(Error::OptimisticConflict {
                    table,
                    key,
                    kind: ConflictKind::LockedForCommit,
                });
            }
        }

        for (table, key) in keys {
            if let Some(committed) = self.table(table).latest_revision(key) {
                if committed > snapshot {
                    return Err(Error::OptimisticConflict {
                        table: table.clone(),
                        key: key.clone(),
                        kind: ConflictKind::ModifiedAfterSnapshot {
                            committed,
                            snapshot,
                        },
                    });
                }
            }
        }

        state.locked.extend(keys.iter().cloned());
        Ok(())
    }

    /// Write `updates` under a new revision and release `locked`
    pub(crate) fn commit(
        &self,
        updates: &Updates,
        locked: &[TableKey],
        snapshot: Revision,
    ) -> Result<Revision> {
        let (revision, oldest) = {
            let mut state = self.state.lock();
            let revision = state.current + 1;
            for (name, entries) in updates {
                let table = self.table(name);
                for (key, value) in entries {
                    table.put(key.clone(), revision, value.clone())?;
                }
            }
            state.current = revision;
            for key in locked {
                state.locked.remove(key);
            }
            state.release_reader(snapshot);
            (revision, state.oldest_revision_in_use())
        };
        self.key_unlocked.notify_all();

        debug!(target: "ember::storage", revision, keys = locked.len(), "Committed revision");
        self.purge(oldest);
        Ok(revision)
    }

    /// Release `locked` and the snapshot without writing
    pub(crate) fn rollback(&self, locked: &[TableKey], snapshot: Revision) {
        {
            let mut state = self.state.lock();
            for key in locked {
                state.locked.remove(key);
            }
            state.release_reader(snapshot);
        }
        if !locked.is_empty() {
            self.key_unlocked.notify_all();
        }
    }

    fn purge(&self, oldest: Revision) {
        let tables: Vec<_> = self.tables.iter().map(|t| Arc::clone(t.value())).collect();
        let removed: usize = tables.iter().map(|table| table.purge(oldest)).sum();
        if removed > 0 {
            trace!(target: "ember::storage", oldest, removed, "Purged deleted keys");
        }
    }
}

impl Default for RevisionedStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ember_concurrency::TransactionParticipant;

    fn key(table: &str, k: &str) -> TableKey {
        (table.to_string(), Blob::from(k))
    }

    fn updates(table: &str, k: &str, v: &str) -> Updates {
        let mut entries = BTreeMap::new();
        entries.insert(Blob::from(k), Blob::from(v));
        let mut updates = BTreeMap::new();
        updates.insert(table.to_string(), entries);
        updates
    }

    #[test]
    fn test_new_store_at_revision_zero() {
        let store = RevisionedStore::new();
        assert_eq!(store.current_revision(), 0);
        assert_eq!(store.oldest_revision_in_use(), 0);
        assert_eq!(store.key_count(), 0);
    }

    #[test]
    fn test_prepare_fails_on_locked_key_after_wait() {
        let store = RevisionedStore::with_commit_lock_wait(Duration::from_millis(5));
        store.prepare(&[key("t", "k")], 0).unwrap();

        let err = store.prepare(&[key("t", "k")], 0).unwrap_err();
        assert!(matches!(
            err,
            Error::OptimisticConflict {
                kind: ConflictKind::LockedForCommit,
                ..
            }
        ));

        store.rollback(&[key("t", "k")], 0);
        store.prepare(&[key("t", "k")], 0).unwrap();
    }

    #[test]
    fn test_prepare_fails_on_newer_commit() {
        let store = RevisionedStore::new();
        store.prepare(&[key("t", "k")], 0).unwrap();
        store
            .commit(&updates("t", "k", "v"), &[key("t", "k")], 0)
            .unwrap();

        let err = store.prepare(&[key("t", "k")], 0).unwrap_err();
        assert!(matches!(
            err,
            Error::OptimisticConflict {
                kind: ConflictKind::ModifiedAfterSnapshot {
                    committed: 1,
                    snapshot: 0
                },
                ..
            }
        ));
        store.prepare(&[key("t", "k")], 1).unwrap();
    }

    #[test]
    fn test_commit_bumps_revision_once_across_tables() {
        let store = RevisionedStore::new();
        let mut all = updates("a", "k", "1");
        all.extend(updates("b", "k", "2"));

        let revision = store.commit(&all, &[], 0).unwrap();
        assert_eq!(revision, 1);
        assert_eq!(store.table("a").get(&Blob::from("k"), 1), Blob::from("1"));
        assert_eq!(store.table("b").get(&Blob::from("k"), 1), Blob::from("2"));
        assert_eq!(store.table_names(), vec!["a".to_string(), "b".to_string()]);
    }

    #[test]
    fn test_open_connection_registers_snapshot() {
        let store = Arc::new(RevisionedStore::new());
        store.commit(&updates("t", "k", "v"), &[], 0).unwrap();

        let tx = Arc::new(Transaction::new(1, false));
        let connection = store.open_connection(&tx).unwrap();
        assert_eq!(connection.read_revision(), 1);
        assert_eq!(tx.participant_count(), 1);

        store.commit(&updates("t", "k", "w"), &[], 0).unwrap();
        assert_eq!(store.oldest_revision_in_use(), 1);

        connection.rollback().unwrap();
        assert_eq!(store.oldest_revision_in_use(), 2);
    }

    #[test]
    fn test_second_open_reuses_connection() {
        let store = Arc::new(RevisionedStore::new());
        let tx = Arc::new(Transaction::new(1, false));
        let first = store.open_connection(&tx).unwrap();
        let second = store.open_connection(&tx).unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(tx.participant_count(), 1);

        first.write(Blob::from("a"), Blob::from("1")).unwrap();
        second.write(Blob::from("b"), Blob::from("2")).unwrap();
        tx.prepare_and_commit().unwrap();
        assert_eq!(store.current_revision(), 1);
        assert_eq!(store.table(DEFAULT_TABLE).get(&Blob::from("a"), 1), Blob::from("1"));
        assert_eq!(store.table(DEFAULT_TABLE).get(&Blob::from("b"), 1), Blob::from("2"));
    }

    #[test]
    fn test_same_id_on_new_transaction_opens_fresh_connection() {
        let store = Arc::new(RevisionedStore::new());
        let old = Arc::new(Transaction::new(7, false));
        let kept = store.open_connection(&old).unwrap();
        old.rollback().unwrap();

        let new = Arc::new(Transaction::new(7, false));
        let fresh = store.open_connection(&new).unwrap();
        assert!(!Arc::ptr_eq(&kept, &fresh));
        assert_eq!(new.participant_count(), 1);
    }

    #[test]
    fn test_open_connection_requires_active_transaction() {
        let store = Arc::new(RevisionedStore::new());
        let tx = Arc::new(Transaction::new(1, false));
        tx.rollback().unwrap();
        assert!(matches!(
            store.open_connection(&tx),
            Err(Error::TransactionRequired { .. })
        ));
        assert_eq!(store.oldest_revision_in_use(), 0);
    }
}
