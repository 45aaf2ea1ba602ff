//! Per-transaction view of the revisioned store
//!
//! A `Connection` reads every table at its open-time revision, overlaid with
//! its own buffered writes. It is a transaction participant: prepare checks
//! and locks the written keys, commit publishes them, rollback drops them.

use crate::store::{RevisionedStore, TableKey, Updates, DEFAULT_TABLE};
use ember_concurrency::{Transaction, TransactionParticipant};
use ember_core::{Blob, Error, Result, Revision};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::fmt;
use std::ops::Bound::{Excluded, Unbounded};
use std::sync::{Arc, Weak};

#[derive(Default)]
struct ConnectionState {
    updates: Updates,
    locked: Vec<TableKey>,
    /// Snapshot and locks were handed back to the store
    released: bool,
}

/// Snapshot-isolated connection owned by one transaction
pub struct Connection {
    store: Arc<RevisionedStore>,
    tx: Weak<Transaction>,
    tx_id: u64,
    read_revision: Revision,
    state: Mutex<ConnectionState>,
}

impl Connection {
    pub(crate) fn new(store: Arc<RevisionedStore>, tx: &Arc<Transaction>, read_revision: Revision) -> Self {
        Connection {
            store,
            tx: Arc::downgrade(tx),
            tx_id: tx.id(),
            read_revision,
            state: Mutex::new(ConnectionState::default()),
        }
    }

    /// Revision this connection reads at
    pub fn read_revision(&self) -> Revision {
        self.read_revision
    }

    /// Id of the owning transaction
    pub fn transaction_id(&self) -> u64 {
        self.tx_id
    }

    pub(crate) fn belongs_to(&self, tx: &Arc<Transaction>) -> bool {
        std::ptr::eq(self.tx.as_ptr(), Arc::as_ptr(tx))
    }

    /// Handle on a named table
    pub fn table(self: &Arc<Self>, name: &str) -> DatabaseTable {
        DatabaseTable {
            connection: Arc::clone(self),
            name: Arc::from(name),
        }
    }

    fn must_be_active(&self) -> Result<()> {
        match self.tx.upgrade() {
            Some(tx) => tx.must_be_active(),
            None => Err(Error::TransactionRequired {
                status: "dropped".to_string(),
            }),
        }
    }

    /// Read `key` from the default table
    pub fn read(&self, key: &Blob) -> Result<Blob> {
        self.read_in(DEFAULT_TABLE, key)
    }

    /// Write `key` in the default table
    pub fn write(&self, key: Blob, value: Blob) -> Result<()> {
        self.write_in(DEFAULT_TABLE, key, value)
    }

    /// Delete `key` from the default table
    pub fn delete(&self, key: Blob) -> Result<()> {
        self.write_in(DEFAULT_TABLE, key, Blob::empty())
    }

    /// Smallest visible key of the default table
    pub fn first_key(&self) -> Result<Option<Blob>> {
        self.next_key_in(DEFAULT_TABLE, None)
    }

    /// Smallest visible key of the default table above `key`
    pub fn next_key_after(&self, key: &Blob) -> Result<Option<Blob>> {
        self.next_key_in(DEFAULT_TABLE, Some(key))
    }

    pub(crate) fn read_in(&self, table: &str, key: &Blob) -> Result<Blob> {
        self.must_be_active()?;
        let state = self.state.lock();
        if let Some(value) = state.updates.get(table).and_then(|t| t.get(key)) {
            return Ok(value.clone());
        }
        Ok(self.store.table(table).get(key, self.read_revision))
    }

    pub(crate) fn write_in(&self, table: &str, key: Blob, value: Blob) -> Result<()> {
        self.must_be_active()?;
        let mut state = self.state.lock();
        state
            .updates
            .entry(table.to_string())
            .or_insert_with(BTreeMap::new)
            .insert(key, value);
        Ok(())
    }

    /// Smallest key above `after` that is visible to this connection
    ///
    /// Committed keys at the read revision are merged with buffered writes:
    /// own inserts appear, own deletes hide the key.
    pub(crate) fn next_key_in(&self, table: &str, after: Option<&Blob>) -> Result<Option<Blob>> {
        self.must_be_active()?;
        let map = self.store.table(table);
        let state = self.state.lock();
        let buffered = state.updates.get(table);
        let mut cursor = after.cloned();

        loop {
            let committed = match &cursor {
                None => map.first_key(self.read_revision),
                Some(c) => map.next_key_after(c, self.read_revision),
            };
            let pending = buffered.and_then(|entries| match &cursor {
                None => entries.iter().next(),
                Some(c) => entries.range((Excluded(c), Unbounded)).next(),
            });

            let (key, value) = match (committed, pending) {
                (committed, None) => return Ok(committed),
                (Some(c), Some((key, _))) if c < *key => return Ok(Some(c)),
                (_, Some(entry)) => entry,
            };
            if !value.is_empty() {
                return Ok(Some(key.clone()));
            }
            cursor = Some(key.clone());
        }
    }

    fn release(&self, state: &mut ConnectionState) {
        if !state.released {
            state.released = true;
            let locked = std::mem::take(&mut state.locked);
            self.store.rollback(&locked, self.read_revision);
        }
    }
}

impl TransactionParticipant for Connection {
    fn prepare(&self) -> Result<()> {
        let mut state = self.state.lock();
        if state.released {
            return Err(Error::IllegalState(format!(
                "Connection of transaction {} is closed",
                self.tx_id
            )));
        }
        let keys: Vec<TableKey> = state
            .updates
            .iter()
            .flat_map(|(table, entries)| entries.keys().map(move |key| (table.clone(), key.clone())))
            .collect();
        self.store.prepare(&keys, self.read_revision)?;
        state.locked = keys;
        Ok(())
    }

    fn commit(&self) -> Result<()> {
        let mut state = self.state.lock();
        if state.released {
            return Err(Error::IllegalState(format!(
                "Connection of transaction {} is closed",
                self.tx_id
            )));
        }
        state.released = true;
        let updates = std::mem::take(&mut state.updates);
        let locked = std::mem::take(&mut state.locked);
        self.store.commit(&updates, &locked, self.read_revision)?;
        Ok(())
    }

    fn rollback(&self) -> Result<()> {
        let mut state = self.state.lock();
        state.updates.clear();
        self.release(&mut state);
        Ok(())
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        let mut state = std::mem::take(self.state.get_mut());
        self.release(&mut state);
        self.store.forget_connection(self.tx_id, self);
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("tx_id", &self.tx_id)
            .field("read_revision", &self.read_revision)
            .finish()
    }
}

/// A named table seen through a connection
#[derive(Clone)]
pub struct DatabaseTable {
    connection: Arc<Connection>,
    name: Arc<str>,
}

impl DatabaseTable {
    /// Table name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The connection this table reads through
    pub fn connection(&self) -> &Arc<Connection> {
        &self.connection
    }

    /// Value of `key`, or the empty blob if absent or deleted
    pub fn read(&self, key: &Blob) -> Result<Blob> {
        self.connection.read_in(&self.name, key)
    }

    /// Buffer a write of `key`
    pub fn write(&self, key: Blob, value: Blob) -> Result<()> {
        self.connection.write_in(&self.name, key, value)
    }

    /// Buffer a delete of `key`
    pub fn delete(&self, key: Blob) -> Result<()> {
        self.connection.write_in(&self.name, key, Blob::empty())
    }

    /// True if `key` has a non-empty value
    pub fn exists(&self, key: &Blob) -> Result<bool> {
        Ok(!self.read(key)?.is_empty())
    }

    /// Smallest visible key
    pub fn first_key(&self) -> Result<Option<Blob>> {
        self.connection.next_key_in(&self.name, None)
    }

    /// Smallest visible key above `key`
    pub fn next_key_after(&self, key: &Blob) -> Result<Option<Blob>> {
        self.connection.next_key_in(&self.name, Some(key))
    }

    /// Visible keys starting with `prefix`, in order
    pub fn keys_with_prefix(&self, prefix: &[u8]) -> Result<Vec<Blob>> {
        let mut keys = Vec::new();
        let mut cursor = self.first_key_at_or_after(prefix)?;
        while let Some(key) = cursor {
            if !key.starts_with(prefix) {
                break;
            }
            cursor = self.next_key_after(&key)?;
            keys.push(key);
        }
        Ok(keys)
    }

    fn first_key_at_or_after(&self, start: &[u8]) -> Result<Option<Blob>> {
        if start.is_empty() {
            return self.first_key();
        }
        let start = Blob::from_slice(start);
        if self.exists(&start)? {
            return Ok(Some(start));
        }
        self.next_key_after(&start)
    }
}

impl fmt::Debug for DatabaseTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DatabaseTable")
            .field("name", &self.name)
            .field("connection", &self.connection)
            .finish()
    }
}
