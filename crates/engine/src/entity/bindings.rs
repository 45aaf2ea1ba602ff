//! Named roots of the entity graph
//!
//! `BindingStore` maps binding names (ordered as UTF-8 bytes) to entity ids
//! in the `bindings` table. The set of bound ids is the collector's root
//! set, so every change is reported as a root edge (source `None`).
//!
//! A binding may name an entity that is registered but not yet written.
//! Targets are therefore checked by [`BindingStore::validate`] once the
//! transaction's entities are flushed, not when the binding is made.

use super::store::EntityStore;
use crate::gc::MutatorListener;
use ember_core::{Blob, EntityId, Error, Result};
use ember_storage::{Connection, DatabaseTable};
use parking_lot::Mutex;
use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;
use tracing::debug;

/// Table of bindings
pub const BINDINGS_TABLE: &str = "bindings";

/// Binding table of one transaction
pub struct BindingStore {
    table: DatabaseTable,
    listener: Arc<dyn MutatorListener>,
    /// Names bound by this transaction
    bound: Mutex<BTreeSet<String>>,
}

impl BindingStore {
    /// Create the binding store of `connection`'s transaction
    pub fn new(connection: &Arc<Connection>, listener: Arc<dyn MutatorListener>) -> Self {
        BindingStore {
            table: connection.table(BINDINGS_TABLE),
            listener,
            bound: Mutex::new(BTreeSet::new()),
        }
    }

    /// True if `name` is bound
    pub fn exists(&self, name: &str) -> Result<bool> {
        self.table.exists(&Blob::from(name))
    }

    /// Entity bound to `name`
    pub fn read(&self, name: &str) -> Result<Option<EntityId>> {
        let value = self.table.read(&Blob::from(name))?;
        if value.is_empty() {
            return Ok(None);
        }
        EntityId::from_blob(&value).map(Some)
    }

    /// Bind `name` to `id`, replacing any previous binding
    ///
    /// `id` must exist by the time the transaction commits; the task then
    /// fails with `Error::EntityNotFound` otherwise.
    pub fn update(&self, name: &str, id: EntityId) -> Result<()> {
        let old = self.read(name)?;
        if old == Some(id) {
            return Ok(());
        }
        if let Some(old) = old {
            self.listener.on_reference_removed(None, old);
        }
        self.listener.on_reference_created(None, id);
        self.bound.lock().insert(name.to_string());
        self.table.write(Blob::from(name), id.to_blob())
    }

    /// Check that every name bound by this transaction names an entity
    ///
    /// Each target is claimed in `entities`, so an entity deleted
    /// concurrently, by the collector or a task, makes one side conflict.
    ///
    /// # Errors
    /// Returns `Error::EntityNotFound` for the first target that does not
    /// exist.
    pub fn validate(&self, entities: &EntityStore) -> Result<()> {
        let names: Vec<String> = self.bound.lock().iter().cloned().collect();
        for name in names {
            let Some(id) = self.read(&name)? else {
                continue;
            };
            if !entities.claim(id)? {
                debug!(target: "ember::entity", binding = %name, %id, "Binding names a missing entity");
                return Err(Error::EntityNotFound(id));
            }
        }
        Ok(())
    }

    /// Remove the binding `name`
    ///
    /// Returns the id that was bound, if any.
    pub fn delete(&self, name: &str) -> Result<Option<EntityId>> {
        let old = self.read(name)?;
        if let Some(old) = old {
            self.listener.on_reference_removed(None, old);
            self.table.delete(Blob::from(name))?;
        }
        Ok(old)
    }

    /// Smallest bound name
    pub fn first_key(&self) -> Result<Option<String>> {
        self.table.first_key()?.map(|key| decode_name(&key)).transpose()
    }

    /// Smallest bound name above `name`
    pub fn next_key_after(&self, name: &str) -> Result<Option<String>> {
        self.table
            .next_key_after(&Blob::from(name))?
            .map(|key| decode_name(&key))
            .transpose()
    }
}

fn decode_name(key: &Blob) -> Result<String> {
    String::from_utf8(key.as_bytes().to_vec())
        .map_err(|e| Error::Serialization(format!("binding name is not UTF-8: {}", e)))
}

impl fmt::Debug for BindingStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BindingStore")
            .field("connection", self.table.connection())
            .finish()
    }
}
