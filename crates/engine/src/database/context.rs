//! Per-task context handed to application code
//!
//! A `TaskContext` bundles everything one transaction needs: the
//! transaction itself, its store connection, the entity and binding stores
//! over that connection and the entity manager. It is passed explicitly to
//! the task closure; there is no ambient "current transaction".
//!
//! # Usage
//!
//! ```ignore
//! db.execute(|ctx| {
//!     let counter = match ctx.lookup("counter")? {
//!         Some(cell) => cell,
//!         None => {
//!             let cell = EntityCell::new(Value::Int(0));
//!             ctx.bind("counter", &cell)?;
//!             cell
//!         }
//!     };
//!     counter.update(|v| *v = Value::Int(v.as_int().unwrap_or(0) + 1));
//!     Ok(())
//! })?;
//! ```

use crate::codec::ObjectCodec;
use crate::entity::{BindingStore, EntityIdFactory, EntityManager, EntityStore};
use crate::gc::{EntityGraph, MutatorListener};
use ember_concurrency::{Transaction, TransactionCoordinator};
use ember_core::{EntityCell, EntityId, Result};
use ember_storage::{Connection, DatabaseTable, RevisionedStore};
use std::fmt;
use std::sync::Arc;
use tracing::error;

/// Everything a task can touch within its transaction
pub struct TaskContext {
    tx: Arc<Transaction>,
    coordinator: Arc<TransactionCoordinator>,
    connection: Arc<Connection>,
    entity_store: Arc<EntityStore>,
    bindings: Arc<BindingStore>,
    entities: EntityManager,
}

impl TaskContext {
    pub(crate) fn open(
        store: &Arc<RevisionedStore>,
        coordinator: Arc<TransactionCoordinator>,
        tx: Arc<Transaction>,
        codec: Arc<dyn ObjectCodec>,
        ids: Arc<EntityIdFactory>,
        listener: Arc<dyn MutatorListener>,
    ) -> Result<Self> {
        let connection = store.open_connection(&tx)?;
        let entity_store = Arc::new(EntityStore::new(&connection, codec, listener.clone()));
        let bindings = Arc::new(BindingStore::new(&connection, listener));
        let entities = EntityManager::new(entity_store.clone(), ids);
        Ok(TaskContext {
            tx,
            coordinator,
            connection,
            entity_store,
            bindings,
            entities,
        })
    }

    /// Entity manager of this transaction
    pub fn entities(&self) -> &EntityManager {
        &self.entities
    }

    /// Raw entity store, bypassing the manager's object cache
    pub fn entity_store(&self) -> &Arc<EntityStore> {
        &self.entity_store
    }

    /// Binding table of this transaction
    pub fn bindings(&self) -> &Arc<BindingStore> {
        &self.bindings
    }

    /// Bind `name` to `cell`, registering the entity if needed
    ///
    /// The entity is written when the task completes.
    pub fn bind(&self, name: &str, cell: &EntityCell) -> Result<EntityId> {
        let id = self.entities.get_entity_id(cell)?;
        self.bindings.update(name, id)?;
        Ok(id)
    }

    /// Entity bound to `name`
    pub fn lookup(&self, name: &str) -> Result<Option<EntityCell>> {
        match self.bindings.read(name)? {
            Some(id) => self.entities.get_entity_by_id(id).map(Some),
            None => Ok(None),
        }
    }

    /// Remove the binding `name`, returning the id it held
    ///
    /// The entity itself is left for the collector.
    pub fn unbind(&self, name: &str) -> Result<Option<EntityId>> {
        self.bindings.delete(name)
    }

    /// Named table of this transaction's connection
    pub fn table(&self, name: &str) -> DatabaseTable {
        self.connection.table(name)
    }

    /// Connection of this transaction
    pub fn connection(&self) -> &Arc<Connection> {
        &self.connection
    }

    /// The transaction this task runs in
    pub fn transaction(&self) -> &Arc<Transaction> {
        &self.tx
    }

    /// Make the transaction roll back instead of committing
    pub fn set_rollback_only(&self) {
        self.tx.set_rollback_only();
    }

    /// Check the bindings made by the task against the flushed entities
    pub(crate) fn validate_bindings(&self) -> Result<()> {
        self.bindings.validate(&self.entity_store)
    }

    /// Reference graph as seen by this transaction
    pub fn graph(&self) -> EntityGraph {
        EntityGraph::new(self.entity_store.clone(), self.bindings.clone())
    }
}

impl Drop for TaskContext {
    fn drop(&mut self) {
        // only reached with a live transaction when the task panicked
        if self.tx.status().can_rollback() {
            if let Err(e) = self.coordinator.rollback(&self.tx) {
                error!(target: "ember::txn", txn_id = self.tx.id(), error = %e, "Rollback on drop failed");
            }
        }
    }
}

impl fmt::Debug for TaskContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskContext")
            .field("txn_id", &self.tx.id())
            .field("read_revision", &self.connection.read_revision())
            .field("entities", &self.entities)
            .finish()
    }
}
