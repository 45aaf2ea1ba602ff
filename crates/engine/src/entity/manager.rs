//! Per-transaction entity cache and flush
//!
//! The `EntityManager` owns the live entity objects of one transaction. It
//! maps each registered [`EntityCell`] to its id and back, loads entities on
//! demand and writes every registered entity to the [`EntityStore`] when the
//! transaction ends.
//!
//! ## Lifecycle
//!
//! ```text
//! Active ──flush()──> Flushing ──> Closed
//! ```
//!
//! Flushing an entity resolves its pending references, which may register
//! further entities. Those are appended to the flush queue, so `flush`
//! returns only once the transitive set of touched entities is stored.

use super::id_factory::EntityIdFactory;
use super::store::EntityStore;
use ember_core::{EntityCell, EntityId, EntityRef, Error, Result};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet, VecDeque};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, trace};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ManagerStatus {
    Active,
    Flushing,
    Closed,
}

impl fmt::Display for ManagerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ManagerStatus::Active => write!(f, "ACTIVE"),
            ManagerStatus::Flushing => write!(f, "FLUSHING"),
            ManagerStatus::Closed => write!(f, "CLOSED"),
        }
    }
}

struct ManagerState {
    status: ManagerStatus,
    by_cell: HashMap<EntityCell, EntityId>,
    by_id: HashMap<EntityId, EntityCell>,
    flush_queue: VecDeque<EntityCell>,
    deleted: HashSet<EntityId>,
}

/// Entity objects of one transaction
pub struct EntityManager {
    store: Arc<EntityStore>,
    ids: Arc<EntityIdFactory>,
    state: Mutex<ManagerState>,
}

impl EntityManager {
    /// Create an active manager writing to `store`
    pub fn new(store: Arc<EntityStore>, ids: Arc<EntityIdFactory>) -> Self {
        EntityManager {
            store,
            ids,
            state: Mutex::new(ManagerState {
                status: ManagerStatus::Active,
                by_cell: HashMap::new(),
                by_id: HashMap::new(),
                flush_queue: VecDeque::new(),
                deleted: HashSet::new(),
            }),
        }
    }

    /// Id of `cell`, assigning a fresh one on first sight
    ///
    /// A cell registered while flushing is queued and stored before the
    /// flush completes.
    ///
    /// # Errors
    /// Returns `Error::IllegalState` once the manager is closed.
    pub fn get_entity_id(&self, cell: &EntityCell) -> Result<EntityId> {
        let mut state = self.state.lock();
        check_open(&state)?;
        if let Some(id) = state.by_cell.get(cell) {
            return Ok(*id);
        }

        let id = self.ids.new_entity_id();
        state.by_cell.insert(cell.clone(), id);
        state.by_id.insert(id, cell.clone());
        if state.status == ManagerStatus::Flushing {
            state.flush_queue.push_back(cell.clone());
        }
        trace!(target: "ember::entity", %id, "Entity registered");
        Ok(id)
    }

    /// Reference handle to `cell`, registering it if needed
    pub fn create_reference(&self, cell: &EntityCell) -> Result<EntityRef> {
        self.get_entity_id(cell).map(EntityRef::id)
    }

    /// Live object of `id`, loading it on first access
    ///
    /// Repeated calls return the same object.
    ///
    /// # Errors
    /// - `Error::EntityNotFound` if `id` does not exist or was deleted
    /// - `Error::IllegalState` once the manager is closed
    pub fn get_entity_by_id(&self, id: EntityId) -> Result<EntityCell> {
        let mut state = self.state.lock();
        check_open(&state)?;
        if let Some(cell) = state.by_id.get(&id) {
            return Ok(cell.clone());
        }
        if state.deleted.contains(&id) {
            return Err(Error::EntityNotFound(id));
        }

        let cell = EntityCell::new(self.store.read(id)?);
        state.by_cell.insert(cell.clone(), id);
        state.by_id.insert(id, cell.clone());
        if state.status == ManagerStatus::Flushing {
            state.flush_queue.push_back(cell.clone());
        }
        Ok(cell)
    }

    /// Object behind a reference handle
    pub fn dereference(&self, reference: &EntityRef) -> Result<EntityCell> {
        match reference {
            EntityRef::Id(id) => self.get_entity_by_id(*id),
            EntityRef::Pending(cell) => {
                check_open(&self.state.lock())?;
                Ok(cell.clone())
            }
        }
    }

    /// Delete the entity behind `cell`
    ///
    /// An unregistered cell was never stored, so there is nothing to delete.
    pub fn delete_entity(&self, cell: &EntityCell) -> Result<()> {
        let mut state = self.state.lock();
        check_open(&state)?;
        let Some(id) = state.by_cell.remove(cell) else {
            return Ok(());
        };
        state.by_id.remove(&id);
        state.deleted.insert(id);
        self.store.delete(id)?;
        debug!(target: "ember::entity", %id, "Entity deleted");
        Ok(())
    }

    /// Smallest stored entity id
    ///
    /// Entities registered but not yet flushed are not included.
    pub fn first_key(&self) -> Result<Option<EntityId>> {
        check_open(&self.state.lock())?;
        self.store.first_key()
    }

    /// Smallest stored entity id above `id`
    pub fn next_key_after(&self, id: EntityId) -> Result<Option<EntityId>> {
        check_open(&self.state.lock())?;
        self.store.next_key_after(id)
    }

    /// Number of entities known to this manager
    pub fn registered_count(&self) -> usize {
        self.state.lock().by_cell.len()
    }

    /// Write every registered entity to the store and close the manager
    ///
    /// The manager is closed afterwards even if the flush fails.
    ///
    /// # Errors
    /// - `Error::IllegalState` if the manager was already flushed
    /// - any error from resolving references or storing an entity
    pub fn flush(&self) -> Result<()> {
        {
            let mut state = self.state.lock();
            if state.status != ManagerStatus::Active {
                return Err(Error::IllegalState(format!(
                    "Entity manager is {}, flush requires ACTIVE",
                    state.status
                )));
            }
            state.status = ManagerStatus::Flushing;

            let mut seed: Vec<_> = state
                .by_id
                .iter()
                .map(|(id, cell)| (*id, cell.clone()))
                .collect();
            seed.sort_by_key(|(id, _)| *id);
            state.flush_queue.extend(seed.into_iter().map(|(_, cell)| cell));
        }

        let result = self.drain_flush_queue();

        let mut state = self.state.lock();
        state.status = ManagerStatus::Closed;
        state.flush_queue.clear();
        result
    }

    fn drain_flush_queue(&self) -> Result<()> {
        let mut flushed = 0usize;
        loop {
            let next = {
                let mut state = self.state.lock();
                let mut next = None;
                while let Some(cell) = state.flush_queue.pop_front() {
                    if let Some(id) = state.by_cell.get(&cell) {
                        next = Some((*id, cell));
                        break;
                    }
                }
                next
            };
            let Some((id, cell)) = next else {
                break;
            };

            // references are resolved without the state lock held, since
            // resolving registers new cells
            let resolved = cell
                .get()
                .resolve_refs(&mut |target| self.get_entity_id(target))?;
            self.store.update(id, &resolved)?;
            flushed += 1;
        }
        debug!(target: "ember::entity", flushed, "Entity manager flushed");
        Ok(())
    }
}

fn check_open(state: &ManagerState) -> Result<()> {
    if state.status == ManagerStatus::Closed {
        return Err(Error::IllegalState("Entity manager is CLOSED".to_string()));
    }
    Ok(())
}

impl fmt::Debug for EntityManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("EntityManager")
            .field("status", &state.status)
            .field("registered", &state.by_cell.len())
            .finish()
    }
}
