//! Entity persistence with reference tracking
//!
//! `EntityStore` keeps serialized entities in the `entities` table, keyed by
//! the big-endian id, and per-entity metadata in `entities-meta`, keyed by
//! id followed by the metadata name. Every update reports the difference
//! between the references held by the old and new blob to the mutator
//! listener before the new blob is written.

use crate::codec::{DirectEmbeddingCheck, ObjectCodec, ReferenceCollector};
use crate::gc::MutatorListener;
use ember_core::{Blob, EntityId, Error, Result, Value};
use ember_storage::{Connection, DatabaseTable};
use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;
use tracing::trace;

/// Table of serialized entities
pub const ENTITIES_TABLE: &str = "entities";

/// Table of per-entity metadata
pub const ENTITY_METADATA_TABLE: &str = "entities-meta";

/// Entity table of one transaction
pub struct EntityStore {
    entities: DatabaseTable,
    metadata: DatabaseTable,
    codec: Arc<dyn ObjectCodec>,
    listener: Arc<dyn MutatorListener>,
}

impl EntityStore {
    /// Create the entity store of `connection`'s transaction
    pub fn new(
        connection: &Arc<Connection>,
        codec: Arc<dyn ObjectCodec>,
        listener: Arc<dyn MutatorListener>,
    ) -> Self {
        EntityStore {
            entities: connection.table(ENTITIES_TABLE),
            metadata: connection.table(ENTITY_METADATA_TABLE),
            codec,
            listener,
        }
    }

    /// True if `id` has a stored, non-deleted value
    pub fn exists(&self, id: EntityId) -> Result<bool> {
        self.entities.exists(&id.to_blob())
    }

    /// Deserialize the stored value of `id`
    ///
    /// # Errors
    /// Returns `Error::EntityNotFound` if the entity does not exist.
    pub fn read(&self, id: EntityId) -> Result<Value> {
        let bytes = self.entities.read(&id.to_blob())?;
        if bytes.is_empty() {
            return Err(Error::EntityNotFound(id));
        }
        self.codec.deserialize(&bytes, &mut [])
    }

    /// Store `value` as the new state of `id`
    ///
    /// Nothing is written, and no event is fired, when the serialized form
    /// equals the stored one.
    ///
    /// # Errors
    /// - `Error::IllegalReferenceEmbedding` if `value` embeds an entity
    ///   object or an unresolved reference
    /// - `Error::TransactionRequired` outside an active transaction
    pub fn update(&self, id: EntityId, value: &Value) -> Result<()> {
        let mut check = DirectEmbeddingCheck;
        let mut new_refs = ReferenceCollector::new();
        let bytes = self
            .codec
            .serialize(value, &mut [&mut check, &mut new_refs])?;

        let key = id.to_blob();
        let old_bytes = self.entities.read(&key)?;
        if old_bytes == bytes {
            return Ok(());
        }

        let old_refs = if old_bytes.is_empty() {
            self.listener.on_entity_created(id);
            BTreeSet::new()
        } else {
            self.references_in(&old_bytes)?
        };
        let new_refs = new_refs.into_ids();

        let sweeping = self.listener.is_sweeping();
        for target in new_refs.difference(&old_refs) {
            self.listener.on_reference_created(Some(id), *target);
            if sweeping {
                self.claim(*target)?;
            }
        }
        for target in old_refs.difference(&new_refs) {
            self.listener.on_reference_removed(Some(id), *target);
        }

        trace!(target: "ember::entity", %id, bytes = bytes.len(), "Entity updated");
        self.entities.write(key, bytes)
    }

    /// Delete `id` and all its metadata
    ///
    /// Deleting a missing entity does nothing.
    pub fn delete(&self, id: EntityId) -> Result<()> {
        let key = id.to_blob();
        let old_bytes = self.entities.read(&key)?;
        if old_bytes.is_empty() {
            return Ok(());
        }
        for target in self.references_in(&old_bytes)? {
            self.listener.on_reference_removed(Some(id), target);
        }
        self.entities.delete(key.clone())?;
        for meta_key in self.metadata.keys_with_prefix(key.as_bytes())? {
            self.metadata.delete(meta_key)?;
        }
        trace!(target: "ember::entity", %id, "Entity deleted");
        Ok(())
    }

    /// Rewrite the stored value of `id` unchanged
    ///
    /// This puts `id` in the transaction's write set: a concurrent delete of
    /// `id`, the collector's included, and this transaction cannot both
    /// commit. Returns false, writing nothing, if `id` does not exist.
    pub fn claim(&self, id: EntityId) -> Result<bool> {
        let key = id.to_blob();
        let bytes = self.entities.read(&key)?;
        if bytes.is_empty() {
            return Ok(false);
        }
        self.entities.write(key, bytes)?;
        Ok(true)
    }

    /// Smallest existing entity id
    pub fn first_key(&self) -> Result<Option<EntityId>> {
        self.entities
            .first_key()?
            .map(|key| EntityId::from_blob(&key))
            .transpose()
    }

    /// Smallest existing entity id above `id`
    pub fn next_key_after(&self, id: EntityId) -> Result<Option<EntityId>> {
        self.entities
            .next_key_after(&id.to_blob())?
            .map(|key| EntityId::from_blob(&key))
            .transpose()
    }

    /// Ids referenced by the stored value of `id`
    ///
    /// A missing entity references nothing.
    pub fn referenced_ids(&self, id: EntityId) -> Result<BTreeSet<EntityId>> {
        let bytes = self.entities.read(&id.to_blob())?;
        if bytes.is_empty() {
            return Ok(BTreeSet::new());
        }
        self.references_in(&bytes)
    }

    fn references_in(&self, bytes: &Blob) -> Result<BTreeSet<EntityId>> {
        let mut refs = ReferenceCollector::new();
        self.codec.deserialize(bytes, &mut [&mut refs])?;
        Ok(refs.into_ids())
    }

    /// Metadata `name` of `id`, or the empty blob
    pub fn read_metadata(&self, id: EntityId, name: &str) -> Result<Blob> {
        self.metadata.read(&metadata_key(id, name))
    }

    /// Set metadata `name` of `id`
    pub fn update_metadata(&self, id: EntityId, name: &str, value: Blob) -> Result<()> {
        self.metadata.write(metadata_key(id, name), value)
    }
}

fn metadata_key(id: EntityId, name: &str) -> Blob {
    let mut key = id.to_blob().as_bytes().to_vec();
    key.extend_from_slice(name.as_bytes());
    Blob::new(key)
}

impl fmt::Debug for EntityStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EntityStore")
            .field("connection", self.entities.connection())
            .field("codec", &self.codec)
            .finish()
    }
}
