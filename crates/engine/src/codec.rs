//! Serialization boundary for entity values
//!
//! An [`ObjectCodec`] turns a [`Value`] into bytes and back. Listeners passed
//! to either direction see every nested value, parents first: before it is
//! written, or after the whole blob has been read. The entity store uses
//! them to harvest the ids of referenced entities and to reject entities
//! embedded directly inside other entities.

use ember_core::{Blob, EntityId, EntityRef, Error, Result, Value};
use std::collections::BTreeSet;
use std::fmt;

/// Hook invoked for every value the codec visits
pub trait SerializationListener {
    /// Called for each value before it is serialized
    fn before_serialize(&mut self, _value: &Value) -> Result<()> {
        Ok(())
    }

    /// Called for each value after deserialization
    fn after_deserialize(&mut self, _value: &Value) -> Result<()> {
        Ok(())
    }
}

/// Converts entity values to blobs and back
pub trait ObjectCodec: Send + Sync + fmt::Debug {
    /// Serialize `value`, notifying `listeners` of each nested value
    fn serialize(
        &self,
        value: &Value,
        listeners: &mut [&mut dyn SerializationListener],
    ) -> Result<Blob>;

    /// Deserialize `bytes`, notifying `listeners` of each nested value
    fn deserialize(
        &self,
        bytes: &Blob,
        listeners: &mut [&mut dyn SerializationListener],
    ) -> Result<Value>;
}

/// MessagePack codec backed by `rmp-serde`
#[derive(Debug, Clone, Copy, Default)]
pub struct MessagePackCodec;

impl ObjectCodec for MessagePackCodec {
    fn serialize(
        &self,
        value: &Value,
        listeners: &mut [&mut dyn SerializationListener],
    ) -> Result<Blob> {
        value.walk(&mut |v| {
            for listener in listeners.iter_mut() {
                listener.before_serialize(v)?;
            }
            Ok(())
        })?;
        let bytes =
            rmp_serde::to_vec_named(value).map_err(|e| Error::Serialization(e.to_string()))?;
        Ok(Blob::new(bytes))
    }

    fn deserialize(
        &self,
        bytes: &Blob,
        listeners: &mut [&mut dyn SerializationListener],
    ) -> Result<Value> {
        let value: Value = rmp_serde::from_slice(bytes.as_bytes())
            .map_err(|e| Error::Serialization(e.to_string()))?;
        value.walk(&mut |v| {
            for listener in listeners.iter_mut() {
                listener.after_deserialize(v)?;
            }
            Ok(())
        })?;
        Ok(value)
    }
}

/// Collects the ids of all resolved references seen by the codec
#[derive(Debug, Default)]
pub struct ReferenceCollector {
    ids: BTreeSet<EntityId>,
}

impl ReferenceCollector {
    /// Create an empty collector
    pub fn new() -> Self {
        Self::default()
    }

    /// The ids collected so far
    pub fn ids(&self) -> &BTreeSet<EntityId> {
        &self.ids
    }

    /// Consume the collector, returning the ids
    pub fn into_ids(self) -> BTreeSet<EntityId> {
        self.ids
    }

    fn record(&mut self, value: &Value) {
        if let Value::Ref(EntityRef::Id(id)) = value {
            self.ids.insert(*id);
        }
    }
}

impl SerializationListener for ReferenceCollector {
    fn before_serialize(&mut self, value: &Value) -> Result<()> {
        self.record(value);
        Ok(())
    }

    fn after_deserialize(&mut self, value: &Value) -> Result<()> {
        self.record(value);
        Ok(())
    }
}

/// Rejects entities embedded directly and references without an id
#[derive(Debug, Default, Clone, Copy)]
pub struct DirectEmbeddingCheck;

impl SerializationListener for DirectEmbeddingCheck {
    fn before_serialize(&mut self, value: &Value) -> Result<()> {
        match value {
            Value::Entity(cell) => Err(Error::IllegalReferenceEmbedding(format!(
                "{:?} must be referenced through an EntityRef, not embedded",
                cell
            ))),
            Value::Ref(EntityRef::Pending(cell)) => Err(Error::IllegalReferenceEmbedding(format!(
                "reference to {:?} was not resolved to an entity id",
                cell
            ))),
            _ => Ok(()),
        }
    }
}
