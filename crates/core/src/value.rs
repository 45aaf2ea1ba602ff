//! Value types for Ember entities
//!
//! This module defines:
//! - Value: The data model of an application entity
//! - EntityCell: A shared, mutable entity object with identity
//! - EntityRef: An opaque reference handle from one entity to another
//!
//! ## Reference Rules
//!
//! An entity may point at another entity only through a `Value::Ref`.
//! `Value::Entity` exists so that the embedding of a whole entity inside
//! another can be detected and rejected before serialization; it never
//! reaches the codec output.

use parking_lot::Mutex;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::BTreeMap;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use crate::error::Result;
use crate::types::EntityId;

/// Data model of an application entity
///
/// Different types are never equal: `Int(1) != Float(1.0)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    /// Null value
    Null,
    /// Boolean value
    Bool(bool),
    /// 64-bit signed integer
    Int(i64),
    /// 64-bit floating point (IEEE-754)
    Float(f64),
    /// UTF-8 string
    String(String),
    /// Raw bytes
    Bytes(Vec<u8>),
    /// Array of values
    Array(Vec<Value>),
    /// Object with ordered string keys
    Map(BTreeMap<String, Value>),
    /// Reference to another entity
    Ref(EntityRef),
    /// Another entity embedded directly (always rejected by the codec)
    #[serde(skip)]
    Entity(EntityCell),
}

impl Value {
    /// Build a map value from key/value pairs
    pub fn map<K, I>(entries: I) -> Value
    where
        K: Into<String>,
        I: IntoIterator<Item = (K, Value)>,
    {
        Value::Map(entries.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }

    /// Returns true if this is Null
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Returns the integer if this is an Int
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    /// Returns the string if this is a String
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    /// Returns the reference if this is a Ref
    pub fn as_ref_handle(&self) -> Option<&EntityRef> {
        match self {
            Value::Ref(r) => Some(r),
            _ => None,
        }
    }

    /// Returns the elements if this is an Array
    pub fn as_array(&self) -> Option<&Vec<Value>> {
        match self {
            Value::Array(items) => Some(items),
            _ => None,
        }
    }

    /// Mutable access to the elements if this is an Array
    pub fn as_array_mut(&mut self) -> Option<&mut Vec<Value>> {
        match self {
            Value::Array(items) => Some(items),
            _ => None,
        }
    }

    /// Mutable access to the entries if this is a Map
    pub fn as_map_mut(&mut self) -> Option<&mut BTreeMap<String, Value>> {
        match self {
            Value::Map(entries) => Some(entries),
            _ => None,
        }
    }

    /// Look up a field of a Map
    pub fn get(&self, field: &str) -> Option<&Value> {
        match self {
            Value::Map(entries) => entries.get(field),
            _ => None,
        }
    }

    /// Visit this value and every nested value, parents before children
    ///
    /// Stops at the first error returned by `visit`. An embedded entity is
    /// visited but its contents are not.
    pub fn walk<F>(&self, visit: &mut F) -> Result<()>
    where
        F: FnMut(&Value) -> Result<()>,
    {
        visit(self)?;
        match self {
            Value::Array(items) => {
                for item in items {
                    item.walk(visit)?;
                }
            }
            Value::Map(entries) => {
                for entry in entries.values() {
                    entry.walk(visit)?;
                }
            }
            _ => {}
        }
        Ok(())
    }

    /// Copy of this value with every pending reference replaced by an id
    ///
    /// `resolve` is called once per pending reference occurrence.
    pub fn resolve_refs<F>(&self, resolve: &mut F) -> Result<Value>
    where
        F: FnMut(&EntityCell) -> Result<EntityId>,
    {
        Ok(match self {
            Value::Ref(EntityRef::Pending(cell)) => Value::Ref(EntityRef::Id(resolve(cell)?)),
            Value::Array(items) => Value::Array(
                items
                    .iter()
                    .map(|item| item.resolve_refs(resolve))
                    .collect::<Result<_>>()?,
            ),
            Value::Map(entries) => Value::Map(
                entries
                    .iter()
                    .map(|(k, v)| Ok((k.clone(), v.resolve_refs(resolve)?)))
                    .collect::<Result<_>>()?,
            ),
            other => other.clone(),
        })
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Value::Float(f)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<Vec<Value>> for Value {
    fn from(items: Vec<Value>) -> Self {
        Value::Array(items)
    }
}

impl From<EntityRef> for Value {
    fn from(r: EntityRef) -> Self {
        Value::Ref(r)
    }
}

/// A live entity object
///
/// Cells have identity: two cells are equal only if they are the same
/// allocation, regardless of content. Clones share the allocation.
#[derive(Clone)]
pub struct EntityCell(Arc<Mutex<Value>>);

impl EntityCell {
    /// Wrap a value as a new entity object
    pub fn new(value: Value) -> Self {
        EntityCell(Arc::new(Mutex::new(value)))
    }

    /// Snapshot of the current contents
    pub fn get(&self) -> Value {
        self.0.lock().clone()
    }

    /// Replace the contents
    pub fn set(&self, value: Value) {
        *self.0.lock() = value;
    }

    /// Mutate the contents in place
    pub fn update<R>(&self, f: impl FnOnce(&mut Value) -> R) -> R {
        f(&mut self.0.lock())
    }

    /// True if both handles point to the same object
    pub fn ptr_eq(&self, other: &EntityCell) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    fn addr(&self) -> usize {
        Arc::as_ptr(&self.0) as *const () as usize
    }
}

impl PartialEq for EntityCell {
    fn eq(&self, other: &Self) -> bool {
        self.ptr_eq(other)
    }
}

impl Eq for EntityCell {}

impl Hash for EntityCell {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.addr().hash(state);
    }
}

impl fmt::Debug for EntityCell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EntityCell({:#x})", self.addr())
    }
}

/// Reference handle carrying exactly one entity id
///
/// A handle created with [`EntityRef::to`] points at an object that may not
/// have an id yet; the entity manager assigns one when the referencing
/// entity is flushed. Only resolved handles can be serialized.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum EntityRef {
    /// Handle to a registered entity
    Id(EntityId),
    /// Handle to an object awaiting registration
    Pending(EntityCell),
}

impl EntityRef {
    /// Handle to a known entity id
    pub fn id(id: EntityId) -> Self {
        EntityRef::Id(id)
    }

    /// Handle to an entity object, resolved at flush
    pub fn to(cell: &EntityCell) -> Self {
        EntityRef::Pending(cell.clone())
    }

    /// The referenced id, if resolved
    pub fn entity_id(&self) -> Option<EntityId> {
        match self {
            EntityRef::Id(id) => Some(*id),
            EntityRef::Pending(_) => None,
        }
    }
}

impl Serialize for EntityRef {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        match self {
            EntityRef::Id(id) => id.serialize(serializer),
            EntityRef::Pending(cell) => Err(serde::ser::Error::custom(format!(
                "unresolved reference to {:?}",
                cell
            ))),
        }
    }
}

impl<'de> Deserialize<'de> for EntityRef {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        EntityId::deserialize(deserializer).map(EntityRef::Id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use std::collections::HashSet;

    #[test]
    fn test_cell_identity() {
        let a = EntityCell::new(Value::Int(1));
        let b = EntityCell::new(Value::Int(1));
        assert_ne!(a, b);
        assert_eq!(a, a.clone());

        let mut set = HashSet::new();
        set.insert(a.clone());
        set.insert(a.clone());
        set.insert(b);
        assert_eq!(set.len(), 2);
    }

    #[test]
    fn test_cell_update() {
        let cell = EntityCell::new(Value::Array(vec![]));
        cell.update(|v| v.as_array_mut().unwrap().push(Value::Int(3)));
        assert_eq!(cell.get(), Value::Array(vec![Value::Int(3)]));
    }

    #[test]
    fn test_walk_visits_nested_refs() {
        let value = Value::map([
            ("a", Value::Ref(EntityRef::id(EntityId::new(1)))),
            (
                "b",
                Value::Array(vec![Value::Int(0), Value::Ref(EntityRef::id(EntityId::new(2)))]),
            ),
        ]);
        let mut found = Vec::new();
        value
            .walk(&mut |v| {
                if let Some(id) = v.as_ref_handle().and_then(|r| r.entity_id()) {
                    found.push(id);
                }
                Ok(())
            })
            .unwrap();
        assert_eq!(found, vec![EntityId::new(1), EntityId::new(2)]);
    }

    #[test]
    fn test_walk_stops_on_error() {
        let value = Value::Array(vec![Value::Int(1), Value::Int(2)]);
        let mut visited = 0;
        let result = value.walk(&mut |v| {
            visited += 1;
            if v.as_int() == Some(1) {
                return Err(Error::IllegalArgument("stop".to_string()));
            }
            Ok(())
        });
        assert!(result.is_err());
        assert_eq!(visited, 2);
    }

    #[test]
    fn test_resolve_refs_replaces_pending() {
        let target = EntityCell::new(Value::Null);
        let value = Value::Array(vec![Value::Ref(EntityRef::to(&target)), Value::Int(5)]);
        let resolved = value
            .resolve_refs(&mut |cell| {
                assert_eq!(cell, &target);
                Ok(EntityId::new(9))
            })
            .unwrap();
        assert_eq!(
            resolved,
            Value::Array(vec![Value::Ref(EntityRef::id(EntityId::new(9))), Value::Int(5)])
        );
    }

    #[test]
    fn test_different_types_never_equal() {
        assert_ne!(Value::Int(1), Value::Float(1.0));
        assert_ne!(Value::from("x"), Value::Bytes(b"x".to_vec()));
    }
}
