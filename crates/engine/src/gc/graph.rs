//! Reference graph view over the entity and binding tables
//!
//! Nodes are entity ids, edges are the references found in an entity's
//! stored value and roots are the ids bound by a binding. Node colors are
//! stored as entity metadata, so they are versioned and committed like any
//! other write.

use crate::entity::{BindingStore, EntityStore};
use ember_core::{Blob, EntityId, Error, Result};
use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

/// Metadata name under which a node's color is stored
pub const COLOR_METADATA: &str = "gc-color";

/// Tri-color marking state of a node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub enum Color {
    /// Not reached during the current pass
    #[default]
    White,
    /// Reached, references not yet scanned
    Gray,
    /// Reached and scanned
    Black,
}

impl Color {
    fn to_blob(self) -> Blob {
        let code: u64 = match self {
            Color::White => 0,
            Color::Gray => 1,
            Color::Black => 2,
        };
        Blob::from(&code.to_be_bytes()[..])
    }

    fn from_blob(blob: &Blob) -> Result<Self> {
        if blob.is_empty() {
            return Ok(Color::White);
        }
        let bytes: [u8; 8] = blob
            .as_bytes()
            .try_into()
            .map_err(|_| Error::Serialization(format!("bad color length {}", blob.len())))?;
        match u64::from_be_bytes(bytes) {
            0 => Ok(Color::White),
            1 => Ok(Color::Gray),
            2 => Ok(Color::Black),
            other => Err(Error::Serialization(format!("unknown color {}", other))),
        }
    }
}

impl fmt::Display for Color {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Color::White => write!(f, "white"),
            Color::Gray => write!(f, "gray"),
            Color::Black => write!(f, "black"),
        }
    }
}

/// The entity graph as seen by one transaction
#[derive(Debug, Clone)]
pub struct EntityGraph {
    entities: Arc<EntityStore>,
    bindings: Arc<BindingStore>,
}

impl EntityGraph {
    /// Create a graph over the given stores of the same transaction
    pub fn new(entities: Arc<EntityStore>, bindings: Arc<BindingStore>) -> Self {
        EntityGraph { entities, bindings }
    }

    /// Every node in id order, read lazily
    pub fn all_nodes(&self) -> Nodes<'_> {
        Nodes {
            entities: &self.entities,
            position: Position::Start,
        }
    }

    /// Every node with an id above `id`, read lazily
    pub fn nodes_after(&self, id: EntityId) -> Nodes<'_> {
        Nodes {
            entities: &self.entities,
            position: Position::After(id),
        }
    }

    /// Every bound node, in binding-name order
    ///
    /// A node bound under several names is yielded once per name.
    pub fn root_nodes(&self) -> Roots<'_> {
        Roots {
            bindings: &self.bindings,
            position: Position::Start,
        }
    }

    /// Nodes referenced by `id`; empty if `id` does not exist
    pub fn edges_of(&self, id: EntityId) -> Result<BTreeSet<EntityId>> {
        self.entities.referenced_ids(id)
    }

    /// Color of `id`; white if never colored
    pub fn get_color(&self, id: EntityId) -> Result<Color> {
        Color::from_blob(&self.entities.read_metadata(id, COLOR_METADATA)?)
    }

    /// Store the color of `id`
    pub fn set_color(&self, id: EntityId, color: Color) -> Result<()> {
        self.entities
            .update_metadata(id, COLOR_METADATA, color.to_blob())
    }

    /// Delete `id` together with its color
    pub fn remove_node(&self, id: EntityId) -> Result<()> {
        self.entities.delete(id)
    }

    /// True if `id` exists
    pub fn contains(&self, id: EntityId) -> Result<bool> {
        self.entities.exists(id)
    }
}

#[derive(Debug, Clone)]
enum Position<K> {
    Start,
    After(K),
    Done,
}

/// Lazy iterator over graph nodes
#[derive(Debug)]
pub struct Nodes<'a> {
    entities: &'a EntityStore,
    position: Position<EntityId>,
}

impl Iterator for Nodes<'_> {
    type Item = Result<EntityId>;

    fn next(&mut self) -> Option<Self::Item> {
        let next = match self.position {
            Position::Start => self.entities.first_key(),
            Position::After(id) => self.entities.next_key_after(id),
            Position::Done => return None,
        };
        match next {
            Ok(Some(id)) => {
                self.position = Position::After(id);
                Some(Ok(id))
            }
            Ok(None) => {
                self.position = Position::Done;
                None
            }
            Err(e) => {
                self.position = Position::Done;
                Some(Err(e))
            }
        }
    }
}

/// Lazy iterator over root nodes
#[derive(Debug)]
pub struct Roots<'a> {
    bindings: &'a BindingStore,
    position: Position<String>,
}

impl Roots<'_> {
    fn advance(&mut self) -> Result<Option<EntityId>> {
        loop {
            let name = match &self.position {
                Position::Start => self.bindings.first_key()?,
                Position::After(name) => self.bindings.next_key_after(name)?,
                Position::Done => return Ok(None),
            };
            let Some(name) = name else {
                self.position = Position::Done;
                return Ok(None);
            };
            let bound = self.bindings.read(&name)?;
            self.position = Position::After(name);
            if bound.is_some() {
                return Ok(bound);
            }
        }
    }
}

impl Iterator for Roots<'_> {
    type Item = Result<EntityId>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.advance() {
            Ok(next) => next.map(Ok),
            Err(e) => {
                self.position = Position::Done;
                Some(Err(e))
            }
        }
    }
}
