//! Entities, bindings and the per-transaction entity manager

mod bindings;
mod id_factory;
mod manager;
mod store;

pub use bindings::{BindingStore, BINDINGS_TABLE};
pub use id_factory::EntityIdFactory;
pub use manager::EntityManager;
pub use store::{EntityStore, ENTITIES_TABLE, ENTITY_METADATA_TABLE};
