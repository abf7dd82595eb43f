//! An archetype-based entity component system.
//!
//! Entities are plain ids; their components live in fixed-size columnar
//! chunks owned by archetypes, one archetype per exact component
//! composition. Queries filter archetypes by composition bitsets and
//! iterate their chunks directly.

pub use archetype::{Archetype, Chunk};
pub use chunk::{ChunkAllocator, ChunkId, CHUNK_SIZE, MAX_CHUNK_COUNT};
pub use component::{
    Component,
    ComponentRegistry,
    ComponentTypeId,
    COMPONENT_ALIGNMENT,
    MAX_COMPONENT_TYPES,
};
pub use composition::Composition;
pub use entity::{EntityId, DEFAULT_ENTITY_CAPACITY};
pub use error::EcsError;
pub use query::{ComponentTuple, Query, QueryBuilder, QueryIter, QueryIterMut, QueryResult};
pub use world::{ArchetypeHandle, World, WorldConfig};

pub mod component;
pub mod composition;
mod entity;
pub mod archetype;

pub mod chunk;

pub mod error;

pub mod world;
pub mod query;
