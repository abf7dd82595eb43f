//! Entity identity and the entity location table.
//!
//! An entity is nothing but a 32-bit handle. The table maps every live
//! entity id to its current (chunk, row) storage location and recycles
//! freed ids through a free-id stack.

use std::fmt::{self, Debug, Formatter};

use bytemuck::{Pod, Zeroable};

use crate::chunk::ChunkId;
use crate::error::EcsError;

/// The default ceiling on simultaneously live entities.
pub const DEFAULT_ENTITY_CAPACITY: usize = 1_000_000;

/// An opaque entity handle.
///
/// `EntityId` is `Pod` because it is the element type of every chunk's id
/// column.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Pod, Zeroable)]
#[repr(transparent)]
pub struct EntityId(u32);

impl EntityId {
    pub(crate) fn new(inner: u32) -> EntityId {
        EntityId(inner)
    }

    /// Return the inner id value.
    pub fn id(&self) -> u32 {
        self.0
    }

    pub(crate) fn index(&self) -> usize {
        self.0 as usize
    }
}

impl Debug for EntityId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "EntityId({})", self.0)
    }
}

/// The storage location of a live entity.
///
/// Freshly allocated ids carry the sentinel location until their first
/// insertion into an archetype.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct EntityLocation {
    pub chunk: ChunkId,
    pub row: u32,
}

impl EntityLocation {
    /// The location of an entity not currently stored in any chunk.
    pub const SENTINEL: EntityLocation = EntityLocation {
        chunk: ChunkId::INVALID,
        row: u32::MAX,
    };

    /// Returns true if this is the not-stored sentinel.
    pub fn is_sentinel(&self) -> bool {
        self.chunk == ChunkId::INVALID
    }
}

/// Dense entity id → location table with id recycling.
pub struct EntityTable {
    locations: Vec<EntityLocation>,
    free_ids: Vec<EntityId>,
    next_id: u32,
    live: usize,
    capacity: usize,
}

impl EntityTable {
    /// Create a table that can hold up to `capacity` live entities.
    pub fn new(capacity: usize) -> EntityTable {
        EntityTable {
            locations: Vec::new(),
            free_ids: Vec::with_capacity(64),
            next_id: 0,
            live: 0,
            capacity,
        }
    }

    /// Allocate an entity id, reusing a freed id when one is available.
    ///
    /// The returned id has the sentinel location until it is inserted into
    /// an archetype.
    pub fn next_id(&mut self) -> Result<EntityId, EcsError> {
        let id = match self.free_ids.pop() {
            Some(id) => id,
            None => {
                if self.live == self.capacity {
                    return Err(EcsError::EntityCapacity {
                        capacity: self.capacity,
                    });
                }
                let id = EntityId(self.next_id);
                self.next_id += 1;
                id
            }
        };

        if self.locations.len() <= id.index() {
            self.locations
                .resize(id.index() + 1, EntityLocation::SENTINEL);
        }
        self.locations[id.index()] = EntityLocation::SENTINEL;
        self.live += 1;
        Ok(id)
    }

    /// Release an entity id.
    ///
    /// The most recently allocated, never-reused id shrinks the id counter
    /// instead of going on the free stack, so tight allocate/free loops do
    /// not grow the stack.
    pub fn free_id(&mut self, id: EntityId) {
        self.locations[id.index()] = EntityLocation::SENTINEL;

        if id.0 + 1 == self.next_id {
            self.next_id -= 1;
        } else {
            self.free_ids.push(id);
        }

        self.live -= 1;
    }

    /// Return the current storage location of an entity.
    ///
    /// # Panics
    /// Panics if `id` was never allocated.
    pub fn location(&self, id: EntityId) -> EntityLocation {
        self.locations[id.index()]
    }

    /// Bind an entity to a (chunk, row) location.
    pub fn set_location(&mut self, id: EntityId, chunk: ChunkId, row: u32) {
        self.locations[id.index()] = EntityLocation { chunk, row };
    }

    /// Reset an entity's location to the sentinel.
    pub fn clear_location(&mut self, id: EntityId) {
        self.locations[id.index()] = EntityLocation::SENTINEL;
    }

    /// Return the number of live entities.
    pub fn len(&self) -> usize {
        self.live
    }

    /// Returns true if no entities are live.
    pub fn is_empty(&self) -> bool {
        self.live == 0
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn ids_are_monotonic_until_freed() {
        let mut table = EntityTable::new(16);
        let a = table.next_id().unwrap();
        let b = table.next_id().unwrap();

        assert_eq!(a.id(), 0);
        assert_eq!(b.id(), 1);
        assert_eq!(table.len(), 2);
    }

    #[test]
    fn freeing_the_newest_id_shrinks_the_counter() {
        let mut table = EntityTable::new(16);
        let _a = table.next_id().unwrap();
        let b = table.next_id().unwrap();

        table.free_id(b);
        let reissued = table.next_id().unwrap();

        // The shrink path hands the same id straight back.
        assert_eq!(reissued, b);
        assert!(table.free_ids.is_empty());
    }

    #[test]
    fn freeing_an_older_id_recycles_through_the_stack() {
        let mut table = EntityTable::new(16);
        let a = table.next_id().unwrap();
        let _b = table.next_id().unwrap();

        table.free_id(a);
        let reissued = table.next_id().unwrap();

        assert_eq!(reissued, a);
        assert_eq!(table.len(), 2);
    }

    #[test]
    fn never_double_issues_a_live_id() {
        let mut table = EntityTable::new(64);
        let mut live = std::collections::HashSet::new();

        for step in 0..200 {
            let id = table.next_id().unwrap();
            assert!(live.insert(id), "id {id:?} issued twice");

            if step % 3 == 0 {
                table.free_id(id);
                live.remove(&id);
            }
        }
    }

    #[test]
    fn capacity_exhaustion_is_an_error() {
        let mut table = EntityTable::new(2);
        table.next_id().unwrap();
        table.next_id().unwrap();

        assert!(matches!(
            table.next_id(),
            Err(EcsError::EntityCapacity { capacity: 2 })
        ));

        // Freeing makes room again.
        table.free_id(EntityId::new(1));
        assert!(table.next_id().is_ok());
    }

    #[test]
    fn fresh_ids_carry_the_sentinel_location() {
        let mut table = EntityTable::new(4);
        let id = table.next_id().unwrap();

        assert!(table.location(id).is_sentinel());

        table.set_location(id, ChunkId::new(3), 7);
        assert_eq!(table.location(id).row, 7);

        table.free_id(id);
        let reused = table.next_id().unwrap();
        assert_eq!(reused, id);
        assert!(table.location(reused).is_sentinel());
    }
}
