//! The world ties the registry, the entity table, the chunk arena and the
//! archetype set together behind one owner.
//!
//! Structural mutations (entity creation, component add/remove, entity
//! destruction) bump a world version counter that query snapshots record;
//! plain component writes do not. Destruction is deferred by default:
//! entities are marked and reclaimed in one batch by
//! [`World::destroy_marked_entities`].

use std::collections::{HashMap, HashSet};

use crate::archetype::Archetype;
use crate::chunk::{ChunkAllocator, CHUNK_SIZE};
use crate::component::{Component, ComponentRegistry, ComponentTypeId};
use crate::composition::Composition;
use crate::entity::{EntityId, EntityTable, DEFAULT_ENTITY_CAPACITY};
use crate::error::EcsError;

/// Stable index of an archetype within a world.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ArchetypeHandle(u32);

impl ArchetypeHandle {
    pub(crate) fn from_index(index: usize) -> ArchetypeHandle {
        ArchetypeHandle(index as u32)
    }

    pub(crate) fn index(&self) -> usize {
        self.0 as usize
    }
}

/// Construction limits for a [`World`].
#[derive(Debug, Clone)]
pub struct WorldConfig {
    /// Total size of the chunk arena in bytes. Must be a non-zero
    /// multiple of [`CHUNK_SIZE`].
    pub chunk_arena_bytes: usize,
    /// Maximum number of live entities.
    pub max_entities: usize,
}

impl Default for WorldConfig {
    fn default() -> WorldConfig {
        WorldConfig {
            chunk_arena_bytes: CHUNK_SIZE * 1024,
            max_entities: DEFAULT_ENTITY_CAPACITY,
        }
    }
}

/// Owner of all entity, component and archetype state.
pub struct World {
    registry: ComponentRegistry,
    entities: EntityTable,
    chunks: ChunkAllocator,
    archetypes: Vec<Archetype>,
    by_composition: HashMap<Composition, ArchetypeHandle>,
    entity_archetype: HashMap<EntityId, ArchetypeHandle>,
    destruction_queue: HashSet<EntityId>,
    version: u64,
}

impl World {
    /// Create a world with the default arena and entity limits.
    pub fn new() -> Result<World, EcsError> {
        World::with_config(WorldConfig::default())
    }

    /// Create a world with explicit limits.
    pub fn with_config(config: WorldConfig) -> Result<World, EcsError> {
        Ok(World {
            registry: ComponentRegistry::new(),
            entities: EntityTable::new(config.max_entities),
            chunks: ChunkAllocator::new(config.chunk_arena_bytes)?,
            archetypes: Vec::new(),
            by_composition: HashMap::new(),
            entity_archetype: HashMap::new(),
            destruction_queue: HashSet::new(),
            version: 0,
        })
    }

    /// Register a component type with this world, returning its dense id.
    /// Registering the same type twice returns the same id.
    pub fn register_component<T: Component>(&mut self) -> Result<ComponentTypeId, EcsError> {
        self.registry.register::<T>()
    }

    /// Return the registry backing this world.
    pub fn registry(&self) -> &ComponentRegistry {
        &self.registry
    }

    /// Return the structural version, bumped on entity creation,
    /// component add/remove and destruction.
    pub fn version(&self) -> u64 {
        self.version
    }

    /// Return the number of live entities.
    pub fn entity_count(&self) -> usize {
        self.entities.len()
    }

    pub(crate) fn archetypes(&self) -> &[Archetype] {
        &self.archetypes
    }

    pub(crate) fn archetype(&self, handle: ArchetypeHandle) -> &Archetype {
        &self.archetypes[handle.index()]
    }

    pub(crate) fn chunk_allocator(&self) -> &ChunkAllocator {
        &self.chunks
    }

    /// Split borrow for query iteration: the archetype set alongside a
    /// mutable handle on the chunk arena.
    pub(crate) fn storage_mut(&mut self) -> (&[Archetype], &mut ChunkAllocator) {
        (&self.archetypes, &mut self.chunks)
    }

    /// Look up the archetype for an exact composition, creating it on
    /// first use. The type-id list may be in any order.
    pub fn get_or_create_archetype(
        &mut self,
        type_ids: &[ComponentTypeId],
    ) -> Result<ArchetypeHandle, EcsError> {
        let composition = Composition::from_type_ids(type_ids);
        self.archetype_for_composition(composition)
    }

    fn archetype_for_composition(
        &mut self,
        composition: Composition,
    ) -> Result<ArchetypeHandle, EcsError> {
        if let Some(&handle) = self.by_composition.get(&composition) {
            return Ok(handle);
        }

        let archetype = Archetype::new(composition, &self.registry, &mut self.chunks)?;
        let handle = ArchetypeHandle(self.archetypes.len() as u32);
        log::debug!(
            "created archetype {} with {} component types, {} rows per chunk",
            handle.0,
            composition.len(),
            archetype.row_capacity()
        );
        self.archetypes.push(archetype);
        self.by_composition.insert(composition, handle);
        Ok(handle)
    }

    /// Create an entity whose composition is exactly the given type ids,
    /// with all components zeroed.
    pub fn create_entity(&mut self, type_ids: &[ComponentTypeId]) -> Result<EntityId, EcsError> {
        let handle = self.get_or_create_archetype(type_ids)?;
        self.create_entity_in(handle)
    }

    /// Create a zero-initialised entity directly in an existing archetype.
    pub fn create_entity_in(&mut self, handle: ArchetypeHandle) -> Result<EntityId, EcsError> {
        let entity = self.entities.next_id()?;
        let archetype = &mut self.archetypes[handle.index()];

        if let Err(error) = archetype.insert_default(&mut self.chunks, &mut self.entities, entity) {
            self.entities.free_id(entity);
            return Err(error);
        }

        self.entity_archetype.insert(entity, handle);
        self.version += 1;
        Ok(entity)
    }

    /// Returns true if the entity is alive (including marked-but-not-yet
    /// destroyed entities).
    pub fn is_alive(&self, entity: EntityId) -> bool {
        self.entity_archetype.contains_key(&entity)
    }

    /// Return the archetype an entity currently lives in.
    ///
    /// # Panics
    /// Panics if the entity is not alive.
    pub fn entity_archetype(&self, entity: EntityId) -> ArchetypeHandle {
        match self.entity_archetype.get(&entity) {
            Some(&handle) => handle,
            None => panic!("entity {entity:?} is not alive in this world"),
        }
    }

    /// Overwrite one component of a live entity. Does not bump the world
    /// version.
    ///
    /// # Panics
    /// Panics if the entity is not alive, if `T` is not registered, or if
    /// the entity's archetype lacks `T`.
    pub fn set_component<T: Component>(&mut self, entity: EntityId, value: T) {
        let type_id = self.registry.id_of::<T>();
        let handle = self.entity_archetype(entity);
        self.archetypes[handle.index()].set_component(
            type_id,
            &mut self.chunks,
            &self.entities,
            entity,
            value,
        );
    }

    /// Borrow one component of a live entity.
    ///
    /// # Panics
    /// Panics if the entity is not alive, if `T` is not registered, or if
    /// the entity's archetype lacks `T`.
    pub fn get_component<T: Component>(&self, entity: EntityId) -> &T {
        let type_id = self.registry.id_of::<T>();
        let handle = self.entity_archetype(entity);
        self.archetypes[handle.index()].get_component(type_id, &self.chunks, &self.entities, entity)
    }

    /// Mutably borrow one component of a live entity. Does not bump the
    /// world version.
    ///
    /// # Panics
    /// Panics under the same conditions as [`World::get_component`].
    pub fn get_component_mut<T: Component>(&mut self, entity: EntityId) -> &mut T {
        let type_id = self.registry.id_of::<T>();
        let handle = self.entity_archetype(entity);
        self.archetypes[handle.index()].get_component_mut(
            type_id,
            &mut self.chunks,
            &self.entities,
            entity,
        )
    }

    /// Returns true if the entity's current composition contains `T`.
    ///
    /// # Panics
    /// Panics if the entity is not alive or `T` is not registered.
    pub fn has_component<T: Component>(&self, entity: EntityId) -> bool {
        let type_id = self.registry.id_of::<T>();
        let handle = self.entity_archetype(entity);
        self.archetypes[handle.index()].has_component(type_id)
    }

    /// Add component `T` (zero-initialised) to a live entity, migrating
    /// it to the archetype with the extended composition.
    ///
    /// # Panics
    /// Panics if the entity is not alive, if `T` is not registered, or if
    /// the entity already has `T`.
    pub fn add_component<T: Component>(&mut self, entity: EntityId) -> Result<(), EcsError> {
        let type_id = self.registry.id_of::<T>();
        let handle = self.entity_archetype(entity);
        let composition = *self.archetypes[handle.index()].composition();
        if composition.has(type_id) {
            panic!(
                "entity {entity:?} already has component {}",
                self.registry.name_of(type_id)
            );
        }

        self.migrate(entity, handle, composition.with(type_id))
    }

    /// Remove component `T` from a live entity, migrating it to the
    /// archetype with the reduced composition. The component's value is
    /// dropped.
    ///
    /// # Panics
    /// Panics if the entity is not alive, if `T` is not registered, or if
    /// the entity does not have `T`.
    pub fn remove_component<T: Component>(&mut self, entity: EntityId) -> Result<(), EcsError> {
        let type_id = self.registry.id_of::<T>();
        let handle = self.entity_archetype(entity);
        let composition = *self.archetypes[handle.index()].composition();
        if !composition.has(type_id) {
            panic!(
                "entity {entity:?} does not have component {}",
                self.registry.name_of(type_id)
            );
        }

        self.migrate(entity, handle, composition.without(type_id))
    }

    fn migrate(
        &mut self,
        entity: EntityId,
        source: ArchetypeHandle,
        composition: Composition,
    ) -> Result<(), EcsError> {
        let target = self.archetype_for_composition(composition)?;
        debug_assert_ne!(source, target);

        let (source_archetype, target_archetype) =
            get_two_mut(&mut self.archetypes, source.index(), target.index());
        source_archetype.migrate_to(target_archetype, &mut self.chunks, &mut self.entities, entity)?;

        self.entity_archetype.insert(entity, target);
        self.version += 1;
        Ok(())
    }

    /// Queue an entity for destruction by the next call to
    /// [`World::destroy_marked_entities`]. Idempotent; does not bump the
    /// world version.
    ///
    /// # Panics
    /// Panics if the entity is not alive.
    pub fn mark_entity_for_destruction(&mut self, entity: EntityId) {
        if !self.is_alive(entity) {
            panic!("entity {entity:?} is not alive in this world");
        }
        self.destruction_queue.insert(entity);
    }

    /// Returns true if the entity is queued for deferred destruction.
    pub fn is_marked_for_destruction(&self, entity: EntityId) -> bool {
        self.destruction_queue.contains(&entity)
    }

    /// Destroy every queued entity and recycle their ids. Bumps the world
    /// version exactly once per call, even when the queue is empty.
    pub fn destroy_marked_entities(&mut self) {
        let queue = std::mem::take(&mut self.destruction_queue);
        if !queue.is_empty() {
            log::debug!("destroying {} marked entities", queue.len());
            for entity in queue {
                self.destroy_now(entity);
            }
        }
        self.version += 1;
    }

    /// Destroy one entity without waiting for the deferred pass. Also
    /// drops any pending destruction mark for it. Bumps the world version.
    ///
    /// # Panics
    /// Panics if the entity is not alive.
    pub fn destroy_entity_immediately(&mut self, entity: EntityId) {
        if !self.is_alive(entity) {
            panic!("entity {entity:?} is not alive in this world");
        }
        self.destruction_queue.remove(&entity);
        self.destroy_now(entity);
        self.version += 1;
    }

    fn destroy_now(&mut self, entity: EntityId) {
        let handle = self
            .entity_archetype
            .remove(&entity)
            .expect("queued entity is alive");
        self.archetypes[handle.index()].destroy_entity(&mut self.chunks, &mut self.entities, entity);
        self.entities.free_id(entity);
    }
}

fn get_two_mut<T>(items: &mut [T], first: usize, second: usize) -> (&mut T, &mut T) {
    assert_ne!(first, second);
    if first < second {
        let (head, tail) = items.split_at_mut(second);
        (&mut head[first], &mut tail[0])
    } else {
        let (head, tail) = items.split_at_mut(first);
        (&mut tail[0], &mut head[second])
    }
}
