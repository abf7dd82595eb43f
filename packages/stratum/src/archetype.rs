//! Archetypes are the columnar storage for all entities sharing one exact
//! component composition.
//!
//! An archetype owns a stack of chunks and a packed per-chunk layout
//! computed once at construction: the entity id column first, then one
//! column per component type in ascending type-id order, each padded to
//! the 32-byte column alignment. All chunks of an archetype share the
//! identical layout, rows are kept densely packed by swap-removing with
//! the last row, and only the last chunk may be non-full.

use std::cell::Cell;
use std::collections::HashMap;
use std::ops::Range;

use crate::chunk::{ChunkAllocator, ChunkId, CHUNK_SIZE};
use crate::component::{Component, ComponentRegistry, ComponentTypeId, COMPONENT_ALIGNMENT};
use crate::composition::Composition;
use crate::entity::{EntityId, EntityTable};
use crate::error::EcsError;

const ENTITY_ID_SIZE: usize = std::mem::size_of::<EntityId>();

fn align_up(offset: usize, alignment: usize) -> usize {
    let misalignment = offset % alignment;
    if misalignment == 0 {
        offset
    } else {
        offset + alignment - misalignment
    }
}

/// Bookkeeping record for one chunk owned by an archetype.
#[derive(Clone, Copy, Debug)]
pub struct Chunk {
    id: ChunkId,
    len: usize,
}

impl Chunk {
    /// Return the arena slot this chunk lives in.
    pub fn id(&self) -> ChunkId {
        self.id
    }

    /// Return the number of occupied rows.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Returns true if no rows are occupied.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

// Direct-mapped cache line for type id -> column index lookups. A raw id of
// u16::MAX marks an empty slot (valid ids stop at 511).
type ColumnCacheEntry = (u16, u16);

/// Columnar storage for one exact component composition.
pub struct Archetype {
    composition: Composition,
    type_ids: Vec<ComponentTypeId>,
    sizes: Vec<usize>,
    offsets: Vec<usize>,
    row_capacity: usize,
    chunks: Vec<Chunk>,
    dense: HashMap<ChunkId, usize>,
    column_cache: Cell<[ColumnCacheEntry; 2]>,
    cache_toggle: Cell<bool>,
}

impl Archetype {
    /// Create an archetype for the given composition, allocating its first
    /// chunk.
    ///
    /// A zero-component composition yields the degenerate archetype: no
    /// chunks, and every row operation is a no-op.
    pub(crate) fn new(
        composition: Composition,
        registry: &ComponentRegistry,
        allocator: &mut ChunkAllocator,
    ) -> Result<Archetype, EcsError> {
        let type_ids = composition.type_ids();
        let sizes: Vec<usize> = type_ids.iter().map(|&id| registry.size_of(id)).collect();

        let (row_capacity, offsets) = if type_ids.is_empty() {
            (0, Vec::new())
        } else {
            compute_layout(&sizes)?
        };

        let mut archetype = Archetype {
            composition,
            type_ids,
            sizes,
            offsets,
            row_capacity,
            chunks: Vec::with_capacity(4),
            dense: HashMap::new(),
            column_cache: Cell::new([(u16::MAX, 0), (u16::MAX, 0)]),
            cache_toggle: Cell::new(false),
        };

        if !archetype.composition.is_empty() {
            let id = allocator.allocate()?;
            archetype.push_chunk(id);
        }

        Ok(archetype)
    }

    /// Return this archetype's exact composition.
    pub fn composition(&self) -> &Composition {
        &self.composition
    }

    /// Returns true if the composition contains the given component type.
    pub fn has_component(&self, type_id: ComponentTypeId) -> bool {
        self.composition.has(type_id)
    }

    /// Return the number of rows each chunk can hold.
    pub fn row_capacity(&self) -> usize {
        self.row_capacity
    }

    /// Return the chunk stack. Only the last chunk may be non-full.
    pub fn chunks(&self) -> &[Chunk] {
        &self.chunks
    }

    /// Return the number of live rows across all chunks.
    pub fn entity_count(&self) -> usize {
        self.chunks.iter().map(|chunk| chunk.len).sum()
    }

    fn push_chunk(&mut self, id: ChunkId) {
        self.dense.insert(id, self.chunks.len());
        self.chunks.push(Chunk { id, len: 0 });
    }

    /// Resolve a component type to its column index.
    ///
    /// Checks a 2-entry direct-mapped cache first and falls back to a
    /// linear scan of the type-id list.
    ///
    /// # Panics
    /// Panics if the composition does not contain `type_id`.
    pub(crate) fn column_index(&self, type_id: ComponentTypeId) -> usize {
        let cache = self.column_cache.get();
        if cache[0].0 == type_id.id() {
            return cache[0].1 as usize;
        }
        if cache[1].0 == type_id.id() {
            return cache[1].1 as usize;
        }

        for (index, &candidate) in self.type_ids.iter().enumerate() {
            if candidate == type_id {
                self.store_cache(type_id, index);
                return index;
            }
        }

        panic!("archetype has no column for component type {type_id:?}");
    }

    fn store_cache(&self, type_id: ComponentTypeId, index: usize) {
        let mut cache = self.column_cache.get();
        let slot = self.cache_toggle.get();
        cache[slot as usize] = (type_id.id(), index as u16);
        self.column_cache.set(cache);
        self.cache_toggle.set(!slot);
    }

    /// Byte range of the live prefix of the entity id column.
    pub(crate) fn ids_range(&self, len: usize) -> Range<usize> {
        0..len * ENTITY_ID_SIZE
    }

    /// Byte range of the live prefix of one component column.
    pub(crate) fn column_range(&self, column: usize, len: usize) -> Range<usize> {
        let start = self.offsets[column];
        start..start + len * self.sizes[column]
    }

    /// Byte range of a single component cell.
    fn cell_range(&self, column: usize, row: usize) -> Range<usize> {
        let start = self.offsets[column] + row * self.sizes[column];
        start..start + self.sizes[column]
    }

    /// Insert an entity with zeroed components into the last chunk,
    /// growing the chunk stack if it is full, and bind the entity's
    /// location to the new row.
    pub(crate) fn insert_default(
        &mut self,
        allocator: &mut ChunkAllocator,
        entities: &mut EntityTable,
        entity: EntityId,
    ) -> Result<(), EcsError> {
        if self.composition.is_empty() {
            return Ok(());
        }

        if self.chunks.last().map_or(true, |c| c.len == self.row_capacity) {
            let id = allocator.allocate()?;
            self.push_chunk(id);
        }

        let dense = self.chunks.len() - 1;
        let (chunk_id, row) = {
            let chunk = &self.chunks[dense];
            (chunk.id, chunk.len)
        };

        let bytes = allocator.bytes_mut(chunk_id);
        let ids: &mut [EntityId] =
            bytemuck::cast_slice_mut(&mut bytes[..ENTITY_ID_SIZE * self.row_capacity]);
        ids[row] = entity;
        for column in 0..self.type_ids.len() {
            let range = self.cell_range(column, row);
            bytes[range].fill(0);
        }

        entities.set_location(entity, chunk_id, row as u32);
        self.chunks[dense].len += 1;
        Ok(())
    }

    /// Overwrite one component of an entity stored in this archetype.
    ///
    /// Silent no-op on the degenerate archetype (matching the insert
    /// no-op); panics if a non-empty composition lacks `T`.
    pub(crate) fn set_component<T: Component>(
        &self,
        type_id: ComponentTypeId,
        allocator: &mut ChunkAllocator,
        entities: &EntityTable,
        entity: EntityId,
        value: T,
    ) {
        if self.composition.is_empty() {
            return;
        }

        let column = self.column_index(type_id);
        debug_assert_eq!(self.sizes[column], std::mem::size_of::<T>());

        let location = entities.location(entity);
        let bytes = allocator.bytes_mut(location.chunk);
        let range = self.cell_range(column, location.row as usize);
        bytes[range].copy_from_slice(bytemuck::bytes_of(&value));
    }

    /// Borrow one component of an entity stored in this archetype.
    ///
    /// # Panics
    /// Panics if the composition does not contain `T`.
    pub(crate) fn get_component<'a, T: Component>(
        &self,
        type_id: ComponentTypeId,
        allocator: &'a ChunkAllocator,
        entities: &EntityTable,
        entity: EntityId,
    ) -> &'a T {
        let column = self.column_index(type_id);
        let location = entities.location(entity);
        let bytes = allocator.bytes(location.chunk);
        bytemuck::from_bytes(&bytes[self.cell_range(column, location.row as usize)])
    }

    /// Mutably borrow one component of an entity stored in this archetype.
    ///
    /// # Panics
    /// Panics if the composition does not contain `T`.
    pub(crate) fn get_component_mut<'a, T: Component>(
        &self,
        type_id: ComponentTypeId,
        allocator: &'a mut ChunkAllocator,
        entities: &EntityTable,
        entity: EntityId,
    ) -> &'a mut T {
        let column = self.column_index(type_id);
        let location = entities.location(entity);
        let bytes = allocator.bytes_mut(location.chunk);
        bytemuck::from_bytes_mut(&mut bytes[self.cell_range(column, location.row as usize)])
    }

    /// Remove an entity's row via swap-remove with the last row of the
    /// last chunk, keeping all chunks except the last densely packed.
    pub(crate) fn destroy_entity(
        &mut self,
        allocator: &mut ChunkAllocator,
        entities: &mut EntityTable,
        entity: EntityId,
    ) {
        if self.composition.is_empty() {
            return;
        }

        let location = entities.location(entity);
        self.destroy_row(allocator, entities, location.chunk, location.row as usize);
    }

    fn destroy_row(
        &mut self,
        allocator: &mut ChunkAllocator,
        entities: &mut EntityTable,
        chunk_id: ChunkId,
        row: usize,
    ) {
        let dense = *self
            .dense
            .get(&chunk_id)
            .expect("destroyed row's chunk is not owned by this archetype");
        let last_dense = self.chunks.len() - 1;
        let last = self.chunks[last_dense];

        // Fast path: the row being removed is the last row of the last
        // chunk. Zero it in place.
        if dense == last_dense && row + 1 == self.chunks[dense].len {
            let bytes = allocator.bytes_mut(chunk_id);
            for column in 0..self.type_ids.len() {
                let range = self.cell_range(column, row);
                bytes[range].fill(0);
            }
            self.chunks[dense].len -= 1;
            self.release_empty_tail(allocator);
            return;
        }

        let last_row = last.len - 1;

        if chunk_id == last.id {
            // Vacated row and last row share a chunk.
            let bytes = allocator.bytes_mut(chunk_id);
            let ids: &mut [EntityId] =
                bytemuck::cast_slice_mut(&mut bytes[..ENTITY_ID_SIZE * self.row_capacity]);
            let moved = ids[last_row];
            ids[row] = moved;

            for column in 0..self.type_ids.len() {
                let src = self.cell_range(column, last_row);
                let dst = self.cell_range(column, row);
                bytes.copy_within(src.clone(), dst.start);
                bytes[src].fill(0);
            }

            entities.set_location(moved, chunk_id, row as u32);
        } else {
            let (dst_bytes, src_bytes) = allocator.bytes_pair_mut(chunk_id, last.id);

            let src_ids: &[EntityId] =
                bytemuck::cast_slice(&src_bytes[..ENTITY_ID_SIZE * self.row_capacity]);
            let moved = src_ids[last_row];
            let dst_ids: &mut [EntityId] =
                bytemuck::cast_slice_mut(&mut dst_bytes[..ENTITY_ID_SIZE * self.row_capacity]);
            dst_ids[row] = moved;

            for column in 0..self.type_ids.len() {
                let src = self.cell_range(column, last_row);
                let dst = self.cell_range(column, row);
                dst_bytes[dst].copy_from_slice(&src_bytes[src.clone()]);
                src_bytes[src].fill(0);
            }

            entities.set_location(moved, chunk_id, row as u32);
        }

        self.chunks[last_dense].len -= 1;
        self.release_empty_tail(allocator);
    }

    /// Free the last chunk if it became empty, unless it is the sole
    /// remaining chunk.
    fn release_empty_tail(&mut self, allocator: &mut ChunkAllocator) {
        let last = self.chunks.len() - 1;
        if self.chunks[last].len == 0 && self.chunks.len() > 1 {
            let id = self.chunks[last].id;
            self.dense.remove(&id);
            self.chunks.pop();
            allocator.free(id);
        }
    }

    /// Move an entity's row into `target`, copying every component present
    /// in both compositions and swap-removing the stale source row.
    ///
    /// Components only in the source are dropped; components only in the
    /// target keep their zeroed default bytes. The caller guarantees
    /// `target` is a different archetype.
    pub(crate) fn migrate_to(
        &mut self,
        target: &mut Archetype,
        allocator: &mut ChunkAllocator,
        entities: &mut EntityTable,
        entity: EntityId,
    ) -> Result<(), EcsError> {
        // Capture the source location before the insert rebinds it.
        let source = entities.location(entity);

        target.insert_default(allocator, entities, entity)?;

        if self.composition.is_empty() {
            return Ok(());
        }

        let destination = entities.location(entity);
        for (column, &type_id) in self.type_ids.iter().enumerate() {
            if !target.composition.has(type_id) {
                continue;
            }

            let target_column = target.column_index(type_id);
            let src_range = self.cell_range(column, source.row as usize);
            let dst_range = target.cell_range(target_column, destination.row as usize);

            // Source and target rows live in different archetypes, so
            // always in distinct chunks.
            let (src_bytes, dst_bytes) = allocator.bytes_pair_mut(source.chunk, destination.chunk);
            dst_bytes[dst_range].copy_from_slice(&src_bytes[src_range]);
        }

        self.destroy_row(allocator, entities, source.chunk, source.row as usize);

        if target.composition.is_empty() {
            entities.clear_location(entity);
        }

        Ok(())
    }
}

/// Compute the row capacity and per-column base offsets for a chunk.
///
/// Finds the largest row count such that the id column plus every
/// component column, each padded to the column alignment, fits the chunk.
fn compute_layout(sizes: &[usize]) -> Result<(usize, Vec<usize>), EcsError> {
    let row_bytes = ENTITY_ID_SIZE + sizes.iter().sum::<usize>();
    let mut capacity = CHUNK_SIZE / row_bytes;

    while capacity > 0 {
        let mut offsets = Vec::with_capacity(sizes.len());
        let mut offset = ENTITY_ID_SIZE * capacity;

        for &size in sizes {
            offset = align_up(offset, COMPONENT_ALIGNMENT);
            offsets.push(offset);
            offset += size * capacity;
        }

        if offset <= CHUNK_SIZE {
            return Ok((capacity, offsets));
        }

        capacity -= 1;
    }

    Err(EcsError::ArchetypeTooLarge {
        row_bytes,
        chunk_size: CHUNK_SIZE,
    })
}
