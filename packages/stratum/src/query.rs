//! Composition-driven queries over a world's archetypes.
//!
//! A [`Query`] is a pair of include/exclude bitsets. Executing it against
//! a world takes a versioned snapshot of the matching archetypes
//! ([`QueryResult`]); the snapshot then hands out per-entity component
//! tuples, either shared or mutable. Any structural mutation after the
//! snapshot invalidates it, and iterating a stale snapshot panics rather
//! than yielding rows from a reshaped world.

use std::collections::{HashMap, VecDeque};
use std::marker::PhantomData;

use crate::component::{Component, ComponentRegistry, ComponentTypeId};
use crate::composition::Composition;
use crate::entity::EntityId;
use crate::world::{ArchetypeHandle, World};

/// A reusable archetype filter: compositions match when they contain the
/// whole include set and none of the exclude set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Query {
    include: Composition,
    exclude: Composition,
}

impl Query {
    /// Start building a query against a world's registry.
    pub fn create(world: &World) -> QueryBuilder<'_> {
        QueryBuilder {
            world,
            include: Composition::new(),
            exclude: Composition::new(),
        }
    }

    /// The component types a matching composition must contain.
    pub fn include(&self) -> &Composition {
        &self.include
    }

    /// The component types a matching composition must not contain.
    pub fn exclude(&self) -> &Composition {
        &self.exclude
    }

    /// Returns true if the composition satisfies this query.
    pub fn matches(&self, composition: &Composition) -> bool {
        composition.includes(&self.include) && composition.excludes(&self.exclude)
    }

    /// Snapshot the matching archetypes, resolving the column of each
    /// tuple component up front.
    ///
    /// # Panics
    /// Panics if a component in `S` is not registered, not part of this
    /// query's include set, or named twice in the tuple.
    pub fn execute<S: ComponentTuple>(&self, world: &World) -> QueryResult<S> {
        let registry = world.registry();
        let wanted = S::type_ids(registry);
        for (index, &type_id) in wanted.iter().enumerate() {
            if !self.include.has(type_id) {
                panic!(
                    "component {} is read by the query but missing from its include set",
                    registry.name_of(type_id)
                );
            }
            if wanted[..index].contains(&type_id) {
                panic!(
                    "component {} appears more than once in the query tuple",
                    registry.name_of(type_id)
                );
            }
        }

        let mut matches = Vec::new();
        let mut entity_count = 0;
        for (index, archetype) in world.archetypes().iter().enumerate() {
            if !self.matches(archetype.composition()) {
                continue;
            }

            entity_count += archetype.entity_count();
            matches.push(MatchedArchetype {
                handle: ArchetypeHandle::from_index(index),
                columns: wanted
                    .iter()
                    .map(|&type_id| archetype.column_index(type_id))
                    .collect(),
            });
        }

        QueryResult {
            matches,
            version: world.version(),
            entity_count,
            _tuple: PhantomData,
        }
    }
}

/// Borrowing builder for [`Query`]. Component types are resolved through
/// the world's registry as they are named.
pub struct QueryBuilder<'a> {
    world: &'a World,
    include: Composition,
    exclude: Composition,
}

impl QueryBuilder<'_> {
    /// Require matching compositions to contain `T`.
    ///
    /// # Panics
    /// Panics if `T` is not registered.
    pub fn include<T: Component>(mut self) -> Self {
        self.include.add(self.world.registry().id_of::<T>());
        self
    }

    /// Require matching compositions to not contain `T`.
    ///
    /// # Panics
    /// Panics if `T` is not registered.
    pub fn exclude<T: Component>(mut self) -> Self {
        self.exclude.add(self.world.registry().id_of::<T>());
        self
    }

    pub fn build(self) -> Query {
        Query {
            include: self.include,
            exclude: self.exclude,
        }
    }
}

struct MatchedArchetype {
    handle: ArchetypeHandle,
    columns: Vec<usize>,
}

/// A versioned snapshot of the archetypes matching a query.
///
/// The snapshot holds no borrow on the world; it records the world
/// version at execution time and refuses to iterate once the version
/// moves on.
pub struct QueryResult<S: ComponentTuple> {
    matches: Vec<MatchedArchetype>,
    version: u64,
    entity_count: usize,
    _tuple: PhantomData<fn() -> S>,
}

impl<S: ComponentTuple> QueryResult<S> {
    /// Return the number of entities matched at snapshot time.
    pub fn entity_count(&self) -> usize {
        self.entity_count
    }

    pub fn is_empty(&self) -> bool {
        self.entity_count == 0
    }

    /// The world version this snapshot was taken at.
    pub fn version(&self) -> u64 {
        self.version
    }

    fn check_version(&self, world: &World) {
        if world.version() != self.version {
            panic!(
                "query snapshot is stale: taken at world version {} but the world is now at {}",
                self.version,
                world.version()
            );
        }
    }

    /// Iterate the matched entities with shared access to their
    /// components.
    ///
    /// # Panics
    /// Panics if the world has seen a structural mutation since the
    /// snapshot was taken.
    pub fn iter<'w>(&self, world: &'w World) -> QueryIter<'w, S> {
        self.check_version(world);

        let allocator = world.chunk_allocator();
        let mut runs = VecDeque::new();
        for matched in &self.matches {
            let archetype = world.archetype(matched.handle);
            for chunk in archetype.chunks() {
                if chunk.is_empty() {
                    continue;
                }

                let bytes = allocator.bytes(chunk.id());
                let ids = bytemuck::cast_slice(&bytes[archetype.ids_range(chunk.len())]);
                let columns = matched
                    .columns
                    .iter()
                    .map(|&column| &bytes[archetype.column_range(column, chunk.len())])
                    .collect();
                runs.push_back(SharedRun {
                    ids,
                    columns: S::cast_columns(columns),
                });
            }
        }

        QueryIter {
            runs,
            remaining: self.entity_count,
        }
    }

    /// Iterate the matched entities with mutable access to their
    /// components.
    ///
    /// # Panics
    /// Panics if the world has seen a structural mutation since the
    /// snapshot was taken.
    pub fn iter_mut<'w>(&self, world: &'w mut World) -> QueryIterMut<'w, S> {
        self.check_version(world);

        let (archetypes, allocator) = world.storage_mut();
        let mut blocks: HashMap<u32, &'w mut [u8]> = allocator
            .slots_mut()
            .map(|(id, bytes)| (id.id(), bytes))
            .collect();

        let mut runs = VecDeque::new();
        for matched in &self.matches {
            let archetype = &archetypes[matched.handle.index()];
            for chunk in archetype.chunks() {
                if chunk.is_empty() {
                    continue;
                }

                let bytes = blocks
                    .remove(&chunk.id().id())
                    .expect("every chunk of a matched archetype is resident in the arena");

                // Carve the id column and the requested component columns
                // out of the chunk in offset order. Column ranges never
                // overlap, so sequential split_at_mut covers them all.
                let mut cuts: Vec<(std::ops::Range<usize>, usize)> =
                    vec![(archetype.ids_range(chunk.len()), 0)];
                for (slot, &column) in matched.columns.iter().enumerate() {
                    cuts.push((archetype.column_range(column, chunk.len()), slot + 1));
                }
                cuts.sort_by_key(|(range, _)| range.start);

                let mut pieces: Vec<Option<&'w mut [u8]>> =
                    (0..matched.columns.len() + 1).map(|_| None).collect();
                let mut rest = bytes;
                let mut consumed = 0;
                for (range, slot) in cuts {
                    let tail = std::mem::take(&mut rest);
                    let (_, tail) = tail.split_at_mut(range.start - consumed);
                    let (piece, tail) = tail.split_at_mut(range.end - range.start);
                    pieces[slot] = Some(piece);
                    rest = tail;
                    consumed = range.end;
                }

                let ids: &'w [EntityId] = bytemuck::cast_slice(
                    pieces[0].take().expect("id column was carved"),
                );
                let columns = pieces[1..]
                    .iter_mut()
                    .map(|piece| piece.take().expect("component column was carved"))
                    .collect();
                runs.push_back(MutRun {
                    ids,
                    columns: S::cast_columns_mut(columns),
                });
            }
        }

        QueryIterMut {
            runs,
            remaining: self.entity_count,
        }
    }
}

struct SharedRun<'w, S: ComponentTuple> {
    ids: &'w [EntityId],
    columns: S::Slices<'w>,
}

/// Shared iterator over a query snapshot, yielding each entity's id and
/// component references.
pub struct QueryIter<'w, S: ComponentTuple> {
    runs: VecDeque<SharedRun<'w, S>>,
    remaining: usize,
}

impl<'w, S: ComponentTuple> Iterator for QueryIter<'w, S> {
    type Item = (EntityId, S::Item<'w>);

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let run = self.runs.front_mut()?;
            match run.ids.split_first() {
                Some((&id, rest)) => {
                    run.ids = rest;
                    let item = S::split_first(&mut run.columns)
                        .expect("component columns are as long as the id column");
                    self.remaining -= 1;
                    return Some((id, item));
                }
                None => {
                    self.runs.pop_front();
                }
            }
        }
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.remaining, Some(self.remaining))
    }
}

impl<S: ComponentTuple> ExactSizeIterator for QueryIter<'_, S> {}

struct MutRun<'w, S: ComponentTuple> {
    ids: &'w [EntityId],
    columns: S::SlicesMut<'w>,
}

/// Mutable iterator over a query snapshot.
pub struct QueryIterMut<'w, S: ComponentTuple> {
    runs: VecDeque<MutRun<'w, S>>,
    remaining: usize,
}

impl<'w, S: ComponentTuple> Iterator for QueryIterMut<'w, S> {
    type Item = (EntityId, S::ItemMut<'w>);

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let run = self.runs.front_mut()?;
            match run.ids.split_first() {
                Some((&id, rest)) => {
                    run.ids = rest;
                    let item = S::split_first_mut(&mut run.columns)
                        .expect("component columns are as long as the id column");
                    self.remaining -= 1;
                    return Some((id, item));
                }
                None => {
                    self.runs.pop_front();
                }
            }
        }
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.remaining, Some(self.remaining))
    }
}

impl<S: ComponentTuple> ExactSizeIterator for QueryIterMut<'_, S> {}

/// A tuple of component types readable from a query snapshot.
///
/// Implemented for tuples of one to eight [`Component`] types. The
/// associated types carry the column slices and per-row items for both
/// shared and mutable iteration.
pub trait ComponentTuple: 'static {
    type Slices<'a>;
    type SlicesMut<'a>;
    type Item<'a>;
    type ItemMut<'a>;

    /// Resolve the tuple's component types against a registry, in tuple
    /// order.
    fn type_ids(registry: &ComponentRegistry) -> Vec<ComponentTypeId>;

    /// Reinterpret one byte column per tuple element, in tuple order.
    fn cast_columns<'a>(columns: Vec<&'a [u8]>) -> Self::Slices<'a>;

    /// Mutable counterpart of [`ComponentTuple::cast_columns`].
    fn cast_columns_mut<'a>(columns: Vec<&'a mut [u8]>) -> Self::SlicesMut<'a>;

    /// Pop the front row off every column, or `None` once exhausted.
    fn split_first<'a>(slices: &mut Self::Slices<'a>) -> Option<Self::Item<'a>>;

    /// Mutable counterpart of [`ComponentTuple::split_first`].
    fn split_first_mut<'a>(slices: &mut Self::SlicesMut<'a>) -> Option<Self::ItemMut<'a>>;
}

macro_rules! component_tuple_impl {
    ($($name:ident),+) => {
        impl<$($name: Component),+> ComponentTuple for ($($name,)+) {
            type Slices<'a> = ($(&'a [$name],)+);
            type SlicesMut<'a> = ($(&'a mut [$name],)+);
            type Item<'a> = ($(&'a $name,)+);
            type ItemMut<'a> = ($(&'a mut $name,)+);

            fn type_ids(registry: &ComponentRegistry) -> Vec<ComponentTypeId> {
                vec![$(registry.id_of::<$name>(),)+]
            }

            #[allow(non_snake_case)]
            fn cast_columns<'a>(columns: Vec<&'a [u8]>) -> Self::Slices<'a> {
                let mut columns = columns.into_iter();
                $(let $name: &'a [$name] =
                    bytemuck::cast_slice(columns.next().expect("one column per tuple element"));)+
                debug_assert!(columns.next().is_none());
                ($($name,)+)
            }

            #[allow(non_snake_case)]
            fn cast_columns_mut<'a>(columns: Vec<&'a mut [u8]>) -> Self::SlicesMut<'a> {
                let mut columns = columns.into_iter();
                $(let $name: &'a mut [$name] =
                    bytemuck::cast_slice_mut(columns.next().expect("one column per tuple element"));)+
                debug_assert!(columns.next().is_none());
                ($($name,)+)
            }

            #[allow(non_snake_case)]
            fn split_first<'a>(slices: &mut Self::Slices<'a>) -> Option<Self::Item<'a>> {
                let ($($name,)+) = slices;
                $(
                    let current: &'a [$name] = *$name;
                    let (head, tail) = current.split_first()?;
                    *$name = tail;
                    let $name = head;
                )+
                Some(($($name,)+))
            }

            #[allow(non_snake_case)]
            fn split_first_mut<'a>(slices: &mut Self::SlicesMut<'a>) -> Option<Self::ItemMut<'a>> {
                let ($($name,)+) = slices;
                $(
                    let current: &'a mut [$name] = std::mem::take($name);
                    let (head, tail) = current.split_first_mut()?;
                    *$name = tail;
                    let $name = head;
                )+
                Some(($($name,)+))
            }
        }
    };
}

component_tuple_impl!(A);
component_tuple_impl!(A, B);
component_tuple_impl!(A, B, C);
component_tuple_impl!(A, B, C, D);
component_tuple_impl!(A, B, C, D, E);
component_tuple_impl!(A, B, C, D, E, F);
component_tuple_impl!(A, B, C, D, E, F, G);
component_tuple_impl!(A, B, C, D, E, F, G, H);

#[cfg(test)]
mod test {
    use bytemuck::{Pod, Zeroable};

    use super::*;

    #[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
    #[repr(C)]
    struct Position {
        x: f32,
        y: f32,
    }
    impl Component for Position {}

    #[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
    #[repr(C)]
    struct Velocity {
        x: f32,
        y: f32,
    }
    impl Component for Velocity {}

    #[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
    #[repr(C)]
    struct Frozen(u32);
    impl Component for Frozen {}

    fn world() -> World {
        let mut world = World::new().unwrap();
        world.register_component::<Position>().unwrap();
        world.register_component::<Velocity>().unwrap();
        world.register_component::<Frozen>().unwrap();
        world
    }

    #[test]
    fn matching_follows_include_and_exclude() {
        let world = world();
        let position = world.registry().id_of::<Position>();
        let velocity = world.registry().id_of::<Velocity>();
        let frozen = world.registry().id_of::<Frozen>();

        let query = Query::create(&world)
            .include::<Position>()
            .exclude::<Frozen>()
            .build();

        assert!(query.matches(&Composition::from_type_ids(&[position])));
        assert!(query.matches(&Composition::from_type_ids(&[position, velocity])));
        assert!(!query.matches(&Composition::from_type_ids(&[velocity])));
        assert!(!query.matches(&Composition::from_type_ids(&[position, frozen])));
    }

    #[test]
    fn iteration_spans_every_matching_archetype() {
        let mut world = world();
        let position = world.registry().id_of::<Position>();
        let velocity = world.registry().id_of::<Velocity>();
        let frozen = world.registry().id_of::<Frozen>();

        let plain = world.create_entity(&[position]).unwrap();
        let moving = world.create_entity(&[position, velocity]).unwrap();
        let excluded = world.create_entity(&[position, frozen]).unwrap();

        world.set_component(plain, Position { x: 1.0, y: 0.0 });
        world.set_component(moving, Position { x: 2.0, y: 0.0 });
        world.set_component(excluded, Position { x: 4.0, y: 0.0 });

        let query = Query::create(&world)
            .include::<Position>()
            .exclude::<Frozen>()
            .build();
        let result = query.execute::<(Position,)>(&world);
        assert_eq!(result.entity_count(), 2);

        let mut seen = Vec::new();
        let mut total = 0.0;
        for (entity, (position,)) in result.iter(&world) {
            seen.push(entity);
            total += position.x;
        }
        seen.sort();
        let mut expected = vec![plain, moving];
        expected.sort();
        assert_eq!(seen, expected);
        assert_eq!(total, 3.0);
    }

    #[test]
    fn mutable_iteration_writes_through_to_storage() {
        let mut world = world();
        let position = world.registry().id_of::<Position>();
        let velocity = world.registry().id_of::<Velocity>();

        let entities: Vec<EntityId> = (0..4)
            .map(|index| {
                let entity = world.create_entity(&[position, velocity]).unwrap();
                world.set_component(entity, Velocity { x: index as f32, y: 0.0 });
                entity
            })
            .collect();

        let query = Query::create(&world)
            .include::<Position>()
            .include::<Velocity>()
            .build();
        let result = query.execute::<(Position, Velocity)>(&world);

        for (_, (position, velocity)) in result.iter_mut(&mut world) {
            position.x += velocity.x;
        }

        for (index, &entity) in entities.iter().enumerate() {
            assert_eq!(world.get_component::<Position>(entity).x, index as f32);
        }
    }

    #[test]
    fn snapshots_can_be_iterated_twice_without_mutation() {
        let mut world = world();
        let position = world.registry().id_of::<Position>();
        world.create_entity(&[position]).unwrap();

        let query = Query::create(&world).include::<Position>().build();
        let result = query.execute::<(Position,)>(&world);

        assert_eq!(result.iter(&world).count(), 1);
        assert_eq!(result.iter(&world).count(), 1);
    }

    #[test]
    #[should_panic(expected = "stale")]
    fn structural_mutation_invalidates_the_snapshot() {
        let mut world = world();
        let position = world.registry().id_of::<Position>();
        world.create_entity(&[position]).unwrap();

        let query = Query::create(&world).include::<Position>().build();
        let result = query.execute::<(Position,)>(&world);

        world.create_entity(&[position]).unwrap();
        let _ = result.iter(&world);
    }

    #[test]
    fn plain_component_writes_do_not_invalidate_the_snapshot() {
        let mut world = world();
        let position = world.registry().id_of::<Position>();
        let entity = world.create_entity(&[position]).unwrap();

        let query = Query::create(&world).include::<Position>().build();
        let result = query.execute::<(Position,)>(&world);

        world.set_component(entity, Position { x: 9.0, y: 9.0 });
        let rows: Vec<f32> = result.iter(&world).map(|(_, (p,))| p.x).collect();
        assert_eq!(rows, vec![9.0]);
    }

    #[test]
    #[should_panic(expected = "missing from its include set")]
    fn reading_a_component_outside_the_include_set_panics() {
        let world = world();
        let query = Query::create(&world).include::<Position>().build();
        let _ = query.execute::<(Velocity,)>(&world);
    }

    #[test]
    #[should_panic(expected = "more than once in the query tuple")]
    fn repeating_a_component_in_the_tuple_panics() {
        let mut world = world();
        let position = world.registry().id_of::<Position>();
        world.create_entity(&[position]).unwrap();

        let query = Query::create(&world).include::<Position>().build();
        let _ = query.execute::<(Position, Position)>(&world);
    }

    #[test]
    fn multi_chunk_archetypes_are_fully_visited() {
        let mut world = world();
        let position = world.registry().id_of::<Position>();

        let handle = world.get_or_create_archetype(&[position]).unwrap();
        let per_chunk = world.archetype(handle).row_capacity();
        let total = per_chunk * 2 + 11;
        for _ in 0..total {
            world.create_entity_in(handle).unwrap();
        }

        let query = Query::create(&world).include::<Position>().build();
        let result = query.execute::<(Position,)>(&world);
        assert_eq!(result.entity_count(), total);
        assert_eq!(result.iter(&world).count(), total);

        let mut touched = 0;
        for (_, (position,)) in result.iter_mut(&mut world) {
            position.x = 1.0;
            touched += 1;
        }
        assert_eq!(touched, total);
    }
}
