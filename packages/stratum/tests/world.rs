use bytemuck::{Pod, Zeroable};
use stratum::{Component, EntityId, Query, World, WorldConfig};

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
struct Marker(u32);

impl Component for Marker {}

fn world() -> World {
    let mut world = World::with_config(WorldConfig {
        chunk_arena_bytes: 16 * 1024 * 1024,
        max_entities: 1_000_000,
    })
    .unwrap();
    world.register_component::<Position>().unwrap();
    world.register_component::<Velocity>().unwrap();
    world.register_component::<Marker>().unwrap();
    world
}

#[test]
fn two_hundred_thousand_entities_survive_a_simulation_step() {
    let mut world = world();
    let position = world.registry().id_of::<Position>();
    let velocity = world.registry().id_of::<Velocity>();

    let archetype = world.get_or_create_archetype(&[position, velocity]).unwrap();

    const COUNT: usize = 200_000;
    let mut spawned = Vec::with_capacity(COUNT);
    for index in 0..COUNT {
        let entity = world.create_entity_in(archetype).unwrap();
        // Identity-mapped payloads so any row mixup is visible later.
        world.set_component(entity, Position { x: index as f32, y: 0.0 });
        world.set_component(entity, Velocity { x: 1.0, y: 0.0 });
        spawned.push(entity);
    }
    assert_eq!(world.entity_count(), COUNT);

    // One integration step over every entity.
    let query = Query::create(&world)
        .include::<Position>()
        .include::<Velocity>()
        .build();
    let step = query.execute::<(Position, Velocity)>(&world);
    assert_eq!(step.entity_count(), COUNT);
    for (_, (position, velocity)) in step.iter_mut(&mut world) {
        position.x += velocity.x;
    }

    for (index, &entity) in spawned.iter().enumerate() {
        assert_eq!(world.get_component::<Position>(entity).x, index as f32 + 1.0);
    }

    // Destroy every hundredth entity in one deferred batch.
    for entity in spawned.iter().step_by(100) {
        world.mark_entity_for_destruction(*entity);
    }
    let version = world.version();
    world.destroy_marked_entities();
    assert_eq!(world.entity_count(), COUNT - COUNT / 100);
    assert_eq!(world.version(), version + 1);

    // Survivors keep their identity-mapped payloads after the
    // swap-remove churn.
    for (index, &entity) in spawned.iter().enumerate() {
        if index % 100 == 0 {
            assert!(!world.is_alive(entity));
        } else {
            assert_eq!(world.get_component::<Position>(entity).x, index as f32 + 1.0);
        }
    }
}

#[test]
fn query_results_match_a_brute_force_scan() {
    let mut world = world();
    let position = world.registry().id_of::<Position>();
    let velocity = world.registry().id_of::<Velocity>();
    let marker = world.registry().id_of::<Marker>();

    let compositions: [&[_]; 4] = [
        &[position],
        &[position, velocity],
        &[position, marker],
        &[position, velocity, marker],
    ];
    let mut by_composition: Vec<Vec<EntityId>> = vec![Vec::new(); compositions.len()];
    for (index, type_ids) in compositions.iter().enumerate() {
        for _ in 0..50 + index {
            by_composition[index].push(world.create_entity(type_ids).unwrap());
        }
    }

    let query = Query::create(&world)
        .include::<Position>()
        .include::<Velocity>()
        .exclude::<Marker>()
        .build();

    let mut expected: Vec<EntityId> = by_composition[1].clone();
    expected.sort();

    let result = query.execute::<(Position, Velocity)>(&world);
    let mut seen: Vec<EntityId> = result.iter(&world).map(|(entity, _)| entity).collect();
    seen.sort();

    assert_eq!(seen, expected);
}

#[test]
fn every_structural_mutation_invalidates_snapshots() {
    type Snapshot = stratum::QueryResult<(Position,)>;

    let mut world = world();
    let position = world.registry().id_of::<Position>();
    let keeper = world.create_entity(&[position]).unwrap();
    let victim = world.create_entity(&[position]).unwrap();

    let query = Query::create(&world).include::<Position>().build();
    let snapshot = |world: &World| -> Snapshot { query.execute(world) };
    let is_stale = |world: &mut World, result: Snapshot| {
        std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let _ = result.iter_mut(world);
        }))
        .is_err()
    };

    let before_create = snapshot(&world);
    let spare = world.create_entity(&[position]).unwrap();
    assert!(is_stale(&mut world, before_create));

    let before_add = snapshot(&world);
    world.add_component::<Velocity>(keeper).unwrap();
    assert!(is_stale(&mut world, before_add));

    let before_remove = snapshot(&world);
    world.remove_component::<Velocity>(keeper).unwrap();
    assert!(is_stale(&mut world, before_remove));

    let before_immediate = snapshot(&world);
    world.destroy_entity_immediately(spare);
    assert!(is_stale(&mut world, before_immediate));

    // Marking alone is not structural.
    let before_mark = snapshot(&world);
    world.mark_entity_for_destruction(victim);
    assert!(!is_stale(&mut world, before_mark));

    let before_batch = snapshot(&world);
    world.destroy_marked_entities();
    assert!(is_stale(&mut world, before_batch));

    // The drain invalidates snapshots even when nothing was queued.
    let before_empty_drain = snapshot(&world);
    let version = world.version();
    world.destroy_marked_entities();
    assert_eq!(world.version(), version + 1);
    assert!(is_stale(&mut world, before_empty_drain));
}

#[test]
fn migration_chains_preserve_component_values() {
    let mut world = world();
    let position = world.registry().id_of::<Position>();

    let entity = world.create_entity(&[position]).unwrap();
    world.set_component(entity, Position { x: 11.0, y: 13.0 });

    world.add_component::<Velocity>(entity).unwrap();
    world.set_component(entity, Velocity { x: 1.0, y: 2.0 });
    world.add_component::<Marker>(entity).unwrap();
    world.set_component(entity, Marker(7));

    world.remove_component::<Velocity>(entity).unwrap();

    assert_eq!(*world.get_component::<Position>(entity), Position { x: 11.0, y: 13.0 });
    assert_eq!(*world.get_component::<Marker>(entity), Marker(7));
    assert!(!world.has_component::<Velocity>(entity));
}
