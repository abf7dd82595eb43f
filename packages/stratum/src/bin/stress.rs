use bytemuck::{Pod, Zeroable};
use stratum::{Component, Query, World};

#[derive(Debug, Clone, Copy, Pod, Zeroable)]
#[repr(C)]
pub struct Position {
    x: f32,
    y: f32,
}

impl Component for Position {}

#[derive(Debug, Clone, Copy, Pod, Zeroable)]
#[repr(C)]
pub struct Velocity {
    x: f32,
    y: f32,
}

impl Component for Velocity {}

fn main() {
    let mut world = World::new().unwrap();
    let position = world.register_component::<Position>().unwrap();
    let velocity = world.register_component::<Velocity>().unwrap();

    let moving = world.get_or_create_archetype(&[position, velocity]).unwrap();

    for round in 0..8 {
        for index in 0..8192 {
            let entity = world.create_entity_in(moving).unwrap();
            world.set_component(entity, Velocity { x: index as f32, y: 1.0 });

            if index % 12 == 11 {
                world.mark_entity_for_destruction(entity);
            }
        }

        let query = Query::create(&world)
            .include::<Position>()
            .include::<Velocity>()
            .build();
        let step = query.execute::<(Position, Velocity)>(&world);
        for (_, (position, velocity)) in step.iter_mut(&mut world) {
            position.x += velocity.x;
            position.y += velocity.y;
        }

        world.destroy_marked_entities();
        println!(
            "round {}: {} entities at version {}",
            round,
            world.entity_count(),
            world.version()
        );
    }
}
