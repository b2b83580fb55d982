use std::collections::HashSet;

use bevy_debris_field::config::{DebrisSettings, GridSettings, INSTANCE_BYTES};
use bevy_debris_field::cpu::counters::{AtomicCounter, CappedList};
use bevy_debris_field::cpu::grid::CellGrid;
use bevy_debris_field::cpu::particles::{
    Debris, ParticleSystem, SpawnDescriptor, SpawnQueue,
};
use bevy_debris_field::gpu::backend::MemoryBackend;
use bevy_debris_field::gpu::buffers::InstanceBufferManager;
use bevy_debris_field::gpu::layout::BufferMode;
use glam::{Mat3, Vec3};
use rayon::prelude::*;

fn still_grid() -> CellGrid {
    CellGrid::new(
        GridSettings {
            width: 4,
            height: 4,
            scroll_speed: 0.0,
            ..Default::default()
        },
        3,
    )
}

fn system(capacity: usize) -> ParticleSystem {
    ParticleSystem::new(
        DebrisSettings {
            capacity,
            ..Default::default()
        },
        11,
    )
}

fn piece(position: Vec3, velocity: Vec3, id: f32) -> Debris {
    Debris::new(position, velocity, Mat3::from_diagonal(Vec3::splat(0.1)), Vec3::new(id, 0.6, 0.4))
}

fn physics_frame(particles: &mut ParticleSystem, grid: &CellGrid, dt: f32) {
    particles.begin_frame();
    particles.run_physics(dt, grid.ground(), 99);
}

#[test]
fn first_landing_darkens_and_weighs_the_cell() {
    let mut grid = still_grid();
    let mut particles = system(16);
    let cell = grid.cell_index(1, 1);
    let top = grid.ground().height(cell as u32);

    particles.insert(piece(Vec3::new(1.5, top + 0.05, 1.5), Vec3::new(0.0, -1.0, 0.0), 0.8));
    physics_frame(&mut particles, &grid, 0.1);

    let landed = particles.particles()[0];
    assert_eq!(landed.ground_cell, Some(cell as u32));
    assert_eq!(landed.landed_count, 1);
    assert_eq!(landed.color, Vec3::new(0.8, 0.6, 0.4) * 0.5);
    assert_eq!(landed.velocity, Vec3::ZERO);
    assert_eq!(particles.landed_this_frame(), 1);

    let weight = grid.cells()[cell].weight;
    assert_eq!(particles.dig(&mut grid), 1);
    assert_eq!(grid.cells()[cell].weight, weight + 1);
}

#[test]
fn landings_past_the_list_cap_are_not_dug() {
    let mut grid = still_grid();
    let mut particles = ParticleSystem::new(
        DebrisSettings {
            capacity: 16,
            max_landed_per_frame: 1,
            ..Default::default()
        },
        5,
    );
    for (col, row) in [(1, 1), (2, 2)] {
        let top = grid.ground().height(grid.cell_index(col, row) as u32);
        let position = Vec3::new(col as f32 + 0.5, top + 0.05, row as f32 + 0.5);
        particles.insert(piece(position, Vec3::new(0.0, -1.0, 0.0), 0.5));
    }
    physics_frame(&mut particles, &grid, 0.1);
    assert!(particles.particles().iter().all(|p| p.landed_count == 1));
    assert_eq!(particles.landed_this_frame(), 2);

    let weights = |grid: &CellGrid| grid.cells().iter().map(|c| c.weight).sum::<u32>();
    let before = weights(&grid);
    assert_eq!(particles.dig(&mut grid), 1);
    assert_eq!(weights(&grid), before + 1);
}

#[test]
fn later_landings_do_not_darken_again() {
    let grid = still_grid();
    let mut particles = system(16);
    let top = grid.ground().height(grid.cell_index(2, 2) as u32);

    let mut debris = piece(Vec3::new(2.5, top + 0.05, 2.5), Vec3::new(0.0, -1.0, 0.0), 0.8);
    debris.landed_count = 1;
    particles.insert(debris);
    physics_frame(&mut particles, &grid, 0.1);

    let landed = particles.particles()[0];
    assert_eq!(landed.landed_count, 2);
    assert_eq!(landed.color, Vec3::new(0.8, 0.6, 0.4));
    assert_eq!(particles.landed_this_frame(), 0);
}

#[test]
fn grounded_debris_rides_its_cell() {
    let mut grid = still_grid();
    let mut particles = system(16);
    let cell = grid.cell_index(0, 3) as u32;

    let mut debris = piece(Vec3::new(0.5, 0.0, 3.5), Vec3::ZERO, 0.5);
    debris.ground_cell = Some(cell);
    debris.z_offset = 0.01;
    particles.insert(debris);

    grid.update(0.25);
    physics_frame(&mut particles, &grid, 0.25);
    let pinned = particles.particles()[0];
    assert_eq!(pinned.ground_cell, Some(cell));
    assert!((pinned.position.y - (grid.ground().height(cell) + 0.01)).abs() < 1e-6);
}

#[test]
fn magnet_band_relaunches_grounded_debris() {
    let mut grid = still_grid();
    let mut particles = system(16);
    let cell = grid.cell_index(1, 1) as u32;

    let mut debris = piece(Vec3::new(1.5, 0.0, 1.5), Vec3::ZERO, 0.5);
    debris.ground_cell = Some(cell);
    debris.landed_count = 1;
    particles.insert(debris);

    grid.set_magnet_cell(Vec3::new(1.5, 0.0, 1.5), Vec3::new(1.5, 0.0, 1.5));
    // full intensity is not in the band yet
    physics_frame(&mut particles, &grid, 0.1);
    assert!(particles.particles()[0].is_grounded());

    grid.update(0.1);
    assert!((grid.ground().magnet(cell) - 0.8).abs() < 1e-5);
    physics_frame(&mut particles, &grid, 0.1);

    let launched = particles.particles()[0];
    assert_eq!(launched.ground_cell, None);
    assert!(launched.velocity.y > 0.0);
    assert_eq!(launched.landed_count, 1);
}

#[test]
fn recycling_removes_exactly_the_dead() {
    let grid = still_grid();
    let mut particles = system(16);
    for id in 0..10 {
        let y = if [2, 5, 9].contains(&id) { -100.0 } else { 50.0 };
        particles.insert(piece(Vec3::new(1.5, y, 1.5), Vec3::ZERO, id as f32));
    }

    physics_frame(&mut particles, &grid, 0.01);
    assert_eq!(particles.dead_this_frame(), 3);
    assert_eq!(particles.gpu_visible(), 10);

    assert_eq!(particles.recycle(), 3);
    assert_eq!(particles.live_count(), 7);
    assert_eq!(particles.counters().alive().get(), 7);

    let survivors: HashSet<u32> = particles
        .particles()
        .iter()
        .map(|p| p.color.x as u32)
        .collect();
    assert_eq!(survivors, HashSet::from([0, 1, 3, 4, 6, 7, 8]));
}

#[test]
fn dead_list_overflow_is_dropped() {
    let grid = still_grid();
    let mut particles = ParticleSystem::new(
        DebrisSettings {
            capacity: 16,
            max_dead_per_frame: 2,
            ..Default::default()
        },
        5,
    );
    for id in 0..10 {
        let y = if id < 3 { -100.0 } else { 50.0 };
        particles.insert(piece(Vec3::new(1.5, y, 1.5), Vec3::ZERO, id as f32));
    }

    physics_frame(&mut particles, &grid, 0.01);
    assert_eq!(particles.dead_this_frame(), 3);
    assert_eq!(particles.recycle(), 2);
    assert_eq!(particles.live_count(), 8);

    let survivors: HashSet<u32> = particles
        .particles()
        .iter()
        .map(|p| p.color.x as u32)
        .collect();
    assert_eq!(survivors.len(), 8);
}

#[test]
fn debris_below_the_dead_depth_is_not_caught_by_the_ground() {
    let grid = still_grid();
    let mut particles = system(4);
    // over cell (1, 1), far under its top
    particles.insert(piece(Vec3::new(1.5, -100.0, 1.5), Vec3::ZERO, 0.0));
    // off the footprint entirely
    particles.insert(piece(Vec3::new(-5.0, -100.0, 1.5), Vec3::ZERO, 1.0));
    physics_frame(&mut particles, &grid, 0.01);

    assert_eq!(particles.dead_this_frame(), 2);
    assert!(particles.particles().iter().all(|p| !p.is_grounded() && p.position.y < -10.0));
    assert_eq!(particles.landed_this_frame(), 0);
    assert_eq!(particles.recycle(), 2);
    assert_eq!(particles.live_count(), 0);
}

#[test]
fn physics_writes_each_piece_to_its_slot() {
    let grid = still_grid();
    let mut particles = system(16);
    for id in 0..10 {
        particles.insert(piece(Vec3::new(1.5, 50.0, 1.5), Vec3::ZERO, id as f32));
    }
    // 4 slots per window, so pieces spread over three windows
    let mut buffers = InstanceBufferManager::new(MemoryBackend::new(BufferMode::ConstantWindows {
        max_window_bytes: 512,
        offset_alignment: 16,
    }));
    buffers.init(12, INSTANCE_BYTES, false).unwrap();

    let (_, debris) = buffers
        .sysmem_buffer_mut()
        .unwrap()
        .into_spans()
        .split_at_slot(2);
    particles.begin_frame();
    particles.run_physics_into(0.01, grid.ground(), 1, debris);
    assert_eq!(particles.gpu_visible(), 10);

    let sysmem = buffers.sysmem_buffer_mut().unwrap();
    for (i, piece) in particles.particles().iter().enumerate() {
        assert_eq!(sysmem.read_slot(2 + i), piece.instance());
    }
    // the two slots before the debris were left alone
    assert_eq!(sysmem.read_slot(0).color, glam::Vec4::ZERO);
}

#[test]
fn debris_behind_the_grid_dies() {
    let grid = still_grid();
    let mut particles = system(4);
    particles.insert(piece(Vec3::new(1.5, 50.0, -0.5), Vec3::ZERO, 0.0));
    physics_frame(&mut particles, &grid, 0.01);
    assert_eq!(particles.dead_this_frame(), 1);
}

#[test]
fn generation_applies_whole_descriptors() {
    let mut particles = system(100);
    let mut queue = SpawnQueue::default();
    for count in [60, 30] {
        queue.push(SpawnDescriptor {
            position: Vec3::new(2.0, 3.0, 2.0),
            count,
            hue_seed: 0.25,
        });
    }

    let report = particles.generate(&mut queue);
    assert_eq!(report.applied, 2);
    assert_eq!(report.spawned, 90);
    assert_eq!(report.dropped, 0);
    assert_eq!(particles.live_count(), 90);
    assert!(queue.is_empty());
    assert!(particles.particles().iter().all(|p| !p.is_grounded() && p.landed_count == 0));
}

#[test]
fn first_overflow_aborts_the_rest_of_the_queue() {
    let mut particles = system(100);
    let mut queue = SpawnQueue::default();
    for count in [60, 50, 10] {
        queue.push(SpawnDescriptor {
            position: Vec3::ZERO,
            count,
            hue_seed: 0.5,
        });
    }

    let report = particles.generate(&mut queue);
    assert_eq!(report.applied, 1);
    assert_eq!(report.dropped, 2);
    assert_eq!(particles.live_count(), 60);
    assert!(queue.is_empty());
}

#[test]
fn oversized_explosion_creates_nothing() {
    let mut particles = system(10);
    particles.insert(piece(Vec3::ZERO, Vec3::ZERO, 0.0));
    let mut queue = SpawnQueue::default();
    queue.push(SpawnDescriptor {
        position: Vec3::ZERO,
        count: 20,
        hue_seed: 0.1,
    });

    let report = particles.generate(&mut queue);
    assert_eq!(report.spawned, 0);
    assert_eq!(particles.live_count(), 1);
}

#[test]
fn full_pool_refuses_inserts() {
    let mut particles = system(1);
    assert!(particles.insert(piece(Vec3::ZERO, Vec3::ZERO, 0.0)));
    assert!(!particles.insert(piece(Vec3::ZERO, Vec3::ZERO, 1.0)));
}

#[test]
fn capped_list_keeps_counting_past_capacity() {
    let counter = AtomicCounter::default();
    let list = CappedList::new(2);
    assert!(list.push(&counter, 7));
    assert!(list.push(&counter, 8));
    assert!(!list.push(&counter, 9));
    assert_eq!(counter.get(), 3);
    assert_eq!(list.entries(counter.get()).collect::<Vec<_>>(), vec![7, 8]);
}

#[test]
fn capped_list_takes_concurrent_pushes() {
    let counter = AtomicCounter::default();
    let list = CappedList::new(512);
    (0..2000u32).into_par_iter().for_each(|i| {
        list.push(&counter, i);
    });

    assert_eq!(counter.get(), 2000);
    let entries: HashSet<u32> = list.entries(counter.get()).collect();
    assert_eq!(entries.len(), 512);
}
