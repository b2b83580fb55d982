//! Pool of transient debris pieces.
//!
//! A piece is identified by its slot index, and only for the duration of one
//! frame: recycling swaps the last live piece into every dead slot. Anything
//! that wants to follow a piece across frames would need a generation-tagged
//! handle on top of this.

use bevy::log::debug;
use glam::{Affine3A, EulerRot, Mat3, Quat, Vec3};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;

use crate::config::DebrisSettings;
use crate::cpu::counters::{CappedList, FrameCounters};
use crate::cpu::grid::{CellGrid, GroundMap, hue_color};
use crate::gpu::buffers::{MirrorSpans, SlotJob, slot_jobs};
use crate::gpu::ffi::InstanceData;

// pieces per physics job
const PHYSICS_CHUNK: usize = 256;
// magnet intensities in this open band throw grounded debris back up
const RELAUNCH_BAND: (f32, f32) = (0.5, 1.0);

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Debris {
    pub position: Vec3,
    pub velocity: Vec3,
    pub basis: Mat3, // orientation and scale
    pub color: Vec3,
    pub z_offset: f32, // keeps pieces on the same cell from z-fighting
    pub landed_count: u32,
    pub ground_cell: Option<u32>,
}

impl Debris {
    pub fn new(position: Vec3, velocity: Vec3, basis: Mat3, color: Vec3) -> Self {
        Self {
            position,
            velocity,
            basis,
            color,
            z_offset: 0.0,
            landed_count: 0,
            ground_cell: None,
        }
    }

    pub fn is_grounded(&self) -> bool {
        self.ground_cell.is_some()
    }

    pub fn instance(&self) -> InstanceData {
        let transform = Affine3A::from_mat3_translation(self.basis, self.position);
        InstanceData::new(&transform, self.color.extend(1.0))
    }
}

/// A queued explosion.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SpawnDescriptor {
    pub position: Vec3,
    pub count: u32,
    pub hue_seed: f32,
}

#[derive(Debug, Default)]
pub struct SpawnQueue {
    pending: Vec<SpawnDescriptor>,
}

impl SpawnQueue {
    pub fn push(&mut self, descriptor: SpawnDescriptor) {
        self.pending.push(descriptor);
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    pub fn clear(&mut self) {
        self.pending.clear();
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct GenerationReport {
    pub applied: usize,
    pub dropped: usize,
    pub spawned: usize,
}

pub struct ParticleSystem {
    settings: DebrisSettings,
    particles: Vec<Debris>,
    counters: FrameCounters,
    landed: CappedList,
    dead: CappedList,
    dead_scratch: Vec<u32>,
    rng: StdRng,
}

impl ParticleSystem {
    pub fn new(settings: DebrisSettings, seed: u64) -> Self {
        Self {
            particles: Vec::with_capacity(settings.capacity),
            counters: FrameCounters::default(),
            landed: CappedList::new(settings.max_landed_per_frame),
            dead: CappedList::new(settings.max_dead_per_frame),
            dead_scratch: Vec::with_capacity(settings.max_dead_per_frame),
            rng: StdRng::seed_from_u64(seed),
            settings,
        }
    }

    /// Adds one piece as is. False when the pool is full.
    pub fn insert(&mut self, debris: Debris) -> bool {
        if self.particles.len() >= self.settings.capacity {
            return false;
        }
        self.particles.push(debris);
        self.counters.alive().set(self.particles.len());
        true
    }

    pub fn begin_frame(&self) {
        self.counters.reset_frame();
    }

    /// Stage 1 without instance output.
    pub fn run_physics(&mut self, dt: f32, ground: &GroundMap, frame_seed: u64) {
        self.run_physics_into(dt, ground, frame_seed, MirrorSpans::default());
    }

    /// Stage 1: integrate, collide with the ground, flag landings and deaths and
    /// write piece `i` to the `i`-th slot of `mirror`. Parallel over chunks that
    /// never cross a window; only the shared counters see concurrent writes.
    pub fn run_physics_into(
        &mut self,
        dt: f32,
        ground: &GroundMap,
        frame_seed: u64,
        mirror: MirrorSpans<'_>,
    ) {
        let settings = &self.settings;
        let counters = &self.counters;
        let landed = &self.landed;
        let dead = &self.dead;
        let scroll_shift = ground.scroll().delta_rows * ground.cell_size();

        counters.gpu_visible().reset();
        slot_jobs(self.particles.as_mut_slice(), mirror, PHYSICS_CHUNK)
            .into_par_iter()
            .for_each(|job| {
                let SlotJob {
                    first,
                    items,
                    mut span,
                } = job;
                let mut rng = StdRng::seed_from_u64(
                    frame_seed ^ (first as u64).wrapping_mul(0x9e37_79b9_7f4a_7c15),
                );
                for (i, piece) in items.iter_mut().enumerate() {
                    let outcome = step_debris(piece, dt, scroll_shift, ground, settings, &mut rng);
                    if outcome.first_landing {
                        if let Some(cell) = piece.ground_cell {
                            landed.push(counters.just_landed(), cell);
                        }
                    }
                    if outcome.dead {
                        dead.push(counters.just_dead(), (first + i) as u32);
                    }
                    if let Some(span) = span.as_mut() {
                        span.write(i, &piece.instance());
                    }
                }
                counters.gpu_visible().add(items.len());
            });
    }

    /// Stage 2: apply this frame's first landings to the grid.
    pub fn dig(&self, grid: &mut CellGrid) -> usize {
        let count = self.counters.just_landed().get();
        if count > self.landed.capacity() {
            debug!(
                "dropping {} landing events over the per-frame cap",
                count - self.landed.capacity()
            );
        }
        let mut applied = 0;
        for cell in self.landed.entries(count) {
            grid.dig(cell as usize);
            applied += 1;
        }
        applied
    }

    /// Stage 3: swap-and-pop every dead piece. Indices are handled from the
    /// highest down so a piece swapped in from the tail is never a dead one.
    pub fn recycle(&mut self) -> usize {
        let count = self.counters.just_dead().get();
        if count > self.dead.capacity() {
            debug!(
                "dropping {} death events over the per-frame cap",
                count - self.dead.capacity()
            );
        }

        self.dead_scratch.clear();
        self.dead_scratch.extend(self.dead.entries(count));
        self.dead_scratch.sort_unstable_by(|a, b| b.cmp(a));
        self.dead_scratch.dedup();

        let mut removed = 0;
        for &index in &self.dead_scratch {
            let index = index as usize;
            if index < self.particles.len() {
                self.particles.swap_remove(index);
                removed += 1;
            }
        }
        self.counters.alive().set(self.particles.len());
        removed
    }

    /// Stage 4: turn queued explosions into debris. A descriptor is applied
    /// whole or not at all; the first one that does not fit ends generation
    /// for the frame and the rest of the queue is discarded.
    pub fn generate(&mut self, queue: &mut SpawnQueue) -> GenerationReport {
        let mut report = GenerationReport::default();
        let total = queue.pending.len();

        for (i, descriptor) in queue.pending.drain(..).enumerate() {
            let count = descriptor.count as usize;
            if self.particles.len() + count > self.settings.capacity {
                report.dropped = total - i;
                debug!(
                    "pool full ({} / {}), dropping {} explosion(s)",
                    self.particles.len(),
                    self.settings.capacity,
                    report.dropped
                );
                break;
            }
            for _ in 0..count {
                let piece = spawn_debris(&descriptor, &self.settings, &mut self.rng);
                self.particles.push(piece);
            }
            report.applied += 1;
            report.spawned += count;
        }

        self.counters.alive().set(self.particles.len());
        report
    }

    pub fn settings(&self) -> &DebrisSettings {
        &self.settings
    }

    pub fn particles(&self) -> &[Debris] {
        &self.particles
    }

    pub fn live_count(&self) -> usize {
        self.particles.len()
    }

    pub fn capacity(&self) -> usize {
        self.settings.capacity
    }

    pub fn counters(&self) -> &FrameCounters {
        &self.counters
    }

    pub fn gpu_visible(&self) -> usize {
        self.counters.gpu_visible().get()
    }

    pub fn landed_this_frame(&self) -> usize {
        self.counters.just_landed().get()
    }

    pub fn dead_this_frame(&self) -> usize {
        self.counters.just_dead().get()
    }
}

struct StepOutcome {
    first_landing: bool,
    dead: bool,
}

fn step_debris(
    piece: &mut Debris,
    dt: f32,
    scroll_shift: f32,
    ground: &GroundMap,
    s: &DebrisSettings,
    rng: &mut StdRng,
) -> StepOutcome {
    // the ground scrolls towards -z and carries everything with it
    piece.position.z -= scroll_shift;

    if let Some(cell) = piece.ground_cell {
        let magnet = ground.magnet(cell);
        if magnet > RELAUNCH_BAND.0 && magnet < RELAUNCH_BAND.1 {
            piece.velocity = Vec3::new(
                rng.gen_range(-1.0..=1.0),
                rng.gen_range(s.relaunch_speed.0..=s.relaunch_speed.1),
                rng.gen_range(-1.0..=1.0),
            );
            piece.ground_cell = None;
        } else {
            piece.position.y = ground.height(cell) + piece.z_offset;
        }
    }

    let mut first_landing = false;
    if piece.ground_cell.is_none() {
        piece.velocity.y -= s.gravity * dt;
        piece.position += piece.velocity * dt;

        // below the dead depth nothing catches a piece any more
        if piece.velocity.y <= 0.0 && piece.position.y >= s.dead_depth {
            if let Some(cell) = ground.cell_at(piece.position) {
                let top = ground.height(cell);
                if piece.position.y <= top {
                    piece.position.y = top + piece.z_offset;
                    piece.velocity = Vec3::ZERO;
                    piece.ground_cell = Some(cell);
                    piece.landed_count += 1;
                    if piece.landed_count == 1 {
                        piece.color *= 0.5;
                        first_landing = true;
                    }
                }
            }
        }
    }

    StepOutcome {
        first_landing,
        dead: piece.position.z < 0.0 || piece.position.y < s.dead_depth,
    }
}

fn spawn_debris(descriptor: &SpawnDescriptor, s: &DebrisSettings, rng: &mut StdRng) -> Debris {
    let direction = Vec3::new(
        rng.gen_range(-1.0..=1.0),
        rng.gen_range(0.2..=1.0),
        rng.gen_range(-1.0..=1.0),
    )
    .normalize_or(Vec3::Y);
    let speed = rng.gen_range(s.spawn_speed.0..=s.spawn_speed.1);

    let hue = descriptor.hue_seed + rng.gen_range(-s.hue_jitter..=s.hue_jitter);
    let rotation = Quat::from_euler(
        EulerRot::XYZ,
        rng.gen_range(0.0..std::f32::consts::TAU),
        rng.gen_range(0.0..std::f32::consts::TAU),
        rng.gen_range(0.0..std::f32::consts::TAU),
    );
    let size = rng.gen_range(s.size.0..=s.size.1);
    let scale = Vec3::new(size, size * rng.gen_range(0.3..=1.0), size);
    let jitter = Vec3::new(
        rng.gen_range(-0.25..=0.25),
        rng.gen_range(0.0..=0.25),
        rng.gen_range(-0.25..=0.25),
    );

    Debris {
        position: descriptor.position + jitter,
        velocity: direction * speed,
        basis: Mat3::from_quat(rotation) * Mat3::from_diagonal(scale),
        color: hue_color(hue, 0.8, 1.0),
        z_offset: rng.gen_range(0.0..=s.z_fight_offset),
        landed_count: 0,
        ground_cell: None,
    }
}
