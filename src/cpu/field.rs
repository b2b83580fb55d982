use bevy::log::debug;
use bevy::prelude::Resource;
use glam::Vec3;

use crate::config::{FieldSettings, INSTANCE_BYTES};
use crate::cpu::grid::CellGrid;
use crate::cpu::particles::{GenerationReport, ParticleSystem, SpawnDescriptor, SpawnQueue};
use crate::error::InstanceBufferError;
use crate::gpu::backend::GpuBackend;
use crate::gpu::batches::DrawBatchList;
use crate::gpu::buffers::InstanceBufferManager;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct FrameReport {
    pub rows_injected: usize,
    pub gpu_instances: usize,
    pub live_particles: usize,
    pub landed: usize,
    pub dead: usize,
    pub generation: GenerationReport,
}

/// The grid, the debris pool and the shared instance buffer they both write
/// into, stepped together once per frame.
///
/// Stage order inside [`DebrisField::step`]:
///
/// ```text
/// scroll ─┬─> grid update ──┬─> digger ─> recycling ─> generation ─> upload
///         └─> physics ──────┘
/// ```
///
/// Grid update and physics run side by side; physics reads the ground as the
/// previous frame left it. The upload is the only point the frame waits on.
#[derive(Resource)]
pub struct DebrisField<B: GpuBackend> {
    settings: FieldSettings,
    buffers: InstanceBufferManager<B>,
    grid: CellGrid,
    particles: ParticleSystem,
    spawn_queue: SpawnQueue,
    instance_count: usize,
    frame: u64,
}

impl<B: GpuBackend> DebrisField<B> {
    pub fn new(backend: B, settings: FieldSettings) -> Result<Self, InstanceBufferError> {
        let mut buffers = InstanceBufferManager::new(backend);
        buffers.init(settings.max_instances(), INSTANCE_BYTES, settings.casts_shadows)?;

        Ok(Self {
            grid: CellGrid::new(settings.grid.clone(), settings.seed),
            particles: ParticleSystem::new(settings.debris.clone(), settings.seed.wrapping_add(1)),
            buffers,
            spawn_queue: SpawnQueue::default(),
            instance_count: 0,
            frame: 0,
            settings,
        })
    }

    pub fn queue_explosion(&mut self, position: Vec3, count: u32, hue_seed: f32) {
        self.spawn_queue.push(SpawnDescriptor {
            position,
            count,
            hue_seed,
        });
    }

    pub fn set_magnet(&mut self, prev_pos: Vec3, pos: Vec3) -> usize {
        self.grid.set_magnet_cell(prev_pos, pos)
    }

    pub fn step(&mut self, dt: f32) -> Result<FrameReport, InstanceBufferError> {
        let dt = if dt.is_finite() { dt.max(0.0) } else { 0.0 };
        self.frame += 1;
        let frame_seed = self.settings.seed ^ self.frame.wrapping_mul(0x2545_f491_4f6c_dd1d);

        let scroll = self.grid.advance_scroll(dt);
        self.particles.begin_frame();
        {
            // cells own slots [0, cell_count), debris the slots after them
            let cell_count = self.grid.cell_count();
            let sysmem = self.buffers.sysmem_buffer_mut()?;
            let (cell_mirror, debris_mirror) = sysmem.into_spans().split_at_slot(cell_count);

            let particles = &mut self.particles;
            let (grid_update, ground) = self.grid.split_for_update();
            rayon::join(
                || grid_update.run(dt, cell_mirror),
                || particles.run_physics_into(dt, ground, frame_seed, debris_mirror),
            );
        }

        // digger needs both the physics output and the updated cells
        let landed = self.particles.dig(&mut self.grid);
        self.grid.publish_ground();

        let gpu_visible = self.particles.gpu_visible();
        let dead = self.particles.recycle();
        let generation = self.particles.generate(&mut self.spawn_queue);

        // join point: the mirror holds this frame's cells and debris
        let instance_count = self.grid.cell_count() + gpu_visible;
        self.buffers.upload_gpu_data(instance_count)?;
        self.instance_count = instance_count;

        let report = FrameReport {
            rows_injected: scroll.rows_injected,
            gpu_instances: instance_count,
            live_particles: self.particles.live_count(),
            landed,
            dead,
            generation,
        };
        debug!("frame {}: {:?}", self.frame, report);
        Ok(report)
    }

    pub fn draw_batches(&self) -> DrawBatchList {
        self.buffers.draw_batches(self.instance_count)
    }

    pub fn shutdown(&mut self) {
        self.buffers.shutdown();
        self.instance_count = 0;
    }

    pub fn settings(&self) -> &FieldSettings {
        &self.settings
    }

    pub fn grid(&self) -> &CellGrid {
        &self.grid
    }

    pub fn particles(&self) -> &ParticleSystem {
        &self.particles
    }

    pub fn buffers(&self) -> &InstanceBufferManager<B> {
        &self.buffers
    }

    pub fn buffers_mut(&mut self) -> &mut InstanceBufferManager<B> {
        &mut self.buffers
    }

    pub fn pending_explosions(&self) -> usize {
        self.spawn_queue.len()
    }

    pub fn instance_count(&self) -> usize {
        self.instance_count
    }

    pub fn frame(&self) -> u64 {
        self.frame
    }
}
