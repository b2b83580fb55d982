use bevy::prelude::*;
use bevy::render::render_resource::Buffer;
use bevy::render::renderer::{RenderDevice, RenderQueue};
use bevy::render::{Extract, ExtractSchedule, RenderApp};

use crate::config::FieldSettings;
use crate::cpu::field::DebrisField;
use crate::gpu::backend::MemoryBackend;
use crate::gpu::batches::DrawBatchList;
use crate::gpu::render_backend::{FieldBackend, RenderBackend};

pub type FieldResource = DebrisField<FieldBackend>;

// ==================== events / resources =============================

/// Request for a burst of `count` debris pieces at `position`.
#[derive(Event, Clone, Copy, Debug)]
pub struct ExplosionRequest {
    pub position: glam::Vec3,
    pub count: u32,
    pub hue_seed: f32,
}

/// A moving object passed over the grid between two frames.
#[derive(Event, Clone, Copy, Debug)]
pub struct MagnetSweep {
    pub previous: glam::Vec3,
    pub current: glam::Vec3,
}

/// Draw batches answered for the last stepped frame.
#[derive(Resource, Clone, Default)]
pub struct FieldDrawBatches(pub DrawBatchList);

// Render world copy
#[derive(Resource, Clone)]
pub struct ExtractedFieldDraw {
    pub buffer: Buffer,
    pub batches: DrawBatchList,
}

// =====================================================================

// ========================== systems ==================================

// Startup: pick a backend and build the field. A failure here is final, the
// per-frame systems simply find no field.
fn init_debris_field(
    mut commands: Commands,
    settings: Res<FieldSettings>,
    render_device: Option<Res<RenderDevice>>,
    render_queue: Option<Res<RenderQueue>>,
) {
    let backend = match (render_device, render_queue) {
        (Some(device), Some(queue)) => {
            FieldBackend::Render(RenderBackend::new((*device).clone(), (*queue).clone()))
        }
        _ => {
            info!("no render device, debris field runs on a memory backend");
            FieldBackend::Memory(MemoryBackend::raw())
        }
    };

    match DebrisField::new(backend, settings.clone()) {
        Ok(field) => commands.insert_resource(field),
        Err(err) => error!("debris field disabled: {err}"),
    }
}

fn apply_magnet_sweeps(mut sweeps: EventReader<MagnetSweep>, field: Option<ResMut<FieldResource>>) {
    let Some(mut field) = field else {
        sweeps.clear();
        return;
    };
    for sweep in sweeps.read() {
        field.set_magnet(sweep.previous, sweep.current);
    }
}

fn queue_explosions(
    mut requests: EventReader<ExplosionRequest>,
    field: Option<ResMut<FieldResource>>,
) {
    let Some(mut field) = field else {
        requests.clear();
        return;
    };
    for request in requests.read() {
        field.queue_explosion(request.position, request.count, request.hue_seed);
    }
}

fn step_debris_field(
    time: Res<Time>,
    field: Option<ResMut<FieldResource>>,
    mut draw_batches: ResMut<FieldDrawBatches>,
) {
    let Some(mut field) = field else {
        return;
    };
    match field.step(time.delta_secs()) {
        Ok(_) => draw_batches.0 = field.draw_batches(),
        Err(err) => {
            // skip drawing this frame rather than retrying
            warn!("debris field upload skipped: {err}");
            draw_batches.0 = DrawBatchList::default();
        }
    }
}

// Extract: hand the buffer and batches to the render world

fn extract_field_draw(
    mut commands: Commands,
    field: Extract<Option<Res<FieldResource>>>,
    draw_batches: Extract<Res<FieldDrawBatches>>,
) {
    let Some(field) = field.as_ref() else {
        return;
    };
    let Some(buffer) = field
        .buffers()
        .gpu_buffer()
        .and_then(|id| field.buffers().backend().render_buffer(id))
    else {
        return;
    };
    commands.insert_resource(ExtractedFieldDraw {
        buffer: buffer.clone(),
        batches: draw_batches.0.clone(),
    });
}

// =====================================================================

// Plugin

#[derive(Default)]
pub struct DebrisFieldPlugin {
    pub settings: FieldSettings,
}

impl Plugin for DebrisFieldPlugin {
    fn build(&self, app: &mut App) {
        // App
        app.add_event::<ExplosionRequest>()
            .add_event::<MagnetSweep>()
            .insert_resource(self.settings.clone())
            .init_resource::<FieldDrawBatches>()
            .add_systems(Startup, init_debris_field)
            .add_systems(
                Update,
                (apply_magnet_sweeps, queue_explosions, step_debris_field).chain(),
            );

        // Render
        if let Some(render_app) = app.get_sub_app_mut(RenderApp) {
            render_app.add_systems(ExtractSchedule, extract_field_draw);
        }
    }
}
