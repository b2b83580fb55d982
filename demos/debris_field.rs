use std::time::Duration;

use bevy::app::ScheduleRunnerPlugin;
use bevy::log::LogPlugin;
use bevy::prelude::*;
use glam::Vec3;

use bevy_debris_field::config::FieldSettings;
use bevy_debris_field::plugin::{FieldDrawBatches, FieldResource};
use bevy_debris_field::{DebrisFieldPlugin, ExplosionRequest, MagnetSweep};

const EXPLOSION_EVERY: u32 = 20;
const RUN_FRAMES: u32 = 600;

// Headless run: no window, no render device, so the field falls back to the
// memory backend and we just watch the frame reports in the log.
fn main() {
    App::new()
        .add_plugins((
            MinimalPlugins.set(ScheduleRunnerPlugin::run_loop(Duration::from_secs_f64(
                1.0 / 60.0,
            ))),
            LogPlugin::default(),
        ))
        .add_plugins(DebrisFieldPlugin {
            settings: FieldSettings::demo_small(),
        })
        .add_systems(Update, (drive_demo, report))
        .run();
}

#[derive(Default)]
struct Sweeper {
    frame: u32,
    previous: Option<Vec3>,
}

fn drive_demo(
    mut state: Local<Sweeper>,
    mut explosions: EventWriter<ExplosionRequest>,
    mut sweeps: EventWriter<MagnetSweep>,
    mut exit: EventWriter<AppExit>,
) {
    state.frame += 1;
    let t = state.frame as f32 / 60.0;

    if state.frame % EXPLOSION_EVERY == 0 {
        explosions.write(ExplosionRequest {
            position: Vec3::new(8.0 + 4.0 * t.sin(), 2.0, 20.0),
            count: 150,
            hue_seed: (t * 0.1).fract(),
        });
    }

    // a magnet drifting back and forth over the near half of the grid
    let current = Vec3::new(8.0 + 6.0 * (t * 0.7).sin(), 0.0, 8.0 + 4.0 * (t * 0.3).cos());
    if let Some(previous) = state.previous {
        sweeps.write(MagnetSweep { previous, current });
    }
    state.previous = Some(current);

    if state.frame >= RUN_FRAMES {
        exit.write(AppExit::Success);
    }
}

fn report(field: Option<Res<FieldResource>>, batches: Res<FieldDrawBatches>) {
    let Some(field) = field else {
        return;
    };
    if field.frame() % 60 != 0 {
        return;
    }
    info!(
        "frame {}: {} debris, {} instances in {} batches",
        field.frame(),
        field.particles().live_count(),
        batches.0.total_instances(),
        batches.0.batches.len()
    );
}
