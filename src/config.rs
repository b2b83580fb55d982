use bevy::prelude::Resource;

// grid
pub const GRID_WIDTH: usize = 32;
pub const GRID_HEIGHT: usize = 96;
pub const CELL_SIZE: f32 = 1.0;

// debris pool and per-frame event lists
pub const MAX_PARTICLES: usize = 16 * 1024;
pub const MAX_LANDED_PER_FRAME: usize = 1024;
pub const MAX_DEAD_PER_FRAME: usize = 1024;

// one slot = 3 vec4 (object to world) + 3 vec4 (world to object) + 1 vec4 (color)
pub const INSTANCE_VEC4S: usize = 3 * 2 + 1;
pub const INSTANCE_BYTES: usize = INSTANCE_VEC4S * 16;

pub const MAX_INSTANCES: usize = GRID_WIDTH * GRID_HEIGHT + MAX_PARTICLES;

#[derive(Clone, Debug)]
pub struct GridSettings {
    pub width: usize,
    pub height: usize,
    pub cell_size: f32,
    pub scroll_speed: f32, // rows per second
    pub base_height: f32,
    pub height_bonus: f32,
    pub hue_rate: f32,
    pub bright_probability: f32,
    pub oscillation_speed: f32, // radians per second
    pub weighted_oscillation_speed: f32,
    pub magnet_lift: f32,
    pub magnet_decay: f32, // intensity per second
    pub flash_duration: f32,
    pub dig_depth: f32,
    pub dig_darken: f32,
    pub min_height: f32,
}

impl Default for GridSettings {
    fn default() -> Self {
        Self {
            width: GRID_WIDTH,
            height: GRID_HEIGHT,
            cell_size: CELL_SIZE,
            scroll_speed: 1.5,
            base_height: 0.5,
            height_bonus: 4.0,
            hue_rate: 0.01,
            bright_probability: 0.04,
            oscillation_speed: 2.0,
            weighted_oscillation_speed: 0.5,
            magnet_lift: 1.5,
            magnet_decay: 2.0,
            flash_duration: 0.4,
            dig_depth: 0.05,
            dig_darken: 0.9,
            min_height: 0.1,
        }
    }
}

impl GridSettings {
    pub fn cell_count(&self) -> usize {
        self.width * self.height
    }
}

#[derive(Clone, Debug)]
pub struct DebrisSettings {
    pub capacity: usize,
    pub max_landed_per_frame: usize,
    pub max_dead_per_frame: usize,
    pub gravity: f32,
    pub dead_depth: f32,
    pub spawn_speed: (f32, f32),
    pub relaunch_speed: (f32, f32),
    pub size: (f32, f32),
    pub hue_jitter: f32,
    pub z_fight_offset: f32,
}

impl Default for DebrisSettings {
    fn default() -> Self {
        Self {
            capacity: MAX_PARTICLES,
            max_landed_per_frame: MAX_LANDED_PER_FRAME,
            max_dead_per_frame: MAX_DEAD_PER_FRAME,
            gravity: 9.81,
            dead_depth: -10.0,
            spawn_speed: (2.0, 8.0),
            relaunch_speed: (3.0, 7.0),
            size: (0.08, 0.25),
            hue_jitter: 0.05,
            z_fight_offset: 0.01,
        }
    }
}

#[derive(Resource, Clone, Debug)]
pub struct FieldSettings {
    pub grid: GridSettings,
    pub debris: DebrisSettings,
    pub casts_shadows: bool,
    pub seed: u64,
}

impl Default for FieldSettings {
    fn default() -> Self {
        Self {
            grid: GridSettings::default(),
            debris: DebrisSettings::default(),
            casts_shadows: true,
            seed: 0x5eed_d3b2,
        }
    }
}

impl FieldSettings {
    /// Slots needed in the shared buffer: every cell plus the full debris pool.
    pub fn max_instances(&self) -> usize {
        self.grid.cell_count() + self.debris.capacity
    }

    // demo function ----------------------------------------------
    pub fn demo_small() -> Self {
        Self {
            grid: GridSettings {
                width: 16,
                height: 32,
                ..Default::default()
            },
            debris: DebrisSettings {
                capacity: 4096,
                ..Default::default()
            },
            ..Default::default()
        }
    }
    // ------------------------------------------------------------
}
