// scrolling toroidal grid of environment cells
use std::f32::consts::TAU;

use bevy::color::{Color, ColorToComponents};
use glam::{Affine3A, Quat, Vec2, Vec3, Vec4};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;

use crate::config::GridSettings;
use crate::gpu::buffers::{MirrorSpans, SlotJob, slot_jobs};
use crate::gpu::ffi::InstanceData;

const MAGNET_TINT: Vec4 = Vec4::new(0.35, 0.9, 1.0, 1.0);
const FLASH_TINT: Vec4 = Vec4::ONE;
// cells are drawn slightly smaller than their footprint
const CELL_GAP: f32 = 0.95;

/// Linear RGB for an HSV triple, hue in [0, 1).
pub fn hue_color(hue: f32, saturation: f32, value: f32) -> Vec3 {
    let rgba = Color::hsv(hue.rem_euclid(1.0) * 360.0, saturation, value)
        .to_linear()
        .to_f32_array();
    Vec3::new(rgba[0], rgba[1], rgba[2])
}

#[inline]
fn smoothstep(t: f32) -> f32 {
    let t = t.clamp(0.0, 1.0);
    t * t * (3.0 - 2.0 * t)
}

#[derive(Clone, Debug, PartialEq)]
pub struct Cell {
    pub x: f32,
    pub base_height: f32, // initial height, lowered by digging
    pub height: f32,      // animated top of the cell
    pub phase: f32,
    pub weight: u32, // debris landings so far
    pub color: Vec4,
    pub flash_time: f32,
    pub magnet_intensity: f32,
}

impl Default for Cell {
    fn default() -> Self {
        Self {
            x: 0.0,
            base_height: 0.0,
            height: 0.0,
            phase: 0.0,
            weight: 0,
            color: Vec4::ONE,
            flash_time: 0.0,
            magnet_intensity: 0.0,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct ScrollState {
    /// Storage row currently at logical row 0.
    pub base_position: usize,
    /// Fraction of a row scrolled since the last injection, in [0, 1).
    pub phase: f32,
    /// Rows scrolled during the last advance.
    pub delta_rows: f32,
    pub rows_injected: usize,
}

/// Read-only view of the ground used by the debris physics while the grid
/// update job is running: cell tops and magnet intensities by cell index.
#[derive(Clone, Debug)]
pub struct GroundMap {
    width: usize,
    height: usize,
    cell_size: f32,
    scroll: ScrollState,
    heights: Vec<f32>,
    magnet: Vec<f32>,
}

impl GroundMap {
    fn new(settings: &GridSettings) -> Self {
        Self {
            width: settings.width,
            height: settings.height,
            cell_size: settings.cell_size,
            scroll: ScrollState::default(),
            heights: vec![0.0; settings.cell_count()],
            magnet: vec![0.0; settings.cell_count()],
        }
    }

    pub fn scroll(&self) -> &ScrollState {
        &self.scroll
    }

    pub fn cell_size(&self) -> f32 {
        self.cell_size
    }

    /// Continuous grid coordinates (column, logical row) of a world position.
    #[inline]
    pub fn grid_position(&self, pos: Vec3) -> Vec2 {
        Vec2::new(pos.x / self.cell_size, pos.z / self.cell_size + self.scroll.phase)
    }

    #[inline]
    pub fn storage_row(&self, logical_row: usize) -> usize {
        (self.scroll.base_position + logical_row) % self.height
    }

    /// Index of the cell under `pos`, if it lies on the grid footprint.
    #[inline]
    pub fn cell_at(&self, pos: Vec3) -> Option<u32> {
        let g = self.grid_position(pos).floor();
        if !(g.x >= 0.0 && g.y >= 0.0) {
            return None;
        }
        let (col, row) = (g.x as usize, g.y as usize);
        if col >= self.width || row >= self.height {
            return None;
        }
        Some((self.storage_row(row) * self.width + col) as u32)
    }

    #[inline]
    pub fn height(&self, cell: u32) -> f32 {
        self.heights[cell as usize]
    }

    #[inline]
    pub fn magnet(&self, cell: u32) -> f32 {
        self.magnet[cell as usize]
    }
}

pub struct CellGrid {
    settings: GridSettings,
    cells: Vec<Cell>,
    ground: GroundMap,
    scroll: ScrollState,
    row_counter: u64,
    rng: StdRng,
}

/// The per-frame cell update, borrowed out of the grid so it can run next to
/// the debris physics, which only sees the [`GroundMap`].
pub struct GridUpdate<'a> {
    settings: &'a GridSettings,
    scroll: ScrollState,
    cells: &'a mut [Cell],
}

impl CellGrid {
    pub fn new(settings: GridSettings, seed: u64) -> Self {
        assert!(
            settings.width > 0 && settings.height > 0,
            "grid needs at least one cell"
        );
        let count = settings.cell_count();
        let mut grid = Self {
            ground: GroundMap::new(&settings),
            cells: vec![Cell::default(); count],
            scroll: ScrollState::default(),
            row_counter: 0,
            rng: StdRng::seed_from_u64(seed),
            settings,
        };
        for row in 0..grid.settings.height {
            grid.inject_row(row);
        }
        grid
    }

    /// Accumulates the scroll phase and injects one row for every whole row
    /// crossed, however many that is this frame.
    pub fn advance_scroll(&mut self, dt: f32) -> ScrollState {
        let delta = self.settings.scroll_speed * dt;
        let height = self.settings.height;

        self.scroll.phase += delta;
        self.scroll.delta_rows = delta;
        self.scroll.rows_injected = 0;
        while self.scroll.phase >= 1.0 {
            self.scroll.phase -= 1.0;
            self.scroll.base_position = (self.scroll.base_position + 1) % height;
            let row = (self.scroll.base_position + height - 1) % height;
            self.inject_row(row);
            self.scroll.rows_injected += 1;
        }

        self.ground.scroll = self.scroll;
        self.scroll
    }

    fn inject_row(&mut self, row: usize) {
        let s = &self.settings;
        let bright_probability = s.bright_probability.clamp(0.0, 1.0) as f64;

        for col in 0..s.width {
            let bonus = self.rng.gen_range(0.0f32..=1.0) * s.height_bonus / (col + 1) as f32;
            let hue = (self.row_counter + col as u64) as f32 * s.hue_rate;
            let rgb = if self.rng.gen_bool(bright_probability) {
                hue_color(hue, 0.35, 1.0)
            } else {
                hue_color(hue, 0.7, 0.45)
            };
            let phase = self.rng.gen_range(0.0..TAU);
            let base_height = (s.base_height + bonus).max(s.min_height);

            let index = row * s.width + col;
            self.cells[index] = Cell {
                x: (col as f32 + 0.5) * s.cell_size,
                base_height,
                height: base_height + 0.5 + 0.5 * phase.sin(),
                phase,
                weight: 0,
                color: rgb.extend(1.0),
                flash_time: 0.0,
                magnet_intensity: 0.0,
            };
            self.ground.heights[index] = self.cells[index].height;
            self.ground.magnet[index] = 0.0;
        }
        self.row_counter += 1;
    }

    pub fn split_for_update(&mut self) -> (GridUpdate<'_>, &GroundMap) {
        (
            GridUpdate {
                settings: &self.settings,
                scroll: self.scroll,
                cells: &mut self.cells,
            },
            &self.ground,
        )
    }

    /// Animates the cells without writing instance data anywhere.
    pub fn update(&mut self, dt: f32) {
        self.update_into(dt, MirrorSpans::default());
    }

    /// Animates the cells and writes cell `i` to the `i`-th slot of `mirror`.
    pub fn update_into(&mut self, dt: f32, mirror: MirrorSpans<'_>) {
        self.split_for_update().0.run(dt, mirror);
        self.publish_ground();
    }

    /// Copies the cell tops and magnet state into the ground view.
    pub fn publish_ground(&mut self) {
        for (i, cell) in self.cells.iter().enumerate() {
            self.ground.heights[i] = cell.height;
            self.ground.magnet[i] = cell.magnet_intensity;
        }
    }

    /// Marks every cell swept between two positions of a moving object. Rows
    /// are walked one by one from the row after `prev_pos` up to the row of
    /// `pos`; cells outside the grid are skipped. Returns how many were marked.
    pub fn set_magnet_cell(&mut self, prev_pos: Vec3, pos: Vec3) -> usize {
        let from = self.ground.grid_position(prev_pos).as_dvec2();
        let to = self.ground.grid_position(pos).as_dvec2();
        if !from.is_finite() || !to.is_finite() {
            return 0;
        }
        // rows stay in f64: far off-grid positions are still exact enough to
        // clamp, and nothing here can overflow
        let r0 = from.y.floor();
        let r1 = to.y.floor();
        let (lo, hi) = if r1 > r0 {
            (r0 + 1.0, r1)
        } else if r1 < r0 {
            (r1, r0 - 1.0)
        } else {
            (r1, r1)
        };
        let lo = lo.max(0.0);
        let hi = hi.min(self.settings.height as f64 - 1.0);
        if lo > hi {
            return 0;
        }

        let mut marked = 0;
        for row in lo as usize..=hi as usize {
            let t = if r1 == r0 {
                1.0
            } else {
                (row as f64 - r0) / (r1 - r0)
            };
            let col = (from.x + (to.x - from.x) * t).floor();
            if !(col >= 0.0 && col < self.settings.width as f64) {
                continue;
            }
            let index = self.ground.storage_row(row) * self.settings.width + col as usize;
            self.cells[index].magnet_intensity = 1.0;
            marked += 1;
        }
        marked
    }

    /// Debris landed on `index`: lower it, darken it, count it and flash once.
    pub fn dig(&mut self, index: usize) {
        let s = &self.settings;
        let Some(cell) = self.cells.get_mut(index) else {
            return;
        };
        cell.base_height = (cell.base_height - s.dig_depth).max(s.min_height);
        cell.height = (cell.height - s.dig_depth).max(s.min_height);
        cell.color = (cell.color.truncate() * s.dig_darken).extend(cell.color.w);
        cell.weight += 1;
        if cell.flash_time <= 0.0 {
            cell.flash_time = s.flash_duration;
        }
    }

    pub fn settings(&self) -> &GridSettings {
        &self.settings
    }

    pub fn scroll(&self) -> &ScrollState {
        &self.scroll
    }

    pub fn ground(&self) -> &GroundMap {
        &self.ground
    }

    pub fn cells(&self) -> &[Cell] {
        &self.cells
    }

    pub fn cells_mut(&mut self) -> &mut [Cell] {
        &mut self.cells
    }

    pub fn cell_count(&self) -> usize {
        self.cells.len()
    }

    /// Cell index of (column, logical row), logical row 0 being the nearest.
    pub fn cell_index(&self, col: usize, logical_row: usize) -> usize {
        self.ground.storage_row(logical_row) * self.settings.width + col
    }

    pub fn rows_injected_total(&self) -> u64 {
        self.row_counter
    }
}

impl GridUpdate<'_> {
    /// Animates every cell, one job per row or per window piece of a row, and
    /// writes each cell straight into its mirror slot.
    pub fn run(self, dt: f32, mirror: MirrorSpans<'_>) {
        let GridUpdate {
            settings,
            scroll,
            cells,
        } = self;
        let width = settings.width;
        let height = settings.height;

        slot_jobs(cells, mirror, width)
            .into_par_iter()
            .for_each(|job| {
                let SlotJob {
                    first,
                    items,
                    mut span,
                } = job;
                for (k, cell) in items.iter_mut().enumerate() {
                    let row = (first + k) / width;
                    let logical = (row + height - scroll.base_position) % height;
                    let z = (logical as f32 + 0.5 - scroll.phase) * settings.cell_size;
                    let color = update_cell(cell, dt, settings);
                    if let Some(span) = span.as_mut() {
                        span.write(k, &cell_instance(cell, z, color, settings.cell_size));
                    }
                }
            });
    }
}

fn update_cell(cell: &mut Cell, dt: f32, s: &GridSettings) -> Vec4 {
    let mut height = cell.base_height + 0.5 + 0.5 * cell.phase.sin();
    let mut color = cell.color;

    if cell.magnet_intensity > 0.0 {
        let m = cell.magnet_intensity;
        height += smoothstep(m) * s.magnet_lift;
        color = color.lerp(MAGNET_TINT, m);
        cell.magnet_intensity = (m - s.magnet_decay * dt).max(0.0);
    }

    let speed = if cell.weight > 0 {
        s.weighted_oscillation_speed
    } else {
        s.oscillation_speed
    };
    cell.phase = (cell.phase + speed * dt) % TAU;

    if cell.flash_time > 0.0 {
        let t = if s.flash_duration > 0.0 {
            (cell.flash_time / s.flash_duration).min(1.0)
        } else {
            0.0
        };
        color = color.lerp(FLASH_TINT, t);
        cell.flash_time = (cell.flash_time - dt).max(0.0);
    }

    cell.height = height;
    color
}

fn cell_instance(cell: &Cell, z: f32, color: Vec4, cell_size: f32) -> InstanceData {
    let footprint = cell_size * CELL_GAP;
    let transform = Affine3A::from_scale_rotation_translation(
        Vec3::new(footprint, cell.height, footprint),
        Quat::IDENTITY,
        Vec3::new(cell.x, cell.height * 0.5, z),
    );
    InstanceData::new(&transform, color)
}
