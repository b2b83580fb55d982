use glam::Vec3;

use crate::gpu::backend::BatchId;
use crate::gpu::layout::WindowLayout;

/// Bounds handed to the host for this content. Infinite, so it is never culled.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct WorldBounds {
    pub center: Vec3,
    pub extents: Vec3,
}

impl WorldBounds {
    pub const UNBOUNDED: Self = Self {
        center: Vec3::ZERO,
        extents: Vec3::INFINITY,
    };
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DrawBatch {
    pub batch: BatchId,
    pub window: usize,
    /// Offset into [`DrawBatchList::visible_instances`].
    pub visible_offset: usize,
    pub instance_count: usize,
    pub casts_shadows: bool,
}

#[derive(Clone, Debug, PartialEq)]
pub struct DrawBatchList {
    pub batches: Vec<DrawBatch>,
    /// Window-local instance indices shared by every batch: 0, 1, 2, ...
    pub visible_instances: Vec<u32>,
    pub bounds: WorldBounds,
}

impl Default for DrawBatchList {
    fn default() -> Self {
        Self {
            batches: Vec::new(),
            visible_instances: Vec::new(),
            bounds: WorldBounds::UNBOUNDED,
        }
    }
}

impl DrawBatchList {
    pub fn total_instances(&self) -> usize {
        self.batches.iter().map(|b| b.instance_count).sum()
    }
}

/// One draw batch per window holding live instances. Pure: no culling, no sorting.
pub fn build_draw_batches(
    instance_count: usize,
    layout: &WindowLayout,
    batch_ids: &[BatchId],
    casts_shadows: bool,
) -> DrawBatchList {
    let instance_count = instance_count.min(layout.max_instances);
    let window_count = instance_count.div_ceil(layout.max_per_window);
    let visible_len = instance_count.min(layout.max_per_window);

    let batches = batch_ids
        .iter()
        .take(window_count)
        .enumerate()
        .map(|(window, &batch)| DrawBatch {
            batch,
            window,
            visible_offset: 0,
            instance_count: layout.instances_in_window(window, instance_count),
            casts_shadows,
        })
        .collect();

    DrawBatchList {
        batches,
        visible_instances: (0..visible_len as u32).collect(),
        bounds: WorldBounds::UNBOUNDED,
    }
}
