use bevy::log::{debug, info};
use glam::Vec4;
use rayon::prelude::*;

use crate::error::{InstanceBufferError, LayoutError};
use crate::gpu::backend::{BatchId, BatchMetadata, GpuBackend, GpuBufferId};
use crate::gpu::batches::{DrawBatchList, build_draw_batches};
use crate::gpu::ffi::InstanceData;
use crate::gpu::layout::WindowLayout;

const VEC4_BYTES: usize = 16;

// ==================== resources ======================================

struct GpuState {
    layout: WindowLayout,
    buffer: GpuBufferId,
    batches: Vec<BatchId>,
    sysmem: Vec<Vec4>,
    casts_shadows: bool,
}

/// Owns the GPU-resident instance buffer, its CPU mirror and one registered
/// batch per window.
pub struct InstanceBufferManager<B: GpuBackend> {
    backend: B,
    state: Option<GpuState>,
}

/// Writable view of the CPU mirror. Writers only need the window layout to
/// place their slots.
pub struct SysmemBuffer<'a> {
    pub data: &'a mut [Vec4],
    pub layout: &'a WindowLayout,
}

// =====================================================================

impl<B: GpuBackend> InstanceBufferManager<B> {
    pub fn new(backend: B) -> Self {
        Self {
            backend,
            state: None,
        }
    }

    pub fn init(
        &mut self,
        max_instances: usize,
        instance_bytes: usize,
        casts_shadows: bool,
    ) -> Result<(), InstanceBufferError> {
        if self.state.is_some() {
            return Err(InstanceBufferError::AlreadyInitialized);
        }
        if instance_bytes != std::mem::size_of::<InstanceData>() {
            return Err(LayoutError::InvalidInstanceSize(instance_bytes).into());
        }

        let layout =
            WindowLayout::compute(max_instances, instance_bytes, self.backend.buffer_mode())?;
        let buffer = self.backend.create_buffer(layout.total_bytes())?;

        let mut batches = Vec::with_capacity(layout.window_count);
        for window in 0..layout.window_count {
            let metadata = BatchMetadata {
                window,
                window_offset: window * layout.window_bytes,
                window_bytes: layout.window_bytes,
                object_to_world_offset: layout.transform_out_offset() * VEC4_BYTES,
                world_to_object_offset: layout.transform_in_offset() * VEC4_BYTES,
                color_offset: layout.color_offset() * VEC4_BYTES,
            };
            match self.backend.register_batch(buffer, &metadata) {
                Ok(id) => batches.push(id),
                Err(err) => {
                    // undo the partial registration, the caller will not retry
                    for id in batches {
                        self.backend.remove_batch(id);
                    }
                    self.backend.destroy_buffer(buffer);
                    return Err(err.into());
                }
            }
        }

        info!(
            "instance buffer ready: {} instances, {} window(s) of {} bytes, {} per window ({:?})",
            max_instances,
            layout.window_count,
            layout.window_bytes,
            layout.max_per_window,
            layout.mode
        );

        self.state = Some(GpuState {
            layout,
            buffer,
            batches,
            sysmem: vec![Vec4::ZERO; layout.total_vec4s()],
            casts_shadows,
        });
        Ok(())
    }

    /// Uploads every full window in one copy, then the three sub-regions of the
    /// partially filled tail window sized to the tail count.
    pub fn upload_gpu_data(&mut self, instance_count: usize) -> Result<(), InstanceBufferError> {
        let Self { backend, state } = self;
        let state = state.as_ref().ok_or(InstanceBufferError::NotInitialized)?;
        let layout = &state.layout;
        if instance_count > layout.max_instances {
            return Err(InstanceBufferError::TooManyInstances {
                requested: instance_count,
                max: layout.max_instances,
            });
        }

        let bytes: &[u8] = bytemuck::cast_slice(&state.sysmem);

        let full_windows = instance_count / layout.max_per_window;
        if full_windows > 0 {
            let len = full_windows * layout.window_bytes;
            backend.write_buffer(state.buffer, 0, &bytes[..len]);
        }

        let tail = instance_count - full_windows * layout.max_per_window;
        if tail > 0 {
            let window_start = full_windows * layout.window_bytes;
            let regions = [
                (layout.transform_out_offset(), tail * 3),
                (layout.transform_in_offset(), tail * 3),
                (layout.color_offset(), tail),
            ];
            for (offset, vec4s) in regions {
                let start = window_start + offset * VEC4_BYTES;
                let end = start + vec4s * VEC4_BYTES;
                backend.write_buffer(state.buffer, start, &bytes[start..end]);
            }
        }

        debug!(
            "uploaded {} instances ({} full window(s), tail {})",
            instance_count, full_windows, tail
        );
        Ok(())
    }

    pub fn shutdown(&mut self) {
        let Some(state) = self.state.take() else {
            return;
        };
        for id in state.batches {
            self.backend.remove_batch(id);
        }
        self.backend.destroy_buffer(state.buffer);
        info!("instance buffer released");
    }

    pub fn sysmem_buffer_mut(&mut self) -> Result<SysmemBuffer<'_>, InstanceBufferError> {
        let state = self
            .state
            .as_mut()
            .ok_or(InstanceBufferError::NotInitialized)?;
        Ok(SysmemBuffer {
            data: &mut state.sysmem,
            layout: &state.layout,
        })
    }

    pub fn sysmem(&self) -> Option<&[Vec4]> {
        self.state.as_ref().map(|s| s.sysmem.as_slice())
    }

    /// Host callback answer: one batch per populated window, no culling.
    pub fn draw_batches(&self, instance_count: usize) -> DrawBatchList {
        match &self.state {
            Some(state) => build_draw_batches(
                instance_count,
                &state.layout,
                &state.batches,
                state.casts_shadows,
            ),
            None => DrawBatchList::default(),
        }
    }

    pub fn is_initialized(&self) -> bool {
        self.state.is_some()
    }

    pub fn layout(&self) -> Option<&WindowLayout> {
        self.state.as_ref().map(|s| &s.layout)
    }

    pub fn gpu_buffer(&self) -> Option<GpuBufferId> {
        self.state.as_ref().map(|s| s.buffer)
    }

    pub fn batch_ids(&self) -> &[BatchId] {
        match &self.state {
            Some(state) => &state.batches,
            None => &[],
        }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }
}

impl<B: GpuBackend> Drop for InstanceBufferManager<B> {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl<'a> SysmemBuffer<'a> {
    /// Distance between two windows, in vec4.
    pub fn window_stride(&self) -> usize {
        self.layout.window_vec4s()
    }

    pub fn read_slot(&self, slot: usize) -> InstanceData {
        let layout = self.layout;
        let (window, local) = layout.locate(slot);
        let base = window * self.window_stride();
        let out = base + layout.transform_out_offset() + local * 3;
        let inv = base + layout.transform_in_offset() + local * 3;
        InstanceData {
            object_to_world: [self.data[out], self.data[out + 1], self.data[out + 2]],
            world_to_object: [self.data[inv], self.data[inv + 1], self.data[inv + 2]],
            color: self.data[base + layout.color_offset() + local],
        }
    }

    /// Hands the whole mirror out as disjoint slot spans, one per window.
    pub fn into_spans(self) -> MirrorSpans<'a> {
        let stride = self.window_stride();
        window_spans(self.data, self.layout, stride)
    }

    /// Scatters `instances` into consecutive slots starting at `first_slot`.
    /// Windows are filled in parallel; slots past the buffer capacity are dropped.
    pub fn write_instances(&mut self, first_slot: usize, instances: &[InstanceData]) {
        let stride = self.window_stride();
        let (_, tail) = window_spans(&mut *self.data, self.layout, stride).split_at_slot(first_slot);
        let target = tail.truncate(instances.len());

        target.spans.into_par_iter().for_each(|mut span| {
            let offset = span.first_slot() - first_slot;
            for local in 0..span.len() {
                span.write(local, &instances[offset + local]);
            }
        });
    }
}

fn window_spans<'s>(data: &'s mut [Vec4], layout: &WindowLayout, stride: usize) -> MirrorSpans<'s> {
    let per = layout.max_per_window;
    let spans = data
        .chunks_mut(stride)
        .enumerate()
        .filter_map(|(window, chunk)| {
            let live = layout.instances_in_window(window, layout.max_instances);
            if live == 0 {
                return None;
            }
            let (object_to_world, rest) = chunk.split_at_mut(layout.transform_in_offset());
            let (world_to_object, rest) = rest.split_at_mut(per * 3);
            let (colors, _) = rest.split_at_mut(per);
            Some(
                MirrorSpan {
                    first_slot: window * per,
                    object_to_world,
                    world_to_object,
                    colors,
                }
                .split_at(live)
                .0,
            )
        })
        .collect();
    MirrorSpans { spans }
}

// ==================== mirror spans ===================================

/// Consecutive slots of one window, with its three regions cut to match.
#[derive(Debug)]
pub struct MirrorSpan<'a> {
    first_slot: usize,
    object_to_world: &'a mut [Vec4],
    world_to_object: &'a mut [Vec4],
    colors: &'a mut [Vec4],
}

impl<'a> MirrorSpan<'a> {
    pub fn first_slot(&self) -> usize {
        self.first_slot
    }

    pub fn len(&self) -> usize {
        self.colors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.colors.is_empty()
    }

    pub fn split_at(self, n: usize) -> (Self, Self) {
        let Self {
            first_slot,
            object_to_world,
            world_to_object,
            colors,
        } = self;
        let n = n.min(colors.len());
        let (out_head, out_tail) = object_to_world.split_at_mut(n * 3);
        let (inv_head, inv_tail) = world_to_object.split_at_mut(n * 3);
        let (color_head, color_tail) = colors.split_at_mut(n);
        (
            Self {
                first_slot,
                object_to_world: out_head,
                world_to_object: inv_head,
                colors: color_head,
            },
            Self {
                first_slot: first_slot + n,
                object_to_world: out_tail,
                world_to_object: inv_tail,
                colors: color_tail,
            },
        )
    }

    /// `local` counts from the span's first slot.
    #[inline]
    pub fn write(&mut self, local: usize, instance: &InstanceData) {
        self.object_to_world[local * 3..local * 3 + 3].copy_from_slice(&instance.object_to_world);
        self.world_to_object[local * 3..local * 3 + 3].copy_from_slice(&instance.world_to_object);
        self.colors[local] = instance.color;
    }
}

/// An ordered run of slots over the mirror, possibly crossing windows.
#[derive(Debug, Default)]
pub struct MirrorSpans<'a> {
    spans: Vec<MirrorSpan<'a>>,
}

impl<'a> MirrorSpans<'a> {
    pub fn spans(&self) -> &[MirrorSpan<'a>] {
        &self.spans
    }

    pub fn first_slot(&self) -> Option<usize> {
        self.spans.first().map(|s| s.first_slot)
    }

    pub fn slot_count(&self) -> usize {
        self.spans.iter().map(|s| s.len()).sum()
    }

    /// Slots below `slot` and the rest.
    pub fn split_at_slot(self, slot: usize) -> (Self, Self) {
        let mut head = Vec::new();
        let mut tail = Vec::new();
        for span in self.spans {
            let end = span.first_slot + span.len();
            if end <= slot {
                head.push(span);
            } else if span.first_slot >= slot {
                tail.push(span);
            } else {
                let mid = slot - span.first_slot;
                let (a, b) = span.split_at(mid);
                head.push(a);
                tail.push(b);
            }
        }
        (Self { spans: head }, Self { spans: tail })
    }

    /// Keeps the first `slots` slots.
    pub fn truncate(self, slots: usize) -> Self {
        match self.first_slot() {
            Some(first) => self.split_at_slot(first + slots).0,
            None => self,
        }
    }

    /// Splits further so that no span is longer than `max_len`.
    pub fn chunked(self, max_len: usize) -> Vec<MirrorSpan<'a>> {
        let max_len = max_len.max(1);
        let mut out = Vec::with_capacity(self.spans.len());
        for mut span in self.spans {
            while span.len() > max_len {
                let (head, tail) = span.split_at(max_len);
                out.push(head);
                span = tail;
            }
            if !span.is_empty() {
                out.push(span);
            }
        }
        out
    }
}

/// A parallel job: `items[k]` is element `first + k` of the caller's array and
/// writes to `span` slot `k`, when it has a slot at all.
pub struct SlotJob<'d, 'm, T> {
    pub first: usize,
    pub items: &'d mut [T],
    pub span: Option<MirrorSpan<'m>>,
}

/// Cuts `items` into jobs of at most `chunk` elements, item `i` going to the
/// `i`-th slot of `mirror`. Items past the end of the mirror get jobs without
/// a span.
pub fn slot_jobs<'d, 'm, T>(
    items: &'d mut [T],
    mirror: MirrorSpans<'m>,
    chunk: usize,
) -> Vec<SlotJob<'d, 'm, T>> {
    let chunk = chunk.max(1);
    let mirror = mirror.truncate(items.len());
    let mut jobs = Vec::with_capacity(items.len().div_ceil(chunk) + mirror.spans.len());

    let mut first = 0;
    let mut rest = items;
    for span in mirror.chunked(chunk) {
        let (head, tail) = std::mem::take(&mut rest).split_at_mut(span.len());
        let len = head.len();
        jobs.push(SlotJob {
            first,
            items: head,
            span: Some(span),
        });
        first += len;
        rest = tail;
    }
    for items in rest.chunks_mut(chunk) {
        let len = items.len();
        jobs.push(SlotJob {
            first,
            items,
            span: None,
        });
        first += len;
    }
    jobs
}
