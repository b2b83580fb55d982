use bevy::render::render_resource::{Buffer, BufferDescriptor, BufferUsages};
use bevy::render::renderer::{RenderDevice, RenderQueue};

use crate::error::HostError;
use crate::gpu::backend::{BatchId, BatchMetadata, GpuBackend, GpuBufferId, MemoryBackend};
use crate::gpu::layout::BufferMode;

/// Backend writing straight into bevy's wgpu device through the render queue.
pub struct RenderBackend {
    device: RenderDevice,
    queue: RenderQueue,
    mode: BufferMode,
    buffers: Vec<Option<Buffer>>,
    batches: Vec<Option<BatchMetadata>>,
}

impl RenderBackend {
    pub fn new(device: RenderDevice, queue: RenderQueue) -> Self {
        let limits = device.limits();
        // WebGL2-class devices cannot read storage buffers from shaders
        let mode = if limits.max_storage_buffers_per_shader_stage == 0 {
            BufferMode::ConstantWindows {
                max_window_bytes: limits.max_uniform_buffer_binding_size as usize,
                offset_alignment: limits.min_uniform_buffer_offset_alignment as usize,
            }
        } else {
            BufferMode::Raw
        };
        Self {
            device,
            queue,
            mode,
            buffers: Vec::new(),
            batches: Vec::new(),
        }
    }

    pub fn buffer(&self, id: GpuBufferId) -> Option<&Buffer> {
        self.buffers.get(id.0 as usize)?.as_ref()
    }

    pub fn batch(&self, id: BatchId) -> Option<&BatchMetadata> {
        self.batches.get(id.0 as usize)?.as_ref()
    }
}

impl GpuBackend for RenderBackend {
    fn buffer_mode(&self) -> BufferMode {
        self.mode
    }

    fn create_buffer(&mut self, size_bytes: usize) -> Result<GpuBufferId, HostError> {
        let max = self.device.limits().max_buffer_size;
        if size_bytes as u64 > max {
            return Err(HostError::BufferCreation {
                size: size_bytes,
                reason: format!("device limit is {max} bytes"),
            });
        }
        let usage = match self.mode {
            BufferMode::Raw => BufferUsages::STORAGE | BufferUsages::COPY_DST,
            BufferMode::ConstantWindows { .. } => BufferUsages::UNIFORM | BufferUsages::COPY_DST,
        };
        let buffer = self.device.create_buffer(&BufferDescriptor {
            label: Some("debris_field_instances"),
            size: size_bytes as u64,
            usage,
            mapped_at_creation: false,
        });
        self.buffers.push(Some(buffer));
        Ok(GpuBufferId(self.buffers.len() as u32 - 1))
    }

    fn register_batch(
        &mut self,
        buffer: GpuBufferId,
        metadata: &BatchMetadata,
    ) -> Result<BatchId, HostError> {
        if self.buffer(buffer).is_none() {
            return Err(HostError::BatchRegistration {
                window: metadata.window,
                reason: "unknown buffer".into(),
            });
        }
        if let BufferMode::ConstantWindows {
            offset_alignment, ..
        } = self.mode
        {
            if offset_alignment > 0 && metadata.window_offset % offset_alignment != 0 {
                return Err(HostError::BatchRegistration {
                    window: metadata.window,
                    reason: format!(
                        "offset {} is not aligned to {offset_alignment}",
                        metadata.window_offset
                    ),
                });
            }
        }
        self.batches.push(Some(*metadata));
        Ok(BatchId(self.batches.len() as u32 - 1))
    }

    fn write_buffer(&mut self, buffer: GpuBufferId, byte_offset: usize, data: &[u8]) {
        if let Some(Some(target)) = self.buffers.get(buffer.0 as usize) {
            self.queue.write_buffer(target, byte_offset as u64, data);
        }
    }

    fn remove_batch(&mut self, batch: BatchId) {
        if let Some(slot) = self.batches.get_mut(batch.0 as usize) {
            *slot = None;
        }
    }

    fn destroy_buffer(&mut self, buffer: GpuBufferId) {
        if let Some(slot) = self.buffers.get_mut(buffer.0 as usize) {
            if let Some(buffer) = slot.take() {
                buffer.destroy();
            }
        }
    }
}

/// The backend the plugin runs on: the render device when there is one,
/// plain memory otherwise (headless apps, tests).
pub enum FieldBackend {
    Render(RenderBackend),
    Memory(MemoryBackend),
}

impl FieldBackend {
    pub fn render_buffer(&self, id: GpuBufferId) -> Option<&Buffer> {
        match self {
            FieldBackend::Render(backend) => backend.buffer(id),
            FieldBackend::Memory(_) => None,
        }
    }
}

impl GpuBackend for FieldBackend {
    fn buffer_mode(&self) -> BufferMode {
        match self {
            FieldBackend::Render(b) => b.buffer_mode(),
            FieldBackend::Memory(b) => b.buffer_mode(),
        }
    }

    fn create_buffer(&mut self, size_bytes: usize) -> Result<GpuBufferId, HostError> {
        match self {
            FieldBackend::Render(b) => b.create_buffer(size_bytes),
            FieldBackend::Memory(b) => b.create_buffer(size_bytes),
        }
    }

    fn register_batch(
        &mut self,
        buffer: GpuBufferId,
        metadata: &BatchMetadata,
    ) -> Result<BatchId, HostError> {
        match self {
            FieldBackend::Render(b) => b.register_batch(buffer, metadata),
            FieldBackend::Memory(b) => b.register_batch(buffer, metadata),
        }
    }

    fn write_buffer(&mut self, buffer: GpuBufferId, byte_offset: usize, data: &[u8]) {
        match self {
            FieldBackend::Render(b) => b.write_buffer(buffer, byte_offset, data),
            FieldBackend::Memory(b) => b.write_buffer(buffer, byte_offset, data),
        }
    }

    fn remove_batch(&mut self, batch: BatchId) {
        match self {
            FieldBackend::Render(b) => b.remove_batch(batch),
            FieldBackend::Memory(b) => b.remove_batch(batch),
        }
    }

    fn destroy_buffer(&mut self, buffer: GpuBufferId) {
        match self {
            FieldBackend::Render(b) => b.destroy_buffer(buffer),
            FieldBackend::Memory(b) => b.destroy_buffer(buffer),
        }
    }
}
