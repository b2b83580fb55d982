use crate::error::HostError;
use crate::gpu::layout::BufferMode;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct GpuBufferId(pub u32);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct BatchId(pub u32);

/// Per-instance property bindings of one window, byte offsets relative to the
/// window start.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BatchMetadata {
    pub window: usize,
    pub window_offset: usize,
    pub window_bytes: usize,
    pub object_to_world_offset: usize,
    pub world_to_object_offset: usize,
    pub color_offset: usize,
}

/// What the core needs from the renderer hosting it.
pub trait GpuBackend: Send + Sync + 'static {
    fn buffer_mode(&self) -> BufferMode;

    fn create_buffer(&mut self, size_bytes: usize) -> Result<GpuBufferId, HostError>;

    fn register_batch(
        &mut self,
        buffer: GpuBufferId,
        metadata: &BatchMetadata,
    ) -> Result<BatchId, HostError>;

    fn write_buffer(&mut self, buffer: GpuBufferId, byte_offset: usize, data: &[u8]);

    fn remove_batch(&mut self, batch: BatchId);

    fn destroy_buffer(&mut self, buffer: GpuBufferId);
}

/// A byte range written by [`GpuBackend::write_buffer`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct WriteRecord {
    pub buffer: GpuBufferId,
    pub byte_offset: usize,
    pub len: usize,
}

/// Headless backend: buffers are plain byte vectors and every write is logged.
#[derive(Debug)]
pub struct MemoryBackend {
    mode: BufferMode,
    buffers: Vec<Option<Vec<u8>>>,
    batches: Vec<Option<BatchMetadata>>,
    pub writes: Vec<WriteRecord>,
    // registration fails once this many batches exist
    pub batch_limit: Option<usize>,
}

impl MemoryBackend {
    pub fn new(mode: BufferMode) -> Self {
        Self {
            mode,
            buffers: Vec::new(),
            batches: Vec::new(),
            writes: Vec::new(),
            batch_limit: None,
        }
    }

    pub fn raw() -> Self {
        Self::new(BufferMode::Raw)
    }

    /// Mimics a uniform-buffer-only device (64 KiB windows, 256 byte offsets).
    pub fn constant_windows() -> Self {
        Self::new(BufferMode::ConstantWindows {
            max_window_bytes: 64 * 1024,
            offset_alignment: 256,
        })
    }

    pub fn buffer(&self, id: GpuBufferId) -> Option<&[u8]> {
        self.buffers.get(id.0 as usize)?.as_deref()
    }

    pub fn batch(&self, id: BatchId) -> Option<&BatchMetadata> {
        self.batches.get(id.0 as usize)?.as_ref()
    }

    pub fn live_buffers(&self) -> usize {
        self.buffers.iter().filter(|b| b.is_some()).count()
    }

    pub fn live_batches(&self) -> usize {
        self.batches.iter().filter(|b| b.is_some()).count()
    }

    pub fn clear_writes(&mut self) {
        self.writes.clear();
    }
}

impl GpuBackend for MemoryBackend {
    fn buffer_mode(&self) -> BufferMode {
        self.mode
    }

    fn create_buffer(&mut self, size_bytes: usize) -> Result<GpuBufferId, HostError> {
        self.buffers.push(Some(vec![0; size_bytes]));
        Ok(GpuBufferId(self.buffers.len() as u32 - 1))
    }

    fn register_batch(
        &mut self,
        _buffer: GpuBufferId,
        metadata: &BatchMetadata,
    ) -> Result<BatchId, HostError> {
        if self.batch_limit.is_some_and(|limit| self.live_batches() >= limit) {
            return Err(HostError::BatchRegistration {
                window: metadata.window,
                reason: "batch limit reached".into(),
            });
        }
        self.batches.push(Some(*metadata));
        Ok(BatchId(self.batches.len() as u32 - 1))
    }

    fn write_buffer(&mut self, buffer: GpuBufferId, byte_offset: usize, data: &[u8]) {
        let Some(Some(bytes)) = self.buffers.get_mut(buffer.0 as usize) else {
            return;
        };
        bytes[byte_offset..byte_offset + data.len()].copy_from_slice(data);
        self.writes.push(WriteRecord {
            buffer,
            byte_offset,
            len: data.len(),
        });
    }

    fn remove_batch(&mut self, batch: BatchId) {
        if let Some(slot) = self.batches.get_mut(batch.0 as usize) {
            *slot = None;
        }
    }

    fn destroy_buffer(&mut self, buffer: GpuBufferId) {
        if let Some(slot) = self.buffers.get_mut(buffer.0 as usize) {
            *slot = None;
        }
    }
}
