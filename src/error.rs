use thiserror::Error;

/// Failures reported by a [`GpuBackend`](crate::gpu::backend::GpuBackend).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HostError {
    #[error("failed to create a {size} byte GPU buffer: {reason}")]
    BufferCreation { size: usize, reason: String },

    #[error("failed to register batch for window {window}: {reason}")]
    BatchRegistration { window: usize, reason: String },
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LayoutError {
    #[error("instance buffer needs at least one instance")]
    NoInstances,

    #[error("per-instance size must be a non-zero multiple of 16 bytes, got {0}")]
    InvalidInstanceSize(usize),

    #[error("one instance ({instance_bytes} bytes) does not fit a {window_bytes} byte window")]
    InstanceTooLarge {
        instance_bytes: usize,
        window_bytes: usize,
    },
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum InstanceBufferError {
    #[error(transparent)]
    Layout(#[from] LayoutError),

    #[error(transparent)]
    Host(#[from] HostError),

    #[error("instance buffer is already initialized")]
    AlreadyInitialized,

    #[error("instance buffer is not initialized")]
    NotInitialized,

    #[error("{requested} instances requested but the buffer holds {max}")]
    TooManyInstances { requested: usize, max: usize },
}
