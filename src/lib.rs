//! Instanced environment grid and debris simulation feeding a single shared
//! GPU instance buffer.

pub mod config;
pub mod error;
pub mod plugin;

pub mod cpu {
    pub mod counters;
    pub mod field;
    pub mod grid;
    pub mod particles;
}

pub mod gpu {
    pub mod backend;
    pub mod batches;
    pub mod buffers;
    pub mod ffi;
    pub mod layout;
    pub mod render_backend;
}

pub use config::FieldSettings;
pub use cpu::field::{DebrisField, FrameReport};
pub use plugin::{DebrisFieldPlugin, ExplosionRequest, MagnetSweep};
