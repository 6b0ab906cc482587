//! # NativeKit GPU
//!
//! The contract of the low-level GPU command-buffer library that the
//! rendering layer translates into, plus an in-memory implementation.
//!
//! ## Features
//!
//! - [`GpuBackend`]: view-based resource and submission API
//! - Typed handles with a sum type per buffer kind ([`IndexBuffer`], [`VertexBuffer`])
//! - Render state, sampler, clear and discard bit flags
//! - [`ShaderBinary`] container with its uniform table
//! - [`DiagnosticsSink`] for trace, fatal and screenshot callbacks
//! - [`RecordingBackend`] that records every command for inspection

use thiserror::Error;

pub mod backend;
pub mod caps;
pub mod diagnostics;
pub mod flags;
pub mod handles;
pub mod layout;
pub mod memory;
pub mod recording;
pub mod shader_binary;

pub use backend::{GpuBackend, UniformDesc, ALL_ELEMENTS};
pub use caps::{Capabilities, Stats, TextureDesc, TextureFormat, TextureKind, ViewRect};
pub use diagnostics::{DiagnosticsSink, FatalCode, Screenshot};
pub use flags::{BlendFactor, BufferFlags, ClearFlags, DiscardFlags, ResetFlags, SamplerFlags, StateFlags};
pub use handles::{
    DynamicIndexBufferHandle, DynamicVertexBufferHandle, FrameBufferHandle, IndexBuffer,
    IndexBufferHandle, ProgramHandle, Resource, ShaderHandle, TextureHandle, UniformHandle,
    VertexBuffer, VertexBufferHandle, VertexLayoutHandle, ViewId,
};
pub use layout::{Attrib, AttribType, VertexAttribute, VertexLayout};
pub use memory::Memory;
pub use recording::{Command, DrawCall, RecordingBackend};
pub use shader_binary::{ShaderBinary, ShaderStage, UniformEntry, UniformType};

/// Errors reported by a GPU backend.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GpuError {
    #[error("Invalid shader binary: {0}")]
    InvalidShader(String),

    #[error("Unknown {kind} handle {index}")]
    UnknownHandle { kind: &'static str, index: u16 },

    #[error("Out of {0} handles")]
    HandlesExhausted(&'static str),

    #[error("Texture data is {actual} bytes, expected {expected}")]
    InvalidTextureData { expected: usize, actual: usize },

    #[error("Texture size {0} exceeds the maximum")]
    TextureTooLarge(u32),

    #[error("Invalid frame buffer: {0}")]
    InvalidFrameBuffer(String),

    #[error("Update out of range: {0}")]
    OutOfRange(String),
}

impl GpuError {
    pub fn invalid_shader(message: impl Into<String>) -> Self {
        Self::InvalidShader(message.into())
    }
}
