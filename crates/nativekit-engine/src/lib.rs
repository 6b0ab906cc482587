//! # NativeKit Engine
//!
//! The rendering command and resource layer. A scripting front end drives
//! [`NativeEngine`] through a flat, WebGL-like vocabulary (create, bind, set,
//! draw); the engine translates it into [`GpuBackend`] calls.
//!
//! ## Features
//!
//! - **Programs**: GLSL pairs compiled to shader binaries, uniforms resolved by name
//! - **Uniform batching**: values staged per program and pushed at draw time
//! - **Buffers**: index buffers created eagerly, vertex buffers finalized once
//!   their layout is recorded
//! - **Textures**: decode and mip generation on the worker pool, upload on the
//!   render thread
//! - **Frame buffers**: one fresh view id per bind or viewport within a frame
//! - **Render state**: cull, depth, color write and blend modes as a bitmask
//!
//! ## Threading
//!
//! The engine belongs to the render thread. Background stages post their
//! results through the render queue, which [`NativeEngine::tick`] drains.
//!
//! [`GpuBackend`]: nativekit_gpu::GpuBackend

use nativekit_common::{ErrorCategory, NativeKitError};
use nativekit_gpu::GpuError;
use nativekit_image::ImageError;
use nativekit_shader::ShaderError;
use nativekit_tasks::TaskError;
use thiserror::Error;

pub mod buffers;
pub mod config;
mod engine;
pub mod framebuffer;
mod ids;
pub mod program;
pub mod state;
pub mod texture;

pub use buffers::IndexData;
pub use config::{EngineConfig, ResetConfig};
pub use engine::NativeEngine;
pub use framebuffer::ViewClearState;
pub use ids::{FrameBufferId, IndexBufferId, ProgramId, TextureId, VertexArrayId, VertexBufferId};
pub use program::UniformInfo;
pub use state::{AlphaMode, FillMode};

// ==================== Errors ====================

/// Errors raised by engine operations.
#[derive(Error, Debug)]
pub enum EngineError {
    #[error(transparent)]
    Shader(#[from] ShaderError),

    #[error(transparent)]
    Gpu(#[from] GpuError),

    #[error(transparent)]
    Image(#[from] ImageError),

    #[error(transparent)]
    Task(#[from] TaskError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Cannot update a non-dynamic {kind} buffer")]
    NonDynamicUpdate { kind: &'static str },

    #[error("Unsupported vertex attribute type {0:#06x}")]
    UnsupportedAttribType(u32),

    #[error("Unsupported fill mode {0}")]
    UnsupportedFillMode(u32),

    #[error("Unknown blend mode {0}")]
    UnknownBlendMode(u32),

    #[error("Unknown sampling mode {0}")]
    UnknownSamplingMode(u32),

    #[error("Unknown wrap mode {0}")]
    UnknownWrapMode(u32),

    #[error("Unknown frame buffer format {0}")]
    UnknownTextureFormat(u32),

    #[error("Invalid frame buffer configuration: {0}")]
    InvalidFrameBufferConfig(&'static str),

    #[error("Unknown {kind} {id}")]
    NotFound { kind: &'static str, id: u32 },

    #[error("No program is bound")]
    NoProgramBound,

    #[error("Frame buffer {0} is not the bound target")]
    FrameBufferNotBound(u32),

    #[error("Screenshot was not delivered")]
    ScreenshotUnavailable,

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
}

impl EngineError {
    pub(crate) fn not_found(kind: &'static str, id: u32) -> Self {
        Self::NotFound { kind, id }
    }

    pub(crate) fn invalid(message: impl Into<String>) -> Self {
        Self::InvalidArgument(message.into())
    }
}

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, EngineError>;

impl From<EngineError> for NativeKitError {
    fn from(err: EngineError) -> Self {
        let category = match &err {
            EngineError::Shader(_) => ErrorCategory::Shader,
            EngineError::Image(_) => ErrorCategory::Image,
            EngineError::Io(_) => ErrorCategory::Io,
            EngineError::Task(task) if task.is_cancelled() => return NativeKitError::cancelled(),
            EngineError::Task(TaskError::Panicked(_)) => return NativeKitError::internal(err.to_string()),
            EngineError::NotFound { .. } => ErrorCategory::NotFound,
            EngineError::InvalidArgument(_) => ErrorCategory::InvalidArgument,
            _ => ErrorCategory::Gpu,
        };
        NativeKitError::new(category, err.to_string()).with_source(err)
    }
}

// ==================== Constants ====================

/// Numeric constants of the scripting vocabulary.
pub mod constants {
    // Vertex attribute component types
    pub const UNSIGNED_BYTE: u32 = 0x1401;
    pub const SHORT: u32 = 0x1402;
    pub const FLOAT: u32 = 0x1406;

    // Fill modes
    pub const TRIANGLE_FILL_MODE: u32 = 0;
    pub const WIREFRAME_FILL_MODE: u32 = 1;
    pub const POINT_FILL_MODE: u32 = 2;
    pub const POINT_LIST_DRAW_MODE: u32 = 3;
    pub const LINE_LIST_DRAW_MODE: u32 = 4;
    pub const LINE_LOOP_DRAW_MODE: u32 = 5;
    pub const LINE_STRIP_DRAW_MODE: u32 = 6;
    pub const TRIANGLE_STRIP_DRAW_MODE: u32 = 7;
    pub const TRIANGLE_FAN_DRAW_MODE: u32 = 8;

    // Clear bits
    pub const CLEAR_COLOR: u16 = 0x1;
    pub const CLEAR_DEPTH: u16 = 0x2;
    pub const CLEAR_STENCIL: u16 = 0x4;

    // Texture address modes
    pub const TEXTURE_WRAP_ADDRESSMODE: u32 = 0;
    pub const TEXTURE_CLAMP_ADDRESSMODE: u32 = 1;
    pub const TEXTURE_MIRROR_ADDRESSMODE: u32 = 2;

    // Frame buffer color formats
    pub const TEXTURETYPE_UNSIGNED_INT: u32 = 0;
    pub const TEXTURETYPE_FLOAT: u32 = 1;
}
