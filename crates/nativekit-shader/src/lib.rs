//! # NativeKit Shader
//!
//! Compiles GLSL vertex/fragment pairs into the shader binaries consumed by
//! [`nativekit_gpu::GpuBackend::create_shader`].
//!
//! The pipeline is parse, validate, link check, reflect, translate. Parsing,
//! validation and translation are delegated to `naga`; this crate owns the
//! reflection rules and the binary assembly.

use nativekit_gpu::{GpuError, ShaderStage};
use serde::{Deserialize, Serialize};
use thiserror::Error;

mod binary;
mod compiler;
pub mod conventions;
pub mod reflect;

pub use compiler::{CompiledProgram, CompiledShader, ShaderCompiler};
pub use conventions::{canonical_attribute_name, negate_derivative_y};
pub use reflect::{SamplerInfo, StageInput, StageReflection, UniformBlock, UniformMember};

/// Errors raised while compiling a program.
#[derive(Error, Debug)]
pub enum ShaderError {
    #[error("{stage:?} shader failed to parse: {message}")]
    Parse { stage: ShaderStage, message: String },

    #[error("{stage:?} shader failed validation: {message}")]
    Validation { stage: ShaderStage, message: String },

    #[error("Program failed to link: {0}")]
    Link(String),

    #[error("{stage:?} shader failed to translate: {message}")]
    Translate { stage: ShaderStage, message: String },

    #[error("Uniform '{name}' is not supported: {reason}")]
    UnsupportedUniform { name: String, reason: &'static str },

    #[error("{stage:?} shader declares {count} uniform blocks, at most one is allowed")]
    TooManyUniformBlocks { stage: ShaderStage, count: usize },

    #[error("Vertex input '{name}' uses unknown location {location}")]
    UnknownAttributeLocation { name: String, location: u32 },

    #[error(transparent)]
    Binary(#[from] GpuError),
}

pub type Result<T> = std::result::Result<T, ShaderError>;

/// Native payload carried in the shader binary.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ShaderTarget {
    /// SPIR-V words, little endian.
    #[default]
    SpirV,
    /// Desktop GLSL 430 source text.
    Glsl,
    /// GLSL ES 300 source text.
    GlslEs,
}
