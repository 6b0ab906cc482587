//! Engine configuration.

use nativekit_gpu::ResetFlags;
use nativekit_shader::ShaderTarget;
use serde::{Deserialize, Serialize};

/// Engine configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Initial back buffer width.
    pub width: u32,
    /// Initial back buffer height.
    pub height: u32,
    /// Worker threads for decode stages; `None` uses one per core.
    pub worker_threads: Option<usize>,
    /// Payload of compiled shader binaries.
    pub shader_target: ShaderTarget,
    pub reset: ResetConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            width: 1280,
            height: 720,
            worker_threads: None,
            shader_target: ShaderTarget::default(),
            reset: ResetConfig::default(),
        }
    }
}

impl EngineConfig {
    pub fn with_size(mut self, width: u32, height: u32) -> Self {
        self.width = width;
        self.height = height;
        self
    }

    pub fn with_worker_threads(mut self, threads: usize) -> Self {
        self.worker_threads = Some(threads);
        self
    }
}

/// Back buffer reset options.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResetConfig {
    pub vsync: bool,
    /// 4x multisampling.
    pub msaa: bool,
    pub max_anisotropy: bool,
}

impl Default for ResetConfig {
    fn default() -> Self {
        Self {
            vsync: true,
            msaa: true,
            max_anisotropy: true,
        }
    }
}

impl ResetConfig {
    pub fn flags(&self) -> ResetFlags {
        let mut flags = ResetFlags::empty();
        flags.set(ResetFlags::VSYNC, self.vsync);
        flags.set(ResetFlags::MSAA_X4, self.msaa);
        flags.set(ResetFlags::MAX_ANISOTROPY, self.max_anisotropy);
        flags
    }
}
