//! Command scripts and their replay over the recording backend.
//!
//! A script is a JSON document with an optional engine configuration and a
//! list of steps. Resources are created under a name and referred to by that
//! name in later steps.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use nativekit_engine::{
    constants, EngineConfig, EngineError, FrameBufferId, IndexBufferId, IndexData, NativeEngine, ProgramId,
    TextureId, UniformInfo, VertexArrayId, VertexBufferId,
};
use nativekit_common::{ErrorCategory, NativeKitError};
use nativekit_gpu::{Capabilities, Command, DiagnosticsSink, RecordingBackend};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

/// How long a texture load may take before the replay gives up.
const LOAD_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Error, Debug)]
pub enum ReplayError {
    #[error("IO error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid script: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Step {step}: {source}")]
    Engine {
        step: usize,
        #[source]
        source: EngineError,
    },

    #[error("Step {step}: unknown {kind} '{name}'")]
    UnknownName {
        step: usize,
        kind: &'static str,
        name: String,
    },

    #[error("Step {step}: program has no uniform '{name}'")]
    UnknownUniform { step: usize, name: String },

    #[error("Step {step}: no program is set")]
    NoProgram { step: usize },

    #[error("Step {step}: {len} values do not match any uniform setter")]
    UniformArity { step: usize, len: usize },

    #[error("Step {step}: texture load failed: {message}")]
    Load { step: usize, message: String },

    #[error("Step {step}: texture load timed out")]
    LoadTimeout { step: usize },
}

pub type Result<T> = std::result::Result<T, ReplayError>;

impl From<ReplayError> for NativeKitError {
    fn from(err: ReplayError) -> Self {
        if let ReplayError::Engine { step, source } = err {
            let inner = NativeKitError::from(source);
            return NativeKitError::new(inner.category(), format!("step {step}: {}", inner.message()))
                .with_source(inner);
        }
        let category = match &err {
            ReplayError::Engine { .. } => ErrorCategory::Gpu,
            ReplayError::Io { .. } => ErrorCategory::Io,
            ReplayError::Parse(_) | ReplayError::NoProgram { .. } | ReplayError::UniformArity { .. } => {
                ErrorCategory::InvalidArgument
            }
            ReplayError::UnknownName { .. } | ReplayError::UnknownUniform { .. } => ErrorCategory::NotFound,
            ReplayError::Load { .. } => ErrorCategory::Image,
            ReplayError::LoadTimeout { .. } => ErrorCategory::Internal,
        };
        NativeKitError::new(category, err.to_string()).with_source(err)
    }
}

/// A replayable script.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Script {
    pub config: EngineConfig,
    pub caps: Capabilities,
    pub steps: Vec<Step>,
}

impl Script {
    pub fn from_json(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|source| ReplayError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json(&text)
    }
}

/// One float attribute stream of a vertex array.
#[derive(Debug, Clone, Deserialize)]
pub struct AttributeStep {
    pub buffer: String,
    pub location: u32,
    pub components: u8,
    #[serde(default)]
    pub offset: u32,
    #[serde(default)]
    pub stride: u16,
    #[serde(default)]
    pub normalized: bool,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Step {
    CreateProgram {
        name: String,
        vertex: String,
        fragment: String,
    },
    SetProgram {
        program: String,
    },
    DeleteProgram {
        program: String,
    },
    /// Setter chosen by value count: 1-4 floats, 4 for a 2x2, 9 for a 3x3,
    /// 16 for a 4x4.
    SetUniform {
        uniform: String,
        values: Vec<f32>,
        #[serde(default)]
        matrix: bool,
    },
    CreateIndexBuffer {
        name: String,
        indices: Vec<u32>,
        #[serde(default)]
        wide: bool,
        #[serde(default)]
        dynamic: bool,
    },
    CreateVertexBuffer {
        name: String,
        data: Vec<f32>,
        #[serde(default)]
        dynamic: bool,
    },
    CreateVertexArray {
        name: String,
        #[serde(default)]
        index_buffer: Option<String>,
        attributes: Vec<AttributeStep>,
    },
    BindVertexArray {
        vertex_array: String,
    },
    LoadTexture {
        name: String,
        path: PathBuf,
        #[serde(default)]
        generate_mips: bool,
        #[serde(default)]
        invert_y: bool,
    },
    SetTexture {
        uniform: String,
        texture: String,
        #[serde(default)]
        sampling: Option<u32>,
    },
    CreateFrameBuffer {
        name: String,
        texture: String,
        width: u16,
        height: u16,
        #[serde(default)]
        float: bool,
        #[serde(default)]
        depth: bool,
        #[serde(default)]
        stencil: bool,
    },
    BindFrameBuffer {
        frame_buffer: String,
    },
    UnbindFrameBuffer {
        frame_buffer: String,
    },
    SetState {
        #[serde(default)]
        culling: bool,
        #[serde(default)]
        z_offset: f32,
        #[serde(default)]
        reverse_side: bool,
    },
    SetBlendMode {
        mode: u32,
    },
    SetDepthTest {
        enable: bool,
    },
    SetDepthWrite {
        enable: bool,
    },
    Clear {
        #[serde(default)]
        color: Option<[f32; 4]>,
        #[serde(default)]
        depth: Option<f32>,
        #[serde(default)]
        stencil: Option<u8>,
    },
    SetViewport {
        x: f32,
        y: f32,
        width: f32,
        height: f32,
    },
    DrawIndexed {
        #[serde(default)]
        fill_mode: u32,
        start: u32,
        count: u32,
    },
    Draw {
        #[serde(default)]
        fill_mode: u32,
        start: u32,
        count: u32,
    },
    Resize {
        width: u32,
        height: u32,
    },
    EndFrame,
    ReadPixels {
        x: u32,
        y: u32,
        width: u32,
        height: u32,
    },
}

/// Pixels captured by a `read_pixels` step.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Readback {
    pub step: usize,
    pub width: u32,
    pub height: u32,
    pub rgba: Vec<u8>,
}

/// Everything a replay recorded.
#[derive(Debug, Serialize)]
pub struct Report {
    pub commands: Vec<Command>,
    pub readbacks: Vec<Readback>,
    pub fatal_count: usize,
}

#[derive(Default)]
struct Names {
    programs: HashMap<String, ProgramId>,
    index_buffers: HashMap<String, IndexBufferId>,
    vertex_buffers: HashMap<String, VertexBufferId>,
    vertex_arrays: HashMap<String, VertexArrayId>,
    textures: HashMap<String, TextureId>,
    frame_buffers: HashMap<String, FrameBufferId>,
}

fn lookup<T: Copy>(map: &HashMap<String, T>, step: usize, kind: &'static str, name: &str) -> Result<T> {
    map.get(name).copied().ok_or_else(|| ReplayError::UnknownName {
        step,
        kind,
        name: name.to_string(),
    })
}

/// Replays a script step by step.
pub struct Replayer {
    engine: NativeEngine<RecordingBackend>,
    names: Names,
    program: Option<ProgramId>,
    readbacks: Vec<Readback>,
    /// Relative texture paths resolve against this directory.
    base_dir: PathBuf,
}

impl Replayer {
    pub fn new(script: &Script, base_dir: impl Into<PathBuf>) -> Result<Self> {
        let sink = Arc::new(DiagnosticsSink::new());
        let backend = RecordingBackend::new(script.caps, script.config.width, script.config.height, sink.clone());
        let engine = NativeEngine::new(backend, sink, script.config.clone())
            .map_err(|source| ReplayError::Engine { step: 0, source })?;

        Ok(Self {
            engine,
            names: Names::default(),
            program: None,
            readbacks: Vec::new(),
            base_dir: base_dir.into(),
        })
    }

    pub fn engine(&self) -> &NativeEngine<RecordingBackend> {
        &self.engine
    }

    /// Run every step, then end the frame and collect the report.
    pub fn run(mut self, steps: &[Step]) -> Result<Report> {
        for (index, step) in steps.iter().enumerate() {
            // Steps are numbered from one in messages.
            self.apply(index + 1, step)?;
        }
        self.engine.end_frame();

        let fatal_count = self.engine.diagnostics().fatal_count();
        let commands = self.engine.backend_mut().take_commands();
        info!(
            steps = steps.len(),
            commands = commands.len(),
            fatal_count,
            "Replay finished"
        );
        Ok(Report {
            commands,
            readbacks: std::mem::take(&mut self.readbacks),
            fatal_count: fatal_count as usize,
        })
    }

    fn uniform(&self, step: usize, name: &str) -> Result<UniformInfo> {
        let program = self.program.ok_or(ReplayError::NoProgram { step })?;
        self.engine
            .get_uniforms(program, &[name])
            .map_err(|source| ReplayError::Engine { step, source })?
            .into_iter()
            .next()
            .flatten()
            .ok_or_else(|| ReplayError::UnknownUniform {
                step,
                name: name.to_string(),
            })
    }

    fn apply(&mut self, step: usize, command: &Step) -> Result<()> {
        debug!(step, ?command, "Replaying step");
        let engine_err = |source| ReplayError::Engine { step, source };

        match command {
            Step::CreateProgram { name, vertex, fragment } => {
                let id = self.engine.create_program(vertex, fragment).map_err(engine_err)?;
                self.names.programs.insert(name.clone(), id);
            }
            Step::SetProgram { program } => {
                let id = lookup(&self.names.programs, step, "program", program)?;
                self.engine.set_program(id).map_err(engine_err)?;
                self.program = Some(id);
            }
            Step::DeleteProgram { program } => {
                let id = lookup(&self.names.programs, step, "program", program)?;
                self.engine.delete_program(id).map_err(engine_err)?;
            }
            Step::SetUniform { uniform, values, matrix } => {
                let info = self.uniform(step, uniform)?;
                let engine = &mut self.engine;
                let outcome = match (values.as_slice(), *matrix) {
                    (&[x], false) => engine.set_float(info, x),
                    (&[x, y], false) => engine.set_float2(info, x, y),
                    (&[x, y, z], false) => engine.set_float3(info, x, y, z),
                    (&[x, y, z, w], false) => engine.set_float4(info, x, y, z, w),
                    (values, true) if values.len() == 4 => engine.set_matrix2x2(info, values),
                    (values, _) if values.len() == 9 => engine.set_matrix3x3(info, values),
                    (values, _) if values.len() == 16 => engine.set_matrix(info, values),
                    (values, _) => {
                        return Err(ReplayError::UniformArity {
                            step,
                            len: values.len(),
                        })
                    }
                };
                outcome.map_err(engine_err)?;
            }
            Step::CreateIndexBuffer {
                name,
                indices,
                wide,
                dynamic,
            } => {
                let data = if *wide {
                    IndexData::U32(indices.clone())
                } else {
                    IndexData::U16(indices.iter().map(|&index| index as u16).collect())
                };
                let id = self.engine.create_index_buffer(data, *dynamic).map_err(engine_err)?;
                self.names.index_buffers.insert(name.clone(), id);
            }
            Step::CreateVertexBuffer { name, data, dynamic } => {
                let bytes = bytemuck::cast_slice::<f32, u8>(data).to_vec();
                let id = self.engine.create_vertex_buffer(bytes, *dynamic);
                self.names.vertex_buffers.insert(name.clone(), id);
            }
            Step::CreateVertexArray {
                name,
                index_buffer,
                attributes,
            } => {
                let id = self.engine.create_vertex_array();
                if let Some(index_buffer) = index_buffer {
                    let buffer = lookup(&self.names.index_buffers, step, "index buffer", index_buffer)?;
                    self.engine.record_index_buffer(id, buffer).map_err(engine_err)?;
                }
                for attribute in attributes {
                    let buffer = lookup(&self.names.vertex_buffers, step, "vertex buffer", &attribute.buffer)?;
                    self.engine
                        .record_vertex_buffer(
                            id,
                            buffer,
                            attribute.location,
                            attribute.offset,
                            attribute.stride,
                            attribute.components,
                            constants::FLOAT,
                            attribute.normalized,
                        )
                        .map_err(engine_err)?;
                }
                self.names.vertex_arrays.insert(name.clone(), id);
            }
            Step::BindVertexArray { vertex_array } => {
                let id = lookup(&self.names.vertex_arrays, step, "vertex array", vertex_array)?;
                self.engine.bind_vertex_array(id).map_err(engine_err)?;
            }
            Step::LoadTexture {
                name,
                path,
                generate_mips,
                invert_y,
            } => {
                let id = self.load_texture(step, path, *generate_mips, *invert_y)?;
                self.names.textures.insert(name.clone(), id);
            }
            Step::SetTexture {
                uniform,
                texture,
                sampling,
            } => {
                let info = self.uniform(step, uniform)?;
                let id = lookup(&self.names.textures, step, "texture", texture)?;
                if let Some(mode) = sampling {
                    self.engine.set_texture_sampling(id, *mode).map_err(engine_err)?;
                }
                self.engine.set_texture(info, id).map_err(engine_err)?;
            }
            Step::CreateFrameBuffer {
                name,
                texture,
                width,
                height,
                float,
                depth,
                stencil,
            } => {
                let texture_id = match self.names.textures.get(texture) {
                    Some(&id) => id,
                    None => {
                        let id = self.engine.create_texture();
                        self.names.textures.insert(texture.clone(), id);
                        id
                    }
                };
                let format = if *float {
                    constants::TEXTURETYPE_FLOAT
                } else {
                    constants::TEXTURETYPE_UNSIGNED_INT
                };
                let id = self
                    .engine
                    .create_frame_buffer(texture_id, *width, *height, format, 0, *stencil, *depth, false)
                    .map_err(engine_err)?;
                self.names.frame_buffers.insert(name.clone(), id);
            }
            Step::BindFrameBuffer { frame_buffer } => {
                let id = lookup(&self.names.frame_buffers, step, "frame buffer", frame_buffer)?;
                self.engine.bind_frame_buffer(id).map_err(engine_err)?;
            }
            Step::UnbindFrameBuffer { frame_buffer } => {
                let id = lookup(&self.names.frame_buffers, step, "frame buffer", frame_buffer)?;
                self.engine.unbind_frame_buffer(id).map_err(engine_err)?;
            }
            Step::SetState {
                culling,
                z_offset,
                reverse_side,
            } => self.engine.set_state(*culling, *z_offset, *reverse_side),
            Step::SetBlendMode { mode } => self.engine.set_blend_mode(*mode).map_err(engine_err)?,
            Step::SetDepthTest { enable } => self.engine.set_depth_test(*enable),
            Step::SetDepthWrite { enable } => self.engine.set_depth_write(*enable),
            Step::Clear { color, depth, stencil } => {
                let mut flags = 0;
                if let Some([r, g, b, a]) = *color {
                    self.engine.clear_color(r, g, b, a);
                    flags |= constants::CLEAR_COLOR;
                }
                if let Some(depth) = *depth {
                    self.engine.clear_depth(depth);
                    flags |= constants::CLEAR_DEPTH;
                }
                if let Some(stencil) = *stencil {
                    self.engine.clear_stencil(stencil);
                    flags |= constants::CLEAR_STENCIL;
                }
                self.engine.clear(flags);
            }
            Step::SetViewport { x, y, width, height } => self.engine.set_viewport(*x, *y, *width, *height),
            Step::DrawIndexed { fill_mode, start, count } => {
                self.engine
                    .draw_indexed(*fill_mode, *start, *count)
                    .map_err(engine_err)?;
            }
            Step::Draw { fill_mode, start, count } => {
                self.engine.draw(*fill_mode, *start, *count).map_err(engine_err)?;
            }
            Step::Resize { width, height } => self.engine.update_size(*width, *height),
            Step::EndFrame => self.engine.end_frame(),
            Step::ReadPixels { x, y, width, height } => {
                let mut rgba = Vec::new();
                self.engine
                    .get_frame_buffer_data(*x, *y, *width, *height, |pixels| rgba = pixels)
                    .map_err(engine_err)?;
                self.readbacks.push(Readback {
                    step,
                    width: *width,
                    height: *height,
                    rgba,
                });
            }
        }
        Ok(())
    }

    /// Start a texture load and pump the render queue until it settles.
    fn load_texture(&mut self, step: usize, path: &Path, generate_mips: bool, invert_y: bool) -> Result<TextureId> {
        let path = self.base_dir.join(path);
        let bytes = std::fs::read(&path).map_err(|source| ReplayError::Io {
            path: path.clone(),
            source,
        })?;

        let texture = self.engine.create_texture();
        let (done, settled) = crossbeam_channel::bounded(1);
        let failed = done.clone();
        self.engine
            .load_texture(
                texture,
                bytes,
                generate_mips,
                invert_y,
                move || {
                    let _ = done.send(Ok(()));
                },
                move |err| {
                    let _ = failed.send(Err(err.to_string()));
                },
            )
            .map_err(|source| ReplayError::Engine { step, source })?;

        let deadline = Instant::now() + LOAD_TIMEOUT;
        loop {
            self.engine.tick();
            match settled.recv_timeout(Duration::from_millis(5)) {
                Ok(Ok(())) => {
                    debug!(step, path = %path.display(), "Texture loaded");
                    return Ok(texture);
                }
                Ok(Err(message)) => return Err(ReplayError::Load { step, message }),
                Err(_) if Instant::now() >= deadline => return Err(ReplayError::LoadTimeout { step }),
                Err(_) => {}
            }
        }
    }
}
