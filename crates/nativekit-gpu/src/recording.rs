//! In-memory backend that records the command stream.
//!
//! Used for headless runs and tests: resources are tracked with their
//! contents, and every view/submit/frame call is appended to a command log
//! that can be drained with [`RecordingBackend::take_commands`].

use std::collections::BTreeMap;
use std::sync::Arc;

use hashbrown::HashMap;
use serde::Serialize;
use tracing::{debug, trace, warn};

use crate::{
    BufferFlags, Capabilities, ClearFlags, DiagnosticsSink, DiscardFlags, DynamicIndexBufferHandle,
    DynamicVertexBufferHandle, FatalCode, FrameBufferHandle, GpuBackend, GpuError, IndexBuffer,
    IndexBufferHandle, Memory, ProgramHandle, ResetFlags, Resource, SamplerFlags, ShaderBinary,
    ShaderHandle, ShaderStage, StateFlags, Stats, TextureDesc, TextureHandle, UniformDesc,
    UniformHandle, VertexBuffer, VertexBufferHandle, VertexLayout, VertexLayoutHandle, ViewId,
    ViewRect,
};

// ==================== Command log ====================

/// Clear parameters of a view.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ViewClear {
    pub flags: ClearFlags,
    pub rgba: u32,
    pub depth: f32,
    pub stencil: u8,
}

/// Everything known about a view.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ViewState {
    pub clear: Option<ViewClear>,
    pub rect: Option<ViewRect>,
    pub frame_buffer: FrameBufferHandle,
}

impl Default for ViewState {
    fn default() -> Self {
        Self {
            clear: None,
            rect: None,
            frame_buffer: FrameBufferHandle::INVALID,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UniformUpload {
    pub uniform: UniformHandle,
    pub name: String,
    pub values: Vec<f32>,
    pub num: u16,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TextureBinding {
    pub stage: u8,
    pub sampler: UniformHandle,
    pub texture: TextureHandle,
    pub flags: SamplerFlags,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct IndexBinding {
    pub buffer: IndexBuffer,
    pub first_index: u32,
    pub num_indices: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct VertexBinding {
    pub stream: u8,
    pub buffer: VertexBuffer,
    pub start_vertex: u32,
    pub num_vertices: u32,
    pub layout: VertexLayoutHandle,
}

/// One submitted draw with the transient state it consumed.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DrawCall {
    pub view: ViewId,
    pub program: ProgramHandle,
    pub state: StateFlags,
    pub blend_rgba: u32,
    pub uniforms: Vec<UniformUpload>,
    pub textures: Vec<TextureBinding>,
    pub index_buffer: Option<IndexBinding>,
    pub vertex_streams: Vec<VertexBinding>,
}

impl DrawCall {
    /// Last upload of the named uniform in this draw.
    pub fn uniform(&self, name: &str) -> Option<&UniformUpload> {
        self.uniforms.iter().rev().find(|u| u.name == name)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum Command {
    Reset { width: u32, height: u32 },
    Create { resource: Resource },
    Destroy { resource: Resource },
    UpdateIndexBuffer { buffer: DynamicIndexBufferHandle, start_index: u32, bytes: usize },
    UpdateVertexBuffer { buffer: DynamicVertexBufferHandle, start_vertex: u32, bytes: usize },
    SetViewClear { view: ViewId, clear: ViewClear },
    SetViewRect { view: ViewId, rect: ViewRect },
    SetViewFrameBuffer { view: ViewId, frame_buffer: FrameBufferHandle },
    Touch { view: ViewId },
    Submit(DrawCall),
    Frame { number: u32 },
}

// ==================== Resource records ====================

#[derive(Debug, Clone)]
pub struct BufferRecord {
    pub data: Vec<u8>,
    pub flags: BufferFlags,
    pub layout: Option<VertexLayout>,
}

#[derive(Debug, Clone)]
pub struct TextureRecord {
    pub desc: TextureDesc,
    pub data: Option<Vec<u8>>,
}

#[derive(Debug)]
struct ShaderRecord {
    binary: ShaderBinary,
    uniforms: Vec<UniformHandle>,
}

#[derive(Debug)]
struct UniformRecord {
    desc: UniformDesc,
    refs: u32,
}

#[derive(Debug)]
struct ProgramRecord {
    vertex: ShaderHandle,
    fragment: ShaderHandle,
    destroy_shaders: bool,
}

#[derive(Debug)]
struct FrameBufferRecord {
    attachments: Vec<TextureHandle>,
    destroy_textures: bool,
}

#[derive(Debug)]
struct HandleAlloc {
    kind: &'static str,
    next: u16,
    free: Vec<u16>,
}

impl HandleAlloc {
    fn new(kind: &'static str) -> Self {
        Self {
            kind,
            next: 0,
            free: Vec::new(),
        }
    }

    fn alloc(&mut self) -> Result<u16, GpuError> {
        if let Some(index) = self.free.pop() {
            return Ok(index);
        }
        if self.next == u16::MAX {
            return Err(GpuError::HandlesExhausted(self.kind));
        }
        let index = self.next;
        self.next += 1;
        Ok(index)
    }

    fn release(&mut self, index: u16) {
        self.free.push(index);
    }
}

#[derive(Debug)]
struct Allocators {
    index_buffer: HandleAlloc,
    dynamic_index_buffer: HandleAlloc,
    vertex_buffer: HandleAlloc,
    dynamic_vertex_buffer: HandleAlloc,
    vertex_layout: HandleAlloc,
    shader: HandleAlloc,
    program: HandleAlloc,
    uniform: HandleAlloc,
    texture: HandleAlloc,
    frame_buffer: HandleAlloc,
}

impl Default for Allocators {
    fn default() -> Self {
        Self {
            index_buffer: HandleAlloc::new("index buffer"),
            dynamic_index_buffer: HandleAlloc::new("dynamic index buffer"),
            vertex_buffer: HandleAlloc::new("vertex buffer"),
            dynamic_vertex_buffer: HandleAlloc::new("dynamic vertex buffer"),
            vertex_layout: HandleAlloc::new("vertex layout"),
            shader: HandleAlloc::new("shader"),
            program: HandleAlloc::new("program"),
            uniform: HandleAlloc::new("uniform"),
            texture: HandleAlloc::new("texture"),
            frame_buffer: HandleAlloc::new("frame buffer"),
        }
    }
}

#[derive(Debug)]
struct PendingDraw {
    state: StateFlags,
    blend_rgba: u32,
    uniforms: Vec<UniformUpload>,
    textures: BTreeMap<u8, TextureBinding>,
    index: Option<IndexBinding>,
    vertex: BTreeMap<u8, VertexBinding>,
}

impl Default for PendingDraw {
    fn default() -> Self {
        Self {
            state: StateFlags::DEFAULT,
            blend_rgba: 0,
            uniforms: Vec::new(),
            textures: BTreeMap::new(),
            index: None,
            vertex: BTreeMap::new(),
        }
    }
}

// ==================== Backend ====================

pub struct RecordingBackend {
    caps: Capabilities,
    stats: Stats,
    reset_flags: ResetFlags,
    frame_number: u32,
    sink: Arc<DiagnosticsSink>,
    alloc: Allocators,
    index_buffers: HashMap<IndexBuffer, BufferRecord>,
    vertex_buffers: HashMap<VertexBuffer, BufferRecord>,
    layouts: HashMap<VertexLayoutHandle, VertexLayout>,
    shaders: HashMap<ShaderHandle, ShaderRecord>,
    uniforms: HashMap<UniformHandle, UniformRecord>,
    uniform_names: HashMap<String, UniformHandle>,
    programs: HashMap<ProgramHandle, ProgramRecord>,
    textures: HashMap<TextureHandle, TextureRecord>,
    frame_buffers: HashMap<FrameBufferHandle, FrameBufferRecord>,
    views: BTreeMap<ViewId, ViewState>,
    pending: PendingDraw,
    commands: Vec<Command>,
    screenshot_request: Option<FrameBufferHandle>,
}

impl RecordingBackend {
    pub fn new(caps: Capabilities, width: u32, height: u32, sink: Arc<DiagnosticsSink>) -> Self {
        debug!(width, height, max_views = caps.max_views, "Recording backend created");
        Self {
            caps,
            stats: Stats { width, height },
            reset_flags: ResetFlags::empty(),
            frame_number: 0,
            sink,
            alloc: Allocators::default(),
            index_buffers: HashMap::new(),
            vertex_buffers: HashMap::new(),
            layouts: HashMap::new(),
            shaders: HashMap::new(),
            uniforms: HashMap::new(),
            uniform_names: HashMap::new(),
            programs: HashMap::new(),
            textures: HashMap::new(),
            frame_buffers: HashMap::new(),
            views: BTreeMap::new(),
            pending: PendingDraw::default(),
            commands: Vec::new(),
            screenshot_request: None,
        }
    }

    pub fn sink(&self) -> &Arc<DiagnosticsSink> {
        &self.sink
    }

    pub fn reset_flags(&self) -> ResetFlags {
        self.reset_flags
    }

    pub fn frame_number(&self) -> u32 {
        self.frame_number
    }

    pub fn commands(&self) -> &[Command] {
        &self.commands
    }

    /// Drain the command log.
    pub fn take_commands(&mut self) -> Vec<Command> {
        std::mem::take(&mut self.commands)
    }

    /// Submitted draws still in the log.
    pub fn draw_calls(&self) -> impl Iterator<Item = &DrawCall> {
        self.commands.iter().filter_map(|command| match command {
            Command::Submit(draw) => Some(draw),
            _ => None,
        })
    }

    pub fn index_buffer_data(&self, buffer: IndexBuffer) -> Option<&[u8]> {
        self.index_buffers.get(&buffer).map(|record| record.data.as_slice())
    }

    pub fn vertex_buffer(&self, buffer: VertexBuffer) -> Option<&BufferRecord> {
        self.vertex_buffers.get(&buffer)
    }

    pub fn vertex_layout(&self, handle: VertexLayoutHandle) -> Option<&VertexLayout> {
        self.layouts.get(&handle)
    }

    pub fn texture(&self, handle: TextureHandle) -> Option<&TextureRecord> {
        self.textures.get(&handle)
    }

    pub fn uniform_by_name(&self, name: &str) -> Option<UniformHandle> {
        self.uniform_names.get(name).copied()
    }

    pub fn view(&self, view: ViewId) -> Option<&ViewState> {
        self.views.get(&view)
    }

    pub fn program_count(&self) -> usize {
        self.programs.len()
    }

    pub fn is_alive(&self, resource: Resource) -> bool {
        match resource {
            Resource::IndexBuffer(h) => self.index_buffers.contains_key(&IndexBuffer::Static(h)),
            Resource::DynamicIndexBuffer(h) => self.index_buffers.contains_key(&IndexBuffer::Dynamic(h)),
            Resource::VertexBuffer(h) => self.vertex_buffers.contains_key(&VertexBuffer::Static(h)),
            Resource::DynamicVertexBuffer(h) => {
                self.vertex_buffers.contains_key(&VertexBuffer::Dynamic(h))
            }
            Resource::VertexLayout(h) => self.layouts.contains_key(&h),
            Resource::Shader(h) => self.shaders.contains_key(&h),
            Resource::Program(h) => self.programs.contains_key(&h),
            Resource::Uniform(h) => self.uniforms.contains_key(&h),
            Resource::Texture(h) => self.textures.contains_key(&h),
            Resource::FrameBuffer(h) => self.frame_buffers.contains_key(&h),
        }
    }

    fn created(&mut self, resource: Resource) {
        trace!(?resource, "create");
        self.commands.push(Command::Create { resource });
    }

    fn discard_pending(&mut self, flags: DiscardFlags) {
        if flags.contains(DiscardFlags::STATE) {
            self.pending.state = StateFlags::DEFAULT;
            self.pending.blend_rgba = 0;
        }
        if flags.contains(DiscardFlags::BINDINGS) {
            self.pending.textures.clear();
        }
        if flags.contains(DiscardFlags::INDEX_BUFFER) {
            self.pending.index = None;
        }
        if flags.contains(DiscardFlags::VERTEX_STREAMS) {
            self.pending.vertex.clear();
        }
    }

    fn release_uniform(&mut self, handle: UniformHandle) {
        let remove = match self.uniforms.get_mut(&handle) {
            Some(record) => {
                record.refs = record.refs.saturating_sub(1);
                record.refs == 0
            }
            None => false,
        };
        if remove {
            if let Some(record) = self.uniforms.remove(&handle) {
                self.uniform_names.remove(&record.desc.name);
                self.alloc.uniform.release(handle.index());
            }
        }
    }

    fn write_range(
        record: &mut BufferRecord,
        offset: usize,
        bytes: &[u8],
    ) -> Result<(), GpuError> {
        let end = offset + bytes.len();
        if end > record.data.len() {
            if !record.flags.contains(BufferFlags::ALLOW_RESIZE) {
                return Err(GpuError::OutOfRange(format!(
                    "write of {} bytes at {} into {} byte buffer",
                    bytes.len(),
                    offset,
                    record.data.len()
                )));
            }
            record.data.resize(end, 0);
        }
        record.data[offset..end].copy_from_slice(bytes);
        Ok(())
    }

    fn capture_screenshot(&mut self, frame_buffer: FrameBufferHandle) {
        let (width, height) = if frame_buffer.is_valid() {
            self.frame_buffers
                .get(&frame_buffer)
                .and_then(|fb| fb.attachments.first())
                .and_then(|texture| self.textures.get(texture))
                .map(|texture| (texture.desc.width, texture.desc.height))
                .unwrap_or((0, 0))
        } else {
            (self.stats.width, self.stats.height)
        };

        let rgba = self
            .views
            .values()
            .filter(|view| view.frame_buffer == frame_buffer)
            .find_map(|view| view.clear)
            .map(|clear| clear.rgba)
            .unwrap_or(0x0000_00ff);
        let [r, g, b, a] = rgba.to_be_bytes();

        let pixels = (width * height) as usize;
        let mut data = Vec::with_capacity(pixels * 4);
        for _ in 0..pixels {
            data.extend_from_slice(&[b, g, r, a]);
        }
        self.sink
            .screen_shot(width, height, width * 4, &data, self.caps.origin_bottom_left);
    }
}

impl GpuBackend for RecordingBackend {
    fn caps(&self) -> Capabilities {
        self.caps
    }

    fn stats(&self) -> Stats {
        self.stats
    }

    fn reset(&mut self, width: u32, height: u32, flags: ResetFlags) {
        self.stats = Stats { width, height };
        self.reset_flags = flags;
        self.commands.push(Command::Reset { width, height });
    }

    fn frame(&mut self) -> u32 {
        if let Some(frame_buffer) = self.screenshot_request.take() {
            self.capture_screenshot(frame_buffer);
        }
        self.pending = PendingDraw::default();
        self.frame_number += 1;
        self.commands.push(Command::Frame {
            number: self.frame_number,
        });
        trace!(frame = self.frame_number, "frame");
        self.frame_number
    }

    fn create_index_buffer(&mut self, mem: Memory, flags: BufferFlags) -> Result<IndexBufferHandle, GpuError> {
        let handle = IndexBufferHandle::from_raw(self.alloc.index_buffer.alloc()?);
        self.index_buffers.insert(
            IndexBuffer::Static(handle),
            BufferRecord {
                data: mem.into_vec(),
                flags,
                layout: None,
            },
        );
        self.created(Resource::IndexBuffer(handle));
        Ok(handle)
    }

    fn create_dynamic_index_buffer(
        &mut self,
        mem: Memory,
        flags: BufferFlags,
    ) -> Result<DynamicIndexBufferHandle, GpuError> {
        let handle = DynamicIndexBufferHandle::from_raw(self.alloc.dynamic_index_buffer.alloc()?);
        self.index_buffers.insert(
            IndexBuffer::Dynamic(handle),
            BufferRecord {
                data: mem.into_vec(),
                flags,
                layout: None,
            },
        );
        self.created(Resource::DynamicIndexBuffer(handle));
        Ok(handle)
    }

    fn update_dynamic_index_buffer(
        &mut self,
        handle: DynamicIndexBufferHandle,
        start_index: u32,
        mem: Memory,
    ) -> Result<(), GpuError> {
        let record = self
            .index_buffers
            .get_mut(&IndexBuffer::Dynamic(handle))
            .ok_or(GpuError::UnknownHandle {
                kind: "dynamic index buffer",
                index: handle.index(),
            })?;
        let index_size = if record.flags.contains(BufferFlags::INDEX32) { 4 } else { 2 };
        Self::write_range(record, start_index as usize * index_size, mem.as_slice())?;
        self.commands.push(Command::UpdateIndexBuffer {
            buffer: handle,
            start_index,
            bytes: mem.len(),
        });
        Ok(())
    }

    fn create_vertex_buffer(&mut self, mem: Memory, layout: &VertexLayout) -> Result<VertexBufferHandle, GpuError> {
        let handle = VertexBufferHandle::from_raw(self.alloc.vertex_buffer.alloc()?);
        self.vertex_buffers.insert(
            VertexBuffer::Static(handle),
            BufferRecord {
                data: mem.into_vec(),
                flags: BufferFlags::empty(),
                layout: Some(layout.clone()),
            },
        );
        self.created(Resource::VertexBuffer(handle));
        Ok(handle)
    }

    fn create_dynamic_vertex_buffer(
        &mut self,
        mem: Memory,
        layout: &VertexLayout,
        flags: BufferFlags,
    ) -> Result<DynamicVertexBufferHandle, GpuError> {
        let handle = DynamicVertexBufferHandle::from_raw(self.alloc.dynamic_vertex_buffer.alloc()?);
        self.vertex_buffers.insert(
            VertexBuffer::Dynamic(handle),
            BufferRecord {
                data: mem.into_vec(),
                flags,
                layout: Some(layout.clone()),
            },
        );
        self.created(Resource::DynamicVertexBuffer(handle));
        Ok(handle)
    }

    fn update_dynamic_vertex_buffer(
        &mut self,
        handle: DynamicVertexBufferHandle,
        start_vertex: u32,
        mem: Memory,
    ) -> Result<(), GpuError> {
        let record = self
            .vertex_buffers
            .get_mut(&VertexBuffer::Dynamic(handle))
            .ok_or(GpuError::UnknownHandle {
                kind: "dynamic vertex buffer",
                index: handle.index(),
            })?;
        let stride = record.layout.as_ref().map_or(0, |layout| layout.stride()) as usize;
        Self::write_range(record, start_vertex as usize * stride, mem.as_slice())?;
        self.commands.push(Command::UpdateVertexBuffer {
            buffer: handle,
            start_vertex,
            bytes: mem.len(),
        });
        Ok(())
    }

    fn create_vertex_layout(&mut self, layout: &VertexLayout) -> Result<VertexLayoutHandle, GpuError> {
        let handle = VertexLayoutHandle::from_raw(self.alloc.vertex_layout.alloc()?);
        self.layouts.insert(handle, layout.clone());
        self.created(Resource::VertexLayout(handle));
        Ok(handle)
    }

    fn create_shader(&mut self, mem: Memory) -> Result<ShaderHandle, GpuError> {
        let binary = match ShaderBinary::parse(mem.as_slice()) {
            Ok(binary) => binary,
            Err(err) => {
                self.sink
                    .fatal(concat!(file!(), ":", line!()), FatalCode::InvalidShader, &err.to_string());
                return Err(err);
            }
        };

        let handle = ShaderHandle::from_raw(self.alloc.shader.alloc()?);
        let mut uniforms = Vec::with_capacity(binary.uniforms.len());
        for entry in &binary.uniforms {
            let uniform = match self.uniform_names.get(&entry.name) {
                Some(&existing) => existing,
                None => {
                    let uniform = UniformHandle::from_raw(self.alloc.uniform.alloc()?);
                    self.uniforms.insert(
                        uniform,
                        UniformRecord {
                            desc: UniformDesc {
                                name: entry.name.clone(),
                                ty: entry.ty,
                                num: u16::from(entry.num.max(1)),
                            },
                            refs: 0,
                        },
                    );
                    self.uniform_names.insert(entry.name.clone(), uniform);
                    uniform
                }
            };
            if let Some(record) = self.uniforms.get_mut(&uniform) {
                record.refs += 1;
            }
            uniforms.push(uniform);
        }

        self.sink.trace(
            concat!(file!(), ":", line!()),
            &format!(
                "{:?} shader {} with {} uniforms",
                binary.stage,
                handle.index(),
                uniforms.len()
            ),
        );
        self.shaders.insert(handle, ShaderRecord { binary, uniforms });
        self.created(Resource::Shader(handle));
        Ok(handle)
    }

    fn shader_uniforms(&self, shader: ShaderHandle) -> Vec<UniformHandle> {
        self.shaders
            .get(&shader)
            .map(|record| record.uniforms.clone())
            .unwrap_or_default()
    }

    fn uniform_info(&self, uniform: UniformHandle) -> Option<UniformDesc> {
        self.uniforms.get(&uniform).map(|record| record.desc.clone())
    }

    fn create_program(
        &mut self,
        vertex: ShaderHandle,
        fragment: ShaderHandle,
        destroy_shaders: bool,
    ) -> Result<ProgramHandle, GpuError> {
        for (shader, stage) in [(vertex, ShaderStage::Vertex), (fragment, ShaderStage::Fragment)] {
            let record = self.shaders.get(&shader).ok_or(GpuError::UnknownHandle {
                kind: "shader",
                index: shader.index(),
            })?;
            if record.binary.stage != stage {
                return Err(GpuError::invalid_shader(format!(
                    "expected a {stage:?} shader, got {:?}",
                    record.binary.stage
                )));
            }
        }

        let handle = ProgramHandle::from_raw(self.alloc.program.alloc()?);
        self.programs.insert(
            handle,
            ProgramRecord {
                vertex,
                fragment,
                destroy_shaders,
            },
        );
        self.created(Resource::Program(handle));
        Ok(handle)
    }

    fn create_texture(&mut self, desc: &TextureDesc, mem: Option<Memory>) -> Result<TextureHandle, GpuError> {
        let largest = desc.width.max(desc.height);
        if largest > self.caps.max_texture_size {
            return Err(GpuError::TextureTooLarge(largest));
        }
        if let Some(ref mem) = mem {
            let expected = desc.data_size();
            if mem.len() != expected {
                return Err(GpuError::InvalidTextureData {
                    expected,
                    actual: mem.len(),
                });
            }
        }

        let handle = TextureHandle::from_raw(self.alloc.texture.alloc()?);
        self.textures.insert(
            handle,
            TextureRecord {
                desc: *desc,
                data: mem.map(Memory::into_vec),
            },
        );
        self.created(Resource::Texture(handle));
        Ok(handle)
    }

    fn create_frame_buffer(
        &mut self,
        attachments: &[TextureHandle],
        destroy_textures: bool,
    ) -> Result<FrameBufferHandle, GpuError> {
        if attachments.is_empty() {
            return Err(GpuError::InvalidFrameBuffer("no attachments".to_string()));
        }
        for texture in attachments {
            match self.textures.get(texture) {
                Some(record) if record.desc.render_target => {}
                Some(_) => {
                    return Err(GpuError::InvalidFrameBuffer(format!(
                        "texture {} is not a render target",
                        texture.index()
                    )))
                }
                None => {
                    return Err(GpuError::UnknownHandle {
                        kind: "texture",
                        index: texture.index(),
                    })
                }
            }
        }

        let handle = FrameBufferHandle::from_raw(self.alloc.frame_buffer.alloc()?);
        self.frame_buffers.insert(
            handle,
            FrameBufferRecord {
                attachments: attachments.to_vec(),
                destroy_textures,
            },
        );
        self.created(Resource::FrameBuffer(handle));
        Ok(handle)
    }

    fn frame_buffer_texture(&self, frame_buffer: FrameBufferHandle, attachment: u8) -> TextureHandle {
        self.frame_buffers
            .get(&frame_buffer)
            .and_then(|record| record.attachments.get(usize::from(attachment)).copied())
            .unwrap_or(TextureHandle::INVALID)
    }

    fn destroy(&mut self, resource: Resource) {
        if !self.is_alive(resource) {
            warn!(?resource, "destroy of unknown resource");
            return;
        }

        match resource {
            Resource::IndexBuffer(h) => {
                self.index_buffers.remove(&IndexBuffer::Static(h));
                self.alloc.index_buffer.release(h.index());
            }
            Resource::DynamicIndexBuffer(h) => {
                self.index_buffers.remove(&IndexBuffer::Dynamic(h));
                self.alloc.dynamic_index_buffer.release(h.index());
            }
            Resource::VertexBuffer(h) => {
                self.vertex_buffers.remove(&VertexBuffer::Static(h));
                self.alloc.vertex_buffer.release(h.index());
            }
            Resource::DynamicVertexBuffer(h) => {
                self.vertex_buffers.remove(&VertexBuffer::Dynamic(h));
                self.alloc.dynamic_vertex_buffer.release(h.index());
            }
            Resource::VertexLayout(h) => {
                self.layouts.remove(&h);
                self.alloc.vertex_layout.release(h.index());
            }
            Resource::Shader(h) => {
                if let Some(record) = self.shaders.remove(&h) {
                    for uniform in record.uniforms {
                        self.release_uniform(uniform);
                    }
                }
                self.alloc.shader.release(h.index());
            }
            Resource::Program(h) => {
                if let Some(record) = self.programs.remove(&h) {
                    if record.destroy_shaders {
                        self.destroy(Resource::Shader(record.vertex));
                        self.destroy(Resource::Shader(record.fragment));
                    }
                }
                self.alloc.program.release(h.index());
            }
            Resource::Uniform(h) => self.release_uniform(h),
            Resource::Texture(h) => {
                self.textures.remove(&h);
                self.alloc.texture.release(h.index());
            }
            Resource::FrameBuffer(h) => {
                if let Some(record) = self.frame_buffers.remove(&h) {
                    if record.destroy_textures {
                        for texture in record.attachments {
                            self.destroy(Resource::Texture(texture));
                        }
                    }
                }
                self.alloc.frame_buffer.release(h.index());
            }
        }
        self.commands.push(Command::Destroy { resource });
    }

    fn set_view_clear(&mut self, view: ViewId, flags: ClearFlags, rgba: u32, depth: f32, stencil: u8) {
        let clear = ViewClear {
            flags,
            rgba,
            depth,
            stencil,
        };
        self.views.entry(view).or_default().clear = Some(clear);
        self.commands.push(Command::SetViewClear { view, clear });
    }

    fn set_view_rect(&mut self, view: ViewId, rect: ViewRect) {
        self.views.entry(view).or_default().rect = Some(rect);
        self.commands.push(Command::SetViewRect { view, rect });
    }

    fn set_view_frame_buffer(&mut self, view: ViewId, frame_buffer: FrameBufferHandle) {
        self.views.entry(view).or_default().frame_buffer = frame_buffer;
        self.commands.push(Command::SetViewFrameBuffer { view, frame_buffer });
    }

    fn touch(&mut self, view: ViewId) {
        self.commands.push(Command::Touch { view });
    }

    fn discard(&mut self, flags: DiscardFlags) {
        self.pending.uniforms.clear();
        self.discard_pending(flags);
    }

    fn set_state(&mut self, state: StateFlags, blend_rgba: u32) {
        self.pending.state = state;
        self.pending.blend_rgba = blend_rgba;
    }

    fn set_uniform(&mut self, uniform: UniformHandle, values: &[f32], num: u16) {
        let name = self
            .uniforms
            .get(&uniform)
            .map(|record| record.desc.name.clone())
            .unwrap_or_default();
        self.pending.uniforms.push(UniformUpload {
            uniform,
            name,
            values: values.to_vec(),
            num,
        });
    }

    fn set_texture(&mut self, stage: u8, sampler: UniformHandle, texture: TextureHandle, flags: SamplerFlags) {
        self.pending.textures.insert(
            stage,
            TextureBinding {
                stage,
                sampler,
                texture,
                flags,
            },
        );
    }

    fn set_index_buffer(&mut self, buffer: IndexBuffer, first_index: u32, num_indices: u32) {
        self.pending.index = Some(IndexBinding {
            buffer,
            first_index,
            num_indices,
        });
    }

    fn set_vertex_buffer(
        &mut self,
        stream: u8,
        buffer: VertexBuffer,
        start_vertex: u32,
        num_vertices: u32,
        layout: VertexLayoutHandle,
    ) {
        self.pending.vertex.insert(
            stream,
            VertexBinding {
                stream,
                buffer,
                start_vertex,
                num_vertices,
                layout,
            },
        );
    }

    fn submit(&mut self, view: ViewId, program: ProgramHandle, discard: DiscardFlags) {
        if view >= self.caps.max_views {
            self.sink.fatal(
                concat!(file!(), ":", line!()),
                FatalCode::DebugCheck,
                &format!("view {view} exceeds max views {}", self.caps.max_views),
            );
            return;
        }

        let draw = DrawCall {
            view,
            program,
            state: self.pending.state,
            blend_rgba: self.pending.blend_rgba,
            uniforms: std::mem::take(&mut self.pending.uniforms),
            textures: self.pending.textures.values().copied().collect(),
            index_buffer: self.pending.index,
            vertex_streams: self.pending.vertex.values().copied().collect(),
        };
        self.commands.push(Command::Submit(draw));
        self.discard_pending(discard);
    }

    fn request_screenshot(&mut self, frame_buffer: FrameBufferHandle) {
        self.screenshot_request = Some(frame_buffer);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Attrib, AttribType, ShaderStage, TextureFormat, UniformEntry, UniformType};

    fn backend() -> RecordingBackend {
        RecordingBackend::new(Capabilities::default(), 640, 480, Arc::new(DiagnosticsSink::new()))
    }

    fn shader_bytes(stage: ShaderStage, uniforms: &[&str]) -> Memory {
        let mut binary = ShaderBinary::new(stage);
        for name in uniforms {
            binary.uniforms.push(UniformEntry {
                name: name.to_string(),
                ty: UniformType::Vec4,
                fragment: stage == ShaderStage::Fragment,
                num: 0,
                reg_index: 0,
                reg_count: 1,
            });
        }
        Memory::from_vec(binary.to_bytes().unwrap())
    }

    #[test]
    fn test_uniforms_shared_by_name() {
        let mut gpu = backend();
        let vs = gpu
            .create_shader(shader_bytes(ShaderStage::Vertex, &["tint", "scale"]))
            .unwrap();
        let fs = gpu
            .create_shader(shader_bytes(ShaderStage::Fragment, &["tint"]))
            .unwrap();

        let tint = gpu.uniform_by_name("tint").unwrap();
        assert_eq!(gpu.shader_uniforms(vs)[0], tint);
        assert_eq!(gpu.shader_uniforms(fs), vec![tint]);
        assert_eq!(gpu.uniform_info(tint).unwrap().ty, UniformType::Vec4);

        gpu.destroy(Resource::Shader(vs));
        assert!(gpu.uniform_by_name("scale").is_none());
        assert_eq!(gpu.uniform_by_name("tint"), Some(tint));
    }

    #[test]
    fn test_program_destroys_shaders() {
        let mut gpu = backend();
        let vs = gpu.create_shader(shader_bytes(ShaderStage::Vertex, &[])).unwrap();
        let fs = gpu.create_shader(shader_bytes(ShaderStage::Fragment, &[])).unwrap();
        assert!(gpu.create_program(fs, vs, true).is_err());

        let program = gpu.create_program(vs, fs, true).unwrap();
        gpu.destroy(Resource::Program(program));
        assert!(!gpu.is_alive(Resource::Shader(vs)));
        assert!(!gpu.is_alive(Resource::Shader(fs)));
        assert_eq!(gpu.program_count(), 0);
    }

    #[test]
    fn test_invalid_shader_reported_to_sink() {
        let mut gpu = backend();
        assert!(gpu.create_shader(Memory::copy(b"garbage")).is_err());
        assert_eq!(gpu.sink().fatal_count(), 1);
    }

    #[test]
    fn test_dynamic_vertex_update_uses_stride() {
        let mut gpu = backend();
        let layout = VertexLayout::new().add(Attrib::Position, 2, AttribType::Float, false);
        let handle = gpu
            .create_dynamic_vertex_buffer(Memory::from_vec(vec![0; 16]), &layout, BufferFlags::ALLOW_RESIZE)
            .unwrap();
        gpu.update_dynamic_vertex_buffer(handle, 1, Memory::copy(&[7; 8])).unwrap();

        let record = gpu.vertex_buffer(VertexBuffer::Dynamic(handle)).unwrap();
        assert_eq!(&record.data[..8], &[0; 8]);
        assert_eq!(&record.data[8..], &[7; 8]);
    }

    #[test]
    fn test_fixed_size_update_out_of_range() {
        let mut gpu = backend();
        let handle = gpu
            .create_dynamic_index_buffer(Memory::from_vec(vec![0; 4]), BufferFlags::empty())
            .unwrap();
        assert!(gpu
            .update_dynamic_index_buffer(handle, 1, Memory::copy(&[1, 0, 2, 0]))
            .is_err());
        gpu.update_dynamic_index_buffer(handle, 1, Memory::copy(&[9, 0])).unwrap();
        assert_eq!(gpu.index_buffer_data(IndexBuffer::Dynamic(handle)).unwrap(), &[0, 0, 9, 0]);
    }

    #[test]
    fn test_texture_data_size_checked() {
        let mut gpu = backend();
        let desc = TextureDesc::texture_2d(2, 2, false, TextureFormat::Rgba8);
        assert_eq!(
            gpu.create_texture(&desc, Some(Memory::from_vec(vec![0; 15]))),
            Err(GpuError::InvalidTextureData {
                expected: 16,
                actual: 15
            })
        );
        let handle = gpu.create_texture(&desc, Some(Memory::from_vec(vec![0; 16]))).unwrap();
        assert_eq!(gpu.texture(handle).unwrap().desc.width, 2);
    }

    #[test]
    fn test_submit_consumes_transient_state() {
        let mut gpu = backend();
        let vs = gpu.create_shader(shader_bytes(ShaderStage::Vertex, &["tint"])).unwrap();
        let fs = gpu.create_shader(shader_bytes(ShaderStage::Fragment, &[])).unwrap();
        let program = gpu.create_program(vs, fs, true).unwrap();
        let tint = gpu.uniform_by_name("tint").unwrap();
        let ib = gpu
            .create_index_buffer(Memory::from_vec(vec![0, 0, 1, 0, 2, 0]), BufferFlags::empty())
            .unwrap();

        gpu.set_state(StateFlags::WRITE_RGB, 0);
        gpu.set_uniform(tint, &[1.0, 0.0, 0.0, 1.0], 1);
        gpu.set_index_buffer(IndexBuffer::Static(ib), 0, crate::ALL_ELEMENTS);
        gpu.submit(0, program, DiscardFlags::STATE);
        gpu.submit(0, program, DiscardFlags::ALL);

        let draws: Vec<_> = gpu.draw_calls().cloned().collect();
        assert_eq!(draws.len(), 2);
        assert_eq!(draws[0].state, StateFlags::WRITE_RGB);
        assert_eq!(draws[0].uniform("tint").unwrap().values, vec![1.0, 0.0, 0.0, 1.0]);
        assert!(draws[0].index_buffer.is_some());
        assert_eq!(draws[1].state, StateFlags::DEFAULT);
        assert!(draws[1].uniforms.is_empty());
        assert!(draws[1].index_buffer.is_some());
    }

    #[test]
    fn test_screenshot_uses_view_clear_color() {
        let mut gpu = backend();
        gpu.reset(2, 1, ResetFlags::empty());
        gpu.set_view_clear(0, ClearFlags::COLOR, 0x1122_33ff, 1.0, 0);
        gpu.request_screenshot(FrameBufferHandle::INVALID);
        gpu.frame();

        let shot = gpu.sink().take_screenshot().unwrap();
        assert_eq!((shot.width, shot.height, shot.pitch), (2, 1, 8));
        assert_eq!(&shot.data[..4], &[0x33, 0x22, 0x11, 0xff]);
    }

    #[test]
    fn test_frame_buffer_requires_render_target() {
        let mut gpu = backend();
        let plain = gpu
            .create_texture(&TextureDesc::texture_2d(4, 4, false, TextureFormat::Rgba8), None)
            .unwrap();
        assert!(gpu.create_frame_buffer(&[plain], true).is_err());

        let target = gpu
            .create_texture(
                &TextureDesc::texture_2d(4, 4, false, TextureFormat::Rgba8).as_render_target(),
                None,
            )
            .unwrap();
        let fb = gpu.create_frame_buffer(&[target], true).unwrap();
        assert_eq!(gpu.frame_buffer_texture(fb, 0), target);
        assert_eq!(gpu.frame_buffer_texture(fb, 1), TextureHandle::INVALID);

        gpu.destroy(Resource::FrameBuffer(fb));
        assert!(!gpu.is_alive(Resource::Texture(target)));
    }
}
