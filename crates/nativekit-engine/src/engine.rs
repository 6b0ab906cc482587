//! The engine object driven by the scripting layer.

use std::collections::HashMap;
use std::sync::Arc;

use futures::future::try_join_all;
use nativekit_gpu::{
    DiagnosticsSink, DiscardFlags, GpuBackend, Memory, Resource, TextureDesc, TextureFormat, TextureHandle, ViewRect,
    ALL_ELEMENTS,
};
use nativekit_image::{face_major_index, CubeImage, ImageContainer, CUBE_FACES};
use nativekit_shader::ShaderCompiler;
use nativekit_tasks::{run_blocking, CancellationSource, RenderQueue, TaskError, WorkerPool};
use tracing::{debug, info, trace, warn};

use crate::buffers::{attribute_layout, IndexBufferData, VertexArray, VertexBufferData, VertexStream};
use crate::framebuffer::FrameBufferManager;
use crate::program::{collect_uniforms, expand_matrix, pad_to_vec4, ProgramData};
use crate::state::{AlphaMode, FillMode, RenderState};
use crate::texture::{prepare_image, TextureData};
use crate::{
    constants, EngineConfig, EngineError, FrameBufferId, IndexBufferId, IndexData, ProgramId, Result, TextureId,
    UniformInfo, VertexArrayId, VertexBufferId,
};

/// Frames to wait for a requested screenshot.
const SCREENSHOT_FRAMES: u32 = 4;

/// Scratch data dropped after each draw.
const DRAW_DISCARD: DiscardFlags = DiscardFlags::INSTANCE_DATA
    .union(DiscardFlags::STATE)
    .union(DiscardFlags::TRANSFORM);

/// The rendering engine. Lives on the render thread.
pub struct NativeEngine<B: GpuBackend + 'static> {
    backend: B,
    sink: Arc<DiagnosticsSink>,
    config: EngineConfig,
    compiler: ShaderCompiler,
    cancel: CancellationSource,
    pool: WorkerPool,
    queue: RenderQueue<NativeEngine<B>>,
    state: RenderState,
    frame_buffers: FrameBufferManager,
    programs: HashMap<ProgramId, ProgramData>,
    current_program: Option<ProgramId>,
    retired_programs: Vec<ProgramId>,
    index_buffers: HashMap<IndexBufferId, IndexBufferData>,
    vertex_buffers: HashMap<VertexBufferId, VertexBufferData>,
    vertex_arrays: HashMap<VertexArrayId, VertexArray>,
    bound_vertex_array: Option<VertexArrayId>,
    textures: HashMap<TextureId, TextureData>,
    disposed: bool,
}

impl<B: GpuBackend + 'static> NativeEngine<B> {
    /// Create an engine over `backend`.
    ///
    /// `sink` is the diagnostics sink the backend reports into; screenshots
    /// are collected from it.
    pub fn new(mut backend: B, sink: Arc<DiagnosticsSink>, config: EngineConfig) -> Result<Self> {
        let pool = WorkerPool::new(config.worker_threads)?;
        backend.reset(config.width, config.height, config.reset.flags());
        let frame_buffers = FrameBufferManager::new(&mut backend);

        info!(
            width = config.width,
            height = config.height,
            target = ?config.shader_target,
            "Native engine initialized"
        );

        Ok(Self {
            backend,
            sink,
            compiler: ShaderCompiler::new(config.shader_target),
            config,
            cancel: CancellationSource::new(),
            pool,
            queue: RenderQueue::new(),
            state: RenderState::default(),
            frame_buffers,
            programs: HashMap::new(),
            current_program: None,
            retired_programs: Vec::new(),
            index_buffers: HashMap::new(),
            vertex_buffers: HashMap::new(),
            vertex_arrays: HashMap::new(),
            bound_vertex_array: None,
            textures: HashMap::new(),
            disposed: false,
        })
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }

    pub fn diagnostics(&self) -> &Arc<DiagnosticsSink> {
        &self.sink
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn render_state(&self) -> &RenderState {
        &self.state
    }

    pub fn frame_buffer_manager(&self) -> &FrameBufferManager {
        &self.frame_buffers
    }

    /// Cancel in-flight loads and release every program.
    ///
    /// Loads that have not reached the render thread yet resolve with neither
    /// callback.
    pub fn dispose(&mut self) {
        if self.disposed {
            return;
        }
        self.disposed = true;
        self.cancel.cancel();

        for (_, program) in self.programs.drain() {
            self.backend.destroy(Resource::Program(program.handle()));
        }
        self.current_program = None;
        self.retired_programs.clear();
        self.frame_buffers.destroy_all(&mut self.backend);
        info!("Native engine disposed");
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed
    }

    // ==================== Frame loop ====================

    /// Run `callback` on the render thread, then end the frame.
    pub fn request_animation_frame<F>(&self, callback: F) -> Result<()>
    where
        F: FnOnce(&mut NativeEngine<B>) + Send + 'static,
    {
        self.queue.scheduler().dispatch(move |engine: &mut NativeEngine<B>| {
            callback(engine);
            engine.end_frame();
        })?;
        Ok(())
    }

    /// Run every queued render-thread job. Returns how many ran.
    pub fn tick(&mut self) -> usize {
        let mut ran = 0;
        while let Some(job) = self.queue.try_next() {
            job(self);
            ran += 1;
        }
        ran
    }

    /// Flush the frame and restart view allocation.
    pub fn end_frame(&mut self) {
        self.frame_buffers.reset();
        let frame = self.backend.frame();

        for id in std::mem::take(&mut self.retired_programs) {
            if let Some(program) = self.programs.remove(&id) {
                self.backend.destroy(Resource::Program(program.handle()));
                if self.current_program == Some(id) {
                    self.current_program = None;
                }
                debug!(program = %id, "Destroyed retired program");
            }
        }
        trace!(frame, "Frame ended");
    }

    /// Resize the back buffer. No-op when the size is unchanged.
    pub fn update_size(&mut self, width: u32, height: u32) {
        let stats = self.backend.stats();
        if stats.width == width && stats.height == height {
            return;
        }

        self.backend.reset(width, height, self.config.reset.flags());
        let rect = ViewRect {
            x: 0,
            y: 0,
            width: u16::try_from(width).unwrap_or(u16::MAX),
            height: u16::try_from(height).unwrap_or(u16::MAX),
        };
        self.backend.set_view_rect(0, rect);
        self.backend.touch(0);
        self.frame_buffers.resize_back_buffer(width, height);
        debug!(width, height, "Back buffer resized");
    }

    pub fn render_width(&self) -> u32 {
        self.backend.stats().width
    }

    pub fn render_height(&self) -> u32 {
        self.backend.stats().height
    }

    // ==================== Programs ====================

    /// Compile a GLSL pair and create the native program.
    pub fn create_program(&mut self, vertex_source: &str, fragment_source: &str) -> Result<ProgramId> {
        let compiled = self.compiler.compile(vertex_source, fragment_source)?;
        let vertex_bytes = compiled.vertex.to_binary()?.to_bytes()?;
        let fragment_bytes = compiled.fragment.to_binary()?.to_bytes()?;
        let vertex_samplers = compiled.vertex.sampler_stages()?;
        let fragment_samplers = compiled.fragment.sampler_stages()?;

        let vertex_shader = self.backend.create_shader(Memory::from_vec(vertex_bytes))?;
        let fragment_shader = match self.backend.create_shader(Memory::from_vec(fragment_bytes)) {
            Ok(shader) => shader,
            Err(err) => {
                self.backend.destroy(Resource::Shader(vertex_shader));
                return Err(err.into());
            }
        };

        let vertex_uniforms = collect_uniforms(&self.backend, vertex_shader, &vertex_samplers);
        let fragment_uniforms = collect_uniforms(&self.backend, fragment_shader, &fragment_samplers);
        let handle = self.backend.create_program(vertex_shader, fragment_shader, true)?;

        let id = ProgramId::next();
        debug!(
            program = %id,
            vertex_uniforms = vertex_uniforms.len(),
            fragment_uniforms = fragment_uniforms.len(),
            "Created program"
        );
        self.programs.insert(
            id,
            ProgramData::new(
                handle,
                vertex_uniforms,
                fragment_uniforms,
                compiled.vertex.attribute_locations(),
            ),
        );
        Ok(id)
    }

    fn program(&self, id: ProgramId) -> Result<&ProgramData> {
        self.programs
            .get(&id)
            .ok_or_else(|| EngineError::not_found("program", id.id()))
    }

    /// Resolve uniform names. Names the program does not declare map to `None`.
    pub fn get_uniforms(&self, program: ProgramId, names: &[&str]) -> Result<Vec<Option<UniformInfo>>> {
        let program = self.program(program)?;
        Ok(names.iter().map(|name| program.uniform(name)).collect())
    }

    /// Input locations of canonical attribute names.
    pub fn get_attributes(&self, program: ProgramId, names: &[&str]) -> Result<Vec<Option<u32>>> {
        let program = self.program(program)?;
        Ok(names.iter().map(|name| program.attribute_location(name)).collect())
    }

    pub fn set_program(&mut self, program: ProgramId) -> Result<()> {
        self.program(program)?;
        self.current_program = Some(program);
        Ok(())
    }

    pub fn current_program(&self) -> Option<ProgramId> {
        self.current_program
    }

    /// Retire a program. It stays usable until the frame ends.
    pub fn delete_program(&mut self, program: ProgramId) -> Result<()> {
        self.program(program)?;
        if !self.retired_programs.contains(&program) {
            self.retired_programs.push(program);
        }
        Ok(())
    }

    // ==================== Uniforms ====================

    fn stage_uniform(&mut self, uniform: UniformInfo, data: Vec<f32>, element_count: u16) -> Result<()> {
        let program = self
            .current_program
            .and_then(|id| self.programs.get_mut(&id))
            .ok_or(EngineError::NoProgramBound)?;
        program.set_uniform(uniform.handle, data, element_count);
        Ok(())
    }

    pub fn set_matrix(&mut self, uniform: UniformInfo, matrix: &[f32]) -> Result<()> {
        if matrix.len() != 16 {
            return Err(EngineError::invalid(format!(
                "a 4x4 matrix needs 16 floats, got {}",
                matrix.len()
            )));
        }
        self.stage_uniform(uniform, matrix.to_vec(), 1)
    }

    /// Upload `len / 16` 4x4 matrices. `len` must be a multiple of 16.
    pub fn set_matrices(&mut self, uniform: UniformInfo, matrices: &[f32]) -> Result<()> {
        if matrices.len() % 16 != 0 {
            return Err(EngineError::invalid(format!(
                "matrix array length {} is not a multiple of 16",
                matrices.len()
            )));
        }
        let count = u16::try_from(matrices.len() / 16).map_err(|_| EngineError::invalid("too many matrices"))?;
        self.stage_uniform(uniform, matrices.to_vec(), count)
    }

    fn stage_square_matrix(&mut self, uniform: UniformInfo, matrix: &[f32], size: usize) -> Result<()> {
        let expanded = expand_matrix(matrix, size).ok_or_else(|| {
            EngineError::invalid(format!(
                "a {size}x{size} matrix needs {} floats, got {}",
                size * size,
                matrix.len()
            ))
        })?;
        self.stage_uniform(uniform, expanded, 1)
    }

    pub fn set_matrix3x3(&mut self, uniform: UniformInfo, matrix: &[f32]) -> Result<()> {
        self.stage_square_matrix(uniform, matrix, 3)
    }

    pub fn set_matrix2x2(&mut self, uniform: UniformInfo, matrix: &[f32]) -> Result<()> {
        self.stage_square_matrix(uniform, matrix, 2)
    }

    pub fn set_int(&mut self, uniform: UniformInfo, value: i32) -> Result<()> {
        self.stage_uniform(uniform, vec![value as f32, 0.0, 0.0, 0.0], 1)
    }

    fn stage_int_array(&mut self, uniform: UniformInfo, values: &[i32], size: usize) -> Result<()> {
        let floats: Vec<f32> = values.iter().map(|&value| value as f32).collect();
        let (data, count) = pad_to_vec4(&floats, size).ok_or_else(|| EngineError::invalid("uniform array too long"))?;
        self.stage_uniform(uniform, data, count)
    }

    fn stage_float_array(&mut self, uniform: UniformInfo, values: &[f32], size: usize) -> Result<()> {
        let (data, count) = pad_to_vec4(values, size).ok_or_else(|| EngineError::invalid("uniform array too long"))?;
        self.stage_uniform(uniform, data, count)
    }

    pub fn set_int_array(&mut self, uniform: UniformInfo, values: &[i32]) -> Result<()> {
        self.stage_int_array(uniform, values, 1)
    }

    pub fn set_int_array2(&mut self, uniform: UniformInfo, values: &[i32]) -> Result<()> {
        self.stage_int_array(uniform, values, 2)
    }

    pub fn set_int_array3(&mut self, uniform: UniformInfo, values: &[i32]) -> Result<()> {
        self.stage_int_array(uniform, values, 3)
    }

    pub fn set_int_array4(&mut self, uniform: UniformInfo, values: &[i32]) -> Result<()> {
        self.stage_int_array(uniform, values, 4)
    }

    pub fn set_float_array(&mut self, uniform: UniformInfo, values: &[f32]) -> Result<()> {
        self.stage_float_array(uniform, values, 1)
    }

    pub fn set_float_array2(&mut self, uniform: UniformInfo, values: &[f32]) -> Result<()> {
        self.stage_float_array(uniform, values, 2)
    }

    pub fn set_float_array3(&mut self, uniform: UniformInfo, values: &[f32]) -> Result<()> {
        self.stage_float_array(uniform, values, 3)
    }

    pub fn set_float_array4(&mut self, uniform: UniformInfo, values: &[f32]) -> Result<()> {
        self.stage_float_array(uniform, values, 4)
    }

    pub fn set_float(&mut self, uniform: UniformInfo, x: f32) -> Result<()> {
        self.stage_uniform(uniform, vec![x, 0.0, 0.0, 0.0], 1)
    }

    pub fn set_float2(&mut self, uniform: UniformInfo, x: f32, y: f32) -> Result<()> {
        self.stage_uniform(uniform, vec![x, y, 0.0, 0.0], 1)
    }

    pub fn set_float3(&mut self, uniform: UniformInfo, x: f32, y: f32, z: f32) -> Result<()> {
        self.stage_uniform(uniform, vec![x, y, z, 0.0], 1)
    }

    pub fn set_float4(&mut self, uniform: UniformInfo, x: f32, y: f32, z: f32, w: f32) -> Result<()> {
        self.stage_uniform(uniform, vec![x, y, z, w], 1)
    }

    // ==================== Buffers ====================

    pub fn create_index_buffer(&mut self, data: IndexData, dynamic: bool) -> Result<IndexBufferId> {
        let buffer = IndexBufferData::new(&mut self.backend, &data, dynamic)?;
        let id = IndexBufferId::next();
        self.index_buffers.insert(id, buffer);
        Ok(id)
    }

    pub fn update_dynamic_index_buffer(&mut self, id: IndexBufferId, data: &IndexData, start_index: u32) -> Result<()> {
        let buffer = self
            .index_buffers
            .get(&id)
            .ok_or_else(|| EngineError::not_found("index buffer", id.id()))?;
        buffer.update(&mut self.backend, data, start_index)
    }

    pub fn delete_index_buffer(&mut self, id: IndexBufferId) -> Result<()> {
        let buffer = self
            .index_buffers
            .remove(&id)
            .ok_or_else(|| EngineError::not_found("index buffer", id.id()))?;
        buffer.destroy(&mut self.backend);
        Ok(())
    }

    /// Stage vertex bytes. The native buffer is created once a vertex array
    /// records a layout for it.
    pub fn create_vertex_buffer(&mut self, bytes: Vec<u8>, dynamic: bool) -> VertexBufferId {
        let id = VertexBufferId::next();
        trace!(buffer = %id, bytes = bytes.len(), dynamic, "Staged vertex buffer");
        self.vertex_buffers.insert(id, VertexBufferData::new(bytes, dynamic));
        id
    }

    pub fn update_dynamic_vertex_buffer(
        &mut self,
        id: VertexBufferId,
        data: &[u8],
        byte_offset: usize,
        byte_length: usize,
    ) -> Result<()> {
        let buffer = self
            .vertex_buffers
            .get_mut(&id)
            .ok_or_else(|| EngineError::not_found("vertex buffer", id.id()))?;
        buffer.update(&mut self.backend, data, byte_offset, byte_length)
    }

    pub fn delete_vertex_buffer(&mut self, id: VertexBufferId) -> Result<()> {
        let buffer = self
            .vertex_buffers
            .remove(&id)
            .ok_or_else(|| EngineError::not_found("vertex buffer", id.id()))?;
        buffer.destroy(&mut self.backend);
        Ok(())
    }

    // ==================== Vertex arrays ====================

    pub fn create_vertex_array(&mut self) -> VertexArrayId {
        let id = VertexArrayId::next();
        self.vertex_arrays.insert(id, VertexArray::new());
        id
    }

    pub fn record_index_buffer(&mut self, vertex_array: VertexArrayId, buffer: IndexBufferId) -> Result<()> {
        if !self.index_buffers.contains_key(&buffer) {
            return Err(EngineError::not_found("index buffer", buffer.id()));
        }
        let array = self
            .vertex_arrays
            .get_mut(&vertex_array)
            .ok_or_else(|| EngineError::not_found("vertex array", vertex_array.id()))?;
        array.index_buffer = Some(buffer);
        Ok(())
    }

    /// Record one attribute stream, finalizing the vertex buffer on first use.
    #[allow(clippy::too_many_arguments)]
    pub fn record_vertex_buffer(
        &mut self,
        vertex_array: VertexArrayId,
        buffer: VertexBufferId,
        location: u32,
        byte_offset: u32,
        byte_stride: u16,
        num_components: u8,
        component_type: u32,
        normalized: bool,
    ) -> Result<()> {
        let layout = attribute_layout(location, num_components, component_type, normalized, byte_stride)?;

        let array = self
            .vertex_arrays
            .get_mut(&vertex_array)
            .ok_or_else(|| EngineError::not_found("vertex array", vertex_array.id()))?;
        let data = self
            .vertex_buffers
            .get_mut(&buffer)
            .ok_or_else(|| EngineError::not_found("vertex buffer", buffer.id()))?;

        data.ensure_finalized(&mut self.backend, &layout)?;
        let layout_handle = self.backend.create_vertex_layout(&layout)?;

        let stride = u32::from(layout.stride());
        let start_vertex = if stride == 0 { 0 } else { byte_offset / stride };
        array.vertex_streams.push(VertexStream {
            buffer,
            start_vertex,
            layout: layout_handle,
        });
        Ok(())
    }

    pub fn bind_vertex_array(&mut self, vertex_array: VertexArrayId) -> Result<()> {
        self.apply_vertex_array(vertex_array, Some((0, ALL_ELEMENTS)), 0, ALL_ELEMENTS)?;
        self.bound_vertex_array = Some(vertex_array);
        Ok(())
    }

    pub fn delete_vertex_array(&mut self, vertex_array: VertexArrayId) -> Result<()> {
        let array = self
            .vertex_arrays
            .remove(&vertex_array)
            .ok_or_else(|| EngineError::not_found("vertex array", vertex_array.id()))?;
        array.destroy(&mut self.backend);
        if self.bound_vertex_array == Some(vertex_array) {
            self.bound_vertex_array = None;
        }
        Ok(())
    }

    /// Bind the buffers of a vertex array for the next submission.
    fn apply_vertex_array(
        &mut self,
        vertex_array: VertexArrayId,
        index_range: Option<(u32, u32)>,
        vertex_offset: u32,
        num_vertices: u32,
    ) -> Result<()> {
        let array = self
            .vertex_arrays
            .get(&vertex_array)
            .ok_or_else(|| EngineError::not_found("vertex array", vertex_array.id()))?;

        if let (Some(id), Some((first, count))) = (array.index_buffer, index_range) {
            let buffer = self
                .index_buffers
                .get(&id)
                .ok_or_else(|| EngineError::not_found("index buffer", id.id()))?;
            self.backend.set_index_buffer(buffer.buffer(), first, count);
        }

        for (stream, vertex_stream) in array.vertex_streams.iter().enumerate() {
            let buffer = self
                .vertex_buffers
                .get(&vertex_stream.buffer)
                .and_then(VertexBufferData::buffer)
                .ok_or_else(|| EngineError::not_found("vertex buffer", vertex_stream.buffer.id()))?;
            let stream = u8::try_from(stream).map_err(|_| EngineError::invalid("too many vertex streams"))?;
            self.backend.set_vertex_buffer(
                stream,
                buffer,
                vertex_stream.start_vertex + vertex_offset,
                num_vertices,
                vertex_stream.layout,
            );
        }
        Ok(())
    }

    // ==================== Textures ====================

    /// Create an empty texture shell.
    pub fn create_texture(&mut self) -> TextureId {
        let id = TextureId::next();
        self.textures.insert(id, TextureData::new());
        id
    }

    fn texture(&self, id: TextureId) -> Result<&TextureData> {
        self.textures
            .get(&id)
            .ok_or_else(|| EngineError::not_found("texture", id.id()))
    }

    fn texture_mut(&mut self, id: TextureId) -> Result<&mut TextureData> {
        self.textures
            .get_mut(&id)
            .ok_or_else(|| EngineError::not_found("texture", id.id()))
    }

    /// Decode `bytes` on the worker pool and upload the result into `texture`.
    ///
    /// Exactly one of the callbacks runs once the upload has happened or a
    /// stage failed, unless the engine is disposed first. They run on a worker
    /// thread.
    pub fn load_texture<S, E>(
        &mut self,
        texture: TextureId,
        bytes: Vec<u8>,
        generate_mips: bool,
        invert_y: bool,
        on_success: S,
        on_error: E,
    ) -> Result<()>
    where
        S: FnOnce() + Send + 'static,
        E: FnOnce(TaskError) + Send + 'static,
    {
        self.texture(texture)?;
        let token = self.cancel.token();
        let scheduler = self.queue.scheduler();

        self.pool.spawn(async move {
            let outcome: std::result::Result<(), TaskError> = async {
                let image = run_blocking(&token, move || prepare_image(&bytes, invert_y, generate_mips)).await?;
                scheduler
                    .run(&token, move |engine: &mut NativeEngine<B>| engine.upload_texture(texture, image))
                    .await
            }
            .await;
            resolve(texture, outcome, on_success, on_error);
        });
        Ok(())
    }

    /// Load six encoded faces into a cube texture.
    ///
    /// Faces are decoded in parallel; with `generate_mips` each face gets its
    /// own chain.
    pub fn load_cube_texture<S, E>(
        &mut self,
        texture: TextureId,
        faces: Vec<Vec<u8>>,
        generate_mips: bool,
        on_success: S,
        on_error: E,
    ) -> Result<()>
    where
        S: FnOnce() + Send + 'static,
        E: FnOnce(TaskError) + Send + 'static,
    {
        self.texture(texture)?;
        if faces.len() != CUBE_FACES {
            return Err(EngineError::invalid(format!(
                "cube texture needs {CUBE_FACES} faces, got {}",
                faces.len()
            )));
        }
        self.spawn_cube_load(texture, faces, false, generate_mips, generate_mips, on_success, on_error);
        Ok(())
    }

    /// Load pre-mipped cube faces, given as `data[mip][face]`.
    pub fn load_cube_texture_with_mips<S, E>(
        &mut self,
        texture: TextureId,
        data: Vec<Vec<Vec<u8>>>,
        on_success: S,
        on_error: E,
    ) -> Result<()>
    where
        S: FnOnce() + Send + 'static,
        E: FnOnce(TaskError) + Send + 'static,
    {
        self.texture(texture)?;
        let num_mips = data.len();
        if num_mips == 0 {
            return Err(EngineError::invalid("cube texture needs at least one mip level"));
        }
        if let Some((mip, faces)) = data.iter().enumerate().find(|(_, faces)| faces.len() != CUBE_FACES) {
            return Err(EngineError::invalid(format!(
                "mip {mip} has {} faces, expected {CUBE_FACES}",
                faces.len()
            )));
        }

        let mut ordered = vec![Vec::new(); CUBE_FACES * num_mips];
        for (mip, faces) in data.into_iter().enumerate() {
            for (face, bytes) in faces.into_iter().enumerate() {
                ordered[face_major_index(face, mip, num_mips)] = bytes;
            }
        }
        self.spawn_cube_load(texture, ordered, true, false, num_mips > 1, on_success, on_error);
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    fn spawn_cube_load<S, E>(
        &self,
        texture: TextureId,
        images: Vec<Vec<u8>>,
        invert_y: bool,
        generate_mips: bool,
        has_mips: bool,
        on_success: S,
        on_error: E,
    ) where
        S: FnOnce() + Send + 'static,
        E: FnOnce(TaskError) + Send + 'static,
    {
        let token = self.cancel.token();
        let scheduler = self.queue.scheduler();

        self.pool.spawn(async move {
            let outcome: std::result::Result<(), TaskError> = async {
                let decodes = images.into_iter().map(|bytes| {
                    let token = token.clone();
                    async move { run_blocking(&token, move || prepare_image(&bytes, invert_y, generate_mips)).await }
                });
                let decoded = try_join_all(decodes).await?;
                let cube = CubeImage::assemble(decoded, has_mips).map_err(TaskError::failed)?;
                scheduler
                    .run(&token, move |engine: &mut NativeEngine<B>| engine.upload_cube(texture, cube))
                    .await
            }
            .await;
            resolve(texture, outcome, on_success, on_error);
        });
    }

    fn upload_texture(&mut self, texture: TextureId, image: ImageContainer) -> std::result::Result<(), TaskError> {
        let shell = self
            .textures
            .get_mut(&texture)
            .ok_or_else(|| TaskError::failed(format!("texture {texture} was deleted during the load")))?;

        let desc = image.texture_desc();
        let (width, height) = (image.width(), image.height());
        let handle = self
            .backend
            .create_texture(&desc, Some(Memory::from_vec(image.into_data())))
            .map_err(TaskError::failed)?;
        shell.attach(&mut self.backend, handle, width, height);
        Ok(())
    }

    fn upload_cube(&mut self, texture: TextureId, cube: CubeImage) -> std::result::Result<(), TaskError> {
        let shell = self
            .textures
            .get_mut(&texture)
            .ok_or_else(|| TaskError::failed(format!("texture {texture} was deleted during the load")))?;

        let desc = cube.texture_desc();
        let handle = self
            .backend
            .create_texture(&desc, Some(Memory::from_vec(cube.data)))
            .map_err(TaskError::failed)?;
        shell.attach(&mut self.backend, handle, cube.size, cube.height);
        Ok(())
    }

    pub fn get_texture_width(&self, texture: TextureId) -> Result<u32> {
        Ok(self.texture(texture)?.width())
    }

    pub fn get_texture_height(&self, texture: TextureId) -> Result<u32> {
        Ok(self.texture(texture)?.height())
    }

    /// Native handle of a texture; invalid until a load completes.
    pub fn texture_handle(&self, texture: TextureId) -> Result<TextureHandle> {
        Ok(self.texture(texture)?.handle())
    }

    pub fn set_texture_sampling(&mut self, texture: TextureId, mode: u32) -> Result<()> {
        self.texture_mut(texture)?.set_sampling(mode)
    }

    pub fn set_texture_wrap_mode(&mut self, texture: TextureId, u: u32, v: u32, w: u32) -> Result<()> {
        self.texture_mut(texture)?.set_wrap_mode(u, v, w)
    }

    pub fn set_texture_anisotropic_level(&mut self, texture: TextureId, level: u32) -> Result<()> {
        self.texture_mut(texture)?.set_anisotropic_level(level);
        Ok(())
    }

    /// Bind a texture to a sampler uniform for the next draws.
    pub fn set_texture(&mut self, uniform: UniformInfo, texture: TextureId) -> Result<()> {
        let data = self
            .textures
            .get(&texture)
            .ok_or_else(|| EngineError::not_found("texture", texture.id()))?;
        self.backend
            .set_texture(uniform.stage, uniform.handle, data.handle(), data.flags());
        Ok(())
    }

    pub fn delete_texture(&mut self, texture: TextureId) -> Result<()> {
        let data = self
            .textures
            .remove(&texture)
            .ok_or_else(|| EngineError::not_found("texture", texture.id()))?;
        data.destroy(&mut self.backend);
        Ok(())
    }

    // ==================== Frame buffers ====================

    /// Create a render target and point `texture` at its color attachment.
    ///
    /// The attachment belongs to the frame buffer; deleting the frame buffer
    /// releases it.
    #[allow(clippy::too_many_arguments)]
    pub fn create_frame_buffer(
        &mut self,
        texture: TextureId,
        width: u16,
        height: u16,
        format: u32,
        _sampling_mode: u32,
        generate_stencil: bool,
        generate_depth: bool,
        generate_mips: bool,
    ) -> Result<FrameBufferId> {
        if generate_stencil && !generate_depth {
            return Err(EngineError::InvalidFrameBufferConfig(
                "a stencil buffer requires a depth buffer",
            ));
        }
        let color_format = match format {
            constants::TEXTURETYPE_UNSIGNED_INT => TextureFormat::Rgba8,
            constants::TEXTURETYPE_FLOAT => TextureFormat::Rgba32F,
            other => return Err(EngineError::UnknownTextureFormat(other)),
        };
        self.texture(texture)?;

        let (w, h) = (u32::from(width), u32::from(height));
        let mut descs = vec![TextureDesc::texture_2d(w, h, generate_depth && generate_mips, color_format).as_render_target()];
        if generate_depth {
            let depth_format = if generate_stencil {
                TextureFormat::D24S8
            } else {
                TextureFormat::D32
            };
            descs.push(TextureDesc::texture_2d(w, h, generate_mips, depth_format).as_render_target());
        }

        let mut attachments = Vec::with_capacity(descs.len());
        for desc in &descs {
            match self.backend.create_texture(desc, None) {
                Ok(handle) => attachments.push(handle),
                Err(err) => {
                    self.destroy_textures(&attachments);
                    return Err(err.into());
                }
            }
        }
        let handle = match self.backend.create_frame_buffer(&attachments, true) {
            Ok(handle) => handle,
            Err(err) => {
                self.destroy_textures(&attachments);
                return Err(err.into());
            }
        };

        let color = self.backend.frame_buffer_texture(handle, 0);
        if let Some(shell) = self.textures.get_mut(&texture) {
            shell.borrow_attachment(&mut self.backend, color, w, h);
        }
        Ok(self.frame_buffers.create(handle, width, height))
    }

    fn destroy_textures(&mut self, handles: &[TextureHandle]) {
        for handle in handles {
            self.backend.destroy(Resource::Texture(*handle));
        }
    }

    /// Draw into `frame_buffer` on a fresh view.
    pub fn bind_frame_buffer(&mut self, frame_buffer: FrameBufferId) -> Result<()> {
        self.frame_buffers.bind(&mut self.backend, frame_buffer)
    }

    pub fn unbind_frame_buffer(&mut self, frame_buffer: FrameBufferId) -> Result<()> {
        self.frame_buffers.unbind(frame_buffer)
    }

    pub fn delete_frame_buffer(&mut self, frame_buffer: FrameBufferId) -> Result<()> {
        self.frame_buffers.delete(&mut self.backend, frame_buffer)
    }

    // ==================== Render state ====================

    pub fn set_state(&mut self, culling: bool, z_offset: f32, reverse_side: bool) {
        self.state.set_culling(culling, reverse_side);
        self.state.set_z_offset(z_offset);
    }

    pub fn set_z_offset(&mut self, z_offset: f32) {
        self.state.set_z_offset(z_offset);
    }

    pub fn get_z_offset(&self) -> f32 {
        self.state.z_offset()
    }

    pub fn set_depth_test(&mut self, enable: bool) {
        self.state.set_depth_test(enable);
    }

    pub fn get_depth_write(&self) -> bool {
        self.state.depth_write()
    }

    pub fn set_depth_write(&mut self, enable: bool) {
        self.state.set_depth_write(enable);
    }

    pub fn set_color_write(&mut self, enable: bool) {
        self.state.set_color_write(enable);
    }

    pub fn set_blend_mode(&mut self, mode: u32) -> Result<()> {
        self.state.set_blend_mode(AlphaMode::from_u32(mode)?);
        Ok(())
    }

    /// Set the clear flags of the current target.
    pub fn clear(&mut self, flags: u16) {
        self.frame_buffers
            .bound_mut()
            .clear_state_mut()
            .update_flags(&mut self.backend, flags);
    }

    pub fn clear_color(&mut self, red: f32, green: f32, blue: f32, alpha: f32) {
        self.frame_buffers
            .bound_mut()
            .clear_state_mut()
            .update_color(&mut self.backend, red, green, blue, alpha);
    }

    pub fn clear_depth(&mut self, depth: f32) {
        self.frame_buffers
            .bound_mut()
            .clear_state_mut()
            .update_depth(&mut self.backend, depth);
    }

    pub fn clear_stencil(&mut self, stencil: u8) {
        self.frame_buffers
            .bound_mut()
            .clear_state_mut()
            .update_stencil(&mut self.backend, stencil);
    }

    /// Restrict drawing to a fraction of the back buffer, bottom-left origin.
    pub fn set_viewport(&mut self, x: f32, y: f32, width: f32, height: f32) {
        self.frame_buffers.set_viewport(&mut self.backend, x, y, width, height);
    }

    // ==================== Draw ====================

    pub fn draw_indexed(&mut self, fill_mode: u32, index_start: u32, index_count: u32) -> Result<()> {
        let fill_mode = FillMode::from_u32(fill_mode)?;
        self.ensure_program()?;
        if let Some(vertex_array) = self.bound_vertex_array {
            self.apply_vertex_array(vertex_array, Some((index_start, index_count)), 0, ALL_ELEMENTS)?;
        }
        self.submit(fill_mode)
    }

    pub fn draw(&mut self, fill_mode: u32, vertex_start: u32, vertex_count: u32) -> Result<()> {
        let fill_mode = FillMode::from_u32(fill_mode)?;
        self.ensure_program()?;
        self.backend.discard(DiscardFlags::INDEX_BUFFER);
        if let Some(vertex_array) = self.bound_vertex_array {
            self.apply_vertex_array(vertex_array, None, vertex_start, vertex_count)?;
        }
        self.submit(fill_mode)
    }

    fn ensure_program(&self) -> Result<()> {
        match self.current_program {
            Some(id) if self.programs.contains_key(&id) => Ok(()),
            _ => Err(EngineError::NoProgramBound),
        }
    }

    /// Push staged uniforms and the render state, then submit to the bound view.
    fn submit(&mut self, fill_mode: FillMode) -> Result<()> {
        let program = self
            .current_program
            .and_then(|id| self.programs.get(&id))
            .ok_or(EngineError::NoProgramBound)?;

        for (handle, value) in program.pending_uniforms() {
            self.backend.set_uniform(handle, &value.data, value.element_count);
        }
        self.backend.set_state(self.state.for_draw(fill_mode), 0);
        self.backend
            .submit(self.frame_buffers.bound().view_id(), program.handle(), DRAW_DISCARD);
        Ok(())
    }

    // ==================== Readback ====================

    /// Read back a rectangle of the back buffer as RGBA8 rows.
    ///
    /// Advances frames until the backend delivers the screenshot.
    pub fn get_frame_buffer_data<F>(&mut self, x: u32, y: u32, width: u32, height: u32, callback: F) -> Result<()>
    where
        F: FnOnce(Vec<u8>),
    {
        if let Some(stale) = self.sink.take_screenshot() {
            trace!(width = stale.width, height = stale.height, "Dropping stale screenshot");
        }
        self.backend.request_screenshot(nativekit_gpu::FrameBufferHandle::INVALID);

        let mut shot = None;
        for _ in 0..SCREENSHOT_FRAMES {
            self.backend.frame();
            shot = self.sink.take_screenshot();
            if shot.is_some() {
                break;
            }
        }
        let shot = shot.ok_or(EngineError::ScreenshotUnavailable)?;

        if x.saturating_add(width) > shot.width || y.saturating_add(height) > shot.height {
            return Err(EngineError::invalid(format!(
                "rectangle {x},{y} {width}x{height} outside {}x{} frame",
                shot.width, shot.height
            )));
        }

        let mut pixels = Vec::with_capacity((width * height * 4) as usize);
        for py in y..y + height {
            let row = if shot.y_flip { shot.height - 1 - py } else { py };
            let start = (row * shot.pitch + x * 4) as usize;
            let line = shot
                .data
                .get(start..start + (width * 4) as usize)
                .ok_or_else(|| EngineError::invalid("screenshot shorter than its pitch"))?;
            for bgra in line.chunks_exact(4) {
                pixels.extend_from_slice(&[bgra[2], bgra[1], bgra[0], bgra[3]]);
            }
        }
        callback(pixels);
        Ok(())
    }
}

impl<B: GpuBackend + 'static> Drop for NativeEngine<B> {
    fn drop(&mut self) {
        self.dispose();
    }
}

/// Deliver the outcome of a load to exactly one callback.
fn resolve<S, E>(texture: TextureId, outcome: std::result::Result<(), TaskError>, on_success: S, on_error: E)
where
    S: FnOnce(),
    E: FnOnce(TaskError),
{
    match outcome {
        Ok(()) => {
            debug!(texture = %texture, "Texture load complete");
            on_success();
        }
        Err(err) if err.is_cancelled() => {
            debug!(texture = %texture, "Texture load cancelled");
        }
        Err(err) => {
            warn!(texture = %texture, error = %err, "Texture load failed");
            on_error(err);
        }
    }
}
