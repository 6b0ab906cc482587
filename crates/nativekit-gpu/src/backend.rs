//! The command-buffer API the rendering layer drives.

use crate::{
    BufferFlags, Capabilities, ClearFlags, DiscardFlags, DynamicIndexBufferHandle,
    DynamicVertexBufferHandle, FrameBufferHandle, IndexBuffer, IndexBufferHandle, Memory,
    ProgramHandle, Resource, ResetFlags, SamplerFlags, ShaderHandle, StateFlags, Stats,
    TextureDesc, TextureHandle, UniformHandle, UniformType, VertexBuffer, VertexBufferHandle,
    VertexLayout, VertexLayoutHandle, ViewId, ViewRect,
};
use crate::GpuError;

/// Use the whole buffer in `set_index_buffer` / `set_vertex_buffer`.
pub const ALL_ELEMENTS: u32 = u32::MAX;

/// Uniform as registered by the backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UniformDesc {
    pub name: String,
    pub ty: UniformType,
    pub num: u16,
}

/// A low-level, view-based GPU command-buffer API.
///
/// Resource calls take effect immediately. Per-draw calls (`set_*`) build up
/// transient state that `submit` consumes; the `DiscardFlags` passed to
/// `submit` or `discard` decide which parts of it are dropped afterwards.
/// Views are drawn in id order when `frame` is called.
///
/// All methods must be called from the render thread.
pub trait GpuBackend {
    fn caps(&self) -> Capabilities;
    fn stats(&self) -> Stats;
    fn reset(&mut self, width: u32, height: u32, flags: ResetFlags);
    /// Flush the current frame, returning its number.
    fn frame(&mut self) -> u32;

    fn create_index_buffer(&mut self, mem: Memory, flags: BufferFlags) -> Result<IndexBufferHandle, GpuError>;
    fn create_dynamic_index_buffer(
        &mut self,
        mem: Memory,
        flags: BufferFlags,
    ) -> Result<DynamicIndexBufferHandle, GpuError>;
    fn update_dynamic_index_buffer(
        &mut self,
        handle: DynamicIndexBufferHandle,
        start_index: u32,
        mem: Memory,
    ) -> Result<(), GpuError>;

    fn create_vertex_buffer(&mut self, mem: Memory, layout: &VertexLayout) -> Result<VertexBufferHandle, GpuError>;
    fn create_dynamic_vertex_buffer(
        &mut self,
        mem: Memory,
        layout: &VertexLayout,
        flags: BufferFlags,
    ) -> Result<DynamicVertexBufferHandle, GpuError>;
    fn update_dynamic_vertex_buffer(
        &mut self,
        handle: DynamicVertexBufferHandle,
        start_vertex: u32,
        mem: Memory,
    ) -> Result<(), GpuError>;
    fn create_vertex_layout(&mut self, layout: &VertexLayout) -> Result<VertexLayoutHandle, GpuError>;

    /// Load a shader binary. Uniforms it declares are registered by name and
    /// shared with other shaders declaring the same name.
    fn create_shader(&mut self, mem: Memory) -> Result<ShaderHandle, GpuError>;
    fn shader_uniforms(&self, shader: ShaderHandle) -> Vec<UniformHandle>;
    fn uniform_info(&self, uniform: UniformHandle) -> Option<UniformDesc>;
    fn create_program(
        &mut self,
        vertex: ShaderHandle,
        fragment: ShaderHandle,
        destroy_shaders: bool,
    ) -> Result<ProgramHandle, GpuError>;

    fn create_texture(&mut self, desc: &TextureDesc, mem: Option<Memory>) -> Result<TextureHandle, GpuError>;
    fn create_frame_buffer(
        &mut self,
        attachments: &[TextureHandle],
        destroy_textures: bool,
    ) -> Result<FrameBufferHandle, GpuError>;
    fn frame_buffer_texture(&self, frame_buffer: FrameBufferHandle, attachment: u8) -> TextureHandle;

    fn destroy(&mut self, resource: Resource);

    fn set_view_clear(&mut self, view: ViewId, flags: ClearFlags, rgba: u32, depth: f32, stencil: u8);
    fn set_view_rect(&mut self, view: ViewId, rect: ViewRect);
    /// `FrameBufferHandle::INVALID` targets the back buffer.
    fn set_view_frame_buffer(&mut self, view: ViewId, frame_buffer: FrameBufferHandle);
    /// Make sure the view is processed even without draws (so it clears).
    fn touch(&mut self, view: ViewId);
    fn discard(&mut self, flags: DiscardFlags);

    fn set_state(&mut self, state: StateFlags, blend_rgba: u32);
    fn set_uniform(&mut self, uniform: UniformHandle, values: &[f32], num: u16);
    fn set_texture(&mut self, stage: u8, sampler: UniformHandle, texture: TextureHandle, flags: SamplerFlags);
    fn set_index_buffer(&mut self, buffer: IndexBuffer, first_index: u32, num_indices: u32);
    fn set_vertex_buffer(
        &mut self,
        stream: u8,
        buffer: VertexBuffer,
        start_vertex: u32,
        num_vertices: u32,
        layout: VertexLayoutHandle,
    );
    fn submit(&mut self, view: ViewId, program: ProgramHandle, discard: DiscardFlags);

    /// Capture the frame buffer at the end of the next frame; the result is
    /// delivered to the diagnostics sink.
    fn request_screenshot(&mut self, frame_buffer: FrameBufferHandle);
}
