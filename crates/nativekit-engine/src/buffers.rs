//! Index buffers, vertex buffers and vertex arrays.

use nativekit_gpu::{
    Attrib, AttribType, BufferFlags, GpuBackend, IndexBuffer, Memory, VertexBuffer, VertexLayout,
    VertexLayoutHandle,
};
use tracing::{debug, trace};

use crate::{constants, EngineError, IndexBufferId, Result, VertexBufferId};

// ==================== Index buffers ====================

/// Index data with its element width.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IndexData {
    U16(Vec<u16>),
    U32(Vec<u32>),
}

impl IndexData {
    pub fn flags(&self) -> BufferFlags {
        match self {
            IndexData::U16(_) => BufferFlags::empty(),
            IndexData::U32(_) => BufferFlags::INDEX32,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            IndexData::U16(indices) => indices.len(),
            IndexData::U32(indices) => indices.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn as_bytes(&self) -> &[u8] {
        match self {
            IndexData::U16(indices) => bytemuck::cast_slice(indices),
            IndexData::U32(indices) => bytemuck::cast_slice(indices),
        }
    }
}

/// An index buffer, created as soon as its data arrives.
#[derive(Debug)]
pub struct IndexBufferData {
    buffer: IndexBuffer,
}

impl IndexBufferData {
    pub fn new<B: GpuBackend>(backend: &mut B, data: &IndexData, dynamic: bool) -> Result<Self> {
        let mem = Memory::copy(data.as_bytes());
        let buffer = if dynamic {
            IndexBuffer::Dynamic(backend.create_dynamic_index_buffer(mem, data.flags())?)
        } else {
            IndexBuffer::Static(backend.create_index_buffer(mem, data.flags())?)
        };
        debug!(?buffer, indices = data.len(), "Created index buffer");
        Ok(Self { buffer })
    }

    pub fn buffer(&self) -> IndexBuffer {
        self.buffer
    }

    pub fn update<B: GpuBackend>(&self, backend: &mut B, data: &IndexData, start_index: u32) -> Result<()> {
        match self.buffer {
            IndexBuffer::Static(_) => Err(EngineError::NonDynamicUpdate { kind: "index" }),
            IndexBuffer::Dynamic(handle) => {
                backend.update_dynamic_index_buffer(handle, start_index, Memory::copy(data.as_bytes()))?;
                Ok(())
            }
        }
    }

    pub fn destroy<B: GpuBackend>(self, backend: &mut B) {
        backend.destroy(self.buffer.resource());
    }
}

// ==================== Vertex buffers ====================

#[derive(Debug)]
enum VertexBufferState {
    /// Bytes waiting for the first recorded layout.
    Staged { bytes: Vec<u8>, dynamic: bool },
    Finalized(VertexBuffer),
}

/// A vertex buffer that becomes a native buffer once its layout is known.
#[derive(Debug)]
pub struct VertexBufferData {
    state: VertexBufferState,
}

impl VertexBufferData {
    pub fn new(bytes: Vec<u8>, dynamic: bool) -> Self {
        Self {
            state: VertexBufferState::Staged { bytes, dynamic },
        }
    }

    pub fn is_dynamic(&self) -> bool {
        match &self.state {
            VertexBufferState::Staged { dynamic, .. } => *dynamic,
            VertexBufferState::Finalized(buffer) => buffer.is_dynamic(),
        }
    }

    pub fn is_finalized(&self) -> bool {
        matches!(self.state, VertexBufferState::Finalized(_))
    }

    /// Staged bytes, if not yet finalized.
    pub fn staged_bytes(&self) -> Option<&[u8]> {
        match &self.state {
            VertexBufferState::Staged { bytes, .. } => Some(bytes),
            VertexBufferState::Finalized(_) => None,
        }
    }

    /// The native buffer, once finalized.
    pub fn buffer(&self) -> Option<VertexBuffer> {
        match self.state {
            VertexBufferState::Finalized(buffer) => Some(buffer),
            VertexBufferState::Staged { .. } => None,
        }
    }

    /// Create the native buffer from the staged bytes. No-op when already
    /// finalized.
    pub fn ensure_finalized<B: GpuBackend>(&mut self, backend: &mut B, layout: &VertexLayout) -> Result<VertexBuffer> {
        let (mem, dynamic) = match &self.state {
            VertexBufferState::Finalized(buffer) => return Ok(*buffer),
            VertexBufferState::Staged { bytes, dynamic } => (Memory::copy(bytes), *dynamic),
        };

        let len = mem.len();
        let created = if dynamic {
            backend
                .create_dynamic_vertex_buffer(mem, layout, BufferFlags::empty())
                .map(VertexBuffer::Dynamic)
        } else {
            backend.create_vertex_buffer(mem, layout).map(VertexBuffer::Static)
        };

        let buffer = created?;
        debug!(?buffer, bytes = len, stride = layout.stride(), "Finalized vertex buffer");
        self.state = VertexBufferState::Finalized(buffer);
        Ok(buffer)
    }

    /// Replace the contents with `data[byte_offset..byte_offset + byte_length]`.
    ///
    /// A zero `byte_length` takes everything after `byte_offset`.
    pub fn update<B: GpuBackend>(
        &mut self,
        backend: &mut B,
        data: &[u8],
        byte_offset: usize,
        byte_length: usize,
    ) -> Result<()> {
        if !self.is_dynamic() {
            return Err(EngineError::NonDynamicUpdate { kind: "vertex" });
        }

        let end = if byte_length == 0 {
            data.len()
        } else {
            byte_offset.saturating_add(byte_length)
        };
        let range = data.get(byte_offset..end).ok_or_else(|| {
            EngineError::invalid(format!(
                "range {byte_offset}..{end} outside {} bytes of update data",
                data.len()
            ))
        })?;

        match &mut self.state {
            VertexBufferState::Staged { bytes, .. } => {
                trace!(bytes = range.len(), "Replaced staged vertex bytes");
                *bytes = range.to_vec();
            }
            VertexBufferState::Finalized(VertexBuffer::Dynamic(handle)) => {
                backend.update_dynamic_vertex_buffer(*handle, 0, Memory::copy(range))?;
            }
            VertexBufferState::Finalized(VertexBuffer::Static(_)) => {
                return Err(EngineError::NonDynamicUpdate { kind: "vertex" });
            }
        }
        Ok(())
    }

    pub fn destroy<B: GpuBackend>(self, backend: &mut B) {
        if let VertexBufferState::Finalized(buffer) = self.state {
            backend.destroy(buffer.resource());
        }
    }
}

/// Map a scripting-layer component type to the native one.
pub fn attrib_type(ty: u32) -> Result<AttribType> {
    match ty {
        constants::UNSIGNED_BYTE => Ok(AttribType::Uint8),
        constants::SHORT => Ok(AttribType::Int16),
        constants::FLOAT => Ok(AttribType::Float),
        other => Err(EngineError::UnsupportedAttribType(other)),
    }
}

/// Single-attribute layout for one recorded vertex stream.
pub fn attribute_layout(location: u32, num: u8, ty: u32, normalized: bool, byte_stride: u16) -> Result<VertexLayout> {
    let attrib = Attrib::from_location(location)
        .ok_or_else(|| EngineError::invalid(format!("attribute location {location} out of range")))?;
    let layout = VertexLayout::new().add(attrib, num, attrib_type(ty)?, normalized);
    if byte_stride == 0 {
        Ok(layout)
    } else {
        Ok(layout.with_stride(byte_stride))
    }
}

// ==================== Vertex arrays ====================

/// One recorded vertex stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VertexStream {
    pub buffer: VertexBufferId,
    pub start_vertex: u32,
    pub layout: VertexLayoutHandle,
}

/// The buffer bindings of one geometry.
#[derive(Debug, Default)]
pub struct VertexArray {
    pub index_buffer: Option<IndexBufferId>,
    pub vertex_streams: Vec<VertexStream>,
}

impl VertexArray {
    pub fn new() -> Self {
        Self::default()
    }

    /// Destroy the layout handles created for the recorded streams.
    pub fn destroy<B: GpuBackend>(self, backend: &mut B) {
        for stream in self.vertex_streams {
            backend.destroy(nativekit_gpu::Resource::VertexLayout(stream.layout));
        }
    }
}
