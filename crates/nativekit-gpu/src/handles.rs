//! Typed native resource handles.

use serde::Serialize;

macro_rules! define_handle {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
        pub struct $name(u16);

        impl $name {
            pub const INVALID: Self = Self(u16::MAX);

            pub const fn from_raw(index: u16) -> Self {
                Self(index)
            }

            pub const fn index(self) -> u16 {
                self.0
            }

            pub const fn is_valid(self) -> bool {
                self.0 != u16::MAX
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::INVALID
            }
        }
    };
}

define_handle!(
    /// Immutable index buffer.
    IndexBufferHandle
);
define_handle!(
    /// Streaming index buffer, updatable after creation.
    DynamicIndexBufferHandle
);
define_handle!(
    /// Immutable vertex buffer.
    VertexBufferHandle
);
define_handle!(
    /// Streaming vertex buffer, updatable after creation.
    DynamicVertexBufferHandle
);
define_handle!(VertexLayoutHandle);
define_handle!(ShaderHandle);
define_handle!(ProgramHandle);
define_handle!(UniformHandle);
define_handle!(TextureHandle);
define_handle!(FrameBufferHandle);

/// Numbered render pass.
pub type ViewId = u16;

/// One of the two index buffer kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum IndexBuffer {
    Static(IndexBufferHandle),
    Dynamic(DynamicIndexBufferHandle),
}

impl IndexBuffer {
    pub fn is_dynamic(&self) -> bool {
        matches!(self, IndexBuffer::Dynamic(_))
    }

    pub fn resource(self) -> Resource {
        match self {
            IndexBuffer::Static(handle) => Resource::IndexBuffer(handle),
            IndexBuffer::Dynamic(handle) => Resource::DynamicIndexBuffer(handle),
        }
    }
}

/// One of the two vertex buffer kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum VertexBuffer {
    Static(VertexBufferHandle),
    Dynamic(DynamicVertexBufferHandle),
}

impl VertexBuffer {
    pub fn is_dynamic(&self) -> bool {
        matches!(self, VertexBuffer::Dynamic(_))
    }

    pub fn resource(self) -> Resource {
        match self {
            VertexBuffer::Static(handle) => Resource::VertexBuffer(handle),
            VertexBuffer::Dynamic(handle) => Resource::DynamicVertexBuffer(handle),
        }
    }
}

/// Any destroyable native resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Resource {
    IndexBuffer(IndexBufferHandle),
    DynamicIndexBuffer(DynamicIndexBufferHandle),
    VertexBuffer(VertexBufferHandle),
    DynamicVertexBuffer(DynamicVertexBufferHandle),
    VertexLayout(VertexLayoutHandle),
    Shader(ShaderHandle),
    Program(ProgramHandle),
    Uniform(UniformHandle),
    Texture(TextureHandle),
    FrameBuffer(FrameBufferHandle),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_handle_default() {
        assert!(!TextureHandle::default().is_valid());
        assert!(TextureHandle::from_raw(0).is_valid());
        assert_eq!(ProgramHandle::from_raw(7).index(), 7);
    }

    #[test]
    fn test_buffer_kind_resources() {
        let stat = VertexBuffer::Static(VertexBufferHandle::from_raw(1));
        let dynamic = VertexBuffer::Dynamic(DynamicVertexBufferHandle::from_raw(1));
        assert!(!stat.is_dynamic());
        assert!(dynamic.is_dynamic());
        assert_eq!(
            dynamic.resource(),
            Resource::DynamicVertexBuffer(DynamicVertexBufferHandle::from_raw(1))
        );
        assert_eq!(
            IndexBuffer::Static(IndexBufferHandle::from_raw(3)).resource(),
            Resource::IndexBuffer(IndexBufferHandle::from_raw(3))
        );
    }
}
