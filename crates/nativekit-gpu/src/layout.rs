//! Vertex attribute layouts.

use serde::Serialize;

/// Vertex attribute semantic. The discriminant is the shader input location.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[repr(u8)]
pub enum Attrib {
    Position = 0,
    Normal,
    Tangent,
    Bitangent,
    Color0,
    Color1,
    Color2,
    Color3,
    Indices,
    Weight,
    TexCoord0,
    TexCoord1,
    TexCoord2,
    TexCoord3,
    TexCoord4,
    TexCoord5,
    TexCoord6,
    TexCoord7,
}

impl Attrib {
    pub const COUNT: usize = 18;

    const ALL: [Attrib; Self::COUNT] = [
        Attrib::Position,
        Attrib::Normal,
        Attrib::Tangent,
        Attrib::Bitangent,
        Attrib::Color0,
        Attrib::Color1,
        Attrib::Color2,
        Attrib::Color3,
        Attrib::Indices,
        Attrib::Weight,
        Attrib::TexCoord0,
        Attrib::TexCoord1,
        Attrib::TexCoord2,
        Attrib::TexCoord3,
        Attrib::TexCoord4,
        Attrib::TexCoord5,
        Attrib::TexCoord6,
        Attrib::TexCoord7,
    ];

    /// Attribute bound at a shader input location.
    pub fn from_location(location: u32) -> Option<Self> {
        Self::ALL.get(location as usize).copied()
    }

    pub fn location(self) -> u32 {
        self as u32
    }

    /// Stable id written into shader binaries.
    pub fn id(self) -> u16 {
        match self {
            Attrib::Position => 0x0001,
            Attrib::Normal => 0x0002,
            Attrib::Tangent => 0x0003,
            Attrib::Bitangent => 0x0004,
            Attrib::Color0 => 0x0005,
            Attrib::Color1 => 0x0006,
            Attrib::Color2 => 0x0018,
            Attrib::Color3 => 0x0019,
            Attrib::Indices => 0x000e,
            Attrib::Weight => 0x000f,
            Attrib::TexCoord0 => 0x0010,
            Attrib::TexCoord1 => 0x0011,
            Attrib::TexCoord2 => 0x0012,
            Attrib::TexCoord3 => 0x0013,
            Attrib::TexCoord4 => 0x0014,
            Attrib::TexCoord5 => 0x0015,
            Attrib::TexCoord6 => 0x0016,
            Attrib::TexCoord7 => 0x0017,
        }
    }

    /// Inverse of [`Attrib::id`].
    pub fn from_id(id: u16) -> Option<Self> {
        Self::ALL.iter().copied().find(|attrib| attrib.id() == id)
    }
}

/// Component type of a vertex attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum AttribType {
    Uint8,
    Int16,
    Float,
}

impl AttribType {
    pub fn size(self) -> u16 {
        match self {
            AttribType::Uint8 => 1,
            AttribType::Int16 => 2,
            AttribType::Float => 4,
        }
    }
}

/// One attribute within a layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct VertexAttribute {
    pub attrib: Attrib,
    pub num: u8,
    pub ty: AttribType,
    pub normalized: bool,
    pub offset: u16,
}

/// Description of how one vertex stream is laid out in memory.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize)]
pub struct VertexLayout {
    attributes: Vec<VertexAttribute>,
    stride: u16,
}

impl VertexLayout {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an attribute at the current end of the vertex.
    pub fn add(mut self, attrib: Attrib, num: u8, ty: AttribType, normalized: bool) -> Self {
        let offset = self.stride;
        self.attributes.push(VertexAttribute {
            attrib,
            num,
            ty,
            normalized,
            offset,
        });
        self.stride += u16::from(num) * ty.size();
        self
    }

    /// Override the computed stride, e.g. for interleaved source data.
    pub fn with_stride(mut self, stride: u16) -> Self {
        self.stride = stride;
        self
    }

    pub fn stride(&self) -> u16 {
        self.stride
    }

    pub fn attributes(&self) -> &[VertexAttribute] {
        &self.attributes
    }

    pub fn has(&self, attrib: Attrib) -> bool {
        self.attributes.iter().any(|a| a.attrib == attrib)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_location_round_trip() {
        assert_eq!(Attrib::from_location(0), Some(Attrib::Position));
        assert_eq!(Attrib::from_location(10), Some(Attrib::TexCoord0));
        assert_eq!(Attrib::from_location(18), None);
        assert_eq!(Attrib::Weight.location(), 9);
        assert_eq!(Attrib::from_id(Attrib::Color3.id()), Some(Attrib::Color3));
    }

    #[test]
    fn test_layout_offsets_and_stride() {
        let layout = VertexLayout::new()
            .add(Attrib::Position, 3, AttribType::Float, false)
            .add(Attrib::Color0, 4, AttribType::Uint8, true);
        assert_eq!(layout.stride(), 16);
        assert_eq!(layout.attributes()[1].offset, 12);
        assert!(layout.has(Attrib::Color0));
        assert!(!layout.has(Attrib::Normal));

        let strided = VertexLayout::new()
            .add(Attrib::Normal, 3, AttribType::Float, false)
            .with_stride(32);
        assert_eq!(strided.stride(), 32);
    }
}
