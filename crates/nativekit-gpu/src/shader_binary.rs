//! Shader binary container consumed by `GpuBackend::create_shader`.
//!
//! Layout (little endian):
//!
//! ```text
//! u32 magic ('V'|'F', 'S', 'H', version)
//! u32 output hash, u32 input hash
//! u16 uniform count
//!   u8 name length, name bytes, u8 type|flags, u8 count, u16 register index, u16 register count
//! u32 code size, code bytes, u8 0
//! u8 attribute count, u16 attribute id ...
//! u16 uniform block size
//! ```

use serde::Serialize;

use crate::{Attrib, GpuError};

const VERSION: u8 = 6;
const IO_HASH: u32 = 0x0BAD_1DEA;
const FRAGMENT_BIT: u8 = 0x10;
const SAMPLER_BIT: u8 = 0x20;
const TYPE_MASK: u8 = 0x0f;

const fn fourcc(a: u8, b: u8, c: u8, d: u8) -> u32 {
    a as u32 | (b as u32) << 8 | (c as u32) << 16 | (d as u32) << 24
}

/// Pipeline stage of a shader.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ShaderStage {
    Vertex,
    Fragment,
}

impl ShaderStage {
    fn magic(self) -> u32 {
        match self {
            ShaderStage::Vertex => fourcc(b'V', b'S', b'H', VERSION),
            ShaderStage::Fragment => fourcc(b'F', b'S', b'H', VERSION),
        }
    }

    fn from_magic(magic: u32) -> Option<Self> {
        [ShaderStage::Vertex, ShaderStage::Fragment]
            .into_iter()
            .find(|stage| stage.magic() == magic)
    }
}

/// Native uniform type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[repr(u8)]
pub enum UniformType {
    Sampler = 0,
    Vec4 = 2,
    Mat3 = 3,
    Mat4 = 4,
}

impl UniformType {
    fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(UniformType::Sampler),
            2 => Some(UniformType::Vec4),
            3 => Some(UniformType::Mat3),
            4 => Some(UniformType::Mat4),
            _ => None,
        }
    }
}

/// One entry of the uniform table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UniformEntry {
    pub name: String,
    pub ty: UniformType,
    pub fragment: bool,
    pub num: u8,
    pub reg_index: u16,
    pub reg_count: u16,
}

impl UniformEntry {
    pub fn is_sampler(&self) -> bool {
        self.ty == UniformType::Sampler
    }
}

/// A compiled shader plus the metadata the backend needs to bind it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShaderBinary {
    pub stage: ShaderStage,
    pub uniforms: Vec<UniformEntry>,
    pub code: Vec<u8>,
    /// Vertex stage inputs; always empty for fragment shaders.
    pub attributes: Vec<Attrib>,
    pub uniform_block_size: u16,
}

impl ShaderBinary {
    pub fn new(stage: ShaderStage) -> Self {
        Self {
            stage,
            uniforms: Vec::new(),
            code: Vec::new(),
            attributes: Vec::new(),
            uniform_block_size: 0,
        }
    }

    /// Serialize into the container format.
    pub fn to_bytes(&self) -> Result<Vec<u8>, GpuError> {
        let mut out = Vec::with_capacity(self.code.len() + 64);
        out.extend_from_slice(&self.stage.magic().to_le_bytes());
        out.extend_from_slice(&IO_HASH.to_le_bytes());
        out.extend_from_slice(&IO_HASH.to_le_bytes());

        let count = u16::try_from(self.uniforms.len())
            .map_err(|_| GpuError::invalid_shader("too many uniforms"))?;
        out.extend_from_slice(&count.to_le_bytes());

        for uniform in &self.uniforms {
            let name = uniform.name.as_bytes();
            let len = u8::try_from(name.len()).map_err(|_| {
                GpuError::invalid_shader(format!("uniform name too long: {}", uniform.name))
            })?;
            out.push(len);
            out.extend_from_slice(name);

            let mut ty = uniform.ty as u8;
            if uniform.fragment {
                ty |= FRAGMENT_BIT;
            }
            if uniform.is_sampler() {
                ty |= SAMPLER_BIT;
            }
            out.push(ty);
            out.push(uniform.num);
            out.extend_from_slice(&uniform.reg_index.to_le_bytes());
            out.extend_from_slice(&uniform.reg_count.to_le_bytes());
        }

        let code_len = u32::try_from(self.code.len())
            .map_err(|_| GpuError::invalid_shader("shader code too large"))?;
        out.extend_from_slice(&code_len.to_le_bytes());
        out.extend_from_slice(&self.code);
        out.push(0);

        let attributes = match self.stage {
            ShaderStage::Vertex => self.attributes.as_slice(),
            ShaderStage::Fragment => &[],
        };
        let attr_count = u8::try_from(attributes.len())
            .map_err(|_| GpuError::invalid_shader("too many attributes"))?;
        out.push(attr_count);
        for attrib in attributes {
            out.extend_from_slice(&attrib.id().to_le_bytes());
        }

        out.extend_from_slice(&self.uniform_block_size.to_le_bytes());
        Ok(out)
    }

    /// Parse the container format.
    pub fn parse(bytes: &[u8]) -> Result<Self, GpuError> {
        let mut reader = Reader { bytes, pos: 0 };

        let magic = reader.u32()?;
        let stage = ShaderStage::from_magic(magic)
            .ok_or_else(|| GpuError::invalid_shader(format!("bad magic {magic:#010x}")))?;
        let _output_hash = reader.u32()?;
        let _input_hash = reader.u32()?;

        let count = reader.u16()?;
        let mut uniforms = Vec::with_capacity(usize::from(count));
        for _ in 0..count {
            let len = reader.u8()?;
            let name = String::from_utf8(reader.take(usize::from(len))?.to_vec())
                .map_err(|_| GpuError::invalid_shader("uniform name is not utf-8"))?;
            let raw_ty = reader.u8()?;
            let ty = UniformType::from_u8(raw_ty & TYPE_MASK).ok_or_else(|| {
                GpuError::invalid_shader(format!("unknown uniform type {raw_ty:#04x}"))
            })?;
            uniforms.push(UniformEntry {
                name,
                ty,
                fragment: raw_ty & FRAGMENT_BIT != 0,
                num: reader.u8()?,
                reg_index: reader.u16()?,
                reg_count: reader.u16()?,
            });
        }

        let code_len = reader.u32()? as usize;
        let code = reader.take(code_len)?.to_vec();
        let _terminator = reader.u8()?;

        let attr_count = reader.u8()?;
        let mut attributes = Vec::with_capacity(usize::from(attr_count));
        for _ in 0..attr_count {
            let id = reader.u16()?;
            let attrib = Attrib::from_id(id)
                .ok_or_else(|| GpuError::invalid_shader(format!("unknown attribute id {id:#06x}")))?;
            attributes.push(attrib);
        }

        let uniform_block_size = reader.u16()?;

        Ok(Self {
            stage,
            uniforms,
            code,
            attributes,
            uniform_block_size,
        })
    }
}

struct Reader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn take(&mut self, len: usize) -> Result<&'a [u8], GpuError> {
        let end = self.pos.checked_add(len).filter(|&end| end <= self.bytes.len());
        match end {
            Some(end) => {
                let slice = &self.bytes[self.pos..end];
                self.pos = end;
                Ok(slice)
            }
            None => Err(GpuError::invalid_shader(format!(
                "truncated at byte {}",
                self.pos
            ))),
        }
    }

    fn u8(&mut self) -> Result<u8, GpuError> {
        Ok(self.take(1)?[0])
    }

    fn u16(&mut self) -> Result<u16, GpuError> {
        let bytes = self.take(2)?;
        Ok(u16::from_le_bytes([bytes[0], bytes[1]]))
    }

    fn u32(&mut self) -> Result<u32, GpuError> {
        let bytes = self.take(4)?;
        Ok(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vertex_binary() -> ShaderBinary {
        ShaderBinary {
            stage: ShaderStage::Vertex,
            uniforms: vec![UniformEntry {
                name: "world".to_string(),
                ty: UniformType::Mat4,
                fragment: false,
                num: 0,
                reg_index: 0,
                reg_count: 4,
            }],
            code: b"void main() {}".to_vec(),
            attributes: vec![Attrib::Position, Attrib::TexCoord0],
            uniform_block_size: 64,
        }
    }

    #[test]
    fn test_header_layout() {
        let bytes = vertex_binary().to_bytes().unwrap();
        assert_eq!(&bytes[0..4], &[b'V', b'S', b'H', 6]);
        assert_eq!(u32::from_le_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]), IO_HASH);
        assert_eq!(u16::from_le_bytes([bytes[12], bytes[13]]), 1);
        assert_eq!(bytes[14] as usize, "world".len());
        assert_eq!(&bytes[bytes.len() - 2..], &64u16.to_le_bytes());
    }

    #[test]
    fn test_parse_restores_fields() {
        let binary = vertex_binary();
        let parsed = ShaderBinary::parse(&binary.to_bytes().unwrap()).unwrap();
        assert_eq!(parsed, binary);
    }

    #[test]
    fn test_fragment_sampler_flags() {
        let mut binary = ShaderBinary::new(ShaderStage::Fragment);
        binary.attributes.push(Attrib::Position);
        binary.uniforms.push(UniformEntry {
            name: "albedo".to_string(),
            ty: UniformType::Sampler,
            fragment: true,
            num: 0,
            reg_index: 0,
            reg_count: 0,
        });
        let bytes = binary.to_bytes().unwrap();
        assert_eq!(&bytes[0..4], &[b'F', b'S', b'H', 6]);
        let type_byte = bytes[14 + 1 + "albedo".len()];
        assert_eq!(type_byte, FRAGMENT_BIT | SAMPLER_BIT);

        let parsed = ShaderBinary::parse(&bytes).unwrap();
        assert!(parsed.uniforms[0].is_sampler());
        assert!(parsed.uniforms[0].fragment);
        assert!(parsed.attributes.is_empty());
    }

    #[test]
    fn test_truncated_binary_rejected() {
        let bytes = vertex_binary().to_bytes().unwrap();
        assert!(ShaderBinary::parse(&bytes[..bytes.len() - 1]).is_err());
        assert!(ShaderBinary::parse(b"XSH\x06").is_err());
    }
}
