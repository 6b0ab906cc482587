//! Capabilities and resource descriptors.

use serde::{Deserialize, Serialize};

use crate::SamplerFlags;

/// What the native renderer supports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Capabilities {
    /// Number of views that may be used within one frame.
    pub max_views: u16,
    /// Whether framebuffer coordinates start at the bottom left (OpenGL style).
    pub origin_bottom_left: bool,
    pub max_texture_size: u32,
}

impl Default for Capabilities {
    fn default() -> Self {
        Self {
            max_views: 256,
            origin_bottom_left: true,
            max_texture_size: 16384,
        }
    }
}

/// Back buffer size as last reset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct Stats {
    pub width: u32,
    pub height: u32,
}

/// Viewport rectangle of a view, in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct ViewRect {
    pub x: u16,
    pub y: u16,
    pub width: u16,
    pub height: u16,
}

/// Pixel format of a texture.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TextureFormat {
    R8,
    Rg8,
    Rgb8,
    Rgba8,
    Bgra8,
    R16,
    Rg16,
    Rgba16,
    Rgba32F,
    D24S8,
    D32,
}

impl TextureFormat {
    pub fn bytes_per_pixel(self) -> usize {
        match self {
            TextureFormat::R8 => 1,
            TextureFormat::Rg8 | TextureFormat::R16 => 2,
            TextureFormat::Rgb8 => 3,
            TextureFormat::Rgba8
            | TextureFormat::Bgra8
            | TextureFormat::Rg16
            | TextureFormat::D24S8
            | TextureFormat::D32 => 4,
            TextureFormat::Rgba16 => 8,
            TextureFormat::Rgba32F => 16,
        }
    }

    pub fn is_depth(self) -> bool {
        matches!(self, TextureFormat::D24S8 | TextureFormat::D32)
    }
}

/// 2D texture or cube map.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum TextureKind {
    Texture2D,
    Cube,
}

impl TextureKind {
    pub fn faces(self) -> usize {
        match self {
            TextureKind::Texture2D => 1,
            TextureKind::Cube => 6,
        }
    }
}

/// Parameters of a texture creation call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TextureDesc {
    pub kind: TextureKind,
    pub width: u32,
    pub height: u32,
    pub has_mips: bool,
    pub format: TextureFormat,
    pub flags: SamplerFlags,
    pub render_target: bool,
}

impl TextureDesc {
    pub fn texture_2d(width: u32, height: u32, has_mips: bool, format: TextureFormat) -> Self {
        Self {
            kind: TextureKind::Texture2D,
            width,
            height,
            has_mips,
            format,
            flags: SamplerFlags::empty(),
            render_target: false,
        }
    }

    pub fn cube(size: u32, has_mips: bool, format: TextureFormat) -> Self {
        Self {
            kind: TextureKind::Cube,
            ..Self::texture_2d(size, size, has_mips, format)
        }
    }

    pub fn as_render_target(mut self) -> Self {
        self.render_target = true;
        self
    }

    /// Number of mip levels implied by `has_mips`.
    pub fn num_mips(&self) -> u32 {
        if self.has_mips {
            32 - self.width.max(self.height).max(1).leading_zeros()
        } else {
            1
        }
    }

    /// Expected byte length of initial data: every face, each with its full
    /// mip chain, face-major.
    pub fn data_size(&self) -> usize {
        let bpp = self.format.bytes_per_pixel();
        let per_face: usize = (0..self.num_mips())
            .map(|mip| {
                let w = (self.width >> mip).max(1) as usize;
                let h = (self.height >> mip).max(1) as usize;
                w * h * bpp
            })
            .sum();
        per_face * self.kind.faces()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_capabilities_from_partial_json() {
        let caps: Capabilities = serde_json::from_str(r#"{"max_views": 4}"#).unwrap();
        assert_eq!(caps.max_views, 4);
        assert!(caps.origin_bottom_left);
    }

    #[test]
    fn test_num_mips() {
        assert_eq!(TextureDesc::texture_2d(256, 64, true, TextureFormat::Rgba8).num_mips(), 9);
        assert_eq!(TextureDesc::texture_2d(1, 1, true, TextureFormat::Rgba8).num_mips(), 1);
        assert_eq!(TextureDesc::texture_2d(256, 64, false, TextureFormat::Rgba8).num_mips(), 1);
    }

    #[test]
    fn test_data_size() {
        assert_eq!(TextureDesc::texture_2d(4, 4, false, TextureFormat::Rgba8).data_size(), 64);
        // 4x4 + 2x2 + 1x1 per face
        assert_eq!(TextureDesc::cube(4, true, TextureFormat::Rgba8).data_size(), 6 * 21 * 4);
        assert_eq!(TextureDesc::texture_2d(3, 2, false, TextureFormat::Rgb8).data_size(), 18);
    }
}
