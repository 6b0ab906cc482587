//! Cube map assembly.

use nativekit_gpu::{TextureDesc, TextureFormat};

use crate::{ImageContainer, ImageError, ImageResult};

pub const CUBE_FACES: usize = 6;

/// Position of `(face, mip)` in a face-major, mip-minor sequence.
pub fn face_major_index(face: usize, mip: usize, num_mips: usize) -> usize {
    face * num_mips + mip
}

/// All faces of a cube map in one upload buffer.
#[derive(Debug, Clone, PartialEq)]
pub struct CubeImage {
    pub size: u32,
    pub height: u32,
    pub format: TextureFormat,
    pub has_mips: bool,
    pub data: Vec<u8>,
}

impl CubeImage {
    /// Concatenate images already ordered face-major, mip-minor.
    ///
    /// Either six images each carrying their own mip chain, or
    /// `6 * num_mips` single-level images.
    pub fn assemble(images: Vec<ImageContainer>, has_mips: bool) -> ImageResult<Self> {
        if images.is_empty() || images.len() % CUBE_FACES != 0 {
            return Err(ImageError::CubeFaceCount(images.len()));
        }

        let first = &images[0];
        let (size, height, format) = (first.width(), first.height(), first.format());
        let levels = images.len() / CUBE_FACES;
        let shapes: Vec<_> = images[..levels]
            .iter()
            .map(|image| (image.width(), image.height(), image.num_mips()))
            .collect();

        let total = images.iter().map(|image| image.data().len()).sum();
        let mut data = Vec::with_capacity(total);
        for (index, image) in images.into_iter().enumerate() {
            if image.format() != format {
                return Err(ImageError::CubeFaceMismatch {
                    index,
                    reason: format!("format {:?} differs from {:?}", image.format(), format),
                });
            }
            let expected = shapes[index % levels];
            let shape = (image.width(), image.height(), image.num_mips());
            if shape != expected {
                return Err(ImageError::CubeFaceMismatch {
                    index,
                    reason: format!(
                        "{}x{} with {} mips, expected {}x{} with {} mips",
                        shape.0, shape.1, shape.2, expected.0, expected.1, expected.2
                    ),
                });
            }
            data.extend_from_slice(image.data());
        }

        Ok(Self {
            size,
            height,
            format,
            has_mips,
            data,
        })
    }

    pub fn texture_desc(&self) -> TextureDesc {
        TextureDesc::cube(self.size, self.has_mips, self.format)
    }
}
