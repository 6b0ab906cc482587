//! # NativeKit Image
//!
//! Decoding of compressed texture images into tightly packed pixel data the
//! GPU layer can upload directly.
//!
//! - [`ImageContainer`]: decoded pixels plus an optional mip chain
//! - Y flip, mip generation and pixel-format conversion
//! - [`CubeImage`]: six faces flattened into one upload buffer

use nativekit_gpu::TextureFormat;
use thiserror::Error;

mod container;
mod convert;
mod cube;

pub use container::ImageContainer;
pub use convert::swap_red_blue;
pub use cube::{face_major_index, CubeImage, CUBE_FACES};

/// Errors that can occur while preparing texture images
#[derive(Error, Debug)]
pub enum ImageError {
    #[error("Failed to decode image: {0}")]
    Decode(String),

    #[error("Unsupported texture format: {0:?}")]
    UnsupportedFormat(TextureFormat),

    #[error("Image data is {actual} bytes, expected {expected}")]
    InvalidData { expected: usize, actual: usize },

    #[error("Cube texture needs a multiple of 6 images, got {0}")]
    CubeFaceCount(usize),

    #[error("Cube image {index} does not match the first face: {reason}")]
    CubeFaceMismatch { index: usize, reason: String },
}

impl From<image::ImageError> for ImageError {
    fn from(err: image::ImageError) -> Self {
        ImageError::Decode(err.to_string())
    }
}

/// Result type for image operations
pub type ImageResult<T> = Result<T, ImageError>;

#[cfg(test)]
pub(crate) mod test_support {
    use image::{DynamicImage, ImageFormat, Rgba, RgbaImage};
    use std::io::Cursor;

    /// Encode an image as PNG.
    pub fn png(image: DynamicImage) -> Vec<u8> {
        let mut bytes = Vec::new();
        image
            .write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
            .unwrap();
        bytes
    }

    /// A PNG whose top row is red and every other row is blue.
    pub fn striped_png(width: u32, height: u32) -> Vec<u8> {
        let image = RgbaImage::from_fn(width, height, |_, y| {
            if y == 0 {
                Rgba([255, 0, 0, 255])
            } else {
                Rgba([0, 0, 255, 255])
            }
        });
        png(DynamicImage::ImageRgba8(image))
    }

    pub fn solid_png(width: u32, height: u32, color: [u8; 4]) -> Vec<u8> {
        png(DynamicImage::ImageRgba8(RgbaImage::from_pixel(
            width,
            height,
            Rgba(color),
        )))
    }
}
