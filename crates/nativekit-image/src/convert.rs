//! Bridges between packed texture bytes and `image` buffers.

use image::{DynamicImage, ImageBuffer};
use nativekit_gpu::TextureFormat;

use crate::{ImageError, ImageResult};

/// Formats the mip generator can filter without a round trip through RGBA8.
pub(crate) fn can_mip_directly(format: TextureFormat) -> bool {
    matches!(
        format,
        TextureFormat::R8 | TextureFormat::Rgb8 | TextureFormat::Rgba8 | TextureFormat::Rgba32F
    )
}

/// Format reported for a freshly decoded image.
pub(crate) fn decoded_format(image: &DynamicImage) -> TextureFormat {
    match image {
        DynamicImage::ImageLuma8(_) => TextureFormat::R8,
        DynamicImage::ImageLumaA8(_) => TextureFormat::Rg8,
        DynamicImage::ImageRgb8(_) => TextureFormat::Rgb8,
        DynamicImage::ImageRgba8(_) => TextureFormat::Rgba8,
        DynamicImage::ImageLuma16(_) => TextureFormat::R16,
        DynamicImage::ImageLumaA16(_) => TextureFormat::Rg16,
        DynamicImage::ImageRgb16(_) | DynamicImage::ImageRgba16(_) => TextureFormat::Rgba16,
        DynamicImage::ImageRgb32F(_) | DynamicImage::ImageRgba32F(_) => TextureFormat::Rgba32F,
        _ => TextureFormat::Rgba8,
    }
}

pub(crate) fn to_dynamic(
    width: u32,
    height: u32,
    format: TextureFormat,
    bytes: &[u8],
) -> ImageResult<DynamicImage> {
    let image = match format {
        TextureFormat::R8 => ImageBuffer::from_raw(width, height, bytes.to_vec()).map(DynamicImage::ImageLuma8),
        TextureFormat::Rg8 => {
            ImageBuffer::from_raw(width, height, bytes.to_vec()).map(DynamicImage::ImageLumaA8)
        }
        TextureFormat::Rgb8 => ImageBuffer::from_raw(width, height, bytes.to_vec()).map(DynamicImage::ImageRgb8),
        TextureFormat::Rgba8 => {
            ImageBuffer::from_raw(width, height, bytes.to_vec()).map(DynamicImage::ImageRgba8)
        }
        TextureFormat::Bgra8 => {
            let mut rgba = bytes.to_vec();
            swap_red_blue(&mut rgba);
            ImageBuffer::from_raw(width, height, rgba).map(DynamicImage::ImageRgba8)
        }
        TextureFormat::R16 => ImageBuffer::from_raw(width, height, u16s(bytes)).map(DynamicImage::ImageLuma16),
        TextureFormat::Rg16 => {
            ImageBuffer::from_raw(width, height, u16s(bytes)).map(DynamicImage::ImageLumaA16)
        }
        TextureFormat::Rgba16 => {
            ImageBuffer::from_raw(width, height, u16s(bytes)).map(DynamicImage::ImageRgba16)
        }
        TextureFormat::Rgba32F => {
            ImageBuffer::from_raw(width, height, f32s(bytes)).map(DynamicImage::ImageRgba32F)
        }
        TextureFormat::D24S8 | TextureFormat::D32 => {
            return Err(ImageError::UnsupportedFormat(format))
        }
    };

    image.ok_or(ImageError::InvalidData {
        expected: width as usize * height as usize * format.bytes_per_pixel(),
        actual: bytes.len(),
    })
}

pub(crate) fn from_dynamic(image: DynamicImage, format: TextureFormat) -> ImageResult<Vec<u8>> {
    Ok(match format {
        TextureFormat::R8 => image.into_luma8().into_raw(),
        TextureFormat::Rg8 => image.into_luma_alpha8().into_raw(),
        TextureFormat::Rgb8 => image.into_rgb8().into_raw(),
        TextureFormat::Rgba8 => image.into_rgba8().into_raw(),
        TextureFormat::Bgra8 => {
            let mut bytes = image.into_rgba8().into_raw();
            swap_red_blue(&mut bytes);
            bytes
        }
        TextureFormat::R16 => DynamicImage::ImageLuma16(image.into_luma16()).into_bytes(),
        TextureFormat::Rg16 => DynamicImage::ImageLumaA16(image.into_luma_alpha16()).into_bytes(),
        TextureFormat::Rgba16 => DynamicImage::ImageRgba16(image.into_rgba16()).into_bytes(),
        TextureFormat::Rgba32F => DynamicImage::ImageRgba32F(image.into_rgba32f()).into_bytes(),
        TextureFormat::D24S8 | TextureFormat::D32 => {
            return Err(ImageError::UnsupportedFormat(format))
        }
    })
}

/// Swap the first and third byte of every 4-byte pixel (RGBA <-> BGRA).
pub fn swap_red_blue(pixels: &mut [u8]) {
    for pixel in pixels.chunks_exact_mut(4) {
        pixel.swap(0, 2);
    }
}

fn u16s(bytes: &[u8]) -> Vec<u16> {
    bytes
        .chunks_exact(2)
        .map(|c| u16::from_ne_bytes([c[0], c[1]]))
        .collect()
}

fn f32s(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(4)
        .map(|c| f32::from_ne_bytes([c[0], c[1], c[2], c[3]]))
        .collect()
}
