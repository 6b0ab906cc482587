//! Decoded texture images.

use std::ops::Range;

use image::imageops::FilterType;
use nativekit_gpu::{TextureDesc, TextureFormat};
use tracing::{debug, trace};

use crate::convert::{can_mip_directly, decoded_format, from_dynamic, to_dynamic};
use crate::{ImageError, ImageResult};

/// Tightly packed pixels for one image and, optionally, its full mip chain.
///
/// Levels are stored largest first. Rows are stored in the order they were
/// decoded (top-down) until [`ImageContainer::flip_y`] is applied.
#[derive(Debug, Clone, PartialEq)]
pub struct ImageContainer {
    width: u32,
    height: u32,
    format: TextureFormat,
    num_mips: u32,
    data: Vec<u8>,
}

impl ImageContainer {
    /// Wrap a single level of raw pixels.
    pub fn new(width: u32, height: u32, format: TextureFormat, data: Vec<u8>) -> ImageResult<Self> {
        let expected = level_len(width, height, format, 0);
        if data.len() != expected {
            return Err(ImageError::InvalidData {
                expected,
                actual: data.len(),
            });
        }
        Ok(Self {
            width,
            height,
            format,
            num_mips: 1,
            data,
        })
    }

    /// Parse a compressed image container (PNG, JPEG, BMP, TGA, HDR).
    pub fn decode(bytes: &[u8]) -> ImageResult<Self> {
        let image = image::load_from_memory(bytes)?;
        let format = decoded_format(&image);
        let (width, height) = (image.width(), image.height());
        let data = from_dynamic(image, format)?;

        trace!(width, height, ?format, "Decoded image");
        Self::new(width, height, format, data)
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn format(&self) -> TextureFormat {
        self.format
    }

    pub fn num_mips(&self) -> u32 {
        self.num_mips
    }

    pub fn has_mips(&self) -> bool {
        self.num_mips > 1
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn into_data(self) -> Vec<u8> {
        self.data
    }

    /// Dimensions of a mip level.
    pub fn mip_dimensions(&self, level: u32) -> (u32, u32) {
        ((self.width >> level).max(1), (self.height >> level).max(1))
    }

    /// Pixels of one mip level.
    pub fn mip(&self, level: u32) -> &[u8] {
        &self.data[self.level_range(level)]
    }

    /// Parameters for creating a 2D texture from this image.
    pub fn texture_desc(&self) -> TextureDesc {
        TextureDesc::texture_2d(self.width, self.height, self.has_mips(), self.format)
    }

    fn level_range(&self, level: u32) -> Range<usize> {
        let start: usize = (0..level)
            .map(|l| level_len(self.width, self.height, self.format, l))
            .sum();
        start..start + level_len(self.width, self.height, self.format, level)
    }

    /// Reverse the row order of every level in place.
    pub fn flip_y(&mut self) {
        for level in 0..self.num_mips {
            let (width, height) = self.mip_dimensions(level);
            let pitch = width as usize * self.format.bytes_per_pixel();
            let range = self.level_range(level);
            let pixels = &mut self.data[range];

            let rows = height as usize;
            for row in 0..rows / 2 {
                let (front, back) = pixels.split_at_mut((rows - row - 1) * pitch);
                front[row * pitch..(row + 1) * pitch].swap_with_slice(&mut back[..pitch]);
            }
        }
    }

    /// Append a full mip chain down to 1x1.
    ///
    /// Formats the filter cannot handle directly are converted to RGBA8,
    /// filtered, then converted back.
    pub fn generate_mips(self) -> ImageResult<Self> {
        if self.has_mips() {
            return Ok(self);
        }

        if !can_mip_directly(self.format) {
            let format = self.format;
            debug!(?format, "Generating mips through RGBA8");
            return self
                .convert(TextureFormat::Rgba8)?
                .generate_mips()?
                .convert(format);
        }

        let num_mips = 32 - self.width.max(self.height).max(1).leading_zeros();
        let base = to_dynamic(self.width, self.height, self.format, &self.data)?;

        let mut data = self.data;
        for level in 1..num_mips {
            let width = (self.width >> level).max(1);
            let height = (self.height >> level).max(1);
            let level_image = base.resize_exact(width, height, FilterType::Triangle);
            data.extend(from_dynamic(level_image, self.format)?);
        }

        trace!(num_mips, "Generated mip chain");
        Ok(Self {
            num_mips,
            data,
            ..self
        })
    }

    /// Convert every level to another pixel format.
    pub fn convert(self, format: TextureFormat) -> ImageResult<Self> {
        if format == self.format {
            return Ok(self);
        }

        let mut data = Vec::new();
        for level in 0..self.num_mips {
            let (width, height) = self.mip_dimensions(level);
            let image = to_dynamic(width, height, self.format, self.mip(level))?;
            data.extend(from_dynamic(image, format)?);
        }

        Ok(Self {
            format,
            data,
            ..self
        })
    }
}

fn level_len(width: u32, height: u32, format: TextureFormat, level: u32) -> usize {
    let w = (width >> level).max(1) as usize;
    let h = (height >> level).max(1) as usize;
    w * h * format.bytes_per_pixel()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{png, solid_png, striped_png};
    use image::{DynamicImage, GrayImage, Luma};

    #[test]
    fn test_decode_png() {
        let image = ImageContainer::decode(&solid_png(4, 2, [10, 20, 30, 255])).unwrap();
        assert_eq!((image.width(), image.height()), (4, 2));
        assert_eq!(image.format(), TextureFormat::Rgba8);
        assert_eq!(image.num_mips(), 1);
        assert_eq!(&image.data()[..4], &[10, 20, 30, 255]);
        assert_eq!(image.data().len(), 4 * 2 * 4);
    }

    #[test]
    fn test_decode_corrupt_input() {
        let err = ImageContainer::decode(b"<html>404 not found</html>").unwrap_err();
        assert!(matches!(err, ImageError::Decode(_)));
        assert!(matches!(
            ImageContainer::decode(&[]),
            Err(ImageError::Decode(_))
        ));
    }

    #[test]
    fn test_flip_y() {
        let mut image = ImageContainer::decode(&striped_png(2, 3)).unwrap();
        image.flip_y();
        let pitch = 2 * 4;
        assert_eq!(&image.data()[..4], &[0, 0, 255, 255]);
        assert_eq!(&image.data()[2 * pitch..2 * pitch + 4], &[255, 0, 0, 255]);
    }

    #[test]
    fn test_generate_mips() {
        let image = ImageContainer::decode(&solid_png(4, 4, [200, 100, 50, 255]))
            .unwrap()
            .generate_mips()
            .unwrap();

        assert_eq!(image.num_mips(), 3);
        assert_eq!(image.data().len(), (16 + 4 + 1) * 4);
        assert_eq!(image.mip(2), &[200, 100, 50, 255]);
        assert_eq!(image.mip_dimensions(1), (2, 2));
        assert!(image.texture_desc().has_mips);
    }

    #[test]
    fn test_generate_mips_non_square() {
        let image = ImageContainer::decode(&solid_png(8, 2, [1, 2, 3, 4]))
            .unwrap()
            .generate_mips()
            .unwrap();
        assert_eq!(image.num_mips(), 4);
        assert_eq!(image.mip_dimensions(3), (1, 1));
        assert_eq!(image.data().len(), (16 + 4 + 2 + 1) * 4);
    }

    #[test]
    fn test_generate_mips_through_rgba8() {
        let gray = GrayImage::from_pixel(2, 2, Luma([90]));
        let luma_alpha = DynamicImage::ImageLumaA8(DynamicImage::ImageLuma8(gray).into_luma_alpha8());
        let image = ImageContainer::decode(&png(luma_alpha))
            .unwrap()
            .generate_mips()
            .unwrap();

        assert_eq!(image.format(), TextureFormat::Rg8);
        assert_eq!(image.num_mips(), 2);
        assert_eq!(image.mip(1), &[90, 255]);
    }

    #[test]
    fn test_convert_rgb_to_rgba() {
        let image = ImageContainer::new(1, 1, TextureFormat::Rgb8, vec![1, 2, 3])
            .unwrap()
            .convert(TextureFormat::Rgba8)
            .unwrap();
        assert_eq!(image.data(), &[1, 2, 3, 255]);
    }

    #[test]
    fn test_new_checks_length() {
        assert!(matches!(
            ImageContainer::new(2, 2, TextureFormat::Rgba8, vec![0; 3]),
            Err(ImageError::InvalidData {
                expected: 16,
                actual: 3
            })
        ));
    }
}
