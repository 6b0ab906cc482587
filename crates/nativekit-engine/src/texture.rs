//! Texture shells, sampler state and image preparation stages.

use nativekit_gpu::{GpuBackend, Resource, SamplerFlags, TextureHandle};
use nativekit_image::{ImageContainer, ImageError};
use nativekit_tasks::TaskError;
use tracing::{debug, trace};

use crate::{EngineError, Result};

/// Sampler bits for each filtering mode, indexed by the scripting-layer value.
///
/// Linear filtering is the native default, so only the nearest lanes are set.
const FILTERING: [SamplerFlags; 12] = [
    // nearest: mag nearest, min nearest, mip linear
    SamplerFlags::MAG_POINT.union(SamplerFlags::MIN_POINT),
    // bilinear: mag linear, min linear, mip nearest
    SamplerFlags::MIP_POINT,
    // trilinear
    SamplerFlags::empty(),
    SamplerFlags::MIN_POINT
        .union(SamplerFlags::MAG_POINT)
        .union(SamplerFlags::MIP_POINT),
    SamplerFlags::MAG_POINT.union(SamplerFlags::MIP_POINT),
    SamplerFlags::MAG_POINT,
    SamplerFlags::MAG_POINT,
    SamplerFlags::MAG_POINT.union(SamplerFlags::MIN_POINT),
    // mag linear, min nearest, mip nearest
    SamplerFlags::MIN_POINT.union(SamplerFlags::MIP_POINT),
    SamplerFlags::MIN_POINT,
    SamplerFlags::empty(),
    SamplerFlags::MIN_POINT,
];

/// U-lane address bits for wrap, clamp and mirror.
const ADDRESS_MODES: [SamplerFlags; 3] = [SamplerFlags::empty(), SamplerFlags::U_CLAMP, SamplerFlags::U_MIRROR];

fn address_mode(mode: u32) -> Result<u32> {
    ADDRESS_MODES
        .get(mode as usize)
        .map(|flags| flags.bits())
        .ok_or(EngineError::UnknownWrapMode(mode))
}

/// A texture as seen by the scripting layer.
///
/// Starts as an empty shell with an invalid handle; a completed load or a
/// frame buffer attachment fills it in.
#[derive(Debug)]
pub struct TextureData {
    handle: TextureHandle,
    width: u32,
    height: u32,
    flags: SamplerFlags,
    anisotropic_level: u32,
    /// Whether destroying the shell destroys the native texture. Frame buffer
    /// attachments belong to their frame buffer.
    owned: bool,
}

impl Default for TextureData {
    fn default() -> Self {
        Self {
            handle: TextureHandle::INVALID,
            width: 0,
            height: 0,
            flags: SamplerFlags::empty(),
            anisotropic_level: 0,
            owned: true,
        }
    }
}

impl TextureData {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn handle(&self) -> TextureHandle {
        self.handle
    }

    pub fn is_valid(&self) -> bool {
        self.handle.is_valid()
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn flags(&self) -> SamplerFlags {
        self.flags
    }

    pub fn anisotropic_level(&self) -> u32 {
        self.anisotropic_level
    }

    /// Take ownership of a freshly created native texture, releasing any
    /// previously owned one.
    pub fn attach<B: GpuBackend>(&mut self, backend: &mut B, handle: TextureHandle, width: u32, height: u32) {
        self.release(backend);
        self.handle = handle;
        self.width = width;
        self.height = height;
        self.owned = true;
        debug!(texture = handle.index(), width, height, "Texture ready");
    }

    /// Point the shell at a texture owned elsewhere.
    pub fn borrow_attachment<B: GpuBackend>(&mut self, backend: &mut B, handle: TextureHandle, width: u32, height: u32) {
        self.release(backend);
        self.handle = handle;
        self.width = width;
        self.height = height;
        self.owned = false;
    }

    pub fn set_sampling(&mut self, mode: u32) -> Result<()> {
        let filtering = *FILTERING
            .get(mode as usize)
            .ok_or(EngineError::UnknownSamplingMode(mode))?;

        self.flags -= SamplerFlags::FILTER_MASK;
        if self.anisotropic_level > 1 {
            self.flags |= SamplerFlags::MIN_ANISOTROPIC | SamplerFlags::MAG_ANISOTROPIC;
        } else {
            self.flags |= filtering;
        }
        Ok(())
    }

    pub fn set_wrap_mode(&mut self, u: u32, v: u32, w: u32) -> Result<()> {
        let bits = address_mode(u)?
            | address_mode(v)? << SamplerFlags::V_SHIFT
            | address_mode(w)? << SamplerFlags::W_SHIFT;

        self.flags -= SamplerFlags::ADDRESS_MASK;
        self.flags |= SamplerFlags::from_bits_truncate(bits);
        Ok(())
    }

    pub fn set_anisotropic_level(&mut self, level: u32) {
        self.anisotropic_level = level;
        self.flags -= SamplerFlags::FILTER_MASK;
        if level > 1 {
            self.flags |= SamplerFlags::MIN_ANISOTROPIC | SamplerFlags::MAG_ANISOTROPIC;
        }
    }

    pub fn destroy<B: GpuBackend>(mut self, backend: &mut B) {
        self.release(backend);
    }

    fn release<B: GpuBackend>(&mut self, backend: &mut B) {
        if self.owned && self.handle.is_valid() {
            backend.destroy(Resource::Texture(self.handle));
        }
        self.handle = TextureHandle::INVALID;
    }
}

// ==================== Worker stages ====================

fn image_failure(err: ImageError) -> TaskError {
    TaskError::failed(err)
}

/// Decode an image and prepare it for upload. Runs on the worker pool.
pub fn prepare_image(bytes: &[u8], invert_y: bool, generate_mips: bool) -> std::result::Result<ImageContainer, TaskError> {
    let mut image = ImageContainer::decode(bytes).map_err(image_failure)?;
    if invert_y {
        image.flip_y();
    }
    if generate_mips {
        image = image.generate_mips().map_err(image_failure)?;
    }
    trace!(
        width = image.width(),
        height = image.height(),
        mips = image.num_mips(),
        "Prepared image"
    );
    Ok(image)
}
