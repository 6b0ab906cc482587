//! Bit flags understood by the command-buffer API.

use bitflags::bitflags;
use serde::Serialize;

// =============================================================================
// RENDER STATE
// =============================================================================

bitflags! {
    /// Per-draw render state, applied at submission.
    ///
    /// Several fields are multi-bit values (depth test, cull, blend,
    /// primitive); compare them through their `*_MASK` rather than with
    /// `contains`.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
    pub struct StateFlags: u64 {
        const WRITE_R = 1 << 0;
        const WRITE_G = 1 << 1;
        const WRITE_B = 1 << 2;
        const WRITE_A = 1 << 3;
        const WRITE_RGB = Self::WRITE_R.bits() | Self::WRITE_G.bits() | Self::WRITE_B.bits();

        const DEPTH_TEST_LESS = 0x1 << 4;
        const DEPTH_TEST_LEQUAL = 0x2 << 4;
        const DEPTH_TEST_EQUAL = 0x3 << 4;
        const DEPTH_TEST_GEQUAL = 0x4 << 4;
        const DEPTH_TEST_GREATER = 0x5 << 4;
        const DEPTH_TEST_NOTEQUAL = 0x6 << 4;
        const DEPTH_TEST_NEVER = 0x7 << 4;
        const DEPTH_TEST_ALWAYS = 0x8 << 4;
        const DEPTH_TEST_MASK = 0xf << 4;

        /// Blend source/destination factors, see [`StateFlags::blend_func_separate`].
        const BLEND_FUNC_MASK = 0xffff << 12;
        const BLEND_EQUATION_MASK = 0x3f << 28;

        const CULL_CW = 0x1 << 36;
        const CULL_CCW = 0x2 << 36;
        const CULL_MASK = 0x3 << 36;

        const WRITE_Z = 1 << 38;
        const FRONT_CCW = 1 << 39;

        const PT_TRISTRIP = 0x1 << 48;
        const PT_LINES = 0x2 << 48;
        const PT_LINESTRIP = 0x3 << 48;
        const PT_POINTS = 0x4 << 48;
        const PT_MASK = 0x7 << 48;

        const MSAA = 1 << 56;

        const DEFAULT = Self::WRITE_RGB.bits()
            | Self::WRITE_A.bits()
            | Self::WRITE_Z.bits()
            | Self::DEPTH_TEST_LESS.bits()
            | Self::CULL_CW.bits()
            | Self::MSAA.bits();
    }
}

/// Blend factor, encoded in 4 bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u64)]
pub enum BlendFactor {
    Zero = 1,
    One = 2,
    SrcColor = 3,
    InvSrcColor = 4,
    SrcAlpha = 5,
    InvSrcAlpha = 6,
    DstAlpha = 7,
    InvDstAlpha = 8,
    DstColor = 9,
    InvDstColor = 10,
    SrcAlphaSat = 11,
    Factor = 12,
    InvFactor = 13,
}

const BLEND_SHIFT: u32 = 12;

impl StateFlags {
    /// Separate color and alpha blend factors.
    pub const fn blend_func_separate(
        src_rgb: BlendFactor,
        dst_rgb: BlendFactor,
        src_alpha: BlendFactor,
        dst_alpha: BlendFactor,
    ) -> Self {
        let rgb = src_rgb as u64 | (dst_rgb as u64) << 4;
        let alpha = src_alpha as u64 | (dst_alpha as u64) << 4;
        Self::from_bits_retain((rgb | alpha << 8) << BLEND_SHIFT)
    }

    /// Same factors for color and alpha.
    pub const fn blend_func(src: BlendFactor, dst: BlendFactor) -> Self {
        Self::blend_func_separate(src, dst, src, dst)
    }

    /// Replace the bits under `mask` with `value`.
    pub fn with_field(self, mask: StateFlags, value: StateFlags) -> Self {
        (self - mask) | (value & mask)
    }

    /// Bits under `mask`.
    pub fn field(self, mask: StateFlags) -> Self {
        self & mask
    }
}

// =============================================================================
// SAMPLER
// =============================================================================

bitflags! {
    /// Texture sampling flags, bound per draw with the texture.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
    pub struct SamplerFlags: u32 {
        const U_MIRROR = 0x1;
        const U_CLAMP = 0x2;
        const U_MASK = 0x3;
        const V_MIRROR = 0x1 << 2;
        const V_CLAMP = 0x2 << 2;
        const V_MASK = 0x3 << 2;
        const W_MIRROR = 0x1 << 4;
        const W_CLAMP = 0x2 << 4;
        const W_MASK = 0x3 << 4;

        const MIN_POINT = 0x1 << 6;
        const MIN_ANISOTROPIC = 0x2 << 6;
        const MIN_MASK = 0x3 << 6;
        const MAG_POINT = 0x1 << 8;
        const MAG_ANISOTROPIC = 0x2 << 8;
        const MAG_MASK = 0x3 << 8;
        const MIP_POINT = 0x1 << 10;
        const MIP_MASK = 0x1 << 10;

        const FILTER_MASK = Self::MIN_MASK.bits() | Self::MAG_MASK.bits() | Self::MIP_MASK.bits();
        const ADDRESS_MASK = Self::U_MASK.bits() | Self::V_MASK.bits() | Self::W_MASK.bits();
    }
}

impl SamplerFlags {
    pub const V_SHIFT: u32 = 2;
    pub const W_SHIFT: u32 = 4;
}

impl Default for SamplerFlags {
    fn default() -> Self {
        SamplerFlags::empty()
    }
}

// =============================================================================
// CLEAR / DISCARD / BUFFER / RESET
// =============================================================================

bitflags! {
    /// Which attachments a view clears.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
    pub struct ClearFlags: u16 {
        const COLOR = 0x1;
        const DEPTH = 0x2;
        const STENCIL = 0x4;
    }
}

bitflags! {
    /// Per-draw scratch state dropped after a submit.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
    pub struct DiscardFlags: u8 {
        const BINDINGS = 0x01;
        const INDEX_BUFFER = 0x02;
        const INSTANCE_DATA = 0x04;
        const STATE = 0x08;
        const TRANSFORM = 0x10;
        const VERTEX_STREAMS = 0x20;
        const ALL = 0xff;
    }
}

bitflags! {
    /// Buffer creation flags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
    pub struct BufferFlags: u16 {
        /// Indices are 32-bit instead of 16-bit.
        const INDEX32 = 0x1;
        /// Buffer may be resized by updates.
        const ALLOW_RESIZE = 0x2;
    }
}

bitflags! {
    /// Back buffer reset flags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
    pub struct ResetFlags: u32 {
        const VSYNC = 0x1;
        const MSAA_X4 = 0x2;
        const MAX_ANISOTROPY = 0x4;
    }
}
