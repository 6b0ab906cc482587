//! Render state accumulated between draws.
//!
//! Setters only touch the in-memory bitmask; it is applied at the next
//! submission.

use nativekit_gpu::{BlendFactor, StateFlags};

use crate::{constants, EngineError, Result};

/// Alpha blending modes, numbered as the scripting layer sends them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum AlphaMode {
    Disable = 0,
    /// `SRC_ALPHA * SRC + DEST`
    Add,
    /// `SRC_ALPHA * SRC + (1 - SRC_ALPHA) * DEST`
    Combine,
    /// `DEST - SRC * DEST`
    Subtract,
    /// `SRC * DEST`
    Multiply,
    /// `SRC_ALPHA * SRC + (1 - SRC) * DEST`
    Maximized,
    /// `SRC + DEST`
    OneOne,
    /// `SRC + (1 - SRC_ALPHA) * DEST`
    Premultiplied,
    /// Premultiplied, with `(1 - SRC_ALPHA) * DEST_ALPHA` for alpha.
    PremultipliedPorterDuff,
    /// `CST * SRC + (1 - CST) * DEST`
    Interpolate,
    /// `SRC + (1 - SRC) * DEST`
    Screen,
}

impl AlphaMode {
    const ALL: [AlphaMode; 11] = [
        AlphaMode::Disable,
        AlphaMode::Add,
        AlphaMode::Combine,
        AlphaMode::Subtract,
        AlphaMode::Multiply,
        AlphaMode::Maximized,
        AlphaMode::OneOne,
        AlphaMode::Premultiplied,
        AlphaMode::PremultipliedPorterDuff,
        AlphaMode::Interpolate,
        AlphaMode::Screen,
    ];

    pub fn from_u32(mode: u32) -> Result<Self> {
        Self::ALL
            .get(mode as usize)
            .copied()
            .ok_or(EngineError::UnknownBlendMode(mode))
    }

    /// Blend function bits for this mode.
    pub fn blend_state(self) -> StateFlags {
        use BlendFactor::*;
        let separate = StateFlags::blend_func_separate;
        match self {
            AlphaMode::Disable => StateFlags::empty(),
            AlphaMode::Add => separate(SrcAlpha, One, Zero, One),
            AlphaMode::Combine => separate(SrcAlpha, InvSrcAlpha, One, One),
            AlphaMode::Subtract => separate(Zero, InvSrcColor, One, One),
            AlphaMode::Multiply => separate(DstColor, Zero, One, One),
            AlphaMode::Maximized => separate(SrcAlpha, InvSrcColor, One, One),
            AlphaMode::OneOne => separate(One, One, Zero, One),
            AlphaMode::Premultiplied => separate(One, InvSrcAlpha, One, One),
            AlphaMode::PremultipliedPorterDuff => separate(One, InvSrcAlpha, One, InvSrcAlpha),
            AlphaMode::Interpolate => separate(Factor, InvFactor, Factor, InvFactor),
            AlphaMode::Screen => separate(One, InvSrcColor, One, InvSrcAlpha),
        }
    }
}

/// Primitive topology requested by a draw.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FillMode {
    Triangles,
    TriangleStrip,
    Lines,
    LineStrip,
    Points,
}

impl FillMode {
    pub fn from_u32(mode: u32) -> Result<Self> {
        match mode {
            constants::TRIANGLE_FILL_MODE => Ok(FillMode::Triangles),
            constants::WIREFRAME_FILL_MODE | constants::LINE_LIST_DRAW_MODE => Ok(FillMode::Lines),
            constants::POINT_FILL_MODE | constants::POINT_LIST_DRAW_MODE => Ok(FillMode::Points),
            constants::LINE_LOOP_DRAW_MODE | constants::LINE_STRIP_DRAW_MODE => Ok(FillMode::LineStrip),
            constants::TRIANGLE_STRIP_DRAW_MODE => Ok(FillMode::TriangleStrip),
            other => Err(EngineError::UnsupportedFillMode(other)),
        }
    }

    pub fn primitive(self) -> StateFlags {
        match self {
            FillMode::Triangles => StateFlags::empty(),
            FillMode::TriangleStrip => StateFlags::PT_TRISTRIP,
            FillMode::Lines => StateFlags::PT_LINES,
            FillMode::LineStrip => StateFlags::PT_LINESTRIP,
            FillMode::Points => StateFlags::PT_POINTS,
        }
    }
}

/// The engine's render state bitmask.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RenderState {
    flags: StateFlags,
    z_offset: f32,
}

impl Default for RenderState {
    fn default() -> Self {
        Self {
            flags: StateFlags::DEFAULT,
            z_offset: 0.0,
        }
    }
}

impl RenderState {
    pub fn flags(&self) -> StateFlags {
        self.flags
    }

    /// Culling and winding. `reverse_side` makes clockwise faces front facing.
    pub fn set_culling(&mut self, culling: bool, reverse_side: bool) {
        self.flags -= StateFlags::CULL_MASK;
        if reverse_side {
            self.flags -= StateFlags::FRONT_CCW;
            if culling {
                self.flags |= StateFlags::CULL_CW;
            }
        } else {
            self.flags |= StateFlags::FRONT_CCW;
            if culling {
                self.flags |= StateFlags::CULL_CCW;
            }
        }
    }

    /// Stored for the scripting layer; the native state has no depth bias field.
    pub fn set_z_offset(&mut self, offset: f32) {
        self.z_offset = offset;
    }

    pub fn z_offset(&self) -> f32 {
        self.z_offset
    }

    pub fn set_depth_test(&mut self, enable: bool) {
        let test = if enable {
            StateFlags::DEPTH_TEST_LESS
        } else {
            StateFlags::DEPTH_TEST_ALWAYS
        };
        self.flags = self.flags.with_field(StateFlags::DEPTH_TEST_MASK, test);
    }

    pub fn depth_write(&self) -> bool {
        self.flags.contains(StateFlags::WRITE_Z)
    }

    pub fn set_depth_write(&mut self, enable: bool) {
        self.flags.set(StateFlags::WRITE_Z, enable);
    }

    pub fn set_color_write(&mut self, enable: bool) {
        self.flags.set(StateFlags::WRITE_RGB | StateFlags::WRITE_A, enable);
    }

    pub fn set_blend_mode(&mut self, mode: AlphaMode) {
        self.flags = self.flags.with_field(StateFlags::BLEND_FUNC_MASK, mode.blend_state());
    }

    /// State for one submission with the given topology.
    pub fn for_draw(&self, fill_mode: FillMode) -> StateFlags {
        self.flags.with_field(StateFlags::PT_MASK, fill_mode.primitive())
    }
}
