//! Frame buffers and view allocation.
//!
//! Every bind of a frame buffer and every viewport change within a frame
//! draws into a fresh view, so passes that reuse a target never share view
//! state. The counter restarts at frame end; views of the finished frame have
//! been flushed by then.

use std::collections::HashMap;

use nativekit_gpu::{ClearFlags, DiscardFlags, FrameBufferHandle, GpuBackend, Resource, ViewId, ViewRect};
use tracing::{debug, trace};

use crate::{EngineError, FrameBufferId, Result};

// ==================== Clear state ====================

/// Desired clear values of one view.
///
/// Changes are pushed to the backend immediately; unchanged values are not
/// re-sent.
#[derive(Debug, Clone, PartialEq)]
pub struct ViewClearState {
    view_id: ViewId,
    red: f32,
    green: f32,
    blue: f32,
    alpha: f32,
    depth: f32,
    stencil: u8,
    flags: ClearFlags,
}

impl ViewClearState {
    pub fn new(view_id: ViewId) -> Self {
        Self {
            view_id,
            red: 68.0 / 255.0,
            green: 51.0 / 255.0,
            blue: 85.0 / 255.0,
            alpha: 1.0,
            depth: 1.0,
            stencil: 0,
            flags: ClearFlags::COLOR | ClearFlags::DEPTH,
        }
    }

    pub fn view_id(&self) -> ViewId {
        self.view_id
    }

    pub fn flags(&self) -> ClearFlags {
        self.flags
    }

    pub fn depth(&self) -> f32 {
        self.depth
    }

    pub fn stencil(&self) -> u8 {
        self.stencil
    }

    /// Clear color packed as `0xRRGGBBAA`.
    pub fn color(&self) -> u32 {
        let channel = |value: f32| u32::from((value * 255.0).round() as u8);
        channel(self.red) << 24 | channel(self.green) << 16 | channel(self.blue) << 8 | channel(self.alpha)
    }

    pub(crate) fn set_view_id(&mut self, view_id: ViewId) {
        self.view_id = view_id;
    }

    /// Push the clear values and make sure the view is processed.
    pub fn update<B: GpuBackend>(&self, backend: &mut B) {
        backend.set_view_clear(self.view_id, self.flags, self.color(), self.depth, self.stencil);
        backend.discard(DiscardFlags::ALL);
        backend.touch(self.view_id);
    }

    pub fn update_flags<B: GpuBackend>(&mut self, backend: &mut B, flags: u16) {
        self.flags = ClearFlags::from_bits_truncate(flags);
        self.update(backend);
    }

    pub fn update_color<B: GpuBackend>(&mut self, backend: &mut B, red: f32, green: f32, blue: f32, alpha: f32) {
        let changed = red != self.red || green != self.green || blue != self.blue || alpha != self.alpha;
        if changed {
            self.red = red;
            self.green = green;
            self.blue = blue;
            self.alpha = alpha;
            self.update(backend);
        }
    }

    pub fn update_depth<B: GpuBackend>(&mut self, backend: &mut B, depth: f32) {
        if depth != self.depth {
            self.depth = depth;
            self.update(backend);
        }
    }

    pub fn update_stencil<B: GpuBackend>(&mut self, backend: &mut B, stencil: u8) {
        if stencil != self.stencil {
            self.stencil = stencil;
            self.update(backend);
        }
    }
}

// ==================== Frame buffers ====================

/// A render target and the view it currently draws into.
#[derive(Debug)]
pub struct FrameBufferData {
    handle: FrameBufferHandle,
    view_id: ViewId,
    clear: ViewClearState,
    width: u16,
    height: u16,
}

impl FrameBufferData {
    fn new(handle: FrameBufferHandle, view_id: ViewId, width: u16, height: u16) -> Self {
        Self {
            handle,
            view_id,
            clear: ViewClearState::new(view_id),
            width,
            height,
        }
    }

    /// `FrameBufferHandle::INVALID` for the back buffer.
    pub fn handle(&self) -> FrameBufferHandle {
        self.handle
    }

    pub fn view_id(&self) -> ViewId {
        self.view_id
    }

    pub fn width(&self) -> u16 {
        self.width
    }

    pub fn height(&self) -> u16 {
        self.height
    }

    pub fn clear_state(&self) -> &ViewClearState {
        &self.clear
    }

    pub fn clear_state_mut(&mut self) -> &mut ViewClearState {
        &mut self.clear
    }

    fn use_view_id(&mut self, view_id: ViewId) {
        self.view_id = view_id;
        self.clear.set_view_id(view_id);
    }

    /// Move to `view_id` and configure it for a full-size pass.
    fn set_up_view<B: GpuBackend>(&mut self, backend: &mut B, view_id: ViewId) {
        self.use_view_id(view_id);
        backend.set_view_frame_buffer(view_id, self.handle);
        self.clear.update(backend);
        backend.set_view_rect(
            view_id,
            ViewRect {
                x: 0,
                y: 0,
                width: self.width,
                height: self.height,
            },
        );
    }
}

/// Owns every frame buffer and hands out view ids.
#[derive(Debug)]
pub struct FrameBufferManager {
    back_buffer: FrameBufferData,
    frame_buffers: HashMap<FrameBufferId, FrameBufferData>,
    bound: Option<FrameBufferId>,
    next_view_id: ViewId,
    max_views: u16,
}

impl FrameBufferManager {
    /// Create the manager and set up the back buffer on view 0.
    pub fn new<B: GpuBackend>(backend: &mut B) -> Self {
        let stats = backend.stats();
        let mut back_buffer =
            FrameBufferData::new(FrameBufferHandle::INVALID, 0, clamp_u16(stats.width), clamp_u16(stats.height));
        back_buffer.set_up_view(backend, 0);

        Self {
            back_buffer,
            frame_buffers: HashMap::new(),
            bound: None,
            next_view_id: 0,
            max_views: backend.caps().max_views,
        }
    }

    /// Next view id of the current frame.
    ///
    /// # Panics
    ///
    /// When a frame asks for more views than the backend supports.
    pub fn new_view_id(&mut self) -> ViewId {
        self.next_view_id += 1;
        assert!(
            self.next_view_id < self.max_views,
            "view id {} exceeds the {} views supported per frame",
            self.next_view_id,
            self.max_views
        );
        self.next_view_id
    }

    /// Register a native frame buffer.
    pub fn create(&mut self, handle: FrameBufferHandle, width: u16, height: u16) -> FrameBufferId {
        let view_id = self.new_view_id();
        let id = FrameBufferId::next();
        self.frame_buffers
            .insert(id, FrameBufferData::new(handle, view_id, width, height));
        debug!(frame_buffer = %id, view_id, width, height, "Created frame buffer");
        id
    }

    pub fn get(&self, id: FrameBufferId) -> Option<&FrameBufferData> {
        self.frame_buffers.get(&id)
    }

    pub fn back_buffer(&self) -> &FrameBufferData {
        &self.back_buffer
    }

    pub fn bound_id(&self) -> Option<FrameBufferId> {
        self.bound
    }

    /// The current target: the bound frame buffer or the back buffer.
    pub fn bound(&self) -> &FrameBufferData {
        self.bound
            .and_then(|id| self.frame_buffers.get(&id))
            .unwrap_or(&self.back_buffer)
    }

    pub fn bound_mut(&mut self) -> &mut FrameBufferData {
        match self.bound.and_then(|id| self.frame_buffers.get_mut(&id)) {
            Some(frame_buffer) => frame_buffer,
            None => &mut self.back_buffer,
        }
    }

    pub fn bind<B: GpuBackend>(&mut self, backend: &mut B, id: FrameBufferId) -> Result<()> {
        if !self.frame_buffers.contains_key(&id) {
            return Err(EngineError::not_found("frame buffer", id.id()));
        }
        let view_id = self.new_view_id();
        self.bound = Some(id);
        self.bound_mut().set_up_view(backend, view_id);
        trace!(frame_buffer = %id, view_id, "Bound frame buffer");
        Ok(())
    }

    /// Revert to the back buffer. `id` must be the bound target.
    pub fn unbind(&mut self, id: FrameBufferId) -> Result<()> {
        if self.bound != Some(id) {
            return Err(EngineError::FrameBufferNotBound(id.id()));
        }
        self.bound = None;
        Ok(())
    }

    pub fn delete<B: GpuBackend>(&mut self, backend: &mut B, id: FrameBufferId) -> Result<()> {
        let frame_buffer = self
            .frame_buffers
            .remove(&id)
            .ok_or_else(|| EngineError::not_found("frame buffer", id.id()))?;
        if self.bound == Some(id) {
            self.bound = None;
        }
        if frame_buffer.handle.is_valid() {
            backend.destroy(Resource::FrameBuffer(frame_buffer.handle));
        }
        debug!(frame_buffer = %id, "Deleted frame buffer");
        Ok(())
    }

    /// Point the current target at a sub-rectangle of the back buffer size.
    ///
    /// Coordinates are fractions with a bottom-left origin regardless of the
    /// backend convention.
    pub fn set_viewport<B: GpuBackend>(&mut self, backend: &mut B, x: f32, y: f32, width: f32, height: f32) {
        let stats = backend.stats();
        let (full_width, full_height) = (stats.width as f32, stats.height as f32);
        let y_origin = if backend.caps().origin_bottom_left {
            y
        } else {
            1.0 - y - height
        };

        let view_id = self.new_view_id();
        let target = self.bound_mut();
        target.use_view_id(view_id);
        backend.set_view_frame_buffer(view_id, target.handle);
        backend.set_view_rect(
            view_id,
            ViewRect {
                x: (x * full_width) as u16,
                y: (y_origin * full_height) as u16,
                width: (width * full_width) as u16,
                height: (height * full_height) as u16,
            },
        );
    }

    pub fn resize_back_buffer(&mut self, width: u32, height: u32) {
        self.back_buffer.width = clamp_u16(width);
        self.back_buffer.height = clamp_u16(height);
    }

    /// Restart view allocation for a new frame.
    pub fn reset(&mut self) {
        self.next_view_id = 0;
        self.back_buffer.use_view_id(0);
    }

    /// Destroy every registered frame buffer.
    pub fn destroy_all<B: GpuBackend>(&mut self, backend: &mut B) {
        self.bound = None;
        for (_, frame_buffer) in self.frame_buffers.drain() {
            if frame_buffer.handle.is_valid() {
                backend.destroy(Resource::FrameBuffer(frame_buffer.handle));
            }
        }
    }
}

fn clamp_u16(value: u32) -> u16 {
    u16::try_from(value).unwrap_or(u16::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use nativekit_gpu::recording::ViewClear;
    use nativekit_gpu::{Capabilities, Command, DiagnosticsSink, RecordingBackend};
    use std::sync::Arc;

    fn backend_with(caps: Capabilities) -> RecordingBackend {
        RecordingBackend::new(caps, 200, 100, Arc::new(DiagnosticsSink::new()))
    }

    fn backend() -> RecordingBackend {
        backend_with(Capabilities::default())
    }

    #[test]
    fn test_default_clear_color() {
        let clear = ViewClearState::new(0);
        assert_eq!(clear.color(), 0x4433_55ff);
        assert_eq!(clear.flags(), ClearFlags::COLOR | ClearFlags::DEPTH);
        assert_eq!(clear.depth(), 1.0);
    }

    #[test]
    fn test_unchanged_clear_values_not_resent() {
        let mut gpu = backend();
        let mut clear = ViewClearState::new(3);
        clear.update_depth(&mut gpu, 1.0);
        clear.update_stencil(&mut gpu, 0);
        clear.update_color(&mut gpu, 68.0 / 255.0, 51.0 / 255.0, 85.0 / 255.0, 1.0);
        assert!(gpu.commands().is_empty());

        clear.update_color(&mut gpu, 1.0, 0.0, 0.0, 1.0);
        clear.update_flags(&mut gpu, ClearFlags::COLOR.bits());
        let clears: Vec<ViewClear> = gpu
            .commands()
            .iter()
            .filter_map(|command| match command {
                Command::SetViewClear { view: 3, clear } => Some(*clear),
                _ => None,
            })
            .collect();
        assert_eq!(clears.len(), 2);
        assert_eq!(clears[0].rgba, 0xff00_00ff);
        assert_eq!(clears[1].flags, ClearFlags::COLOR);
        assert!(gpu.commands().contains(&Command::Touch { view: 3 }));
    }

    #[test]
    fn test_back_buffer_set_up_on_view_zero() {
        let mut gpu = backend();
        let manager = FrameBufferManager::new(&mut gpu);
        assert_eq!(manager.bound().view_id(), 0);
        assert!(!manager.bound().handle().is_valid());

        let view = gpu.view(0).unwrap();
        assert_eq!(
            view.rect,
            Some(ViewRect {
                x: 0,
                y: 0,
                width: 200,
                height: 100
            })
        );
        assert_eq!(view.clear.unwrap().rgba, 0x4433_55ff);
    }

    #[test]
    fn test_binds_take_increasing_view_ids() {
        let mut gpu = backend();
        let mut manager = FrameBufferManager::new(&mut gpu);
        let target = manager.create(FrameBufferHandle::INVALID, 32, 32);

        let mut seen = Vec::new();
        for _ in 0..5 {
            manager.bind(&mut gpu, target).unwrap();
            seen.push(manager.bound().view_id());
        }
        assert!(seen.windows(2).all(|pair| pair[0] < pair[1]));

        manager.reset();
        manager.bind(&mut gpu, target).unwrap();
        assert_eq!(manager.bound().view_id(), 1);
    }

    #[test]
    fn test_unbind_requires_bound_target() {
        let mut gpu = backend();
        let mut manager = FrameBufferManager::new(&mut gpu);
        let first = manager.create(FrameBufferHandle::INVALID, 8, 8);
        let second = manager.create(FrameBufferHandle::INVALID, 8, 8);

        manager.bind(&mut gpu, first).unwrap();
        assert!(matches!(manager.unbind(second), Err(EngineError::FrameBufferNotBound(_))));
        manager.unbind(first).unwrap();
        assert!(manager.bound_id().is_none());
        assert_eq!(manager.bound().view_id(), 0);
    }

    #[test]
    fn test_delete_bound_reverts_to_back_buffer() {
        let mut gpu = backend();
        let mut manager = FrameBufferManager::new(&mut gpu);
        let target = manager.create(FrameBufferHandle::INVALID, 8, 8);
        manager.bind(&mut gpu, target).unwrap();

        manager.delete(&mut gpu, target).unwrap();
        assert!(manager.bound_id().is_none());
        assert!(manager.get(target).is_none());
        assert!(manager.delete(&mut gpu, target).is_err());
    }

    #[test]
    fn test_viewport_flips_for_top_left_origin() {
        let caps = Capabilities {
            origin_bottom_left: false,
            ..Capabilities::default()
        };
        let mut gpu = backend_with(caps);
        let mut manager = FrameBufferManager::new(&mut gpu);

        manager.set_viewport(&mut gpu, 0.5, 0.0, 0.5, 0.25);
        let view_id = manager.bound().view_id();
        assert_eq!(view_id, 1);
        assert_eq!(
            gpu.view(view_id).unwrap().rect,
            Some(ViewRect {
                x: 100,
                y: 75,
                width: 100,
                height: 25
            })
        );
    }

    #[test]
    #[should_panic(expected = "views supported per frame")]
    fn test_view_overflow_panics() {
        let caps = Capabilities {
            max_views: 4,
            ..Capabilities::default()
        };
        let mut gpu = backend_with(caps);
        let mut manager = FrameBufferManager::new(&mut gpu);
        for _ in 0..4 {
            manager.new_view_id();
        }
    }
}
