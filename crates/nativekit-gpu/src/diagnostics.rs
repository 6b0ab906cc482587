//! Diagnostics sink owned by the render thread.
//!
//! The native renderer reports trace output, fatal conditions and captured
//! screenshots through this object. It is created by whoever owns the render
//! thread and handed to the backend at construction.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Mutex, PoisonError};

use tracing::{error, trace};

/// Fatal condition reported by the renderer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FatalCode {
    DebugCheck,
    InvalidShader,
    UnableToInitialize,
    UnableToCreateTexture,
    DeviceLost,
}

/// Captured frame buffer contents, BGRA8.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Screenshot {
    pub width: u32,
    pub height: u32,
    pub pitch: u32,
    pub data: Vec<u8>,
    /// Rows are stored bottom-up.
    pub y_flip: bool,
}

#[derive(Debug, Default)]
pub struct DiagnosticsSink {
    screenshot: Mutex<Option<Screenshot>>,
    fatal_count: AtomicU32,
}

impl DiagnosticsSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn trace(&self, location: &str, message: &str) {
        trace!(target: "nativekit::renderer", location, "{}", message.trim_end());
    }

    pub fn fatal(&self, location: &str, code: FatalCode, message: &str) {
        self.fatal_count.fetch_add(1, Ordering::Relaxed);
        error!(target: "nativekit::renderer", location, ?code, "{}", message.trim_end());
    }

    pub fn fatal_count(&self) -> u32 {
        self.fatal_count.load(Ordering::Relaxed)
    }

    /// Store a captured screenshot, replacing any unclaimed one.
    pub fn screen_shot(&self, width: u32, height: u32, pitch: u32, data: &[u8], y_flip: bool) {
        let shot = Screenshot {
            width,
            height,
            pitch,
            data: data.to_vec(),
            y_flip,
        };
        *self
            .screenshot
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(shot);
    }

    /// Claim the last captured screenshot.
    pub fn take_screenshot(&self) -> Option<Screenshot> {
        self.screenshot
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_screenshot_claimed_once() {
        let sink = DiagnosticsSink::new();
        assert!(sink.take_screenshot().is_none());

        sink.screen_shot(1, 1, 4, &[1, 2, 3, 4], true);
        let shot = sink.take_screenshot().unwrap();
        assert_eq!(shot.data, vec![1, 2, 3, 4]);
        assert!(shot.y_flip);
        assert!(sink.take_screenshot().is_none());
    }

    #[test]
    fn test_fatal_is_counted() {
        let sink = DiagnosticsSink::new();
        sink.trace("recording.rs:1", "hello\n");
        sink.fatal("recording.rs:2", FatalCode::InvalidShader, "bad magic");
        assert_eq!(sink.fatal_count(), 1);
    }
}
