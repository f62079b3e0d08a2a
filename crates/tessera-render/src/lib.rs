// SPDX-License-Identifier: CEPL-1.0
use anyhow::Result;
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};
use std::path::PathBuf;
use tessera_math::Mesh;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RenderSize {
    pub width: u32,
    pub height: u32,
}

impl RenderSize {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// A minimized window reports 0 on at least one axis.
    pub fn is_zero_area(&self) -> bool {
        self.width == 0 || self.height == 0
    }
}

/// Startup knobs a backend needs before it can draw anything.
#[derive(Clone, Debug)]
pub struct RenderSettings {
    pub clear_color: [f32; 4],
    pub validation: bool,
    pub vertex_shader: PathBuf,
    pub fragment_shader: PathBuf,
}

impl Default for RenderSettings {
    fn default() -> Self {
        Self {
            clear_color: [0.0, 0.0, 0.0, 1.0],
            validation: cfg!(debug_assertions),
            vertex_shader: PathBuf::from("shaders/vert.spv"),
            fragment_shader: PathBuf::from("shaders/frag.spv"),
        }
    }
}

/// What a call to [`Renderer::render`] did.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FrameStatus {
    Presented,
    /// Zero-area window or stale swap chain; nothing reached the screen.
    Skipped,
}

pub trait Renderer {
    fn new(
        window: &dyn HasWindowHandle,
        display: &dyn HasDisplayHandle,
        size: RenderSize,
        settings: &RenderSettings,
        mesh: &Mesh,
    ) -> Result<Self>
    where
        Self: Sized;

    /// Window framebuffer changed size. Zero-area sizes are accepted and
    /// simply suspend drawing until a usable size arrives.
    fn resize(&mut self, size: RenderSize) -> Result<()>;

    /// Draw and present one frame. Errors are fatal.
    fn render(&mut self) -> Result<FrameStatus>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_area_on_either_axis() {
        assert!(RenderSize::new(0, 600).is_zero_area());
        assert!(RenderSize::new(800, 0).is_zero_area());
        assert!(!RenderSize::new(1, 1).is_zero_area());
    }
}
