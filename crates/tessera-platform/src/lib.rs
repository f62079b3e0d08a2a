// SPDX-License-Identifier: CEPL-1.0
//! Windowing glue. `winit` is re-exported so the rest of the workspace
//! depends on one copy of it through this crate.

pub use winit;

use anyhow::{Context, Result};
use tracing::info;
use winit::{
    dpi::LogicalSize,
    event::{ElementState, KeyEvent},
    event_loop::ActiveEventLoop,
    keyboard::{KeyCode, PhysicalKey},
    window::Window,
};

#[derive(Clone, Debug)]
pub struct WindowDesc {
    pub title: String,
    pub width: u32,
    pub height: u32,
    pub resizable: bool,
}

impl Default for WindowDesc {
    fn default() -> Self {
        Self {
            title: "Engine".to_owned(),
            width: 800,
            height: 600,
            resizable: true,
        }
    }
}

pub fn create_window(event_loop: &ActiveEventLoop, desc: &WindowDesc) -> Result<Window> {
    let attrs = Window::default_attributes()
        .with_title(desc.title.clone())
        .with_inner_size(LogicalSize::new(desc.width, desc.height))
        .with_resizable(desc.resizable);
    event_loop.create_window(attrs).context("create_window")
}

/// Movement keys the engine reacts to. Only logged for now.
pub fn movement_key(key: PhysicalKey) -> Option<char> {
    match key {
        PhysicalKey::Code(KeyCode::KeyW) => Some('W'),
        PhysicalKey::Code(KeyCode::KeyA) => Some('A'),
        PhysicalKey::Code(KeyCode::KeyS) => Some('S'),
        PhysicalKey::Code(KeyCode::KeyD) => Some('D'),
        _ => None,
    }
}

/// Logs presses and auto-repeats of W/A/S/D; releases are ignored.
pub fn log_key_event(event: &KeyEvent) {
    if event.state != ElementState::Pressed {
        return;
    }
    if let Some(c) = movement_key(event.physical_key) {
        info!(repeat = event.repeat, "key {c} pressed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_wasd_are_movement_keys() {
        assert_eq!(movement_key(PhysicalKey::Code(KeyCode::KeyW)), Some('W'));
        assert_eq!(movement_key(PhysicalKey::Code(KeyCode::KeyD)), Some('D'));
        assert_eq!(movement_key(PhysicalKey::Code(KeyCode::KeyQ)), None);
        assert_eq!(movement_key(PhysicalKey::Code(KeyCode::Space)), None);
    }

    #[test]
    fn default_window_matches_engine_defaults() {
        let d = WindowDesc::default();
        assert_eq!((d.width, d.height), (800, 600));
        assert_eq!(d.title, "Engine");
    }
}
