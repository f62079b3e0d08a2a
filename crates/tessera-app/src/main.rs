// SPDX-License-Identifier: CEPL-1.0
#![deny(unsafe_op_in_unsafe_fn)]
mod config;

use anyhow::Result;
use clap::Parser;
use config::{AppConfig, Cli};
use std::time::{Duration, Instant};
use tessera_core::init_tracing;
use tessera_math::Mesh;
use tessera_platform::{create_window, log_key_event};
use tessera_render::{FrameStatus, RenderSize, Renderer};
use tessera_render_vk::VkRenderer;
use tracing::{error, info};

use tessera_platform::winit::{
    application::ApplicationHandler,
    event::WindowEvent,
    event_loop::{ActiveEventLoop, ControlFlow, EventLoop},
    window::{Window, WindowId},
};

/// Presented frames per one-second window.
struct FrameCounter {
    frames: u32,
    window_start: Instant,
}

impl FrameCounter {
    fn new(now: Instant) -> Self {
        Self {
            frames: 0,
            window_start: now,
        }
    }

    fn record(&mut self, status: FrameStatus) {
        if status == FrameStatus::Presented {
            self.frames = self.frames.saturating_add(1);
        }
    }

    /// Count for the window that just closed, once a second has passed.
    fn tick(&mut self, now: Instant) -> Option<u32> {
        if now.duration_since(self.window_start) < Duration::from_secs(1) {
            return None;
        }
        let fps = self.frames;
        self.frames = 0;
        self.window_start = now;
        Some(fps)
    }
}

struct App {
    cfg: AppConfig,
    mesh: Mesh,
    // Renderer before window: it must drop first.
    renderer: Option<VkRenderer>,
    window: Option<Window>,
    fatal: Option<anyhow::Error>,

    fps: FrameCounter,
}

impl App {
    fn new(cfg: AppConfig, mesh: Mesh) -> Self {
        Self {
            cfg,
            mesh,
            renderer: None,
            window: None,
            fatal: None,
            fps: FrameCounter::new(Instant::now()),
        }
    }

    fn init(&mut self, event_loop: &ActiveEventLoop) -> Result<()> {
        let window = create_window(event_loop, &self.cfg.window_desc())?;
        let size = window.inner_size();
        let size = RenderSize::new(size.width, size.height);
        info!("window {}x{}", size.width, size.height);

        let renderer = VkRenderer::new(
            &window,
            &window,
            size,
            &self.cfg.render_settings(),
            &self.mesh,
        )?;
        self.window = Some(window);
        self.renderer = Some(renderer);
        Ok(())
    }

    /// Records the first fatal error and stops the loop; `main` returns it.
    fn fail(&mut self, event_loop: &ActiveEventLoop, err: anyhow::Error) {
        error!("{err:#}");
        self.renderer = None;
        if self.fatal.is_none() {
            self.fatal = Some(err);
        }
        event_loop.exit();
    }
}

impl ApplicationHandler for App {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_none() && self.fatal.is_none() {
            if let Err(e) = self.init(event_loop) {
                self.fail(event_loop, e.context("startup failed"));
            }
        }
    }

    fn window_event(
        &mut self,
        event_loop: &ActiveEventLoop,
        window_id: WindowId,
        event: WindowEvent,
    ) {
        if let Some(window) = &self.window {
            if window_id != window.id() {
                return;
            }
        }

        match event {
            WindowEvent::CloseRequested => {
                info!("CloseRequested");
                self.renderer = None;
                self.window = None;
                event_loop.exit();
            }

            WindowEvent::Resized(new_size) => {
                let size = RenderSize::new(new_size.width, new_size.height);
                info!("Resized → {}x{}", size.width, size.height);
                if let Some(r) = &mut self.renderer {
                    if let Err(e) = r.resize(size) {
                        self.fail(event_loop, e);
                    }
                }
            }

            WindowEvent::KeyboardInput { event, .. } => log_key_event(&event),

            WindowEvent::RedrawRequested => {
                if let Some(r) = &mut self.renderer {
                    match r.render() {
                        Ok(status) => self.fps.record(status),
                        Err(e) => self.fail(event_loop, e),
                    }
                }
            }

            _ => {}
        }
    }

    fn about_to_wait(&mut self, _event_loop: &ActiveEventLoop) {
        if let Some(w) = &self.window {
            w.request_redraw();
        }

        if let Some(fps) = self.fps.tick(Instant::now()) {
            info!("fps ~ {fps}");
        }
    }
}

fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();
    let mut cfg = AppConfig::load(&cli.config)?;
    cfg.apply_cli(&cli);
    let mesh = cfg.mesh.build()?;
    info!(
        mesh = ?cfg.mesh.kind,
        validation = cfg.render.validation,
        "starting"
    );

    let event_loop: EventLoop<()> = EventLoop::new()?;
    event_loop.set_control_flow(ControlFlow::Poll);

    let mut app = App::new(cfg, mesh);
    event_loop.run_app(&mut app)?;

    match app.fatal.take() {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn skipped_frames_are_not_counted() {
        let start = Instant::now();
        let mut counter = FrameCounter::new(start);
        counter.record(FrameStatus::Presented);
        counter.record(FrameStatus::Skipped);
        counter.record(FrameStatus::Skipped);
        counter.record(FrameStatus::Presented);
        assert_eq!(counter.tick(start + Duration::from_millis(1000)), Some(2));
    }

    #[test]
    fn minimized_second_reports_zero() {
        let start = Instant::now();
        let mut counter = FrameCounter::new(start);
        for _ in 0..500 {
            counter.record(FrameStatus::Skipped);
        }
        assert_eq!(counter.tick(start + Duration::from_secs(1)), Some(0));
    }

    #[test]
    fn reports_once_per_second_and_resets() {
        let start = Instant::now();
        let mut counter = FrameCounter::new(start);
        counter.record(FrameStatus::Presented);
        assert_eq!(counter.tick(start + Duration::from_millis(400)), None);
        let first = start + Duration::from_millis(1200);
        assert_eq!(counter.tick(first), Some(1));
        assert_eq!(counter.tick(first + Duration::from_millis(10)), None);
        counter.record(FrameStatus::Presented);
        counter.record(FrameStatus::Presented);
        assert_eq!(counter.tick(first + Duration::from_secs(1)), Some(2));
    }
}
