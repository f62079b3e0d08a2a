// SPDX-License-Identifier: CEPL-1.0
//! Vulkan backend: a device context that lives for the whole run plus a
//! swap-chain generation that is torn down and rebuilt whenever the surface
//! changes.

mod commands;
mod context;
mod error;
mod frame;
mod pipeline;
mod resources;
mod swapchain;

pub use context::{find_queue_families, DeviceContext, QueueFamilies, QueueFamilyIndices};
pub use error::EngineError;
pub use frame::{classify_acquire, classify_present, Acquired, Presented, SurfaceState};
pub use resources::find_memory_type;
pub use swapchain::{
    choose_extent, choose_image_count, choose_present_mode, choose_surface_format,
    PREFERRED_FORMAT,
};

use anyhow::{ensure, Context, Result};
use ash::vk;
use commands::{allocate_command_buffers, create_command_pool, DrawRecording};
use frame::FrameSync;
use pipeline::{PipelineState, ShaderSet};
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};
use resources::{create_framebuffers, destroy_framebuffers, MeshBuffers};
use swapchain::{Swapchain, SwapchainSupport};
use tessera_math::Mesh;
use tessera_render::{FrameStatus, RenderSettings, RenderSize, Renderer};
use tracing::{debug, info, warn};

/// Everything derived from one swap chain. Built together, destroyed
/// together, never partially replaced.
struct ChainResources {
    swapchain: Swapchain,
    pipeline: PipelineState,
    framebuffers: Vec<vk::Framebuffer>,
    command_buffers: Vec<vk::CommandBuffer>,
}

impl ChainResources {
    fn build(
        ctx: &DeviceContext,
        pool: vk::CommandPool,
        shaders: &ShaderSet,
        mesh: &MeshBuffers,
        clear_color: [f32; 4],
        size: RenderSize,
    ) -> Result<Self> {
        let support = SwapchainSupport::query(ctx)?;
        let swapchain = Swapchain::new(ctx, &support, support.choose(size))?;
        let pipeline = match PipelineState::new(&ctx.device, shaders, swapchain.format, swapchain.extent)
        {
            Ok(p) => p,
            Err(e) => {
                unsafe { swapchain.destroy(ctx) };
                return Err(e);
            }
        };
        let mut chain = Self {
            swapchain,
            pipeline,
            framebuffers: Vec::new(),
            command_buffers: Vec::new(),
        };
        if let Err(e) = chain.populate(ctx, pool, mesh, clear_color) {
            unsafe { chain.destroy(ctx, pool) };
            return Err(e);
        }
        Ok(chain)
    }

    fn populate(
        &mut self,
        ctx: &DeviceContext,
        pool: vk::CommandPool,
        mesh: &MeshBuffers,
        clear_color: [f32; 4],
    ) -> Result<()> {
        self.framebuffers = create_framebuffers(
            &ctx.device,
            self.pipeline.render_pass,
            &self.swapchain.image_views,
            self.swapchain.extent,
        )?;
        self.command_buffers = allocate_command_buffers(&ctx.device, pool, self.framebuffers.len())?;
        self.record(ctx, mesh, clear_color)?;
        self.check()
    }

    fn record(&self, ctx: &DeviceContext, mesh: &MeshBuffers, clear_color: [f32; 4]) -> Result<()> {
        let recording = DrawRecording {
            pipeline: &self.pipeline,
            mesh,
            clear_color,
        };
        unsafe { recording.record_all(&ctx.device, &self.command_buffers, &self.framebuffers) }
    }

    /// Per-image collections line up and every size-dependent object agrees
    /// with the swap-chain extent.
    fn check(&self) -> Result<()> {
        ensure!(!self.swapchain.is_empty(), "swap chain returned no images");
        let n = self.swapchain.len();
        ensure!(
            self.swapchain.image_views.len() == n
                && self.framebuffers.len() == n
                && self.command_buffers.len() == n,
            "per-image counts diverged: images {n}, views {}, framebuffers {}, command buffers {}",
            self.swapchain.image_views.len(),
            self.framebuffers.len(),
            self.command_buffers.len()
        );
        ensure!(
            self.pipeline.extent == self.swapchain.extent && self.pipeline.format == self.swapchain.format,
            "pipeline built for {:?}/{:?}, swap chain is {:?}/{:?}",
            self.pipeline.extent,
            self.pipeline.format,
            self.swapchain.extent,
            self.swapchain.format
        );
        Ok(())
    }

    /// Walks [`TEARDOWN_ORDER`]. Device must be idle.
    unsafe fn destroy(mut self, ctx: &DeviceContext, pool: vk::CommandPool) {
        let device = &ctx.device;
        for step in TEARDOWN_ORDER {
            match step {
                Teardown::Framebuffers => destroy_framebuffers(device, &mut self.framebuffers),
                Teardown::CommandBuffers => {
                    if !self.command_buffers.is_empty() {
                        device.free_command_buffers(pool, &self.command_buffers);
                    }
                }
                Teardown::Pipeline => device.destroy_pipeline(self.pipeline.pipeline, None),
                Teardown::PipelineLayout => device.destroy_pipeline_layout(self.pipeline.layout, None),
                Teardown::RenderPass => device.destroy_render_pass(self.pipeline.render_pass, None),
                Teardown::ImageViews => self.swapchain.destroy_views(device),
                Teardown::Swapchain => self.swapchain.destroy_handle(ctx),
            }
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Teardown {
    Framebuffers,
    CommandBuffers,
    Pipeline,
    PipelineLayout,
    RenderPass,
    ImageViews,
    Swapchain,
}

/// Dependents before the objects they reference.
const TEARDOWN_ORDER: [Teardown; 7] = [
    Teardown::Framebuffers,
    Teardown::CommandBuffers,
    Teardown::Pipeline,
    Teardown::PipelineLayout,
    Teardown::RenderPass,
    Teardown::ImageViews,
    Teardown::Swapchain,
];

pub struct VkRenderer {
    chain: Option<ChainResources>,
    sync: Option<FrameSync>,
    mesh: Option<MeshBuffers>,
    pool: vk::CommandPool,
    shaders: ShaderSet,
    surface: SurfaceState,
    clear_color: [f32; 4],
    generation: u64,
    // Declared last so it drops after everything above is released.
    ctx: DeviceContext,
}

impl VkRenderer {
    fn create(
        window: &dyn HasWindowHandle,
        display: &dyn HasDisplayHandle,
        size: RenderSize,
        settings: &RenderSettings,
        mesh: &Mesh,
    ) -> Result<Self> {
        // Shader binaries are checked before any GPU object exists.
        let shaders = ShaderSet::load(&settings.vertex_shader, &settings.fragment_shader)?;
        let ctx = DeviceContext::new(window, display, settings.validation)?;
        let pool = create_command_pool(&ctx.device, ctx.families.graphics)?;

        let mut r = VkRenderer {
            chain: None,
            sync: None,
            mesh: None,
            pool,
            shaders,
            surface: SurfaceState::new(size),
            clear_color: settings.clear_color,
            generation: 0,
            ctx,
        };
        r.mesh = Some(MeshBuffers::upload(&r.ctx, r.pool, mesh)?);
        r.sync = Some(FrameSync::new(&r.ctx.device)?);

        if r.surface.is_drawable() {
            r.rebuild(size)?;
        } else {
            info!("window starts with zero area; swap chain deferred");
            r.surface.request_rebuild();
        }
        Ok(r)
    }

    /// Replace the current generation wholesale. The old one is gone before
    /// the new one is created.
    fn rebuild(&mut self, size: RenderSize) -> Result<()> {
        self.ctx.wait_idle()?;
        if let Some(old) = self.chain.take() {
            unsafe { old.destroy(&self.ctx, self.pool) };
        }
        let mesh = self
            .mesh
            .as_ref()
            .context("mesh buffers released before rebuild")?;
        let chain = ChainResources::build(&self.ctx, self.pool, &self.shaders, mesh, self.clear_color, size)?;
        self.generation += 1;
        info!(
            generation = self.generation,
            width = chain.swapchain.extent.width,
            height = chain.swapchain.extent.height,
            images = chain.swapchain.len(),
            "swap chain built"
        );
        self.chain = Some(chain);
        Ok(())
    }

    fn rebuild_if_pending(&mut self) -> Result<()> {
        match self.surface.take_rebuild() {
            Some(size) => self.rebuild(size),
            None => Ok(()),
        }
    }

    fn draw_frame(&mut self) -> Result<FrameStatus> {
        if !self.surface.is_drawable() {
            return Ok(FrameStatus::Skipped);
        }
        self.rebuild_if_pending()?;

        let (Some(chain), Some(sync)) = (self.chain.as_ref(), self.sync.as_ref()) else {
            return Ok(FrameStatus::Skipped);
        };
        let ctx = &self.ctx;

        let acquired = unsafe {
            ctx.swapchain_loader.acquire_next_image(
                chain.swapchain.handle,
                u64::MAX,
                sync.image_available,
                vk::Fence::null(),
            )
        };
        let image_index = match classify_acquire(acquired)? {
            Acquired::Image(i) => i,
            Acquired::Rebuild => {
                debug!("acquire reported out-of-date; skipping frame");
                self.surface.request_rebuild();
                self.rebuild_if_pending()?;
                return Ok(FrameStatus::Skipped);
            }
        };

        let wait_stages = [vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT];
        let cmd = chain.command_buffers[image_index as usize];
        let submit = vk::SubmitInfo {
            s_type: vk::StructureType::SUBMIT_INFO,
            wait_semaphore_count: 1,
            p_wait_semaphores: &sync.image_available,
            p_wait_dst_stage_mask: wait_stages.as_ptr(),
            command_buffer_count: 1,
            p_command_buffers: &cmd,
            signal_semaphore_count: 1,
            p_signal_semaphores: &sync.render_finished,
            ..Default::default()
        };
        unsafe {
            ctx.device
                .queue_submit(ctx.graphics_queue, std::slice::from_ref(&submit), vk::Fence::null())
        }
        .map_err(EngineError::Submit)?;

        let present = vk::PresentInfoKHR {
            s_type: vk::StructureType::PRESENT_INFO_KHR,
            wait_semaphore_count: 1,
            p_wait_semaphores: &sync.render_finished,
            swapchain_count: 1,
            p_swapchains: &chain.swapchain.handle,
            p_image_indices: &image_index,
            ..Default::default()
        };
        let presented =
            classify_present(unsafe { ctx.swapchain_loader.queue_present(ctx.present_queue, &present) })?;

        // One frame in flight: the semaphores and command buffers are free
        // again once the present queue drains.
        unsafe { ctx.device.queue_wait_idle(ctx.present_queue) }.context("queue_wait_idle")?;

        if presented == Presented::Rebuild {
            debug!("present reported out-of-date or suboptimal");
            self.surface.request_rebuild();
        }
        self.rebuild_if_pending()?;
        Ok(FrameStatus::Presented)
    }
}

impl Renderer for VkRenderer {
    fn new(
        window: &dyn HasWindowHandle,
        display: &dyn HasDisplayHandle,
        size: RenderSize,
        settings: &RenderSettings,
        mesh: &Mesh,
    ) -> Result<Self> {
        Self::create(window, display, size, settings, mesh)
    }

    fn resize(&mut self, size: RenderSize) -> Result<()> {
        debug!(width = size.width, height = size.height, "framebuffer resized");
        if size.is_zero_area() {
            info!("zero-area window; rebuild deferred");
        }
        self.surface.resized(size);
        Ok(())
    }

    fn render(&mut self) -> Result<FrameStatus> {
        self.draw_frame()
    }
}

impl Drop for VkRenderer {
    fn drop(&mut self) {
        if let Err(e) = self.ctx.wait_idle() {
            warn!("device_wait_idle failed during shutdown: {e:#}");
        }
        unsafe {
            if let Some(chain) = self.chain.take() {
                chain.destroy(&self.ctx, self.pool);
            }
            if let Some(sync) = self.sync.take() {
                sync.destroy(&self.ctx.device);
            }
            if let Some(mesh) = self.mesh.take() {
                mesh.destroy(&self.ctx.device);
            }
            self.ctx.device.destroy_command_pool(self.pool, None);
        }
        info!(generations = self.generation, "renderer released");
        // `ctx` drops next: device, then surface and instance.
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pos(step: Teardown) -> usize {
        TEARDOWN_ORDER.iter().position(|&s| s == step).unwrap()
    }

    #[test]
    fn every_step_runs_exactly_once() {
        for step in TEARDOWN_ORDER {
            assert_eq!(TEARDOWN_ORDER.iter().filter(|&&s| s == step).count(), 1);
        }
    }

    #[test]
    fn dependents_are_released_first() {
        // framebuffers reference the render pass and the image views
        assert!(pos(Teardown::Framebuffers) < pos(Teardown::RenderPass));
        assert!(pos(Teardown::Framebuffers) < pos(Teardown::ImageViews));
        // recorded command buffers reference the pipeline and framebuffers
        assert!(pos(Teardown::CommandBuffers) < pos(Teardown::Pipeline));
        assert!(pos(Teardown::Pipeline) < pos(Teardown::PipelineLayout));
        assert!(pos(Teardown::PipelineLayout) < pos(Teardown::RenderPass));
        assert!(pos(Teardown::ImageViews) < pos(Teardown::Swapchain));
        assert_eq!(pos(Teardown::Swapchain), TEARDOWN_ORDER.len() - 1);
    }
}
