// SPDX-License-Identifier: CEPL-1.0
//! Command pool, per-image draw recording and one-shot transfer submits.

use crate::pipeline::PipelineState;
use crate::resources::MeshBuffers;
use anyhow::{Context, Result};
use ash::vk;

/// Pool on the graphics family. Lives as long as the device context.
pub fn create_command_pool(device: &ash::Device, graphics_family: u32) -> Result<vk::CommandPool> {
    let pool_info = vk::CommandPoolCreateInfo {
        s_type: vk::StructureType::COMMAND_POOL_CREATE_INFO,
        queue_family_index: graphics_family,
        flags: vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER,
        ..Default::default()
    };
    unsafe { device.create_command_pool(&pool_info, None) }
        .context("failed to create command pool")
}

pub fn allocate_command_buffers(
    device: &ash::Device,
    pool: vk::CommandPool,
    count: usize,
) -> Result<Vec<vk::CommandBuffer>> {
    let alloc_info = vk::CommandBufferAllocateInfo {
        s_type: vk::StructureType::COMMAND_BUFFER_ALLOCATE_INFO,
        command_pool: pool,
        level: vk::CommandBufferLevel::PRIMARY,
        command_buffer_count: count as u32,
        ..Default::default()
    };
    unsafe { device.allocate_command_buffers(&alloc_info) }
        .context("failed to allocate command buffers")
}

/// Shared, read-only inputs for recording one generation's draw buffers.
pub struct DrawRecording<'a> {
    pub pipeline: &'a PipelineState,
    pub mesh: &'a MeshBuffers,
    pub clear_color: [f32; 4],
}

impl DrawRecording<'_> {
    /// Records `cmd` to clear and draw the mesh into `framebuffer`. The
    /// buffer is begun without ONE_TIME_SUBMIT and resubmitted every frame
    /// that acquires its image.
    pub unsafe fn record(
        &self,
        device: &ash::Device,
        cmd: vk::CommandBuffer,
        framebuffer: vk::Framebuffer,
    ) -> Result<()> {
        let begin = vk::CommandBufferBeginInfo {
            s_type: vk::StructureType::COMMAND_BUFFER_BEGIN_INFO,
            flags: vk::CommandBufferUsageFlags::SIMULTANEOUS_USE,
            ..Default::default()
        };
        device
            .begin_command_buffer(cmd, &begin)
            .context("failed to begin recording command buffer")?;

        let clear = vk::ClearValue {
            color: vk::ClearColorValue {
                float32: self.clear_color,
            },
        };
        let rp_begin = vk::RenderPassBeginInfo {
            s_type: vk::StructureType::RENDER_PASS_BEGIN_INFO,
            render_pass: self.pipeline.render_pass,
            framebuffer,
            render_area: vk::Rect2D {
                offset: vk::Offset2D { x: 0, y: 0 },
                extent: self.pipeline.extent,
            },
            clear_value_count: 1,
            p_clear_values: &clear,
            ..Default::default()
        };
        device.cmd_begin_render_pass(cmd, &rp_begin, vk::SubpassContents::INLINE);
        device.cmd_bind_pipeline(cmd, vk::PipelineBindPoint::GRAPHICS, self.pipeline.pipeline);
        device.cmd_bind_vertex_buffers(cmd, 0, &[self.mesh.vertex.buffer], &[0]);
        device.cmd_bind_index_buffer(cmd, self.mesh.index.buffer, 0, vk::IndexType::UINT16);
        device.cmd_draw_indexed(cmd, self.mesh.index_count, 1, 0, 0, 0);
        device.cmd_end_render_pass(cmd);

        device
            .end_command_buffer(cmd)
            .context("failed to record command buffer")
    }

    /// One command buffer per framebuffer, same index.
    pub unsafe fn record_all(
        &self,
        device: &ash::Device,
        cmds: &[vk::CommandBuffer],
        framebuffers: &[vk::Framebuffer],
    ) -> Result<()> {
        anyhow::ensure!(
            cmds.len() == framebuffers.len(),
            "{} command buffers for {} framebuffers",
            cmds.len(),
            framebuffers.len()
        );
        for (&cmd, &fb) in cmds.iter().zip(framebuffers) {
            self.record(device, cmd, fb)?;
        }
        Ok(())
    }
}

/// Records `body` into a temporary command buffer, submits it on `queue`
/// and blocks until the queue drains. The buffer is freed on every path.
pub unsafe fn submit_one_shot(
    device: &ash::Device,
    pool: vk::CommandPool,
    queue: vk::Queue,
    body: impl FnOnce(vk::CommandBuffer),
) -> Result<()> {
    let cmd = allocate_command_buffers(device, pool, 1)?[0];
    let result = (|| -> Result<()> {
        let bi = vk::CommandBufferBeginInfo {
            s_type: vk::StructureType::COMMAND_BUFFER_BEGIN_INFO,
            flags: vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT,
            ..Default::default()
        };
        device.begin_command_buffer(cmd, &bi)?;
        body(cmd);
        device.end_command_buffer(cmd)?;

        let si = vk::SubmitInfo {
            s_type: vk::StructureType::SUBMIT_INFO,
            command_buffer_count: 1,
            p_command_buffers: &cmd,
            ..Default::default()
        };
        device.queue_submit(queue, std::slice::from_ref(&si), vk::Fence::null())?;
        device.queue_wait_idle(queue)?;
        Ok(())
    })();
    device.free_command_buffers(pool, std::slice::from_ref(&cmd));
    result.context("one-shot transfer submit failed")
}
