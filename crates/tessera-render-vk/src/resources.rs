// SPDX-License-Identifier: CEPL-1.0
//! Buffers, device memory and framebuffers.

use crate::commands::submit_one_shot;
use crate::context::DeviceContext;
use crate::error::EngineError;
use anyhow::{Context, Result};
use ash::vk;
use tessera_math::Mesh;

/// First memory type whose bit is set in `type_filter` and whose flags
/// contain every flag in `required`.
pub fn find_memory_type(
    props: &vk::PhysicalDeviceMemoryProperties,
    type_filter: u32,
    required: vk::MemoryPropertyFlags,
) -> Option<u32> {
    (0..props.memory_type_count).find(|&i| {
        (type_filter & (1 << i)) != 0
            && props.memory_types[i as usize].property_flags.contains(required)
    })
}

/// A buffer and the allocation bound to it at offset 0.
pub struct GpuBuffer {
    pub buffer: vk::Buffer,
    pub memory: vk::DeviceMemory,
    pub size: vk::DeviceSize,
}

impl GpuBuffer {
    /// Allocates exactly what the driver reports as required, which may be
    /// larger than `size`.
    pub fn create(
        ctx: &DeviceContext,
        size: vk::DeviceSize,
        usage: vk::BufferUsageFlags,
        props: vk::MemoryPropertyFlags,
    ) -> Result<Self> {
        let device = &ctx.device;
        unsafe {
            let bci = vk::BufferCreateInfo {
                s_type: vk::StructureType::BUFFER_CREATE_INFO,
                size,
                usage,
                sharing_mode: vk::SharingMode::EXCLUSIVE,
                ..Default::default()
            };
            let buffer = device
                .create_buffer(&bci, None)
                .context("failed to create buffer")?;
            let req = device.get_buffer_memory_requirements(buffer);

            let Some(mem_type) = find_memory_type(&ctx.memory_properties, req.memory_type_bits, props)
            else {
                device.destroy_buffer(buffer, None);
                return Err(EngineError::NoCompatibleMemoryType {
                    type_filter: req.memory_type_bits,
                    required: props,
                }
                .into());
            };

            let mai = vk::MemoryAllocateInfo {
                s_type: vk::StructureType::MEMORY_ALLOCATE_INFO,
                allocation_size: req.size,
                memory_type_index: mem_type,
                ..Default::default()
            };
            let memory = match device.allocate_memory(&mai, None) {
                Ok(m) => m,
                Err(e) => {
                    device.destroy_buffer(buffer, None);
                    return Err(e).context("failed to allocate buffer memory");
                }
            };
            if let Err(e) = device.bind_buffer_memory(buffer, memory, 0) {
                device.destroy_buffer(buffer, None);
                device.free_memory(memory, None);
                return Err(e).context("failed to bind buffer memory");
            }
            Ok(Self {
                buffer,
                memory,
                size,
            })
        }
    }

    /// Copies `data` into a host-visible buffer through a transient mapping.
    pub unsafe fn write(&self, device: &ash::Device, data: &[u8]) -> Result<()> {
        let ptr = device
            .map_memory(self.memory, 0, self.size, vk::MemoryMapFlags::empty())
            .context("failed to map buffer memory")?;
        std::ptr::copy_nonoverlapping(data.as_ptr(), ptr.cast::<u8>(), data.len());
        device.unmap_memory(self.memory);
        Ok(())
    }

    pub unsafe fn destroy(self, device: &ash::Device) {
        device.destroy_buffer(self.buffer, None);
        device.free_memory(self.memory, None);
    }
}

/// Host data -> HOST_VISIBLE|HOST_COHERENT staging -> DEVICE_LOCAL buffer
/// with `usage | TRANSFER_DST`. Blocks on the graphics queue; the staging
/// buffer is released whether or not the copy succeeds.
pub fn upload_via_staging(
    ctx: &DeviceContext,
    pool: vk::CommandPool,
    data: &[u8],
    usage: vk::BufferUsageFlags,
) -> Result<GpuBuffer> {
    let size = data.len() as vk::DeviceSize;
    let staging = GpuBuffer::create(
        ctx,
        size,
        vk::BufferUsageFlags::TRANSFER_SRC,
        vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
    )?;

    let result = (|| -> Result<GpuBuffer> {
        unsafe { staging.write(&ctx.device, data)? };
        let dst = GpuBuffer::create(
            ctx,
            size,
            usage | vk::BufferUsageFlags::TRANSFER_DST,
            vk::MemoryPropertyFlags::DEVICE_LOCAL,
        )?;
        let region = vk::BufferCopy {
            src_offset: 0,
            dst_offset: 0,
            size,
        };
        let copied = unsafe {
            submit_one_shot(&ctx.device, pool, ctx.graphics_queue, |cmd| {
                ctx.device
                    .cmd_copy_buffer(cmd, staging.buffer, dst.buffer, std::slice::from_ref(&region));
            })
        };
        match copied {
            Ok(()) => Ok(dst),
            Err(e) => {
                unsafe { dst.destroy(&ctx.device) };
                Err(e)
            }
        }
    })();

    unsafe { staging.destroy(&ctx.device) };
    result
}

/// Device-local geometry for the whole run. Independent of the swap chain.
pub struct MeshBuffers {
    pub vertex: GpuBuffer,
    pub index: GpuBuffer,
    pub index_count: u32,
}

impl MeshBuffers {
    pub fn upload(ctx: &DeviceContext, pool: vk::CommandPool, mesh: &Mesh) -> Result<Self> {
        let vertex = upload_via_staging(
            ctx,
            pool,
            mesh.vertex_bytes(),
            vk::BufferUsageFlags::VERTEX_BUFFER,
        )
        .context("vertex buffer upload")?;
        let index = match upload_via_staging(
            ctx,
            pool,
            mesh.index_bytes(),
            vk::BufferUsageFlags::INDEX_BUFFER,
        ) {
            Ok(b) => b,
            Err(e) => {
                unsafe { vertex.destroy(&ctx.device) };
                return Err(e.context("index buffer upload"));
            }
        };
        tracing::info!(
            vertices = mesh.vertices.len(),
            indices = mesh.index_count(),
            "mesh uploaded"
        );
        Ok(Self {
            vertex,
            index,
            index_count: mesh.index_count(),
        })
    }

    pub unsafe fn destroy(self, device: &ash::Device) {
        self.index.destroy(device);
        self.vertex.destroy(device);
    }
}

/// One framebuffer per image view, same index, sized to `extent`.
pub fn create_framebuffers(
    device: &ash::Device,
    render_pass: vk::RenderPass,
    views: &[vk::ImageView],
    extent: vk::Extent2D,
) -> Result<Vec<vk::Framebuffer>> {
    let mut out = Vec::with_capacity(views.len());
    for view in views {
        let ci = vk::FramebufferCreateInfo {
            s_type: vk::StructureType::FRAMEBUFFER_CREATE_INFO,
            render_pass,
            attachment_count: 1,
            p_attachments: view,
            width: extent.width,
            height: extent.height,
            layers: 1,
            ..Default::default()
        };
        match unsafe { device.create_framebuffer(&ci, None) } {
            Ok(fb) => out.push(fb),
            Err(e) => {
                unsafe { destroy_framebuffers(device, &mut out) };
                return Err(e).context("failed to create framebuffer");
            }
        }
    }
    Ok(out)
}

pub unsafe fn destroy_framebuffers(device: &ash::Device, framebuffers: &mut Vec<vk::Framebuffer>) {
    for fb in framebuffers.drain(..) {
        device.destroy_framebuffer(fb, None);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn props(flags: &[vk::MemoryPropertyFlags]) -> vk::PhysicalDeviceMemoryProperties {
        let mut p = vk::PhysicalDeviceMemoryProperties {
            memory_type_count: flags.len() as u32,
            ..Default::default()
        };
        for (i, &f) in flags.iter().enumerate() {
            p.memory_types[i] = vk::MemoryType {
                property_flags: f,
                heap_index: 0,
            };
        }
        p
    }

    const HV: vk::MemoryPropertyFlags = vk::MemoryPropertyFlags::HOST_VISIBLE;
    const HC: vk::MemoryPropertyFlags = vk::MemoryPropertyFlags::HOST_COHERENT;
    const DL: vk::MemoryPropertyFlags = vk::MemoryPropertyFlags::DEVICE_LOCAL;

    #[test]
    fn skips_types_missing_a_required_flag() {
        let p = props(&[DL, HV, DL, HV | HC]);
        // filter {1, 3}; type 1 lacks HOST_COHERENT
        assert_eq!(find_memory_type(&p, 0b1010, HV | HC), Some(3));
    }

    #[test]
    fn respects_the_type_filter() {
        let p = props(&[DL, DL | HV]);
        assert_eq!(find_memory_type(&p, 0b10, DL), Some(1));
        assert_eq!(find_memory_type(&p, 0b11, DL), Some(0));
    }

    #[test]
    fn no_match_is_none() {
        let p = props(&[DL, DL]);
        assert_eq!(find_memory_type(&p, 0b11, HV), None);
        assert_eq!(find_memory_type(&p, 0, DL), None);
    }

    #[test]
    fn ignores_filter_bits_past_the_type_count() {
        let p = props(&[DL]);
        assert_eq!(find_memory_type(&p, 0b10, DL), None);
    }
}
