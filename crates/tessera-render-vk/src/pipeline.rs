// SPDX-License-Identifier: CEPL-1.0
//! Pipeline Builder: render pass, pipeline layout and the graphics pipeline
//! for one swap-chain generation.

use crate::error::EngineError;
use anyhow::{anyhow, Context, Result};
use ash::util::read_spv;
use ash::vk;
use std::io::Cursor;
use std::path::Path;
use tessera_math::Vertex;

/// Pre-compiled SPIR-V for the vertex and fragment stages. Loaded once at
/// startup and reused for every rebuild.
pub struct ShaderSet {
    vertex: Vec<u32>,
    fragment: Vec<u32>,
}

fn load_spv(path: &Path) -> Result<Vec<u32>, EngineError> {
    let bytes = std::fs::read(path).map_err(|source| EngineError::ShaderRead {
        path: path.to_owned(),
        source,
    })?;
    read_spv(&mut Cursor::new(&bytes[..])).map_err(|source| EngineError::ShaderInvalid {
        path: path.to_owned(),
        source,
    })
}

impl ShaderSet {
    pub fn load(vertex: &Path, fragment: &Path) -> Result<Self> {
        Ok(Self {
            vertex: load_spv(vertex)?,
            fragment: load_spv(fragment)?,
        })
    }
}

unsafe fn create_shader_module(device: &ash::Device, code: &[u32]) -> Result<vk::ShaderModule> {
    let ci = vk::ShaderModuleCreateInfo {
        s_type: vk::StructureType::SHADER_MODULE_CREATE_INFO,
        code_size: std::mem::size_of_val(code),
        p_code: code.as_ptr(),
        ..Default::default()
    };
    device
        .create_shader_module(&ci, None)
        .context("failed to create shader module")
}

// Single color attachment: cleared on load, stored, UNDEFINED -> PRESENT_SRC.
// The external dependency keeps the layout transition from running before
// the acquire semaphore (waited at COLOR_ATTACHMENT_OUTPUT) has signaled.
unsafe fn create_render_pass(device: &ash::Device, format: vk::Format) -> Result<vk::RenderPass> {
    let color_att = vk::AttachmentDescription {
        format,
        samples: vk::SampleCountFlags::TYPE_1,
        load_op: vk::AttachmentLoadOp::CLEAR,
        store_op: vk::AttachmentStoreOp::STORE,
        stencil_load_op: vk::AttachmentLoadOp::DONT_CARE,
        stencil_store_op: vk::AttachmentStoreOp::DONT_CARE,
        initial_layout: vk::ImageLayout::UNDEFINED,
        final_layout: vk::ImageLayout::PRESENT_SRC_KHR,
        ..Default::default()
    };
    let att_ref = vk::AttachmentReference {
        attachment: 0,
        layout: vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
    };
    let subpass = vk::SubpassDescription {
        pipeline_bind_point: vk::PipelineBindPoint::GRAPHICS,
        color_attachment_count: 1,
        p_color_attachments: &att_ref,
        ..Default::default()
    };
    let dependency = vk::SubpassDependency {
        src_subpass: vk::SUBPASS_EXTERNAL,
        dst_subpass: 0,
        src_stage_mask: vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
        src_access_mask: vk::AccessFlags::empty(),
        dst_stage_mask: vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
        dst_access_mask: vk::AccessFlags::COLOR_ATTACHMENT_READ
            | vk::AccessFlags::COLOR_ATTACHMENT_WRITE,
        ..Default::default()
    };

    let rp_info = vk::RenderPassCreateInfo {
        s_type: vk::StructureType::RENDER_PASS_CREATE_INFO,
        attachment_count: 1,
        p_attachments: &color_att,
        subpass_count: 1,
        p_subpasses: &subpass,
        dependency_count: 1,
        p_dependencies: &dependency,
        ..Default::default()
    };
    device
        .create_render_pass(&rp_info, None)
        .context("failed to create render pass")
}

fn vertex_bindings() -> (
    vk::VertexInputBindingDescription,
    [vk::VertexInputAttributeDescription; 2],
) {
    let binding = vk::VertexInputBindingDescription {
        binding: 0,
        stride: std::mem::size_of::<Vertex>() as u32,
        input_rate: vk::VertexInputRate::VERTEX,
    };
    let attributes = [
        vk::VertexInputAttributeDescription {
            location: 0,
            binding: 0,
            format: vk::Format::R32G32_SFLOAT,
            offset: std::mem::offset_of!(Vertex, pos) as u32,
        },
        vk::VertexInputAttributeDescription {
            location: 1,
            binding: 0,
            format: vk::Format::R32G32B32_SFLOAT,
            offset: std::mem::offset_of!(Vertex, color) as u32,
        },
    ];
    (binding, attributes)
}

unsafe fn create_graphics_pipeline(
    device: &ash::Device,
    shaders: &ShaderSet,
    render_pass: vk::RenderPass,
    layout: vk::PipelineLayout,
    extent: vk::Extent2D,
) -> Result<vk::Pipeline> {
    let vs = create_shader_module(device, &shaders.vertex)?;
    let fs = match create_shader_module(device, &shaders.fragment) {
        Ok(fs) => fs,
        Err(e) => {
            device.destroy_shader_module(vs, None);
            return Err(e);
        }
    };

    let entry = c"main";
    let stages = [
        vk::PipelineShaderStageCreateInfo {
            s_type: vk::StructureType::PIPELINE_SHADER_STAGE_CREATE_INFO,
            stage: vk::ShaderStageFlags::VERTEX,
            module: vs,
            p_name: entry.as_ptr(),
            ..Default::default()
        },
        vk::PipelineShaderStageCreateInfo {
            s_type: vk::StructureType::PIPELINE_SHADER_STAGE_CREATE_INFO,
            stage: vk::ShaderStageFlags::FRAGMENT,
            module: fs,
            p_name: entry.as_ptr(),
            ..Default::default()
        },
    ];

    let (vb, va) = vertex_bindings();
    let vertex_input = vk::PipelineVertexInputStateCreateInfo {
        s_type: vk::StructureType::PIPELINE_VERTEX_INPUT_STATE_CREATE_INFO,
        vertex_binding_description_count: 1,
        p_vertex_binding_descriptions: &vb,
        vertex_attribute_description_count: va.len() as u32,
        p_vertex_attribute_descriptions: va.as_ptr(),
        ..Default::default()
    };
    let input_assembly = vk::PipelineInputAssemblyStateCreateInfo {
        s_type: vk::StructureType::PIPELINE_INPUT_ASSEMBLY_STATE_CREATE_INFO,
        topology: vk::PrimitiveTopology::TRIANGLE_LIST,
        primitive_restart_enable: vk::FALSE,
        ..Default::default()
    };

    // Baked into the pipeline: any extent change means a new pipeline.
    let viewport = vk::Viewport {
        x: 0.0,
        y: 0.0,
        width: extent.width as f32,
        height: extent.height as f32,
        min_depth: 0.0,
        max_depth: 1.0,
    };
    let scissor = vk::Rect2D {
        offset: vk::Offset2D { x: 0, y: 0 },
        extent,
    };
    let viewport_state = vk::PipelineViewportStateCreateInfo {
        s_type: vk::StructureType::PIPELINE_VIEWPORT_STATE_CREATE_INFO,
        viewport_count: 1,
        p_viewports: &viewport,
        scissor_count: 1,
        p_scissors: &scissor,
        ..Default::default()
    };

    let raster = vk::PipelineRasterizationStateCreateInfo {
        s_type: vk::StructureType::PIPELINE_RASTERIZATION_STATE_CREATE_INFO,
        depth_clamp_enable: vk::FALSE,
        rasterizer_discard_enable: vk::FALSE,
        polygon_mode: vk::PolygonMode::FILL,
        cull_mode: vk::CullModeFlags::BACK,
        front_face: vk::FrontFace::CLOCKWISE,
        depth_bias_enable: vk::FALSE,
        line_width: 1.0,
        ..Default::default()
    };
    let multisample = vk::PipelineMultisampleStateCreateInfo {
        s_type: vk::StructureType::PIPELINE_MULTISAMPLE_STATE_CREATE_INFO,
        rasterization_samples: vk::SampleCountFlags::TYPE_1,
        sample_shading_enable: vk::FALSE,
        min_sample_shading: 1.0,
        ..Default::default()
    };
    let color_blend_att = vk::PipelineColorBlendAttachmentState {
        color_write_mask: vk::ColorComponentFlags::RGBA,
        blend_enable: vk::FALSE,
        ..Default::default()
    };
    let color_blend = vk::PipelineColorBlendStateCreateInfo {
        s_type: vk::StructureType::PIPELINE_COLOR_BLEND_STATE_CREATE_INFO,
        logic_op_enable: vk::FALSE,
        logic_op: vk::LogicOp::COPY,
        attachment_count: 1,
        p_attachments: &color_blend_att,
        ..Default::default()
    };

    let pipeline_info = vk::GraphicsPipelineCreateInfo {
        s_type: vk::StructureType::GRAPHICS_PIPELINE_CREATE_INFO,
        stage_count: stages.len() as u32,
        p_stages: stages.as_ptr(),
        p_vertex_input_state: &vertex_input,
        p_input_assembly_state: &input_assembly,
        p_viewport_state: &viewport_state,
        p_rasterization_state: &raster,
        p_multisample_state: &multisample,
        p_color_blend_state: &color_blend,
        layout,
        render_pass,
        subpass: 0,
        base_pipeline_handle: vk::Pipeline::null(),
        ..Default::default()
    };

    let created = device.create_graphics_pipelines(
        vk::PipelineCache::null(),
        std::slice::from_ref(&pipeline_info),
        None,
    );
    device.destroy_shader_module(fs, None);
    device.destroy_shader_module(vs, None);

    match created {
        Ok(p) => Ok(p[0]),
        Err((_, err)) => Err(anyhow!("failed to create graphics pipeline: {err}")),
    }
}

/// Render pass, layout and pipeline for one format/extent pair. Only valid
/// for the swap-chain generation it was built against.
pub struct PipelineState {
    pub render_pass: vk::RenderPass,
    pub layout: vk::PipelineLayout,
    pub pipeline: vk::Pipeline,
    pub format: vk::Format,
    pub extent: vk::Extent2D,
}

impl PipelineState {
    pub fn new(
        device: &ash::Device,
        shaders: &ShaderSet,
        format: vk::Format,
        extent: vk::Extent2D,
    ) -> Result<Self> {
        unsafe {
            let render_pass = create_render_pass(device, format)?;

            // No descriptors or push constants.
            let layout_info = vk::PipelineLayoutCreateInfo {
                s_type: vk::StructureType::PIPELINE_LAYOUT_CREATE_INFO,
                ..Default::default()
            };
            let layout = match device.create_pipeline_layout(&layout_info, None) {
                Ok(l) => l,
                Err(e) => {
                    device.destroy_render_pass(render_pass, None);
                    return Err(anyhow!("failed to create pipeline layout: {e}"));
                }
            };

            let pipeline =
                match create_graphics_pipeline(device, shaders, render_pass, layout, extent) {
                    Ok(p) => p,
                    Err(e) => {
                        device.destroy_pipeline_layout(layout, None);
                        device.destroy_render_pass(render_pass, None);
                        return Err(e);
                    }
                };

            Ok(Self {
                render_pass,
                layout,
                pipeline,
                format,
                extent,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn vertex_attributes_follow_vertex_layout() {
        let (binding, attrs) = vertex_bindings();
        assert_eq!(binding.stride, 20);
        assert_eq!((attrs[0].location, attrs[0].offset), (0, 0));
        assert_eq!(attrs[0].format, vk::Format::R32G32_SFLOAT);
        assert_eq!((attrs[1].location, attrs[1].offset), (1, 8));
        assert_eq!(attrs[1].format, vk::Format::R32G32B32_SFLOAT);
    }

    #[test]
    fn missing_shader_file_is_reported_with_its_path() {
        let missing = Path::new("definitely/not/here/vert.spv");
        let err = ShaderSet::load(missing, missing).err().unwrap();
        let engine = err.downcast_ref::<EngineError>().unwrap();
        assert!(matches!(engine, EngineError::ShaderRead { path, .. } if path == missing));
    }

    #[test]
    fn io_cause_appears_once_in_the_error_chain() {
        let missing = Path::new("definitely/not/here/frag.spv");
        let err = load_spv(missing).unwrap_err();
        let cause = std::error::Error::source(&err).unwrap().to_string();
        assert_eq!(
            err.to_string(),
            format!("failed to read shader binary {}", missing.display())
        );
        let chain = format!("{:#}", anyhow::Error::new(err));
        assert_eq!(chain.matches(&cause).count(), 1);
    }

    #[test]
    fn default_shader_paths_load() {
        let settings = tessera_render::RenderSettings::default();
        let root = Path::new(env!("CARGO_MANIFEST_DIR")).join("../..");
        let set = ShaderSet::load(
            &root.join(&settings.vertex_shader),
            &root.join(&settings.fragment_shader),
        )
        .unwrap();
        assert_eq!(set.vertex[0], 0x0723_0203);
        assert_eq!(set.fragment[0], 0x0723_0203);
    }

    #[test]
    fn misaligned_spirv_is_rejected() {
        let path = std::env::temp_dir().join(format!("tessera-bad-{}.spv", std::process::id()));
        std::fs::File::create(&path)
            .unwrap()
            .write_all(&[0x03, 0x02, 0x23])
            .unwrap();
        let err = load_spv(&path).unwrap_err();
        std::fs::remove_file(&path).ok();
        assert!(matches!(err, EngineError::ShaderInvalid { .. }));
    }

    #[test]
    fn spirv_words_are_loaded() {
        let path = std::env::temp_dir().join(format!("tessera-ok-{}.spv", std::process::id()));
        let magic: u32 = 0x0723_0203;
        let mut bytes = magic.to_le_bytes().to_vec();
        bytes.extend_from_slice(&7u32.to_le_bytes());
        std::fs::write(&path, &bytes).unwrap();
        let words = load_spv(&path).unwrap();
        std::fs::remove_file(&path).ok();
        assert_eq!(words, vec![magic, 7]);
    }
}
