//! Graphics pipeline creation.

use crate::error::{GpuError, Result};
use ash::vk;
use virtex_core::ShaderStages;

/// Graphics pipeline configuration.
#[derive(Clone)]
pub struct GraphicsPipelineConfig {
    pub topology: vk::PrimitiveTopology,
    pub polygon_mode: vk::PolygonMode,
    pub cull_mode: vk::CullModeFlags,
    pub front_face: vk::FrontFace,
    pub color_formats: Vec<vk::Format>,
    /// Control points per patch when tessellation stages are present.
    pub patch_control_points: u32,
}

impl Default for GraphicsPipelineConfig {
    fn default() -> Self {
        Self {
            topology: vk::PrimitiveTopology::TRIANGLE_STRIP,
            polygon_mode: vk::PolygonMode::FILL,
            cull_mode: vk::CullModeFlags::NONE,
            front_face: vk::FrontFace::COUNTER_CLOCKWISE,
            color_formats: vec![vk::Format::R8G8B8A8_UNORM],
            patch_control_points: 4,
        }
    }
}

/// Graphics pipeline wrapper.
pub struct GraphicsPipeline {
    pub pipeline: vk::Pipeline,
    pub layout: vk::PipelineLayout,
}

impl GraphicsPipeline {
    /// Create a graphics pipeline using dynamic rendering (Vulkan 1.3).
    ///
    /// Any stage in `stages` may be absent except vertex and fragment.
    ///
    /// # Safety
    /// The device must be valid and shader code must be valid SPIR-V.
    pub unsafe fn new(
        device: &ash::Device,
        stages: &ShaderStages<'_>,
        config: &GraphicsPipelineConfig,
        descriptor_set_layouts: &[vk::DescriptorSetLayout],
    ) -> Result<Self> {
        if stages.vertex.is_none() || stages.fragment.is_none() {
            return Err(GpuError::ShaderCompilation(
                "vertex and fragment stages are required".to_string(),
            ));
        }

        let stage_code = [
            (vk::ShaderStageFlags::VERTEX, stages.vertex, "Vertex"),
            (
                vk::ShaderStageFlags::TESSELLATION_CONTROL,
                stages.tess_control,
                "Tessellation control",
            ),
            (
                vk::ShaderStageFlags::TESSELLATION_EVALUATION,
                stages.tess_evaluation,
                "Tessellation evaluation",
            ),
            (vk::ShaderStageFlags::GEOMETRY, stages.geometry, "Geometry"),
            (vk::ShaderStageFlags::FRAGMENT, stages.fragment, "Fragment"),
        ];

        let mut modules = Vec::with_capacity(stage_code.len());
        for (stage, code, label) in stage_code {
            let Some(code) = code else { continue };
            let info = vk::ShaderModuleCreateInfo::default().code(code);
            match device.create_shader_module(&info, None) {
                Ok(module) => modules.push((stage, module)),
                Err(e) => {
                    destroy_modules(device, &modules);
                    return Err(GpuError::ShaderCompilation(format!("{label}: {e}")));
                }
            }
        }

        let result = Self::build(device, &modules, stages, config, descriptor_set_layouts);
        destroy_modules(device, &modules);
        result
    }

    unsafe fn build(
        device: &ash::Device,
        modules: &[(vk::ShaderStageFlags, vk::ShaderModule)],
        stages: &ShaderStages<'_>,
        config: &GraphicsPipelineConfig,
        descriptor_set_layouts: &[vk::DescriptorSetLayout],
    ) -> Result<Self> {
        let shader_stages: Vec<_> = modules
            .iter()
            .map(|&(stage, module)| {
                vk::PipelineShaderStageCreateInfo::default()
                    .stage(stage)
                    .module(module)
                    .name(c"main")
            })
            .collect();

        let tessellated = stages.tess_control.is_some() || stages.tess_evaluation.is_some();

        // Vertices come from the vertex index
        let vertex_input = vk::PipelineVertexInputStateCreateInfo::default();

        let topology = if tessellated {
            vk::PrimitiveTopology::PATCH_LIST
        } else {
            config.topology
        };
        let input_assembly = vk::PipelineInputAssemblyStateCreateInfo::default()
            .topology(topology)
            .primitive_restart_enable(false);

        let tessellation = vk::PipelineTessellationStateCreateInfo::default()
            .patch_control_points(config.patch_control_points);

        // Viewport (dynamic)
        let viewport_state = vk::PipelineViewportStateCreateInfo::default()
            .viewport_count(1)
            .scissor_count(1);

        let rasterization = vk::PipelineRasterizationStateCreateInfo::default()
            .depth_clamp_enable(false)
            .rasterizer_discard_enable(false)
            .polygon_mode(config.polygon_mode)
            .cull_mode(config.cull_mode)
            .front_face(config.front_face)
            .depth_bias_enable(false)
            .line_width(1.0);

        let multisampling = vk::PipelineMultisampleStateCreateInfo::default()
            .rasterization_samples(vk::SampleCountFlags::TYPE_1)
            .sample_shading_enable(false);

        let color_blend_attachments: Vec<_> = config
            .color_formats
            .iter()
            .map(|_| {
                vk::PipelineColorBlendAttachmentState::default()
                    .blend_enable(false)
                    .color_write_mask(vk::ColorComponentFlags::RGBA)
            })
            .collect();

        let color_blending = vk::PipelineColorBlendStateCreateInfo::default()
            .logic_op_enable(false)
            .attachments(&color_blend_attachments);

        let dynamic_states = [vk::DynamicState::VIEWPORT, vk::DynamicState::SCISSOR];
        let dynamic_state =
            vk::PipelineDynamicStateCreateInfo::default().dynamic_states(&dynamic_states);

        let layout_info =
            vk::PipelineLayoutCreateInfo::default().set_layouts(descriptor_set_layouts);

        let layout = device
            .create_pipeline_layout(&layout_info, None)
            .map_err(|e| GpuError::PipelineCreation(e.to_string()))?;

        let mut rendering_info = vk::PipelineRenderingCreateInfo::default()
            .color_attachment_formats(&config.color_formats);

        let mut pipeline_info = vk::GraphicsPipelineCreateInfo::default()
            .stages(&shader_stages)
            .vertex_input_state(&vertex_input)
            .input_assembly_state(&input_assembly)
            .viewport_state(&viewport_state)
            .rasterization_state(&rasterization)
            .multisample_state(&multisampling)
            .color_blend_state(&color_blending)
            .dynamic_state(&dynamic_state)
            .layout(layout)
            .push_next(&mut rendering_info);
        if tessellated {
            pipeline_info = pipeline_info.tessellation_state(&tessellation);
        }

        let pipelines =
            match device.create_graphics_pipelines(vk::PipelineCache::null(), &[pipeline_info], None)
            {
                Ok(pipelines) => pipelines,
                Err((_pipelines, e)) => {
                    device.destroy_pipeline_layout(layout, None);
                    return Err(GpuError::PipelineCreation(e.to_string()));
                }
            };

        Ok(Self {
            pipeline: pipelines[0],
            layout,
        })
    }

    /// Destroy the pipeline.
    ///
    /// # Safety
    /// The device must be valid and the pipeline must not be in use.
    pub unsafe fn destroy(&self, device: &ash::Device) {
        device.destroy_pipeline(self.pipeline, None);
        device.destroy_pipeline_layout(self.layout, None);
    }
}

unsafe fn destroy_modules(device: &ash::Device, modules: &[(vk::ShaderStageFlags, vk::ShaderModule)]) {
    for &(_, module) in modules {
        device.destroy_shader_module(module, None);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_draws_strips() {
        let config = GraphicsPipelineConfig::default();
        assert_eq!(config.topology, vk::PrimitiveTopology::TRIANGLE_STRIP);
        assert_eq!(config.cull_mode, vk::CullModeFlags::NONE);
        assert_eq!(config.color_formats, vec![vk::Format::R8G8B8A8_UNORM]);
    }
}
