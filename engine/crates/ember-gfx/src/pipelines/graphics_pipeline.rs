use std::{ffi::CStr, path::PathBuf};

use anyhow::Context;
use ash::vk;
use itertools::Itertools;

use crate::gfx::Gfx;
use crate::pipelines::shader::GfxShaderModuleCache;
use crate::{foundation::debug_messenger::DebugType, pipelines::shader::GfxShaderStageInfo};

pub struct GfxPipelineLayout {
    handle: vk::PipelineLayout,
}
impl GfxPipelineLayout {
    pub fn new(
        descriptor_set_layouts: &[vk::DescriptorSetLayout],
        push_constant_ranges: &[vk::PushConstantRange],
        debug_name: impl AsRef<str>,
    ) -> anyhow::Result<Self> {
        let pipeline_layout_create_info = vk::PipelineLayoutCreateInfo::default()
            .set_layouts(descriptor_set_layouts)
            .push_constant_ranges(push_constant_ranges);
        let gfx_device = Gfx::get().gfx_device();
        let handle = unsafe { gfx_device.create_pipeline_layout(&pipeline_layout_create_info, None) }
            .with_context(|| format!("pipeline: create pipeline layout {}", debug_name.as_ref()))?;
        let layout = GfxPipelineLayout { handle };
        gfx_device.set_debug_name(&layout, debug_name);
        Ok(layout)
    }

    #[inline]
    pub fn handle(&self) -> vk::PipelineLayout {
        self.handle
    }

    pub fn destroy(self) {
        unsafe {
            Gfx::get().gfx_device().destroy_pipeline_layout(self.handle, None);
        }
    }
}
impl DebugType for GfxPipelineLayout {
    fn debug_type_name() -> &'static str {
        "GfxPipelineLayout"
    }

    fn vk_handle(&self) -> impl vk::Handle {
        self.handle
    }
}

/// # Destroy
///
/// pipeline layout 由外部持有，并且需要在所有使用它的 pipeline 销毁之后再销毁
pub struct GfxGraphicsPipeline {
    pipeline: vk::Pipeline,
    pipeline_layout: vk::PipelineLayout,
}
impl GfxGraphicsPipeline {
    pub fn new(
        create_info: &GfxGraphicsPipelineCreateInfo,
        pipeline_layout: &GfxPipelineLayout,
        debug_name: &str,
    ) -> anyhow::Result<Self> {
        let mut shader_modules_cache = GfxShaderModuleCache::new();
        let result = Self::new_with_cache(create_info, pipeline_layout, debug_name, &mut shader_modules_cache);
        shader_modules_cache.destroy();
        result
    }

    fn new_with_cache(
        create_info: &GfxGraphicsPipelineCreateInfo,
        pipeline_layout: &GfxPipelineLayout,
        debug_name: &str,
        shader_modules_cache: &mut GfxShaderModuleCache,
    ) -> anyhow::Result<Self> {
        // dynamic rendering 需要的 framebuffer 信息
        let mut attach_info = vk::PipelineRenderingCreateInfo::default()
            .color_attachment_formats(&create_info.color_attach_formats)
            .depth_attachment_format(create_info.depth_attach_format);

        let shader_modules = create_info
            .shader_stages
            .iter()
            .map(|stage| shader_modules_cache.get_or_load(stage.path()))
            .collect::<anyhow::Result<Vec<_>>>()
            .with_context(|| format!("pipeline: load shaders of {}", debug_name))?;
        let shader_stages_info = create_info
            .shader_stages
            .iter()
            .zip(shader_modules)
            .map(|(stage, module)| {
                vk::PipelineShaderStageCreateInfo::default().stage(stage.stage).module(module).name(stage.entry_point)
            })
            .collect_vec();

        // 顶点和 index
        let vertex_input_state_info = vk::PipelineVertexInputStateCreateInfo::default()
            .vertex_binding_descriptions(&create_info.vertex_binding_desc)
            .vertex_attribute_descriptions(&create_info.vertex_attribute_desc);

        let input_assembly_info = vk::PipelineInputAssemblyStateCreateInfo::default()
            .topology(create_info.primitive_topology)
            .primitive_restart_enable(false);

        // viewport 和 scissor 具体值由 dynamic 决定，但是数量由该 create info 决定
        let viewport_info = vk::PipelineViewportStateCreateInfo {
            viewport_count: 1,
            scissor_count: 1,
            ..Default::default()
        };

        let msaa_info =
            vk::PipelineMultisampleStateCreateInfo::default().rasterization_samples(vk::SampleCountFlags::TYPE_1);

        // 混合设置：需要为每个 color attachment 分别指定
        let color_blend_info = vk::PipelineColorBlendStateCreateInfo::default()
            .logic_op_enable(false)
            .attachments(&create_info.color_attach_blend_states);

        let dynamic_state_info =
            vk::PipelineDynamicStateCreateInfo::default().dynamic_states(&create_info.dynamic_states);

        let pipeline_info = vk::GraphicsPipelineCreateInfo::default()
            .stages(&shader_stages_info)
            .vertex_input_state(&vertex_input_state_info)
            .input_assembly_state(&input_assembly_info)
            .viewport_state(&viewport_info)
            .rasterization_state(&create_info.rasterize_state_info)
            .multisample_state(&msaa_info)
            .color_blend_state(&color_blend_info)
            .depth_stencil_state(&create_info.depth_stencil_info)
            .layout(pipeline_layout.handle())
            .dynamic_state(&dynamic_state_info)
            .push_next(&mut attach_info);

        let gfx_device = Gfx::get().gfx_device();
        let pipelines = unsafe {
            gfx_device.create_graphics_pipelines(vk::PipelineCache::null(), std::slice::from_ref(&pipeline_info), None)
        }
        .map_err(|(_, e)| e)
        .with_context(|| format!("pipeline: create graphics pipeline {}", debug_name))?;
        let pipeline = GfxGraphicsPipeline {
            pipeline: pipelines[0],
            pipeline_layout: pipeline_layout.handle(),
        };

        gfx_device.set_debug_name(&pipeline, debug_name);
        Ok(pipeline)
    }

    #[inline]
    pub fn handle(&self) -> vk::Pipeline {
        self.pipeline
    }

    #[inline]
    pub fn layout(&self) -> vk::PipelineLayout {
        self.pipeline_layout
    }

    pub fn destroy(self) {
        unsafe {
            Gfx::get().gfx_device().destroy_pipeline(self.pipeline, None);
        }
    }
}
impl DebugType for GfxGraphicsPipeline {
    fn debug_type_name() -> &'static str {
        "GfxGraphicsPipeline"
    }

    fn vk_handle(&self) -> impl vk::Handle {
        self.pipeline
    }
}

pub struct GfxGraphicsPipelineCreateInfo {
    /// dynamic render 需要的 framebuffer 信息
    color_attach_formats: Vec<vk::Format>,
    /// format = undefined 表示不使用这个 attachment
    depth_attach_format: vk::Format,

    shader_stages: Vec<GfxShaderStageInfo>,

    vertex_binding_desc: Vec<vk::VertexInputBindingDescription>,
    vertex_attribute_desc: Vec<vk::VertexInputAttributeDescription>,

    primitive_topology: vk::PrimitiveTopology,

    rasterize_state_info: vk::PipelineRasterizationStateCreateInfo<'static>,

    color_attach_blend_states: Vec<vk::PipelineColorBlendAttachmentState>,

    depth_stencil_info: vk::PipelineDepthStencilStateCreateInfo<'static>,

    dynamic_states: Vec<vk::DynamicState>,
}
impl Default for GfxGraphicsPipelineCreateInfo {
    fn default() -> Self {
        Self {
            color_attach_formats: vec![],
            depth_attach_format: vk::Format::UNDEFINED,

            shader_stages: vec![],

            vertex_binding_desc: vec![],
            vertex_attribute_desc: vec![],

            primitive_topology: vk::PrimitiveTopology::TRIANGLE_LIST,

            rasterize_state_info: vk::PipelineRasterizationStateCreateInfo::default()
                .depth_clamp_enable(false)
                .rasterizer_discard_enable(false)
                .polygon_mode(vk::PolygonMode::FILL)
                .line_width(1.0)
                .cull_mode(vk::CullModeFlags::BACK)
                // 按照 OpenGL 的传统，将 CCW 视为 front face
                .front_face(vk::FrontFace::COUNTER_CLOCKWISE)
                .depth_bias_enable(false),

            color_attach_blend_states: vec![],

            depth_stencil_info: vk::PipelineDepthStencilStateCreateInfo::default()
                .depth_test_enable(true)
                .depth_write_enable(true)
                .depth_compare_op(vk::CompareOp::LESS)
                .depth_bounds_test_enable(false)
                .stencil_test_enable(false),
            dynamic_states: vec![vk::DynamicState::VIEWPORT, vk::DynamicState::SCISSOR],
        }
    }
}
// builder
impl GfxGraphicsPipelineCreateInfo {
    /// builder
    ///
    /// 每个 color attachment 默认不开启 blend
    #[inline]
    pub fn attach_info(&mut self, color_attach_formats: Vec<vk::Format>, depth_format: Option<vk::Format>) -> &mut Self {
        self.color_attach_blend_states = color_attach_formats.iter().map(|_| Self::opaque_blend_state()).collect();
        self.color_attach_formats = color_attach_formats;
        self.depth_attach_format = depth_format.unwrap_or(vk::Format::UNDEFINED);
        self
    }

    /// builder
    #[inline]
    pub fn vertex_shader_stage(&mut self, path: impl Into<PathBuf>, entry_point: &'static CStr) -> &mut Self {
        self.shader_stages.push(GfxShaderStageInfo {
            stage: vk::ShaderStageFlags::VERTEX,
            entry_point,
            path: path.into(),
        });
        self
    }

    /// builder
    #[inline]
    pub fn fragment_shader_stage(&mut self, path: impl Into<PathBuf>, entry_point: &'static CStr) -> &mut Self {
        self.shader_stages.push(GfxShaderStageInfo {
            stage: vk::ShaderStageFlags::FRAGMENT,
            entry_point,
            path: path.into(),
        });
        self
    }

    /// builder
    #[inline]
    pub fn vertex_binding(&mut self, bindings: Vec<vk::VertexInputBindingDescription>) -> &mut Self {
        self.vertex_binding_desc = bindings;
        self
    }

    /// builder
    #[inline]
    pub fn vertex_attribute(&mut self, attributes: Vec<vk::VertexInputAttributeDescription>) -> &mut Self {
        self.vertex_attribute_desc = attributes;
        self
    }

    #[inline]
    pub fn primitive_topology(&mut self, topology: vk::PrimitiveTopology) -> &mut Self {
        self.primitive_topology = topology;
        self
    }

    /// 为每个 color attachment 指定 blend 操作
    #[inline]
    pub fn color_blend(&mut self, states: Vec<vk::PipelineColorBlendAttachmentState>) -> &mut Self {
        debug_assert_eq!(states.len(), self.color_attach_formats.len());
        self.color_attach_blend_states = states;
        self
    }

    #[inline]
    pub fn cull_mode(&mut self, mode: vk::CullModeFlags, front_face: vk::FrontFace) -> &mut Self {
        self.rasterize_state_info.cull_mode = mode;
        self.rasterize_state_info.front_face = front_face;
        self
    }

    /// shadow map 使用 depth bias 减少 acne
    #[inline]
    pub fn depth_bias(&mut self, constant_factor: f32, slope_factor: f32) -> &mut Self {
        self.rasterize_state_info.depth_bias_enable = vk::TRUE;
        self.rasterize_state_info.depth_bias_constant_factor = constant_factor;
        self.rasterize_state_info.depth_bias_slope_factor = slope_factor;
        self
    }

    #[inline]
    pub fn depth_test(&mut self, depth_test_op: Option<vk::CompareOp>, depth_write: bool) -> &mut Self {
        self.depth_stencil_info.depth_test_enable = depth_test_op.map_or(vk::FALSE, |_| vk::TRUE);
        self.depth_stencil_info.depth_compare_op = depth_test_op.unwrap_or(vk::CompareOp::NEVER);
        self.depth_stencil_info.depth_write_enable = if depth_write { vk::TRUE } else { vk::FALSE };
        self
    }
}
// 常用的 blend state
impl GfxGraphicsPipelineCreateInfo {
    pub fn opaque_blend_state() -> vk::PipelineColorBlendAttachmentState {
        vk::PipelineColorBlendAttachmentState::default()
            .blend_enable(false)
            .color_write_mask(vk::ColorComponentFlags::RGBA)
    }

    /// src + dst，用于逐个光源累加
    pub fn additive_blend_state() -> vk::PipelineColorBlendAttachmentState {
        vk::PipelineColorBlendAttachmentState::default()
            .blend_enable(true)
            .src_color_blend_factor(vk::BlendFactor::ONE)
            .dst_color_blend_factor(vk::BlendFactor::ONE)
            .color_blend_op(vk::BlendOp::ADD)
            .src_alpha_blend_factor(vk::BlendFactor::ONE)
            .dst_alpha_blend_factor(vk::BlendFactor::ONE)
            .alpha_blend_op(vk::BlendOp::ADD)
            .color_write_mask(vk::ColorComponentFlags::RGBA)
    }

    pub fn alpha_blend_state() -> vk::PipelineColorBlendAttachmentState {
        vk::PipelineColorBlendAttachmentState::default()
            .blend_enable(true)
            .src_color_blend_factor(vk::BlendFactor::SRC_ALPHA)
            .dst_color_blend_factor(vk::BlendFactor::ONE_MINUS_SRC_ALPHA)
            .color_blend_op(vk::BlendOp::ADD)
            .src_alpha_blend_factor(vk::BlendFactor::ONE)
            .dst_alpha_blend_factor(vk::BlendFactor::ZERO)
            .alpha_blend_op(vk::BlendOp::ADD)
            .color_write_mask(vk::ColorComponentFlags::RGBA)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_attach_info_sets_default_blend_per_attachment() {
        let mut ci = GfxGraphicsPipelineCreateInfo::default();
        ci.attach_info(vec![vk::Format::R8G8B8A8_UNORM, vk::Format::R16G16B16A16_SFLOAT], Some(vk::Format::D32_SFLOAT));
        assert_eq!(ci.color_attach_blend_states.len(), 2);
        assert_eq!(ci.color_attach_blend_states[0].blend_enable, vk::FALSE);
        assert_eq!(ci.depth_attach_format, vk::Format::D32_SFLOAT);
    }

    #[test]
    fn test_depth_test_disabled() {
        let mut ci = GfxGraphicsPipelineCreateInfo::default();
        ci.depth_test(None, false);
        assert_eq!(ci.depth_stencil_info.depth_test_enable, vk::FALSE);
        assert_eq!(ci.depth_stencil_info.depth_write_enable, vk::FALSE);

        ci.depth_test(Some(vk::CompareOp::EQUAL), false);
        assert_eq!(ci.depth_stencil_info.depth_compare_op, vk::CompareOp::EQUAL);
    }

    #[test]
    fn test_additive_blend() {
        let state = GfxGraphicsPipelineCreateInfo::additive_blend_state();
        assert_eq!(state.blend_enable, vk::TRUE);
        assert_eq!(state.dst_color_blend_factor, vk::BlendFactor::ONE);
    }

    #[test]
    fn test_shader_stages_order() {
        let mut ci = GfxGraphicsPipelineCreateInfo::default();
        ci.vertex_shader_stage("a.vert.spv", c"main").fragment_shader_stage("a.frag.spv", c"main");
        assert_eq!(ci.shader_stages.len(), 2);
        assert_eq!(ci.shader_stages[1].stage, vk::ShaderStageFlags::FRAGMENT);
    }
}
