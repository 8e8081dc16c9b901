use ash::vk;
use ember_crate_tools::resource::EmberPath;
use ember_gfx::commands::command_buffer::GfxCommandBuffer;
use ember_gfx::pipelines::graphics_pipeline::{GfxGraphicsPipeline, GfxGraphicsPipelineCreateInfo, GfxPipelineLayout};
use ember_render_interface::gpu_data::{GpuPushConstants, VertexLayout};
use ember_render_interface::light_manager::SHADOW_MAP_FORMAT;

use crate::attachments::AttachmentFormats;

/// 每个 pass 对应一个 pipeline，shader 位于 `engine/shader/.build/<pass>.<stage>.spv`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PassKind {
    DepthPrepass,
    Shadow,
    GBuffer,
    Lighting,
    Tonemap,
    DebugLine,
}
impl PassKind {
    pub const ALL: [PassKind; 6] = [
        PassKind::DepthPrepass,
        PassKind::Shadow,
        PassKind::GBuffer,
        PassKind::Lighting,
        PassKind::Tonemap,
        PassKind::DebugLine,
    ];

    pub fn shader_name(self) -> &'static str {
        match self {
            PassKind::DepthPrepass => "depth_prepass",
            PassKind::Shadow => "shadow",
            PassKind::GBuffer => "gbuffer",
            PassKind::Lighting => "lighting",
            PassKind::Tonemap => "tonemap",
            PassKind::DebugLine => "debug_line",
        }
    }

    /// 输出到 swapchain image 的 pass，swapchain 格式变化时需要重建
    pub fn targets_swapchain(self) -> bool {
        matches!(self, PassKind::Tonemap | PassKind::DebugLine)
    }

    fn vertex_shader(self) -> String {
        EmberPath::shader_build_path_str(&format!("{}.vert", self.shader_name()))
    }

    fn fragment_shader(self) -> String {
        EmberPath::shader_build_path_str(&format!("{}.frag", self.shader_name()))
    }

    fn create_info(self, swapchain_format: vk::Format) -> GfxGraphicsPipelineCreateInfo {
        let mut ci = GfxGraphicsPipelineCreateInfo::default();
        ci.vertex_shader_stage(self.vertex_shader(), c"main");
        ci.fragment_shader_stage(self.fragment_shader(), c"main");

        match self {
            PassKind::DepthPrepass => {
                ci.attach_info(vec![], Some(AttachmentFormats::DEPTH));
                ci.vertex_binding(VertexLayout::mesh_bindings());
                ci.vertex_attribute(VertexLayout::mesh_attributes());
                ci.depth_test(Some(vk::CompareOp::LESS), true);
            }
            PassKind::Shadow => {
                ci.attach_info(vec![], Some(SHADOW_MAP_FORMAT));
                ci.vertex_binding(VertexLayout::mesh_bindings());
                ci.vertex_attribute(VertexLayout::mesh_attributes());
                ci.depth_test(Some(vk::CompareOp::LESS), true);
                ci.depth_bias(1.25, 1.75);
            }
            PassKind::GBuffer => {
                ci.attach_info(AttachmentFormats::GBUFFER.to_vec(), Some(AttachmentFormats::DEPTH));
                ci.vertex_binding(VertexLayout::mesh_bindings());
                ci.vertex_attribute(VertexLayout::mesh_attributes());
                // depth 已经由 pre-pass 写好，只绘制可见的片元
                ci.depth_test(Some(vk::CompareOp::EQUAL), false);
            }
            PassKind::Lighting => {
                ci.attach_info(vec![AttachmentFormats::LIGHTING], None);
                ci.color_blend(vec![GfxGraphicsPipelineCreateInfo::additive_blend_state()]);
                ci.cull_mode(vk::CullModeFlags::NONE, vk::FrontFace::COUNTER_CLOCKWISE);
                ci.depth_test(None, false);
            }
            PassKind::Tonemap => {
                ci.attach_info(vec![swapchain_format], None);
                ci.cull_mode(vk::CullModeFlags::NONE, vk::FrontFace::COUNTER_CLOCKWISE);
                ci.depth_test(None, false);
            }
            PassKind::DebugLine => {
                ci.attach_info(vec![swapchain_format], None);
                ci.color_blend(vec![GfxGraphicsPipelineCreateInfo::alpha_blend_state()]);
                ci.vertex_binding(VertexLayout::debug_line_bindings());
                ci.vertex_attribute(VertexLayout::debug_line_attributes());
                ci.primitive_topology(vk::PrimitiveTopology::LINE_LIST);
                ci.cull_mode(vk::CullModeFlags::NONE, vk::FrontFace::COUNTER_CLOCKWISE);
                ci.depth_test(None, false);
            }
        }
        ci
    }
}

/// 所有 pass 的 pipeline 共享同一个 layout：bindless set 0 + push constants
pub struct PipelineContext {
    layout: GfxPipelineLayout,
    /// 下标为 `PassKind as usize`
    pipelines: Vec<GfxGraphicsPipeline>,
    swapchain_format: vk::Format,
}
// new & init
impl PipelineContext {
    pub fn new(bindless_layout: vk::DescriptorSetLayout, swapchain_format: vk::Format) -> anyhow::Result<Self> {
        let _span = tracy_client::span!("PipelineContext::new");
        let layout = GfxPipelineLayout::new(&[bindless_layout], &[GpuPushConstants::range()], "shared")?;
        let mut context = Self {
            layout,
            pipelines: Vec::with_capacity(PassKind::ALL.len()),
            swapchain_format,
        };
        for kind in PassKind::ALL {
            match context.create_pipeline(kind) {
                Ok(pipeline) => context.pipelines.push(pipeline),
                Err(e) => {
                    context.destroy();
                    return Err(e);
                }
            }
        }
        Ok(context)
    }

    fn create_pipeline(&self, kind: PassKind) -> anyhow::Result<GfxGraphicsPipeline> {
        let ci = kind.create_info(self.swapchain_format);
        GfxGraphicsPipeline::new(&ci, &self.layout, kind.shader_name())
    }
}
// getters
impl PipelineContext {
    #[inline]
    pub fn layout(&self) -> vk::PipelineLayout {
        self.layout.handle()
    }

    #[inline]
    pub fn pipeline(&self, kind: PassKind) -> vk::Pipeline {
        self.pipelines[kind as usize].handle()
    }
}
// tools
impl PipelineContext {
    /// 绑定 pass 的 pipeline 以及当前 frame 的 bindless set
    pub fn bind(&self, cmd: &GfxCommandBuffer, kind: PassKind, bindless_set: vk::DescriptorSet) {
        cmd.cmd_bind_pipeline(vk::PipelineBindPoint::GRAPHICS, self.pipeline(kind));
        cmd.bind_descriptor_sets(vk::PipelineBindPoint::GRAPHICS, self.layout(), 0, &[bindless_set], None);
    }

    pub fn push_constants(&self, cmd: &GfxCommandBuffer, constants: &GpuPushConstants) {
        cmd.cmd_push_constants(
            self.layout(),
            GpuPushConstants::range().stage_flags,
            0,
            bytemuck::bytes_of(constants),
        );
    }
}
// update
impl PipelineContext {
    /// swapchain 重建之后格式可能改变，只重建输出到 swapchain 的 pipeline
    ///
    /// 调用者需要保证 GPU 不再使用旧的 pipeline
    pub fn on_swapchain_format(&mut self, swapchain_format: vk::Format) -> anyhow::Result<()> {
        if swapchain_format == self.swapchain_format {
            return Ok(());
        }
        log::info!("swapchain format changed {:?} -> {:?}", self.swapchain_format, swapchain_format);
        self.swapchain_format = swapchain_format;
        for kind in PassKind::ALL.into_iter().filter(|kind| kind.targets_swapchain()) {
            let pipeline = self.create_pipeline(kind)?;
            let old = std::mem::replace(&mut self.pipelines[kind as usize], pipeline);
            old.destroy();
        }
        Ok(())
    }
}
// destroy
impl PipelineContext {
    pub fn destroy(self) {
        for pipeline in self.pipelines {
            pipeline.destroy();
        }
        self.layout.destroy();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pass_order_matches_index() {
        for (idx, kind) in PassKind::ALL.iter().enumerate() {
            assert_eq!(*kind as usize, idx);
        }
    }

    #[test]
    fn test_shader_paths() {
        let path = PassKind::GBuffer.vertex_shader();
        assert!(path.ends_with("gbuffer.vert.spv"), "{path}");
        assert!(path.replace('\\', "/").contains("shader/.build/"), "{path}");
        assert!(PassKind::Lighting.fragment_shader().ends_with("lighting.frag.spv"));
    }

    #[test]
    fn test_only_final_passes_target_swapchain() {
        let swapchain_passes = PassKind::ALL.into_iter().filter(|k| k.targets_swapchain()).collect::<Vec<_>>();
        assert_eq!(swapchain_passes, vec![PassKind::Tonemap, PassKind::DebugLine]);
    }
}
