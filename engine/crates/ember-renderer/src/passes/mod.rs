//! deferred 管线中的各个 pass
//!
//! 每个 pass 在录制前声明 attachment 的期望状态和下一个状态，由 [`GfxTrackedImage`] 生成 barrier。
//! 录制顺序：depth pre-pass → shadow → G-buffer → lighting → tone-map → debug line
//!
//! [`GfxTrackedImage`]: ember_gfx::resources::image_state::GfxTrackedImage

pub mod debug_line_pass;
pub mod depth_prepass;
pub mod gbuffer_pass;
pub mod lighting_pass;
pub mod shadow_pass;
pub mod tonemap_pass;

use ash::vk;
use ember_gfx::commands::command_buffer::GfxCommandBuffer;
use ember_gfx::pipelines::rendering_info::GfxRenderingInfo;
use ember_render_interface::frame_counter::FrameLabel;
use ember_render_interface::gpu_data::GpuPushConstants;

use crate::pipeline_context::{PassKind, PipelineContext};

/// 录制一帧时所有 pass 共享的状态
pub struct PassContext<'a> {
    pub cmd: &'a GfxCommandBuffer,
    pub pipelines: &'a PipelineContext,
    pub bindless_set: vk::DescriptorSet,
    pub frame_label: FrameLabel,
    /// attachment 以及 swapchain 的尺寸
    pub extent: vk::Extent2D,
}
impl PassContext<'_> {
    /// begin rendering，绑定 pipeline、descriptor set 以及覆盖 `viewport_extent` 的 viewport
    pub(crate) fn begin(&self, kind: PassKind, rendering_info: &GfxRenderingInfo, viewport_extent: vk::Extent2D) {
        self.cmd.cmd_begin_rendering(rendering_info);
        self.pipelines.bind(self.cmd, kind, self.bindless_set);
        self.cmd.cmd_set_full_viewport(viewport_extent);
        self.pipelines.push_constants(self.cmd, &GpuPushConstants::default());
    }

    #[inline]
    pub(crate) fn end(&self) {
        self.cmd.cmd_end_rendering();
    }
}

/// 全屏三角形，顶点位置在 vertex shader 中由 `gl_VertexIndex` 生成
pub(crate) const FULLSCREEN_VERTEX_COUNT: u32 = 3;
