use ember_gfx::basic::color::LabelColor;
use ember_gfx::pipelines::rendering_info::{GfxAttachmentLoad, GfxRenderingInfo};
use ember_gfx::resources::image_state::GfxImageState;
use ember_render_interface::gpu_data::GpuPushConstants;

use crate::attachments::Attachment;
use crate::passes::{FULLSCREEN_VERTEX_COUNT, PassContext};
use crate::pipeline_context::PassKind;

/// 每个光源一次全屏绘制，结果以 additive blend 累加到 lighting color
pub struct LightingPass;
impl LightingPass {
    /// lighting color 先清空为 `clear_color`，结束时处于 SHADER_READ
    pub fn draw(ctx: &PassContext, lighting: &mut Attachment, light_count: u32, clear_color: [f32; 4]) {
        let _span = tracy_client::span!("LightingPass::draw");
        let cmd = ctx.cmd;
        cmd.begin_label("[lighting-pass]", LabelColor::COLOR_PASS);

        lighting.tracked_mut().transition(cmd, GfxImageState::UNDEFINED, GfxImageState::COLOR_ATTACHMENT);

        let rendering_info =
            GfxRenderingInfo::new(ctx.extent).color(lighting.view(), GfxAttachmentLoad::clear_color(clear_color));
        ctx.begin(PassKind::Lighting, &rendering_info, ctx.extent);
        for light_index in 0..light_count {
            ctx.pipelines.push_constants(
                cmd,
                &GpuPushConstants {
                    light_index,
                    ..Default::default()
                },
            );
            cmd.cmd_draw(FULLSCREEN_VERTEX_COUNT, 1, 0, 0);
        }
        ctx.end();

        lighting.tracked_mut().transition(cmd, GfxImageState::COLOR_ATTACHMENT, GfxImageState::SHADER_READ);

        cmd.end_label();
    }
}
