use ember_gfx::basic::color::LabelColor;
use ember_gfx::pipelines::rendering_info::{GfxAttachmentLoad, GfxRenderingInfo};
use ember_gfx::resources::image_state::GfxImageState;
use ember_render_interface::mesh_manager::MeshManager;

use crate::attachments::FrameAttachments;
use crate::passes::PassContext;
use crate::pipeline_context::PassKind;

/// 输出 albedo、normal、metal-rough；depth 只读
pub struct GBufferPass;
impl GBufferPass {
    /// 结束时三张 G-buffer 以及 depth 都处于 SHADER_READ，供 lighting pass 采样
    pub fn draw(ctx: &PassContext, attachments: &mut FrameAttachments, meshes: &MeshManager) {
        let _span = tracy_client::span!("GBufferPass::draw");
        let cmd = ctx.cmd;
        cmd.begin_label("[gbuffer-pass]", LabelColor::COLOR_PASS);

        for attachment in attachments.gbuffer_mut() {
            attachment.tracked_mut().transition(cmd, GfxImageState::UNDEFINED, GfxImageState::COLOR_ATTACHMENT);
        }
        // 等待 pre-pass 的 depth 写入完成
        attachments.depth.tracked_mut().transition(
            cmd,
            GfxImageState::DEPTH_ATTACHMENT,
            GfxImageState::DEPTH_ATTACHMENT,
        );

        let rendering_info = GfxRenderingInfo::new(ctx.extent)
            .color(attachments.albedo.view(), GfxAttachmentLoad::clear_color([0.0; 4]))
            .color(attachments.normal.view(), GfxAttachmentLoad::clear_color([0.0; 4]))
            .color(attachments.metal_rough.view(), GfxAttachmentLoad::clear_color([0.0; 4]))
            .depth(attachments.depth.view(), GfxAttachmentLoad::Load, true);
        ctx.begin(PassKind::GBuffer, &rendering_info, ctx.extent);
        meshes.cmd_draw(cmd, ctx.frame_label);
        ctx.end();

        for attachment in attachments.gbuffer_mut() {
            attachment.tracked_mut().transition(cmd, GfxImageState::COLOR_ATTACHMENT, GfxImageState::SHADER_READ);
        }
        attachments.depth.tracked_mut().transition(cmd, GfxImageState::DEPTH_ATTACHMENT, GfxImageState::SHADER_READ);

        cmd.end_label();
    }
}
