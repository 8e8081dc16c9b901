use ember_gfx::basic::color::LabelColor;
use ember_gfx::pipelines::rendering_info::{GfxAttachmentLoad, GfxRenderingInfo};
use ember_gfx::resources::image_state::GfxImageState;
use ember_render_interface::mesh_manager::MeshManager;

use crate::attachments::Attachment;
use crate::passes::PassContext;
use crate::pipeline_context::PassKind;

/// 只写 depth，之后的 G-buffer pass 使用 EQUAL 测试，每个像素只着色一次
pub struct DepthPrepass;
impl DepthPrepass {
    /// depth 结束时保持在 DEPTH_ATTACHMENT，供 G-buffer pass 继续使用
    pub fn draw(ctx: &PassContext, depth: &mut Attachment, meshes: &MeshManager) {
        let _span = tracy_client::span!("DepthPrepass::draw");
        let cmd = ctx.cmd;
        cmd.begin_label("[depth-prepass]", LabelColor::COLOR_PASS);

        depth.tracked_mut().transition(cmd, GfxImageState::UNDEFINED, GfxImageState::DEPTH_ATTACHMENT);

        let rendering_info =
            GfxRenderingInfo::new(ctx.extent).depth(depth.view(), GfxAttachmentLoad::clear_depth(1.0), true);
        ctx.begin(PassKind::DepthPrepass, &rendering_info, ctx.extent);
        meshes.cmd_draw(cmd, ctx.frame_label);
        ctx.end();

        cmd.end_label();
    }
}
