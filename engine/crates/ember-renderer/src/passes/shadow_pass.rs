use ember_gfx::basic::color::LabelColor;
use ember_gfx::pipelines::rendering_info::{GfxAttachmentLoad, GfxRenderingInfo};
use ember_gfx::resources::image_state::GfxImageState;
use ember_render_interface::gpu_data::GpuPushConstants;
use ember_render_interface::light_manager::LightManager;
use ember_render_interface::mesh_manager::MeshManager;

use crate::passes::PassContext;
use crate::pipeline_context::PassKind;

/// 为本帧每个投射阴影的平行光渲染一张 shadow map
pub struct ShadowPass;
impl ShadowPass {
    /// shadow map 空闲时处于 SHADER_READ，绘制期间切换到 DEPTH_ATTACHMENT，结束后切回
    pub fn draw(ctx: &PassContext, lights: &mut LightManager, meshes: &MeshManager) {
        let _span = tracy_client::span!("ShadowPass::draw");
        let casters = lights.shadow_casters().to_vec();
        if casters.is_empty() {
            return;
        }

        let cmd = ctx.cmd;
        cmd.begin_label("[shadow-pass]", LabelColor::COLOR_SHADOW);
        for caster in casters {
            let Some(shadow_map) = lights.shadow_map_mut(caster.shadow_slot) else {
                log::error!("shadow slot {} has no shadow map", caster.shadow_slot);
                continue;
            };
            let extent = shadow_map.extent();

            // 整张清空，之前的内容不需要保留
            shadow_map.tracked_mut().transition(cmd, GfxImageState::UNDEFINED, GfxImageState::DEPTH_ATTACHMENT);

            let rendering_info =
                GfxRenderingInfo::new(extent).depth(shadow_map.view(), GfxAttachmentLoad::clear_depth(1.0), true);
            ctx.begin(PassKind::Shadow, &rendering_info, extent);
            ctx.pipelines.push_constants(
                cmd,
                &GpuPushConstants {
                    light_index: caster.light_index,
                    ..Default::default()
                },
            );
            meshes.cmd_draw(cmd, ctx.frame_label);
            ctx.end();

            shadow_map.tracked_mut().transition(cmd, GfxImageState::DEPTH_ATTACHMENT, GfxImageState::SHADER_READ);
        }
        cmd.end_label();
    }
}
