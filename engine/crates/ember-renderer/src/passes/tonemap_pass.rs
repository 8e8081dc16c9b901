use ash::vk;
use ember_gfx::basic::color::LabelColor;
use ember_gfx::pipelines::rendering_info::{GfxAttachmentLoad, GfxRenderingInfo};
use ember_render_interface::gpu_data::GpuPushConstants;

use crate::passes::{FULLSCREEN_VERTEX_COUNT, PassContext};
use crate::pipeline_context::PassKind;

/// tone-map 时乘上的曝光，以 `f32::to_bits` 的形式放在 push constant 的 debug_flags 中
pub fn exposure_push_constants(exposure: f32) -> GpuPushConstants {
    GpuPushConstants {
        debug_flags: exposure.max(0.0).to_bits(),
        ..Default::default()
    }
}

/// 将 HDR 的 lighting color 映射到 swapchain image
pub struct TonemapPass;
impl TonemapPass {
    /// swapchain image 需要已经处于 COLOR_ATTACHMENT
    pub fn draw(ctx: &PassContext, swapchain_view: vk::ImageView, exposure: f32) {
        let _span = tracy_client::span!("TonemapPass::draw");
        let cmd = ctx.cmd;
        cmd.begin_label("[tonemap-pass]", LabelColor::COLOR_PASS);

        let rendering_info = GfxRenderingInfo::new(ctx.extent).color(swapchain_view, GfxAttachmentLoad::DontCare);
        ctx.begin(PassKind::Tonemap, &rendering_info, ctx.extent);
        ctx.pipelines.push_constants(cmd, &exposure_push_constants(exposure));
        cmd.cmd_draw(FULLSCREEN_VERTEX_COUNT, 1, 0, 0);
        ctx.end();

        cmd.end_label();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exposure_bits() {
        let constants = exposure_push_constants(1.5);
        assert_eq!(f32::from_bits(constants.debug_flags), 1.5);
        assert_eq!(constants.light_index, 0);
        assert_eq!(f32::from_bits(exposure_push_constants(-2.0).debug_flags), 0.0);
    }
}
