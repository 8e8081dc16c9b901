use ash::vk;
use ember_gfx::commands::command_buffer::GfxCommandBuffer;
use ember_render_interface::frame_counter::FrameLabel;

/// 在 tone-map 以及 debug line 之后绘制到 swapchain image 上，例如 UI
///
/// 调用时 swapchain image 处于 COLOR_ATTACHMENT，实现者需要自己 begin / end rendering，
/// 并且不能改变 image 的 layout
pub trait OverlayHook {
    fn record(&mut self, cmd: &GfxCommandBuffer, target: vk::ImageView, extent: vk::Extent2D, frame_label: FrameLabel);

    /// 在 renderer 销毁时调用，此时 GPU 已经空闲
    fn destroy(self: Box<Self>) {}
}
