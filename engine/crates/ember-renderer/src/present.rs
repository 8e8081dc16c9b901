use ash::vk;
use ember_gfx::commands::command_buffer::GfxCommandBuffer;
use ember_gfx::commands::semaphore::GfxSemaphore;
use ember_gfx::gfx::Gfx;
use ember_gfx::resources::image::GfxImage;
use ember_gfx::resources::image_state::{GfxImageState, GfxTrackedImage};
use ember_gfx::resources::image_view::{GfxImageView, GfxImageViewDesc};
use ember_gfx::swapchain::render_swapchain::{GfxAcquireResult, GfxRenderSwapchain, GfxSwapchainDesc};
use ember_gfx::swapchain::surface::GfxSurface;
use ember_render_interface::frame_counter::{FrameCounter, FrameLabel};
use itertools::Itertools;
use raw_window_handle::{RawDisplayHandle, RawWindowHandle};

/// 期望的 swapchain 格式，tone-map 输出线性颜色，由硬件做 sRGB 编码
pub const PREFERRED_SURFACE_FORMAT: vk::SurfaceFormatKHR = vk::SurfaceFormatKHR {
    format: vk::Format::B8G8R8A8_SRGB,
    color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
};

/// 窗口尺寸为 0 时无法创建 swapchain，整帧跳过
#[inline]
pub fn is_minimized(extent: vk::Extent2D) -> bool {
    extent.width == 0 || extent.height == 0
}

/// 记录 swapchain 需要重建的原因，在帧的边界统一处理
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RecreateFlags {
    resized: bool,
    stale: bool,
}
impl RecreateFlags {
    /// 窗口尺寸变化
    #[inline]
    pub fn mark_resized(&mut self) {
        self.resized = true;
    }

    /// acquire / present 报告 OUT_OF_DATE 或者 SUBOPTIMAL
    #[inline]
    pub fn mark_stale(&mut self) {
        self.stale = true;
    }

    #[inline]
    pub fn pending(&self) -> bool {
        self.resized || self.stale
    }

    /// 返回是否需要重建，并清空标记
    #[inline]
    pub fn take(&mut self) -> bool {
        std::mem::take(self).pending()
    }
}

/// 本帧拿到的 swapchain image
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AcquiredImage {
    pub image_index: usize,
    pub suboptimal: bool,
}

struct SwapchainTargets {
    swapchain: GfxRenderSwapchain,
    images: Vec<GfxImage>,
    views: Vec<GfxImageView>,
    tracked: Vec<GfxTrackedImage>,
    /// 数量和 swapchain image 相同
    render_complete_semaphores: Vec<GfxSemaphore>,
}
impl SwapchainTargets {
    fn new(surface: &GfxSurface, desc: &GfxSwapchainDesc) -> anyhow::Result<Self> {
        let swapchain = GfxRenderSwapchain::new(surface, desc)?;
        let extent = swapchain.extent();
        let format = swapchain.color_format();

        let images = swapchain
            .present_images()
            .iter()
            .enumerate()
            .map(|(idx, vk_image)| GfxImage::from_external(*vk_image, extent, format, &format!("swapchain-image-{idx}")))
            .collect_vec();
        let tracked = images
            .iter()
            .map(|image| GfxTrackedImage::new(image.handle(), vk::ImageAspectFlags::COLOR, GfxImageState::UNDEFINED))
            .collect_vec();

        let mut targets = Self {
            swapchain,
            images,
            views: Vec::new(),
            tracked,
            render_complete_semaphores: Vec::new(),
        };
        // 中途失败时已经创建的部分也需要释放
        let init = (|| {
            for (idx, image) in targets.images.iter().enumerate() {
                let view = GfxImageView::new(
                    image.handle(),
                    GfxImageViewDesc::new_2d(format, vk::ImageAspectFlags::COLOR),
                    format!("swapchain-{idx}"),
                )?;
                targets.views.push(view);
                targets.render_complete_semaphores.push(GfxSemaphore::new(&format!("render-complete-{idx}"))?);
            }
            anyhow::Ok(())
        })();
        if let Err(e) = init {
            targets.destroy();
            return Err(e);
        }
        Ok(targets)
    }

    fn destroy(self) {
        for semaphore in self.render_complete_semaphores {
            semaphore.destroy();
        }
        for view in self.views {
            view.destroy();
        }
        for image in self.images {
            image.destroy();
        }
        self.swapchain.destroy();
    }
}

/// 窗口的 surface、swapchain 以及 acquire / present 所需的同步对象
///
/// surface 在整个生命周期内不变，swapchain 在尺寸变化或者失效时重建
pub struct RenderPresent {
    surface: GfxSurface,
    targets: Option<SwapchainTargets>,
    desc: GfxSwapchainDesc,

    /// 数量和 fif num 相同
    acquire_semaphores: [GfxSemaphore; FrameCounter::fif_count()],
}
// new & init
impl RenderPresent {
    pub fn new(
        raw_display_handle: RawDisplayHandle,
        raw_window_handle: RawWindowHandle,
        present_mode: vk::PresentModeKHR,
        window_physical_extent: vk::Extent2D,
    ) -> anyhow::Result<Self> {
        let _span = tracy_client::span!("RenderPresent::new");
        let surface = GfxSurface::new(raw_display_handle, raw_window_handle)?;
        let desc = GfxSwapchainDesc {
            present_mode,
            surface_format: PREFERRED_SURFACE_FORMAT,
            window_physical_extent,
        };

        let mut acquire_semaphores = Vec::with_capacity(FrameCounter::fif_count());
        for frame_label in FrameCounter::frame_labels() {
            match GfxSemaphore::new(&format!("image-acquired-{frame_label}")) {
                Ok(semaphore) => acquire_semaphores.push(semaphore),
                Err(e) => {
                    acquire_semaphores.into_iter().for_each(GfxSemaphore::destroy);
                    surface.destroy();
                    return Err(e);
                }
            }
        }
        let acquire_semaphores: [GfxSemaphore; FrameCounter::fif_count()] = acquire_semaphores
            .try_into()
            .map_err(|_| anyhow::anyhow!("present: acquire semaphore count mismatch"))?;

        let mut present = Self {
            surface,
            targets: None,
            desc,
            acquire_semaphores,
        };
        if !is_minimized(window_physical_extent) {
            match SwapchainTargets::new(&present.surface, &present.desc) {
                Ok(targets) => present.targets = Some(targets),
                Err(e) => {
                    present.destroy();
                    return Err(e);
                }
            }
        }
        Ok(present)
    }
}
// getters
impl RenderPresent {
    /// swapchain 尚未创建（窗口最小化）时为 0
    #[inline]
    pub fn extent(&self) -> vk::Extent2D {
        self.targets.as_ref().map_or(vk::Extent2D::default(), |t| t.swapchain.extent())
    }

    #[inline]
    pub fn color_format(&self) -> vk::Format {
        self.targets.as_ref().map_or(PREFERRED_SURFACE_FORMAT.format, |t| t.swapchain.color_format())
    }

    #[inline]
    pub fn has_swapchain(&self) -> bool {
        self.targets.is_some()
    }

    #[inline]
    pub fn image_count(&self) -> usize {
        self.targets.as_ref().map_or(0, |t| t.swapchain.image_count())
    }

    pub fn image_view(&self, image_index: usize) -> Option<vk::ImageView> {
        self.targets.as_ref().and_then(|t| t.views.get(image_index)).map(|v| v.handle())
    }

    #[inline]
    pub fn acquire_semaphore(&self, frame_label: FrameLabel) -> &GfxSemaphore {
        &self.acquire_semaphores[*frame_label]
    }

    pub fn render_complete_semaphore(&self, image_index: usize) -> Option<&GfxSemaphore> {
        self.targets.as_ref().and_then(|t| t.render_complete_semaphores.get(image_index))
    }
}
// update
impl RenderPresent {
    /// 销毁旧的 swapchain 并按照新的窗口尺寸重建；尺寸为 0 时只销毁
    pub fn recreate(&mut self, window_physical_extent: vk::Extent2D) -> anyhow::Result<()> {
        let _span = tracy_client::span!("RenderPresent::recreate");
        Gfx::get().wait_idle();

        if let Some(targets) = self.targets.take() {
            targets.destroy();
        }
        self.desc.window_physical_extent = window_physical_extent;
        if is_minimized(window_physical_extent) {
            log::info!("window minimized, swapchain released");
            return Ok(());
        }
        self.targets = Some(SwapchainTargets::new(&self.surface, &self.desc)?);
        log::info!("swapchain recreated: {}x{}", self.extent().width, self.extent().height);
        Ok(())
    }

    /// OUT_OF_DATE 时返回 None，本帧需要放弃
    pub fn acquire_image(&mut self, frame_label: FrameLabel) -> anyhow::Result<Option<AcquiredImage>> {
        let _span = tracy_client::span!("RenderPresent::acquire_image");
        let Some(targets) = self.targets.as_mut() else {
            return Ok(None);
        };
        let result =
            targets.swapchain.acquire_next_image(Some(&self.acquire_semaphores[*frame_label]), None, u64::MAX)?;
        Ok(match result {
            GfxAcquireResult::Acquired {
                image_index,
                suboptimal,
            } => Some(AcquiredImage {
                image_index,
                suboptimal,
            }),
            GfxAcquireResult::OutOfDate => None,
        })
    }

    /// 将 swapchain image 转换到 color attachment，之前的内容被丢弃
    pub fn begin_image(&mut self, cmd: &GfxCommandBuffer, image_index: usize) {
        if let Some(tracked) = self.targets.as_mut().and_then(|t| t.tracked.get_mut(image_index)) {
            tracked.transition(cmd, GfxImageState::UNDEFINED, GfxImageState::COLOR_ATTACHMENT);
        }
    }

    /// present 之前的最后一个 barrier
    ///
    /// dst stage 需要和 submit 时 signal semaphore 的 stage 匹配，present 等待 semaphore 时 layout 转换才算完成
    pub fn end_image(&mut self, cmd: &GfxCommandBuffer, image_index: usize) {
        if let Some(tracked) = self.targets.as_mut().and_then(|t| t.tracked.get_mut(image_index)) {
            tracked.transition(
                cmd,
                GfxImageState::COLOR_ATTACHMENT,
                GfxImageState::new(
                    vk::PipelineStageFlags2::COLOR_ATTACHMENT_OUTPUT,
                    vk::AccessFlags2::NONE,
                    vk::ImageLayout::PRESENT_SRC_KHR,
                ),
            );
        }
    }

    /// 返回是否需要重建 swapchain
    pub fn present_image(&self, image_index: usize) -> anyhow::Result<bool> {
        let _span = tracy_client::span!("RenderPresent::present_image");
        let Some(targets) = self.targets.as_ref() else {
            return Ok(true);
        };
        debug_assert_eq!(targets.swapchain.current_image_index(), image_index);
        targets.swapchain.present_image(
            Gfx::get().gfx_queue(),
            std::slice::from_ref(&targets.render_complete_semaphores[image_index]),
        )
    }
}
// destroy
impl RenderPresent {
    pub fn destroy(mut self) {
        if let Some(targets) = self.targets.take() {
            targets.destroy();
        }
        for semaphore in self.acquire_semaphores {
            semaphore.destroy();
        }
        self.surface.destroy();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_minimized_extent() {
        assert!(is_minimized(vk::Extent2D { width: 0, height: 720 }));
        assert!(is_minimized(vk::Extent2D { width: 1280, height: 0 }));
        assert!(!is_minimized(vk::Extent2D { width: 1, height: 1 }));
    }

    #[test]
    fn test_recreate_flags_take_clears() {
        let mut flags = RecreateFlags::default();
        assert!(!flags.take());

        flags.mark_resized();
        assert!(flags.pending());
        assert!(flags.take());
        assert!(!flags.pending());

        flags.mark_stale();
        flags.mark_resized();
        assert!(flags.take());
        assert!(!flags.take());
    }
}
