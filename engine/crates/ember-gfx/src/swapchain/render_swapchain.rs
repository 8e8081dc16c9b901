use anyhow::Context;
use ash::vk;
use ash::vk::Handle;
use itertools::Itertools;

use crate::commands::command_queue::GfxCommandQueue;
use crate::commands::fence::GfxFence;
use crate::commands::semaphore::GfxSemaphore;
use crate::gfx::Gfx;
use crate::swapchain::surface::GfxSurface;

/// acquire 的结果
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GfxAcquireResult {
    /// 成功拿到 image；suboptimal 时仍然可以绘制，但是 present 之后需要重建
    Acquired { image_index: usize, suboptimal: bool },
    /// swapchain 已经失效，本帧需要放弃
    OutOfDate,
}

/// 创建 swapchain 时期望的参数，实际值会根据 surface 支持情况调整
#[derive(Clone, Copy, Debug)]
pub struct GfxSwapchainDesc {
    pub present_mode: vk::PresentModeKHR,
    pub surface_format: vk::SurfaceFormatKHR,
    pub window_physical_extent: vk::Extent2D,
}

pub struct GfxRenderSwapchain {
    swapchain_handle: vk::SwapchainKHR,

    swapchain_images: Vec<vk::Image>,
    swapchain_image_index: usize,

    surface_format: vk::SurfaceFormatKHR,
    present_mode: vk::PresentModeKHR,
    swapchain_extent: vk::Extent2D,
}

// new & init
impl GfxRenderSwapchain {
    pub fn new(surface: &GfxSurface, desc: &GfxSwapchainDesc) -> anyhow::Result<Self> {
        let surface_capabilities = surface.get_capabilities()?;

        let extent = Self::calculate_swapchain_extent(&surface_capabilities, desc.window_physical_extent);
        log::info!(
            "create swapchain:
            surface current extent: {}x{}, min extent: {}x{}, max extent: {}x{}
            window physical extent: {}x{}
            final swapchain extent: {}x{}",
            surface_capabilities.current_extent.width,
            surface_capabilities.current_extent.height,
            surface_capabilities.min_image_extent.width,
            surface_capabilities.min_image_extent.height,
            surface_capabilities.max_image_extent.width,
            surface_capabilities.max_image_extent.height,
            desc.window_physical_extent.width,
            desc.window_physical_extent.height,
            extent.width,
            extent.height
        );

        let surface_format = Self::choose_surface_format(&surface.get_formats()?, desc.surface_format)
            .context("swapchain: surface reports no format")?;
        let present_mode = Self::choose_present_mode(&surface.get_present_modes()?, desc.present_mode);
        if present_mode != desc.present_mode {
            log::warn!("present mode {:?} not supported, fallback to {:?}", desc.present_mode, present_mode);
        }

        let image_count = Self::calculate_image_count(&surface_capabilities);
        let swapchain_handle =
            Self::create_swapchain(surface, &surface_capabilities, surface_format, extent, present_mode, image_count)?;
        let images = unsafe { Gfx::get().gfx_device().swapchain.get_swapchain_images(swapchain_handle) }
            .context("swapchain: get swapchain images")?;

        Ok(Self {
            swapchain_handle,
            swapchain_images: images,
            swapchain_image_index: 0,
            surface_format,
            present_mode,
            swapchain_extent: extent,
        })
    }

    fn create_swapchain(
        surface: &GfxSurface,
        surface_capabilities: &vk::SurfaceCapabilitiesKHR,
        surface_format: vk::SurfaceFormatKHR,
        extent: vk::Extent2D,
        present_mode: vk::PresentModeKHR,
        image_count: u32,
    ) -> anyhow::Result<vk::SwapchainKHR> {
        let create_info = vk::SwapchainCreateInfoKHR::default()
            .surface(surface.handle())
            .min_image_count(image_count)
            .image_format(surface_format.format)
            .image_color_space(surface_format.color_space)
            .image_extent(extent)
            .image_array_layers(1)
            // TRANSFER_DST 用于 Nsight 分析
            .image_usage(vk::ImageUsageFlags::COLOR_ATTACHMENT | vk::ImageUsageFlags::TRANSFER_DST)
            .pre_transform(surface_capabilities.current_transform)
            .composite_alpha(vk::CompositeAlphaFlagsKHR::OPAQUE)
            .present_mode(present_mode)
            .image_sharing_mode(vk::SharingMode::EXCLUSIVE)
            .clipped(true);

        let gfx_device = Gfx::get().gfx_device();
        let swapchain_handle = unsafe { gfx_device.swapchain.create_swapchain(&create_info, None) }
            .context("swapchain: create swapchain")?;
        gfx_device.set_object_debug_name(swapchain_handle, "main");

        Ok(swapchain_handle)
    }
}

// getters
impl GfxRenderSwapchain {
    #[inline]
    pub fn present_images(&self) -> &[vk::Image] {
        &self.swapchain_images
    }

    #[inline]
    pub fn image_count(&self) -> usize {
        self.swapchain_images.len()
    }

    #[inline]
    pub fn extent(&self) -> vk::Extent2D {
        self.swapchain_extent
    }

    #[inline]
    pub fn color_format(&self) -> vk::Format {
        self.surface_format.format
    }

    #[inline]
    pub fn present_mode(&self) -> vk::PresentModeKHR {
        self.present_mode
    }

    #[inline]
    pub fn current_image_index(&self) -> usize {
        self.swapchain_image_index
    }
}

// tools
impl GfxRenderSwapchain {
    /// 确定 window 的 extent 尺寸
    ///
    /// 如果 surface_capabilities.current_extent 包含特殊值 0xFFFFFFFF，则表示可以自己设置交换链的 extent
    pub fn calculate_swapchain_extent(
        surface_capabilities: &vk::SurfaceCapabilitiesKHR,
        window_physical_extent: vk::Extent2D,
    ) -> vk::Extent2D {
        let surface_extent = surface_capabilities.current_extent;
        if surface_extent.width == u32::MAX || surface_extent.height == u32::MAX {
            let width = window_physical_extent
                .width
                .clamp(surface_capabilities.min_image_extent.width, surface_capabilities.max_image_extent.width);
            let height = window_physical_extent
                .height
                .clamp(surface_capabilities.min_image_extent.height, surface_capabilities.max_image_extent.height);
            vk::Extent2D { width, height }
        } else {
            surface_extent
        }
    }

    /// min + 1，max_image_count == 0 表示不限制 image 数量
    pub fn calculate_image_count(surface_capabilities: &vk::SurfaceCapabilitiesKHR) -> u32 {
        if surface_capabilities.max_image_count == 0 {
            surface_capabilities.min_image_count + 1
        } else {
            u32::min(surface_capabilities.max_image_count, surface_capabilities.min_image_count + 1)
        }
    }

    /// 优先使用期望的 format，否则使用 surface 报告的第一个
    pub fn choose_surface_format(
        available: &[vk::SurfaceFormatKHR],
        preferred: vk::SurfaceFormatKHR,
    ) -> Option<vk::SurfaceFormatKHR> {
        available
            .iter()
            .find(|f| f.format == preferred.format && f.color_space == preferred.color_space)
            .or_else(|| available.first())
            .copied()
    }

    /// FIFO 是唯一保证支持的 present mode
    pub fn choose_present_mode(available: &[vk::PresentModeKHR], preferred: vk::PresentModeKHR) -> vk::PresentModeKHR {
        if available.contains(&preferred) { preferred } else { vk::PresentModeKHR::FIFO }
    }
}

// update
impl GfxRenderSwapchain {
    /// timeout: nano seconds
    pub fn acquire_next_image(
        &mut self,
        semaphore: Option<&GfxSemaphore>,
        fence: Option<&GfxFence>,
        timeout: u64,
    ) -> anyhow::Result<GfxAcquireResult> {
        let result = unsafe {
            Gfx::get().gfx_device().swapchain.acquire_next_image(
                self.swapchain_handle,
                timeout,
                semaphore.map_or(vk::Semaphore::null(), |s| s.handle()),
                fence.map_or(vk::Fence::null(), |f| f.handle()),
            )
        };

        match result {
            Ok((image_index, suboptimal)) => {
                if suboptimal {
                    log::warn!("swapchain acquire image index {} is not optimal", image_index);
                }
                self.swapchain_image_index = image_index as usize;
                Ok(GfxAcquireResult::Acquired {
                    image_index: image_index as usize,
                    suboptimal,
                })
            }
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => {
                log::warn!("swapchain is out of date when acquire next image");
                Ok(GfxAcquireResult::OutOfDate)
            }
            Err(e) => Err(e).context("swapchain: acquire next image"),
        }
    }

    /// return: need recreate
    pub fn present_image(&self, queue: &GfxCommandQueue, wait_semaphores: &[GfxSemaphore]) -> anyhow::Result<bool> {
        let wait_semaphores = wait_semaphores.iter().map(|s| s.handle()).collect_vec();
        let image_indices = [self.swapchain_image_index as u32];
        let present_info = vk::PresentInfoKHR::default()
            .wait_semaphores(&wait_semaphores)
            .image_indices(&image_indices)
            .swapchains(std::slice::from_ref(&self.swapchain_handle));

        let result = unsafe { Gfx::get().gfx_device().swapchain.queue_present(queue.handle(), &present_info) };
        match result {
            Ok(suboptimal) => {
                if suboptimal {
                    log::warn!("swapchain present image index {} is not optimal", self.swapchain_image_index);
                }
                Ok(suboptimal)
            }
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => {
                log::warn!("swapchain is out of date when present image");
                Ok(true)
            }
            Err(e) => Err(e).context("swapchain: present image"),
        }
    }
}

// destroy
impl GfxRenderSwapchain {
    pub fn destroy(mut self) {
        unsafe {
            let gfx_device = Gfx::get().gfx_device();
            gfx_device.swapchain.destroy_swapchain(self.swapchain_handle, None);
        }
        self.swapchain_handle = vk::SwapchainKHR::null();
    }
}
impl Drop for GfxRenderSwapchain {
    fn drop(&mut self) {
        debug_assert!(self.swapchain_handle.is_null(), "GfxRenderSwapchain must be destroyed manually before drop.");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn caps(current: (u32, u32), min: (u32, u32), max: (u32, u32)) -> vk::SurfaceCapabilitiesKHR {
        vk::SurfaceCapabilitiesKHR {
            current_extent: vk::Extent2D {
                width: current.0,
                height: current.1,
            },
            min_image_extent: vk::Extent2D {
                width: min.0,
                height: min.1,
            },
            max_image_extent: vk::Extent2D {
                width: max.0,
                height: max.1,
            },
            min_image_count: 2,
            max_image_count: 0,
            ..Default::default()
        }
    }

    #[test]
    fn test_extent_uses_surface_current_extent() {
        let c = caps((800, 600), (1, 1), (4096, 4096));
        let extent = GfxRenderSwapchain::calculate_swapchain_extent(&c, vk::Extent2D {
            width: 1920,
            height: 1080,
        });
        assert_eq!((extent.width, extent.height), (800, 600));
    }

    #[test]
    fn test_extent_clamped_when_surface_undefined() {
        let c = caps((u32::MAX, u32::MAX), (100, 100), (1000, 1000));
        let extent = GfxRenderSwapchain::calculate_swapchain_extent(&c, vk::Extent2D {
            width: 4000,
            height: 50,
        });
        assert_eq!((extent.width, extent.height), (1000, 100));
    }

    #[test]
    fn test_image_count() {
        let mut c = caps((1, 1), (1, 1), (1, 1));
        assert_eq!(GfxRenderSwapchain::calculate_image_count(&c), 3);
        c.max_image_count = 2;
        assert_eq!(GfxRenderSwapchain::calculate_image_count(&c), 2);
    }

    #[test]
    fn test_choose_present_mode_fallback_fifo() {
        let available = [vk::PresentModeKHR::FIFO, vk::PresentModeKHR::IMMEDIATE];
        assert_eq!(
            GfxRenderSwapchain::choose_present_mode(&available, vk::PresentModeKHR::MAILBOX),
            vk::PresentModeKHR::FIFO
        );
        assert_eq!(
            GfxRenderSwapchain::choose_present_mode(&available, vk::PresentModeKHR::IMMEDIATE),
            vk::PresentModeKHR::IMMEDIATE
        );
    }

    #[test]
    fn test_choose_surface_format() {
        let srgb = vk::SurfaceFormatKHR {
            format: vk::Format::B8G8R8A8_SRGB,
            color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
        };
        let unorm = vk::SurfaceFormatKHR {
            format: vk::Format::B8G8R8A8_UNORM,
            color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
        };
        let pick = |available: &[vk::SurfaceFormatKHR]| {
            GfxRenderSwapchain::choose_surface_format(available, srgb).map(|f| f.format)
        };
        assert_eq!(pick(&[unorm, srgb]), Some(vk::Format::B8G8R8A8_SRGB));
        assert_eq!(pick(&[unorm]), Some(vk::Format::B8G8R8A8_UNORM));
        assert_eq!(pick(&[]), None);
    }
}
