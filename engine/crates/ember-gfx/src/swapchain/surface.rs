use anyhow::Context;
use ash::vk;

use crate::foundation::debug_messenger::DebugType;
use crate::gfx::Gfx;

/// 窗口对应的 surface，在 swapchain 重建时保持不变
///
/// # Destroy
/// 需要在所有 swapchain 销毁之后手动调用 `destroy`
pub struct GfxSurface {
    pub(crate) handle: vk::SurfaceKHR,
    pub(crate) pf: ash::khr::surface::Instance,
}

// new & init
impl GfxSurface {
    pub fn new(
        raw_display_handle: raw_window_handle::RawDisplayHandle,
        raw_window_handle: raw_window_handle::RawWindowHandle,
    ) -> anyhow::Result<Self> {
        let gfx_core = Gfx::get().gfx_core();
        let surface_pf = ash::khr::surface::Instance::new(gfx_core.vk_entry(), gfx_core.instance.ash_instance());

        let surface = unsafe {
            ash_window::create_surface(
                gfx_core.vk_entry(),
                gfx_core.instance.ash_instance(),
                raw_display_handle,
                raw_window_handle,
                None,
            )
        }
        .context("swapchain: create surface")?;

        let surface = GfxSurface {
            handle: surface,
            pf: surface_pf,
        };
        gfx_core.gfx_device.set_debug_name(&surface, "main");

        Ok(surface)
    }
}

// getters
impl GfxSurface {
    #[inline]
    pub fn handle(&self) -> vk::SurfaceKHR {
        self.handle
    }

    pub fn get_capabilities(&self) -> anyhow::Result<vk::SurfaceCapabilitiesKHR> {
        unsafe {
            self.pf
                .get_physical_device_surface_capabilities(Gfx::get().physical_device().vk_handle, self.handle)
                .context("swapchain: query surface capabilities")
        }
    }

    pub fn get_formats(&self) -> anyhow::Result<Vec<vk::SurfaceFormatKHR>> {
        unsafe {
            self.pf
                .get_physical_device_surface_formats(Gfx::get().physical_device().vk_handle, self.handle)
                .context("swapchain: query surface formats")
        }
    }

    pub fn get_present_modes(&self) -> anyhow::Result<Vec<vk::PresentModeKHR>> {
        unsafe {
            self.pf
                .get_physical_device_surface_present_modes(Gfx::get().physical_device().vk_handle, self.handle)
                .context("swapchain: query surface present modes")
        }
    }
}

// destroy
impl GfxSurface {
    pub fn destroy(mut self) {
        unsafe { self.pf.destroy_surface(self.handle, None) }
        self.handle = vk::SurfaceKHR::null();
    }
}
impl Drop for GfxSurface {
    fn drop(&mut self) {
        debug_assert!(vk::Handle::is_null(self.handle), "GfxSurface must be destroyed manually before drop.");
    }
}

impl DebugType for GfxSurface {
    fn debug_type_name() -> &'static str {
        "GfxSurface"
    }
    fn vk_handle(&self) -> impl vk::Handle {
        self.handle
    }
}
