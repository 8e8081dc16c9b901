use anyhow::Context;
use ash::vk;

use crate::{foundation::debug_messenger::DebugType, gfx::Gfx};

/// # Destroy
/// 不实现 Drop，因为可以 Clone，需要手动 destroy
#[derive(Clone)]
pub struct GfxFence {
    fence: vk::Fence,
}

impl DebugType for GfxFence {
    fn debug_type_name() -> &'static str {
        "GfxFence"
    }

    fn vk_handle(&self) -> impl vk::Handle {
        self.fence
    }
}

// 创建与销毁
impl GfxFence {
    /// # param
    /// * signaled - 是否创建时就 signaled
    pub fn new(signaled: bool, debug_name: &str) -> anyhow::Result<Self> {
        let gfx_device = Gfx::get().gfx_device();
        let fence_flags = if signaled { vk::FenceCreateFlags::SIGNALED } else { vk::FenceCreateFlags::empty() };
        let fence = unsafe { gfx_device.create_fence(&vk::FenceCreateInfo::default().flags(fence_flags), None) }
            .with_context(|| format!("gfx: create fence {}", debug_name))?;

        let fence = Self { fence };
        gfx_device.set_debug_name(&fence, debug_name);
        Ok(fence)
    }
    #[inline]
    pub fn destroy(self) {
        let gfx_device = Gfx::get().gfx_device();
        unsafe {
            gfx_device.destroy_fence(self.fence, None);
        }
    }
}

// getters
impl GfxFence {
    #[inline]
    pub fn handle(&self) -> vk::Fence {
        self.fence
    }
}

// tools
impl GfxFence {
    /// 阻塞等待 fence，这是渲染线程唯一的阻塞点
    #[inline]
    pub fn wait(&self) -> anyhow::Result<()> {
        let gfx_device = Gfx::get().gfx_device();
        unsafe { gfx_device.wait_for_fences(std::slice::from_ref(&self.fence), true, u64::MAX) }
            .context("gfx: wait for fence")
    }

    #[inline]
    pub fn reset(&self) -> anyhow::Result<()> {
        let gfx_device = Gfx::get().gfx_device();
        unsafe { gfx_device.reset_fences(std::slice::from_ref(&self.fence)) }.context("gfx: reset fence")
    }
}
