use anyhow::Context;
use ash::vk;

use crate::{foundation::debug_messenger::DebugType, gfx::Gfx};

/// binary semaphore
///
/// # Destroy
/// 不实现 Drop，因为可以 Clone，需要手动 destroy
#[derive(Clone)]
pub struct GfxSemaphore {
    semaphore: vk::Semaphore,
}

// 创建与销毁
impl GfxSemaphore {
    pub fn new(debug_name: &str) -> anyhow::Result<Self> {
        let gfx_device = Gfx::get().gfx_device();
        let semaphore = unsafe { gfx_device.create_semaphore(&vk::SemaphoreCreateInfo::default(), None) }
            .with_context(|| format!("gfx: create semaphore {}", debug_name))?;

        let semaphore = Self { semaphore };
        gfx_device.set_debug_name(&semaphore, debug_name);
        Ok(semaphore)
    }

    #[inline]
    pub fn destroy(self) {
        let gfx_device = Gfx::get().gfx_device();
        unsafe {
            gfx_device.destroy_semaphore(self.semaphore, None);
        }
    }
}

// getters
impl GfxSemaphore {
    #[inline]
    pub fn handle(&self) -> vk::Semaphore {
        self.semaphore
    }
}

impl DebugType for GfxSemaphore {
    fn debug_type_name() -> &'static str {
        "GfxSemaphore"
    }

    fn vk_handle(&self) -> impl vk::Handle {
        self.semaphore
    }
}

#[cfg(test)]
impl GfxSemaphore {
    /// 不经过 device 创建的空 semaphore，只用于测试 submit info 的组装
    pub(crate) fn null_for_test() -> Self {
        Self {
            semaphore: vk::Semaphore::null(),
        }
    }
}
