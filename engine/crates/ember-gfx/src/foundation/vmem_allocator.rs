use std::ops::Deref;

use anyhow::Context;
use ash::vk;

/// vk-mem 分配器的包装
pub struct GfxMemAllocator {
    inner: vk_mem::Allocator,
}

impl GfxMemAllocator {
    /// vma 需要引用 Instance 以及 Device，并确保在其生命周期之内这两个引用是有效的.
    /// 因此需要在 Gfx 的其他部分都初始化完成后再初始化 vma，并且先于 Device 销毁
    pub fn new(instance: &ash::Instance, pdevice: vk::PhysicalDevice, device: &ash::Device) -> anyhow::Result<Self> {
        let mut vma_ci = vk_mem::AllocatorCreateInfo::new(instance, device, pdevice);
        vma_ci.vulkan_api_version = vk::API_VERSION_1_3;

        let vma = unsafe { vk_mem::Allocator::new(vma_ci) }.context("gfx: create vma allocator")?;

        Ok(Self { inner: vma })
    }

    /// 通过 drop 触发 vma 的销毁
    pub fn destroy(self) {
        log::info!("destroying GfxMemAllocator");
        drop(self.inner);
    }
}

impl Deref for GfxMemAllocator {
    type Target = vk_mem::Allocator;
    fn deref(&self) -> &Self::Target {
        &self.inner
    }
}
