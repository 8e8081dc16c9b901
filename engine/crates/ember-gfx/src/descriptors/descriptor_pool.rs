use anyhow::Context;
use ash::vk;

use crate::{foundation::debug_messenger::DebugType, gfx::Gfx};

/// 描述符池创建信息
///
/// 包括标志位、最大描述符集数量以及每种类型描述符的最大数量
pub struct GfxDescriptorPoolCreateInfo {
    flags: vk::DescriptorPoolCreateFlags,
    max_sets: u32,
    pool_sizes: Vec<vk::DescriptorPoolSize>,
}

impl GfxDescriptorPoolCreateInfo {
    #[inline]
    pub fn new(flags: vk::DescriptorPoolCreateFlags, max_sets: u32, pool_sizes: Vec<vk::DescriptorPoolSize>) -> Self {
        Self {
            flags,
            max_sets,
            pool_sizes,
        }
    }

    #[inline]
    pub fn info(&self) -> vk::DescriptorPoolCreateInfo<'_> {
        vk::DescriptorPoolCreateInfo::default()
            .flags(self.flags)
            .max_sets(self.max_sets)
            .pool_sizes(&self.pool_sizes)
    }
}

/// 描述符池，从中分配的 set 跟随 pool 一起释放
pub struct GfxDescriptorPool {
    handle: vk::DescriptorPool,
    name: String,
}
impl DebugType for GfxDescriptorPool {
    fn debug_type_name() -> &'static str {
        "GfxDescriptorPool"
    }

    fn vk_handle(&self) -> impl vk::Handle {
        self.handle
    }
}
impl GfxDescriptorPool {
    #[inline]
    pub fn new(ci: &GfxDescriptorPoolCreateInfo, name: &str) -> anyhow::Result<Self> {
        let gfx_device = Gfx::get().gfx_device();
        let pool = unsafe { gfx_device.create_descriptor_pool(&ci.info(), None) }
            .with_context(|| format!("gfx: create descriptor pool {}", name))?;
        let pool = Self {
            handle: pool,
            name: name.to_string(),
        };
        gfx_device.set_debug_name(&pool, name);
        Ok(pool)
    }

    #[inline]
    pub fn handle(&self) -> vk::DescriptorPool {
        self.handle
    }

    pub fn destroy(self) {
        log::info!("destroying GfxDescriptorPool: {}", self.name);
        unsafe { Gfx::get().gfx_device().destroy_descriptor_pool(self.handle, None) };
    }
}
