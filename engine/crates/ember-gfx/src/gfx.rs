use std::ffi::CStr;

use anyhow::Context;
use ash::vk;

use crate::gfx_core::GfxCore;
use crate::{
    commands::{
        command_buffer::GfxCommandBuffer,
        command_pool::GfxCommandPool,
        command_queue::{GfxCommandQueue, GfxQueueFamily},
        submit_info::GfxSubmitInfo,
    },
    foundation::{
        device::GfxDevice, instance::GfxInstance, physical_device::GfxPhysicalDevice, vmem_allocator::GfxMemAllocator,
    },
};

/// Vulkan 图形上下文单例
///
/// 管理所有 Vulkan 核心资源，包括实例、设备、队列、内存分配器等。
/// 采用单例模式简化参数传递和生命周期管理，仅适用于单线程环境。
///
/// # 初始化流程
/// ```ignore
/// Gfx::init("MyApp", &extra_extensions)?;
/// let device = Gfx::get().gfx_device();
/// // 使用...
/// Gfx::destroy();
/// ```
pub struct Gfx {
    pub(crate) gfx_core: GfxCore,
    pub(crate) vm_allocator: GfxMemAllocator,

    /// 临时的 graphics command pool，用于 one_time_exec
    pub(crate) temp_graphics_command_pool: GfxCommandPool,
}

// 创建与销毁
impl Gfx {
    const ENGINE_NAME: &'static str = "Ember";

    fn new(app_name: &str, instance_extra_exts: &[&'static CStr]) -> anyhow::Result<Self> {
        let gfx_core = GfxCore::new(app_name, Self::ENGINE_NAME, instance_extra_exts)?;

        // 初始化过程中单例还不可用，需要显式传递 device
        let gfx_command_pool = GfxCommandPool::new_internal(
            &gfx_core.gfx_device,
            gfx_core.physical_device.gfx_queue_family.clone(),
            vk::CommandPoolCreateFlags::TRANSIENT,
            "gfx-one-time",
        )?;

        let allocator = GfxMemAllocator::new(
            &gfx_core.instance.ash_instance,
            gfx_core.physical_device.vk_handle,
            &gfx_core.gfx_device,
        )?;

        Ok(Self {
            gfx_core,
            vm_allocator: allocator,
            temp_graphics_command_pool: gfx_command_pool,
        })
    }
}

// 此静态变量仅用于单线程环境
static mut G_GFX: Option<Gfx> = None;

// 单例模式
// - Gfx 自身的生命周期管理比较简单，因此适合使用单例模式
// - 其他类的类型签名也会变得更简单
impl Gfx {
    /// 获取单例实例
    ///
    /// # Panics
    /// 如果 Gfx 还未初始化，此方法会 panic
    #[inline]
    pub fn get() -> &'static Gfx {
        unsafe {
            // 使用 addr_of! 避免直接对 static mut 创建引用
            let ptr = std::ptr::addr_of!(G_GFX);
            (*ptr).as_ref().expect("Gfx not initialized. Call Gfx::init() first.")
        }
    }

    /// 初始化 Gfx 单例，失败时单例保持未初始化
    ///
    /// # Parameters
    /// - `app_name`: 应用程序名称
    /// - `instance_extra_exts`: 额外的 Vulkan 实例扩展，例如 surface 相关扩展
    pub fn init(app_name: &str, instance_extra_exts: &[&'static CStr]) -> anyhow::Result<()> {
        unsafe {
            let ptr = std::ptr::addr_of_mut!(G_GFX);
            anyhow::ensure!((*ptr).is_none(), "gfx: already initialized");
            *ptr = Some(Self::new(app_name, instance_extra_exts)?);
        }
        Ok(())
    }

    /// 销毁 Gfx 单例
    ///
    /// 调用此方法后，不应再使用 Gfx::get()
    pub fn destroy() {
        unsafe {
            let ptr = std::ptr::addr_of_mut!(G_GFX);
            let Some(gfx) = (*ptr).take() else {
                log::warn!("Gfx::destroy called without init");
                return;
            };

            gfx.temp_graphics_command_pool.destroy_internal(&gfx.gfx_core.gfx_device);
            gfx.vm_allocator.destroy();
            gfx.gfx_core.destroy();
        }
    }
}

// getter
impl Gfx {
    #[inline]
    pub fn gfx_core(&self) -> &GfxCore {
        &self.gfx_core
    }

    #[inline]
    pub fn instance(&self) -> &GfxInstance {
        &self.gfx_core.instance
    }

    #[inline]
    pub fn gfx_device(&self) -> &GfxDevice {
        &self.gfx_core.gfx_device
    }

    #[inline]
    pub fn allocator(&self) -> &GfxMemAllocator {
        &self.vm_allocator
    }

    #[inline]
    pub fn physical_device(&self) -> &GfxPhysicalDevice {
        &self.gfx_core.physical_device
    }

    #[inline]
    pub fn gfx_queue_family(&self) -> GfxQueueFamily {
        self.gfx_core.physical_device.gfx_queue_family.clone()
    }

    #[inline]
    pub fn gfx_queue(&self) -> &GfxCommandQueue {
        &self.gfx_core.gfx_queue
    }

    /// mapped memory flush 时，offset 和 size 需要对齐到这个值
    #[inline]
    pub fn non_coherent_atom_size(&self) -> vk::DeviceSize {
        self.gfx_core.physical_device.basic_props.limits.non_coherent_atom_size
    }

    #[inline]
    pub fn max_sampler_anisotropy(&self) -> f32 {
        self.gfx_core.physical_device.basic_props.limits.max_sampler_anisotropy
    }
}

// tools
impl Gfx {
    /// 根据给定的格式，返回支持的格式
    pub fn find_supported_format(
        &self,
        candidates: &[vk::Format],
        tiling: vk::ImageTiling,
        features: vk::FormatFeatureFlags,
    ) -> Vec<vk::Format> {
        candidates
            .iter()
            .filter(|f| {
                let props = unsafe {
                    self.instance()
                        .ash_instance
                        .get_physical_device_format_properties(self.physical_device().vk_handle, **f)
                };
                match tiling {
                    vk::ImageTiling::LINEAR => props.linear_tiling_features.contains(features),
                    vk::ImageTiling::OPTIMAL => props.optimal_tiling_features.contains(features),
                    _ => false,
                }
            })
            .copied()
            .collect()
    }

    /// 立即执行某个 command，并同步等待执行结果
    ///
    /// 用于资源上传等一次性的工作，不应该在每帧的热路径中使用
    pub fn one_time_exec<F, R>(&self, func: F, name: impl AsRef<str>) -> anyhow::Result<R>
    where
        F: FnOnce(&GfxCommandBuffer) -> R,
    {
        let _span = tracy_client::span!("Gfx::one_time_exec");
        let command_buffer =
            GfxCommandBuffer::new(&self.temp_graphics_command_pool, &format!("one-time-{}", name.as_ref()))?;

        let result = (|| {
            command_buffer.begin(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT, name.as_ref())?;
            let result = func(&command_buffer);
            command_buffer.end()?;

            self.gfx_queue().submit(vec![GfxSubmitInfo::new(std::slice::from_ref(&command_buffer))], None)?;
            self.gfx_queue().wait_idle()?;
            Ok::<R, anyhow::Error>(result)
        })()
        .with_context(|| format!("gfx: one time exec {}", name.as_ref()));

        unsafe {
            self.gfx_device()
                .free_command_buffers(self.temp_graphics_command_pool.handle(), &[command_buffer.vk_handle()]);
        }

        result
    }

    pub fn wait_idle(&self) {
        self.gfx_device().wait_idle();
    }
}
