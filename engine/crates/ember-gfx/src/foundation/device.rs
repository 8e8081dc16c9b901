use std::cell::Cell;
use std::{
    ffi::{CStr, CString},
    ops::Deref,
};

use anyhow::Context;
use ash::vk;
use itertools::Itertools;

use crate::{descriptors::descriptor_cursor::GfxWriteDescriptorSet, foundation::debug_messenger::DebugType};

/// Vulkan 逻辑设备封装
///
/// 包含核心设备 API 以及扩展的函数指针，这些函数指针在应用生命周期中保持不变。
///
/// # 扩展支持
/// - Debug Utils (EXT)
/// - Swapchain (KHR)
pub struct GfxDevice {
    /// 核心 Vulkan 设备 API
    pub(crate) device: ash::Device,
    /// 调试工具扩展 API
    pub(crate) debug_utils: ash::ext::debug_utils::Device,
    /// 交换链扩展 API
    pub(crate) swapchain: ash::khr::swapchain::Device,

    #[cfg(debug_assertions)]
    destroyed: Cell<bool>,
}

// 构造与销毁
impl GfxDevice {
    pub fn new(
        instance: &ash::Instance,
        pdevice: vk::PhysicalDevice,
        queue_create_info: &[vk::DeviceQueueCreateInfo],
    ) -> anyhow::Result<Self> {
        let _span = tracy_client::span!("GfxDevice::new");

        // device 所需的所有 extension
        let device_exts = Self::basic_device_exts().iter().map(|e| e.as_ptr()).collect_vec();
        log::info!(
            "device exts: {}",
            device_exts.iter().map(|ext| format!("\n\t{:?}", unsafe { CStr::from_ptr(*ext) })).join("")
        );

        // device 所需的所有 features，1.1/1.2/1.3 的 feature 都通过对应的聚合结构体开启
        let mut features11 = Self::vulkan11_features();
        let mut features12 = Self::vulkan12_features();
        let mut features13 = Self::vulkan13_features();
        let mut all_features = vk::PhysicalDeviceFeatures2::default()
            .features(Self::physical_device_basic_features())
            .push_next(&mut features11)
            .push_next(&mut features12)
            .push_next(&mut features13);

        let device_create_info = vk::DeviceCreateInfo::default()
            .queue_create_infos(queue_create_info)
            .enabled_extension_names(&device_exts)
            .push_next(&mut all_features);

        let device = unsafe { instance.create_device(pdevice, &device_create_info, None) }
            .context("gfx: create logical device")?;

        let vk_debug_utils_device = ash::ext::debug_utils::Device::new(instance, &device);
        let vk_swapchain = ash::khr::swapchain::Device::new(instance, &device);

        Ok(Self {
            device,
            debug_utils: vk_debug_utils_device,
            swapchain: vk_swapchain,

            #[cfg(debug_assertions)]
            destroyed: Cell::new(false),
        })
    }

    pub fn destroy(&self) {
        log::info!("destroying device");

        #[cfg(debug_assertions)]
        self.destroyed.set(true);

        unsafe {
            self.device.destroy_device(None);
        }
    }
}

// 创建过程的辅助函数
impl GfxDevice {
    /// 必要的 physical device core features
    pub(crate) fn physical_device_basic_features() -> vk::PhysicalDeviceFeatures {
        vk::PhysicalDeviceFeatures::default()
            .sampler_anisotropy(true)
            .independent_blend(true)
            // indirect draw 一次提交多个 command，并且使用 first_instance 索引 instance 数据
            .multi_draw_indirect(true)
            .draw_indirect_first_instance(true)
    }

    pub(crate) fn vulkan11_features() -> vk::PhysicalDeviceVulkan11Features<'static> {
        // shader 中使用 gl_DrawID / gl_BaseInstance
        vk::PhysicalDeviceVulkan11Features::default().shader_draw_parameters(true)
    }

    pub(crate) fn vulkan12_features() -> vk::PhysicalDeviceVulkan12Features<'static> {
        vk::PhysicalDeviceVulkan12Features::default()
            .descriptor_indexing(true)
            .descriptor_binding_partially_bound(true) // 即使一些 descriptor 是 invalid
            .runtime_descriptor_array(true)
            .descriptor_binding_sampled_image_update_after_bind(true)
            .descriptor_binding_storage_buffer_update_after_bind(true)
            .descriptor_binding_uniform_buffer_update_after_bind(true)
            .shader_sampled_image_array_non_uniform_indexing(true)
            // 让 UBO 支持 std430 layout
            .uniform_buffer_standard_layout(true)
            // depth image 使用 DEPTH_ATTACHMENT_OPTIMAL
            .separate_depth_stencil_layouts(true)
    }

    pub(crate) fn vulkan13_features() -> vk::PhysicalDeviceVulkan13Features<'static> {
        vk::PhysicalDeviceVulkan13Features::default().dynamic_rendering(true).synchronization2(true)
    }

    /// 必要的 device extensions
    ///
    /// dynamic rendering 和 synchronization2 已经提升到 core-1.3
    fn basic_device_exts() -> Vec<&'static CStr> {
        vec![ash::khr::swapchain::NAME]
    }

    /// 选择 physical device 时需要检查的 extensions
    pub fn required_device_exts() -> Vec<&'static CStr> {
        Self::basic_device_exts()
    }
}

// getters
impl GfxDevice {
    #[inline]
    pub fn vk_handle(&self) -> vk::Device {
        self.device.handle()
    }
    #[inline]
    pub fn debug_utils(&self) -> &ash::ext::debug_utils::Device {
        &self.debug_utils
    }
    #[inline]
    pub fn swapchain(&self) -> &ash::khr::swapchain::Device {
        &self.swapchain
    }
}

// tools
impl GfxDevice {
    #[inline]
    pub fn write_descriptor_sets(&self, writes: &[GfxWriteDescriptorSet]) {
        GfxWriteDescriptorSet::with_writes(writes, |writes| unsafe {
            self.device.update_descriptor_sets(writes, &[]);
        })
    }

    /// debug name 设置失败不影响渲染，只记录日志
    #[inline]
    pub fn set_object_debug_name<T: vk::Handle>(&self, handle: T, name: impl AsRef<str>) {
        let Ok(name) = CString::new(name.as_ref()) else {
            log::warn!("invalid debug name: {}", name.as_ref());
            return;
        };
        let result = unsafe {
            self.debug_utils.set_debug_utils_object_name(
                &vk::DebugUtilsObjectNameInfoEXT::default().object_name(name.as_c_str()).object_handle(handle),
            )
        };
        if let Err(e) = result {
            log::warn!("failed to set debug name {:?}: {:?}", name, e);
        }
    }

    pub fn set_debug_name<T: DebugType>(&self, handle: &T, name: impl AsRef<str>) {
        let debug_name = format!("{}::{}", T::debug_type_name(), name.as_ref());
        self.set_object_debug_name(handle.vk_handle(), debug_name);
    }

    #[inline]
    pub fn wait_idle(&self) {
        if let Err(e) = unsafe { self.device.device_wait_idle() } {
            log::error!("device wait idle failed: {:?}", e);
        }
    }
}

impl Deref for GfxDevice {
    type Target = ash::Device;
    fn deref(&self) -> &Self::Target {
        &self.device
    }
}
impl Drop for GfxDevice {
    fn drop(&mut self) {
        #[cfg(debug_assertions)]
        debug_assert!(self.destroyed.get(), "GfxDevice must be destroyed before being dropped.");
    }
}
impl DebugType for GfxDevice {
    fn debug_type_name() -> &'static str {
        "GfxDevice"
    }
    fn vk_handle(&self) -> impl vk::Handle {
        self.device.handle()
    }
}
