use std::ffi::CStr;

use anyhow::Context;
use ash::vk;
use itertools::Itertools;

use crate::{commands::command_queue::GfxQueueFamily, foundation::debug_messenger::DebugType};

/// 表示一张物理显卡
pub struct GfxPhysicalDevice {
    pub(crate) vk_handle: vk::PhysicalDevice,

    /// 当前 gpu 的基础属性
    pub(crate) basic_props: vk::PhysicalDeviceProperties,

    pub(crate) gfx_queue_family: GfxQueueFamily,
}

impl GfxPhysicalDevice {
    /// 在满足最低要求的显卡中选择一张，优先选择独立显卡
    ///
    /// 没有任何显卡满足要求时返回错误
    pub fn new_suitable_physical_device(
        instance: &ash::Instance,
        required_exts: &[&'static CStr],
    ) -> anyhow::Result<Self> {
        let pdevices = unsafe { instance.enumerate_physical_devices() }.context("gfx: enumerate physical devices")?;

        let candidates = pdevices
            .iter()
            .filter_map(|pdevice| match Self::new(*pdevice, instance, required_exts) {
                Ok(device) => Some(device),
                Err(e) => {
                    log::warn!("skip physical device: {:#}", e);
                    None
                }
            })
            .collect_vec();

        candidates
            .into_iter()
            // 优先使用独立显卡
            .find_or_first(GfxPhysicalDevice::is_descrete_gpu)
            .context("gfx: no physical device meets the minimum feature and extension set")
    }

    fn new(pdevice: vk::PhysicalDevice, instance: &ash::Instance, required_exts: &[&'static CStr]) -> anyhow::Result<Self> {
        let basic_props = unsafe { instance.get_physical_device_properties(pdevice) };
        let physical_device_name = basic_props.device_name_as_c_str().unwrap_or(c"unknown");
        log::info!("found gpu: {:?}", physical_device_name);

        anyhow::ensure!(
            basic_props.api_version >= vk::API_VERSION_1_3,
            "{:?} only supports vulkan {}.{}",
            physical_device_name,
            vk::api_version_major(basic_props.api_version),
            vk::api_version_minor(basic_props.api_version)
        );

        // 检查 device extension
        let device_extensions = unsafe { instance.enumerate_device_extension_properties(pdevice) }
            .context("enumerate device extensions")?;
        for ext in required_exts {
            let supported =
                device_extensions.iter().any(|props| props.extension_name_as_c_str().is_ok_and(|name| name == *ext));
            anyhow::ensure!(supported, "{:?} does not support extension {:?}", physical_device_name, ext);
        }

        // 检查 features
        let missing_features = Self::missing_features(instance, pdevice);
        anyhow::ensure!(
            missing_features.is_empty(),
            "{:?} misses features: {}",
            physical_device_name,
            missing_features.join(", ")
        );

        // 全能的 Queue：graphics, compute, transfer
        let queue_familiy_props = unsafe { instance.get_physical_device_queue_family_properties(pdevice) };
        let gfx_queue_family = queue_familiy_props
            .iter()
            .enumerate()
            .find(|(_, props)| {
                props.queue_flags.contains(vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE | vk::QueueFlags::TRANSFER)
            })
            .map(|(family_idx, props)| GfxQueueFamily {
                name: "gfx".to_string(),
                queue_family_index: family_idx as u32,
                queue_flags: props.queue_flags,
                queue_count: props.queue_count,
            })
            .with_context(|| format!("{:?} has no graphics queue family", physical_device_name))?;

        Ok(Self {
            vk_handle: pdevice,
            basic_props,
            gfx_queue_family,
        })
    }

    /// 返回缺失的 feature 名称
    fn missing_features(instance: &ash::Instance, pdevice: vk::PhysicalDevice) -> Vec<&'static str> {
        let mut features11 = vk::PhysicalDeviceVulkan11Features::default();
        let mut features12 = vk::PhysicalDeviceVulkan12Features::default();
        let mut features13 = vk::PhysicalDeviceVulkan13Features::default();
        let mut features2 = vk::PhysicalDeviceFeatures2::default()
            .push_next(&mut features11)
            .push_next(&mut features12)
            .push_next(&mut features13);
        unsafe { instance.get_physical_device_features2(pdevice, &mut features2) };
        let core = features2.features;

        missing_feature_names(&core, &features11, &features12, &features13)
    }

    #[inline]
    /// 当前 gpu 是否是独立显卡
    pub fn is_descrete_gpu(&self) -> bool {
        self.basic_props.device_type == vk::PhysicalDeviceType::DISCRETE_GPU
    }
}

impl DebugType for GfxPhysicalDevice {
    fn debug_type_name() -> &'static str {
        "GfxPhysicalDevice"
    }

    fn vk_handle(&self) -> impl vk::Handle {
        self.vk_handle
    }
}

/// 与 `GfxDevice` 创建时开启的 features 一一对应
fn missing_feature_names(
    core: &vk::PhysicalDeviceFeatures,
    features11: &vk::PhysicalDeviceVulkan11Features,
    features12: &vk::PhysicalDeviceVulkan12Features,
    features13: &vk::PhysicalDeviceVulkan13Features,
) -> Vec<&'static str> {
    let checks = [
        (core.sampler_anisotropy, "samplerAnisotropy"),
        (core.multi_draw_indirect, "multiDrawIndirect"),
        (core.draw_indirect_first_instance, "drawIndirectFirstInstance"),
        (core.independent_blend, "independentBlend"),
        (features11.shader_draw_parameters, "shaderDrawParameters"),
        (features12.descriptor_indexing, "descriptorIndexing"),
        (features12.descriptor_binding_partially_bound, "descriptorBindingPartiallyBound"),
        (features12.descriptor_binding_sampled_image_update_after_bind, "descriptorBindingSampledImageUpdateAfterBind"),
        (features12.descriptor_binding_storage_buffer_update_after_bind, "descriptorBindingStorageBufferUpdateAfterBind"),
        (features12.descriptor_binding_uniform_buffer_update_after_bind, "descriptorBindingUniformBufferUpdateAfterBind"),
        (features12.runtime_descriptor_array, "runtimeDescriptorArray"),
        (features12.shader_sampled_image_array_non_uniform_indexing, "shaderSampledImageArrayNonUniformIndexing"),
        (features12.uniform_buffer_standard_layout, "uniformBufferStandardLayout"),
        (features12.separate_depth_stencil_layouts, "separateDepthStencilLayouts"),
        (features13.dynamic_rendering, "dynamicRendering"),
        (features13.synchronization2, "synchronization2"),
    ];
    checks.iter().filter(|(supported, _)| *supported == vk::FALSE).map(|(_, name)| *name).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::foundation::device::GfxDevice;

    #[test]
    fn test_requested_features_pass_check() {
        let missing = missing_feature_names(
            &GfxDevice::physical_device_basic_features(),
            &GfxDevice::vulkan11_features(),
            &GfxDevice::vulkan12_features(),
            &GfxDevice::vulkan13_features(),
        );
        assert!(missing.is_empty(), "{missing:?}");
    }

    #[test]
    fn test_update_after_bind_and_layout_features_are_checked() {
        let core = GfxDevice::physical_device_basic_features();
        let features11 = GfxDevice::vulkan11_features();
        let features13 = GfxDevice::vulkan13_features();
        let cases: [(fn(&mut vk::PhysicalDeviceVulkan12Features), &str); 4] = [
            (|f| f.descriptor_binding_storage_buffer_update_after_bind = vk::FALSE, "descriptorBindingStorageBufferUpdateAfterBind"),
            (|f| f.descriptor_binding_uniform_buffer_update_after_bind = vk::FALSE, "descriptorBindingUniformBufferUpdateAfterBind"),
            (|f| f.uniform_buffer_standard_layout = vk::FALSE, "uniformBufferStandardLayout"),
            (|f| f.separate_depth_stencil_layouts = vk::FALSE, "separateDepthStencilLayouts"),
        ];
        for (disable, name) in cases {
            let mut features12 = GfxDevice::vulkan12_features();
            disable(&mut features12);
            assert_eq!(missing_feature_names(&core, &features11, &features12, &features13), vec![name]);
        }
    }

    #[test]
    fn test_wide_lines_not_required() {
        let core = GfxDevice::physical_device_basic_features();
        assert_eq!(core.wide_lines, vk::FALSE);
        let missing = missing_feature_names(
            &core,
            &GfxDevice::vulkan11_features(),
            &GfxDevice::vulkan12_features(),
            &GfxDevice::vulkan13_features(),
        );
        assert!(missing.is_empty());
    }
}
