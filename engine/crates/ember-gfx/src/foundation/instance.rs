use std::{
    collections::HashSet,
    ffi::{CStr, CString, c_char},
};

use anyhow::Context;
use ash::vk;
use itertools::Itertools;

use crate::foundation::debug_messenger::GfxDebugMsger;

pub struct GfxInstance {
    /// 仅仅是函数指针，以及一个裸的 handle
    ///
    /// 生命周期由 destroy 手动控制
    pub(crate) ash_instance: ash::Instance,
}

impl GfxInstance {
    /// 设置所需的 layers 和 extensions，创建 vk instance
    pub fn new(
        vk_entry: &ash::Entry,
        app_name: &str,
        engine_name: &str,
        extra_instance_exts: &[&'static CStr],
    ) -> anyhow::Result<Self> {
        let app_name = CString::new(app_name).context("gfx: invalid app name")?;
        let engine_name = CString::new(engine_name).context("gfx: invalid engine name")?;
        let app_info = vk::ApplicationInfo::default()
            .api_version(vk::API_VERSION_1_3) // 版本过低时，有些函数无法正确加载
            .application_name(app_name.as_c_str())
            .application_version(vk::make_api_version(0, 1, 0, 0))
            .engine_name(engine_name.as_c_str())
            .engine_version(vk::make_api_version(0, 1, 0, 0));

        let enabled_extensions = Self::get_extensions(vk_entry, extra_instance_exts)?;
        log::info!(
            "instance extensions: {}",
            enabled_extensions.iter().map(|ext| format!("\n\t{:?}", unsafe { CStr::from_ptr(*ext) })).join("")
        );

        let mut instance_ci = vk::InstanceCreateInfo::default()
            .application_info(&app_info)
            .enabled_extension_names(&enabled_extensions);

        // 为 instance info 添加 debug messenger，覆盖 instance 的创建与销毁过程
        let mut debug_utils_messenger_ci = GfxDebugMsger::debug_utils_messenger_ci();
        instance_ci = instance_ci.push_next(&mut debug_utils_messenger_ci);

        let handle = unsafe { vk_entry.create_instance(&instance_ci, None) }.context("gfx: create vk instance")?;

        Ok(Self { ash_instance: handle })
    }

    pub fn destroy(self) {
        log::info!("destroying GfxInstance");
        unsafe {
            self.ash_instance.destroy_instance(None);
        }
    }
}

// getter
impl GfxInstance {
    #[inline]
    pub fn ash_instance(&self) -> &ash::Instance {
        &self.ash_instance
    }

    #[inline]
    pub fn vk_instance(&self) -> vk::Instance {
        self.ash_instance.handle()
    }
}

// 构造过程
impl GfxInstance {
    /// instance 所需的，且受支持的 extension
    ///
    /// 不支持时返回错误，属于启动期的致命错误
    fn get_extensions(
        vk_entry: &ash::Entry,
        extra_instance_exts: &[&'static CStr],
    ) -> anyhow::Result<Vec<*const c_char>> {
        let all_ext_props = unsafe { vk_entry.enumerate_instance_extension_properties(None) }
            .context("gfx: enumerate instance extensions")?;
        let supported = all_ext_props
            .iter()
            .filter_map(|props| props.extension_name_as_c_str().ok())
            .collect::<HashSet<_>>();

        let mut enabled_extensions: Vec<&'static CStr> = Vec::new();
        for ext in extra_instance_exts.iter().copied().chain(Self::basic_instance_exts()) {
            anyhow::ensure!(supported.contains(ext), "gfx: required instance extension {:?} is missing", ext);
            if !enabled_extensions.contains(&ext) {
                enabled_extensions.push(ext);
            }
        }

        Ok(enabled_extensions.iter().map(|ext| ext.as_ptr()).collect_vec())
    }

    /// 必须要开启的 instance extensions
    ///
    /// validation layer 不在这里开启，使用 vulkan configurator 控制
    fn basic_instance_exts() -> Vec<&'static CStr> {
        vec![
            // 1. debug messenger
            // 2. 为 vulkan object 设置 debug name
            // 3. 使用 label 标记 queue 或者 command buffer 中的一个一个 section
            vk::EXT_DEBUG_UTILS_NAME,
        ]
    }
}
