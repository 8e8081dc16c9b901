use std::collections::HashMap;
use std::ffi::CStr;
use std::path::{Path, PathBuf};

use anyhow::Context;
use ash::vk;

use crate::{foundation::debug_messenger::DebugType, gfx::Gfx};

/// # Destroy
///
/// 需要手动调用 `destroy` 方法来释放资源。
pub struct GfxShaderModule {
    handle: vk::ShaderModule,

    #[cfg(debug_assertions)]
    destroyed: bool,
}
impl GfxShaderModule {
    /// # param
    /// * path - spv shader 文件路径
    ///
    /// 文件缺失或者不是合法的 spv 时返回错误
    pub fn new(path: &Path) -> anyhow::Result<Self> {
        let gfx_device = Gfx::get().gfx_device();
        let mut file =
            std::fs::File::open(path).with_context(|| format!("pipeline: open shader {}", path.display()))?;
        let shader_code =
            ash::util::read_spv(&mut file).with_context(|| format!("pipeline: read spv {}", path.display()))?;

        let shader_module_info = vk::ShaderModuleCreateInfo::default().code(&shader_code);

        let shader_module = unsafe { gfx_device.create_shader_module(&shader_module_info, None) }
            .with_context(|| format!("pipeline: create shader module {}", path.display()))?;
        let shader_module = Self {
            handle: shader_module,

            #[cfg(debug_assertions)]
            destroyed: false,
        };
        gfx_device.set_debug_name(&shader_module, path.to_string_lossy());
        Ok(shader_module)
    }

    #[inline]
    pub fn handle(&self) -> vk::ShaderModule {
        self.handle
    }

    #[inline]
    pub fn destroy(mut self) {
        let gfx_device = Gfx::get().gfx_device();
        unsafe {
            gfx_device.destroy_shader_module(self.handle, None);
        }
        #[cfg(debug_assertions)]
        {
            self.destroyed = true;
        }
    }
}
impl Drop for GfxShaderModule {
    fn drop(&mut self) {
        #[cfg(debug_assertions)]
        debug_assert!(self.destroyed, "ShaderModule must be destroyed manually before drop.");
    }
}
impl DebugType for GfxShaderModule {
    fn debug_type_name() -> &'static str {
        "GfxShaderModule"
    }

    fn vk_handle(&self) -> impl vk::Handle {
        self.handle
    }
}

/// 可以存放多个 ShaderModule，使用路径进行索引
pub struct GfxShaderModuleCache {
    shader_modules: HashMap<PathBuf, GfxShaderModule>,
}
impl Default for GfxShaderModuleCache {
    fn default() -> Self {
        Self::new()
    }
}

impl GfxShaderModuleCache {
    pub fn new() -> Self {
        Self {
            shader_modules: HashMap::new(),
        }
    }

    pub fn get_or_load(&mut self, path: &Path) -> anyhow::Result<vk::ShaderModule> {
        if let Some(module) = self.shader_modules.get(path) {
            return Ok(module.handle());
        }
        let module = GfxShaderModule::new(path)?;
        let handle = module.handle();
        self.shader_modules.insert(path.to_path_buf(), module);
        Ok(handle)
    }

    pub fn destroy(mut self) {
        std::mem::take(&mut self.shader_modules).into_values().for_each(|module| module.destroy());
    }
}
impl Drop for GfxShaderModuleCache {
    fn drop(&mut self) {
        debug_assert!(self.shader_modules.is_empty(), "ShaderModuleCache must be destroyed manually before drop.");
    }
}

#[derive(Clone, Debug)]
pub struct GfxShaderStageInfo {
    pub stage: vk::ShaderStageFlags,
    pub entry_point: &'static CStr,
    pub path: PathBuf,
}
impl GfxShaderStageInfo {
    #[inline]
    pub fn path(&self) -> &Path {
        &self.path
    }
}
