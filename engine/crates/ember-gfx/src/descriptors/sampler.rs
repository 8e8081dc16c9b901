use anyhow::Context;
use ash::vk;

use crate::{foundation::debug_messenger::DebugType, gfx::Gfx};

pub struct GfxSamplerCreateInfo {
    inner: vk::SamplerCreateInfo<'static>,
}

impl Default for GfxSamplerCreateInfo {
    fn default() -> Self {
        let sampler_info = vk::SamplerCreateInfo::default()
            .mag_filter(vk::Filter::LINEAR)
            .min_filter(vk::Filter::LINEAR)
            .address_mode_u(vk::SamplerAddressMode::REPEAT)
            .address_mode_v(vk::SamplerAddressMode::REPEAT)
            .address_mode_w(vk::SamplerAddressMode::REPEAT)
            .anisotropy_enable(false)
            .max_anisotropy(1.0)
            .border_color(vk::BorderColor::INT_OPAQUE_BLACK)
            .unnormalized_coordinates(false)
            .compare_enable(false)
            .compare_op(vk::CompareOp::ALWAYS)
            .mipmap_mode(vk::SamplerMipmapMode::LINEAR)
            .mip_lod_bias(0.0)
            .min_lod(0.0)
            .max_lod(vk::LOD_CLAMP_NONE);

        Self { inner: sampler_info }
    }
}

impl GfxSamplerCreateInfo {
    /// 默认配置：linear，repeat，使用所有 mip
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    /// 材质贴图使用的采样器：开启各向异性过滤
    pub fn new_material(max_anisotropy: f32) -> Self {
        let mut info = Self::default();
        info.inner = info.inner.anisotropy_enable(max_anisotropy > 1.0).max_anisotropy(max_anisotropy.max(1.0));
        info
    }

    /// attachment 和 shadow map 使用的采样器：nearest，clamp，不使用 mip
    pub fn new_attachment() -> Self {
        let mut info = Self::default();
        info.inner = info
            .inner
            .mag_filter(vk::Filter::NEAREST)
            .min_filter(vk::Filter::NEAREST)
            .mipmap_mode(vk::SamplerMipmapMode::NEAREST)
            .address_mode_u(vk::SamplerAddressMode::CLAMP_TO_EDGE)
            .address_mode_v(vk::SamplerAddressMode::CLAMP_TO_EDGE)
            .address_mode_w(vk::SamplerAddressMode::CLAMP_TO_EDGE)
            .max_lod(0.0);
        info
    }
}

pub struct GfxSampler {
    handle: vk::Sampler,
}
impl DebugType for GfxSampler {
    fn debug_type_name() -> &'static str {
        "GfxSampler"
    }

    fn vk_handle(&self) -> impl vk::Handle {
        self.handle
    }
}

impl GfxSampler {
    #[inline]
    pub fn new(info: &GfxSamplerCreateInfo, debug_name: &str) -> anyhow::Result<Self> {
        let gfx_device = Gfx::get().gfx_device();
        let handle = unsafe { gfx_device.create_sampler(&info.inner, None) }
            .with_context(|| format!("gfx: create sampler {}", debug_name))?;
        let sampler = Self { handle };
        gfx_device.set_debug_name(&sampler, debug_name);
        Ok(sampler)
    }

    #[inline]
    pub fn handle(&self) -> vk::Sampler {
        self.handle
    }

    pub fn destroy(self) {
        unsafe {
            Gfx::get().gfx_device().destroy_sampler(self.handle, None);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_material_sampler_anisotropy() {
        let info = GfxSamplerCreateInfo::new_material(16.0);
        assert_eq!(info.inner.anisotropy_enable, vk::TRUE);
        assert_eq!(info.inner.max_anisotropy, 16.0);

        let info = GfxSamplerCreateInfo::new_material(1.0);
        assert_eq!(info.inner.anisotropy_enable, vk::FALSE);
    }

    #[test]
    fn test_attachment_sampler_is_nearest_clamp() {
        let info = GfxSamplerCreateInfo::new_attachment();
        assert_eq!(info.inner.min_filter, vk::Filter::NEAREST);
        assert_eq!(info.inner.address_mode_u, vk::SamplerAddressMode::CLAMP_TO_EDGE);
        assert_eq!(info.inner.max_lod, 0.0);
    }
}
