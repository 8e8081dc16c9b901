use anyhow::Context;
use ash::vk;
use ash::vk::Handle;

use crate::{foundation::debug_messenger::DebugType, gfx::Gfx};

pub struct GfxImageView {
    handle: vk::ImageView,

    desc: GfxImageViewDesc,

    name: String,
}
impl DebugType for GfxImageView {
    fn debug_type_name() -> &'static str {
        "GfxImage2DView"
    }

    fn vk_handle(&self) -> impl vk::Handle {
        self.handle
    }
}
// new & init
impl GfxImageView {
    pub fn new(image: vk::Image, view_desc: GfxImageViewDesc, name: impl AsRef<str>) -> anyhow::Result<Self> {
        let gfx_device = Gfx::get().gfx_device();

        let info = vk::ImageViewCreateInfo {
            image,
            view_type: vk::ImageViewType::TYPE_2D,
            format: view_desc.format,
            subresource_range: vk::ImageSubresourceRange {
                aspect_mask: view_desc.aspect_mask,
                base_mip_level: 0,
                level_count: view_desc.mip_levels,
                base_array_layer: 0,
                layer_count: 1,
            },
            ..Default::default()
        };

        let handle = unsafe { gfx_device.create_image_view(&info, None) }
            .with_context(|| format!("gfx: create image view {}", name.as_ref()))?;
        let image_view = Self {
            handle,

            desc: view_desc,

            name: name.as_ref().to_string(),
        };
        gfx_device.set_debug_name(&image_view, &name);
        Ok(image_view)
    }
}
// destory
impl GfxImageView {
    pub fn destroy(mut self) {
        self.destroy_mut();
    }
    pub fn destroy_mut(&mut self) {
        if self.handle.is_null() {
            return;
        }
        unsafe {
            let gfx_device = Gfx::get().gfx_device();
            gfx_device.destroy_image_view(self.handle, None);
        }
        self.handle = vk::ImageView::null();
    }
}
impl Drop for GfxImageView {
    fn drop(&mut self) {
        debug_assert!(self.handle.is_null(), "GfxImageView {} must be destroyed manually.", self.name);
    }
}
// getters
impl GfxImageView {
    #[inline]
    pub fn handle(&self) -> vk::ImageView {
        self.handle
    }
    #[inline]
    pub fn desc(&self) -> &GfxImageViewDesc {
        &self.desc
    }
}
impl std::fmt::Display for GfxImageView {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Image2DView({}, {:?})", self.name, self.handle)
    }
}

/// 2D image view 的描述，总是从 mip 0 开始
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct GfxImageViewDesc {
    /// format 可以基于 vk::Image 重解释
    pub(crate) format: vk::Format,
    pub(crate) aspect_mask: vk::ImageAspectFlags,
    pub(crate) mip_levels: u32,
}
impl GfxImageViewDesc {
    pub fn new_2d(format: vk::Format, aspect: vk::ImageAspectFlags) -> Self {
        Self {
            format,
            aspect_mask: aspect,
            mip_levels: 1,
        }
    }

    /// builder
    #[inline]
    pub fn mip_levels(mut self, mip_levels: u32) -> Self {
        self.mip_levels = mip_levels.max(1);
        self
    }

    #[inline]
    pub fn format(&self) -> vk::Format {
        self.format
    }

    #[inline]
    pub fn aspect_mask(&self) -> vk::ImageAspectFlags {
        self.aspect_mask
    }
}
