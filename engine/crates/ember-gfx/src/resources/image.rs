use anyhow::Context;
use ash::vk;
use ash::vk::Handle;
use vk_mem::{Alloc, Allocation};

use crate::{
    commands::{barrier::GfxImageBarrier, command_buffer::GfxCommandBuffer},
    foundation::debug_messenger::DebugType,
    gfx::Gfx,
    resources::buffer::GfxBuffer,
};

/// Vulkan 格式相关的工具类
pub struct VulkanFormatUtils;
impl VulkanFormatUtils {
    /// 计算指定 Vulkan 格式下每个像素需要的字节数
    ///
    /// 只覆盖引擎中会用到的格式，其余返回 None
    pub fn pixel_size_in_bytes(format: vk::Format) -> Option<usize> {
        match format {
            vk::Format::R8_UNORM => Some(1),
            vk::Format::R8G8B8A8_UNORM | vk::Format::R8G8B8A8_SRGB | vk::Format::B8G8R8A8_UNORM => Some(4),
            vk::Format::B8G8R8A8_SRGB | vk::Format::D32_SFLOAT => Some(4),
            vk::Format::R16G16B16A16_SFLOAT => Some(8),
            vk::Format::R32G32B32A32_SFLOAT => Some(16),
            _ => None,
        }
    }

    /// 完整 mip chain 的层数：floor(log2(max(w, h))) + 1
    #[inline]
    pub fn mip_level_count(width: u32, height: u32) -> u32 {
        let max_dim = width.max(height).max(1);
        u32::BITS - max_dim.leading_zeros()
    }
}

/// Image 来源枚举
pub enum ImageSource {
    /// 由 VMA 分配的 Image
    Allocated(Allocation),
    /// 外部 Image（例如 Swapchain Image），不管理其内存生命周期
    External,
}

pub struct GfxImage {
    handle: vk::Image,
    source: ImageSource,

    extent: vk::Extent3D,
    format: vk::Format,
    mip_levels: u32,

    name: String,
}
// getter
impl GfxImage {
    #[inline]
    pub fn width(&self) -> u32 {
        self.extent.width
    }

    #[inline]
    pub fn height(&self) -> u32 {
        self.extent.height
    }

    #[inline]
    pub fn extent_2d(&self) -> vk::Extent2D {
        vk::Extent2D {
            width: self.extent.width,
            height: self.extent.height,
        }
    }

    #[inline]
    pub fn handle(&self) -> vk::Image {
        self.handle
    }

    #[inline]
    pub fn format(&self) -> vk::Format {
        self.format
    }

    #[inline]
    pub fn mip_levels(&self) -> u32 {
        self.mip_levels
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }
}
// new & init
impl GfxImage {
    pub fn new(
        image_info: &GfxImageCreateInfo,
        alloc_info: &vk_mem::AllocationCreateInfo,
        debug_name: &str,
    ) -> anyhow::Result<Self> {
        let allocator = Gfx::get().allocator();
        let gfx_device = Gfx::get().gfx_device();
        let (image, alloc) = unsafe { allocator.create_image(&image_info.as_info(), alloc_info) }
            .with_context(|| format!("gfx: create image {}", debug_name))?;
        let image = Self {
            handle: image,
            source: ImageSource::Allocated(alloc),
            extent: image_info.inner.extent,
            format: image_info.inner.format,
            mip_levels: image_info.inner.mip_levels,

            name: debug_name.to_string(),
        };
        gfx_device.set_debug_name(&image, debug_name);
        Ok(image)
    }

    /// 在 device memory 上创建一张 2D image，用于 attachment 等
    pub fn new_2d_device(
        extent: vk::Extent2D,
        format: vk::Format,
        usage: vk::ImageUsageFlags,
        debug_name: &str,
    ) -> anyhow::Result<Self> {
        Self::new(
            &GfxImageCreateInfo::new_image_2d_info(extent, format, usage),
            &vk_mem::AllocationCreateInfo {
                usage: vk_mem::MemoryUsage::AutoPreferDevice,
                ..Default::default()
            },
            debug_name,
        )
    }

    /// 包装外部的 image，例如 swapchain image
    pub fn from_external(handle: vk::Image, extent: vk::Extent2D, format: vk::Format, debug_name: &str) -> Self {
        let image = Self {
            handle,
            source: ImageSource::External,
            extent: extent.into(),
            format,
            mip_levels: 1,
            name: debug_name.to_string(),
        };
        Gfx::get().gfx_device().set_debug_name(&image, debug_name);
        image
    }

    /// 根据 RGBA8 的 data 创建带有完整 mip chain 的 image，最终处于 SHADER_READ_ONLY_OPTIMAL
    ///
    /// 通过 one_time_exec 同步完成上传，返回时数据已经可用
    pub fn from_rgba8_with_mips(
        width: u32,
        height: u32,
        format: vk::Format,
        data: &[u8],
        name: impl AsRef<str>,
    ) -> anyhow::Result<Self> {
        let _span = tracy_client::span!("GfxImage::from_rgba8_with_mips");
        let name = name.as_ref();

        // 格式不支持线性 blit 时，只保留 mip 0
        let supports_linear_blit = !Gfx::get()
            .find_supported_format(
                &[format],
                vk::ImageTiling::OPTIMAL,
                vk::FormatFeatureFlags::SAMPLED_IMAGE_FILTER_LINEAR
                    | vk::FormatFeatureFlags::BLIT_SRC
                    | vk::FormatFeatureFlags::BLIT_DST,
            )
            .is_empty();
        let mip_levels = if supports_linear_blit { VulkanFormatUtils::mip_level_count(width, height) } else { 1 };

        let image_create_info = GfxImageCreateInfo::new_image_2d_info(
            vk::Extent2D { width, height },
            format,
            vk::ImageUsageFlags::TRANSFER_SRC | vk::ImageUsageFlags::TRANSFER_DST | vk::ImageUsageFlags::SAMPLED,
        )
        .mip_levels(mip_levels);
        let mut image = Self::new(
            &image_create_info,
            &vk_mem::AllocationCreateInfo {
                usage: vk_mem::MemoryUsage::AutoPreferDevice,
                ..Default::default()
            },
            name,
        )?;

        let upload = (|| {
            let stage_buffer = image.create_stage_buffer(data)?;
            let exec_result = Gfx::get().one_time_exec(
                |cmd| {
                    image.record_copy_from_buffer(cmd, &stage_buffer);
                    image.record_generate_mips(cmd);
                },
                name,
            );
            stage_buffer.destroy();
            exec_result
        })();
        if let Err(e) = upload {
            image.destroy_mut();
            return Err(e);
        }

        Ok(image)
    }
}
impl DebugType for GfxImage {
    fn debug_type_name() -> &'static str {
        "GfxImage2D"
    }

    fn vk_handle(&self) -> impl vk::Handle {
        self.handle
    }
}
// destroy
impl GfxImage {
    pub fn destroy(mut self) {
        self.destroy_mut();
    }
    pub fn destroy_mut(&mut self) {
        if self.handle.is_null() {
            return;
        }
        log::debug!("Destroying GfxImage: {}", self.name);

        match &mut self.source {
            ImageSource::External => (),
            ImageSource::Allocated(allocation) => unsafe {
                Gfx::get().allocator().destroy_image(self.handle, allocation)
            },
        }
        self.handle = vk::Image::null();
    }
}
impl Drop for GfxImage {
    fn drop(&mut self) {
        debug_assert!(self.handle.is_null(), "GfxImage {} must be destroyed manually.", self.name);
    }
}
// tools
impl GfxImage {
    fn create_stage_buffer(&self, data: &[u8]) -> anyhow::Result<GfxBuffer> {
        let pixel_size = VulkanFormatUtils::pixel_size_in_bytes(self.format)
            .with_context(|| format!("gfx: unsupported upload format {:?}", self.format))?;
        let expected = pixel_size * (self.width() * self.height()) as usize;
        anyhow::ensure!(
            data.len() == expected,
            "gfx: image {} expects {} bytes, got {}",
            self.name,
            expected,
            data.len()
        );

        let stage_buffer =
            GfxBuffer::new_stage_buffer(data.len() as vk::DeviceSize, format!("{}-stage-buffer", self.name))?;
        if let Err(e) = stage_buffer.transfer_data_by_mmap(data) {
            stage_buffer.destroy();
            return Err(e);
        }
        Ok(stage_buffer)
    }

    /// 所有 mip 转换到 TRANSFER_DST，并将 stage buffer 拷贝到 mip 0
    fn record_copy_from_buffer(&self, cmd: &GfxCommandBuffer, stage_buffer: &GfxBuffer) {
        let to_transfer_dst = GfxImageBarrier::new()
            .image(self.handle)
            .src_mask(vk::PipelineStageFlags2::TOP_OF_PIPE, vk::AccessFlags2::empty())
            .dst_mask(vk::PipelineStageFlags2::TRANSFER, vk::AccessFlags2::TRANSFER_WRITE)
            .layout_transfer(vk::ImageLayout::UNDEFINED, vk::ImageLayout::TRANSFER_DST_OPTIMAL)
            .image_aspect_flag(vk::ImageAspectFlags::COLOR);
        cmd.image_memory_barrier(vk::DependencyFlags::empty(), std::slice::from_ref(&to_transfer_dst));

        let buffer_image_copy = vk::BufferImageCopy2::default()
            .buffer_offset(0)
            .buffer_row_length(0)
            .buffer_image_height(0)
            .image_offset(vk::Offset3D { x: 0, y: 0, z: 0 })
            .image_extent(self.extent)
            .image_subresource(vk::ImageSubresourceLayers {
                aspect_mask: vk::ImageAspectFlags::COLOR,
                mip_level: 0,
                base_array_layer: 0,
                layer_count: 1,
            });
        cmd.cmd_copy_buffer_to_image(
            &vk::CopyBufferToImageInfo2::default()
                .src_buffer(stage_buffer.vk_buffer())
                .dst_image(self.handle)
                .dst_image_layout(vk::ImageLayout::TRANSFER_DST_OPTIMAL)
                .regions(std::slice::from_ref(&buffer_image_copy)),
        );
    }

    /// 逐级 blit 生成 mip chain，结束后所有 mip 处于 SHADER_READ_ONLY_OPTIMAL
    fn record_generate_mips(&self, cmd: &GfxCommandBuffer) {
        let mut mip_width = self.width() as i32;
        let mut mip_height = self.height() as i32;

        for level in 1..self.mip_levels {
            // 上一级 mip 作为 blit 的源
            let src_barrier = GfxImageBarrier::new()
                .image(self.handle)
                .image_aspect_flag(vk::ImageAspectFlags::COLOR)
                .mip_levels(level - 1, 1)
                .src_mask(vk::PipelineStageFlags2::TRANSFER, vk::AccessFlags2::TRANSFER_WRITE)
                .dst_mask(vk::PipelineStageFlags2::TRANSFER, vk::AccessFlags2::TRANSFER_READ)
                .layout_transfer(vk::ImageLayout::TRANSFER_DST_OPTIMAL, vk::ImageLayout::TRANSFER_SRC_OPTIMAL);
            cmd.image_memory_barrier(vk::DependencyFlags::empty(), std::slice::from_ref(&src_barrier));

            let next_width = (mip_width / 2).max(1);
            let next_height = (mip_height / 2).max(1);
            let blit = vk::ImageBlit2::default()
                .src_subresource(vk::ImageSubresourceLayers {
                    aspect_mask: vk::ImageAspectFlags::COLOR,
                    mip_level: level - 1,
                    base_array_layer: 0,
                    layer_count: 1,
                })
                .src_offsets([vk::Offset3D::default(), vk::Offset3D { x: mip_width, y: mip_height, z: 1 }])
                .dst_subresource(vk::ImageSubresourceLayers {
                    aspect_mask: vk::ImageAspectFlags::COLOR,
                    mip_level: level,
                    base_array_layer: 0,
                    layer_count: 1,
                })
                .dst_offsets([vk::Offset3D::default(), vk::Offset3D { x: next_width, y: next_height, z: 1 }]);
            cmd.cmd_blit_image(
                &vk::BlitImageInfo2::default()
                    .src_image(self.handle)
                    .src_image_layout(vk::ImageLayout::TRANSFER_SRC_OPTIMAL)
                    .dst_image(self.handle)
                    .dst_image_layout(vk::ImageLayout::TRANSFER_DST_OPTIMAL)
                    .regions(std::slice::from_ref(&blit))
                    .filter(vk::Filter::LINEAR),
            );

            let read_barrier = GfxImageBarrier::new()
                .image(self.handle)
                .image_aspect_flag(vk::ImageAspectFlags::COLOR)
                .mip_levels(level - 1, 1)
                .src_mask(vk::PipelineStageFlags2::TRANSFER, vk::AccessFlags2::TRANSFER_READ)
                .dst_mask(vk::PipelineStageFlags2::FRAGMENT_SHADER, vk::AccessFlags2::SHADER_SAMPLED_READ)
                .layout_transfer(vk::ImageLayout::TRANSFER_SRC_OPTIMAL, vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL);
            cmd.image_memory_barrier(vk::DependencyFlags::empty(), std::slice::from_ref(&read_barrier));

            mip_width = next_width;
            mip_height = next_height;
        }

        // 最后一级 mip 只被写过
        let last_barrier = GfxImageBarrier::new()
            .image(self.handle)
            .image_aspect_flag(vk::ImageAspectFlags::COLOR)
            .mip_levels(self.mip_levels - 1, 1)
            .src_mask(vk::PipelineStageFlags2::TRANSFER, vk::AccessFlags2::TRANSFER_WRITE)
            .dst_mask(vk::PipelineStageFlags2::FRAGMENT_SHADER, vk::AccessFlags2::SHADER_SAMPLED_READ)
            .layout_transfer(vk::ImageLayout::TRANSFER_DST_OPTIMAL, vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL);
        cmd.image_memory_barrier(vk::DependencyFlags::empty(), std::slice::from_ref(&last_barrier));
    }
}

pub struct GfxImageCreateInfo {
    inner: vk::ImageCreateInfo<'static>,
}
impl GfxImageCreateInfo {
    #[inline]
    pub fn new_image_2d_info(extent: vk::Extent2D, format: vk::Format, usage: vk::ImageUsageFlags) -> Self {
        Self {
            inner: vk::ImageCreateInfo {
                image_type: vk::ImageType::TYPE_2D,
                format,
                extent: extent.into(),
                mip_levels: 1,
                array_layers: 1,
                samples: vk::SampleCountFlags::TYPE_1,
                tiling: vk::ImageTiling::OPTIMAL,
                usage,
                sharing_mode: vk::SharingMode::EXCLUSIVE,
                // 这里只能是 UNDEFINED 或者 PREINITIALIZED
                initial_layout: vk::ImageLayout::UNDEFINED,
                ..Default::default()
            },
        }
    }

    #[inline]
    pub fn as_info(&self) -> vk::ImageCreateInfo<'_> {
        self.inner
    }

    // builder
    #[inline]
    pub fn mip_levels(mut self, mip_levels: u32) -> Self {
        self.inner.mip_levels = mip_levels.max(1);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mip_level_count() {
        assert_eq!(VulkanFormatUtils::mip_level_count(1, 1), 1);
        assert_eq!(VulkanFormatUtils::mip_level_count(2, 1), 2);
        assert_eq!(VulkanFormatUtils::mip_level_count(1024, 512), 11);
        assert_eq!(VulkanFormatUtils::mip_level_count(1000, 10), 10);
        assert_eq!(VulkanFormatUtils::mip_level_count(0, 0), 1);
    }

    #[test]
    fn test_pixel_size() {
        assert_eq!(VulkanFormatUtils::pixel_size_in_bytes(vk::Format::R8G8B8A8_UNORM), Some(4));
        assert_eq!(VulkanFormatUtils::pixel_size_in_bytes(vk::Format::R16G16B16A16_SFLOAT), Some(8));
        assert_eq!(VulkanFormatUtils::pixel_size_in_bytes(vk::Format::BC7_SRGB_BLOCK), None);
    }

    #[test]
    fn test_create_info_mip_levels() {
        let info = GfxImageCreateInfo::new_image_2d_info(
            vk::Extent2D { width: 4, height: 4 },
            vk::Format::R8G8B8A8_UNORM,
            vk::ImageUsageFlags::SAMPLED,
        )
        .mip_levels(0);
        assert_eq!(info.as_info().mip_levels, 1);
        assert_eq!(info.as_info().extent.depth, 1);
    }
}
