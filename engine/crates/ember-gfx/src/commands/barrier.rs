use ash::vk;

/// 便捷创建 image memory barrier 的结构体
#[derive(Clone, Copy)]
pub struct GfxImageBarrier {
    inner: vk::ImageMemoryBarrier2<'static>,
}

impl Default for GfxImageBarrier {
    fn default() -> Self {
        Self {
            inner: vk::ImageMemoryBarrier2 {
                old_layout: vk::ImageLayout::UNDEFINED,
                new_layout: vk::ImageLayout::UNDEFINED,
                src_queue_family_index: vk::QUEUE_FAMILY_IGNORED,
                dst_queue_family_index: vk::QUEUE_FAMILY_IGNORED,
                subresource_range: vk::ImageSubresourceRange {
                    aspect_mask: vk::ImageAspectFlags::empty(),
                    base_array_layer: 0,
                    layer_count: 1,
                    base_mip_level: 0,
                    level_count: vk::REMAINING_MIP_LEVELS,
                },
                ..Default::default()
            },
        }
    }
}

impl GfxImageBarrier {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn inner(&self) -> &vk::ImageMemoryBarrier2<'_> {
        &self.inner
    }

    /// builder
    #[inline]
    pub fn layout_transfer(mut self, old_layout: vk::ImageLayout, new_layout: vk::ImageLayout) -> Self {
        self.inner.old_layout = old_layout;
        self.inner.new_layout = new_layout;
        self
    }

    /// builder
    #[inline]
    pub fn src_mask(mut self, src_stage_mask: vk::PipelineStageFlags2, src_access_mask: vk::AccessFlags2) -> Self {
        self.inner.src_stage_mask = src_stage_mask;
        self.inner.src_access_mask = src_access_mask;
        self
    }

    /// builder
    #[inline]
    pub fn dst_mask(mut self, dst_stage_mask: vk::PipelineStageFlags2, dst_access_mask: vk::AccessFlags2) -> Self {
        self.inner.dst_stage_mask = dst_stage_mask;
        self.inner.dst_access_mask = dst_access_mask;
        self
    }

    /// builder
    /// layer 使用默认值，默认覆盖所有 mip level
    #[inline]
    pub fn image_aspect_flag(mut self, aspect_mask: vk::ImageAspectFlags) -> Self {
        self.inner.subresource_range.aspect_mask = aspect_mask;
        self
    }

    /// builder
    /// 只作用于 [base_mip_level, base_mip_level + level_count) 范围的 mip
    #[inline]
    pub fn mip_levels(mut self, base_mip_level: u32, level_count: u32) -> Self {
        self.inner.subresource_range.base_mip_level = base_mip_level;
        self.inner.subresource_range.level_count = level_count;
        self
    }

    /// builder
    #[inline]
    pub fn image(mut self, image: vk::Image) -> Self {
        self.inner.image = image;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_image_barrier_defaults_cover_all_mips() {
        let barrier = GfxImageBarrier::new();
        let range = barrier.inner().subresource_range;
        assert_eq!(range.base_mip_level, 0);
        assert_eq!(range.level_count, vk::REMAINING_MIP_LEVELS);
        assert_eq!(barrier.inner().src_queue_family_index, vk::QUEUE_FAMILY_IGNORED);
    }

    #[test]
    fn test_image_barrier_builder() {
        let barrier = GfxImageBarrier::new()
            .layout_transfer(vk::ImageLayout::UNDEFINED, vk::ImageLayout::TRANSFER_DST_OPTIMAL)
            .src_mask(vk::PipelineStageFlags2::TOP_OF_PIPE, vk::AccessFlags2::NONE)
            .dst_mask(vk::PipelineStageFlags2::TRANSFER, vk::AccessFlags2::TRANSFER_WRITE)
            .image_aspect_flag(vk::ImageAspectFlags::COLOR)
            .mip_levels(2, 1);
        let inner = barrier.inner();
        assert_eq!(inner.new_layout, vk::ImageLayout::TRANSFER_DST_OPTIMAL);
        assert_eq!(inner.dst_access_mask, vk::AccessFlags2::TRANSFER_WRITE);
        assert_eq!(inner.subresource_range.base_mip_level, 2);
        assert_eq!(inner.subresource_range.level_count, 1);
        assert_eq!(inner.subresource_range.aspect_mask, vk::ImageAspectFlags::COLOR);
    }
}
