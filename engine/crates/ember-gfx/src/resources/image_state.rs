//! image 的同步状态追踪
//!
//! 每个 image 记录最近一次使用它的 stage、access 以及当前 layout，
//! barrier 的 src 部分取自真实的状态，dst 部分取自下一次使用的状态。

use ash::vk;

use crate::commands::{barrier::GfxImageBarrier, command_buffer::GfxCommandBuffer};

/// image 某一次使用时的 stage, access, layout
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct GfxImageState {
    pub stage: vk::PipelineStageFlags2,
    pub access: vk::AccessFlags2,
    pub layout: vk::ImageLayout,
}

// 常用的状态
impl GfxImageState {
    /// 内容不需要保留
    pub const UNDEFINED: Self = Self::new(vk::PipelineStageFlags2::NONE, vk::AccessFlags2::NONE, vk::ImageLayout::UNDEFINED);

    pub const TRANSFER_DST: Self = Self::new(
        vk::PipelineStageFlags2::TRANSFER,
        vk::AccessFlags2::TRANSFER_WRITE,
        vk::ImageLayout::TRANSFER_DST_OPTIMAL,
    );

    pub const TRANSFER_SRC: Self = Self::new(
        vk::PipelineStageFlags2::TRANSFER,
        vk::AccessFlags2::TRANSFER_READ,
        vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
    );

    /// 在 fragment shader 中采样
    pub const SHADER_READ: Self = Self::new(
        vk::PipelineStageFlags2::FRAGMENT_SHADER,
        vk::AccessFlags2::SHADER_SAMPLED_READ,
        vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
    );

    pub const COLOR_ATTACHMENT: Self = Self::new(
        vk::PipelineStageFlags2::COLOR_ATTACHMENT_OUTPUT,
        vk::AccessFlags2::from_raw(
            vk::AccessFlags2::COLOR_ATTACHMENT_WRITE.as_raw() | vk::AccessFlags2::COLOR_ATTACHMENT_READ.as_raw(),
        ),
        vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
    );

    pub const DEPTH_ATTACHMENT: Self = Self::new(
        vk::PipelineStageFlags2::from_raw(
            vk::PipelineStageFlags2::EARLY_FRAGMENT_TESTS.as_raw()
                | vk::PipelineStageFlags2::LATE_FRAGMENT_TESTS.as_raw(),
        ),
        vk::AccessFlags2::from_raw(
            vk::AccessFlags2::DEPTH_STENCIL_ATTACHMENT_WRITE.as_raw()
                | vk::AccessFlags2::DEPTH_STENCIL_ATTACHMENT_READ.as_raw(),
        ),
        vk::ImageLayout::DEPTH_ATTACHMENT_OPTIMAL,
    );

    pub const PRESENT: Self =
        Self::new(vk::PipelineStageFlags2::BOTTOM_OF_PIPE, vk::AccessFlags2::NONE, vk::ImageLayout::PRESENT_SRC_KHR);

    pub const fn new(stage: vk::PipelineStageFlags2, access: vk::AccessFlags2, layout: vk::ImageLayout) -> Self {
        Self { stage, access, layout }
    }

    /// access 中是否包含写操作
    pub fn has_write(&self) -> bool {
        const WRITE_ACCESS: vk::AccessFlags2 = vk::AccessFlags2::from_raw(
            vk::AccessFlags2::SHADER_WRITE.as_raw()
                | vk::AccessFlags2::SHADER_STORAGE_WRITE.as_raw()
                | vk::AccessFlags2::COLOR_ATTACHMENT_WRITE.as_raw()
                | vk::AccessFlags2::DEPTH_STENCIL_ATTACHMENT_WRITE.as_raw()
                | vk::AccessFlags2::TRANSFER_WRITE.as_raw()
                | vk::AccessFlags2::HOST_WRITE.as_raw()
                | vk::AccessFlags2::MEMORY_WRITE.as_raw(),
        );
        self.access.intersects(WRITE_ACCESS)
    }
}

/// 计算从 current 到 next 所需的 barrier
///
/// layout 不变且两次都是只读访问时，不需要 barrier
pub fn compute_image_barrier(
    image: vk::Image,
    aspect: vk::ImageAspectFlags,
    current: GfxImageState,
    next: GfxImageState,
) -> Option<GfxImageBarrier> {
    if current.layout == next.layout && !current.has_write() && !next.has_write() {
        return None;
    }

    Some(
        GfxImageBarrier::new()
            .image(image)
            .image_aspect_flag(aspect)
            .layout_transfer(current.layout, next.layout)
            .src_mask(current.stage, current.access)
            .dst_mask(next.stage, next.access),
    )
}

/// 带有状态追踪的 image 句柄，不负责 image 的内存
///
/// 自己创建的 image 以及 swapchain image 都通过它来记录 layout
#[derive(Clone, Debug)]
pub struct GfxTrackedImage {
    image: vk::Image,
    aspect: vk::ImageAspectFlags,
    current: GfxImageState,
}

impl GfxTrackedImage {
    pub fn new(image: vk::Image, aspect: vk::ImageAspectFlags, initial: GfxImageState) -> Self {
        Self {
            image,
            aspect,
            current: initial,
        }
    }

    #[inline]
    pub fn image(&self) -> vk::Image {
        self.image
    }

    #[inline]
    pub fn current(&self) -> GfxImageState {
        self.current
    }

    /// 生成从 expected 到 next 的 barrier，并更新当前状态
    ///
    /// expected 为 UNDEFINED 表示丢弃之前的内容，此时不检查真实的 layout；
    /// 否则 expected.layout 必须和记录的 layout 一致
    pub fn plan_transition(&mut self, expected: GfxImageState, next: GfxImageState) -> Option<GfxImageBarrier> {
        let discard = expected.layout == vk::ImageLayout::UNDEFINED;
        debug_assert!(
            discard || self.current.layout == expected.layout,
            "image {:?} expected layout {:?}, but it is {:?}",
            self.image,
            expected.layout,
            self.current.layout
        );
        if !discard && self.current.layout != expected.layout {
            log::error!(
                "image {:?} expected layout {:?}, but it is {:?}",
                self.image,
                expected.layout,
                self.current.layout
            );
        }

        let mut src = self.current;
        if discard {
            src.layout = vk::ImageLayout::UNDEFINED;
        }
        self.current = next;

        // discard 时即使 layout 相同也需要等待之前的写入完成
        if discard && next.layout != vk::ImageLayout::UNDEFINED {
            return Some(
                GfxImageBarrier::new()
                    .image(self.image)
                    .image_aspect_flag(self.aspect)
                    .layout_transfer(vk::ImageLayout::UNDEFINED, next.layout)
                    .src_mask(src.stage, src.access)
                    .dst_mask(next.stage, next.access),
            );
        }
        compute_image_barrier(self.image, self.aspect, src, next)
    }

    /// 在 cmd 中录制状态转换
    pub fn transition(&mut self, cmd: &GfxCommandBuffer, expected: GfxImageState, next: GfxImageState) {
        if let Some(barrier) = self.plan_transition(expected, next) {
            cmd.image_memory_barrier(vk::DependencyFlags::empty(), std::slice::from_ref(&barrier));
        }
    }

    /// 在外部已经改变了 image 状态后（例如 swapchain 重建），直接覆盖记录
    pub fn reset_state(&mut self, state: GfxImageState) {
        self.current = state;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_to_read_same_layout_needs_no_barrier() {
        let barrier = compute_image_barrier(
            vk::Image::null(),
            vk::ImageAspectFlags::COLOR,
            GfxImageState::SHADER_READ,
            GfxImageState::SHADER_READ,
        );
        assert!(barrier.is_none());
    }

    #[test]
    fn test_write_after_write_needs_barrier() {
        let barrier = compute_image_barrier(
            vk::Image::null(),
            vk::ImageAspectFlags::COLOR,
            GfxImageState::COLOR_ATTACHMENT,
            GfxImageState::COLOR_ATTACHMENT,
        );
        assert!(barrier.is_some());
    }

    #[test]
    fn test_barrier_takes_src_from_current_state() {
        let barrier = compute_image_barrier(
            vk::Image::null(),
            vk::ImageAspectFlags::DEPTH,
            GfxImageState::DEPTH_ATTACHMENT,
            GfxImageState::SHADER_READ,
        )
        .unwrap();
        let inner = barrier.inner();
        assert_eq!(inner.old_layout, vk::ImageLayout::DEPTH_ATTACHMENT_OPTIMAL);
        assert_eq!(inner.new_layout, vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL);
        assert_eq!(inner.src_stage_mask, GfxImageState::DEPTH_ATTACHMENT.stage);
        assert_eq!(inner.dst_access_mask, vk::AccessFlags2::SHADER_SAMPLED_READ);
        assert_eq!(inner.subresource_range.aspect_mask, vk::ImageAspectFlags::DEPTH);
    }

    #[test]
    fn test_tracked_image_updates_state() {
        let mut image =
            GfxTrackedImage::new(vk::Image::null(), vk::ImageAspectFlags::COLOR, GfxImageState::UNDEFINED);
        let barrier = image.plan_transition(GfxImageState::UNDEFINED, GfxImageState::COLOR_ATTACHMENT).unwrap();
        assert_eq!(barrier.inner().old_layout, vk::ImageLayout::UNDEFINED);
        assert_eq!(image.current(), GfxImageState::COLOR_ATTACHMENT);

        let barrier = image.plan_transition(GfxImageState::COLOR_ATTACHMENT, GfxImageState::SHADER_READ).unwrap();
        assert_eq!(barrier.inner().old_layout, vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL);
        assert_eq!(image.current(), GfxImageState::SHADER_READ);
    }

    #[test]
    fn test_discard_keeps_waiting_on_previous_write() {
        let mut image =
            GfxTrackedImage::new(vk::Image::null(), vk::ImageAspectFlags::COLOR, GfxImageState::SHADER_READ);
        image.reset_state(GfxImageState::COLOR_ATTACHMENT);
        let barrier = image.plan_transition(GfxImageState::UNDEFINED, GfxImageState::COLOR_ATTACHMENT).unwrap();
        assert_eq!(barrier.inner().old_layout, vk::ImageLayout::UNDEFINED);
        assert_eq!(barrier.inner().src_stage_mask, vk::PipelineStageFlags2::COLOR_ATTACHMENT_OUTPUT);
    }

    #[test]
    #[should_panic]
    #[cfg(debug_assertions)]
    fn test_unexpected_layout_asserts() {
        let mut image =
            GfxTrackedImage::new(vk::Image::null(), vk::ImageAspectFlags::COLOR, GfxImageState::SHADER_READ);
        image.plan_transition(GfxImageState::TRANSFER_DST, GfxImageState::SHADER_READ);
    }
}
