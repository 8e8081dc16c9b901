use ash::vk;

/// attachment 在 render pass 开始时的处理方式
#[derive(Clone, Copy)]
pub enum GfxAttachmentLoad {
    /// 使用给定的值清空
    Clear(vk::ClearValue),
    /// 保留之前的内容
    Load,
    /// 内容会被完全覆盖
    DontCare,
}

impl GfxAttachmentLoad {
    pub fn clear_color(color: [f32; 4]) -> Self {
        Self::Clear(vk::ClearValue {
            color: vk::ClearColorValue { float32: color },
        })
    }

    /// depth 为 1 表示无限远
    pub fn clear_depth(depth: f32) -> Self {
        Self::Clear(vk::ClearValue {
            depth_stencil: vk::ClearDepthStencilValue { depth, stencil: 0 },
        })
    }

    fn load_op(&self) -> vk::AttachmentLoadOp {
        match self {
            Self::Clear(_) => vk::AttachmentLoadOp::CLEAR,
            Self::Load => vk::AttachmentLoadOp::LOAD,
            Self::DontCare => vk::AttachmentLoadOp::DONT_CARE,
        }
    }

    fn clear_value(&self) -> vk::ClearValue {
        match self {
            Self::Clear(value) => *value,
            _ => vk::ClearValue::default(),
        }
    }
}

/// dynamic rendering 所需的 attachment 信息
pub struct GfxRenderingInfo {
    color_attach_info: Vec<vk::RenderingAttachmentInfo<'static>>,
    depth_attach_info: Option<vk::RenderingAttachmentInfo<'static>>,
    range: vk::Rect2D,
}
impl GfxRenderingInfo {
    pub fn new(extent: vk::Extent2D) -> Self {
        Self {
            color_attach_info: vec![],
            depth_attach_info: None,
            range: vk::Rect2D {
                offset: vk::Offset2D::default(),
                extent,
            },
        }
    }

    /// builder
    pub fn color(mut self, image_view: vk::ImageView, load: GfxAttachmentLoad) -> Self {
        self.color_attach_info.push(
            vk::RenderingAttachmentInfo::default()
                .image_layout(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL)
                .image_view(image_view)
                .load_op(load.load_op())
                .store_op(vk::AttachmentStoreOp::STORE)
                .clear_value(load.clear_value()),
        );
        self
    }

    /// builder
    ///
    /// store 为 false 时，render pass 之后 depth 的内容不再需要
    pub fn depth(mut self, image_view: vk::ImageView, load: GfxAttachmentLoad, store: bool) -> Self {
        self.depth_attach_info = Some(
            vk::RenderingAttachmentInfo::default()
                .image_layout(vk::ImageLayout::DEPTH_ATTACHMENT_OPTIMAL)
                .image_view(image_view)
                .load_op(load.load_op())
                .store_op(if store { vk::AttachmentStoreOp::STORE } else { vk::AttachmentStoreOp::DONT_CARE })
                .clear_value(load.clear_value()),
        );
        self
    }

    pub fn rendering_info(&self) -> vk::RenderingInfo<'_> {
        let mut info = vk::RenderingInfo::default()
            .layer_count(1)
            .render_area(self.range)
            .color_attachments(&self.color_attach_info);
        if let Some(depth_attach) = &self.depth_attach_info {
            info = info.depth_attachment(depth_attach)
        }
        info
    }

    #[inline]
    pub fn color_count(&self) -> usize {
        self.color_attach_info.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rendering_info_attachments() {
        let info = GfxRenderingInfo::new(vk::Extent2D { width: 64, height: 32 })
            .color(vk::ImageView::null(), GfxAttachmentLoad::clear_color([0.0, 0.0, 0.0, 1.0]))
            .color(vk::ImageView::null(), GfxAttachmentLoad::Load)
            .depth(vk::ImageView::null(), GfxAttachmentLoad::Load, false);
        assert_eq!(info.color_count(), 2);

        let raw = info.rendering_info();
        assert_eq!(raw.color_attachment_count, 2);
        assert_eq!(raw.render_area.extent.width, 64);
        assert!(!raw.p_depth_attachment.is_null());
        assert_eq!(info.color_attach_info[0].load_op, vk::AttachmentLoadOp::CLEAR);
        assert_eq!(info.color_attach_info[1].load_op, vk::AttachmentLoadOp::LOAD);
        assert_eq!(info.depth_attach_info.unwrap().store_op, vk::AttachmentStoreOp::DONT_CARE);
    }

    #[test]
    fn test_clear_depth_value() {
        let load = GfxAttachmentLoad::clear_depth(1.0);
        let value = load.clear_value();
        assert_eq!(unsafe { value.depth_stencil.depth }, 1.0);
    }
}
