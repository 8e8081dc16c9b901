use ash::vk;
use ember_gfx::basic::color::LabelColor;
use ember_gfx::pipelines::rendering_info::{GfxAttachmentLoad, GfxRenderingInfo};
use ember_gfx::resources::structured_buffer::GfxStructuredBuffer;
use ember_render_interface::frame_counter::{FrameCounter, FrameLabel};
use ember_render_interface::gpu_data::DebugLineVertex;
use glam::{Vec3, Vec4};

use crate::passes::PassContext;
use crate::pipeline_context::PassKind;

/// 每帧最多的线段数量
pub const MAX_DEBUG_LINES: usize = 64 * 1024;

/// 一帧内排队的线段，每条线段两个顶点
#[derive(Default)]
pub struct DebugLineQueue {
    vertices: Vec<DebugLineVertex>,
    overflow_logged: bool,
}
impl DebugLineQueue {
    /// 超过容量时丢弃，每帧只记录一次日志
    pub fn push(&mut self, from: Vec3, to: Vec3, color: Vec4) -> bool {
        if self.line_count() >= MAX_DEBUG_LINES {
            if !self.overflow_logged {
                log::warn!("debug lines exceed {}, extra lines are dropped", MAX_DEBUG_LINES);
                self.overflow_logged = true;
            }
            return false;
        }
        let color = color.to_array();
        self.vertices.push(DebugLineVertex {
            position: from.to_array(),
            color,
        });
        self.vertices.push(DebugLineVertex {
            position: to.to_array(),
            color,
        });
        true
    }

    #[inline]
    pub fn vertices(&self) -> &[DebugLineVertex] {
        &self.vertices
    }

    #[inline]
    pub fn line_count(&self) -> usize {
        self.vertices.len() / 2
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.vertices.is_empty()
    }

    pub fn clear(&mut self) {
        self.vertices.clear();
        self.overflow_logged = false;
    }
}

/// 在 tone-map 之后直接绘制到 swapchain image 上，不做深度测试
pub struct DebugLinePass {
    queue: DebugLineQueue,
    /// 本帧上传的顶点数量
    vertex_count: u32,
    buffers: [GfxStructuredBuffer<DebugLineVertex>; FrameCounter::fif_count()],
}
// new & init
impl DebugLinePass {
    pub fn new() -> anyhow::Result<Self> {
        let mut buffers = Vec::with_capacity(FrameCounter::fif_count());
        for frame_label in FrameCounter::frame_labels() {
            match GfxStructuredBuffer::new(
                MAX_DEBUG_LINES * 2,
                vk::BufferUsageFlags::VERTEX_BUFFER,
                format!("debug-line-{frame_label}"),
            ) {
                Ok(buffer) => buffers.push(buffer),
                Err(e) => {
                    buffers.into_iter().for_each(GfxStructuredBuffer::destroy);
                    return Err(e);
                }
            }
        }
        Ok(Self {
            queue: DebugLineQueue::default(),
            vertex_count: 0,
            buffers: buffers.try_into().map_err(|_| anyhow::anyhow!("debug line: buffer count mismatch"))?,
        })
    }
}
// tools
impl DebugLinePass {
    #[inline]
    pub fn queue_line(&mut self, from: Vec3, to: Vec3, color: Vec4) {
        self.queue.push(from, to, color);
    }

    #[inline]
    pub fn line_count(&self) -> usize {
        self.queue.line_count()
    }

    /// # Phase: Update
    pub fn pre_draw(&mut self, frame_label: FrameLabel) -> anyhow::Result<()> {
        self.vertex_count = self.queue.vertices().len() as u32;
        if self.vertex_count == 0 {
            return Ok(());
        }
        self.buffers[*frame_label].transfer_data_by_mmap(self.queue.vertices())
    }

    /// swapchain image 需要处于 COLOR_ATTACHMENT，保留 tone-map 的结果
    pub fn draw(&self, ctx: &PassContext, swapchain_view: vk::ImageView) {
        if self.vertex_count == 0 {
            return;
        }
        let _span = tracy_client::span!("DebugLinePass::draw");
        let cmd = ctx.cmd;
        cmd.begin_label("[debug-line-pass]", LabelColor::COLOR_PASS);

        let rendering_info = GfxRenderingInfo::new(ctx.extent).color(swapchain_view, GfxAttachmentLoad::Load);
        ctx.begin(PassKind::DebugLine, &rendering_info, ctx.extent);
        cmd.cmd_bind_vertex_buffers(0, &[self.buffers[*ctx.frame_label].vk_buffer()], &[0]);
        cmd.cmd_draw(self.vertex_count, 1, 0, 0);
        ctx.end();

        cmd.end_label();
    }

    /// # Phase: After Render
    pub fn post_draw(&mut self) {
        self.queue.clear();
        self.vertex_count = 0;
    }
}
// destroy
impl DebugLinePass {
    pub fn destroy(self) {
        for buffer in self.buffers {
            buffer.destroy();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_line_has_two_vertices() {
        let mut queue = DebugLineQueue::default();
        assert!(queue.push(Vec3::ZERO, Vec3::X, Vec4::ONE));
        assert_eq!(queue.line_count(), 1);
        assert_eq!(queue.vertices()[0].position, [0.0, 0.0, 0.0]);
        assert_eq!(queue.vertices()[1].position, [1.0, 0.0, 0.0]);
        assert_eq!(queue.vertices()[1].color, [1.0; 4]);
    }

    #[test]
    fn test_overflow_is_dropped() {
        let mut queue = DebugLineQueue::default();
        for _ in 0..MAX_DEBUG_LINES {
            assert!(queue.push(Vec3::ZERO, Vec3::Y, Vec4::ONE));
        }
        assert!(!queue.push(Vec3::ZERO, Vec3::Y, Vec4::ONE));
        assert_eq!(queue.line_count(), MAX_DEBUG_LINES);

        queue.clear();
        assert!(queue.is_empty());
        assert!(queue.push(Vec3::ZERO, Vec3::Y, Vec4::ONE));
    }
}
