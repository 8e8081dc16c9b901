use anyhow::Context;
use ash::vk;
use itertools::Itertools;

use crate::gfx::Gfx;
use crate::{
    basic::color::LabelColor,
    commands::{
        barrier::GfxImageBarrier,
        command_pool::GfxCommandPool,
    },
    foundation::debug_messenger::DebugType,
    pipelines::rendering_info::GfxRenderingInfo,
    resources::buffer::GfxBuffer,
};

/// 命令缓冲封装
///
/// 封装 Vulkan CommandBuffer，提供命令录制接口。
///
/// # 使用示例
/// ```ignore
/// let cmd = GfxCommandBuffer::new(&pool, "my-pass")?;
/// cmd.begin(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT, "my-pass")?;
/// cmd.cmd_bind_pipeline(vk::PipelineBindPoint::GRAPHICS, pipeline);
/// // 绘制命令...
/// cmd.end()?;
/// ```
#[derive(Clone)]
pub struct GfxCommandBuffer {
    vk_handle: vk::CommandBuffer,
    _command_pool_handle: vk::CommandPool,
}
// new & init
impl GfxCommandBuffer {
    pub fn new(command_pool: &GfxCommandPool, debug_name: &str) -> anyhow::Result<Self> {
        let info = vk::CommandBufferAllocateInfo::default()
            .command_pool(command_pool.handle())
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(1);

        let command_buffers = unsafe { Gfx::get().gfx_device().allocate_command_buffers(&info) }
            .with_context(|| format!("gfx: allocate command buffer {}", debug_name))?;
        let cmd_buffer = GfxCommandBuffer {
            vk_handle: command_buffers[0],
            _command_pool_handle: command_pool.handle(),
        };
        Gfx::get().gfx_device().set_debug_name(&cmd_buffer, debug_name);
        Ok(cmd_buffer)
    }
}
// Basic 命令
impl GfxCommandBuffer {
    /// 开始录制 command
    ///
    /// 自动设置 debug label
    #[inline]
    pub fn begin(&self, usage_flag: vk::CommandBufferUsageFlags, debug_label_name: &str) -> anyhow::Result<()> {
        unsafe {
            Gfx::get()
                .gfx_device()
                .begin_command_buffer(self.vk_handle, &vk::CommandBufferBeginInfo::default().flags(usage_flag))
        }
        .context("gfx: begin command buffer")?;
        self.begin_label(debug_label_name, LabelColor::COLOR_CMD);
        Ok(())
    }

    /// 结束录制 command
    ///
    /// 结束 debug label
    #[inline]
    pub fn end(&self) -> anyhow::Result<()> {
        self.end_label();
        unsafe { Gfx::get().gfx_device().end_command_buffer(self.vk_handle) }.context("gfx: end command buffer")
    }
}
// getters
impl GfxCommandBuffer {
    #[inline]
    pub fn vk_handle(&self) -> vk::CommandBuffer {
        self.vk_handle
    }
}
// 数据传输类型
impl GfxCommandBuffer {
    /// - command type: action
    /// - 支持的 queue：transfer，graphics，compute
    #[inline]
    pub fn cmd_copy_buffer(&self, src: &GfxBuffer, dst: &GfxBuffer, regions: &[vk::BufferCopy]) {
        unsafe {
            Gfx::get().gfx_device().cmd_copy_buffer(self.vk_handle, src.vk_buffer(), dst.vk_buffer(), regions);
        }
    }

    /// - command type: action
    /// - 支持的 queue：transfer，graphics，compute
    #[inline]
    pub fn cmd_copy_buffer_to_image(&self, copy_info: &vk::CopyBufferToImageInfo2) {
        unsafe { Gfx::get().gfx_device().cmd_copy_buffer_to_image2(self.vk_handle, copy_info) }
    }

    /// 用于生成 mip chain
    ///
    /// - command type: action
    /// - 支持的 queue：graphics
    #[inline]
    pub fn cmd_blit_image(&self, blit_info: &vk::BlitImageInfo2) {
        unsafe { Gfx::get().gfx_device().cmd_blit_image2(self.vk_handle, blit_info) }
    }

    /// - command type: state
    /// - 支持的 queue: graphics, compute
    #[inline]
    pub fn cmd_push_constants(
        &self,
        pipeline_layout: vk::PipelineLayout,
        stage: vk::ShaderStageFlags,
        offset: u32,
        data: &[u8],
    ) {
        unsafe {
            Gfx::get().gfx_device().cmd_push_constants(self.vk_handle, pipeline_layout, stage, offset, data);
        }
    }
}
// 绘制类型的命令
impl GfxCommandBuffer {
    /// - command type: action, state
    /// - supported queue types: graphics
    pub fn cmd_begin_rendering(&self, rendering_info: &GfxRenderingInfo) {
        let rendering_info = rendering_info.rendering_info();
        unsafe {
            Gfx::get().gfx_device().cmd_begin_rendering(self.vk_handle, &rendering_info);
        }
    }

    /// - command type: action, state
    /// - supported queue types: graphics
    #[inline]
    pub fn cmd_end_rendering(&self) {
        unsafe {
            Gfx::get().gfx_device().cmd_end_rendering(self.vk_handle);
        }
    }

    /// - command type: action
    /// - supported queue types: graphics
    ///
    /// 不使用 index buffer 的绘制，全屏三角形以及 debug line 使用
    #[inline]
    pub fn cmd_draw(&self, vertex_count: u32, instance_count: u32, first_vertex: u32, first_instance: u32) {
        unsafe {
            Gfx::get().gfx_device().cmd_draw(
                self.vk_handle,
                vertex_count,
                instance_count,
                first_vertex,
                first_instance,
            );
        }
    }

    /// 一次提交 draw_count 个 VkDrawIndexedIndirectCommand
    ///
    /// - command type: action
    /// - supported queue types: graphics
    #[inline]
    pub fn cmd_draw_indexed_indirect(&self, buffer: &GfxBuffer, offset: vk::DeviceSize, draw_count: u32, stride: u32) {
        unsafe {
            Gfx::get().gfx_device().cmd_draw_indexed_indirect(
                self.vk_handle,
                buffer.vk_buffer(),
                offset,
                draw_count,
                stride,
            );
        }
    }

    /// - command type: state
    /// - supported queue types: graphics, compute
    #[inline]
    pub fn bind_descriptor_sets(
        &self,
        bind_point: vk::PipelineBindPoint,
        pipeline_layout: vk::PipelineLayout,
        first_set: u32,
        descriptor_sets: &[vk::DescriptorSet],
        dynamic_offsets: Option<&[u32]>,
    ) {
        unsafe {
            Gfx::get().gfx_device().cmd_bind_descriptor_sets(
                self.vk_handle,
                bind_point,
                pipeline_layout,
                first_set,
                descriptor_sets,
                dynamic_offsets.unwrap_or(&[]),
            );
        }
    }

    /// - command type: state
    /// - supported queue types: graphics, compute
    #[inline]
    pub fn cmd_bind_pipeline(&self, bind_point: vk::PipelineBindPoint, pipeline: vk::Pipeline) {
        unsafe {
            Gfx::get().gfx_device().cmd_bind_pipeline(self.vk_handle, bind_point, pipeline);
        }
    }

    /// buffers 每个 vertex buffer 以及 offset
    /// - command type: state
    /// - supported queue types: graphics
    #[inline]
    pub fn cmd_bind_vertex_buffers(&self, first_bind: u32, buffers: &[vk::Buffer], offsets: &[vk::DeviceSize]) {
        unsafe {
            Gfx::get().gfx_device().cmd_bind_vertex_buffers(self.vk_handle, first_bind, buffers, offsets);
        }
    }

    /// - command type: state
    /// - supported queue types: graphics
    #[inline]
    pub fn cmd_bind_index_buffer(&self, buffer: &GfxBuffer, offset: vk::DeviceSize, index_type: vk::IndexType) {
        unsafe {
            Gfx::get().gfx_device().cmd_bind_index_buffer(self.vk_handle, buffer.vk_buffer(), offset, index_type);
        }
    }

    /// - command type: state
    /// - supported queue types: graphics
    #[inline]
    pub fn cmd_set_viewport(&self, first_viewport: u32, viewports: &[vk::Viewport]) {
        unsafe {
            Gfx::get().gfx_device().cmd_set_viewport(self.vk_handle, first_viewport, viewports);
        }
    }

    /// - command type: state
    /// - supported queue types: graphics
    #[inline]
    pub fn cmd_set_scissor(&self, first_scissor: u32, scissors: &[vk::Rect2D]) {
        unsafe {
            Gfx::get().gfx_device().cmd_set_scissor(self.vk_handle, first_scissor, scissors);
        }
    }

    /// 同时设置 viewport 和 scissor，覆盖整个 extent
    ///
    /// viewport 的 y 轴翻转，使得 NDC 的 y 轴朝上
    pub fn cmd_set_full_viewport(&self, extent: vk::Extent2D) {
        self.cmd_set_viewport(
            0,
            &[vk::Viewport {
                x: 0.0,
                y: extent.height as f32,
                width: extent.width as f32,
                height: -(extent.height as f32),
                min_depth: 0.0,
                max_depth: 1.0,
            }],
        );
        self.cmd_set_scissor(
            0,
            &[vk::Rect2D {
                offset: vk::Offset2D::default(),
                extent,
            }],
        );
    }
}
// 同步相关命令
impl GfxCommandBuffer {
    /// - command type: synchronize
    /// - supported queue types: graphics, compute, transfer
    #[inline]
    pub fn image_memory_barrier(&self, dependency_flags: vk::DependencyFlags, barriers: &[GfxImageBarrier]) {
        let barriers = barriers.iter().map(|b| *b.inner()).collect_vec();
        let dependency_info =
            vk::DependencyInfo::default().image_memory_barriers(&barriers).dependency_flags(dependency_flags);
        unsafe {
            Gfx::get().gfx_device().cmd_pipeline_barrier2(self.vk_handle, &dependency_info);
        }
    }
}
// debug 相关命令
impl GfxCommandBuffer {
    /// - command type: state, action
    /// - supported queue type: graphics, compute
    #[inline]
    pub fn begin_label(&self, label_name: &str, label_color: glam::Vec4) {
        let Ok(name) = std::ffi::CString::new(label_name) else {
            return;
        };
        unsafe {
            Gfx::get().gfx_device().debug_utils.cmd_begin_debug_utils_label(
                self.vk_handle,
                &vk::DebugUtilsLabelEXT::default().label_name(name.as_c_str()).color(label_color.into()),
            );
        }
    }

    /// - command type: state, action
    /// - supported queue type: graphics, compute
    #[inline]
    pub fn end_label(&self) {
        unsafe {
            Gfx::get().gfx_device().debug_utils.cmd_end_debug_utils_label(self.vk_handle);
        }
    }
}
impl DebugType for GfxCommandBuffer {
    fn debug_type_name() -> &'static str {
        "GfxCommandBuffer"
    }

    fn vk_handle(&self) -> impl vk::Handle {
        self.vk_handle
    }
}
