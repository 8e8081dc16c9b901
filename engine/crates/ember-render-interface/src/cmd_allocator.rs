use ash::vk;
use ember_gfx::{
    commands::{command_buffer::GfxCommandBuffer, command_pool::GfxCommandPool},
    gfx::Gfx,
};

use crate::frame_counter::{FrameCounter, FrameLabel};

/// 命令缓冲分配器
///
/// 每个 frame in flight 持有一个 TRANSIENT 的 command pool。
/// 帧开始时（fence 已经等待完毕）重置该帧的 pool，其中的 command buffer 可以重新录制。
/// command buffer 的名字带有帧标签：`[A]frame-main`
pub struct CmdAllocator {
    /// 为每个 frame 分配一个 command pool
    graphics_command_pools: Vec<GfxCommandPool>,

    /// 每个 pool 已经分配出去的 command buffer 数量，仅用于日志
    allocated_counts: Vec<usize>,
}

// new & init
impl CmdAllocator {
    pub fn new() -> anyhow::Result<Self> {
        let mut graphics_command_pools = Vec::with_capacity(FrameCounter::fif_count());
        for frame_label in FrameCounter::frame_labels() {
            graphics_command_pools.push(GfxCommandPool::new(
                Gfx::get().gfx_queue_family(),
                vk::CommandPoolCreateFlags::TRANSIENT,
                &format!("frame-command-pool-{}", frame_label),
            )?);
        }

        Ok(Self {
            graphics_command_pools,
            allocated_counts: vec![0; FrameCounter::fif_count()],
        })
    }
}
// destroy
impl CmdAllocator {
    /// command buffer 跟随 pool 一起释放
    pub fn destroy(self) {
        log::info!(
            "destroy CmdAllocator, allocated command buffers per frame: {:?}",
            self.allocated_counts
        );
        for pool in self.graphics_command_pools {
            pool.destroy();
        }
    }
}
// tools
impl CmdAllocator {
    /// 在某个 frame 的 pool 中分配 command buffer，可以在该 frame 的每一帧重复录制
    pub fn alloc_command_buffer(&mut self, frame_label: FrameLabel, debug_name: &str) -> anyhow::Result<GfxCommandBuffer> {
        let name = format!("[{}]{}", frame_label, debug_name);
        let cmd = GfxCommandBuffer::new(&self.graphics_command_pools[*frame_label], &name)?;
        self.allocated_counts[*frame_label] += 1;
        Ok(cmd)
    }

    /// 重置当前 frame 的 command buffers，这些 command buffers 可以重新录制
    ///
    /// 调用前需要确保该 frame 的 fence 已经 signal
    pub fn reset_frame_commands(&mut self, frame_label: FrameLabel) -> anyhow::Result<()> {
        let _span = tracy_client::span!("reset_frame_commands");
        self.graphics_command_pools[*frame_label].reset_all_buffers()
    }
}
