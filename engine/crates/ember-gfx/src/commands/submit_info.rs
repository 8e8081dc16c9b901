use ash::vk;
use itertools::Itertools;

use crate::commands::{command_buffer::GfxCommandBuffer, semaphore::GfxSemaphore};

/// 关于 vk::SubmitInfo2 的封装，更易用
///
/// 所有被引用的数组都由自身持有，在 submit_info() 时才组装指针
#[derive(Default)]
pub struct GfxSubmitInfo {
    command_buffers: Vec<vk::CommandBufferSubmitInfo<'static>>,
    wait_infos: Vec<vk::SemaphoreSubmitInfo<'static>>,
    signal_infos: Vec<vk::SemaphoreSubmitInfo<'static>>,
}

impl GfxSubmitInfo {
    pub fn new(commands: &[GfxCommandBuffer]) -> Self {
        let command_buffers = commands
            .iter()
            .map(|cmd| vk::CommandBufferSubmitInfo::default().command_buffer(cmd.vk_handle()))
            .collect_vec();

        Self {
            command_buffers,
            wait_infos: vec![],
            signal_infos: vec![],
        }
    }

    #[inline]
    pub fn submit_info(&self) -> vk::SubmitInfo2<'_> {
        vk::SubmitInfo2::default()
            .command_buffer_infos(&self.command_buffers)
            .wait_semaphore_infos(&self.wait_infos)
            .signal_semaphore_infos(&self.signal_infos)
    }

    #[inline]
    pub fn wait(mut self, semaphore: &GfxSemaphore, stage: vk::PipelineStageFlags2, value: Option<u64>) -> Self {
        self.wait_infos.push(
            vk::SemaphoreSubmitInfo::default()
                .semaphore(semaphore.handle())
                .stage_mask(stage)
                .value(value.unwrap_or_default()),
        );
        self
    }

    #[inline]
    pub fn signal(mut self, semaphore: &GfxSemaphore, stage: vk::PipelineStageFlags2, value: Option<u64>) -> Self {
        self.signal_infos.push(
            vk::SemaphoreSubmitInfo::default()
                .semaphore(semaphore.handle())
                .stage_mask(stage)
                .value(value.unwrap_or_default()),
        );
        self
    }

    #[inline]
    pub fn wait_count(&self) -> usize {
        self.wait_infos.len()
    }

    #[inline]
    pub fn signal_count(&self) -> usize {
        self.signal_infos.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_submit_info_collects_semaphores() {
        let sem = GfxSemaphore::null_for_test();
        let info = GfxSubmitInfo::new(&[])
            .wait(&sem, vk::PipelineStageFlags2::COLOR_ATTACHMENT_OUTPUT, None)
            .signal(&sem, vk::PipelineStageFlags2::ALL_COMMANDS, None);
        assert_eq!(info.wait_count(), 1);
        assert_eq!(info.signal_count(), 1);

        let raw = info.submit_info();
        assert_eq!(raw.wait_semaphore_info_count, 1);
        assert_eq!(raw.signal_semaphore_info_count, 1);
        assert_eq!(raw.command_buffer_info_count, 0);
    }
}
