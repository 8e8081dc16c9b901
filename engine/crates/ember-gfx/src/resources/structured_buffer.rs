use std::marker::PhantomData;
use std::ptr::NonNull;

use anyhow::Context;
use ash::vk;

use crate::{foundation::debug_messenger::DebugType, resources::buffer::GfxBuffer};

/// buffer 内存放的是结构体的数组，始终保持 map 状态
///
/// 每个 frame in flight 持有一份，CPU 直接写入 mapped 内存，不需要加锁
pub struct GfxStructuredBuffer<T: bytemuck::Pod> {
    buffer: GfxBuffer,
    mapped: NonNull<T>,
    /// 结构体的数量
    ele_num: usize,
    _phantom: PhantomData<T>,
}

impl<T: bytemuck::Pod> GfxStructuredBuffer<T> {
    pub fn new(
        len: usize,
        buffer_usage_flags: vk::BufferUsageFlags,
        debug_name: impl AsRef<str>,
    ) -> anyhow::Result<Self> {
        // 长度为 0 的 buffer 是非法的
        let byte_size = (size_of::<T>() * len.max(1)) as vk::DeviceSize;
        let buffer = GfxBuffer::new(byte_size, buffer_usage_flags, None, true, debug_name.as_ref())?;
        let mapped = buffer
            .mapped_ptr()
            .and_then(|ptr| NonNull::new(ptr as *mut T))
            .with_context(|| format!("gfx: structured buffer {} has no mapped memory", debug_name.as_ref()))?;

        Ok(Self {
            buffer,
            mapped,
            ele_num: len,
            _phantom: PhantomData,
        })
    }

    #[inline]
    pub fn new_ubo(len: usize, debug_name: impl AsRef<str>) -> anyhow::Result<Self> {
        Self::new(len, vk::BufferUsageFlags::UNIFORM_BUFFER, debug_name)
    }

    #[inline]
    pub fn new_ssbo(len: usize, debug_name: impl AsRef<str>) -> anyhow::Result<Self> {
        Self::new(len, vk::BufferUsageFlags::STORAGE_BUFFER, debug_name)
    }

    pub fn destroy(self) {
        self.buffer.destroy();
    }
}
// getters
impl<T: bytemuck::Pod> GfxStructuredBuffer<T> {
    #[inline]
    pub fn len(&self) -> usize {
        self.ele_num
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.ele_num == 0
    }

    #[inline]
    pub fn vk_buffer(&self) -> vk::Buffer {
        self.buffer.vk_buffer()
    }

    #[inline]
    pub fn buffer(&self) -> &GfxBuffer {
        &self.buffer
    }

    #[inline]
    pub fn byte_size(&self) -> vk::DeviceSize {
        self.buffer.size()
    }
}
// tools
impl<T: bytemuck::Pod> GfxStructuredBuffer<T> {
    #[inline]
    pub fn mapped_slice(&mut self) -> &mut [T] {
        unsafe { std::slice::from_raw_parts_mut(self.mapped.as_ptr(), self.ele_num) }
    }

    /// flush 下标在 [first, first + count) 范围内的元素
    pub fn flush_range(&self, first: usize, count: usize) -> anyhow::Result<()> {
        if count == 0 {
            return Ok(());
        }
        let ele_size = size_of::<T>() as vk::DeviceSize;
        self.buffer.flush(first as vk::DeviceSize * ele_size, count as vk::DeviceSize * ele_size)
    }

    /// 写入数据到 [0, data.len())，并 flush 写入的范围
    pub fn transfer_data_by_mmap(&mut self, data: &[T]) -> anyhow::Result<()> {
        anyhow::ensure!(
            data.len() <= self.ele_num,
            "gfx: {} elements exceed structured buffer {} capacity {}",
            data.len(),
            self.buffer.debug_name(),
            self.ele_num
        );
        self.mapped_slice()[..data.len()].copy_from_slice(data);
        self.flush_range(0, data.len())
    }
}

impl<T: bytemuck::Pod> DebugType for GfxStructuredBuffer<T> {
    #[inline]
    fn debug_type_name() -> &'static str {
        "GfxStructuredBuffer"
    }

    #[inline]
    fn vk_handle(&self) -> impl vk::Handle {
        self.vk_buffer()
    }
}
