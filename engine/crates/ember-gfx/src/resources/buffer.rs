use std::ptr;

use anyhow::Context;
use ash::vk;
use ash::vk::Handle;
use vk_mem::Alloc;

use crate::{foundation::debug_messenger::DebugType, gfx::Gfx};

pub struct GfxBuffer {
    handle: vk::Buffer,
    allocation: vk_mem::Allocation,

    size: vk::DeviceSize,

    /// 在初始化阶段写死，整个生命周期保持 map 状态
    map_ptr: Option<*mut u8>,

    debug_name: String,
}
impl DebugType for GfxBuffer {
    fn debug_type_name() -> &'static str {
        "GfxBuffer"
    }

    fn vk_handle(&self) -> impl vk::Handle {
        self.handle
    }
}
// init
impl GfxBuffer {
    /// - align: 当 buffer 处于一个大的 memory block 中时，align 用来指定 buffer 的起始 offset,
    ///   其实地址的内存对齐，默认对齐到 8 字节
    /// - 优先使用 device memory；需要 map 时由 vma 选择 host 可见的内存
    pub fn new(
        buffer_size: vk::DeviceSize,
        buffer_usage: vk::BufferUsageFlags,
        align: Option<vk::DeviceSize>,
        mem_map: bool,
        name: impl AsRef<str>,
    ) -> anyhow::Result<Self> {
        let buffer_ci = vk::BufferCreateInfo::default().size(buffer_size).usage(buffer_usage);
        let alloc_ci = vk_mem::AllocationCreateInfo {
            usage: vk_mem::MemoryUsage::AutoPreferDevice,
            flags: if mem_map {
                vk_mem::AllocationCreateFlags::HOST_ACCESS_RANDOM
            } else {
                vk_mem::AllocationCreateFlags::empty()
            },
            ..Default::default()
        };

        let allocator = Gfx::get().allocator();
        let align = align.unwrap_or(8);
        let (buffer, mut alloc) = unsafe { allocator.create_buffer_with_alignment(&buffer_ci, &alloc_ci, align) }
            .with_context(|| format!("gfx: create buffer {} ({} bytes)", name.as_ref(), buffer_size))?;

        let mut mapped_ptr = None;
        if mem_map {
            match unsafe { allocator.map_memory(&mut alloc) } {
                Ok(ptr) => mapped_ptr = Some(ptr),
                Err(e) => {
                    unsafe { allocator.destroy_buffer(buffer, &mut alloc) };
                    return Err(e).with_context(|| format!("gfx: map buffer {}", name.as_ref()));
                }
            }
        }

        Gfx::get().gfx_device().set_object_debug_name(buffer, format!("Buffer::{}", name.as_ref()));
        Ok(Self {
            handle: buffer,
            allocation: alloc,
            size: buffer_size,
            map_ptr: mapped_ptr,

            debug_name: name.as_ref().to_string(),
        })
    }

    #[inline]
    pub fn new_stage_buffer(size: vk::DeviceSize, debug_name: impl AsRef<str>) -> anyhow::Result<Self> {
        Self::new(size, vk::BufferUsageFlags::TRANSFER_SRC, None, true, debug_name)
    }
}
// destroy
impl GfxBuffer {
    pub fn destroy(mut self) {
        self.destroy_mut();
    }

    pub fn destroy_mut(&mut self) {
        if self.handle.is_null() {
            return;
        }
        let allocator = Gfx::get().allocator();
        unsafe {
            if self.map_ptr.take().is_some() {
                allocator.unmap_memory(&mut self.allocation);
            }
            allocator.destroy_buffer(self.handle, &mut self.allocation);
        }
        self.handle = vk::Buffer::null();
    }
}
impl Drop for GfxBuffer {
    fn drop(&mut self) {
        debug_assert!(self.handle.is_null(), "GfxBuffer {} must be destroyed manually.", self.debug_name);
    }
}
// getter
impl GfxBuffer {
    #[inline]
    pub fn vk_buffer(&self) -> vk::Buffer {
        self.handle
    }

    #[inline]
    pub fn size(&self) -> vk::DeviceSize {
        self.size
    }

    #[inline]
    pub fn debug_name(&self) -> &str {
        &self.debug_name
    }

    /// 只有创建时指定了 mem_map 才有值
    #[inline]
    pub fn mapped_ptr(&self) -> Option<*mut u8> {
        self.map_ptr
    }
}
// tools
impl GfxBuffer {
    /// 让 host 写入的数据对 device 可见；vma 负责 non coherent atom 的对齐
    #[inline]
    pub fn flush(&self, offset: vk::DeviceSize, size: vk::DeviceSize) -> anyhow::Result<()> {
        let allocator = Gfx::get().allocator();
        allocator
            .flush_allocation(&self.allocation, offset, size)
            .with_context(|| format!("gfx: flush buffer {}", self.debug_name))
    }

    /// 通过 mem map 的方式将 data 写入到 buffer 的 byte_offset 处，并 flush 写入的范围
    pub fn write_by_mmap<T: bytemuck::Pod>(&self, byte_offset: vk::DeviceSize, data: &[T]) -> anyhow::Result<()> {
        let map_ptr = self.map_ptr.with_context(|| format!("gfx: buffer {} is not mapped", self.debug_name))?;
        let bytes: &[u8] = bytemuck::cast_slice(data);
        anyhow::ensure!(
            byte_offset + bytes.len() as vk::DeviceSize <= self.size,
            "gfx: write [{}, +{}) out of buffer {} ({} bytes)",
            byte_offset,
            bytes.len(),
            self.debug_name,
            self.size
        );
        if bytes.is_empty() {
            return Ok(());
        }

        unsafe {
            ptr::copy_nonoverlapping(bytes.as_ptr(), map_ptr.add(byte_offset as usize), bytes.len());
        }
        self.flush(byte_offset, bytes.len() as vk::DeviceSize)
    }

    /// 通过 mem map 的方式将 data 传入到 buffer 起始处
    #[inline]
    pub fn transfer_data_by_mmap<T: bytemuck::Pod>(&self, data: &[T]) -> anyhow::Result<()> {
        self.write_by_mmap(0, data)
    }
}
